use anyhow::Result;
use itertools::Itertools;
use log::debug;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::logic::{reconcile_steps, StepPlan};
use crate::model::{
    Case, CaseFilter, CaseStep, CaseVersion, CaseVersionFilter, CaseVersionSelection,
    CaseVersionStatus, CaseVersionUpdate, Environment, EnvironmentFilter, Id, NewCase,
    NewCaseVersion, NewEnvironment, NewProduct, NewProductVersion, NewTag, NewUser, Page,
    PageRequest, Product, ProductFilter, ProductUpdate, ProductVersion, ProductVersionFilter,
    ProductVersionSpec, ProductVersionUpdate, SelectionFilter, Tag, TagFilter, User,
};
use crate::store::traits::{
    CaseStore, CaseVersionStore, EnvironmentStore, ProductStore, ProductVersionStore, TagStore,
    UserStore,
};

/// Rows of one table with its id sequence.
#[derive(Debug)]
struct Table<T> {
    rows: BTreeMap<Id, T>,
    next_id: Id,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl<T> Table<T> {
    fn allocate(&mut self) -> Id {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[derive(Debug)]
struct ProductVersionRow {
    productversion: ProductVersion,
    environment_ids: BTreeSet<Id>,
}

/// A case version without its steps; steps live in their own table.
#[derive(Debug)]
struct CaseVersionRow {
    id: Id,
    case_id: Id,
    productversion_id: Id,
    name: String,
    description: String,
    status: CaseVersionStatus,
    created_by: Option<String>,
    tag_ids: BTreeSet<Id>,
    environment_ids: BTreeSet<Id>,
}

#[derive(Debug)]
struct ApiKeyRow {
    user_id: Id,
    active: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    products: Table<Product>,
    productversions: Table<ProductVersionRow>,
    cases: Table<Case>,
    caseversions: Table<CaseVersionRow>,
    steps: Table<CaseStep>,
    tags: Table<Tag>,
    environments: Table<Environment>,
    users: Table<User>,
    api_keys: HashMap<String, ApiKeyRow>,
}

impl MemoryState {
    fn steps_of(&self, caseversion_id: Id) -> Vec<CaseStep> {
        self.steps
            .rows
            .values()
            .filter(|s| s.caseversion_id == caseversion_id)
            .cloned()
            .sorted_by_key(|s| s.number)
            .collect()
    }

    fn assemble(&self, row: &CaseVersionRow) -> CaseVersion {
        CaseVersion {
            id: row.id,
            case_id: row.case_id,
            productversion_id: row.productversion_id,
            name: row.name.clone(),
            description: row.description.clone(),
            status: row.status,
            created_by: row.created_by.clone(),
            steps: self.steps_of(row.id),
            tag_ids: row.tag_ids.iter().copied().collect(),
            environment_ids: row.environment_ids.iter().copied().collect(),
        }
    }

    fn product_of_productversion(&self, productversion_id: Id) -> Option<&Product> {
        let row = self.productversions.rows.get(&productversion_id)?;
        self.products.rows.get(&row.productversion.product_id)
    }

    fn selection(&self, row: &CaseVersionRow) -> Option<CaseVersionSelection> {
        let productversion = &self.productversions.rows.get(&row.productversion_id)?.productversion;
        let product = self.products.rows.get(&productversion.product_id)?;
        let newest_of_case = self
            .caseversions
            .rows
            .values()
            .filter(|cv| cv.case_id == row.case_id)
            .map(|cv| cv.id)
            .max();

        Some(CaseVersionSelection {
            id: row.id,
            name: row.name.clone(),
            case_id: row.case_id,
            status: row.status,
            created_by: row.created_by.clone(),
            latest: newest_of_case == Some(row.id),
            product_id: product.id,
            product_name: product.name.clone(),
            productversion: productversion.clone(),
            tags: row
                .tag_ids
                .iter()
                .filter_map(|id| self.tags.rows.get(id).cloned())
                .collect(),
        })
    }

    fn get_or_create_version(&mut self, product_id: Id, spec: ProductVersionSpec) {
        let exists = self.productversions.rows.values().any(|row| {
            row.productversion.product_id == product_id
                && row.productversion.version == spec.version
                && row.productversion.codename == spec.codename
        });
        if exists {
            return;
        }

        let id = self.productversions.allocate();
        self.productversions.rows.insert(
            id,
            ProductVersionRow {
                productversion: ProductVersion {
                    id,
                    product_id,
                    version: spec.version,
                    codename: spec.codename,
                },
                environment_ids: BTreeSet::new(),
            },
        );
    }

    fn insert_step(&mut self, caseversion_id: Id, number: i32, instruction: String, expected: String) {
        let id = self.steps.allocate();
        self.steps.rows.insert(
            id,
            CaseStep {
                id,
                caseversion_id,
                number,
                instruction,
                expected,
            },
        );
    }

    fn remove_caseversion(&mut self, id: Id) -> bool {
        if self.caseversions.rows.remove(&id).is_none() {
            return false;
        }
        self.steps.rows.retain(|_, s| s.caseversion_id != id);
        true
    }

    fn remove_caseversions_where(&mut self, predicate: impl Fn(&CaseVersionRow) -> bool) {
        let doomed: Vec<Id> = self
            .caseversions
            .rows
            .values()
            .filter(|row| predicate(row))
            .map(|row| row.id)
            .collect();
        for id in doomed {
            self.remove_caseversion(id);
        }
    }

    fn remove_productversion(&mut self, id: Id) -> bool {
        if self.productversions.rows.remove(&id).is_none() {
            return false;
        }
        self.remove_caseversions_where(|row| row.productversion_id == id);
        true
    }

    fn remove_case(&mut self, id: Id) -> bool {
        if self.cases.rows.remove(&id).is_none() {
            return false;
        }
        self.remove_caseversions_where(|row| row.case_id == id);
        true
    }
}

/// Store keeping everything in process memory.
///
/// Each operation holds the state lock for its whole duration, which makes
/// every write atomic and isolated from concurrent requests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProductStore for MemoryStore {
    async fn get_product(&self, id: Id) -> Result<Option<Product>> {
        Ok(self.state.read().products.rows.get(&id).cloned())
    }

    async fn list_products(&self, filter: &ProductFilter, page: PageRequest) -> Result<Page<Product>> {
        let state = self.state.read();
        let products = state
            .products
            .rows
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        Ok(Page::from_vec(products, page))
    }

    async fn create_product(&self, product: NewProduct, versions: Vec<ProductVersionSpec>) -> Result<Product> {
        let mut state = self.state.write();
        let id = state.products.allocate();
        let product = Product {
            id,
            name: product.name,
            description: product.description,
        };
        state.products.rows.insert(id, product.clone());
        for spec in versions {
            state.get_or_create_version(id, spec);
        }
        Ok(product)
    }

    async fn update_product(
        &self,
        id: Id,
        update: ProductUpdate,
        versions: Vec<ProductVersionSpec>,
    ) -> Result<Option<Product>> {
        let mut state = self.state.write();
        let Some(product) = state.products.rows.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            product.name = name;
        }
        if let Some(description) = update.description {
            product.description = description;
        }
        let product = product.clone();

        for spec in versions {
            state.get_or_create_version(id, spec);
        }
        Ok(Some(product))
    }

    async fn delete_product(&self, id: Id) -> Result<bool> {
        let mut state = self.state.write();
        if state.products.rows.remove(&id).is_none() {
            return Ok(false);
        }

        let versions: Vec<Id> = state
            .productversions
            .rows
            .values()
            .filter(|row| row.productversion.product_id == id)
            .map(|row| row.productversion.id)
            .collect();
        for version in versions {
            state.remove_productversion(version);
        }
        let cases: Vec<Id> = state
            .cases
            .rows
            .values()
            .filter(|c| c.product_id == id)
            .map(|c| c.id)
            .collect();
        for case in cases {
            state.remove_case(case);
        }
        for tag in state.tags.rows.values_mut() {
            if tag.product_id == Some(id) {
                tag.product_id = None;
            }
        }
        Ok(true)
    }
}

#[async_trait::async_trait]
impl ProductVersionStore for MemoryStore {
    async fn get_productversion(&self, id: Id) -> Result<Option<ProductVersion>> {
        Ok(self
            .state
            .read()
            .productversions
            .rows
            .get(&id)
            .map(|row| row.productversion.clone()))
    }

    async fn list_productversions(
        &self,
        filter: &ProductVersionFilter,
        page: PageRequest,
    ) -> Result<Page<ProductVersion>> {
        let state = self.state.read();
        let productversions = state
            .productversions
            .rows
            .values()
            .map(|row| &row.productversion)
            .filter(|pv| {
                let product_name = state
                    .products
                    .rows
                    .get(&pv.product_id)
                    .map(|p| p.name.as_str())
                    .unwrap_or_default();
                filter.matches(pv, product_name)
            })
            .cloned()
            .collect();
        Ok(Page::from_vec(productversions, page))
    }

    async fn create_productversion(&self, productversion: NewProductVersion) -> Result<ProductVersion> {
        let mut state = self.state.write();
        let id = state.productversions.allocate();
        let created = ProductVersion {
            id,
            product_id: productversion.product_id,
            version: productversion.version,
            codename: productversion.codename,
        };
        state.productversions.rows.insert(
            id,
            ProductVersionRow {
                productversion: created.clone(),
                environment_ids: productversion.environment_ids.into_iter().collect(),
            },
        );
        Ok(created)
    }

    async fn update_productversion(
        &self,
        id: Id,
        update: ProductVersionUpdate,
    ) -> Result<Option<ProductVersion>> {
        let mut state = self.state.write();
        let Some(row) = state.productversions.rows.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(version) = update.version {
            row.productversion.version = version;
        }
        if let Some(codename) = update.codename {
            row.productversion.codename = codename;
        }
        if let Some(diff) = &update.environments {
            diff.apply(&mut row.environment_ids);
        }
        Ok(Some(row.productversion.clone()))
    }

    async fn delete_productversion(&self, id: Id) -> Result<bool> {
        Ok(self.state.write().remove_productversion(id))
    }

    async fn productversion_environments(&self, id: Id) -> Result<Vec<Environment>> {
        let state = self.state.read();
        let Some(row) = state.productversions.rows.get(&id) else {
            return Ok(Vec::new());
        };
        Ok(row
            .environment_ids
            .iter()
            .filter_map(|env| state.environments.rows.get(env).cloned())
            .collect())
    }
}

#[async_trait::async_trait]
impl CaseStore for MemoryStore {
    async fn get_case(&self, id: Id) -> Result<Option<Case>> {
        Ok(self.state.read().cases.rows.get(&id).cloned())
    }

    async fn list_cases(&self, filter: &CaseFilter, page: PageRequest) -> Result<Page<Case>> {
        let state = self.state.read();
        let cases = state
            .cases
            .rows
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        Ok(Page::from_vec(cases, page))
    }

    async fn create_case(&self, case: NewCase) -> Result<Case> {
        let mut state = self.state.write();
        let id = state.cases.allocate();
        let case = Case {
            id,
            product_id: case.product_id,
        };
        state.cases.rows.insert(id, case.clone());
        Ok(case)
    }

    async fn delete_case(&self, id: Id) -> Result<bool> {
        Ok(self.state.write().remove_case(id))
    }
}

#[async_trait::async_trait]
impl CaseVersionStore for MemoryStore {
    async fn get_caseversion(&self, id: Id) -> Result<Option<CaseVersion>> {
        let state = self.state.read();
        Ok(state.caseversions.rows.get(&id).map(|row| state.assemble(row)))
    }

    async fn list_caseversions(
        &self,
        filter: &CaseVersionFilter,
        page: PageRequest,
    ) -> Result<Page<CaseVersion>> {
        let state = self.state.read();
        let caseversions = state
            .caseversions
            .rows
            .values()
            .map(|row| state.assemble(row))
            .filter(|cv| {
                let product_id = state
                    .product_of_productversion(cv.productversion_id)
                    .map(|p| p.id)
                    .unwrap_or_default();
                filter.matches(cv, product_id)
            })
            .collect();
        Ok(Page::from_vec(caseversions, page))
    }

    async fn create_caseversion(&self, caseversion: NewCaseVersion) -> Result<CaseVersion> {
        let mut state = self.state.write();
        let id = state.caseversions.allocate();
        state.caseversions.rows.insert(
            id,
            CaseVersionRow {
                id,
                case_id: caseversion.case_id,
                productversion_id: caseversion.productversion_id,
                name: caseversion.name,
                description: caseversion.description,
                status: caseversion.status,
                created_by: caseversion.created_by,
                tag_ids: caseversion.tag_ids.into_iter().collect(),
                environment_ids: caseversion.environment_ids.into_iter().collect(),
            },
        );
        for step in caseversion.steps {
            state.insert_step(id, step.number, step.instruction, step.expected);
        }

        let row = &state.caseversions.rows[&id];
        Ok(state.assemble(row))
    }

    async fn update_caseversion(&self, id: Id, update: CaseVersionUpdate) -> Result<Option<CaseVersion>> {
        let mut state = self.state.write();
        if !state.caseversions.rows.contains_key(&id) {
            return Ok(None);
        }
        let plan = match &update.steps {
            Some(desired) => reconcile_steps(&state.steps_of(id), desired)?,
            None => StepPlan::default(),
        };

        if let Some(row) = state.caseversions.rows.get_mut(&id) {
            if let Some(name) = update.name {
                row.name = name;
            }
            if let Some(description) = update.description {
                row.description = description;
            }
            if let Some(status) = update.status {
                row.status = status;
            }
            if let Some(diff) = &update.tags {
                diff.apply(&mut row.tag_ids);
            }
            if let Some(diff) = &update.environments {
                diff.apply(&mut row.environment_ids);
            }
        }

        debug!(
            "Reconciling steps of caseversion {}: {} created, {} updated, {} deleted",
            id,
            plan.create.len(),
            plan.update.len(),
            plan.delete.len()
        );
        for step_id in &plan.delete {
            state.steps.rows.remove(step_id);
        }
        for step in plan.update {
            if let Some(stored) = state.steps.rows.get_mut(&step.id) {
                stored.number = step.number;
                stored.instruction = step.instruction;
                stored.expected = step.expected;
            }
        }
        for step in plan.create {
            state.insert_step(id, step.number, step.instruction, step.expected);
        }

        let row = &state.caseversions.rows[&id];
        Ok(Some(state.assemble(row)))
    }

    async fn delete_caseversion(&self, id: Id) -> Result<bool> {
        Ok(self.state.write().remove_caseversion(id))
    }

    async fn get_casestep(&self, id: Id) -> Result<Option<CaseStep>> {
        Ok(self.state.read().steps.rows.get(&id).cloned())
    }

    async fn get_selection(&self, id: Id) -> Result<Option<CaseVersionSelection>> {
        let state = self.state.read();
        Ok(state
            .caseversions
            .rows
            .get(&id)
            .and_then(|row| state.selection(row)))
    }

    async fn list_selections(
        &self,
        filter: &SelectionFilter,
        page: PageRequest,
    ) -> Result<Page<CaseVersionSelection>> {
        let state = self.state.read();
        let rows = state
            .caseversions
            .rows
            .values()
            .filter_map(|row| state.selection(row))
            .filter(|selection| filter.matches(selection))
            .collect();
        Ok(Page::from_vec(rows, page))
    }
}

#[async_trait::async_trait]
impl TagStore for MemoryStore {
    async fn get_tag(&self, id: Id) -> Result<Option<Tag>> {
        Ok(self.state.read().tags.rows.get(&id).cloned())
    }

    async fn list_tags(&self, filter: &TagFilter, page: PageRequest) -> Result<Page<Tag>> {
        let state = self.state.read();
        let tags = state
            .tags
            .rows
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        Ok(Page::from_vec(tags, page))
    }

    async fn create_tag(&self, tag: NewTag) -> Result<Tag> {
        let mut state = self.state.write();
        let id = state.tags.allocate();
        let tag = Tag {
            id,
            name: tag.name,
            description: tag.description,
            product_id: tag.product_id,
        };
        state.tags.rows.insert(id, tag.clone());
        Ok(tag)
    }

    async fn update_tag(&self, id: Id, tag: NewTag) -> Result<Option<Tag>> {
        let mut state = self.state.write();
        let Some(stored) = state.tags.rows.get_mut(&id) else {
            return Ok(None);
        };
        stored.name = tag.name;
        stored.description = tag.description;
        stored.product_id = tag.product_id;
        Ok(Some(stored.clone()))
    }

    async fn delete_tag(&self, id: Id) -> Result<bool> {
        let mut state = self.state.write();
        if state.tags.rows.remove(&id).is_none() {
            return Ok(false);
        }
        for row in state.caseversions.rows.values_mut() {
            row.tag_ids.remove(&id);
        }
        Ok(true)
    }
}

#[async_trait::async_trait]
impl EnvironmentStore for MemoryStore {
    async fn get_environment(&self, id: Id) -> Result<Option<Environment>> {
        Ok(self.state.read().environments.rows.get(&id).cloned())
    }

    async fn list_environments(
        &self,
        filter: &EnvironmentFilter,
        page: PageRequest,
    ) -> Result<Page<Environment>> {
        let state = self.state.read();
        let environments = state
            .environments
            .rows
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        Ok(Page::from_vec(environments, page))
    }

    async fn create_environment(&self, environment: NewEnvironment) -> Result<Environment> {
        let mut state = self.state.write();
        let id = state.environments.allocate();
        let environment = Environment {
            id,
            name: environment.name,
            description: environment.description,
        };
        state.environments.rows.insert(id, environment.clone());
        Ok(environment)
    }

    async fn update_environment(&self, id: Id, environment: NewEnvironment) -> Result<Option<Environment>> {
        let mut state = self.state.write();
        let Some(stored) = state.environments.rows.get_mut(&id) else {
            return Ok(None);
        };
        stored.name = environment.name;
        stored.description = environment.description;
        Ok(Some(stored.clone()))
    }

    async fn delete_environment(&self, id: Id) -> Result<bool> {
        let mut state = self.state.write();
        if state.environments.rows.remove(&id).is_none() {
            return Ok(false);
        }
        for row in state.caseversions.rows.values_mut() {
            row.environment_ids.remove(&id);
        }
        for row in state.productversions.rows.values_mut() {
            row.environment_ids.remove(&id);
        }
        Ok(true)
    }
}

#[async_trait::async_trait]
impl UserStore for MemoryStore {
    async fn upsert_user(&self, user: NewUser) -> Result<User> {
        let mut state = self.state.write();
        if let Some(stored) = state
            .users
            .rows
            .values_mut()
            .find(|u| u.username == user.username)
        {
            stored.permissions = user.permissions;
            stored.is_superuser = user.is_superuser;
            return Ok(stored.clone());
        }

        let id = state.users.allocate();
        let created = User {
            id,
            username: user.username,
            permissions: user.permissions,
            is_superuser: user.is_superuser,
        };
        state.users.rows.insert(id, created.clone());
        Ok(created)
    }

    async fn add_api_key(&self, user_id: Id, key_digest: &str) -> Result<()> {
        let mut state = self.state.write();
        if !state.users.rows.contains_key(&user_id) {
            anyhow::bail!("User not found: {}", user_id);
        }
        state.api_keys.insert(
            key_digest.to_string(),
            ApiKeyRow {
                user_id,
                active: true,
            },
        );
        Ok(())
    }

    async fn replace_api_keys(&self, user_id: Id, key_digest: &str) -> Result<()> {
        let mut state = self.state.write();
        if !state.users.rows.contains_key(&user_id) {
            anyhow::bail!("User not found: {}", user_id);
        }
        for key in state.api_keys.values_mut().filter(|key| key.user_id == user_id) {
            key.active = false;
        }
        state.api_keys.insert(
            key_digest.to_string(),
            ApiKeyRow {
                user_id,
                active: true,
            },
        );
        Ok(())
    }

    async fn find_user_by_api_key(&self, username: &str, key_digest: &str) -> Result<Option<User>> {
        let state = self.state.read();
        Ok(state
            .api_keys
            .get(key_digest)
            .filter(|key| key.active)
            .and_then(|key| state.users.rows.get(&key.user_id))
            .filter(|user| user.username == username)
            .cloned())
    }
}

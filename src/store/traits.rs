use crate::model::{
    Case, CaseFilter, CaseStep, CaseVersion, CaseVersionFilter, CaseVersionSelection,
    CaseVersionUpdate, Environment, EnvironmentFilter, Id, NewCase, NewCaseVersion,
    NewEnvironment, NewProduct, NewProductVersion, NewTag, NewUser, Page, PageRequest, Product,
    ProductFilter, ProductUpdate, ProductVersion, ProductVersionFilter, ProductVersionSpec,
    ProductVersionUpdate, SelectionFilter, Tag, TagFilter, User,
};
use anyhow::Result;

#[async_trait::async_trait]
pub trait ProductStore: Send + Sync {
    async fn get_product(&self, id: Id) -> Result<Option<Product>>;
    async fn list_products(&self, filter: &ProductFilter, page: PageRequest) -> Result<Page<Product>>;
    /// Create a product and get-or-create each of its versions, in one transaction
    async fn create_product(&self, product: NewProduct, versions: Vec<ProductVersionSpec>) -> Result<Product>;
    /// Update scalar fields and get-or-create versions. Existing versions are never touched.
    async fn update_product(
        &self,
        id: Id,
        update: ProductUpdate,
        versions: Vec<ProductVersionSpec>,
    ) -> Result<Option<Product>>;
    /// Delete a product together with its versions, cases and case versions
    async fn delete_product(&self, id: Id) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait ProductVersionStore: Send + Sync {
    async fn get_productversion(&self, id: Id) -> Result<Option<ProductVersion>>;
    async fn list_productversions(
        &self,
        filter: &ProductVersionFilter,
        page: PageRequest,
    ) -> Result<Page<ProductVersion>>;
    async fn create_productversion(&self, productversion: NewProductVersion) -> Result<ProductVersion>;
    async fn update_productversion(
        &self,
        id: Id,
        update: ProductVersionUpdate,
    ) -> Result<Option<ProductVersion>>;
    async fn delete_productversion(&self, id: Id) -> Result<bool>;
    /// Environments linked to a product version, ordered by id
    async fn productversion_environments(&self, id: Id) -> Result<Vec<Environment>>;
}

#[async_trait::async_trait]
pub trait CaseStore: Send + Sync {
    async fn get_case(&self, id: Id) -> Result<Option<Case>>;
    async fn list_cases(&self, filter: &CaseFilter, page: PageRequest) -> Result<Page<Case>>;
    async fn create_case(&self, case: NewCase) -> Result<Case>;
    async fn delete_case(&self, id: Id) -> Result<bool>;
}

/// Case versions, their owned steps and their tag/environment links.
///
/// Every write runs in a single transaction; step queries are always
/// scoped by the owning case version.
#[async_trait::async_trait]
pub trait CaseVersionStore: Send + Sync {
    async fn get_caseversion(&self, id: Id) -> Result<Option<CaseVersion>>;
    async fn list_caseversions(
        &self,
        filter: &CaseVersionFilter,
        page: PageRequest,
    ) -> Result<Page<CaseVersion>>;
    async fn create_caseversion(&self, caseversion: NewCaseVersion) -> Result<CaseVersion>;
    /// Apply scalar changes, the step plan and link diffs of one case version
    async fn update_caseversion(&self, id: Id, update: CaseVersionUpdate) -> Result<Option<CaseVersion>>;
    async fn delete_caseversion(&self, id: Id) -> Result<bool>;
    async fn get_casestep(&self, id: Id) -> Result<Option<CaseStep>>;
    async fn get_selection(&self, id: Id) -> Result<Option<CaseVersionSelection>>;
    async fn list_selections(
        &self,
        filter: &SelectionFilter,
        page: PageRequest,
    ) -> Result<Page<CaseVersionSelection>>;
}

#[async_trait::async_trait]
pub trait TagStore: Send + Sync {
    async fn get_tag(&self, id: Id) -> Result<Option<Tag>>;
    async fn list_tags(&self, filter: &TagFilter, page: PageRequest) -> Result<Page<Tag>>;
    async fn create_tag(&self, tag: NewTag) -> Result<Tag>;
    async fn update_tag(&self, id: Id, tag: NewTag) -> Result<Option<Tag>>;
    async fn delete_tag(&self, id: Id) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait EnvironmentStore: Send + Sync {
    async fn get_environment(&self, id: Id) -> Result<Option<Environment>>;
    async fn list_environments(
        &self,
        filter: &EnvironmentFilter,
        page: PageRequest,
    ) -> Result<Page<Environment>>;
    async fn create_environment(&self, environment: NewEnvironment) -> Result<Environment>;
    async fn update_environment(&self, id: Id, environment: NewEnvironment) -> Result<Option<Environment>>;
    async fn delete_environment(&self, id: Id) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Create the user, or replace permissions of the user with that name
    async fn upsert_user(&self, user: NewUser) -> Result<User>;
    /// Register an API key digest for a user
    async fn add_api_key(&self, user_id: Id, key_digest: &str) -> Result<()>;
    /// Make `key_digest` the user's only active key
    async fn replace_api_keys(&self, user_id: Id, key_digest: &str) -> Result<()>;
    /// Owner of an active key, if its username matches
    async fn find_user_by_api_key(&self, username: &str, key_digest: &str) -> Result<Option<User>>;
}

pub trait Store:
    ProductStore
    + ProductVersionStore
    + CaseStore
    + CaseVersionStore
    + TagStore
    + EnvironmentStore
    + UserStore
    + Send
    + Sync
{
}

impl<T> Store for T where
    T: ProductStore
        + ProductVersionStore
        + CaseStore
        + CaseVersionStore
        + TagStore
        + EnvironmentStore
        + UserStore
        + Send
        + Sync
{
}

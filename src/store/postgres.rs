use anyhow::{Context, Result};
use itertools::Itertools;
use log::debug;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Postgres, QueryBuilder, Row, Transaction,
};
use std::collections::HashMap;

use crate::logic::{reconcile_steps, LinkDiff, StepPlan};
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

const CASEVERSION_COLUMNS: &str =
    "cv.id, cv.case_id, cv.productversion_id, cv.name, cv.description, cv.status, cv.created_by";

const CASEVERSION_FROM: &str =
    "caseversions cv JOIN productversions pv ON pv.id = cv.productversion_id";

const SELECTION_COLUMNS: &str = "cv.id, cv.name, cv.case_id, cv.status, cv.created_by, \
     cv.id = (SELECT MAX(o.id) FROM caseversions o WHERE o.case_id = cv.case_id) AS latest, \
     p.id AS product_id, p.name AS product_name, \
     pv.id AS pv_id, pv.version, pv.codename";

const SELECTION_FROM: &str = "caseversions cv \
     JOIN productversions pv ON pv.id = cv.productversion_id \
     JOIN products p ON p.id = pv.product_id";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Run the embedded database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run a filtered list query twice: once for the total count and once
    /// for the requested window.
    async fn fetch_page(
        &self,
        columns: &str,
        from: &str,
        order_by: &str,
        page: PageRequest,
        filters: impl Fn(&mut QueryBuilder<'_, Postgres>) + Send + Sync,
    ) -> Result<(Vec<PgRow>, usize)> {
        let mut count = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {} WHERE TRUE", from));
        filters(&mut count);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .context("Failed to count rows")?;

        let mut query =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM {} WHERE TRUE", columns, from));
        filters(&mut query);
        query.push(format!(" ORDER BY {} LIMIT ", order_by));
        query.push_bind(page.sql_limit());
        query.push(" OFFSET ");
        query.push_bind(page.sql_offset());
        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch rows")?;

        Ok((rows, usize::try_from(total).unwrap_or_default()))
    }

    /// Attach steps and link ids to case version rows, loading each
    /// collection for all rows at once.
    async fn load_caseversions(&self, rows: Vec<PgRow>) -> Result<Vec<CaseVersion>> {
        let mut caseversions = rows
            .iter()
            .map(caseversion_from_row)
            .collect::<Result<Vec<_>>>()?;
        let ids: Vec<Id> = caseversions.iter().map(|cv| cv.id).collect();
        if ids.is_empty() {
            return Ok(caseversions);
        }

        let mut steps = sqlx::query(
            "SELECT id, caseversion_id, number, instruction, expected FROM casesteps \
             WHERE caseversion_id = ANY($1) ORDER BY number",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load case steps")?
        .iter()
        .map(step_from_row)
        .into_group_map_by(|s| s.caseversion_id);

        let mut tags = self
            .load_links("caseversion_tags", "tag_id", &ids)
            .await?;
        let mut environments = self
            .load_links("caseversion_environments", "environment_id", &ids)
            .await?;

        for cv in &mut caseversions {
            cv.steps = steps.remove(&cv.id).unwrap_or_default();
            cv.tag_ids = tags.remove(&cv.id).unwrap_or_default();
            cv.environment_ids = environments.remove(&cv.id).unwrap_or_default();
        }
        Ok(caseversions)
    }

    async fn load_links(&self, table: &str, column: &str, ids: &[Id]) -> Result<HashMap<Id, Vec<Id>>> {
        let rows = sqlx::query(&format!(
            "SELECT caseversion_id, {column} FROM {table} WHERE caseversion_id = ANY($1) ORDER BY {column}"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to load {}", table))?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<Id, _>("caseversion_id"), row.get::<Id, _>(column)))
            .into_group_map())
    }

    async fn load_selections(&self, rows: Vec<PgRow>) -> Result<Vec<CaseVersionSelection>> {
        let mut selections = rows
            .iter()
            .map(selection_from_row)
            .collect::<Result<Vec<_>>>()?;
        let ids: Vec<Id> = selections.iter().map(|s| s.id).collect();
        if ids.is_empty() {
            return Ok(selections);
        }

        let mut tags = sqlx::query(
            "SELECT ct.caseversion_id, t.id, t.name, t.description, t.product_id \
             FROM caseversion_tags ct JOIN tags t ON t.id = ct.tag_id \
             WHERE ct.caseversion_id = ANY($1) ORDER BY t.id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load selection tags")?
        .iter()
        .map(|row| (row.get::<Id, _>("caseversion_id"), tag_from_row(row)))
        .into_group_map();

        for selection in &mut selections {
            selection.tags = tags.remove(&selection.id).unwrap_or_default();
        }
        Ok(selections)
    }
}

fn product_from_row(row: &PgRow) -> Product {
    Product {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
    }
}

fn productversion_from_row(row: &PgRow) -> ProductVersion {
    ProductVersion {
        id: row.get("id"),
        product_id: row.get("product_id"),
        version: row.get("version"),
        codename: row.get("codename"),
    }
}

fn case_from_row(row: &PgRow) -> Case {
    Case {
        id: row.get("id"),
        product_id: row.get("product_id"),
    }
}

fn parse_status(row: &PgRow) -> Result<CaseVersionStatus> {
    row.get::<String, _>("status")
        .parse()
        .map_err(anyhow::Error::msg)
}

fn caseversion_from_row(row: &PgRow) -> Result<CaseVersion> {
    Ok(CaseVersion {
        id: row.get("id"),
        case_id: row.get("case_id"),
        productversion_id: row.get("productversion_id"),
        name: row.get("name"),
        description: row.get("description"),
        status: parse_status(row)?,
        created_by: row.get("created_by"),
        steps: Vec::new(),
        tag_ids: Vec::new(),
        environment_ids: Vec::new(),
    })
}

fn step_from_row(row: &PgRow) -> CaseStep {
    CaseStep {
        id: row.get("id"),
        caseversion_id: row.get("caseversion_id"),
        number: row.get("number"),
        instruction: row.get("instruction"),
        expected: row.get("expected"),
    }
}

fn selection_from_row(row: &PgRow) -> Result<CaseVersionSelection> {
    let product_id: Id = row.get("product_id");
    Ok(CaseVersionSelection {
        id: row.get("id"),
        name: row.get("name"),
        case_id: row.get("case_id"),
        status: parse_status(row)?,
        created_by: row.get("created_by"),
        latest: row.get("latest"),
        product_id,
        product_name: row.get("product_name"),
        productversion: ProductVersion {
            id: row.get("pv_id"),
            product_id,
            version: row.get("version"),
            codename: row.get("codename"),
        },
        tags: Vec::new(),
    })
}

fn tag_from_row(row: &PgRow) -> Tag {
    Tag {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        product_id: row.get("product_id"),
    }
}

fn environment_from_row(row: &PgRow) -> Environment {
    Environment {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        permissions: row.get::<Vec<String>, _>("permissions").into_iter().collect(),
        is_superuser: row.get("is_superuser"),
    }
}

async fn get_or_create_version(
    tx: &mut Transaction<'_, Postgres>,
    product_id: Id,
    spec: &ProductVersionSpec,
) -> Result<()> {
    let existing: Option<Id> = sqlx::query_scalar(
        "SELECT id FROM productversions WHERE product_id = $1 AND version = $2 AND codename = $3",
    )
    .bind(product_id)
    .bind(&spec.version)
    .bind(&spec.codename)
    .fetch_optional(&mut **tx)
    .await
    .context("Failed to look up product version")?;

    if existing.is_none() {
        sqlx::query("INSERT INTO productversions (product_id, version, codename) VALUES ($1, $2, $3)")
            .bind(product_id)
            .bind(&spec.version)
            .bind(&spec.codename)
            .execute(&mut **tx)
            .await
            .context("Failed to create product version")?;
    }
    Ok(())
}

/// Insert the given links; links already present are left alone.
async fn insert_links(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    owner_column: &str,
    column: &str,
    owner: Id,
    ids: &[Id],
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query(&format!(
        "INSERT INTO {table} ({owner_column}, {column}) SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING"
    ))
    .bind(owner)
    .bind(ids)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("Failed to insert into {}", table))?;
    Ok(())
}

async fn apply_link_diff(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    owner_column: &str,
    column: &str,
    owner: Id,
    diff: &LinkDiff,
) -> Result<()> {
    if !diff.remove.is_empty() {
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE {owner_column} = $1 AND {column} = ANY($2)"
        ))
        .bind(owner)
        .bind(&diff.remove)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("Failed to delete from {}", table))?;
    }
    insert_links(tx, table, owner_column, column, owner, &diff.add).await
}

async fn insert_step(
    tx: &mut Transaction<'_, Postgres>,
    caseversion_id: Id,
    number: i32,
    instruction: &str,
    expected: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO casesteps (caseversion_id, number, instruction, expected) VALUES ($1, $2, $3, $4)",
    )
    .bind(caseversion_id)
    .bind(number)
    .bind(instruction)
    .bind(expected)
    .execute(&mut **tx)
    .await
    .context("Failed to insert case step")?;
    Ok(())
}

#[async_trait::async_trait]
impl ProductStore for PostgresStore {
    async fn get_product(&self, id: Id) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT id, name, description FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch product")?;

        Ok(row.as_ref().map(product_from_row))
    }

    async fn list_products(&self, filter: &ProductFilter, page: PageRequest) -> Result<Page<Product>> {
        let (rows, total_count) = self
            .fetch_page("id, name, description", "products", "id", page, |q| {
                if let Some(name) = &filter.name {
                    q.push(" AND name = ").push_bind(name.clone());
                }
            })
            .await?;

        Ok(Page {
            items: rows.iter().map(product_from_row).collect(),
            total_count,
        })
    }

    async fn create_product(&self, product: NewProduct, versions: Vec<ProductVersionSpec>) -> Result<Product> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let row = sqlx::query(
            "INSERT INTO products (name, description) VALUES ($1, $2) RETURNING id, name, description",
        )
        .bind(&product.name)
        .bind(&product.description)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to create product")?;
        let created = product_from_row(&row);

        for spec in &versions {
            get_or_create_version(&mut tx, created.id, spec).await?;
        }

        tx.commit().await.context("Failed to commit product")?;
        Ok(created)
    }

    async fn update_product(
        &self,
        id: Id,
        update: ProductUpdate,
        versions: Vec<ProductVersionSpec>,
    ) -> Result<Option<Product>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let row = sqlx::query(
            "UPDATE products SET name = COALESCE($2, name), description = COALESCE($3, description) \
             WHERE id = $1 RETURNING id, name, description",
        )
        .bind(id)
        .bind(update.name)
        .bind(update.description)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to update product")?;
        let Some(row) = row else {
            return Ok(None);
        };

        for spec in &versions {
            get_or_create_version(&mut tx, id, spec).await?;
        }

        tx.commit().await.context("Failed to commit product")?;
        Ok(Some(product_from_row(&row)))
    }

    async fn delete_product(&self, id: Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete product")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl ProductVersionStore for PostgresStore {
    async fn get_productversion(&self, id: Id) -> Result<Option<ProductVersion>> {
        let row = sqlx::query(
            "SELECT id, product_id, version, codename FROM productversions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch product version")?;

        Ok(row.as_ref().map(productversion_from_row))
    }

    async fn list_productversions(
        &self,
        filter: &ProductVersionFilter,
        page: PageRequest,
    ) -> Result<Page<ProductVersion>> {
        let (rows, total_count) = self
            .fetch_page(
                "pv.id, pv.product_id, pv.version, pv.codename",
                "productversions pv JOIN products p ON p.id = pv.product_id",
                "pv.id",
                page,
                |q| {
                    if let Some(version) = &filter.version {
                        q.push(" AND pv.version = ").push_bind(version.clone());
                    }
                    if let Some(product) = filter.product {
                        q.push(" AND pv.product_id = ").push_bind(product);
                    }
                    if let Some(name) = &filter.product_name {
                        q.push(" AND p.name = ").push_bind(name.clone());
                    }
                },
            )
            .await?;

        Ok(Page {
            items: rows.iter().map(productversion_from_row).collect(),
            total_count,
        })
    }

    async fn create_productversion(&self, productversion: NewProductVersion) -> Result<ProductVersion> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let row = sqlx::query(
            "INSERT INTO productversions (product_id, version, codename) VALUES ($1, $2, $3) \
             RETURNING id, product_id, version, codename",
        )
        .bind(productversion.product_id)
        .bind(&productversion.version)
        .bind(&productversion.codename)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to create product version")?;
        let created = productversion_from_row(&row);

        insert_links(
            &mut tx,
            "productversion_environments",
            "productversion_id",
            "environment_id",
            created.id,
            &productversion.environment_ids,
        )
        .await?;

        tx.commit().await.context("Failed to commit product version")?;
        Ok(created)
    }

    async fn update_productversion(
        &self,
        id: Id,
        update: ProductVersionUpdate,
    ) -> Result<Option<ProductVersion>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let row = sqlx::query(
            "UPDATE productversions SET version = COALESCE($2, version), codename = COALESCE($3, codename) \
             WHERE id = $1 RETURNING id, product_id, version, codename",
        )
        .bind(id)
        .bind(update.version)
        .bind(update.codename)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to update product version")?;
        let Some(row) = row else {
            return Ok(None);
        };

        if let Some(diff) = &update.environments {
            apply_link_diff(
                &mut tx,
                "productversion_environments",
                "productversion_id",
                "environment_id",
                id,
                diff,
            )
            .await?;
        }

        tx.commit().await.context("Failed to commit product version")?;
        Ok(Some(productversion_from_row(&row)))
    }

    async fn delete_productversion(&self, id: Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM productversions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete product version")?;

        Ok(result.rows_affected() > 0)
    }

    async fn productversion_environments(&self, id: Id) -> Result<Vec<Environment>> {
        let rows = sqlx::query(
            "SELECT e.id, e.name, e.description FROM environments e \
             JOIN productversion_environments pe ON pe.environment_id = e.id \
             WHERE pe.productversion_id = $1 ORDER BY e.id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load product version environments")?;

        Ok(rows.iter().map(environment_from_row).collect())
    }
}

#[async_trait::async_trait]
impl CaseStore for PostgresStore {
    async fn get_case(&self, id: Id) -> Result<Option<Case>> {
        let row = sqlx::query("SELECT id, product_id FROM cases WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch case")?;

        Ok(row.as_ref().map(case_from_row))
    }

    async fn list_cases(&self, filter: &CaseFilter, page: PageRequest) -> Result<Page<Case>> {
        let (rows, total_count) = self
            .fetch_page("id, product_id", "cases", "id", page, |q| {
                if let Some(product) = filter.product {
                    q.push(" AND product_id = ").push_bind(product);
                }
            })
            .await?;

        Ok(Page {
            items: rows.iter().map(case_from_row).collect(),
            total_count,
        })
    }

    async fn create_case(&self, case: NewCase) -> Result<Case> {
        let row = sqlx::query("INSERT INTO cases (product_id) VALUES ($1) RETURNING id, product_id")
            .bind(case.product_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to create case")?;

        Ok(case_from_row(&row))
    }

    async fn delete_case(&self, id: Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cases WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete case")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl CaseVersionStore for PostgresStore {
    async fn get_caseversion(&self, id: Id) -> Result<Option<CaseVersion>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM caseversions cv WHERE cv.id = $1",
            CASEVERSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch case version")?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.load_caseversions(vec![row]).await?.into_iter().next())
    }

    async fn list_caseversions(
        &self,
        filter: &CaseVersionFilter,
        page: PageRequest,
    ) -> Result<Page<CaseVersion>> {
        let (rows, total_count) = self
            .fetch_page(CASEVERSION_COLUMNS, CASEVERSION_FROM, "cv.id", page, |q| {
                if let Some(name) = &filter.name {
                    q.push(" AND cv.name = ").push_bind(name.clone());
                }
                if let Some(status) = filter.status {
                    q.push(" AND cv.status = ").push_bind(status.as_str());
                }
                if let Some(case) = filter.case {
                    q.push(" AND cv.case_id = ").push_bind(case);
                }
                if let Some(productversion) = filter.productversion {
                    q.push(" AND cv.productversion_id = ").push_bind(productversion);
                }
                if let Some(product) = filter.product {
                    q.push(" AND pv.product_id = ").push_bind(product);
                }
                if let Some(tag) = filter.tags {
                    q.push(" AND EXISTS (SELECT 1 FROM caseversion_tags ct WHERE ct.caseversion_id = cv.id AND ct.tag_id = ")
                        .push_bind(tag)
                        .push(")");
                }
                if let Some(environment) = filter.environments {
                    q.push(" AND EXISTS (SELECT 1 FROM caseversion_environments ce WHERE ce.caseversion_id = cv.id AND ce.environment_id = ")
                        .push_bind(environment)
                        .push(")");
                }
            })
            .await?;

        Ok(Page {
            items: self.load_caseversions(rows).await?,
            total_count,
        })
    }

    async fn create_caseversion(&self, caseversion: NewCaseVersion) -> Result<CaseVersion> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let id: Id = sqlx::query_scalar(
            "INSERT INTO caseversions (case_id, productversion_id, name, description, status, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(caseversion.case_id)
        .bind(caseversion.productversion_id)
        .bind(&caseversion.name)
        .bind(&caseversion.description)
        .bind(caseversion.status.as_str())
        .bind(&caseversion.created_by)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to create case version")?;

        for step in &caseversion.steps {
            insert_step(&mut tx, id, step.number, &step.instruction, &step.expected).await?;
        }
        insert_links(&mut tx, "caseversion_tags", "caseversion_id", "tag_id", id, &caseversion.tag_ids).await?;
        insert_links(
            &mut tx,
            "caseversion_environments",
            "caseversion_id",
            "environment_id",
            id,
            &caseversion.environment_ids,
        )
        .await?;

        tx.commit().await.context("Failed to commit case version")?;
        debug!("Created caseversion {} with {} steps", id, caseversion.steps.len());

        self.get_caseversion(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Case version vanished after create: {}", id))
    }

    async fn update_caseversion(&self, id: Id, update: CaseVersionUpdate) -> Result<Option<CaseVersion>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let result = sqlx::query(
            "UPDATE caseversions SET name = COALESCE($2, name), description = COALESCE($3, description), \
             status = COALESCE($4, status) WHERE id = $1",
        )
        .bind(id)
        .bind(update.name)
        .bind(update.description)
        .bind(update.status.map(|s| s.as_str()))
        .execute(&mut *tx)
        .await
        .context("Failed to update case version")?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        // Steps are read under the row lock taken by the update above
        let plan = match &update.steps {
            Some(desired) => {
                let existing: Vec<CaseStep> = sqlx::query(
                    "SELECT id, caseversion_id, number, instruction, expected FROM casesteps \
                     WHERE caseversion_id = $1 ORDER BY number FOR UPDATE",
                )
                .bind(id)
                .fetch_all(&mut *tx)
                .await
                .context("Failed to lock case steps")?
                .iter()
                .map(step_from_row)
                .collect();
                reconcile_steps(&existing, desired)?
            }
            None => StepPlan::default(),
        };
        debug!(
            "Reconciling steps of caseversion {}: {} created, {} updated, {} deleted",
            id,
            plan.create.len(),
            plan.update.len(),
            plan.delete.len()
        );
        if !plan.delete.is_empty() {
            sqlx::query("DELETE FROM casesteps WHERE caseversion_id = $1 AND id = ANY($2)")
                .bind(id)
                .bind(&plan.delete)
                .execute(&mut *tx)
                .await
                .context("Failed to delete case steps")?;
        }
        for step in &plan.update {
            sqlx::query(
                "UPDATE casesteps SET number = $3, instruction = $4, expected = $5 \
                 WHERE caseversion_id = $1 AND id = $2",
            )
            .bind(id)
            .bind(step.id)
            .bind(step.number)
            .bind(&step.instruction)
            .bind(&step.expected)
            .execute(&mut *tx)
            .await
            .context("Failed to update case step")?;
        }
        for step in &plan.create {
            insert_step(&mut tx, id, step.number, &step.instruction, &step.expected).await?;
        }

        if let Some(diff) = &update.tags {
            apply_link_diff(&mut tx, "caseversion_tags", "caseversion_id", "tag_id", id, diff).await?;
        }
        if let Some(diff) = &update.environments {
            apply_link_diff(
                &mut tx,
                "caseversion_environments",
                "caseversion_id",
                "environment_id",
                id,
                diff,
            )
            .await?;
        }

        tx.commit().await.context("Failed to commit case version")?;
        self.get_caseversion(id).await
    }

    async fn delete_caseversion(&self, id: Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM caseversions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete case version")?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_casestep(&self, id: Id) -> Result<Option<CaseStep>> {
        let row = sqlx::query(
            "SELECT id, caseversion_id, number, instruction, expected FROM casesteps WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch case step")?;

        Ok(row.as_ref().map(step_from_row))
    }

    async fn get_selection(&self, id: Id) -> Result<Option<CaseVersionSelection>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE cv.id = $1",
            SELECTION_COLUMNS, SELECTION_FROM
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch case version selection")?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.load_selections(vec![row]).await?.into_iter().next())
    }

    async fn list_selections(
        &self,
        filter: &SelectionFilter,
        page: PageRequest,
    ) -> Result<Page<CaseVersionSelection>> {
        let (rows, total_count) = self
            .fetch_page(SELECTION_COLUMNS, SELECTION_FROM, "cv.id", page, |q| {
                if let Some(name) = &filter.name {
                    q.push(" AND cv.name = ").push_bind(name.clone());
                }
                if let Some(status) = filter.status {
                    q.push(" AND cv.status = ").push_bind(status.as_str());
                }
                if let Some(case) = filter.case {
                    q.push(" AND cv.case_id = ").push_bind(case);
                }
                if let Some(productversion) = filter.productversion {
                    q.push(" AND cv.productversion_id = ").push_bind(productversion);
                }
                if let Some(product) = filter.product {
                    q.push(" AND p.id = ").push_bind(product);
                }
                if let Some(tag) = filter.tags {
                    q.push(" AND EXISTS (SELECT 1 FROM caseversion_tags ct WHERE ct.caseversion_id = cv.id AND ct.tag_id = ")
                        .push_bind(tag)
                        .push(")");
                }
                if let Some(tag) = filter.tags_ne {
                    q.push(" AND NOT EXISTS (SELECT 1 FROM caseversion_tags ct WHERE ct.caseversion_id = cv.id AND ct.tag_id = ")
                        .push_bind(tag)
                        .push(")");
                }
            })
            .await?;

        Ok(Page {
            items: self.load_selections(rows).await?,
            total_count,
        })
    }
}

#[async_trait::async_trait]
impl TagStore for PostgresStore {
    async fn get_tag(&self, id: Id) -> Result<Option<Tag>> {
        let row = sqlx::query("SELECT id, name, description, product_id FROM tags WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch tag")?;

        Ok(row.as_ref().map(tag_from_row))
    }

    async fn list_tags(&self, filter: &TagFilter, page: PageRequest) -> Result<Page<Tag>> {
        let (rows, total_count) = self
            .fetch_page("id, name, description, product_id", "tags", "id", page, |q| {
                if let Some(name) = &filter.name {
                    q.push(" AND name = ").push_bind(name.clone());
                }
                if let Some(product) = filter.product {
                    q.push(" AND product_id = ").push_bind(product);
                }
            })
            .await?;

        Ok(Page {
            items: rows.iter().map(tag_from_row).collect(),
            total_count,
        })
    }

    async fn create_tag(&self, tag: NewTag) -> Result<Tag> {
        let row = sqlx::query(
            "INSERT INTO tags (name, description, product_id) VALUES ($1, $2, $3) \
             RETURNING id, name, description, product_id",
        )
        .bind(&tag.name)
        .bind(&tag.description)
        .bind(tag.product_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create tag")?;

        Ok(tag_from_row(&row))
    }

    async fn update_tag(&self, id: Id, tag: NewTag) -> Result<Option<Tag>> {
        let row = sqlx::query(
            "UPDATE tags SET name = $2, description = $3, product_id = $4 WHERE id = $1 \
             RETURNING id, name, description, product_id",
        )
        .bind(id)
        .bind(&tag.name)
        .bind(&tag.description)
        .bind(tag.product_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update tag")?;

        Ok(row.as_ref().map(tag_from_row))
    }

    async fn delete_tag(&self, id: Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tags WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete tag")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl EnvironmentStore for PostgresStore {
    async fn get_environment(&self, id: Id) -> Result<Option<Environment>> {
        let row = sqlx::query("SELECT id, name, description FROM environments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch environment")?;

        Ok(row.as_ref().map(environment_from_row))
    }

    async fn list_environments(
        &self,
        filter: &EnvironmentFilter,
        page: PageRequest,
    ) -> Result<Page<Environment>> {
        let (rows, total_count) = self
            .fetch_page("id, name, description", "environments", "id", page, |q| {
                if let Some(name) = &filter.name {
                    q.push(" AND name = ").push_bind(name.clone());
                }
            })
            .await?;

        Ok(Page {
            items: rows.iter().map(environment_from_row).collect(),
            total_count,
        })
    }

    async fn create_environment(&self, environment: NewEnvironment) -> Result<Environment> {
        let row = sqlx::query(
            "INSERT INTO environments (name, description) VALUES ($1, $2) RETURNING id, name, description",
        )
        .bind(&environment.name)
        .bind(&environment.description)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create environment")?;

        Ok(environment_from_row(&row))
    }

    async fn update_environment(&self, id: Id, environment: NewEnvironment) -> Result<Option<Environment>> {
        let row = sqlx::query(
            "UPDATE environments SET name = $2, description = $3 WHERE id = $1 \
             RETURNING id, name, description",
        )
        .bind(id)
        .bind(&environment.name)
        .bind(&environment.description)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update environment")?;

        Ok(row.as_ref().map(environment_from_row))
    }

    async fn delete_environment(&self, id: Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM environments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete environment")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl UserStore for PostgresStore {
    async fn upsert_user(&self, user: NewUser) -> Result<User> {
        let permissions: Vec<String> = user.permissions.into_iter().collect();
        let row = sqlx::query(
            "INSERT INTO users (username, permissions, is_superuser) VALUES ($1, $2, $3) \
             ON CONFLICT (username) DO UPDATE SET \
                 permissions = EXCLUDED.permissions, \
                 is_superuser = EXCLUDED.is_superuser \
             RETURNING id, username, permissions, is_superuser",
        )
        .bind(&user.username)
        .bind(&permissions)
        .bind(user.is_superuser)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert user")?;

        Ok(user_from_row(&row))
    }

    async fn add_api_key(&self, user_id: Id, key_digest: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO api_keys (key_hash, user_id) VALUES ($1, $2) \
             ON CONFLICT (key_hash) DO UPDATE SET user_id = EXCLUDED.user_id, active = TRUE",
        )
        .bind(key_digest)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("Failed to store API key")?;

        Ok(())
    }

    async fn replace_api_keys(&self, user_id: Id, key_digest: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("UPDATE api_keys SET active = FALSE WHERE user_id = $1 AND key_hash <> $2")
            .bind(user_id)
            .bind(key_digest)
            .execute(&mut *tx)
            .await
            .context("Failed to deactivate API keys")?;
        sqlx::query(
            "INSERT INTO api_keys (key_hash, user_id) VALUES ($1, $2) \
             ON CONFLICT (key_hash) DO UPDATE SET user_id = EXCLUDED.user_id, active = TRUE",
        )
        .bind(key_digest)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to store API key")?;

        tx.commit().await.context("Failed to commit API key rotation")?;
        debug!("Rotated API keys of user {}", user_id);
        Ok(())
    }

    async fn find_user_by_api_key(&self, username: &str, key_digest: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT u.id, u.username, u.permissions, u.is_superuser FROM users u \
             JOIN api_keys k ON k.user_id = u.id \
             WHERE k.key_hash = $1 AND k.active AND u.username = $2",
        )
        .bind(key_digest)
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up API key")?;

        Ok(row.as_ref().map(user_from_row))
    }
}

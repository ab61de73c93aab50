use crate::model::{
    CaseVersionStatus, NewCase, NewCaseStep, NewCaseVersion, NewEnvironment, NewProduct, NewTag,
    PageRequest, ProductFilter, ProductVersionFilter, ProductVersionSpec,
};
use crate::store::traits::Store;
use anyhow::{Context, Result};
use log::info;

fn steps(items: &[(&str, &str)]) -> Vec<NewCaseStep> {
    items
        .iter()
        .zip(1..)
        .map(|((instruction, expected), number)| NewCaseStep {
            number,
            instruction: instruction.to_string(),
            expected: expected.to_string(),
        })
        .collect()
}

/// Load a small demonstration library. Does nothing when products exist.
pub async fn load_seed_data<S: Store>(store: &S) -> Result<()> {
    let existing = store
        .list_products(&ProductFilter::default(), PageRequest::new(1, 0))
        .await?;
    if existing.total_count > 0 {
        info!("Skipping seed data, {} products present", existing.total_count);
        return Ok(());
    }

    let product = store
        .create_product(
            NewProduct {
                name: "Firefox".to_string(),
                description: "Web browser".to_string(),
            },
            vec![
                ProductVersionSpec {
                    version: "12.0".to_string(),
                    codename: String::new(),
                },
                ProductVersionSpec {
                    version: "13.0".to_string(),
                    codename: "nightly".to_string(),
                },
            ],
        )
        .await?;
    let versions = store
        .list_productversions(&ProductVersionFilter::for_product(product.id), PageRequest::all())
        .await?;
    let productversion = versions
        .items
        .first()
        .context("Seed product has no versions")?;

    let linux = store
        .create_environment(NewEnvironment {
            name: "Linux".to_string(),
            description: "Ubuntu desktop".to_string(),
        })
        .await?;
    let windows = store
        .create_environment(NewEnvironment {
            name: "Windows".to_string(),
            description: "Windows 10 desktop".to_string(),
        })
        .await?;

    let smoke = store
        .create_tag(NewTag {
            name: "smoke".to_string(),
            description: "Runs on every build".to_string(),
            product_id: None,
        })
        .await?;
    let bookmarks = store
        .create_tag(NewTag {
            name: "bookmarks".to_string(),
            description: String::new(),
            product_id: Some(product.id),
        })
        .await?;

    let cases: [(&str, CaseVersionStatus, Vec<_>, Vec<(&str, &str)>); 3] = [
        (
            "Open a new tab",
            CaseVersionStatus::Active,
            vec![smoke.id],
            vec![
                ("Press Ctrl+T", "A blank tab opens"),
                ("Type a url and press Enter", "The page loads in the new tab"),
            ],
        ),
        (
            "Bookmark a page",
            CaseVersionStatus::Active,
            vec![smoke.id, bookmarks.id],
            vec![
                ("Open any page", "The page loads"),
                ("Press Ctrl+D", "The bookmark dialog appears"),
                ("Click Done", "The star icon is filled"),
            ],
        ),
        (
            "Import bookmarks from HTML",
            CaseVersionStatus::Draft,
            vec![bookmarks.id],
            vec![("Open the Library window and choose Import", "The import wizard opens")],
        ),
    ];

    for (name, status, tag_ids, case_steps) in cases {
        let case = store.create_case(NewCase { product_id: product.id }).await?;
        store
            .create_caseversion(NewCaseVersion {
                case_id: case.id,
                productversion_id: productversion.id,
                name: name.to_string(),
                description: String::new(),
                status,
                created_by: None,
                steps: steps(&case_steps),
                tag_ids,
                environment_ids: vec![linux.id, windows.id],
            })
            .await?;
    }

    info!("Loaded seed data for product {}", product.name);
    Ok(())
}

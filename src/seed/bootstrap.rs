use anyhow::Result;
use log::{info, warn};

use crate::config::AuthConfig;
use crate::logic::digest_api_key;
use crate::model::NewUser;
use crate::store::traits::Store;

/// Create or refresh the configured bootstrap user and make its key the
/// only active one.
///
/// Without a configured key a random one is generated and logged; keys of
/// earlier runs stop working.
pub async fn bootstrap_api_user<S: Store>(store: &S, auth: &AuthConfig) -> Result<()> {
    let Some(username) = &auth.bootstrap_username else {
        return Ok(());
    };

    let user = store
        .upsert_user(NewUser {
            username: username.clone(),
            permissions: auth.bootstrap_permissions.iter().cloned().collect(),
            is_superuser: auth.bootstrap_superuser,
        })
        .await?;

    let api_key = match &auth.bootstrap_api_key {
        Some(key) => key.clone(),
        None => {
            let key = uuid::Uuid::new_v4().simple().to_string();
            warn!("Generated API key for {}: {}", username, key);
            key
        }
    };
    store.replace_api_keys(user.id, &digest_api_key(&api_key)).await?;
    info!("API user {} ready", username);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::traits::UserStore;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_bootstrap_user_can_authenticate() {
        let store = MemoryStore::new();
        let auth = AuthConfig {
            bootstrap_username: Some("admin".to_string()),
            bootstrap_api_key: Some("letmein".to_string()),
            bootstrap_permissions: vec!["library.manage_cases".to_string()],
            bootstrap_superuser: false,
        };
        bootstrap_api_user(&store, &auth).await.unwrap();

        let user = store
            .find_user_by_api_key("admin", &digest_api_key("letmein"))
            .await
            .unwrap()
            .unwrap();
        assert!(user.has_permission("library.manage_cases"));
        assert!(!user.has_permission("tags.manage_tags"));
    }

    #[tokio::test]
    async fn test_rotated_bootstrap_key_replaces_old_one() {
        let store = MemoryStore::new();
        let mut auth = AuthConfig {
            bootstrap_username: Some("admin".to_string()),
            bootstrap_api_key: Some("old-key".to_string()),
            bootstrap_permissions: vec![],
            bootstrap_superuser: true,
        };
        bootstrap_api_user(&store, &auth).await.unwrap();

        auth.bootstrap_api_key = Some("new-key".to_string());
        bootstrap_api_user(&store, &auth).await.unwrap();

        assert!(store
            .find_user_by_api_key("admin", &digest_api_key("old-key"))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_user_by_api_key("admin", &digest_api_key("new-key"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_generated_keys_do_not_accumulate() {
        let store = MemoryStore::new();
        let auth = AuthConfig {
            bootstrap_username: Some("admin".to_string()),
            bootstrap_api_key: Some("configured".to_string()),
            bootstrap_superuser: true,
            ..AuthConfig::default()
        };
        bootstrap_api_user(&store, &auth).await.unwrap();

        let generated = AuthConfig {
            bootstrap_api_key: None,
            ..auth
        };
        bootstrap_api_user(&store, &generated).await.unwrap();

        assert!(store
            .find_user_by_api_key("admin", &digest_api_key("configured"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_no_bootstrap_user_configured() {
        let store = MemoryStore::new();
        bootstrap_api_user(&store, &AuthConfig::default()).await.unwrap();
        assert!(store
            .find_user_by_api_key("admin", &digest_api_key(""))
            .await
            .unwrap()
            .is_none());
    }
}

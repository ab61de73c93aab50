use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use log::warn;
use serde::Deserialize;

use crate::api::{ApiError, AppState};
use crate::logic::digest_api_key;
use crate::model::Caller;
use crate::store::traits::Store;

/// API key credentials of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub api_key: String,
}

#[derive(Debug, Default, Deserialize)]
struct CredentialParams {
    username: Option<String>,
    api_key: Option<String>,
}

/// Resolves the caller from `?username=..&api_key=..` or from an
/// `Authorization: ApiKey <username>:<key>` header.
///
/// Requests without credentials are anonymous. Credentials that are
/// incomplete or unknown are rejected with 401, also on reads.
#[async_trait]
impl<S> FromRequestParts<AppState<S>> for Caller
where
    S: Store + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let Some(credentials) = extract_credentials(parts)? else {
            return Ok(Caller::anonymous());
        };

        let digest = digest_api_key(&credentials.api_key);
        match state
            .store
            .find_user_by_api_key(&credentials.username, &digest)
            .await?
        {
            Some(user) => Ok(Caller::authenticated(user)),
            None => {
                warn!("Rejected API key for user {}", credentials.username);
                Err(ApiError::Unauthorized("invalid credentials"))
            }
        }
    }
}

fn extract_credentials(parts: &Parts) -> Result<Option<Credentials>, ApiError> {
    if let Some(credentials) = header_credentials(&parts.headers)? {
        return Ok(Some(credentials));
    }

    let params = Query::<CredentialParams>::try_from_uri(&parts.uri)
        .map(|Query(params)| params)
        .unwrap_or_default();
    match (params.username, params.api_key) {
        (None, None) => Ok(None),
        (Some(username), Some(api_key)) => Ok(Some(Credentials { username, api_key })),
        _ => Err(ApiError::Unauthorized("both username and api_key are required")),
    }
}

fn header_credentials(headers: &HeaderMap) -> Result<Option<Credentials>, ApiError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("ApiKey "))
        .and_then(|v| v.trim().split_once(':'))
        .map(|(username, api_key)| Credentials {
            username: username.to_string(),
            api_key: api_key.to_string(),
        })
        .map(Some)
        .ok_or(ApiError::Unauthorized("malformed Authorization header"))
}

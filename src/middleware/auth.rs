//! Admin API key authentication middleware.
//!
//! This middleware intercepts every admin request to:
//! 1. Extract the API key from the Authorization header
//! 2. Hash it and compare against the configured hash
//! 3. Inject the admin context into the request
//! 4. Reject unauthorized requests with HTTP 401

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

use crate::{AppState, adapters::signing::verify_sha256_digest, error::AppError};

/// Attached to authenticated admin requests.
#[derive(Debug, Clone)]
pub struct AdminContext {
    /// First characters of the key hash, safe to log
    pub key_fingerprint: String,
}

/// SHA-256 hex of an API key, the form stored in configuration.
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Admin authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <key>` header from request
/// 2. Hash the `<key>` using SHA-256
/// 3. Compare with `ADMIN_API_KEY_HASH` in constant time
/// 4. If equal: inject `AdminContext`, call next handler
/// 5. Otherwise: return 401 Unauthorized
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::InvalidApiKey)?;

    if !verify_sha256_digest(&state.admin_api_key_hash, api_key.as_bytes()) {
        tracing::warn!("Rejected admin request with unknown API key");
        return Err(AppError::InvalidApiKey);
    }

    let key_fingerprint = hash_api_key(api_key)[..8].to_string();
    request
        .extensions_mut()
        .insert(AdminContext { key_fingerprint });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_lowercase_hex_sha256() {
        assert_eq!(
            hash_api_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

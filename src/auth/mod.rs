//! Authentication and authorization gate
//!
//! A credential is taken from the first of: `Authorization: ApiKey <key>` /
//! `Authorization: Bearer <key-or-token>`, the `X-API-Key` header, the
//! `api_key` query parameter. It is tried as the shared secret first (role
//! `admin`), then as a signed token. Authorization is a fixed path -> role
//! table where `admin` satisfies every requirement.

pub mod token;

use crate::{
    config::{AuthConfig, Config},
    error::AppError,
    metrics,
    rate_limit::client_key,
};
use arc_swap::ArcSwap;
use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, Uri},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

pub use token::{sign_token, verify_token, Claims, TokenError};

pub const ADMIN_ROLE: &str = "admin";
pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_QUERY_PARAM: &str = "api_key";

/// How the caller was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    Token,
    /// No secrets configured; every caller passes
    Disabled,
}

/// Authentication information attached to each request that passed the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    pub role: String,
    pub method: AuthMethod,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credential")]
    InvalidCredential,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("role '{required}' required, caller has '{role}'")]
    InsufficientRole { required: String, role: String },
}

/// Pull the raw credential out of a request, first match wins
pub fn extract_credential(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let from_authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("ApiKey ")
                .or_else(|| v.strip_prefix("Bearer "))
        })
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(credential) = from_authorization {
        return Some(credential.to_string());
    }

    let from_header = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(credential) = from_header {
        return Some(credential.to_string());
    }

    Query::<HashMap<String, String>>::try_from_uri(uri)
        .ok()
        .and_then(|Query(mut params)| params.remove(API_KEY_QUERY_PARAM))
        .filter(|v| !v.is_empty())
}

/// Resolve a credential to a role: shared secret first, then signed token
pub fn authenticate(cfg: &AuthConfig, credential: &str, now: i64) -> Result<AuthInfo, AuthError> {
    if let Some(api_key) = cfg.api_key() {
        if bool::from(credential.as_bytes().ct_eq(api_key.as_bytes())) {
            return Ok(AuthInfo {
                role: ADMIN_ROLE.to_string(),
                method: AuthMethod::ApiKey,
            });
        }
    }

    match cfg.jwt_secret() {
        Some(secret) if credential.contains('.') => {
            let claims = verify_token(credential, secret, now)?;
            Ok(AuthInfo {
                role: claims.role,
                method: AuthMethod::Token,
            })
        }
        _ => Err(AuthError::InvalidCredential),
    }
}

/// Check `role` against the minimum role required for `path`
pub fn authorize(cfg: &AuthConfig, path: &str, role: &str) -> Result<(), AuthError> {
    match cfg.endpoint_roles.get(path) {
        None => Ok(()),
        Some(_) if role == ADMIN_ROLE => Ok(()),
        Some(required) if required == role => Ok(()),
        Some(required) => Err(AuthError::InsufficientRole {
            required: required.clone(),
            role: role.to_string(),
        }),
    }
}

/// Announce the degraded mode once at startup
pub fn log_auth_mode(cfg: &AuthConfig) {
    if cfg.is_enabled() {
        debug!(
            api_key = cfg.api_key().is_some(),
            tokens = cfg.jwt_secret().is_some(),
            protected_paths = cfg.endpoint_roles.len(),
            "Authentication enabled"
        );
    } else {
        warn!("No API key or signing secret configured, authentication is DISABLED");
    }
}

/// Authentication middleware
///
/// Reads the live configuration on every request so a SIGHUP reload takes
/// effect without a restart.
pub async fn auth_middleware(
    State(config): State<Arc<ArcSwap<Config>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let config = config.load();
    let auth = &config.auth;
    let path = req.uri().path().to_string();

    if auth.public_paths.iter().any(|p| p == &path) {
        return Ok(next.run(req).await);
    }

    if !auth.is_enabled() {
        debug!(path = %path, "Authentication disabled, allowing request");
        metrics::record_auth("disabled");
        req.extensions_mut().insert(AuthInfo {
            role: String::new(),
            method: AuthMethod::Disabled,
        });
        return Ok(next.run(req).await);
    }

    let method = req.method().clone();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(req.headers(), peer);
    let credential = match extract_credential(req.headers(), req.uri()) {
        Some(credential) => credential,
        None => {
            warn!(client = %client, method = %method, path = %path, "Authentication failed: missing credential");
            metrics::record_auth("unauthenticated");
            return Err(AppError::Unauthorized(
                "Missing credential: use the Authorization header, X-API-Key or api_key".to_string(),
            ));
        }
    };

    let info = match authenticate(auth, &credential, chrono::Utc::now().timestamp()) {
        Ok(info) => info,
        Err(e) => {
            warn!(client = %client, method = %method, path = %path, error = %e, "Authentication failed");
            metrics::record_auth("unauthenticated");
            let message = match e {
                AuthError::Token(TokenError::Expired) => "Token expired",
                _ => "Invalid credential",
            };
            return Err(AppError::Unauthorized(message.to_string()));
        }
    };

    if let Err(e) = authorize(auth, &path, &info.role) {
        warn!(
            client = %client,
            method = %method,
            path = %path,
            role = %info.role,
            "Authorization failed"
        );
        metrics::record_auth("forbidden");
        return Err(AppError::Forbidden(e.to_string()));
    }

    debug!(path = %path, role = %info.role, "Request authenticated");
    metrics::record_auth("authenticated");
    req.extensions_mut().insert(info);

    Ok(next.run(req).await)
}

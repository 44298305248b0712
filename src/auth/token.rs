//! Signed role tokens
//!
//! A token is `<header>.<payload>.<signature>` where every segment is
//! unpadded URL-safe base64 and the signature is HMAC-SHA256 over
//! `"<header>.<payload>"`. The payload carries `{"role": ..., "exp": ...}`;
//! `exp` is Unix seconds and a value of zero or less means no expiry.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub role: String,
    #[serde(default)]
    pub exp: i64,
}

impl Claims {
    pub fn is_expired(&self, now: i64) -> bool {
        self.exp > 0 && now > self.exp
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token must have three dot-separated segments")]
    Malformed,

    #[error("token segment is not valid base64")]
    Encoding,

    #[error("token signature mismatch")]
    BadSignature,

    #[error("token claims are invalid: {0}")]
    InvalidClaims(String),

    #[error("token expired")]
    Expired,
}

fn signature(secret: &str, signing_input: &str) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signing_input.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Mint a token for `claims` signed with `secret`
pub fn sign_token(claims: &Claims, secret: &str) -> Result<String, serde_json::Error> {
    let header = URL_SAFE_NO_PAD.encode(TOKEN_HEADER);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header, payload);
    let sig = URL_SAFE_NO_PAD.encode(signature(secret, &signing_input));

    Ok(format!("{}.{}", signing_input, sig))
}

/// Verify signature and expiry, returning the claims.
///
/// The header segment is covered by the signature but not interpreted.
pub fn verify_token(token: &str, secret: &str, now: i64) -> Result<Claims, TokenError> {
    let mut segments = token.split('.');
    let (header, payload, sig) = match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() && !s.is_empty() => {
            (h, p, s)
        }
        _ => return Err(TokenError::Malformed),
    };

    let provided = URL_SAFE_NO_PAD.decode(sig).map_err(|_| TokenError::Encoding)?;
    let expected = signature(secret, &format!("{}.{}", header, payload));
    if !bool::from(provided.ct_eq(&expected)) {
        return Err(TokenError::BadSignature);
    }

    let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| TokenError::Encoding)?;
    let claims: Claims = serde_json::from_slice(&payload)
        .map_err(|e| TokenError::InvalidClaims(e.to_string()))?;
    if claims.role.is_empty() {
        return Err(TokenError::InvalidClaims("role is empty".to_string()));
    }
    if claims.is_expired(now) {
        return Err(TokenError::Expired);
    }

    Ok(claims)
}

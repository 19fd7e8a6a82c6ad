//! Compact JSON Web Tokens signed with HMAC-SHA2.
//!
//! Only the symmetric `HS256`, `HS384` and `HS512` algorithms are supported.
//! A token is `base64url(header).base64url(claims).base64url(signature)`
//! without padding; the signature covers the first two segments.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;

/// Token decoding and signing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token algorithm {0} does not match")]
    AlgorithmMismatch(String),
    #[error("signature verification failed")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid signing key")]
    InvalidKey,
}

impl TokenError {
    /// Static label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::AlgorithmMismatch(_) => "algorithm",
            Self::BadSignature => "signature",
            Self::Expired => "expired",
            Self::InvalidKey => "key",
        }
    }
}

/// HMAC signing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Hs256,
    Hs384,
    Hs512,
}

impl Algorithm {
    /// Parse a JOSE algorithm name (`HS256`, `HS384`, `HS512`).
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "HS256" => Some(Self::Hs256),
            "HS384" => Some(Self::Hs384),
            "HS512" => Some(Self::Hs512),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hs256 => "HS256",
            Self::Hs384 => "HS384",
            Self::Hs512 => "HS512",
        }
    }

    fn sign(self, key: &[u8], message: &[u8]) -> Result<Vec<u8>, TokenError> {
        Ok(match self {
            Self::Hs256 => keyed::<Hmac<Sha256>>(key, message)?.finalize().into_bytes().to_vec(),
            Self::Hs384 => keyed::<Hmac<Sha384>>(key, message)?.finalize().into_bytes().to_vec(),
            Self::Hs512 => keyed::<Hmac<Sha512>>(key, message)?.finalize().into_bytes().to_vec(),
        })
    }

    /// Constant-time signature check.
    fn verify(self, key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), TokenError> {
        let result = match self {
            Self::Hs256 => keyed::<Hmac<Sha256>>(key, message)?.verify_slice(signature),
            Self::Hs384 => keyed::<Hmac<Sha384>>(key, message)?.verify_slice(signature),
            Self::Hs512 => keyed::<Hmac<Sha512>>(key, message)?.verify_slice(signature),
        };
        result.map_err(|_| TokenError::BadSignature)
    }
}

fn keyed<M: Mac + KeyInit>(key: &[u8], message: &[u8]) -> Result<M, TokenError> {
    let mut mac = <M as Mac>::new_from_slice(key).map_err(|_| TokenError::InvalidKey)?;
    mac.update(message);
    Ok(mac)
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Registered and private claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub scope: String,
    #[serde(default)]
    pub jti: String,
}

/// Sign `claims` into a compact token.
pub fn encode(claims: &Claims, algorithm: Algorithm, key: &[u8]) -> Result<String, TokenError> {
    let header = Header {
        alg: algorithm.as_str().to_string(),
        typ: Some("JWT".to_string()),
    };
    let header = serde_json::to_vec(&header).map_err(|_| TokenError::Malformed)?;
    let payload = serde_json::to_vec(claims).map_err(|_| TokenError::Malformed)?;

    let mut token = URL_SAFE_NO_PAD.encode(header);
    token.push('.');
    token.push_str(&URL_SAFE_NO_PAD.encode(payload));

    let signature = algorithm.sign(key, token.as_bytes())?;
    token.push('.');
    token.push_str(&URL_SAFE_NO_PAD.encode(signature));
    Ok(token)
}

/// Verify and decode a token against the current time.
pub fn decode(token: &str, algorithm: Algorithm, key: &[u8]) -> Result<Claims, TokenError> {
    decode_at(token, algorithm, key, chrono::Utc::now().timestamp())
}

/// Verify and decode a token, treating `now` (unix seconds) as the current time.
pub fn decode_at(
    token: &str,
    algorithm: Algorithm,
    key: &[u8],
    now: i64,
) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| TokenError::Malformed)?;
    let header: Header = serde_json::from_slice(&header_bytes).map_err(|_| TokenError::Malformed)?;
    if header.alg != algorithm.as_str() {
        return Err(TokenError::AlgorithmMismatch(header.alg));
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| TokenError::Malformed)?;
    let signed_len = header_b64.len() + 1 + payload_b64.len();
    algorithm.verify(key, &token.as_bytes()[..signed_len], &signature)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| TokenError::Malformed)?;
    let claims: Claims = serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
    if claims.exp <= now {
        return Err(TokenError::Expired);
    }
    Ok(claims)
}

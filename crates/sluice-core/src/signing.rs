//! HS256 signing of rewritten multipart fields.
//!
//! The upstream application trusts rewritten fields (file paths, checksums)
//! only when they arrive with a token signed by the gateway's secret.

use std::collections::BTreeMap;
use std::fmt;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::constants::ISSUER;

const TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("Failed to sign fields: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),

    #[error("Invalid field signature: {0}")]
    Verify(#[source] jsonwebtoken::errors::Error),
}

/// Claims carried by every gateway-signed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedFields {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub fields: BTreeMap<String, String>,
}

#[derive(Clone)]
pub struct FieldSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl fmt::Debug for FieldSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSigner").finish_non_exhaustive()
    }
}

impl FieldSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn sign(&self, fields: &BTreeMap<String, String>) -> Result<String, SigningError> {
        let now = chrono::Utc::now().timestamp();
        let claims = SignedFields {
            iss: ISSUER.to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
            fields: fields.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(SigningError::Encode)
    }

    pub fn verify(&self, token: &str) -> Result<SignedFields, SigningError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        decode::<SignedFields>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(SigningError::Verify)
    }
}

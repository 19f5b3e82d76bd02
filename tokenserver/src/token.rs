//! Bearer tokens scoped to a storage node
//!
//! A token is `base64url(payload).base64url(signature)`, where the payload is
//! the JSON form of [`TokenPayload`] and the signature is Ed25519 over the
//! payload bytes as encoded.

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokenserver_core::KeyPair;

use crate::assignment::{IdentityId, NodeId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,
}

/// What a storage node learns from a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub principal: String,
    pub uid: u64,
    pub node_id: u64,
    pub node_url: String,
    /// Expiry in milliseconds since the epoch
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct BearerToken {
    pub payload: TokenPayload,
    pub encoded: String,
}

pub struct TokenIssuer {
    keypair: KeyPair,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(keypair: KeyPair, ttl: Duration) -> Self {
        Self { keypair, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(
        &self,
        principal: &str,
        node_id: NodeId,
        node_url: &str,
        uid: IdentityId,
        now_millis: i64,
    ) -> Result<BearerToken, TokenError> {
        let payload = TokenPayload {
            principal: principal.to_string(),
            uid: uid.0,
            node_id: node_id.0,
            node_url: node_url.to_string(),
            exp: now_millis.saturating_add(i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)),
        };
        let json = serde_json::to_vec(&payload).map_err(|e| TokenError::Malformed(e.to_string()))?;
        let signature = self.keypair.sign(&json);
        let encoded = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&json),
            URL_SAFE_NO_PAD.encode(signature)
        );

        Ok(BearerToken { payload, encoded })
    }

    /// Check a token's signature and expiry, returning its payload
    pub fn parse(&self, token: &str, now_millis: i64) -> Result<TokenPayload, TokenError> {
        let (payload_b64, signature_b64) = token
            .split_once('.')
            .ok_or_else(|| TokenError::Malformed("expected payload.signature".into()))?;

        let json = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;

        self.keypair
            .public_key()
            .verify(&json, &signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let payload: TokenPayload =
            serde_json::from_slice(&json).map_err(|e| TokenError::Malformed(e.to_string()))?;
        if payload.exp <= now_millis {
            return Err(TokenError::Expired);
        }
        Ok(payload)
    }
}

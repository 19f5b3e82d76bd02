//! Compact `header.payload.signature` segments shared by certificates and
//! assertions.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Error, KeyPair, PublicKey, Result};

const ALGORITHM: &str = "EdDSA";

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
}

/// A decoded but not yet verified segment
#[derive(Debug, Clone)]
pub(crate) struct Segment<T> {
    pub claims: T,
    signing_input: String,
    signature: Vec<u8>,
}

impl<T> Segment<T> {
    pub fn verify(&self, key: &PublicKey) -> Result<()> {
        key.verify(self.signing_input.as_bytes(), &self.signature)
    }
}

/// Serialize `claims` and sign them, returning the compact encoding
pub(crate) fn sign<T: Serialize>(claims: &T, key: &KeyPair) -> Result<String> {
    let header = serde_json::to_vec(&Header {
        alg: ALGORITHM.into(),
    })?;
    let payload = serde_json::to_vec(claims)?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = key.sign(signing_input.as_bytes());

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

/// Split and decode a compact segment without checking its signature
pub(crate) fn decode<T: DeserializeOwned>(encoded: &str) -> Result<Segment<T>> {
    let parts: Vec<&str> = encoded.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::Malformed(format!(
            "expected 3 segment parts, found {}",
            parts.len()
        )));
    }

    let header: Header = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[0])?)?;
    if header.alg != ALGORITHM {
        return Err(Error::Malformed(format!(
            "unsupported algorithm: {}",
            header.alg
        )));
    }

    let claims: T = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1])?)?;
    let signature = URL_SAFE_NO_PAD.decode(parts[2])?;

    Ok(Segment {
        claims,
        signing_input: format!("{}.{}", parts[0], parts[1]),
        signature,
    })
}

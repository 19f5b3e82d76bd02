//! Ed25519 key material
//!
//! Trust anchors, certificate subject keys and the token signing key are all
//! Ed25519. Public keys travel as a minimal OKP JWK.

use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A public key that can verify signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Create a public key from its 32 raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey("public key must be 32 bytes".into()))?;
        let inner =
            VerifyingKey::from_bytes(&bytes).map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.inner.as_bytes()
    }

    /// Encode as base64url (no padding)
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.as_bytes())
    }

    /// Decode from base64url
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(s.trim())?;
        Self::from_bytes(&bytes)
    }

    /// Verify a detached signature over `message`.
    ///
    /// Any failure, including a signature of the wrong length, is reported
    /// as [`Error::InvalidSignature`].
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let sig_bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| Error::InvalidSignature)?;
        let signature = Signature::from_bytes(&sig_bytes);
        self.inner
            .verify_strict(message, &signature)
            .map_err(|_| Error::InvalidSignature)
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_base64(s)
    }
}

#[derive(Serialize, Deserialize)]
struct Jwk {
    kty: String,
    crv: String,
    x: String,
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        Jwk {
            kty: "OKP".into(),
            crv: "Ed25519".into(),
            x: self.to_base64(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let jwk = Jwk::deserialize(deserializer)?;
        if jwk.kty != "OKP" || jwk.crv != "Ed25519" {
            return Err(serde::de::Error::custom(format!(
                "unsupported key type: {}/{}",
                jwk.kty, jwk.crv
            )));
        }
        PublicKey::from_base64(&jwk.x).map_err(serde::de::Error::custom)
    }
}

/// A keypair that can sign and verify
#[derive(Debug, Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create a keypair from a 32-byte seed
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| Error::InvalidKey("seed must be 32 bytes".into()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.signing_key.verifying_key(),
        }
    }

    /// Sign a message. Ed25519 signing is deterministic.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(message);
        signature.to_bytes().to_vec()
    }

    /// The seed bytes, for persisting the key
    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let signature = kp.sign(b"payload");
        kp.public_key().verify(b"payload", &signature).unwrap();
        assert!(kp.public_key().verify(b"other payload", &signature).is_err());
    }

    #[test]
    fn test_signing_is_deterministic() {
        let kp = KeyPair::from_seed(&[7u8; 32]).unwrap();
        assert_eq!(kp.sign(b"same"), kp.sign(b"same"));
    }

    #[test]
    fn test_public_key_jwk_form() {
        let pk = KeyPair::generate().public_key();
        let json = serde_json::to_value(&pk).unwrap();
        assert_eq!(json["kty"], "OKP");
        assert_eq!(json["crv"], "Ed25519");

        let back: PublicKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, pk);
    }

    #[test]
    fn test_rejects_foreign_key_type() {
        let json = serde_json::json!({ "kty": "RSA", "crv": "Ed25519", "x": "AA" });
        assert!(serde_json::from_value::<PublicKey>(json).is_err());
    }

    #[test]
    fn test_short_signature_is_invalid_signature() {
        let pk = KeyPair::generate().public_key();
        assert!(matches!(
            pk.verify(b"msg", &[0u8; 12]),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn test_parse_from_str() {
        let pk = KeyPair::generate().public_key();
        let parsed: PublicKey = pk.to_base64().parse().unwrap();
        assert_eq!(parsed, pk);
        assert!("not-a-key".parse::<PublicKey>().is_err());
    }
}

//! Token Server Core Library
//!
//! Implements the verification half of the token exchange:
//! - Identity providers sign certificates binding a user's key to an email
//! - Users sign short-lived assertions scoped to an audience
//! - Verifiers walk the certificate chain back to a trusted root key and
//!   check the assertion's claims
//!
//! Nothing in this crate performs I/O; time is injected through [`Clock`].

pub mod assertion;
pub mod certificate;
pub mod chain;
pub mod claims;
pub mod clock;
pub mod error;
pub mod keys;
pub mod verdict;

mod jws;

pub use assertion::{Assertion, AssertionBundle, SignedClaims};
pub use certificate::{Certificate, CertificateClaims, Principal};
pub use chain::{verify_chain, TrustAnchors};
pub use claims::ClaimsValidator;
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::Error;
pub use keys::{KeyPair, PublicKey};
pub use verdict::{ErrorKind, Verdict};

/// Result type for tokenserver-core operations
pub type Result<T> = std::result::Result<T, Error>;

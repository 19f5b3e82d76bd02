//! Token server
//!
//! Verifies BrowserID-style identity assertions, maps each verified principal
//! to the storage node that owns its data, and issues short-lived bearer
//! tokens scoped to that node.

pub mod assignment;
pub mod config;
pub mod error;
pub mod pool;
pub mod routes;
pub mod runner;
pub mod state;
pub mod token;
pub mod verifier;

pub use assignment::{MemoryAssignment, NodeAssignment, SqliteAssignment};
pub use config::{load_or_generate_keypair, Config, ConfigError, NodeConfig};
pub use error::TokenServerError;
pub use pool::WorkerPool;
pub use runner::{ChainWorker, CryptoWorker, InProcessRunner, VerificationRunner};
pub use state::AppState;
pub use token::{BearerToken, TokenError, TokenIssuer, TokenPayload};
pub use verifier::Verifier;

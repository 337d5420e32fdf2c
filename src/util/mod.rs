//! Shared utilities.

pub mod credential;
pub mod telemetry;

pub use credential::{unwrap_enc, CredentialResolver, Decrypter, DecrypterRegistry};
pub use telemetry::init_tracing;

//! Shared error taxonomy, secret obfuscation, id helpers, and tracing setup
//! used by every other crate in this workspace.

pub mod error;
pub mod ids;
pub mod obfuscate;
pub mod telemetry;

pub use error::{ApiError, ErrorCode, StoreError, ValidationError};
pub use obfuscate::obfuscate;

//! Token and project persistence: creation, lookup, revocation, and the
//! atomic usage/quota bookkeeping the gateway relies on.

pub mod crypto;
mod error;
pub mod model;
pub mod sqlx_store;
pub mod token;
pub mod traits;

pub use crypto::Cipher;
pub use error::Result;
pub use model::{Project, Token};
pub use sqlx_store::SqlStore;
pub use traits::{
    CreateProjectParams, CreateTokenParams, ProjectStore, ProjectUpdate, TokenStore, TokenUpdate,
};

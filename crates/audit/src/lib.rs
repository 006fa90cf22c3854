pub mod db_store;
pub mod file_sink;
pub mod model;
pub mod noop;
pub mod traits;

pub use db_store::SqlAuditStore;
pub use file_sink::FileAuditSink;
pub use model::{Actor, AuditAction, AuditEvent, AuditEventBuilder, Outcome};
pub use noop::NoopAuditSink;
pub use traits::{AuditError, AuditSink, AuditStore};

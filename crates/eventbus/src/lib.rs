pub mod durable;
pub mod memory;
pub mod model;
pub mod traits;

pub use durable::{DurableEventBus, PostgresEventLog};
pub use memory::InMemoryBus;
pub use model::{EventRecord, LoggedEvent};
pub use traits::{DurableEventLog, EventBus};

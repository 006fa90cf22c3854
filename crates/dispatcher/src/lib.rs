pub mod config;
pub mod dispatcher;
pub mod sink;

pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use sink::{EventSink, RecordingSink, SinkError};

//! Core document/field graph for the canvas.
//! Fields are lazily fetched value cells; documents map interned keys to
//! fields and delegate missing keys to a prototype chain.

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod keys;
pub mod logging;
pub mod model;
pub mod transport;
pub mod undo;

pub use config::{ConfigError, CoreConfig};
pub use error::{GraphError, GraphResult};
pub use gateway::{CacheStatus, GatewayStats};
pub use graph::{DocGraph, FieldEvent, ObserverId, ResolveMap};
pub use keys::{intern, Key};
pub use logging::{
    default_log_level, init_from_config, init_logging, logging_status, LoggingError,
};
pub use model::field::{Field, FieldId, FieldKind, Lookup};
pub use model::list::{ListChange, ScriptId};
pub use model::record::{FieldRecord, RecordValue};
pub use transport::{MemoryTransport, SqliteTransport, Transport, TransportError};
pub use undo::{UndoBatch, UndoError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

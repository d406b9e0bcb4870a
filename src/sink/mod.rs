pub mod duckdb;
pub mod loader;
pub mod traits;

pub use self::duckdb::DuckDbDestination;
pub use loader::{BatchLoader, LoaderConfig, LoaderError};
pub use traits::{Destination, DestinationSession, FieldValue, SinkError, TableRef};

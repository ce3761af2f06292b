// Store module - indexed response accumulation and durable persistence

pub mod durable;
pub mod response;

pub use durable::{unique_name, DurableStore, JsonFileStore, MemoryStore};
pub use response::{CellIndex, DatasetShape, ExportFormat, ResponseStore, StoreAxes};

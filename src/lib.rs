pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod service;
pub mod utils;

pub use api::{FallbackStore, FileStore, HttpStore, MemoryStore, ModelStore};
pub use error::{ModelError, StoreError};
pub use models::*;
pub use service::ModelService;
pub use utils::*;

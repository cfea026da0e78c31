pub mod config;
pub mod error;
pub mod loader;
pub mod parser;
pub mod pipeline;
pub mod schema;
pub mod server;
pub mod service;
pub mod store;

pub use error::{ErrorKind, Result, StoreError};
pub use pipeline::types::{Record, RecordSet, Value};
pub use schema::{IdentityPolicy, Schema};
pub use service::{RecordService, RunSummary};

//! Batch operations
//!
//! A unified interface for CRUD operations that can be executed individually
//! or packed into a single Batch API envelope with per-operation
//! partial-failure semantics.

pub mod batch;
pub mod operation;
pub mod result;

pub use batch::{BatchHeader, BatchRequest, BatchRequestBuilder, BatchResponseParser, SubRequest};
pub use operation::Operation;
pub use result::{BatchItemError, BatchResult, ServicedResult};

//! Queue module: the in-memory task store backed by the storage adapter.

mod store;

pub use store::{LoadReport, TaskStore};

//! Document storage, dedup by checksum, and bitmap-backed listing.

mod query;
mod store;

pub use query::{ContextFilter, QueryEngine};
pub use store::DocumentStore;

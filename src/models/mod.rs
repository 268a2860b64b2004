pub mod document;
pub mod query;

pub use document::{current_timestamp, Document, DocumentId, NewDocument};
pub use query::{ListOptions, Listing};

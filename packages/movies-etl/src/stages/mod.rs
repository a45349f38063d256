//! Pipeline stages, one per hop of a tick
//!
//! Each stage owns a `RetryPolicy` and wraps every call to its port with it.

pub mod extract;
pub mod hydrate;
pub mod index;
pub mod resolve;

pub use extract::ChangeIdExtractor;
pub use hydrate::{AggregateLoader, DocumentPages};
pub use index::IndexWriter;
pub use resolve::RootResolver;

pub mod budget;
pub mod discovery;
pub mod entry_cache; // Generic LRU + TTL cache
pub mod graph;
pub mod llm_service;
pub mod refresher;
pub mod schema_context;
pub mod summarizer;

#[cfg(test)]
pub(crate) mod test_support;

pub use budget::*;
pub use discovery::*;
pub use entry_cache::*;
pub use graph::*;
pub use llm_service::*;
pub use refresher::*;
pub use schema_context::*;
pub use summarizer::*;

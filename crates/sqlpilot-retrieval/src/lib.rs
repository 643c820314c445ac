pub mod documents;
pub mod error;
pub mod index;
pub mod memory;
pub mod opensearch;
pub mod retriever;

pub use documents::{ColumnHit, ColumnSearch, QuerySample, RetrievedDocument, TableSummary};
pub use error::RetrievalError;
pub use index::KnowledgeIndex;
pub use memory::InMemoryIndex;
pub use opensearch::{OpenSearchConfig, OpenSearchIndex};
pub use retriever::{Retriever, RetrieverConfig};

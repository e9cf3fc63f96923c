pub mod error;
pub mod memory;
pub mod pg;
pub mod records;
pub mod search;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use pg::PgStore;
pub use records::*;
pub use search::{Document, FieldValue, MemorySearchIndex, PgSearchIndex, SearchIndex};
pub use traits::Datastore;

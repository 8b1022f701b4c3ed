//! Vector search: backend abstraction, two physical backends and the
//! unifying façade

mod backend;
mod exact;
mod facade;
mod hnsw;

pub use backend::{VectorBackend, VectorChunk, VectorHit, VectorStoreError};
pub use exact::ExactVectorBackend;
pub use facade::{VectorStoreFacade, WriteOutcome};
pub use hnsw::HnswBackend;

pub mod model;
pub mod llm_client;
pub mod prompts;
pub mod extractor;
pub mod dedup;
pub mod completion;
pub mod chunking;
pub mod pipeline;

pub use llm_client::{Embedder, LlmClient, TextGenerator};
pub use extractor::{EntityExtractor, Framing, RelationshipExtractor};
pub use dedup::TripleDeduplicator;
pub use model::{DocumentGraph, Entity, ExtractionResult, Provenance, Relationship};
pub use pipeline::{generate_from_topic, process_text, Pipeline};

pub mod config;
pub mod core;
pub mod error;
pub mod knowledge_base;
pub mod utils;

pub use config::Configuration;
pub use crate::core::{generate_from_topic, process_text, ExtractionResult, Pipeline};
pub use error::{ExtractorError, Result};
pub use knowledge_base::EntityLinker;

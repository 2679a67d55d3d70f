use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::config::{Configuration, Mode};
use crate::core::chunking::{merge_chunk_graphs, split_text, Chunk};
use crate::core::completion::GraphCompletion;
use crate::core::dedup::TripleDeduplicator;
use crate::core::extractor::{backfill, EntityExtractor, Framing, RelationshipExtractor};
use crate::core::llm_client::{Embedder, LlmClient, TextGenerator};
use crate::core::model::{DocumentGraph, ExtractionResult};
use crate::error::Result;
use crate::knowledge_base::EntityLinker;

/// Extraction, linking, relationship extraction, deduplication and
/// completion, wired together from one configuration.
pub struct Pipeline {
    config: Configuration,
    entities: EntityExtractor,
    relations: RelationshipExtractor,
    dedup: TripleDeduplicator,
    linker: EntityLinker,
}

impl Pipeline {
    pub fn new(
        config: Configuration,
        llm: Arc<dyn TextGenerator>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        Ok(Self {
            entities: EntityExtractor::new(llm.clone(), &config),
            relations: RelationshipExtractor::new(llm.clone(), config.language),
            dedup: TripleDeduplicator::new(
                llm,
                embedder,
                config.post_processing.clone(),
                config.concurrency,
            ),
            linker: EntityLinker::new(&config)?,
            config,
        })
    }

    /// Builds the pipeline on top of the OpenAI-compatible client. Fails
    /// with [`ExtractorError::MissingCredential`](crate::error::ExtractorError)
    /// when no API key is configured.
    pub fn from_config(config: Configuration) -> Result<Self> {
        let client = Arc::new(LlmClient::from_settings(&config.llm_settings)?);
        let embedder: Option<Arc<dyn Embedder>> = if client.has_embeddings() {
            Some(client.clone())
        } else {
            None
        };
        Self::new(config, client, embedder)
    }

    pub async fn process_text(&self, text: &str) -> ExtractionResult {
        let start = Instant::now();
        info!("Processing text ({} characters)", text.chars().count());

        let chunks = if self.config.chunking.enabled {
            split_text(text, self.config.chunking.chunk_size, self.config.chunking.chunk_overlap)
        } else {
            vec![Chunk {
                text: text.to_string(),
                offset: 0,
            }]
        };

        let framing = Framing::for_mode(Mode::Extract, self.config.relations.infer_implicit);
        let graph = if chunks.len() == 1 {
            let chunk = &chunks[0];
            self.process_chunk(chunk, framing).await
        } else {
            info!("Processing {} chunks", chunks.len());
            let graphs: Vec<DocumentGraph> = stream::iter(chunks.iter())
                .map(|chunk| self.process_chunk(chunk, framing))
                .buffered(self.config.concurrency.max(1))
                .collect()
                .await;
            merge_chunk_graphs(graphs)
        };

        let graph = self.consolidate(text, graph).await;
        self.finish(graph, start)
    }

    pub async fn generate_from_topic(&self, topic: &str) -> ExtractionResult {
        let start = Instant::now();
        info!("Generating compendium for topic '{}'", topic);

        let entities = self.entities.generate(topic).await;
        let entities = self.linker.link_all(entities).await;
        let relationships = if self.config.relations.enabled {
            self.relations.extract(topic, &entities, Framing::Generative).await
        } else {
            Vec::new()
        };

        let graph = self
            .consolidate(
                topic,
                DocumentGraph {
                    entities,
                    relationships,
                },
            )
            .await;
        self.finish(graph, start)
    }

    /// Dispatches on the configured mode.
    pub async fn run(&self, input: &str) -> ExtractionResult {
        match self.config.mode {
            Mode::Extract => self.process_text(input).await,
            Mode::Generate => self.generate_from_topic(input).await,
        }
    }

    async fn process_chunk(&self, chunk: &Chunk, framing: Framing) -> DocumentGraph {
        let mut entities = self.entities.extract(&chunk.text).await;
        for entity in entities.iter_mut() {
            entity.citation_span = entity.citation_span.shifted(chunk.offset);
        }
        let entities = self.linker.link_all(entities).await;

        let relationships = if self.config.relations.enabled {
            self.relations.extract(&chunk.text, &entities, framing).await
        } else {
            Vec::new()
        };

        DocumentGraph {
            entities,
            relationships,
        }
    }

    /// Document-level deduplication and completion, shared by single-chunk,
    /// multi-chunk and topic runs.
    async fn consolidate(&self, text: &str, graph: DocumentGraph) -> DocumentGraph {
        let DocumentGraph {
            entities,
            relationships,
        } = graph;

        if !self.config.relations.enabled || entities.is_empty() {
            return DocumentGraph {
                entities,
                relationships: Vec::new(),
            };
        }

        let mut relationships = self.dedup.deduplicate(relationships).await;

        if self.config.relations.enable_kgc {
            relationships = GraphCompletion::new(&self.relations, &self.config.relations)
                .run(text, &entities, relationships)
                .await;
            relationships = self.dedup.deduplicate(relationships).await;
        }

        let relationships = backfill(relationships, &entities);
        DocumentGraph {
            entities,
            relationships,
        }
    }

    fn finish(&self, graph: DocumentGraph, start: Instant) -> ExtractionResult {
        let elapsed = start.elapsed().as_secs_f64();
        info!(
            "Finished with {} entities and {} relationships in {:.2}s",
            graph.entities.len(),
            graph.relationships.len(),
            elapsed
        );
        ExtractionResult::new(graph, elapsed)
    }
}

/// Extracts entities and relationships from `text`. Never fails: a setup
/// error is logged and yields an empty result.
pub async fn process_text(text: &str, config: &Configuration) -> ExtractionResult {
    match Pipeline::from_config(config.clone()) {
        Ok(pipeline) => pipeline.process_text(text).await,
        Err(e) => {
            error!("Cannot start extraction: {}", e);
            ExtractionResult::empty()
        }
    }
}

/// Generates a linked compendium for `topic`. Never fails, like
/// [`process_text`].
pub async fn generate_from_topic(topic: &str, config: &Configuration) -> ExtractionResult {
    match Pipeline::from_config(config.clone()) {
        Ok(pipeline) => pipeline.generate_from_topic(topic).await,
        Err(e) => {
            error!("Cannot start generation: {}", e);
            ExtractionResult::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extractor::tests::ScriptedGenerator;
    use crate::core::model::Provenance;

    fn offline_config() -> Configuration {
        let mut config = Configuration::example();
        config.knowledge_bases.use_wikipedia = false;
        config.post_processing.llm_grouping = false;
        config.relations.infer_implicit = false;
        config.relations.enable_kgc = false;
        config
    }

    #[tokio::test]
    async fn test_missing_credential_yields_empty_result() {
        let mut config = offline_config();
        config.llm_settings.api_key = None;
        let result = process_text("Apple and Microsoft.", &config).await;
        assert!(result.entities().is_empty());
        assert!(result.relationships().is_empty());
    }

    #[tokio::test]
    async fn test_single_chunk_run() {
        let llm = Arc::new(ScriptedGenerator::new(vec![
            r#"[{"entity": "Apple", "entity_type": "Company", "citation": "Apple"},
                {"entity": "Microsoft", "entity_type": "Company", "citation": "Microsoft"}]"#,
            r#"[{"subject": "Apple", "predicate": "competes with", "object": "Microsoft"},
                {"subject": "Apple", "predicate": "competes with", "object": "Microsoft"},
                {"subject": "Apple", "predicate": "acquired", "object": "NeXT"}]"#,
        ]));
        let pipeline = Pipeline::new(offline_config(), llm.clone(), None).unwrap();

        let result = pipeline.process_text("Apple competes with Microsoft.").await;

        assert_eq!(llm.calls(), 2);
        assert_eq!(result.entities().len(), 2);
        assert_eq!(result.relationships().len(), 1);
        assert_eq!(result.relationships()[0].inferred, Provenance::Explicit);
    }

    #[tokio::test]
    async fn test_multi_chunk_graph_is_deduplicated_and_completed() {
        let mut config = offline_config();
        config.post_processing.llm_grouping = true;
        config.relations.enable_kgc = true;
        config.relations.kgc_rounds = 1;
        config.chunking.enabled = true;
        config.chunking.chunk_size = 30;
        config.chunking.chunk_overlap = 0;
        config.concurrency = 1;
        let text = format!("{:<30}{}", "Apple rivals Microsoft.", "Apple competes with Microsoft.");
        let companies = r#"[{"entity": "Apple", "entity_type": "Company", "citation": "Apple"},
            {"entity": "Microsoft", "entity_type": "Company", "citation": "Microsoft"}]"#;
        let llm = Arc::new(ScriptedGenerator::new(vec![
            companies,
            r#"[{"subject": "Apple", "predicate": "rivals", "object": "Microsoft"}]"#,
            companies,
            r#"[{"subject": "Apple", "predicate": "competes with", "object": "Microsoft"}]"#,
            r#"[{"predicate": "competes with", "inferred": "explicit"}]"#,
            r#"[{"subject": "Microsoft", "predicate": "partners with", "object": "Apple"}]"#,
        ]));
        let pipeline = Pipeline::new(config, llm.clone(), None).unwrap();

        let result = pipeline.process_text(&text).await;

        assert_eq!(llm.calls(), 6);
        let prompts = llm.prompts.lock().unwrap().clone();
        assert!(prompts[4].contains("rivals") && prompts[4].contains("competes with"));
        assert!(prompts[5].contains(&text));

        assert_eq!(result.entities().len(), 2);
        let rels = result.relationships();
        assert_eq!(rels.len(), 2);
        assert_eq!(rels[0].predicate, "competes with");
        assert_eq!(rels[0].inferred, Provenance::Explicit);
        assert_eq!(rels[1].subject, "Microsoft");
        assert_eq!(rels[1].inferred, Provenance::Implicit);
    }

    #[tokio::test]
    async fn test_chunk_spans_are_document_offsets() {
        let mut config = offline_config();
        config.relations.enabled = false;
        config.chunking.enabled = true;
        config.chunking.chunk_size = 10;
        config.chunking.chunk_overlap = 0;
        config.concurrency = 1;
        let llm = Arc::new(ScriptedGenerator::new(vec![
            r#"[{"entity": "Alpha", "entity_type": "Thing", "citation": "Alpha"}]"#,
            r#"[{"entity": "Beta", "entity_type": "Thing", "citation": "Beta"}]"#,
        ]));
        let pipeline = Pipeline::new(config, llm, None).unwrap();

        let result = pipeline.process_text("Alpha is..Beta here").await;

        let beta = result.entities().iter().find(|e| e.name == "Beta").unwrap();
        assert_eq!(beta.citation_span.start, 10);
        assert_eq!(beta.citation_span.end, 14);
    }
}

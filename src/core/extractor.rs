use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Configuration, EntitySettings, Language, Mode};
use crate::core::dedup::collapse_exact;
use crate::core::llm_client::TextGenerator;
use crate::core::model::{
    CitationSpan, Entity, Provenance, Relationship, GENERATED_CITATION,
};
use crate::core::prompts::PromptBuilder;
use crate::utils::json::{parse_object_array, string_field};

/// Drops a trailing "..." or "…" the model sometimes appends.
pub fn strip_ellipsis(text: &str) -> &str {
    text.trim()
        .trim_end_matches('…')
        .trim_end_matches("...")
        .trim_end()
}

/// Character offsets of the first occurrence of `needle` in `haystack`.
pub fn locate(haystack: &str, needle: &str) -> CitationSpan {
    if needle.is_empty() {
        return CitationSpan::NONE;
    }
    match haystack.find(needle) {
        Some(byte_start) => {
            let start = haystack[..byte_start].chars().count() as i64;
            let end = start + needle.chars().count() as i64;
            CitationSpan { start, end }
        }
        None => CitationSpan::NONE,
    }
}

/// Performs the entity extraction / topic generation call and turns its
/// JSON into [`Entity`] values.
pub struct EntityExtractor {
    llm: Arc<dyn TextGenerator>,
    language: Language,
    settings: EntitySettings,
}

impl EntityExtractor {
    pub fn new(llm: Arc<dyn TextGenerator>, config: &Configuration) -> Self {
        Self {
            llm,
            language: config.language,
            settings: config.entities.clone(),
        }
    }

    pub async fn extract(&self, text: &str) -> Vec<Entity> {
        let system = PromptBuilder::entity_extraction_system(
            self.language,
            self.settings.max_entities,
            &self.settings.allowed_types,
        );
        let user = PromptBuilder::entity_extraction_user(text);

        match self.llm.generate_text(&system, &user).await {
            Ok(response) => {
                let entities = self.parse_entities(&response, Some(text));
                info!("Extracted {} entities", entities.len());
                entities
            }
            Err(e) => {
                warn!("Entity extraction failed: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn generate(&self, topic: &str) -> Vec<Entity> {
        let system = PromptBuilder::topic_generation_system(
            self.language,
            self.settings.max_entities,
            &self.settings.allowed_types,
        );
        let user = PromptBuilder::topic_generation_user(topic);

        match self.llm.generate_text(&system, &user).await {
            Ok(response) => {
                let entities = self.parse_entities(&response, None);
                info!("Generated {} entities for topic '{}'", entities.len(), topic);
                entities
            }
            Err(e) => {
                warn!("Entity generation failed: {}", e);
                Vec::new()
            }
        }
    }

    /// `source` is the input text in extract mode and `None` for generated
    /// entities, which are always implicit and carry no span.
    pub fn parse_entities(&self, response: &str, source: Option<&str>) -> Vec<Entity> {
        let mut seen = HashSet::new();
        let mut entities = Vec::new();

        for item in parse_object_array(response) {
            let Some(name) = string_field(&item, &["entity", "name", "subject"]) else {
                debug!("Skipping entity without a name: {:?}", item);
                continue;
            };
            let entity_type = string_field(&item, &["entity_type", "type", "predicate"])
                .unwrap_or_default();
            if !self.type_allowed(&entity_type) {
                debug!("Skipping entity '{}' of disallowed type '{}'", name, entity_type);
                continue;
            }
            if !seen.insert(name.clone()) {
                continue;
            }

            let mut entity = match source {
                Some(text) => {
                    let inferred = string_field(&item, &["inferred"])
                        .and_then(|raw| Provenance::parse(&raw))
                        .unwrap_or(Provenance::Explicit);
                    let citation = string_field(&item, &["citation"])
                        .map(|c| strip_ellipsis(&c).to_string())
                        .filter(|c| !c.is_empty())
                        .unwrap_or_else(|| name.clone());
                    let span = locate(text, &citation);
                    Entity::new(name, entity_type, inferred).with_citation(citation, span)
                }
                None => Entity::new(name, entity_type, Provenance::Implicit)
                    .with_citation(GENERATED_CITATION, CitationSpan::NONE),
            };

            if let Some(url) = string_field(&item, &["wikipedia_url", "url"]) {
                entity = entity.with_candidate_url(url);
            }
            entities.push(entity);

            if entities.len() >= self.settings.max_entities {
                break;
            }
        }

        entities
    }

    fn type_allowed(&self, entity_type: &str) -> bool {
        self.settings.allowed_types.is_empty()
            || self
                .settings
                .allowed_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(entity_type))
    }
}

/// How relationships are asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    ExplicitOnly,
    ExplicitThenImplicit,
    Generative,
}

impl Framing {
    pub fn for_mode(mode: Mode, infer_implicit: bool) -> Self {
        match (mode, infer_implicit) {
            (Mode::Generate, _) => Framing::Generative,
            (Mode::Extract, true) => Framing::ExplicitThenImplicit,
            (Mode::Extract, false) => Framing::ExplicitOnly,
        }
    }
}

pub struct RelationshipExtractor {
    llm: Arc<dyn TextGenerator>,
    language: Language,
}

impl RelationshipExtractor {
    pub fn new(llm: Arc<dyn TextGenerator>, language: Language) -> Self {
        Self { llm, language }
    }

    /// Candidate triples for `text` (or the topic, in generative framing).
    pub async fn extract(&self, text: &str, entities: &[Entity], framing: Framing) -> Vec<Relationship> {
        if entities.len() < 2 {
            debug!("Fewer than two entities, skipping relationship extraction");
            return Vec::new();
        }

        match framing {
            Framing::Generative => {
                let (system, user) = PromptBuilder::generative_relationships(self.language, text, entities);
                let triples = self.call(&system, &user, entities, Provenance::Implicit).await;
                info!("Generated {} relationships", triples.len());
                triples
            }
            Framing::ExplicitOnly | Framing::ExplicitThenImplicit => {
                let (system, user) = PromptBuilder::explicit_relationships(self.language, text, entities);
                let explicit = self.call(&system, &user, entities, Provenance::Explicit).await;
                info!("Extracted {} explicit relationships", explicit.len());

                if framing == Framing::ExplicitOnly {
                    return collapse_exact(explicit);
                }

                let (system, user) =
                    PromptBuilder::implicit_relationships(self.language, text, entities, &explicit);
                let implicit = self.call(&system, &user, entities, Provenance::Implicit).await;
                info!("Extracted {} implicit relationships", implicit.len());

                let mut merged = explicit;
                merged.extend(implicit);
                collapse_exact(merged)
            }
        }
    }

    /// One graph-completion call. Returned triples are implicit.
    pub async fn complete(&self, text: &str, entities: &[Entity], existing: &[Relationship]) -> Vec<Relationship> {
        let (system, user) = PromptBuilder::graph_completion(self.language, text, entities, existing);
        self.call(&system, &user, entities, Provenance::Implicit).await
    }

    async fn call(
        &self,
        system: &str,
        user: &str,
        entities: &[Entity],
        provenance: Provenance,
    ) -> Vec<Relationship> {
        match self.llm.generate_text(system, user).await {
            Ok(response) => parse_relationships(&response, entities, provenance),
            Err(e) => {
                warn!("Relationship call failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Parses model triples, tags them with `provenance` and backfills endpoint
/// types from the entity set. Triples with an unknown endpoint are dropped.
pub fn parse_relationships(response: &str, entities: &[Entity], provenance: Provenance) -> Vec<Relationship> {
    let raw = parse_object_array(response)
        .into_iter()
        .filter_map(|item| {
            let subject = string_field(&item, &["subject"])?;
            let predicate = string_field(&item, &["predicate"])?;
            let object = string_field(&item, &["object"])?;
            Some(Relationship::new(subject, predicate, object, provenance))
        })
        .collect();
    backfill(raw, entities)
}

pub fn backfill(relationships: Vec<Relationship>, entities: &[Entity]) -> Vec<Relationship> {
    let lookup: HashMap<&str, &Entity> = entities.iter().map(|e| (e.name.as_str(), e)).collect();
    let before = relationships.len();

    let kept: Vec<Relationship> = relationships
        .into_iter()
        .filter_map(|mut rel| {
            let subject = lookup.get(rel.subject.as_str())?;
            let object = lookup.get(rel.object.as_str())?;
            if subject.entity_type.is_empty() || object.entity_type.is_empty() || rel.predicate.is_empty() {
                return None;
            }
            rel.subject_type = subject.entity_type.clone();
            rel.object_type = object.entity_type.clone();
            rel.subject_inferred = subject.inferred;
            rel.object_inferred = object.inferred;
            Some(rel)
        })
        .collect();

    if kept.len() < before {
        debug!("Dropped {} relationships with unknown endpoints", before - kept.len());
    }
    kept
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{ExtractorError, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses in order and records every prompt it saw.
    pub struct ScriptedGenerator {
        responses: Mutex<VecDeque<Result<String>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        pub fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(|r| Ok(r.to_string())).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate_text(&self, _system_prompt: &str, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ExtractorError::InvalidResponse("script exhausted".to_string())))
        }
    }

    pub fn company(name: &str) -> Entity {
        Entity::new(name, "Company", Provenance::Explicit)
    }

    #[test]
    fn test_parse_entities_with_spans() {
        let config = Configuration::example();
        let extractor = EntityExtractor::new(Arc::new(ScriptedGenerator::failing()), &config);
        let text = "Größe matters: Apple and Microsoft compete.";
        let response = r#"```json
[
  {"entity": "Apple Inc.", "entity_type": "Company", "wikipedia_url": "https://en.wikipedia.org/wiki/Apple_Inc.", "citation": "Apple...", "inferred": "Explizit"},
  {"entity": "Microsoft", "entity_type": "Company", "citation": "Microsoft"},
  {"entity": "Microsoft", "entity_type": "Company"},
  {"entity_type": "Nameless"}
]
```"#;

        let entities = extractor.parse_entities(response, Some(text));
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].citation, "Apple");
        assert_eq!(entities[0].citation_span, CitationSpan { start: 15, end: 20 });
        assert_eq!(entities[0].inferred, Provenance::Explicit);
        assert_eq!(
            entities[0].candidate_url.as_deref(),
            Some("https://en.wikipedia.org/wiki/Apple_Inc.")
        );
        assert_eq!(entities[1].citation_span, CitationSpan { start: 25, end: 34 });
    }

    #[test]
    fn test_generated_entities_are_implicit() {
        let config = Configuration::example();
        let extractor = EntityExtractor::new(Arc::new(ScriptedGenerator::failing()), &config);
        let entities = extractor.parse_entities(
            r#"[{"entity": "Photosynthesis", "entity_type": "Process", "inferred": "explicit", "citation": "x"}]"#,
            None,
        );
        assert_eq!(entities[0].inferred, Provenance::Implicit);
        assert_eq!(entities[0].citation, GENERATED_CITATION);
        assert_eq!(entities[0].citation_span, CitationSpan::NONE);
    }

    #[test]
    fn test_unknown_endpoint_is_dropped() {
        let entities = vec![company("Apple"), company("Microsoft")];
        let triples = parse_relationships(
            r#"[{"subject": "Apple", "predicate": "Competes With", "object": "Microsoft"},
                {"subject": "Apple", "predicate": "owns", "object": "Beats"}]"#,
            &entities,
            Provenance::Explicit,
        );
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].predicate, "competes with");
        assert_eq!(triples[0].subject_type, "Company");
    }

    #[tokio::test]
    async fn test_explicit_then_implicit_prefers_explicit() {
        let llm = Arc::new(ScriptedGenerator::new(vec![
            r#"[{"subject": "Apple", "predicate": "competes with", "object": "Microsoft", "inferred": "explicit"}]"#,
            r#"[{"subject": "Apple", "predicate": "competes with", "object": "Microsoft", "inferred": "implicit"},
                {"subject": "Microsoft", "predicate": "rival of", "object": "Apple", "inferred": "implicit"}]"#,
        ]));
        let extractor = RelationshipExtractor::new(llm.clone(), Language::En);
        let entities = vec![company("Apple"), company("Microsoft")];

        let triples = extractor
            .extract("Apple competes with Microsoft.", &entities, Framing::ExplicitThenImplicit)
            .await;

        assert_eq!(llm.calls(), 2);
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[0].inferred, Provenance::Explicit);
        assert_eq!(triples[1].inferred, Provenance::Implicit);
        assert!(llm.prompts.lock().unwrap()[1].contains("competes with"));
    }

    #[tokio::test]
    async fn test_failed_call_yields_nothing() {
        let extractor = RelationshipExtractor::new(Arc::new(ScriptedGenerator::failing()), Language::De);
        let entities = vec![company("Apple"), company("Microsoft")];
        let triples = extractor.extract("t", &entities, Framing::Generative).await;
        assert!(triples.is_empty());
    }
}

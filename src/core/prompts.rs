use serde_json::json;

use crate::config::Language;
use crate::core::model::{Entity, Relationship};

pub struct PromptBuilder;

const PREDICATE_RULE: &str =
    "- Predicates MUST be 1-3 words maximum. Keep them lowercase. Subject and object keep the exact entity names as provided.";

const TRIPLE_OUTPUT: &str = "Return only a JSON array of objects with the keys \"subject\", \"predicate\", \"object\" and \"inferred\". Make sure the JSON is valid.";

fn language_directive(language: Language) -> String {
    format!(
        "Write every name, type and predicate in {}.",
        language.display_name()
    )
}

fn entity_listing(entities: &[Entity]) -> String {
    let listing: Vec<_> = entities
        .iter()
        .map(|e| json!({"name": e.name, "type": e.entity_type}))
        .collect();
    serde_json::to_string_pretty(&listing).unwrap_or_else(|_| "[]".to_string())
}

fn triple_listing(relationships: &[Relationship]) -> String {
    let listing: Vec<_> = relationships
        .iter()
        .map(|r| {
            json!({
                "subject": r.subject,
                "predicate": r.predicate,
                "object": r.object,
                "inferred": r.inferred.as_str(),
            })
        })
        .collect();
    serde_json::to_string_pretty(&listing).unwrap_or_else(|_| "[]".to_string())
}

fn type_restriction(allowed_types: &[String]) -> String {
    if allowed_types.is_empty() {
        return String::new();
    }
    let quoted: Vec<String> = allowed_types.iter().map(|t| format!("\"{}\"", t)).collect();
    format!(
        "\nIMPORTANT: Only extract entities of the following types: {}. The entity_type field must be one of these exact values.\n",
        quoted.join(", ")
    )
}

impl PromptBuilder {
    pub fn entity_extraction_system(
        language: Language,
        max_entities: usize,
        allowed_types: &[String],
    ) -> String {
        let lang = language.code();
        let mut prompt = format!(
            r#"You are a helpful AI system for recognizing and linking entities.
Identify the most important entities in the given text (at most {max}) and link them to their Wikipedia pages.

Return a JSON array with one object per entity and these keys:
- entity: the entity name exactly as the {lang}.wikipedia.org article title
- entity_type: the entity type (e.g. Person, Organization, Location, Event, Concept, Work)
- wikipedia_url: the URL of the article on {lang}.wikipedia.org
- citation: the exact, short text span of the input that mentions the entity

Rules:
- Citations must appear verbatim in the input, without trailing ellipsis or truncation
- Keep citations under 10 words
- Skip entities without a Wikipedia article
- {directive}
- Return only valid JSON without any explanation
"#,
            max = max_entities,
            lang = lang,
            directive = language_directive(language),
        );
        prompt.push_str(&type_restriction(allowed_types));
        prompt
    }

    pub fn entity_extraction_user(text: &str) -> String {
        format!("Text:\n```{}```", text)
    }

    pub fn topic_generation_system(
        language: Language,
        max_entities: usize,
        allowed_types: &[String],
    ) -> String {
        let mut prompt = format!(
            r#"You are a comprehensive knowledge generator for educational compendia.
Generate the {max} most important entities related to the given topic.

Return a JSON array with one object per entity and these keys:
- entity: the {lang}.wikipedia.org article title
- entity_type: the entity type
- wikipedia_url: the URL of the article on {lang}.wikipedia.org
- inferred: always "implicit"
- citation: always "generated"

{directive}
Return only valid JSON without any explanation.
"#,
            max = max_entities,
            lang = language.code(),
            directive = language_directive(language),
        );
        prompt.push_str(&type_restriction(allowed_types));
        prompt
    }

    pub fn topic_generation_user(topic: &str) -> String {
        format!("Topic: {}", topic)
    }

    pub fn explicit_relationships(language: Language, text: &str, entities: &[Entity]) -> (String, String) {
        let system = format!(
            r#"You are an advanced AI system specialized in knowledge extraction and knowledge graph generation.
Extract ONLY relationships between the provided entities that are explicitly stated in the text. Do not infer anything.
Both subject and object MUST come from the provided entity list. Do not invent new entities.

Rules:
{rule}
- {directive}

{output} Set "inferred" to "explicit" for every triple.
"#,
            rule = PREDICATE_RULE,
            directive = language_directive(language),
            output = TRIPLE_OUTPUT,
        );
        let user = format!(
            "Text: ```{}```\n\nEntities:\n{}\n\nIdentify all EXPLICIT relationships between these entities in the text.",
            text,
            entity_listing(entities)
        );
        (system, user)
    }

    pub fn implicit_relationships(
        language: Language,
        text: &str,
        entities: &[Entity],
        explicit: &[Relationship],
    ) -> (String, String) {
        let system = format!(
            r#"You are an advanced AI system specialized in knowledge graph enrichment.
Based on the text, the entity list and the already extracted EXPLICIT relationships, add all additional IMPLICIT relationships (inferred or background knowledge) between the entities.
Do not repeat any relationship from the explicit list. Use only the provided entities as subject and object.

Rules:
{rule}
- {directive}

{output} Set "inferred" to "implicit" for every triple.
"#,
            rule = PREDICATE_RULE,
            directive = language_directive(language),
            output = TRIPLE_OUTPUT,
        );
        let user = format!(
            "Text: ```{}```\n\nEntities:\n{}\n\nExplicit relationships (do NOT repeat these):\n{}\n\nIdentify all additional IMPLICIT relationships between these entities.",
            text,
            entity_listing(entities),
            triple_listing(explicit)
        );
        (system, user)
    }

    pub fn generative_relationships(language: Language, topic: &str, entities: &[Entity]) -> (String, String) {
        let system = format!(
            r#"You are an advanced AI system specialized in knowledge graph extraction and enrichment.
Based on the topic and the entity list, produce the relationships between these entities. Do not invent new entities.

Rules:
{rule}
- {directive}

{output} Set "inferred" to "implicit" for every triple.
"#,
            rule = PREDICATE_RULE,
            directive = language_directive(language),
            output = TRIPLE_OUTPUT,
        );
        let user = format!(
            "Topic: {}\n\nEntities:\n{}\n\nGenerate logical relationship triples among these entities relevant to this topic.",
            topic,
            entity_listing(entities)
        );
        (system, user)
    }

    pub fn graph_completion(
        language: Language,
        text: &str,
        entities: &[Entity],
        existing: &[Relationship],
    ) -> (String, String) {
        let system = format!(
            "You are a knowledge graph completion assistant. Only generate new implicit relationships between the provided entities; do not invent any new entities.\n{}\n{}",
            PREDICATE_RULE,
            language_directive(language)
        );
        let user = format!(
            "Text: ```{}```\n\nEntities:\n{}\n\nExisting relationships:\n{}\n\nIdentify additional IMPLICIT relationships between these entities that are not in the existing list, to logically complete the graph. {}",
            text,
            entity_listing(entities),
            triple_listing(existing),
            TRIPLE_OUTPUT
        );
        (system, user)
    }

    /// Paraphrase grouping for all predicates linking one subject to one object.
    pub fn predicate_grouping(subject: &str, object: &str, group: &[Relationship]) -> (String, String) {
        let predicates: Vec<_> = group
            .iter()
            .map(|r| json!({"predicate": r.predicate, "inferred": r.inferred.as_str()}))
            .collect();
        let system = "You are a helpful assistant for deduplicating knowledge graph relationships.".to_string();
        let user = format!(
            "For the following relationships between subject and object, group all semantically similar predicates together, including those that only differ grammatically or stylistically (tense, prepositions, auxiliary verbs). \
Keep only the most concise and representative formulation for each unique relationship. \
Subject: '{}', Object: '{}', Relationships: {}. \
Return a JSON array of unique relationships with their \"predicate\" and \"inferred\" fields.",
            subject,
            object,
            serde_json::to_string(&predicates).unwrap_or_else(|_| "[]".to_string())
        );
        (system, user)
    }
}

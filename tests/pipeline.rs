use async_trait::async_trait;
use mockito::{Matcher, Server, ServerGuard};
use std::sync::{Arc, Mutex};

use entity_knowledge_extractor::config::{Configuration, Language, Mode};
use entity_knowledge_extractor::core::model::{KnowledgeBase, Provenance, GENERATED_CITATION};
use entity_knowledge_extractor::core::{Pipeline, TextGenerator};
use entity_knowledge_extractor::utils::validate_result;
use entity_knowledge_extractor::{generate_from_topic, process_text, Result};

/// Answers each call by the first route whose marker occurs in the system
/// prompt, counting calls per route.
struct RoutedGenerator {
    routes: Vec<(&'static str, String)>,
    calls: Mutex<Vec<&'static str>>,
}

impl RoutedGenerator {
    fn new(routes: Vec<(&'static str, &str)>) -> Self {
        Self {
            routes: routes.into_iter().map(|(m, r)| (m, r.to_string())).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls_to(&self, marker: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| **m == marker).count()
    }
}

#[async_trait]
impl TextGenerator for RoutedGenerator {
    async fn generate_text(&self, system_prompt: &str, _prompt: &str) -> Result<String> {
        for (marker, response) in &self.routes {
            if system_prompt.contains(marker) {
                self.calls.lock().unwrap().push(*marker);
                return Ok(response.clone());
            }
        }
        Ok("[]".to_string())
    }
}

const ENTITIES: &str = "recognizing and linking entities";
const EXPLICIT: &str = "knowledge graph generation";
const IMPLICIT: &str = "knowledge graph enrichment";
const GROUPING: &str = "deduplicating knowledge graph relationships";
const COMPLETION: &str = "knowledge graph completion assistant";
const TOPIC: &str = "comprehensive knowledge generator";
const GENERATIVE: &str = "extraction and enrichment";

fn config_for(server: &ServerGuard) -> Configuration {
    let url = server.url();
    let mut config = Configuration::example();
    config.language = Language::En;
    config.concurrency = 2;
    config.relations.kgc_rounds = 2;

    let kb = &mut config.knowledge_bases;
    kb.use_wikidata = false;
    kb.use_dbpedia = false;
    kb.timeout = 5;
    kb.endpoints.wikipedia_api = format!("{}/{{lang}}/w/api.php", url);
    kb.endpoints.wikipedia_article = format!("{}/{{lang}}/wiki/", url);
    config
}

async fn mock_wikipedia(server: &mut ServerGuard) {
    let microsoft = format!("{}/en/wiki/Microsoft", server.url());
    server
        .mock("GET", "/en/w/api.php")
        .match_query(Matcher::UrlEncoded("action".into(), "opensearch".into()))
        .with_status(200)
        .with_body(serde_json::json!(["Microsoft", ["Microsoft"], [""], [microsoft]]).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/en/w/api.php")
        .match_query(Matcher::UrlEncoded("prop".into(), "extracts".into()))
        .with_status(200)
        .with_body(r#"{"query":{"pages":{"1":{"extract":"A technology company."}}}}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/en/w/api.php")
        .match_query(Matcher::UrlEncoded("prop".into(), "categories".into()))
        .with_status(200)
        .with_body(r#"{"query":{"pages":{"1":{"pageid":1,"categories":[{"title":"Category:Technology companies"}]}}}}"#)
        .create_async()
        .await;
}

#[tokio::test]
async fn test_extract_links_deduplicates_and_completes() {
    let mut server = Server::new_async().await;
    mock_wikipedia(&mut server).await;
    let apple_url = format!("{}/en/wiki/Apple_Inc.", server.url());

    let entities = format!(
        r#"```json
[{{"entity": "Apple", "entity_type": "Company", "citation": "Apple", "wikipedia_url": "{}"}},
 {{"entity": "Microsoft", "entity_type": "Company", "citation": "Microsoft"}}]
```"#,
        apple_url
    );

    let llm = Arc::new(RoutedGenerator::new(vec![
        (ENTITIES, entities.as_str()),
        (
            EXPLICIT,
            r#"[{"subject": "Apple", "predicate": "competes with", "object": "Microsoft", "inferred": "explicit"},
                {"subject": "Apple", "predicate": "is competing with", "object": "Microsoft", "inferred": "explicit"},
                {"subject": "Apple", "predicate": "owns", "object": "Beats"}]"#,
        ),
        (
            IMPLICIT,
            r#"[{"subject": "Microsoft", "predicate": "Rival  of", "object": "Apple", "inferred": "implicit"}]"#,
        ),
        (GROUPING, r#"[{"predicate": "competes with", "inferred": "explicit"}]"#),
        (COMPLETION, "[]"),
    ]));

    let pipeline = Pipeline::new(config_for(&server), llm.clone(), None).unwrap();
    let result = pipeline.process_text("Apple competes with Microsoft.").await;

    assert_eq!(result.entities().len(), 2);
    let apple = &result.entities()[0];
    assert_eq!(apple.name, "Apple");
    assert_eq!(apple.citation_span.start, 0);
    assert_eq!(apple.citation_span.end, 5);
    assert_eq!(
        apple.links[&KnowledgeBase::Wikipedia].url.as_deref(),
        Some(apple_url.as_str())
    );
    let microsoft = &result.entities()[1];
    assert_eq!(
        microsoft.links[&KnowledgeBase::Wikipedia].url,
        Some(format!("{}/en/wiki/Microsoft", server.url()))
    );
    assert_eq!(
        microsoft.links[&KnowledgeBase::Wikipedia].summary.as_deref(),
        Some("A technology company.")
    );

    let rels = result.relationships();
    assert_eq!(rels.len(), 2);
    let competes = rels.iter().find(|r| r.subject == "Apple").unwrap();
    assert_eq!(competes.predicate, "competes with");
    assert_eq!(competes.inferred, Provenance::Explicit);
    assert_eq!(competes.object_type, "Company");
    let rival = rels.iter().find(|r| r.subject == "Microsoft").unwrap();
    assert_eq!(rival.predicate, "rival of");
    assert_eq!(rival.inferred, Provenance::Implicit);

    assert_eq!(llm.calls_to(ENTITIES), 1);
    assert_eq!(llm.calls_to(GROUPING), 1);
    assert_eq!(llm.calls_to(COMPLETION), 2);
    assert!(validate_result(&result).is_empty());

    let json = serde_json::to_value(&result).unwrap();
    for rel in json["relationships"].as_array().unwrap() {
        let inferred = rel["inferred"].as_str().unwrap();
        assert!(inferred == "explicit" || inferred == "implicit");
    }
}

#[tokio::test]
async fn test_generate_from_topic_marks_everything_implicit() {
    let server = Server::new_async().await;
    let mut config = config_for(&server);
    config.mode = Mode::Generate;
    config.knowledge_bases.use_wikipedia = false;
    config.relations.enable_kgc = false;

    let llm = Arc::new(RoutedGenerator::new(vec![
        (
            TOPIC,
            r#"[{"entity": "Photosynthesis", "entity_type": "Process", "inferred": "implicit", "citation": "generated"},
                {"entity": "Chlorophyll", "entity_type": "Molecule", "inferred": "implicit", "citation": "generated"}]"#,
        ),
        (
            GENERATIVE,
            r#"[{"subject": "Photosynthesis", "predicate": "requires", "object": "Chlorophyll", "inferred": "explicit"}]"#,
        ),
    ]));

    let pipeline = Pipeline::new(config, llm.clone(), None).unwrap();
    let result = pipeline.run("Photosynthesis").await;

    assert_eq!(result.entities().len(), 2);
    for entity in result.entities() {
        assert_eq!(entity.inferred, Provenance::Implicit);
        assert_eq!(entity.citation, GENERATED_CITATION);
        assert!(!entity.citation_span.is_grounded());
        assert!(entity.links.is_empty());
    }
    assert_eq!(result.relationships().len(), 1);
    assert_eq!(result.relationships()[0].inferred, Provenance::Implicit);
    assert_eq!(llm.calls_to(GENERATIVE), 1);
}

#[tokio::test]
async fn test_top_level_without_credentials_is_empty() {
    let server = Server::new_async().await;
    let mut config = config_for(&server);
    config.llm_settings.api_key = None;

    let result = process_text("Apple competes with Microsoft.", &config).await;

    assert!(result.entities().is_empty());
    assert!(result.relationships().is_empty());
}

#[tokio::test]
async fn test_top_level_generation_without_credentials_is_empty() {
    let server = Server::new_async().await;
    let mut config = config_for(&server);
    config.mode = Mode::Generate;
    config.llm_settings.api_key = None;

    let result = generate_from_topic("Photosynthesis", &config).await;

    assert!(result.entities().is_empty());
    assert!(result.relationships().is_empty());
    assert!(validate_result(&result).is_empty());
}

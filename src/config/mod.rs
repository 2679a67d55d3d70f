use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use anyhow::{Result, Context};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub language: Language,
    pub llm_settings: LlmSettings,
    #[serde(default)]
    pub entities: EntitySettings,
    #[serde(default)]
    pub knowledge_bases: KnowledgeBaseSettings,
    #[serde(default)]
    pub relations: RelationSettings,
    #[serde(default)]
    pub chunking: ChunkingSettings,
    #[serde(default)]
    pub post_processing: PostProcessing,
    /// Upper bound on entity ladders / chunk pipelines in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// `extract` grounds everything in an input text, `generate` builds a
/// compendium for a topic with no source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Extract,
    Generate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    De,
    En,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::De => "de",
            Language::En => "en",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::De => "German",
            Language::En => "English",
        }
    }

    /// Language tried second by the search fallback.
    pub fn secondary(&self) -> Language {
        match self {
            Language::De => Language::En,
            Language::En => Language::De,
        }
    }

    pub fn from_code(code: &str) -> Option<Language> {
        match code.to_ascii_lowercase().as_str() {
            "de" => Some(Language::De),
            "en" => Some(Language::En),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Embedding model used by the similarity dedup tier. Without it the tier
    /// falls back to lexical similarity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: "gpt-4.1-mini".to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
            embedding_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySettings {
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
    /// Empty means any type the model chooses.
    #[serde(default)]
    pub allowed_types: Vec<String>,
}

impl Default for EntitySettings {
    fn default() -> Self {
        Self {
            max_entities: default_max_entities(),
            allowed_types: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseSettings {
    #[serde(default = "default_true")]
    pub use_wikipedia: bool,
    #[serde(default = "default_true")]
    pub use_wikidata: bool,
    #[serde(default)]
    pub use_dbpedia: bool,
    #[serde(default = "default_dbpedia_language")]
    pub dbpedia_language: Language,
    /// Fetch page properties (Wikidata item, page image) alongside categories.
    #[serde(default)]
    pub additional_details: bool,
    /// Translate a candidate article in another language through its
    /// langlinks. When off, such candidates fall through to search.
    #[serde(default = "default_true")]
    pub convert_candidates: bool,
    #[serde(default = "default_kb_timeout")]
    pub timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub endpoints: KnowledgeBaseEndpoints,
}

impl Default for KnowledgeBaseSettings {
    fn default() -> Self {
        Self {
            use_wikipedia: true,
            use_wikidata: true,
            use_dbpedia: false,
            dbpedia_language: default_dbpedia_language(),
            additional_details: false,
            convert_candidates: true,
            timeout: default_kb_timeout(),
            user_agent: default_user_agent(),
            endpoints: KnowledgeBaseEndpoints::default(),
        }
    }
}

/// Endpoint templates. `{lang}` and `{id}` are substituted per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseEndpoints {
    pub wikipedia_api: String,
    pub wikipedia_article: String,
    pub wikidata_api: String,
    pub wikidata_entity_data: String,
    pub dbpedia_resource: HashMap<Language, String>,
    pub dbpedia_endpoints: HashMap<Language, Vec<String>>,
}

impl Default for KnowledgeBaseEndpoints {
    fn default() -> Self {
        let mut dbpedia_resource = HashMap::new();
        dbpedia_resource.insert(Language::En, "http://dbpedia.org/resource/".to_string());
        dbpedia_resource.insert(Language::De, "http://de.dbpedia.org/resource/".to_string());

        let mut dbpedia_endpoints = HashMap::new();
        dbpedia_endpoints.insert(
            Language::En,
            vec![
                "https://dbpedia.org/sparql".to_string(),
                "https://dbpedia-live.openlinksw.com/sparql".to_string(),
            ],
        );
        dbpedia_endpoints.insert(
            Language::De,
            vec![
                "http://de.dbpedia.org/sparql".to_string(),
                "https://dbpedia.org/sparql".to_string(),
            ],
        );

        Self {
            wikipedia_api: "https://{lang}.wikipedia.org/w/api.php".to_string(),
            wikipedia_article: "https://{lang}.wikipedia.org/wiki/".to_string(),
            wikidata_api: "https://www.wikidata.org/w/api.php".to_string(),
            wikidata_entity_data: "https://www.wikidata.org/wiki/Special:EntityData/{id}.json".to_string(),
            dbpedia_resource,
            dbpedia_endpoints,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Run a second pass proposing implicit triples after the explicit pass.
    #[serde(default)]
    pub infer_implicit: bool,
    #[serde(default)]
    pub enable_kgc: bool,
    #[serde(default = "default_kgc_rounds")]
    pub kgc_rounds: usize,
    /// Stop completion early once a round adds nothing.
    #[serde(default)]
    pub stop_on_empty_round: bool,
}

impl Default for RelationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            infer_implicit: false,
            enable_kgc: false,
            kgc_rounds: default_kgc_rounds(),
            stop_on_empty_round: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessing {
    #[serde(default = "default_true")]
    pub llm_grouping: bool,
    #[serde(default = "default_true")]
    pub semantic_dedup: bool,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

impl Default for PostProcessing {
    fn default() -> Self {
        Self {
            llm_grouping: true,
            semantic_dedup: true,
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_temperature() -> f32 { 0.2 }
fn default_max_tokens() -> u32 { 4096 }
fn default_timeout() -> u64 { 120 }
fn default_true() -> bool { true }
fn default_concurrency() -> usize { 4 }
fn default_max_entities() -> usize { 10 }
fn default_dbpedia_language() -> Language { Language::En }
fn default_kb_timeout() -> u64 { 15 }
fn default_user_agent() -> String { "entity_knowledge_extractor/1.0 (https://github.com/)".to_string() }
fn default_kgc_rounds() -> usize { 3 }
fn default_chunk_size() -> usize { 2000 }
fn default_chunk_overlap() -> usize { 50 }
fn default_similarity_threshold() -> f32 { 0.85 }

impl Configuration {
    /// Load configuration from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        Ok(config)
    }

    /// Fill credentials and endpoints from the environment. Values already
    /// present in the file win over the environment for the API key only.
    pub fn with_env_overrides(mut self) -> Self {
        if self.llm_settings.api_key.is_none() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                if !key.trim().is_empty() {
                    self.llm_settings.api_key = Some(key);
                }
            }
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            self.llm_settings.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm_settings.model = model;
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.llm_settings.base_url.is_empty() {
            anyhow::bail!("No LLM base URL defined");
        }

        if self.llm_settings.model.is_empty() {
            anyhow::bail!("No LLM model defined");
        }

        if self.entities.max_entities == 0 {
            anyhow::bail!("max_entities must be at least 1");
        }

        if self.chunking.enabled && self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        if !(0.0..=1.0).contains(&self.post_processing.similarity_threshold) {
            anyhow::bail!("similarity_threshold must be within 0.0..=1.0");
        }

        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }

        let endpoints = &self.knowledge_bases.endpoints;
        if !endpoints.wikipedia_api.contains("{lang}") || !endpoints.wikipedia_article.contains("{lang}") {
            anyhow::bail!("Wikipedia endpoint templates must contain {{lang}}");
        }
        if !endpoints.wikidata_entity_data.contains("{id}") {
            anyhow::bail!("Wikidata entity data template must contain {{id}}");
        }

        Ok(())
    }

    /// Create an example configuration
    pub fn example() -> Self {
        Configuration {
            name: "Example entity extraction config".to_string(),
            mode: Mode::Extract,
            language: Language::En,
            llm_settings: LlmSettings {
                embedding_model: Some("text-embedding-3-small".to_string()),
                ..Default::default()
            },
            entities: EntitySettings {
                max_entities: 15,
                allowed_types: Vec::new(),
            },
            knowledge_bases: KnowledgeBaseSettings {
                use_dbpedia: true,
                ..Default::default()
            },
            relations: RelationSettings {
                enabled: true,
                infer_implicit: true,
                enable_kgc: true,
                kgc_rounds: 3,
                stop_on_empty_round: false,
            },
            chunking: ChunkingSettings::default(),
            post_processing: PostProcessing::default(),
            concurrency: default_concurrency(),
        }
    }
}

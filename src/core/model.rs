use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Whether a fact was stated in the source text or inferred/generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Provenance {
    #[default]
    Explicit,
    Implicit,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Explicit => "explicit",
            Provenance::Implicit => "implicit",
        }
    }

    /// Accepts the current spellings and the legacy German ones, any case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "explicit" | "explizit" => Some(Provenance::Explicit),
            "implicit" | "implizit" => Some(Provenance::Implicit),
            _ => None,
        }
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Provenance::Explicit)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Provenance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Provenance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Provenance::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown provenance '{}'", raw)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationSpan {
    pub start: i64,
    pub end: i64,
}

impl CitationSpan {
    /// Marker for entities that are not grounded in the input text.
    pub const NONE: CitationSpan = CitationSpan { start: -1, end: -1 };

    pub fn is_grounded(&self) -> bool {
        self.start >= 0 && self.end >= self.start
    }

    pub fn shifted(&self, offset: usize) -> CitationSpan {
        if !self.is_grounded() {
            return *self;
        }
        let offset = offset as i64;
        CitationSpan {
            start: self.start + offset,
            end: self.end + offset,
        }
    }
}

impl Default for CitationSpan {
    fn default() -> Self {
        CitationSpan::NONE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeBase {
    Wikipedia,
    Wikidata,
    Dbpedia,
}

/// What one knowledge base knows about an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub inferred: Provenance,
    pub citation: String,
    pub citation_span: CitationSpan,
    #[serde(default)]
    pub links: BTreeMap<KnowledgeBase, SourceRecord>,
    /// Reference URL proposed by the model; consumed by the linker.
    #[serde(skip)]
    pub candidate_url: Option<String>,
}

pub const GENERATED_CITATION: &str = "generated";

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>, inferred: Provenance) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            inferred,
            citation: GENERATED_CITATION.to_string(),
            citation_span: CitationSpan::NONE,
            links: BTreeMap::new(),
            candidate_url: None,
        }
    }

    pub fn with_citation(mut self, citation: impl Into<String>, span: CitationSpan) -> Self {
        self.citation = citation.into();
        self.citation_span = span;
        self
    }

    pub fn with_candidate_url(mut self, url: impl Into<String>) -> Self {
        self.candidate_url = Some(url.into());
        self
    }

    /// Adds a knowledge-base record unless one is already present.
    /// Returns whether the record was inserted.
    pub fn attach_link(&mut self, kb: KnowledgeBase, record: SourceRecord) -> bool {
        if self.links.contains_key(&kb) {
            return false;
        }
        self.links.insert(kb, record);
        true
    }

    pub fn wikipedia_url(&self) -> Option<&str> {
        self.links
            .get(&KnowledgeBase::Wikipedia)
            .and_then(|r| r.url.as_deref())
    }
}

/// Identity of a triple.
pub type TripleKey = (String, String, String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub inferred: Provenance,
    #[serde(default)]
    pub subject_type: String,
    #[serde(default)]
    pub object_type: String,
    #[serde(default)]
    pub subject_inferred: Provenance,
    #[serde(default)]
    pub object_inferred: Provenance,
}

impl Relationship {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        inferred: Provenance,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: normalize_predicate(&predicate.into()),
            object: object.into(),
            inferred,
            subject_type: String::new(),
            object_type: String::new(),
            subject_inferred: Provenance::Explicit,
            object_inferred: Provenance::Explicit,
        }
    }

    pub fn key(&self) -> TripleKey {
        (self.subject.clone(), self.predicate.clone(), self.object.clone())
    }

    pub fn pair(&self) -> (String, String) {
        (self.subject.clone(), self.object.clone())
    }
}

/// Lowercase and collapse internal whitespace.
pub fn normalize_predicate(raw: &str) -> String {
    raw.split_whitespace()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Entities and relationships of one chunk or one whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentGraph {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub id: String,
    pub extraction_timestamp: DateTime<Utc>,
    pub processing_time_seconds: f64,
    #[serde(flatten)]
    pub graph: DocumentGraph,
}

impl ExtractionResult {
    pub fn new(graph: DocumentGraph, processing_time_seconds: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            extraction_timestamp: Utc::now(),
            processing_time_seconds,
            graph,
        }
    }

    pub fn empty() -> Self {
        Self::new(DocumentGraph::default(), 0.0)
    }

    pub fn entities(&self) -> &[Entity] {
        &self.graph.entities
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.graph.relationships
    }
}

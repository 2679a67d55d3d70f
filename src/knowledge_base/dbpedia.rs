use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Language;
use crate::core::model::SourceRecord;
use crate::knowledge_base::{ArticleRef, KbClient};

/// Single-valued bindings copied into attributes.
const SCALAR_FIELDS: &[(&str, &str)] = &[
    ("comment", "comment"),
    ("homepage", "homepage"),
    ("thumbnail", "thumbnail"),
    ("depiction", "depiction"),
    ("birthDate", "birth_date"),
    ("deathDate", "death_date"),
    ("populationTotal", "population"),
    ("areaTotal", "area"),
    ("country", "country"),
    ("region", "region"),
    ("foundingDate", "founding_date"),
    ("founder", "founder"),
    ("parentCompany", "parent_company"),
];

/// Multi-valued bindings copied into attributes.
const LIST_FIELDS: &[(&str, &str)] = &[
    ("sameAs", "same_as"),
    ("part_of", "part_of"),
    ("has_part", "has_parts"),
    ("member_of", "member_of"),
    ("current_member", "current_member"),
    ("former_member", "former_member"),
];

pub struct DbpediaClient {
    kb: Arc<KbClient>,
    language: Language,
}

fn resource_query(resource: &str, lang: &str) -> String {
    format!(
        r#"PREFIX dbo: <http://dbpedia.org/ontology/>
PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>
PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#>
PREFIX owl: <http://www.w3.org/2002/07/owl#>
PREFIX foaf: <http://xmlns.com/foaf/0.1/>
PREFIX geo: <http://www.w3.org/2003/01/geo/wgs84_pos#>
PREFIX dcterms: <http://purl.org/dc/terms/>
PREFIX dul: <http://www.ontologydesignpatterns.org/ont/dul/DUL.owl#>
SELECT ?abstract ?label ?type ?comment ?sameAs ?homepage ?thumbnail ?depiction
       ?lat ?long ?subject ?category ?birthDate ?deathDate ?populationTotal ?areaTotal
       ?country ?region ?foundingDate ?founder ?parentCompany
       ?part_of ?has_part ?member_of ?current_member ?former_member WHERE {{
  OPTIONAL {{ <{r}> dbo:abstract ?abstract . FILTER(LANG(?abstract) = "{l}") }}
  OPTIONAL {{ <{r}> rdfs:label ?label . FILTER(LANG(?label) = "{l}") }}
  OPTIONAL {{ <{r}> rdf:type ?type . }}
  OPTIONAL {{ <{r}> rdfs:comment ?comment . FILTER(LANG(?comment) = "{l}") }}
  OPTIONAL {{ <{r}> owl:sameAs ?sameAs . }}
  OPTIONAL {{ <{r}> foaf:homepage ?homepage . }}
  OPTIONAL {{ <{r}> dbo:thumbnail ?thumbnail . }}
  OPTIONAL {{ <{r}> foaf:depiction ?depiction . }}
  OPTIONAL {{ <{r}> geo:lat ?lat . }}
  OPTIONAL {{ <{r}> geo:long ?long . }}
  OPTIONAL {{ <{r}> dcterms:subject ?subject . }}
  OPTIONAL {{ <{r}> dbo:category ?category . }}
  OPTIONAL {{ <{r}> dbo:birthDate ?birthDate . }}
  OPTIONAL {{ <{r}> dbo:deathDate ?deathDate . }}
  OPTIONAL {{ <{r}> dbo:populationTotal ?populationTotal . }}
  OPTIONAL {{ <{r}> dbo:areaTotal ?areaTotal . }}
  OPTIONAL {{ <{r}> dbo:country ?country . }}
  OPTIONAL {{ <{r}> dbo:region ?region . }}
  OPTIONAL {{ <{r}> dbo:foundingDate ?foundingDate . }}
  OPTIONAL {{ <{r}> dbo:founder ?founder . }}
  OPTIONAL {{ <{r}> dbo:parentCompany ?parentCompany . }}
  OPTIONAL {{ <{r}> dbo:isPartOf ?part_of . }}
  OPTIONAL {{ <{r}> dbo:hasPart ?has_part . }}
  OPTIONAL {{ <{r}> ?p_mem ?member_of . ?p_mem rdfs:subPropertyOf* dul:hasMember . }}
  OPTIONAL {{ <{r}> dbo:currentMember ?current_member . }}
  OPTIONAL {{ <{r}> dbo:formerMember ?former_member . }}
}} LIMIT 200"#,
        r = resource,
        l = lang
    )
}

/// Distinct values of one variable across all bindings, in order.
fn values(bindings: &[Value], var: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for b in bindings {
        if let Some(v) = b.get(var).and_then(|v| v.get("value")).and_then(Value::as_str) {
            if !out.iter().any(|seen| seen == v) {
                out.push(v.to_string());
            }
        }
    }
    out
}

impl DbpediaClient {
    pub fn new(kb: Arc<KbClient>, language: Language) -> Self {
        Self { kb, language }
    }

    /// Linked-data record for a resolved Wikipedia article.
    pub async fn lookup(&self, article_url: &str) -> Option<SourceRecord> {
        let article = self.kb.parse_article_url(article_url)?;
        let (lang, title) = self.target_title(&article).await;

        let base = self.kb.endpoints().dbpedia_resource.get(&lang)?;
        let resource = format!("{}{}", base, resource_name(&title));
        let endpoints = self.kb.endpoints().dbpedia_endpoints.get(&lang)?.clone();
        let query = resource_query(&resource, lang.code());

        for endpoint in &endpoints {
            let response = match self.kb.sparql(endpoint, &query).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("DBpedia endpoint {} failed for {}: {}", endpoint, resource, e);
                    continue;
                }
            };
            let bindings = response
                .pointer("/results/bindings")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if bindings.is_empty() {
                warn!("No DBpedia data for {} at {}", resource, endpoint);
                continue;
            }
            info!("Retrieved DBpedia data for {} from {}", resource, endpoint);
            return Some(record_from_bindings(&resource, endpoint, lang, &bindings));
        }
        None
    }

    /// Title in the configured DBpedia language, translated through
    /// langlinks when the article is in another language. Without a
    /// translation the English DBpedia is used with the original title.
    async fn target_title(&self, article: &ArticleRef) -> (Language, String) {
        let title = article.display_title();
        if article.lang == self.language.code() {
            return (self.language, title);
        }
        match self.kb.translate_title(article, self.language.code()).await {
            Some(translated) => (self.language, translated),
            None => {
                warn!(
                    "No {} title for {}:{}, falling back to English DBpedia",
                    self.language, article.lang, title
                );
                (Language::En, title)
            }
        }
    }
}

/// Resource local name for a title: underscores for spaces, and the
/// characters a SPARQL IRIREF cannot hold percent-encoded.
fn resource_name(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.trim().chars() {
        match c {
            ' ' => out.push('_'),
            '"' | '<' | '>' | '\\' | '{' | '}' | '|' | '^' | '`' => out.push_str(&format!("%{:02X}", c as u32)),
            c if c.is_control() => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{:02X}", b));
                }
            }
            c => out.push(c),
        }
    }
    out
}

fn record_from_bindings(resource: &str, endpoint: &str, lang: Language, bindings: &[Value]) -> SourceRecord {
    let mut attributes = BTreeMap::new();
    attributes.insert("endpoint".to_string(), json!(endpoint));
    attributes.insert("language".to_string(), json!(lang.code()));

    let types = values(bindings, "type");
    if !types.is_empty() {
        attributes.insert("types".to_string(), json!(types));
    }
    for (var, key) in SCALAR_FIELDS {
        if let Some(first) = values(bindings, var).into_iter().next() {
            attributes.insert(key.to_string(), json!(first));
        }
    }
    for (var, key) in LIST_FIELDS {
        let found = values(bindings, var);
        if !found.is_empty() {
            attributes.insert(key.to_string(), json!(found));
        }
    }
    if let (Some(lat), Some(long)) = (
        values(bindings, "lat").into_iter().next(),
        values(bindings, "long").into_iter().next(),
    ) {
        attributes.insert("coordinates".to_string(), json!({"latitude": lat, "longitude": long}));
    }

    let mut categories = values(bindings, "subject");
    for category in values(bindings, "category") {
        if !categories.contains(&category) {
            categories.push(category);
        }
    }

    SourceRecord {
        id: Some(resource.to_string()),
        url: Some(resource.to_string()),
        title: values(bindings, "label").into_iter().next(),
        summary: values(bindings, "abstract").into_iter().next(),
        categories,
        attributes,
    }
}

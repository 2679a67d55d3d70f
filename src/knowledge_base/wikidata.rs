use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::model::SourceRecord;
use crate::knowledge_base::wikipedia::ArticleResolution;
use crate::knowledge_base::{first_page, KbClient};

/// Claims copied into the record's attributes, keyed by property id.
const ATTRIBUTE_CLAIMS: &[(&str, &str)] = &[
    ("P18", "image"),
    ("P856", "website"),
    ("P625", "coordinates"),
    ("P571", "inception"),
    ("P569", "birth_date"),
    ("P570", "death_date"),
    ("P1082", "population"),
];

/// Claims whose values are other items and are reported by label.
const LABELLED_CLAIMS: &[(&str, &str)] = &[("P31", "types"), ("P17", "country"), ("P106", "occupations")];

pub struct WikidataClient {
    kb: Arc<KbClient>,
}

impl WikidataClient {
    pub fn new(kb: Arc<KbClient>) -> Self {
        Self { kb }
    }

    /// Structured facts for a resolved article; `None` when no item is found.
    pub async fn lookup(&self, article: &ArticleResolution, name: &str, lang: &str) -> Option<SourceRecord> {
        let id = match self.item_id(article).await {
            Some(id) => id,
            None => self.search_entity(name, lang).await?,
        };
        let record = self.entity_record(&id, lang).await;
        if record.is_some() {
            info!("Linked '{}' to Wikidata {}", name, id);
        }
        record
    }

    async fn item_id(&self, article: &ArticleResolution) -> Option<String> {
        if let Some(id) = article.attributes.get("wikidata_id").and_then(Value::as_str) {
            return Some(id.to_string());
        }
        let url = article.url.as_deref()?;
        let parsed = self.kb.parse_article_url(url)?;
        let query = [
            ("action", "query"),
            ("prop", "pageprops"),
            ("ppprop", "wikibase_item"),
            ("titles", parsed.title.as_str()),
            ("format", "json"),
        ];
        match self.kb.get_json(&self.kb.api_url(&parsed.lang), &query).await {
            Ok(response) => first_page(&response)
                .and_then(|page| page.get("pageprops"))
                .and_then(|props| props.get("wikibase_item"))
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(e) => {
                warn!("Pageprops lookup failed for {}: {}", url, e);
                None
            }
        }
    }

    pub async fn search_entity(&self, name: &str, lang: &str) -> Option<String> {
        let query = [
            ("action", "wbsearchentities"),
            ("search", name),
            ("language", lang),
            ("limit", "1"),
            ("format", "json"),
        ];
        match self.kb.get_json(&self.kb.endpoints().wikidata_api, &query).await {
            Ok(response) => response
                .get("search")
                .and_then(|s| s.get(0))
                .and_then(|hit| hit.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(e) => {
                warn!("Wikidata search failed for '{}': {}", name, e);
                None
            }
        }
    }

    async fn entity_record(&self, id: &str, lang: &str) -> Option<SourceRecord> {
        let url = self.kb.endpoints().wikidata_entity_data.replace("{id}", id);
        let response = match self.kb.get_json(&url, &[]).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Wikidata entity fetch failed for {}: {}", id, e);
                return None;
            }
        };
        let entity = response.get("entities")?.get(id)?.as_object()?;

        let mut record = SourceRecord {
            id: Some(id.to_string()),
            url: Some(format!("https://www.wikidata.org/wiki/{}", id)),
            title: localized(entity.get("labels"), lang),
            summary: localized(entity.get("descriptions"), lang),
            ..Default::default()
        };

        let aliases: Vec<Value> = entity
            .get("aliases")
            .and_then(|a| a.get(lang).or_else(|| a.get("en")))
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(|a| a.get("value").cloned()).collect())
            .unwrap_or_default();
        if !aliases.is_empty() {
            record.attributes.insert("aliases".to_string(), Value::Array(aliases));
        }

        let claims = entity.get("claims").and_then(Value::as_object);
        if let Some(claims) = claims {
            record.attributes.extend(claim_attributes(claims));

            let referenced: BTreeMap<&str, Vec<String>> = LABELLED_CLAIMS
                .iter()
                .map(|(prop, key)| (*key, item_ids(claims, prop)))
                .filter(|(_, ids)| !ids.is_empty())
                .collect();
            let all_ids: Vec<String> = referenced.values().flatten().cloned().collect();
            let labels = self.labels(&all_ids, lang).await;

            for (key, ids) in referenced {
                let named: Vec<String> = ids
                    .iter()
                    .map(|id| labels.get(id).cloned().unwrap_or_else(|| id.clone()))
                    .collect();
                if key == "types" {
                    record.categories = named;
                } else {
                    record.attributes.insert(key.to_string(), json!(named));
                }
            }
        }

        Some(record)
    }

    /// Labels for item ids, batched through `wbgetentities`.
    async fn labels(&self, ids: &[String], lang: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        for batch in ids.chunks(50) {
            let joined = batch.join("|");
            let languages = format!("{}|en", lang);
            let query = [
                ("action", "wbgetentities"),
                ("ids", joined.as_str()),
                ("props", "labels"),
                ("languages", languages.as_str()),
                ("format", "json"),
            ];
            match self.kb.get_json(&self.kb.endpoints().wikidata_api, &query).await {
                Ok(response) => {
                    if let Some(entities) = response.get("entities").and_then(Value::as_object) {
                        for (id, entity) in entities {
                            if let Some(label) = localized(entity.get("labels"), lang) {
                                labels.insert(id.clone(), label);
                            }
                        }
                    }
                }
                Err(e) => warn!("Label lookup failed for {}: {}", joined, e),
            }
        }
        debug!("Resolved {} of {} Wikidata labels", labels.len(), ids.len());
        labels
    }
}

fn localized(values: Option<&Value>, lang: &str) -> Option<String> {
    let values = values?;
    values
        .get(lang)
        .or_else(|| values.get("en"))
        .and_then(|v| v.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn claim_values<'a>(claims: &'a Map<String, Value>, prop: &str) -> impl Iterator<Item = &'a Value> {
    claims
        .get(prop)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|claim| claim.pointer("/mainsnak/datavalue/value"))
}

fn item_ids(claims: &Map<String, Value>, prop: &str) -> Vec<String> {
    claim_values(claims, prop)
        .filter_map(|v| v.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn claim_attributes(claims: &Map<String, Value>) -> BTreeMap<String, Value> {
    let mut attributes = BTreeMap::new();
    for (prop, key) in ATTRIBUTE_CLAIMS {
        let Some(value) = claim_values(claims, prop).next() else {
            continue;
        };
        let simplified = match (*prop, value) {
            ("P18", Value::String(file)) => json!(format!(
                "https://commons.wikimedia.org/wiki/Special:FilePath/{}",
                file.replace(' ', "_")
            )),
            ("P625", coords) => json!({
                "latitude": coords.get("latitude"),
                "longitude": coords.get("longitude"),
            }),
            (_, Value::Object(obj)) if obj.contains_key("time") => obj["time"].clone(),
            (_, Value::Object(obj)) if obj.contains_key("amount") => obj["amount"].clone(),
            (_, other) => other.clone(),
        };
        attributes.insert(key.to_string(), simplified);
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge_base::tests::settings_for;
    use mockito::{Matcher, Server};

    const ENTITY_JSON: &str = r#"{"entities":{"Q42":{
        "labels":{"en":{"value":"Douglas Adams"}},
        "descriptions":{"en":{"value":"English writer and humorist"}},
        "aliases":{"en":[{"value":"Douglas Noel Adams"}]},
        "claims":{
            "P31":[{"mainsnak":{"datavalue":{"value":{"id":"Q5"}}}}],
            "P106":[{"mainsnak":{"datavalue":{"value":{"id":"Q36180"}}}}],
            "P18":[{"mainsnak":{"datavalue":{"value":"Douglas adams portrait.jpg"}}}],
            "P569":[{"mainsnak":{"datavalue":{"value":{"time":"+1952-03-11T00:00:00Z"}}}}]
        }}}}"#;

    #[tokio::test]
    async fn test_lookup_uses_known_item_and_labels_types() {
        let mut server = Server::new_async().await;
        let data = server
            .mock("GET", "/wikidata/wiki/Special:EntityData/Q42.json")
            .with_status(200)
            .with_body(ENTITY_JSON)
            .expect(1)
            .create_async()
            .await;
        let labels = server
            .mock("GET", "/wikidata/w/api.php")
            .match_query(Matcher::UrlEncoded("action".into(), "wbgetentities".into()))
            .with_status(200)
            .with_body(r#"{"entities":{"Q5":{"labels":{"en":{"value":"human"}}},"Q36180":{"labels":{"en":{"value":"writer"}}}}}"#)
            .expect(1)
            .create_async()
            .await;
        let search = server
            .mock("GET", "/wikidata/w/api.php")
            .match_query(Matcher::UrlEncoded("action".into(), "wbsearchentities".into()))
            .expect(0)
            .create_async()
            .await;

        let kb = Arc::new(KbClient::new(&settings_for(&server.url())).unwrap());
        let mut article = ArticleResolution::default();
        article.attributes.insert("wikidata_id".to_string(), json!("Q42"));

        let record = WikidataClient::new(kb).lookup(&article, "Douglas Adams", "en").await.unwrap();

        assert_eq!(record.id.as_deref(), Some("Q42"));
        assert_eq!(record.title.as_deref(), Some("Douglas Adams"));
        assert_eq!(record.summary.as_deref(), Some("English writer and humorist"));
        assert_eq!(record.categories, vec!["human".to_string()]);
        assert_eq!(record.attributes["occupations"], json!(["writer"]));
        assert_eq!(record.attributes["birth_date"], json!("+1952-03-11T00:00:00Z"));
        assert_eq!(
            record.attributes["image"],
            json!("https://commons.wikimedia.org/wiki/Special:FilePath/Douglas_adams_portrait.jpg")
        );
        assert_eq!(record.attributes["aliases"], json!(["Douglas Noel Adams"]));
        data.assert_async().await;
        labels.assert_async().await;
        search.assert_async().await;
    }

    #[tokio::test]
    async fn test_pageprops_then_search_fallback() {
        let mut server = Server::new_async().await;
        let pageprops = server
            .mock("GET", "/en/w/api.php")
            .match_query(Matcher::UrlEncoded("prop".into(), "pageprops".into()))
            .with_status(200)
            .with_body(r#"{"query":{"pages":{"12":{"pageid":12}}}}"#)
            .expect(1)
            .create_async()
            .await;
        let search = server
            .mock("GET", "/wikidata/w/api.php")
            .match_query(Matcher::UrlEncoded("action".into(), "wbsearchentities".into()))
            .with_status(200)
            .with_body(r#"{"search":[{"id":"Q1"}]}"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/wikidata/wiki/Special:EntityData/Q1.json")
            .with_status(404)
            .create_async()
            .await;

        let kb = Arc::new(KbClient::new(&settings_for(&server.url())).unwrap());
        let article = ArticleResolution {
            url: Some(format!("{}/en/wiki/Universe", server.url())),
            ..Default::default()
        };

        let record = WikidataClient::new(kb).lookup(&article, "Universe", "en").await;
        assert!(record.is_none());
        pageprops.assert_async().await;
        search.assert_async().await;
    }
}

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Configuration, KnowledgeBaseSettings, Language};
use crate::core::model::{Entity, KnowledgeBase};
use crate::error::Result;
use crate::knowledge_base::dbpedia::DbpediaClient;
use crate::knowledge_base::wikidata::WikidataClient;
use crate::knowledge_base::{KbClient, WikipediaResolver};

/// Enriches entities with Wikipedia, Wikidata and DBpedia records.
pub struct EntityLinker {
    wikipedia: WikipediaResolver,
    wikidata: WikidataClient,
    dbpedia: DbpediaClient,
    settings: KnowledgeBaseSettings,
    language: Language,
    concurrency: usize,
}

impl EntityLinker {
    pub fn new(config: &Configuration) -> Result<Self> {
        let settings = config.knowledge_bases.clone();
        let kb = Arc::new(KbClient::new(&settings)?);
        Ok(Self {
            wikipedia: WikipediaResolver::new(kb.clone(), &settings),
            wikidata: WikidataClient::new(kb.clone()),
            dbpedia: DbpediaClient::new(kb, settings.dbpedia_language),
            settings,
            language: config.language,
            concurrency: config.concurrency.max(1),
        })
    }

    /// Links every entity, at most `concurrency` at a time, keeping order.
    pub async fn link_all(&self, entities: Vec<Entity>) -> Vec<Entity> {
        let total = entities.len();
        let linked: Vec<Entity> = stream::iter(entities)
            .map(|entity| self.link(entity))
            .buffered(self.concurrency)
            .collect()
            .await;
        let with_links = linked.iter().filter(|e| !e.links.is_empty()).count();
        info!("Linked {}/{} entities to a knowledge base", with_links, total);
        linked
    }

    pub async fn link(&self, mut entity: Entity) -> Entity {
        if !self.settings.use_wikipedia {
            return entity;
        }

        let article = self
            .wikipedia
            .resolve(&entity.name, entity.candidate_url.as_deref(), self.language)
            .await;
        if article.url.is_some() {
            entity.attach_link(KnowledgeBase::Wikipedia, article.to_record());
        }
        if !article.has_summary() {
            debug!("No summary for '{}', skipping structured lookups", entity.name);
            return entity;
        }

        if !self.settings.use_wikidata {
            return entity;
        }
        let lang = article.lang.clone().unwrap_or_else(|| self.language.code().to_string());
        let Some(record) = self.wikidata.lookup(&article, &entity.name, &lang).await else {
            return entity;
        };
        entity.attach_link(KnowledgeBase::Wikidata, record);

        if self.settings.use_dbpedia {
            if let Some(url) = article.url.as_deref() {
                if let Some(record) = self.dbpedia.lookup(url).await {
                    entity.attach_link(KnowledgeBase::Dbpedia, record);
                }
            }
        }
        entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Provenance;
    use crate::knowledge_base::tests::settings_for;
    use mockito::{Matcher, Server};

    fn config_for(server_url: &str) -> Configuration {
        let mut config = Configuration::example();
        config.language = Language::En;
        config.knowledge_bases = settings_for(server_url);
        config.knowledge_bases.use_dbpedia = true;
        config
            .knowledge_bases
            .endpoints
            .dbpedia_endpoints
            .insert(Language::En, vec![format!("{}/sparql", server_url)]);
        config
    }

    #[tokio::test]
    async fn test_no_summary_skips_structured_stores() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/en/w/api.php")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[\"x\",[],[],[]]")
            .create_async()
            .await;
        server
            .mock("GET", "/de/w/api.php")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[\"x\",[],[],[]]")
            .create_async()
            .await;
        let wikidata = server
            .mock("GET", Matcher::Regex("^/wikidata/.*".into()))
            .expect(0)
            .create_async()
            .await;
        let sparql = server.mock("GET", "/sparql").expect(0).create_async().await;

        let linker = EntityLinker::new(&config_for(&server.url())).unwrap();
        let entity = linker
            .link(Entity::new("Nothing Known", "Thing", Provenance::Explicit))
            .await;

        assert!(entity.links.is_empty());
        wikidata.assert_async().await;
        sparql.assert_async().await;
    }

    #[tokio::test]
    async fn test_full_chain_attaches_three_records() {
        let mut server = Server::new_async().await;
        let url = format!("{}/en/wiki/Douglas_Adams", server.url());
        server
            .mock("GET", "/en/w/api.php")
            .match_query(Matcher::UrlEncoded("prop".into(), "extracts".into()))
            .with_status(200)
            .with_body(r#"{"query":{"pages":{"1":{"extract":"Douglas Adams was an author."}}}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/en/w/api.php")
            .match_query(Matcher::UrlEncoded("prop".into(), "categories|pageprops".into()))
            .with_status(200)
            .with_body(r#"{"query":{"pages":{"1":{"pageid":1,"pageprops":{"wikibase_item":"Q42"}}}}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/wikidata/wiki/Special:EntityData/Q42.json")
            .with_status(200)
            .with_body(r#"{"entities":{"Q42":{"labels":{"en":{"value":"Douglas Adams"}},"claims":{}}}}"#)
            .create_async()
            .await;
        let sparql = server
            .mock("GET", "/sparql")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"results":{"bindings":[{"label":{"value":"Douglas Adams"}}]}}"#)
            .expect(1)
            .create_async()
            .await;

        let mut config = config_for(&server.url());
        config.knowledge_bases.additional_details = true;
        let linker = EntityLinker::new(&config).unwrap();
        let entities = linker
            .link_all(vec![
                Entity::new("Douglas Adams", "Person", Provenance::Explicit).with_candidate_url(url.clone()),
            ])
            .await;

        let links = &entities[0].links;
        assert_eq!(links[&KnowledgeBase::Wikipedia].url.as_deref(), Some(url.as_str()));
        assert_eq!(links[&KnowledgeBase::Wikidata].id.as_deref(), Some("Q42"));
        assert_eq!(
            links[&KnowledgeBase::Dbpedia].id.as_deref(),
            Some("http://dbpedia.org/resource/Douglas_Adams")
        );
        sparql.assert_async().await;
    }
}

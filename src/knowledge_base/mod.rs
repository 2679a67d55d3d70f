pub mod wikipedia;
pub mod wikidata;
pub mod dbpedia;
pub mod linker;

use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{KnowledgeBaseEndpoints, KnowledgeBaseSettings};
use crate::error::{ExtractorError, Result};

pub use linker::EntityLinker;
pub use wikipedia::{ArticleResolution, WikipediaResolver};

/// A syntactically valid article URL split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRef {
    pub url: String,
    pub lang: String,
    /// Decoded title with underscores, as used by the action API.
    pub title: String,
}

impl ArticleRef {
    pub fn display_title(&self) -> String {
        self.title.replace('_', " ")
    }
}

#[derive(Debug)]
pub struct FetchedPage {
    pub final_url: String,
    pub status: StatusCode,
    pub body: String,
}

/// Shared HTTP plumbing for every knowledge-base service.
pub struct KbClient {
    client: reqwest::Client,
    endpoints: KnowledgeBaseEndpoints,
    article_pattern: Regex,
}

/// Decodes a percent-encoded title. A literal '+' stays a plus.
pub fn decode_title(raw: &str) -> String {
    let escaped = raw.replace('+', "%2B").replace('&', "%26").replace('=', "%3D");
    url::form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(title, _)| title.into_owned())
        .unwrap_or_else(|| raw.to_string())
}

pub fn encode_title(title: &str) -> String {
    url::form_urlencoded::byte_serialize(title.trim().replace(' ', "_").as_bytes()).collect()
}

fn article_pattern(template: &str) -> Result<Regex> {
    let (prefix, suffix) = template
        .split_once("{lang}")
        .ok_or_else(|| ExtractorError::InvalidResponse(format!("Article template without {{lang}}: {}", template)))?;

    let prefix = match prefix.strip_prefix("https://").or_else(|| prefix.strip_prefix("http://")) {
        Some(rest) => format!("https?://{}", regex::escape(rest)),
        None => regex::escape(prefix),
    };
    let pattern = format!(r"^{}([a-z]{{2}}){}([\w\-%][^#?]*)", prefix, regex::escape(suffix));
    Regex::new(&pattern).map_err(|e| ExtractorError::InvalidResponse(e.to_string()))
}

impl KbClient {
    pub fn new(settings: &KnowledgeBaseSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout))
            .user_agent(settings.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            article_pattern: article_pattern(&settings.endpoints.wikipedia_article)?,
            endpoints: settings.endpoints.clone(),
        })
    }

    pub fn endpoints(&self) -> &KnowledgeBaseEndpoints {
        &self.endpoints
    }

    pub fn api_url(&self, lang: &str) -> String {
        self.endpoints.wikipedia_api.replace("{lang}", lang)
    }

    pub fn article_url(&self, lang: &str, title: &str) -> String {
        format!(
            "{}{}",
            self.endpoints.wikipedia_article.replace("{lang}", lang),
            encode_title(title)
        )
    }

    /// `None` when `url` is not an article URL of the configured wiki.
    pub fn parse_article_url(&self, url: &str) -> Option<ArticleRef> {
        let caps = self.article_pattern.captures(url.trim())?;
        let lang = caps.get(1)?.as_str().to_string();
        let title = decode_title(caps.get(2)?.as_str()).replace(' ', "_");
        if title.is_empty() {
            return None;
        }
        Some(ArticleRef {
            url: url.trim().to_string(),
            lang,
            title,
        })
    }

    pub async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value> {
        debug!("GET {} {:?}", url, query);
        let response = self.client.get(url).query(query).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractorError::Status { status, body });
        }
        Ok(response.json().await?)
    }

    /// Fetches a page following HTTP redirects.
    pub async fn get_page(&self, url: &str) -> Result<FetchedPage> {
        debug!("GET page {}", url);
        let response = self.client.get(url).send().await?;
        let final_url = response.url().to_string();
        let status = response.status();
        let body = response.text().await?;
        Ok(FetchedPage {
            final_url,
            status,
            body,
        })
    }

    /// Title of the `to_lang` counterpart of `article`, from its langlinks.
    pub async fn translate_title(&self, article: &ArticleRef, to_lang: &str) -> Option<String> {
        let query = [
            ("action", "query"),
            ("prop", "langlinks"),
            ("lllang", to_lang),
            ("titles", article.title.as_str()),
            ("format", "json"),
        ];
        match self.get_json(&self.api_url(&article.lang), &query).await {
            Ok(response) => first_page(&response)
                .and_then(|page| page.get("langlinks"))
                .and_then(|links| links.get(0))
                .and_then(|link| link.get("*").or_else(|| link.get("title")))
                .and_then(Value::as_str)
                .map(decode_title),
            Err(e) => {
                warn!("Langlinks lookup failed for {}: {}", article.url, e);
                None
            }
        }
    }

    /// The same article on the `to_lang` wiki; `None` without a langlink.
    pub async fn to_language(&self, article: &ArticleRef, to_lang: &str) -> Option<ArticleRef> {
        if article.lang == to_lang {
            return Some(article.clone());
        }
        let title = self.translate_title(article, to_lang).await?.replace(' ', "_");
        let converted = ArticleRef {
            url: self.article_url(to_lang, &title),
            lang: to_lang.to_string(),
            title,
        };
        info!("Converted {} to {}", article.url, converted.url);
        Some(converted)
    }

    /// Like [`get_json`](Self::get_json) but for SPARQL endpoints, which
    /// select the result format through the query string.
    pub async fn sparql(&self, endpoint: &str, query: &str) -> Result<Value> {
        self.get_json(
            endpoint,
            &[("query", query), ("format", "application/sparql-results+json")],
        )
        .await
    }
}

/// The single page object of a `action=query` response with one title.
pub fn first_page(response: &Value) -> Option<&Value> {
    let pages = response.get("query")?.get("pages")?;
    match pages {
        Value::Object(map) => map.iter().find(|(id, _)| id.as_str() != "-1").map(|(_, page)| page),
        Value::Array(list) => list.iter().find(|p| p.get("missing").is_none()),
        _ => None,
    }
}

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{KnowledgeBaseSettings, Language};
use crate::core::extractor::strip_ellipsis;
use crate::core::model::SourceRecord;
use crate::knowledge_base::{first_page, ArticleRef, FetchedPage, KbClient};

/// Everything the ladder managed to recover for one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleResolution {
    pub url: Option<String>,
    pub lang: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub categories: Vec<String>,
    pub attributes: BTreeMap<String, Value>,
}

impl ArticleResolution {
    pub fn has_summary(&self) -> bool {
        self.summary.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn to_record(&self) -> SourceRecord {
        SourceRecord {
            id: self
                .attributes
                .get("page_id")
                .map(|v| v.to_string().trim_matches('"').to_string()),
            url: self.url.clone(),
            title: self.title.clone(),
            summary: self.summary.clone(),
            categories: self.categories.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

/// Resolves an entity name (and an optional model-proposed URL) to a
/// Wikipedia article through an ordered fallback ladder.
pub struct WikipediaResolver {
    kb: Arc<KbClient>,
    additional_details: bool,
    convert_candidates: bool,
}

struct PageInfo {
    canonical: Option<String>,
    title: Option<String>,
}

impl WikipediaResolver {
    pub fn new(kb: Arc<KbClient>, settings: &KnowledgeBaseSettings) -> Self {
        Self {
            kb,
            additional_details: settings.additional_details,
            convert_candidates: settings.convert_candidates,
        }
    }

    pub async fn resolve(&self, name: &str, candidate_url: Option<&str>, language: Language) -> ArticleResolution {
        let mut result = ArticleResolution::default();
        let mut searched = false;

        let mut working = match candidate_url {
            Some(url) => match self.kb.parse_article_url(url) {
                Some(parsed) => self.in_language(name, parsed, language).await,
                None => {
                    warn!("Invalid Wikipedia URL for '{}': {}", name, url);
                    None
                }
            },
            None => None,
        };

        if working.is_none() {
            working = self.search(name, language).await;
            searched = true;
        }

        let Some(mut article) = working else {
            warn!("No Wikipedia article found for '{}'", name);
            return result;
        };

        let mut summary = self.fetch_summary(&article).await;
        let mut page_title = None;
        let mut page: Option<(String, String)> = None;

        if summary.is_none() {
            match self.kb.get_page(&article.url).await {
                Ok(fetched) => {
                    let info = page_info(&fetched.body);
                    match self.redirect_target(&article, &fetched, &info) {
                        Some(target) => {
                            info!("Following redirect for '{}': {} -> {}", name, article.url, target.url);
                            article = target;
                            page_title = info.title;
                            summary = self.fetch_summary(&article).await;
                        }
                        None => debug!("No redirect for {}", article.url),
                    }
                    page = Some((fetched.final_url, fetched.body));
                }
                Err(e) => warn!("Failed to fetch {}: {}", article.url, e),
            }
        }

        if summary.is_none() && !searched {
            if let Some(found) = self.search(name, language).await {
                if found.url != article.url {
                    info!("Search fallback for '{}' found {}", name, found.url);
                    article = found;
                    page_title = None;
                    summary = self.fetch_summary(&article).await;
                }
            }
        }

        if summary.is_none() {
            summary = self.scrape(&article, page).await;
        }

        result.title = Some(page_title.unwrap_or_else(|| article.display_title()));
        result.lang = Some(article.lang.clone());
        result.url = Some(article.url.clone());
        result.summary = summary;

        if result.has_summary() {
            self.fetch_details(&article, &mut result).await;
        } else {
            warn!("No summary found for '{}' ({})", name, article.url);
        }

        result
    }

    /// A candidate on another language's wiki is only usable through its
    /// langlink to `language`.
    async fn in_language(&self, name: &str, article: ArticleRef, language: Language) -> Option<ArticleRef> {
        if article.lang == language.code() {
            return Some(article);
        }
        if !self.convert_candidates {
            info!(
                "Candidate for '{}' is on {}.wikipedia, not {}; searching instead",
                name,
                article.lang,
                language.code()
            );
            return None;
        }
        let converted = self.kb.to_language(&article, language.code()).await;
        if converted.is_none() {
            info!("No {} counterpart for {}, searching instead", language.code(), article.url);
        }
        converted
    }

    /// Opensearch in the primary language, then the secondary one.
    pub async fn search(&self, name: &str, language: Language) -> Option<ArticleRef> {
        for lang in [language, language.secondary()] {
            let query = [
                ("action", "opensearch"),
                ("search", name),
                ("limit", "1"),
                ("namespace", "0"),
                ("format", "json"),
            ];
            match self.kb.get_json(&self.kb.api_url(lang.code()), &query).await {
                Ok(response) => {
                    let found = response
                        .get(3)
                        .and_then(|urls| urls.get(0))
                        .and_then(Value::as_str)
                        .and_then(|url| self.kb.parse_article_url(url));
                    if found.is_some() {
                        return found;
                    }
                    debug!("Opensearch ({}) found nothing for '{}'", lang, name);
                }
                Err(e) => warn!("Opensearch ({}) failed for '{}': {}", lang, name, e),
            }
        }
        None
    }

    pub async fn fetch_summary(&self, article: &ArticleRef) -> Option<String> {
        let query = [
            ("action", "query"),
            ("prop", "extracts"),
            ("exintro", "1"),
            ("explaintext", "1"),
            ("titles", article.title.as_str()),
            ("format", "json"),
        ];
        match self.kb.get_json(&self.kb.api_url(&article.lang), &query).await {
            Ok(response) => first_page(&response)
                .and_then(|page| page.get("extract"))
                .and_then(Value::as_str)
                .map(strip_ellipsis)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            Err(e) => {
                warn!("Summary fetch failed for {}: {}", article.url, e);
                None
            }
        }
    }

    fn redirect_target(&self, article: &ArticleRef, fetched: &FetchedPage, info: &PageInfo) -> Option<ArticleRef> {
        let candidates = [
            (fetched.final_url != article.url).then(|| fetched.final_url.clone()),
            info.canonical.clone().filter(|_| fetched.status.is_success()),
        ];
        candidates
            .into_iter()
            .flatten()
            .filter_map(|url| self.kb.parse_article_url(&url))
            .find(|target| target.title != article.title || target.lang != article.lang)
    }

    async fn scrape(&self, article: &ArticleRef, page: Option<(String, String)>) -> Option<String> {
        let html = match page {
            Some((url, body)) if url == article.url => body,
            _ => match self.kb.get_page(&article.url).await {
                Ok(fetched) if fetched.status.is_success() => fetched.body,
                Ok(fetched) => {
                    warn!("Scrape fetch of {} returned {}", article.url, fetched.status);
                    return None;
                }
                Err(e) => {
                    warn!("Scrape fetch of {} failed: {}", article.url, e);
                    return None;
                }
            },
        };
        let text = scrape_paragraphs(&html);
        if text.is_some() {
            info!("Scraped summary for {}", article.url);
        }
        text
    }

    async fn fetch_details(&self, article: &ArticleRef, result: &mut ArticleResolution) {
        let prop = if self.additional_details {
            "categories|pageprops"
        } else {
            "categories"
        };
        let query = [
            ("action", "query"),
            ("prop", prop),
            ("clshow", "!hidden"),
            ("cllimit", "max"),
            ("titles", article.title.as_str()),
            ("format", "json"),
        ];
        let response = match self.kb.get_json(&self.kb.api_url(&article.lang), &query).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Category fetch failed for {}: {}", article.url, e);
                return;
            }
        };
        let Some(page) = first_page(&response) else {
            return;
        };

        if let Some(categories) = page.get("categories").and_then(Value::as_array) {
            result.categories = categories
                .iter()
                .filter_map(|c| c.get("title").and_then(Value::as_str))
                .map(|t| t.split_once(':').map(|(_, name)| name).unwrap_or(t).to_string())
                .collect();
        }
        if let Some(page_id) = page.get("pageid") {
            result.attributes.insert("page_id".to_string(), page_id.clone());
        }
        if let Some(props) = page.get("pageprops") {
            if let Some(item) = props.get("wikibase_item") {
                result.attributes.insert("wikidata_id".to_string(), item.clone());
            }
            if let Some(image) = props.get("page_image_free").or_else(|| props.get("page_image")) {
                result.attributes.insert("page_image".to_string(), image.clone());
            }
        }
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn page_info(html: &str) -> PageInfo {
    let document = Html::parse_document(html);
    let canonical = selector(r#"link[rel="canonical"]"#)
        .and_then(|s| document.select(&s).next().and_then(|e| e.value().attr("href").map(str::to_string)));
    let title = selector("title").and_then(|s| {
        document.select(&s).next().map(|e| {
            let text = e.text().collect::<String>();
            text.trim().trim_end_matches(" - Wikipedia").trim().to_string()
        })
    });
    PageInfo {
        canonical,
        title: title.filter(|t| !t.is_empty()),
    }
}

fn in_infobox(element: &ElementRef) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().classes().any(|c| c.starts_with("infobox")))
}

fn paragraph_text(element: &ElementRef) -> Option<String> {
    let text = element.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn join_first_three(paragraphs: Vec<String>) -> Option<String> {
    let picked: Vec<String> = paragraphs.into_iter().take(3).collect();
    (!picked.is_empty()).then(|| picked.join("\n\n"))
}

/// Article body paragraphs, trying parser output, then the first section,
/// then any body paragraph.
pub fn scrape_paragraphs(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    if let Some(sel) = selector("#mw-content-text > .mw-parser-output p") {
        let paragraphs = document
            .select(&sel)
            .filter(|p| !in_infobox(p))
            .filter_map(|p| paragraph_text(&p))
            .collect();
        if let Some(text) = join_first_three(paragraphs) {
            return Some(text);
        }
    }

    if let Some(headline) = selector(".mw-headline") {
        if let Some(heading) = document
            .select(&headline)
            .next()
            .and_then(|h| h.parent())
            .and_then(ElementRef::wrap)
        {
            let mut paragraphs = Vec::new();
            for sibling in heading.next_siblings().filter_map(ElementRef::wrap) {
                let tag = sibling.value().name();
                if tag == "h2" || tag == "h3" {
                    break;
                }
                if tag == "p" {
                    if let Some(text) = paragraph_text(&sibling) {
                        paragraphs.push(text);
                    }
                }
            }
            if let Some(text) = join_first_three(paragraphs) {
                return Some(text);
            }
        }
    }

    let sel = selector("#bodyContent p")?;
    let paragraphs = document.select(&sel).filter_map(|p| paragraph_text(&p)).collect();
    join_first_three(paragraphs)
}

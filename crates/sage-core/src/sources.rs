//! External knowledge sources: Wikipedia summaries and arXiv abstracts.
//!
//! Each source turns a free-text query into at most one [`Snippet`]. The
//! response parsing is kept in plain functions so it can be tested against
//! recorded payloads.

use crate::config::{ArxivConfig, SourcesConfig, WikipediaConfig};
use crate::error::{Result, SageError};
use crate::types::Snippet;
use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

pub const WIKIPEDIA: &str = "Wikipedia";
pub const ARXIV: &str = "ArXiv Paper";

/// A place to look up text for a question.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Label used in logs and ingestion reports.
    fn name(&self) -> &str;

    /// Fetch the first result for `query`, or `None` when nothing matches.
    async fn fetch(&self, query: &str) -> Result<Option<Snippet>>;
}

/// HTTP client shared by the sources.
pub fn http_client(config: &SourcesConfig) -> Result<Client> {
    let mut builder = Client::builder().user_agent(config.user_agent.clone());
    if let Some(secs) = config.timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    Ok(builder.build()?)
}

/// Build the enabled sources in query order: Wikipedia, then arXiv.
pub fn default_sources(config: &SourcesConfig) -> Result<Vec<Box<dyn KnowledgeSource>>> {
    let client = http_client(config)?;
    let mut sources: Vec<Box<dyn KnowledgeSource>> = Vec::new();

    if config.wikipedia.enabled {
        sources.push(Box::new(WikipediaSource::new(
            client.clone(),
            config.wikipedia.clone(),
        )));
    }
    if config.arxiv.enabled {
        sources.push(Box::new(ArxivSource::new(client, config.arxiv.clone())));
    }

    info!("Configured {} knowledge sources", sources.len());
    Ok(sources)
}

// ============================================================================
// Wikipedia
// ============================================================================

/// Summary of the best-matching Wikipedia article.
///
/// The article title is the search engine's spelling suggestion when it
/// offers one, otherwise the top search hit. The summary is the first
/// `sentences` sentences of the article as plain text.
pub struct WikipediaSource {
    client: Client,
    config: WikipediaConfig,
}

#[derive(Debug, Deserialize)]
struct WikiResponse<Q> {
    query: Option<Q>,
    error: Option<WikiApiError>,
}

#[derive(Debug, Deserialize)]
struct WikiApiError {
    code: String,
    info: String,
}

#[derive(Debug, Deserialize)]
struct WikiSearchQuery {
    #[serde(default)]
    searchinfo: Option<WikiSearchInfo>,
    #[serde(default)]
    search: Vec<WikiSearchHit>,
}

#[derive(Debug, Deserialize)]
struct WikiSearchInfo {
    suggestion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WikiSearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct WikiPagesQuery {
    #[serde(default)]
    pages: Vec<WikiPage>,
}

#[derive(Debug, Deserialize)]
struct WikiPage {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    pageprops: Option<serde_json::Map<String, serde_json::Value>>,
}

fn unwrap_wiki<Q>(response: WikiResponse<Q>) -> Result<Option<Q>> {
    if let Some(error) = response.error {
        return Err(SageError::fetch(
            WIKIPEDIA,
            format!("{}: {}", error.code, error.info),
        ));
    }
    Ok(response.query)
}

/// Title to summarize for a search response, if any.
pub fn parse_search_title(body: &str) -> Result<Option<String>> {
    let response: WikiResponse<WikiSearchQuery> = serde_json::from_str(body)?;
    let Some(query) = unwrap_wiki(response)? else {
        return Ok(None);
    };

    let suggestion = query
        .searchinfo
        .and_then(|info| info.suggestion)
        .filter(|s| !s.trim().is_empty());

    Ok(suggestion.or_else(|| query.search.into_iter().next().map(|hit| hit.title)))
}

/// Plain-text summary from an extracts response.
pub fn parse_summary(body: &str) -> Result<String> {
    let response: WikiResponse<WikiPagesQuery> = serde_json::from_str(body)?;
    let page = unwrap_wiki(response)?
        .and_then(|query| query.pages.into_iter().next())
        .ok_or_else(|| SageError::fetch(WIKIPEDIA, "response contained no page"))?;

    if page.missing {
        return Err(SageError::fetch(
            WIKIPEDIA,
            format!("page '{}' does not exist", page.title),
        ));
    }

    if page
        .pageprops
        .as_ref()
        .is_some_and(|props| props.contains_key("disambiguation"))
    {
        return Err(SageError::fetch(
            WIKIPEDIA,
            format!("'{}' may refer to several pages", page.title),
        ));
    }

    let summary = page.extract.unwrap_or_default().trim().to_string();
    if summary.is_empty() {
        return Err(SageError::fetch(
            WIKIPEDIA,
            format!("page '{}' has no summary", page.title),
        ));
    }

    Ok(summary)
}

impl WikipediaSource {
    pub fn new(client: Client, config: WikipediaConfig) -> Self {
        Self { client, config }
    }

    async fn get(&self, params: &[(&str, &str)]) -> Result<String> {
        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&[("action", "query"), ("format", "json"), ("formatversion", "2")])
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl KnowledgeSource for WikipediaSource {
    fn name(&self) -> &str {
        WIKIPEDIA
    }

    async fn fetch(&self, query: &str) -> Result<Option<Snippet>> {
        info!("Searching Wikipedia for: {}", query);

        let body = self
            .get(&[
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", "1"),
                ("srinfo", "suggestion"),
                ("srprop", ""),
            ])
            .await?;

        let Some(title) = parse_search_title(&body)? else {
            debug!("Wikipedia search returned no pages");
            return Ok(None);
        };
        debug!("Summarizing Wikipedia page: {}", title);

        let sentences = self.config.sentences.to_string();
        let body = self
            .get(&[
                ("prop", "extracts|pageprops"),
                ("ppprop", "disambiguation"),
                ("explaintext", "1"),
                ("exsentences", sentences.as_str()),
                ("redirects", "1"),
                ("titles", title.as_str()),
            ])
            .await?;

        let summary = parse_summary(&body)?;
        Ok(Some(Snippet::new(WIKIPEDIA, summary)))
    }
}

// ============================================================================
// arXiv
// ============================================================================

/// One entry of an arXiv Atom feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArxivEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
}

impl ArxivEntry {
    /// Snippet text: the title on the first line, then the abstract.
    pub fn to_snippet_text(&self) -> String {
        format!("{}\n{}", self.title, self.summary)
    }
}

#[derive(Clone, Copy)]
enum EntryField {
    Id,
    Title,
    Summary,
}

/// Parse the entries of an arXiv API response.
///
/// Titles have their internal line breaks collapsed; abstracts are trimmed.
/// A feed reporting an API error becomes a fetch failure.
pub fn parse_feed(xml: &str) -> Result<Vec<ArxivEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<ArxivEntry> = None;
    let mut field: Option<EntryField> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match (e.local_name().as_ref(), current.is_some()) {
                (b"entry", _) => current = Some(ArxivEntry::default()),
                (b"id", true) => field = Some(EntryField::Id),
                (b"title", true) => field = Some(EntryField::Title),
                (b"summary", true) => field = Some(EntryField::Summary),
                _ => {}
            },
            Event::Text(text) => {
                if let (Some(entry), Some(field)) = (current.as_mut(), field) {
                    push_text(entry, field, &text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let (Some(entry), Some(field)) = (current.as_mut(), field) {
                    push_text(entry, field, &String::from_utf8_lossy(&data));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"entry" => {
                    if let Some(mut entry) = current.take() {
                        entry.title = entry.title.split_whitespace().collect::<Vec<_>>().join(" ");
                        entry.summary = entry.summary.trim().to_string();
                        entries.push(entry);
                    }
                    field = None;
                }
                b"id" | b"title" | b"summary" => field = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(error) = entries.iter().find(|e| e.id.contains("arxiv.org/api/errors")) {
        return Err(SageError::fetch(ARXIV, error.summary.clone()));
    }

    Ok(entries)
}

fn push_text(entry: &mut ArxivEntry, field: EntryField, text: &str) {
    let target = match field {
        EntryField::Id => &mut entry.id,
        EntryField::Title => &mut entry.title,
        EntryField::Summary => &mut entry.summary,
    };
    target.push_str(text);
}

/// Top arXiv search result for a query.
pub struct ArxivSource {
    client: Client,
    config: ArxivConfig,
}

impl ArxivSource {
    pub fn new(client: Client, config: ArxivConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl KnowledgeSource for ArxivSource {
    fn name(&self) -> &str {
        ARXIV
    }

    async fn fetch(&self, query: &str) -> Result<Option<Snippet>> {
        info!("Searching arXiv for: {}", query);

        let max_results = self.config.max_results.to_string();
        let body = self
            .client
            .get(&self.config.endpoint)
            .query(&[
                ("search_query", query),
                ("start", "0"),
                ("max_results", max_results.as_str()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let entries = parse_feed(&body)?;
        debug!("arXiv returned {} entries", entries.len());

        Ok(entries
            .into_iter()
            .next()
            .map(|entry| Snippet::new(ARXIV, entry.to_snippet_text())))
    }
}

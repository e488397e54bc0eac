//! Sitemap discovery
//!
//! Walks a sitemap-index tree breadth-first and flattens it into the
//! `<url>` entries it contains. Namespace URIs differ between sites, so
//! elements are matched against whatever namespace the root element
//! resolved to rather than a fixed one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::name::{LocalName, ResolveResult};
use quick_xml::reader::NsReader;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::models::SitemapEntry;
use crate::pacing::random_user_agent;
use crate::traits::SitemapFetcher;

/// Contents of one sitemap document
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedSitemap {
    /// Nested sitemap documents referenced by `<sitemap><loc>`
    pub nested: Vec<String>,
    pub entries: Vec<SitemapEntry>,
}

#[derive(Debug, Default)]
struct Pending {
    loc: String,
    lastmod: String,
}

/// Namespace an element name resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Namespace {
    None,
    Uri(Vec<u8>),
    Undeclared(Vec<u8>),
}

impl From<ResolveResult<'_>> for Namespace {
    fn from(resolved: ResolveResult<'_>) -> Self {
        match resolved {
            ResolveResult::Bound(ns) => Self::Uri(ns.0.to_vec()),
            ResolveResult::Unbound => Self::None,
            ResolveResult::Unknown(prefix) => Self::Undeclared(prefix),
        }
    }
}

/// Parses a sitemap or sitemap-index document.
///
/// Malformed XML is logged and whatever was read before the error is
/// returned.
pub fn parse_sitemap(xml: &[u8]) -> ParsedSitemap {
    let mut reader = NsReader::from_reader(xml);
    reader.trim_text(true);

    let mut parsed = ParsedSitemap::default();
    let mut buf = Vec::new();
    let mut root_ns: Option<Namespace> = None;
    // Local names of open elements; `None` for elements outside the root namespace
    let mut stack: Vec<Option<String>> = Vec::new();
    let mut pending = Pending::default();
    let mut malformed = None;

    let local = |ns: Namespace, name: LocalName<'_>, root: &Option<Namespace>| -> Option<String> {
        (root.as_ref() == Some(&ns)).then(|| String::from_utf8_lossy(name.as_ref()).into_owned())
    };

    loop {
        match reader.read_resolved_event_into(&mut buf) {
            Ok((ns, Event::Start(e))) => {
                let ns = Namespace::from(ns);
                if root_ns.is_none() {
                    root_ns = Some(ns.clone());
                }
                let name = local(ns, e.local_name(), &root_ns);
                if matches!(name.as_deref(), Some("url" | "sitemap")) {
                    pending = Pending::default();
                }
                stack.push(name);
            }
            Ok((ns, Event::End(e))) => {
                let name = local(Namespace::from(ns), e.local_name(), &root_ns);
                stack.pop();
                match name.as_deref() {
                    Some("url") => {
                        let item = std::mem::take(&mut pending);
                        if item.loc.starts_with("http") {
                            parsed.entries.push(SitemapEntry {
                                url: item.loc,
                                last_modified: Some(item.lastmod).filter(|m| !m.is_empty()),
                            });
                        } else if !item.loc.is_empty() {
                            debug!("Skipping non-http sitemap URL {}", item.loc);
                        }
                    }
                    Some("sitemap") => {
                        let item = std::mem::take(&mut pending);
                        if item.loc.ends_with(".xml") {
                            parsed.nested.push(item.loc);
                        } else if !item.loc.is_empty() {
                            debug!("Skipping nested sitemap without .xml suffix: {}", item.loc);
                        }
                    }
                    _ => {}
                }
            }
            Ok((_, Event::Text(t))) => match t.unescape() {
                Ok(text) => append_text(&stack, &mut pending, &text),
                Err(e) => {
                    error!("Failed to decode sitemap text: {}", e);
                    break;
                }
            },
            Ok((_, Event::CData(c))) => {
                let raw = c.into_inner();
                append_text(&stack, &mut pending, &String::from_utf8_lossy(&raw));
            }
            Ok((_, Event::Eof)) => break,
            Err(e) => {
                malformed = Some(e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    if let Some(e) = malformed {
        error!(
            "Malformed sitemap XML at position {}: {}",
            reader.buffer_position(),
            e
        );
    }
    parsed
}

fn append_text(stack: &[Option<String>], pending: &mut Pending, text: &str) {
    let [.., Some(parent), Some(leaf)] = stack else {
        return;
    };
    match (parent.as_str(), leaf.as_str()) {
        ("url" | "sitemap", "loc") => pending.loc.push_str(text.trim()),
        ("url", "lastmod") => pending.lastmod.push_str(text.trim()),
        _ => {}
    }
}

/// Fetches sitemap documents over HTTP with browser-like headers
#[derive(Clone)]
pub struct HttpSitemapFetcher {
    client: Client,
    user_agents: Vec<String>,
}

impl HttpSitemapFetcher {
    pub fn new(cookie: &str, timeout: Duration, user_agents: Vec<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/xml,application/xml,application/xhtml+xml,text/html;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(
            COOKIE,
            HeaderValue::from_str(cookie).context("Invalid sitemap cookie header")?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout)
            .build()
            .context("Failed to build sitemap HTTP client")?;

        Ok(Self {
            client,
            user_agents,
        })
    }
}

#[async_trait]
impl SitemapFetcher for HttpSitemapFetcher {
    async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        let user_agent = random_user_agent(&self.user_agents).to_string();
        let response = match self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to fetch sitemap {}: {}", url, e);
                return None;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            error!("Sitemap {} returned status {}", url, status);
            return None;
        }

        match response.bytes().await {
            Ok(body) => Some(body.to_vec()),
            Err(e) => {
                error!("Failed to read sitemap body from {}: {}", url, e);
                None
            }
        }
    }
}

/// Resolves a sitemap tree into a flat list of URL entries
pub struct SitemapResolver<F> {
    fetcher: F,
    max_depth: usize,
    max_documents: usize,
}

impl<F: SitemapFetcher> SitemapResolver<F> {
    pub fn new(fetcher: F, max_depth: usize, max_documents: usize) -> Self {
        Self {
            fetcher,
            max_depth,
            max_documents,
        }
    }

    /// Every `<url>` entry reachable from `sitemap_url`.
    ///
    /// Unfetchable documents contribute nothing. Documents already visited
    /// are skipped, and descent stops at `max_depth` levels below the root
    /// or after `max_documents` fetches.
    pub async fn resolve(&self, sitemap_url: &str) -> Vec<SitemapEntry> {
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(sitemap_url.to_string(), 0)]);
        let mut visited: HashSet<String> = HashSet::new();
        let mut entries = Vec::new();
        let mut fetched = 0usize;

        while let Some((url, depth)) = queue.pop_front() {
            if !visited.insert(url.clone()) {
                debug!("Sitemap {} already visited", url);
                continue;
            }
            if fetched >= self.max_documents {
                warn!(
                    "Sitemap document limit ({}) reached, {} documents left unvisited",
                    self.max_documents,
                    queue.len() + 1
                );
                break;
            }
            fetched += 1;

            let Some(body) = self.fetcher.fetch(&url).await else {
                continue;
            };
            let parsed = parse_sitemap(&body);
            info!(
                "Sitemap {}: {} URLs, {} nested sitemaps",
                url,
                parsed.entries.len(),
                parsed.nested.len()
            );
            entries.extend(parsed.entries);

            if parsed.nested.is_empty() {
                continue;
            }
            if depth >= self.max_depth {
                warn!(
                    "Sitemap depth limit ({}) reached at {}, skipping {} nested sitemaps",
                    self.max_depth,
                    url,
                    parsed.nested.len()
                );
                continue;
            }
            queue.extend(
                parsed
                    .nested
                    .into_iter()
                    .filter(|nested| !visited.contains(nested))
                    .map(|nested| (nested, depth + 1)),
            );
        }

        info!(
            "Resolved {} URL entries from {} sitemap documents",
            entries.len(),
            fetched
        );
        entries
    }
}

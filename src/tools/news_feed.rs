//! BBC news tool.
//!
//! Fetches category headlines from the public BBC RSS feeds and full
//! article text from article pages. Results are returned as strings the
//! chat model can quote directly; failures come back as formatted error
//! strings rather than hard failures.

use std::sync::OnceLock;
use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::error::PluginError;
use crate::core::plugin::{EventSink, merge_valves};

/// BBC feed taxonomy, including the per-region world feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewsCategory {
    TopStories,
    World,
    Uk,
    Business,
    Politics,
    Health,
    Education,
    ScienceAndEnvironment,
    Technology,
    EntertainmentAndArts,
    England,
    NorthernIreland,
    Scotland,
    Wales,
    WorldAfrica,
    WorldAsia,
    WorldAustralia,
    WorldEurope,
    WorldLatinAmerica,
    WorldMiddleEast,
    WorldUsAndCanada,
}

impl NewsCategory {
    pub const ALL: &[NewsCategory] = &[
        NewsCategory::TopStories,
        NewsCategory::World,
        NewsCategory::Uk,
        NewsCategory::Business,
        NewsCategory::Politics,
        NewsCategory::Health,
        NewsCategory::Education,
        NewsCategory::ScienceAndEnvironment,
        NewsCategory::Technology,
        NewsCategory::EntertainmentAndArts,
        NewsCategory::England,
        NewsCategory::NorthernIreland,
        NewsCategory::Scotland,
        NewsCategory::Wales,
        NewsCategory::WorldAfrica,
        NewsCategory::WorldAsia,
        NewsCategory::WorldAustralia,
        NewsCategory::WorldEurope,
        NewsCategory::WorldLatinAmerica,
        NewsCategory::WorldMiddleEast,
        NewsCategory::WorldUsAndCanada,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            NewsCategory::TopStories => "top_stories",
            NewsCategory::World => "world",
            NewsCategory::Uk => "uk",
            NewsCategory::Business => "business",
            NewsCategory::Politics => "politics",
            NewsCategory::Health => "health",
            NewsCategory::Education => "education",
            NewsCategory::ScienceAndEnvironment => "science_and_environment",
            NewsCategory::Technology => "technology",
            NewsCategory::EntertainmentAndArts => "entertainment_and_arts",
            NewsCategory::England => "england",
            NewsCategory::NorthernIreland => "northern_ireland",
            NewsCategory::Scotland => "scotland",
            NewsCategory::Wales => "wales",
            NewsCategory::WorldAfrica => "world/africa",
            NewsCategory::WorldAsia => "world/asia",
            NewsCategory::WorldAustralia => "world/australia",
            NewsCategory::WorldEurope => "world/europe",
            NewsCategory::WorldLatinAmerica => "world/latin_america",
            NewsCategory::WorldMiddleEast => "world/middle_east",
            NewsCategory::WorldUsAndCanada => "world/us_and_canada",
        }
    }

    pub fn feed_url(&self) -> String {
        match self {
            NewsCategory::TopStories => "https://feeds.bbci.co.uk/news/rss.xml".to_string(),
            other => format!("https://feeds.bbci.co.uk/news/{}/rss.xml", other.slug()),
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        let normalized = slug.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.slug() == normalized || c.slug().replace('/', "_") == normalized)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NewsFeedValves {
    pub max_items: usize,
    pub request_timeout: u64,
}

impl Default for NewsFeedValves {
    fn default() -> Self {
        Self {
            max_items: 10,
            request_timeout: 30,
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct NewsItem {
    title: String,
    description: String,
    link: String,
    published: String,
}

/// Pulls `<item>` children out of an RSS document. Entities are resolved
/// and CDATA sections unwrapped by the reader.
fn parse_rss_items(xml: &str, limit: usize) -> Result<Vec<NewsItem>, PluginError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<NewsItem> = None;
    let mut field: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => match start.name().as_ref() {
                b"item" => current = Some(NewsItem::default()),
                b"title" => field = Some("title"),
                b"description" => field = Some("description"),
                b"link" => field = Some("link"),
                b"pubDate" => field = Some("published"),
                _ => field = None,
            },
            Ok(Event::Text(text)) => {
                if let (Some(item), Some(field)) = (current.as_mut(), field) {
                    let value = text
                        .unescape()
                        .map_err(|e| PluginError::Unexpected(format!("bad rss text: {e}")))?;
                    let slot = match field {
                        "title" => &mut item.title,
                        "description" => &mut item.description,
                        "link" => &mut item.link,
                        _ => &mut item.published,
                    };
                    slot.push_str(&value);
                }
            }
            Ok(Event::CData(cdata)) => {
                if let (Some(item), Some(field)) = (current.as_mut(), field) {
                    let value = String::from_utf8_lossy(&cdata).into_owned();
                    let slot = match field {
                        "title" => &mut item.title,
                        "description" => &mut item.description,
                        "link" => &mut item.link,
                        _ => &mut item.published,
                    };
                    slot.push_str(&value);
                }
            }
            Ok(Event::End(end)) => match end.name().as_ref() {
                b"item" => {
                    if let Some(item) = current.take() {
                        items.push(item);
                        if items.len() >= limit {
                            break;
                        }
                    }
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(PluginError::Unexpected(format!("invalid rss feed: {e}")));
            }
        }
    }

    Ok(items)
}

fn article_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^https?://(www\.)?bbc\.(com|co\.uk)/news/(articles|videos)/[\w-]+$")
            .unwrap()
    })
}

/// Paragraph text of the page's `<article>` element.
fn extract_article_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let paragraphs = match Selector::parse("article p") {
        Ok(selector) => selector,
        Err(_) => return String::new(),
    };
    document
        .select(&paragraphs)
        .map(|p| p.text().collect::<String>())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct NewsFeedTool {
    valves: RwLock<NewsFeedValves>,
    client: Client,
}

impl NewsFeedTool {
    pub fn new(valves: NewsFeedValves) -> Result<Self, PluginError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(valves.request_timeout))
            .user_agent(concat!("chat-pipelines/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(PluginError::from_transport)?;
        Ok(Self {
            valves: RwLock::new(valves),
            client,
        })
    }

    pub fn id(&self) -> &str {
        "news_feed"
    }

    async fn fetch(&self, url: &str) -> Result<String, PluginError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(PluginError::from_transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(PluginError::from_status(status.as_u16(), url.to_string()));
        }
        response.text().await.map_err(PluginError::from_transport)
    }

    /// Current headlines for a category as a JSON array string.
    pub async fn headlines(&self, category: &str, sink: &EventSink) -> String {
        let Some(category) = NewsCategory::from_slug(category) else {
            let known: Vec<&str> = NewsCategory::ALL.iter().map(|c| c.slug()).collect();
            return format!(
                "Error: unknown news category '{}'. Known categories: {}",
                category,
                known.join(", ")
            );
        };

        sink.status(format!("Fetching {} headlines", category.slug()), false);
        let max_items = self.valves.read().await.max_items;
        let result = async {
            let xml = self.fetch(&category.feed_url()).await?;
            parse_rss_items(&xml, max_items)
        }
        .await;

        sink.status("Done", true);
        match result {
            Ok(items) => {
                debug!(category = category.slug(), count = items.len(), "headlines fetched");
                serde_json::to_string_pretty(&items)
                    .unwrap_or_else(|e| format!("Error: {}", e))
            }
            Err(err) => {
                warn!("headline fetch failed: {}", err);
                err.user_message()
            }
        }
    }

    /// Full text of one BBC article page.
    pub async fn article(&self, url: &str, sink: &EventSink) -> String {
        if !article_url_pattern().is_match(url.trim()) {
            return format!("Error: '{}' is not a BBC news article URL", url);
        }

        sink.status("Fetching the article", false);
        let result = self.fetch(url.trim()).await;
        sink.status("Done", true);

        match result {
            Ok(html) => {
                let text = extract_article_text(&html);
                if text.is_empty() {
                    "Error: could not extract any article text".to_string()
                } else {
                    text
                }
            }
            Err(err) => {
                warn!("article fetch failed: {}", err);
                err.user_message()
            }
        }
    }

    pub async fn on_valves_updated(&self, patch: Value) -> Result<(), PluginError> {
        let mut current = {
            let valves = self.valves.read().await;
            serde_json::to_value(&*valves)
                .map_err(|e| PluginError::Unexpected(e.to_string()))?
        };
        merge_valves(&mut current, &patch);
        let next: NewsFeedValves = serde_json::from_value(current)
            .map_err(|e| PluginError::BadRequest(format!("invalid valves: {e}")))?;
        *self.valves.write().await = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>BBC News</title>
    <item>
      <title><![CDATA[First headline]]></title>
      <description><![CDATA[First summary]]></description>
      <link>https://www.bbc.com/news/articles/abc123</link>
      <pubDate>Fri, 29 Aug 2025 09:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second headline</title>
      <description>Second summary</description>
      <link>https://www.bbc.com/news/articles/def456</link>
      <pubDate>Fri, 29 Aug 2025 08:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss_items() {
        let items = parse_rss_items(FEED, 10).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "First headline");
        assert_eq!(items[0].description, "First summary");
        assert_eq!(items[0].link, "https://www.bbc.com/news/articles/abc123");
        assert_eq!(items[1].published, "Fri, 29 Aug 2025 08:00:00 GMT");
    }

    #[test]
    fn item_limit_is_respected() {
        let items = parse_rss_items(FEED, 1).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn category_slugs_round_trip() {
        for category in NewsCategory::ALL {
            assert_eq!(NewsCategory::from_slug(category.slug()), Some(*category));
        }
        assert_eq!(
            NewsCategory::from_slug("world_europe"),
            Some(NewsCategory::WorldEurope)
        );
        assert_eq!(
            NewsCategory::from_slug("northern_ireland"),
            Some(NewsCategory::NorthernIreland)
        );
        assert_eq!(NewsCategory::from_slug("sports"), None);
    }

    #[test]
    fn uk_nation_feeds_are_reachable() {
        for category in [
            NewsCategory::England,
            NewsCategory::NorthernIreland,
            NewsCategory::Scotland,
            NewsCategory::Wales,
        ] {
            assert!(NewsCategory::ALL.contains(&category));
        }
        assert_eq!(
            NewsCategory::Wales.feed_url(),
            "https://feeds.bbci.co.uk/news/wales/rss.xml"
        );
    }

    #[test]
    fn feed_urls_follow_bbc_layout() {
        assert_eq!(
            NewsCategory::TopStories.feed_url(),
            "https://feeds.bbci.co.uk/news/rss.xml"
        );
        assert_eq!(
            NewsCategory::WorldEurope.feed_url(),
            "https://feeds.bbci.co.uk/news/world/europe/rss.xml"
        );
    }

    #[test]
    fn article_urls_are_validated() {
        assert!(article_url_pattern().is_match("https://www.bbc.com/news/articles/c1234abcd"));
        assert!(article_url_pattern().is_match("https://bbc.co.uk/news/videos/xyz-1"));
        assert!(!article_url_pattern().is_match("https://example.com/news/articles/abc"));
        assert!(!article_url_pattern().is_match("https://www.bbc.com/sport/foo"));
    }

    #[test]
    fn article_text_comes_from_paragraphs() {
        let html = r#"<html><body>
            <nav><p>menu noise</p></nav>
            <article><h1>Title</h1><p>First para.</p><p> Second para. </p></article>
        </body></html>"#;
        assert_eq!(extract_article_text(html), "First para.\n\nSecond para.");
    }
}

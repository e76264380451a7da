use crate::{Handler, HandlerError, Seed};
use lazy_regex::regex;
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use tracing::info;
use url::Url;

const E: &str = "Invalid selector";
lazy_static! {
    static ref TITLE: Selector = Selector::parse("head > title").expect(E);
    static ref OG_TITLE: Selector = Selector::parse(r#"meta[property="og:title"]"#).expect(E);
}

/// Stays on a fixed set of hosts and logs each page title.
#[derive(Debug, Clone)]
pub struct ExampleHandler {
    pub seeds: Vec<Seed>,
    pub hosts: Vec<String>,
}

impl Default for ExampleHandler {
    fn default() -> Self {
        ExampleHandler {
            seeds: vec![Seed::new("https://www.rust-lang.org/", 1)],
            hosts: vec!["www.rust-lang.org".to_string()],
        }
    }
}

impl ExampleHandler {
    pub fn title(doc: &Html) -> Option<String> {
        doc.select(&TITLE)
            .next()
            .map(|el| el.text().collect::<String>())
            .or_else(|| {
                doc.select(&OG_TITLE)
                    .next()
                    .and_then(|el| el.value().attr("content"))
                    .map(ToString::to_string)
            })
            .map(|t| regex!(r"\s+").replace_all(t.trim(), " ").into_owned())
            .filter(|t| !t.is_empty())
    }
}

impl Handler for ExampleHandler {
    fn seeds(&self) -> Vec<Seed> {
        self.seeds.clone()
    }

    /// Same-host links only; fragment variants are dropped so `/a#x` and
    /// `/a` do not both end up in the frontier.
    fn filter(&self, _current_url: &str, candidate_url: &str) -> bool {
        let candidate = match Url::parse(candidate_url) {
            Ok(url) => url,
            Err(_) => return false,
        };
        if candidate.fragment().is_some() {
            return false;
        }
        candidate
            .host_str()
            .map_or(false, |host| self.hosts.iter().any(|h| h == host))
    }

    fn handle(&self, url: &str, depth: u32, doc: &Html) -> Result<(), HandlerError> {
        match Self::title(doc) {
            Some(title) => info!("[{}] {} : {}", depth, url, title),
            None => info!("[{}] {} : (no title)", depth, url),
        }
        Ok(())
    }
}

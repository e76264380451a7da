use scraper::Html;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;

pub mod config;
pub mod fetcher;
pub mod frontier;
pub mod handlers;
pub mod links;
pub mod seeds;

mod data;
mod error;
mod utils;

pub use config::Config;
pub use data::Table;
pub use error::{CrawlerError, FetchError, HandlerError, LinkResolutionError};
pub use frontier::{FrontierEntry, FrontierStore, UrlStatus};
pub use seeds::Seed;
pub use utils::url_hash;

/// Site specific part of a crawl.
pub trait Handler: Send + Sync {
    fn seeds(&self) -> Vec<Seed>;

    /// Whether `candidate_url`, found on `current_url`, enters the frontier.
    fn filter(&self, current_url: &str, candidate_url: &str) -> bool;

    fn handle(&self, url: &str, depth: u32, doc: &Html) -> Result<(), HandlerError>;
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Resets the frontier (or keeps it when resuming) and enqueues the seeds.
/// Seeds already present are ignored, so resuming never revives settled rows.
pub async fn prepare_frontier(
    store: &FrontierStore,
    seeds: &[Seed],
    resume: bool,
) -> Result<(), CrawlerError> {
    if resume {
        store.ensure_schema().await?;
    } else {
        store.reset().await?;
    }
    for seed in seeds {
        store.enqueue(&seed.url, seed.depth).await?;
    }
    info!("Seeded {} urls", seeds.len());
    Ok(())
}

/// One crawl worker. Cloning shares the store, handler and fetcher.
pub struct Crawler<H: ?Sized, F: ?Sized> {
    store: Arc<FrontierStore>,
    handler: Arc<H>,
    fetcher: Arc<F>,
    delay: Duration,
}

impl<H: ?Sized, F: ?Sized> Clone for Crawler<H, F> {
    fn clone(&self) -> Self {
        Crawler {
            store: Arc::clone(&self.store),
            handler: Arc::clone(&self.handler),
            fetcher: Arc::clone(&self.fetcher),
            delay: self.delay,
        }
    }
}

impl<H, F> Crawler<H, F>
where
    H: Handler + ?Sized,
    F: Fetcher + ?Sized,
{
    pub fn new(
        store: Arc<FrontierStore>,
        handler: Arc<H>,
        fetcher: Arc<F>,
        delay: Duration,
    ) -> Crawler<H, F> {
        Crawler {
            store,
            handler,
            fetcher,
            delay,
        }
    }

    /// Processes items until the frontier has nothing left to claim.
    /// Returns the number of items this worker finalized.
    pub async fn run(&self) -> Result<u64, CrawlerError> {
        let mut processed = 0;
        while self.crawl_next().await? {
            processed += 1;
        }
        debug!("Frontier exhausted after {} items", processed);
        Ok(processed)
    }

    /// Claims and fully processes one item. `Ok(false)` means nothing was
    /// left to claim. Only store failures are returned as errors.
    pub async fn crawl_next(&self) -> Result<bool, CrawlerError> {
        let (url, depth) = match self.store.claim_next().await? {
            Some(claimed) => claimed,
            None => return Ok(false),
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.process(&url, depth).await {
            Ok(()) => {
                self.store.mark_complete(&url).await?;
                debug!("Completed {}", url);
            }
            Err(CrawlerError::Fetch(e)) => {
                warn!("{}", e);
                self.store.mark_error(&url).await?;
            }
            Err(CrawlerError::Handler(e)) => {
                warn!("{}", e);
                self.store.mark_error(&url).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(true)
    }

    async fn process(&self, url: &str, depth: u32) -> Result<(), CrawlerError> {
        info!("Visit {} (depth {})", url, depth);
        let body = self.fetcher.fetch(url).await?;

        // `Html` is not Send, keep it out of any await.
        let (expanded, handled) = {
            let doc = Html::parse_document(&body);
            let expanded = if depth > 0 {
                Some((depth - 1, self.expand(url, &doc)))
            } else {
                None
            };
            (expanded, self.handler.handle(url, depth, &doc))
        };

        if let Some((child_depth, candidates)) = expanded {
            for candidate in &candidates {
                self.store.enqueue(candidate, child_depth).await?;
            }
            debug!("Enqueued {} links from {}", candidates.len(), url);
        }

        handled?;
        Ok(())
    }

    fn expand(&self, url: &str, doc: &Html) -> Vec<String> {
        let base = match Url::parse(url) {
            Ok(base) => base,
            Err(source) => {
                warn!(
                    "{}",
                    LinkResolutionError::Invalid {
                        base: url.to_string(),
                        href: url.to_string(),
                        source,
                    }
                );
                return vec![];
            }
        };

        links::extract_hrefs(doc)
            .into_iter()
            .filter_map(|href| match links::resolve(&base, href) {
                Ok(candidate) => Some(candidate.to_string()),
                Err(e @ LinkResolutionError::UnsupportedScheme { .. }) => {
                    debug!("Skip link: {}", e);
                    None
                }
                Err(e) => {
                    warn!("Skip link: {}", e);
                    None
                }
            })
            .filter(|candidate| self.handler.filter(url, candidate))
            .collect()
    }
}

/// Runs `workers` copies of `crawler` against the shared store and waits for
/// all of them. Returns the total number of finalized items.
pub async fn run_crawler<H, F>(crawler: Crawler<H, F>, workers: usize) -> Result<u64, CrawlerError>
where
    H: Handler + ?Sized + 'static,
    F: Fetcher + ?Sized + 'static,
{
    let handles = (0..workers.max(1))
        .map(|id| {
            let crawler = crawler.clone();
            tokio::spawn(async move { crawler.run().await }.instrument(info_span!("worker", id)))
        })
        .collect::<Vec<_>>();

    let mut total = 0;
    for result in futures::future::try_join_all(handles).await? {
        total += result?;
    }
    Ok(total)
}

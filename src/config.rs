use crate::{fetcher, CrawlerError};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Per-project settings read from a YAML file. Every key is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub dbfile: PathBuf,
    pub logfile: PathBuf,
    /// Politeness delay before each fetch, in seconds.
    pub sleep: f64,
    /// Fetch timeout in seconds.
    pub timeout: f64,
    pub user_agent: String,
    /// Concurrent crawl workers sharing the frontier. A worker exits on its
    /// first empty claim, so extra workers only help when several rows are
    /// already `NEW` (many seeds, or a resumed crawl). A single seed is
    /// crawled by one worker.
    pub workers: usize,
    pub seedfile: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dbfile: PathBuf::from("log/crawl.db"),
            logfile: PathBuf::from("log/crawl.log"),
            sleep: 1.0,
            timeout: fetcher::DEFAULT_TIMEOUT.as_secs_f64(),
            user_agent: fetcher::DEFAULT_USER_AGENT.to_string(),
            workers: 1,
            seedfile: None,
        }
    }
}

impl Config {
    pub fn default_path(project: &str) -> PathBuf {
        Path::new(project).join("config.yml")
    }

    /// Config for `project`. An explicit path must exist; only the implicit
    /// `<project>/config.yml` may be absent, in which case defaults apply.
    pub fn for_project(project: &str, explicit: Option<&Path>) -> Result<Config, CrawlerError> {
        match explicit {
            Some(path) => Config::load(path),
            None => Config::load_or_default(Config::default_path(project)),
        }
    }

    /// Reads `path`; a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Config, CrawlerError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Config::default());
        }
        Config::load(path)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, CrawlerError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CrawlerError::MissingConfig(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        Config::parse(&raw).map_err(|source| CrawlerError::Config {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Config, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn sleep_duration(&self) -> Duration {
        seconds(self.sleep)
    }

    pub fn timeout_duration(&self) -> Duration {
        seconds(self.timeout)
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

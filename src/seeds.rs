use crate::CrawlerError;
use std::path::Path;

/// A starting url and its hop budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    pub url: String,
    pub depth: u32,
}

impl Seed {
    pub fn new<S: Into<String>>(url: S, depth: u32) -> Seed {
        Seed {
            url: url.into(),
            depth,
        }
    }
}

pub fn load_seed_file<P: AsRef<Path>>(path: P) -> Result<Vec<Seed>, CrawlerError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    parse_seeds(&raw).map_err(|(line, reason)| CrawlerError::Seed {
        path: path.display().to_string(),
        line,
        reason,
    })
}

/// Parses `url<TAB>depth` lines. Blank lines and `#` comments are skipped.
/// Errors carry the 1-based line number.
pub fn parse_seeds(raw: &str) -> Result<Vec<Seed>, (usize, String)> {
    let mut seeds = vec![];
    for (i, line) in raw.lines().enumerate() {
        let line_no = i + 1;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let (url, depth) = line
            .split_once('\t')
            .ok_or_else(|| (line_no, "expected url<TAB>depth".to_string()))?;
        let url = url.trim();
        if url.is_empty() {
            return Err((line_no, "empty url".to_string()));
        }
        let depth = depth
            .trim()
            .parse::<u32>()
            .map_err(|e| (line_no, format!("invalid depth {:?}: {}", depth.trim(), e)))?;

        seeds.push(Seed::new(url, depth));
    }
    Ok(seeds)
}

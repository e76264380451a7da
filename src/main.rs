use clap::{Parser, Subcommand};
use resumable_crawler::{
    fetcher::HttpFetcher, handlers::HandlerRegistry, prepare_frontier, run_crawler,
    seeds::load_seed_file, Config, Crawler, CrawlerError, FrontierStore, UrlStatus,
};
use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::{info, info_span, warn, Instrument};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(version, about = "Resumable depth-limited crawler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Crawl a project, starting from a fresh frontier unless --continue is given
    Run {
        project: String,

        /// Resume from the persisted frontier instead of resetting it
        #[arg(short = 'c', long = "continue")]
        resume: bool,

        /// Config file, defaults to <project>/config.yml
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print every frontier row of a project
    List {
        project: String,

        #[arg(long)]
        json: bool,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_logging(logfile: Option<&Path>) -> Result<(), std::io::Error> {
    let file_layer = match logfile {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
                "info,html5ever=error,selectors=error,hyper=warn,reqwest=info,sqlx=warn".into()
            }),
        )
        .with(ErrorLayer::default())
        .init();
    Ok(())
}

fn load_config(project: &str, path: Option<PathBuf>) -> Result<Config, CrawlerError> {
    Config::for_project(project, path.as_deref())
}

async fn log_summary(store: &FrontierStore) -> Result<(), CrawlerError> {
    for status in UrlStatus::ALL {
        info!("{:<10} {}", status, store.count_by_status(status).await?);
    }
    let orphaned = store.count_by_status(UrlStatus::Processing).await?;
    if orphaned > 0 {
        warn!(
            "{} urls are stuck in PROCESSING from an interrupted run and will not be reclaimed",
            orphaned
        );
    }
    Ok(())
}

async fn run(
    project: String,
    resume: bool,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&project, config)?;
    init_logging(Some(config.logfile.as_path()))?;

    let handler = HandlerRegistry::with_builtin()
        .get(&project)
        .ok_or_else(|| CrawlerError::UnknownProject(project.clone()))?;
    let seeds = match &config.seedfile {
        Some(path) => load_seed_file(path)?,
        None => handler.seeds(),
    };

    let span = info_span!("crawl", project = %project);
    async {
        let store = Arc::new(FrontierStore::open(&config.dbfile).await?);
        prepare_frontier(&store, &seeds, resume).await?;

        let fetcher = Arc::new(HttpFetcher::new(
            &config.user_agent,
            config.timeout_duration(),
        )?);
        let crawler = Crawler::new(
            Arc::clone(&store),
            handler,
            fetcher,
            config.sleep_duration(),
        );

        let total = run_crawler(crawler, config.workers).await?;
        info!("Crawl finished, {} urls processed", total);
        log_summary(&store).await?;
        store.close().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    }
    .instrument(span)
    .await
}

async fn list(
    project: String,
    json: bool,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&project, config)?;
    init_logging(None)?;

    let store = match FrontierStore::open_existing(&config.dbfile).await? {
        Some(store) => store,
        None => {
            println!("No frontier for {} at {}", project, config.dbfile.display());
            return Ok(());
        }
    };
    let entries = store.list_all().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for e in &entries {
            println!(
                "{:<10} {:>3}  {}  {}",
                e.status,
                e.depth,
                e.updated_at.format("%Y-%m-%d %H:%M:%S"),
                e.url
            );
        }
        log_summary(&store).await?;
    }
    store.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        Command::Run {
            project,
            resume,
            config,
        } => run(project, resume, config).await,
        Command::List {
            project,
            json,
            config,
        } => list(project, json, config).await,
    }
}

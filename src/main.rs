mod cli;
mod error;
mod logging;

use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use stacks_cache::{Database, Repository};
use stacks_config::Config;
use stacks_extract::{ContentExtractor, CoverProcessor, FilenameExtractor, ImageCoverProcessor};
use stacks_library::{ChangeBus, Engine, EngineOptions, Reconciler, ScanOutcome};
use std::process::ExitCode;
use std::sync::Arc;

fn engine_options(config: &Config) -> EngineOptions {
    EngineOptions {
        extensions: config.scan.extensions.clone(),
        debounce: config.watch.debounce(),
        touch_debounce: config.watch.touch_debounce(),
        scan_interval: config.watch.scan_interval(),
        event_capacity: config.events.capacity,
    }
}

fn cover_processor(config: &Config) -> Option<Arc<dyn CoverProcessor>> {
    let covers = &config.covers;
    covers.enabled.then(|| {
        Arc::new(ImageCoverProcessor::new(
            covers.thumbnail_height,
            covers.jpeg_quality,
            covers.placeholder_components,
        )) as Arc<dyn CoverProcessor>
    })
}

fn extractor() -> Arc<dyn ContentExtractor> {
    Arc::new(FilenameExtractor)
}

async fn open_catalog(config: &Config) -> Result<Database> {
    let path = &config.database;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Database(path.clone()))?;
    }
    Database::connect(path).await.or_raise(|| ErrorKind::Database(path.clone()))
}

/// A reconciler for one-off commands: no watches, touches written directly.
fn reconciler(config: &Config, cache: Repository) -> Reconciler {
    let reconciler = Reconciler::new(cache, ChangeBus::new(config.events.capacity), extractor())
        .with_extensions(config.scan.extensions.iter().cloned());
    match cover_processor(config) {
        Some(covers) => reconciler.with_covers(covers),
        None => reconciler,
    }
}

async fn run(config: &Config, cache: Repository) -> Result<()> {
    let engine = Engine::start(cache, engine_options(config), extractor(), cover_processor(config));
    for seed in &config.libraries {
        match engine.add_library(&seed.path, seed.name.clone()).await {
            Ok(library) => tracing::info!(library = library.id, "registered library from configuration"),
            Err(err) if matches!(&*err, stacks_library::error::ErrorKind::AlreadyExists(_)) => {},
            Err(err) => tracing::warn!(path = %seed.path.display(), error = ?err, "could not register library"),
        }
    }
    engine.init().await.or_raise(|| ErrorKind::Library)?;
    let interrupted = tokio::signal::ctrl_c().await;
    engine.shutdown().await;
    interrupted.or_raise(|| ErrorKind::Signal)
}

async fn execute(cli: Cli, config: Config) -> Result<()> {
    let db = open_catalog(&config).await?;
    let cache = Repository::from(&db);
    let result = match cli.command {
        Command::Run => run(&config, cache).await,
        Command::Add { path, name } => {
            let engine = Engine::start(cache, engine_options(&config), extractor(), None);
            let added = engine.add_library(&path, name).await;
            engine.shutdown().await;
            let library = added.or_raise(|| ErrorKind::Library)?;
            println!("{}\t{}\t{}", library.id, library.name, library.path.display());
            Ok(())
        },
        Command::Remove { id } => {
            let removed = reconciler(&config, cache).remove_library(id).await.or_raise(|| ErrorKind::Library)?;
            if !removed {
                println!("no library with id {id}");
            }
            Ok(())
        },
        Command::List => {
            let libraries = cache.list_libraries().await.or_raise(|| ErrorKind::Library)?;
            for library in libraries {
                println!("{}\t{}\t{}", library.id, library.name, library.path.display());
            }
            Ok(())
        },
        Command::Scan { id } => {
            let ids = match id {
                Some(id) => vec![id],
                None => cache
                    .list_libraries()
                    .await
                    .or_raise(|| ErrorKind::Library)?
                    .into_iter()
                    .map(|library| library.id)
                    .collect(),
            };
            let reconciler = reconciler(&config, cache);
            for id in ids {
                match reconciler.scan_library(id).await.or_raise(|| ErrorKind::Library)? {
                    ScanOutcome::Completed(stats) => println!("{id}\t{stats}"),
                    ScanOutcome::AlreadyRunning => println!("{id}\tskipped"),
                }
            }
            Ok(())
        },
        Command::Purge => {
            let purged = cache.purge_deleted().await.or_raise(|| ErrorKind::Library)?;
            println!("purged {} series and {} books", purged.series, purged.books);
            Ok(())
        },
    };
    db.close().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:?}");
            return ExitCode::FAILURE;
        },
    };
    logging::init(&config.log.filter);
    match execute(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = ?err, "stacks failed");
            ExitCode::FAILURE
        },
    }
}

//! GGUF Manager - Command line entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gguf_manager::models::{DiskFile, ModelFile, build_catalog, verify_files};
use gguf_manager::store::keys;
use gguf_manager::{InferenceParams, KvStore, ManagerConfig, Model};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "gguf-manager")]
#[command(about = "GGUF model catalog manager", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that files form a GGUF model, shards in order
    Verify {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List built-in and user-added models
    Models,
    /// Show persisted inference parameters
    Params,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
    }

    let config = ManagerConfig::load(cli.config)?;
    config.validate()?;

    tracing::debug!(
        store_dir = ?config.store_dir,
        include_default_catalog = config.include_default_catalog,
        extra_models = config.builtin_models.len(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Verify { files } => verify(files).await,
        Command::Models => list_models(&config).await,
        Command::Params => show_params(&config).await,
    }
}

async fn verify(paths: Vec<PathBuf>) -> Result<()> {
    let mut files: Vec<Arc<dyn ModelFile>> = Vec::with_capacity(paths.len());
    for path in &paths {
        let file = DiskFile::open(path)
            .await
            .with_context(|| format!("Failed to open {:?}", path))?;
        files.push(Arc::new(file));
    }

    let verified = verify_files(&files).await?;

    println!("{}\t{}", verified.base_name, verified.total_size);
    Ok(())
}

async fn list_models(config: &ManagerConfig) -> Result<()> {
    let store = KvStore::new(&config.store_dir);
    let custom: Vec<Model> = store.load(keys::CUSTOM_MODELS, Vec::new()).await;
    let local: Vec<Model> = store.load(keys::LOCAL_MODELS, Vec::new()).await;

    let catalog = build_catalog(&config.builtin_catalog(), &custom, &local, &[]);

    for entry in &catalog {
        let source = if entry.model.user_added_local {
            "local"
        } else if entry.model.user_added {
            "custom"
        } else {
            "builtin"
        };
        println!(
            "{}\t{}\t{}\t{}",
            entry.name,
            entry.model.size,
            source,
            entry.url()
        );
    }

    tracing::info!(models = catalog.len(), "Listed models");
    Ok(())
}

async fn show_params(config: &ManagerConfig) -> Result<()> {
    let store = KvStore::new(&config.store_dir);
    let params = store.load(keys::PARAMS, InferenceParams::default()).await;

    let rendered = serde_json::to_string_pretty(&params).context("Failed to render parameters")?;
    println!("{}", rendered);
    Ok(())
}

//! Stowage CLI: administer the configured media handler.
//!
//! Reads STOWAGE_MEDIA_HANDLER, STOWAGE_MEDIA_CONFIG and STOWAGE_LOCAL_ROOT. The
//! `gc` command also needs DATABASE_URL.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use stowage_cli::{build_registry, init_tracing, FileSummary};
use stowage_core::{Config, FileRecord, HandlerConfig, Uid};
use stowage_db::{setup_database, PgFileRepository};
use stowage_storage::{build_url, upload_file, GarbageCollector, MediaHandler};

#[derive(Parser)]
#[command(name = "stowage", about = "Blob storage backend administration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the object store and make sure the bucket exists
    Provision,
    /// Store a file under the given id
    Upload {
        /// Path to the file to upload
        file: std::path::PathBuf,
        /// File id (11-character canonical form)
        #[arg(long)]
        id: Uid,
        /// Owner id
        #[arg(long)]
        owner: Option<Uid>,
        /// MIME type recorded with the file
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
    },
    /// Delete objects by location, in order
    Delete {
        #[arg(required = true)]
        locations: Vec<String>,
    },
    /// Extract the file id from a public URL
    Resolve { url: String },
    /// Build the public URL for a file id
    Url {
        id: Uid,
        /// Extension appended to the file name
        #[arg(long)]
        ext: Option<String>,
    },
    /// Remove uploads that were never attached
    Gc {
        /// Keep running on STOWAGE_GC_PERIOD_SECS until interrupted
        #[arg(long)]
        watch: bool,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

async fn open_handler(config: &Config) -> anyhow::Result<Arc<dyn MediaHandler>> {
    let registry = build_registry(config).await?;
    Ok(registry.get(&config.media_handler)?)
}

async fn open_file_store(config: &Config) -> anyhow::Result<PgFileRepository> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for this command")?;
    let pool = setup_database(url, 5).await?;
    Ok(PgFileRepository::new(pool))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context(
        "Failed to load configuration. Set STOWAGE_MEDIA_CONFIG to the handler JSON",
    )?;
    let handler_config = HandlerConfig::from_json(&config.media_config)?;

    match cli.command {
        Commands::Provision => {
            open_handler(&config).await?;
            print_json(&serde_json::json!({
                "handler": config.media_handler,
                "bucket": handler_config.bucket,
                "serve_url": handler_config.serve_url,
            }))?;
        }
        Commands::Upload {
            file,
            id,
            owner,
            mime,
        } => {
            let handler = open_handler(&config).await?;
            let mut source = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let size = source.metadata().await?.len();
            let mut record = FileRecord::pending(id, owner.unwrap_or_default(), mime, size);

            if config.database_url.is_some() {
                let store = open_file_store(&config).await?;
                record = upload_file(handler.as_ref(), &store, record, &mut source).await?;
            } else {
                handler.upload(&mut record, &mut source).await?;
            }
            print_json(&FileSummary::new(&record, &handler_config.serve_url))?;
        }
        Commands::Delete { locations } => {
            let handler = open_handler(&config).await?;
            handler.delete(&locations).await?;
            print_json(&serde_json::json!({ "deleted": locations }))?;
        }
        Commands::Resolve { url } => {
            let handler = open_handler(&config).await?;
            let id = handler.get_id_from_url(&url);
            if id.is_zero() {
                anyhow::bail!("URL does not belong to this media handler: {}", url);
            }
            print_json(&serde_json::json!({
                "id": id.to_string(),
                "key": id.to_base32(),
            }))?;
        }
        Commands::Url { id, ext } => {
            println!(
                "{}",
                build_url(&handler_config.serve_url, id, ext.as_deref())
            );
        }
        Commands::Gc { watch } => {
            let handler = open_handler(&config).await?;
            let store = Arc::new(open_file_store(&config).await?);
            let gc = Arc::new(GarbageCollector::new(
                store,
                handler,
                config.gc_grace(),
                config.gc_block_size,
            ));

            if watch {
                let task = gc.start(config.gc_period());
                tokio::signal::ctrl_c()
                    .await
                    .context("Failed to listen for shutdown signal")?;
                tracing::info!("Shutting down garbage collector");
                task.abort();
            } else {
                let removed = gc.run_once().await?;
                print_json(&serde_json::json!({ "removed": removed }))?;
            }
        }
    }

    Ok(())
}

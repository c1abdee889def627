use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use catalog_core::encode;
use catalog_ingest::{merge_into_comic, HttpBlobGateway, IngestConfig, Ingestor};
use catalog_store::{CatalogStore, HttpSlot, StoreConfig};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Admin CLI for the comic catalog.
#[derive(Parser, Debug)]
#[command(name = "catalog-cli")]
#[command(about = "Inspect and maintain the comic catalog slot")]
struct Cli {
    /// Remote slot endpoint holding the catalog document
    #[arg(long, env = "SLOT_URL")]
    slot_url: String,

    /// Bearer token for the slot service
    #[arg(long, env = "SLOT_TOKEN", hide_env_values = true)]
    slot_token: String,

    /// Blob service endpoint (required for ingest)
    #[arg(long, env = "BLOB_URL")]
    blob_url: Option<String>,

    /// Bearer token for the blob service
    #[arg(long, env = "BLOB_TOKEN", hide_env_values = true)]
    blob_token: Option<String>,

    /// Hard ceiling on the serialized catalog size in bytes
    #[arg(long, default_value_t = 4096, env = "CATALOG_SIZE_CEILING")]
    size_ceiling: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Persist an empty catalog if the slot was never written
    Init,
    /// Print comic/chapter/page counts and size usage
    Stats,
    /// List comics with chapter and page counts
    List,
    /// Ingest a zip of chapter folders into an existing comic
    Ingest {
        /// Target comic id (slug)
        #[arg(long)]
        comic: String,
        /// Path to the archive
        archive: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let slot = Arc::new(HttpSlot::new(cli.slot_url.clone(), cli.slot_token.clone()));
    let store = CatalogStore::new(
        slot,
        StoreConfig {
            size_ceiling: cli.size_ceiling,
            ..StoreConfig::default()
        },
    );
    let doc = store.load().await.context("failed to load the catalog")?;

    match cli.command {
        Command::Init => {
            if doc.version > 0 {
                info!(version = doc.version, "slot already initialized");
            } else {
                let committed = store.mutate(|doc| Ok(doc.clone())).await?;
                info!(version = committed.version, "empty catalog persisted");
            }
        }

        Command::Stats => {
            let stats = doc.stats();
            let size = encode(&doc)?.len();
            println!("version:  {}", doc.version);
            println!("comics:   {}", stats.comics);
            println!("chapters: {}", stats.chapters);
            println!("pages:    {}", stats.pages);
            println!("size:     {size}/{} bytes", cli.size_ceiling);
        }

        Command::List => {
            for comic in &doc.comics {
                println!(
                    "{}  {:?}  {} chapters, {} pages",
                    comic.id,
                    comic.title,
                    comic.chapters.len(),
                    comic.page_count()
                );
            }
        }

        Command::Ingest { comic, archive } => {
            let (Some(blob_url), Some(blob_token)) = (cli.blob_url, cli.blob_token) else {
                bail!("--blob-url and --blob-token are required for ingest");
            };
            if doc.comic(&comic).is_none() {
                bail!("no comic with id {comic:?}");
            }

            let gateway = Arc::new(HttpBlobGateway::new(blob_url, blob_token));
            let ingestor = Ingestor::new(gateway, IngestConfig::default());

            let bytes = std::fs::read(&archive)
                .with_context(|| format!("cannot read {}", archive.display()))?;
            let result = ingestor.ingest(bytes).await?;
            for warning in result.all_warnings() {
                println!("warning: {warning}");
            }

            let committed = store
                .mutate(|doc| {
                    let mut next = doc.clone();
                    let target = next.comic_mut(&comic).ok_or_else(|| {
                        catalog_core::CatalogError::Validation(format!(
                            "unknown comic {comic:?}"
                        ))
                    })?;
                    merge_into_comic(target, &result);
                    Ok(next)
                })
                .await?;

            info!(
                version = committed.version,
                chapters = result.chapters.len(),
                pages = result.total_pages(),
                "archive merged"
            );
        }
    }

    Ok(())
}

use bytes::Bytes;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;
use webp_derive::config::{self, Config};
use webp_derive::hooks::{HookDispatcher, HookError, LifecycleHooks, RecordChange, RecordDelete};
use webp_derive::imaging::RustBackend;
use webp_derive::naming;
use webp_derive::output;
use webp_derive::pipeline::Pipeline;
use webp_derive::records::{JsonRecordStore, RecordStore};
use webp_derive::regenerate::{RegenerationRegistry, Regenerator};
use webp_derive::storage::{FsStorage, Storage};
use webp_derive::types::UploadFile;

type CliPipeline = Pipeline<FsStorage, JsonRecordStore, RustBackend>;

#[derive(Parser)]
#[command(name = "webp-derive")]
#[command(about = "WebP derivatives for uploaded images")]
#[command(long_about = "\
WebP derivatives for uploaded images

Every accepted upload gets a primary WebP derivative plus one WebP per
configured size, named after the source and the final pixel size:

  media/
  ├── photo.jpg                    # Original upload
  ├── photo-1920x1080.webp         # Primary derivative
  ├── photo-400x300.webp           # Size 'thumbnail'
  └── photo-400x300-1.webp         # Same size from another 'photo' upload

Records are kept as JSON under the data directory, one file per collection.
Derivative metadata lands in each record's 'derivative' field.

Run 'webp-derive gen-config' to generate a documented derivatives.toml.")]
#[command(version)]
struct Cli {
    /// Config file
    #[arg(long, default_value = config::CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Record store directory [default: <root>/records]
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a stock derivatives.toml with all options documented
    GenConfig,
    /// Validate the config and summarize collections
    Check,
    /// Import a file or directory of images into a collection
    Ingest {
        collection: String,
        path: PathBuf,
    },
    /// Delete a record with its original and derivatives
    Delete {
        collection: String,
        id: String,
    },
    /// Re-derive every record of a collection from its original
    Regenerate {
        collection: String,
        /// Sort key, prefix with '-' for descending [default: createdAt]
        #[arg(long)]
        sort: Option<String>,
    },
    /// Re-derive a single record
    RegenerateOne {
        collection: String,
        id: String,
    },
    /// Print a record with its derivative URLs
    Show {
        collection: String,
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = config::load_config(&cli.config)?;
    init_tracing(&config);

    if let Command::Check = cli.command {
        output::print_check(&config);
        println!("==> Config is valid");
        return Ok(());
    }

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.root.join("records"));
    let pipeline: Arc<CliPipeline> = Arc::new(Pipeline::new(
        FsStorage::new(),
        JsonRecordStore::new(data_dir),
        RustBackend::new(),
        config,
    ));

    match cli.command {
        Command::GenConfig | Command::Check => {}
        Command::Ingest { collection, path } => ingest(&pipeline, &collection, &path).await?,
        Command::Delete { collection, id } => delete(&pipeline, &collection, &id).await?,
        Command::Regenerate { collection, sort } => {
            regenerate(&pipeline, &collection, sort.as_deref()).await?
        }
        Command::RegenerateOne { collection, id } => {
            let regen = Regenerator::new(Arc::clone(&pipeline), Arc::new(RegenerationRegistry::new()));
            let done = regen.regenerate_one(&collection, &id).await?;
            println!("{done}");
        }
        Command::Show { collection, id } => {
            let config = collection_config(&pipeline, &collection)?;
            let record = pipeline.records().find_by_id(&collection, &id).await?;
            output::print_record(&record, config, &pipeline.config().server_url);
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` when the config asks for it.
fn init_tracing(config: &Config) {
    let default = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn collection_config<'a>(
    pipeline: &'a CliPipeline,
    slug: &str,
) -> Result<&'a config::CollectionConfig, Box<dyn Error>> {
    pipeline
        .collection(slug)
        .ok_or_else(|| format!("collection {slug} is not configured").into())
}

async fn ingest(pipeline: &Arc<CliPipeline>, slug: &str, path: &Path) -> Result<(), Box<dyn Error>> {
    let dir = pipeline.static_dir(collection_config(pipeline, slug)?);
    let hooks = HookDispatcher::new(Arc::clone(pipeline));
    let mut imported = 0usize;

    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let source = entry.path();
        let mime = match mime_guess::from_path(source).first() {
            Some(mime) => mime.essence_str().to_string(),
            None => {
                println!("skipped {} (unknown type)", source.display());
                continue;
            }
        };
        if !pipeline.config().conversion.accepts(&mime) {
            println!("skipped {} ({mime})", source.display());
            continue;
        }

        match ingest_file(pipeline, &hooks, slug, &dir, source, mime).await {
            Ok(line) => {
                println!("{line}");
                imported += 1;
            }
            Err(error) => error!(%error, path = %source.display(), "ingest failed"),
        }
    }

    if pipeline.pending() > 0 {
        info!(pending = pipeline.pending(), "waiting for background conversions");
    }
    pipeline.wait_idle().await;
    println!("==> Imported {imported} file(s) into {slug}");
    Ok(())
}

async fn ingest_file(
    pipeline: &CliPipeline,
    hooks: &HookDispatcher<FsStorage, JsonRecordStore, RustBackend>,
    slug: &str,
    dir: &Path,
    source: &Path,
    mime_type: String,
) -> Result<String, Box<dyn Error>> {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or("path has no file name")?;
    let data = Bytes::from(tokio::fs::read(source).await?);

    let stored = naming::original_name(pipeline.storage(), dir, &name).await?;
    pipeline.storage().write_all(&dir.join(&stored), &data).await?;

    let upload = UploadFile {
        data,
        name: stored.clone(),
        mime_type,
    };
    let mut fields = Map::new();
    fields.insert("filename".to_string(), Value::from(stored.as_str()));
    fields.insert("mimeType".to_string(), Value::from(upload.mime_type.as_str()));
    fields.insert("filesize".to_string(), Value::from(upload.size() as u64));
    let record = pipeline.records().create(slug, fields).await?;

    let record = hooks
        .on_record_changed(RecordChange {
            collection: slug.to_string(),
            record,
            upload: Some(upload),
        })
        .await?;
    Ok(format!("{} {}", record.id, stored))
}

async fn delete(pipeline: &Arc<CliPipeline>, slug: &str, id: &str) -> Result<(), Box<dyn Error>> {
    let dir = pipeline.static_dir(collection_config(pipeline, slug)?);
    let record = pipeline.records().delete_by_id(slug, id).await?;

    if let Some(filename) = record.filename() {
        let original = dir.join(filename);
        if pipeline.storage().exists(&original).await? {
            if let Err(error) = pipeline.storage().delete(&original).await {
                warn!(%error, path = %original.display(), "could not delete original");
            }
        }
    }

    let hooks = HookDispatcher::new(Arc::clone(pipeline));
    match hooks
        .on_record_deleted(RecordDelete {
            collection: slug.to_string(),
            record,
        })
        .await
    {
        Ok(()) => println!("deleted {id}"),
        Err(HookError::FileDeletion { paths }) => {
            println!("deleted {id}, but some derivatives remain:");
            for path in paths {
                println!("    {}", path.display());
            }
        }
        Err(error) => return Err(error.into()),
    }
    Ok(())
}

async fn regenerate(
    pipeline: &Arc<CliPipeline>,
    slug: &str,
    sort: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            output::print_event(&event);
        }
    });

    let regen = Arc::new(
        Regenerator::new(Arc::clone(pipeline), Arc::new(RegenerationRegistry::new())).with_events(tx),
    );
    let result = regen.trigger(slug, sort).await;
    pipeline.wait_idle().await;

    // Continuations hold clones of the regenerator; once idle this is the
    // last sender, and dropping it ends the printer.
    drop(regen);
    printer.await?;
    result?;
    Ok(())
}

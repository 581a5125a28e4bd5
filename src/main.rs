use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::SystemTime,
};

use ::tracing::{debug, error, info, info_span};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tier_backend::{
    progress_fn,
    BackendRegistry,
    BackendStorage,
    BackendStorages,
    ProgressFn,
    TierFileInfo,
};
use tokio::io::AsyncWriteExt;

mod config;
mod tracing;
use config::TierConfig;
use crate::tracing::setup_tracing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Copy a local volume file to a backend storage and print its key.
    Upload {
        path: PathBuf,
        #[arg(short, long, help = "Backend storage as <type>.<id>")]
        backend: String,
    },
    /// Download a remote volume into a local file.
    Download {
        key: String,
        path: PathBuf,
        #[arg(short, long, help = "Backend storage as <type>.<id>")]
        backend: String,
    },
    /// Delete a remote volume.
    Delete {
        key: String,
        #[arg(short, long, help = "Backend storage as <type>.<id>")]
        backend: String,
    },
    /// Read a byte range of a remote volume and write it to stdout.
    Read {
        key: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 4096)]
        length: usize,
        #[arg(long, help = "Known volume size, logged as the file stat")]
        size: Option<u64>,
        #[arg(short, long, help = "Backend storage as <type>.<id>")]
        backend: String,
    },
    /// List configured backend storages.
    Backends,
}

/// Logs progress at debug level, plus an info line every 10%.
fn logging_progress(operation: &'static str) -> ProgressFn {
    let last_decile = AtomicU32::new(0);
    progress_fn(move |p| {
        debug!(
            operation,
            bytes = p.bytes_transferred,
            percentage = p.percentage,
            "transfer progress"
        );
        let decile = (p.percentage / 10.0) as u32;
        if decile > last_decile.swap(decile, Ordering::Relaxed) {
            info!(operation, "{:.0}% done", p.percentage);
        }
        Ok(())
    })
}

fn mask_properties(properties: HashMap<String, String>) -> BTreeMap<String, String> {
    properties
        .into_iter()
        .map(|(key, value)| {
            if key.contains("password") && !value.is_empty() {
                (key, "******".to_string())
            } else {
                (key, value)
            }
        })
        .collect()
}

/// Properties of every storage, with passwords masked.
fn describe(storages: &BackendStorages) -> BTreeMap<String, BTreeMap<String, String>> {
    storages
        .iter()
        .map(|(name, storage)| (name.to_string(), mask_properties(storage.to_properties())))
        .collect()
}

async fn storage(config: &TierConfig, name: &str) -> Result<Arc<dyn BackendStorage>> {
    let (storage_type, id) = name
        .split_once('.')
        .ok_or_else(|| anyhow!("backend must be given as <type>.<id>, got '{name}'"))?;
    let prefix = format!("{}{storage_type}.{id}.", config.root_prefix);
    let storage = BackendRegistry::with_defaults()
        .build(storage_type, &config.backends, &prefix, id)
        .await?;
    Ok(storage)
}

async fn run(config: TierConfig, command: Command) -> Result<()> {
    match command {
        Command::Upload { path, backend } => {
            let storage = storage(&config, &backend).await?;
            let (key, size) = storage
                .copy_file(&path, logging_progress("upload"))
                .await?;
            info!(%key, size, "uploaded {} to {}", path.display(), storage.name());
            println!("{key}");
        }
        Command::Download { key, path, backend } => {
            let storage = storage(&config, &backend).await?;
            let size = storage
                .download_file(&path, &key, logging_progress("download"))
                .await?;
            info!(%key, size, "downloaded to {}", path.display());
        }
        Command::Delete { key, backend } => {
            let storage = storage(&config, &backend).await?;
            storage.delete_file(&key).await?;
            info!(%key, "deleted from {}", storage.name());
        }
        Command::Read {
            key,
            offset,
            length,
            size,
            backend,
        } => {
            let storage = storage(&config, &backend).await?;
            let tier_info = size.map(|size| {
                TierFileInfo::single(
                    storage.storage_type().as_str(),
                    storage.id(),
                    &key,
                    size,
                    SystemTime::now(),
                )
            });
            let file = storage.new_file_handle(&key, tier_info);
            if let Ok((size, _)) = file.stat() {
                debug!(%key, size, "volume stat");
            }

            let mut buf = vec![0u8; length];
            let n = file.read_at(&mut buf, offset).await?;
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(&buf[..n])
                .await
                .context("failed to write to stdout")?;
            stdout.flush().await?;
        }
        Command::Backends => {
            let registry = BackendRegistry::with_defaults();
            let types: Vec<String> = registry
                .storage_types()
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("storage types: {}", types.join(", "));

            let storages = registry
                .load_storages(&config.backends, &config.root_prefix)
                .await?;
            for (name, properties) in describe(&storages) {
                println!("{name}");
                for (key, value) in properties {
                    println!("  {key}: {value}");
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match TierConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error loading config: {err:#}");
            std::process::exit(1);
        }
    };

    setup_tracing(&config);

    let root_span = info_span!("volume-tier");
    let _guard = root_span.enter();

    if let Err(err) = run(config, cli.command).await {
        error!("{:#}", err);
        std::process::exit(1);
    }
}

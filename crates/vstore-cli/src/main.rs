//! Demo command-line front end for `vstore`.
//!
//! Mounts the backends named in a TOML mount list, then runs a single
//! `lookup`/`load`/`ls`/`query` subcommand against the resulting root
//! storage and prints the result. This is not the surrounding application
//! server (HTTP, auth, scheduler) this workspace leaves to its caller — it
//! only exercises the library directly, the way a thin CLI front end
//! exercises the core it wraps.

mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use vstore::{
    ArchiveBackend, Backend, DirectoryBackend, LoadedValue, MemoryBackend, NullFactory, Path,
    Query, RootStorage, StoreConfig, Value,
};

use crate::config::{BackendSpecKind, CliConfig, MountSpec};

#[derive(Parser, Debug)]
#[command(name = "vstore", about = "Inspect a hierarchical virtual object store")]
struct Args {
    /// Path to the store-wide config (cache interval, log level, data dir).
    #[arg(long)]
    store_config: Option<String>,

    /// Path to the mount list (which backends to mount and where).
    #[arg(long)]
    mounts: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print metadata for a path.
    Lookup { path: String },
    /// Load and print the value at a path.
    Load { path: String },
    /// List the immediate children of an index path.
    Ls {
        path: String,
        #[arg(long)]
        hidden: bool,
    },
    /// Stream leaf paths under a base, optionally filtered.
    Query {
        base: String,
        #[arg(long)]
        ext: Option<String>,
        #[arg(long)]
        hidden: bool,
        #[arg(long)]
        max_depth: Option<usize>,
    },
}

fn setup_logging(log_level: &str, log_dir: &std::path::Path) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).with_thread_ids(false);

    std::fs::create_dir_all(log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(log_dir, "vstore.log");
    let file_layer = fmt::layer().json().with_writer(file_appender);

    tracing_subscriber::registry().with(filter).with(stdout_layer).with(file_layer).init();
}

fn build_backend(spec: &MountSpec) -> vstore::StoreResult<Arc<dyn Backend>> {
    Ok(match spec.kind {
        BackendSpecKind::Memory => Arc::new(MemoryBackend::new(spec.id.clone())),
        BackendSpecKind::Dir => {
            let source = spec.source.as_deref().unwrap_or(".");
            Arc::new(DirectoryBackend::open(spec.id.clone(), source)?)
        }
        BackendSpecKind::Zip => {
            let source = spec.source.as_deref().unwrap_or("");
            Arc::new(ArchiveBackend::open(spec.id.clone(), source)?)
        }
    })
}

fn mount_all(root: &RootStorage, config: &CliConfig) -> vstore::StoreResult<()> {
    for spec in &config.mounts {
        let backend = build_backend(spec)?;
        let mount_path = Path::parse(&spec.mount_path)?;
        root.mount(backend, mount_path.clone())?;
        if spec.read_write || spec.cached || spec.overlay_path.is_some() {
            let overlay = spec.overlay_path.as_deref().map(Path::parse).transpose()?;
            root.remount(&mount_path, spec.read_write, spec.cached, overlay, spec.overlay_priority)?;
        }
    }
    Ok(())
}

fn print_value(name: &Path, value: &LoadedValue) {
    match value {
        LoadedValue::Index(idx) => {
            println!("{name} (index, {} sub-indices, {} objects)", idx.indices.len(), idx.objects.len());
        }
        LoadedValue::Dictionary(d) => {
            println!("{name} (dictionary, {} keys):", d.len());
            for (k, v) in d {
                println!("  {k} = {}", render_value(v));
            }
        }
        LoadedValue::Binary(b) => {
            println!("{name} (binary, {} bytes, mime={:?})", b.size(), b.mime_type);
        }
        LoadedValue::Object(o) => {
            let guard = o.lock();
            println!("{name} (object, type={}, active={})", guard.type_tag(), guard.is_active());
        }
    }
}

fn render_value(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => format!("[{}]", items.iter().map(render_value).collect::<Vec<_>>().join(", ")),
        Value::Dict(_) => "{..}".to_string(),
    }
}

fn run(args: Args) -> vstore::StoreResult<()> {
    let store_config_path = args
        .store_config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(StoreConfig::default_path);
    let store_config = StoreConfig::load_from(&store_config_path);
    setup_logging(&store_config.log_level, &store_config.log_dir());

    let mounts_path = args.mounts.map(std::path::PathBuf::from).unwrap_or_else(CliConfig::default_path);
    let mounts = CliConfig::load_from(&mounts_path);

    let root = Arc::new(RootStorage::new(Arc::new(NullFactory)));
    mount_all(&root, &mounts)?;
    root.start_cleaner(Duration::from_secs(store_config.cache_clean_interval_secs));

    match args.command {
        Command::Lookup { path } => {
            let p = Path::parse(&path)?;
            match root.lookup(&p)? {
                Some(meta) => println!("{p}: category={:?} mime={:?} size={:?}", meta.category, meta.mime_type, meta.size),
                None => println!("{p}: not found"),
            }
        }
        Command::Load { path } => {
            let p = Path::parse(&path)?;
            match root.load(&p)? {
                Some(v) => print_value(&p, &v),
                None => println!("{p}: not found"),
            }
        }
        Command::Ls { path, hidden } => {
            let p = Path::parse(&path)?;
            match root.load(&p)? {
                Some(LoadedValue::Index(idx)) => {
                    let indices = if hidden { idx.indices.iter().collect::<Vec<_>>() } else { idx.visible_indices() };
                    let objects = if hidden { idx.objects.iter().collect::<Vec<_>>() } else { idx.visible_objects() };
                    for name in indices {
                        println!("{name}/");
                    }
                    for name in objects {
                        println!("{name}");
                    }
                }
                Some(_) => eprintln!("{p} is not an index"),
                None => println!("{p}: not found"),
            }
        }
        Command::Query { base, ext, hidden, max_depth } => {
            let base = Path::parse(&base)?;
            let mut query: Query = root.query(base);
            query = query.include_hidden(hidden);
            if let Some(ext) = ext {
                query = query.extension(ext);
            }
            if let Some(depth) = max_depth {
                query = query.max_depth(depth);
            }
            for path in query.paths() {
                println!("{path}");
            }
        }
    }

    root.stop_cleaner();
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use statevault_common::StoreId;
use statevault_kernel::{ObjectRef, Store, Value, deep_copy};
use statevault_persist::{FileStorage, PersistConfig, Storage, attach};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statevault-cli", about = "CLI tool for statevault operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Persistence config (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Deep-copy a JSON document and print the copy
    Copy {
        /// JSON file to copy
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Copy a self-referencing graph and check its shape survives
    CycleDemo,
    /// Apply a JSON document to a persisted store
    Persist {
        /// Storage directory
        #[arg(short, long)]
        dir: PathBuf,
        /// Store id
        #[arg(short, long)]
        store: String,
        /// JSON document to apply
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Print the persisted state of a store
    Show {
        /// Storage directory
        #[arg(short, long)]
        dir: PathBuf,
        /// Store id
        #[arg(short, long)]
        store: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("statevault-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", statevault_common::crate_info());
            println!("persist: {}", statevault_persist::crate_info());
            println!("key prefix: {:?}", config.key_prefix);
            println!("on write error: {:?}", config.on_write_error);
        }
        Commands::Copy { input } => {
            let value = read_json(&input)?;
            let copy = deep_copy(&value);
            println!("{}", render(&copy)?);
            println!(
                "Structurally equal: {}, shares root: {}",
                copy.deep_eq(&value),
                copy.identity().is_some() && copy.identity() == value.identity()
            );
        }
        Commands::CycleDemo => {
            let root = ObjectRef::new();
            let shared = Value::object_from([("theme", Value::from("dark"))]);
            root.set("left", shared.clone());
            root.set("right", shared);
            root.set("self", Value::Object(root.clone()));
            let state = Value::Object(root);

            let copy = deep_copy(&state);
            println!("Source: {state}");
            println!("Copy:   {copy}");

            let cycle = copy.get("self").is_some_and(|v| v.strict_eq(&copy));
            let sharing = match (copy.get("left"), copy.get("right")) {
                (Some(l), Some(r)) => l.strict_eq(&r),
                _ => false,
            };
            let detached = !copy.strict_eq(&state);
            println!("Cycle preserved: {}", ok(cycle));
            println!("Sharing preserved: {}", ok(sharing));
            println!("Detached from source: {}", ok(detached));
        }
        Commands::Persist { dir, store, input } => {
            let patch = read_json(&input)?;
            let storage = Rc::new(FileStorage::open(&dir)?);
            let mut store = Store::new(store, Value::object());
            let attachment = attach(&mut store, Rc::clone(&storage), &config)?;

            match patch.as_object().cloned() {
                Some(obj) => store.patch_object(obj.entries())?,
                None => store.replace_state(patch),
            }

            println!(
                "Persisted {} (revision {}, writes {}, failures {})",
                attachment.key(),
                store.revision(),
                attachment.writes(),
                attachment.write_failures()
            );
            if let Some(stored) = storage.get(attachment.key())? {
                println!("{}", render(&stored)?);
            }
        }
        Commands::Show { dir, store } => {
            let storage = FileStorage::open(&dir)?;
            storage.verify_integrity()?;
            let key = config.key_for(&StoreId::new(store));
            match storage.get(&key)? {
                Some(value) => println!("{}", render(&value)?),
                None => println!("No state stored under {key:?}"),
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PersistConfig> {
    let Some(path) = path else {
        return Ok(PersistConfig::default());
    };
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening config {}", path.display()))?;
    let config: PersistConfig = serde_json::from_reader(file)
        .with_context(|| format!("parsing config {}", path.display()))?;
    tracing::debug!(?config, "loaded persistence config");
    Ok(config)
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Value::from_json(&json))
}

/// Pretty JSON when the graph is acyclic, the cycle-aware display otherwise.
fn render(value: &Value) -> anyhow::Result<String> {
    match value.to_json() {
        Ok(json) => Ok(serde_json::to_string_pretty(&json)?),
        Err(_) => Ok(value.to_string()),
    }
}

fn ok(flag: bool) -> &'static str {
    if flag { "OK" } else { "MISMATCH" }
}

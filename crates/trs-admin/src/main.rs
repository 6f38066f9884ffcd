//! trs-admin operator binary.
//!
//! Reads `trs.toml` (or the path given with `--config`), layers `TRS_*`
//! environment variables on top, opens the SQLite store and runs one
//! provisioning or maintenance command. Results are printed to stdout as
//! JSON; logs go to stderr.
//!
//! ```text
//! trs-admin provision --from 1000000 --to 1999999
//! trs-admin find national-insurance-number "ab 12 34 56 c"
//! TRS_STORE__CLAIM_ATTEMPTS=10 trs-admin allocate
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use trs_core::{
  attribute::AttributeType,
  name::NormalizerConfig,
  store::{PersonSearchIndex, TrnAllocator},
  synonym::NameSynonymEntry,
};
use trs_store_sqlite::{SqliteStore, StoreConfig};
use uuid::Uuid;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "TRS identity store administration")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "trs.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Register a new inclusive block of TRNs.
  Provision {
    #[arg(long)]
    from: u32,
    #[arg(long)]
    to:   u32,
  },
  /// List every provisioned range with its remaining capacity.
  Ranges,
  /// Claim the next TRN outside of any person write.
  Allocate,
  /// Replace the name synonym list from a JSON file, then reindex.
  ImportSynonyms {
    /// Defaults to `synonyms_path` from the configuration.
    file: Option<PathBuf>,
  },
  /// Recompute search attributes for every person.
  Reindex,
  /// Recompute search attributes for one person.
  Resync { person_id: Uuid },
  /// Look up person ids by a search attribute, e.g. `name-token smith`.
  Find {
    attribute_type: String,
    value:          String,
  },
}

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(default)]
struct AdminConfig {
  store_path:    PathBuf,
  /// Synonym list used by `import-synonyms` when no file is given.
  synonyms_path: Option<PathBuf>,
  store:         StoreConfig,
  names:         NormalizerConfig,
}

impl Default for AdminConfig {
  fn default() -> Self {
    Self {
      store_path:    PathBuf::from("trs.db"),
      synonyms_path: None,
      store:         StoreConfig::default(),
      names:         NormalizerConfig::default(),
    }
  }
}

#[derive(Serialize)]
struct RangeReport {
  from_trn:     u32,
  to_trn:       u32,
  next_trn:     u32,
  is_exhausted: bool,
  remaining:    u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing; stdout is reserved for command output.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.as_path()).required(false))
    .add_source(
      config::Environment::with_prefix("TRS")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .with_context(|| format!("failed to read config file {:?}", cli.config))?;

  let admin_cfg: AdminConfig = settings
    .try_deserialize()
    .context("failed to deserialise AdminConfig")?;

  let store_path = expand_tilde(&admin_cfg.store_path);
  let store = SqliteStore::open(&store_path, admin_cfg.store, &admin_cfg.names)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command {
    Command::Provision { from, to } => {
      let range = store
        .provision_range(from, to)
        .await
        .with_context(|| format!("failed to provision {from}..={to}"))?;
      print_json(&RangeReport::from(&range))?;
    }
    Command::Ranges => {
      let ranges = store.list_ranges().await.context("failed to list ranges")?;
      print_json(&ranges.iter().map(RangeReport::from).collect::<Vec<_>>())?;
    }
    Command::Allocate => {
      let trn = store.allocate().await.context("failed to allocate a TRN")?;
      println!("{trn}");
    }
    Command::ImportSynonyms { file } => {
      let path = file
        .or(admin_cfg.synonyms_path)
        .context("no synonym file given and `synonyms_path` is not configured")?;
      let entries = read_synonyms(&expand_tilde(&path))?;
      store
        .replace_synonyms(entries)
        .await
        .context("failed to replace synonyms")?;
      let summary = store.resync_all().await.context("reindex failed")?;
      print_json(&summary)?;
    }
    Command::Reindex => {
      let summary = store.resync_all().await.context("reindex failed")?;
      print_json(&summary)?;
    }
    Command::Resync { person_id } => {
      let outcome = store
        .resync(person_id)
        .await
        .with_context(|| format!("failed to resync person {person_id}"))?;
      print_json(&outcome)?;
    }
    Command::Find { attribute_type, value } => {
      let attribute_type = AttributeType::parse(&attribute_type)?;
      let ids = store
        .find_by_attribute(attribute_type, &value)
        .await
        .context("lookup failed")?;
      print_json(&ids)?;
    }
  }

  Ok(())
}

impl From<&trs_core::trn::TrnRange> for RangeReport {
  fn from(range: &trs_core::trn::TrnRange) -> Self {
    Self {
      from_trn:     range.from_trn,
      to_trn:       range.to_trn,
      next_trn:     range.next_trn,
      is_exhausted: range.is_exhausted,
      remaining:    range.remaining(),
    }
  }
}

fn read_synonyms(path: &Path) -> anyhow::Result<Vec<NameSynonymEntry>> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read synonym file {path:?}"))?;
  serde_json::from_str(&raw)
    .with_context(|| format!("failed to parse synonym file {path:?}"))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

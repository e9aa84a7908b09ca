mod config;
mod dataset;
mod dates;
mod errors;
mod extra_income;
mod heuristics;
mod kpi;
mod order_extract;
mod pipeline;
mod report;
mod store;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use time::{Date, OffsetDateTime};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use errors::AnalysisError;
use pipeline::{CourierRequest, GlobalRequest, Pipeline};
use report::{CourierReport, GlobalReport, JsonSink, ReportSink};
use store::{OfflineStore, SqliteStore, Storage};

#[derive(Parser)]
#[command(name = "yupii_orders", about = "Courier order analytics from chat exports")]
struct Cli {
    /// TOML config; defaults apply when the file is absent.
    #[arg(long, default_value = ".config/yupii.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a chat export under the orders prefix.
    Ingest {
        file: PathBuf,
        /// Stored file name; defaults to the local file name.
        #[arg(long)]
        name: Option<String>,
    },
    /// List stored chat exports.
    List,
    /// Analyze one courier's export.
    Analyze {
        /// Export name as shown by `list`, e.g. `ana.txt`.
        export: String,
        #[arg(long, value_parser = dates::parse_date_arg)]
        start: Option<Date>,
        #[arg(long, value_parser = dates::parse_date_arg)]
        end: Option<Date>,
        /// Courier name; defaults to the export name without `.txt`.
        #[arg(long)]
        courier: Option<String>,
        /// Append the analyzed orders to the cumulative dataset.
        #[arg(long)]
        append: bool,
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// Analyze the cumulative dataset across couriers.
    Global {
        #[arg(long, value_parser = dates::parse_date_arg)]
        start: Option<Date>,
        #[arg(long, value_parser = dates::parse_date_arg)]
        end: Option<Date>,
        /// Keep only these couriers (repeatable).
        #[arg(long = "courier")]
        couriers: Vec<String>,
        /// Analyze this local dataset CSV instead of the stored one.
        #[arg(long)]
        dataset: Option<PathBuf>,
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// Teach the normalizer a new spelling of an establishment.
    Alias { canonical: String, variant: String },
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn open_store(db_path: &str) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    ensure_parent(Path::new(db_path))?;
    Ok(SqliteStore::new(db_path)?)
}

fn write_exports(dir: &Path, files: Vec<(String, String)>) -> Result<(), AnalysisError> {
    fs::create_dir_all(dir)?;
    for (name, body) in files {
        let path = dir.join(&name);
        fs::write(&path, body)?;
        info!(path = %path.display(), "EXPORTED");
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cfg = config::Config::load_or_default(&cli.config)?;

    // init tracing; RUST_LOG wins over the config filter
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_filter));
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let sqlite = open_store(&cfg.db_path);
    let store: &dyn Storage = match &sqlite {
        Ok(db) => db,
        Err(e) => {
            error!(db_path = %cfg.db_path, error = %e, "Storage unavailable; continuing offline");
            &OfflineStore
        }
    };

    let aliases = cfg.alias_table();
    info!(aliases = aliases.len(), "Alias table loaded");
    let runner = Pipeline::new(store, &aliases, &cfg.dataset_name);
    let today = OffsetDateTime::now_utc().date();
    let mut sink = JsonSink::new(std::io::stdout());

    match cli.command {
        Command::Ingest { file, name } => {
            let bytes = fs::read(&file)?;
            let name = match name {
                Some(n) => n,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| AnalysisError::MissingExport(file.display().to_string()))?,
            };
            let key = format!("{}{}", cfg.orders_prefix, name);

            if let Ok(db) = &sqlite {
                if db.get_digest(&key)? == Some(SqliteStore::digest(&bytes)) {
                    info!(key = %key, "Export unchanged; skipping");
                    return Ok(());
                }
            }
            if !store.write(&key, &bytes) {
                return Err(AnalysisError::StorageWrite(key).into());
            }
            info!(key = %key, bytes = bytes.len(), "INGESTED");
        }
        Command::List => {
            for (display, handle) in store.list(&cfg.orders_prefix) {
                println!("{display}\t{handle}");
            }
            if let Ok(db) = &sqlite {
                let (total, datasets) = db.get_counts()?;
                info!(objects_total = total, datasets = datasets, "Storage statistics");
            }
        }
        Command::Analyze {
            export,
            start,
            end,
            courier,
            append,
            export_dir,
        } => {
            let courier = courier.unwrap_or_else(|| pipeline::courier_from_file(&export));
            let request = CourierRequest {
                handle: format!("{}{}", cfg.orders_prefix, export),
                courier,
                start,
                end,
                append,
            };
            let report = match runner.run_courier(&request, today) {
                Ok(report) => report,
                Err(e @ AnalysisError::InvalidRange { .. }) => {
                    error!(error = %e, "Aggregation halted");
                    CourierReport::empty(&request.courier, &e)
                }
                Err(e) => return Err(e.into()),
            };
            for warning in &report.warnings {
                warn!(courier = %report.courier, "{warning}");
            }
            sink.publish_courier(&report)?;
            if let Some(dir) = export_dir {
                write_exports(&dir, report::courier_exports(&report)?)?;
            }
        }
        Command::Global {
            start,
            end,
            couriers,
            dataset: local_dataset,
            export_dir,
        } => {
            let request = GlobalRequest {
                start,
                end,
                couriers,
            };
            let result = match local_dataset {
                Some(path) => {
                    let content = fs::read_to_string(&path)?;
                    let rows = dataset::decode_csv(&content);
                    info!(path = %path.display(), rows = rows.len(), "Loaded local dataset");
                    runner.run_global_rows(rows, &request, today)
                }
                None => runner.run_global(&request, today),
            };
            let report = match result {
                Ok(report) => report,
                Err(e @ AnalysisError::InvalidRange { .. }) => {
                    error!(error = %e, "Aggregation halted");
                    GlobalReport::empty(&e)
                }
                Err(e) => return Err(e.into()),
            };
            sink.publish_global(&report)?;
            if let Some(dir) = export_dir {
                write_exports(&dir, report::global_exports(&report)?)?;
            }
        }
        Command::Alias { canonical, variant } => {
            ensure_parent(&cli.config)?;
            config::Config::add_alias(&cli.config, &canonical, &variant)?;
            info!(canonical = %canonical, variant = %variant, "Alias added");
        }
    }

    Ok(())
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use subrange::builder::build_index;
use subrange::catalog::{Catalog, DatasetInfo};
use subrange::config::EngineConfig;
use subrange::error::EngineError;
use subrange::facade::Facade;
use subrange::rangetable::RangeTable;

#[derive(Parser)]
#[command(name = "subrange", version = "0.1.0", about = "Subject-range gzip CSV index and query engine")]
struct Cli {
    /// Directory containing `<dataset_id>.csv.gz` files and their sidecars
    #[arg(short, long, default_value = ".", global = true)]
    base_dir: PathBuf,

    /// Override the default subjects.csv range table path
    #[arg(long, global = true)]
    range_table: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the checkpoint index and subject-range entries for a dataset, or "all"
    Index {
        dataset_id: String,
        /// Column the dataset is sorted by and keyed on
        #[arg(long, default_value = "subject_id")]
        sort_column: String,
        /// Clear this dataset's existing range-table columns first, forcing
        /// a rebuild instead of the default idempotent no-op
        #[arg(long)]
        clear: bool,
    },
    /// Re-read a dataset's checkpoint sidecar and confirm it opens cleanly,
    /// then sample one present subject through a real query
    Verify { dataset_id: String },
    /// Print every row for one subject in one dataset
    Query {
        dataset_id: String,
        subject_id: u64,
    },
    /// List every subject known to the range table
    ListSubjects,
    /// List every dataset registered in the catalog manifest
    ListDatasets,
    /// Print catalog, checkpoint, and range-table statistics for a dataset
    Info { dataset_id: String },
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

/// The catalog is a CSV manifest (`dataset_id,sort_column,row_count_hint`)
/// living at `<base_dir>/catalog.csv`. Reading it back between CLI
/// invocations is what lets `query`/`verify`/`info` know a dataset's
/// `sort_column` without the caller repeating `--sort-column` on every call.
fn catalog_manifest_path(base_dir: &std::path::Path) -> PathBuf {
    base_dir.join("catalog.csv")
}

/// Load the catalog manifest and, if `dataset_id` isn't in it (no `index`
/// has ever been run through this CLI for it), register a default entry
/// assuming `subject_id` as the sort column rather than failing outright.
fn catalog_with_fallback(manifest_path: &PathBuf, dataset_id: &str) -> Result<Catalog, EngineError> {
    let mut catalog = Catalog::load_manifest(manifest_path)?;
    if catalog.lookup(dataset_id).is_err() {
        catalog.register(DatasetInfo {
            dataset_id: dataset_id.to_string(),
            sort_column: "subject_id".to_string(),
            row_count_hint: None,
        })?;
    }
    Ok(catalog)
}

fn run(cli: Cli) -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match cli.range_table {
        Some(path) => EngineConfig::new(&cli.base_dir).with_range_table_path(path),
        None => EngineConfig::new(&cli.base_dir),
    };
    let manifest_path = catalog_manifest_path(&config.base_dir);

    match cli.command {
        Commands::Index { dataset_id, sort_column, clear } => {
            let mut catalog = Catalog::load_manifest(&manifest_path)?;
            let mut range_table = RangeTable::load(config.resolved_range_table_path())?;

            let targets = if dataset_id == "all" {
                discover_datasets(&config.base_dir)?
            } else {
                vec![dataset_id]
            };

            for id in &targets {
                if catalog.lookup(id).is_err() {
                    catalog.register(DatasetInfo {
                        dataset_id: id.clone(),
                        sort_column: sort_column.clone(),
                        row_count_hint: None,
                    })?;
                }
                if clear {
                    range_table.clear_dataset(id);
                }
            }

            for id in &targets {
                let report = build_index(
                    &config,
                    &catalog,
                    &mut range_table,
                    id,
                    Some(&mut |done, total| {
                        if total > 0 {
                            println!("  {id}: {done}/{total} bytes scanned");
                        }
                    }),
                )?;
                if report.skipped {
                    println!(
                        "{}: already populated; skipping (pass --clear to force a rebuild)",
                        report.dataset_id
                    );
                } else {
                    println!(
                        "indexed {}: {} rows, {} subjects, {} checkpoints in {:?} (finished {})",
                        report.dataset_id,
                        report.rows_scanned,
                        report.subjects_found,
                        report.checkpoints_written,
                        report.elapsed,
                        report.finished_at.to_rfc3339(),
                    );
                }
            }

            range_table.save(config.resolved_range_table_path())?;
            catalog.save_manifest(&manifest_path)?;
        }

        Commands::Verify { dataset_id } => {
            let checkpoint_path = config.checkpoint_path(&dataset_id);
            if !checkpoint_path.exists() {
                return Err(EngineError::IndexMissing { dataset_id });
            }
            let mut reader = subrange::gzindex::GzReader::open(config.gzip_path(&dataset_id))?;
            reader.import_index(&checkpoint_path)?;
            println!(
                "{dataset_id}: {} checkpoint(s), {} uncompressed bytes",
                reader.checkpoint_count(),
                reader.uncompressed_size(),
            );

            let catalog = catalog_with_fallback(&manifest_path, &dataset_id)?;
            let range_table = RangeTable::load(config.resolved_range_table_path())?;
            let sample_subject = range_table
                .known_subjects()
                .find(|&s| matches!(range_table.get(&dataset_id, s), Some(subrange::rangetable::Range::Present { .. })));

            match sample_subject {
                None => {
                    println!("{dataset_id}: no present subject to sample against — nothing further to verify");
                }
                Some(subject_id) => {
                    let facade = Facade::new(config, catalog, range_table);
                    let started = std::time::Instant::now();
                    let batch = facade.get_one(&dataset_id, subject_id)?;
                    let elapsed = started.elapsed();
                    if batch.is_empty() {
                        return Err(EngineError::CorruptIndex {
                            dataset_id,
                            reason: format!(
                                "sample subject {subject_id} is marked present but the query returned no rows"
                            ),
                        });
                    }
                    println!(
                        "{dataset_id}: sample query for subject {subject_id} returned {} row(s) in {:?}",
                        batch.len(),
                        elapsed
                    );
                }
            }
        }

        Commands::Query { dataset_id, subject_id } => {
            let catalog = catalog_with_fallback(&manifest_path, &dataset_id)?;
            let range_table = RangeTable::load(config.resolved_range_table_path())?;
            let facade = Facade::new(config, catalog, range_table);

            let batch = facade.get_one(&dataset_id, subject_id)?;
            println!("{}", batch.header.join(","));
            for row in &batch.rows {
                println!("{}", row.values().join(","));
            }
            println!("-- {} row(s)", batch.len());
        }

        Commands::ListSubjects => {
            let range_table = RangeTable::load(config.resolved_range_table_path())?;
            for subject_id in range_table.known_subjects() {
                println!("{subject_id}");
            }
        }

        Commands::ListDatasets => {
            let catalog = Catalog::load_manifest(&manifest_path)?;
            if catalog.is_empty() {
                for id in discover_datasets(&config.base_dir)? {
                    println!("{id}");
                }
            } else {
                for id in catalog.ids() {
                    println!("{id}");
                }
            }
        }

        Commands::Info { dataset_id } => {
            let catalog = Catalog::load_manifest(&manifest_path)?;
            let range_table = RangeTable::load(config.resolved_range_table_path())?;
            let checkpoint_path = config.checkpoint_path(&dataset_id);
            let indexed = checkpoint_path.exists();
            println!("── {dataset_id} ──────────────────────────");
            println!("  gzip file      {}", config.gzip_path(&dataset_id).display());
            if let Ok(info) = catalog.lookup(&dataset_id) {
                println!("  sort column    {}", info.sort_column);
            }
            println!("  checkpoints    {}", if indexed { "built" } else { "not built" });
            if indexed {
                let mut reader = subrange::gzindex::GzReader::open(config.gzip_path(&dataset_id))?;
                reader.import_index(&checkpoint_path)?;
                println!("  checkpoint count {}", reader.checkpoint_count());
                println!("  uncompressed     {} B", reader.uncompressed_size());
            }
            println!("  table has column {}", range_table.has_columns(&dataset_id));
        }
    }

    Ok(())
}

/// Discover candidate dataset ids by scanning `base_dir` for `*.csv.gz`
/// files — the fallback used by `index all` and by `list-datasets` before
/// any catalog manifest exists.
fn discover_datasets(base_dir: &std::path::Path) -> Result<Vec<String>, EngineError> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(base_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(id) = name.strip_suffix(".csv.gz") {
            ids.push(id.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

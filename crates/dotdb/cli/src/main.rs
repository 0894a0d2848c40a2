// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! DotDB statistics CLI
//!
//! Command-line interface for analyzing indexes and moving their statistics
//! between databases.

use anyhow::{Context as _, anyhow, bail};
use clap::{Parser, Subcommand};
use dotdb_common::{Catalog, ColumnType, IndexName, InMemoryCatalog, KeyValue, TableDef, TableName};
use dotdb_stats::storage_engine::{FileBackend, IsolationLevel, TransactionManager, delete_index_rows, insert_index_rows};
use dotdb_stats::{IndexStatisticsService, StatisticsConfig, TableListener};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

const CATALOG_FILE: &str = "catalog.json";
const DATA_FILE: &str = "data.db";

#[derive(Parser)]
#[command(name = "dotdb-stats")]
#[command(about = "DotDB - Index statistics CLI")]
#[command(version = "0.1.0")]
struct Cli {
    /// Data directory for persistent storage (defaults to XDG data directory)
    #[arg(long, short = 'd', global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a table
    CreateTable {
        /// Qualified table name (schema.table)
        table: String,
        /// Columns as name:type, e.g. id:int name:text
        #[arg(required = true)]
        columns: Vec<String>,
    },
    /// Create an index over existing columns
    CreateIndex {
        /// Qualified table name (schema.table)
        table: String,
        /// Index name
        name: String,
        /// Key columns in order
        #[arg(required = true)]
        columns: Vec<String>,
    },
    /// Drop a table and its statistics
    DropTable {
        /// Qualified table name (schema.table)
        table: String,
    },
    /// Drop an index and its statistics
    DropIndex {
        /// Qualified index name (schema.table.index)
        index: String,
    },
    /// Insert a row into every index of a table
    Insert {
        /// Qualified table name (schema.table)
        table: String,
        /// Row identifier
        row_id: i64,
        /// One value per table column; `null` for no value
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Remove a row from every index of a table
    Remove {
        /// Qualified table name (schema.table)
        table: String,
        /// Row identifier
        row_id: i64,
        /// The row's values, as given to insert
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Recompute statistics for every index of a table
    Analyze {
        /// Qualified table name (schema.table)
        table: String,
    },
    /// Print the statistics of an index
    Show {
        /// Qualified index name (schema.table.index)
        index: String,
    },
    /// Write a statistics snapshot of a schema
    Dump {
        /// Schema name
        schema: String,
        /// Output file (defaults to stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Import a statistics snapshot into a schema
    Load {
        /// Schema name
        schema: String,
        /// Snapshot file
        file: PathBuf,
        /// Skip documents for tables or indexes that do not exist
        #[arg(long)]
        skip_missing: bool,
    },
    /// Delete the statistics of every index of a table
    Delete {
        /// Qualified table name (schema.table)
        table: String,
    },
}

struct Context {
    catalog_path: PathBuf,
    catalog: Arc<InMemoryCatalog>,
    transactions: Arc<TransactionManager>,
    service: IndexStatisticsService,
}

impl Context {
    fn open(data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir).with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let catalog_path = data_dir.join(CATALOG_FILE);
        let catalog = Arc::new(InMemoryCatalog::open(&catalog_path)?);
        let backend = FileBackend::open(data_dir.join(DATA_FILE))?;
        let transactions = Arc::new(TransactionManager::new(Arc::new(backend)));
        let service = IndexStatisticsService::new(catalog.clone(), transactions.clone(), StatisticsConfig::from_env()?);

        Ok(Self {
            catalog_path,
            catalog,
            transactions,
            service,
        })
    }

    fn table(&self, qualified: &str) -> anyhow::Result<Arc<TableDef>> {
        let name = TableName::parse(qualified).ok_or_else(|| anyhow!("Invalid table name '{qualified}', expected schema.table"))?;
        self.catalog.table(&name).ok_or_else(|| anyhow!("No such table: {name}"))
    }

    fn save_catalog(&self) -> anyhow::Result<()> {
        self.catalog.save(&self.catalog_path)?;
        Ok(())
    }
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let data_dir = get_data_directory(cli.data_dir);

    let context = match Context::open(&data_dir) {
        Ok(context) => context,
        Err(e) => {
            error!("Failed to open {}: {:#}", data_dir.display(), e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::CreateTable { table, columns } => handle_create_table(&context, &table, &columns),
        Commands::CreateIndex { table, name, columns } => handle_create_index(&context, &table, &name, &columns),
        Commands::DropTable { table } => handle_drop_table(&context, &table),
        Commands::DropIndex { index } => handle_drop_index(&context, &index),
        Commands::Insert { table, row_id, values } => handle_insert(&context, &table, row_id, &values),
        Commands::Remove { table, row_id, values } => handle_remove(&context, &table, row_id, &values),
        Commands::Analyze { table } => handle_analyze(&context, &table),
        Commands::Show { index } => handle_show(&context, &index),
        Commands::Dump { schema, output } => handle_dump(&context, &schema, output.as_deref()),
        Commands::Load { schema, file, skip_missing } => handle_load(&context, &schema, &file, skip_missing),
        Commands::Delete { table } => handle_delete(&context, &table),
    };

    context.service.stop();
    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        process::exit(1);
    }
}

/// Get the data directory for persistent storage with XDG compliance
fn get_data_directory(custom_dir: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = custom_dir {
        return dir;
    }

    if let Ok(xdg_data_home) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data_home).join("dotdb-stats")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local").join("share").join("dotdb-stats")
    } else {
        PathBuf::from(".dotdb-stats")
    }
}

fn parse_row(table: &TableDef, values: &[String]) -> anyhow::Result<Vec<KeyValue>> {
    if values.len() != table.columns.len() {
        bail!("{} has {} columns but {} values were given", table.name, table.columns.len(), values.len());
    }
    table
        .columns
        .iter()
        .zip(values)
        .map(|(column, value)| KeyValue::parse_as(column.column_type, value).with_context(|| format!("Invalid value for column {}", column.name)))
        .collect()
}

fn handle_create_table(context: &Context, table: &str, columns: &[String]) -> anyhow::Result<()> {
    let name = TableName::parse(table).ok_or_else(|| anyhow!("Invalid table name '{table}', expected schema.table"))?;
    let mut parsed = Vec::with_capacity(columns.len());
    for column in columns {
        let (column_name, column_type) = column.split_once(':').ok_or_else(|| anyhow!("Invalid column '{column}', expected name:type"))?;
        parsed.push((column_name, column_type.parse::<ColumnType>()?));
    }

    context.catalog.create_table(name.clone(), &parsed)?;
    context.save_catalog()?;
    println!("Table created: {name}");
    info!("Created table {} with {} columns", name, parsed.len());
    Ok(())
}

fn handle_create_index(context: &Context, table: &str, name: &str, columns: &[String]) -> anyhow::Result<()> {
    let table = context.table(table)?;
    let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
    let index = context.catalog.create_index(&table.name, name, &columns)?;
    context.save_catalog()?;
    println!("Index created: {}", index.name);
    info!("Created index {}", index.name);
    Ok(())
}

fn handle_drop_table(context: &Context, table: &str) -> anyhow::Result<()> {
    let table = context.table(table)?;
    let mut txn = context.transactions.begin(IsolationLevel::ReadCommitted);
    context.service.on_drop_table(&mut txn, &table)?;
    txn.commit()?;

    context.catalog.drop_table(&table.name)?;
    context.save_catalog()?;
    println!("Table dropped: {}", table.name);
    Ok(())
}

fn handle_drop_index(context: &Context, index: &str) -> anyhow::Result<()> {
    let name = IndexName::parse(index).ok_or_else(|| anyhow!("Invalid index name '{index}', expected schema.table.index"))?;
    let definition = context.catalog.index(&name).ok_or_else(|| anyhow!("No such index: {name}"))?;
    let mut txn = context.transactions.begin(IsolationLevel::ReadCommitted);
    context.service.on_drop_index(&mut txn, &[definition])?;
    txn.commit()?;

    context.catalog.drop_index(&name)?;
    context.save_catalog()?;
    println!("Index dropped: {name}");
    Ok(())
}

fn handle_insert(context: &Context, table: &str, row_id: i64, values: &[String]) -> anyhow::Result<()> {
    let table = context.table(table)?;
    let row = parse_row(&table, values)?;

    let mut txn = context.transactions.begin(IsolationLevel::ReadCommitted);
    insert_index_rows(&mut txn, &table, row_id, &row)?;
    txn.commit()?;
    println!("Row {row_id} inserted into {}", table.name);
    Ok(())
}

fn handle_remove(context: &Context, table: &str, row_id: i64, values: &[String]) -> anyhow::Result<()> {
    let table = context.table(table)?;
    let row = parse_row(&table, values)?;

    let mut txn = context.transactions.begin(IsolationLevel::ReadCommitted);
    let removed = delete_index_rows(&mut txn, &table, row_id, &row)?;
    txn.commit()?;
    if removed {
        println!("Row {row_id} removed from {}", table.name);
    } else {
        println!("Row {row_id} not found in {}", table.name);
    }
    Ok(())
}

fn handle_analyze(context: &Context, table: &str) -> anyhow::Result<()> {
    let table = context.table(table)?;
    let mut txn = context.transactions.begin(IsolationLevel::ReadCommitted);
    let updated = context.service.update(&mut txn, &table.indexes)?;
    txn.commit()?;

    for (name, stats) in &updated {
        println!("{}: {} rows, {} histograms", name, stats.row_count(), stats.histogram_count());
    }
    info!("Analyzed {} indexes of {}", updated.len(), table.name);
    Ok(())
}

fn handle_show(context: &Context, index: &str) -> anyhow::Result<()> {
    let name = IndexName::parse(index).ok_or_else(|| anyhow!("Invalid index name '{index}', expected schema.table.index"))?;
    let definition = context.catalog.index(&name).ok_or_else(|| anyhow!("No such index: {name}"))?;
    let table = context.catalog.table(&name.table).ok_or_else(|| anyhow!("No such table: {}", name.table))?;

    let Some(stats) = context.service.get(&definition)? else {
        println!("No statistics for {name}");
        return Ok(());
    };

    let observed = context.transactions.begin(IsolationLevel::ReadCommitted).approximate_row_count(table.id);
    if context.service.check_row_count_changed(&table, &stats, observed) {
        println!("Statistics for {name} are outdated ({} rows recorded, {} now)", stats.row_count(), observed);
    }

    println!("{stats}");
    for histogram in stats.histograms() {
        println!("  columns {}..{}:", histogram.first_column(), histogram.first_column() + histogram.column_count());
        for entry in histogram.entries() {
            println!("    {} eq={} lt={} distinct={}", entry.key_string, entry.equal_count, entry.less_count, entry.distinct_count);
        }
    }
    Ok(())
}

fn handle_dump(context: &Context, schema: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let count = match output {
        Some(path) => context.service.dump_to_file(schema, path)?,
        None => context.service.dump(schema, io::stdout().lock())?,
    };
    info!("Dumped statistics for {} indexes of {}", count, schema);
    Ok(())
}

fn handle_load(context: &Context, schema: &str, file: &Path, skip_missing: bool) -> anyhow::Result<()> {
    let mut txn = context.transactions.begin(IsolationLevel::ReadCommitted);
    let count = context.service.load_from_file(&mut txn, schema, file, skip_missing)?;
    txn.commit()?;
    println!("Loaded statistics for {count} indexes into {schema}");
    Ok(())
}

fn handle_delete(context: &Context, table: &str) -> anyhow::Result<()> {
    let table = context.table(table)?;
    let mut txn = context.transactions.begin(IsolationLevel::ReadCommitted);
    context.service.delete(&mut txn, &table.indexes)?;
    txn.commit()?;
    println!("Statistics deleted for {}", table.name);
    Ok(())
}

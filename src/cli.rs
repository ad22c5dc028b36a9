use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_CSV_FILE: &str = "purchases.csv";
pub const DEFAULT_TABLE_NAME: &str = "stocks_transactions";
pub const DEFAULT_CONFIG_FILE: &str = "trino_config.yaml";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Insert CSV data into an existing Trino table using the table's own columns",
    long_about = None
)]
pub struct Cli {
    /// Path to the CSV file
    #[arg(default_value = DEFAULT_CSV_FILE)]
    pub csv_file: PathBuf,
    /// Target table name, optionally qualified as `schema.table`
    #[arg(default_value = DEFAULT_TABLE_NAME)]
    pub table_name: String,
    /// Path to the YAML or JSON connection config
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
}

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use framesql::ast::parse_single_with;
use framesql::{export, AdapterConfig, QueryError, QueryExecutor, QuerySession, Relation};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
    Tsv,
    Json,
}

/// Run a single-table SELECT over a JSON array of records
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The query; the table name in FROM is free
    sql: String,

    /// Read records from this file instead of stdin
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// Current database, returned by DATABASE()
    #[arg(long)]
    database: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the engine SQL and resolved column names instead of running
    #[arg(long)]
    explain: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        match err.downcast_ref::<QueryError>() {
            Some(query_err) => eprintln!("{}", query_err.display_full()),
            None => eprintln!("Error: {err:#}"),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match cli.config {
        Some(ref path) => AdapterConfig::load_from(path)?,
        None => AdapterConfig::load()?,
    };
    let session = cli.database.clone().map(QuerySession::with_database);
    let relation = Relation::from_json_str(&read_input(cli.input.as_deref())?)?;
    let executor = QueryExecutor::from_config(&config)?;

    if cli.explain {
        let query = parse_single_with(&cli.sql, config.query.dialect)?;
        let prepared = executor.prepare(&query, &relation.column_names(), session.as_ref())?;
        println!("table:   {}", prepared.table_name);
        println!("alias:   {}", config.query.table_alias);
        println!("sql:     {}", prepared.sql);
        println!("columns: {}", prepared.output_names.join(", "));
        if !prepared.json_columns.is_empty() {
            let json: Vec<&str> = prepared.json_columns.iter().map(String::as_str).collect();
            println!("json:    {}", json.join(", "));
        }
        return Ok(());
    }

    let result = executor.query_sql(&cli.sql, relation, session.as_ref())?;
    let output = match cli.format {
        OutputFormat::Table => export::to_table(&result),
        OutputFormat::Csv => export::to_csv(&result),
        OutputFormat::Tsv => export::to_tsv(&result),
        OutputFormat::Json => export::to_json(&result) + "\n",
    };
    print!("{}", output);
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read records from stdin")?;
            Ok(buffer)
        }
    }
}

//! pglite-client — check and query a PostgreSQL server through either driver
//!
//! # Usage
//!
//! ```bash
//! # Is the server up?
//! pglite-client ping --database-url postgres://postgres@localhost/postgres
//!
//! # Run a statement with the non-blocking driver
//! pglite-client --client nonblocking exec 'SELECT $1::int8 * 2' --bind 21
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use pglite_client::prelude::*;
use pglite_client::utils;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pglite-client")]
#[command(version)]
#[command(about = "Query PostgreSQL through the blocking or non-blocking driver", long_about = None)]
#[command(after_help = "EXAMPLES:
    pglite-client ping
    pglite-client version --client nonblocking
    pglite-client exec 'SELECT * FROM users WHERE id = $1' --bind 42
    pglite-client tables --schema public --format json")]
struct Cli {
    /// Driver to use: auto, blocking, nonblocking
    #[arg(short, long, global = true)]
    client: Option<String>,

    /// Database connection URL
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Config file (default: ./pglite-client.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run `SELECT 1`
    Ping,
    /// Print the server version
    Version,
    /// Execute one SQL statement
    Exec {
        /// The statement to run
        sql: String,

        /// Parameter bindings ($1, $2, etc.)
        #[arg(short, long, value_delimiter = ',')]
        bind: Vec<String>,
    },
    /// List base tables in a schema
    Tables {
        #[arg(short, long, default_value = "public")]
        schema: String,
    },
    /// Check whether a table exists
    Exists {
        table: String,

        #[arg(short, long, default_value = "public")]
        schema: String,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(name) = &cli.client {
        config.client = name.parse()?;
    }
    if let Some(url) = &cli.database_url {
        config.database_url = Some(url.clone());
    }

    init_logging(&config.log_filter, cli.verbose)?;

    let client = config.client()?;
    let url = config
        .database_url
        .as_deref()
        .context("No database URL. Use --database-url or set DATABASE_URL")?;

    if cli.verbose {
        println!("{} {} client", "Using".dimmed(), client.kind().to_string().cyan());
    }

    match &cli.command {
        Commands::Ping => {
            if utils::check_connection(&client, url) {
                println!("{} server is reachable", "✓".green());
                Ok(())
            } else {
                anyhow::bail!("server did not answer SELECT 1")
            }
        }
        Commands::Version => {
            let version = utils::database_version(&client, url)
                .context("could not read the server version")?;
            println!("{}", version);
            if let Some(major) = utils::major_version(&version) {
                println!("{} {}", "Major version:".dimmed(), major.to_string().cyan());
            }
            Ok(())
        }
        Commands::Exec { sql, bind } => {
            let params: Vec<PgValue> = bind.iter().map(|b| PgValue::parse_literal(b)).collect();
            if cli.verbose {
                for (i, p) in params.iter().enumerate() {
                    println!("  ${} = {}", i + 1, p.to_string().yellow());
                }
            }

            let mut conn = client.connect(url)?;
            let result = client.execute_query(&mut conn, sql, &params);
            client.close_connection(&mut conn)?;

            print_rows(&result?, cli.format);
            Ok(())
        }
        Commands::Tables { schema } => {
            let tables = utils::table_names(&client, url, schema);
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tables)?),
                OutputFormat::Table => {
                    println!("{} {}", "Tables in".green().bold(), schema.cyan());
                    for table in &tables {
                        println!("  {}", table);
                    }
                }
            }
            Ok(())
        }
        Commands::Exists { table, schema } => {
            let exists = utils::table_exists(&client, url, table, schema);
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "exists": exists })),
                OutputFormat::Table if exists => println!("{} {}.{}", "✓".green(), schema, table),
                OutputFormat::Table => println!("{} {}.{}", "✗".red(), schema, table),
            }
            Ok(())
        }
    }
}

fn init_logging(configured: &str, verbose: bool) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(rust_log.as_deref(), configured, verbose)?)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// `RUST_LOG` wins over `--verbose`, which wins over the configured filter.
fn log_filter(rust_log: Option<&str>, configured: &str, verbose: bool) -> Result<EnvFilter> {
    let directives = match rust_log {
        Some(env) if !env.trim().is_empty() => env,
        _ if verbose => "pglite_client=debug",
        _ => configured,
    };
    Ok(EnvFilter::try_new(directives)?)
}

fn print_rows(rows: &ResultSet, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let json: Vec<Vec<serde_json::Value>> = rows
                .iter()
                .map(|row| row.iter().map(PgValue::to_json).collect())
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "(no rows)".dimmed());
                return;
            }
            for row in rows {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                println!("{}", cells.join(" | "));
            }
            println!();
            println!("{} {}", rows.len().to_string().cyan(), "row(s)".dimmed());
        }
    }
}

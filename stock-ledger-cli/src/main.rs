//! Stock ledger CLI
//!
//! Runs schema migrations and the ledger operations (sync, carry-forward, period
//! locking) against PostgreSQL. Results are printed as JSON.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use stock_ledger::connection::connect;
use stock_ledger::migration::Migrator;
use stock_ledger::{AuthContext, LedgerConfig, LedgerId, LedgerService, OwnerId, PeriodId, PgStore};

#[derive(Parser)]
#[command(name = "stock-ledger")]
#[command(about = "Period ledger and carry-forward tool")]
#[command(version)]
struct Cli {
    /// Database connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// Configuration file (TOML); defaults to config/config.toml plus environment
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Owner the ledger commands act for
    #[arg(long, global = true)]
    owner: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the ledger schema
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Create the period for a month, with an empty ledger entry
    CreatePeriod {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
    },

    /// Reconcile every period of an owner in chronological order
    SyncAll,

    /// Reconcile one period and everything after it
    SyncPeriod {
        #[arg(long)]
        period: i64,
    },

    /// Reconcile the period owning a ledger entry
    Recalculate {
        #[arg(long)]
        ledger: i64,
    },

    /// Copy unsold stock from one period into another
    CarryForward {
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
    },

    /// Lock a period against ledger-affecting changes
    Lock {
        #[arg(long)]
        period: i64,
    },

    /// Make a period the owner's active one
    Activate {
        #[arg(long)]
        period: i64,
    },

    /// Every period of an owner with its ledger entry and chain check
    Summary,

    /// Check the balance and continuity invariants of an owner's chain
    Verify,
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Show applied vs pending migrations
    Status,

    /// Apply pending migrations
    Up {
        /// Number of migrations to apply (default: all pending)
        #[arg(long)]
        steps: Option<usize>,
    },

    /// Roll back migrations
    Down {
        /// Number of migrations to roll back
        #[arg(long, default_value = "1")]
        steps: usize,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(2),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<LedgerConfig> {
    match path {
        Some(path) => {
            let toml = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(LedgerConfig::from_toml(&toml)?)
        }
        None => Ok(LedgerConfig::load()?),
    }
}

/// Flag, then `STOCK_LEDGER__DATABASE__URL`, then `DATABASE_URL`, then the config file.
fn database_url(flag: Option<String>, config: &LedgerConfig) -> String {
    flag.or_else(|| std::env::var("STOCK_LEDGER__DATABASE__URL").ok())
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| config.database.url.clone())
}

fn caller(owner: Option<i64>) -> Result<AuthContext> {
    match owner {
        Some(owner) => Ok(AuthContext::new(OwnerId(owner))),
        None => bail!("--owner is required for ledger commands"),
    }
}

/// Returns whether the operation reported success.
fn run(cli: Cli) -> Result<bool> {
    let config = load_config(cli.config.as_ref())?;
    let url = database_url(cli.database_url, &config);
    let client = connect(&url).context("connecting to database")?;
    let store = PgStore::with_isolation(client, config.database.isolation);
    let service = LedgerService::with_config(store, &config.reconcile);

    if let Commands::Migrate { action } = &cli.command {
        let migrator = Migrator::ledger()?.with_config(&config.migration);
        handle_migrate(&migrator, service.store(), action)?;
        return Ok(true);
    }

    let ctx = caller(cli.owner)?;
    let ok = match cli.command {
        Commands::Migrate { .. } => true,
        Commands::CreatePeriod { year, month } => {
            let period = service.create_period(&ctx, year, month)?;
            print_json(&period)?;
            true
        }
        Commands::SyncAll => report(service.sync_all(&ctx))?,
        Commands::SyncPeriod { period } => report(service.sync_period(&ctx, PeriodId(period)))?,
        Commands::Recalculate { ledger } => report(service.recalculate(&ctx, LedgerId(ledger)))?,
        Commands::CarryForward { from, to } => {
            let result = service.carry_forward(&ctx, PeriodId(from), PeriodId(to));
            print_json(&result)?;
            result.success
        }
        Commands::Lock { period } => report(service.lock_period(&ctx, PeriodId(period)))?,
        Commands::Activate { period } => report(service.activate_period(&ctx, PeriodId(period)))?,
        Commands::Summary => {
            let summary = service.summary(&ctx)?;
            print_json(&summary)?;
            summary.check.is_consistent()
        }
        Commands::Verify => {
            let check = service.verify_chain(&ctx)?;
            print_json(&check)?;
            check.is_consistent()
        }
    };
    Ok(ok)
}

fn report(result: stock_ledger::OperationResult) -> Result<bool> {
    print_json(&result)?;
    Ok(result.success)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn handle_migrate(migrator: &Migrator, store: &PgStore, action: &MigrateAction) -> Result<()> {
    let executor = store.executor();
    match action {
        MigrateAction::Status => {
            let status = migrator.status(executor)?;
            println!("Applied migrations ({}):", status.applied.len());
            for record in &status.applied {
                let took = record
                    .execution_time_ms
                    .map(|ms| format!("{ms}ms"))
                    .unwrap_or_else(|| "N/A".to_string());
                println!(
                    "  m{}_{} ({}, {took})",
                    record.version,
                    record.name,
                    record.applied_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            println!("Pending migrations ({}):", status.pending.len());
            for pending in &status.pending {
                println!("  m{}_{}", pending.version, pending.name);
            }
        }
        MigrateAction::Up { steps } => {
            let applied = migrator.up(executor, *steps)?;
            println!("Applied {applied} migration(s)");
        }
        MigrateAction::Down { steps } => {
            if *steps == 0 {
                bail!("--steps must be at least 1");
            }
            let rolled_back = migrator.down(executor, Some(*steps))?;
            println!("Rolled back {rolled_back} migration(s)");
        }
    }
    Ok(())
}

//! ledger - deterministic command core for a personal transaction ledger.

use std::io::Read;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use ledger_core::cli::{Cli, Command};
use ledger_core::config::Config;
use ledger_core::dates;
use ledger_core::db::{self, TransactionStore};
use ledger_core::error::{LedgerError, Result};
use ledger_core::gateway::{Instruction, InstructionGateway};
use ledger_core::logging;
use ledger_core::safety::{validate_sql, OperationKind, ParameterValues};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    if cli.log_file {
        logging::init_file_logging();
    } else {
        logging::init_stderr_logging();
    }

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<LedgerError>() {
            Some(err) => error!("{}: {}", err.category(), err),
            None => error!("{e:#}"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.clone() {
        Command::Resolve { phrase, today } => {
            let range = dates::resolve(&phrase, reference_date(today))?;
            let output = serde_json::json!({
                "phrase": phrase,
                "start": range.start(),
                "end": range.end(),
                "last_day": range.last_day(),
                "days": range.day_count(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Validate {
            op,
            sql,
            phrase,
            amount,
            remark,
            id,
            today,
        } => {
            let today = reference_date(today);
            let range = phrase
                .as_deref()
                .map(|p| dates::resolve(p, today))
                .transpose()?;
            let values = ParameterValues {
                entry_date: (op == OperationKind::Insert && range.is_none()).then_some(today),
                range,
                amount,
                remark,
                record_id: id,
            };

            let verdict = validate_sql(&sql, op, &values);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
        Command::Run {
            instruction,
            caller,
            today,
        } => {
            let text = read_instruction(&instruction)?;
            let instruction = Instruction::from_json(&text)?;

            let config = load_config(&cli)?;
            let store = open_store(&config).await?;
            let gateway = InstructionGateway::new(store.clone(), &config);

            let response = gateway
                .handle(&caller, &instruction, reference_date(today))
                .await;
            println!("{}", response.to_json()?);
            store.close().await?;
        }
        Command::InitSchema => {
            let config = load_config(&cli)?;
            let store = open_store(&config).await?;
            store.ensure_schema().await?;
            println!("OK: Schema ready on {}", config.store.display_string());
            store.close().await?;
        }
        Command::Check => {
            let config = load_config(&cli)?;
            let store = open_store(&config).await?;
            let count = store.health_check().await?;
            println!(
                "OK: Connected to {} ({} records)",
                config.store.display_string(),
                count
            );
            store.close().await?;
        }
    }

    Ok(())
}

/// Loads the config file and resolves the store with precedence:
/// 1. `--database-url`
/// 2. Config file
/// 3. Environment variables
fn load_config(cli: &Cli) -> Result<Config> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;

    config.store = cli.store_config(&config.store)?;
    if config.store.is_unset() {
        return Err(LedgerError::config(
            "No store configured. Use --database-url, DATABASE_URL or [store] in the config file",
        ));
    }

    Ok(config)
}

async fn open_store(config: &Config) -> Result<Arc<dyn TransactionStore>> {
    info!("Store: {}", config.store.display_string());
    db::connect(&config.store).await
}

fn read_instruction(source: &str) -> anyhow::Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read instruction from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read instruction file {source}"))
    }
}

fn reference_date(today: Option<NaiveDate>) -> NaiveDate {
    today.unwrap_or_else(|| Local::now().date_naive())
}

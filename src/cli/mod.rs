use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;

use crate::api::{ApiResponse, LedgerApi};
use crate::application::BalanceService;
use crate::domain::format_cents;
use crate::storage::StoreConfig;

/// Tally - per-user balance ledger
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "A transactional per-user balance ledger with an append-only history")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "TALLY_DATABASE", default_value = "tally.db", global = true)]
    pub database: PathBuf,

    /// Milliseconds to wait for the ledger write lock before giving up
    #[arg(long, env = "TALLY_BUSY_TIMEOUT_MS", default_value_t = 5000, global = true)]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled database connections
    #[arg(long, env = "TALLY_MAX_CONNECTIONS", default_value_t = 5, global = true)]
    pub max_connections: u32,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// User directory commands
    #[command(subcommand)]
    User(UserCommands),

    /// Show the balance of a user
    Balance {
        /// User id
        #[arg(allow_negative_numbers = true)]
        user_id: i64,
    },

    /// Credit funds to a user
    Deposit {
        /// User id
        #[arg(allow_negative_numbers = true)]
        user_id: i64,

        /// Amount to deposit (e.g., "50.25" or "50")
        #[arg(allow_negative_numbers = true)]
        amount: String,

        /// Free-text comment (up to 255 characters)
        #[arg(short, long)]
        comment: Option<String>,
    },

    /// Debit funds from a user
    Withdraw {
        /// User id
        #[arg(allow_negative_numbers = true)]
        user_id: i64,

        /// Amount to withdraw (e.g., "50.25" or "50")
        #[arg(allow_negative_numbers = true)]
        amount: String,

        /// Free-text comment (up to 255 characters)
        #[arg(short, long)]
        comment: Option<String>,
    },

    /// Move funds from one user to another
    Transfer {
        /// Sender user id
        #[arg(allow_negative_numbers = true)]
        from: i64,

        /// Recipient user id
        #[arg(allow_negative_numbers = true)]
        to: i64,

        /// Amount to transfer (e.g., "50.25" or "50")
        #[arg(allow_negative_numbers = true)]
        amount: String,

        /// Free-text comment (up to 255 characters)
        #[arg(short, long)]
        comment: Option<String>,
    },

    /// Verify ledger integrity
    Check,
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a new user
    Create {
        /// Display name
        name: String,
    },

    /// Show a user
    Show {
        /// User id
        #[arg(allow_negative_numbers = true)]
        id: i64,
    },
}

impl Cli {
    /// Default log filter when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose { "tally=debug" } else { "warn" }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.database)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .with_max_connections(self.max_connections)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.store_config();

        match self.command {
            Commands::Init => {
                BalanceService::init(&config).await?;
                println!("Database initialized: {}", config.database_path.display());
            }

            Commands::User(user_cmd) => {
                let service = BalanceService::connect(&config).await?;
                run_user_command(&service, user_cmd).await?;
            }

            Commands::Balance { user_id } => {
                let api = connect_api(&config).await?;
                respond(api.balance(user_id).await)?;
            }

            Commands::Deposit {
                user_id,
                amount,
                comment,
            } => {
                let api = connect_api(&config).await?;
                let body = json!({ "user_id": user_id, "amount": amount, "comment": comment });
                respond(api.deposit(&body).await)?;
            }

            Commands::Withdraw {
                user_id,
                amount,
                comment,
            } => {
                let api = connect_api(&config).await?;
                let body = json!({ "user_id": user_id, "amount": amount, "comment": comment });
                respond(api.withdraw(&body).await)?;
            }

            Commands::Transfer {
                from,
                to,
                amount,
                comment,
            } => {
                let api = connect_api(&config).await?;
                let body = json!({
                    "from_user_id": from,
                    "to_user_id": to,
                    "amount": amount,
                    "comment": comment,
                });
                respond(api.transfer(&body).await)?;
            }

            Commands::Check => {
                let service = BalanceService::connect(&config).await?;
                run_check_command(&service).await?;
            }
        }

        Ok(())
    }
}

async fn connect_api(config: &StoreConfig) -> Result<LedgerApi> {
    Ok(LedgerApi::new(BalanceService::connect(config).await?))
}

/// Print the response envelope; a failed request makes the process exit non-zero.
fn respond(response: ApiResponse) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&response.body)?);
    if !response.is_success() {
        anyhow::bail!("Request failed with status {}", response.status);
    }
    Ok(())
}

async fn run_user_command(service: &BalanceService, cmd: UserCommands) -> Result<()> {
    match cmd {
        UserCommands::Create { name } => {
            let user = service.create_user(&name).await?;
            println!("Created user: {} (id {})", user.name, user.id);
        }
        UserCommands::Show { id } => {
            let user = service.get_user(id).await?;
            let balance = service.get_balance(id).await?;
            println!("User: {}", user.name);
            println!("  ID:       {}", user.id);
            println!("  Created:  {}", user.created_at.format("%Y-%m-%d %H:%M:%S"));
            println!("  Balance:  {}", format_cents(balance.balance));
        }
    }
    Ok(())
}

async fn run_check_command(service: &BalanceService) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity().await?;

    println!("Users:        {}", report.user_count);
    println!("Balances:     {}", report.balance_count);
    println!("Transactions: {}", report.transaction_count);
    println!();
    println!("  {:<22} {:>16}", "Total balance:", format_cents(report.total_balance));
    println!(
        "  {:<22} {:>16}  {}",
        "Deposits - withdrawals:",
        format_cents(report.net_deposits),
        if report.is_balanced() { "OK" } else { "UNBALANCED!" }
    );
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}

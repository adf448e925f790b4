use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use uuid::Uuid;

use crate::application::LedgerService;
use crate::config::LedgerConfig;
use crate::domain::{
    format_cents, parse_cents, Account, AccountType, Movement, MovementType, NewAccount,
    PostingRequest, TransferRequest,
};
use crate::telemetry;

/// bankledger - accounts, postings and atomic transfers
#[derive(Parser)]
#[command(name = "bankledger")]
#[command(about = "A banking ledger: accounts, postings and atomic transfers")]
#[command(version)]
pub struct Cli {
    /// Database file path (overrides LEDGER_DATABASE_URL)
    #[arg(short, long)]
    pub database: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Post a single debit or credit to an account
    Post {
        /// Account id or number
        account: String,

        /// debit or credit
        movement_type: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Description of the posting
        #[arg(short, long)]
        description: Option<String>,

        /// Channel the posting came through (e.g., "ATM", "BRANCH")
        #[arg(short, long)]
        channel: Option<String>,
    },

    /// Transfer money between two accounts
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Source account id or number
        #[arg(long)]
        from: String,

        /// Destination account id or number
        #[arg(long)]
        to: String,

        /// Description of the transfer
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List an account's movements, newest first
    Movements {
        /// Account id or number
        account: String,

        /// Maximum number of movements to show (defaults to LEDGER_PAGE_SIZE)
        #[arg(short, long)]
        limit: Option<u32>,

        /// Number of newer movements to skip
        #[arg(long, default_value = "0")]
        offset: u32,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Show one movement
    Movement {
        /// Movement ID
        id: String,
    },

    /// Verify that balances agree with the movement log
    Check,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account
    Open {
        /// Human-facing account number
        number: String,

        /// Owning customer ID
        #[arg(long)]
        customer: Uuid,

        /// Owning branch ID
        #[arg(long)]
        branch: Uuid,

        /// Account type: savings, checking, business
        #[arg(short = 't', long = "type", default_value = "checking")]
        account_type: String,

        /// Opening balance (e.g., "100.00")
        #[arg(long, default_value = "0")]
        initial_balance: String,
    },

    /// Show account details
    Show {
        /// Account id or number
        account: String,
    },

    /// List a customer's accounts, newest first
    List {
        /// Customer ID
        customer: Uuid,
    },

    /// Close an account
    Close {
        /// Account id or number
        account: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl Cli {
    fn config(&self) -> Result<LedgerConfig> {
        let config = LedgerConfig::from_env().context("Invalid ledger configuration")?;
        Ok(match &self.database {
            Some(path) => config.with_database_url(format!("sqlite:{}", path)),
            None => config,
        })
    }

    pub async fn run(self) -> Result<()> {
        telemetry::init(if self.verbose { "debug" } else { "warn" }, self.log_json);

        let config = self.config()?;
        let json = self.json;

        match self.command {
            Commands::Init => {
                let url = config.database_url.clone();
                LedgerService::init(config).await?;
                println!("Database initialized: {}", url);
            }

            Commands::Account(account_cmd) => {
                let service = LedgerService::connect(config).await?;
                run_account_command(&service, account_cmd, json).await?;
            }

            Commands::Post {
                account,
                movement_type,
                amount,
                description,
                channel,
            } => {
                let service = LedgerService::connect(config).await?;
                let account = service.resolve_account(&account).await?;
                let movement_type: MovementType = movement_type
                    .parse()
                    .context("Movement type must be 'debit' or 'credit'")?;
                let amount =
                    parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;

                let mut request = PostingRequest::new(account.id, movement_type, amount);
                request.description = description;
                request.channel = channel;

                let movement = service.engine().post(request).await?;
                if json {
                    print_json(&movement)?;
                } else {
                    println!(
                        "Posted {} {} on {} ({})",
                        movement.movement_type,
                        format_cents(movement.amount),
                        account.number,
                        movement.id
                    );
                }
            }

            Commands::Transfer {
                amount,
                from,
                to,
                description,
            } => {
                let service = LedgerService::connect(config).await?;
                let from_account = service.resolve_account(&from).await?;
                let to_account = service.resolve_account(&to).await?;
                let amount_cents =
                    parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;

                let mut request = TransferRequest::new(from_account.id, to_account.id, amount_cents);
                request.description = description;

                let receipt = service.engine().transfer(request).await?;
                if json {
                    print_json(&receipt)?;
                } else {
                    println!(
                        "Transferred {}: {} -> {} (debit {}, credit {})",
                        format_cents(amount_cents),
                        from_account.number,
                        to_account.number,
                        receipt.debit.id,
                        receipt.credit.id
                    );
                }
            }

            Commands::Movements {
                account,
                limit,
                offset,
                format,
            } => {
                let service = LedgerService::connect(config).await?;
                let account = service.resolve_account(&account).await?;
                let movements = service.movements(account.id, limit, offset).await?;
                let format = if json { OutputFormat::Json } else { format };
                print_movements(&account, &movements, format)?;
            }

            Commands::Movement { id } => {
                let service = LedgerService::connect(config).await?;
                let movement_id = Uuid::parse_str(&id).context("Invalid movement ID")?;
                let movement = service.engine().get(movement_id).await?;
                if json {
                    print_json(&movement)?;
                } else {
                    print_movement_detail(&movement);
                }
            }

            Commands::Check => {
                let service = LedgerService::connect(config).await?;
                run_check_command(&service, json).await?;
            }
        }

        Ok(())
    }
}

async fn run_account_command(
    service: &LedgerService,
    cmd: AccountCommands,
    json: bool,
) -> Result<()> {
    match cmd {
        AccountCommands::Open {
            number,
            customer,
            branch,
            account_type,
            initial_balance,
        } => {
            let account_type: AccountType = account_type.parse().map_err(|e| {
                anyhow::anyhow!("{}. Valid types: savings, checking, business", e)
            })?;
            let initial_balance = parse_cents(&initial_balance)
                .context("Invalid initial balance. Use '50.00' or '50'")?;

            let account = service
                .accounts()
                .open(
                    NewAccount::new(customer, branch, account_type, number)
                        .with_initial_balance(initial_balance),
                )
                .await?;

            if json {
                print_json(&account)?;
            } else {
                println!(
                    "Opened account: {} ({}, {})",
                    account.number, account.account_type, account.id
                );
            }
        }

        AccountCommands::Show { account } => {
            let account = service.resolve_account(&account).await?;
            if json {
                print_json(&account)?;
            } else {
                print_account_detail(&account);
            }
        }

        AccountCommands::List { customer } => {
            let accounts = service.accounts().list_by_customer(customer).await?;
            if json {
                print_json(&accounts)?;
            } else if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!(
                    "{:<16} {:<10} {:<8} {:>14} {:<20}",
                    "NUMBER", "TYPE", "STATUS", "BALANCE", "OPENED"
                );
                println!("{}", "-".repeat(72));
                for account in accounts {
                    println!(
                        "{:<16} {:<10} {:<8} {:>14} {:<20}",
                        truncate(&account.number, 16),
                        account.account_type,
                        account.status,
                        format_cents(account.balance),
                        account.opened_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }

        AccountCommands::Close { account } => {
            let account = service.resolve_account(&account).await?;
            service.accounts().close(account.id).await?;
            let closed = service.accounts().get(account.id).await?;
            if json {
                print_json(&closed)?;
            } else {
                println!(
                    "Closed account: {} (final balance {})",
                    closed.number,
                    format_cents(closed.balance)
                );
            }
        }
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService, json: bool) -> Result<()> {
    let report = service.check_integrity().await?;

    if json {
        print_json(&report)?;
    } else {
        println!("Checking ledger integrity...\n");
        println!("Accounts:  {}", report.account_count);
        println!("Movements: {}", report.movement_count);
        println!();
        println!("  {:<16} {:>14}", "Recorded:", format_cents(report.total_balance));
        println!("  {:<16} {:>14}", "From movements:", format_cents(report.expected_total));
        println!();

        if report.is_healthy() {
            println!("Ledger is consistent.");
        } else {
            println!("Issues found:");
            for issue in &report.issues {
                println!("  - {}", issue);
            }
        }
    }

    if !report.is_healthy() {
        anyhow::bail!("Ledger integrity check failed");
    }
    Ok(())
}

fn print_account_detail(account: &Account) {
    println!("Account: {}", account.number);
    println!("  ID:              {}", account.id);
    println!("  Type:            {}", account.account_type);
    println!("  Status:          {}", account.status);
    println!("  Customer:        {}", account.customer_id);
    println!("  Branch:          {}", account.branch_id);
    println!("  Balance:         {}", format_cents(account.balance));
    println!("  Opening balance: {}", format_cents(account.opening_balance));
    println!(
        "  Opened:          {}",
        account.opened_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(closed) = account.closed_at {
        println!("  Closed:          {}", closed.format("%Y-%m-%d %H:%M:%S"));
    }
}

fn print_movement_detail(movement: &Movement) {
    println!("Movement: {}", movement.id);
    println!("  Account:     {}", movement.account_id);
    println!("  Type:        {}", movement.movement_type);
    println!("  Amount:      {}", format_cents(movement.amount));
    println!("  Sequence:    {}", movement.sequence);
    println!(
        "  Created:     {}",
        movement.created_at.format("%Y-%m-%d %H:%M:%S%.6f")
    );
    if let Some(desc) = &movement.description {
        println!("  Description: {}", desc);
    }
    if let Some(channel) = &movement.channel {
        println!("  Channel:     {}", channel);
    }
}

/// One movement as a flat CSV record.
#[derive(Serialize)]
struct MovementRecord<'a> {
    id: String,
    sequence: i64,
    created_at: String,
    movement_type: &'a str,
    amount: String,
    channel: &'a str,
    description: &'a str,
}

impl<'a> From<&'a Movement> for MovementRecord<'a> {
    fn from(movement: &'a Movement) -> Self {
        Self {
            id: movement.id.to_string(),
            sequence: movement.sequence,
            created_at: movement.created_at.to_rfc3339(),
            movement_type: movement.movement_type.as_str(),
            amount: format_cents(movement.amount),
            channel: movement.channel.as_deref().unwrap_or(""),
            description: movement.description.as_deref().unwrap_or(""),
        }
    }
}

fn print_movements(account: &Account, movements: &[Movement], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&movements)?,
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            for movement in movements {
                writer.serialize(MovementRecord::from(movement))?;
            }
            writer.flush()?;
        }
        OutputFormat::Table => {
            println!(
                "Account {} - balance {}\n",
                account.number,
                format_cents(account.balance)
            );
            if movements.is_empty() {
                println!("No movements found.");
                return Ok(());
            }
            println!(
                "{:<20} {:<7} {:>12} {:<10} {:<30}",
                "DATE", "TYPE", "AMOUNT", "CHANNEL", "DESCRIPTION"
            );
            println!("{}", "-".repeat(82));
            for movement in movements {
                println!(
                    "{:<20} {:<7} {:>12} {:<10} {:<30}",
                    movement.created_at.format("%Y-%m-%d %H:%M:%S"),
                    movement.movement_type,
                    format_cents(movement.signed_amount()),
                    truncate(movement.channel.as_deref().unwrap_or("-"), 10),
                    truncate(movement.description.as_deref().unwrap_or(""), 30)
                );
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

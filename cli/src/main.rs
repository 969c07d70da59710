// slotpost: command-line mail over a shared storage directory
//
// Every account points at the same network directory; `slotpost run` polls
// for mail and (re)inserts whatever is queued.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use config::Config;
use slotpost_core::{
    DeliveryDelegate, DeliveryEvent, DirectoryNetwork, NetworkClient, Slotpost, SystemClock,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slotpost")]
#[command(about = "Store-and-forward mail over a key-value storage network", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the account and publish its mailsite
    Init,
    /// Show identity information
    Identity,
    /// Show contacts, queues and mailbox size
    Status,
    /// Manage contacts
    Contact {
        #[command(subcommand)]
        action: ContactAction,
    },
    /// Queue a message for a contact
    Send { recipient: String, message: String },
    /// Show received mail
    Inbox {
        #[arg(short, long)]
        from: Option<String>,
    },
    /// Run the delivery loop
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
        /// Seconds between cycles (overrides config)
        #[arg(short, long)]
        interval: Option<u64>,
        /// Also write logs to a daily rolling file in this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ContactAction {
    /// Start a handshake with the owner of a mailsite key
    Add { mailsite_key: String },
    List,
    /// Resume a contact parked after a fatal error
    Clear { mailsite_key: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

/// Prints delivery events as they happen
struct ConsoleDelegate;

impl DeliveryDelegate for ConsoleDelegate {
    fn on_event(&self, event: DeliveryEvent) {
        match event {
            DeliveryEvent::Delivered { contact, message_id } => {
                println!("{} Message {} from {}", "✉".green(), message_id, contact.bright_cyan())
            }
            DeliveryEvent::Acknowledged { contact, uid } => {
                println!("{} {} received message {}", "✓".green(), contact.bright_cyan(), uid)
            }
            DeliveryEvent::Undeliverable { contact, uid } => println!(
                "{} Message {} to {} could not be delivered",
                "✗".red(),
                uid,
                contact.bright_cyan()
            ),
            DeliveryEvent::CtsReceived { contact } => {
                println!("{} Handshake with {} complete", "✓".green(), contact.bright_cyan())
            }
            DeliveryEvent::ContactAccepted { contact } => {
                println!("{} New contact {}", "+".green(), contact.bright_cyan())
            }
            DeliveryEvent::NeedsAttention { contact, reason } => println!(
                "{} {} needs attention: {}",
                "!".bright_red().bold(),
                contact.bright_cyan(),
                reason
            ),
        }
    }
}

fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "slotpost.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = match &cli.command {
        Commands::Run { log_dir, .. } => log_dir.clone(),
        _ => None,
    };
    let _guard = init_logging(log_dir.as_deref());

    let config_file = match cli.config {
        Some(path) => path,
        None => Config::default_file()?,
    };
    let config = Config::load(&config_file)?;

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Identity => cmd_identity(&config),
        Commands::Status => cmd_status(&config),
        Commands::Contact { action } => cmd_contact(&config, action),
        Commands::Send { recipient, message } => cmd_send(&config, &recipient, &message),
        Commands::Inbox { from } => cmd_inbox(&config, from),
        Commands::Run { once, interval, .. } => cmd_run(&config, once, interval).await,
        Commands::Config { action } => cmd_config(config, &config_file, action),
    }
}

fn open_account(config: &Config) -> Result<(Slotpost, Arc<dyn NetworkClient>)> {
    let network_dir = config.network_dir()?;
    let network: Arc<dyn NetworkClient> = Arc::new(
        DirectoryNetwork::open(&network_dir)
            .with_context(|| format!("Failed to open network at {}", network_dir.display()))?,
    );
    let post = Slotpost::open(
        config.data_dir()?,
        network.clone(),
        Arc::new(SystemClock),
        config.policy,
    )
    .context("Failed to open account")?;
    Ok((post, network))
}

fn cmd_init(config: &Config) -> Result<()> {
    println!("{}", "Initializing slotpost...".bold());
    println!();

    let (post, network) = open_account(config)?;
    println!("  {} Data directory: {}", "✓".green(), post.data_dir().display());
    println!("  {} Network: {}", "✓".green(), config.network_dir()?.display());

    post.publish_mailsite(network.as_ref())
        .context("Failed to publish mailsite")?;
    println!("  {} Mailsite published", "✓".green());
    println!();

    println!("{}", "Your address:".bold());
    println!("  {}", post.account().mailsite_key().bright_cyan());
    println!();
    println!("{}", "Next steps:".bold());
    println!("  • Add a contact: {}", "slotpost contact add <mailsite-key>".bright_green());
    println!("  • Start polling: {}", "slotpost run".bright_green());
    Ok(())
}

fn cmd_identity(config: &Config) -> Result<()> {
    let (post, _) = open_account(config)?;
    let account = post.account();

    println!("{}", "Identity Information".bold());
    println!("  ID:          {}", account.keys().identity_id().bright_cyan());
    println!("  Public Key:  {}", account.keys().public_key_hex().bright_yellow());
    println!("  Address:     {}", account.mailsite_key().bright_cyan());
    println!("  RTS keyword: {}", account.rtsksk());
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let (post, _) = open_account(config)?;
    let postman = post.postman();

    println!("{}", "Slotpost Status".bold());
    println!("  Address: {}", post.account().mailsite_key().bright_cyan());
    println!("  Mailbox: {} message(s)", post.mailbox().total_count());
    println!();

    println!("{}", "Outbound".bold());
    let outbound = postman.outbound_keys();
    if outbound.is_empty() {
        println!("  {}", "No outbound contacts.".dimmed());
    }
    for key in outbound {
        let Some(handle) = postman.outbound(&key) else {
            continue;
        };
        let contact = handle.lock();
        let state = contact.state()?;
        let handshake = state.status.map(|s| s.as_prop()).unwrap_or("new");
        println!(
            "  {}  {}  {} queued",
            key.bright_cyan(),
            handshake,
            contact.pending()?.len()
        );
        if let Some(reason) = state.needs_attention {
            println!("    {} {}", "needs attention:".bright_red(), reason);
        }
    }
    println!();

    println!("{}", "Inbound".bold());
    let inbound = postman.inbound_keys();
    if inbound.is_empty() {
        println!("  {}", "No inbound contacts.".dimmed());
    }
    for key in inbound {
        let Some(handle) = postman.inbound(&key) else {
            continue;
        };
        let contact = handle.lock();
        print!("  {}", key.bright_cyan());
        if let Some(reason) = contact.needs_attention()? {
            print!("  {} {}", "needs attention:".bright_red(), reason);
        }
        println!();
    }
    Ok(())
}

fn cmd_contact(config: &Config, action: ContactAction) -> Result<()> {
    let (post, _) = open_account(config)?;
    let postman = post.postman();

    match action {
        ContactAction::Add { mailsite_key } => {
            let handle = postman.add_outbound(&mailsite_key)?;
            let contact = handle.lock();
            if contact.ready()? {
                println!("{} Already talking to {}", "✓".green(), mailsite_key.bright_cyan());
                return Ok(());
            }
            contact
                .init()
                .with_context(|| format!("Handshake with {} failed", mailsite_key))?;
            println!("{} RTS sent to {}", "✓".green(), mailsite_key.bright_cyan());
        }
        ContactAction::List => {
            let outbound = postman.outbound_keys();
            let inbound = postman.inbound_keys();
            if outbound.is_empty() && inbound.is_empty() {
                println!("{}", "No contacts yet.".dimmed());
            }
            for key in outbound {
                println!("  {} {}", "→".bright_green(), key);
            }
            for key in inbound {
                println!("  {} {}", "←".bright_yellow(), key);
            }
        }
        ContactAction::Clear { mailsite_key } => {
            postman.clear_attention(&mailsite_key)?;
            println!("{} Cleared {}", "✓".green(), mailsite_key.bright_cyan());
        }
    }
    Ok(())
}

fn cmd_send(config: &Config, recipient: &str, message: &str) -> Result<()> {
    let (post, _) = open_account(config)?;
    let uid = post
        .postman()
        .send(recipient, message.as_bytes())
        .with_context(|| format!("Failed to queue message for {}", recipient))?;
    println!(
        "{} Queued message {} for {}",
        "✓".green(),
        uid,
        recipient.bright_cyan()
    );
    println!("  It goes out on the next {}", "slotpost run".bright_green());
    Ok(())
}

fn cmd_inbox(config: &Config, from: Option<String>) -> Result<()> {
    let (post, _) = open_account(config)?;
    let messages = match &from {
        Some(contact) => post.mailbox().messages_from(contact)?,
        None => post.mailbox().all_messages()?,
    };

    if messages.is_empty() {
        println!("{}", "No messages found.".dimmed());
        return Ok(());
    }
    for msg in messages {
        let when = chrono::DateTime::from_timestamp_millis(msg.received_at as i64)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{} {} #{}",
            when.dimmed(),
            msg.contact.bright_cyan(),
            msg.message_id
        );
        println!("  {}", String::from_utf8_lossy(&msg.body));
    }
    Ok(())
}

async fn cmd_run(config: &Config, once: bool, interval: Option<u64>) -> Result<()> {
    let (post, _) = open_account(config)?;
    post.postman().set_delegate(Some(Arc::new(ConsoleDelegate)));

    if once {
        let postman = post.postman().clone();
        let summary = tokio::task::spawn_blocking(move || postman.run_cycle()).await?;
        println!(
            "{} {} outbound, {} inbound, {} skipped, {} error(s)",
            "Cycle done:".bold(),
            summary.outbound,
            summary.inbound,
            summary.skipped,
            summary.errors
        );
        return Ok(());
    }

    let secs = interval.unwrap_or(config.interval_secs).max(1);
    println!("{}", "Slotpost running (Ctrl-C to stop)".bold());
    println!("  Address:  {}", post.account().mailsite_key().bright_cyan());
    println!("  Interval: {}s", secs);
    println!();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = tokio::spawn(
        post.postman()
            .clone()
            .run(Duration::from_secs(secs), shutdown_rx),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!();
    println!("{}", "Stopping...".dimmed());
    let _ = shutdown_tx.send(true);
    driver.await?;
    Ok(())
}

fn cmd_config(mut config: Config, config_file: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save(config_file)?;
            println!("{} {} = {}", "✓".green(), key, value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => println!("{}", "(not set)".dimmed()),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!("  File: {}", config_file.display().to_string().dimmed());
            for (key, value) in config.list() {
                println!("  {:<20} {}", key, value);
            }
        }
    }
    Ok(())
}

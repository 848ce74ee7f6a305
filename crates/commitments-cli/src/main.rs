//! Commitments CLI - a terminal front-end for the commitment tracker.
//!
//! Signs in against the tracker's REST API, keeps the session tokens in the
//! configured credential store, and lists commitments, tasks, statuses,
//! categories and reports.

mod commands;

use std::io;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commitments_core::api::DEFAULT_PAGE_SIZE;
use commitments_core::{ApiClient, Config, SessionManager};

#[derive(Parser, Debug)]
#[command(name = "commitments", version, about = "Track commitments and tasks from the terminal")]
struct Cli {
    /// Print raw JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session tokens
    Signin {
        #[arg(long)]
        email: Option<String>,
    },
    /// Register a new account
    Signup {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
    },
    /// Sign out and forget the stored tokens
    Signout,
    /// Show whether a session is stored; `--check` verifies it with the server
    Status {
        #[arg(long)]
        check: bool,
    },
    /// Rotate the session tokens
    Refresh,
    /// Show the signed-in user
    Me,
    /// List commitments
    Commitments {
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        size: u32,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// List the tasks of a commitment
    Tasks { commitment: String },
    /// List commitment statuses
    Statuses,
    /// List commitment categories
    Categories,
    /// Completed work between two dates (YYYY-MM-DD, end inclusive)
    Report {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load()?;
    let store = config.open_credential_store()?;
    let session = SessionManager::new(config.http_client()?, config.api_base_url(), store);
    let api = ApiClient::for_session(&session);
    info!(api = %config.api_base_url(), "Commitments CLI starting");

    let ctx = commands::Context {
        session: &session,
        api: &api,
        json: cli.json,
    };

    match cli.command {
        Command::Signin { email } => commands::sign_in(&ctx, &mut config, email).await,
        Command::Signup {
            first_name,
            last_name,
            email,
        } => commands::sign_up(&ctx, first_name, last_name, email).await,
        Command::Signout => commands::sign_out(&ctx).await,
        Command::Status { check } => commands::status(&ctx, check).await,
        Command::Refresh => commands::refresh(&ctx).await,
        Command::Me => commands::me(&ctx).await,
        Command::Commitments {
            page,
            size,
            user,
            status,
            category,
        } => commands::commitments(&ctx, page, size, user, status, category).await,
        Command::Tasks { commitment } => commands::tasks(&ctx, &commitment).await,
        Command::Statuses => commands::statuses(&ctx).await,
        Command::Categories => commands::categories(&ctx).await,
        Command::Report { user, from, to } => commands::report(&ctx, user, &from, &to).await,
    }
}

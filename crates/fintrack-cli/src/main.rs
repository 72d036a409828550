//! fintrack - command-line client for the fintrack personal finance backend.
//!
//! Signs in, keeps the session persisted between runs, and issues
//! authenticated requests. Expired access tokens are refreshed silently.

use std::io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fintrack_core::{ApiError, Config, SessionManager, SessionStatus, StorageKind};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "fintrack", version, about = "Personal finance tracker client")]
struct Cli {
    /// Backend base URL (overrides config and FINTRACK_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Where to keep the session: file, keyring or memory
    #[arg(long, global = true)]
    storage: Option<StorageKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in with username and password
    Login {
        username: String,
    },
    /// Sign in to the demo account
    Demo,
    /// Sign out and forget the stored session
    Logout,
    /// Show the current session
    Whoami,
    /// Authenticated GET against the backend, printing the JSON response
    Get {
        /// Path relative to the API base URL, e.g. /api/transactions/
        path: String,
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

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(ref url) = cli.api_url {
        config.api_base_url = url.clone();
    }
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }
    Ok(config)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing();

    let config = load_config(&cli)?;
    info!(api = %config.api_base_url, storage = ?config.storage, "fintrack starting");

    let session = SessionManager::with_auth_endpoints(
        config.api_client()?,
        config.open_store()?,
        config.auth_endpoints.clone(),
    );
    session.start();

    let result = run(&session, cli.command).await;
    session.stop();
    result
}

async fn run(session: &SessionManager, command: Command) -> Result<()> {
    match command {
        Command::Login { username } => {
            let password = rpassword::prompt_password("Password: ")
                .context("Failed to read password")?;
            let user = session.login_with_password(&username, &password).await?;
            eprintln!("Signed in as {}", display_name(&user).unwrap_or(&username));
        }
        Command::Demo => {
            let user = session.demo_login().await?;
            eprintln!("Signed in as {}", display_name(&user).unwrap_or("demo user"));
        }
        Command::Logout => {
            session.logout().await;
            eprintln!("Signed out");
        }
        Command::Whoami => {
            let status = session.bootstrap().await;
            println!("{}", describe_session(status, session.user().as_ref())?);
        }
        Command::Get { path } => {
            if session.bootstrap().await != SessionStatus::Authenticated {
                anyhow::bail!("Not signed in - run `fintrack login <username>` first");
            }
            let value: Value = session
                .api()
                .get_json(&path)
                .await
                .map_err(|e| request_error(&path, e))?;
            print_json(&value)?;
        }
    }
    Ok(())
}

/// Status line followed by the user record; an error when nobody is signed in
fn describe_session(status: SessionStatus, user: Option<&Value>) -> Result<String> {
    match (status, user) {
        (SessionStatus::Authenticated, Some(user)) => Ok(format!(
            "Status: {}\n{}",
            status,
            serde_json::to_string_pretty(user)?
        )),
        _ => anyhow::bail!("Not signed in ({})", status),
    }
}

/// A 401 that survived the refresh means the session is gone
fn request_error(path: &str, error: ApiError) -> anyhow::Error {
    if error.is_unauthorized() {
        anyhow::anyhow!("Session expired - run `fintrack login <username>` to sign in again")
    } else {
        anyhow::Error::new(error).context(format!("GET {} failed", path))
    }
}

fn display_name(user: &Value) -> Option<&str> {
    ["username", "email", "name"]
        .iter()
        .find_map(|key| user.get(*key).and_then(Value::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_session_prints_status_and_user() {
        let user = json!({ "id": 1, "username": "amun" });
        let output = describe_session(SessionStatus::Authenticated, Some(&user)).unwrap();
        assert!(output.starts_with("Status: authenticated\n"));
        assert!(output.contains("\"username\": \"amun\""));
    }

    #[test]
    fn test_describe_session_errors_when_signed_out() {
        let err = describe_session(SessionStatus::Anonymous, None).unwrap_err();
        assert_eq!(err.to_string(), "Not signed in (anonymous)");
    }

    #[test]
    fn test_request_error_explains_expired_session() {
        let err = request_error("/api/accounts/", ApiError::Unauthorized);
        assert!(err.to_string().starts_with("Session expired"));

        let err = request_error("/api/accounts/", ApiError::RateLimited);
        assert_eq!(err.to_string(), "GET /api/accounts/ failed");
    }

    #[test]
    fn test_display_name_prefers_username() {
        assert_eq!(display_name(&json!({ "email": "a@b.c", "username": "amun" })), Some("amun"));
        assert_eq!(display_name(&json!({ "email": "a@b.c" })), Some("a@b.c"));
        assert_eq!(display_name(&json!({ "id": 1 })), None);
    }
}

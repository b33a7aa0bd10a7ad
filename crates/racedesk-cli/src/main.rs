//! racedesk - command-line front-end for the racedesk admin console.
//!
//! A thin shell over racedesk-core: sign in to the backend, inspect and
//! refresh the session, fetch the account profile, sign out. The web
//! console shares the same core through its generated TypeScript bindings.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use racedesk_core::{
    ApiClient, Config, EnvStore, Navigator, PasswordStore, SettingsStore, Theme, TokenStatus,
    UserStore,
};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// There is no router in a terminal: the login redirect is printed as the
/// command to run next, with the intended route echoed back.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn current_location(&self) -> String {
        "/".to_string()
    }

    fn redirect_to_login(&self, redirect: &str) {
        if redirect == "/" {
            eprintln!("Run `racedesk login` to sign in again.");
        } else {
            eprintln!("Run `racedesk login` to sign in again (you were headed to {redirect}).");
        }
    }

    fn warn(&self, message: &str) {
        eprintln!("{message}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let mut config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("status");

    match command {
        "login" => login(&mut config, args.iter().any(|a| a == "--remember")).await,
        "status" => status(&config).await,
        "refresh" => refresh(&config).await,
        "whoami" => whoami(&config).await,
        "logout" => logout(&config, args.iter().any(|a| a == "--forget")).await,
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}\n");
            print_usage();
            std::process::exit(2);
        }
    }
}

async fn build_client(config: &Config) -> Result<ApiClient> {
    let store_dir = config.store_dir()?;
    let store = Arc::new(UserStore::open(&store_dir).await);
    let client = ApiClient::new(config, store, Arc::new(TerminalNavigator))
        .context("Failed to create API client")?;
    Ok(client)
}

async fn login(config: &mut Config, remember: bool) -> Result<()> {
    let client = build_client(config).await?;

    let username = match config.last_username {
        Some(ref last_user) => {
            print!("Username [{last_user}]: ");
            io::stdout().flush()?;

            let mut input = String::new();
            io::stdin().read_line(&mut input)?;
            let input = input.trim();

            if input.is_empty() {
                last_user.clone()
            } else {
                input.to_string()
            }
        }
        None => prompt_username()?,
    };

    let password = if PasswordStore::has_password(&username) {
        print!("Use stored password? [Y/n]: ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if input.trim().to_lowercase() != "n" {
            PasswordStore::get(&username)?
        } else {
            prompt_password()?
        }
    } else {
        prompt_password()?
    };

    println!("\nSigning in...");
    let profile = client.login(&username, &password).await?;

    if remember {
        if let Err(e) = PasswordStore::store(&username, &password) {
            warn!(error = %e, "failed to store password in keychain");
        }
    }

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "failed to save config");
    }

    sync_theme(config, &client).await;

    if profile.display_name.is_empty() {
        println!("Signed in.");
    } else {
        println!("Signed in as {}.", profile.display_name);
    }
    Ok(())
}

/// The deployment can hand the console a theme after login; mirror it into
/// the local settings the way the web console does.
async fn sync_theme(config: &Config, client: &ApiClient) {
    let Ok(store_dir) = config.store_dir() else {
        return;
    };
    match client.bootstrap_session().await {
        Ok(bootstrap) => {
            if let Some(theme) = bootstrap.theme.as_deref().and_then(Theme::from_tag) {
                let settings = SettingsStore::open_settings(&store_dir).await;
                settings.update(|record| record.theme = theme).await;
            }
        }
        Err(e) => warn!(error = %e, "session bootstrap failed"),
    }
}

async fn status(config: &Config) -> Result<()> {
    let client = build_client(config).await?;
    let status = client.session().inspect().await;
    let record = client.store().get().await;

    let store_dir = config.store_dir()?;
    let env = EnvStore::open_env(&store_dir).await.get().await;

    println!("Backend:  {}", config.base_url);
    println!("Device:   {} ({})", env.device_id, env.platform);
    if !record.profile.username.is_empty() {
        println!("Account:  {}", record.profile.username);
    }

    match status.token_status {
        None => println!("Session:  signed out"),
        Some(TokenStatus::Expired) => println!("Session:  expired"),
        Some(TokenStatus::ExpiringSoon) => match status.expires_at {
            Some(exp) => println!("Session:  expiring soon ({})", format_remaining(exp)),
            None => println!("Session:  expiring soon"),
        },
        Some(TokenStatus::Valid) => match status.expires_at {
            Some(exp) => println!("Session:  valid ({})", format_remaining(exp)),
            None => println!("Session:  valid"),
        },
    }
    if status.refreshing {
        println!("Refresh:  in flight");
    }
    Ok(())
}

async fn refresh(config: &Config) -> Result<()> {
    let client = build_client(config).await?;
    client
        .session()
        .refresh_now()
        .await
        .context("Token refresh failed")?;

    let status = client.session().inspect().await;
    match status.expires_at {
        Some(exp) => println!("Token refreshed ({}).", format_remaining(exp)),
        None => println!("Token refreshed."),
    }
    Ok(())
}

async fn whoami(config: &Config) -> Result<()> {
    let client = build_client(config).await?;
    let profile = client.profile().await.context("Failed to fetch profile")?;

    println!("{} (#{})", profile.username, profile.id);
    if !profile.display_name.is_empty() {
        println!("Name:   {}", profile.display_name);
    }
    if !profile.email.is_empty() {
        println!("Email:  {}", profile.email);
    }
    if !profile.phone.is_empty() {
        println!("Phone:  {}", profile.phone);
    }
    Ok(())
}

async fn logout(config: &Config, forget: bool) -> Result<()> {
    let client = build_client(config).await?;
    client.logout().await.context("Logout failed")?;

    if forget {
        if let Some(ref username) = config.last_username {
            if let Err(e) = PasswordStore::delete(username) {
                warn!(error = %e, "failed to remove stored password");
            }
        }
    }

    println!("Signed out.");
    Ok(())
}

fn prompt_username() -> Result<String> {
    print!("Username: ");
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    Ok(username.trim().to_string())
}

fn prompt_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    Ok(password)
}

fn format_remaining(expires_at: i64) -> String {
    format_remaining_at(expires_at, chrono::Utc::now().timestamp())
}

fn format_remaining_at(expires_at: i64, now: i64) -> String {
    let remaining = expires_at.saturating_sub(now);
    if remaining <= 0 {
        return "expired".to_string();
    }
    if remaining >= 3600 {
        format!("{}h {}m left", remaining / 3600, (remaining % 3600) / 60)
    } else if remaining >= 60 {
        format!("{}m left", remaining / 60)
    } else {
        format!("{remaining}s left")
    }
}

fn print_usage() {
    eprintln!("Usage: racedesk <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  login [--remember]   Sign in; --remember stores the password in the keychain");
    eprintln!("  status               Show session and token health (default)");
    eprintln!("  refresh              Force a token refresh");
    eprintln!("  whoami               Fetch the signed-in account profile");
    eprintln!("  logout [--forget]    Sign out; --forget drops the stored password");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  RACEDESK_BASE_URL    Override the backend base URL");
    eprintln!("  RACEDESK_DATA_DIR    Override the store directory");
    eprintln!("  RUST_LOG             Log filter (e.g. RUST_LOG=debug)");
}

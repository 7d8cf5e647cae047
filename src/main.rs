//! adfs-cli - Browser-driven ADFS implicit-flow login
//!
//! Authenticates against an ADFS identity provider by driving a real browser
//! through the interactive login form, caches the returned tokens, and
//! refreshes them ahead of expiry.

mod auth;
mod cache;
mod config;
mod driver;
mod refresh;
mod service;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth::tokens::CachedTokenRecord;
use auth::{AuthResult, TokenSet};
use config::Settings;
use driver::chromium::BrowserOptions;
use service::AuthService;

#[derive(Parser)]
#[command(name = "adfs-cli")]
#[command(about = "Browser-driven ADFS implicit-flow login", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Credentials/configuration file (key=value lines or a JSON object)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate against ADFS and cache the tokens
    Authenticate {
        /// Discard any cached tokens and drive a fresh login
        #[arg(short, long)]
        force: bool,

        /// Stay running and refresh tokens ahead of expiry
        #[arg(short, long)]
        keep_alive: bool,

        /// Print the result as a JSON envelope instead of text
        #[arg(long)]
        json: bool,
    },

    /// Delete the persisted token cache
    ClearCache,

    /// Show cached tokens and their validity
    ShowTokens,

    /// Show the resolved configuration and credential sources
    ShowCredentials,

    /// Inspect a token result file produced by an automation run
    ShowTokenFile {
        /// Path to the result file
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let settings = Settings::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Authenticate {
            force,
            keep_alive,
            json,
        } => {
            authenticate(settings, force, keep_alive, json).await?;
        }
        Commands::ClearCache => {
            let mut cache = cache::TokenCache::new(settings.cache_path.clone());
            cache.clear();
            println!("Token cache cleared.");
        }
        Commands::ShowTokens => {
            show_tokens(&settings)?;
        }
        Commands::ShowCredentials => {
            show_credentials(&settings);
        }
        Commands::ShowTokenFile { file } => {
            show_token_file(&file)?;
        }
    }

    Ok(())
}

async fn authenticate(settings: Settings, force: bool, keep_alive: bool, json: bool) -> Result<()> {
    let options = BrowserOptions {
        headless: settings.headless,
        slow_mo: settings.slow_mo_ms.map(Duration::from_millis),
    };
    let service = AuthService::new(settings, driver::chromium::factory(options));

    if force {
        service.invalidate().await;
    } else {
        service.restore().await;
    }

    tracing::info!("starting authentication...");
    let result = AuthResult::from(service.authenticate().await);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    if result.success {
        let tokens = result.tokens.as_ref().context("success without tokens")?;
        if !json {
            println!("Authentication successful.");
            print_token_summary(tokens);
        }
        if keep_alive {
            tracing::info!("keep-alive: refreshing ahead of expiry until interrupted");
            tokio::signal::ctrl_c()
                .await
                .context("failed to wait for interrupt")?;
            service.stop();
        }
        Ok(())
    } else {
        let code = result.error.unwrap_or_else(|| "internal".into());
        let description = result.error_description.unwrap_or_default();
        if json {
            bail!("authentication failed");
        }
        bail!("authentication failed ({code}): {description}");
    }
}

fn print_token_summary(tokens: &TokenSet) {
    if let Some(exp) = tokens.expiry_unix() {
        match chrono::DateTime::from_timestamp(exp as i64, 0) {
            Some(when) => println!("  access token expires: {when}"),
            None => println!("  access token expires: {exp} (unix)"),
        }
    }
    if tokens.id_token.is_some() {
        println!("  id token:             present");
    }
    if let Some(scope) = &tokens.scope {
        println!("  granted scope:        {scope}");
    }
}

fn show_tokens(settings: &Settings) -> Result<()> {
    let Some(path) = &settings.cache_path else {
        println!("Token cache:  disabled");
        return Ok(());
    };
    if !path.exists() {
        println!("Token cache:  none ({})", path.display());
        println!("\nRun 'adfs-cli authenticate' to sign in.");
        return Ok(());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read token cache {}", path.display()))?;
    let record: CachedTokenRecord =
        serde_json::from_str(&content).context("failed to parse token cache")?;

    println!("Token cache:  {}", path.display());
    if record.tokens.is_valid() {
        println!("Access token: valid");
    } else {
        println!("Access token: expired");
    }
    print_token_summary(&record.tokens);
    if let Some(captured) = chrono::DateTime::from_timestamp(record.captured_at as i64, 0) {
        println!("  captured:             {captured}");
    }
    Ok(())
}

fn show_credentials(settings: &Settings) {
    println!("Authority:    {}", settings.authority);
    println!("Client id:    {}", settings.client_id);
    println!("Redirect URI: {}", settings.redirect_uri);
    println!("Scope:        {}", settings.scope);
    match &settings.username {
        Some(username) => println!("Username:     {username}"),
        None => println!("Username:     (not set; ${} empty)", settings.username_var),
    }
    match &settings.password {
        Some(_) => println!("Password:     (set)"),
        None => println!("Password:     (not set; ${} empty)", settings.password_var),
    }
    println!("Headless:     {}", settings.headless);
    println!("Screenshots:  {}", settings.screenshots);
    println!("Auto refresh: {}", settings.auto_refresh);
    println!("Refresh lead: {}s", settings.refresh_lead_secs);
    println!("Timeout:      {}s", settings.timeout_secs);
}

/// Inspect a result file: a whole-file JSON envelope, or the trailing JSON
/// line an external automation subprocess prints as its last output.
fn show_token_file(path: &std::path::Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read token file {}", path.display()))?;

    let result: AuthResult = match serde_json::from_str(&content) {
        Ok(result) => result,
        Err(_) => content
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(|line| serde_json::from_str(line).ok())
            .context("no parseable JSON result object in file")?,
    };

    if result.success {
        println!("Result:       success");
        if let Some(tokens) = &result.tokens {
            print_token_summary(tokens);
        }
    } else {
        println!("Result:       failure");
        if let Some(error) = &result.error {
            println!("  error:              {error}");
        }
        if let Some(description) = &result.error_description {
            println!("  error description:  {description}");
        }
    }
    Ok(())
}

//! eJournal CLI
//!
//! Command-line access to the eJournal REST API with automatic token
//! refresh.
//!
//! # Usage
//!
//! ```bash
//! # Log in (password from the environment)
//! EJOURNAL_PASSWORD=... ejournal login student
//!
//! # Fetch a resource
//! ejournal get courses/
//! ejournal get journals/ -q assignment_id=7
//!
//! # Create an entry
//! ejournal post entries/ --data '{"journal_id": 3, "template_id": 1}'
//!
//! # End the session
//! ejournal logout
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ejournal_core::{ApiClient, ApiResponse, RequestOptions, Session, SecretStore, create_store};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

mod config;
mod terminal;

use config::CliConfig;
use terminal::TerminalNotifier;

#[derive(Parser)]
#[command(name = "ejournal")]
#[command(about = "Command-line client for the eJournal API")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the token pair
    Login {
        username: String,

        #[arg(long, env = "EJOURNAL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Forget the stored tokens
    Logout,

    /// Show the local session state
    Status,

    /// Ask the server whether the session is still valid
    Verify,

    /// GET a resource
    Get {
        path: String,

        /// Query parameter (key=value), repeatable
        #[arg(short, long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
    },

    /// POST a JSON body
    Post {
        path: String,

        /// JSON body
        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// PATCH a JSON body
    Patch {
        path: String,

        /// JSON body
        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// DELETE a resource
    Delete {
        path: String,

        /// Query parameter (key=value), repeatable
        #[arg(short, long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
    },

    /// Upload a file as multipart form data
    Upload {
        path: String,

        file: PathBuf,

        /// Extra form field (key=value), repeatable
        #[arg(short, long = "field", value_parser = parse_key_val)]
        field: Vec<(String, String)>,
    },

    /// Download a file
    Download {
        path: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.log_level);
    info!("Loaded configuration from {:?}", config.config_path);

    let client = connect(&config).await?;

    match cli.command {
        Commands::Login { username, password } => {
            let Some(password) = password else {
                bail!("Password required (use --password or EJOURNAL_PASSWORD)");
            };
            let state = client.login(&username, &password).await?;
            println!("Logged in as {} ({})", username, state);
        }
        Commands::Logout => {
            client.logout().await?;
            println!("Logged out");
        }
        Commands::Status => {
            println!("API:     {}", client.config().base_url);
            println!("Session: {}", client.session().state());
            if let Some(credential) = client.session().credential() {
                println!("Since:   {}", credential.obtained_at.to_rfc3339());
                println!(
                    "Refresh: {}",
                    if credential.refresh.is_some() { "available" } else { "none" }
                );
            }
        }
        Commands::Verify => {
            if client.verify_session().await? {
                println!("Session valid");
            } else {
                bail!("No valid session");
            }
        }
        Commands::Get { path, query } => {
            let query = as_pairs(&query);
            print_response(&client.get(&path, &query, RequestOptions::default()).await?)?;
        }
        Commands::Post { path, data } => {
            let body = parse_body(&data)?;
            print_response(&client.post(&path, &body, RequestOptions::default()).await?)?;
        }
        Commands::Patch { path, data } => {
            let body = parse_body(&data)?;
            print_response(&client.patch(&path, &body, RequestOptions::default()).await?)?;
        }
        Commands::Delete { path, query } => {
            let query = as_pairs(&query);
            print_response(&client.delete(&path, &query, RequestOptions::default()).await?)?;
        }
        Commands::Upload { path, file, field } => {
            let content = std::fs::read(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .context("Upload path has no file name")?;
            let response = client
                .upload_file(&path, &file_name, content, field, RequestOptions::default())
                .await?;
            print_response(&response)?;
        }
        Commands::Download { path, output } => {
            let bytes = client
                .download_file(&path, &[], RequestOptions::default())
                .await?;
            std::fs::write(&output, &bytes)
                .with_context(|| format!("Failed to write {:?}", output))?;
            println!("Wrote {} bytes to {}", bytes.len(), output.display());
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(config: &CliConfig) -> Result<ApiClient> {
    let store: Arc<dyn SecretStore> = Arc::from(
        create_store(&config.api.store).context("Failed to open credential storage")?,
    );
    let session = Arc::new(Session::new(store, config.api.store_namespace.clone()));
    let state = session
        .init()
        .await
        .context("Failed to load stored credentials")?;
    info!("Session state: {}", state);

    Ok(ApiClient::new(
        config.api.clone(),
        session,
        Arc::new(TerminalNotifier),
    )?)
}

fn print_response(response: &ApiResponse) -> Result<()> {
    match response.value() {
        Ok(value) if !value.is_null() => println!("{}", serde_json::to_string_pretty(&value)?),
        Ok(_) => println!("{}", response.status),
        Err(_) => println!("{}", String::from_utf8_lossy(&response.body)),
    }
    Ok(())
}

fn parse_body(data: &str) -> Result<serde_json::Value> {
    serde_json::from_str(data).context("Request body is not valid JSON")
}

fn as_pairs(pairs: &[(String, String)]) -> Vec<(&str, &str)> {
    pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", s))?;
    if key.is_empty() {
        return Err(format!("empty key in {:?}", s));
    }
    Ok((key.to_string(), value.to_string()))
}

//! Bulgur CLI - command line client for a Bulgur Cloud server
//!
//! Usage:
//!   bulgur-cli login <username> [--site URL]   Log in (password read from stdin)
//!   bulgur-cli ls [path]                       List a folder
//!   bulgur-cli upload <folder> <files...>      Upload files with progress bars
//!   bulgur-cli mkdir | rm | mv | exists | link | cat

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use secrecy::SecretString;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use bulgur_sync::{BError, Client, ClientConfig, LogoutOptions, SessionState, SyncEvent, UploadFile};

#[derive(Parser)]
#[command(
    name = "bulgur-cli",
    about = "Bulgur CLI: command line client for Bulgur Cloud",
    version,
    long_about = "Paths are relative to the storage root and start with your username, e.g. testuser/docs"
)]
struct Cli {
    /// Server URL (overrides the configured site)
    #[arg(long, global = true)]
    site: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and remember the session
    Login {
        username: String,
        /// Read the password from this environment variable instead of stdin
        #[arg(long)]
        password_env: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the logged in user
    Whoami,
    /// List a folder (default: your home folder)
    Ls { path: Option<String> },
    /// Create a folder
    Mkdir { path: String },
    /// Delete a file or folder
    Rm { path: String },
    /// Rename or move a path
    Mv { from: String, to: String },
    /// Upload local files into a remote folder
    Upload {
        folder: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Check whether a path exists
    Exists { path: String },
    /// Print a shareable download link
    Link { path: String },
    /// Print a file's contents to stdout
    Cat { path: String },
}

fn read_password(env_var: Option<&str>) -> anyhow::Result<SecretString> {
    if let Some(var) = env_var {
        let value = std::env::var(var).with_context(|| format!("{} is not set", var))?;
        return Ok(SecretString::from(value));
    }
    eprint!("Password: ");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(SecretString::from(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn fail(err: BError) -> anyhow::Error {
    anyhow::anyhow!("{} [{}]", err, err.code())
}

async fn require_session(client: &Client) -> anyhow::Result<String> {
    if client.initialize().await != SessionState::Authenticated {
        bail!("Not logged in. Run `bulgur-cli login <username>` first.");
    }
    client.session().username.context("session has no username")
}

async fn upload(client: &Client, folder: &str, paths: &[PathBuf]) -> anyhow::Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(
            UploadFile::from_path(path)
                .await
                .with_context(|| format!("cannot read {}", path.display()))?,
        );
    }

    let bars = MultiProgress::new();
    let style = ProgressStyle::with_template("{msg:20} [{bar:30}] {bytes}/{total_bytes}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    let mut events = client.subscribe();
    let render = tokio::spawn(async move {
        let mut active: HashMap<u64, ProgressBar> = HashMap::new();
        loop {
            match events.recv().await {
                Ok(SyncEvent::UploadProgress { id, name, bytes_done, total_bytes }) => {
                    let bar = active.entry(id).or_insert_with(|| {
                        let bar = bars.add(ProgressBar::new(total_bytes));
                        bar.set_style(style.clone());
                        bar.set_message(name);
                        bar
                    });
                    if total_bytes > 0 {
                        bar.set_length(total_bytes);
                        bar.set_position(bytes_done);
                    }
                }
                Ok(SyncEvent::UploadFinished { id, .. }) => {
                    if let Some(bar) = active.remove(&id) {
                        bar.finish();
                    }
                    if active.is_empty() {
                        break;
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let summary = client.upload(folder, files).await;
    // Lagged receivers can miss the last finish event
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), render).await;

    for uploaded in &summary.uploaded {
        println!("uploaded {}", uploaded);
    }
    for failed in &summary.errors {
        eprintln!("failed   {}: {} [{}]", failed.name, failed.error, failed.error.code());
    }
    if !summary.is_success() {
        bail!("{} of {} uploads failed", summary.errors.len(), paths.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bulgur_sync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::load();
    if let Some(site) = &cli.site {
        config.site = Some(site.clone());
    }
    let client = Client::from_config(config).context("failed to open credential store")?;

    match &cli.command {
        Commands::Login { username, password_env } => {
            let password = read_password(password_env.as_deref())?;
            let user = client
                .login(username, password, cli.site.as_deref())
                .await
                .map_err(fail)?;
            println!("Logged in as {}", user);
        }
        Commands::Logout => {
            client.logout(LogoutOptions { no_redirect: true });
            println!("Logged out");
        }
        Commands::Whoami => {
            let user = require_session(&client).await?;
            let site = client.session().site.map(|s| s.to_string()).unwrap_or_default();
            println!("{} @ {}", user, site);
        }
        Commands::Ls { path } => {
            let user = require_session(&client).await?;
            let path = path.clone().unwrap_or(user);
            let entries = client.read_folder(&path).await.map_err(fail)?;
            for entry in entries.iter() {
                if entry.is_file {
                    println!("{:>12}  {}", entry.size, entry.name);
                } else {
                    println!("{:>12}  {}/", "-", entry.name);
                }
            }
        }
        Commands::Mkdir { path } => {
            require_session(&client).await?;
            client.storage().create_folder(path).await.map_err(fail)?;
        }
        Commands::Rm { path } => {
            require_session(&client).await?;
            client.storage().delete_path(path).await.map_err(fail)?;
        }
        Commands::Mv { from, to } => {
            require_session(&client).await?;
            client.storage().rename(from, to).await.map_err(fail)?;
        }
        Commands::Upload { folder, files } => {
            require_session(&client).await?;
            upload(&client, folder, files).await?;
        }
        Commands::Exists { path } => {
            require_session(&client).await?;
            let exists = client.storage().path_exists(path).await.map_err(fail)?;
            println!("{}", if exists { "yes" } else { "no" });
            if !exists {
                std::process::exit(1);
            }
        }
        Commands::Link { path } => {
            require_session(&client).await?;
            let url = client.storage().download_url(path).await.map_err(fail)?;
            println!("{}", url);
        }
        Commands::Cat { path } => {
            require_session(&client).await?;
            let bytes = client.storage().file_contents(path).await.map_err(fail)?;
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}

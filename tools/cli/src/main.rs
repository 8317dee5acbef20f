//! photodrive CLI - Command line interface for Google Drive photo uploads.
//!
//! This tool authorizes against Google Drive and exposes every client
//! operation: listing files, finding and creating folders, and uploading
//! photos from URLs or local files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use photodrive_drive::config::DEFAULT_APPLICATION_NAME;
use photodrive_drive::{
    failure_report, Authenticator, DriveClient, DriveConfig, FileId, UploadSource,
};

#[derive(Parser)]
#[command(name = "photodrive")]
#[command(about = "photodrive - Upload photos to Google Drive")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// OAuth2 client-secret file (overrides the config file).
    #[arg(long)]
    client_secret: Option<PathBuf>,

    /// Application name sent to Google (overrides the config file).
    #[arg(long)]
    app_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize with Google and cache the tokens.
    Auth,

    /// List files.
    List {
        /// Number of files to list (1-1000).
        #[arg(short, long, default_value_t = 10)]
        page_size: u32,
    },

    /// Find folders by exact name.
    FindFolder {
        /// Folder name.
        name: String,
    },

    /// Create a folder.
    Mkdir {
        /// Folder name.
        name: String,
    },

    /// Upload one file.
    Upload {
        /// Id of the destination folder.
        #[arg(short, long)]
        parent: String,

        /// Name of the file on Drive.
        #[arg(short, long)]
        name: String,

        /// http(s) URL or local file path.
        source: String,
    },

    /// Upload several files as photo_0.jpg, photo_1.jpg, ...
    UploadBatch {
        /// Id of the destination folder.
        #[arg(short, long)]
        parent: String,

        /// http(s) URLs or local file paths.
        #[arg(required = true)]
        sources: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprint!("{}", failure_report(e.as_ref()));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Auth => cmd_auth(&config).await,
        Commands::List { page_size } => cmd_list(&config, page_size).await,
        Commands::FindFolder { name } => cmd_find_folder(&config, &name).await,
        Commands::Mkdir { name } => cmd_mkdir(&config, &name).await,
        Commands::Upload {
            parent,
            name,
            source,
        } => cmd_upload(&config, &parent, &name, &source).await,
        Commands::UploadBatch { parent, sources } => {
            cmd_upload_batch(&config, &parent, &sources).await
        }
    }
}

/// Build the configuration from the config file and command-line overrides.
fn load_config(cli: &Cli) -> Result<DriveConfig> {
    let mut config = match &cli.config {
        Some(path) => DriveConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => DriveConfig::new(DEFAULT_APPLICATION_NAME, "client_secret.json"),
    };

    if let Some(path) = &cli.client_secret {
        config.client_secret_path = path.clone();
    }
    if let Some(name) = &cli.app_name {
        config.application_name = name.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn connect(config: &DriveConfig) -> Result<DriveClient> {
    DriveClient::connect(config)
        .await
        .context("Failed to connect to Google Drive")
}

/// Turn a URL or local file path into an upload source.
///
/// Files are only opened while an attempt uploads them.
fn parse_source(source: &str) -> Result<UploadSource> {
    if source.starts_with("http://") || source.starts_with("https://") {
        return UploadSource::url(source).context("Invalid source URL");
    }

    let path = Path::new(source);
    if !path.is_file() {
        anyhow::bail!("Source file not found: {}", source);
    }
    Ok(UploadSource::path(path))
}

fn parse_parent(parent: &str) -> Result<FileId> {
    FileId::new(parent).context("Invalid parent folder id")
}

/// Run the authorization flow.
async fn cmd_auth(config: &DriveConfig) -> Result<()> {
    let cache_path = config.token_cache_path();

    Authenticator::from_config(config)
        .context("Failed to read client secret")?
        .authorize()
        .await
        .context("Authorization failed")?;

    println!("Authorized. Tokens cached at {}", cache_path.display());
    Ok(())
}

/// List files.
async fn cmd_list(config: &DriveConfig, page_size: u32) -> Result<()> {
    let client = connect(config).await?;
    let files = client
        .list_files(page_size)
        .await
        .context("Failed to list files")?;

    if files.is_empty() {
        println!("No files found.");
    }
    for file in files {
        println!("{}  {}", file.id, file.name);
    }

    Ok(())
}

/// Find folders by name.
async fn cmd_find_folder(config: &DriveConfig, name: &str) -> Result<()> {
    let client = connect(config).await?;
    let folders = client
        .search_directory(name)
        .await
        .context("Failed to search folders")?;

    info!("Found {} folders named {}", folders.len(), name);
    for folder in folders {
        println!("{}", folder.id);
    }

    Ok(())
}

/// Create a folder.
async fn cmd_mkdir(config: &DriveConfig, name: &str) -> Result<()> {
    let client = connect(config).await?;
    let id = client
        .create_directory(name)
        .await
        .context("Failed to create folder")?;

    println!("{}", id);
    Ok(())
}

/// Upload a single file.
async fn cmd_upload(config: &DriveConfig, parent: &str, name: &str, source: &str) -> Result<()> {
    let parent = parse_parent(parent)?;
    let source = parse_source(source)?;
    let client = connect(config).await?;

    client
        .upload_file(&parent, name, source)
        .await
        .with_context(|| format!("Failed to upload {}", name))?;

    println!("Uploaded {}", name);
    Ok(())
}

/// Upload several files with retries.
async fn cmd_upload_batch(config: &DriveConfig, parent: &str, sources: &[String]) -> Result<()> {
    let parent = parse_parent(parent)?;

    let mut items = Vec::with_capacity(sources.len());
    for source in sources {
        items.push(parse_source(source)?);
    }

    let client = connect(config).await?;
    let report = client.upload_files(&parent, items).await;

    for (outcome, source) in report.outcomes().iter().zip(sources) {
        match &outcome.result {
            Ok(()) => println!(
                "{}  {}  uploaded ({} attempts)",
                outcome.name, source, outcome.attempts
            ),
            Err(e) => println!(
                "{}  {}  FAILED after {} attempts: {}",
                outcome.name, source, outcome.attempts, e
            ),
        }
    }

    let failed = report.failures().count();
    if failed > 0 {
        anyhow::bail!("{} of {} uploads failed", failed, report.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_source() {
        let source = parse_source("https://example.com/cat.jpg").unwrap();
        assert!(source.is_replayable());
    }

    #[test]
    fn test_local_file_source_is_replayable() {
        let manifest = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
        let source = parse_source(manifest).unwrap();
        assert!(source.is_replayable());
        assert_eq!(source.to_string(), manifest);
    }

    #[test]
    fn test_missing_local_file() {
        assert!(parse_source("/nonexistent/photo.jpg").is_err());
    }
}

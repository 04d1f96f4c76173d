use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use job_relay::config::{
    AuthConfig, FolderConfig, JwtAlgorithm, ReadRetryConfig, Role, ServiceConfig,
};
use job_relay::service::Service;
use job_relay::transport::HttpPeer;

#[derive(Parser, Debug)]
#[command(name = "job-relay")]
#[command(version)]
#[command(about = "Hands file jobs between the instrument host and the gateway")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run one stage of the transfer chain
    Serve(ServeArgs),

    /// Ask a running service to re-drive the jobs it owns
    Retry(ClientArgs),
}

// =============================================================================
// Serve Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Stage to run
    #[arg(long, value_enum)]
    role: Role,

    /// Port to listen on for HTTP
    #[arg(long, default_value = "9000")]
    port: u16,

    /// Name of this host as recorded in job file locations
    #[arg(long)]
    hostname: String,

    /// Job repository base URL
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    job_repo: String,

    /// Peer base URL (sender: the receiver, puller: the gateway)
    #[arg(long)]
    peer: Option<String>,

    /// Next stage base URL (receiver: processing, gateway: the puller)
    #[arg(long)]
    next_stage: Option<String>,

    /// Folder incoming input files are written under (receiver)
    #[arg(long)]
    base_folder: Option<PathBuf>,

    /// Folder pulled output files are written to (puller)
    #[arg(long)]
    output_folder: Option<PathBuf>,

    /// Folder archived files are moved to (gateway)
    #[arg(long)]
    archive_folder: Option<PathBuf>,

    /// Extra attempts when a local file cannot be read yet
    #[arg(long, default_value = "2")]
    read_retries: u32,

    /// Wait between file read attempts
    #[arg(long, default_value = "500")]
    read_retry_wait_ms: u64,

    /// Timeout for every outbound call
    #[arg(long, default_value = "30000")]
    http_timeout_ms: u64,

    /// Maximum number of jobs held in memory (receiver, gateway)
    #[arg(long, default_value = "10000")]
    cache_capacity: usize,

    // === Auth Options ===
    /// Signing algorithm for outbound bearer tokens
    #[arg(long, value_enum, requires = "jwt_private_key")]
    jwt_algorithm: Option<JwtAlgorithm>,

    /// PEM private key used to sign tokens
    #[arg(long, requires = "jwt_issuer_key")]
    jwt_private_key: Option<PathBuf>,

    /// File holding the token issuer
    #[arg(long, requires = "jwt_private_key")]
    jwt_issuer_key: Option<PathBuf>,

    /// Token lifetime in seconds
    #[arg(long, default_value = "300")]
    jwt_expiry_secs: u64,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Service address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:9000")]
    addr: String,

    /// Timeout for the call; recovery can take a while
    #[arg(long, default_value = "300000")]
    http_timeout_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct RetryOutput {
    addr: String,
    success: bool,
    error: Option<String>,
}

// =============================================================================
// Server Implementation
// =============================================================================

fn build_config(args: ServeArgs) -> ServiceConfig {
    let auth = AuthConfig {
        enabled: args.jwt_private_key.is_some(),
        algorithm: args.jwt_algorithm.unwrap_or_default(),
        private_key_path: args.jwt_private_key,
        issuer_key_path: args.jwt_issuer_key,
        expiry: Duration::from_secs(args.jwt_expiry_secs),
    };

    ServiceConfig {
        role: args.role,
        listen_addr: SocketAddr::from(([0, 0, 0, 0], args.port)),
        hostname: args.hostname,
        job_repo_url: args.job_repo,
        peer_url: args.peer,
        next_stage_url: args.next_stage,
        http_timeout_ms: args.http_timeout_ms,
        read_retry: ReadRetryConfig {
            attempts: args.read_retries,
            wait_ms: args.read_retry_wait_ms,
        },
        folders: FolderConfig {
            base_folder: args.base_folder,
            output_folder: args.output_folder,
            archive_folder: args.archive_folder,
        },
        auth,
        cache_capacity: args.cache_capacity,
    }
}

async fn run_server(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = build_config(args);
    let service = Service::new(config)?;
    service.run().await?;
    Ok(())
}

// =============================================================================
// Client Implementation
// =============================================================================

async fn run_retry(args: ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let peer = HttpPeer::new(&args.addr, Duration::from_millis(args.http_timeout_ms), None)?;
    let result = peer.trigger_retry().await;

    let output = RetryOutput {
        addr: args.addr.clone(),
        success: result.is_ok(),
        error: result.as_ref().err().map(|e| e.to_string()),
    };

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Table => {
            println!("{:<30} {:<8} ERROR", "SERVICE", "RESULT");
            println!(
                "{:<30} {:<8} {}",
                output.addr,
                if output.success { "ok" } else { "failed" },
                output.error.as_deref().unwrap_or("-")
            );
        }
    }

    result?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => run_server(serve_args).await,
        Commands::Retry(client_args) => run_retry(client_args).await,
    }
}

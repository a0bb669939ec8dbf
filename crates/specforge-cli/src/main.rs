mod client;
mod cmd;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use client::McpClient;

#[derive(Parser)]
#[command(
    name = "specforge",
    about = "SpecForge server and MCP client: snapshots, imports and reality checks",
    version,
    propagate_version = true
)]
struct Cli {
    /// MCP endpoint of a running server
    #[arg(
        long,
        global = true,
        env = "SPECFORGE_MCP_URL",
        default_value = "http://localhost:8081/mcp"
    )]
    url: String,

    /// Bearer token for the MCP endpoint (project token or static token)
    #[arg(long, global = true, env = "MCP_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and MCP listeners
    Serve {
        /// YAML config file; environment variables take precedence
        #[arg(long, env = "SPECFORGE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Check that the MCP endpoint answers and accepts the token
    Connect,

    /// Full initialize handshake, printing negotiated capabilities
    Handshake,

    /// List the tools the server exposes
    Tools,

    /// Open a reality snapshot and print the extraction request
    CreateSnapshot {
        /// Project UUID
        #[arg(long)]
        project: String,
        /// Restrict the snapshot to one roadmap item
        #[arg(long)]
        item: Option<String>,
        /// Extraction scope as a JSON object
        #[arg(long)]
        scope: Option<String>,
    },

    /// Post extracted data for an awaiting snapshot
    PostSnapshot {
        /// Snapshot UUID
        #[arg(long)]
        snapshot: String,
        /// JSON file with the extracted data ("-" for stdin)
        #[arg(long)]
        data: PathBuf,
    },

    /// Submit a project catalogue through an import session
    ImportProject {
        /// Project UUID
        #[arg(long)]
        project: String,
        /// JSON file with the catalogue (category -> entries)
        #[arg(long)]
        catalogue: PathBuf,
        /// Lock the session after submitting, whatever the score
        #[arg(long)]
        finalize: bool,
    },

    /// Snapshot the project, post the data and fail unless the verdict is approved
    Verify {
        /// Project UUID
        #[arg(long)]
        project: String,
        /// JSON file with the extracted data ("-" for stdin)
        #[arg(long)]
        data: PathBuf,
        /// Restrict the check to one roadmap item
        #[arg(long)]
        item: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let client = || McpClient::new(&cli.url, cli.token.as_deref());
    let json = cli.json;

    let result = match cli.command {
        Commands::Serve { config } => cmd::serve::run(config.as_deref()),
        Commands::Connect => cmd::session::connect(&client(), json),
        Commands::Handshake => cmd::session::handshake(&client(), json),
        Commands::Tools => cmd::session::tools(&client(), json),
        Commands::CreateSnapshot {
            project,
            item,
            scope,
        } => cmd::snapshot::create(&client(), &project, item.as_deref(), scope.as_deref(), json),
        Commands::PostSnapshot { snapshot, data } => cmd::snapshot::post(&client(), &snapshot, &data, json),
        Commands::ImportProject {
            project,
            catalogue,
            finalize,
        } => cmd::import::run(&client(), &project, &catalogue, finalize, json),
        Commands::Verify {
            project,
            data,
            item,
        } => cmd::snapshot::verify(&client(), &project, item.as_deref(), &data, json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

//! pressgit node - serves a repository over git smart HTTP and syncs it
//! with remotes.

use clap::{Parser, Subcommand};
use pressgit_node::config::NodeConfig;
use pressgit_node::observability::{init_logging, LogFormat};
use std::net::SocketAddr;
use std::path::PathBuf;

mod commands;

/// pressgit - git-compatible object store and smart HTTP node
#[derive(Parser, Debug)]
#[command(name = "pressgit-node")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Repository directory (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the repository directory
    Init {
        /// URL recorded as the `origin` remote
        #[arg(long)]
        remote: Option<String>,
    },

    /// Serve the repository over git smart HTTP
    Serve {
        /// HTTP listen address (overrides the config file)
        #[arg(long)]
        listen_addr: Option<SocketAddr>,
    },

    /// Record local files as one commit on the current branch
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: Option<String>,

        /// Files as `repo/path=local/file`
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// List remote branches and update tracking refs
    Fetch {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Make a path match the remote branch
    Pull {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Branch to pull
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Path inside the repository ("" for everything)
        #[arg(short, long, default_value = "")]
        path: String,
    },

    /// Push a branch that is one commit ahead of its tracking ref
    Push {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Branch to push
        #[arg(short, long, default_value = "main")]
        branch: String,
    },
}

#[derive(clap::Args, Debug)]
struct RemoteArgs {
    /// Remote name
    #[arg(long, default_value = "origin")]
    remote: String,

    /// Remote URL (defaults to the configured URL of `--remote`)
    #[arg(long)]
    url: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = NodeConfig::load(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }
    if let Some(log_format) = cli.log_format {
        config.log_format = log_format;
    }

    init_logging(&config.log_level, LogFormat::parse(&config.log_format));
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), ?config, "Configuration loaded");

    match cli.command {
        Commands::Init { remote } => commands::init(&config, remote.as_deref()),
        Commands::Serve { listen_addr } => {
            if let Some(addr) = listen_addr {
                config.listen_addr = addr;
            }
            commands::serve(&config)
        }
        Commands::Commit { message, files } => {
            commands::commit(&config, message.as_deref(), &files)
        }
        Commands::Fetch { remote } => {
            commands::fetch(&config, &remote.remote, remote.url.as_deref())
        }
        Commands::Pull {
            remote,
            branch,
            path,
        } => commands::pull(&config, &remote.remote, remote.url.as_deref(), &branch, &path),
        Commands::Push { remote, branch } => {
            commands::push(&config, &remote.remote, remote.url.as_deref(), &branch)
        }
    }
}

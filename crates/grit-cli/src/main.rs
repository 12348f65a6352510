//! grit CLI - serve and talk to Git repositories over the smart protocol.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use grit_git::ServeOptions;
use grit_transport::{AuthMethod, FetchOptions, Registry, TransportConfig};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// grit - a Git wire protocol toolkit
#[derive(Parser, Debug)]
#[command(name = "grit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// YAML file with transport settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve fetches for a repository over stdin/stdout
    UploadPack {
        /// Repository directory
        dir: PathBuf,
        #[command(flatten)]
        serve: ServeArgs,
    },

    /// Serve pushes to a repository over stdin/stdout
    ReceivePack {
        /// Repository directory
        dir: PathBuf,
        #[command(flatten)]
        serve: ServeArgs,
    },

    /// Create an empty repository
    Init {
        /// Repository directory
        dir: PathBuf,
    },

    /// List the references of a remote repository
    LsRemote {
        /// Remote URL or path
        url: String,
        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Download objects and references from a remote
    Fetch {
        /// Remote URL or path
        url: String,
        /// Local repository
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Name used under refs/remotes/
        #[arg(long, default_value = "origin")]
        remote: String,
        /// Copy every remote reference under its own name
        #[arg(long)]
        mirror: bool,
        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Update remote references from local ones
    Push {
        /// Remote URL or path
        url: String,
        /// `[+]<src>[:<dst>]` or `:<dst>` to delete
        #[arg(required = true)]
        refspecs: Vec<String>,
        /// Local repository
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[command(flatten)]
        auth: AuthArgs,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Handle a single request/response exchange (smart HTTP)
    #[arg(long)]
    stateless_rpc: bool,
    /// Only print the reference advertisement
    #[arg(long)]
    advertise_refs: bool,
}

impl From<ServeArgs> for ServeOptions {
    fn from(args: ServeArgs) -> Self {
        Self {
            stateless_rpc: args.stateless_rpc,
            advertise_refs: args.advertise_refs,
        }
    }
}

#[derive(Args, Debug)]
struct AuthArgs {
    /// HTTP basic auth user
    #[arg(long, requires = "password")]
    username: Option<String>,
    /// HTTP basic auth password
    #[arg(long)]
    password: Option<String>,
    /// HTTP bearer token
    #[arg(long, conflicts_with = "username")]
    token: Option<String>,
    /// SSH private key
    #[arg(long, conflicts_with_all = ["username", "token"])]
    ssh_key: Option<PathBuf>,
    /// SSH user for --ssh-key
    #[arg(long, default_value = "git")]
    ssh_user: String,
}

impl AuthArgs {
    fn method(self) -> Option<AuthMethod> {
        if let Some(token) = self.token {
            return Some(AuthMethod::TokenAuth { token });
        }
        if let Some(path) = self.ssh_key {
            return Some(AuthMethod::SshKey {
                user: self.ssh_user,
                path,
            });
        }
        self.username.map(|username| AuthMethod::BasicAuth {
            username,
            password: self.password.unwrap_or_default(),
        })
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TransportConfig> {
    let Some(path) = path else {
        return Ok(TransportConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let mut stdout = io::stdout();

    match cli.command {
        Commands::UploadPack { dir, serve } => commands::upload_pack(&config, &dir, serve.into())?,
        Commands::ReceivePack { dir, serve } => {
            commands::receive_pack(&config, &dir, serve.into())?
        }
        Commands::Init { dir } => commands::init(&dir, &mut stdout)?,
        Commands::LsRemote { url, auth } => {
            let registry = Registry::with_defaults(config)?;
            commands::ls_remote(&registry, &url, auth.method().as_ref(), &mut stdout)?
        }
        Commands::Fetch {
            url,
            repo,
            remote,
            mirror,
            auth,
        } => {
            let registry = Registry::with_defaults(config)?;
            let options = FetchOptions { remote, mirror };
            commands::fetch_into(
                &registry,
                &url,
                &repo,
                auth.method().as_ref(),
                &options,
                &mut stdout,
            )?
        }
        Commands::Push {
            url,
            refspecs,
            repo,
            auth,
        } => {
            let registry = Registry::with_defaults(config)?;
            commands::push_from(
                &registry,
                &url,
                &repo,
                &refspecs,
                auth.method().as_ref(),
                &mut stdout,
            )?
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries protocol data for upload-pack and receive-pack.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("grit={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

//! RBA build agent entry point.
//!
//! `run` connects to the dispatcher and processes job messages; `once`
//! performs a single source acquisition from a JSON descriptor, which is
//! the fastest way to debug a checkout; `version-probe` reports what the
//! agent detected about git and git-lfs.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rba_agent::{AcquisitionDispatcher, HttpDispatcherRpc, MessageListener};
use rba_common::cancel::CancelToken;
use rba_common::logsink::{BuildLog, TracingLog, init_logging};
use rba_common::secrets::SecretRegistry;
use rba_common::settings::AgentSettings;
use rba_common::types::{
    AgentCertificateBundle, Credential, ProxySettings, RepositoryDescriptor, SystemConnection,
};
use rba_sources::acquire::{AcquireContext, SourceAcquirer};
use rba_sources::git::{Git, GitCli};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use url::Url;

#[derive(Parser)]
#[command(name = "rba-agent")]
#[command(author, version, about = "RBA build agent - source acquisition and run loop")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the dispatcher and process job messages
    Run {
        /// Dispatcher base URL
        #[arg(long)]
        endpoint: Url,

        /// Agent pool identifier
        #[arg(long, default_value = "1")]
        pool: u64,

        /// Session credential for the dispatcher
        #[arg(long, env = "RBA_SESSION_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Acquire a single repository described by a JSON file
    ///
    /// Credentials come from the environment: RBA_BEARER_TOKEN,
    /// RBA_OAUTH_TOKEN, or RBA_USERNAME + RBA_PASSWORD.
    Once {
        /// Path to the repository descriptor (JSON)
        #[arg(long)]
        descriptor: PathBuf,
    },

    /// Print the detected git and git-lfs versions
    VersionProbe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.verbose { "debug" } else { "info" });

    match cli.command {
        Commands::Run {
            endpoint,
            pool,
            token,
        } => run_agent(endpoint, pool, token).await,
        Commands::Once { descriptor } => acquire_once(&descriptor).await,
        Commands::VersionProbe => version_probe().await,
    }
}

async fn run_agent(endpoint: Url, pool: u64, token: String) -> Result<()> {
    let configuring = Arc::new(AtomicBool::new(true));
    let cancel = CancelToken::new();
    spawn_interrupt_handler(cancel.clone(), Arc::clone(&configuring));

    let settings = AgentSettings::from_env();
    let system = SystemConnection {
        url: endpoint.clone(),
        credential: Credential::Bearer {
            token: token.clone(),
        },
    };

    let rpc = HttpDispatcherRpc::new(endpoint, token, pool)?;
    let dispatcher = AcquisitionDispatcher::new(settings, system);
    let mut listener = MessageListener::new(rpc, dispatcher, pool);

    if !listener.create_session(&cancel).await? {
        error!("unable to establish a dispatcher session");
        std::process::exit(1);
    }
    // Configuration is done: an interrupt now drains the loop instead of
    // tearing the process down.
    configuring.store(false, Ordering::SeqCst);
    info!("session established, entering run loop");

    listener.run(&cancel).await?;
    info!("run loop finished");
    Ok(())
}

async fn acquire_once(descriptor_path: &PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(descriptor_path)
        .with_context(|| format!("reading descriptor {}", descriptor_path.display()))?;
    let repository: RepositoryDescriptor =
        serde_json::from_str(&raw).context("parsing repository descriptor")?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling acquisition");
                cancel.cancel();
            }
        });
    }

    let settings = AgentSettings::from_env();
    let secrets = SecretRegistry::new();
    let log: Arc<dyn BuildLog> = Arc::new(TracingLog::new(secrets.clone()));
    let credential = credential_from_env();

    let git = GitCli::locate(&settings, Arc::clone(&log), &cancel).await?;
    let system = SystemConnection {
        url: repository.url.clone(),
        credential: Credential::None,
    };
    let acquirer = SourceAcquirer::new(
        git,
        AcquireContext {
            settings,
            system,
            log,
            secrets,
        },
    );
    acquirer
        .acquire(
            &repository,
            &credential,
            &AgentCertificateBundle::default(),
            &ProxySettings::default(),
            &cancel,
        )
        .await?;
    info!("sources ready at {}", repository.target_path.display());
    Ok(())
}

async fn version_probe() -> Result<()> {
    let settings = AgentSettings::from_env();
    let secrets = SecretRegistry::new();
    let log: Arc<dyn BuildLog> = Arc::new(TracingLog::new(secrets));
    let git = GitCli::locate(&settings, log, &CancelToken::new()).await?;

    println!("git:     {} ({})", git.version(), git.binary().display());
    match git.lfs_version() {
        Some(version) => println!("git-lfs: {version}"),
        None => println!("git-lfs: not installed"),
    }
    Ok(())
}

fn credential_from_env() -> Credential {
    if let Ok(token) = std::env::var("RBA_BEARER_TOKEN") {
        return Credential::Bearer { token };
    }
    if let Ok(token) = std::env::var("RBA_OAUTH_TOKEN") {
        return Credential::OAuth { token };
    }
    if let (Ok(username), Ok(password)) =
        (std::env::var("RBA_USERNAME"), std::env::var("RBA_PASSWORD"))
    {
        return Credential::Basic { username, password };
    }
    Credential::None
}

/// An interrupt during configuration tears the process down with exit
/// code 1; during the run loop it trips the cancel token and lets the
/// loop finish cleanly.
fn spawn_interrupt_handler(cancel: CancelToken, configuring: Arc<AtomicBool>) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if configuring.load(Ordering::SeqCst) {
                error!("interrupted while configuring, terminating");
                std::process::exit(1);
            }
            info!("interrupt received, finishing the run loop cleanly");
            cancel.cancel();
        }
    });
}

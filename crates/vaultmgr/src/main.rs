//! vaultmgr: provisions and unlocks the device's fscrypt vaults and reports
//! their encryption status.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use vaultmgr_core::{
    config::VaultmgrConfig,
    keys::{KeyDeriver, PlaceholderCloudShare},
    logging,
    service::{setup_vaults, ExternallyManagedZfs, VaultService},
    staging::KeyStager,
    status::{JsonDirPublisher, StatusResolver},
    supervision::PidFile,
    vault::VaultManager,
};
use vaultmgr_fscrypt::{SystemFscrypt, SystemKeyring, TmpfsMount, TpmHelperShare};

mod agent;
mod config_watch;

const CONFIG_ENV: &str = "VAULTMGR_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "/etc/vaultmgr.toml";

#[derive(Parser, Debug)]
#[command(name = "vaultmgr", version, about = "Vault lifecycle manager for fscrypt-protected persistent storage.")]
struct Cli {
    /// Force debug logging regardless of the global configuration.
    #[arg(short = 'd')]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Create or unlock every vault once, then exit.
    #[command(name = "setupVaults")]
    SetupVaults,

    /// Publish vault status and keep running until signalled.
    #[command(name = "runAsService")]
    RunAsService,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                err.exit();
            }
            let _ = err.print();
            std::process::exit(1);
        }
    };

    logging::init(if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    if let Err(err) = run(cli) {
        error!("vaultmgr exit: {err:?}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path =
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = VaultmgrConfig::load_or_default(&config_path)
        .with_context(|| format!("load config {config_path}"))?;
    config.debug_override = cli.debug;
    if cli.debug {
        logging::set_level(LevelFilter::Debug);
    }
    let config = Arc::new(config);
    info!("vaultmgr starting (config: {config_path})");

    match cli.command {
        Commands::SetupVaults => setup(config),
        Commands::RunAsService => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("build async runtime")?;
            runtime.block_on(serve(config))
        }
    }
}

fn setup(config: Arc<VaultmgrConfig>) -> Result<()> {
    let tool = SystemFscrypt::from_config(&config).context("initialise fscrypt")?;
    let deriver = KeyDeriver::new(
        Arc::new(PlaceholderCloudShare),
        Arc::new(TpmHelperShare::from_config(&config)),
    );
    let stager = KeyStager::new(Arc::new(TmpfsMount::from_config(&config)), deriver);
    let keyring = Arc::new(SystemKeyring::from_config(&config));
    let manager = VaultManager::new(config, tool, keyring, stager);

    let report = setup_vaults(&manager, &ExternallyManagedZfs).context("setup vaults")?;
    if !report.is_success() {
        let failed: Vec<String> = report
            .failures
            .iter()
            .map(|(path, err)| format!("{} ({})", path.display(), err.code()))
            .collect();
        bail!("failed to set up vaults: {}", failed.join(", "));
    }
    info!("vault setup complete");
    Ok(())
}

async fn serve(config: Arc<VaultmgrConfig>) -> Result<()> {
    let _pid = PidFile::acquire(config.pid_file()).context("acquire pid file")?;

    let tool = SystemFscrypt::from_config(&config).context("initialise fscrypt")?;
    let resolver = StatusResolver::new(
        config.clone(),
        tool,
        Arc::new(TpmHelperShare::from_config(&config)),
    );
    let publisher = JsonDirPublisher::new(&config.service.status_dir);
    let mut service = VaultService::new(config.clone(), resolver, publisher);

    let (tx, rx) = mpsc::channel(8);
    let watcher = tokio::spawn(config_watch::watch_global_config(
        PathBuf::from(&config.service.global_config),
        config.config_poll_interval(),
        tx,
    ));

    info!("waiting for global config at {}", config.service.global_config);
    let result = agent::run_agent(
        &mut service,
        rx,
        config.touch_file(),
        config.still_running_interval(),
        shutdown_signal(),
    )
    .await;
    watcher.abort();
    result
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            error!("unable to listen for SIGTERM: {err}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

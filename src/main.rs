//! Everest provisioner - OLM and Percona operator provisioning

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use everest_provisioner::config::ProvisionerConfig;
use everest_provisioner::connector::Connector;
use everest_provisioner::manifests::DirManifestSource;
use everest_provisioner::provision::Provisioner;

/// Everest provisioner - installs OLM, the Percona operators and PMM monitoring
#[derive(Parser, Debug)]
#[command(name = "everest-provisioner", version, about, long_about = None)]
struct Cli {
    /// Path to a YAML config file; every field is optional
    #[arg(short = 'f', long = "config", env = "EVEREST_CONFIG")]
    config_file: Option<PathBuf>,

    /// Kubeconfig to use instead of the inferred one
    #[arg(short = 'k', long)]
    kubeconfig: Option<PathBuf>,

    /// Directory holding the bundled manifests
    #[arg(long, env = "EVEREST_MANIFESTS_DIR")]
    manifests_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install OLM, the operators and monitoring (default)
    Provision(ProvisionArgs),

    /// Mint a PMM service account key and provision monitoring with it
    ProvisionPmm(PmmArgs),

    /// Delete the monitoring manifests
    CleanupMonitoring,

    /// Approve the pending install plan of an installed operator
    Upgrade {
        /// Operator package, e.g. `percona-xtradb-cluster-operator`
        name: String,
    },
}

#[derive(Parser, Debug, Default)]
struct ProvisionArgs {
    /// Skip the OLM bootstrap
    #[arg(long)]
    skip_olm: bool,

    /// Skip monitoring provisioning
    #[arg(long)]
    skip_monitoring: bool,

    /// Wait for each operator's CSV to succeed
    #[arg(long)]
    wait: bool,

    #[command(flatten)]
    pmm: PmmArgs,
}

#[derive(Parser, Debug, Default)]
struct PmmArgs {
    /// PMM server URL
    #[arg(long, env = "PMM_ENDPOINT")]
    pmm_endpoint: Option<String>,

    /// PMM admin user
    #[arg(long, env = "PMM_USERNAME")]
    pmm_username: Option<String>,

    /// PMM admin password
    #[arg(long, env = "PMM_PASSWORD", hide_env_values = true)]
    pmm_password: Option<String>,
}

impl PmmArgs {
    fn apply(&self, config: &mut ProvisionerConfig) {
        let pmm = &mut config.monitoring.pmm;
        if let Some(endpoint) = &self.pmm_endpoint {
            pmm.endpoint.clone_from(endpoint);
        }
        if let Some(username) = &self.pmm_username {
            pmm.username.clone_from(username);
        }
        if let Some(password) = &self.pmm_password {
            pmm.password.clone_from(password);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config_file {
        Some(path) => ProvisionerConfig::load(path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load config {:?}: {}", path, e))?,
        None => ProvisionerConfig::from_env(),
    };
    if let Some(kubeconfig) = cli.kubeconfig {
        config.kubeconfig = Some(kubeconfig);
    }
    if let Some(dir) = cli.manifests_dir {
        config.manifests_dir = dir;
    }

    let command = cli
        .command
        .unwrap_or_else(|| Commands::Provision(ProvisionArgs::default()));
    match &command {
        Commands::Provision(args) => {
            config.install_olm &= !args.skip_olm;
            config.monitoring.enabled &= !args.skip_monitoring;
            config.wait_for_completion |= args.wait;
            args.pmm.apply(&mut config);
        }
        Commands::ProvisionPmm(args) => args.apply(&mut config),
        Commands::CleanupMonitoring | Commands::Upgrade { .. } => {}
    }

    let connector = Connector::connect(config.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to the cluster: {}", e))?;
    let manifests = Arc::new(DirManifestSource::new(&config.manifests_dir));
    let provisioner = Provisioner::new(config, Arc::new(connector), manifests);

    match command {
        Commands::Provision(_) => provisioner.provision_cluster().await?,
        Commands::ProvisionPmm(_) => {
            let secret = provisioner.provision_pmm().await?;
            tracing::info!(secret = %secret, "PMM monitoring provisioned");
        }
        Commands::CleanupMonitoring => provisioner.cleanup_monitoring().await?,
        Commands::Upgrade { name } => provisioner.upgrade_operator(&name).await?,
    }

    Ok(())
}

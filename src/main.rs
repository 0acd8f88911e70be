// src/main.rs

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tomcat_patcher::config::{self, AgentConfig, InstanceLayout, Timings};
use tomcat_patcher::netinfo;
use tomcat_patcher::orchestrator::{Orchestrator, PatchDescriptor};
use tomcat_patcher::portal::PortalClient;
use tomcat_patcher::process::CatalinaService;
use tomcat_patcher::transport::ArchiveFetcher;
use tomcat_patcher::Severity;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "tomcat-patcher")]
#[command(
    author,
    version,
    about = "Apply a portal-assigned patch to a Tomcat instance and verify startup",
    long_about = None
)]
struct Cli {
    /// Security token for the patch portal
    #[arg(long)]
    token: String,

    /// Directory to store downloaded patches
    #[arg(long, default_value = "/tmp")]
    dir: PathBuf,

    /// Website with patch files
    #[arg(long, default_value = config::DEFAULT_ARCHIVE_WEB)]
    web: String,

    /// Override automatic IP detection
    #[arg(long)]
    ip: Option<String>,

    /// Seconds to wait for Tomcat to start up
    #[arg(long = "wait-time", default_value_t = config::DEFAULT_WAIT_SECONDS)]
    wait_time: u64,

    /// Portal endpoint that hands out patches
    #[arg(long, default_value = config::DEFAULT_PORTAL_URL)]
    portal_url: String,

    /// Portal endpoint that receives results
    #[arg(long, default_value = config::DEFAULT_REPORT_URL)]
    report_url: String,

    /// Startup log text that means "try again later"
    #[arg(long, default_value = config::DEFAULT_DEFER_SIGNATURE)]
    defer_signature: String,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<AgentConfig> {
        if self.token.trim().is_empty() {
            return Err(anyhow::anyhow!("Please provide a valid security token"));
        }

        let mut config = AgentConfig::new(self.token);
        config.cache_dir = self.dir;
        config.archive_web = if self.web.ends_with('/') {
            self.web
        } else {
            format!("{}/", self.web)
        };
        config.ip_override = self.ip;
        config.startup_wait = Duration::from_secs(self.wait_time);
        config.portal_url = self.portal_url;
        config.report_url = self.report_url;
        config.defer_signature = self.defer_signature;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = cli.into_config()?;

    let ips = netinfo::host_addresses(config.ip_override.as_deref());
    let portal = PortalClient::new(&config)?;

    let Some(manifest) = portal.fetch_manifest(&ips)? else {
        debug!("No patches returned from portal");
        return Ok(());
    };

    let descriptor = PatchDescriptor::from_manifest(&manifest);
    info!(
        "Patch {} for {}: {} archive(s), property changes: {}",
        descriptor.patch_id,
        descriptor.instance_root.display(),
        descriptor.archives.len(),
        descriptor.properties.is_some()
    );

    let fetcher = ArchiveFetcher::new(&config)?;
    let timings = Timings::default();
    let service = CatalinaService::new(InstanceLayout::new(&descriptor.instance_root), timings);
    let orchestrator = Orchestrator::new(&config, &portal, &fetcher, timings);

    match orchestrator.run(&descriptor, &service) {
        Ok(outcome) => {
            info!("Patch {} outcome: {:?}", descriptor.patch_id, outcome);
            Ok(())
        }
        Err(e) => {
            match e.severity() {
                Severity::Setup => error!("Refusing to patch: {}", e),
                Severity::MidRun => error!("Patch aborted: {}", e),
            }
            Err(e.into())
        }
    }
}

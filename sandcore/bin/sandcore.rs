use std::time::Duration;

use clap::{CommandFactory, Parser};
use sandcore::{
    cli::{styles::AnsiStyles, SandcoreArgs, SandcoreSubcommand},
    config::SandcoreConfig,
    management::{SandboxInfo, SandboxManager, SandboxStatus},
    utils, SandcoreResult,
};
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How often `run` checks that the sandbox is still alive.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> SandcoreResult<()> {
    let args = SandcoreArgs::parse();
    init_tracing(args.verbose);
    utils::load_dotenv();

    let config = match &args.config {
        Some(path) => SandcoreConfig::load(path).await?,
        None => SandcoreConfig::load_default().await?,
    };

    match args.subcommand {
        Some(SandcoreSubcommand::Run { tenant, no_save }) => {
            run_subcommand(&config, &tenant, !no_save).await?;
        }
        Some(SandcoreSubcommand::Config) => {
            print!("{}", config.to_toml()?);
        }
        None => {
            SandcoreArgs::command().print_help()?;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

async fn run_subcommand(config: &SandcoreConfig, tenant: &str, save: bool) -> SandcoreResult<()> {
    let manager = SandboxManager::from_config(config)?;
    let info = manager.create_or_get(tenant).await?;
    print_info(&info);

    println!("\n{}", "press ctrl-c to stop the sandbox".placeholder());

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("interrupted, stopping sandbox");
        }
        _ = wait_for_exit(&manager, tenant) => {
            tracing::warn!(tenant = %tenant, "sandbox exited on its own");
        }
    }

    manager.shutdown(save).await?;
    println!("{}", "sandbox stopped".valid());

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_info(info: &SandboxInfo) {
    let rows = [
        ("tenant", info.get_tenant_id().to_string()),
        ("instance", info.get_instance_id().to_string()),
        ("pid", info.get_pid().to_string()),
        ("state", info.get_lifecycle_state().to_string()),
        ("socket", info.get_control_endpoint_path().display().to_string()),
        ("disk", info.get_disk_image_path().display().to_string()),
        (
            "resources",
            format!(
                "{} vCPU, {} MiB",
                info.get_vcpu_count(),
                info.get_mem_size_mib()
            ),
        ),
        ("started", info.get_started_at().to_rfc3339()),
    ];

    for (label, value) in rows {
        println!("{:>10}  {}", label.header(), value.literal());
    }
}

async fn wait_for_exit(manager: &SandboxManager, tenant: &str) {
    loop {
        tokio::time::sleep(LIVENESS_INTERVAL).await;
        match manager.status(tenant).await {
            Ok(SandboxStatus::Running) => continue,
            Ok(SandboxStatus::Absent) => return,
            Err(e) => {
                tracing::error!(tenant = %tenant, "failed to check sandbox status: {}", e);
                return;
            }
        }
    }
}

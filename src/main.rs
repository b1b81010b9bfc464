//! csi-auth-e2e - run the CSI auth suite against a live cluster

use std::process::ExitCode;

use clap::Parser;

use csi_auth_e2e::cli::{self, Cli, Commands};
use csi_auth_e2e::telemetry::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // kube's rustls backend needs a process-wide crypto provider
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Failed to install rustls crypto provider: {e:?}");
        return Ok(ExitCode::FAILURE);
    }

    let cli = Cli::parse();
    init_logging(&LogConfig {
        format: cli.log_format,
        filter: cli.log_filter.clone(),
    })?;

    match cli.command {
        Commands::List => {
            for name in cli::list() {
                println!("{name}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run(args) => {
            let report = cli::run(&args)
                .await
                .map_err(|e| anyhow::anyhow!("suite run failed: {e}"))?;
            if report.is_success() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

//! Command-line interface

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::config::SuiteConfig;
use crate::drivers::ManifestDriver;
use crate::framework::{run_suite, FrameworkOptions, KubeCluster, SuiteReport, TestSuite};
use crate::telemetry::LogFormat;
use crate::testsuites::init_auth_test_suite;
use crate::Result;

/// csi-auth-e2e - verify that a CSI driver enforces storage-class secrets
#[derive(Parser, Debug)]
#[command(name = "csi-auth-e2e", version, about, long_about = None)]
pub struct Cli {
    /// Log output format (`pretty` or `json`)
    #[arg(long, global = true, env = "CSI_AUTH_E2E_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Log filter directive; overrides `RUST_LOG`
    #[arg(long, global = true)]
    pub log_filter: Option<String>,

    /// What to do
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the auth suite against a driver
    Run(RunArgs),

    /// Print the names of the tests in the auth suite
    List,
}

/// Arguments of `run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Driver manifest (YAML)
    #[arg(short = 'd', long, env = "CSI_AUTH_E2E_DRIVER")]
    pub driver: PathBuf,

    /// Suite configuration file (YAML or JSON)
    #[arg(short = 'f', long = "config")]
    pub config: Option<PathBuf>,

    /// Kubeconfig to use instead of the default chain
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context
    #[arg(long)]
    pub context: Option<String>,

    /// Only run tests whose name contains this string
    #[arg(long)]
    pub focus: Option<String>,

    /// Write a JSON report here
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Keep test namespaces after the run (for debugging)
    #[arg(long)]
    pub keep_namespace: bool,
}

impl RunArgs {
    /// Overlay flags on a loaded config; flags win
    pub fn apply_to(&self, config: &mut SuiteConfig) {
        if let Some(kubeconfig) = &self.kubeconfig {
            config.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(context) = &self.context {
            config.context = Some(context.clone());
        }
        if self.keep_namespace {
            config.keep_namespace = true;
        }
    }
}

/// Run the auth suite as described by `args` and return its report
pub async fn run(args: &RunArgs) -> Result<SuiteReport> {
    let mut config = SuiteConfig::load(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;

    let driver = ManifestDriver::from_file(&args.driver)?;
    let cluster =
        KubeCluster::connect(config.kubeconfig.as_deref(), config.context.as_deref()).await?;

    let options = FrameworkOptions {
        base_name: config.namespace_base.clone(),
        cluster: Arc::new(cluster),
        timeouts: config.timeouts(),
        test_image: config.test_image.clone(),
        keep_namespace: config.keep_namespace,
    };

    let suite = init_auth_test_suite();
    info!(
        suite = %suite.info().name,
        driver = %driver.manifest().driver_info.name,
        focus = ?args.focus,
        "Running suite"
    );
    let report = run_suite(&suite, &driver, &options, args.focus.as_deref()).await;

    println!("{}", render_summary(&report));
    if let Some(path) = &args.report {
        write_report(&report, path)?;
        info!(path = %path.display(), "Wrote report");
    }
    Ok(report)
}

/// Names of every test in the auth suite
pub fn list() -> Vec<&'static str> {
    init_auth_test_suite().test_names()
}

/// Human-readable summary, one line per test plus a totals line
pub fn render_summary(report: &SuiteReport) -> String {
    let mut out = format!("=== {} suite against {} ===\n", report.suite, report.driver);
    for r in &report.results {
        out.push_str(&format!("[{}] {} ({} ms)\n", r.outcome, r.name, r.duration_ms));
    }
    out.push_str(&format!(
        "{} passed, {} skipped, {} failed",
        report.passed(),
        report.skipped(),
        report.failed()
    ));
    out
}

/// Write the report as pretty-printed JSON
pub fn write_report(report: &SuiteReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wattrib::cli::{Cli, Command, ConfigArgs, RunArgs};
use wattrib::{pipeline, writer};

/// Initialize tracing subscriber; logs go to stderr
fn init_tracing(debug: bool, quiet: bool) {
    let level = if debug {
        tracing::Level::TRACE
    } else if quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn check_config(args: &ConfigArgs) -> Result<()> {
    let config = args.resolve().context("invalid configuration")?;
    let text = toml::to_string(&config).context("failed to render configuration")?;
    print!("{text}");
    Ok(())
}

fn run(args: &RunArgs) -> Result<()> {
    let config = args.config.resolve().context("invalid configuration")?;
    let paths = args.paths()?;

    let report = pipeline::run(&config, &paths)
        .with_context(|| format!("attribution failed for {}", paths.power.display()))?;

    if let Some(path) = &args.report_json {
        let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        writer::atomic_write(path, json.as_bytes())
            .with_context(|| format!("failed to write report {}", path.display()))?;
    }

    println!("{}", report.summary_line);
    if !report.audit.passed {
        tracing::error!(
            "power table rewrite did not pass the audit: {}",
            report.audit.detail.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug, args.quiet);

    match &args.command {
        Command::Run(run_args) => run(run_args),
        Command::CheckConfig(config_args) => check_config(config_args),
    }
}

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use lingopost::cli::{Cli, Command};
use lingopost::config::{Config, LoggingConfig};
use lingopost::pipeline::{LogPipeline, Pipeline, TranslationPipeline};
use lingopost::scheduler::{ImapMailSource, Scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let _guard = init_tracing(&config.logging)?;

    let config = Arc::new(config);
    let source = Arc::new(ImapMailSource::new(config.source_email.clone()));

    match cli.command {
        Command::Run(args) => {
            let pipeline = build_pipeline(&config, args.dry_run);
            let scheduler = Scheduler::new(Arc::clone(&config), source, pipeline);

            let result = scheduler.run_once().await?;
            if result.has_errors() {
                for error in &result.errors {
                    tracing::error!(%error, "Cycle error");
                }
                std::process::exit(1);
            }
        }
        Command::Daemon => {
            let pipeline = build_pipeline(&config, false);
            let scheduler = Scheduler::new(Arc::clone(&config), source, pipeline);
            scheduler.start().await?;
        }
    }

    Ok(())
}

fn build_pipeline(config: &Config, dry_run: bool) -> Arc<dyn Pipeline> {
    if dry_run {
        Arc::new(LogPipeline)
    } else {
        Arc::new(TranslationPipeline::new(
            config.llm.clone(),
            config.language.clone(),
            config.target_email.clone(),
        ))
    }
}

fn init_tracing(
    config: &LoggingConfig,
) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let dir = config
        .file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = config
        .file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "lingopost.log".into());
    std::fs::create_dir_all(dir)?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    Ok(guard)
}

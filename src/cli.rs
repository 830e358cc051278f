use crate::accounting::report::REPORT_FORMAT_VERSION;
use crate::accounting::{select_collector, ChannelQuotaAggregator, ReportAssembler, BASELINE_ACCOUNTING};
use crate::config::loader::{AccountingConfig, SandboxManifest};
use crate::core::process::ImmediateExit;
use crate::core::sandbox::Sandbox;
use crate::core::supervisor::{FdSink, ReportSink};
use crate::exec::{abort_setup, FinalizationController};
use crate::observability::audit::AuditEvent;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nix::sys::signal::Signal;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sandbox snapshot through accounting and finalization
    Run {
        /// Sandbox manifest (JSON)
        #[arg(long)]
        manifest: PathBuf,
        /// Accounting config (JSON); defaults to ./quotabox.json when present
        #[arg(long)]
        config: Option<PathBuf>,
        /// Exit code of the sandboxed program
        #[arg(long, default_value_t = 0)]
        exit_code: i32,
        /// Raise this signal instead of exiting normally (e.g. SIGSEGV or 11)
        #[arg(long, value_parser = parse_signal)]
        fault: Option<Signal>,
        /// Write the report here instead of stdout
        #[arg(long)]
        report_file: Option<PathBuf>,
    },
    /// Print the report published when accounting never ran
    Baseline,
    /// Assemble a report without finalizing and print it as JSON
    Inspect {
        /// Sandbox manifest (JSON)
        #[arg(long)]
        manifest: PathBuf,
        /// Accounting config (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_signal(value: &str) -> std::result::Result<Signal, String> {
    if let Ok(number) = value.parse::<i32>() {
        return Signal::try_from(number).map_err(|e| format!("invalid signal {}: {}", number, e));
    }
    let name = value.trim().to_ascii_uppercase();
    let name = if name.starts_with("SIG") { name } else { format!("SIG{}", name) };
    name.parse::<Signal>()
        .map_err(|e| format!("invalid signal {}: {}", value, e))
}

fn load_config(path: Option<&Path>) -> Result<AccountingConfig> {
    let config = match path {
        Some(path) => AccountingConfig::load_from_file(path)
            .with_context(|| format!("loading accounting config {}", path.display()))?,
        None => AccountingConfig::load_default()?,
    };
    Ok(config)
}

pub fn run() -> Result<()> {
    env_logger::init();

    if !cfg!(unix) {
        eprintln!("Error: quotabox requires a Unix-like system");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            manifest,
            config,
            exit_code,
            fault,
            report_file,
        } => {
            let config = load_config(config.as_deref())?;
            let manifest = SandboxManifest::load_from_file(&manifest)
                .with_context(|| format!("loading manifest {}", manifest.display()))?;
            let sandbox = Sandbox::from_manifest(&manifest);
            let run_id = sandbox.run_id();

            let sink: Box<dyn ReportSink> = match report_file {
                Some(path) => Box::new(FdSink::create(&path)?),
                None => Box::new(FdSink::stdout()),
            };

            let controller =
                match FinalizationController::from_config(&config, sandbox, sink, Box::new(ImmediateExit)) {
                    Ok(controller) => controller,
                    Err(e) => {
                        AuditEvent::setup_failed(&e).emit();
                        abort_setup(&e, &ImmediateExit);
                        return Err(e.into());
                    }
                };

            // handlers need a controller that outlives every program point
            let controller: &'static FinalizationController = Box::leak(Box::new(controller));
            if config.handle_signals {
                controller.install_fault_handlers()?;
            }

            AuditEvent::accounting_started(
                run_id,
                controller.collector().strategy_name(),
                controller.sandbox().channels().len(),
                config.unsupported_kind_policy,
            )
            .emit();

            if let Some(signal) = fault {
                controller.sandbox().record_exit_code(exit_code);
                log::info!("Raising {:?} to exercise the fault path", signal);
                nix::sys::signal::raise(signal).context("raising fault signal")?;
            }

            controller.normal_exit(exit_code);
            Ok(())
        }
        Commands::Baseline => {
            println!("{}", BASELINE_ACCOUNTING);
            Ok(())
        }
        Commands::Inspect { manifest, config } => {
            let config = load_config(config.as_deref())?;
            let manifest = SandboxManifest::load_from_file(&manifest)
                .with_context(|| format!("loading manifest {}", manifest.display()))?;
            let sandbox = Sandbox::from_manifest(&manifest);

            let collector = select_collector(
                &config,
                std::process::id(),
                sandbox.heap_extent(),
                sandbox.stack_reservation(),
            )?;
            let aggregator = ChannelQuotaAggregator::new(config.unsupported_kind_policy);
            let report = ReportAssembler::assemble(
                collector.collect(),
                aggregator.aggregate_or_zero(sandbox.channels().channels()),
            );
            collector.shutdown()?;
            let text = report.to_fixed_text()?;

            let output = serde_json::json!({
                "format_version": REPORT_FORMAT_VERSION,
                "run_id": sandbox.run_id(),
                "strategy": collector.strategy_name(),
                "policy": config.unsupported_kind_policy,
                "report": report,
                "text": text.as_str(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
    }
}

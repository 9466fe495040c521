//! CLI entrypoint for the scopert harness.

use clap::{Parser, Subcommand};

use scopert_core::{LeakReportLevel, config, push_scope};
use scopert_harness::scenarios::{Scenario, run_scenario, run_stress};
use scopert_harness::structured_log::{LogEmitter, LogLevel};

/// Black-box scenarios for the scopert runtime.
#[derive(Debug, Parser)]
#[command(name = "harness")]
#[command(about = "Scenario and fatal-path harness for the scopert runtime")]
struct Cli {
    /// Leak-report verbosity (`off`, `summary`, `full`); overrides
    /// SCOPERT_LEAK_REPORT.
    #[arg(long)]
    leak_report: Option<String>,
    /// Run id used as the trace id prefix in log output.
    #[arg(long, default_value = "harness")]
    run_id: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one named scenario.
    Scenario {
        #[arg(value_enum)]
        name: Scenario,
    },
    /// Run every scenario.
    All,
    /// Churn scopes on many threads and verify the global counters settle.
    Stress {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        #[arg(long, default_value_t = 1_000)]
        iterations: u64,
        /// Root seed for the per-worker generators.
        #[arg(long, default_value_t = 0x5C0E)]
        seed: u64,
    },
    /// Raise with no protected region: must abort with the message.
    RaiseUnprotected {
        #[arg(long, default_value = "unprotected raise")]
        message: String,
    },
    /// Abort unconditionally, even inside a protected region.
    Abort {
        #[arg(long, default_value = "invariant violated")]
        message: String,
    },
    /// Pop the root scope: must abort.
    PopRoot,
    /// Remove a resource by a token issued on another thread: must abort.
    ForeignToken,
    /// Leave allocations in the root scope and shut down, printing the report.
    Leak {
        #[arg(long, default_value_t = 1)]
        allocations: usize,
        #[arg(long, default_value_t = 16)]
        bytes: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    if let Some(level) = &cli.leak_report {
        config::set_leak_report_level(LeakReportLevel::from_str_loose(level));
    }
    let mut log = LogEmitter::to_stdout(&cli.run_id);

    match cli.command {
        Command::Scenario { name } => {
            run_scenario(name, &mut log)?;
        }
        Command::All => {
            for scenario in Scenario::ALL {
                run_scenario(scenario, &mut log)?;
            }
        }
        Command::Stress {
            threads,
            iterations,
            seed,
        } => {
            let report = run_stress(threads, iterations, seed, &mut log)?;
            if !report.clean() {
                return Err(format!(
                    "stress run left {} allocation(s) and {} resource(s) live",
                    report.live_allocations, report.live_resources
                )
                .into());
            }
        }
        Command::RaiseUnprotected { message } => {
            log.emit(LogLevel::Info, "raise_unprotected")?;
            log.flush()?;
            push_scope();
            scopert_core::raise!("{message}");
        }
        Command::Abort { message } => {
            log.emit(LogLevel::Info, "abort")?;
            log.flush()?;
            push_scope();
            let _: Result<(), _> = scopert_core::protect(|| scopert_core::abort_with!("{message}"));
            return Err("abort_with returned".into());
        }
        Command::PopRoot => {
            log.emit(LogLevel::Info, "pop_root")?;
            log.flush()?;
            scopert_core::pop_scope();
            return Err("popping the root scope returned".into());
        }
        Command::ForeignToken => {
            log.emit(LogLevel::Info, "foreign_token")?;
            log.flush()?;
            let token = std::thread::spawn(|| scopert_core::register_resource(|| {}).to_raw())
                .join()
                .map_err(|_| "token thread panicked")?;
            push_scope();
            let _mine = scopert_core::register_resource(|| {});
            drop(scopert_core::unregister_resource(
                scopert_core::ResourceHandle::from_raw(token),
            ));
            return Err("foreign token was accepted".into());
        }
        Command::Leak { allocations, bytes } => {
            push_scope();
            for _ in 0..allocations {
                let _ = scopert_core::allocate(bytes);
            }
            scopert_core::pop_scope();
            let report = scopert_core::shutdown();
            let entry = log
                .entry(LogLevel::Warn, "shutdown")
                .with_depth(0)
                .with_details(serde_json::json!({
                    "allocations": report.allocations,
                    "bytes": report.bytes,
                    "resources": report.resources,
                }));
            log.emit_entry(&entry)?;
        }
    }

    log.flush()?;
    Ok(())
}

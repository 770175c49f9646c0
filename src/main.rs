mod buildcfg;
mod cli;
mod config;
mod container;
mod dataset;
mod errors;
mod patch;
mod proc;
mod repo;
mod report;
mod runlog;
mod stubs;
mod testing;
mod transitions;
mod validator;

use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use cli::Cli;
use config::RunnerConfig;
use dataset::DatasetFilter;
use stubs::DisabledStubGenerator;
use validator::{Validator, ValidatorOptions};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "patchbench=info",
        1 => "patchbench=debug",
        _ => "patchbench=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if !cli.dataset.is_file() {
        anyhow::bail!("dataset file not found: {}", cli.dataset.display());
    }

    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let (mut runner, config_path) = RunnerConfig::load(&cwd)?;
    match config_path {
        Some(ref path) => info!("loaded config from {}", path.display()),
        None => info!("no patchbench.toml found, using defaults"),
    }
    if cli.docker_context.is_some() {
        runner.container.docker_context = cli.docker_context.clone();
    }

    let options = ValidatorOptions {
        output_dir: cli.output_dir.clone(),
        keep_containers: cli.keep_containers,
        force_restart: cli.force_restart,
    };

    let mut validator = Validator::new(runner, options, Box::new(DisabledStubGenerator))?;

    // On interrupt: flag the batch loop to stop at the next instance
    // boundary, and on a second signal tear down run-scoped containers and
    // exit hard. Already-persisted results stay on disk either way.
    let interrupt = validator.interrupt_flag();
    let containers = validator.container_manager();
    let keep_containers = cli.keep_containers;
    ctrlc::set_handler(move || {
        if interrupt.swap(true, Ordering::SeqCst) {
            eprintln!("second interrupt, cleaning up containers and exiting");
            containers.cleanup_all(keep_containers);
            std::process::exit(130);
        }
        eprintln!("interrupt received, stopping after the current instance");
    })
    .context("failed to install interrupt handler")?;

    let dataset_filter = DatasetFilter {
        include: cli.instance_ids.clone(),
        exclude: cli.exclude_instance_ids.clone(),
        max_instances: cli.max_instances,
    };

    let outcome = validator.validate_dataset(&cli.dataset, &dataset_filter)?;

    let total = outcome.results.len();
    let succeeded = outcome.succeeded();
    let tests_fixed: usize = outcome
        .results
        .values()
        .filter(|r| r.success)
        .map(|r| r.transitions.fail_to_pass_count())
        .sum();
    let tests_broken: usize = outcome
        .results
        .values()
        .filter(|r| r.success)
        .map(|r| r.transitions.pass_to_fail_count())
        .sum();
    let instrumented_skipped: usize = outcome
        .results
        .values()
        .filter(|r| r.success)
        .map(|r| r.skipped_instrumented_tests.len())
        .sum();

    println!("\nValidation complete");
    println!("  Total: {total}");
    println!("  Successful: {succeeded}");
    println!("  Failed: {}", total - succeeded);
    if total > 0 {
        println!("  Success rate: {:.1}%", succeeded as f64 / total as f64 * 100.0);
    }
    println!("  Tests fixed: {tests_fixed}");
    println!("  Tests broken: {tests_broken}");
    println!("  Instrumented tests skipped: {instrumented_skipped}");
    println!("  Results saved to: {}", cli.output_dir.display());

    if outcome.interrupted {
        warn!("run interrupted; re-run the same command to resume");
        std::process::exit(130);
    }

    // Exit 0 iff at least one instance succeeded.
    if succeeded == 0 {
        std::process::exit(1);
    }
    Ok(())
}

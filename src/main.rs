mod cli;
mod logging;
mod reporter;

use std::fs;
use std::path::Path;
use std::process;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands, ProbeCacheAction};
use colored::*;
use dotenv::dotenv;
use media_audit::config::{load_configuration, AppConfig};
use media_audit::scanner::ProbeCache;
use media_audit::{AuditEngine, AuditReport, CancelToken};
use reporter::CliReporter;
use tracing::{error, info, warn};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    let config = match load_configuration(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let result = match args.command {
        Some(Commands::Audit {
            json,
            verbose,
            max_files,
            no_protect_seeding,
            no_protect_arr_managed,
        }) => {
            let mut config = config;
            if max_files.is_some() {
                config.max_files = max_files;
            }
            config.protect_seeding &= !no_protect_seeding;
            config.protect_arr_managed &= !no_protect_arr_managed;
            run_audit(config, json.as_deref(), verbose)
        }
        Some(Commands::CheckConfig) => run_check_config(&config),
        Some(Commands::PrintConfig) => toml::to_string_pretty(&config)
            .map(|text| println!("{}", text))
            .context("serializing configuration"),
        Some(Commands::ProbeCache { action }) => run_probe_cache(&config, action),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn run_audit(config: AppConfig, json: Option<&str>, verbose: bool) -> anyhow::Result<()> {
    if !config.protect_seeding {
        warn!("Seeding protection is {}", "disabled".red());
    }
    if !config.protect_arr_managed {
        warn!("Arr-managed protection is {}", "disabled".red());
    }
    let engine = AuditEngine::new(config);
    let reporter = CliReporter::new();
    let report = engine.run(&reporter, &CancelToken::new())?;

    println!();
    print_summary(&report);
    if verbose {
        print_decisions(&report);
    }
    print_plan(&report);
    print_diagnostics(&report);

    if let Some(path) = json {
        let text = serde_json::to_string_pretty(&report).context("serializing report")?;
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text).with_context(|| format!("writing report to {}", path))?;
        info!("Report written to {}", path.green());
    }
    Ok(())
}

fn print_summary(report: &AuditReport) {
    info!(
        "Scan: {}, Sources: {}, Probe: {}, Analysis: {}",
        format!("{:.2}s", report.timings.scan.as_secs_f64()).green(),
        format!("{:.2}s", report.timings.sources.as_secs_f64()).green(),
        format!("{:.2}s", report.timings.probe.as_secs_f64()).green(),
        format!("{:.2}s", report.timings.analysis.as_secs_f64()).green(),
    );
    info!(
        "{} media files ({}), {} duplicate groups, {} unclassified",
        format!("{}", report.files.len()).cyan(),
        format_bytes(report.total_bytes()),
        format!("{}", report.duplicate_groups().count()).red(),
        report.grouping.unclassified.len(),
    );
    info!(
        "{} missing hardlinks wasting {}, {} seeding, {} orphaned seeding",
        format!("{}", report.waste.missing_hardlinks.len()).red(),
        format_bytes(report.waste.wasted_bytes).red(),
        report.waste.seeding.len(),
        report.waste.orphaned_seeding.len(),
    );
    info!(
        "{} files in an arr queue, {} managed files below their quality cutoff",
        report.diagnostics.queued_files,
        format!("{}", report.diagnostics.upgrades_recommended.len()).yellow(),
    );
    info!(
        "{} deletions, {} reclaimable, {} report-only findings",
        format!("{}", report.plan.actionable.len()).red(),
        format_bytes(report.reclaimable_bytes()).red(),
        report.plan.report_only.len(),
    );
}

fn print_decisions(report: &AuditReport) {
    for decision in &report.plan.decisions {
        match decision.keeper {
            Some(id) => {
                let keeper = report.file(id);
                let score = keeper.score.as_ref().map(|s| s.to_string()).unwrap_or_default();
                println!("{} {} {} {}", "KEEP".green(), decision.key, keeper.path_str(), score.dimmed());
            }
            None => println!("{} {} (no eligible keeper)", "KEEP".yellow(), decision.key),
        }
    }
}

fn print_plan(report: &AuditReport) {
    for entry in &report.plan.actionable {
        println!(
            "{} [{}] {} ({})",
            "DELETE".red(),
            entry.reason,
            entry.path,
            format_bytes(report.file(entry.file).size)
        );
    }
    for entry in &report.plan.report_only {
        println!("{} [{}] {}", "REPORT".yellow(), entry.reason, entry.path);
    }
    for conflict in &report.season_conflicts {
        println!(
            "{} {} season {}: {} (use \"{}\")",
            "SEASON".yellow(),
            conflict.series,
            conflict.season,
            conflict.folders.join(", "),
            conflict.recommended
        );
    }
}

fn print_diagnostics(report: &AuditReport) {
    let diag = &report.diagnostics;
    for failure in &diag.failed_sources {
        warn!("Source {} failed: {}", failure.source.yellow(), failure.error);
    }
    for path in &diag.unreadable {
        warn!("Unreadable: {}", path);
    }
    for (path, err) in &diag.probe_failures {
        warn!("Probe failed for {}: {}", path, err);
    }
    for (source, count) in &diag.unmapped_records {
        warn!("{} records from {} had no path mapping", count, source);
    }
    if !diag.unmatched_records.is_empty() {
        warn!("{} source records matched no scanned file", diag.unmatched_records.len());
    }
    for mismatch in &diag.nlink_mismatches {
        warn!(
            "Link count of {} changed during the run ({} -> {})",
            mismatch.path, mismatch.scan_nlink, mismatch.match_nlink
        );
    }
    for warning in &diag.warnings {
        warn!("{}", warning);
    }
}

fn run_check_config(config: &AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    media_audit::mapping::PathMapper::from_config(config)?;
    for root in &config.roots {
        if !Path::new(root).is_dir() {
            warn!("Root {} is not a readable directory", root);
        }
    }
    info!("Configuration is {}", "valid".green());
    Ok(())
}

fn run_probe_cache(config: &AppConfig, action: ProbeCacheAction) -> anyhow::Result<()> {
    let path = config.probe_cache_path();
    match action {
        ProbeCacheAction::Count => {
            let cache = ProbeCache::load(Path::new(&path))?;
            println!("{} cached probe results in {}", cache.len(), path);
        }
        ProbeCacheAction::Clear => {
            if ProbeCache::clear(Path::new(&path))? {
                println!("Removed {}", path);
            } else {
                println!("No probe cache at {}", path);
            }
        }
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

//! RouteWatch CLI
//!
//! `simulate` runs deterministic scenarios against a scripted fleet;
//! `live` tracks a real route against the MBTA API and logs display ops.

use clap::{Args, Parser, Subcommand};
use routewatch_core::{positive_duration, RouteTracker, TrackerConfig, TracingSink};
use routewatch_env::{HttpFeed, TokioContext};
use routewatch_sim::scenarios::ScenarioId;
use routewatch_sim::{ScenarioResult, ScenarioRunner};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// RouteWatch live transit tracker
#[derive(Parser, Debug)]
#[command(name = "routewatch")]
#[command(about = "Track live transit vehicles on a map display", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run simulation scenarios on a virtual clock
    Simulate(SimulateArgs),
    /// Track a live route
    Live(LiveArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Scenario to run (steady_state, fleet_churn, flaky_feed, slow_feed, malformed_records, route_refresh, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of consecutive seeds to run (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulated duration in seconds
    #[arg(short, long, default_value = "600", value_parser = parse_seconds)]
    duration: Duration,

    /// Tracker poll period in seconds
    #[arg(short, long, default_value = "25", value_parser = parse_period)]
    period: Duration,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the run's frames to a JSON file (single scenario only)
    #[arg(long)]
    export: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct LiveArgs {
    /// JSON config file; missing keys take defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Route to track (overrides config)
    #[arg(short, long)]
    route: Option<String>,

    /// Poll period in seconds (overrides config)
    #[arg(short, long, value_parser = parse_period)]
    period: Option<Duration>,

    /// API base URL (overrides config)
    #[arg(long)]
    api_base: Option<String>,
}

/// Parses a non-negative number of seconds.
fn parse_seconds(arg: &str) -> Result<Duration, String> {
    let secs: f64 = arg.parse().map_err(|e| format!("{}", e))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{} seconds: {}", arg, e))
}

/// Parses a poll period: seconds that stay non-zero as a `Duration`.
fn parse_period(arg: &str) -> Result<Duration, String> {
    let secs: f64 = arg.parse().map_err(|e| format!("{}", e))?;
    positive_duration("period", secs).map_err(|e| e.to_string())
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let code = match cli.command {
        Command::Simulate(args) => simulate(args),
        Command::Live(args) => match live(args) {
            Ok(()) => 0,
            Err(e) => {
                error!("{}", e);
                1
            }
        },
    };

    std::process::exit(code);
}

fn simulate(args: SimulateArgs) -> i32 {
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                return 1;
            }
        }
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    if !args.json {
        info!("RouteWatch simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    if let Some(path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            return 1;
        }

        let runner = ScenarioRunner::new(base_seed)
            .with_duration(args.duration)
            .with_poll_period(args.period);
        let (result, export) = runner.run_with_export(scenarios[0]);
        if let Err(e) = export.write_to_file(path) {
            error!("Failed to write export: {}", e);
            return 1;
        }
        info!("Exported {} frames to {}", export.frames.len(), path.display());
        report(&result);
        return if result.passed { 0 } else { 1 };
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed)
            .with_duration(args.duration)
            .with_poll_period(args.period);

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result);
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed == 0 {
            info!("All {} scenario runs passed", total);
        } else {
            error!("{}/{} scenario runs failed", failed, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario,
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if failed > 0 {
        1
    } else {
        0
    }
}

fn report(result: &ScenarioResult) {
    let m = &result.metrics;
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED | cycles={} skipped={} failures={} +{} ~{} -{}",
            result.scenario,
            result.seed,
            m.cycles_applied,
            m.cycles_skipped,
            m.fetch_failures,
            m.markers_created,
            m.markers_moved,
            m.markers_removed
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario,
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

fn live(args: LiveArgs) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(route) = args.route {
        config = config.with_route(route);
    }
    if let Some(period) = args.period {
        config = config.with_poll_period(period);
    }
    if let Some(base) = args.api_base {
        config.api_base_url = base;
    }
    config.validate()?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let feed = HttpFeed::new(config.api_base_url.clone(), config.route(), config.request_timeout()?)?;
        let sink = TracingSink::new(config.marker_style.clone(), config.route_style.clone());
        let mut tracker = RouteTracker::new(TokioContext::shared(), Arc::new(feed), sink, config)?;

        tracker.start();
        tokio::signal::ctrl_c().await?;
        tracker.stop();

        let stats = tracker.stats().await;
        info!(
            "Stopped after {} cycles ({} skipped, {} failed fetches); {} vehicles on display",
            stats.cycles_applied,
            stats.cycles_skipped,
            stats.fetch_failures,
            tracker.display_table().await.len()
        );
        Ok::<(), Box<dyn Error>>(())
    })
}

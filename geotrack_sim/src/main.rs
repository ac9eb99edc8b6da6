//! GeoTrack load generator CLI
//!
//! Live mode drives a tracker population from a CSV file against the
//! in-process classifier and takes attack commands on stdin. Scenario mode
//! runs the deterministic simulation scenarios and reports pass/fail.

use clap::Parser;
use geotrack_core::{
    AlertClassifier, AttackInjector, ClassifierPool, DispatcherConfig, EntityCatalog,
    MemoryRecordStore, PacedDispatcher, PoolConfig, PopulationLoader, RecordStore, SledRecordStore,
};
use geotrack_env::TokioContext;
use geotrack_sim::control::{HELP_TEXT, PROMPT};
use geotrack_sim::scenarios::ScenarioId;
use geotrack_sim::{clamp_population, Command, ScenarioResult, ScenarioRunner, DEFAULT_ATTACK_IDS};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const EXIT_OK: i32 = 0;
const EXIT_SCENARIO_FAILED: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_DISPATCHER_FAILURE: i32 = 19;

/// GeoTrack condition-event load generator
#[derive(Parser, Debug)]
#[command(name = "geotrack")]
#[command(about = "Generate paced tracker condition events and classify them", long_about = None)]
struct Args {
    /// Population CSV (id,type,status,region,longitude,latitude,attacked)
    #[arg(short = 'f', long, required_unless_present = "scenario")]
    csv_file: Option<PathBuf>,

    /// Number of trackers to load
    #[arg(short = 'n', long, default_value = "2000")]
    num_trackers: usize,

    /// Target random events per second
    #[arg(short = 'm', long, default_value = "1000")]
    msgs_per_second: usize,

    /// Sled directory for entity records (default: in memory)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Classifier worker count
    #[arg(long, default_value = "8")]
    workers: usize,

    /// Seconds an attack override lasts
    #[arg(long, default_value = "30")]
    attack_duration_secs: u64,

    /// Master seed (0 = entropy in live mode, time-derived in scenario mode)
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Run a simulation scenario instead (steady, attack_wave, lossy_network, hot_spot, all)
    #[arg(short = 'S', long)]
    scenario: Option<String>,

    /// Stop after this many ticks
    #[arg(long)]
    ticks: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing (scenario mode)
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let code = match (&args.scenario, &args.csv_file) {
        (Some(scenario), _) => run_scenarios(&args, scenario).await,
        (None, Some(path)) => run_live(&args, path.clone()).await,
        (None, None) => EXIT_USAGE,
    };
    std::process::exit(code);
}

// =============================================================================
// LIVE MODE
// =============================================================================

async fn run_live(args: &Args, path: PathBuf) -> i32 {
    let (num_trackers, msgs_per_second) = clamp_population(args.num_trackers, args.msgs_per_second);

    let report = match PopulationLoader::new(num_trackers)
        .with_priority_ids(&DEFAULT_ATTACK_IDS)
        .load_path(&path)
    {
        Ok(report) => report,
        Err(e) => {
            error!("Cannot load {}: {}", path.display(), e);
            return EXIT_USAGE;
        }
    };

    let config = DispatcherConfig::default()
        .with_msgs_per_second(msgs_per_second)
        .with_attack_duration(Duration::from_secs(args.attack_duration_secs));
    let pool = PoolConfig {
        workers: args.workers,
        ..PoolConfig::default()
    };

    match &args.store {
        Some(dir) => match SledRecordStore::open(dir) {
            Ok(store) => drive(Arc::new(store), report.catalog, config, pool, args).await,
            Err(e) => {
                error!("Cannot open store {}: {}", dir.display(), e);
                EXIT_USAGE
            }
        },
        None => drive(Arc::new(MemoryRecordStore::new()), report.catalog, config, pool, args).await,
    }
}

async fn drive<S: RecordStore>(
    store: Arc<S>,
    catalog: EntityCatalog,
    config: DispatcherConfig,
    pool: PoolConfig,
    args: &Args,
) -> i32 {
    let catalog = Arc::new(catalog);
    let context = Arc::new(TokioContext::with_seed(args.seed));
    let transport = Arc::new(ClassifierPool::spawn(store, AlertClassifier::new(), pool));
    let mut dispatcher = PacedDispatcher::new(
        context,
        transport,
        Arc::clone(&catalog),
        AttackInjector::new(Arc::clone(&catalog)),
        config,
    );
    let injector = dispatcher.injector().clone();
    let ticks = args.ticks;

    let mut generator = tokio::spawn(async move {
        dispatcher.initialize().await?;
        match ticks {
            Some(ticks) => dispatcher.run_for(ticks).await,
            None => dispatcher.run().await.map(|()| dispatcher.stats()),
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        println!("bye.");
                        return EXIT_OK;
                    }
                    Err(e) => {
                        error!("Cannot read commands: {}", e);
                        return EXIT_OK;
                    }
                };
                match Command::parse(&line) {
                    Command::Quit => {
                        println!("bye.");
                        return EXIT_OK;
                    }
                    Command::Help => println!("{}", HELP_TEXT),
                    Command::AttackDefaults => {
                        println!("Asynchronously attacking default nodes.");
                        for e in injector.attack_all(DEFAULT_ATTACK_IDS) {
                            println!("{}", e);
                        }
                    }
                    Command::Attack(id) => {
                        println!("Asynchronously attacking {}.", id);
                        if let Err(e) = injector.attack(&id) {
                            println!("{}", e);
                        }
                    }
                    Command::Empty => {}
                    Command::Unknown(_) => {
                        println!("Unknown command.");
                        println!("{}", HELP_TEXT);
                    }
                }
            }
            joined = &mut generator => {
                return match joined {
                    Ok(Ok(stats)) => {
                        info!(
                            "Load generator finished: {} ticks, {} dispatched, {} delivered, {} failed",
                            stats.ticks, stats.dispatched, stats.delivered, stats.failed
                        );
                        EXIT_OK
                    }
                    Ok(Err(e)) => {
                        error!("Load generator failed: {}", e);
                        EXIT_DISPATCHER_FAILURE
                    }
                    Err(e) => {
                        error!("Load generator task aborted: {}", e);
                        EXIT_DISPATCHER_FAILURE
                    }
                };
            }
        }
    }
}

fn prompt() {
    print!("{}", PROMPT);
    let _ = std::io::stdout().flush();
}

// =============================================================================
// SCENARIO MODE
// =============================================================================

async fn run_scenarios(args: &Args, scenario: &str) -> i32 {
    let scenarios: Vec<ScenarioId> = if scenario == "all" {
        ScenarioId::all()
    } else {
        match scenario.parse() {
            Ok(id) => vec![id],
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Available scenarios: steady, attack_wave, lossy_network, hot_spot, all");
                return EXIT_USAGE;
            }
        }
    };

    // Determine base seed
    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    if !args.json {
        info!("GeoTrack scenario runner v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let mut runner = ScenarioRunner::new(seed);
    if let Some(ticks) = args.ticks {
        runner = runner.with_ticks(ticks);
    }

    let mut results: Vec<ScenarioResult> = Vec::new();
    for scenario in scenarios {
        let result = runner.run(scenario).await;
        if !args.json {
            if result.passed {
                info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    scenario.name(),
                    seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
        results.push(result);
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    if args.json {
        let summary = serde_json::json!({
            "total": results.len(),
            "passed": results.len() - failed,
            "failed": failed,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "records": r.final_record_count,
                    "dispatched": r.stats.dispatched,
                    "delivered": r.stats.delivered,
                    "failed_deliveries": r.stats.failed,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => warn!("Cannot encode summary: {}", e),
        }
    } else if failed == 0 {
        info!("✅ All {} scenario runs passed!", results.len());
    } else {
        error!("❌ {}/{} scenario runs failed!", failed, results.len());
    }

    if failed > 0 {
        EXIT_SCENARIO_FAILED
    } else {
        EXIT_OK
    }
}

//! ARBOR CLI
//!
//! Explores a synthetic execution tree with the concurrent engine, streaming
//! interesting paths as they are found.

#![warn(missing_docs)]
#![warn(clippy::all)]

use arbor_core::Settings;
use arbor_runtime::Engine;
use arbor_sim::{DEFAULT_SIM_K, InterestingPath, SimConfig, SimHarness, SimReport, SimSeed, TreeModel, TreeSemantics};
use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// How often the spinner message is refreshed
const TICK: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "ARBOR - concurrent execution-tree explorer", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Explore a synthetic execution tree
    Explore(ExploreArgs),
    /// Print the default engine settings as JSON
    Settings {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ExploreArgs {
    /// Engine settings file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Maximum path length in steps
    #[arg(short, long)]
    k: Option<usize>,
    /// Maximum processing time per path, in seconds
    #[arg(long)]
    max_time: Option<f64>,
    /// Worker threads (0 = one per hardware thread)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,
    /// Successors per unit
    #[arg(long)]
    branching: Option<usize>,
    /// Steps per unit
    #[arg(long)]
    steps_per_unit: Option<usize>,
    /// Probability that a unit reports a fault
    #[arg(long)]
    fault_rate: Option<f64>,
    /// Probability that a unit fails to execute
    #[arg(long)]
    failure_rate: Option<f64>,
    /// Probability that a unit contains an unknown instruction
    #[arg(long)]
    unknown_rate: Option<f64>,
    /// Probability that an edge is infeasible
    #[arg(long)]
    infeasible_rate: Option<f64>,
    /// Model seed
    #[arg(long, conflicts_with_all = ["seed_name", "random_seed"])]
    seed: Option<u64>,
    /// Derive the model seed from a name
    #[arg(long, conflicts_with = "random_seed")]
    seed_name: Option<String>,
    /// Draw a fresh model seed; it is logged so the run can be repeated
    #[arg(long)]
    random_seed: bool,
    /// Seconds between statistics reports (0 disables them)
    #[arg(long, default_value_t = 10.0)]
    report_interval: f64,
    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

impl ExploreArgs {
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::new().with_k(DEFAULT_SIM_K),
        };
        if let Some(k) = self.k {
            settings.k = k;
        }
        if let Some(max_time) = self.max_time {
            settings.max_time = Some(max_time);
        }
        settings.validate()?;
        Ok(settings)
    }

    fn seed(&self) -> Option<SimSeed> {
        if let Some(seed) = self.seed {
            Some(SimSeed::from_literal(seed))
        } else if let Some(name) = &self.seed_name {
            Some(SimSeed::from_string(name.as_str()))
        } else if self.random_seed {
            Some(SimSeed::random())
        } else {
            None
        }
    }

    fn model(&self) -> TreeModel {
        let defaults = TreeModel::default();
        TreeModel {
            branching: self.branching.unwrap_or(defaults.branching),
            steps_per_unit: self.steps_per_unit.unwrap_or(defaults.steps_per_unit),
            fault_rate: self.fault_rate.unwrap_or(defaults.fault_rate),
            failure_rate: self.failure_rate.unwrap_or(defaults.failure_rate),
            unknown_rate: self.unknown_rate.unwrap_or(defaults.unknown_rate),
            infeasible_rate: self.infeasible_rate.unwrap_or(defaults.infeasible_rate),
            seed: self.seed().map_or(defaults.seed, |seed| seed.seed),
        }
    }

    fn sim_config(&self) -> Result<SimConfig> {
        let model = self.model();
        model.validate()?;
        Ok(SimConfig::new(model)
            .with_settings(self.settings()?)
            .with_threads(self.threads))
    }

    fn report_interval(&self) -> Result<Option<Duration>> {
        if self.report_interval == 0.0 {
            return Ok(None);
        }
        Duration::try_from_secs_f64(self.report_interval)
            .map(Some)
            .map_err(|err| eyre!("invalid report interval {}: {}", self.report_interval, err))
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Explore(args) => explore(&args),
        Commands::Settings { output } => {
            let json = Settings::new().to_json()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json + "\n")?;
                    println!("Wrote default settings to {}", path.display());
                }
                None => println!("{}", json),
            }
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn explore(args: &ExploreArgs) -> Result<()> {
    let config = args.sim_config()?;
    let interval = args.report_interval()?;
    debug!(?config, "exploration config");
    info!(seed = config.model.seed, "model seed");
    let harness = SimHarness::new(config)?;

    let spinner = if args.json {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")?);
        spinner.enable_steady_tick(TICK);
        spinner
    };

    let done = AtomicBool::new(false);
    let report = std::thread::scope(|scope| {
        scope.spawn(|| watch(harness.engine(), &spinner, interval, &done));
        let result = harness.run_with(|path| {
            if !args.json {
                spinner.println(format_path(path));
            }
        });
        done.store(true, Ordering::Release);
        result
    })?;
    spinner.finish_and_clear();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

/// Refresh the spinner and print statistics until `done` is set
fn watch(engine: &Engine<TreeSemantics>, spinner: &ProgressBar, interval: Option<Duration>, done: &AtomicBool) {
    let mut last_report = Instant::now();
    while !done.load(Ordering::Acquire) {
        spinner.set_message(format!(
            "{} explored, {} pending, {} working of {}",
            engine.n_paths_explored(),
            engine.n_paths_pending(),
            engine.n_working(),
            engine.work_capacity(),
        ));
        if interval.is_some_and(|interval| last_report.elapsed() >= interval) {
            for line in engine.statistics().render("  ").lines() {
                spinner.println(line);
            }
            last_report = Instant::now();
        }
        std::thread::sleep(TICK);
    }
}

fn format_path(path: &InterestingPath) -> String {
    let tags: Vec<String> = path.tags.iter().map(ToString::to_string).collect();
    format!(
        "interesting ({} steps): {} [{}]",
        path.n_steps,
        path.units.join(" -> "),
        tags.join("; ")
    )
}

fn print_summary(report: &SimReport) {
    println!(
        "Explored {} paths ({} steps) in {:.3} seconds; {} interesting",
        report.paths_explored,
        report.steps_explored,
        report.elapsed_seconds,
        report.interesting.len()
    );
    print!("{}", report.statistics.render("  "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::Tag;
    use clap::CommandFactory;

    fn explore_args(argv: &[&str]) -> ExploreArgs {
        let cli = Cli::try_parse_from(std::iter::once("arbor").chain(argv.iter().copied())).unwrap();
        match cli.command {
            Commands::Explore(args) => args,
            Commands::Settings { .. } => panic!("expected explore"),
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_explore_defaults() {
        let args = explore_args(&["explore"]);
        let config = args.sim_config().unwrap();
        assert_eq!(config.settings.k, DEFAULT_SIM_K);
        assert_eq!(config.model, TreeModel::default());
        assert_eq!(config.threads, 0);
        assert_eq!(args.report_interval().unwrap(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_explore_flags_override() {
        let args = explore_args(&[
            "explore",
            "--k",
            "5",
            "--max-time",
            "2.5",
            "--threads",
            "3",
            "--branching",
            "4",
            "--fault-rate",
            "0.5",
            "--seed",
            "9",
            "--report-interval",
            "0",
            "--json",
        ]);
        let config = args.sim_config().unwrap();
        assert_eq!(config.settings.k, 5);
        assert_eq!(config.settings.max_time, Some(2.5));
        assert_eq!(config.threads, 3);
        assert_eq!(config.model.branching, 4);
        assert_eq!(config.model.fault_rate, 0.5);
        assert_eq!(config.model.seed, 9);
        assert_eq!(args.report_interval().unwrap(), None);
        assert!(args.json);
    }

    #[test]
    fn test_settings_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"k": 7, "reject_unknown_insns": false}"#).unwrap();

        let file = path.to_str().unwrap();
        let settings = explore_args(&["explore", "--config", file]).settings().unwrap();
        assert_eq!(settings.k, 7);
        assert!(!settings.reject_unknown_insns);

        let settings = explore_args(&["explore", "--config", file, "--k", "3"]).settings().unwrap();
        assert_eq!(settings.k, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(explore_args(&["explore", "--k", "0"]).sim_config().is_err());
        assert!(explore_args(&["explore", "--fault-rate", "3"]).sim_config().is_err());
        assert!(explore_args(&["explore", "--max-time=-1"]).sim_config().is_err());
        assert!(explore_args(&["explore", "--max-time", "1e20"]).sim_config().is_err());
        assert!(explore_args(&["explore", "--report-interval=-1"]).report_interval().is_err());
        assert!(explore_args(&["explore", "--config", "/nonexistent/settings.json"]).settings().is_err());
    }

    #[test]
    fn test_seed_sources() {
        let by_name = explore_args(&["explore", "--seed-name", "nightly"]).model();
        assert_eq!(by_name.seed, SimSeed::from_string("nightly").seed);
        assert_eq!(explore_args(&["explore", "--seed-name", "nightly"]).model(), by_name);

        let random = explore_args(&["explore", "--random-seed"]).sim_config().unwrap();
        assert!(random.model.validate().is_ok());

        assert!(Cli::try_parse_from(["arbor", "explore", "--seed", "1", "--seed-name", "x"]).is_err());
        assert!(Cli::try_parse_from(["arbor", "explore", "--seed-name", "x", "--random-seed"]).is_err());
    }

    #[test]
    fn test_log_json_is_global() {
        let cli = Cli::try_parse_from(["arbor", "explore", "--log-json"]).unwrap();
        assert!(cli.log_json);
        let cli = Cli::try_parse_from(["arbor", "settings", "-o", "out.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Settings { output: Some(_) }));
    }

    #[test]
    fn test_format_path() {
        let path = InterestingPath {
            units: vec!["unit 0x0".to_string(), "unit 0x2".to_string()],
            addresses: vec![0, 2],
            n_steps: 2,
            tags: vec![Tag::new("fault", "fault after 2 steps").with_address(2)],
        };
        assert_eq!(
            format_path(&path),
            "interesting (2 steps): unit 0x0 -> unit 0x2 [fault at 0x2: fault after 2 steps]"
        );
    }

    #[test]
    fn test_explore_end_to_end() {
        let args = explore_args(&["explore", "--k", "3", "--threads", "2", "--fault-rate", "1", "--json"]);
        let harness = SimHarness::new(args.sim_config().unwrap()).unwrap();
        let report = harness.run().unwrap();
        assert_eq!(report.paths_explored, 7);
        assert_eq!(report.interesting.len(), 7);
    }
}

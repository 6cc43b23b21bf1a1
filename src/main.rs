//! script-filter - run a Rhai filter script over a batch of readings
//!
//! Stands in for a pipeline host: reads a JSON array of readings, passes it
//! through one filter instance and prints whatever the filter forwards.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use script_filter::{
    config::{plugin_info, HostSettings},
    pipeline::{InMemoryAssetTracker, ScriptFilter},
    scripting::builtins,
    ReadingSet,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "script-filter")]
#[command(about = "Transform reading batches with an embedded Rhai script", long_about = None)]
#[command(version)]
struct Cli {
    /// Host settings file (TOML)
    #[arg(short, long, global = true, env = "SCRIPT_FILTER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter a batch of readings
    Run(RunArgs),

    /// Print the plugin information and default configuration
    Info,

    /// Write a starter script into the scripts directory
    NewScript(NewScriptArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Readings file (JSON array); stdin when omitted
    input: Option<PathBuf>,

    /// Directory holding `<name>.rhai` scripts
    #[arg(long, env = "SCRIPT_FILTER_SCRIPTS_DIR")]
    scripts_dir: Option<PathBuf>,

    /// Script to run, overriding the settings file
    #[arg(short, long)]
    script: Option<String>,

    /// JSON configuration handed to the script
    #[arg(long)]
    script_config: Option<String>,

    /// Run with the filter disabled
    #[arg(long)]
    disable: bool,

    /// Reconfiguration JSON applied before ingesting
    #[arg(long)]
    reconfigure: Option<PathBuf>,

    /// Pretty-print the output
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct NewScriptArgs {
    /// Script (and filter function) name
    name: String,

    /// Template to start from
    #[arg(short, long, default_value = "passthrough")]
    template: String,

    /// Directory to write into
    #[arg(long, env = "SCRIPT_FILTER_SCRIPTS_DIR")]
    scripts_dir: Option<PathBuf>,

    /// Replace an existing script
    #[arg(long)]
    force: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = HostSettings::load_or_default(cli.config.as_deref())
        .context("Failed to load host settings")?;

    let _log_guard = init_tracing(&settings.log_level, cli.verbose);

    match cli.command {
        Commands::Run(args) => run(settings, args),
        Commands::Info => {
            println!("{}", serde_json::to_string_pretty(&plugin_info())?);
            Ok(())
        }
        Commands::NewScript(args) => new_script(settings, args),
    }
}

fn init_tracing(level: &str, verbose: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let default = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .init();

    guard
}

fn run(mut settings: HostSettings, args: RunArgs) -> Result<()> {
    if let Some(dir) = args.scripts_dir {
        settings.scripts_dir = Some(dir);
    }
    if let Some(script) = args.script {
        settings.filter.script = script;
        settings.filter.enable = true;
    }
    if let Some(text) = args.script_config {
        settings.filter.config =
            serde_json::from_str(&text).context("--script-config is not valid JSON")?;
    }
    if args.disable {
        settings.filter.enable = false;
    }

    let scripts_dir = settings.resolved_scripts_dir()?;
    let readings = read_readings(args.input.as_deref())?;
    tracing::info!(count = readings.len(), scripts_dir = ?scripts_dir, "Loaded readings");

    let (tx, rx) = crossbeam_channel::unbounded::<ReadingSet>();
    let tracker = Arc::new(InMemoryAssetTracker::new());
    let filter = ScriptFilter::init(
        &settings.filter.to_category(),
        scripts_dir.clone(),
        tx,
        tracker.clone(),
    )
    .context("Failed to start filter")?;

    if let Some(path) = args.reconfigure {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        // A rejected reconfiguration keeps the previous state; carry on.
        if let Err(e) = filter.reconfigure(&text) {
            tracing::warn!("Continuing with previous configuration: {e}");
        }
    }

    filter.ingest(readings);
    let stats = filter.stats();
    filter.shutdown();

    let forwarded: Vec<ReadingSet> = rx.try_iter().collect();
    let [output] = forwarded.as_slice() else {
        bail!("filter forwarded {} batches, expected exactly one", forwarded.len());
    };

    let json = if args.pretty {
        serde_json::to_string_pretty(output)?
    } else {
        serde_json::to_string(output)?
    };
    println!("{json}");

    tracing::info!(
        transformed = stats.transformed,
        fallbacks = stats.fallbacks(),
        tracked_assets = tracker.tuples().len(),
        "Done"
    );
    Ok(())
}

fn read_readings(path: Option<&Path>) -> Result<ReadingSet> {
    let text = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            text
        }
    };
    serde_json::from_str(&text).context("Input is not a JSON array of readings")
}

fn new_script(settings: HostSettings, args: NewScriptArgs) -> Result<()> {
    if !script_filter::scripting::is_valid_script_name(&args.name) {
        bail!("'{}' is not a valid script name", args.name);
    }
    let Some(template) = builtins::get(&args.template) else {
        let names: Vec<_> = builtins::all().into_iter().map(|(name, _)| name).collect();
        bail!(
            "unknown template '{}', expected one of: {}",
            args.template,
            names.join(", ")
        );
    };

    let dir = match args.scripts_dir {
        Some(dir) => dir,
        None => settings.resolved_scripts_dir()?,
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = dir.join(format!(
        "{}.{}",
        args.name,
        script_filter::config::SCRIPT_EXTENSION
    ));
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to replace it)", path.display());
    }
    std::fs::write(&path, builtins::render(template, &args.name))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("{}", path.display());
    Ok(())
}

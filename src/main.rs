use anyhow::{Context, Result};
use callguard::alert::AlertAssessor;
use callguard::cli::{Cli, Commands, ConfigAction};
use callguard::config::Config;
use callguard::pipeline::Relay;
use callguard::protocol;
use callguard::replay::{self, ReplaySummary};
use callguard::scoring::{ClippingScorer, Scorer};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            input,
            grace,
            dump_dir,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            apply_verbosity(&mut config, cli.verbose);
            callguard::logging::init(&config.logging);
            run_replay(config, &input, grace, dump_dir)?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
    }

    Ok(())
}

/// Load configuration from a custom path or the default location.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        // Try default path, fall back to defaults
        match Config::default_path() {
            Some(path) => Config::load_or_default(&path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        }
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

fn apply_verbosity(config: &mut Config, verbose: u8) {
    match verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
}

fn run_replay(
    mut config: Config,
    input: &str,
    grace: Option<Duration>,
    dump_dir: Option<PathBuf>,
) -> Result<()> {
    if let Some(grace) = grace {
        config.session.drain_grace_ms = grace.as_millis() as u64;
    }
    if dump_dir.is_some() {
        config.diagnostics.dump_dir = dump_dir;
    }
    config.validate().context("invalid configuration")?;
    tracing::info!(version = %callguard::version_string(), input, "starting replay");

    let scorer: Arc<dyn Scorer> = Arc::new(ClippingScorer::new());
    let relay = Relay::new(config.pipeline_config(), scorer)?;
    let assessor = AlertAssessor::new(config.alert.genuine_threshold);

    let reader: Box<dyn BufRead> = if input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(input).with_context(|| format!("opening {input}"))?;
        Box::new(BufReader::new(file))
    };

    let summary = replay::run(reader, &relay, assessor)?;
    print_summary(&summary)?;

    if !summary.report.complete {
        anyhow::bail!(
            "session did not drain within the grace period (stuck: {})",
            summary.report.stuck.join(", ")
        );
    }
    if let Some(reason) = &summary.report.aborted {
        anyhow::bail!("session aborted: {reason}");
    }
    Ok(())
}

fn print_summary(summary: &ReplaySummary) -> Result<()> {
    for record in &summary.scores {
        let line = serde_json::json!({
            "event": "score",
            "window": record.window_index,
            "covers_through": record.covers_through,
            "score": record.score,
            "inference_ms": record.inference.as_millis() as u64,
        });
        println!("{line}");
    }
    for interrupt in &summary.interrupts {
        println!("{}", protocol::encode_clear(&interrupt.session_id)?);
    }
    for alert in &summary.alerts {
        println!("{}", alert.to_json()?);
    }
    eprintln!(
        "{} events, {} dropped, {} scores, {} interrupts, {} alerts in {:.2}s",
        summary.events_accepted,
        summary.lines_dropped,
        summary.scores.len(),
        summary.interrupts.len(),
        summary.alerts.len(),
        summary.report.elapsed.as_secs_f64()
    );
    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", toml::to_string(&config).context("serializing configuration")?);
        }
        ConfigAction::Path => {
            let path = custom_path.map(PathBuf::from).or_else(Config::default_path);
            match path {
                Some(path) => println!("{}", path.display()),
                None => anyhow::bail!("could not determine the configuration directory"),
            }
        }
        ConfigAction::Check => {
            let config = load_config(custom_path)?;
            config.validate().context("invalid configuration")?;
            println!("Configuration OK");
        }
    }
    Ok(())
}

//! ps88 CLI - The `ps88` command.
//!
//! Runs a Rhai script as a live audio/MIDI processor with a draw surface,
//! checks scripts, and renders them offline to WAV.

mod render;
mod run;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ps88_core::{Config, EngineSettings, ScriptBuilder, SaveBlob};
use std::fs;
use std::path::{Path, PathBuf};

/// ps88 - hot-reloaded script host for audio, MIDI and drawing
#[derive(Parser, Debug)]
#[command(name = "ps88")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Live-coded audio/MIDI processing with Rhai", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a script with the live processing runtime
    Run(run::RunArgs),

    /// Build a script once and report the outcome
    Check {
        /// Path to the script
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Render a script offline to a WAV file
    Render(render::RenderArgs),

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List audio and MIDI devices
    Devices,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => run::run(run_args),
        Commands::Check { file } => check(&file),
        Commands::Render(render_args) => render::render(render_args),
        Commands::Config { action } => config(action),
        Commands::Devices => devices(),
    }
}

/// Load the config from an explicit path, or the default location.
pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(Config::load_or_default()),
    }
}

pub(crate) fn read_script(file: &Path) -> Result<String> {
    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }
    if file.extension().and_then(|s| s.to_str()) != Some("rhai") {
        log::warn!("File doesn't have .rhai extension");
    }
    fs::read_to_string(file).with_context(|| format!("Failed to read file: {}", file.display()))
}

fn check(file: &Path) -> Result<()> {
    let code = read_script(file)?;
    let outcome = check_source(&code, &EngineSettings::default());
    println!("{}: {}", file.display(), outcome);
    if !outcome.is_ready() {
        anyhow::bail!("build failed");
    }
    Ok(())
}

fn check_source(code: &str, settings: &EngineSettings) -> ps88_core::BuildOutcome {
    let mut builder = ScriptBuilder::new(settings);
    builder.build(code, SaveBlob::Empty).outcome
}

fn config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = Config::config_path()?;
            if path.exists() && !force {
                anyhow::bail!(
                    "Config already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            let path = Config::create_default_config_file()?;
            println!("Wrote {}", path.display());
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}

#[cfg(feature = "native")]
fn devices() -> Result<()> {
    let list = ps88_core::list_devices()?;
    println!("Audio inputs:");
    for name in &list.audio_inputs {
        println!("  {}", name);
    }
    println!("Audio outputs:");
    for name in &list.audio_outputs {
        println!("  {}", name);
    }
    println!("MIDI inputs:");
    for name in &list.midi_inputs {
        println!("  {}", name);
    }
    Ok(())
}

#[cfg(not(feature = "native"))]
fn devices() -> Result<()> {
    anyhow::bail!("ps88 was built without the `native` feature; no devices available")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_source_reports_failures() {
        let settings = EngineSettings::default();
        assert!(check_source("ps88.audio(|ctx| {});", &settings).is_ready());
        assert!(!check_source("ps88.audio(", &settings).is_ready());
    }

    #[test]
    fn test_read_script_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_script(&dir.path().join("nope.rhai")).is_err());
    }

    #[test]
    fn test_load_config_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[audio]\nblock_size = 64\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.audio.block_size, 64);
    }
}

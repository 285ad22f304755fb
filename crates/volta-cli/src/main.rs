//! Volta command line: load a circuit or SFC model, run it, print
//! results.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use volta_engine::{Engine, EngineConfig};

mod output;

#[derive(Parser)]
#[command(name = "volta", about = "Interactive-circuit simulation engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a circuit or SFC file for a span of simulated time.
    Run {
        /// Input file (native dump or SFC block format, auto-detected).
        file: PathBuf,
        /// Simulated time to run, in seconds.
        #[arg(long, default_value_t = 1.0)]
        duration: f64,
        /// Override the file's timestep.
        #[arg(long)]
        dt: Option<f64>,
        /// Print a sample row every N timesteps (0 = summary only).
        #[arg(long, default_value_t = 0)]
        sample_every: usize,
        /// Emit results as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Parse a file and print the normalized dump text.
    Export {
        file: PathBuf,
    },
    /// Describe the elements and computed names in a file.
    Inspect {
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            file,
            duration,
            dt,
            sample_every,
            json,
        } => run(&file, duration, dt, sample_every, json),
        Command::Export { file } => {
            let engine = load(&file)?;
            print!("{}", engine.export_text());
            Ok(())
        }
        Command::Inspect { file } => {
            let mut engine = load(&file)?;
            engine
                .analyze()
                .context("topology analysis failed")?;
            output::print_inspection(&engine);
            Ok(())
        }
    }
}

fn load(path: &PathBuf) -> Result<Engine> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut engine = Engine::new(EngineConfig::default());
    engine
        .load_from_text(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(engine)
}

fn run(
    path: &PathBuf,
    duration: f64,
    dt: Option<f64>,
    sample_every: usize,
    json: bool,
) -> Result<()> {
    let mut engine = load(path)?;
    if let Some(dt) = dt {
        engine.set_dt(dt);
    }

    let steps = (duration / engine.dt()).ceil() as usize;
    let mut samples = Vec::new();

    for step in 0..steps {
        engine
            .step_once()
            .with_context(|| format!("simulation failed at t = {:.6e}", engine.time()))?;
        if sample_every > 0 && step % sample_every == 0 {
            samples.push(output::sample_row(&engine));
        }
    }
    samples.push(output::sample_row(&engine));

    if json {
        output::print_json(&engine, &samples)?;
    } else {
        output::print_table(&engine, &samples, sample_every > 0);
    }
    Ok(())
}

//! scorec CLI - compile an LDP score into sound events and a jump table

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use scorec::{compile_with_config, Config, ScoreError};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Text,
    Yaml,
}

#[derive(Parser)]
#[command(name = "scorec")]
#[command(about = "Compile LDP scores into playback events and repeat jump tables", long_about = None)]
struct Cli {
    /// Input score (.lms / .ldp)
    input: PathBuf,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: Format,

    /// Print the sound events (and measure index)
    #[arg(short, long)]
    events: bool,

    /// Print the jump table
    #[arg(short, long)]
    jumps: bool,
}

fn run(cli: &Cli) -> Result<(), ScoreError> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let source = std::fs::read_to_string(&cli.input).map_err(|source| ScoreError::Io {
        path: cli.input.display().to_string(),
        source,
    })?;

    let analysis = compile_with_config(&source, &config)?;
    eprint!("{}", analysis.diagnostics.report());

    // Neither flag: print both
    let (events, jumps) = match (cli.events, cli.jumps) {
        (false, false) => (true, true),
        flags => flags,
    };

    for (i, score) in analysis.document.scores().enumerate() {
        let table = score.midi_table();
        match cli.format {
            Format::Text => {
                println!("== Score {}{}", i + 1, score.title.as_deref().map(|t| format!(": {}", t)).unwrap_or_default());
                if events {
                    print!("{}", table.dump_events());
                }
                if jumps {
                    print!("{}", table.jumps.dump());
                }
            }
            Format::Yaml => {
                let yaml = if events && jumps {
                    serde_yaml::to_string(table)
                } else if events {
                    serde_yaml::to_string(&table.events)
                } else {
                    serde_yaml::to_string(&table.jumps)
                };
                match yaml {
                    Ok(text) => print!("{}", text),
                    Err(e) => eprintln!("Error serializing score {}: {}", i + 1, e),
                }
            }
        }
    }
    Ok(())
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

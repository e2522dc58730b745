use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use heif_write::Configuration;

/// Write a HEIF image file from a declarative JSON configuration.
#[derive(Parser)]
#[command(name = "heifwriter", version, about)]
struct Cli {
    /// Print debug information
    #[arg(short, long)]
    verbose: bool,

    /// Print errors only
    #[arg(long)]
    no_warnings: bool,

    /// Writer configuration JSON file
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else if cli.no_warnings {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new().filter_level(level).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), heif_write::Error> {
    let configuration = Configuration::from_json_file(&cli.config)?;
    heif_write::write_file(&configuration)?;
    log::info!(
        "wrote {}",
        configuration.general.output_file.display()
    );
    Ok(())
}

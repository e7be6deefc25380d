mod cli;
mod config;
mod download;
mod error;
mod grid;
mod logging;
mod manifest;
mod paths;
mod plot;
mod registry;
mod request;
mod sources;
mod stage;
mod table;
mod validate;
mod weather_data;
mod working;

use std::process;

use anyhow::{Error, Result};
use clap::Parser;
use cli::{command, Cli, Commands};
use config::Settings;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let settings = Settings::load(cli.config.as_deref())?;

    let result = match &cli.command {
        Commands::Run(args) => {
            command::run_steps(&args.datasets, args.force, &command::Step::ALL, &settings).await
        }
        Commands::Download(args) => {
            command::run_steps(&args.datasets, args.force, &[command::Step::Download], &settings).await
        }
        Commands::Preprocess(args) => {
            command::run_steps(&args.datasets, args.force, &[command::Step::Preprocess], &settings).await
        }
        Commands::Validate(args) => {
            command::run_steps(&args.datasets, args.force, &[command::Step::Validate], &settings).await
        }
        Commands::Paths(args) => command::paths(&args.datasets, &settings),
        Commands::Merge {
            name,
            technique,
            datasets,
        } => command::merge(name, *technique, &datasets.datasets, datasets.force, &settings).await,
        Commands::Plot(args) => command::plot(args, &settings),
        Commands::Sources => Ok(command::sources()),
    };

    match result {
        Ok(message) => println!("{}", message),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }

    Ok(())
}

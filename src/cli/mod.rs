//! Command line interface.

pub mod command;

use std::{path::PathBuf, time::Duration};

use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::{request::DatasetSpec, working::Technique};

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Contains the commands
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// TOML config file [default: ./wxingest.toml if present]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct DatasetArgs {
    /// Datasets as SOURCE[/SCENARIO][:VARS[:START[:END]]], e.g. era5:tmp:2023-04-02:2023-04-30
    #[arg(required = true)]
    pub datasets: Vec<DatasetSpec>,

    /// Redo stages even when their output already exists
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct PlotArgs {
    /// Dataset whose preprocessed extract to plot
    #[arg(long, required_unless_present = "working", conflicts_with = "working")]
    pub dataset: Option<DatasetSpec>,

    /// Working data to plot, by the name given to `merge`
    #[arg(long)]
    pub working: Option<String>,

    /// Variable column to plot, e.g. tmp
    #[arg(long)]
    pub variable: String,

    /// Day to plot, YYYY-MM-DD
    #[arg(long)]
    pub date: NaiveDate,

    /// HTML file to write [default: beside the extract]
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download, preprocess and validate
    Run(DatasetArgs),
    /// Download raw data
    Download(DatasetArgs),
    /// Preprocess downloaded data into an extract
    Preprocess(DatasetArgs),
    /// Validate preprocessed extracts
    Validate(DatasetArgs),
    /// Show where a dataset is stored
    Paths(DatasetArgs),
    /// Merge preprocessed datasets into working data
    Merge {
        /// Name of the working folder
        name: String,

        /// `combine` averages matching cells, `saveall` keeps every row
        #[arg(short, long, default_value = "combine")]
        technique: Technique,

        #[command(flatten)]
        datasets: DatasetArgs,
    },
    /// Map one variable of an extract on one day
    Plot(PlotArgs),
    /// List sources and the variables each provides
    Sources,
}

/// Creates a spinner.
pub fn create_spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

/// Creates a spinner that a download turns into a byte counting bar once
/// the size is known.
pub fn create_indeterminate_progress_bar(message: String) -> ProgressBar {
    create_spinner(message)
}

/// Creates a progress bar.
pub fn create_progress_bar(size: u64, message: String) -> ProgressBar {
    ProgressBar::new(size).with_message(message).with_style(
        ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    )
}

// -- Tests -------------------------------------------------------------------

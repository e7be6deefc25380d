use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::{
    cli::PlotArgs,
    config::Settings,
    paths::{working_file, Layout},
    plot::{default_output, render, DayField},
    table,
};

/// Renders one day of one variable from a preprocessed or merged extract.
pub fn plot(args: &PlotArgs, settings: &Settings) -> Result<String> {
    let extract_file = match (&args.dataset, &args.working) {
        (Some(spec), _) => {
            let request = spec.clone().into_request(false)?;
            Layout::resolve(&settings.root, &request, settings.format).extract_file()
        }
        (None, Some(name)) => working_file(&settings.root, name, settings.format),
        (None, None) => bail!("Nothing to plot: give a dataset or working data"),
    };
    if !extract_file.exists() {
        bail!("No extract at `{}`, preprocess or merge first", extract_file.display());
    }

    let extract = table::read(&extract_file)?;
    let field = DayField::from_extract(&extract, &args.variable, args.date)?;
    let output: PathBuf = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&extract_file, &args.variable, args.date));
    render(&field, &output)?;

    let mean = field
        .mean()
        .map(|m| format!("{:.2}", m))
        .unwrap_or_else(|| "n/a".to_string());
    Ok(format!(
        "Plot saved to `{}` ({} cells, mean {})",
        output.display(),
        field.values.len(),
        mean
    ))
}

// -- Tests -------------------------------------------------------------------

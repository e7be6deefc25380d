use anyhow::{bail, Result};

use super::dataset::build;
use crate::{
    config::Settings,
    request::DatasetSpec,
    working::{Technique, WorkingData},
};

/// Brings every dataset up to a preprocessed extract, then merges them into
/// `{root}/working/{name}/`.
pub async fn merge(
    name: &str,
    technique: Technique,
    specs: &[DatasetSpec],
    force: bool,
    settings: &Settings,
) -> Result<String> {
    let mut datasets = build(specs, force, settings)?;

    for data in &mut datasets {
        if !(data.download().await && data.preprocess().await) {
            bail!("{} could not be prepared for merging", data);
        }
    }

    let members: Vec<_> = datasets.iter().collect();
    let output = WorkingData::new(name, &members, settings)?.merge(technique)?;

    Ok(format!("File saved to `{}`", output.display()))
}

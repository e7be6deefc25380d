//! Streams remote files to disk and unpacks tarballs.

use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};

use anyhow::{bail, Context, Error, Result};
use flate2::read::GzDecoder;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tar::Archive;
use tracing::debug;

/// Downloads `url` to `file_path`, driving `progress_bar` from the content
/// length when the server sends one. The file only appears once complete.
pub async fn download_file(
    client: &reqwest::Client,
    url: &str,
    file_path: &Path,
    progress_bar: &ProgressBar,
) -> Result<u64> {
    debug!("GET {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::msg(format!("Failed to download `{}`: {}", url, e)))?;

    if !response.status().is_success() {
        bail!("Failed to download `{}`: {}", url, response.status());
    }

    let total_size = response.content_length().unwrap_or(0);
    if total_size > 0 {
        progress_bar.set_length(total_size);
        progress_bar.set_style(
            ProgressStyle::with_template(
                "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {eta}",
            )?
            .progress_chars("=> "),
        );
    }

    let partial = file_path.with_extension("part");
    let mut file = File::create(&partial)
        .with_context(|| format!("Cannot create `{}`", partial.display()))?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| Error::msg(format!("Error reading chunk: {}", e)))?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        progress_bar.set_position(downloaded);
    }
    file.flush()?;
    drop(file);

    fs::rename(&partial, file_path)
        .with_context(|| format!("Cannot move download to `{}`", file_path.display()))?;

    Ok(downloaded)
}

/// Extracts the tarball at `tar_gz_path` into `working_dir`, counting files
/// on `progress_bar`. Returns the number of entries unpacked.
pub fn extract_tar(tar_gz_path: &Path, working_dir: &Path, progress_bar: &ProgressBar) -> Result<u64> {
    // First pass: count entries so the bar has a length
    let tar_gz = File::open(tar_gz_path)
        .with_context(|| format!("Cannot open `{}`", tar_gz_path.display()))?;
    let total_files = Archive::new(GzDecoder::new(tar_gz)).entries()?.count() as u64;

    progress_bar.set_length(total_files);
    progress_bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {eta}")?
            .progress_chars("=> "),
    );

    fs::create_dir_all(working_dir)?;
    let tar_gz = File::open(tar_gz_path)?;
    let mut archive = Archive::new(GzDecoder::new(tar_gz));

    let mut count = 0u64;
    for entry in archive.entries()? {
        let mut entry = entry?;
        entry.unpack_in(working_dir)?;
        count += 1;
        progress_bar.set_position(count);
    }

    Ok(count)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use flate2::{write::GzEncoder, Compression};
    use tempfile::TempDir;

    use super::*;

    fn write_tarball(path: &Path, files: &[(&str, &str)]) {
        let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn should_extract_tarball_with_progress() {
        let temp_dir = TempDir::new().unwrap();
        let tarball = temp_dir.path().join("2023.tar.gz");
        write_tarball(&tarball, &[("a.csv", "DATE\n"), ("b.csv", "DATE\n")]);
        let out = temp_dir.path().join("2023");

        let pb = ProgressBar::hidden();
        let count = extract_tar(&tarball, &out, &pb).unwrap();

        assert_eq!(count, 2);
        assert_eq!(pb.position(), 2);
        assert_eq!(pb.length().unwrap(), 2);
        assert_eq!(fs::read_to_string(out.join("b.csv")).unwrap(), "DATE\n");
    }

    #[test]
    fn should_fail_on_missing_tarball() {
        let temp_dir = TempDir::new().unwrap();

        let result = extract_tar(
            &temp_dir.path().join("missing.tar.gz"),
            temp_dir.path(),
            &ProgressBar::hidden(),
        );

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn should_fail_on_unreachable_host() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("data.nc");

        let result = download_file(
            &reqwest::Client::new(),
            "http://127.0.0.1:9/data.nc",
            &target,
            &ProgressBar::hidden(),
        )
        .await;

        assert!(result.is_err());
        assert!(!target.exists());
    }
}

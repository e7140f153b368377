use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

const MOVENET_MODEL_FILENAME: &str = "movenet_singlepose_lightning.onnx";

pub fn default_model_path() -> PathBuf {
    PathBuf::from("models").join(MOVENET_MODEL_FILENAME)
}

/// Uses the model at `model_path` if present, otherwise downloads it from `url`.
pub fn ensure_model_ready(model_path: &Path, url: Option<&str>) -> anyhow::Result<()> {
    if model_path.exists() {
        log::debug!("pose model already present at {}", model_path.display());
        return Ok(());
    }

    let Some(url) = url else {
        return Err(anyhow!(
            "pose model not found at {} and no download url configured",
            model_path.display()
        ));
    };

    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create model directory {}", parent.display()))?;
    }

    download_to_path(url, model_path)
        .with_context(|| format!("failed to download pose model to {}", model_path.display()))
}

fn download_to_path(url: &str, dest: &Path) -> anyhow::Result<()> {
    log::info!("downloading pose model from {url} to {}", dest.display());

    let client = Client::new();
    let mut response = client
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let total_size = response.content_length();
    let progress = create_progress_bar(total_size);

    let tmp_path = dest.with_extension("download");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let bytes_read = response
            .read(&mut buffer)
            .context("failed while reading model bytes")?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])
            .context("failed while writing model to disk")?;
        downloaded += bytes_read as u64;
        progress.set_position(downloaded);
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move temp model {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    progress.finish_with_message("pose model ready");
    Ok(())
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} downloading model") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_model_needs_no_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MOVENET_MODEL_FILENAME);
        fs::write(&path, b"onnx").unwrap();
        assert!(ensure_model_ready(&path, None).is_ok());
    }

    #[test]
    fn missing_model_without_url_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join(MOVENET_MODEL_FILENAME);
        let err = ensure_model_ready(&path, None).unwrap_err();
        assert!(err.to_string().contains(MOVENET_MODEL_FILENAME));
        assert!(!path.exists());
    }
}

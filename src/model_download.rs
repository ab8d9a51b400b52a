use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

use crate::config::{EstimatorConfig, MoveNetVariant};

pub fn default_model_path(variant: MoveNetVariant) -> PathBuf {
    PathBuf::from("models").join(format!("movenet_{}.onnx", variant.label()))
}

/// Makes sure the configured MoveNet model exists on disk, fetching it from
/// `model_url` when it does not.
pub fn ensure_model_ready(cfg: &EstimatorConfig) -> anyhow::Result<()> {
    let variant = cfg.variant;
    let model_path = cfg.model_path.as_path();
    if model_path.exists() {
        log::debug!(
            "MoveNet {} model present at {}",
            variant.label(),
            model_path.display()
        );
        return Ok(());
    }

    let Some(url) = cfg.model_url.as_deref() else {
        return Err(anyhow!(
            "MoveNet {} model not found at {} and no estimator.model_url is configured",
            variant.label(),
            model_path.display()
        ));
    };

    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create model directory {}", parent.display()))?;
    }

    log::info!(
        "downloading MoveNet {} model from {url} to {}",
        variant.label(),
        model_path.display()
    );
    let bytes = download_to_path(url, model_path)
        .with_context(|| format!("failed to download model to {}", model_path.display()))?;
    log::info!("MoveNet {} model ready ({bytes} bytes)", variant.label());
    Ok(())
}

fn download_to_path(url: &str, dest: &Path) -> anyhow::Result<u64> {
    let response = Client::new()
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let total_size = response.content_length();
    match total_size {
        Some(total) => log::debug!("model download is {total} bytes"),
        None => log::debug!("model download size unknown"),
    }

    let progress = create_progress_bar(total_size);
    let written = write_atomically(progress.wrap_read(response), dest);
    progress.finish_and_clear();
    written
}

/// Streams `reader` into a `.download` sibling of `dest`, then renames it into
/// place. A failed read removes the partial file.
fn write_atomically<R: Read>(mut reader: R, dest: &Path) -> anyhow::Result<u64> {
    let tmp_path = dest.with_extension("download");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let copied = match io::copy(&mut reader, &mut file) {
        Ok(copied) => copied,
        Err(err) => {
            drop(file);
            let _ = fs::remove_file(&tmp_path);
            return Err(err).context("failed while writing model to disk");
        }
    };
    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move temp model {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;
    Ok(copied)
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            let style = ProgressStyle::with_template("{spinner:.green} downloading model")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            pb.set_style(style);
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pose-silhouette-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_default_model_path_per_variant() {
        assert_eq!(
            default_model_path(MoveNetVariant::MultiposeLightning),
            PathBuf::from("models").join("movenet_multipose_lightning.onnx")
        );
        assert_eq!(
            default_model_path(MoveNetVariant::Thunder),
            EstimatorConfig::default().model_path
        );
    }

    #[test]
    fn test_present_model_is_not_downloaded() {
        let path = scratch_path("present.onnx");
        fs::write(&path, b"stub").unwrap();
        let cfg = EstimatorConfig {
            model_path: path.clone(),
            // never contacted while the file exists
            model_url: Some("http://127.0.0.1:9/movenet.onnx".into()),
            ..EstimatorConfig::default()
        };
        let ready = ensure_model_ready(&cfg);
        let contents = fs::read(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(ready.is_ok());
        assert_eq!(contents, b"stub");
    }

    #[test]
    fn test_missing_model_without_url_is_error() {
        let cfg = EstimatorConfig {
            model_path: PathBuf::from("definitely/not/here/movenet.onnx"),
            model_url: None,
            ..EstimatorConfig::default()
        };
        let err = ensure_model_ready(&cfg).unwrap_err();
        assert!(err.to_string().contains("model_url"));
    }

    #[test]
    fn test_write_atomically_moves_temp_into_place() {
        let dest = scratch_path("fetched.onnx");
        let copied = write_atomically(&b"onnx-bytes"[..], &dest).unwrap();
        let contents = fs::read(&dest).unwrap();
        let tmp_left = dest.with_extension("download").exists();
        fs::remove_file(&dest).unwrap();
        assert_eq!(copied, 10);
        assert_eq!(contents, b"onnx-bytes");
        assert!(!tmp_left);
    }

    #[test]
    fn test_failed_read_leaves_no_model() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("connection reset"))
            }
        }

        let dest = scratch_path("broken.onnx");
        assert!(write_atomically(Broken, &dest).is_err());
        assert!(!dest.exists());
        assert!(!dest.with_extension("download").exists());
    }
}

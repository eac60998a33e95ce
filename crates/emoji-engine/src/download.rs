use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::ImageFormat;
use reqwest::blocking::Client as HttpClient;
use tracing::debug;

use crate::truncate_text;

/// Fetches `image_url` and writes it as `emoji-<position>.png` under `out_dir`.
pub fn download_emoji(
    http: &HttpClient,
    image_url: &str,
    out_dir: &Path,
    position: usize,
) -> Result<PathBuf> {
    let response = http
        .get(image_url)
        .send()
        .with_context(|| format!("failed downloading emoji ({image_url})"))?;
    if !response.status().is_success() {
        let code = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        bail!(
            "emoji download failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let bytes = response
        .bytes()
        .context("failed reading emoji bytes")?
        .to_vec();

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let path = out_dir.join(format!("emoji-{position}.png"));
    std::fs::write(&path, as_png(bytes))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Re-encodes decodable non-PNG images; anything else is kept as fetched.
fn as_png(bytes: Vec<u8>) -> Vec<u8> {
    match image::guess_format(&bytes) {
        Ok(ImageFormat::Png) => return bytes,
        Ok(_) => {}
        Err(_) => return bytes,
    }
    let decoded = match image::load_from_memory(&bytes) {
        Ok(decoded) => decoded,
        Err(err) => {
            debug!(error = %err, "keeping undecodable emoji bytes as fetched");
            return bytes;
        }
    };
    let mut encoded = Cursor::new(Vec::new());
    match decoded.write_to(&mut encoded, ImageFormat::Png) {
        Ok(()) => encoded.into_inner(),
        Err(err) => {
            debug!(error = %err, "png re-encode failed, keeping original bytes");
            bytes
        }
    }
}

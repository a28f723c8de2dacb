//! Comparison of evidence screenshots against approved baselines

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{VerifyError, VerifyResult};

/// Per-channel difference tolerated before a pixel counts as changed
/// (anti-aliasing, font hinting).
const CHANNEL_TOLERANCE: i32 = 5;

/// Outcome of comparing one evidence screenshot with its baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualDiff {
    pub name: String,
    pub matches: bool,
    pub diff_percent: f64,
    pub diff_pixels: u64,
    pub total_pixels: u64,
    pub diff_image_path: Option<PathBuf>,
    pub evidence_sha256: String,
}

#[derive(Debug, Clone)]
pub struct BaselineStore {
    baseline_dir: PathBuf,
    diff_dir: PathBuf,
    threshold: f64,
}

impl BaselineStore {
    /// `threshold` is the percentage of differing pixels still accepted.
    pub fn new(baseline_dir: &Path, threshold: f64) -> VerifyResult<Self> {
        let diff_dir = baseline_dir.join("diffs");
        std::fs::create_dir_all(&diff_dir)?;
        Ok(Self {
            baseline_dir: baseline_dir.to_path_buf(),
            diff_dir,
            threshold,
        })
    }

    pub fn baseline_path(&self, name: &str) -> PathBuf {
        self.baseline_dir.join(format!("{}.png", name))
    }

    /// Compare `evidence` with the baseline stored under `name`.
    pub fn compare(&self, name: &str, evidence: &Path) -> VerifyResult<VisualDiff> {
        let baseline_path = self.baseline_path(name);
        if !baseline_path.exists() {
            return Err(VerifyError::BaselineNotFound(baseline_path.display().to_string()));
        }

        let evidence_sha256 = sha256_file(evidence)?;
        if evidence_sha256 == sha256_file(&baseline_path)? {
            debug!("Evidence for '{}' is byte-identical to its baseline", name);
            let (w, h) = image::image_dimensions(evidence)?;
            return Ok(VisualDiff {
                name: name.to_string(),
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: w as u64 * h as u64,
                diff_image_path: None,
                evidence_sha256,
            });
        }

        let actual = image::open(evidence)?.to_rgba8();
        let baseline = image::open(&baseline_path)?.to_rgba8();

        let width = actual.width().max(baseline.width());
        let height = actual.height().max(baseline.height());
        if actual.dimensions() != baseline.dimensions() {
            warn!(
                "Evidence '{}' is {:?}, baseline is {:?}",
                name,
                actual.dimensions(),
                baseline.dimensions()
            );
        }

        // Pixels outside the overlap count as changed, so a full-page capture
        // that grew or shrank is reported instead of silently cropped.
        let mut diff = RgbaImage::new(width, height);
        let mut diff_pixels = 0u64;
        for y in 0..height {
            for x in 0..width {
                let a = pixel_at(&actual, x, y);
                let b = pixel_at(&baseline, x, y);
                let changed = match (a, b) {
                    (Some(a), Some(b)) => pixels_differ(a, b),
                    _ => true,
                };
                if changed {
                    diff_pixels += 1;
                    diff.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                } else if let Some(a) = a {
                    diff.put_pixel(x, y, Rgba([a[0] / 2, a[1] / 2, a[2] / 2, 128]));
                }
            }
        }

        let total_pixels = width as u64 * height as u64;
        let diff_percent = if total_pixels == 0 {
            0.0
        } else {
            diff_pixels as f64 / total_pixels as f64 * 100.0
        };
        let matches = diff_percent <= self.threshold;

        let diff_image_path = if diff_pixels > 0 {
            let path = self.diff_dir.join(format!("{}-diff.png", name));
            diff.save(&path)?;
            Some(path)
        } else {
            None
        };

        if !matches {
            warn!(
                "Evidence '{}' differs from baseline: {:.2}% of pixels (threshold: {:.2}%)",
                name, diff_percent, self.threshold
            );
        }

        Ok(VisualDiff {
            name: name.to_string(),
            matches,
            diff_percent,
            diff_pixels,
            total_pixels,
            diff_image_path,
            evidence_sha256,
        })
    }

    /// Compare and turn a mismatch into an error.
    pub fn check(&self, name: &str, evidence: &Path) -> VerifyResult<VisualDiff> {
        let diff = self.compare(name, evidence)?;
        if diff.matches {
            Ok(diff)
        } else {
            Err(VerifyError::ScreenshotMismatch {
                name: name.to_string(),
                diff_percent: diff.diff_percent,
                threshold: self.threshold,
            })
        }
    }

    /// Approve `evidence` as the new baseline for `name`.
    pub fn update(&self, name: &str, evidence: &Path) -> VerifyResult<PathBuf> {
        let path = self.baseline_path(name);
        std::fs::copy(evidence, &path)?;
        info!("Updated baseline for '{}'", name);
        Ok(path)
    }
}

fn pixel_at(img: &RgbaImage, x: u32, y: u32) -> Option<&Rgba<u8>> {
    if x < img.width() && y < img.height() {
        Some(img.get_pixel(x, y))
    } else {
        None
    }
}

fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .any(|(x, y)| (*x as i32 - *y as i32).abs() > CHANNEL_TOLERANCE)
}

fn sha256_file(path: &Path) -> VerifyResult<String> {
    let data = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32, color: [u8; 4]) {
        RgbaImage::from_pixel(width, height, Rgba(color)).save(path).unwrap();
    }

    #[test]
    fn test_identical_evidence_matches() {
        let dir = TempDir::new().unwrap();
        let store = BaselineStore::new(&dir.path().join("baselines"), 0.5).unwrap();
        let evidence = dir.path().join("dashboard.png");
        write_png(&evidence, 4, 4, [10, 20, 30, 255]);
        store.update("dashboard", &evidence).unwrap();

        let diff = store.compare("dashboard", &evidence).unwrap();
        assert!(diff.matches);
        assert_eq!(diff.total_pixels, 16);
        assert!(diff.diff_image_path.is_none());
    }

    #[test]
    fn test_small_color_drift_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let store = BaselineStore::new(&dir.path().join("baselines"), 0.0).unwrap();
        write_png(&store.baseline_path("login"), 4, 4, [100, 100, 100, 255]);
        let evidence = dir.path().join("login.png");
        write_png(&evidence, 4, 4, [103, 98, 100, 255]);

        let diff = store.compare("login", &evidence).unwrap();
        assert!(diff.matches);
        assert_eq!(diff.diff_pixels, 0);
    }

    #[test]
    fn test_resized_capture_is_a_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = BaselineStore::new(&dir.path().join("baselines"), 0.5).unwrap();
        write_png(&store.baseline_path("page"), 4, 4, [0, 0, 0, 255]);
        let evidence = dir.path().join("page.png");
        write_png(&evidence, 4, 8, [0, 0, 0, 255]);

        let diff = store.compare("page", &evidence).unwrap();
        assert!(!diff.matches);
        assert_eq!(diff.diff_pixels, 16);
        assert_eq!(diff.diff_percent, 50.0);
        assert!(diff.diff_image_path.unwrap().exists());

        let err = store.check("page", &evidence).unwrap_err();
        assert!(matches!(err, VerifyError::ScreenshotMismatch { .. }));
    }

    #[test]
    fn test_missing_baseline() {
        let dir = TempDir::new().unwrap();
        let store = BaselineStore::new(&dir.path().join("baselines"), 0.5).unwrap();
        let evidence = dir.path().join("x.png");
        write_png(&evidence, 1, 1, [0, 0, 0, 255]);
        assert!(matches!(
            store.compare("x", &evidence),
            Err(VerifyError::BaselineNotFound(_))
        ));
    }
}

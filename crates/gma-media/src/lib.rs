//! Bulk image downloader for archived message logs.
//!
//! Re-reads `historic_messages.csv`, pulls the image URL list and the
//! formatted timestamp out of each row, and fetches every referenced object.
//! An existing target file and a failed download are both skips, never
//! errors: the batch always runs to the end.

use std::{
    path::Path,
    time::Duration,
};

use tracing::{info, warn};

use gma_core::{csv, errors::Error, Result};

/// Column offsets in the archived log row.
const URLS_COLUMN: usize = 3;
const TIMESTAMP_COLUMN: usize = 4;

const PROGRESS_EVERY: u64 = 10;

/// One downloadable object extracted from the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub url: String,
    /// The row's formatted creation instant, used to build the filename.
    pub timestamp: String,
}

/// Outcome counts for one download batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Extract every image URL (with its row timestamp) from parsed log rows.
pub fn extract_image_refs(rows: &[Vec<String>]) -> Vec<ImageRef> {
    let mut out = Vec::new();
    for row in rows {
        let (Some(urls), Some(ts)) = (row.get(URLS_COLUMN), row.get(TIMESTAMP_COLUMN)) else {
            continue;
        };
        for url in urls.split(',').filter(|u| !u.is_empty()) {
            out.push(ImageRef {
                url: url.to_string(),
                timestamp: ts.clone(),
            });
        }
    }
    out
}

/// Deterministic, collision-avoiding target filename for the `ordinal`-th
/// object of a batch.
///
/// `:` and ` ` in the timestamp are replaced so the name stays shell- and
/// filesystem-friendly; the ordinal disambiguates objects sharing an instant.
pub fn target_filename(prefix: &str, image: &ImageRef, ordinal: usize) -> String {
    let ts = image.timestamp.replace(':', "-").replace(' ', "@");
    let ext = extension_for(&image.url);
    format!("{prefix} {ts}_{ordinal}{ext}")
}

fn extension_for(url: &str) -> &'static str {
    // GroupMe image URLs usually end in a bare content hash.
    let path = url.split('?').next().unwrap_or(url);
    for ext in [".gif", ".png", ".jpeg", ".jpg", ".webp"] {
        if path.ends_with(ext) {
            return ext;
        }
    }
    ".jpg"
}

pub struct ImageDownloader {
    http: reqwest::Client,
}

impl ImageDownloader {
    pub fn new(http_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .expect("reqwest client build");
        Self { http }
    }

    /// Download every image referenced by the log at `csv_path` into
    /// `output_dir`, naming files with `prefix`.
    ///
    /// Individual failures are logged and counted, not propagated; only a
    /// missing/unreadable log or an uncreatable output directory is fatal.
    pub async fn download_all(
        &self,
        csv_path: &Path,
        output_dir: &Path,
        prefix: &str,
    ) -> Result<DownloadReport> {
        let rows = csv::read_rows(csv_path)?;
        let refs = extract_image_refs(&rows);

        tokio::fs::create_dir_all(output_dir).await?;
        info!(
            count = refs.len(),
            dir = %output_dir.display(),
            "downloading images"
        );

        let mut report = DownloadReport::default();
        for (i, image) in refs.iter().enumerate() {
            let target = output_dir.join(target_filename(prefix, image, i + 1));
            if target.exists() {
                report.skipped += 1;
                continue;
            }

            match self.fetch_to(&image.url, &target).await {
                Ok(()) => {
                    report.downloaded += 1;
                    if report.downloaded % PROGRESS_EVERY == 0 {
                        info!(done = i + 1, total = refs.len(), "download progress");
                    }
                }
                Err(e) => {
                    warn!(url = %image.url, error = %e, "download failed, skipping");
                    report.failed += 1;
                }
            }
        }

        info!(
            downloaded = report.downloaded,
            skipped = report.skipped,
            failed = report.failed,
            "image download complete"
        );
        Ok(report)
    }

    async fn fetch_to(&self, url: &str, target: &Path) -> Result<()> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("GET {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Transport(format!(
                "GET {url}: status {}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("read {url}: {e}")))?;
        tokio::fs::write(target, &bytes).await?;
        Ok(())
    }
}

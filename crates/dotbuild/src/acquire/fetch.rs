use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::progress::{ProgressText, download_progress};
use crate::error::{Error, Result};

/// Network access used by the acquisition flow.
pub trait Fetcher {
    /// Stream `url` into `dest`, reporting bytes received. Returns the size.
    fn fetch(&self, url: &str, dest: &Path, progress: &ProgressText) -> Result<u64>;

    fn fetch_text(&self, url: &str) -> Result<String>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        // Source archives are several hundred MiB: bound connecting, not the transfer.
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .user_agent(concat!("dotbuild/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let res = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::msg(format!("GET {url} failed: {e}")))?;
        if !res.status().is_success() {
            return Err(Error::msg(format!(
                "GET {url} failed with status {}",
                res.status()
            )));
        }
        Ok(res)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path, progress: &ProgressText) -> Result<u64> {
        let mut res = self.get(url)?;
        let total = res.content_length();
        let file = File::create(dest)
            .map_err(|e| Error::msg(format!("failed to create {}: {e}", dest.display())))?;
        let mut out = BufWriter::new(file);

        let mut buf = vec![0u8; 64 * 1024];
        let mut received = 0u64;
        loop {
            let n = res
                .read(&mut buf)
                .map_err(|e| Error::msg(format!("download of {url} interrupted: {e}")))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])
                .map_err(|e| Error::msg(format!("failed to write {}: {e}", dest.display())))?;
            received += n as u64;
            progress.set(download_progress(received, total));
        }
        out.flush()
            .map_err(|e| Error::msg(format!("failed to write {}: {e}", dest.display())))?;

        if let Some(total) = total
            && received != total
        {
            return Err(Error::msg(format!(
                "download of {url} truncated: got {received} of {total} bytes"
            )));
        }
        Ok(received)
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        Ok(self.get(url)?.text()?)
    }
}

/// Look up `file` in a `SHA256SUMS` listing (`<hex>  <path>` per line).
pub fn expected_sha256(sums: &str, file: &str) -> Option<String> {
    sums.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let hash = parts.next()?;
        let name = parts.next()?;
        (name == file).then(|| hash.to_ascii_lowercase())
    })
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut f = File::open(path)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = f
            .read(&mut buf)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn verify_sha256(path: &Path, sums: &str, entry: &str) -> Result<()> {
    let expected = expected_sha256(sums, entry)
        .ok_or_else(|| Error::msg(format!("no checksum listed for {entry}")))?;
    let actual = sha256_file(path)?;
    if actual != expected {
        // A corrupt archive must never be unpacked or reused.
        let _ = fs::remove_file(path);
        return Err(Error::msg(format!(
            "checksum mismatch for {}: expected {expected}, got {actual}",
            path.display()
        )));
    }
    Ok(())
}

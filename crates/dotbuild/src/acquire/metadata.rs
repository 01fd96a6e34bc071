use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::workspace::ensure_dir;

/// What was acquired into the engine dir, written after a successful download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetadata {
    pub version: String,
    pub archive_url: String,
    pub engine_dir: String,
    pub downloaded_at: DateTime<Utc>,
}

pub fn write(path: &Path, meta: &EngineMetadata) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let body = serde_json::to_string_pretty(meta)?;
    fs::write(path, body + "\n")
        .map_err(|e| Error::msg(format!("failed to write {}: {e}", path.display())))
}

pub fn read(path: &Path) -> Result<Option<EngineMetadata>> {
    let body = match fs::read_to_string(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::msg(format!("failed to read {}: {e}", path.display())));
        }
    };
    let meta = serde_json::from_str(&body)
        .map_err(|e| Error::msg(format!("invalid metadata in {}: {e}", path.display())))?;
    Ok(Some(meta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_metadata_reads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".dotbuild/metadata.json");
        assert_eq!(read(&path).expect("absent"), None);

        let meta = EngineMetadata {
            version: "115.0".into(),
            archive_url: "https://archive.mozilla.org/x".into(),
            engine_dir: "engine".into(),
            downloaded_at: Utc::now(),
        };
        write(&path, &meta).expect("write");
        assert_eq!(read(&path).expect("read"), Some(meta));
    }
}

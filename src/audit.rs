//! Run audit record.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ReconResult;
use crate::report::write_json;

pub const AUDIT_FILE: &str = "audit.json";

/// What was run, when, and with which configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// RFC 3339, UTC.
    pub timestamp: String,
    /// SHA-256 of the exact configuration text, lowercase hex.
    pub config_sha256: String,
    pub engine_version: String,
    /// `<os>-<arch>`, e.g. `linux-x86_64`.
    pub os: String,
}

impl AuditRecord {
    pub fn new(config_text: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            config_sha256: sha256_hex(config_text),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            os: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}

pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Write `audit.json` into `out_dir`, creating the directory if needed.
pub fn write_audit(out_dir: &Path, config_text: &str) -> ReconResult<PathBuf> {
    fs::create_dir_all(out_dir)?;
    let path = out_dir.join(AUDIT_FILE);
    write_json(&path, &AuditRecord::new(config_text))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_lowercase_hex() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn audit_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_audit(&dir.path().join("run"), "job: {name: x}\n").unwrap();
        let rec: AuditRecord = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(rec.config_sha256, sha256_hex("job: {name: x}\n"));
        assert_eq!(rec.engine_version, env!("CARGO_PKG_VERSION"));
        assert!(chrono::DateTime::parse_from_rfc3339(&rec.timestamp).is_ok());
    }
}

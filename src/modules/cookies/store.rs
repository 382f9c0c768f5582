use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use thiserror::Error;

use super::CookieRecord;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie file io error: {0}")]
    Io(#[from] io::Error),
    #[error("cookie file encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Directory of per-identity cookie files (`<identity>_cookies.json`).
///
/// Saves go through a temp file and a rename, so a concurrent load sees
/// either the previous or the new jar, never a partial write.
#[derive(Debug, Clone)]
pub struct CookieFileStore {
    dir: PathBuf,
}

impl CookieFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CookieError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, identity: &str) -> PathBuf {
        let safe: String = identity
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}_cookies.json"))
    }

    /// Load the jar for `identity`. A missing or unreadable file is an empty jar.
    pub fn load(&self, identity: &str) -> Result<Vec<CookieRecord>, CookieError> {
        let path = self.path_for(identity);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_slice::<Vec<CookieRecord>>(&raw) {
            Ok(records) => Ok(records),
            Err(err) => {
                log::warn!("discarding corrupt cookie file {}: {err}", path.display());
                Ok(Vec::new())
            }
        }
    }

    /// Persist `records` for `identity`, dropping anything already expired.
    pub fn save(&self, identity: &str, records: &[CookieRecord]) -> Result<(), CookieError> {
        let now = Utc::now();
        let live: Vec<&CookieRecord> = records.iter().filter(|r| !r.is_expired(now)).collect();
        let encoded = serde_json::to_vec_pretty(&live)?;

        let target = self.path_for(identity);
        let temp = target.with_extension(format!(
            "json.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp, encoded)?;
        if let Err(err) = fs::rename(&temp, &target) {
            let _ = fs::remove_file(&temp);
            return Err(err.into());
        }
        Ok(())
    }
}

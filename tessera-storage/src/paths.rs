//! File naming for log/index pairs
//!
//! A log `name.log` pairs with the index `name.idx` next to it.

use std::io;
use std::path::{Path, PathBuf};

use tessera_core::error::Result;

pub const LOG_EXTENSION: &str = "log";
pub const INDEX_EXTENSION: &str = "idx";

pub fn index_path_for(log_path: impl AsRef<Path>) -> PathBuf {
    log_path.as_ref().with_extension(INDEX_EXTENSION)
}

pub fn log_path_for(index_path: impl AsRef<Path>) -> PathBuf {
    index_path.as_ref().with_extension(LOG_EXTENSION)
}

/// Delete a log and its index; missing files are not an error.
pub fn remove_pair(log_path: impl AsRef<Path>) -> Result<()> {
    let log_path = log_path.as_ref();
    for path in [index_path_for(log_path), log_path.to_path_buf()] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pairing() {
        assert_eq!(index_path_for("/data/users.log"), PathBuf::from("/data/users.idx"));
        assert_eq!(log_path_for("/data/users.idx"), PathBuf::from("/data/users.log"));
        assert_eq!(index_path_for("plain"), PathBuf::from("plain.idx"));
    }

    #[test]
    fn test_remove_pair_tolerates_missing_index() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("a.log");
        std::fs::write(&log, b"x").unwrap();

        remove_pair(&log).unwrap();
        assert!(!log.exists());
        remove_pair(&log).unwrap();
    }
}

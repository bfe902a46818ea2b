//! Utility functions for directory management and atomic file output
//!
//! # Directory Structure
//!
//! - Config: `~/.config/treefw/` - optional `config.json`
//! - Output: `<output>/<testcase>/<router id>` - one rule file per router
//!
//! # Example
//!
//! ```
//! use treefw::utils::{ensure_dir, write_atomic};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let out = dir.path().join("1");
//! ensure_dir(&out).unwrap();
//! write_atomic(&out.join("7"), "*filter\nCOMMIT\n").unwrap();
//! ```

use directories::ProjectDirs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "treefw", "treefw").map(|pd| pd.config_dir().to_path_buf())
}

/// Creates `dir` and its parents.
pub fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        let mut builder = DirBuilder::new();
        builder.mode(0o755);
        builder.recursive(true);
        builder.create(dir)?;
    }

    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)?;
    }

    Ok(())
}

/// Writes `contents` to `path` atomically.
///
/// 1. Writes to a temporary file in the same directory.
/// 2. Flushes it to disk.
/// 3. Atomically renames it over the target path.
///
/// Readers never observe a half-written rule file.
pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }

    temp.write_all(contents.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot write rule file. Free up space and try again.",
            )
        } else {
            e.error
        }
    })?;
    Ok(())
}

/// Sorts ids numerically when they are numbers, lexically otherwise.
///
/// Numbers sort before non-numeric ids.
pub fn numeric_aware_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

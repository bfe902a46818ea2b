//! Test case discovery and output files
//!
//! Test cases are `<id>.json` documents in the input directory, `<id>` being
//! a run of digits. Compiling test case `<id>` produces the directory
//! `<output>/<id>/` holding one iptables-restore file per router, named by
//! router id, plus a `manifest.sha256` listing their checksums.

use crate::core::document::TestCaseDocument;
use crate::core::error::{Error, Result};
use crate::utils::{ensure_dir, numeric_aware_cmp, write_atomic};
use crate::validators::validate_testcase_id;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the checksum manifest inside a test case output directory
pub const MANIFEST_FILE: &str = "manifest.sha256";

/// Input documents larger than this are rejected unread
pub const MAX_DOCUMENT_BYTES: u64 = 64 * 1024 * 1024;

/// Returns the document path of test case `id`.
/// Validates the id first so it cannot escape `input_dir`.
pub fn testcase_path(input_dir: &Path, id: &str) -> Result<PathBuf> {
    validate_testcase_id(id).map_err(Error::TestCase)?;
    Ok(input_dir.join(format!("{id}.json")))
}

/// Lists the test case ids found in `input_dir`, in numeric order.
///
/// # Async
/// Uses `tokio::fs` for non-blocking directory scanning.
pub async fn list_testcases(input_dir: &Path) -> Result<Vec<String>> {
    let mut ids = Vec::new();

    let mut entries = tokio::fs::read_dir(input_dir).await.map_err(|e| {
        Error::TestCase(format!("cannot read input directory {}: {e}", input_dir.display()))
    })?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();

        if entry.file_type().await?.is_file()
            && path.extension().and_then(|s| s.to_str()) == Some("json")
            && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            && validate_testcase_id(stem).is_ok()
        {
            ids.push(stem.to_string());
        }
    }

    ids.sort_by(|a, b| numeric_aware_cmp(a, b));
    debug!("Found {} test cases in {}", ids.len(), input_dir.display());
    Ok(ids)
}

/// Loads and parses test case `id`.
///
/// # Async
/// Uses `tokio::fs` for non-blocking file I/O.
pub async fn load_testcase(input_dir: &Path, id: &str) -> Result<TestCaseDocument> {
    let path = testcase_path(input_dir, id)?;

    if !tokio::fs::try_exists(&path).await? {
        return Err(Error::TestCase(format!("test case {id} not found in {}", input_dir.display())));
    }

    let size = tokio::fs::metadata(&path).await?.len();
    if size > MAX_DOCUMENT_BYTES {
        return Err(Error::TestCase(format!(
            "test case {id} is {size} bytes (max: {MAX_DOCUMENT_BYTES})"
        )));
    }

    let json = tokio::fs::read_to_string(&path).await?;
    Ok(serde_json::from_str(&json)?)
}

/// Output directory of test case `id`
pub fn output_dir(output_root: &Path, id: &str) -> Result<PathBuf> {
    validate_testcase_id(id).map_err(Error::TestCase)?;
    Ok(output_root.join(id))
}

/// Writes the rule files of test case `id` and their manifest.
///
/// Every file is written atomically. Router files left over from an earlier
/// compilation of the same test case are removed so the directory always
/// mirrors the latest policy.
///
/// # Async
/// The blocking writes run on tokio's blocking pool.
pub async fn write_outputs(output_root: &Path, id: &str, files: Vec<(String, String)>) -> Result<PathBuf> {
    let dir = output_dir(output_root, id)?;
    let target = dir.clone();

    tokio::task::spawn_blocking(move || -> Result<()> {
        ensure_dir(&target)?;

        let keep: HashSet<&str> = files.iter().map(|(name, _)| name.as_str()).collect();
        for entry in std::fs::read_dir(&target)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name != MANIFEST_FILE && entry.file_type()?.is_file() && !keep.contains(name) {
                debug!("Removing stale rule file {}", entry.path().display());
                std::fs::remove_file(entry.path())?;
            }
        }

        for (name, contents) in &files {
            write_atomic(&target.join(name), contents)?;
        }
        write_atomic(&target.join(MANIFEST_FILE), &manifest(&files))?;
        Ok(())
    })
    .await
    .map_err(|e| Error::TestCase(format!("output task for test case {id} failed: {e}")))??;

    Ok(dir)
}

/// Reads back the rule files of test case `id`, sorted by router id.
///
/// Files whose checksum disagrees with the manifest are reported with a
/// warning; they may have been edited by hand.
pub async fn read_outputs(output_root: &Path, id: &str) -> Result<Vec<(String, String)>> {
    let dir = output_dir(output_root, id)?;
    if !tokio::fs::try_exists(&dir).await? {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        if name == MANIFEST_FILE || name.starts_with('.') {
            continue;
        }
        files.push((name, tokio::fs::read_to_string(entry.path()).await?));
    }
    files.sort_by(|a, b| numeric_aware_cmp(&a.0, &b.0));

    if let Ok(expected) = tokio::fs::read_to_string(dir.join(MANIFEST_FILE)).await {
        for name in mismatched(&expected, &files) {
            warn!("Test case {} file {} does not match its manifest checksum", id, name);
        }
    }

    Ok(files)
}

/// SHA-256 hex digest of `contents`
pub fn checksum(contents: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `sha256sum`-compatible manifest, one line per file
fn manifest(files: &[(String, String)]) -> String {
    let mut lines: Vec<String> = files
        .iter()
        .map(|(name, contents)| format!("{}  {name}\n", checksum(contents)))
        .collect();
    lines.sort();
    lines.concat()
}

/// Names of files whose checksum differs from (or is missing in) `manifest`
fn mismatched<'a>(manifest: &str, files: &'a [(String, String)]) -> Vec<&'a str> {
    let expected: HashSet<(&str, &str)> = manifest
        .lines()
        .filter_map(|l| l.split_once("  "))
        .collect();
    files
        .iter()
        .filter(|(name, contents)| !expected.contains(&(checksum(contents).as_str(), name.as_str())))
        .map(|(name, _)| name.as_str())
        .collect()
}

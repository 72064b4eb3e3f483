//! Result bundle: CSV tables, `summary.json`, `environment.json` and a
//! `manifest.json` with the size and SHA-256 of every file.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Manifest schema version.
pub const BUNDLE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
struct Manifest {
    bundle_version: u32,
    files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
struct ManifestFile {
    path: String,
    bytes: u64,
    sha256: String,
}

/// An input file recorded in `environment.json`.
#[derive(Debug, Clone, Serialize)]
pub struct InputFile {
    /// Role in the run (`config`, `panel`, source name).
    pub role: String,
    /// Path as given.
    pub path: String,
    /// Size in bytes.
    pub bytes: u64,
    /// SHA-256 of the contents.
    pub sha256: String,
}

impl InputFile {
    /// Hash an input file.
    pub fn record(role: &str, path: &Path) -> Result<Self> {
        Ok(Self {
            role: role.to_string(),
            path: path.display().to_string(),
            bytes: file_size(path)?,
            sha256: sha256_file(path)?,
        })
    }
}

/// Tool and machine metadata written to `environment.json`.
#[derive(Debug, Clone, Serialize)]
pub struct Environment {
    /// Tool name.
    pub tool: String,
    /// Tool version.
    pub tool_version: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_unix_ms: u128,
    /// Subcommand that produced the bundle.
    pub command: String,
    /// Operating system.
    pub os: String,
    /// CPU architecture.
    pub arch: String,
    /// Worker threads of the rayon pool.
    pub threads: usize,
    /// Hashed inputs.
    pub inputs: Vec<InputFile>,
}

impl Environment {
    /// Capture the current environment.
    pub fn capture(command: &str, inputs: Vec<InputFile>) -> Result<Self> {
        Ok(Self {
            tool: "sovdml".to_string(),
            tool_version: sd_core::VERSION.to_string(),
            created_unix_ms: now_unix_ms()?,
            command: command.to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            threads: rayon::current_num_threads(),
            inputs,
        })
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_unix_ms() -> Result<u128> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    let out = h.finalize();
    let mut s = String::with_capacity(64);
    for b in out {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn sha256_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("hashing {}", path.display()))?;
    Ok(sha256_hex(&bytes))
}

fn file_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// Create `dir`, refusing a non-empty one unless `overwrite` is set.
pub fn prepare_out_dir(dir: &Path, overwrite: bool) -> Result<()> {
    if dir.exists() {
        if !dir.is_dir() {
            anyhow::bail!("output path exists but is not a directory: {}", dir.display());
        }
        if !overwrite && dir.read_dir()?.next().is_some() {
            anyhow::bail!("output directory must be empty (or pass overwrite): {}", dir.display());
        }
    } else {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Write `rows` as CSV with a header derived from `T`.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for row in rows {
        w.serialize(row)?;
    }
    w.flush()?;
    tracing::debug!(path = %path.display(), rows = rows.len(), "table written");
    Ok(())
}

/// Write a table whose columns are only known at run time.
pub fn write_table(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    w.write_record(header)?;
    for row in rows {
        w.write_record(row)?;
    }
    w.flush()?;
    tracing::debug!(path = %path.display(), rows = rows.len(), "table written");
    Ok(())
}

/// Write pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?.filter_map(|e| e.ok().map(|e| e.path())).collect();
    entries.sort();
    for p in entries {
        if p.is_dir() {
            collect_files(root, &p, out)?;
        } else if p != root.join("manifest.json") {
            out.push(p);
        }
    }
    Ok(())
}

/// Write `manifest.json` covering every other file under `root`.
pub fn write_manifest(root: &Path) -> Result<PathBuf> {
    let mut paths = Vec::new();
    collect_files(root, root, &mut paths)?;
    let mut files = Vec::with_capacity(paths.len());
    for p in &paths {
        let rel = p.strip_prefix(root).unwrap_or(p);
        files.push(ManifestFile {
            path: rel.to_string_lossy().replace('\\', "/"),
            bytes: file_size(p)?,
            sha256: sha256_file(p)?,
        });
    }
    let manifest = Manifest { bundle_version: BUNDLE_VERSION, files };
    let manifest_path = root.join("manifest.json");
    write_json(&manifest_path, &manifest)?;
    tracing::info!(files = manifest.files.len(), path = %manifest_path.display(), "manifest written");
    Ok(manifest_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_manifest_lists_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.csv"), "x\n1\n").unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        write_manifest(dir.path()).unwrap();
        // Rewriting must not list the previous manifest.
        let path = write_manifest(dir.path()).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        let files: Vec<&str> = v["files"].as_array().unwrap().iter().map(|f| f["path"].as_str().unwrap()).collect();
        assert_eq!(files, vec!["a.txt", "b.csv", "sub/a.json"]);
        assert_eq!(v["files"][1]["bytes"], 4);
    }

    #[test]
    fn test_prepare_out_dir_refuses_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x"), "").unwrap();
        assert!(prepare_out_dir(dir.path(), false).is_err());
        assert!(prepare_out_dir(dir.path(), true).is_ok());
        assert!(prepare_out_dir(&dir.path().join("new/nested"), false).is_ok());
    }
}

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

pub const GENESIS: &str = "genesis";

fn line_hash(line: &str) -> String {
    format!("sha256:{:x}", Sha256::digest(line.as_bytes()))
}

fn last_line_hash(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(GENESIS.to_string());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read audit {}", path.display()))?;
    Ok(content
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(line_hash)
        .unwrap_or_else(|| GENESIS.to_string()))
}

/// Append one JSON entry to a hash-chained audit log.
///
/// Each line carries `prev_hash` (SHA-256 of the previous line, or
/// `genesis`) and `ts`. Returns the new line's hash.
pub fn append_audit(path: &Path, entry: &serde_json::Value) -> Result<String> {
    let prev_hash = last_line_hash(path)?;

    let mut entry = entry.clone();
    if let Some(obj) = entry.as_object_mut() {
        obj.insert("prev_hash".into(), serde_json::Value::String(prev_hash));
        obj.insert(
            "ts".into(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
    }
    let line = serde_json::to_string(&entry)?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open audit {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("cannot write audit {}", path.display()))?;
    file.sync_all()?;

    Ok(line_hash(&line))
}

/// Walk the chain and return the number of entries.
pub fn verify_chain(path: &Path) -> Result<u64> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read audit {}", path.display()))?;

    let mut count = 0u64;
    let mut prev_hash = GENESIS.to_string();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: serde_json::Value = serde_json::from_str(line)
            .with_context(|| format!("invalid JSON at line {}", i + 1))?;
        let entry_prev = entry
            .get("prev_hash")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(GENESIS);
        if entry_prev != prev_hash {
            bail!(
                "hash chain broken at entry {count}: expected prev_hash '{prev_hash}', got '{entry_prev}'"
            );
        }
        prev_hash = line_hash(line);
        count += 1;
    }
    Ok(count)
}

//! Hierarchical path helpers
//!
//! Paths are absolute, `/`-separated, without a trailing slash (except the
//! root itself) and without empty, `.` or `..` segments.

use crate::error::{Result, StoreError};

/// Width of the zero-padded sequence suffix on sequential nodes
pub const SEQUENCE_WIDTH: usize = 10;

pub fn validate_path(path: &str) -> Result<()> {
    let invalid = || StoreError::InvalidPath(path.to_string());

    if !path.starts_with('/') || path.contains('\0') {
        return Err(invalid());
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(invalid());
    }
    for segment in path[1..].split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid());
        }
    }
    Ok(())
}

pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Parent of `path`, or `None` for the root
pub fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of `path`
pub fn node_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Name of the `sequence`-th sequential child created with `prefix`
pub fn sequential_name(prefix: &str, sequence: u64) -> String {
    format!("{}{:0width$}", prefix, sequence, width = SEQUENCE_WIDTH)
}

/// Sequence number encoded in the suffix of a sequential node name
pub fn sequence_of(name: &str) -> Option<u64> {
    let name = node_name(name);
    if name.len() < SEQUENCE_WIDTH {
        return None;
    }
    let suffix = &name[name.len() - SEQUENCE_WIDTH..];
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Sort node names by sequence; names without a sequence go last, by name.
pub fn sort_by_sequence(names: &mut [String]) {
    names.sort_by(|a, b| {
        let key_a = (sequence_of(a).unwrap_or(u64::MAX), a.as_str());
        let key_b = (sequence_of(b).unwrap_or(u64::MAX), b.as_str());
        key_a.cmp(&key_b)
    });
}

/// Proper ancestors of `path`, outermost first, excluding the root
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut current = parent_of(path);
    while let Some(p) = current {
        if p == "/" {
            break;
        }
        result.push(p);
        current = parent_of(p);
    }
    result.reverse();
    result
}

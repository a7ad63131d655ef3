//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod clock;
pub mod error;
pub mod retry;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use url::Url;

/// Canonical form of a URL for use in idempotency keys
///
/// Drops the fragment and a trailing slash on the path; scheme and host are
/// lowercased by the parser. Query strings are kept as-is because many news
/// sites address articles through them.
pub fn canonicalize_url(url: &str) -> Result<String> {
    let mut parsed = Url::parse(url.trim()).with_context(|| format!("Invalid URL: {url}"))?;
    parsed.set_fragment(None);

    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }

    let mut canonical = parsed.to_string();
    if parsed.path() == "/" && parsed.query().is_none() {
        canonical.pop();
    }
    Ok(canonical)
}

/// Replace characters that are unsafe in object keys and file names
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Lowercase hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Format byte size as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return String::from("0 B");
    }

    let base: f64 = 1024.0;
    let exponent = (bytes as f64).log(base).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);

    let value = bytes as f64 / base.powi(exponent as i32);

    format!("{value:.2} {}", UNITS[exponent])
}

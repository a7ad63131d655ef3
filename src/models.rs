// Core data structures for newsdesk workers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::utils::{canonicalize_url, sha256_hex};

/// Deduplication key: `{source}:{external id or canonical URL}`
///
/// Built once from a candidate and never rewritten afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(source: &str, external_id: &str) -> Self {
        Self(format!("{source}:{external_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Source part of the key
    pub fn source(&self) -> &str {
        self.0.split_once(':').map(|(s, _)| s).unwrap_or(&self.0)
    }

    /// External id part of the key
    pub fn external_id(&self) -> &str {
        self.0.split_once(':').map(|(_, id)| id).unwrap_or("")
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A unit of work produced by source-specific extraction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateItem {
    pub source: String,
    /// Vendor id, or the canonical URL when the source has none
    pub external_id: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    /// Normalized category
    pub category: Option<String>,
    /// Category as published by the source
    pub raw_category: Option<String>,
    /// Publication time as published by the source
    pub published_at: Option<String>,
    pub image_url: Option<String>,
}

impl CandidateItem {
    pub fn new(source: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            external_id: external_id.into(),
            ..Default::default()
        }
    }

    /// Candidate addressed by its canonical URL
    pub fn from_url(source: impl Into<String>, url: &str) -> anyhow::Result<Self> {
        let canonical = canonicalize_url(url)?;
        Ok(Self {
            source: source.into(),
            url: Some(canonical.clone()),
            external_id: canonical,
            ..Default::default()
        })
    }

    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.source, &self.external_id)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>, raw: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self.raw_category = Some(raw.into());
        self
    }
}

/// Record as stored in the record store, one per idempotency key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsRecord {
    pub id: Uuid,
    pub key: IdempotencyKey,
    pub source: String,
    pub title: String,
    pub url: Option<String>,
    pub body: Option<String>,
    pub summary: Option<String>,
    pub category: Option<String>,
    pub raw_category: Option<String>,
    pub published_at: Option<String>,
    pub image_url: Option<String>,
    /// SHA256 of the body
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewsRecord {
    /// Record carrying everything the candidate already has
    pub fn from_candidate(item: &CandidateItem) -> Self {
        let title = item
            .title
            .clone()
            .unwrap_or_else(|| item.external_id.clone());

        Self {
            id: Uuid::new_v4(),
            key: item.key(),
            source: item.source.clone(),
            title,
            url: item.url.clone(),
            content_hash: item.body.as_deref().map(|b| sha256_hex(b.as_bytes())),
            body: item.body.clone(),
            summary: item.summary.clone(),
            category: item.category.clone(),
            raw_category: item.raw_category.clone(),
            published_at: item.published_at.clone(),
            image_url: item.image_url.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Uploaded, content-addressed media blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub key: String,
    pub content_type: String,
    pub size: u64,
    pub sha256: String,
}

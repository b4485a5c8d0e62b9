//! Firmware version strings
//!
//! The core reports versions as `release-extraCommits-sha-modifier`, e.g.
//! `1.2.0-5-g1a2b3c-dirty`. Only the release is mandatory. Ordering is by
//! release first and then, for equal releases, by the number of extra
//! commits when both sides are numeric.

use crate::error::{Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

/// Dotted numeric release, compared component-wise with missing parts as zero
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Release {
    parts: Vec<u64>,
}

impl Release {
    /// Accepts `1.2.0` and `v1.2.0`; any non-numeric component fails
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let text = text.strip_prefix(['v', 'V']).unwrap_or(text);
        if text.is_empty() {
            return None;
        }
        let parts = text
            .split('.')
            .map(|p| p.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self { parts })
    }

    fn part(&self, i: usize) -> u64 {
        self.parts.get(i).copied().unwrap_or(0)
    }
}

impl PartialEq for Release {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for Release {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| self.part(i).cmp(&other.part(i)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Release {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: Vec<String> = self.parts.iter().map(u64::to_string).collect();
        f.write_str(&text.join("."))
    }
}

/// A parsed firmware version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub release: Release,
    /// Kept as text: builds off a dirty tree may report something non-numeric
    pub extra_commits: String,
    pub sha: String,
    pub local_modifier: String,
}

impl FirmwareVersion {
    /// Parse `release[-extraCommits[-sha[-modifier]]]`
    ///
    /// Returns `None` for an empty string or an unparsable release.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let mut segments = text.split('-');
        let release_text = segments.next().unwrap_or_default();
        let Some(release) = Release::parse(release_text) else {
            tracing::warn!("Failed to parse firmware release {:?} in {:?}", release_text, text);
            return None;
        };

        Some(Self {
            release,
            extra_commits: segments.next().unwrap_or("0").to_string(),
            sha: segments.next().unwrap_or_default().to_string(),
            local_modifier: segments.next().unwrap_or_default().to_string(),
        })
    }

    /// Read the version shipped alongside a firmware image
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read firmware version from {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    /// Extra commits as a number, if it is one
    pub fn extra_commits_count(&self) -> Option<u64> {
        self.extra_commits.trim().parse().ok()
    }

    /// True if `running` is behind `available`
    ///
    /// Unknown versions on either side never request an update, and a
    /// non-numeric commit count is treated as equal.
    pub fn is_outdated(running: Option<&Self>, available: Option<&Self>) -> bool {
        let (Some(running), Some(available)) = (running, available) else {
            return false;
        };

        match running.release.cmp(&available.release) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => matches!(
                (running.extra_commits_count(), available.extra_commits_count()),
                (Some(r), Some(a)) if r < a
            ),
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.release, self.extra_commits)?;
        if !self.sha.is_empty() {
            write!(f, "-{}", self.sha)?;
        }
        if !self.local_modifier.is_empty() {
            write!(f, "-{}", self.local_modifier)?;
        }
        Ok(())
    }
}

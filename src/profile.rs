//! Named scoring profiles loaded from `profile.yaml`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::TARGET_PIPELINE;

fn default_max_per_source() -> usize {
    2
}

fn default_send_time() -> String {
    "17:00".to_string()
}

fn default_name() -> String {
    "default".to_string()
}

/// Thresholds and keyword rules used to score and select entries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoringProfile {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub min_score: f64,
    #[serde(default = "default_max_per_source")]
    pub max_per_source: usize,
    #[serde(default)]
    pub keywords_positive: Vec<String>,
    #[serde(default)]
    pub keywords_negative: Vec<String>,
    /// Label shown in digest emails, e.g. `17:00`.
    #[serde(default = "default_send_time")]
    pub send_time: String,
}

impl Default for ScoringProfile {
    fn default() -> Self {
        ScoringProfile {
            name: default_name(),
            min_score: 0.0,
            max_per_source: default_max_per_source(),
            keywords_positive: Vec::new(),
            keywords_negative: Vec::new(),
            send_time: default_send_time(),
        }
    }
}

/// Loads the ordered profile list. A missing file or an empty list is a
/// configuration error.
pub fn load_profiles(path: &Path) -> Result<Vec<ScoringProfile>> {
    if !path.exists() {
        return Err(anyhow!("Profile file missing: {}", path.display()));
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if raw.trim().is_empty() {
        return Err(anyhow!("profile.yaml must contain a list of profiles"));
    }
    let profiles: Option<Vec<ScoringProfile>> = serde_yaml::from_str(&raw)
        .with_context(|| format!("profile.yaml must contain a list of profiles ({})", path.display()))?;
    match profiles {
        Some(profiles) if !profiles.is_empty() => Ok(profiles),
        _ => Err(anyhow!("profile.yaml must contain a list of profiles")),
    }
}

/// Picks the profile named `name`, falling back to the first one when no
/// name is given or nothing matches.
pub fn choose_profile<'a>(profiles: &'a [ScoringProfile], name: Option<&str>) -> Result<&'a ScoringProfile> {
    let first = profiles
        .first()
        .ok_or_else(|| anyhow!("no scoring profiles configured"))?;
    let Some(name) = name else {
        return Ok(first);
    };
    match profiles.iter().find(|p| p.name == name) {
        Some(profile) => Ok(profile),
        None => {
            warn!(target: TARGET_PIPELINE, "Profile '{}' not found, falling back to '{}'", name, first.name);
            Ok(first)
        }
    }
}

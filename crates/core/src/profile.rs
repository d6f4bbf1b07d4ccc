use serde::{Deserialize, Serialize};

use crate::rule::RuleFilters;

/// Configuration of one statistical detection profile.
///
/// Profiles are operator configuration loaded at worker startup, not rows in
/// the rules table; their anomalies carry a prefixed profile id as `rule_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatProfile {
    pub id: String,
    pub bucket_seconds: u32,
    pub baseline_buckets: usize,
    pub z_threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<RuleFilters>,
}

impl StatProfile {
    /// Structural validation. The baseline needs at least two samples for a
    /// meaningful stddev.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("profile id must not be empty".to_string());
        }
        if self.bucket_seconds == 0 {
            return Err(format!("profile '{}': bucket_seconds must be positive", self.id));
        }
        if self.baseline_buckets < 2 {
            return Err(format!("profile '{}': baseline_buckets must be >= 2", self.id));
        }
        if !self.z_threshold.is_finite() || self.z_threshold <= 0.0 {
            return Err(format!("profile '{}': z_threshold must be positive", self.id));
        }
        Ok(())
    }

    pub fn bucket_ms(&self) -> i64 {
        i64::from(self.bucket_seconds) * 1000
    }
}

/// Parse a JSON array of profiles, keeping the valid ones and logging the
/// rest. A malformed document yields an empty set rather than a crash.
pub fn parse_profiles(json: &str) -> Vec<StatProfile> {
    let parsed: Vec<StatProfile> = match serde_json::from_str(json) {
        Ok(profiles) => profiles,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse statistical profiles, none loaded");
            return Vec::new();
        }
    };

    parsed
        .into_iter()
        .filter(|p| match p.validate() {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(profile = %p.id, %reason, "skipping invalid statistical profile");
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_profiles() {
        let profiles = parse_profiles(
            r#"[{"id":"login-spike","bucket_seconds":60,"baseline_buckets":5,"z_threshold":2.0}]"#,
        );
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].bucket_ms(), 60_000);
    }

    #[test]
    fn drops_invalid_keeps_valid() {
        let profiles = parse_profiles(
            r#"[
                {"id":"ok","bucket_seconds":60,"baseline_buckets":5,"z_threshold":2.0},
                {"id":"one-bucket","bucket_seconds":60,"baseline_buckets":1,"z_threshold":2.0},
                {"id":"zero-bucket","bucket_seconds":0,"baseline_buckets":5,"z_threshold":2.0}
            ]"#,
        );
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].id, "ok");
    }

    #[test]
    fn malformed_document_yields_empty() {
        assert!(parse_profiles("not json").is_empty());
    }
}

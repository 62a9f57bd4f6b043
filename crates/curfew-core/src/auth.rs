//! # Auth Bundle
//!
//! The session artifacts (browser cookies) that authenticate every dashboard
//! call, and the freshness rules that decide when they must be refreshed.
//!
//! ## Freshness Timeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   now ─────────────────────────┬──────────────────────┬──────────►     │
//! │                                │◄──── margin (4h) ───►│                 │
//! │         Fresh                  │      RefreshDue      │  Expired        │
//! │                          expiry - margin          earliest_expiry       │
//! │                                                                         │
//! │   Any required artifact missing ──► Incomplete (regardless of time)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Storage Format
//! The bundle is persisted as a browser "storage state" document:
//! ```json
//! {"cookies": [{"name": "ft-session", "value": "…", "domain": ".example.com",
//!               "path": "/", "expires": 1767225600, "httpOnly": true}],
//!  "origins": []}
//! ```
//! `expires` is Unix seconds; `-1` or a missing field means the cookie lives
//! for the browser session only. Fields this module does not interpret are
//! kept and written back untouched.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Constants
// =============================================================================

/// Artifacts the remote API refuses to work without.
pub const DEFAULT_REQUIRED_ARTIFACTS: [&str; 3] = ["ft-session", "ft-panda-csrf-token", "at-acbuk"];

/// Default refresh safety margin before the earliest expiry.
pub const DEFAULT_REFRESH_MARGIN_HOURS: i64 = 4;

// =============================================================================
// Artifact
// =============================================================================

/// One named, domain-scoped secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthArtifact {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default, with = "expiry_seconds")]
    pub expires: Option<DateTime<Utc>>,
    /// `httpOnly`, `secure`, `sameSite` and anything else the writer added.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_path() -> String {
    "/".to_string()
}

impl AuthArtifact {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: default_path(),
            expires: None,
            extra: Map::new(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires = Some(at);
        self
    }
}

/// `expires` as Unix seconds, `-1` meaning none.
mod expiry_seconds {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            None => serializer.serialize_i64(-1),
            Some(at) if at.timestamp_subsec_millis() == 0 => serializer.serialize_i64(at.timestamp()),
            Some(at) => serializer.serialize_f64(at.timestamp_millis() as f64 / 1000.0),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<f64>::deserialize(deserializer)?;
        Ok(raw
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64)))
    }
}

// =============================================================================
// Policy & Freshness
// =============================================================================

/// Which artifacts must be present and how early to refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthPolicy {
    pub required: Vec<String>,
    pub refresh_margin: Duration,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            required: DEFAULT_REQUIRED_ARTIFACTS.iter().map(|s| s.to_string()).collect(),
            refresh_margin: Duration::hours(DEFAULT_REFRESH_MARGIN_HOURS),
        }
    }
}

/// Classification of a bundle at an instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Usable; `expires_in` is `None` when nothing required ever expires.
    Fresh { expires_in: Option<Duration> },
    /// Still valid but inside the safety margin.
    RefreshDue { expires_in: Duration },
    Expired,
    Incomplete { missing: Vec<String> },
}

impl Freshness {
    /// Usable without refreshing.
    pub fn is_usable(&self) -> bool {
        matches!(self, Freshness::Fresh { .. })
    }

    /// The remote would still accept it, margin or not.
    pub fn is_valid(&self) -> bool {
        matches!(self, Freshness::Fresh { .. } | Freshness::RefreshDue { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Freshness::Fresh { .. } => "fresh",
            Freshness::RefreshDue { .. } => "refresh_due",
            Freshness::Expired => "expired",
            Freshness::Incomplete { .. } => "incomplete",
        }
    }
}

/// Expiry details for one artifact, reported on the health entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactExpiry {
    pub name: String,
    pub required: bool,
    pub present: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub expires_in_secs: Option<i64>,
}

// =============================================================================
// Bundle
// =============================================================================

/// Ordered set of artifacts, replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthArtifactBundle {
    #[serde(default, rename = "cookies")]
    artifacts: Vec<AuthArtifact>,
    #[serde(default)]
    origins: Vec<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl AuthArtifactBundle {
    pub fn new(artifacts: Vec<AuthArtifact>) -> Self {
        Self {
            artifacts,
            origins: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Parses a storage-state document.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::InvalidBundle(e.to_string()))
    }

    /// Renders the storage-state document.
    pub fn to_json_pretty(&self) -> CoreResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| CoreError::InvalidBundle(e.to_string()))
    }

    pub fn artifacts(&self) -> &[AuthArtifact] {
        &self.artifacts
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// First artifact with this name.
    pub fn get(&self, name: &str) -> Option<&AuthArtifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|a| a.value.as_str())
    }

    /// Earliest expiry over every artifact.
    pub fn earliest_expiry(&self) -> Option<DateTime<Utc>> {
        self.artifacts.iter().filter_map(|a| a.expires).min()
    }

    /// Earliest expiry over the required artifacts, or over all of them when
    /// `required` is empty.
    pub fn earliest_required_expiry(&self, required: &[String]) -> Option<DateTime<Utc>> {
        if required.is_empty() {
            return self.earliest_expiry();
        }
        self.artifacts
            .iter()
            .filter(|a| required.iter().any(|r| *r == a.name))
            .filter_map(|a| a.expires)
            .min()
    }

    /// Required names with no artifact in the bundle.
    pub fn missing(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|name| self.get(name).is_none())
            .cloned()
            .collect()
    }

    pub fn freshness(&self, policy: &AuthPolicy, now: DateTime<Utc>) -> Freshness {
        let missing = self.missing(&policy.required);
        if !missing.is_empty() || self.is_empty() {
            return Freshness::Incomplete { missing };
        }
        match self.earliest_required_expiry(&policy.required) {
            None => Freshness::Fresh { expires_in: None },
            Some(at) if at <= now => Freshness::Expired,
            Some(at) => {
                let expires_in = at - now;
                if expires_in > policy.refresh_margin {
                    Freshness::Fresh {
                        expires_in: Some(expires_in),
                    }
                } else {
                    Freshness::RefreshDue { expires_in }
                }
            }
        }
    }

    /// Required artifacts first (present or not), then the rest.
    pub fn artifact_expiries(&self, required: &[String], now: DateTime<Utc>) -> Vec<ArtifactExpiry> {
        let describe = |name: &str, is_required: bool| {
            let artifact = self.get(name);
            let expires_at = artifact.and_then(|a| a.expires);
            ArtifactExpiry {
                name: name.to_string(),
                required: is_required,
                present: artifact.is_some(),
                expires_at,
                expires_in_secs: expires_at.map(|at| (at - now).num_seconds()),
            }
        };

        let mut out: Vec<ArtifactExpiry> = required.iter().map(|n| describe(n, true)).collect();
        for artifact in &self.artifacts {
            if !out.iter().any(|e| e.name == artifact.name) {
                out.push(describe(&artifact.name, false));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn bundle_expiring_at(expiry: DateTime<Utc>) -> AuthArtifactBundle {
        AuthArtifactBundle::new(vec![
            AuthArtifact::new("ft-session", "s").expiring_at(expiry + Duration::days(30)),
            AuthArtifact::new("ft-panda-csrf-token", "c").expiring_at(expiry),
            AuthArtifact::new("at-acbuk", "a"),
            AuthArtifact::new("tracking", "x").expiring_at(expiry - Duration::days(1)),
        ])
    }

    #[test]
    fn test_parse_storage_state() {
        let json = r#"{
            "cookies": [
                {"name": "ft-session", "value": "abc", "domain": ".example.com",
                 "path": "/", "expires": 1767225600, "httpOnly": true, "secure": true},
                {"name": "at-acbuk", "value": "def", "domain": ".example.com",
                 "path": "/", "expires": -1}
            ],
            "origins": []
        }"#;
        let bundle = AuthArtifactBundle::from_json(json).unwrap();
        assert_eq!(bundle.artifacts().len(), 2);
        assert_eq!(bundle.value("ft-session"), Some("abc"));
        assert_eq!(
            bundle.get("ft-session").unwrap().expires,
            DateTime::from_timestamp(1_767_225_600, 0)
        );
        assert_eq!(bundle.get("at-acbuk").unwrap().expires, None);
        assert_eq!(bundle.get("ft-session").unwrap().extra["httpOnly"], Value::Bool(true));
    }

    #[test]
    fn test_unknown_fields_survive_rewrite() {
        let json = r#"{"cookies": [{"name": "a", "value": "1", "sameSite": "Lax", "expires": 1767225600.5}],
                       "origins": [{"origin": "https://example.com"}]}"#;
        let bundle = AuthArtifactBundle::from_json(json).unwrap();
        let reparsed = AuthArtifactBundle::from_json(&bundle.to_json_pretty().unwrap()).unwrap();
        assert_eq!(reparsed, bundle);
        assert_eq!(reparsed.get("a").unwrap().extra["sameSite"], "Lax");
        assert!(reparsed.to_json_pretty().unwrap().contains("https://example.com"));
    }

    #[test]
    fn test_malformed_document_rejected() {
        assert!(matches!(
            AuthArtifactBundle::from_json("{\"cookies\": 7}"),
            Err(CoreError::InvalidBundle(_))
        ));
    }

    #[test]
    fn test_earliest_expiry_uses_required_artifacts() {
        let expiry = t0() + Duration::hours(10);
        let bundle = bundle_expiring_at(expiry);
        let policy = AuthPolicy::default();

        assert_eq!(bundle.earliest_expiry(), Some(expiry - Duration::days(1)));
        assert_eq!(bundle.earliest_required_expiry(&policy.required), Some(expiry));
        assert_eq!(
            bundle.earliest_required_expiry(&[]),
            Some(expiry - Duration::days(1))
        );
    }

    #[test]
    fn test_freshness_margin() {
        let expiry = t0();
        let bundle = bundle_expiring_at(expiry);
        let policy = AuthPolicy::default();

        assert!(bundle
            .freshness(&policy, expiry - Duration::hours(5))
            .is_usable());
        assert_eq!(
            bundle.freshness(&policy, expiry - Duration::hours(3)),
            Freshness::RefreshDue {
                expires_in: Duration::hours(3)
            }
        );
        assert_eq!(bundle.freshness(&policy, expiry), Freshness::Expired);
        assert!(!bundle.freshness(&policy, expiry).is_valid());
    }

    #[test]
    fn test_missing_required_is_incomplete() {
        let bundle = AuthArtifactBundle::new(vec![AuthArtifact::new("ft-session", "s")]);
        match bundle.freshness(&AuthPolicy::default(), t0()) {
            Freshness::Incomplete { missing } => {
                assert_eq!(missing, vec!["ft-panda-csrf-token", "at-acbuk"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_empty_bundle_is_incomplete_even_without_requirements() {
        let policy = AuthPolicy {
            required: Vec::new(),
            ..AuthPolicy::default()
        };
        assert!(matches!(
            AuthArtifactBundle::default().freshness(&policy, t0()),
            Freshness::Incomplete { .. }
        ));
    }

    #[test]
    fn test_session_only_artifacts_never_expire() {
        let bundle = AuthArtifactBundle::new(
            DEFAULT_REQUIRED_ARTIFACTS
                .iter()
                .map(|n| AuthArtifact::new(*n, "v"))
                .collect(),
        );
        assert_eq!(
            bundle.freshness(&AuthPolicy::default(), t0()),
            Freshness::Fresh { expires_in: None }
        );
    }

    #[test]
    fn test_artifact_expiries_lists_required_first() {
        let bundle = bundle_expiring_at(t0() + Duration::hours(6));
        let details = bundle.artifact_expiries(&AuthPolicy::default().required, t0());
        let names: Vec<_> = details.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["ft-session", "ft-panda-csrf-token", "at-acbuk", "tracking"]);
        assert_eq!(details[1].expires_in_secs, Some(6 * 3600));
        assert!(!details[3].required);
    }
}

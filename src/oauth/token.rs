//! Token record model and expiry arithmetic.
//!
//! [`TokenRecord`] is the single persisted credential for this installation.
//! [`TokenResponse`] is what the token endpoint returns; it becomes a record
//! once the issuance time is known and `expires_at` can be derived.
//!
//! Keys the endpoint sends beyond the modelled ones (`companyId`, `userId`,
//! `userType`, ...) are carried through to the persisted record verbatim.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Proactive refresh buffer (5 minutes / 300 seconds).
///
/// A token is refreshed once `now > expires_at - REFRESH_BUFFER_SECS`.
pub const REFRESH_BUFFER_SECS: i64 = 300;

/// Persisted OAuth credential state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenRecord {
    /// Bearer credential for API calls.
    pub access_token: String,

    /// Long-lived credential used to mint new access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Seconds of validity at issuance, as reported by the server.
    #[serde(default)]
    pub expires_in: i64,

    /// Unix timestamp (seconds) when the access token expires.
    ///
    /// `None` only for records written by tools that did not track expiry.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_epoch_secs"
    )]
    pub expires_at: Option<i64>,

    /// Sub-account the authorization was granted for, if any.
    #[serde(rename = "locationId", default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Remaining response keys, stored untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenRecord {
    /// Create a record issued at `issued_at` (epoch seconds).
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: i64,
        issued_at: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_in,
            expires_at: Some(issued_at.saturating_add(expires_in)),
            location_id: None,
            token_type: None,
            scope: None,
            extra: Map::new(),
        }
    }

    /// The stored refresh token, ignoring empty strings.
    pub fn usable_refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Whether the token should be refreshed at `now`.
    ///
    /// Returns `false` when the expiry is unknown.
    #[must_use]
    pub fn needs_refresh_at(&self, now: i64) -> bool {
        match self.expires_at {
            Some(exp) => now > exp.saturating_sub(REFRESH_BUFFER_SECS),
            None => false,
        }
    }

    /// Whether the access token is past its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }

    /// Time left before expiry, clamped at zero. `None` when unknown.
    pub fn time_until_expiry_at(&self, now: i64) -> Option<Duration> {
        self.expires_at
            .map(|exp| Duration::from_secs(u64::try_from(exp.saturating_sub(now)).unwrap_or(0)))
    }

    /// Keep `previous` as the refresh token when this record carries none.
    pub fn with_refresh_fallback(mut self, previous: &str) -> Self {
        if self.usable_refresh_token().is_none() {
            self.refresh_token = Some(previous.to_string());
        }
        self
    }
}

/// Successful body of the token endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(deserialize_with = "deserialize_lifetime_secs")]
    pub expires_in: i64,
    #[serde(rename = "locationId", default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenResponse {
    /// Turn the response into a record issued at `issued_at`.
    pub fn into_record(self, issued_at: i64) -> TokenRecord {
        let mut extra = self.extra;
        // expires_at is always derived locally.
        extra.remove("expires_at");

        TokenRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_in: self.expires_in,
            expires_at: Some(issued_at.saturating_add(self.expires_in)),
            location_id: self.location_id,
            token_type: self.token_type,
            scope: self.scope,
            extra,
        }
    }
}

/// Token lifetime in whole seconds; a negative lifetime is rejected.
fn deserialize_lifetime_secs<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = i64::deserialize(deserializer)?;
    if secs < 0 {
        return Err(serde::de::Error::custom(format!(
            "expires_in must not be negative, got {secs}"
        )));
    }
    Ok(secs)
}

/// Accept integer or floating-point epoch seconds.
///
/// Older token files store fractional seconds.
fn deserialize_epoch_secs<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(value.and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_expiring_at(expires_at: i64) -> TokenRecord {
        TokenRecord {
            expires_at: Some(expires_at),
            ..TokenRecord::new("access", Some("refresh".into()), 3600, 0)
        }
    }

    #[test]
    fn test_new_computes_expires_at() {
        let record = TokenRecord::new("A1", Some("R1".into()), 3600, 1000);
        assert_eq!(record.expires_at, Some(4600));
        assert_eq!(record.expires_in, 3600);
        assert_eq!(record.usable_refresh_token(), Some("R1"));
    }

    #[test]
    fn test_needs_refresh_buffer_boundary() {
        let record = record_expiring_at(10_000);
        assert!(!record.needs_refresh_at(10_000 - 301));
        assert!(!record.needs_refresh_at(10_000 - 300));
        assert!(record.needs_refresh_at(10_000 - 299));
        assert!(record.needs_refresh_at(20_000));
    }

    #[test]
    fn test_unknown_expiry_never_needs_refresh() {
        let record = TokenRecord {
            expires_at: None,
            ..TokenRecord::new("access", None, 0, 0)
        };
        assert!(!record.needs_refresh_at(i64::MAX));
        assert!(!record.is_expired_at(i64::MAX));
        assert!(record.time_until_expiry_at(0).is_none());
    }

    #[test]
    fn test_time_until_expiry_clamps() {
        let record = record_expiring_at(5000);
        assert_eq!(record.time_until_expiry_at(4000), Some(Duration::from_secs(1000)));
        assert_eq!(record.time_until_expiry_at(6000), Some(Duration::ZERO));
        assert!(record.is_expired_at(5000));
        assert!(!record.is_expired_at(4999));
    }

    #[test]
    fn test_refresh_fallback_only_when_missing() {
        let without = TokenRecord::new("A2", None, 3600, 0).with_refresh_fallback("R1");
        assert_eq!(without.refresh_token.as_deref(), Some("R1"));

        let empty = TokenRecord::new("A2", Some(String::new()), 3600, 0).with_refresh_fallback("R1");
        assert_eq!(empty.refresh_token.as_deref(), Some("R1"));

        let rotated = TokenRecord::new("A2", Some("R2".into()), 3600, 0).with_refresh_fallback("R1");
        assert_eq!(rotated.refresh_token.as_deref(), Some("R2"));
    }

    #[test]
    fn test_response_into_record_keeps_extras() {
        let response: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "A1",
            "refresh_token": "R1",
            "expires_in": 86399,
            "token_type": "Bearer",
            "scope": "contacts.write opportunities.write",
            "locationId": "loc-1",
            "companyId": "co-9",
            "userType": "Location",
            "expires_at": 1
        }))
        .unwrap();

        let record = response.into_record(1000);
        assert_eq!(record.expires_at, Some(87399));
        assert_eq!(record.location_id.as_deref(), Some("loc-1"));
        assert_eq!(record.token_type.as_deref(), Some("Bearer"));
        assert_eq!(record.extra.get("companyId"), Some(&Value::from("co-9")));
        assert!(!record.extra.contains_key("expires_at"));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["expires_at"], 87399);
        assert_eq!(json["locationId"], "loc-1");
        assert_eq!(json["userType"], "Location");
    }

    #[test]
    fn test_response_requires_expires_in() {
        let result = serde_json::from_str::<TokenResponse>(r#"{"access_token":"A1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_response_rejects_negative_expires_in() {
        let err = serde_json::from_str::<TokenResponse>(r#"{"access_token":"A1","expires_in":-5}"#)
            .unwrap_err();
        assert!(err.to_string().contains("must not be negative"));
    }

    #[test]
    fn test_huge_expires_in_saturates() {
        let response: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "A1",
            "expires_in": i64::MAX,
        }))
        .unwrap();
        let record = response.into_record(1000);
        assert_eq!(record.expires_at, Some(i64::MAX));
        assert!(!record.needs_refresh_at(1000));
        assert_eq!(
            record.time_until_expiry_at(-1000),
            Some(Duration::from_secs(i64::MAX as u64))
        );
    }

    #[test]
    fn test_extreme_legacy_expires_at_needs_refresh() {
        let record: TokenRecord = serde_json::from_str(
            r#"{"access_token":"A","refresh_token":"R","expires_in":3600,"expires_at":-1e30}"#,
        )
        .unwrap();
        assert_eq!(record.expires_at, Some(i64::MIN));
        assert!(record.needs_refresh_at(0));
        assert!(record.is_expired_at(0));
        assert_eq!(record.time_until_expiry_at(i64::MAX), Some(Duration::ZERO));
    }

    #[test]
    fn test_legacy_float_expires_at() {
        let record: TokenRecord = serde_json::from_str(
            r#"{"access_token":"A","refresh_token":"R","expires_in":3600,"expires_at":1712345678.93}"#,
        )
        .unwrap();
        assert_eq!(record.expires_at, Some(1_712_345_678));
    }

    #[test]
    fn test_record_without_expiry_loads() {
        let record: TokenRecord =
            serde_json::from_str(r#"{"access_token":"A","expires_in":3600}"#).unwrap();
        assert!(record.expires_at.is_none());
        assert!(record.refresh_token.is_none());
        assert!(record.usable_refresh_token().is_none());
    }

    #[test]
    fn test_serialization_skips_absent_fields() {
        let record = TokenRecord::new("A", None, 60, 0);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"access_token\""));
        assert!(json.contains("\"expires_at\""));
        assert!(!json.contains("refresh_token"));
        assert!(!json.contains("locationId"));
    }
}

//! Typed identifiers and domain types for Relocate.
//!
//! Identifiers are newtype wrappers around `String` so that a
//! [`MigrationId`] cannot be passed where a [`WorkloadId`] is expected.
//! The request types mirror the JSON body accepted at the trigger boundary:
//! `{ "policyType": 1, "repetitionCount": 3 }`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RelocateError;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a new random identifier using UUID v4.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Return the inner string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of one bulk migration, used to correlate log lines.
    MigrationId
);

define_id!(
    /// Identifier of one workload generator task.
    WorkloadId
);

/// The adaptation policies known to the engine.
///
/// The numeric codes are the ones sent by the external controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Confine data to the primary geographic region.
    RegionPlacement,
    /// Move sensitive data between the managed cloud store and local disk.
    SensitivityPlacement,
}

impl PolicyKind {
    /// Every policy, in code order.
    pub const ALL: [PolicyKind; 2] = [PolicyKind::RegionPlacement, PolicyKind::SensitivityPlacement];

    /// The wire code of this policy.
    pub fn code(self) -> i64 {
        match self {
            PolicyKind::RegionPlacement => 1,
            PolicyKind::SensitivityPlacement => 2,
        }
    }

    /// Human-readable label for a placement state of this policy.
    pub fn state_label(self, state: PlacementState) -> &'static str {
        match (self, state) {
            (PolicyKind::RegionPlacement, PlacementState::A) => "unrestricted",
            (PolicyKind::RegionPlacement, PlacementState::B) => "confined-to-primary-region",
            (PolicyKind::SensitivityPlacement, PlacementState::A) => "cloud",
            (PolicyKind::SensitivityPlacement, PlacementState::B) => "local",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::RegionPlacement => write!(f, "region"),
            PolicyKind::SensitivityPlacement => write!(f, "sensitivity"),
        }
    }
}

impl TryFrom<i64> for PolicyKind {
    type Error = RelocateError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(PolicyKind::RegionPlacement),
            2 => Ok(PolicyKind::SensitivityPlacement),
            other => Err(RelocateError::UnknownPolicy {
                code: other.to_string(),
            }),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = RelocateError;

    /// Accepts the numeric code (`"1"`, `"2"`) or the policy name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<i64>() {
            return PolicyKind::try_from(code);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "region" | "region_placement" => Ok(PolicyKind::RegionPlacement),
            "sensitivity" | "sensitivity_placement" => Ok(PolicyKind::SensitivityPlacement),
            _ => Err(RelocateError::UnknownPolicy {
                code: trimmed.to_string(),
            }),
        }
    }
}

/// One of the two mutually-exclusive placement states of a policy.
///
/// Every policy starts in [`PlacementState::A`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlacementState {
    #[default]
    A,
    B,
}

impl PlacementState {
    /// The other state.
    pub fn complement(self) -> Self {
        match self {
            PlacementState::A => PlacementState::B,
            PlacementState::B => PlacementState::A,
        }
    }
}

impl fmt::Display for PlacementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementState::A => write!(f, "A"),
            PlacementState::B => write!(f, "B"),
        }
    }
}

/// A typed adaptation request.
///
/// `repetition_count` is the number of toggle events batched into this
/// request; only its parity matters to a policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAdaptationRequest", into = "RawAdaptationRequest")]
pub struct AdaptationRequest {
    pub policy_type: PolicyKind,
    pub repetition_count: u64,
}

impl AdaptationRequest {
    /// A single toggle of the given policy.
    pub fn new(policy_type: PolicyKind) -> Self {
        Self {
            policy_type,
            repetition_count: 1,
        }
    }

    /// A request carrying `repetition_count` toggles.
    pub fn repeated(policy_type: PolicyKind, repetition_count: u64) -> Self {
        Self {
            policy_type,
            repetition_count,
        }
    }

    /// Build a request from raw wire integers, validating both.
    pub fn from_raw(policy_type: i64, repetition_count: i64) -> Result<Self, RelocateError> {
        let policy_type = PolicyKind::try_from(policy_type)?;
        if repetition_count < 1 {
            return Err(RelocateError::InvalidRequest {
                message: format!("repetition count must be at least 1, got {repetition_count}"),
            });
        }
        // Positive i64 always fits
        let repetition_count = repetition_count.unsigned_abs();
        Ok(Self::repeated(policy_type, repetition_count))
    }

    /// Parse several requests that arrived together: a JSON array of
    /// request bodies, or single requests separated by `;`.
    pub fn parse_batch(input: &str) -> Result<Vec<Self>, RelocateError> {
        let trimmed = input.trim();
        if trimmed.starts_with('[') {
            return serde_json::from_str(trimmed)
                .map_err(|e| RelocateError::Serialization(e.to_string()));
        }
        trimmed
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect()
    }

    /// Whether this request produces an observable state change.
    pub fn is_effective(&self) -> bool {
        self.repetition_count % 2 == 1
    }
}

impl FromStr for AdaptationRequest {
    type Err = RelocateError;

    /// Parse a request from its JSON body, from `"<policy> <count>"`, or
    /// from a bare policy code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed)
                .map_err(|e| RelocateError::Serialization(e.to_string()));
        }
        let mut parts = trimmed.split_whitespace();
        let policy = parts.next().ok_or_else(|| RelocateError::InvalidRequest {
            message: "empty request".to_string(),
        })?;
        let policy_type = policy.parse::<PolicyKind>()?;
        let repetition_count = match parts.next() {
            Some(count) => count.parse::<i64>().map_err(|e| RelocateError::InvalidRequest {
                message: format!("invalid repetition count '{count}': {e}"),
            })?,
            None => 1,
        };
        if parts.next().is_some() {
            return Err(RelocateError::InvalidRequest {
                message: format!("unexpected trailing input in '{trimmed}'"),
            });
        }
        AdaptationRequest::from_raw(policy_type.code(), repetition_count)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAdaptationRequest {
    policy_type: i64,
    #[serde(default = "default_repetition_count")]
    repetition_count: i64,
}

fn default_repetition_count() -> i64 {
    1
}

impl From<AdaptationRequest> for RawAdaptationRequest {
    fn from(req: AdaptationRequest) -> Self {
        // Counts beyond the wire range keep their parity
        let fallback = if req.is_effective() { i64::MAX } else { i64::MAX - 1 };
        Self {
            policy_type: req.policy_type.code(),
            repetition_count: i64::try_from(req.repetition_count).unwrap_or(fallback),
        }
    }
}

impl TryFrom<RawAdaptationRequest> for AdaptationRequest {
    type Error = RelocateError;

    fn try_from(raw: RawAdaptationRequest) -> Result<Self, Self::Error> {
        AdaptationRequest::from_raw(raw.policy_type, raw.repetition_count)
    }
}

/// The result returned across the trigger boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationResponse {
    pub success: bool,
    pub message: String,
}

impl AdaptationResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_kind_codes() {
        assert_eq!(PolicyKind::try_from(1).unwrap(), PolicyKind::RegionPlacement);
        assert_eq!(PolicyKind::try_from(2).unwrap(), PolicyKind::SensitivityPlacement);
        assert!(matches!(
            PolicyKind::try_from(3),
            Err(RelocateError::UnknownPolicy { .. })
        ));
        for kind in PolicyKind::ALL {
            assert_eq!(PolicyKind::try_from(kind.code()).unwrap(), kind);
        }
    }

    #[test]
    fn test_policy_kind_from_str() {
        assert_eq!("1".parse::<PolicyKind>().unwrap(), PolicyKind::RegionPlacement);
        assert_eq!(" 2 ".parse::<PolicyKind>().unwrap(), PolicyKind::SensitivityPlacement);
        assert_eq!("Region".parse::<PolicyKind>().unwrap(), PolicyKind::RegionPlacement);
        assert!("eu".parse::<PolicyKind>().is_err());
    }

    #[test]
    fn test_placement_complement() {
        assert_eq!(PlacementState::A.complement(), PlacementState::B);
        assert_eq!(PlacementState::B.complement(), PlacementState::A);
        assert_eq!(PlacementState::default(), PlacementState::A);
    }

    #[test]
    fn test_request_from_json_defaults_count() {
        let req: AdaptationRequest = serde_json::from_str(r#"{"policyType": 2}"#).unwrap();
        assert_eq!(req.policy_type, PolicyKind::SensitivityPlacement);
        assert_eq!(req.repetition_count, 1);
    }

    #[test]
    fn test_request_from_json_rejects_bad_values() {
        assert!(serde_json::from_str::<AdaptationRequest>(r#"{"policyType": 9}"#).is_err());
        assert!(serde_json::from_str::<AdaptationRequest>(
            r#"{"policyType": 1, "repetitionCount": 0}"#
        )
        .is_err());
    }

    #[test]
    fn test_request_serializes_wire_shape() {
        let req = AdaptationRequest::repeated(PolicyKind::SensitivityPlacement, 3);
        let json = serde_json::to_value(req).unwrap();
        assert_eq!(json, serde_json::json!({"policyType": 2, "repetitionCount": 3}));
    }

    #[test]
    fn test_request_accepts_counts_beyond_u32() {
        let req = AdaptationRequest::from_raw(1, 4_294_967_297).unwrap();
        assert_eq!(req.repetition_count, 4_294_967_297);
        assert!(req.is_effective());

        let req: AdaptationRequest = "2 9223372036854775807".parse().unwrap();
        assert!(req.is_effective());

        // Out-of-wire-range counts serialize with the same parity
        let huge = AdaptationRequest::repeated(PolicyKind::RegionPlacement, u64::MAX - 1);
        let back: AdaptationRequest =
            serde_json::from_value(serde_json::to_value(huge).unwrap()).unwrap();
        assert!(!back.is_effective());
    }

    #[test]
    fn test_request_from_line() {
        let req: AdaptationRequest = "1 3".parse().unwrap();
        assert_eq!(req, AdaptationRequest::repeated(PolicyKind::RegionPlacement, 3));
        let req: AdaptationRequest = "2".parse().unwrap();
        assert_eq!(req, AdaptationRequest::new(PolicyKind::SensitivityPlacement));
        let req: AdaptationRequest = r#"{"policyType":1,"repetitionCount":4}"#.parse().unwrap();
        assert!(!req.is_effective());
        assert!("1 x".parse::<AdaptationRequest>().is_err());
        assert!("1 1 1".parse::<AdaptationRequest>().is_err());
        assert!("".parse::<AdaptationRequest>().is_err());
    }

    #[test]
    fn test_parse_batch() {
        let batch = AdaptationRequest::parse_batch("1; 2 3 ;1").unwrap();
        assert_eq!(
            batch,
            vec![
                AdaptationRequest::new(PolicyKind::RegionPlacement),
                AdaptationRequest::repeated(PolicyKind::SensitivityPlacement, 3),
                AdaptationRequest::new(PolicyKind::RegionPlacement),
            ]
        );
        let batch =
            AdaptationRequest::parse_batch(r#"[{"policyType":2},{"policyType":1,"repetitionCount":2}]"#)
                .unwrap();
        assert_eq!(batch.len(), 2);
        assert!(AdaptationRequest::parse_batch("1; 7").is_err());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(MigrationId::generate(), MigrationId::generate());
    }
}

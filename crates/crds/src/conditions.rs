//! Status conditions
//!
//! Cluster API style conditions (`type`, `status`, `severity`, `reason`, `message`) used on
//! claims, pools and instances, together with the reason vocabulary the controllers report.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reporting overall readiness
pub const READY_CONDITION: &str = "Ready";

/// Credentials provided to Infoblox were missing, incomplete or rejected
pub const AUTHENTICATION_FAILED_REASON: &str = "AuthenticationFailed";
/// The network view could not be found on the Infoblox instance
pub const NETWORK_VIEW_NOT_FOUND_REASON: &str = "NetworkViewNotFound";
/// The DNS view could not be found on the Infoblox instance
pub const DNS_VIEW_NOT_FOUND_REASON: &str = "DNSViewNotFound";
/// A pool subnet has no matching network on the Infoblox instance
pub const NETWORK_NOT_FOUND_REASON: &str = "NetworkNotFound";
/// No subnet of the pool could provide an address
pub const ADDRESS_ALLOCATION_FAILED_REASON: &str = "AddressAllocationFailed";
/// The pool (or the instance behind it) is not usable yet
pub const POOL_NOT_READY_REASON: &str = "PoolNotReady";
/// Positive reason for pools
pub const READY_REASON: &str = "Ready";
/// Positive reason for instances
pub const CONFIGURATION_VALID_REASON: &str = "ConfigurationValid";

/// Condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not determined yet
    #[default]
    Unknown,
}

/// Severity of a false condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    /// Requires operator attention
    Error,
    /// Degraded but progressing
    Warning,
    /// Informational only
    Info,
}

/// A single status condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. "Ready")
    #[serde(rename = "type")]
    pub type_: String,

    /// Condition status
    pub status: ConditionStatus,

    /// Severity, only set for false conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the status flipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// A true condition of the given type
    pub fn true_condition(type_: &str, reason: Option<&str>, message: Option<String>) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::True,
            severity: None,
            reason: reason.map(str::to_string),
            message,
            last_transition_time: None,
        }
    }

    /// A false condition of the given type
    pub fn false_condition(
        type_: &str,
        reason: &str,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::False,
            severity: Some(severity),
            reason: Some(reason.to_string()),
            message: Some(message.into()),
            last_transition_time: None,
        }
    }
}

/// Resources whose status carries a condition list
pub trait HasConditions {
    /// Current conditions (empty when there is no status yet)
    fn conditions(&self) -> &[Condition];

    /// Mutable condition list, creating the status if needed
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    /// Look up a condition by type
    fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }

    /// Insert or replace a condition by type
    ///
    /// `lastTransitionTime` only moves when the status changes, so setting the same
    /// condition twice leaves the status byte-identical.
    fn set_condition(&mut self, mut condition: Condition) {
        let conditions = self.conditions_mut();
        match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time
                } else {
                    Some(Utc::now())
                };
                *existing = condition;
            }
            None => {
                condition.last_transition_time = Some(Utc::now());
                conditions.push(condition);
            }
        }
    }

    /// Mark the Ready condition true
    fn mark_ready(&mut self, reason: Option<&str>, message: Option<String>) {
        self.set_condition(Condition::true_condition(READY_CONDITION, reason, message));
    }

    /// Mark the Ready condition false
    fn mark_not_ready(&mut self, reason: &str, severity: ConditionSeverity, message: impl Into<String>) {
        self.set_condition(Condition::false_condition(READY_CONDITION, reason, severity, message));
    }

    /// Whether the Ready condition is true
    fn is_ready(&self) -> bool {
        self.get_condition(READY_CONDITION)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }
}

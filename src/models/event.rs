use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::filter::{FilterId, Side};

/// Why a filter changed its active side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchReason {
    /// Active side's counter stopped growing for `failoverThreshold` polls
    Stall,
    /// Traffic reappeared on the master address while running on slave
    Failback,
    /// Requested through the control plane
    Manual,
}

/// A completed change of a filter's active side
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchEvent {
    pub filter_id: FilterId,
    pub from: Side,
    pub to: Side,
    pub reason: SwitchReason,
    pub at: DateTime<Utc>,
}

impl SwitchEvent {
    pub fn new(filter_id: FilterId, from: Side, to: Side, reason: SwitchReason) -> Self {
        Self {
            filter_id,
            from,
            to,
            reason,
            at: Utc::now(),
        }
    }
}

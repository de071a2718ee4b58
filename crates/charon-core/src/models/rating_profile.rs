//! Rating profiles
//!
//! A profile pins the rating plan history for one
//! `(direction, tenant, category, subject)` key: a chronological list of
//! activations, each optionally carrying fallback subjects to retry when
//! the plan yields no destination match.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingPlanActivation {
    pub activation_time: DateTime<Utc>,
    pub rating_plan_id: String,
    #[serde(default)]
    pub fallback_subjects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingProfile {
    pub direction: String,
    pub tenant: String,
    pub category: String,
    pub subject: String,
    pub activations: Vec<RatingPlanActivation>,
}

impl RatingProfile {
    pub fn full_id(&self) -> String {
        super::concat_key(&[&self.direction, &self.tenant, &self.category, &self.subject])
    }

    /// Activations relevant for a call window: the last one starting at or
    /// before the window start, plus every one that starts inside it
    pub fn active_for_window(
        &self,
        time_start: DateTime<Utc>,
        time_end: DateTime<Utc>,
    ) -> Vec<&RatingPlanActivation> {
        let mut sorted: Vec<&RatingPlanActivation> = self.activations.iter().collect();
        sorted.sort_by_key(|a| a.activation_time);

        let mut first = 0;
        let mut end = sorted.len();
        for (index, activation) in sorted.iter().enumerate() {
            if activation.activation_time <= time_start {
                first = index;
            }
            if activation.activation_time > time_end {
                end = index;
                break;
            }
        }
        sorted[first..end].to_vec()
    }
}

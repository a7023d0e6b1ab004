use serde::Serialize;

/// Classification of one referral event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferralOutcome {
    /// Malformed code, self-referral or unknown referrer. Nothing changed.
    Invalid,
    /// The referee is already credited to this referrer. Nothing changed.
    AlreadyCredited,
    /// Credited below the threshold.
    ProgressUpdate { referrals: usize, points: u64 },
    /// Credited and the referrer just reached the threshold.
    ThresholdReached { points: u64 },
    /// Credited after the threshold was already reached. No notification.
    SilentIncrement,
}

impl ReferralOutcome {
    /// Only progress and the crossing reach the referrer.
    pub fn notifies(&self) -> bool {
        matches!(
            self,
            ReferralOutcome::ProgressUpdate { .. } | ReferralOutcome::ThresholdReached { .. }
        )
    }
}

/// A persisted referral credit, handed to the notifier after the save.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateChange {
    pub referrer_id: String,
    pub referee_id: String,
    pub display_name: Option<String>,
    pub handle: Option<String>,
    pub referral_count: usize,
    pub outcome: ReferralOutcome,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Progress {
        chat_id: String,
        award: u64,
        referrals: usize,
        required: usize,
        points: u64,
    },
    Completed {
        chat_id: String,
        required: usize,
        invite_link: String,
    },
    AdminCompleted {
        admin_id: String,
        user_id: String,
        display_name: Option<String>,
        handle: Option<String>,
        referrals: usize,
    },
}

impl Notification {
    pub fn chat_id(&self) -> &str {
        match self {
            Notification::Progress { chat_id, .. } => chat_id,
            Notification::Completed { chat_id, .. } => chat_id,
            Notification::AdminCompleted { admin_id, .. } => admin_id,
        }
    }
}

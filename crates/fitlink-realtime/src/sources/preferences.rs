//! Workout preference updates for one training session

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{ChangeBinding, ChangeKind, ChannelSpec, RowChange};
use crate::state::ChannelStatus;
use crate::subscription::EventSource;
use crate::Result;

const TABLE: &str = "workout_preferences";

/// Preference columns as stored on the row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub intensity: Option<String>,
    pub muscle_targets: Option<Vec<String>>,
    pub muscle_lessens: Option<Vec<String>>,
    pub include_exercises: Option<Vec<String>>,
    pub avoid_exercises: Option<Vec<String>>,
    pub avoid_joints: Option<Vec<String>>,
    pub session_goal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceUpdate {
    pub user_id: String,
    pub preferences: Preferences,
    pub updated_at: DateTime<Utc>,
}

pub struct PreferenceSource {
    session_id: String,
}

impl PreferenceSource {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl EventSource for PreferenceSource {
    type Event = PreferenceUpdate;

    fn channel_spec(&self) -> ChannelSpec {
        ChannelSpec::new(format!("preferences-{}", self.session_id)).with_binding(
            ChangeBinding::table(TABLE).with_filter("training_session_id", self.session_id.as_str()),
        )
    }

    fn accepts(&self, change: &RowChange) -> bool {
        matches!(change.kind, ChangeKind::Insert | ChangeKind::Update)
            && change.str_field("user_id").is_some_and(|id| !id.is_empty())
    }

    async fn translate(&self, change: &RowChange) -> Result<Option<PreferenceUpdate>> {
        let Some(user_id) = change.str_field("user_id") else {
            return Ok(None);
        };

        Ok(Some(PreferenceUpdate {
            user_id: user_id.to_string(),
            preferences: change.decode()?,
            updated_at: change.timestamp_field("updated_at").unwrap_or_else(Utc::now),
        }))
    }

    fn describe_error(&self, status: ChannelStatus) -> String {
        match status {
            ChannelStatus::TimedOut => "Connection timed out - This may be due to network issues or firewall blocking WebSocket connections".to_string(),
            _ => "Failed to connect to preference updates".to_string(),
        }
    }
}

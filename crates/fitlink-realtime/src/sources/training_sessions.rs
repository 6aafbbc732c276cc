//! Training-session notifications for one tenant

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RealtimeError;
use crate::event::{ChangeBinding, ChangeKind, ChannelSpec, RowChange};
use crate::state::ChannelStatus;
use crate::subscription::EventSource;
use crate::Result;

const TABLE: &str = "training_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    InProgress,
    Completed,
    Cancelled,
    Draft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingSession {
    pub id: String,
    #[serde(rename = "business_id")]
    pub tenant_id: String,
    pub template_type: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub trainer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSessionEvent {
    pub kind: ChangeKind,
    pub session: TrainingSession,
}

pub struct TrainingSessionSource {
    tenant_id: String,
}

impl TrainingSessionSource {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
        }
    }
}

#[async_trait]
impl EventSource for TrainingSessionSource {
    type Event = TrainingSessionEvent;

    fn channel_spec(&self) -> ChannelSpec {
        ChannelSpec::new(format!("training-sessions-{}", self.tenant_id)).with_binding(
            ChangeBinding::table(TABLE).with_filter("business_id", self.tenant_id.as_str()),
        )
    }

    fn accepts(&self, change: &RowChange) -> bool {
        match change.str_field("business_id") {
            Some(tenant) if tenant == self.tenant_id => true,
            other => {
                tracing::warn!(
                    expected = %self.tenant_id,
                    received = ?other,
                    "Dropping training session change for another tenant"
                );
                false
            }
        }
    }

    async fn translate(&self, change: &RowChange) -> Result<Option<TrainingSessionEvent>> {
        let session: TrainingSession = change.decode().map_err(|e| {
            RealtimeError::Decode(format!("Failed to process training session update: {}", e))
        })?;

        Ok(Some(TrainingSessionEvent {
            kind: change.kind,
            session,
        }))
    }

    fn describe_error(&self, status: ChannelStatus) -> String {
        match status {
            ChannelStatus::TimedOut => "Connection timed out".to_string(),
            _ => "Failed to connect to training sessions updates".to_string(),
        }
    }
}

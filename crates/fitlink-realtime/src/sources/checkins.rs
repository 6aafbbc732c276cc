//! Client check-ins for one training session

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::event::{ChangeBinding, ChangeKind, ChannelSpec, RowChange};
use crate::subscription::EventSource;
use crate::Result;

const TABLE: &str = "user_training_session";
const CHECKED_IN: &str = "checked_in";
const UNKNOWN_NAME: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub user_id: String,
    pub name: String,
    pub checked_in_at: DateTime<Utc>,
}

/// Looks up a display name for a user id.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn display_name(&self, user_id: &str) -> Result<Option<String>>;
}

pub struct CheckInSource {
    session_id: String,
    names: Option<Arc<dyn NameResolver>>,
}

impl CheckInSource {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            names: None,
        }
    }

    pub fn with_resolver(mut self, names: Arc<dyn NameResolver>) -> Self {
        self.names = Some(names);
        self
    }

    async fn resolve_name(&self, user_id: &str) -> String {
        let Some(names) = &self.names else {
            return UNKNOWN_NAME.to_string();
        };

        match names.display_name(user_id).await {
            Ok(Some(name)) if !name.trim().is_empty() => name,
            Ok(_) => UNKNOWN_NAME.to_string(),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to resolve check-in name");
                UNKNOWN_NAME.to_string()
            }
        }
    }
}

#[async_trait]
impl EventSource for CheckInSource {
    type Event = CheckIn;

    fn channel_spec(&self) -> ChannelSpec {
        ChannelSpec::new(format!("tv-session-{}", self.session_id)).with_binding(
            ChangeBinding::table(TABLE).with_filter("training_session_id", self.session_id.as_str()),
        )
    }

    fn accepts(&self, change: &RowChange) -> bool {
        matches!(change.kind, ChangeKind::Insert | ChangeKind::Update)
            && change.str_field("status") == Some(CHECKED_IN)
            && change.str_field("user_id").is_some_and(|id| !id.is_empty())
    }

    async fn translate(&self, change: &RowChange) -> Result<Option<CheckIn>> {
        let Some(user_id) = change.str_field("user_id") else {
            return Ok(None);
        };

        Ok(Some(CheckIn {
            user_id: user_id.to_string(),
            name: self.resolve_name(user_id).await,
            checked_in_at: change
                .timestamp_field("checked_in_at")
                .unwrap_or_else(Utc::now),
        }))
    }
}

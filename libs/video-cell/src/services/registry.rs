use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::VideoSessionError;
use crate::services::api::VideoApiClient;

/// Client-held set of currently valid meeting identifiers, sourced from
/// the backend. Gates navigation into a room so stale or forged links are
/// rejected before any join happens.
pub struct MeetingRegistry {
    api: Arc<VideoApiClient>,
    meetings: RwLock<HashMap<String, Uuid>>,
}

impl MeetingRegistry {
    pub fn new(api: Arc<VideoApiClient>) -> Self {
        Self {
            api,
            meetings: RwLock::new(HashMap::new()),
        }
    }

    pub async fn refresh(&self, auth_token: &str) -> Result<(), VideoSessionError> {
        let descriptors = self.api.list_meetings(auth_token).await?;
        let mut meetings = self.meetings.write().await;
        meetings.clear();
        for descriptor in descriptors {
            meetings.insert(descriptor.meeting_id, descriptor.appointment_id);
        }
        debug!("Meeting registry refreshed: {} entries", meetings.len());
        Ok(())
    }

    /// Looks up the appointment behind a meeting id. On a miss the registry
    /// is refreshed once and rechecked; a second miss (or a refresh
    /// failure) degrades to "unknown" rather than erroring.
    pub async fn resolve(&self, meeting_id: &str, auth_token: &str) -> Option<Uuid> {
        if let Some(appointment_id) = self.meetings.read().await.get(meeting_id) {
            return Some(*appointment_id);
        }

        if let Err(e) = self.refresh(auth_token).await {
            warn!("Meeting registry refresh failed: {}", e);
            return None;
        }

        self.meetings.read().await.get(meeting_id).copied()
    }

    pub async fn contains(&self, meeting_id: &str) -> bool {
        self.meetings.read().await.contains_key(meeting_id)
    }

    pub async fn len(&self) -> usize {
        self.meetings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.meetings.read().await.is_empty()
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_models::User;
use shared_utils::Clock;

use crate::error::VideoSessionError;
use crate::models::{CallDetails, CallEvent, JoinOutcome, VideoConfig};
use crate::services::api::VideoApiClient;
use crate::services::eligibility::EligibilityPolicy;
use crate::services::registry::MeetingRegistry;

/// Mediates start/join/end bookkeeping with the backend. The backend owns
/// every business rule; this service only orders the calls and converts
/// failures into values the UI can act on.
pub struct CallLifecycleService {
    api: Arc<VideoApiClient>,
    registry: Arc<MeetingRegistry>,
    eligibility: Arc<dyn EligibilityPolicy>,
    clock: Arc<dyn Clock>,
    config: VideoConfig,
    events: broadcast::Sender<CallEvent>,
    watching: Arc<AtomicBool>,
}

impl CallLifecycleService {
    pub fn new(
        api: Arc<VideoApiClient>,
        registry: Arc<MeetingRegistry>,
        eligibility: Arc<dyn EligibilityPolicy>,
        clock: Arc<dyn Clock>,
        config: VideoConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            api,
            registry,
            eligibility,
            clock,
            config,
            events,
            watching: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Host-only: records the call as started, but only when the backend's
    /// record shows no prior join timestamp, then re-fetches for the
    /// authoritative flags. Marking failures are reported, not fatal.
    pub async fn start_call(
        &self,
        appointment_id: Uuid,
        meeting_id: &str,
        user: &User,
        auth_token: &str,
    ) -> Result<CallDetails, VideoSessionError> {
        if !user.is_host() {
            return Err(VideoSessionError::Unauthorized);
        }

        let details = self.api.get_call_details(meeting_id, auth_token).await?;
        Self::validate_metadata(&details)?;

        if details.video_call_info.joined_at.is_none() {
            info!("Marking call started for appointment {}", appointment_id);
            if let Err(e) = self.api.mark_joined(appointment_id, auth_token).await {
                warn!("Failed to mark call started: {}", e);
            }
        } else {
            debug!("Call already has a join timestamp, not re-marking");
        }

        let refreshed = self.api.get_call_details(meeting_id, auth_token).await?;
        Self::validate_metadata(&refreshed)?;
        Ok(refreshed)
    }

    /// Gate for navigating into a room: registry validity first, then the
    /// eligibility policy. Hosts additionally invoke the backend join
    /// marking best-effort. Missing/invalid call metadata is a hard stop;
    /// everything else degrades to a non-error outcome.
    pub async fn join_call(
        &self,
        meeting_id: &str,
        scheduled_start: DateTime<Utc>,
        user: &User,
        early_join: bool,
        auth_token: &str,
    ) -> Result<JoinOutcome, VideoSessionError> {
        let appointment_id = match self.registry.resolve(meeting_id, auth_token).await {
            Some(id) => id,
            None => {
                info!("Rejecting join for unknown meeting {}", meeting_id);
                return Ok(JoinOutcome::UnknownMeeting);
            }
        };

        let now = self.clock.now();
        if !self
            .eligibility
            .is_joinable(scheduled_start, user.role, early_join, now)
        {
            if early_join && !user.role.is_host() {
                return Ok(JoinOutcome::NotPermitted);
            }
            let wait =
                self.eligibility
                    .time_until_joinable(scheduled_start, user.role, early_join, now);
            return Ok(JoinOutcome::NotYetJoinable(wait));
        }

        if user.is_host() {
            if let Err(e) = self.api.mark_joined(appointment_id, auth_token).await {
                warn!("Join marking failed (continuing): {}", e);
            }
        }

        let details = self.api.get_call_details(meeting_id, auth_token).await?;
        Self::validate_metadata(&details)?;
        Ok(JoinOutcome::Approved(details))
    }

    /// Host-only: ends the call and, on success, refreshes the registry so
    /// the meeting stops validating.
    pub async fn end_call(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<(), VideoSessionError> {
        if !user.is_host() {
            return Err(VideoSessionError::Unauthorized);
        }

        self.api.mark_ended(appointment_id, auth_token).await?;
        info!("Call ended for appointment {}", appointment_id);

        if let Err(e) = self.registry.refresh(auth_token).await {
            warn!("Registry refresh after end failed: {}", e);
        }
        Ok(())
    }

    /// Polls call state at a short fixed interval until the backend
    /// reports the call ended, then emits the event non-host participants
    /// use to redirect away. Ends on `stop_watching`.
    pub fn watch_until_ended(&self, meeting_id: String, auth_token: String) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                service.clock.sleep(service.config.poll_interval).await;
                if !service.watching.load(Ordering::SeqCst) {
                    break;
                }

                match service.api.get_call_details(&meeting_id, &auth_token).await {
                    Ok(details) if details.video_call_info.ended_at.is_some() => {
                        info!("Call {} reported ended by backend", meeting_id);
                        let _ = service.events.send(CallEvent::Ended {
                            meeting_id: meeting_id.clone(),
                        });
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Call status poll failed: {}", e),
                }
            }
        })
    }

    pub fn stop_watching(&self) {
        self.watching.store(false, Ordering::SeqCst);
    }

    fn validate_metadata(details: &CallDetails) -> Result<(), VideoSessionError> {
        if details.video_call_info.meeting_id.is_empty()
            || details.video_call_info.meeting_url.is_empty()
        {
            return Err(VideoSessionError::InvalidCallMetadata(
                "meeting id or url missing from call record".to_string(),
            ));
        }
        Ok(())
    }
}

impl Clone for CallLifecycleService {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            registry: Arc::clone(&self.registry),
            eligibility: Arc::clone(&self.eligibility),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            events: self.events.clone(),
            watching: Arc::clone(&self.watching),
        }
    }
}

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, Response,
};
use serde::de::DeserializeOwned;
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::ClientConfig;

use crate::error::VideoSessionError;
use crate::models::{CallDetails, MeetingDescriptor, VideoConfig};

/// REST client for the appointment/video backend. Payload shapes are
/// dictated by the backend, not designed here.
pub struct VideoApiClient {
    client: Client,
    base_url: String,
}

impl VideoApiClient {
    pub fn new(config: &ClientConfig, video_config: &VideoConfig) -> Result<Self, VideoSessionError> {
        let client = Client::builder()
            .timeout(video_config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn headers(&self, auth_token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", auth_token)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        auth_token: &str,
    ) -> Result<Response, VideoSessionError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making request to {}", url);

        let response = self
            .client
            .request(method, &url)
            .headers(self.headers(auth_token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!("API error ({}): {}", status, message);
            return Err(VideoSessionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn request_json<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: &str,
    ) -> Result<T, VideoSessionError>
    where
        T: DeserializeOwned,
    {
        let response = self.request(method, path, auth_token).await?;
        Ok(response.json::<T>().await?)
    }

    /// `GET video-calls/meetings` — the caller's currently-active meetings.
    pub async fn list_meetings(
        &self,
        auth_token: &str,
    ) -> Result<Vec<MeetingDescriptor>, VideoSessionError> {
        self.request_json(Method::GET, "/video-calls/meetings", auth_token)
            .await
    }

    /// `GET video-calls/meetings/:meetingId` — authoritative call metadata.
    pub async fn get_call_details(
        &self,
        meeting_id: &str,
        auth_token: &str,
    ) -> Result<CallDetails, VideoSessionError> {
        let path = format!("/video-calls/meetings/{}", meeting_id);
        self.request_json(Method::GET, &path, auth_token).await
    }

    /// `POST video-calls/join/:appointmentId` — records the join timestamp.
    pub async fn mark_joined(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), VideoSessionError> {
        let path = format!("/video-calls/join/{}", appointment_id);
        self.request(Method::POST, &path, auth_token).await?;
        Ok(())
    }

    /// `POST video-calls/end/:appointmentId` — marks the call ended.
    pub async fn mark_ended(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), VideoSessionError> {
        let path = format!("/video-calls/end/{}", appointment_id);
        self.request(Method::POST, &path, auth_token).await?;
        Ok(())
    }
}

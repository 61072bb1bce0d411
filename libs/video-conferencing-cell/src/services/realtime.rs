use reqwest::Client;
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::models::{
    IceServer, NewRealtimeSessionRequest, NewRealtimeSessionResponse, SessionDescription, VideoError,
};

/// Client for the managed realtime (SFU) API. Each participant join opens one
/// realtime session from the browser's SDP offer.
#[cfg_attr(test, derive(Debug))]
pub struct RealtimeClient {
    client: Client,
    app_id: String,
    api_token: String,
    base_url: String,
}

impl RealtimeClient {
    pub fn new(config: &AppConfig) -> Result<Self, VideoError> {
        if !config.is_video_configured() {
            return Err(VideoError::NotConfigured);
        }

        Ok(Self {
            client: Client::new(),
            app_id: config.realtime_app_id.clone(),
            api_token: config.realtime_api_token.clone(),
            base_url: config.realtime_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// POST /apps/{app_id}/sessions/new
    pub async fn create_session(&self, offer_sdp: &str) -> Result<NewRealtimeSessionResponse, VideoError> {
        let url = format!("{}/apps/{}/sessions/new", self.base_url, self.app_id);
        let body = NewRealtimeSessionRequest {
            session_description: SessionDescription {
                sdp_type: "offer".to_string(),
                sdp: offer_sdp.to_string(),
            },
        };

        debug!("Creating realtime session at {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| VideoError::RealtimeApiError(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| VideoError::RealtimeApiError(e.to_string()))?;

        if !status.is_success() {
            error!("Realtime session creation failed: {} - {}", status, text);
            return Err(VideoError::RealtimeApiError(format!("HTTP {}: {}", status, text)));
        }

        let session: NewRealtimeSessionResponse = serde_json::from_str(&text)
            .map_err(|e| VideoError::RealtimeApiError(format!("Failed to parse session response: {}", e)))?;
        check_session_errors(&session)?;

        info!("Realtime session {} created", session.session_id);
        Ok(session)
    }

    pub fn ice_servers(&self) -> Vec<IceServer> {
        vec![IceServer {
            urls: vec!["stun:stun.cloudflare.com:3478".to_string()],
            username: None,
            credential: None,
        }]
    }
}

/// The API reports some failures in a 200 body.
fn check_session_errors(response: &NewRealtimeSessionResponse) -> Result<(), VideoError> {
    if let Some(code) = &response.error_code {
        let message = response.error_description.as_deref().unwrap_or("Unknown error");
        error!("Realtime session error: {} - {}", code, message);
        return Err(VideoError::RealtimeApiError(format!("{}: {}", code, message)));
    }
    if response.session_description.is_none() {
        return Err(VideoError::RealtimeApiError("Response carried no answer SDP".to_string()));
    }
    Ok(())
}

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use appointment_cell::services::AppointmentBookingService;
use appointment_cell::{Appointment, AppointmentError, AppointmentStatus, SchedulingState};
use shared_database::supabase::{is_conflict, SupabaseClient};
use shared_models::auth::{Role, User};
use shared_utils::timezone::format_jst;

use crate::models::{
    JoinVideoResponse, JoinWindow, JoinWindowView, VideoError, VideoParticipant, VideoSession,
    VideoSessionStatus, VideoStatusView,
};
use crate::services::realtime::RealtimeClient;

const SESSIONS: &str = "/rest/v1/video_sessions";
const PARTICIPANTS: &str = "/rest/v1/video_participants";

pub struct VideoSessionService {
    supabase: SupabaseClient,
    appointments: AppointmentBookingService,
    realtime: Result<RealtimeClient, VideoError>,
}

impl VideoSessionService {
    pub fn new(state: &SchedulingState) -> Self {
        Self {
            supabase: SupabaseClient::new(&state.config),
            appointments: AppointmentBookingService::new(state),
            realtime: RealtimeClient::new(&state.config),
        }
    }

    pub async fn status(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<VideoStatusView, VideoError> {
        let appointment = self.appointments.get_appointment(appointment_id, auth_token).await?;
        if participant_role(&appointment, user).is_none() && !user.is_worker() {
            return Err(VideoError::NotParticipant);
        }

        let session = self.find_session(appointment_id, auth_token).await?;
        let now = Utc::now();
        let window = JoinWindow::for_appointment(&appointment);
        let joinable = joinable_status(appointment.status)
            && window.contains(now)
            && session.as_ref().map_or(true, |s| s.status != VideoSessionStatus::Ended);

        Ok(VideoStatusView {
            appointment_id,
            appointment_status: appointment.status,
            session,
            window: JoinWindowView::at(window, now),
            joinable,
        })
    }

    /// Admits a participant: opens a realtime session from their offer and
    /// records the join. The doctor's first join starts the consultation.
    #[instrument(skip(self, user, offer_sdp, auth_token), fields(user_id = %user.id))]
    pub async fn join(
        &self,
        appointment_id: Uuid,
        user: &User,
        offer_sdp: &str,
        auth_token: &str,
    ) -> Result<JoinVideoResponse, VideoError> {
        if offer_sdp.trim().is_empty() {
            return Err(VideoError::ValidationError("offer_sdp must not be empty".to_string()));
        }

        let appointment = self.appointments.get_appointment(appointment_id, auth_token).await?;
        let role = participant_role(&appointment, user).ok_or(VideoError::NotParticipant)?;
        if !joinable_status(appointment.status) {
            return Err(VideoError::AppointmentNotJoinable(appointment.status));
        }
        let window = JoinWindow::for_appointment(&appointment);
        if !window.contains(Utc::now()) {
            return Err(VideoError::OutsideJoinWindow {
                opens_at: format_jst(window.opens_at),
                closes_at: format_jst(window.closes_at),
            });
        }
        let realtime = self.realtime.as_ref().map_err(|_| VideoError::NotConfigured)?;

        let mut session = self.get_or_create_session(appointment_id, auth_token).await?;
        if session.status == VideoSessionStatus::Ended {
            return Err(VideoError::SessionEnded);
        }

        let realtime_session = realtime.create_session(offer_sdp).await?;
        let answer_sdp = realtime_session
            .session_description
            .map(|d| d.sdp)
            .ok_or_else(|| VideoError::RealtimeApiError("Response carried no answer SDP".to_string()))?;

        let participant = VideoParticipant {
            session_id: session.id,
            user_id: Uuid::parse_str(&user.id).map_err(|_| VideoError::NotParticipant)?,
            role,
            realtime_session_id: realtime_session.session_id,
            joined_at: Utc::now(),
        };
        let row = serde_json::to_value(&participant)
            .map_err(|e| VideoError::DatabaseError(e.to_string()))?;
        self.supabase.write_returning(Method::POST, PARTICIPANTS, auth_token, row).await
            .map_err(|e| VideoError::DatabaseError(e.to_string()))?;

        if role == Role::Doctor {
            self.start_consultation(&appointment, auth_token).await?;
            if session.status == VideoSessionStatus::Scheduled {
                session = self.activate(&session, auth_token).await?;
            }
        }

        info!("{} joined video session {} for appointment {}", role, session.id, appointment_id);
        Ok(JoinVideoResponse {
            session,
            participant,
            answer_sdp,
            ice_servers: realtime.ice_servers(),
        })
    }

    /// Closes the room. Only the appointment's doctor may end it.
    #[instrument(skip(self, user, auth_token))]
    pub async fn end(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<VideoSession, VideoError> {
        let appointment = self.appointments.get_appointment(appointment_id, auth_token).await?;
        if participant_role(&appointment, user) != Some(Role::Doctor) {
            return Err(VideoError::NotParticipant);
        }

        let session = self.find_session(appointment_id, auth_token).await?
            .ok_or(VideoError::SessionNotFound)?;
        if session.status == VideoSessionStatus::Ended {
            return Err(VideoError::SessionEnded);
        }

        let path = format!("{}?id=eq.{}&status=in.(scheduled,active)", SESSIONS, session.id);
        let rows = self.supabase.write_returning(
            Method::PATCH,
            &path,
            auth_token,
            json!({ "status": VideoSessionStatus::Ended, "ended_at": Utc::now().to_rfc3339() }),
        ).await
        .map_err(|e| VideoError::DatabaseError(e.to_string()))?;

        let ended = first(rows)?.ok_or(VideoError::SessionEnded)?;
        info!("Video session {} ended", session.id);
        Ok(ended)
    }

    async fn start_consultation(&self, appointment: &Appointment, auth_token: &str) -> Result<(), VideoError> {
        if appointment.status != AppointmentStatus::Confirmed {
            return Ok(());
        }
        match self.appointments
            .update_status(appointment.id, AppointmentStatus::InProgress, None, auth_token)
            .await
        {
            Ok(_) => Ok(()),
            // A second tab of the same doctor got there first.
            Err(AppointmentError::ConcurrentUpdate) => {
                warn!("Appointment {} was started concurrently", appointment.id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn activate(&self, session: &VideoSession, auth_token: &str) -> Result<VideoSession, VideoError> {
        let path = format!("{}?id=eq.{}&status=eq.scheduled", SESSIONS, session.id);
        let rows = self.supabase.write_returning(
            Method::PATCH,
            &path,
            auth_token,
            json!({ "status": VideoSessionStatus::Active, "started_at": Utc::now().to_rfc3339() }),
        ).await
        .map_err(|e| VideoError::DatabaseError(e.to_string()))?;

        match first(rows)? {
            Some(active) => Ok(active),
            None => self.find_session(session.appointment_id, auth_token).await?
                .ok_or(VideoError::SessionNotFound),
        }
    }

    async fn get_or_create_session(&self, appointment_id: Uuid, auth_token: &str) -> Result<VideoSession, VideoError> {
        if let Some(existing) = self.find_session(appointment_id, auth_token).await? {
            return Ok(existing);
        }

        let row = json!({
            "id": Uuid::new_v4(),
            "appointment_id": appointment_id,
            "room_name": VideoSession::room_name_for(appointment_id),
            "status": VideoSessionStatus::Scheduled,
            "started_at": null,
            "ended_at": null,
            "created_at": Utc::now().to_rfc3339()
        });

        match self.supabase.write_returning(Method::POST, SESSIONS, auth_token, row).await {
            Ok(rows) => first(rows)?
                .ok_or_else(|| VideoError::DatabaseError("Insert returned no row".to_string())),
            // The other participant created it first.
            Err(e) if is_conflict(&e) => self
                .find_session(appointment_id, auth_token).await?
                .ok_or_else(|| VideoError::DatabaseError(e.to_string())),
            Err(e) => Err(VideoError::DatabaseError(e.to_string())),
        }
    }

    async fn find_session(&self, appointment_id: Uuid, auth_token: &str) -> Result<Option<VideoSession>, VideoError> {
        let path = format!("{}?appointment_id=eq.{}", SESSIONS, appointment_id);
        let row = self.supabase.select_one(&path, auth_token).await
            .map_err(|e| VideoError::DatabaseError(e.to_string()))?;
        row.map(parse).transpose()
    }
}

fn participant_role(appointment: &Appointment, user: &User) -> Option<Role> {
    if user.is_self(appointment.patient_id) {
        Some(Role::Patient)
    } else if user.is_self(appointment.doctor_id) {
        Some(Role::Doctor)
    } else {
        None
    }
}

fn joinable_status(status: AppointmentStatus) -> bool {
    matches!(status, AppointmentStatus::Confirmed | AppointmentStatus::InProgress)
}

fn first(rows: Vec<Value>) -> Result<Option<VideoSession>, VideoError> {
    rows.into_iter().next().map(parse).transpose()
}

fn parse(row: Value) -> Result<VideoSession, VideoError> {
    serde_json::from_value(row).map_err(|e| VideoError::DatabaseError(e.to_string()))
}

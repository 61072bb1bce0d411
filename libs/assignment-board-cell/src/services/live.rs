use axum::extract::ws::{Message, WebSocket};
use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use appointment_cell::services::events::{ScheduleEvent, ScheduleEventReceiver};

/// What to do with one result from the event channel.
#[derive(Debug, PartialEq)]
pub enum Frame {
    Send(String),
    Skip,
    Close,
}

/// Events for other days are skipped. A lagged receiver has lost events and
/// tells the client to refetch the board instead.
pub fn frame_for(received: Result<ScheduleEvent, RecvError>, date: NaiveDate) -> Frame {
    match received {
        Ok(event) if event.affects(date) => match serde_json::to_string(&event) {
            Ok(text) => Frame::Send(text),
            Err(e) => {
                warn!("Failed to serialize board event: {}", e);
                Frame::Skip
            }
        },
        Ok(_) => Frame::Skip,
        Err(RecvError::Lagged(missed)) => {
            warn!("Board feed for {} lagged by {} events", date, missed);
            Frame::Send(json!({ "type": "resync", "missed": missed }).to_string())
        }
        Err(RecvError::Closed) => Frame::Close,
    }
}

/// Forward schedule events for `date` until the client goes away.
pub async fn stream_board(socket: WebSocket, mut events: ScheduleEventReceiver, date: NaiveDate) {
    let (mut sender, mut incoming) = socket.split();
    info!("Live board opened for {}", date);

    loop {
        tokio::select! {
            received = events.recv() => {
                match frame_for(received, date) {
                    Frame::Send(text) => {
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Frame::Skip => {}
                    Frame::Close => break,
                }
            }
            message = incoming.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Live board socket error: {}", e);
                        break;
                    }
                    // Clients only listen; pings are answered by the runtime.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = sender.close().await;
    info!("Live board closed for {}", date);
}

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::{AppointmentStatus, DoctorSlot, SlotView};

pub type ScheduleEventSender = broadcast::Sender<ScheduleEvent>;
pub type ScheduleEventReceiver = broadcast::Receiver<ScheduleEvent>;

/// A change to the schedule, tagged with the JST day it touches.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleEvent {
    SlotsGenerated {
        date: NaiveDate,
        doctor_id: Uuid,
        count: usize,
    },
    SlotChanged {
        date: NaiveDate,
        slot: SlotView,
    },
    AppointmentChanged {
        date: NaiveDate,
        appointment_id: Uuid,
        slot_id: Option<Uuid>,
        status: AppointmentStatus,
    },
    /// The waiting queue is shown on every day's board, so entries without a
    /// preferred date concern all of them.
    WaitingListChanged {
        date: Option<NaiveDate>,
        entry_id: Uuid,
        status: String,
    },
}

impl ScheduleEvent {
    pub fn slot_changed(slot: &DoctorSlot) -> Self {
        ScheduleEvent::SlotChanged {
            date: slot.jst_date(),
            slot: SlotView::from(slot),
        }
    }

    pub fn affects(&self, day: NaiveDate) -> bool {
        match self {
            ScheduleEvent::SlotsGenerated { date, .. }
            | ScheduleEvent::SlotChanged { date, .. }
            | ScheduleEvent::AppointmentChanged { date, .. } => *date == day,
            ScheduleEvent::WaitingListChanged { date, .. } => date.map_or(true, |d| d == day),
        }
    }
}

#[derive(Clone)]
pub struct ScheduleEventHub {
    sender: ScheduleEventSender,
}

impl ScheduleEventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: ScheduleEvent) {
        // No subscribers is the normal state outside board sessions.
        if let Err(e) = self.sender.send(event) {
            debug!("No live board subscribers for {:?}", e.0);
        }
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = ScheduleEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self) -> ScheduleEventReceiver {
        self.sender.subscribe()
    }
}

impl Default for ScheduleEventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

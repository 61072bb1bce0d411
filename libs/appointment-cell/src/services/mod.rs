pub mod booking;
pub mod claim;
pub mod conflict;
pub mod events;
pub mod lifecycle;
pub mod locking;
pub mod repository;
pub mod slots;

pub use booking::AppointmentBookingService;
pub use claim::SlotClaimService;
pub use events::{ScheduleEvent, ScheduleEventHub};
pub use locking::{InMemorySlotLocker, RedisSlotLocker, SlotLease, SlotLockManager, SlotLocker};
pub use repository::AppointmentRepository;
pub use slots::SlotService;

pub mod realtime;
pub mod session;

pub use realtime::RealtimeClient;
pub use session::VideoSessionService;

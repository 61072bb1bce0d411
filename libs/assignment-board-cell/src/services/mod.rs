pub mod board;
pub mod live;
pub mod waiting;

pub use board::AssignmentBoardService;
pub use waiting::WaitingListService;

pub mod worker;

pub use worker::WorkerService;

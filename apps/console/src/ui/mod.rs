pub mod analysis;
pub mod history;
pub mod monitor;
pub mod notifications;
pub mod orchestration;
pub mod shell;

pub mod attendance;
pub mod audit;
pub mod billing;
pub mod centers;
pub mod email;
pub mod encryption;
pub mod fee_reminder_scheduler;
pub mod fees;
pub mod grading;
pub mod import;
pub mod library;
pub mod metrics;
pub mod reports;
pub mod sms;
pub mod students;
pub mod subjects;
pub mod transport;

pub mod attendance;
pub mod auth;
pub mod billing;
pub mod center;
pub mod fee;
pub mod grading;
pub mod library;
pub mod report;
pub mod sms;
pub mod student;
pub mod subject;
pub mod transport;

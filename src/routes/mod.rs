pub mod attendance;
pub mod audit_log;
pub mod billing;
pub mod centers;
pub mod fees;
pub mod grading;
pub mod health;
pub mod library;
pub mod me;
pub mod metrics;
pub mod reports;
pub mod settings;
pub mod sms;
pub mod students;
pub mod subjects;
pub mod transport;

use crate::{
    error::{forbidden, ApiError},
    models::auth::AuthenticatedUser,
};

/// Center admins and super-admins only.
pub(crate) fn require_admin(user: &AuthenticatedUser) -> Result<(), ApiError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(forbidden())
    }
}

//! API handlers

mod health;
mod loan;
mod mpesa;
mod notification;

pub use health::health_check;
pub use loan::*;
pub use mpesa::mpesa_callback;
pub use notification::list_notifications;

pub use crate::middleware::auth::{AuthenticatedUser, OptionalUser};

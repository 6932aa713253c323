//! # beacon-core
//!
//! Foundation types shared by every beacon crate:
//!
//! - **Tokens**: [`Token`], the validated alphanumeric subscriber key
//! - **Notifications**: [`Notification`] (the subscriber-facing frame) and
//!   [`NotificationEvent`] (notification + addressed token)
//! - **Wire envelope**: [`Envelope`], the cross-instance bus payload
//! - **Errors**: [`TokenError`], [`EnvelopeError`] via `thiserror`
//! - **Logging**: [`logging::init_subscriber`] for binaries and tests

#![deny(unsafe_code)]

pub mod errors;
pub mod event;
pub mod logging;
pub mod token;

pub use errors::{EnvelopeError, TokenError};
pub use event::{Envelope, Notification, NotificationEvent, Target, UNKNOWN_CLIENT};
pub use logging::{LogFormat, init_subscriber};
pub use token::Token;

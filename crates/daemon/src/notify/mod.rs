//! Notification module.
//!
//! This module turns service events into alerts (passive notifications) and
//! dialogs on the status view.

pub mod alert;
pub mod presenter;
pub mod sink;

pub use alert::{Alert, AlertAction, AlertId, LightPattern, Persistence, Sound};
pub use presenter::{ErrorSurface, NotificationPresenter, APP_NAME};
pub use sink::{AlertRecord, AlertSink, MemoryAlertSink, TracingAlertSink};

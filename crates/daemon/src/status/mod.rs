//! Status fanout module.
//!
//! This module provides the observer table that keeps views up to date and
//! the external state broadcast.

pub mod fanout;
pub mod observer;

pub use fanout::{FanoutError, StatusFanout};
pub use observer::{Dialog, InteractiveView, ObserverRole, StatusObserver, ViewTab};

//! Alert descriptions handed to the alert sink.

use std::fmt;

/// Identity of an alert. Posting an alert replaces any alert with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertId {
    /// Persistent "service running" alert.
    Running,
    /// Most recent client join.
    Client,
    /// Passive error alert.
    Error,
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertId::Running => write!(f, "running"),
            AlertId::Client => write!(f, "client"),
            AlertId::Error => write!(f, "error"),
        }
    }
}

/// What happens when the user activates an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    /// Open the status view.
    OpenStatus,
    /// Open the status view on the client list.
    ShowClients,
}

/// How long an alert stays up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Stays until cancelled by the daemon.
    Ongoing,
    /// Dismissed by the user or on activation.
    AutoCancel,
}

/// Sound played when the alert is posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sound {
    Silent,
    Default,
    /// Media URI.
    Custom(String),
}

/// Indicator light blink pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightPattern {
    pub argb: u32,
    pub on_ms: u32,
    pub off_ms: u32,
}

impl LightPattern {
    /// Yellow, half a second on, one second off.
    pub const CLIENT: LightPattern = LightPattern {
        argb: 0xffff_ff00,
        on_ms: 500,
        off_ms: 1000,
    };
}

/// A user-visible alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub id: AlertId,
    pub title: String,
    pub text: String,
    pub persistence: Persistence,
    pub action: AlertAction,
    pub sound: Sound,
    pub lights: Option<LightPattern>,
}

impl Alert {
    /// A silent alert without lights.
    pub fn new(
        id: AlertId,
        title: impl Into<String>,
        text: impl Into<String>,
        persistence: Persistence,
        action: AlertAction,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            text: text.into(),
            persistence,
            action,
            sound: Sound::Silent,
            lights: None,
        }
    }

    pub fn with_sound(mut self, sound: Sound) -> Self {
        self.sound = sound;
        self
    }

    pub fn with_lights(mut self, lights: Option<LightPattern>) -> Self {
        self.lights = lights;
        self
    }
}

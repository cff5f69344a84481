use serde::{Deserialize, Serialize};

/// Host-to-cube control envelope.
///
/// Only the `system` section is interpreted by the supervisor. Everything
/// else a cube exchanges is application payload and never passes through
/// this type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemAction>,
}

/// System-level requests understood by the cube's starter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemAction {
    #[serde(default)]
    pub shutdown: bool,
}

impl SimMessage {
    /// The reserved payload that asks a cube to power off.
    pub fn shutdown() -> Self {
        Self {
            system: Some(SystemAction { shutdown: true }),
        }
    }

    /// Whether this message requests shutdown.
    pub fn is_shutdown(&self) -> bool {
        self.system.as_ref().is_some_and(|system| system.shutdown)
    }
}

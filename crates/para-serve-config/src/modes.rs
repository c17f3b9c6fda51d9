//! Operating modes selected through configuration.
//!
//! Both enums parse case-insensitively so the same spelling works from the
//! command line, the environment, and configuration files.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Whether, and how, the backend is exposed through a public tunnel.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TunnelMode {
    /// Serve on localhost only.
    #[default]
    None,
    /// Randomly assigned hostname valid for the lifetime of the tunnel process.
    Ephemeral,
    /// Pre-registered named tunnel with a stable hostname.
    Persistent,
}

impl TunnelMode {
    /// Returns true when a tunnel should run alongside the backend.
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Strategy used to supervise the backend process.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SupervisionKind {
    /// Spawn the backend directly and track it through a PID file.
    #[default]
    Direct,
    /// Delegate to the host service manager (launchd or systemd user units).
    ServiceManager,
}

/// Errors encountered while parsing a mode from text.
pub type ModeParseError = strum::ParseError;

//! Context tier and operational mode.

use serde::{Deserialize, Serialize};

/// Coarse classification of the configured context size. Drives which
/// system-prompt template the prompt assembler provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Minimal,
    Basic,
    Standard,
    Premium,
    Ultra,
}

impl Tier {
    /// Derive the tier from the requested context size in tokens.
    pub fn from_requested_size(size: u32) -> Self {
        match size {
            0..=2048 => Tier::Minimal,
            2049..=4096 => Tier::Basic,
            4097..=8192 => Tier::Standard,
            8193..=32768 => Tier::Premium,
            _ => Tier::Ultra,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Minimal => "minimal",
            Tier::Basic => "basic",
            Tier::Standard => "standard",
            Tier::Premium => "premium",
            Tier::Ultra => "ultra",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational mode of the chat client. Selects which details the
/// summarizer is instructed to preserve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Assistant,
    Developer,
    Planning,
    Debugger,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Assistant => "assistant",
            Mode::Developer => "developer",
            Mode::Planning => "planning",
            Mode::Debugger => "debugger",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

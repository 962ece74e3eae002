//! Model-size classification and reliability factors.

use crate::config::ReliabilityWarnLimits;
use serde::{Deserialize, Serialize};

/// Parameter-count bucket of the summarizing model. Smaller models produce
/// less reliable summaries, so their checkpoints degrade faster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSize {
    B3,
    B7,
    B13,
    B30,
    B70Plus,
}

impl ModelSize {
    /// Classify a model id by the parameter-count marker in its name
    /// (`llama3:8b`, `qwen2.5-14b-instruct`, `mistral-7B`, …). Ids without
    /// a recognizable marker are treated as 7B, the common local default.
    pub fn classify(model_id: &str) -> Self {
        let lower = model_id.to_ascii_lowercase();
        let bytes = lower.as_bytes();

        let mut best: Option<u32> = None;
        for (i, &b) in bytes.iter().enumerate() {
            if b != b'b' {
                continue;
            }
            // Walk back over digits (and one optional decimal point).
            let mut start = i;
            let mut seen_dot = false;
            while start > 0 {
                let prev = bytes[start - 1];
                if prev.is_ascii_digit() {
                    start -= 1;
                } else if prev == b'.' && !seen_dot {
                    seen_dot = true;
                    start -= 1;
                } else {
                    break;
                }
            }
            if start == i {
                continue;
            }
            // The marker must not run into a longer word ("13billion" is
            // fine, "b" followed by more letters like "base" is not).
            if let Some(&next) = bytes.get(i + 1)
                && next.is_ascii_alphanumeric()
            {
                continue;
            }
            if let Ok(value) = lower[start..i].parse::<f64>() {
                let rounded = value.round() as u32;
                best = Some(best.map_or(rounded, |b: u32| b.max(rounded)));
            }
        }

        match best {
            Some(n) if n <= 4 => ModelSize::B3,
            Some(n) if n <= 8 => ModelSize::B7,
            Some(n) if n <= 15 => ModelSize::B13,
            Some(n) if n <= 40 => ModelSize::B30,
            Some(_) => ModelSize::B70Plus,
            None => ModelSize::B7,
        }
    }

    /// Base reliability factor applied to every checkpoint the model
    /// produces.
    pub fn reliability_factor(self) -> f64 {
        match self {
            ModelSize::B3 => 0.3,
            ModelSize::B7 => 0.5,
            ModelSize::B13 => 0.7,
            ModelSize::B30 => 0.85,
            ModelSize::B70Plus => 0.95,
        }
    }

    /// Compression limit after which summaries from this model are
    /// considered unreliable.
    pub fn warn_limit(self, limits: &ReliabilityWarnLimits) -> u32 {
        match self {
            ModelSize::B3 => limits.b3,
            ModelSize::B7 => limits.b7,
            ModelSize::B13 => limits.b13,
            ModelSize::B30 | ModelSize::B70Plus => limits.other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::B3 => "3b",
            ModelSize::B7 => "7b",
            ModelSize::B13 => "13b",
            ModelSize::B30 => "30b",
            ModelSize::B70Plus => "70b+",
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

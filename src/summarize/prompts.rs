//! Prompt assembly for the summarizer: level-selected base templates,
//! mode-specific preservation directives, and the goal block.

use crate::policy::{Goal, Mode};
use crate::storage::{CompressionLevel, Message, Role};

const LEVEL_DETAILED: &str = "Summarize the following conversation segment as a detailed \
narrative. Preserve the sequence of events, every concrete outcome, and any information a \
reader would need to continue the conversation seamlessly. Write in compact prose, no \
preamble.";

const LEVEL_MODERATE: &str = "Summarize the following conversation segment down to its key \
decisions and outcomes. Drop pleasantries and dead ends; keep what was decided, what was \
produced, and what remains open. Write in compact prose, no preamble.";

const LEVEL_COMPACT: &str = "Summarize the following conversation segment in a single compact \
paragraph. Keep only the facts that are still relevant going forward. No preamble.";

const MERGE_DIRECTIVE: &str = "The input consists of two existing summaries of adjacent \
conversation segments. Merge them into one summary covering both segments, removing \
redundancy. Do not add information that appears in neither.";

pub(crate) fn level_template(level: CompressionLevel) -> &'static str {
    match level {
        CompressionLevel::Detailed => LEVEL_DETAILED,
        CompressionLevel::Moderate => LEVEL_MODERATE,
        CompressionLevel::Compact => LEVEL_COMPACT,
    }
}

pub(crate) fn mode_directive(mode: Mode) -> &'static str {
    match mode {
        Mode::Developer => {
            "Preserve exactly: file paths, code identifiers, commands, error messages, and \
             version numbers. Code behavior described in the conversation must not be \
             paraphrased into something weaker."
        }
        Mode::Planning => {
            "Preserve exactly: objectives, considered alternatives, tradeoffs, and the \
             reasoning behind each choice."
        }
        Mode::Debugger => {
            "Preserve exactly: observed symptoms, reproduction steps, hypotheses ruled out, \
             and the current root-cause candidate."
        }
        Mode::Assistant => {
            "Preserve: the flow of the conversation and any user preferences or corrections \
             stated along the way."
        }
    }
}

/// Goal block prepended to the summarization instruction while a goal is
/// active, including the marker grammar the goal manager consumes.
pub(crate) fn goal_block(goal: &Goal) -> String {
    let mut block = format!(
        "An active goal is being tracked. Keep every detail relevant to it.\n\
         Goal: {} (priority {}, status {})\n",
        goal.description,
        goal.priority,
        goal.status.as_str(),
    );

    let open: Vec<&str> = goal
        .checkpoints
        .iter()
        .filter(|c| !c.status.eq_ignore_ascii_case("done"))
        .map(|c| c.text.as_str())
        .collect();
    if !open.is_empty() {
        block.push_str(&format!("Open checkpoints: {}\n", open.join("; ")));
    }

    let locked: Vec<&str> = goal
        .decisions
        .iter()
        .filter(|d| d.locked)
        .map(|d| d.text.as_str())
        .collect();
    if !locked.is_empty() {
        block.push_str(&format!(
            "Locked decisions (must survive verbatim): {}\n",
            locked.join("; ")
        ));
    }

    block.push_str(
        "When the segment shows goal progress, append marker lines after the summary:\n\
         [CHECKPOINT] description - STATUS\n\
         [DECISION] description - LOCKED (omit '- LOCKED' for revisable decisions)\n\
         [ARTIFACT] Created|Modified|Deleted path\n",
    );
    block
}

/// Full instruction for a summarizer call.
pub(crate) fn build_instruction(
    level: CompressionLevel,
    mode: Mode,
    goal: Option<&Goal>,
    merge: bool,
) -> String {
    let mut instruction = String::new();
    if let Some(goal) = goal {
        instruction.push_str(&goal_block(goal));
        instruction.push('\n');
    }
    instruction.push_str(level_template(level));
    instruction.push('\n');
    instruction.push_str(mode_directive(mode));
    if merge {
        instruction.push('\n');
        instruction.push_str(MERGE_DIRECTIVE);
    }
    instruction
}

/// Render messages as `role: content` pairs, one per line.
pub(crate) fn render_conversation(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        out.push_str(role);
        out.push_str(": ");
        out.push_str(&message.content);
        out.push('\n');
    }
    out
}

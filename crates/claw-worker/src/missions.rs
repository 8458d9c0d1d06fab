//! Mission-specific prompt composition and output parsing.
//!
//! A mission is a tag plus a handler with a fixed contract: read from
//! `inputs/` and `context/`, write to `outputs/` plus `aar.json`, one
//! commit. The call-summary mission turns a call transcript into a
//! summary and an action-item list.

use std::path::Path;

pub const ACTION_ITEMS_MARKER: &str = "# Action Items";
pub const FALLBACK_SPLITTER: &str = "---";
pub const NO_ACTION_ITEMS: &str = "No action items parsed.";

/// Inputs the call-summary mission reads out of the worktree.
#[derive(Debug, Default)]
pub struct CallSummaryInputs {
    pub call: String,
    pub account: String,
    pub playbook: String,
}

impl CallSummaryInputs {
    /// Missing files read as empty; the mission still runs with whatever
    /// context the Conductor provisioned.
    pub fn read(worktree: &Path) -> Self {
        let read = |path: std::path::PathBuf| std::fs::read_to_string(path).unwrap_or_default();
        let account = std::fs::read_to_string(worktree.join("context").join("account.json"))
            .unwrap_or_else(|_| "{}".to_string());
        Self {
            call: read(worktree.join("inputs").join("call.md")),
            account,
            playbook: read(worktree.join("context").join("playbook.md")),
        }
    }
}

/// Compose the system + user prompt for the call-summary mission.
pub fn compose_call_summary_prompt(inputs: &CallSummaryInputs) -> String {
    let system_prompt = "You are an AI assistant processing a customer call transcript.\n\
         Your goal is to produce a concise summary and extract actionable items.\n\
         The user will provide the transcript and account details.\n\
         You must respond in the following format:\n\n\
         # Summary\n\
         [Your summary here]\n\n\
         ---\n\n\
         # Action Items\n\
         - [Owner] Description\n\n\
         Follow any specific guidance provided in the Playbook section.";

    let user_prompt = format!(
        "# Account Info\n{}\n\n# Playbook Guidance\n{}\n\n# Call Transcript\n{}",
        inputs.account, inputs.playbook, inputs.call
    );

    format!("{system_prompt}\n\n{user_prompt}")
}

/// Split a model reply into (summary, action items).
///
/// Primary split at the `# Action Items` heading; fallback at the first
/// `---` rule; otherwise the whole reply is the summary.
pub fn split_summary_reply(text: &str) -> (String, String) {
    if let Some((summary_part, action_part)) = text.split_once(ACTION_ITEMS_MARKER) {
        let mut summary = summary_part.replace("# Summary", "");
        summary = summary.trim().to_string();
        if let Some(stripped) = summary.strip_suffix(FALLBACK_SPLITTER) {
            summary = stripped.trim().to_string();
        }
        return (summary, action_part.trim().to_string());
    }

    if let Some((summary_part, action_part)) = text.split_once(FALLBACK_SPLITTER) {
        let summary = summary_part.replace("# Summary", "").trim().to_string();
        let action_items = action_part.replace(ACTION_ITEMS_MARKER, "").trim().to_string();
        return (summary, action_items);
    }

    (text.to_string(), NO_ACTION_ITEMS.to_string())
}

//! Mission playbook registry and per-mission worktree provisioning.
//!
//! A playbook describes how the Conductor prepares a mission before
//! dispatching the Worker. The registry is deliberately small; a new
//! mission type is a new entry plus (optionally) an input writer.

use serde_json::{Map, Value};
use std::io;
use std::path::Path;

pub const FILESYSTEM_CALL_SUMMARY: &str = "filesystem_agent.call_summary";

/// High-level description of how the Conductor handles a mission type.
#[derive(Debug, Clone, Copy)]
pub struct MissionPlaybook {
    pub mission_type: &'static str,
    pub description: &'static str,
    /// The tag forwarded to the Worker; identical today, but kept
    /// separate so the Conductor can remap later.
    pub worker_mission_type: &'static str,
}

const PLAYBOOKS: [MissionPlaybook; 1] = [MissionPlaybook {
    mission_type: FILESYSTEM_CALL_SUMMARY,
    description: "Call transcript -> summary + action items from worktree inputs",
    worker_mission_type: FILESYSTEM_CALL_SUMMARY,
}];

/// Look up a playbook by mission type.
pub fn get_playbook(mission_type: &str) -> Option<&'static MissionPlaybook> {
    PLAYBOOKS.iter().find(|p| p.mission_type == mission_type)
}

/// Everything the call-summary input writer needs to know about the order.
#[derive(Debug)]
pub struct CallSummaryContext<'a> {
    pub mission_type: &'a str,
    pub run_id: &'a str,
    pub order_id: &'a str,
    pub request_id: &'a str,
    pub theater: &'a str,
    pub objective: &'a str,
    pub message: &'a str,
    pub overrides: &'a Map<String, Value>,
}

/// Prepare `inputs/` and `context/` for the call-summary mission.
///
/// Writes files inside the Vault-provisioned worktree; no service calls.
pub fn write_call_summary_inputs(worktree: &Path, ctx: &CallSummaryContext<'_>) -> io::Result<()> {
    let inputs_dir = worktree.join("inputs");
    let context_dir = worktree.join("context");
    std::fs::create_dir_all(&inputs_dir)?;
    std::fs::create_dir_all(&context_dir)?;

    let call_md = format!(
        "# Call Summary Mission\n\n\
         Mission type: {}\n\
         Run: {}  Order: {}  Request: {}\n\
         Theater: {}\n\
         Objective: {}\n\n\
         ---\n\n\
         {}\n",
        ctx.mission_type,
        ctx.run_id,
        ctx.order_id,
        ctx.request_id,
        ctx.theater,
        ctx.objective,
        ctx.message
    );
    std::fs::write(inputs_dir.join("call.md"), call_md)?;

    let mission_payload = serde_json::json!({
        "mission_type": ctx.mission_type,
        "run_id": ctx.run_id,
        "order_id": ctx.order_id,
        "request_id": ctx.request_id,
        "theater": ctx.theater,
        "objective": ctx.objective,
        "overrides": Value::Object(ctx.overrides.clone()),
        "source": "conductor.chat",
    });
    std::fs::write(
        inputs_dir.join("mission.json"),
        serde_json::to_string_pretty(&mission_payload)?,
    )?;

    let account_name = ctx
        .overrides
        .get("account_name")
        .and_then(Value::as_str)
        .unwrap_or("Unknown Account");
    let contact_name = ctx
        .overrides
        .get("contact_name")
        .and_then(Value::as_str)
        .unwrap_or("Unknown Contact");
    let account_context = serde_json::json!({
        "account_name": account_name,
        "contact_name": contact_name,
        "industry": "Unknown",
        "current_plan": "Unknown",
        "renewal_date": null,
        "account_health": "Unknown",
    });
    std::fs::write(
        context_dir.join("account.json"),
        serde_json::to_string_pretty(&account_context)?,
    )?;

    let playbook_md = "# Summary Playbook\n\n\
         When summarizing a call:\n\n\
         1. Start with a 2-3 sentence high-level summary.\n\
         2. Explicitly list:\n\
            - risks\n\
            - blockers\n\
            - commitments\n\
         3. Extract action items with:\n\
            - owner\n\
            - due date (if mentioned)\n\
            - short description\n";
    std::fs::write(context_dir.join("playbook.md"), playbook_md)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn registry_knows_call_summary() {
        let playbook = get_playbook(FILESYSTEM_CALL_SUMMARY).unwrap();
        assert_eq!(playbook.worker_mission_type, FILESYSTEM_CALL_SUMMARY);
        assert!(get_playbook("default").is_none());
        assert!(get_playbook("unknown.mission").is_none());
    }

    #[test]
    fn input_writer_provisions_worktree() {
        let dir = TempDir::new().unwrap();
        let mut overrides = Map::new();
        overrides.insert(
            "account_name".to_string(),
            Value::String("Acme Corp".to_string()),
        );

        let ctx = CallSummaryContext {
            mission_type: FILESYSTEM_CALL_SUMMARY,
            run_id: "run_1",
            order_id: "order_1",
            request_id: "req-1",
            theater: "demo",
            objective: "summarize the call",
            message: "the transcript body",
            overrides: &overrides,
        };
        write_call_summary_inputs(dir.path(), &ctx).unwrap();

        let call = std::fs::read_to_string(dir.path().join("inputs/call.md")).unwrap();
        assert!(call.contains("the transcript body"));
        assert!(call.contains("Run: run_1  Order: order_1  Request: req-1"));

        let mission: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("inputs/mission.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(mission["mission_type"], FILESYSTEM_CALL_SUMMARY);
        assert_eq!(mission["source"], "conductor.chat");

        let account: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("context/account.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(account["account_name"], "Acme Corp");
        assert_eq!(account["contact_name"], "Unknown Contact");

        let playbook = std::fs::read_to_string(dir.path().join("context/playbook.md")).unwrap();
        assert!(playbook.starts_with("# Summary Playbook"));
    }
}

//! Orchestration logic for `/chat`.
//!
//! The id derivation is the idempotency backbone: the same caller
//! `request_id` always produces the same `(run_id, order_id)`, and the
//! Ledger-first check turns a replay into a cached response before any
//! work happens.

use crate::clients::{ClientError, LedgerClient, VaultClient, WorkerClient};
use crate::playbooks::{self, CallSummaryContext};
use claw_core::types::{status, UNSET};
use claw_core::{events, sha256_hex, ModelPolicy, PolicyError, ResolvedModelConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Request body for `POST /chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub theater: Option<String>,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub model_profile: Option<String>,
    #[serde(default)]
    pub model_overrides: Map<String, Value>,
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub keep_worktree: Option<bool>,
    #[serde(default)]
    pub stall_seconds: Option<u64>,
    #[serde(default)]
    pub hard_timeout_seconds: Option<u64>,
}

/// Response body for `POST /chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub run_id: String,
    pub order_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_head: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The only error that escapes the `/chat` handler as an HTTP failure.
/// Everything else is serialized into a `status=failed` body.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("bad_request: {0}")]
    Validation(String),
}

/// Internal failure during orchestration, before conversion into either
/// a 400 (validation) or a 200/failed body.
#[derive(Debug)]
struct OrchestrateFailure {
    error: String,
    stage: &'static str,
    validation: bool,
}

impl OrchestrateFailure {
    fn fatal(error: impl std::fmt::Display) -> Self {
        Self {
            error: error.to_string(),
            stage: "orchestration",
            validation: false,
        }
    }

    fn validation(error: impl std::fmt::Display) -> Self {
        Self {
            error: error.to_string(),
            stage: "validation",
            validation: true,
        }
    }
}

impl From<ClientError> for OrchestrateFailure {
    fn from(e: ClientError) -> Self {
        Self::fatal(e)
    }
}

/// Derive `(run_id, order_id, internal_request_id)`.
///
/// With a caller request id, both short ids come from the first 16 hex
/// chars of its SHA-256. Without one, a random UUID becomes the internal
/// request id and its prefix seeds the short ids; such ids are not
/// time-ordered, which is fine because ordering authority is the Ledger
/// insertion id.
pub fn derive_ids(request_id: Option<&str>) -> (String, String, String) {
    match request_id {
        Some(rid) if !rid.is_empty() => {
            let h = sha256_hex(rid.as_bytes());
            (
                format!("run_{}", &h[..16]),
                format!("order_{}", &h[..16]),
                rid.to_string(),
            )
        }
        _ => {
            let internal = Uuid::new_v4().to_string();
            let prefix = &internal[..8];
            (
                format!("run_{prefix}"),
                format!("order_{prefix}"),
                internal,
            )
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConductorConfig {
    pub theater: String,
    pub theater_root: PathBuf,
    pub keep_worktree: bool,
    pub stall_seconds: u64,
    pub hard_timeout_seconds: u64,
}

/// Ids and per-order settings threaded through one `/chat` invocation.
#[derive(Debug)]
struct OrderContext {
    theater: String,
    run_id: String,
    order_id: String,
    request_id: String,
    objective: String,
    keep_worktree: bool,
    mission_type: String,
}

pub struct Conductor {
    ledger: LedgerClient,
    vault: VaultClient,
    worker: WorkerClient,
    config: ConductorConfig,
}

impl Conductor {
    pub fn new(
        ledger: LedgerClient,
        vault: VaultClient,
        worker: WorkerClient,
        config: ConductorConfig,
    ) -> Self {
        Self {
            ledger,
            vault,
            worker,
            config,
        }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ChatError> {
        let theater = req
            .theater
            .clone()
            .unwrap_or_else(|| self.config.theater.clone());
        let (run_id, order_id, request_id) = derive_ids(req.request_id.as_deref());

        // Ledger-first idempotency: a completed order answers from the
        // snapshot with no worktree and no worker.
        match self.ledger.get_order(&order_id).await {
            Ok(Some(snapshot)) if snapshot.status == status::COMPLETED => {
                info!(order_id = %order_id, "order already completed, short-circuiting");
                return Ok(ChatResponse {
                    run_id,
                    order_id,
                    status: status::COMPLETED.to_string(),
                    answer: snapshot.extra_str("answer").map(str::to_string),
                    worktree_path: None,
                    order_head: (snapshot.order_head != UNSET)
                        .then(|| snapshot.order_head.clone()),
                    archive_path: snapshot.extra_str("archive_path").map(str::to_string),
                    error: None,
                });
            }
            Ok(_) => {}
            Err(e) => warn!("idempotency check against ledger failed: {e}"),
        }

        let objective = req.objective.clone().unwrap_or_else(|| {
            let head: String = req.message.chars().take(50).collect();
            format!("Process chat: {head}...")
        });
        let keep_worktree = req.keep_worktree.unwrap_or(self.config.keep_worktree);
        let mission_type = req
            .model_overrides
            .get("mission_type")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string();
        if let Some(playbook) = playbooks::get_playbook(&mission_type) {
            debug!(
                mission_type = playbook.mission_type,
                "planning with playbook: {}", playbook.description
            );
        }

        let ctx = OrderContext {
            theater,
            run_id,
            order_id,
            request_id,
            objective,
            keep_worktree,
            mission_type,
        };

        self.emit(
            &ctx,
            events::RUN_CREATED,
            serde_json::json!({ "message": req.message.as_str() }),
        )
        .await;
        self.emit(
            &ctx,
            events::ORDER_CREATED,
            serde_json::json!({
                "theater": ctx.theater.as_str(),
                "objective": ctx.objective.as_str(),
            }),
        )
        .await;
        self.emit(&ctx, events::ORDER_QUEUED, serde_json::json!({})).await;

        match self.orchestrate(&req, &ctx).await {
            Ok(response) => Ok(response),
            Err(failure) => {
                self.emit(
                    &ctx,
                    events::ORDER_FAILED,
                    serde_json::json!({
                        "status": status::FAILED,
                        "error": failure.error.as_str(),
                        "stage": failure.stage,
                    }),
                )
                .await;
                self.emit(
                    &ctx,
                    events::RUN_FAILED,
                    serde_json::json!({
                        "status": status::FAILED,
                        "error": failure.error.as_str(),
                    }),
                )
                .await;

                if failure.validation {
                    Err(ChatError::Validation(failure.error))
                } else {
                    Ok(ChatResponse {
                        run_id: ctx.run_id,
                        order_id: ctx.order_id,
                        status: status::FAILED.to_string(),
                        answer: None,
                        worktree_path: None,
                        order_head: None,
                        archive_path: None,
                        error: Some(failure.error),
                    })
                }
            }
        }
    }

    async fn orchestrate(
        &self,
        req: &ChatRequest,
        ctx: &OrderContext,
    ) -> Result<ChatResponse, OrchestrateFailure> {
        self.emit(ctx, events::ORDER_WORKTREE_REQUESTED, serde_json::json!({}))
            .await;
        let worktree_path = self
            .vault
            .create_worktree(&ctx.theater, &ctx.order_id)
            .await?;
        self.emit(
            ctx,
            events::ORDER_WORKTREE_READY,
            serde_json::json!({ "worktree_path": worktree_path.as_str() }),
        )
        .await;

        let resolved = self.resolve_model_config(&ctx.theater, req)?;

        if ctx.mission_type == playbooks::FILESYSTEM_CALL_SUMMARY {
            playbooks::write_call_summary_inputs(
                Path::new(&worktree_path),
                &CallSummaryContext {
                    mission_type: &ctx.mission_type,
                    run_id: &ctx.run_id,
                    order_id: &ctx.order_id,
                    request_id: &ctx.request_id,
                    theater: &ctx.theater,
                    objective: &ctx.objective,
                    message: &req.message,
                    overrides: &req.model_overrides,
                },
            )
            .map_err(OrchestrateFailure::fatal)?;
        }

        let hard_timeout = req
            .hard_timeout_seconds
            .unwrap_or(self.config.hard_timeout_seconds);
        let worker_request = serde_json::json!({
            "run_id": ctx.run_id.as_str(),
            "order_id": ctx.order_id.as_str(),
            "attempt": 1,
            "worktree_path": worktree_path.as_str(),
            "objective": ctx.objective.as_str(),
            "prompt": req.message.as_str(),
            "prompt_template": req.prompt_template.as_deref(),
            "resolved_model_config": resolved,
            "stall_seconds": req.stall_seconds.unwrap_or(self.config.stall_seconds),
            "hard_timeout_seconds": hard_timeout,
            "request_id": ctx.request_id.as_str(),
            "mission_type": ctx.mission_type.as_str(),
        });

        let result = self.worker.execute(worker_request, hard_timeout).await?;

        if result.status != status::COMPLETED {
            return Err(OrchestrateFailure {
                error: result
                    .error
                    .unwrap_or_else(|| "worker failed without specific error".to_string()),
                stage: "worker",
                validation: false,
            });
        }

        let order_head = result.order_head;
        let worktree = Path::new(&worktree_path);
        let answer = std::fs::read_to_string(worktree.join("outputs").join("model_output.txt"))
            .map_err(|e| OrchestrateFailure::fatal(format!("reading model output: {e}")))?;
        let aar: Value = std::fs::read_to_string(worktree.join("aar.json"))
            .map_err(|e| OrchestrateFailure::fatal(format!("reading aar.json: {e}")))
            .and_then(|raw| {
                serde_json::from_str(&raw)
                    .map_err(|e| OrchestrateFailure::fatal(format!("parsing aar.json: {e}")))
            })?;
        let artifacts = aar
            .get("artifacts")
            .cloned()
            .unwrap_or_else(|| serde_json::json!([]));

        let mut archive_path = None;
        if !ctx.keep_worktree {
            archive_path = self
                .vault
                .remove_worktree(&ctx.theater, &ctx.order_id)
                .await?;
            self.emit(
                ctx,
                events::ORDER_ARCHIVED,
                serde_json::json!({ "archive_path": archive_path.as_deref() }),
            )
            .await;
        }

        // The Worker already emitted the terminal event under the same
        // id, so this one is normally a Ledger no-op; it only lands when
        // the Worker's emission was lost.
        self.emit(
            ctx,
            events::ORDER_COMPLETED,
            serde_json::json!({
                "status": status::COMPLETED,
                "order_head": order_head.as_deref(),
                "worktree_path": worktree_path.as_str(),
                "artifacts": artifacts,
                "answer": answer.as_str(),
                "archive_path": archive_path.as_deref(),
            }),
        )
        .await;
        self.emit(
            ctx,
            events::RUN_COMPLETED,
            serde_json::json!({ "status": status::COMPLETED }),
        )
        .await;

        Ok(ChatResponse {
            run_id: ctx.run_id.clone(),
            order_id: ctx.order_id.clone(),
            status: status::COMPLETED.to_string(),
            answer: Some(answer),
            worktree_path: ctx.keep_worktree.then(|| worktree_path.clone()),
            order_head,
            archive_path,
            error: None,
        })
    }

    fn resolve_model_config(
        &self,
        theater: &str,
        req: &ChatRequest,
    ) -> Result<ResolvedModelConfig, OrchestrateFailure> {
        let path = ModelPolicy::find(&self.config.theater_root, theater)
            .map_err(OrchestrateFailure::fatal)?;
        let policy = ModelPolicy::load(&path).map_err(OrchestrateFailure::fatal)?;
        let profile = req.model_profile.as_deref().unwrap_or("executor_default");

        policy
            .resolve(profile, &req.model_overrides)
            .map_err(|e| match e {
                PolicyError::UnknownProfile(_) | PolicyError::ModelNotAllowed(_) => {
                    OrchestrateFailure::validation(e)
                }
                other => OrchestrateFailure::fatal(other),
            })
    }

    async fn emit(&self, ctx: &OrderContext, event_type: &str, payload: Value) {
        self.ledger
            .emit(
                &ctx.request_id,
                event_type,
                &ctx.run_id,
                &ctx.order_id,
                payload,
            )
            .await;
    }
}

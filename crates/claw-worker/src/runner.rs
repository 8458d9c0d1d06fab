//! The Worker execution engine.
//!
//! One attempt = one mission run inside a Vault worktree: resolve the
//! prompt, consult the per-theater output cache, call the model if
//! needed, promote artifacts atomically, write the AAR, and commit.
//! Every stage transition lands in the heartbeat file so a stalled
//! attempt is observable from outside.

use crate::artifacts::{last_heartbeat_stage, write_atomic, write_heartbeat};
use crate::git;
use crate::ledger::LedgerEmitter;
use crate::missions::{compose_call_summary_prompt, split_summary_reply, CallSummaryInputs};
use crate::model::ModelClient;
use claw_core::aar::{Aar, ArtifactRef};
use claw_core::types::{status, MissionType, Stage};
use claw_core::{events, model_fingerprint, sha256_hex, utc_now_iso, ResolvedModelConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

fn default_attempt() -> u32 {
    1
}
fn default_stall_seconds() -> u64 {
    300
}
fn default_hard_timeout_seconds() -> u64 {
    900
}
fn default_mission_type() -> String {
    "default".to_string()
}

/// Request body for `POST /execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub run_id: String,
    pub order_id: String,
    #[serde(default = "default_attempt")]
    pub attempt: u32,
    pub worktree_path: String,
    pub objective: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    pub resolved_model_config: ResolvedModelConfig,
    #[serde(default = "default_stall_seconds")]
    pub stall_seconds: u64,
    #[serde(default = "default_hard_timeout_seconds")]
    pub hard_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default = "default_mission_type")]
    pub mission_type: String,
}

/// Response body for `POST /execute`.
///
/// Domain failures travel in the body with HTTP 200; only entry
/// validation rejects at the transport level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub order_id: String,
    pub run_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_head: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cache entry under `vault_cache/intelligence/output.<fp>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedOutput {
    text: String,
    #[serde(default)]
    usage: Value,
    #[serde(default)]
    latency_ms: f64,
    fingerprint: String,
    timestamp: String,
}

/// A mission aborted at `stage` with `error`.
#[derive(Debug)]
struct MissionFailure {
    stage: Stage,
    error: String,
}

impl MissionFailure {
    fn at(stage: Stage, error: impl std::fmt::Display) -> Self {
        Self {
            stage,
            error: error.to_string(),
        }
    }
}

/// Result of the shared prompt → cache → model pipeline.
#[derive(Debug)]
struct ModelPhase {
    text: String,
    usage: Value,
    latency_ms: f64,
    cache_hit: bool,
    fingerprint: String,
    prompt_hash: String,
    response_hash: String,
}

#[derive(Debug)]
pub struct Runner {
    ledger: LedgerEmitter,
    model: ModelClient,
}

impl Runner {
    pub fn new(ledger: LedgerEmitter, model: ModelClient) -> Self {
        Self { ledger, model }
    }

    /// Execute one attempt end to end. Never panics or errors out of this
    /// function; every failure becomes a failed response plus a failure
    /// AAR on disk.
    pub async fn run(&self, req: &ExecuteRequest) -> ExecuteResponse {
        let worktree = PathBuf::from(&req.worktree_path);
        info!(
            mission_type = %req.mission_type,
            run_id = %req.run_id,
            order_id = %req.order_id,
            attempt = req.attempt,
            "worker starting"
        );

        // Short-circuit: a completed AAR for this attempt means the work
        // already happened; re-emit the terminal event (a Ledger no-op)
        // and hand back the existing HEAD.
        if let Some(order_head) = check_already_completed(&worktree, req.attempt) {
            info!(order_id = %req.order_id, attempt = req.attempt, "already completed, short-circuiting");
            self.emit(
                req,
                events::ORDER_COMPLETED,
                status::COMPLETED,
                serde_json::json!({
                    "order_head": order_head.as_str(),
                    "stage": Stage::Done,
                    "note": "short-circuit",
                }),
            )
            .await;
            return ExecuteResponse {
                order_id: req.order_id.clone(),
                run_id: req.run_id.clone(),
                status: status::COMPLETED.to_string(),
                order_head: Some(order_head),
                stage: Some(Stage::Done),
                error: None,
            };
        }

        let started_at = utc_now_iso();
        let outcome = tokio::time::timeout(
            Duration::from_secs(req.hard_timeout_seconds),
            self.execute(req, &worktree, &started_at),
        )
        .await;

        match outcome {
            Ok(Ok(order_head)) => ExecuteResponse {
                order_id: req.order_id.clone(),
                run_id: req.run_id.clone(),
                status: status::COMPLETED.to_string(),
                order_head: Some(order_head),
                stage: Some(Stage::Done),
                error: None,
            },
            Ok(Err(failure)) => self.fail(req, &worktree, &started_at, failure).await,
            Err(_) => {
                let stage = last_heartbeat_stage(&worktree).unwrap_or(Stage::Starting);
                let failure = MissionFailure::at(
                    stage,
                    format!("hard timeout of {}s exceeded", req.hard_timeout_seconds),
                );
                self.fail(req, &worktree, &started_at, failure).await
            }
        }
    }

    async fn fail(
        &self,
        req: &ExecuteRequest,
        worktree: &Path,
        started_at: &str,
        failure: MissionFailure,
    ) -> ExecuteResponse {
        error!(
            order_id = %req.order_id,
            stage = %failure.stage,
            "worker failed: {}",
            failure.error
        );

        let aar = Aar {
            order_id: req.order_id.clone(),
            run_id: req.run_id.clone(),
            mission_type: None,
            attempt: req.attempt,
            status: status::FAILED.to_string(),
            stage: failure.stage,
            started_at: started_at.to_string(),
            ended_at: utc_now_iso(),
            model_profile: None,
            model_id: None,
            prompt_template_path: None,
            prompt_template_commit_sha: None,
            prompt_hash: None,
            response_hash: None,
            cache_hit: None,
            latency_ms: None,
            usage: None,
            artifacts: Vec::new(),
            error: Some(failure.error.clone()),
        };
        if let Ok(json) = serde_json::to_string_pretty(&aar) {
            if let Err(e) = write_atomic(&worktree.join("aar.json"), json.as_bytes()) {
                warn!("failed to write failure aar: {e}");
            }
        }

        self.emit(
            req,
            events::ORDER_FAILED,
            status::FAILED,
            serde_json::json!({
                "error": failure.error.as_str(),
                "stage": failure.stage,
            }),
        )
        .await;

        ExecuteResponse {
            order_id: req.order_id.clone(),
            run_id: req.run_id.clone(),
            status: status::FAILED.to_string(),
            order_head: None,
            stage: Some(failure.stage),
            error: Some(failure.error),
        }
    }

    async fn execute(
        &self,
        req: &ExecuteRequest,
        worktree: &Path,
        started_at: &str,
    ) -> Result<String, MissionFailure> {
        write_heartbeat(worktree, Stage::Initializing)
            .map_err(|e| MissionFailure::at(Stage::Initializing, e))?;
        self.emit(
            req,
            events::ORDER_RUNNING,
            status::RUNNING,
            serde_json::json!({ "stage": Stage::Initializing }),
        )
        .await;

        match MissionType::from_tag(&req.mission_type) {
            MissionType::Default => self.run_default(req, worktree, started_at).await,
            MissionType::CallSummary => self.run_call_summary(req, worktree, started_at).await,
        }
    }

    /// Single-shot mission: one prompt, one text artifact.
    async fn run_default(
        &self,
        req: &ExecuteRequest,
        worktree: &Path,
        started_at: &str,
    ) -> Result<String, MissionFailure> {
        // Prompt resolution: a repo-backed template replaces the raw
        // prompt and pins the worktree HEAD as the template version.
        let mut prompt = req.prompt.clone();
        let mut template_commit = None;
        if let Some(template) = &req.prompt_template {
            let template_file = worktree.join("prompts").join(template);
            if template_file.exists() {
                prompt = std::fs::read_to_string(&template_file)
                    .map_err(|e| MissionFailure::at(Stage::Initializing, e))?;
                template_commit = git::rev_parse_head(worktree).ok();
            } else {
                warn!(template, "prompt template not found in worktree, using raw prompt");
            }
        }
        write_atomic(
            &worktree.join("inputs").join("prompt.txt"),
            prompt.as_bytes(),
        )
        .map_err(|e| MissionFailure::at(Stage::Initializing, e))?;

        let phase = self
            .model_phase(req, worktree, &prompt, template_commit.as_deref())
            .await?;

        write_heartbeat(worktree, Stage::ModelReturned)
            .map_err(|e| MissionFailure::at(Stage::ModelReturned, e))?;
        write_heartbeat(worktree, Stage::WritingArtifacts)
            .map_err(|e| MissionFailure::at(Stage::WritingArtifacts, e))?;

        write_atomic(
            &worktree.join("outputs").join("model_output.txt"),
            phase.text.as_bytes(),
        )
        .map_err(|e| MissionFailure::at(Stage::WritingArtifacts, e))?;

        let artifacts = vec![
            ArtifactRef::new("inputs/prompt.txt", "text/plain"),
            ArtifactRef::new(
                format!("outputs/model_output.{}.json", phase.fingerprint),
                "application/json",
            ),
            ArtifactRef::new("outputs/model_output.txt", "text/plain"),
        ];

        let aar = self.success_aar(
            req,
            started_at,
            &phase,
            artifacts.clone(),
            req.prompt_template.clone(),
            template_commit,
        );
        self.write_aar(worktree, &aar)?;

        let answer = phase.text.clone();
        self.finish(req, worktree, &artifacts, &answer).await
    }

    /// Call-summary mission: transcript + account context + playbook in,
    /// summary and action items out.
    async fn run_call_summary(
        &self,
        req: &ExecuteRequest,
        worktree: &Path,
        started_at: &str,
    ) -> Result<String, MissionFailure> {
        let inputs = CallSummaryInputs::read(worktree);
        let prompt = compose_call_summary_prompt(&inputs);

        let phase = self.model_phase(req, worktree, &prompt, None).await?;

        write_heartbeat(worktree, Stage::ModelReturned)
            .map_err(|e| MissionFailure::at(Stage::ModelReturned, e))?;
        write_heartbeat(worktree, Stage::WritingArtifacts)
            .map_err(|e| MissionFailure::at(Stage::WritingArtifacts, e))?;

        let outputs = worktree.join("outputs");
        write_atomic(&outputs.join("model_output.txt"), phase.text.as_bytes())
            .map_err(|e| MissionFailure::at(Stage::WritingArtifacts, e))?;

        let (summary, action_items) = split_summary_reply(&phase.text);
        write_atomic(&outputs.join("summary.md"), summary.as_bytes())
            .map_err(|e| MissionFailure::at(Stage::WritingArtifacts, e))?;
        write_atomic(&outputs.join("action_items.md"), action_items.as_bytes())
            .map_err(|e| MissionFailure::at(Stage::WritingArtifacts, e))?;

        let artifacts = vec![
            ArtifactRef::new("inputs/call.md", "text/markdown"),
            ArtifactRef::new("outputs/summary.md", "text/markdown"),
            ArtifactRef::new("outputs/action_items.md", "text/markdown"),
            ArtifactRef::new("outputs/model_output.txt", "text/plain"),
        ];

        let aar = self.success_aar(req, started_at, &phase, artifacts.clone(), None, None);
        self.write_aar(worktree, &aar)?;

        let answer = phase.text.clone();
        self.finish(req, worktree, &artifacts, &answer).await
    }

    /// Shared prompt → fingerprint → cache → model pipeline.
    async fn model_phase(
        &self,
        req: &ExecuteRequest,
        worktree: &Path,
        prompt: &str,
        template_commit: Option<&str>,
    ) -> Result<ModelPhase, MissionFailure> {
        let config = &req.resolved_model_config;
        let normalized = prompt.trim();
        let prompt_hash = sha256_hex(normalized.as_bytes());
        let fingerprint = model_fingerprint(
            &config.model,
            config.profile_name(),
            normalized,
            template_commit,
            &config.fingerprint_overrides(),
        );

        let theater_cache = theater_cache_path(worktree, &fingerprint);
        let local_cache = worktree
            .join("outputs")
            .join(format!("model_output.{fingerprint}.json"));
        let artifact_paths = vec![format!("outputs/model_output.{fingerprint}.json")];

        let call_payload = serde_json::json!({
            "profile_name": config.profile_name(),
            "model_id": config.model.as_str(),
            "prompt_hash": prompt_hash.as_str(),
            "artifact_paths": artifact_paths,
        });

        let (text, usage, latency_ms, cache_hit) = if theater_cache.exists() {
            info!(fingerprint = %fingerprint, "theater cache hit, skipping model call");
            let raw = std::fs::read_to_string(&theater_cache)
                .map_err(|e| MissionFailure::at(Stage::Initializing, e))?;
            let cached: CachedOutput = serde_json::from_str(&raw)
                .map_err(|e| MissionFailure::at(Stage::Initializing, e))?;
            if !local_cache.exists() {
                write_atomic(&local_cache, raw.as_bytes())
                    .map_err(|e| MissionFailure::at(Stage::Initializing, e))?;
            }
            (cached.text, cached.usage, cached.latency_ms, true)
        } else {
            write_heartbeat(worktree, Stage::CallingModel)
                .map_err(|e| MissionFailure::at(Stage::CallingModel, e))?;
            self.emit(req, events::MODEL_CALL_STARTED, "started", call_payload.clone())
                .await;

            match self.model.call(config, prompt).await {
                Ok(reply) => {
                    let output = CachedOutput {
                        text: reply.text,
                        usage: reply.usage,
                        latency_ms: reply.latency_ms,
                        fingerprint: fingerprint.clone(),
                        timestamp: utc_now_iso(),
                    };
                    let json = serde_json::to_string_pretty(&output)
                        .map_err(|e| MissionFailure::at(Stage::CallingModel, e))?;
                    write_atomic(&theater_cache, json.as_bytes())
                        .map_err(|e| MissionFailure::at(Stage::CallingModel, e))?;
                    write_atomic(&local_cache, json.as_bytes())
                        .map_err(|e| MissionFailure::at(Stage::CallingModel, e))?;
                    (output.text, output.usage, output.latency_ms, false)
                }
                Err(e) => {
                    let mut failed_payload = call_payload;
                    if let Value::Object(map) = &mut failed_payload {
                        map.insert("error".to_string(), Value::String(e.to_string()));
                    }
                    self.emit(req, events::MODEL_CALL_FAILED, status::FAILED, failed_payload)
                        .await;
                    return Err(MissionFailure::at(Stage::CallingModel, e));
                }
            }
        };

        let response_hash = sha256_hex(text.as_bytes());
        self.emit(
            req,
            events::MODEL_CALL_COMPLETED,
            status::COMPLETED,
            serde_json::json!({
                "profile_name": config.profile_name(),
                "model_id": config.model.as_str(),
                "prompt_hash": prompt_hash.as_str(),
                "response_hash": response_hash.as_str(),
                "latency_ms": latency_ms,
                "artifact_paths": [format!("outputs/model_output.{fingerprint}.json")],
                "cache_hit": cache_hit,
            }),
        )
        .await;

        Ok(ModelPhase {
            text,
            usage,
            latency_ms,
            cache_hit,
            fingerprint,
            prompt_hash,
            response_hash,
        })
    }

    /// Commit the attempt, mark it done, and emit the terminal event.
    async fn finish(
        &self,
        req: &ExecuteRequest,
        worktree: &Path,
        artifacts: &[ArtifactRef],
        answer: &str,
    ) -> Result<String, MissionFailure> {
        write_heartbeat(worktree, Stage::Committing)
            .map_err(|e| MissionFailure::at(Stage::Committing, e))?;

        let message = format!("worker: {} attempt {}", req.order_id, req.attempt);
        let order_head = git::commit_all(worktree, &message)
            .map_err(|e| MissionFailure::at(Stage::Committing, e))?;

        write_heartbeat(worktree, Stage::Done)
            .map_err(|e| MissionFailure::at(Stage::Done, e))?;

        self.emit(
            req,
            events::ORDER_COMPLETED,
            status::COMPLETED,
            serde_json::json!({
                "order_head": order_head.as_str(),
                "stage": Stage::Done,
                "artifacts": artifacts,
                "answer": answer,
            }),
        )
        .await;

        Ok(order_head)
    }

    fn success_aar(
        &self,
        req: &ExecuteRequest,
        started_at: &str,
        phase: &ModelPhase,
        artifacts: Vec<ArtifactRef>,
        prompt_template_path: Option<String>,
        prompt_template_commit_sha: Option<String>,
    ) -> Aar {
        let config = &req.resolved_model_config;
        Aar {
            order_id: req.order_id.clone(),
            run_id: req.run_id.clone(),
            mission_type: Some(req.mission_type.clone()),
            attempt: req.attempt,
            status: status::COMPLETED.to_string(),
            stage: Stage::Done,
            started_at: started_at.to_string(),
            ended_at: utc_now_iso(),
            model_profile: Some(config.profile_name().to_string()),
            model_id: Some(config.model.clone()),
            prompt_template_path,
            prompt_template_commit_sha,
            prompt_hash: Some(phase.prompt_hash.clone()),
            response_hash: Some(phase.response_hash.clone()),
            cache_hit: Some(phase.cache_hit),
            latency_ms: Some(phase.latency_ms),
            usage: Some(phase.usage.clone()),
            artifacts,
            error: None,
        }
    }

    fn write_aar(&self, worktree: &Path, aar: &Aar) -> Result<(), MissionFailure> {
        let json = serde_json::to_string_pretty(aar)
            .map_err(|e| MissionFailure::at(Stage::WritingArtifacts, e))?;
        write_atomic(&worktree.join("aar.json"), json.as_bytes())
            .map_err(|e| MissionFailure::at(Stage::WritingArtifacts, e))
    }

    /// Emit an event with the standard payload envelope.
    async fn emit(&self, req: &ExecuteRequest, event_type: &str, status: &str, extra: Value) {
        let mut payload = Map::new();
        payload.insert("status".to_string(), Value::String(status.to_string()));
        payload.insert("attempt".to_string(), serde_json::json!(req.attempt));
        payload.insert("run_id".to_string(), Value::String(req.run_id.clone()));
        payload.insert("order_id".to_string(), Value::String(req.order_id.clone()));
        payload.insert(
            "worktree".to_string(),
            Value::String(req.worktree_path.clone()),
        );
        if let Value::Object(extra) = extra {
            payload.extend(extra);
        }

        let request_id = effective_request_id(req);
        self.ledger
            .emit(
                &request_id,
                event_type,
                &req.run_id,
                &req.order_id,
                req.attempt,
                Value::Object(payload),
            )
            .await;
    }
}

/// The idempotency key for event derivation when the caller supplied no
/// request id.
fn effective_request_id(req: &ExecuteRequest) -> String {
    req.request_id
        .clone()
        .unwrap_or_else(|| format!("worker-{}-{}", req.order_id, req.attempt))
}

/// The theater-global cache file for a fingerprint. The worktree lives at
/// `<theater>/worktrees/<order_id>`, so the theater root is two levels up.
fn theater_cache_path(worktree: &Path, fingerprint: &str) -> PathBuf {
    let theater_root = worktree
        .parent()
        .and_then(Path::parent)
        .unwrap_or(worktree);
    theater_root
        .join("vault_cache")
        .join("intelligence")
        .join(format!("output.{fingerprint}.json"))
}

/// Short-circuit check: a completed AAR for this attempt plus a readable
/// HEAD means the attempt already ran to completion.
fn check_already_completed(worktree: &Path, attempt: u32) -> Option<String> {
    let aar = Aar::load(worktree)?;
    if !aar.is_completed_attempt(attempt) {
        return None;
    }
    git::rev_parse_head(worktree).ok()
}

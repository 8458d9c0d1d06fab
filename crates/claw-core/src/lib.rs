//! claw-core - Shared data model for the IronClaw stack.
//!
//! Pure types and helpers used by every service: ledger events and
//! snapshots, the after-action report schema, the model-call fingerprint,
//! and model policy resolution. No I/O beyond reading policy files.

pub mod aar;
pub mod events;
pub mod fingerprint;
pub mod policy;
pub mod types;

pub use aar::{Aar, ArtifactRef};
pub use events::event_id_for;
pub use fingerprint::{canonical_json, model_fingerprint, sha256_hex};
pub use policy::{ModelPolicy, ModelProfile, PolicyError, ResolvedModelConfig};
pub use types::{
    utc_now_iso, EventAck, EventRecord, MissionType, NewEvent, OrderSnapshot, RunSnapshot, Stage,
};

//! Real-time synchronisation core of the Sentinel console: REST client,
//! keyed push subscriptions, the reconciliation store and the lifecycle
//! controllers the UI renders from.

pub mod api;
pub mod config;
pub mod controllers;
pub mod logs;
pub mod models;
pub mod store;
pub mod stream;

#[cfg(test)]
mod testing;

pub use api::{AnalysisApi, ClientError, ClientResult, OrchestrationApi, SentinelClient, SessionToken};
pub use config::{AppConfig, AppProfile};
pub use controllers::{
    AnalysisController, AnalysisPhase, AnalysisState, HistoryBrowser, OrchestrationController,
    PipelineMonitor, PipelineStats, Runtime, TaskRow,
};
pub use logs::LogBuffers;
pub use store::{Phase, ReconciliationStore, ReplaceOptions, Tracked, TrackedEntity, UpsertOutcome};
pub use stream::{
    BackoffPolicy, EventStreamClient, StreamError, StreamNotice, StreamTopic,
};

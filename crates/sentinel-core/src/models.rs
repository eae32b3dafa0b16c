use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::api::{ClientError, ClientResult};
use crate::store::{Phase, TrackedEntity};

/// Shortest log the analysis service accepts, in characters.
pub const MIN_LOG_CHARS: usize = 20;

pub const PIPELINE_TYPES: [&str; 4] = ["GITHUB_ACTIONS", "GITLAB_CI", "JENKINS", "AZURE_DEVOPS"];

pub fn validate_log_text(log_text: &str) -> ClientResult<()> {
    let length = log_text.trim().chars().count();
    if length < MIN_LOG_CHARS {
        return Err(ClientError::Validation(format!(
            "log must contain at least {MIN_LOG_CHARS} characters (got {length})"
        )));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn phase(self) -> Phase {
        match self {
            Self::Pending => Phase::Pending,
            Self::Processing => Phase::Active,
            Self::Completed => Phase::Completed,
            Self::Failed => Phase::Failed,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl From<Phase> for AnalysisStatus {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Pending => Self::Pending,
            Phase::Active => Self::Processing,
            Phase::Completed => Self::Completed,
            Phase::Failed => Self::Failed,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    BuildConfiguration,
    DependencyResolution,
    EnvironmentMismatch,
    Infrastructure,
    PermissionAuth,
    TimeoutResource,
    Database,
    ConfigurationError,
    #[serde(other)]
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 9] = [
        Self::BuildConfiguration,
        Self::DependencyResolution,
        Self::EnvironmentMismatch,
        Self::Infrastructure,
        Self::PermissionAuth,
        Self::TimeoutResource,
        Self::Database,
        Self::ConfigurationError,
        Self::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BuildConfiguration => "BUILD_CONFIGURATION",
            Self::DependencyResolution => "DEPENDENCY_RESOLUTION",
            Self::EnvironmentMismatch => "ENVIRONMENT_MISMATCH",
            Self::Infrastructure => "INFRASTRUCTURE",
            Self::PermissionAuth => "PERMISSION_AUTH",
            Self::TimeoutResource => "TIMEOUT_RESOURCE",
            Self::Database => "DATABASE",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnalysisRequest<'a> {
    pub pipeline_type: &'a str,
    pub log_text: &'a str,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnalysisResponse {
    pub analysis_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AnalysisStatus>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: String,
    pub pipeline_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub status: AnalysisStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fixes: Option<Vec<String>>,
    pub created_at: String,
}

impl AnalysisRecord {
    pub fn fixes(&self) -> &[String] {
        self.suggested_fixes.as_deref().unwrap_or_default()
    }

    pub fn confidence_percent(&self) -> Option<u8> {
        self.confidence
            .map(|value| if value <= 1.0 { value * 100.0 } else { value })
            .map(|value| value.clamp(0.0, 100.0).round() as u8)
    }

    pub fn created_label(&self) -> String {
        format_timestamp(&self.created_at)
    }
}

impl TrackedEntity for AnalysisRecord {
    fn key(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> Phase {
        self.status.phase()
    }

    fn set_phase(&mut self, phase: Phase) {
        self.status = phase.into();
    }
}

/// Payload of the `analysis-status` push event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStatusEvent {
    pub analysis_id: String,
    pub status: AnalysisStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_type: Option<String>,
    pub page: u32,
    #[serde(default = "SearchFilters::default_size")]
    pub size: u32,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            error_category: None,
            pipeline_type: None,
            page: 0,
            size: Self::DEFAULT_SIZE,
        }
    }
}

impl SearchFilters {
    const DEFAULT_SIZE: u32 = 10;

    const fn default_size() -> u32 {
        Self::DEFAULT_SIZE
    }

    pub fn first_page(&self) -> Self {
        Self {
            page: 0,
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub number: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn phase(self) -> Phase {
        match self {
            Self::Pending => Phase::Pending,
            Self::InProgress => Phase::Active,
            Self::Completed => Phase::Completed,
            Self::Failed => Phase::Failed,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl From<Phase> for TaskStatus {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Pending => Self::Pending,
            Phase::Active => Self::InProgress,
            Phase::Completed => Self::Completed,
            Phase::Failed => Self::Failed,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationTask {
    pub id: String,
    #[serde(default)]
    pub task_identity: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub time_ago: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub collaborator: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<String>,
}

impl TrackedEntity for OrchestrationTask {
    fn key(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> Phase {
        self.status.phase()
    }

    fn set_phase(&mut self, phase: Phase) {
        self.status = phase.into();
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineAnalysis {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub suggested_fixes: Vec<String>,
}

/// Telemetry snapshot carried by the `pipeline-*` push events.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineExecution {
    pub id: String,
    #[serde(default)]
    pub pipeline_name: String,
    #[serde(default)]
    pub commit_id: String,
    pub status: PipelineStatus,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub mem_usage: f64,
    #[serde(default)]
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<PipelineAnalysis>,
}

impl PipelineExecution {
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(8) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }

    pub fn is_hot(&self) -> bool {
        self.cpu_usage > 80.0 || self.mem_usage > 80.0
    }
}

impl TrackedEntity for PipelineExecution {
    fn key(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> Phase {
        match self.status {
            PipelineStatus::Processing => Phase::Active,
            PipelineStatus::Completed => Phase::Completed,
            PipelineStatus::Failed => Phase::Failed,
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.status = match phase {
            Phase::Pending | Phase::Active => PipelineStatus::Processing,
            Phase::Completed => PipelineStatus::Completed,
            Phase::Failed => PipelineStatus::Failed,
        };
    }
}

/// Payload of the `agent-logs` push event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentLogEvent {
    pub task_id: String,
    pub log: String,
}

/// Payload of the `notification` push event. The orchestration view only
/// treats it as a re-pull trigger; the pulse feed renders it.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PulseEvent {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

pub fn format_timestamp(raw: &str) -> String {
    let display = format_description!("[year]-[month]-[day] [hour]:[minute]");
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
        if let Ok(text) = parsed.format(&display) {
            return text;
        }
    }

    // Offset-less backend timestamps: keep the date and minute precision.
    match raw.get(..16) {
        Some(prefix) if prefix.as_bytes().get(10) == Some(&b'T') => prefix.replacen('T', " ", 1),
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_gate_counts_characters() {
        assert!(validate_log_text(&"x".repeat(19)).is_err());
        assert!(validate_log_text(&"x".repeat(20)).is_ok());
        assert!(validate_log_text(&format!("   {}   ", "x".repeat(19))).is_err());
        assert!(matches!(
            validate_log_text("short"),
            Err(ClientError::Validation(_))
        ));
    }

    #[test]
    fn analysis_record_decodes_backend_shape() {
        let raw = r#"{
            "id": "abc",
            "pipelineType": "GITHUB_ACTIONS",
            "summary": "npm install failed",
            "rootCause": "registry timeout",
            "errorCategory": "DEPENDENCY_RESOLUTION",
            "confidence": 0.87,
            "status": "COMPLETED",
            "suggestedFixes": ["pin the registry mirror"],
            "createdAt": "2024-05-01T10:15:30Z"
        }"#;
        let record: AnalysisRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.status, AnalysisStatus::Completed);
        assert_eq!(record.error_category, Some(ErrorCategory::DependencyResolution));
        assert_eq!(record.fixes(), ["pin the registry mirror".to_string()]);
        assert_eq!(record.confidence_percent(), Some(87));
        assert_eq!(record.created_label(), "2024-05-01 10:15");
    }

    #[test]
    fn unknown_categories_and_priorities_degrade_gracefully() {
        let category: ErrorCategory = serde_json::from_str("\"QUANTUM_FLUX\"").unwrap();
        assert_eq!(category, ErrorCategory::Unknown);

        let task: OrchestrationTask =
            serde_json::from_str(r#"{"id":"t1","status":"PENDING","priority":"URGENT"}"#).unwrap();
        assert_eq!(task.priority, TaskPriority::Unknown);
        assert_eq!(task.phase(), Phase::Pending);
    }

    #[test]
    fn offsetless_timestamps_keep_minute_precision() {
        assert_eq!(format_timestamp("2024-05-01T10:15:30.123"), "2024-05-01 10:15");
        assert_eq!(format_timestamp("yesterday"), "yesterday");
    }

    #[test]
    fn pipeline_short_id_is_char_safe() {
        let pipeline: PipelineExecution = serde_json::from_str(
            r#"{"id":"0123456789abcdef","status":"PROCESSING","cpuUsage":91.5}"#,
        )
        .unwrap();
        assert_eq!(pipeline.short_id(), "01234567");
        assert!(pipeline.is_hot());
    }
}

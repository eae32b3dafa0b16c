use std::sync::{Arc, RwLock};

use anyhow::Context;
use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::AppConfig;
use crate::models::{
    validate_log_text, AnalysisRecord, CreateAnalysisRequest, CreateAnalysisResponse,
    OrchestrationTask, Page, SearchFilters,
};

pub type ClientResult<T> = Result<T, ClientError>;

/// REST surface of the analysis service.
#[allow(async_fn_in_trait)]
pub trait AnalysisApi {
    async fn submit_analysis(&self, pipeline_type: &str, log_text: &str) -> ClientResult<String>;
    async fn fetch_analysis(&self, analysis_id: &str) -> ClientResult<AnalysisRecord>;
    async fn search_analyses(&self, filters: &SearchFilters) -> ClientResult<Page<AnalysisRecord>>;
    async fn delete_analyses(&self, ids: &[String]) -> ClientResult<()>;
}

/// REST surface of the orchestration engine.
#[allow(async_fn_in_trait)]
pub trait OrchestrationApi {
    async fn active_tasks(&self) -> ClientResult<Vec<OrchestrationTask>>;
    async fn promote_to_orchestration(&self, analysis_id: &str) -> ClientResult<()>;
    async fn trigger_task_fix(&self, task_id: &str) -> ClientResult<()>;
    async fn stop_task(&self, task_id: &str) -> ClientResult<()>;
}

/// Access token shared between the session and every client clone.
#[derive(Clone, Debug, Default)]
pub struct SessionToken(Arc<RwLock<Option<String>>>);

impl SessionToken {
    pub fn new(token: Option<String>) -> Self {
        Self(Arc::new(RwLock::new(token)))
    }

    pub fn set(&self, token: Option<String>) {
        if let Ok(mut guard) = self.0.write() {
            *guard = token;
        }
    }

    pub fn get(&self) -> Option<String> {
        self.0.read().ok().and_then(|guard| guard.clone())
    }

    fn bearer(&self) -> Option<String> {
        self.get()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .map(|token| format!("Bearer {token}"))
    }
}

#[derive(Clone)]
pub struct SentinelClient {
    inner: reqwest::Client,
    config: Arc<AppConfig>,
    base_url: String,
    token: SessionToken,
}

impl SentinelClient {
    pub fn new(config: AppConfig, token: SessionToken) -> ClientResult<Self> {
        let base_url = normalize_base_url(&config.api_base_url);

        #[allow(unused_mut)]
        let mut builder = reqwest::Client::builder();
        #[cfg(not(target_arch = "wasm32"))]
        {
            builder = builder.timeout(config.request_timeout);
        }
        let client = builder.build().context("failed to build reqwest client")?;

        if token.get().is_none() {
            token.set(config.auth_token.clone());
        }

        Ok(Self {
            inner: client,
            config: Arc::new(config),
            base_url,
            token,
        })
    }

    pub fn config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.config)
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = self.join_path(path);
        let mut builder = self.inner.request(method, url);

        if let Some(token) = self.token.bearer() {
            builder = builder.header(header::AUTHORIZATION, token);
        }

        builder
    }

    fn join_path(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_json<T>(&self, builder: reqwest::RequestBuilder) -> ClientResult<T>
    where
        T: DeserializeOwned,
    {
        let bytes = self.send_raw(builder).await?;
        if bytes.is_empty() {
            return Err(ClientError::EmptyResponse);
        }
        serde_json::from_slice(&bytes).map_err(ClientError::from)
    }

    async fn send_raw(&self, builder: reqwest::RequestBuilder) -> ClientResult<Vec<u8>> {
        let response = builder.send().await.map_err(ClientError::from)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(ClientError::from)?;
        debug!(status = status.as_u16(), len = bytes.len(), "rest response");

        if status.is_success() {
            return Ok(bytes.to_vec());
        }

        let message = serde_json::from_slice::<ApiErrorBody>(&bytes)
            .ok()
            .and_then(|body| body.message)
            .filter(|message| !message.trim().is_empty());

        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(
                message.unwrap_or_else(|| "record not found".into()),
            ));
        }

        match message {
            Some(message) => Err(ClientError::Api { status, message }),
            None => Err(ClientError::UnexpectedStatus {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            }),
        }
    }
}

impl AnalysisApi for SentinelClient {
    async fn submit_analysis(&self, pipeline_type: &str, log_text: &str) -> ClientResult<String> {
        validate_log_text(log_text)?;
        let body = CreateAnalysisRequest {
            pipeline_type,
            log_text,
        };
        let builder = self.request(Method::POST, "api/logs/analyze").json(&body);
        let response: CreateAnalysisResponse = self.send_json(builder).await?;
        Ok(response.analysis_id)
    }

    async fn fetch_analysis(&self, analysis_id: &str) -> ClientResult<AnalysisRecord> {
        let path = format!("api/logs/{analysis_id}");
        let builder = self.request(Method::GET, &path);
        self.send_json(builder).await
    }

    async fn search_analyses(&self, filters: &SearchFilters) -> ClientResult<Page<AnalysisRecord>> {
        let builder = self
            .request(Method::GET, "api/logs/search")
            .query(filters);
        self.send_json(builder).await
    }

    async fn delete_analyses(&self, ids: &[String]) -> ClientResult<()> {
        let builder = self.request(Method::DELETE, "api/logs").json(ids);
        self.send_raw(builder).await.map(|_| ())
    }
}

impl OrchestrationApi for SentinelClient {
    async fn active_tasks(&self) -> ClientResult<Vec<OrchestrationTask>> {
        let builder = self.request(Method::GET, "api/orchestration/active");
        self.send_json(builder).await
    }

    async fn promote_to_orchestration(&self, analysis_id: &str) -> ClientResult<()> {
        let path = format!("api/orchestration/promote/{analysis_id}");
        let builder = self.request(Method::POST, &path);
        self.send_raw(builder).await.map(|_| ())
    }

    async fn trigger_task_fix(&self, task_id: &str) -> ClientResult<()> {
        let path = format!("api/orchestration/{task_id}/execute");
        let builder = self.request(Method::POST, &path);
        self.send_raw(builder).await.map(|_| ())
    }

    async fn stop_task(&self, task_id: &str) -> ClientResult<()> {
        let path = format!("api/orchestration/{task_id}/stop");
        let builder = self.request(Method::POST, &path);
        self.send_raw(builder).await.map(|_| ())
    }
}

fn normalize_base_url(input: &str) -> String {
    input.trim_end_matches('/').to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("api error {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("empty response body")]
    EmptyResponse,
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("client setup failed: {0}")]
    Setup(#[from] anyhow::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::NotFound(_) => Some(StatusCode::NOT_FOUND),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Text safe to show in the console.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::NotFound(_) => "The requested record does not exist.".into(),
            Self::Api { message, .. } => message.clone(),
            Self::Transport(_) => "The server could not be reached.".into(),
            Self::UnexpectedStatus { status, .. } => format!("Request failed ({status})."),
            Self::Decode(_) | Self::EmptyResponse => "The server sent an unreadable response.".into(),
            Self::Setup(_) => "The console client is not configured.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_trims_duplicate_slashes() {
        let config = AppConfig {
            api_base_url: "http://ops.local:8080/".into(),
            ..AppConfig::default()
        };
        let client = SentinelClient::new(config, SessionToken::default()).unwrap();
        assert_eq!(
            client.join_path("/api/logs/abc"),
            "http://ops.local:8080/api/logs/abc"
        );
    }

    #[test]
    fn session_token_falls_back_to_configured_token() {
        let config = AppConfig {
            auth_token: Some("from-env".into()),
            ..AppConfig::default()
        };
        let client = SentinelClient::new(config.clone(), SessionToken::default()).unwrap();
        assert_eq!(client.token().get().as_deref(), Some("from-env"));

        let stored = SessionToken::new(Some("from-storage".into()));
        let client = SentinelClient::new(config, stored).unwrap();
        assert_eq!(client.token().bearer().as_deref(), Some("Bearer from-storage"));

        client.token().set(None);
        assert_eq!(client.token().bearer(), None);
    }

    #[test]
    fn search_filters_serialize_as_query_fields() {
        let filters = SearchFilters {
            error_category: Some("INFRASTRUCTURE".into()),
            pipeline_type: None,
            page: 0,
            size: 10,
        };
        let value = serde_json::to_value(&filters).unwrap();
        assert_eq!(value["errorCategory"], "INFRASTRUCTURE");
        assert!(value.get("pipelineType").is_none());
        assert_eq!(value["size"], 10);
    }

    #[test]
    fn not_found_has_distinct_user_message() {
        let err = ClientError::NotFound("analysis abc".into());
        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_ne!(
            err.user_message(),
            ClientError::EmptyResponse.user_message()
        );
    }
}

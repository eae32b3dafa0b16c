//! Process-wide console context: created once on load, torn down on logout.

use std::rc::Rc;
use std::sync::Arc;

use sentinel_core::stream::{browser_scheduler, browser_spawner, browser_transport};
use sentinel_core::{
    AnalysisController, AppConfig, ClientError, Runtime, SentinelClient, SessionToken,
};
use tracing::info;

const TOKEN_STORAGE_KEY: &str = "sentinel.access_token";

/// Everything the pages need to build controllers. Passed through Dioxus
/// context rather than held in statics.
#[derive(Clone)]
pub struct ConsoleContext {
    pub config: Arc<AppConfig>,
    pub client: Rc<SentinelClient>,
    pub runtime: Runtime,
    /// Shared so the history view can hand a stored report to the analysis
    /// page.
    pub analysis: AnalysisController<SentinelClient>,
}

impl PartialEq for ConsoleContext {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.client, &other.client)
    }
}

impl ConsoleContext {
    pub fn init() -> Result<Self, ClientError> {
        let config = AppConfig::from_env();
        let token = SessionToken::new(restore_token());
        let client = Rc::new(SentinelClient::new(config.clone(), token)?);
        let runtime = Runtime::new(
            &config,
            browser_transport(),
            browser_scheduler(),
            browser_spawner(),
        );
        let analysis = AnalysisController::new(Rc::clone(&client), runtime.clone());

        info!(
            api = %config.api_base_url,
            stream = %runtime.stream_endpoint,
            authenticated = client.token().get().is_some(),
            "console context ready"
        );

        Ok(Self {
            config: client.config(),
            client,
            runtime,
            analysis,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.token().get().is_some()
    }

    /// Forgets the stored access token and drops any in-flight analysis.
    pub fn logout(&self) {
        forget_token();
        self.client.token().set(None);
        self.analysis.cancel();
        info!("session cleared");
    }

    pub fn teardown(&self) {
        self.analysis.teardown();
    }
}

#[cfg(target_arch = "wasm32")]
fn restore_token() -> Option<String> {
    use gloo_storage::{LocalStorage, Storage};

    LocalStorage::get::<String>(TOKEN_STORAGE_KEY)
        .ok()
        .filter(|token| !token.trim().is_empty())
}

#[cfg(not(target_arch = "wasm32"))]
fn restore_token() -> Option<String> {
    None
}

#[cfg(target_arch = "wasm32")]
fn forget_token() {
    use gloo_storage::{LocalStorage, Storage};

    LocalStorage::delete(TOKEN_STORAGE_KEY);
}

#[cfg(not(target_arch = "wasm32"))]
fn forget_token() {
    tracing::warn!(key = TOKEN_STORAGE_KEY, "browser storage unavailable on this target");
}

use dioxus::prelude::*;
use serde::{Deserialize, Serialize};

pub type AppSignal = Signal<AppState>;

/// Outcome of the last operator action, rendered as a toast.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationState {
    pub last_message: Option<String>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    pub operation: OperationState,
}

#[derive(Clone, Copy)]
pub struct AppActions {
    state: AppSignal,
}

impl AppActions {
    pub fn set_operation_success(&self, context: impl Into<String>, message: impl Into<String>) {
        let mut state = self.state;
        state.write().operation = OperationState {
            last_message: Some(message.into()),
            error: None,
            context: Some(context.into()),
        };
    }

    pub fn set_operation_error(&self, context: impl Into<String>, message: impl Into<String>) {
        let mut state = self.state;
        state.write().operation = OperationState {
            last_message: None,
            error: Some(message.into()),
            context: Some(context.into()),
        };
    }

    pub fn clear_operation_status(&self) {
        let mut state = self.state;
        state.write().operation = OperationState::default();
    }
}

pub fn use_app_state() -> AppSignal {
    use_context::<AppSignal>()
}

pub fn use_app_actions() -> AppActions {
    AppActions {
        state: use_app_state(),
    }
}

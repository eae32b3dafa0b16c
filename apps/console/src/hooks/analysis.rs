use dioxus::prelude::*;
use sentinel_core::{AnalysisController, AnalysisState, SentinelClient};

use crate::session::ConsoleContext;

pub fn use_analysis() -> (AnalysisController<SentinelClient>, Signal<AnalysisState>) {
    let console = use_context::<ConsoleContext>();
    let state = use_context::<Signal<AnalysisState>>();
    (console.analysis, state)
}

#![allow(non_snake_case)]

mod hooks;
mod session;
mod state;
mod ui;

use std::rc::Rc;

use dioxus::prelude::*;
use dioxus_router::prelude::*;
use session::ConsoleContext;
use state::AppState;
use tracing::error;
use ui::analysis::AnalysisPage;
use ui::history::HistoryPage;
use ui::monitor::MonitorPage;
use ui::notifications::NotificationCenter;
use ui::orchestration::{OrchestrationPage, PromoteAnalysis};
use ui::shell::{BootstrapFailure, ConsoleLayout};

fn main() {
    console_error_panic_hook::set_once();
    init_logging();
    launch(App);
}

fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = dioxus_logger::init(tracing::Level::INFO);
    });
}

#[component]
fn App() -> Element {
    let app_state = use_signal(AppState::default);
    use_context_provider(|| app_state);

    let console = use_hook(|| {
        ConsoleContext::init().map_err(|err| {
            error!(?err, status = ?err.status(), "console bootstrap failed");
            err.user_message()
        })
    });

    rsx! {
        div { class: "relative",
            {match console {
                Ok(console) => rsx! { ConsoleRoot { console } },
                Err(message) => rsx! { BootstrapFailure { message } },
            }}
            NotificationCenter {}
        }
    }
}

/// Owns the session for the lifetime of the page and mirrors the shared
/// analysis controller into a signal.
#[component]
fn ConsoleRoot(console: ConsoleContext) -> Element {
    let analysis_state = use_signal({
        let analysis = console.analysis.clone();
        move || analysis.state()
    });

    use_hook({
        let analysis = console.analysis.clone();
        move || {
            let source = analysis.clone();
            analysis.on_change(Rc::new(move || {
                let mut analysis_state = analysis_state;
                analysis_state.set(source.state());
            }));
        }
    });

    use_context_provider(|| analysis_state);
    use_context_provider({
        let console = console.clone();
        move || console
    });

    use_drop(move || console.teardown());

    rsx! {
        Router::<Route> {}
    }
}

#[derive(Clone, Routable, Debug, PartialEq)]
#[rustfmt::skip]
pub(crate) enum Route {
    #[layout(ConsoleLayout)]
        #[route("/")]
        AnalysisPage {},
        #[route("/history")]
        HistoryPage {},
        #[route("/orchestration")]
        OrchestrationPage {},
        #[route("/orchestration/promote/:analysis_id")]
        PromoteAnalysis { analysis_id: String },
        #[route("/monitor")]
        MonitorPage {},
}

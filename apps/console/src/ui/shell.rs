use dioxus::prelude::*;
use dioxus_router::prelude::*;

use crate::session::ConsoleContext;
use crate::state::use_app_actions;
use crate::Route;

#[component]
pub fn ConsoleLayout() -> Element {
    let console = use_context::<ConsoleContext>();
    let actions = use_app_actions();
    let mut authenticated = use_signal({
        let console = console.clone();
        move || console.is_authenticated()
    });

    let api_endpoint = console.config.api_base_url.clone();

    rsx! {
        div { class: "app-shell min-h-screen bg-slate-50",
            header { class: "border-b border-slate-200 bg-white",
                div { class: "mx-auto flex max-w-6xl items-center justify-between px-4 py-3",
                    div { class: "space-y-0.5",
                        h1 { class: "text-lg font-semibold text-slate-900", "Sentinel Console" }
                        p { class: "text-[11px] text-slate-500", "API: {api_endpoint}" }
                    }
                    nav { class: "flex items-center gap-4 text-sm",
                        NavLink { to: Route::AnalysisPage {}, label: "Analyze" }
                        NavLink { to: Route::HistoryPage {}, label: "History" }
                        NavLink { to: Route::OrchestrationPage {}, label: "Orchestration" }
                        NavLink { to: Route::MonitorPage {}, label: "Pipelines" }
                        if authenticated() {
                            button {
                                class: "rounded bg-slate-200 px-2 py-1 text-xs text-slate-700 transition hover:bg-slate-300",
                                onclick: move |_| {
                                    console.logout();
                                    authenticated.set(false);
                                    actions.set_operation_success("Session", "Signed out.");
                                },
                                "Sign out"
                            }
                        }
                    }
                }
            }
            main { class: "mx-auto max-w-6xl space-y-4 px-4 py-6",
                Outlet::<Route> {}
            }
        }
    }
}

#[component]
fn NavLink(to: Route, label: &'static str) -> Element {
    let current = use_route::<Route>();
    let class = if current == to {
        "font-semibold text-slate-900"
    } else {
        "text-slate-500 hover:text-slate-800"
    };

    rsx! {
        Link { class, to, "{label}" }
    }
}

#[component]
pub fn BootstrapFailure(message: String) -> Element {
    rsx! {
        section { class: "mx-auto mt-16 max-w-lg rounded-lg border border-red-200 bg-red-50 p-6 shadow-sm",
            h1 { class: "text-lg font-semibold text-red-700", "Console unavailable" }
            p { class: "mt-2 text-sm text-red-600", "{message}" }
            p { class: "mt-4 text-xs text-slate-500",
                "Check SENTINEL_API_BASE_URL and reload the page."
            }
        }
    }
}

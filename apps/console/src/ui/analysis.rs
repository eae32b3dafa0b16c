use dioxus::prelude::*;
use dioxus_router::prelude::*;
use sentinel_core::models::{AnalysisRecord, MIN_LOG_CHARS, PIPELINE_TYPES};
use sentinel_core::AnalysisPhase;
use tracing::debug;

use crate::hooks::analysis::use_analysis;
use crate::state::use_app_actions;
use crate::ui::notifications::{NoticeBanner, ToastKind};
use crate::Route;

#[component]
pub fn AnalysisPage() -> Element {
    rsx! {
        div { class: "grid gap-4 lg:grid-cols-2",
            SubmitPanel {}
            StatusPanel {}
        }
        ResultPanel {}
    }
}

#[component]
fn SubmitPanel() -> Element {
    let (analysis, state) = use_analysis();
    let actions = use_app_actions();
    let mut pipeline_type = use_signal(|| PIPELINE_TYPES[0].to_string());
    let mut log_text = use_signal(String::new);

    let processing = state.read().phase == AnalysisPhase::Processing;
    let chars = log_text.read().trim().chars().count();

    rsx! {
        section { class: "space-y-3 rounded-lg border border-slate-200 bg-white p-4 shadow-sm",
            h2 { class: "text-base font-semibold text-slate-900", "Analyze build logs" }
            label { class: "block space-y-1 text-xs text-slate-600",
                span { "Pipeline" }
                select {
                    class: "w-full rounded border border-slate-300 px-2 py-1 text-sm",
                    value: "{pipeline_type}",
                    onchange: move |evt| pipeline_type.set(evt.value()),
                    for kind in PIPELINE_TYPES {
                        option { value: kind, "{kind}" }
                    }
                }
            }
            label { class: "block space-y-1 text-xs text-slate-600",
                span { "Log output" }
                textarea {
                    class: "h-48 w-full rounded border border-slate-300 p-2 font-mono text-xs",
                    placeholder: "Paste the failing job output here",
                    value: "{log_text}",
                    oninput: move |evt| log_text.set(evt.value()),
                }
            }
            div { class: "flex items-center justify-between",
                span { class: "text-[11px] text-slate-500", "{chars} characters (minimum {MIN_LOG_CHARS})" }
                button {
                    class: "rounded bg-slate-900 px-3 py-1.5 text-sm text-white transition hover:bg-slate-700 disabled:opacity-50",
                    disabled: processing,
                    onclick: move |_| {
                        if let Err(err) = analysis.start(&pipeline_type.read(), &log_text.read()) {
                            debug!(%err, "analysis not submitted");
                            actions.set_operation_error("Analysis", err.user_message());
                        } else {
                            actions.clear_operation_status();
                        }
                    },
                    if processing { "Analyzing…" } else { "Analyze" }
                }
            }
        }
    }
}

#[component]
fn StatusPanel() -> Element {
    let (analysis, state) = use_analysis();
    let snapshot = state.read().clone();

    let phase_class = match snapshot.phase {
        AnalysisPhase::Idle => "bg-slate-100 text-slate-600",
        AnalysisPhase::Processing => "bg-sky-100 text-sky-700",
        AnalysisPhase::Completed => "bg-emerald-100 text-emerald-700",
        AnalysisPhase::Failed => "bg-red-100 text-red-700",
    };
    let phase_label = snapshot.phase.label();
    let live_status = snapshot.live_status.map(|status| status.label());
    let can_retry = snapshot.can_retry();
    let processing = snapshot.phase == AnalysisPhase::Processing;
    let settled = matches!(snapshot.phase, AnalysisPhase::Completed | AnalysisPhase::Failed);

    let retry = analysis.clone();
    let cancel = analysis.clone();

    rsx! {
        section { class: "space-y-3 rounded-lg border border-slate-200 bg-white p-4 shadow-sm",
            div { class: "flex items-center justify-between",
                h2 { class: "text-base font-semibold text-slate-900", "Status" }
                span { class: format!("rounded px-2 py-0.5 text-[11px] font-semibold {}", phase_class),
                    "{phase_label}"
                }
            }
            if let Some(id) = snapshot.analysis_id.as_ref() {
                p { class: "text-xs text-slate-500",
                    "Analysis "
                    span { class: "font-mono", "{id}" }
                }
            }
            if let Some(status) = live_status {
                p { class: "text-xs text-slate-600", "Server status: {status}" }
            }
            if snapshot.loading_history {
                p { class: "text-xs text-slate-500", "Loading stored report…" }
            }
            if let Some(error) = snapshot.error.clone() {
                NoticeBanner { kind: ToastKind::Error, message: error }
            }
            div { class: "flex gap-2",
                if processing {
                    button {
                        class: "rounded bg-slate-200 px-3 py-1 text-xs text-slate-700 hover:bg-slate-300",
                        onclick: move |_| cancel.cancel(),
                        "Cancel"
                    }
                }
                if can_retry {
                    button {
                        class: "rounded bg-amber-500 px-3 py-1 text-xs text-white hover:bg-amber-600",
                        onclick: move |_| {
                            retry.retry();
                        },
                        "Retry"
                    }
                }
                if settled {
                    button {
                        class: "rounded bg-slate-200 px-3 py-1 text-xs text-slate-700 hover:bg-slate-300",
                        onclick: move |_| analysis.reset(),
                        "New analysis"
                    }
                }
            }
        }
    }
}

#[component]
fn ResultPanel() -> Element {
    let (_, state) = use_analysis();
    let Some(record) = state.read().result.clone() else {
        return rsx! { Fragment {} };
    };

    rsx! {
        ReportCard { record }
    }
}

#[component]
fn ReportCard(record: AnalysisRecord) -> Element {
    let category = record
        .error_category
        .map(|category| category.as_str())
        .unwrap_or("UNCATEGORIZED");
    let confidence = record
        .confidence_percent()
        .map(|value| format!("{value}%"))
        .unwrap_or_else(|| "n/a".to_string());
    let created = record.created_label();
    let summary = record.summary.clone().unwrap_or_default();
    let root_cause = record
        .root_cause
        .clone()
        .unwrap_or_else(|| "No root cause reported.".to_string());

    rsx! {
        section { class: "space-y-3 rounded-lg border border-slate-200 bg-white p-4 shadow-sm",
            div { class: "flex flex-wrap items-center justify-between gap-2",
                h2 { class: "text-base font-semibold text-slate-900", "Report" }
                div { class: "flex items-center gap-2 text-[11px] text-slate-500",
                    span { class: "rounded bg-slate-100 px-2 py-0.5 font-mono", "{category}" }
                    span { "{record.pipeline_type}" }
                    span { "confidence {confidence}" }
                    span { "{created}" }
                }
            }
            if !summary.is_empty() {
                p { class: "text-sm text-slate-700", "{summary}" }
            }
            div { class: "space-y-1",
                h3 { class: "text-xs font-semibold uppercase text-slate-500", "Root cause" }
                p { class: "text-sm text-slate-800", "{root_cause}" }
            }
            if !record.fixes().is_empty() {
                div { class: "space-y-1",
                    h3 { class: "text-xs font-semibold uppercase text-slate-500", "Suggested fixes" }
                    ol { class: "list-decimal space-y-1 pl-5 text-sm text-slate-700",
                        for fix in record.fixes().iter() {
                            li { "{fix}" }
                        }
                    }
                }
            }
            div { class: "flex justify-end",
                Link {
                    class: "rounded bg-slate-900 px-3 py-1 text-xs text-white hover:bg-slate-700",
                    to: Route::PromoteAnalysis { analysis_id: record.id.clone() },
                    "Send to orchestration"
                }
            }
        }
    }
}

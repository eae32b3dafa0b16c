use std::rc::Rc;

use dioxus::prelude::*;
use sentinel_core::models::{format_timestamp, PipelineExecution, PipelineStatus, PulseEvent};

use crate::hooks::monitor::use_pipeline_monitor;

#[component]
pub fn MonitorPage() -> Element {
    let (monitor, tick) = use_pipeline_monitor();

    let _ = tick();
    let stats = monitor.stats();
    let pipelines = monitor.pipelines();
    let pulse = monitor.pulse();
    let connected = monitor.is_connected();
    let can_reconnect = monitor.can_reconnect();
    let link_label = if connected { "Stream connected" } else { "Stream offline" };
    let reconnect = {
        let monitor = monitor.clone();
        move |_: MouseEvent| monitor.reconnect()
    };

    rsx! {
        div { class: "grid gap-3 sm:grid-cols-4",
            StatCard { label: "Pipelines", value: stats.total.to_string() }
            StatCard { label: "Running", value: stats.running.to_string() }
            StatCard { label: "Failed", value: stats.failed.to_string() }
            StatCard { label: "Success rate", value: format!("{}%", stats.success_rate) }
        }
        div { class: "grid gap-4 lg:grid-cols-3",
            section { class: "space-y-3 rounded-lg border border-slate-200 bg-white p-4 shadow-sm lg:col-span-2",
                div { class: "flex items-center justify-between",
                    h2 { class: "text-base font-semibold text-slate-900", "Pipeline executions" }
                    div { class: "flex items-center gap-2",
                        span { class: "text-[11px] text-slate-500", "{link_label}" }
                        if can_reconnect {
                            button {
                                class: "rounded bg-slate-100 px-2 py-1 text-xs text-slate-700 hover:bg-slate-200",
                                onclick: reconnect,
                                "Reconnect"
                            }
                        }
                    }
                }
                if pipelines.is_empty() {
                    p { class: "text-xs text-slate-500", "Waiting for pipeline telemetry…" }
                }
                table { class: "w-full text-left text-sm",
                    tbody {
                        for execution in pipelines {
                            PipelineRow { key: "{execution.id}", execution }
                        }
                    }
                }
            }
            section { class: "space-y-3 rounded-lg border border-slate-200 bg-white p-4 shadow-sm",
                h2 { class: "text-base font-semibold text-slate-900", "System pulse" }
                ul { class: "space-y-2",
                    for (idx, event) in pulse.into_iter().enumerate() {
                        PulseItem { key: "{idx}", event }
                    }
                }
            }
        }
    }
}

#[component]
fn StatCard(label: &'static str, value: String) -> Element {
    rsx! {
        div { class: "rounded-lg border border-slate-200 bg-white p-3 shadow-sm",
            p { class: "text-[11px] uppercase text-slate-500", "{label}" }
            p { class: "text-xl font-semibold text-slate-900", "{value}" }
        }
    }
}

#[component]
fn PipelineRow(execution: Rc<PipelineExecution>) -> Element {
    let (status, badge) = match execution.status {
        PipelineStatus::Processing => ("RUNNING", "bg-sky-100 text-sky-700"),
        PipelineStatus::Completed => ("SUCCESS", "bg-emerald-100 text-emerald-700"),
        PipelineStatus::Failed => ("FAILED", "bg-red-100 text-red-700"),
    };
    let load_class = if execution.is_hot() {
        "font-mono text-xs text-red-600"
    } else {
        "font-mono text-xs text-slate-600"
    };
    let short_id = execution.short_id();
    let cpu = format!("{:.0}%", execution.cpu_usage);
    let mem = format!("{:.0}%", execution.mem_usage);
    let started = format_timestamp(&execution.start_time);
    let root_cause = execution
        .analysis
        .as_ref()
        .map(|analysis| analysis.root_cause.clone())
        .filter(|cause| !cause.is_empty());

    rsx! {
        tr { class: "border-t border-slate-100 align-top",
            td { class: "py-2",
                p { class: "font-medium text-slate-800", "{execution.pipeline_name}" }
                p { class: "font-mono text-[11px] text-slate-500", "{short_id} · {execution.commit_id}" }
                if let Some(cause) = root_cause {
                    p { class: "text-[11px] text-red-600", "{cause}" }
                }
            }
            td { class: "py-2",
                span { class: format!("rounded px-2 py-0.5 text-[11px] font-semibold {}", badge), "{status}" }
            }
            td { class: "py-2 {load_class}", "cpu {cpu} · mem {mem}" }
            td { class: "py-2 text-[11px] text-slate-500", "{started}" }
        }
    }
}

#[component]
fn PulseItem(event: PulseEvent) -> Element {
    let when = event.timestamp.as_deref().map(format_timestamp).unwrap_or_default();

    rsx! {
        li { class: "rounded border border-slate-100 p-2",
            div { class: "flex items-center justify-between text-[11px] text-slate-500",
                span { class: "font-semibold uppercase", "{event.kind}" }
                span { "{when}" }
            }
            p { class: "text-xs text-slate-700", "{event.message}" }
            if let Some(detail) = event.detail.as_ref() {
                p { class: "text-[11px] text-slate-500", "{detail}" }
            }
        }
    }
}

use dioxus::prelude::*;
use sentinel_core::models::TaskStatus;
use sentinel_core::{OrchestrationController, SentinelClient, TaskRow};

use crate::hooks::orchestration::use_orchestration;
use crate::state::use_app_actions;
use crate::ui::notifications::{NoticeBanner, ToastKind};

#[component]
pub fn OrchestrationPage() -> Element {
    rsx! {
        OrchestrationBoard { promote: None }
    }
}

/// Promotes a finished analysis into an orchestration task, then shows the
/// board.
#[component]
pub fn PromoteAnalysis(analysis_id: String) -> Element {
    rsx! {
        OrchestrationBoard { promote: Some(analysis_id) }
    }
}

fn status_classes(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "bg-slate-100 text-slate-600",
        TaskStatus::InProgress => "bg-sky-100 text-sky-700",
        TaskStatus::Completed => "bg-emerald-100 text-emerald-700",
        TaskStatus::Failed => "bg-red-100 text-red-700",
    }
}

#[component]
fn OrchestrationBoard(promote: Option<String>) -> Element {
    let (controller, tick) = use_orchestration();
    let actions = use_app_actions();
    let mut focused = use_signal(|| None::<String>);

    use_effect({
        let controller = controller.clone();
        let promote = promote.clone();
        move || {
            if let Some(analysis_id) = promote.as_deref() {
                controller.promote(analysis_id);
                actions.set_operation_success(
                    "Orchestration",
                    format!("Promotion requested for analysis {analysis_id}."),
                );
            }
        }
    });

    let _ = tick();
    let rows = controller.tasks();
    let loading = controller.is_loading();
    let live = controller.is_live();
    let pull_error = controller.pull_error();
    let notice = controller.notice();
    let focused_id = focused();
    let (live_dot, live_title) = if live {
        ("h-2 w-2 rounded-full bg-emerald-500", "Live")
    } else {
        ("h-2 w-2 rounded-full bg-slate-300", "Offline")
    };

    let dismiss = {
        let controller = controller.clone();
        move |_: MouseEvent| controller.dismiss_notice()
    };
    let refresh = {
        let controller = controller.clone();
        move |_: MouseEvent| controller.refresh()
    };
    let on_trigger = {
        let controller = controller.clone();
        move |task_id: String| {
            controller.trigger_fix(&task_id);
            focused.set(Some(task_id));
        }
    };
    let on_kill = {
        let controller = controller.clone();
        move |task_id: String| controller.force_kill(&task_id)
    };
    let on_focus = move |task_id: String| focused.set(Some(task_id));

    rsx! {
        section { class: "space-y-4 rounded-lg border border-slate-200 bg-white p-4 shadow-sm",
            div { class: "flex items-center justify-between",
                div { class: "flex items-center gap-2",
                    h2 { class: "text-base font-semibold text-slate-900", "Remediation tasks" }
                    span { class: live_dot, title: live_title }
                }
                button {
                    class: "rounded bg-slate-100 px-2 py-1 text-xs text-slate-700 hover:bg-slate-200",
                    onclick: refresh,
                    "Refresh"
                }
            }
            if let Some(message) = notice {
                NoticeBanner { kind: ToastKind::Warning, message, on_dismiss: dismiss }
            }
            if let Some(error) = pull_error {
                NoticeBanner { kind: ToastKind::Error, message: error }
            }
            if loading && rows.is_empty() {
                p { class: "text-xs text-slate-500", "Loading tasks…" }
            } else if rows.is_empty() {
                p { class: "text-xs text-slate-500", "No active tasks." }
            }
            ul { class: "divide-y divide-slate-100",
                for row in rows {
                    TaskItem {
                        key: "{row.task.id}",
                        focused: focused_id.as_deref() == Some(row.task.id.as_str()),
                        row: row.clone(),
                        on_trigger: on_trigger.clone(),
                        on_kill: on_kill.clone(),
                        on_focus: on_focus.clone(),
                    }
                }
            }
        }
        if let Some(task_id) = focused_id {
            LiveConsole { controller, task_id, tick: tick() }
        }
    }
}

#[component]
fn TaskItem(
    row: TaskRow,
    focused: bool,
    on_trigger: EventHandler<String>,
    on_kill: EventHandler<String>,
    on_focus: EventHandler<String>,
) -> Element {
    let task = &row.task;
    let status_label = row.status.label();
    let badge = status_classes(row.status);
    let priority = format!("{:?}", task.priority).to_uppercase();
    let running = row.status == TaskStatus::InProgress;
    let trigger_id = task.id.clone();
    let kill_id = task.id.clone();
    let focus_id = task.id.clone();
    let item_class = if focused {
        "flex items-center justify-between gap-3 bg-slate-50 py-2"
    } else {
        "flex items-center justify-between gap-3 py-2"
    };

    rsx! {
        li { class: item_class,
            button {
                class: "min-w-0 flex-1 space-y-0.5 text-left",
                onclick: move |_| on_focus.call(focus_id.clone()),
                p { class: "truncate text-sm font-medium text-slate-800", "{task.task_identity}" }
                p { class: "text-[11px] text-slate-500",
                    "{task.request_id} · {priority} · {task.collaborator} · {task.time_ago}"
                }
            }
            span { class: format!("rounded px-2 py-0.5 text-[11px] font-semibold {}", badge), "{status_label}" }
            if row.locked {
                span { class: "text-[11px] text-sky-600", "executing" }
            }
            div { class: "flex gap-2",
                button {
                    class: "rounded bg-slate-900 px-2 py-1 text-xs text-white hover:bg-slate-700 disabled:opacity-40",
                    disabled: row.locked,
                    onclick: move |_| on_trigger.call(trigger_id.clone()),
                    "Trigger fix"
                }
                if running || row.locked {
                    button {
                        class: "rounded bg-red-600 px-2 py-1 text-xs text-white hover:bg-red-700",
                        onclick: move |_| on_kill.call(kill_id.clone()),
                        "Force kill"
                    }
                }
            }
        }
    }
}

#[derive(Props, Clone)]
struct LiveConsoleProps {
    controller: OrchestrationController<SentinelClient>,
    task_id: String,
    /// Re-renders the console whenever the controller moves.
    tick: u64,
}

impl PartialEq for LiveConsoleProps {
    fn eq(&self, other: &Self) -> bool {
        self.task_id == other.task_id && self.tick == other.tick
    }
}

#[component]
fn LiveConsole(props: LiveConsoleProps) -> Element {
    let lines = props.controller.logs(&props.task_id);
    let status = props
        .controller
        .displayed_status(&props.task_id)
        .map(TaskStatus::label)
        .unwrap_or("UNKNOWN");

    rsx! {
        section { class: "space-y-2 rounded-lg border border-slate-800 bg-slate-950 p-4 shadow-sm",
            div { class: "flex items-center justify-between text-[11px] text-slate-400",
                span { class: "font-mono", "{props.task_id}" }
                span { "{status}" }
            }
            pre { class: "max-h-80 overflow-y-auto whitespace-pre-wrap font-mono text-xs text-emerald-300",
                if lines.is_empty() {
                    span { class: "text-slate-500", "Waiting for agent output…" }
                }
                for (idx, line) in lines.into_iter().enumerate() {
                    div { key: "{idx}", "{line}" }
                }
            }
        }
    }
}

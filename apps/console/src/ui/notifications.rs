use crate::state::{use_app_actions, use_app_state};
use dioxus::prelude::*;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
    Warning,
}

impl ToastKind {
    fn accent_classes(self) -> (&'static str, &'static str) {
        match self {
            Self::Success => ("border-emerald-500 bg-emerald-50", "text-emerald-700"),
            Self::Error => ("border-red-500 bg-red-50", "text-red-700"),
            Self::Warning => ("border-amber-500 bg-amber-50", "text-amber-700"),
        }
    }
}

#[derive(Props, Clone, PartialEq)]
pub struct ToastProps {
    pub kind: ToastKind,
    pub title: String,
    pub message: String,
    #[props(optional)]
    pub on_close: Option<EventHandler<MouseEvent>>,
}

#[component]
pub fn Toast(props: ToastProps) -> Element {
    let (container_class, accent_text) = props.kind.accent_classes();

    rsx! {
        div { class: format!("pointer-events-auto rounded-lg border-l-4 p-4 shadow-lg {}", container_class),
            div { class: "flex items-start justify-between gap-4",
                div { class: "space-y-1",
                    h3 { class: format!("text-sm font-semibold {}", accent_text), "{props.title}" }
                    p { class: "text-xs text-slate-700", "{props.message}" }
                }
                if let Some(handler) = props.on_close {
                    button {
                        class: "rounded bg-slate-200 px-2 py-1 text-[11px] text-slate-600 transition hover:bg-slate-300",
                        onclick: move |evt| handler.call(evt),
                        "Close"
                    }
                }
            }
        }
    }
}

/// Inline banner for controller notices that stay attached to a panel.
#[component]
pub fn NoticeBanner(kind: ToastKind, message: String, on_dismiss: Option<EventHandler<MouseEvent>>) -> Element {
    let (container_class, accent_text) = kind.accent_classes();

    rsx! {
        div { class: format!("flex items-center justify-between rounded border-l-4 px-3 py-2 {}", container_class),
            p { class: format!("text-xs {}", accent_text), "{message}" }
            if let Some(handler) = on_dismiss {
                button {
                    class: "text-[11px] text-slate-500 hover:text-slate-700",
                    onclick: move |evt| handler.call(evt),
                    "Dismiss"
                }
            }
        }
    }
}

#[component]
pub fn NotificationCenter() -> Element {
    let actions = use_app_actions();
    let operation = use_app_state().read().operation.clone();

    let toast = if let Some(error) = operation.error {
        Some((
            ToastKind::Error,
            operation.context.unwrap_or_else(|| "Operation failed".to_string()),
            error,
        ))
    } else {
        operation.last_message.map(|message| {
            (
                ToastKind::Success,
                operation.context.unwrap_or_else(|| "Done".to_string()),
                message,
            )
        })
    };

    let Some((kind, title, message)) = toast else {
        return rsx! { Fragment {} };
    };

    rsx! {
        div { class: "pointer-events-none fixed right-4 top-4 z-50 flex w-80 flex-col gap-3",
            Toast {
                kind,
                title,
                message,
                on_close: move |_| actions.clear_operation_status(),
            }
        }
    }
}

use std::rc::Rc;

use dioxus::prelude::*;
use dioxus_router::prelude::*;
use sentinel_core::models::{AnalysisRecord, ErrorCategory, SearchFilters, PIPELINE_TYPES};

use crate::hooks::analysis::use_analysis;
use crate::hooks::history::use_history;
use crate::ui::notifications::{NoticeBanner, ToastKind};
use crate::Route;

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|value| !value.is_empty())
}

#[component]
pub fn HistoryPage() -> Element {
    let (browser, tick) = use_history();
    let (analysis, _) = use_analysis();
    let navigator = use_navigator();
    let mut category = use_signal(String::new);
    let mut pipeline = use_signal(String::new);

    let _ = tick();
    let records = browser.records();
    let filters = browser.filters();
    let page_label = browser.page_label();
    let selected_count = browser.selected().len();
    let loading = browser.is_loading();
    let pull_error = browser.pull_error();
    let notice = browser.notice();
    let has_previous = browser.has_previous();
    let has_next = browser.has_next();

    let search = {
        let browser = browser.clone();
        move |_: MouseEvent| {
            browser.search(SearchFilters {
                error_category: non_empty(category()),
                pipeline_type: non_empty(pipeline()),
                ..SearchFilters::default()
            });
        }
    };
    let previous = {
        let browser = browser.clone();
        let filters = filters.clone();
        move |_: MouseEvent| {
            browser.search(SearchFilters {
                page: filters.page.saturating_sub(1),
                ..filters.clone()
            });
        }
    };
    let next = {
        let browser = browser.clone();
        let filters = filters.clone();
        move |_: MouseEvent| {
            browser.search(SearchFilters {
                page: filters.page + 1,
                ..filters.clone()
            });
        }
    };
    let load_more = {
        let browser = browser.clone();
        move |_: MouseEvent| {
            browser.load_more();
        }
    };
    let delete = {
        let browser = browser.clone();
        move |_: MouseEvent| browser.delete_selected()
    };
    let clear = {
        let browser = browser.clone();
        move |_: MouseEvent| browser.clear_selection()
    };
    let on_view = {
        let browser = browser.clone();
        move |id: String| {
            browser.view(&id, &analysis);
            navigator.push(Route::AnalysisPage {});
        }
    };
    let on_toggle = {
        let browser = browser.clone();
        move |id: String| browser.toggle_selected(&id)
    };

    rsx! {
        section { class: "space-y-4 rounded-lg border border-slate-200 bg-white p-4 shadow-sm",
            div { class: "flex flex-wrap items-end gap-3",
                h2 { class: "mr-auto text-base font-semibold text-slate-900", "Analysis history" }
                label { class: "space-y-1 text-xs text-slate-600",
                    span { class: "block", "Category" }
                    select {
                        class: "rounded border border-slate-300 px-2 py-1 text-sm",
                        value: "{category}",
                        onchange: move |evt| category.set(evt.value()),
                        option { value: "", "Any" }
                        for item in ErrorCategory::ALL.map(ErrorCategory::as_str) {
                            option { value: item, "{item}" }
                        }
                    }
                }
                label { class: "space-y-1 text-xs text-slate-600",
                    span { class: "block", "Pipeline" }
                    select {
                        class: "rounded border border-slate-300 px-2 py-1 text-sm",
                        value: "{pipeline}",
                        onchange: move |evt| pipeline.set(evt.value()),
                        option { value: "", "Any" }
                        for kind in PIPELINE_TYPES {
                            option { value: kind, "{kind}" }
                        }
                    }
                }
                button {
                    class: "rounded bg-slate-900 px-3 py-1.5 text-sm text-white hover:bg-slate-700",
                    onclick: search,
                    "Search"
                }
                button {
                    class: "rounded bg-red-600 px-3 py-1.5 text-sm text-white hover:bg-red-700 disabled:opacity-50",
                    disabled: selected_count == 0,
                    onclick: delete,
                    "Delete selected ({selected_count})"
                }
                button {
                    class: "rounded bg-slate-100 px-3 py-1.5 text-sm text-slate-700 hover:bg-slate-200 disabled:opacity-50",
                    disabled: selected_count == 0,
                    onclick: clear,
                    "Clear"
                }
            }
            if let Some(error) = pull_error {
                NoticeBanner { kind: ToastKind::Error, message: error }
            }
            if let Some(message) = notice {
                NoticeBanner { kind: ToastKind::Warning, message }
            }
            if loading {
                p { class: "text-xs text-slate-500", "Loading…" }
            }
            table { class: "w-full text-left text-sm",
                thead { class: "text-[11px] uppercase text-slate-500",
                    tr {
                        th { class: "w-8" }
                        th { "Created" }
                        th { "Pipeline" }
                        th { "Category" }
                        th { "Status" }
                        th { "Confidence" }
                        th {}
                    }
                }
                tbody {
                    for record in records {
                        HistoryRow {
                            key: "{record.id}",
                            checked: browser.is_selected(&record.id),
                            record: Rc::clone(&record),
                            on_toggle: on_toggle.clone(),
                            on_view: on_view.clone(),
                        }
                    }
                }
            }
            div { class: "flex items-center justify-between text-xs text-slate-600",
                button {
                    class: "rounded bg-slate-100 px-2 py-1 disabled:opacity-40",
                    disabled: !has_previous,
                    onclick: previous,
                    "Previous"
                }
                span { "{page_label}" }
                div { class: "flex gap-2",
                    button {
                        class: "rounded bg-slate-100 px-2 py-1 disabled:opacity-40",
                        disabled: !has_next,
                        onclick: load_more,
                        "Load more"
                    }
                    button {
                        class: "rounded bg-slate-100 px-2 py-1 disabled:opacity-40",
                        disabled: !has_next,
                        onclick: next,
                        "Next"
                    }
                }
            }
        }
    }
}

#[component]
fn HistoryRow(
    record: Rc<AnalysisRecord>,
    checked: bool,
    on_toggle: EventHandler<String>,
    on_view: EventHandler<String>,
) -> Element {
    let category = record
        .error_category
        .map(|category| category.as_str())
        .unwrap_or("-");
    let confidence = record
        .confidence_percent()
        .map(|value| format!("{value}%"))
        .unwrap_or_else(|| "-".to_string());
    let created = record.created_label();
    let status = record.status.label();
    let toggle_id = record.id.clone();
    let view_id = record.id.clone();

    rsx! {
        tr { class: "border-t border-slate-100",
            td {
                input {
                    r#type: "checkbox",
                    checked,
                    onchange: move |_| on_toggle.call(toggle_id.clone()),
                }
            }
            td { class: "text-xs text-slate-500", "{created}" }
            td { "{record.pipeline_type}" }
            td { class: "font-mono text-xs", "{category}" }
            td { class: "text-xs", "{status}" }
            td { class: "text-xs", "{confidence}" }
            td { class: "text-right",
                button {
                    class: "text-xs text-sky-700 hover:underline",
                    onclick: move |_| on_view.call(view_id.clone()),
                    "View"
                }
            }
        }
    }
}

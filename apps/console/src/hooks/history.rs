use std::rc::Rc;

use dioxus::prelude::*;
use sentinel_core::models::SearchFilters;
use sentinel_core::{HistoryBrowser, SentinelClient};

use super::use_change_tick;
use crate::session::ConsoleContext;

pub fn use_history() -> (HistoryBrowser<SentinelClient>, Signal<u64>) {
    let console = use_context::<ConsoleContext>();
    let browser = use_hook(move || HistoryBrowser::new(Rc::clone(&console.client), console.runtime.clone()));

    let tick = use_change_tick({
        let browser = browser.clone();
        move |listener| browser.on_change(listener)
    });

    use_effect({
        let browser = browser.clone();
        move || browser.search(SearchFilters::default())
    });

    use_drop({
        let browser = browser.clone();
        move || browser.teardown()
    });

    (browser, tick)
}

use std::rc::Rc;

use dioxus::prelude::*;
use sentinel_core::{OrchestrationController, SentinelClient};

use super::use_change_tick;
use super::visibility::use_visibility_regained;
use crate::session::ConsoleContext;

/// Orchestration controller scoped to the calling component: mounted after
/// the first render, re-synced whenever the tab comes back, torn down on
/// unmount.
pub fn use_orchestration() -> (OrchestrationController<SentinelClient>, Signal<u64>) {
    let console = use_context::<ConsoleContext>();
    let controller = use_hook(move || {
        OrchestrationController::new(
            Rc::clone(&console.client),
            console.runtime.clone(),
            console.config.resync_delay,
            console.config.log_buffer_lines,
        )
    });

    let tick = use_change_tick({
        let controller = controller.clone();
        move |listener| controller.on_change(listener)
    });

    use_effect({
        let controller = controller.clone();
        move || controller.mount()
    });

    use_visibility_regained({
        let controller = controller.clone();
        move || controller.on_visibility_regained()
    });

    use_drop({
        let controller = controller.clone();
        move || controller.teardown()
    });

    (controller, tick)
}

use dioxus::prelude::*;
use sentinel_core::PipelineMonitor;

use super::use_change_tick;
use crate::session::ConsoleContext;

pub fn use_pipeline_monitor() -> (PipelineMonitor, Signal<u64>) {
    let console = use_context::<ConsoleContext>();
    let monitor = use_hook(move || PipelineMonitor::new(&console.runtime));

    let tick = use_change_tick({
        let monitor = monitor.clone();
        move |listener| monitor.on_change(listener)
    });

    use_effect({
        let monitor = monitor.clone();
        move || monitor.mount()
    });

    use_drop({
        let monitor = monitor.clone();
        move || monitor.teardown()
    });

    (monitor, tick)
}

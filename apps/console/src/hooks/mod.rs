pub mod analysis;
pub mod history;
pub mod monitor;
pub mod orchestration;
pub mod visibility;

use std::rc::Rc;

use dioxus::prelude::*;

/// Mirrors a controller's change notifications into a signal. Components
/// read the tick to subscribe, then pull whatever they render from the
/// controller.
pub(crate) fn use_change_tick(register: impl FnOnce(Rc<dyn Fn()>)) -> Signal<u64> {
    let tick = use_signal(|| 0u64);
    use_hook(move || {
        register(Rc::new(move || {
            let mut tick = tick;
            *tick.write() += 1;
        }));
    });
    tick
}

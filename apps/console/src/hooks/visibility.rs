/// Calls `on_regained` when the document becomes visible again or the
/// window regains focus. Listeners are detached when the component unmounts.
#[cfg(target_arch = "wasm32")]
pub fn use_visibility_regained(on_regained: impl Fn() + 'static) {
    use std::cell::RefCell;
    use std::rc::Rc;

    use dioxus::prelude::*;

    let guard = use_hook(move || Rc::new(RefCell::new(listener::VisibilityListener::attach(on_regained))));
    use_drop(move || {
        guard.borrow_mut().take();
    });
}

#[cfg(not(target_arch = "wasm32"))]
pub fn use_visibility_regained(_on_regained: impl Fn() + 'static) {}

#[cfg(target_arch = "wasm32")]
mod listener {
    use std::rc::Rc;

    use tracing::{debug, warn};
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::JsCast;
    use web_sys::{Document, Event, VisibilityState, Window};

    pub struct VisibilityListener {
        window: Window,
        document: Document,
        on_visibility: Closure<dyn FnMut(Event)>,
        on_focus: Closure<dyn FnMut(Event)>,
    }

    impl VisibilityListener {
        pub fn attach(on_regained: impl Fn() + 'static) -> Option<Self> {
            let Some(window) = web_sys::window() else {
                warn!("no window, visibility re-sync disabled");
                return None;
            };
            let Some(document) = window.document() else {
                warn!("no document, visibility re-sync disabled");
                return None;
            };

            let on_regained = Rc::new(on_regained);
            let visibility_doc = document.clone();
            let on_visible = Rc::clone(&on_regained);
            let on_visibility = Closure::wrap(Box::new(move |_event: Event| {
                if visibility_doc.visibility_state() == VisibilityState::Visible {
                    debug!("document visible again");
                    on_visible();
                }
            }) as Box<dyn FnMut(Event)>);
            let on_focus = Closure::wrap(Box::new(move |_event: Event| {
                debug!("window focused");
                on_regained();
            }) as Box<dyn FnMut(Event)>);

            if let Err(err) = document.add_event_listener_with_callback(
                "visibilitychange",
                on_visibility.as_ref().unchecked_ref(),
            ) {
                warn!(?err, "failed to attach visibilitychange listener");
            }
            if let Err(err) =
                window.add_event_listener_with_callback("focus", on_focus.as_ref().unchecked_ref())
            {
                warn!(?err, "failed to attach focus listener");
            }

            Some(Self {
                window,
                document,
                on_visibility,
                on_focus,
            })
        }
    }

    impl Drop for VisibilityListener {
        fn drop(&mut self) {
            if let Err(err) = self.document.remove_event_listener_with_callback(
                "visibilitychange",
                self.on_visibility.as_ref().unchecked_ref(),
            ) {
                warn!(?err, "failed to detach visibilitychange listener");
            }
            if let Err(err) = self
                .window
                .remove_event_listener_with_callback("focus", self.on_focus.as_ref().unchecked_ref())
            {
                warn!(?err, "failed to detach focus listener");
            }
        }
    }
}

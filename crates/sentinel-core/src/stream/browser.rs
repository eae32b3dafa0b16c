//! Browser-backed transport, timers and spawner. Host builds get stubs so the core
//! still links for tests and tooling.

use std::rc::Rc;

use futures::task::LocalSpawn;

use super::{Scheduler, StreamTransport};

pub fn browser_transport() -> Rc<dyn StreamTransport> {
    Rc::new(EventSourceTransport)
}

pub fn browser_scheduler() -> Rc<dyn Scheduler> {
    Rc::new(TimeoutScheduler)
}

pub fn browser_spawner() -> Rc<dyn LocalSpawn> {
    Rc::new(BrowserSpawner)
}

pub struct EventSourceTransport;

pub struct TimeoutScheduler;

/// Runs local futures on the browser microtask queue.
#[derive(Clone, Copy, Debug, Default)]
pub struct BrowserSpawner;

#[cfg(target_arch = "wasm32")]
mod wasm {
    use std::rc::Rc;
    use std::time::Duration;

    use futures::future::LocalFutureObj;
    use futures::task::{LocalSpawn, SpawnError};
    use gloo_timers::callback::Timeout;
    use tracing::{debug, warn};
    use wasm_bindgen::{closure::Closure, JsCast, JsValue};
    use web_sys::{Event, EventSource, MessageEvent};

    use super::{BrowserSpawner, EventSourceTransport, TimeoutScheduler};
    use crate::stream::{
        ScheduledTask, Scheduler, StreamCallbacks, StreamConnection, StreamError, StreamFrame,
        StreamRequest, StreamTransport,
    };

    struct EventSourceConnection {
        source: EventSource,
        _on_open: Closure<dyn FnMut(Event)>,
        _on_error: Closure<dyn FnMut(Event)>,
        listeners: Vec<(&'static str, Closure<dyn FnMut(MessageEvent)>)>,
    }

    impl StreamConnection for EventSourceConnection {
        fn close(&self) {
            self.source.close();
            self.source.set_onopen(None);
            self.source.set_onerror(None);
            for (name, listener) in &self.listeners {
                if let Err(err) = self
                    .source
                    .remove_event_listener_with_callback(name, listener.as_ref().unchecked_ref())
                {
                    warn!(event = %name, err = %js_value_to_string(&err), "failed to detach stream listener");
                }
            }
            debug!(url = %self.source.url(), "event source closed");
        }
    }

    impl Drop for EventSourceConnection {
        fn drop(&mut self) {
            self.close();
        }
    }

    impl StreamTransport for EventSourceTransport {
        fn open(
            &self,
            request: &StreamRequest,
            callbacks: StreamCallbacks,
        ) -> Result<Box<dyn StreamConnection>, StreamError> {
            if request.url.trim().is_empty() {
                return Err(StreamError::Transport("stream url is empty".into()));
            }

            let source = EventSource::new(&request.url)
                .map_err(|err| StreamError::Transport(js_value_to_string(&err)))?;
            let callbacks = Rc::new(callbacks);

            let cb = Rc::clone(&callbacks);
            let on_open = Closure::wrap(Box::new(move |_evt: Event| {
                (cb.on_open)();
            }) as Box<dyn FnMut(_)>);
            source.set_onopen(Some(on_open.as_ref().unchecked_ref()));

            // The client owns reconnects, so the browser's own retry is cut
            // off by closing as soon as an error surfaces.
            let cb = Rc::clone(&callbacks);
            let on_error = Closure::wrap(Box::new(move |evt: Event| {
                if let Some(target) = evt.target().and_then(|t| t.dyn_into::<EventSource>().ok()) {
                    target.close();
                }
                (cb.on_error)("event source connection interrupted".into());
            }) as Box<dyn FnMut(_)>);
            source.set_onerror(Some(on_error.as_ref().unchecked_ref()));

            let mut listeners = Vec::with_capacity(request.event_names.len());
            for &name in request.event_names {
                let cb = Rc::clone(&callbacks);
                let listener = Closure::wrap(Box::new(move |evt: MessageEvent| {
                    (cb.on_message)(StreamFrame {
                        event: Some(name.to_string()),
                        data: message_data(&evt),
                    });
                }) as Box<dyn FnMut(_)>);
                source
                    .add_event_listener_with_callback(name, listener.as_ref().unchecked_ref())
                    .map_err(|err| StreamError::Transport(js_value_to_string(&err)))?;
                listeners.push((name, listener));
            }

            debug!(url = %request.url, "event source opened");
            Ok(Box::new(EventSourceConnection {
                source,
                _on_open: on_open,
                _on_error: on_error,
                listeners,
            }))
        }
    }

    impl ScheduledTask for Timeout {
        fn cancel(self: Box<Self>) {
            let _ = Timeout::cancel(*self);
        }
    }

    impl Scheduler for TimeoutScheduler {
        fn schedule(
            &self,
            delay: Duration,
            task: Box<dyn FnOnce() + 'static>,
        ) -> Box<dyn ScheduledTask> {
            let millis = u32::try_from(delay.as_millis()).unwrap_or(u32::MAX);
            Box::new(Timeout::new(millis, task))
        }
    }

    impl LocalSpawn for BrowserSpawner {
        fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
            wasm_bindgen_futures::spawn_local(future);
            Ok(())
        }
    }

    fn message_data(evt: &MessageEvent) -> String {
        match evt.data() {
            val if val.is_string() => val.as_string().unwrap_or_default(),
            val => js_sys::JSON::stringify(&val)
                .ok()
                .and_then(|js| js.as_string())
                .unwrap_or_else(|| String::from("null")),
        }
    }

    fn js_value_to_string(value: &JsValue) -> String {
        if let Some(text) = value.as_string() {
            return text;
        }
        js_sys::JSON::stringify(value)
            .ok()
            .and_then(|js| js.as_string())
            .unwrap_or_else(|| "unknown error".into())
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod host {
    use std::time::Duration;

    use futures::future::LocalFutureObj;
    use futures::task::{LocalSpawn, SpawnError};
    use tracing::warn;

    use super::{BrowserSpawner, EventSourceTransport, TimeoutScheduler};
    use crate::stream::{
        ScheduledTask, Scheduler, StreamCallbacks, StreamConnection, StreamError, StreamRequest,
        StreamTransport,
    };

    impl StreamTransport for EventSourceTransport {
        fn open(
            &self,
            request: &StreamRequest,
            _callbacks: StreamCallbacks,
        ) -> Result<Box<dyn StreamConnection>, StreamError> {
            Err(StreamError::Unsupported(format!(
                "EventSource is only available on wasm32 ({})",
                request.url
            )))
        }
    }

    struct Detached;

    impl ScheduledTask for Detached {
        fn cancel(self: Box<Self>) {}
    }

    impl Scheduler for TimeoutScheduler {
        fn schedule(
            &self,
            delay: Duration,
            _task: Box<dyn FnOnce() + 'static>,
        ) -> Box<dyn ScheduledTask> {
            warn!(delay_ms = delay.as_millis() as u64, "browser timers unavailable, task dropped");
            Box::new(Detached)
        }
    }

    impl LocalSpawn for BrowserSpawner {
        fn spawn_local_obj(&self, _future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
            Err(SpawnError::shutdown())
        }
    }
}

//! Keyed push-channel subscription with backoff and relevance filtering.
//!
//! One [`EventStreamClient`] owns at most one live subscription. Every
//! transport callback and retry timer is stamped with the epoch it was
//! created under; anything arriving after a teardown or reconnect carries a
//! stale epoch and is ignored, so a late frame or a zombie timer can never
//! touch a newer subscription.

mod browser;
mod topics;

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

pub use browser::{browser_scheduler, browser_spawner, browser_transport, BrowserSpawner};
pub use topics::{AnalysisStatusTopic, ConsoleEvent, ConsoleTopic, PipelineStage, CONSOLE_CHANNEL_KEY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream transport error: {0}")]
    Transport(String),
    #[error("malformed `{event}` frame: {source}")]
    Parse {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unexpected stream event `{0}`")]
    UnknownEvent(String),
    #[error("streaming is not supported on this target: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: String,
    pub event_names: &'static [&'static str],
}

pub struct StreamCallbacks {
    pub on_open: Box<dyn Fn() + 'static>,
    pub on_message: Box<dyn Fn(StreamFrame) + 'static>,
    pub on_error: Box<dyn Fn(String) + 'static>,
}

impl StreamCallbacks {
    pub fn new(
        on_open: impl Fn() + 'static,
        on_message: impl Fn(StreamFrame) + 'static,
        on_error: impl Fn(String) + 'static,
    ) -> Self {
        Self {
            on_open: Box::new(on_open),
            on_message: Box::new(on_message),
            on_error: Box::new(on_error),
        }
    }
}

pub trait StreamConnection {
    fn close(&self);
}

pub trait StreamTransport {
    fn open(
        &self,
        request: &StreamRequest,
        callbacks: StreamCallbacks,
    ) -> Result<Box<dyn StreamConnection>, StreamError>;
}

pub trait ScheduledTask {
    fn cancel(self: Box<Self>);
}

pub trait Scheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + 'static>) -> Box<dyn ScheduledTask>;
}

/// Describes one push channel: where it lives, what it emits, and which
/// correlation key each event belongs to.
pub trait StreamTopic: 'static {
    type Event: 'static;

    fn url(&self, endpoint: &str, key: &str) -> String;
    fn event_names(&self) -> &'static [&'static str];
    fn decode(&self, frame: &StreamFrame) -> Result<Self::Event, StreamError>;
    /// `None` marks an unscoped event, delivered while any key is live.
    fn correlation_key<'a>(&self, event: &'a Self::Event) -> Option<&'a str>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// `base * 2^attempt`, attempts counted from one.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(1u32 << attempt.min(20))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamNotice<E> {
    Opened,
    Event(E),
    /// Retries exhausted; the subscription has been torn down.
    Lost { key: String, attempts: u32 },
}

pub struct EventStreamClient<T: StreamTopic> {
    inner: Rc<StreamInner<T>>,
}

impl<T: StreamTopic> Clone for EventStreamClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

struct StreamInner<T: StreamTopic> {
    topic: T,
    endpoint: String,
    transport: Rc<dyn StreamTransport>,
    scheduler: Rc<dyn Scheduler>,
    policy: BackoffPolicy,
    handler: Box<dyn Fn(StreamNotice<T::Event>)>,
    state: RefCell<StreamState>,
}

#[derive(Default)]
struct StreamState {
    active: Option<Subscription>,
    epoch: u64,
}

struct Subscription {
    key: String,
    connection: Option<Box<dyn StreamConnection>>,
    retry_timer: Option<Box<dyn ScheduledTask>>,
    attempts: u32,
}

enum ErrorOutcome {
    Retry {
        connection: Option<Box<dyn StreamConnection>>,
        delay: Duration,
        attempt: u32,
        epoch: u64,
    },
    Exhausted {
        connection: Option<Box<dyn StreamConnection>>,
        key: String,
        attempts: u32,
    },
}

impl<T: StreamTopic> EventStreamClient<T> {
    pub fn new(
        topic: T,
        endpoint: impl Into<String>,
        transport: Rc<dyn StreamTransport>,
        scheduler: Rc<dyn Scheduler>,
        policy: BackoffPolicy,
        handler: impl Fn(StreamNotice<T::Event>) + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(StreamInner {
                topic,
                endpoint: endpoint.into().trim_end_matches('/').to_string(),
                transport,
                scheduler,
                policy,
                handler: Box::new(handler),
                state: RefCell::new(StreamState::default()),
            }),
        }
    }

    /// Opens a subscription for `key`, replacing any subscription for a
    /// different key. Connecting again to the live key is a no-op.
    pub fn connect(&self, key: &str) {
        if self.active_key().as_deref() == Some(key) {
            debug!(%key, "stream already subscribed");
            return;
        }

        self.inner.teardown();
        self.inner.state.borrow_mut().active = Some(Subscription {
            key: key.to_string(),
            connection: None,
            retry_timer: None,
            attempts: 0,
        });
        debug!(%key, "stream subscribe");
        StreamInner::open(&self.inner);
    }

    /// Closes the transport, cancels any pending retry and forgets the key.
    pub fn disconnect(&self) {
        self.inner.teardown();
    }

    pub fn active_key(&self) -> Option<String> {
        self.inner
            .state
            .borrow()
            .active
            .as_ref()
            .map(|sub| sub.key.clone())
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.state.borrow().active.is_some()
    }

    pub fn attempts(&self) -> u32 {
        self.inner
            .state
            .borrow()
            .active
            .as_ref()
            .map(|sub| sub.attempts)
            .unwrap_or(0)
    }

    pub fn has_pending_retry(&self) -> bool {
        self.inner
            .state
            .borrow()
            .active
            .as_ref()
            .map(|sub| sub.retry_timer.is_some())
            .unwrap_or(false)
    }
}

impl<T: StreamTopic> StreamInner<T> {
    fn open(self: &Rc<Self>) {
        let (url, epoch) = {
            let mut state = self.state.borrow_mut();
            let Some(key) = state.active.as_ref().map(|sub| sub.key.clone()) else {
                return;
            };
            state.epoch += 1;
            (self.topic.url(&self.endpoint, &key), state.epoch)
        };

        let request = StreamRequest {
            url,
            event_names: self.topic.event_names(),
        };

        match self.transport.open(&request, self.callbacks(epoch)) {
            Ok(connection) => {
                let mut state = self.state.borrow_mut();
                if state.epoch == epoch {
                    if let Some(sub) = state.active.as_mut() {
                        sub.connection = Some(connection);
                        return;
                    }
                }
                drop(state);
                connection.close();
            }
            Err(err) => {
                warn!(url = %request.url, %err, "stream open failed");
                self.handle_transport_error(epoch, err.to_string());
            }
        }
    }

    fn callbacks(self: &Rc<Self>, epoch: u64) -> StreamCallbacks {
        let on_open = {
            let weak = Rc::downgrade(self);
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_open(epoch);
                }
            }
        };
        let on_message = {
            let weak = Rc::downgrade(self);
            move |frame: StreamFrame| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_frame(epoch, frame);
                }
            }
        };
        let on_error = {
            let weak: Weak<Self> = Rc::downgrade(self);
            move |reason: String| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_transport_error(epoch, reason);
                }
            }
        };
        StreamCallbacks::new(on_open, on_message, on_error)
    }

    fn handle_open(&self, epoch: u64) {
        {
            let mut state = self.state.borrow_mut();
            if state.epoch != epoch {
                return;
            }
            let Some(sub) = state.active.as_mut() else {
                return;
            };
            sub.attempts = 0;
            debug!(key = %sub.key, "stream open");
        }
        (self.handler)(StreamNotice::Opened);
    }

    fn handle_frame(&self, epoch: u64, frame: StreamFrame) {
        let active_key = {
            let state = self.state.borrow();
            if state.epoch != epoch {
                return;
            }
            match state.active.as_ref() {
                Some(sub) => sub.key.clone(),
                None => return,
            }
        };

        let event = match self.topic.decode(&frame) {
            Ok(event) => event,
            Err(err) => {
                warn!(key = %active_key, %err, "dropping stream frame");
                return;
            }
        };

        if let Some(event_key) = self.topic.correlation_key(&event) {
            if event_key != active_key {
                debug!(%event_key, %active_key, "discarding event for inactive key");
                return;
            }
        }

        (self.handler)(StreamNotice::Event(event));
    }

    fn handle_transport_error(self: &Rc<Self>, epoch: u64, reason: String) {
        let outcome = {
            let mut state = self.state.borrow_mut();
            if state.epoch != epoch {
                return;
            }
            let max_attempts = self.policy.max_attempts;
            let Some(sub) = state.active.as_mut() else {
                return;
            };
            let connection = sub.connection.take();
            if sub.attempts >= max_attempts {
                let key = sub.key.clone();
                let attempts = sub.attempts;
                state.active = None;
                state.epoch += 1;
                ErrorOutcome::Exhausted {
                    connection,
                    key,
                    attempts,
                }
            } else {
                sub.attempts += 1;
                let attempt = sub.attempts;
                state.epoch += 1;
                ErrorOutcome::Retry {
                    connection,
                    delay: self.policy.delay_for(attempt),
                    attempt,
                    epoch: state.epoch,
                }
            }
        };

        match outcome {
            ErrorOutcome::Retry {
                connection,
                delay,
                attempt,
                epoch,
            } => {
                if let Some(connection) = connection {
                    connection.close();
                }
                debug!(%reason, attempt, delay_ms = delay.as_millis() as u64, "stream retry scheduled");
                let weak = Rc::downgrade(self);
                let timer = self.scheduler.schedule(
                    delay,
                    Box::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.reopen(epoch);
                        }
                    }),
                );

                let orphaned = {
                    let mut state = self.state.borrow_mut();
                    let current = state.epoch == epoch;
                    match state.active.as_mut() {
                        Some(sub) if current => {
                            sub.retry_timer = Some(timer);
                            None
                        }
                        _ => Some(timer),
                    }
                };
                if let Some(timer) = orphaned {
                    timer.cancel();
                }
            }
            ErrorOutcome::Exhausted {
                connection,
                key,
                attempts,
            } => {
                if let Some(connection) = connection {
                    connection.close();
                }
                warn!(%key, attempts, %reason, "stream lost after exhausting retries");
                (self.handler)(StreamNotice::Lost { key, attempts });
            }
        }
    }

    fn reopen(self: &Rc<Self>, epoch: u64) {
        {
            let mut state = self.state.borrow_mut();
            if state.epoch != epoch {
                return;
            }
            let Some(sub) = state.active.as_mut() else {
                return;
            };
            sub.retry_timer = None;
        }
        self.open();
    }

    fn teardown(&self) {
        let previous = {
            let mut state = self.state.borrow_mut();
            state.epoch += 1;
            state.active.take()
        };
        if let Some(sub) = previous {
            release(sub);
        }
    }
}

impl<T: StreamTopic> Drop for StreamInner<T> {
    fn drop(&mut self) {
        if let Some(sub) = self.state.get_mut().active.take() {
            release(sub);
        }
    }
}

fn release(sub: Subscription) {
    if let Some(timer) = sub.retry_timer {
        timer.cancel();
    }
    if let Some(connection) = sub.connection {
        connection.close();
    }
    debug!(key = %sub.key, "stream released");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisStatus, AnalysisStatusEvent};
    use crate::testing::{FakeTransport, ManualScheduler};

    struct Harness {
        transport: Rc<FakeTransport>,
        scheduler: Rc<ManualScheduler>,
        received: Rc<RefCell<Vec<StreamNotice<AnalysisStatusEvent>>>>,
        client: EventStreamClient<AnalysisStatusTopic>,
    }

    fn harness() -> Harness {
        let transport = Rc::new(FakeTransport::default());
        let scheduler = Rc::new(ManualScheduler::default());
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        let client = EventStreamClient::new(
            AnalysisStatusTopic,
            "http://ops.local/",
            transport.clone(),
            scheduler.clone(),
            BackoffPolicy::default(),
            move |notice| sink.borrow_mut().push(notice),
        );
        Harness {
            transport,
            scheduler,
            received,
            client,
        }
    }

    fn status_frame(id: &str, status: &str) -> StreamFrame {
        StreamFrame {
            event: Some("analysis-status".into()),
            data: format!(r#"{{"analysisId":"{id}","status":"{status}"}}"#),
        }
    }

    fn events(h: &Harness) -> Vec<AnalysisStatusEvent> {
        h.received
            .borrow()
            .iter()
            .filter_map(|notice| match notice {
                StreamNotice::Event(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connect_opens_keyed_url() {
        let h = harness();
        h.client.connect("abc");

        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(
            h.transport.last_url().as_deref(),
            Some("http://ops.local/api/logs/abc/stream")
        );
        assert_eq!(h.client.active_key().as_deref(), Some("abc"));
    }

    #[test]
    fn connecting_same_key_twice_does_not_double_subscribe() {
        let h = harness();
        h.client.connect("abc");
        h.client.connect("abc");

        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.transport.live_count(), 1);
    }

    #[test]
    fn switching_keys_tears_down_previous_transport() {
        let h = harness();
        h.client.connect("a");
        h.client.connect("b");

        assert_eq!(h.transport.open_count(), 2);
        assert!(h.transport.connection(0).is_closed());
        assert_eq!(h.transport.live_count(), 1);
    }

    #[test]
    fn stale_key_events_are_discarded_after_switch() {
        let h = harness();
        h.client.connect("A");
        let old = h.transport.connection(0);
        h.client.connect("B");
        let current = h.transport.connection(1);

        // Late frame on the old transport, and an A-tagged frame on the new one.
        old.emit(status_frame("A", "PROCESSING"));
        current.emit(status_frame("A", "FAILED"));
        assert!(events(&h).is_empty());

        current.emit(status_frame("B", "PROCESSING"));
        let delivered = events(&h);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].analysis_id, "B");
        assert_eq!(delivered[0].status, AnalysisStatus::Processing);
    }

    #[test]
    fn malformed_frames_are_dropped_without_breaking_subscription() {
        let h = harness();
        h.client.connect("abc");
        let conn = h.transport.connection(0);

        conn.emit(StreamFrame {
            event: Some("analysis-status".into()),
            data: "{not json".into(),
        });
        conn.emit(status_frame("abc", "COMPLETED"));

        assert_eq!(events(&h).len(), 1);
        assert!(h.client.is_subscribed());
        assert!(!conn.is_closed());
    }

    #[test]
    fn backoff_ceiling_after_six_consecutive_errors() {
        let h = harness();
        h.client.connect("abc");

        let mut delays = Vec::new();
        for attempt in 0..5 {
            h.transport.connection(attempt).fail("connection reset");
            assert!(h.client.has_pending_retry());
            delays.push(h.scheduler.next_delay().unwrap());
            assert!(h.scheduler.fire_next());
        }
        assert_eq!(h.transport.open_count(), 6);

        h.transport.connection(5).fail("connection reset");

        assert_eq!(h.transport.open_count(), 6, "exactly five reconnect attempts");
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(delays[0], Duration::from_millis(1_000));
        assert_eq!(delays[4], Duration::from_millis(16_000));
        assert!(!h.client.is_subscribed());
        assert_eq!(h.scheduler.pending(), 0);
        assert_eq!(h.transport.live_count(), 0);
        assert!(matches!(
            h.received.borrow().last(),
            Some(StreamNotice::Lost { attempts: 5, .. })
        ));
    }

    #[test]
    fn successful_open_resets_attempts() {
        let h = harness();
        h.client.connect("abc");
        h.transport.connection(0).fail("reset");
        h.scheduler.fire_next();
        assert_eq!(h.client.attempts(), 1);

        h.transport.connection(1).open();
        assert_eq!(h.client.attempts(), 0);
        assert!(matches!(h.received.borrow().last(), Some(StreamNotice::Opened)));
    }

    #[test]
    fn disconnect_cancels_pending_retry() {
        let h = harness();
        h.client.connect("abc");
        h.transport.connection(0).fail("reset");
        assert_eq!(h.scheduler.pending(), 1);

        h.client.disconnect();
        h.client.disconnect();

        assert_eq!(h.scheduler.pending(), 0);
        assert!(!h.scheduler.fire_next());
        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.client.attempts(), 0);
        assert_eq!(h.client.active_key(), None);
    }

    #[test]
    fn dropping_client_releases_transport() {
        let h = harness();
        h.client.connect("abc");
        let conn = h.transport.connection(0);
        drop(h.client);
        assert!(conn.is_closed());
    }
}

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use super::{ChangeNotifier, Runtime};
use crate::models::{PipelineExecution, PipelineStatus, PulseEvent};
use crate::store::{ReconciliationStore, UpsertOutcome};
use crate::stream::{ConsoleEvent, ConsoleTopic, EventStreamClient, StreamNotice, CONSOLE_CHANNEL_KEY};

pub const PULSE_FEED_LEN: usize = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PipelineStats {
    pub total: usize,
    pub running: usize,
    pub failed: usize,
    /// Whole percent of non-failed executions.
    pub success_rate: u8,
}

/// Live pipeline telemetry and the system pulse feed.
pub struct PipelineMonitor {
    inner: Rc<MonitorInner>,
}

impl Clone for PipelineMonitor {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

struct MonitorInner {
    stream: EventStreamClient<ConsoleTopic>,
    pipelines: RefCell<ReconciliationStore<PipelineExecution>>,
    pulse: RefCell<VecDeque<PulseEvent>>,
    connected: Cell<bool>,
    alive: Cell<bool>,
    notifier: ChangeNotifier,
}

impl PipelineMonitor {
    pub fn new(runtime: &Runtime) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<MonitorInner>| {
            let handler = weak.clone();
            let stream = EventStreamClient::new(
                ConsoleTopic,
                runtime.stream_endpoint.clone(),
                Rc::clone(&runtime.transport),
                Rc::clone(&runtime.scheduler),
                runtime.backoff,
                move |notice| {
                    if let Some(inner) = handler.upgrade() {
                        inner.on_stream(notice);
                    }
                },
            );
            MonitorInner {
                stream,
                pipelines: RefCell::new(ReconciliationStore::new()),
                pulse: RefCell::new(VecDeque::with_capacity(PULSE_FEED_LEN)),
                connected: Cell::new(false),
                alive: Cell::new(true),
                notifier: ChangeNotifier::default(),
            }
        });
        Self { inner }
    }

    pub fn on_change(&self, listener: Rc<dyn Fn()>) {
        self.inner.notifier.set(listener);
    }

    pub fn mount(&self) {
        if self.inner.alive.get() {
            self.inner.stream.connect(CONSOLE_CHANNEL_KEY);
        }
    }

    /// Reopens the telemetry channel after it was given up on.
    pub fn reconnect(&self) {
        if !self.inner.alive.get() || self.inner.stream.is_subscribed() {
            return;
        }
        info!("pipeline telemetry stream offline, reconnecting");
        self.inner.stream.connect(CONSOLE_CHANNEL_KEY);
    }

    pub fn can_reconnect(&self) -> bool {
        self.inner.alive.get() && !self.inner.stream.is_subscribed()
    }

    pub fn pipelines(&self) -> Vec<Rc<PipelineExecution>> {
        self.inner
            .pipelines
            .borrow()
            .iter()
            .map(|entry| Rc::clone(entry.entity()))
            .collect()
    }

    pub fn revision(&self) -> u64 {
        self.inner.pipelines.borrow().revision()
    }

    pub fn pulse(&self) -> Vec<PulseEvent> {
        self.inner.pulse.borrow().iter().cloned().collect()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    pub fn stats(&self) -> PipelineStats {
        let pipelines = self.inner.pipelines.borrow();
        let mut stats = PipelineStats {
            total: pipelines.len(),
            ..PipelineStats::default()
        };
        for entry in pipelines.iter() {
            match entry.entity().status {
                PipelineStatus::Processing => stats.running += 1,
                PipelineStatus::Failed => stats.failed += 1,
                PipelineStatus::Completed => {}
            }
        }
        if stats.total > 0 {
            let healthy = (stats.total - stats.failed) as f64 / stats.total as f64;
            stats.success_rate = (healthy * 100.0).round() as u8;
        }
        stats
    }

    pub fn teardown(&self) {
        self.inner.alive.set(false);
        self.inner.connected.set(false);
        self.inner.stream.disconnect();
        self.inner.notifier.clear();
        self.inner.pipelines.borrow_mut().reset();
        self.inner.pulse.borrow_mut().clear();
    }
}

impl MonitorInner {
    fn on_stream(&self, notice: StreamNotice<ConsoleEvent>) {
        if !self.alive.get() {
            return;
        }
        match notice {
            StreamNotice::Opened => {
                if !self.connected.replace(true) {
                    self.notifier.notify();
                }
            }
            StreamNotice::Event(ConsoleEvent::Pipeline { stage, execution }) => {
                let id = execution.id.clone();
                let outcome = self.pipelines.borrow_mut().upsert(execution);
                debug!(%id, ?stage, ?outcome, "pipeline telemetry");
                if outcome.changed() {
                    self.notifier.notify();
                } else if outcome == UpsertOutcome::Stale {
                    debug!(%id, "late telemetry for finished pipeline");
                }
            }
            StreamNotice::Event(ConsoleEvent::Notification(event)) => {
                {
                    let mut pulse = self.pulse.borrow_mut();
                    pulse.push_front(event);
                    pulse.truncate(PULSE_FEED_LEN);
                }
                self.notifier.notify();
            }
            StreamNotice::Event(ConsoleEvent::AgentLog(_)) => {}
            StreamNotice::Lost { attempts, .. } => {
                warn!(attempts, "pipeline telemetry stream lost");
                self.connected.set(false);
                self.notifier.notify();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::fixtures::{change_counter, Rig};

    fn telemetry(id: &str, status: &str, cpu: f64) -> String {
        format!(r#"{{"id":"{id}","pipelineName":"web","status":"{status}","cpuUsage":{cpu},"memUsage":40.0}}"#)
    }

    #[test]
    fn telemetry_upserts_newest_first_and_suppresses_echoes() {
        let rig = Rig::new();
        let monitor = PipelineMonitor::new(&rig.runtime);
        let (changes, listener) = change_counter();
        monitor.on_change(listener);
        monitor.mount();
        let conn = rig.transport.latest();

        conn.emit_event("pipeline-init", &telemetry("p1", "PROCESSING", 10.0));
        conn.emit_event("pipeline-init", &telemetry("p2", "PROCESSING", 12.0));
        let after_inserts = changes.get();
        let first = Rc::clone(&monitor.pipelines()[1]);

        conn.emit_event("pipeline-pulse", &telemetry("p1", "PROCESSING", 10.0));
        assert_eq!(changes.get(), after_inserts);
        assert!(Rc::ptr_eq(&first, &monitor.pipelines()[1]));

        conn.emit_event("pipeline-complete", &telemetry("p1", "FAILED", 95.0));
        conn.emit_event("pipeline-pulse", &telemetry("p1", "PROCESSING", 20.0));

        let ids: Vec<String> = monitor.pipelines().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, ["p2", "p1"]);
        assert_eq!(monitor.pipelines()[1].status, PipelineStatus::Failed);
        let stats = monitor.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.success_rate, 50);
    }

    #[test]
    fn pulse_feed_keeps_ten_newest() {
        let rig = Rig::new();
        let monitor = PipelineMonitor::new(&rig.runtime);
        monitor.mount();
        let conn = rig.transport.latest();

        for idx in 0..12 {
            conn.emit_event(
                "notification",
                &format!(r#"{{"type":"SYSTEM","message":"event {idx}"}}"#),
            );
        }

        let feed = monitor.pulse();
        assert_eq!(feed.len(), PULSE_FEED_LEN);
        assert_eq!(feed[0].message, "event 11");
        assert_eq!(feed[9].message, "event 2");
    }

    #[test]
    fn connection_flag_follows_stream() {
        let rig = Rig::new();
        let monitor = PipelineMonitor::new(&rig.runtime);
        monitor.mount();
        assert!(!monitor.is_connected());

        rig.transport.latest().open();
        assert!(monitor.is_connected());

        monitor.teardown();
        assert!(!monitor.is_connected());
        assert_eq!(rig.transport.live_count(), 0);
    }

    #[test]
    fn reconnect_reopens_lost_stream() {
        let rig = Rig::new();
        let monitor = PipelineMonitor::new(&rig.runtime);
        monitor.mount();
        rig.transport.latest().open();
        assert!(!monitor.can_reconnect());

        for attempt in 0..5 {
            rig.transport.connection(attempt).fail("connection reset");
            assert!(rig.scheduler.fire_next());
        }
        rig.transport.connection(5).fail("connection reset");
        assert!(!monitor.is_connected());
        assert!(monitor.can_reconnect());
        assert_eq!(rig.transport.open_count(), 6);

        monitor.reconnect();
        assert_eq!(rig.transport.open_count(), 7);
        rig.transport.latest().open();
        assert!(monitor.is_connected());

        monitor.reconnect();
        assert_eq!(rig.transport.open_count(), 7);
    }

    #[test]
    fn teardown_drops_telemetry() {
        let rig = Rig::new();
        let monitor = PipelineMonitor::new(&rig.runtime);
        monitor.mount();
        let conn = rig.transport.latest();
        conn.emit_event("pipeline-init", &telemetry("p1", "PROCESSING", 10.0));
        conn.emit_event("notification", r#"{"type":"SYSTEM","message":"deploy"}"#);

        monitor.teardown();
        conn.emit_event("pipeline-init", &telemetry("p2", "PROCESSING", 10.0));

        assert!(monitor.pipelines().is_empty());
        assert!(monitor.pulse().is_empty());
        assert_eq!(monitor.stats().total, 0);
    }
}

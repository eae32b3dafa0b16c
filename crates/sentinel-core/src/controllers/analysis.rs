use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::{ChangeNotifier, Runtime};
use crate::api::{AnalysisApi, ClientError};
use crate::models::{validate_log_text, AnalysisRecord, AnalysisStatus, AnalysisStatusEvent};
use crate::stream::{AnalysisStatusTopic, EventStreamClient, StreamNotice};

const RESULT_LOAD_FAILED: &str = "Failed to load results.";
const ANALYSIS_FAILED: &str = "Analysis failed";
const REPORT_LOAD_FAILED: &str = "Could not load report.";
const REPORT_NOT_FOUND: &str =
    "Analysis report not found. The history may have been cleared or the logs are still processing.";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AnalysisPhase {
    #[default]
    Idle,
    Processing,
    Completed,
    Failed,
}

impl AnalysisPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnalysisState {
    pub phase: AnalysisPhase,
    pub analysis_id: Option<String>,
    /// Last status the push channel reported while processing.
    pub live_status: Option<AnalysisStatus>,
    pub result: Option<AnalysisRecord>,
    pub error: Option<String>,
    pub loading_history: bool,
}

impl AnalysisState {
    pub fn can_retry(&self) -> bool {
        self.phase == AnalysisPhase::Failed && self.analysis_id.is_some()
    }
}

/// Drives one analysis from submission to a terminal result.
pub struct AnalysisController<A: AnalysisApi + 'static> {
    inner: Rc<AnalysisInner<A>>,
}

impl<A: AnalysisApi + 'static> Clone for AnalysisController<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

struct AnalysisInner<A: AnalysisApi + 'static> {
    api: Rc<A>,
    runtime: Runtime,
    stream: EventStreamClient<AnalysisStatusTopic>,
    state: RefCell<AnalysisState>,
    /// Key push events must carry to be applied. Cleared once a terminal
    /// transition has been taken.
    active_key: RefCell<Option<String>>,
    /// Bumped by every user operation; async continuations from an older
    /// epoch are dropped.
    epoch: Cell<u64>,
    alive: Cell<bool>,
    notifier: ChangeNotifier,
}

impl<A: AnalysisApi + 'static> AnalysisController<A> {
    pub fn new(api: Rc<A>, runtime: Runtime) -> Self {
        let inner = Rc::new_cyclic(|weak: &std::rc::Weak<AnalysisInner<A>>| {
            let handler = weak.clone();
            let stream = EventStreamClient::new(
                AnalysisStatusTopic,
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
            AnalysisInner {
                api,
                runtime,
                stream,
                state: RefCell::new(AnalysisState::default()),
                active_key: RefCell::new(None),
                epoch: Cell::new(0),
                alive: Cell::new(true),
                notifier: ChangeNotifier::default(),
            }
        });
        Self { inner }
    }

    pub fn on_change(&self, listener: Rc<dyn Fn()>) {
        self.inner.notifier.set(listener);
    }

    pub fn state(&self) -> AnalysisState {
        self.inner.state.borrow().clone()
    }

    pub fn active_key(&self) -> Option<String> {
        self.inner.active_key.borrow().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.stream.is_subscribed()
    }

    /// Validates locally, then submits and subscribes to the returned id.
    /// A second start while processing is ignored.
    pub fn start(&self, pipeline_type: &str, log_text: &str) -> Result<(), ClientError> {
        let inner = &self.inner;
        if !inner.alive.get() {
            return Ok(());
        }
        if inner.state.borrow().phase == AnalysisPhase::Processing {
            debug!("analysis already processing, ignoring start");
            return Ok(());
        }
        if let Err(err) = validate_log_text(log_text) {
            let message = err.user_message();
            inner.update(|state| state.error = Some(message));
            return Err(err);
        }

        let epoch = inner.next_epoch();
        inner.stream.disconnect();
        inner.active_key.borrow_mut().take();
        inner.update(|state| {
            *state = AnalysisState {
                phase: AnalysisPhase::Processing,
                live_status: Some(AnalysisStatus::Pending),
                ..AnalysisState::default()
            };
        });

        let weak = Rc::downgrade(inner);
        let api = Rc::clone(&inner.api);
        let pipeline_type = pipeline_type.to_string();
        let log_text = log_text.to_string();
        inner.runtime.spawn(async move {
            let result = api.submit_analysis(&pipeline_type, &log_text).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.is_current(epoch) {
                debug!("dropping stale submit response");
                return;
            }
            match result {
                Ok(analysis_id) => {
                    info!(%analysis_id, %pipeline_type, "analysis submitted");
                    *inner.active_key.borrow_mut() = Some(analysis_id.clone());
                    inner.update(|state| state.analysis_id = Some(analysis_id.clone()));
                    inner.stream.connect(&analysis_id);
                }
                Err(err) => {
                    warn!(%err, "analysis submission failed");
                    inner.fail(err.user_message());
                }
            }
        });
        Ok(())
    }

    /// Tears down the subscription and returns to idle, even mid-flight.
    pub fn cancel(&self) {
        let inner = &self.inner;
        inner.next_epoch();
        inner.stream.disconnect();
        inner.active_key.borrow_mut().take();
        inner.update(|state| *state = AnalysisState::default());
    }

    /// Re-attaches to the recorded analysis id without resubmitting.
    pub fn retry(&self) -> bool {
        let inner = &self.inner;
        if !inner.alive.get() {
            return false;
        }
        let Some(analysis_id) = inner.state.borrow().analysis_id.clone() else {
            return false;
        };

        inner.next_epoch();
        *inner.active_key.borrow_mut() = Some(analysis_id.clone());
        inner.update(|state| {
            state.phase = AnalysisPhase::Processing;
            state.live_status = Some(AnalysisStatus::Processing);
            state.error = None;
        });
        info!(%analysis_id, "re-attaching to analysis");
        inner.stream.connect(&analysis_id);
        true
    }

    /// Clears result and error. The subscription is left alone.
    pub fn reset(&self) {
        self.inner.next_epoch();
        self.inner.update(|state| *state = AnalysisState::default());
    }

    /// Loads a finished analysis straight into `Completed`, no stream.
    pub fn load_history(&self, analysis_id: &str) {
        let inner = &self.inner;
        if !inner.alive.get() {
            return;
        }
        {
            let state = inner.state.borrow();
            if state.analysis_id.as_deref() == Some(analysis_id)
                && (state.result.is_some() || state.loading_history)
            {
                return;
            }
        }

        let epoch = inner.next_epoch();
        inner.stream.disconnect();
        inner.active_key.borrow_mut().take();
        inner.update(|state| {
            *state = AnalysisState {
                analysis_id: Some(analysis_id.to_string()),
                loading_history: true,
                ..AnalysisState::default()
            };
        });

        let weak = Rc::downgrade(inner);
        let api = Rc::clone(&inner.api);
        let analysis_id = analysis_id.to_string();
        inner.runtime.spawn(async move {
            let result = api.fetch_analysis(&analysis_id).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.is_current(epoch) {
                return;
            }
            match result {
                Ok(record) => inner.update(|state| {
                    state.phase = AnalysisPhase::Completed;
                    state.analysis_id = Some(record.id.clone());
                    state.live_status = Some(record.status);
                    state.result = Some(record);
                    state.loading_history = false;
                }),
                Err(err) => {
                    warn!(%analysis_id, %err, "history fetch failed");
                    let message = if err.is_not_found() {
                        REPORT_NOT_FOUND
                    } else {
                        REPORT_LOAD_FAILED
                    };
                    inner.update(|state| {
                        state.phase = AnalysisPhase::Failed;
                        state.error = Some(message.to_string());
                        state.loading_history = false;
                    });
                }
            }
        });
    }

    /// Closes the subscription; nothing is applied afterwards.
    pub fn teardown(&self) {
        let inner = &self.inner;
        inner.alive.set(false);
        inner.next_epoch();
        inner.active_key.borrow_mut().take();
        inner.stream.disconnect();
        inner.notifier.clear();
    }
}

impl<A: AnalysisApi + 'static> AnalysisInner<A> {
    fn next_epoch(&self) -> u64 {
        let next = self.epoch.get().wrapping_add(1);
        self.epoch.set(next);
        next
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.alive.get() && self.epoch.get() == epoch
    }

    fn update(&self, apply: impl FnOnce(&mut AnalysisState)) {
        let changed = {
            let mut state = self.state.borrow_mut();
            let before = state.clone();
            apply(&mut state);
            *state != before
        };
        if changed {
            self.notifier.notify();
        }
    }

    fn fail(&self, message: String) {
        self.update(|state| {
            state.phase = AnalysisPhase::Failed;
            state.error = Some(message);
        });
    }

    fn on_stream(self: &Rc<Self>, notice: StreamNotice<AnalysisStatusEvent>) {
        if !self.alive.get() {
            return;
        }
        match notice {
            StreamNotice::Opened => {}
            StreamNotice::Event(event) => self.on_status(event),
            StreamNotice::Lost { key, attempts } => {
                if self.active_key.borrow().as_deref() != Some(key.as_str()) {
                    return;
                }
                self.active_key.borrow_mut().take();
                warn!(analysis_id = %key, attempts, "analysis stream lost");
                self.fail(format!(
                    "Live updates were lost after {attempts} reconnect attempts. Retry to reattach."
                ));
            }
        }
    }

    fn on_status(self: &Rc<Self>, event: AnalysisStatusEvent) {
        if self.active_key.borrow().as_deref() != Some(event.analysis_id.as_str()) {
            debug!(analysis_id = %event.analysis_id, "ignoring status for inactive analysis");
            return;
        }
        if self.state.borrow().phase != AnalysisPhase::Processing {
            return;
        }

        match event.status {
            AnalysisStatus::Completed => {
                // One terminal transition per analysis: stop listening for
                // further status on this key before the result pull.
                self.active_key.borrow_mut().take();
                self.update(|state| state.live_status = Some(AnalysisStatus::Completed));
                self.fetch_result(event.analysis_id);
            }
            AnalysisStatus::Failed => {
                self.active_key.borrow_mut().take();
                self.stream.disconnect();
                let reason = event
                    .message
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| ANALYSIS_FAILED.to_string());
                info!(analysis_id = %event.analysis_id, %reason, "analysis failed");
                self.update(|state| {
                    state.phase = AnalysisPhase::Failed;
                    state.live_status = Some(AnalysisStatus::Failed);
                    state.error = Some(reason);
                });
            }
            status => self.update(|state| state.live_status = Some(status)),
        }
    }

    fn fetch_result(self: &Rc<Self>, analysis_id: String) {
        let epoch = self.epoch.get();
        let weak = Rc::downgrade(self);
        let api = Rc::clone(&self.api);
        self.runtime.spawn(async move {
            let result = api.fetch_analysis(&analysis_id).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.is_current(epoch) {
                return;
            }
            match result {
                Ok(record) => {
                    info!(%analysis_id, "analysis completed");
                    inner.update(|state| {
                        state.phase = AnalysisPhase::Completed;
                        state.live_status = Some(record.status);
                        state.result = Some(record);
                        state.error = None;
                    });
                }
                Err(err) => {
                    warn!(%analysis_id, %err, "result fetch failed");
                    inner.fail(RESULT_LOAD_FAILED.to_string());
                }
            }
            inner.stream.disconnect();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::fixtures::{change_counter, Rig};
    use crate::testing::{record, server_error, FakeAnalysisApi};

    fn controller(rig: &Rig) -> (Rc<FakeAnalysisApi>, AnalysisController<FakeAnalysisApi>) {
        let api = Rc::new(FakeAnalysisApi::default());
        let controller = AnalysisController::new(Rc::clone(&api), rig.runtime.clone());
        (api, controller)
    }

    fn status(id: &str, status: &str) -> String {
        format!(r#"{{"analysisId":"{id}","status":"{status}"}}"#)
    }

    fn started(rig: &mut Rig, id: &str) -> (Rc<FakeAnalysisApi>, AnalysisController<FakeAnalysisApi>) {
        let (api, controller) = controller(rig);
        api.script_submit(Ok(id.to_string()));
        controller.start("GITHUB_ACTIONS", &"x".repeat(25)).unwrap();
        rig.settle();
        (api, controller)
    }

    #[test]
    fn submit_reaches_processing_with_open_subscription() {
        let mut rig = Rig::new();
        let (api, controller) = started(&mut rig, "abc");

        let state = controller.state();
        assert_eq!(state.phase, AnalysisPhase::Processing);
        assert_eq!(state.analysis_id.as_deref(), Some("abc"));
        assert_eq!(controller.active_key().as_deref(), Some("abc"));
        assert!(controller.is_streaming());
        assert_eq!(api.submit_calls.get(), 1);
        assert_eq!(
            rig.transport.last_url().as_deref(),
            Some("http://ops.local/api/logs/abc/stream")
        );
    }

    #[test]
    fn short_logs_never_reach_the_network() {
        let mut rig = Rig::new();
        let (api, controller) = controller(&rig);

        let err = controller.start("GITHUB_ACTIONS", &"x".repeat(19)).unwrap_err();
        rig.settle();
        assert!(err.is_validation());
        assert_eq!(api.submit_calls.get(), 0);
        assert_eq!(controller.state().phase, AnalysisPhase::Idle);
        assert!(controller.state().error.is_some());

        controller.start("GITHUB_ACTIONS", &"x".repeat(20)).unwrap();
        rig.settle();
        assert_eq!(api.submit_calls.get(), 1);
    }

    #[test]
    fn double_start_while_processing_is_ignored() {
        let mut rig = Rig::new();
        let (api, controller) = started(&mut rig, "abc");

        controller.start("GITLAB_CI", &"y".repeat(30)).unwrap();
        rig.settle();
        assert_eq!(api.submit_calls.get(), 1);
        assert_eq!(controller.active_key().as_deref(), Some("abc"));
    }

    #[test]
    fn completed_push_fetches_result_and_closes_stream() {
        let mut rig = Rig::new();
        let (api, controller) = started(&mut rig, "abc");
        api.add_record(record("abc", AnalysisStatus::Completed));
        let (changes, listener) = change_counter();
        controller.on_change(listener);

        rig.transport
            .latest()
            .emit_event("analysis-status", &status("abc", "COMPLETED"));
        rig.settle();

        let state = controller.state();
        assert_eq!(state.phase, AnalysisPhase::Completed);
        assert_eq!(state.result.as_ref().map(|r| r.id.as_str()), Some("abc"));
        assert_eq!(api.fetch_calls.get(), 1);
        assert!(!controller.is_streaming());
        assert_eq!(rig.transport.live_count(), 0);
        assert!(changes.get() > 0);
    }

    #[test]
    fn result_fetch_failure_lands_in_failed() {
        let mut rig = Rig::new();
        let (api, controller) = started(&mut rig, "abc");
        api.fail_next_fetch(server_error());

        rig.transport
            .latest()
            .emit_event("analysis-status", &status("abc", "COMPLETED"));
        rig.settle();

        let state = controller.state();
        assert_eq!(state.phase, AnalysisPhase::Failed);
        assert_eq!(state.error.as_deref(), Some(RESULT_LOAD_FAILED));
        assert!(!controller.is_streaming());
    }

    #[test]
    fn mismatched_key_push_changes_nothing() {
        let mut rig = Rig::new();
        let (_api, controller) = started(&mut rig, "abc");
        let before = controller.state();

        rig.transport
            .latest()
            .emit_event("analysis-status", &status("zzz", "FAILED"));
        rig.settle();

        assert_eq!(controller.state(), before);
        assert!(controller.is_streaming());
    }

    #[test]
    fn terminal_status_is_not_overwritten_by_later_pushes() {
        let mut rig = Rig::new();
        let (api, controller) = started(&mut rig, "abc");
        api.add_record(record("abc", AnalysisStatus::Completed));
        let conn = rig.transport.latest();

        conn.emit_event("analysis-status", &status("abc", "FAILED"));
        rig.settle();
        let failed = controller.state();
        assert_eq!(failed.phase, AnalysisPhase::Failed);
        assert_eq!(failed.error.as_deref(), Some(ANALYSIS_FAILED));

        conn.emit_event("analysis-status", &status("abc", "PROCESSING"));
        conn.emit_event("analysis-status", &status("abc", "COMPLETED"));
        rig.settle();
        assert_eq!(controller.state(), failed);
        assert_eq!(api.fetch_calls.get(), 0);
    }

    #[test]
    fn completed_transition_happens_once() {
        let mut rig = Rig::new();
        let (api, controller) = started(&mut rig, "abc");
        api.add_record(record("abc", AnalysisStatus::Completed));
        api.gate.hold();
        let conn = rig.transport.latest();

        conn.emit_event("analysis-status", &status("abc", "COMPLETED"));
        conn.emit_event("analysis-status", &status("abc", "COMPLETED"));
        conn.emit_event("analysis-status", &status("abc", "FAILED"));
        api.gate.release();
        rig.settle();

        assert_eq!(api.fetch_calls.get(), 1);
        assert_eq!(controller.state().phase, AnalysisPhase::Completed);
    }

    #[test]
    fn failed_push_uses_server_reason() {
        let mut rig = Rig::new();
        let (_api, controller) = started(&mut rig, "abc");

        rig.transport.latest().emit_event(
            "analysis-status",
            r#"{"analysisId":"abc","status":"FAILED","message":"runner out of disk"}"#,
        );

        let state = controller.state();
        assert_eq!(state.phase, AnalysisPhase::Failed);
        assert_eq!(state.error.as_deref(), Some("runner out of disk"));
        assert!(state.can_retry());
    }

    #[test]
    fn intermediate_status_only_updates_display() {
        let mut rig = Rig::new();
        let (_api, controller) = started(&mut rig, "abc");

        rig.transport
            .latest()
            .emit_event("analysis-status", &status("abc", "PROCESSING"));

        let state = controller.state();
        assert_eq!(state.phase, AnalysisPhase::Processing);
        assert_eq!(state.live_status, Some(AnalysisStatus::Processing));
    }

    #[test]
    fn submit_failure_lands_in_failed() {
        let mut rig = Rig::new();
        let (api, controller) = controller(&rig);
        api.script_submit(Err(server_error()));

        controller.start("JENKINS", &"z".repeat(40)).unwrap();
        rig.settle();

        let state = controller.state();
        assert_eq!(state.phase, AnalysisPhase::Failed);
        assert!(state.error.is_some());
        assert!(!controller.is_streaming());
        assert_eq!(rig.transport.open_count(), 0);
    }

    #[test]
    fn cancel_mid_flight_returns_to_idle_and_drops_late_events() {
        let mut rig = Rig::new();
        let (_api, controller) = started(&mut rig, "abc");
        let conn = rig.transport.latest();

        controller.cancel();
        assert_eq!(controller.state(), AnalysisState::default());
        assert!(conn.is_closed());

        conn.emit_event("analysis-status", &status("abc", "FAILED"));
        assert_eq!(controller.state(), AnalysisState::default());
    }

    #[test]
    fn cancel_before_submit_resolves_discards_response() {
        let mut rig = Rig::new();
        let (api, controller) = controller(&rig);
        api.gate.hold();
        controller.start("JENKINS", &"z".repeat(40)).unwrap();
        rig.settle();

        controller.cancel();
        api.gate.release();
        rig.settle();

        assert_eq!(controller.state().phase, AnalysisPhase::Idle);
        assert_eq!(rig.transport.open_count(), 0);
    }

    #[test]
    fn retry_reattaches_without_resubmitting() {
        let mut rig = Rig::new();
        let (api, controller) = started(&mut rig, "abc");
        rig.transport
            .latest()
            .emit_event("analysis-status", &status("abc", "FAILED"));
        assert_eq!(controller.state().phase, AnalysisPhase::Failed);

        assert!(controller.retry());
        rig.settle();

        assert_eq!(controller.state().phase, AnalysisPhase::Processing);
        assert_eq!(controller.active_key().as_deref(), Some("abc"));
        assert_eq!(rig.transport.open_count(), 2);
        assert_eq!(api.submit_calls.get(), 1);
    }

    #[test]
    fn retry_without_recorded_id_is_rejected() {
        let rig = Rig::new();
        let (_api, controller) = controller(&rig);
        assert!(!controller.retry());
        assert_eq!(controller.state().phase, AnalysisPhase::Idle);
    }

    #[test]
    fn exhausted_stream_surfaces_as_failure_with_retry() {
        let mut rig = Rig::new();
        let (_api, controller) = started(&mut rig, "abc");

        for _ in 0..5 {
            rig.transport.latest().fail("reset");
            rig.scheduler.fire_next();
        }
        rig.transport.latest().fail("reset");

        let state = controller.state();
        assert_eq!(state.phase, AnalysisPhase::Failed);
        assert!(state.can_retry());
        assert_eq!(rig.scheduler.pending(), 0);

        assert!(controller.retry());
        assert!(controller.is_streaming());
    }

    #[test]
    fn reset_keeps_subscription() {
        let mut rig = Rig::new();
        let (_api, controller) = started(&mut rig, "abc");

        controller.reset();
        assert_eq!(controller.state(), AnalysisState::default());
        assert!(controller.is_streaming());
    }

    #[test]
    fn history_load_lands_in_completed_without_stream() {
        let mut rig = Rig::new();
        let (api, controller) = controller(&rig);
        api.add_record(record("old-1", AnalysisStatus::Completed));

        controller.load_history("old-1");
        controller.load_history("old-1");
        rig.settle();

        let state = controller.state();
        assert_eq!(state.phase, AnalysisPhase::Completed);
        assert_eq!(state.result.as_ref().map(|r| r.id.as_str()), Some("old-1"));
        assert_eq!(api.fetch_calls.get(), 1);
        assert_eq!(rig.transport.open_count(), 0);

        controller.load_history("old-1");
        rig.settle();
        assert_eq!(api.fetch_calls.get(), 1);
    }

    #[test]
    fn missing_history_has_distinct_message() {
        let mut rig = Rig::new();
        let (api, controller) = controller(&rig);

        controller.load_history("gone");
        rig.settle();
        let missing = controller.state();
        assert_eq!(missing.phase, AnalysisPhase::Failed);
        assert_eq!(missing.error.as_deref(), Some(REPORT_NOT_FOUND));

        api.fail_next_fetch(server_error());
        controller.load_history("other");
        rig.settle();
        assert_eq!(controller.state().error.as_deref(), Some(REPORT_LOAD_FAILED));
    }

    #[test]
    fn teardown_stops_all_transitions() {
        let mut rig = Rig::new();
        let (api, controller) = started(&mut rig, "abc");
        api.add_record(record("abc", AnalysisStatus::Completed));
        api.gate.hold();
        let conn = rig.transport.latest();

        conn.emit_event("analysis-status", &status("abc", "COMPLETED"));
        rig.settle();
        let before = controller.state();

        controller.teardown();
        api.gate.release();
        rig.settle();

        assert_eq!(controller.state(), before);
        assert_eq!(controller.state().phase, AnalysisPhase::Processing);
        assert!(conn.is_closed());
        assert_eq!(rig.scheduler.pending(), 0);
    }
}

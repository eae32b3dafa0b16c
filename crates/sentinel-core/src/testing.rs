//! In-memory doubles for the transport, timers and REST surfaces.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::time::Duration;

use futures::channel::oneshot;
use reqwest::StatusCode;

use crate::api::{AnalysisApi, ClientError, ClientResult, OrchestrationApi};
use crate::models::{
    AnalysisRecord, AnalysisStatus, OrchestrationTask, Page, SearchFilters, TaskPriority,
    TaskStatus,
};
use crate::stream::{
    ScheduledTask, Scheduler, StreamCallbacks, StreamConnection, StreamError, StreamFrame,
    StreamRequest, StreamTransport,
};

#[derive(Clone)]
pub struct FakeConnection {
    inner: Rc<FakeConnectionInner>,
}

struct FakeConnectionInner {
    url: String,
    callbacks: StreamCallbacks,
    closed: Cell<bool>,
}

impl FakeConnection {
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    pub fn open(&self) {
        (self.inner.callbacks.on_open)();
    }

    /// Delivers a frame even after close, the way a late browser event would.
    pub fn emit(&self, frame: StreamFrame) {
        (self.inner.callbacks.on_message)(frame);
    }

    pub fn emit_event(&self, event: &str, data: &str) {
        self.emit(StreamFrame {
            event: Some(event.to_string()),
            data: data.to_string(),
        });
    }

    pub fn fail(&self, reason: &str) {
        (self.inner.callbacks.on_error)(reason.to_string());
    }
}

impl StreamConnection for FakeConnection {
    fn close(&self) {
        self.inner.closed.set(true);
    }
}

#[derive(Default)]
pub struct FakeTransport {
    connections: RefCell<Vec<FakeConnection>>,
    refuse: Cell<bool>,
}

impl FakeTransport {
    pub fn refuse_opens(&self, refuse: bool) {
        self.refuse.set(refuse);
    }

    pub fn open_count(&self) -> usize {
        self.connections.borrow().len()
    }

    pub fn live_count(&self) -> usize {
        self.connections
            .borrow()
            .iter()
            .filter(|conn| !conn.is_closed())
            .count()
    }

    pub fn connection(&self, index: usize) -> FakeConnection {
        self.connections.borrow()[index].clone()
    }

    pub fn latest(&self) -> FakeConnection {
        let connections = self.connections.borrow();
        connections[connections.len() - 1].clone()
    }

    pub fn last_url(&self) -> Option<String> {
        self.connections
            .borrow()
            .last()
            .map(|conn| conn.url().to_string())
    }
}

impl StreamTransport for FakeTransport {
    fn open(
        &self,
        request: &StreamRequest,
        callbacks: StreamCallbacks,
    ) -> Result<Box<dyn StreamConnection>, StreamError> {
        if self.refuse.get() {
            return Err(StreamError::Transport("refused".into()));
        }
        let connection = FakeConnection {
            inner: Rc::new(FakeConnectionInner {
                url: request.url.clone(),
                callbacks,
                closed: Cell::new(false),
            }),
        };
        self.connections.borrow_mut().push(connection.clone());
        Ok(Box::new(connection))
    }
}

struct PendingTask {
    id: u64,
    delay: Duration,
    task: Box<dyn FnOnce()>,
}

type TaskQueue = RefCell<Vec<PendingTask>>;

/// Timers that only fire when a test says so, in scheduling order.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Rc<TaskQueue>,
    next_id: Cell<u64>,
}

impl ManualScheduler {
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn next_delay(&self) -> Option<Duration> {
        self.queue.borrow().first().map(|pending| pending.delay)
    }

    pub fn fire_next(&self) -> bool {
        let next = {
            let mut queue = self.queue.borrow_mut();
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        };
        match next {
            Some(pending) => {
                (pending.task)();
                true
            }
            None => false,
        }
    }
}

struct ManualHandle {
    id: u64,
    queue: Weak<TaskQueue>,
}

impl ScheduledTask for ManualHandle {
    fn cancel(self: Box<Self>) {
        if let Some(queue) = self.queue.upgrade() {
            queue.borrow_mut().retain(|pending| pending.id != self.id);
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + 'static>) -> Box<dyn ScheduledTask> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.queue.borrow_mut().push(PendingTask { id, delay, task });
        Box::new(ManualHandle {
            id,
            queue: Rc::downgrade(&self.queue),
        })
    }
}

/// Holds async calls until released, so tests can interleave teardown.
#[derive(Default)]
pub struct Gate {
    held: Cell<bool>,
    waiters: RefCell<Vec<oneshot::Sender<()>>>,
}

impl Gate {
    pub fn hold(&self) {
        self.held.set(true);
    }

    pub fn release(&self) {
        self.held.set(false);
        for waiter in self.waiters.borrow_mut().drain(..) {
            let _ = waiter.send(());
        }
    }

    async fn pass(&self) {
        if !self.held.get() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.borrow_mut().push(tx);
        let _ = rx.await;
    }
}

pub fn not_found(what: &str) -> ClientError {
    ClientError::NotFound(what.to_string())
}

pub fn server_error() -> ClientError {
    ClientError::UnexpectedStatus {
        status: StatusCode::BAD_GATEWAY,
        body: "upstream unavailable".into(),
    }
}

pub fn record(id: &str, status: AnalysisStatus) -> AnalysisRecord {
    AnalysisRecord {
        id: id.to_string(),
        pipeline_type: "GITHUB_ACTIONS".into(),
        log_text: None,
        summary: Some(format!("summary for {id}")),
        root_cause: Some("registry timeout".into()),
        error_category: None,
        confidence: Some(0.9),
        status,
        failure_reason: None,
        suggested_fixes: Some(vec!["retry with mirror".into()]),
        created_at: "2024-05-01T10:15:30Z".into(),
    }
}

pub fn task(id: &str, status: TaskStatus) -> OrchestrationTask {
    OrchestrationTask {
        id: id.to_string(),
        task_identity: format!("fix-{id}"),
        request_id: format!("REQ-{id}"),
        time_ago: "1m ago".into(),
        priority: TaskPriority::High,
        collaborator: "ops-bot".into(),
        status,
        analysis_id: None,
    }
}

#[derive(Default)]
pub struct FakeAnalysisApi {
    pub submit_calls: Cell<usize>,
    pub fetch_calls: Cell<usize>,
    pub search_calls: Cell<usize>,
    pub deleted: RefCell<Vec<Vec<String>>>,
    pub last_filters: RefCell<Option<SearchFilters>>,
    pub gate: Gate,
    submit_results: RefCell<VecDeque<ClientResult<String>>>,
    records: RefCell<HashMap<String, AnalysisRecord>>,
    fetch_failures: RefCell<VecDeque<ClientError>>,
    search_results: RefCell<VecDeque<ClientResult<Page<AnalysisRecord>>>>,
    delete_failures: RefCell<VecDeque<ClientError>>,
}

impl FakeAnalysisApi {
    pub fn script_submit(&self, result: ClientResult<String>) {
        self.submit_results.borrow_mut().push_back(result);
    }

    pub fn add_record(&self, record: AnalysisRecord) {
        self.records.borrow_mut().insert(record.id.clone(), record);
    }

    pub fn fail_next_fetch(&self, err: ClientError) {
        self.fetch_failures.borrow_mut().push_back(err);
    }

    pub fn script_search(&self, result: ClientResult<Page<AnalysisRecord>>) {
        self.search_results.borrow_mut().push_back(result);
    }

    pub fn fail_next_delete(&self, err: ClientError) {
        self.delete_failures.borrow_mut().push_back(err);
    }
}

impl AnalysisApi for FakeAnalysisApi {
    async fn submit_analysis(&self, _pipeline_type: &str, _log_text: &str) -> ClientResult<String> {
        let call = self.submit_calls.get() + 1;
        self.submit_calls.set(call);
        self.gate.pass().await;
        self.submit_results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("analysis-{call}")))
    }

    async fn fetch_analysis(&self, analysis_id: &str) -> ClientResult<AnalysisRecord> {
        self.fetch_calls.set(self.fetch_calls.get() + 1);
        self.gate.pass().await;
        if let Some(err) = self.fetch_failures.borrow_mut().pop_front() {
            return Err(err);
        }
        self.records
            .borrow()
            .get(analysis_id)
            .cloned()
            .ok_or_else(|| not_found(analysis_id))
    }

    async fn search_analyses(&self, filters: &SearchFilters) -> ClientResult<Page<AnalysisRecord>> {
        self.search_calls.set(self.search_calls.get() + 1);
        *self.last_filters.borrow_mut() = Some(filters.clone());
        self.gate.pass().await;
        self.search_results.borrow_mut().pop_front().unwrap_or_else(|| {
            Ok(Page {
                content: Vec::new(),
                total_pages: 0,
                total_elements: 0,
                size: filters.size,
                number: filters.page,
            })
        })
    }

    async fn delete_analyses(&self, ids: &[String]) -> ClientResult<()> {
        self.deleted.borrow_mut().push(ids.to_vec());
        self.gate.pass().await;
        match self.delete_failures.borrow_mut().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct FakeOrchestrationApi {
    pub pull_calls: Cell<usize>,
    pub triggered: RefCell<Vec<String>>,
    pub stopped: RefCell<Vec<String>>,
    pub promoted: RefCell<Vec<String>>,
    pub gate: Gate,
    /// Holds only stop calls, so pulls can land while a kill is pending.
    pub stop_gate: Gate,
    tasks: RefCell<Vec<OrchestrationTask>>,
    pull_failures: RefCell<VecDeque<ClientError>>,
    trigger_failures: RefCell<VecDeque<ClientError>>,
    stop_failures: RefCell<VecDeque<ClientError>>,
}

impl FakeOrchestrationApi {
    pub fn set_tasks(&self, tasks: Vec<OrchestrationTask>) {
        *self.tasks.borrow_mut() = tasks;
    }

    pub fn fail_next_pull(&self, err: ClientError) {
        self.pull_failures.borrow_mut().push_back(err);
    }

    pub fn fail_next_trigger(&self, err: ClientError) {
        self.trigger_failures.borrow_mut().push_back(err);
    }

    pub fn fail_next_stop(&self, err: ClientError) {
        self.stop_failures.borrow_mut().push_back(err);
    }
}

impl OrchestrationApi for FakeOrchestrationApi {
    async fn active_tasks(&self) -> ClientResult<Vec<OrchestrationTask>> {
        self.pull_calls.set(self.pull_calls.get() + 1);
        self.gate.pass().await;
        if let Some(err) = self.pull_failures.borrow_mut().pop_front() {
            return Err(err);
        }
        Ok(self.tasks.borrow().clone())
    }

    async fn promote_to_orchestration(&self, analysis_id: &str) -> ClientResult<()> {
        self.promoted.borrow_mut().push(analysis_id.to_string());
        self.gate.pass().await;
        Ok(())
    }

    async fn trigger_task_fix(&self, task_id: &str) -> ClientResult<()> {
        self.triggered.borrow_mut().push(task_id.to_string());
        self.gate.pass().await;
        match self.trigger_failures.borrow_mut().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn stop_task(&self, task_id: &str) -> ClientResult<()> {
        self.stopped.borrow_mut().push(task_id.to_string());
        self.gate.pass().await;
        self.stop_gate.pass().await;
        match self.stop_failures.borrow_mut().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

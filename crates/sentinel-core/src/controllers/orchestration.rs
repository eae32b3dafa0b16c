use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{ChangeNotifier, Runtime};
use crate::api::OrchestrationApi;
use crate::logs::LogBuffers;
use crate::models::{OrchestrationTask, TaskStatus};
use crate::store::{Phase, ReconciliationStore};
use crate::stream::{
    ConsoleEvent, ConsoleTopic, EventStreamClient, ScheduledTask, StreamNotice,
    CONSOLE_CHANNEL_KEY,
};

pub const BOOTSTRAP_LINES: [&str; 2] = [
    "🚀 [SYSTEM] Initializing Sentinel execution environment...",
    "📡 [SYSTEM] Establishing secure SSE tunnel...",
];

pub const TERMINATION_LINE: &str = "🛑 [SYSTEM] Execution terminated by operator.";

/// One rendered task row: server data plus the status to display.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskRow {
    pub task: Rc<OrchestrationTask>,
    pub status: TaskStatus,
    pub locked: bool,
}

/// Tracks concurrently executing remediation tasks and their log tails.
pub struct OrchestrationController<A: OrchestrationApi + 'static> {
    inner: Rc<OrchestrationInner<A>>,
}

impl<A: OrchestrationApi + 'static> Clone for OrchestrationController<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

struct OrchestrationInner<A: OrchestrationApi + 'static> {
    api: Rc<A>,
    runtime: Runtime,
    resync_delay: Duration,
    stream: EventStreamClient<ConsoleTopic>,
    tasks: RefCell<ReconciliationStore<OrchestrationTask>>,
    /// Sticky lock: tasks the operator just triggered. Only this controller
    /// reads or writes it.
    executing: RefCell<HashSet<String>>,
    logs: RefCell<LogBuffers>,
    loading: Cell<bool>,
    notice: RefCell<Option<String>>,
    resync_timer: RefCell<Option<Box<dyn ScheduledTask>>>,
    pull_seq: Cell<u64>,
    applied_seq: Cell<u64>,
    alive: Cell<bool>,
    notifier: ChangeNotifier,
}

impl<A: OrchestrationApi + 'static> OrchestrationController<A> {
    pub fn new(
        api: Rc<A>,
        runtime: Runtime,
        resync_delay: Duration,
        log_buffer_lines: usize,
    ) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<OrchestrationInner<A>>| {
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
            OrchestrationInner {
                api,
                runtime,
                resync_delay,
                stream,
                tasks: RefCell::new(ReconciliationStore::new()),
                executing: RefCell::new(HashSet::new()),
                logs: RefCell::new(LogBuffers::new(log_buffer_lines)),
                loading: Cell::new(true),
                notice: RefCell::new(None),
                resync_timer: RefCell::new(None),
                pull_seq: Cell::new(0),
                applied_seq: Cell::new(0),
                alive: Cell::new(true),
                notifier: ChangeNotifier::default(),
            }
        });
        Self { inner }
    }

    pub fn on_change(&self, listener: Rc<dyn Fn()>) {
        self.inner.notifier.set(listener);
    }

    /// Opens the console channel and pulls the active task list.
    pub fn mount(&self) {
        if !self.inner.alive.get() {
            return;
        }
        self.inner.stream.connect(CONSOLE_CHANNEL_KEY);
        self.inner.refresh();
    }

    /// Re-pulls the task list and reopens the console channel if it was lost.
    pub fn refresh(&self) {
        self.inner.reconnect();
        self.inner.refresh();
    }

    /// Tab became visible or focused again; push events may have been missed.
    pub fn on_visibility_regained(&self) {
        debug!("visibility regained, re-pulling tasks");
        self.inner.reconnect();
        self.inner.refresh();
    }

    pub fn tasks(&self) -> Vec<TaskRow> {
        let executing = self.inner.executing.borrow();
        self.inner
            .tasks
            .borrow()
            .iter()
            .map(|entry| TaskRow {
                task: Rc::clone(entry.entity()),
                status: entry.displayed_phase().into(),
                locked: executing.contains(&entry.entity().id),
            })
            .collect()
    }

    pub fn displayed_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.inner
            .tasks
            .borrow()
            .get(task_id)
            .map(|entry| entry.displayed_phase().into())
    }

    pub fn logs(&self, task_id: &str) -> Vec<String> {
        self.inner.logs.borrow().lines(task_id)
    }

    pub fn is_locked(&self, task_id: &str) -> bool {
        self.inner.executing.borrow().contains(task_id)
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loading.get()
    }

    pub fn pull_error(&self) -> Option<String> {
        self.inner.tasks.borrow().error().map(str::to_string)
    }

    pub fn notice(&self) -> Option<String> {
        self.inner.notice.borrow().clone()
    }

    pub fn dismiss_notice(&self) {
        if self.inner.notice.borrow_mut().take().is_some() {
            self.inner.notifier.notify();
        }
    }

    pub fn is_live(&self) -> bool {
        self.inner.stream.is_subscribed()
    }

    /// Locks the task, seeds its console and shows it in progress before
    /// the remote trigger returns.
    pub fn trigger_fix(&self, task_id: &str) {
        let inner = &self.inner;
        if !inner.alive.get() {
            return;
        }
        if !inner.executing.borrow_mut().insert(task_id.to_string()) {
            debug!(%task_id, "task already executing");
            return;
        }
        inner.logs.borrow_mut().seed(task_id, BOOTSTRAP_LINES);
        inner
            .tasks
            .borrow_mut()
            .set_override(task_id, Some(Phase::Active));
        inner.notifier.notify();

        let weak = Rc::downgrade(inner);
        let api = Rc::clone(&inner.api);
        let task_id = task_id.to_string();
        inner.runtime.spawn(async move {
            let result = api.trigger_task_fix(&task_id).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.alive.get() {
                return;
            }
            match result {
                Ok(()) => info!(%task_id, "fix triggered"),
                Err(err) => {
                    warn!(%task_id, %err, "fix trigger failed, resynchronising");
                    inner.executing.borrow_mut().remove(&task_id);
                    inner.tasks.borrow_mut().set_override(&task_id, None);
                    *inner.notice.borrow_mut() = Some(err.user_message());
                    inner.notifier.notify();
                    inner.refresh();
                }
            }
        });
    }

    /// Shows the task failed, asks the engine to stop it, and always
    /// releases its lock afterwards. The task stays locked while the stop is
    /// in flight so intervening pulls keep the failed status.
    pub fn force_kill(&self, task_id: &str) {
        let inner = &self.inner;
        if !inner.alive.get() {
            return;
        }
        inner.executing.borrow_mut().insert(task_id.to_string());
        inner
            .tasks
            .borrow_mut()
            .set_override(task_id, Some(Phase::Failed));
        inner.notifier.notify();

        let weak = Rc::downgrade(inner);
        let api = Rc::clone(&inner.api);
        let task_id = task_id.to_string();
        inner.runtime.spawn(async move {
            let result = api.stop_task(&task_id).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.alive.get() {
                return;
            }
            inner.executing.borrow_mut().remove(&task_id);
            match result {
                Ok(()) => {
                    info!(%task_id, "task stopped");
                    inner.logs.borrow_mut().append(&task_id, TERMINATION_LINE);
                    inner.notifier.notify();
                }
                Err(err) => {
                    warn!(%task_id, %err, "stop failed, resynchronising");
                    *inner.notice.borrow_mut() = Some(err.user_message());
                    inner.refresh();
                }
            }
        });
    }

    /// Hands a finished analysis to the orchestration engine.
    pub fn promote(&self, analysis_id: &str) {
        let inner = &self.inner;
        if !inner.alive.get() {
            return;
        }
        let weak = Rc::downgrade(inner);
        let api = Rc::clone(&inner.api);
        let analysis_id = analysis_id.to_string();
        inner.runtime.spawn(async move {
            let result = api.promote_to_orchestration(&analysis_id).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.alive.get() {
                return;
            }
            match result {
                Ok(()) => {
                    info!(%analysis_id, "analysis promoted");
                    inner.refresh();
                }
                Err(err) => {
                    warn!(%analysis_id, %err, "promotion failed");
                    *inner.notice.borrow_mut() = Some(err.user_message());
                    inner.notifier.notify();
                }
            }
        });
    }

    pub fn teardown(&self) {
        let inner = &self.inner;
        inner.alive.set(false);
        inner.cancel_resync();
        inner.stream.disconnect();
        inner.notifier.clear();
        inner.executing.borrow_mut().clear();
        inner.tasks.borrow_mut().reset();
        inner.logs.borrow_mut().clear();
    }
}

impl<A: OrchestrationApi + 'static> OrchestrationInner<A> {
    fn reconnect(&self) {
        if !self.alive.get() || self.stream.is_subscribed() {
            return;
        }
        info!("console stream offline, reconnecting");
        self.stream.connect(CONSOLE_CHANNEL_KEY);
        self.notice.borrow_mut().take();
    }

    fn refresh(self: &Rc<Self>) {
        if !self.alive.get() {
            return;
        }
        let seq = self.pull_seq.get() + 1;
        self.pull_seq.set(seq);
        self.loading.set(true);

        let weak = Rc::downgrade(self);
        let api = Rc::clone(&self.api);
        self.runtime.spawn(async move {
            let result = api.active_tasks().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.alive.get() {
                return;
            }
            if seq < inner.applied_seq.get() {
                debug!(seq, "dropping out-of-order task pull");
                return;
            }
            inner.applied_seq.set(seq);
            if seq == inner.pull_seq.get() {
                inner.loading.set(false);
            }

            match result {
                Ok(tasks) => {
                    let executing = inner.executing.borrow().clone();
                    let changed = inner.tasks.borrow_mut().reconcile(tasks, &executing);
                    debug!(changed, count = inner.tasks.borrow().len(), "tasks reconciled");
                }
                Err(err) => {
                    warn!(%err, "task pull failed");
                    inner.tasks.borrow_mut().mark_pull_failed(err.user_message());
                }
            }
            inner.notifier.notify();
        });
    }

    fn on_stream(self: &Rc<Self>, notice: StreamNotice<ConsoleEvent>) {
        if !self.alive.get() {
            return;
        }
        match notice {
            StreamNotice::Opened => {}
            StreamNotice::Event(ConsoleEvent::Notification(_)) => self.schedule_resync(),
            StreamNotice::Event(ConsoleEvent::AgentLog(event)) => {
                self.logs.borrow_mut().append(&event.task_id, event.log);
                self.notifier.notify();
            }
            StreamNotice::Event(ConsoleEvent::Pipeline { .. }) => {}
            StreamNotice::Lost { attempts, .. } => {
                warn!(attempts, "console stream lost");
                *self.notice.borrow_mut() =
                    Some("Live console feed lost. Refresh to reconnect.".to_string());
                self.notifier.notify();
            }
        }
    }

    /// Waits for the backend to settle, then drops every lock and re-pulls.
    fn schedule_resync(self: &Rc<Self>) {
        self.cancel_resync();
        let weak = Rc::downgrade(self);
        let timer = self.runtime.scheduler.schedule(
            self.resync_delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.resync();
                }
            }),
        );
        *self.resync_timer.borrow_mut() = Some(timer);
    }

    fn resync(self: &Rc<Self>) {
        self.resync_timer.borrow_mut().take();
        if !self.alive.get() {
            return;
        }
        debug!("notification settled, releasing locks");
        self.executing.borrow_mut().clear();
        self.refresh();
    }

    fn cancel_resync(&self) {
        let pending = self.resync_timer.borrow_mut().take();
        if let Some(timer) = pending {
            timer.cancel();
        }
    }
}

//! Lifecycle controllers. Each owns its stream subscription and state, is
//! driven by user operations and push notices, and tells a single listener
//! when something observable changed.

mod analysis;
mod history;
mod monitor;
mod orchestration;

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use futures::task::{LocalSpawn, LocalSpawnExt};
use tracing::error;

use crate::config::AppConfig;
use crate::stream::{BackoffPolicy, Scheduler, StreamTransport};

pub use analysis::{AnalysisController, AnalysisPhase, AnalysisState};
pub use history::HistoryBrowser;
pub use monitor::{PipelineMonitor, PipelineStats, PULSE_FEED_LEN};
pub use orchestration::{
    OrchestrationController, TaskRow, BOOTSTRAP_LINES, TERMINATION_LINE,
};

/// Host services the controllers run on: push transport, timers and a
/// single-threaded executor.
#[derive(Clone)]
pub struct Runtime {
    pub transport: Rc<dyn StreamTransport>,
    pub scheduler: Rc<dyn Scheduler>,
    pub spawner: Rc<dyn LocalSpawn>,
    pub stream_endpoint: String,
    pub backoff: BackoffPolicy,
}

impl Runtime {
    pub fn new(
        config: &AppConfig,
        transport: Rc<dyn StreamTransport>,
        scheduler: Rc<dyn Scheduler>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        Self {
            transport,
            scheduler,
            spawner,
            stream_endpoint: config.stream_endpoint(),
            backoff: config.backoff_policy(),
        }
    }

    pub(crate) fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        if let Err(err) = self.spawner.spawn_local(future) {
            error!(%err, "failed to spawn controller task");
        }
    }
}

#[derive(Default)]
pub(crate) struct ChangeNotifier {
    listener: RefCell<Option<Rc<dyn Fn()>>>,
}

impl ChangeNotifier {
    pub(crate) fn set(&self, listener: Rc<dyn Fn()>) {
        *self.listener.borrow_mut() = Some(listener);
    }

    pub(crate) fn clear(&self) {
        self.listener.borrow_mut().take();
    }

    pub(crate) fn notify(&self) {
        let listener = self.listener.borrow().clone();
        if let Some(listener) = listener {
            listener();
        }
    }
}

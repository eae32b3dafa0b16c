use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::{AnalysisController, ChangeNotifier, Runtime};
use crate::api::AnalysisApi;
use crate::models::{AnalysisRecord, SearchFilters};
use crate::store::{ReconciliationStore, ReplaceOptions};

/// Paged search over finished analyses with row selection and bulk delete.
pub struct HistoryBrowser<A: AnalysisApi + 'static> {
    inner: Rc<HistoryInner<A>>,
}

impl<A: AnalysisApi + 'static> Clone for HistoryBrowser<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

struct HistoryInner<A: AnalysisApi + 'static> {
    api: Rc<A>,
    runtime: Runtime,
    records: RefCell<ReconciliationStore<AnalysisRecord>>,
    filters: RefCell<SearchFilters>,
    total_pages: Cell<u32>,
    selected: RefCell<BTreeSet<String>>,
    loading: Cell<bool>,
    notice: RefCell<Option<String>>,
    seq: Cell<u64>,
    alive: Cell<bool>,
    notifier: ChangeNotifier,
}

impl<A: AnalysisApi + 'static> HistoryBrowser<A> {
    pub fn new(api: Rc<A>, runtime: Runtime) -> Self {
        Self {
            inner: Rc::new(HistoryInner {
                api,
                runtime,
                records: RefCell::new(ReconciliationStore::new()),
                filters: RefCell::new(SearchFilters::default()),
                total_pages: Cell::new(0),
                selected: RefCell::new(BTreeSet::new()),
                loading: Cell::new(false),
                notice: RefCell::new(None),
                seq: Cell::new(0),
                alive: Cell::new(true),
                notifier: ChangeNotifier::default(),
            }),
        }
    }

    pub fn on_change(&self, listener: Rc<dyn Fn()>) {
        self.inner.notifier.set(listener);
    }

    /// Shows exactly the requested page.
    pub fn search(&self, filters: SearchFilters) {
        self.inner.pull(filters, true);
    }

    /// Appends the next page to what is already shown.
    pub fn load_more(&self) -> bool {
        let next = {
            let filters = self.inner.filters.borrow();
            if filters.page + 1 >= self.inner.total_pages.get() {
                return false;
            }
            SearchFilters {
                page: filters.page + 1,
                ..filters.clone()
            }
        };
        self.inner.pull(next, false);
        true
    }

    pub fn reload(&self) {
        let filters = self.inner.filters.borrow().clone();
        self.inner.pull(filters, true);
    }

    pub fn records(&self) -> Vec<Rc<AnalysisRecord>> {
        self.inner
            .records
            .borrow()
            .iter()
            .map(|entry| Rc::clone(entry.entity()))
            .collect()
    }

    pub fn filters(&self) -> SearchFilters {
        self.inner.filters.borrow().clone()
    }

    pub fn total_pages(&self) -> u32 {
        self.inner.total_pages.get()
    }

    pub fn page_label(&self) -> String {
        let total = self.inner.total_pages.get().max(1);
        let current = (self.inner.filters.borrow().page + 1).min(total);
        format!("Page {current} of {total}")
    }

    pub fn has_previous(&self) -> bool {
        self.inner.filters.borrow().page > 0
    }

    pub fn has_next(&self) -> bool {
        self.inner.filters.borrow().page + 1 < self.inner.total_pages.get()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loading.get()
    }

    pub fn pull_error(&self) -> Option<String> {
        self.inner.records.borrow().error().map(str::to_string)
    }

    pub fn notice(&self) -> Option<String> {
        self.inner.notice.borrow().clone()
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.inner.selected.borrow().contains(id)
    }

    pub fn selected(&self) -> Vec<String> {
        self.inner.selected.borrow().iter().cloned().collect()
    }

    pub fn toggle_selected(&self, id: &str) {
        {
            let mut selected = self.inner.selected.borrow_mut();
            if !selected.remove(id) {
                selected.insert(id.to_string());
            }
        }
        self.inner.notifier.notify();
    }

    pub fn clear_selection(&self) {
        if !std::mem::take(&mut *self.inner.selected.borrow_mut()).is_empty() {
            self.inner.notifier.notify();
        }
    }

    /// Deletes the selected rows, then re-runs the current search.
    pub fn delete_selected(&self) {
        let inner = &self.inner;
        let ids = self.selected();
        if ids.is_empty() || !inner.alive.get() {
            return;
        }

        let weak = Rc::downgrade(inner);
        let api = Rc::clone(&inner.api);
        inner.runtime.spawn(async move {
            let result = api.delete_analyses(&ids).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.alive.get() {
                return;
            }
            match result {
                Ok(()) => {
                    info!(count = ids.len(), "analyses deleted");
                    inner.selected.borrow_mut().clear();
                }
                Err(err) => {
                    warn!(%err, "delete failed");
                    *inner.notice.borrow_mut() = Some(err.user_message());
                }
            }
            let filters = inner.filters.borrow().clone();
            inner.pull(filters, true);
        });
    }

    /// Opens a stored analysis in the analysis view.
    pub fn view(&self, id: &str, analysis: &AnalysisController<A>) {
        analysis.load_history(id);
    }

    pub fn teardown(&self) {
        self.inner.alive.set(false);
        self.inner.notifier.clear();
    }
}

impl<A: AnalysisApi + 'static> HistoryInner<A> {
    fn pull(self: &Rc<Self>, filters: SearchFilters, replace: bool) {
        if !self.alive.get() {
            return;
        }
        let seq = self.seq.get() + 1;
        self.seq.set(seq);
        self.loading.set(true);
        self.notice.borrow_mut().take();
        self.notifier.notify();

        let weak = Rc::downgrade(self);
        let api = Rc::clone(&self.api);
        self.runtime.spawn(async move {
            let result = api.search_analyses(&filters).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.alive.get() {
                return;
            }
            if seq != inner.seq.get() {
                debug!(seq, "dropping superseded search");
                return;
            }
            inner.loading.set(false);

            match result {
                Ok(page) => {
                    let unlocked = HashSet::new();
                    let options = ReplaceOptions {
                        page: if replace { 0 } else { filters.page },
                        locked: &unlocked,
                    };
                    inner.records.borrow_mut().replace_all(page.content, options);
                    inner.total_pages.set(page.total_pages);
                    let present: BTreeSet<String> =
                        inner.records.borrow().keys().into_iter().collect();
                    inner.selected.borrow_mut().retain(|id| present.contains(id));
                }
                Err(err) => {
                    warn!(%err, "history search failed");
                    inner.records.borrow_mut().mark_pull_failed(err.user_message());
                    inner.total_pages.set(0);
                    inner.selected.borrow_mut().clear();
                }
            }
            *inner.filters.borrow_mut() = filters;
            inner.notifier.notify();
        });
    }
}

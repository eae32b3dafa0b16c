//! Render-stable collection of tracked entities.
//!
//! Push events arrive as single-entity upserts, pulls arrive as whole lists.
//! Both funnel through the merge functions here, which are the only writers.
//! Entries are held behind `Rc` so an echo with identical content keeps the
//! previous allocation, and `revision()` only advances on a real change.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Lifecycle position shared by every entity taxonomy.
///
/// Partial order: `Pending < Active < {Completed, Failed}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Pending,
    Active,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Active => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// True when moving from `self` to `next` would go backwards.
    pub fn regresses_to(self, next: Phase) -> bool {
        next.rank() < self.rank()
    }
}

pub trait TrackedEntity: Clone + Serialize {
    fn key(&self) -> &str;
    fn phase(&self) -> Phase;
    fn set_phase(&mut self, phase: Phase);
}

/// One stored entity plus the client-local status override.
#[derive(Debug)]
pub struct Tracked<E> {
    entity: Rc<E>,
    local_override: Option<Phase>,
}

impl<E> Clone for Tracked<E> {
    fn clone(&self) -> Self {
        Self {
            entity: Rc::clone(&self.entity),
            local_override: self.local_override,
        }
    }
}

impl<E: TrackedEntity> Tracked<E> {
    fn new(entity: E) -> Self {
        Self {
            entity: Rc::new(entity),
            local_override: None,
        }
    }

    pub fn entity(&self) -> &Rc<E> {
        &self.entity
    }

    pub fn server_phase(&self) -> Phase {
        self.entity.phase()
    }

    pub fn local_override(&self) -> Option<Phase> {
        self.local_override
    }

    pub fn displayed_phase(&self) -> Phase {
        self.local_override.unwrap_or_else(|| self.entity.phase())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// Incoming content matched the stored entity byte for byte.
    Unchanged,
    /// Incoming status would move the entity backwards.
    Stale,
}

impl UpsertOutcome {
    pub fn changed(self) -> bool {
        matches!(self, Self::Inserted | Self::Replaced)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ReplaceOptions<'a> {
    /// Zero-based page the pull fetched; page zero replaces wholesale.
    pub page: u32,
    /// Keys the caller is actively executing.
    pub locked: &'a HashSet<String>,
}

#[derive(Debug)]
pub struct ReconciliationStore<E> {
    entries: Vec<Tracked<E>>,
    fingerprints: HashMap<String, Value>,
    revision: u64,
    error: Option<String>,
}

impl<E> Default for ReconciliationStore<E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            fingerprints: HashMap::new(),
            revision: 0,
            error: None,
        }
    }
}

impl<E> Clone for ReconciliationStore<E> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            fingerprints: self.fingerprints.clone(),
            revision: self.revision,
            error: self.error.clone(),
        }
    }
}

impl<E: TrackedEntity> ReconciliationStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tracked<E>> {
        self.entries.iter()
    }

    pub fn get(&self, key: &str) -> Option<&Tracked<E>> {
        self.entries.iter().find(|entry| entry.entity.key() == key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.entity.key().to_string())
            .collect()
    }

    pub fn upsert(&mut self, incoming: E) -> UpsertOutcome {
        let fingerprint = fingerprint(&incoming);
        let key = incoming.key().to_string();

        let Some(index) = self.position(&key) else {
            self.fingerprints.insert(key, fingerprint);
            self.entries.insert(0, Tracked::new(incoming));
            self.touch();
            return UpsertOutcome::Inserted;
        };

        if self.fingerprints.get(&key) == Some(&fingerprint) {
            return UpsertOutcome::Unchanged;
        }

        let existing = &self.entries[index];
        let current = existing.server_phase();
        if current.regresses_to(incoming.phase()) {
            debug!(%key, ?current, "ignoring out-of-order update");
            return UpsertOutcome::Stale;
        }

        let local_override = existing.local_override;
        self.fingerprints.insert(key, fingerprint);
        self.entries[index] = Tracked {
            entity: Rc::new(incoming),
            local_override,
        };
        self.touch();
        UpsertOutcome::Replaced
    }

    /// Applies a list pull. Page zero rebuilds the collection in pull order;
    /// later pages merge into what is already loaded. Locked entities the
    /// pull omits are promoted to `Completed` instead of disappearing.
    pub fn replace_all(&mut self, incoming: Vec<E>, options: ReplaceOptions<'_>) -> bool {
        if options.page > 0 {
            return self.merge_page(incoming, options.locked);
        }

        let previous_entries: Vec<Tracked<E>> = self.entries.drain(..).collect();
        let previous: HashMap<&str, &Tracked<E>> = previous_entries
            .iter()
            .map(|entry| (entry.entity.key(), entry))
            .collect();

        let mut changed = self.error.take().is_some();
        let mut next = Vec::with_capacity(incoming.len());
        let mut fingerprints = HashMap::with_capacity(incoming.len());
        let mut seen = HashSet::with_capacity(incoming.len());

        for entity in incoming {
            let key = entity.key().to_string();
            if !seen.insert(key.clone()) {
                warn!(%key, "pull returned duplicate key, keeping first");
                continue;
            }
            let fingerprint = fingerprint(&entity);
            let current = previous
                .get(key.as_str())
                .and_then(|existing| existing.local_override);
            let local_override = lock_override(options.locked, &key, entity.phase(), current);
            let tracked = match previous.get(key.as_str()) {
                Some(existing) if self.fingerprints.get(&key) == Some(&fingerprint) => {
                    let mut kept = Tracked::clone(existing);
                    kept.local_override = local_override;
                    kept
                }
                _ => Tracked {
                    entity: Rc::new(entity),
                    local_override,
                },
            };
            changed |= previous
                .get(key.as_str())
                .map(|existing| !same_view(existing, &tracked))
                .unwrap_or(true);
            fingerprints.insert(key, fingerprint);
            next.push(tracked);
        }

        for existing in previous_entries.iter() {
            let key = existing.entity.key();
            if seen.contains(key) {
                continue;
            }
            if !(options.locked.contains(key) || existing.displayed_phase() == Phase::Active) {
                changed = true;
                continue;
            }
            if existing.local_override == Some(Phase::Failed)
                || (existing.local_override.is_none() && existing.server_phase() == Phase::Completed)
            {
                if let Some(kept) = self.fingerprints.get(key) {
                    fingerprints.insert(key.to_string(), kept.clone());
                }
                next.push(Tracked::clone(existing));
                continue;
            }
            let promoted = promote_completed(existing);
            fingerprints.insert(key.to_string(), fingerprint(promoted.entity.as_ref()));
            next.push(promoted);
            changed = true;
        }

        changed |= next.len() != previous_entries.len()
            || next
                .iter()
                .zip(previous_entries.iter())
                .any(|(left, right)| left.entity.key() != right.entity.key());

        self.entries = next;
        self.fingerprints = fingerprints;
        if changed {
            self.touch();
        }
        changed
    }

    /// Orchestration merge: existing rows keep their position and take the
    /// pulled data, rows missing from the pull stay (promoted to `Completed`
    /// when they were executing), and unseen ids are appended.
    pub fn reconcile(&mut self, incoming: Vec<E>, locked: &HashSet<String>) -> bool {
        let mut changed = self.error.take().is_some();
        let mut incoming_by_key: HashMap<String, E> = HashMap::with_capacity(incoming.len());
        let mut arrival: Vec<String> = Vec::with_capacity(incoming.len());
        for entity in incoming {
            let key = entity.key().to_string();
            if incoming_by_key.contains_key(&key) {
                continue;
            }
            arrival.push(key.clone());
            incoming_by_key.insert(key, entity);
        }

        for index in 0..self.entries.len() {
            let key = self.entries[index].entity.key().to_string();
            let replacement = match incoming_by_key.remove(&key) {
                Some(update) => {
                    let fingerprint = fingerprint(&update);
                    let local_override = lock_override(
                        locked,
                        &key,
                        update.phase(),
                        self.entries[index].local_override,
                    );
                    if self.fingerprints.get(&key) == Some(&fingerprint) {
                        let existing = &mut self.entries[index];
                        if existing.local_override != local_override {
                            existing.local_override = local_override;
                            changed = true;
                        }
                        continue;
                    }
                    self.fingerprints.insert(key, fingerprint);
                    Tracked {
                        entity: Rc::new(update),
                        local_override,
                    }
                }
                None => {
                    let existing = &self.entries[index];
                    if !(locked.contains(&key) || existing.displayed_phase() == Phase::Active) {
                        continue;
                    }
                    if existing.local_override == Some(Phase::Failed)
                        || (existing.local_override.is_none()
                            && existing.server_phase() == Phase::Completed)
                    {
                        continue;
                    }
                    let promoted = promote_completed(existing);
                    self.fingerprints
                        .insert(key, fingerprint(promoted.entity.as_ref()));
                    promoted
                }
            };
            self.entries[index] = replacement;
            changed = true;
        }

        for key in arrival {
            if let Some(entity) = incoming_by_key.remove(&key) {
                let mut fresh = Tracked::new(entity);
                fresh.local_override = lock_override(locked, &key, fresh.server_phase(), None);
                self.fingerprints.insert(key, fingerprint(fresh.entity.as_ref()));
                self.entries.push(fresh);
                changed = true;
            }
        }

        if changed {
            self.touch();
        }
        changed
    }

    /// Sets or clears the client-local status for `key`.
    pub fn set_override(&mut self, key: &str, phase: Option<Phase>) -> bool {
        let Some(index) = self.position(key) else {
            return false;
        };
        if self.entries[index].local_override == phase {
            return false;
        }
        self.entries[index].local_override = phase;
        self.touch();
        true
    }

    /// Explicit empty state after a failed pull.
    pub fn mark_pull_failed(&mut self, message: impl Into<String>) {
        self.entries.clear();
        self.fingerprints.clear();
        self.error = Some(message.into());
        self.touch();
    }

    /// Drops every entry, as on teardown.
    pub fn reset(&mut self) {
        if self.entries.is_empty() && self.error.is_none() {
            return;
        }
        self.entries.clear();
        self.fingerprints.clear();
        self.error = None;
        self.touch();
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.entity.key() == key)
    }

    fn merge_page(&mut self, incoming: Vec<E>, locked: &HashSet<String>) -> bool {
        let mut changed = self.error.take().is_some();
        for entity in incoming {
            let key = entity.key().to_string();
            let fingerprint = fingerprint(&entity);
            match self.position(&key) {
                Some(index) => {
                    if self.fingerprints.get(&key) == Some(&fingerprint) {
                        continue;
                    }
                    let local_override = lock_override(
                        locked,
                        &key,
                        entity.phase(),
                        self.entries[index].local_override,
                    );
                    self.entries[index] = Tracked {
                        entity: Rc::new(entity),
                        local_override,
                    };
                }
                None => {
                    let mut fresh = Tracked::new(entity);
                    fresh.local_override = lock_override(locked, &key, fresh.server_phase(), None);
                    self.entries.push(fresh);
                }
            }
            self.fingerprints.insert(key, fingerprint);
            changed = true;
        }
        if changed {
            self.touch();
        }
        changed
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

fn fingerprint<E: Serialize>(entity: &E) -> Value {
    serde_json::to_value(entity).unwrap_or(Value::Null)
}

/// Locked keys display as in progress unless the server already reports a
/// failure. A pending kill keeps showing `Failed` for as long as the lock holds.
fn lock_override(
    locked: &HashSet<String>,
    key: &str,
    server: Phase,
    current: Option<Phase>,
) -> Option<Phase> {
    if !locked.contains(key) {
        return None;
    }
    match (current, server) {
        (Some(Phase::Failed), _) => Some(Phase::Failed),
        (_, Phase::Failed) => None,
        _ => Some(Phase::Active),
    }
}

fn promote_completed<E: TrackedEntity>(existing: &Tracked<E>) -> Tracked<E> {
    let mut entity = existing.entity.as_ref().clone();
    entity.set_phase(Phase::Completed);
    Tracked::new(entity)
}

fn same_view<E>(left: &Tracked<E>, right: &Tracked<E>) -> bool {
    Rc::ptr_eq(&left.entity, &right.entity) && left.local_override == right.local_override
}

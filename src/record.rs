//! Call records and the shared log store.
//!
//! Every intercepted call, construction or property access produces one
//! [`CallRecord`]. Records are appended to the [`LogStore`] as soon as the
//! call starts and enriched afterwards: first with the synchronous outcome,
//! then (for deferred results) with the settlement.

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Allocate the next process-wide record id. Ids are strictly increasing.
pub fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> f64 {
    web_time::SystemTime::now()
        .duration_since(web_time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// What the intercepted operation received.
#[derive(Debug, Clone)]
pub enum CallInput<V> {
    /// Arguments of a method call or construction.
    Args(Vec<V>),
    /// Value read by a property get, or written by a property set.
    Value(V),
}

/// Synchronous outcome of a call. Exactly one is recorded per call.
#[derive(Debug, Clone)]
pub enum Outcome<V> {
    Returned { value: V, timestamp: f64 },
    Threw { error: V, timestamp: f64 },
}

/// Later completion of a deferred response.
#[derive(Debug, Clone)]
pub enum Settlement<V> {
    Resolved { value: V, timestamp: f64 },
    Rejected { reason: V, timestamp: f64 },
}

/// One intercepted invocation or property access.
#[derive(Debug, Clone)]
pub struct CallRecord<V> {
    pub id: u64,
    /// Object the call or access happened on.
    pub target: V,
    pub timestamp: f64,
    pub input: CallInput<V>,
    pub outcome: Option<Outcome<V>>,
    pub settlement: Option<Settlement<V>>,
}

/// Records are shared between the store and the hook that fills them in.
pub type RecordRef<V> = Rc<RefCell<CallRecord<V>>>;

impl<V> CallRecord<V> {
    pub fn new(target: V, input: CallInput<V>) -> Self {
        Self {
            id: next_id(),
            target,
            timestamp: now_ms(),
            input,
            outcome: None,
            settlement: None,
        }
    }

    pub fn shared(self) -> RecordRef<V> {
        Rc::new(RefCell::new(self))
    }

    /// Record a synchronous return value. Ignored if an outcome exists.
    pub fn record_response(&mut self, value: V) -> bool {
        self.set_outcome(Outcome::Returned {
            value,
            timestamp: now_ms(),
        })
    }

    /// Record a synchronous throw. Ignored if an outcome exists.
    pub fn record_error(&mut self, error: V) -> bool {
        self.set_outcome(Outcome::Threw {
            error,
            timestamp: now_ms(),
        })
    }

    /// Record the resolution of a deferred response. First settlement wins.
    pub fn record_resolved(&mut self, value: V) -> bool {
        self.set_settlement(Settlement::Resolved {
            value,
            timestamp: now_ms(),
        })
    }

    /// Record the rejection of a deferred response. First settlement wins.
    pub fn record_rejected(&mut self, reason: V) -> bool {
        self.set_settlement(Settlement::Rejected {
            reason,
            timestamp: now_ms(),
        })
    }

    fn set_outcome(&mut self, outcome: Outcome<V>) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    fn set_settlement(&mut self, settlement: Settlement<V>) -> bool {
        // A settlement only makes sense after a synchronous response.
        if self.settlement.is_some() || self.response().is_none() {
            return false;
        }
        self.settlement = Some(settlement);
        true
    }

    pub fn args(&self) -> Option<&[V]> {
        match &self.input {
            CallInput::Args(args) => Some(args),
            CallInput::Value(_) => None,
        }
    }

    pub fn value(&self) -> Option<&V> {
        match &self.input {
            CallInput::Value(value) => Some(value),
            CallInput::Args(_) => None,
        }
    }

    pub fn response(&self) -> Option<&V> {
        match &self.outcome {
            Some(Outcome::Returned { value, .. }) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&V> {
        match &self.outcome {
            Some(Outcome::Threw { error, .. }) => Some(error),
            _ => None,
        }
    }

    pub fn resolved(&self) -> Option<&V> {
        match &self.settlement {
            Some(Settlement::Resolved { value, .. }) => Some(value),
            _ => None,
        }
    }

    pub fn rejected(&self) -> Option<&V> {
        match &self.settlement {
            Some(Settlement::Rejected { reason, .. }) => Some(reason),
            _ => None,
        }
    }
}

/// Whether a spied method lives on the constructor or on its prototype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Instance,
    Static,
}

/// Which side of a property was accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Get,
    Set,
}

/// Property accesses, split by direction.
#[derive(Debug)]
pub struct PropertyLog<V> {
    pub get: Vec<RecordRef<V>>,
    pub set: Vec<RecordRef<V>>,
}

impl<V> Default for PropertyLog<V> {
    fn default() -> Self {
        Self {
            get: Vec::new(),
            set: Vec::new(),
        }
    }
}

impl<V> Clone for PropertyLog<V> {
    fn clone(&self) -> Self {
        Self {
            get: self.get.clone(),
            set: self.set.clone(),
        }
    }
}

/// Everything recorded for one spied entity (constructor or namespace).
#[derive(Debug)]
pub struct EntityLog<V> {
    /// Constructions, in call order.
    pub new: Vec<RecordRef<V>>,
    pub methods: BTreeMap<String, Vec<RecordRef<V>>>,
    pub static_methods: BTreeMap<String, Vec<RecordRef<V>>>,
    pub properties: BTreeMap<String, PropertyLog<V>>,
    /// Listener registrations. Kept in the shape pages read, never filled.
    pub event_listeners: BTreeMap<String, Vec<RecordRef<V>>>,
}

impl<V> Default for EntityLog<V> {
    fn default() -> Self {
        Self {
            new: Vec::new(),
            methods: BTreeMap::new(),
            static_methods: BTreeMap::new(),
            properties: BTreeMap::new(),
            event_listeners: BTreeMap::new(),
        }
    }
}

impl<V> Clone for EntityLog<V> {
    fn clone(&self) -> Self {
        Self {
            new: self.new.clone(),
            methods: self.methods.clone(),
            static_methods: self.static_methods.clone(),
            properties: self.properties.clone(),
            event_listeners: self.event_listeners.clone(),
        }
    }
}

impl<V> EntityLog<V> {
    pub fn calls(&self, kind: MethodKind, method: &str) -> &[RecordRef<V>] {
        let map = match kind {
            MethodKind::Instance => &self.methods,
            MethodKind::Static => &self.static_methods,
        };
        map.get(method).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn accesses(&self, property: &str, access: Access) -> &[RecordRef<V>] {
        match self.properties.get(property) {
            Some(log) => match access {
                Access::Get => &log.get,
                Access::Set => &log.set,
            },
            None => &[],
        }
    }

    fn summary(&self) -> EntitySummary {
        let count = |map: &BTreeMap<String, Vec<RecordRef<V>>>| {
            map.iter()
                .map(|(name, records)| (name.clone(), records.len()))
                .collect()
        };
        EntitySummary {
            constructions: self.new.len(),
            methods: count(&self.methods),
            static_methods: count(&self.static_methods),
            properties: self
                .properties
                .iter()
                .map(|(name, log)| {
                    (
                        name.clone(),
                        PropertySummary {
                            get: log.get.len(),
                            set: log.set.len(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Record counts for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySummary {
    pub constructions: usize,
    pub methods: BTreeMap<String, usize>,
    pub static_methods: BTreeMap<String, usize>,
    pub properties: BTreeMap<String, PropertySummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PropertySummary {
    pub get: usize,
    pub set: usize,
}

pub type LogSummary = BTreeMap<String, EntitySummary>;

/// Shared, append-only log of every intercepted call, keyed by entity name.
///
/// Cloning the store clones the handle; all clones see the same entries.
/// Entries are only ever removed by [`LogStore::reset`].
pub struct LogStore<V> {
    entities: Rc<RefCell<BTreeMap<String, EntityLog<V>>>>,
}

impl<V> Clone for LogStore<V> {
    fn clone(&self) -> Self {
        Self {
            entities: Rc::clone(&self.entities),
        }
    }
}

impl<V> Default for LogStore<V> {
    fn default() -> Self {
        Self {
            entities: Rc::new(RefCell::new(BTreeMap::new())),
        }
    }
}

impl<V> LogStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry for `entity` if it does not exist yet.
    pub fn ensure_entity(&self, entity: &str) {
        self.entities
            .borrow_mut()
            .entry(entity.to_string())
            .or_default();
    }

    pub fn push_construction(&self, entity: &str, record: RecordRef<V>) {
        self.with_entity(entity, |log| log.new.push(record));
    }

    pub fn push_call(&self, entity: &str, kind: MethodKind, method: &str, record: RecordRef<V>) {
        self.with_entity(entity, |log| {
            let map = match kind {
                MethodKind::Instance => &mut log.methods,
                MethodKind::Static => &mut log.static_methods,
            };
            map.entry(method.to_string()).or_default().push(record);
        });
    }

    pub fn push_access(&self, entity: &str, property: &str, access: Access, record: RecordRef<V>) {
        self.with_entity(entity, |log| {
            let property = log.properties.entry(property.to_string()).or_default();
            match access {
                Access::Get => property.get.push(record),
                Access::Set => property.set.push(record),
            }
        });
    }

    fn with_entity(&self, entity: &str, f: impl FnOnce(&mut EntityLog<V>)) {
        let mut entities = self.entities.borrow_mut();
        f(entities.entry(entity.to_string()).or_default());
    }

    /// Snapshot of one entity's log. Records are shared, not copied.
    pub fn entity(&self, entity: &str) -> Option<EntityLog<V>> {
        self.entities.borrow().get(entity).cloned()
    }

    pub fn entity_names(&self) -> Vec<String> {
        self.entities.borrow().keys().cloned().collect()
    }

    /// Borrow the whole map, for exporters.
    pub fn entities(&self) -> Ref<'_, BTreeMap<String, EntityLog<V>>> {
        self.entities.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.borrow().is_empty()
    }

    /// Remove every entity entry.
    pub fn reset(&self) {
        self.entities.borrow_mut().clear();
    }

    pub fn summary(&self) -> LogSummary {
        self.entities
            .borrow()
            .iter()
            .map(|(name, log)| (name.clone(), log.summary()))
            .collect()
    }
}

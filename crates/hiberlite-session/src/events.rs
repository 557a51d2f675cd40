//! Entity lifecycle events and listener dispatch.
//!
//! The session fires an event after each INSERT, UPDATE, and DELETE it flushes.
//! Listeners are grouped per [`EventType`] and run in registration order on the
//! session's own connection, inside the session's transaction, so anything they
//! write commits or rolls back together with the change that triggered them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hiberlite_core::{FieldInfo, Result, Value};
use hiberlite_sqlite::PhysicalConnection;

/// Kinds of entity and collection events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// After a row was inserted.
    PostInsert,
    /// After a row was updated.
    PostUpdate,
    /// After a row was deleted.
    PostDelete,
    /// Before a mapped collection is updated.
    PreCollectionUpdate,
    /// Before a mapped collection is removed.
    PreCollectionRemove,
    /// After a mapped collection was recreated.
    PostCollectionRecreate,
}

impl EventType {
    /// Every event type, in setting order.
    pub const ALL: [EventType; 6] = [
        EventType::PostInsert,
        EventType::PostUpdate,
        EventType::PostDelete,
        EventType::PreCollectionUpdate,
        EventType::PreCollectionRemove,
        EventType::PostCollectionRecreate,
    ];

    /// Key used in `hibernate.ejb.event.<key>` settings.
    pub const fn key(&self) -> &'static str {
        match self {
            EventType::PostInsert => "post-insert",
            EventType::PostUpdate => "post-update",
            EventType::PostDelete => "post-delete",
            EventType::PreCollectionUpdate => "pre-collection-update",
            EventType::PreCollectionRemove => "pre-collection-remove",
            EventType::PostCollectionRecreate => "post-collection-recreate",
        }
    }

    /// Inverse of [`EventType::key`].
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.key() == key)
    }

    /// Whether this is a collection event.
    pub const fn is_collection(&self) -> bool {
        matches!(
            self,
            EventType::PreCollectionUpdate
                | EventType::PreCollectionRemove
                | EventType::PostCollectionRecreate
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A change to one entity instance.
#[derive(Debug, Clone)]
pub struct EntityEvent<'a> {
    /// What happened.
    pub event_type: EventType,
    /// Entity name.
    pub entity_name: &'static str,
    /// Mapped table.
    pub table: &'static str,
    /// Whether the entity is audited.
    pub audited: bool,
    /// Column metadata.
    pub fields: &'static [FieldInfo],
    /// Primary key value(s).
    pub id: &'a [Value],
    /// Column values after the change (before it, for deletes).
    pub state: &'a [(&'static str, Value)],
}

impl EntityEvent<'_> {
    /// Value of one column in `state`.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.state
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }
}

/// Per-transaction state shared by listeners.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransactionState {
    revision: Option<i64>,
}

impl TransactionState {
    /// Audit revision created in this transaction, if any.
    pub fn revision(&self) -> Option<i64> {
        self.revision
    }

    /// Forget everything; called when a transaction ends.
    pub fn reset(&mut self) {
        self.revision = None;
    }
}

/// What a listener can reach while handling an event.
pub struct EventSource<'a> {
    connection: &'a PhysicalConnection,
    transaction: &'a mut TransactionState,
}

impl<'a> EventSource<'a> {
    /// Source for one dispatch.
    pub fn new(connection: &'a PhysicalConnection, transaction: &'a mut TransactionState) -> Self {
        Self {
            connection,
            transaction,
        }
    }

    /// The session's connection.
    pub fn connection(&self) -> &PhysicalConnection {
        self.connection
    }

    /// Audit revision of the current transaction, if one was created.
    pub fn current_revision(&self) -> Option<i64> {
        self.transaction.revision
    }

    /// Record the audit revision of the current transaction.
    pub fn set_current_revision(&mut self, revision: i64) {
        self.transaction.revision = Some(revision);
    }
}

/// Reacts to entity events.
pub trait EventListener: Send + Sync {
    /// Handle one event. An error aborts the flush that fired it.
    fn on_event(&self, event: &EntityEvent<'_>, source: &mut EventSource<'_>) -> Result<()>;
}

/// Listeners bound to one event type, in order, deduplicated by name.
#[derive(Clone)]
pub struct EventListenerGroup {
    event_type: EventType,
    listeners: Vec<(String, Arc<dyn EventListener>)>,
}

impl EventListenerGroup {
    /// Empty group.
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            listeners: Vec::new(),
        }
    }

    /// The event type this group handles.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Append a listener unless one with the same name is already bound.
    pub fn append(&mut self, name: impl Into<String>, listener: Arc<dyn EventListener>) -> bool {
        let name = name.into();
        if self.listeners.iter().any(|(n, _)| *n == name) {
            return false;
        }
        self.listeners.push((name, listener));
        true
    }

    /// Names of bound listeners, in order.
    pub fn names(&self) -> Vec<&str> {
        self.listeners.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Number of bound listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is bound.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn fire(&self, event: &EntityEvent<'_>, source: &mut EventSource<'_>) -> Result<()> {
        for (name, listener) in &self.listeners {
            tracing::trace!(
                listener = name.as_str(),
                event = %event.event_type,
                entity = event.entity_name,
                "Dispatching event"
            );
            listener.on_event(event, source)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EventListenerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListenerGroup")
            .field("event_type", &self.event_type)
            .field("listeners", &self.names())
            .finish()
    }
}

/// All listener groups of a session factory.
#[derive(Debug, Clone, Default)]
pub struct EventListenerRegistry {
    groups: HashMap<EventType, EventListenerGroup>,
}

impl EventListenerRegistry {
    /// Registry with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a listener to an event type.
    pub fn append(&mut self, event_type: EventType, name: impl Into<String>, listener: Arc<dyn EventListener>) {
        self.groups
            .entry(event_type)
            .or_insert_with(|| EventListenerGroup::new(event_type))
            .append(name, listener);
    }

    /// Group for an event type, if anything is bound.
    pub fn group(&self, event_type: EventType) -> Option<&EventListenerGroup> {
        self.groups.get(&event_type)
    }

    /// Names bound to an event type.
    pub fn listener_names(&self, event_type: EventType) -> Vec<&str> {
        self.group(event_type)
            .map(EventListenerGroup::names)
            .unwrap_or_default()
    }

    /// Dispatch an event to its group.
    pub fn fire(&self, event: &EntityEvent<'_>, source: &mut EventSource<'_>) -> Result<()> {
        match self.groups.get(&event.event_type) {
            Some(group) => group.fire(event, source),
            None => Ok(()),
        }
    }
}

/// Callback run for one entity's events.
pub type EntityCallback = Arc<dyn Fn(&EntityEvent<'_>) -> Result<()> + Send + Sync>;

/// Runs callbacks registered per entity name and event type.
#[derive(Clone, Default)]
pub struct EntityCallbackListener {
    callbacks: HashMap<(String, EventType), Vec<EntityCallback>>,
}

impl EntityCallbackListener {
    /// Name used in listener settings.
    pub const NAME: &'static str = "callbacks";

    /// Listener with no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback.
    pub fn register(&mut self, entity: impl Into<String>, event_type: EventType, callback: EntityCallback) {
        self.callbacks
            .entry((entity.into(), event_type))
            .or_default()
            .push(callback);
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.values().map(Vec::len).sum()
    }

    /// Whether no callback is registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl fmt::Debug for EntityCallbackListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCallbackListener")
            .field("callbacks", &self.len())
            .finish()
    }
}

impl EventListener for EntityCallbackListener {
    fn on_event(&self, event: &EntityEvent<'_>, _source: &mut EventSource<'_>) -> Result<()> {
        let key = (event.entity_name.to_string(), event.event_type);
        if let Some(callbacks) = self.callbacks.get(&key) {
            for callback in callbacks {
                callback(event)?;
            }
        }
        Ok(())
    }
}

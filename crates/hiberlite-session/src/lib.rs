//! Session and unit of work for hiberlite.
//!
//! The Session is the central unit-of-work manager. It holds one physical
//! connection from the factory's provider, tracks objects, and coordinates
//! flushing changes to the database.
//!
//! # Design Philosophy
//!
//! - **Explicit flushing**: changes are written on `flush`/`commit`, not on every call
//! - **Ownership clarity**: the session owns its connection until `close`
//! - **Type erasure**: the identity map stores `Box<dyn Any>` for heterogeneous objects
//! - **Events in the transaction**: listeners run on the session's connection, so their
//!   writes commit or roll back with the change that fired them
//!
//! # Example
//!
//! ```ignore
//! let mut session = factory.open_session()?;
//!
//! // Add new objects (INSERTed on flush)
//! session.add(&person)?;
//!
//! // Get by primary key (uses identity map)
//! let person = session.get::<Person>(1)?;
//!
//! // Mark for deletion
//! session.delete(&person)?;
//!
//! // Flush pending changes and commit
//! session.commit()?;
//! session.close()?;
//! ```

pub mod audit;
pub mod events;

pub use audit::{AuditEventListener, RevisionType};
pub use events::{
    EntityCallback, EntityCallbackListener, EntityEvent, EventListener, EventListenerGroup,
    EventListenerRegistry, EventSource, EventType, TransactionState,
};

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use hiberlite_core::{EntityDescriptor, Error, FieldInfo, Model, Result, Value, quote_ident};
use hiberlite_sqlite::{ConnectionProvider, PhysicalConnection, SqlStatementLogger};

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
///
/// Objects are always expired on commit, so the next access reloads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Whether to auto-begin a transaction on first write. When off, writes
    /// outside an explicit `begin` run in autocommit mode.
    pub auto_begin: bool,
    /// Whether to flush pending changes before queries.
    pub auto_flush: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_begin: true,
            auto_flush: false,
        }
    }
}

/// Everything a session borrows from its factory.
#[derive(Debug)]
pub struct SessionServices {
    provider: Arc<dyn ConnectionProvider>,
    listeners: EventListenerRegistry,
    logger: SqlStatementLogger,
    entities: Vec<EntityDescriptor>,
    config: SessionConfig,
}

impl SessionServices {
    /// Services for sessions over `provider`, mapping `entities`.
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        listeners: EventListenerRegistry,
        logger: SqlStatementLogger,
        entities: Vec<EntityDescriptor>,
    ) -> Self {
        Self {
            provider,
            listeners,
            logger,
            entities,
            config: SessionConfig::default(),
        }
    }

    /// Replace the session configuration.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// The connection provider.
    pub fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        &self.provider
    }

    /// Bound event listeners.
    pub fn listeners(&self) -> &EventListenerRegistry {
        &self.listeners
    }

    /// Statement logger installed on every session connection.
    pub fn logger(&self) -> SqlStatementLogger {
        self.logger
    }

    /// Mapped entities.
    pub fn entities(&self) -> &[EntityDescriptor] {
        &self.entities
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the Rust type is a mapped entity.
    pub fn is_mapped(&self, type_id: TypeId) -> bool {
        self.entities.iter().any(|e| e.type_id == Some(type_id))
    }

    fn ensure_mapped<M: Model>(&self) -> Result<()> {
        if self.is_mapped(TypeId::of::<M>()) {
            Ok(())
        } else {
            Err(Error::Mapping(format!(
                "unknown entity: {}::{}",
                M::PACKAGE,
                M::ENTITY_NAME
            )))
        }
    }
}

// ============================================================================
// Object Key and State
// ============================================================================

/// Unique key for an object in the identity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Type identifier for the Model type.
    type_id: TypeId,
    /// Hash of the primary key value(s).
    pk_hash: u64,
    /// Session-local sequence for new objects whose key is generated on insert (0 otherwise).
    transient: u64,
}

impl ObjectKey {
    /// Create an object key from a model instance.
    pub fn from_model<M: Model>(obj: &M) -> Self {
        Self::from_pk::<M>(&obj.primary_key_value())
    }

    /// Create an object key from type and primary key.
    pub fn from_pk<M: Model>(pk: &[Value]) -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            pk_hash: hash_values(pk),
            transient: 0,
        }
    }

    /// Whether the key stands in for a not-yet-generated primary key.
    pub fn is_transient(&self) -> bool {
        self.transient != 0
    }
}

/// Hash a slice of values for use as a primary key hash.
fn hash_values(values: &[Value]) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut hasher = DefaultHasher::new();
    values.len().hash(&mut hasher);
    for v in values {
        hash_value(v, &mut hasher);
    }
    hasher.finish()
}

/// Hash a single value into the hasher.
fn hash_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::BigInt(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Double(f) => {
            3u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Text(s) => {
            4u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            5u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Json(j) => {
            6u8.hash(hasher);
            j.to_string().hash(hasher);
        }
    }
}

fn has_unassigned_key(pk: &[Value]) -> bool {
    pk.iter().any(Value::is_null)
}

/// State of a tracked object in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// New object, needs INSERT on flush.
    New,
    /// Persistent object loaded from or written to the database.
    Persistent,
    /// Object marked for deletion, needs DELETE on flush.
    Deleted,
    /// Object detached from session.
    Detached,
    /// Object expired, needs reload from database.
    Expired,
}

type ErasedObject = dyn Any + Send + Sync;

/// Mapping metadata and type-erased accessors for one entity type.
#[derive(Clone, Copy)]
struct ModelOps {
    entity_name: &'static str,
    table_name: &'static str,
    primary_key: &'static [&'static str],
    fields: &'static [FieldInfo],
    audited: bool,
    generated_key: Option<&'static str>,
    to_row: fn(&ErasedObject) -> Vec<(&'static str, Value)>,
    primary_key_value: fn(&ErasedObject) -> Vec<Value>,
    assign_key: fn(&mut ErasedObject, i64),
}

impl ModelOps {
    fn of<M: Model>() -> Self {
        Self {
            entity_name: M::ENTITY_NAME,
            table_name: M::TABLE_NAME,
            primary_key: M::PRIMARY_KEY,
            fields: M::fields(),
            audited: M::AUDITED,
            generated_key: M::fields()
                .iter()
                .find(|f| f.primary_key && f.auto_increment)
                .map(|f| f.column_name),
            to_row: erased_to_row::<M>,
            primary_key_value: erased_primary_key::<M>,
            assign_key: erased_assign_key::<M>,
        }
    }
}

fn erased_to_row<M: Model>(obj: &ErasedObject) -> Vec<(&'static str, Value)> {
    obj.downcast_ref::<M>().map(M::to_row).unwrap_or_default()
}

fn erased_primary_key<M: Model>(obj: &ErasedObject) -> Vec<Value> {
    obj.downcast_ref::<M>()
        .map(M::primary_key_value)
        .unwrap_or_default()
}

fn erased_assign_key<M: Model>(obj: &mut ErasedObject, key: i64) {
    if let Some(obj) = obj.downcast_mut::<M>() {
        obj.set_generated_key(key);
    }
}

/// A tracked object in the session.
struct TrackedObject {
    /// The actual object (type-erased).
    object: Box<ErasedObject>,
    /// Serialized column state as last written or loaded, for dirty checking.
    original_state: Option<Vec<u8>>,
    /// Current object state.
    state: ObjectState,
    /// How to read and write the object.
    ops: ModelOps,
}

impl TrackedObject {
    fn new<M: Model>(obj: &M, state: ObjectState, original_state: Option<Vec<u8>>) -> Self {
        Self {
            object: Box::new(obj.clone()),
            original_state,
            state,
            ops: ModelOps::of::<M>(),
        }
    }
}

fn snapshot(row: &[(&'static str, Value)]) -> Option<Vec<u8>> {
    serde_json::to_vec(row).ok()
}

// ============================================================================
// Statement helpers
// ============================================================================

fn key_clause(columns: &[&str], first_param: usize) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote_ident(c), first_param + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn open_connection(connection: Option<&PhysicalConnection>) -> Result<&PhysicalConnection> {
    connection.ok_or_else(|| Error::Transaction("session is closed".to_string()))
}

fn stale(ops: &ModelOps, pk: &[Value]) -> Error {
    Error::Transaction(format!(
        "{} with key {:?} no longer exists in `{}`",
        ops.entity_name, pk, ops.table_name
    ))
}

/// INSERT one row; returns the generated key when the database produced one.
fn execute_insert(
    conn: &PhysicalConnection,
    ops: &ModelOps,
    row: &[(&'static str, Value)],
) -> Result<Option<i64>> {
    let mut columns = Vec::with_capacity(row.len());
    let mut params = Vec::with_capacity(row.len());
    let mut generates = false;
    for (column, value) in row {
        if ops.generated_key == Some(*column) && value.is_null() {
            generates = true;
            continue;
        }
        columns.push(quote_ident(column));
        params.push(value.clone());
    }

    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quote_ident(ops.table_name))
    } else {
        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(ops.table_name),
            columns.join(", "),
            placeholders.join(", ")
        )
    };

    if generates {
        conn.insert(&sql, &params).map(Some)
    } else {
        conn.execute(&sql, &params).map(|_| None)
    }
}

/// Fire an entity event on the session's connection.
fn dispatch(
    services: &SessionServices,
    conn: &PhysicalConnection,
    transaction: &mut TransactionState,
    ops: &ModelOps,
    event_type: EventType,
    id: &[Value],
    state: &[(&'static str, Value)],
) -> Result<()> {
    let event = EntityEvent {
        event_type,
        entity_name: ops.entity_name,
        table: ops.table_name,
        audited: ops.audited,
        fields: ops.fields,
        id,
        state,
    };
    let mut source = EventSource::new(conn, transaction);
    services.listeners().fire(&event, &mut source)
}

// ============================================================================
// Session
// ============================================================================

/// The Session is the central unit-of-work manager.
///
/// It tracks objects loaded from or added to the database and coordinates
/// flushing changes back to the database.
pub struct Session {
    /// Factory services (provider, listeners, mapped entities).
    services: Arc<SessionServices>,
    /// The physical connection; `None` once closed.
    connection: Option<PhysicalConnection>,
    /// Whether we're in a transaction.
    in_transaction: bool,
    /// Set when a write failed inside the transaction; only rollback is allowed.
    rollback_only: bool,
    /// Listener state for the current transaction.
    transaction: TransactionState,
    /// Identity map: ObjectKey -> TrackedObject.
    identity_map: HashMap<ObjectKey, TrackedObject>,
    /// Objects marked as new (need INSERT).
    pending_new: Vec<ObjectKey>,
    /// Objects marked as deleted (need DELETE).
    pending_delete: Vec<ObjectKey>,
    /// Objects that are dirty (need UPDATE).
    pending_dirty: Vec<ObjectKey>,
    /// Last sequence handed to a transient key.
    transient_seq: u64,
    /// Configuration.
    config: SessionConfig,
}

impl Session {
    /// Open a session on a fresh connection from the services' provider.
    #[tracing::instrument(level = "debug", skip(services))]
    pub fn open(services: Arc<SessionServices>) -> Result<Self> {
        let mut connection = services.provider().get_connection()?;
        connection.set_logger(services.logger());
        tracing::debug!(
            connection = connection.id(),
            provider = services.provider().name(),
            "Opened session"
        );
        let config = services.config().clone();
        Ok(Self {
            services,
            connection: Some(connection),
            in_transaction: false,
            rollback_only: false,
            transaction: TransactionState::default(),
            identity_map: HashMap::new(),
            pending_new: Vec::new(),
            pending_delete: Vec::new(),
            pending_dirty: Vec::new(),
            transient_seq: 0,
            config,
        })
    }

    /// The underlying connection.
    pub fn connection(&self) -> Result<&PhysicalConnection> {
        open_connection(self.connection.as_ref())
    }

    /// Factory services this session was opened with.
    pub fn services(&self) -> &Arc<SessionServices> {
        &self.services
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether `close` has not been called yet.
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn ensure_open(&self) -> Result<()> {
        self.connection().map(|_| ())
    }

    fn has_pending(&self) -> bool {
        !(self.pending_new.is_empty() && self.pending_delete.is_empty() && self.pending_dirty.is_empty())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.rollback_only {
            Err(Error::Transaction(
                "transaction is marked rollback-only after a failed write".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn mark_dirty(&mut self, key: ObjectKey) {
        if !self.pending_dirty.contains(&key) {
            self.pending_dirty.push(key);
        }
    }

    fn track_loaded<M: Model>(&mut self, key: ObjectKey, obj: &M) {
        let original_state = snapshot(&obj.to_row());
        self.identity_map.insert(
            key,
            TrackedObject::new(obj, ObjectState::Persistent, original_state),
        );
    }

    // ========================================================================
    // Object Tracking
    // ========================================================================

    /// Add an object to the session.
    ///
    /// A new object is INSERTed on the next `flush()`. Adding an object whose
    /// key is already tracked replaces the tracked state and schedules an UPDATE
    /// (or cancels a pending DELETE).
    #[tracing::instrument(level = "debug", skip(self, obj))]
    pub fn add<M: Model>(&mut self, obj: &M) -> Result<()> {
        self.ensure_open()?;
        self.services.ensure_mapped::<M>()?;

        tracing::info!(
            entity = M::ENTITY_NAME,
            table = M::TABLE_NAME,
            "Adding object to session"
        );

        let pk = obj.primary_key_value();
        if has_unassigned_key(&pk) {
            self.transient_seq += 1;
            let key = ObjectKey {
                transient: self.transient_seq,
                ..ObjectKey::from_pk::<M>(&[])
            };
            self.identity_map
                .insert(key, TrackedObject::new(obj, ObjectState::New, None));
            self.pending_new.push(key);
            return Ok(());
        }

        let key = ObjectKey::from_pk::<M>(&pk);
        let Some(tracked) = self.identity_map.get_mut(&key) else {
            self.identity_map
                .insert(key, TrackedObject::new(obj, ObjectState::New, None));
            self.pending_new.push(key);
            return Ok(());
        };

        tracked.object = Box::new(obj.clone());
        if tracked.state == ObjectState::New {
            return Ok(());
        }
        tracked.state = ObjectState::Persistent;
        self.pending_delete.retain(|k| k != &key);
        self.mark_dirty(key);
        Ok(())
    }

    /// Save a new object right away.
    ///
    /// Runs the INSERT immediately and writes a generated key back into `obj`.
    /// A failure inside a transaction (including a listener veto) marks the
    /// transaction rollback-only.
    #[tracing::instrument(level = "debug", skip(self, obj))]
    pub fn save<M: Model>(&mut self, obj: &mut M) -> Result<()> {
        self.ensure_open()?;
        self.ensure_writable()?;
        self.services.ensure_mapped::<M>()?;
        if self.config.auto_begin && !self.in_transaction {
            self.begin()?;
        }

        let ops = ModelOps::of::<M>();
        let conn = open_connection(self.connection.as_ref())?;
        match execute_insert(conn, &ops, &obj.to_row()) {
            Ok(Some(id)) => obj.set_generated_key(id),
            Ok(None) => {}
            Err(e) => {
                self.rollback_only = self.in_transaction;
                return Err(e);
            }
        }

        let row = obj.to_row();
        let pk = obj.primary_key_value();
        tracing::info!(entity = M::ENTITY_NAME, key = ?pk, "Saved object");
        if let Err(e) = dispatch(
            &self.services,
            conn,
            &mut self.transaction,
            &ops,
            EventType::PostInsert,
            &pk,
            &row,
        ) {
            self.rollback_only = self.in_transaction;
            return Err(e);
        }

        let key = ObjectKey::from_pk::<M>(&pk);
        self.identity_map.insert(
            key,
            TrackedObject::new(&*obj, ObjectState::Persistent, snapshot(&row)),
        );
        Ok(())
    }

    /// Schedule an UPDATE for an object with an assigned key.
    ///
    /// Untracked (detached) objects are reattached. Updating an object that is
    /// pending deletion, or one whose key has not been generated yet, fails.
    #[tracing::instrument(level = "debug", skip(self, obj))]
    pub fn update<M: Model>(&mut self, obj: &M) -> Result<()> {
        self.ensure_open()?;
        self.services.ensure_mapped::<M>()?;

        let pk = obj.primary_key_value();
        if has_unassigned_key(&pk) {
            return Err(Error::Transaction(format!(
                "cannot update a transient {} instance",
                M::ENTITY_NAME
            )));
        }

        let key = ObjectKey::from_pk::<M>(&pk);
        let Some(tracked) = self.identity_map.get_mut(&key) else {
            self.identity_map
                .insert(key, TrackedObject::new(obj, ObjectState::Persistent, None));
            self.mark_dirty(key);
            return Ok(());
        };

        if tracked.state == ObjectState::Deleted {
            return Err(Error::Transaction(format!(
                "{} with key {pk:?} is scheduled for deletion",
                M::ENTITY_NAME
            )));
        }
        tracked.object = Box::new(obj.clone());
        if tracked.state == ObjectState::New {
            return Ok(());
        }
        tracked.state = ObjectState::Persistent;
        self.mark_dirty(key);
        Ok(())
    }

    /// Delete an object from the session.
    ///
    /// The object will be DELETEd on the next `flush()` call.
    #[tracing::instrument(level = "debug", skip(self, obj))]
    pub fn delete<M: Model>(&mut self, obj: &M) -> Result<()> {
        self.ensure_open()?;
        self.services.ensure_mapped::<M>()?;

        tracing::info!(
            entity = M::ENTITY_NAME,
            table = M::TABLE_NAME,
            "Marking object for deletion"
        );

        let pk = obj.primary_key_value();
        if has_unassigned_key(&pk) {
            tracing::debug!(entity = M::ENTITY_NAME, "Transient object has no row to delete");
            return Ok(());
        }

        let key = ObjectKey::from_pk::<M>(&pk);
        match self.identity_map.get(&key).map(|t| t.state) {
            Some(ObjectState::New) => {
                // never written, so just forget it
                self.identity_map.remove(&key);
                self.pending_new.retain(|k| k != &key);
            }
            Some(ObjectState::Deleted) => {}
            Some(_) | None => {
                self.identity_map
                    .insert(key, TrackedObject::new(obj, ObjectState::Deleted, None));
                self.pending_dirty.retain(|k| k != &key);
                self.pending_delete.push(key);
            }
        }
        Ok(())
    }

    /// Get an object by a single-column primary key.
    pub fn get<M: Model>(&mut self, pk: impl Into<Value>) -> Result<Option<M>> {
        self.get_by_key(&[pk.into()])
    }

    /// Get an object by primary key.
    ///
    /// First checks the identity map, then queries the database if not found
    /// (or if the tracked copy is expired or detached).
    #[tracing::instrument(level = "debug", skip(self, pk))]
    pub fn get_by_key<M: Model>(&mut self, pk: &[Value]) -> Result<Option<M>> {
        self.ensure_open()?;
        self.services.ensure_mapped::<M>()?;
        if pk.len() != M::PRIMARY_KEY.len() {
            return Err(Error::Mapping(format!(
                "{} has a {}-column primary key, got {} value(s)",
                M::ENTITY_NAME,
                M::PRIMARY_KEY.len(),
                pk.len()
            )));
        }
        if self.config.auto_flush && self.has_pending() {
            self.flush()?;
        }

        tracing::debug!(
            entity = M::ENTITY_NAME,
            table = M::TABLE_NAME,
            "Getting object by primary key"
        );

        let key = ObjectKey::from_pk::<M>(pk);
        if let Some(tracked) = self.identity_map.get(&key) {
            match tracked.state {
                ObjectState::New | ObjectState::Persistent => {
                    if let Some(obj) = tracked.object.downcast_ref::<M>() {
                        return Ok(Some(obj.clone()));
                    }
                }
                ObjectState::Deleted => return Ok(None),
                ObjectState::Detached | ObjectState::Expired => {}
            }
        }

        let sql = format!(
            "SELECT * FROM {} WHERE {}",
            quote_ident(M::TABLE_NAME),
            key_clause(M::PRIMARY_KEY, 1)
        );
        let rows = self.connection()?.query(&sql, pk)?;
        let Some(row) = rows.first() else {
            self.identity_map.remove(&key);
            return Ok(None);
        };

        let obj = M::from_row(row)?;
        self.track_loaded(key, &obj);
        Ok(Some(obj))
    }

    /// Load every row of an entity's table, ordered by primary key.
    ///
    /// Objects already tracked by the session are returned as tracked; objects
    /// pending deletion are left out.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn list<M: Model>(&mut self) -> Result<Vec<M>> {
        self.ensure_open()?;
        self.services.ensure_mapped::<M>()?;
        if self.config.auto_flush && self.has_pending() {
            self.flush()?;
        }

        let order: Vec<String> = M::PRIMARY_KEY.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "SELECT * FROM {} ORDER BY {}",
            quote_ident(M::TABLE_NAME),
            order.join(", ")
        );
        let rows = self.connection()?.query(&sql, &[])?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let loaded = M::from_row(row)?;
            let key = ObjectKey::from_model(&loaded);
            match self.identity_map.get(&key) {
                Some(tracked) if tracked.state == ObjectState::Deleted => continue,
                Some(tracked)
                    if matches!(tracked.state, ObjectState::New | ObjectState::Persistent) =>
                {
                    if let Some(obj) = tracked.object.downcast_ref::<M>() {
                        out.push(obj.clone());
                        continue;
                    }
                }
                _ => {}
            }
            self.track_loaded(key, &loaded);
            out.push(loaded);
        }
        Ok(out)
    }

    /// Check if an object is tracked by this session.
    pub fn contains<M: Model>(&self, obj: &M) -> bool {
        let key = ObjectKey::from_model(obj);
        self.identity_map
            .get(&key)
            .is_some_and(|t| t.state != ObjectState::Detached)
    }

    /// Detach an object from the session.
    pub fn expunge<M: Model>(&mut self, obj: &M) {
        let key = ObjectKey::from_model(obj);
        if let Some(tracked) = self.identity_map.get_mut(&key) {
            tracked.state = ObjectState::Detached;
        }
        self.pending_new.retain(|k| k != &key);
        self.pending_delete.retain(|k| k != &key);
        self.pending_dirty.retain(|k| k != &key);
    }

    /// Detach all objects from the session.
    pub fn expunge_all(&mut self) {
        for tracked in self.identity_map.values_mut() {
            tracked.state = ObjectState::Detached;
        }
        self.pending_new.clear();
        self.pending_delete.clear();
        self.pending_dirty.clear();
    }

    // ========================================================================
    // Transaction Management
    // ========================================================================

    /// Begin a transaction.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Ok(());
        }

        tracing::info!("Beginning transaction");

        self.connection()?.execute("BEGIN", &[])?;
        self.in_transaction = true;
        self.rollback_only = false;
        self.transaction.reset();
        Ok(())
    }

    /// Flush pending changes to the database.
    ///
    /// This executes DELETE, INSERT, and UPDATE statements (in that order) but
    /// does NOT commit.
    ///
    /// If a statement or a listener fails inside a transaction, the
    /// transaction becomes rollback-only: later flushes fail and `commit`
    /// rolls back. Changes that already reached the database are not retried.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_writable()?;
        let start = std::time::Instant::now();

        tracing::info!(
            inserts = self.pending_new.len(),
            updates = self.pending_dirty.len(),
            deletes = self.pending_delete.len(),
            "Starting flush"
        );

        if self.config.auto_begin && !self.in_transaction && self.has_pending() {
            self.begin()?;
        }

        // 1. DELETEs first (to respect FK constraints)
        let deletes = std::mem::take(&mut self.pending_delete);
        for (i, key) in deletes.iter().enumerate() {
            if let Err(e) = self.flush_delete(key) {
                self.pending_delete = self.still_pending(&deletes[i..], ObjectState::Deleted);
                return Err(self.failed_flush(e));
            }
        }

        // 2. INSERTs
        let inserts = std::mem::take(&mut self.pending_new);
        for (i, key) in inserts.iter().enumerate() {
            if let Err(e) = self.flush_insert(key) {
                self.pending_new = self.still_pending(&inserts[i..], ObjectState::New);
                return Err(self.failed_flush(e));
            }
        }

        // 3. UPDATEs for dirty objects
        let updates = std::mem::take(&mut self.pending_dirty);
        for (i, key) in updates.iter().enumerate() {
            if let Err(e) = self.flush_update(key) {
                self.pending_dirty = updates[i..].to_vec();
                return Err(self.failed_flush(e));
            }
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            "Flush completed"
        );
        Ok(())
    }

    /// Keys from an interrupted flush whose object has not been written yet.
    fn still_pending(&self, keys: &[ObjectKey], state: ObjectState) -> Vec<ObjectKey> {
        keys.iter()
            .filter(|k| self.identity_map.get(k).is_some_and(|t| t.state == state))
            .copied()
            .collect()
    }

    fn failed_flush(&mut self, e: Error) -> Error {
        if self.in_transaction {
            tracing::warn!(error = %e, "Flush failed, transaction is now rollback-only");
            self.rollback_only = true;
        }
        e
    }

    fn flush_delete(&mut self, key: &ObjectKey) -> Result<()> {
        let Some(tracked) = self.identity_map.get(key) else {
            return Ok(());
        };
        let ops = tracked.ops;
        let pk = (ops.primary_key_value)(&*tracked.object);
        let state = (ops.to_row)(&*tracked.object);

        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote_ident(ops.table_name),
            key_clause(ops.primary_key, 1)
        );
        let conn = open_connection(self.connection.as_ref())?;
        if conn.execute(&sql, &pk)? == 0 {
            return Err(stale(&ops, &pk));
        }
        self.identity_map.remove(key);
        dispatch(
            &self.services,
            conn,
            &mut self.transaction,
            &ops,
            EventType::PostDelete,
            &pk,
            &state,
        )
    }

    fn flush_insert(&mut self, key: &ObjectKey) -> Result<()> {
        let Some(tracked) = self.identity_map.get(key) else {
            return Ok(());
        };
        let ops = tracked.ops;
        let row = (ops.to_row)(&*tracked.object);

        let conn = open_connection(self.connection.as_ref())?;
        let generated = execute_insert(conn, &ops, &row)?;

        let Some(mut tracked) = self.identity_map.remove(key) else {
            return Ok(());
        };
        if let Some(id) = generated {
            (ops.assign_key)(&mut *tracked.object, id);
        }
        let row = (ops.to_row)(&*tracked.object);
        let pk = (ops.primary_key_value)(&*tracked.object);
        tracked.state = ObjectState::Persistent;
        tracked.original_state = snapshot(&row);

        // transient keys are replaced by the generated one
        let persistent_key = ObjectKey {
            type_id: key.type_id,
            pk_hash: hash_values(&pk),
            transient: 0,
        };
        self.identity_map.insert(persistent_key, tracked);

        dispatch(
            &self.services,
            conn,
            &mut self.transaction,
            &ops,
            EventType::PostInsert,
            &pk,
            &row,
        )
    }

    fn flush_update(&mut self, key: &ObjectKey) -> Result<()> {
        let Some(tracked) = self.identity_map.get(key) else {
            return Ok(());
        };
        let ops = tracked.ops;
        let row = (ops.to_row)(&*tracked.object);
        let current = snapshot(&row);
        if current.is_some() && current == tracked.original_state {
            tracing::trace!(entity = ops.entity_name, "Skipping unchanged object");
            return Ok(());
        }
        let pk = (ops.primary_key_value)(&*tracked.object);

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (column, value) in &row {
            if ops.primary_key.contains(column) {
                continue;
            }
            params.push(value.clone());
            assignments.push(format!("{} = ?{}", quote_ident(column), params.len()));
        }

        let conn = open_connection(self.connection.as_ref())?;
        if !assignments.is_empty() {
            let sql = format!(
                "UPDATE {} SET {} WHERE {}",
                quote_ident(ops.table_name),
                assignments.join(", "),
                key_clause(ops.primary_key, params.len() + 1)
            );
            params.extend(pk.iter().cloned());
            if conn.execute(&sql, &params)? == 0 {
                return Err(stale(&ops, &pk));
            }
        }

        if let Some(tracked) = self.identity_map.get_mut(key) {
            tracked.original_state = current;
        }
        dispatch(
            &self.services,
            conn,
            &mut self.transaction,
            &ops,
            EventType::PostUpdate,
            &pk,
            &row,
        )
    }

    /// Commit the current transaction.
    ///
    /// A rollback-only transaction is rolled back instead and the commit fails.
    /// Persistent objects are expired afterwards.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.rollback_only {
            tracing::warn!("Commit of a rollback-only transaction, rolling back");
            self.rollback()?;
            return Err(Error::Transaction(
                "transaction was marked rollback-only and has been rolled back".to_string(),
            ));
        }
        tracing::info!("Committing transaction");

        // Flush any pending changes first
        self.flush()?;

        if self.in_transaction {
            self.connection()?.execute("COMMIT", &[])?;
            self.in_transaction = false;
        }
        self.transaction.reset();

        for tracked in self.identity_map.values_mut() {
            if tracked.state == ObjectState::Persistent {
                tracked.state = ObjectState::Expired;
            }
        }
        Ok(())
    }

    /// Rollback the current transaction.
    ///
    /// Pending changes are discarded, never-flushed objects are forgotten, and
    /// everything else is expired so the next access reloads it.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        tracing::info!("Rolling back transaction");

        if self.in_transaction {
            self.connection()?.execute("ROLLBACK", &[])?;
            self.in_transaction = false;
        }
        self.rollback_only = false;
        self.transaction.reset();

        // Clear pending operations
        self.pending_new.clear();
        self.pending_delete.clear();
        self.pending_dirty.clear();

        self.identity_map.retain(|_, tracked| tracked.state != ObjectState::New);
        for tracked in self.identity_map.values_mut() {
            if matches!(tracked.state, ObjectState::Persistent | ObjectState::Deleted) {
                tracked.state = ObjectState::Expired;
            }
        }
        Ok(())
    }

    /// Close the session and hand its connection back to the provider.
    ///
    /// An open transaction is rolled back. Closing twice fails.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn close(&mut self) -> Result<()> {
        let Some(mut conn) = self.connection.take() else {
            return Err(Error::Transaction("session is already closed".to_string()));
        };

        if self.in_transaction {
            tracing::warn!("Closing session with an open transaction, rolling back");
            if let Err(e) = conn.execute("ROLLBACK", &[]) {
                tracing::warn!(error = %e, "Rollback on close failed");
            }
            self.in_transaction = false;
        }
        self.rollback_only = false;
        self.transaction.reset();
        self.identity_map.clear();
        self.pending_new.clear();
        self.pending_delete.clear();
        self.pending_dirty.clear();

        tracing::debug!(connection = conn.id(), "Closing session");
        self.services.provider().close_connection(&mut conn)
    }

    // ========================================================================
    // Debug Diagnostics
    // ========================================================================

    /// Get count of objects pending INSERT.
    pub fn pending_new_count(&self) -> usize {
        self.pending_new.len()
    }

    /// Get count of objects pending DELETE.
    pub fn pending_delete_count(&self) -> usize {
        self.pending_delete.len()
    }

    /// Get count of dirty objects pending UPDATE.
    pub fn pending_dirty_count(&self) -> usize {
        self.pending_dirty.len()
    }

    /// Get total tracked object count.
    pub fn tracked_count(&self) -> usize {
        self.identity_map.len()
    }

    /// Whether we're in a transaction.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Whether a failed write left the transaction rollback-only.
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Audit revision created in the current transaction, if any.
    pub fn current_revision(&self) -> Option<i64> {
        self.transaction.revision()
    }

    /// Dump session state for debugging.
    pub fn debug_state(&self) -> SessionDebugInfo {
        SessionDebugInfo {
            tracked: self.tracked_count(),
            pending_new: self.pending_new_count(),
            pending_delete: self.pending_delete_count(),
            pending_dirty: self.pending_dirty_count(),
            in_transaction: self.in_transaction,
            rollback_only: self.rollback_only,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.connection.as_ref().map(PhysicalConnection::id))
            .field("state", &self.debug_state())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            tracing::debug!(connection = conn.id(), "Releasing connection of dropped session");
            if let Err(e) = self.services.provider().close_connection(&mut conn) {
                tracing::warn!(error = %e, "Failed to release session connection");
            }
        }
    }
}

/// Debug information about session state.
#[derive(Debug, Clone)]
pub struct SessionDebugInfo {
    /// Total tracked objects.
    pub tracked: usize,
    /// Objects pending INSERT.
    pub pending_new: usize,
    /// Objects pending DELETE.
    pub pending_delete: usize,
    /// Objects pending UPDATE.
    pub pending_dirty: usize,
    /// Whether in a transaction.
    pub in_transaction: bool,
    /// Whether the transaction can only be rolled back.
    pub rollback_only: bool,
}

// ============================================================================
// Unit Tests
// ============================================================================

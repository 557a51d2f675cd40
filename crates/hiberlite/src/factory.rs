//! The session factory.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hiberlite_core::{EntityDescriptor, Error, Result};
use hiberlite_schema::{Dialect, SchemaAction, SchemaExport};
use hiberlite_session::{
    AuditEventListener, EntityCallbackListener, EventListener, EventListenerRegistry, EventType,
    Session, SessionServices,
};
use hiberlite_sqlite::{ConnectionProvider, PhysicalConnection, ProviderCapabilities};

use crate::configuration::Configuration;
use crate::context;
use crate::registry::{CurrentSessionContext, ServiceRegistry};
use crate::settings;

static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(1);

/// Opens sessions over one connection provider and one mapped schema.
///
/// Thread-safe: share it by reference (the global one is `&'static`).
#[derive(Debug)]
pub struct SessionFactory {
    id: u64,
    services: Arc<SessionServices>,
    schema: SchemaExport,
    schema_action: SchemaAction,
    dialect: Dialect,
    context: Option<CurrentSessionContext>,
    closed: AtomicBool,
}

impl SessionFactory {
    #[tracing::instrument(level = "debug", skip_all)]
    pub(crate) fn build(configuration: &Configuration, registry: &ServiceRegistry) -> Result<Self> {
        let listeners = resolve_listeners(configuration, registry)?;
        let entities = configuration.entities().to_vec();

        let factory = Self {
            id: NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed),
            schema: SchemaExport::new(registry.dialect(), entities.clone()),
            services: Arc::new(SessionServices::new(
                Arc::clone(registry.provider()),
                listeners,
                registry.logger(),
                entities,
            )
            .with_config(registry.session_config().clone())),
            schema_action: registry.schema_action(),
            dialect: registry.dialect(),
            context: registry.context(),
            closed: AtomicBool::new(false),
        };

        tracing::info!(
            factory = factory.id,
            action = factory.schema_action.as_str(),
            "Exporting schema"
        );
        factory.with_connection(|conn| factory.schema.execute(factory.schema_action, conn))?;

        tracing::info!(
            factory = factory.id,
            entities = factory.entities().len(),
            provider = factory.provider().name(),
            "Session factory built"
        );
        Ok(factory)
    }

    /// Run `f` on a short-lived provider connection.
    fn with_connection<R>(&self, f: impl FnOnce(&PhysicalConnection) -> Result<R>) -> Result<R> {
        let provider = self.services.provider();
        let mut conn = provider.get_connection()?;
        conn.set_logger(self.services.logger());
        let result = f(&conn);
        let closed = provider.close_connection(&mut conn);
        let value = result?;
        closed?;
        Ok(value)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Transaction("session factory is closed".to_string()))
        } else {
            Ok(())
        }
    }

    /// Process-unique id of this factory.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Open a new session on a new connection.
    pub fn open_session(&self) -> Result<Session> {
        self.ensure_open()?;
        Session::open(Arc::clone(&self.services))
    }

    /// Run `f` with the session bound to the calling thread, opening one if
    /// none is bound yet.
    ///
    /// The session stays bound (and its transaction open) until
    /// [`commit_current_session`](Self::commit_current_session) or
    /// [`rollback_current_session`](Self::rollback_current_session).
    /// Calling it again from inside `f` fails, as do committing, rolling back
    /// and closing the factory.
    pub fn with_current_session<R>(&self, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        self.ensure_open()?;
        match self.context {
            Some(CurrentSessionContext::Thread) => {
                context::with_current(self.id, || self.open_session(), f)
            }
            None => Err(Error::config(
                settings::CURRENT_SESSION_CONTEXT_CLASS,
                "no current session context is configured",
            )),
        }
    }

    /// Whether a session is bound to the calling thread.
    pub fn has_current_session(&self) -> bool {
        context::is_bound(self.id)
    }

    fn unbind_current(&self) -> Result<Session> {
        context::unbind(self.id)?
            .ok_or_else(|| Error::Transaction("no session is bound to the current thread".to_string()))
    }

    /// Commit, unbind, and close the calling thread's session.
    pub fn commit_current_session(&self) -> Result<()> {
        let mut session = self.unbind_current()?;
        let committed = session.commit();
        let closed = session.close();
        committed?;
        closed
    }

    /// Roll back, unbind, and close the calling thread's session.
    pub fn rollback_current_session(&self) -> Result<()> {
        let mut session = self.unbind_current()?;
        let rolled_back = session.rollback();
        let closed = session.close();
        rolled_back?;
        closed
    }

    /// Close the factory.
    ///
    /// Releases the calling thread's current session and, for `create-drop`,
    /// drops the schema. Closing twice fails.
    #[tracing::instrument(level = "debug", skip(self), fields(factory = self.id))]
    pub fn close(&self) -> Result<()> {
        let already_closed = || Error::Transaction("session factory is already closed".to_string());
        if self.is_closed() {
            return Err(already_closed());
        }
        let current = context::unbind(self.id)?;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(already_closed());
        }
        if let Some(mut session) = current {
            session.close()?;
        }
        if self.schema_action.drops_on_close() {
            self.with_connection(|conn| self.schema.drop(conn))?;
        }
        tracing::info!("Session factory closed");
        Ok(())
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mapped entities.
    pub fn entities(&self) -> &[EntityDescriptor] {
        self.services.entities()
    }

    /// The connection provider.
    pub fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        self.services.provider()
    }

    /// Optional behavior of the connection provider.
    pub fn capabilities(&self) -> ProviderCapabilities {
        self.provider().capabilities()
    }

    /// The SQL dialect.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Schema action run at startup.
    pub fn schema_action(&self) -> SchemaAction {
        self.schema_action
    }

    /// Current-session context, if configured.
    pub fn current_session_context(&self) -> Option<CurrentSessionContext> {
        self.context
    }

    /// Names of listeners bound to an event type, in dispatch order.
    pub fn listener_names(&self, event_type: EventType) -> Vec<&str> {
        self.services.listeners().listener_names(event_type)
    }

    /// Services shared with every session.
    pub fn services(&self) -> &Arc<SessionServices> {
        &self.services
    }
}

/// Turn the configured listener names into listener instances.
fn resolve_listeners(configuration: &Configuration, registry: &ServiceRegistry) -> Result<EventListenerRegistry> {
    let audit: Arc<dyn EventListener> = Arc::new(AuditEventListener);
    let callbacks: Arc<dyn EventListener> = Arc::new(configuration.callbacks().clone());

    let mut listeners = EventListenerRegistry::new();
    for (event_type, names) in registry.event_bindings() {
        for name in names {
            let listener = match name.as_str() {
                AuditEventListener::NAME => Arc::clone(&audit),
                EntityCallbackListener::NAME => Arc::clone(&callbacks),
                custom => configuration.listener(custom).ok_or_else(|| {
                    Error::config(
                        settings::event_key(*event_type),
                        format!("unknown listener `{custom}`"),
                    )
                })?,
            };
            tracing::debug!(event = %event_type, listener = name.as_str(), "Binding listener");
            listeners.append(*event_type, name.clone(), listener);
        }
    }
    Ok(listeners)
}

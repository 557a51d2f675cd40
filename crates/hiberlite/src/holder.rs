//! The process-wide session factory.

use std::sync::OnceLock;

use hiberlite_core::{Error, Result};
use hiberlite_schema::{Dialect, SchemaAction};
use hiberlite_session::{AuditEventListener, EntityCallbackListener, EventType};
use hiberlite_sqlite::EmbeddedConnectionProvider;

use crate::configuration::Configuration;
use crate::domain::{self, DOMAIN_PACKAGE};
use crate::factory::SessionFactory;
use crate::registry::StandardServiceRegistryBuilder;
use crate::scan::EntityScanner;
use crate::settings;

/// Builds a session factory at most once, on first access.
///
/// Concurrent first callers block until the single initialization finishes
/// and then all see the same factory. A failed initialization is kept too:
/// every later call returns the same [`Error::Initialization`].
pub struct FactoryHolder {
    cell: OnceLock<Result<SessionFactory>>,
    init: fn() -> Result<SessionFactory>,
}

impl FactoryHolder {
    /// Holder that runs `init` on first access.
    pub const fn new(init: fn() -> Result<SessionFactory>) -> Self {
        Self {
            cell: OnceLock::new(),
            init,
        }
    }

    /// The factory, initializing it if this is the first access.
    pub fn get(&self) -> Result<&SessionFactory> {
        let outcome = self.cell.get_or_init(|| {
            tracing::info!("Initializing session factory");
            (self.init)().map_err(|e| {
                tracing::error!(error = %e, "Session factory initialization failed");
                Error::Initialization(e.to_string())
            })
        });
        match outcome {
            Ok(factory) => Ok(factory),
            Err(e) => Err(e.clone()),
        }
    }

    /// Whether initialization has run (successfully or not).
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl std::fmt::Debug for FactoryHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryHolder")
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

static GLOBAL: FactoryHolder = FactoryHolder::new(initialize);

/// The shared session factory, built from [`default_configuration`] on first
/// call.
///
/// The schema of the default database (`~/hibernate_examples.db`) is dropped
/// and recreated by that first call.
pub fn session_factory() -> Result<&'static SessionFactory> {
    GLOBAL.get()
}

/// The fixed configuration of the shared factory, with every entity of the
/// domain package registered.
pub fn default_configuration() -> Result<Configuration> {
    let mut configuration = Configuration::new();
    configuration
        .set_property(settings::CONNECTION_PROVIDER, EmbeddedConnectionProvider::NAME)
        .set_property(settings::CURRENT_SESSION_CONTEXT_CLASS, "thread")
        .set_property(settings::DIALECT, Dialect::Sqlite.name())
        .set_property(settings::HBM2DDL_AUTO, SchemaAction::CreateDrop.as_str())
        .set_property(settings::SHOW_SQL, "true")
        .set_property(settings::FORMAT_SQL, "true");

    for event_type in EventType::ALL {
        let listeners = if event_type.is_collection() {
            AuditEventListener::NAME.to_string()
        } else {
            format!("{},{}", EntityCallbackListener::NAME, AuditEventListener::NAME)
        };
        configuration.set_property(settings::event_key(event_type), listeners);
    }

    for entity in EntityScanner::new(DOMAIN_PACKAGE).scan(&domain::candidates()) {
        configuration.add_annotated_entity(entity)?;
    }
    Ok(configuration)
}

/// Build a factory from a configuration and its own properties.
pub fn build_session_factory(configuration: Configuration) -> Result<SessionFactory> {
    let registry = StandardServiceRegistryBuilder::new()
        .apply_settings(configuration.properties())
        .build()?;
    configuration.build_session_factory(&registry)
}

fn initialize() -> Result<SessionFactory> {
    build_session_factory(default_configuration()?)
}

//! hiberlite: a session-factory bootstrap over an embedded SQLite database.
//!
//! `hiberlite` is the **facade crate** of the workspace. It turns a set of
//! string-keyed settings and a list of mapped entities into a
//! [`SessionFactory`], and keeps one such factory for the whole process.
//!
//! # Role In The Architecture
//!
//! - **Configuration**: [`Configuration`] collects properties, entities, and
//!   listeners; [`StandardServiceRegistryBuilder`] validates the properties into
//!   a typed [`ServiceRegistry`].
//! - **Bootstrap**: [`session_factory`] lazily builds the shared factory from
//!   [`default_configuration`] exactly once.
//! - **Sessions**: [`SessionFactory::open_session`] and the thread-bound
//!   [`SessionFactory::with_current_session`] hand out `hiberlite-session`
//!   sessions over connections from the configured provider.
//!
//! # Example
//!
//! ```ignore
//! use hiberlite::prelude::*;
//! use hiberlite::domain::Person;
//!
//! let factory = session_factory()?;
//! factory.with_current_session(|session| {
//!     let mut person = Person::new("Ada");
//!     session.save(&mut person)
//! })?;
//! factory.commit_current_session()?;
//! ```

pub mod configuration;
mod context;
pub mod domain;
pub mod factory;
pub mod holder;
pub mod registry;
pub mod scan;
pub mod settings;

pub use configuration::Configuration;
pub use factory::SessionFactory;
pub use holder::{FactoryHolder, build_session_factory, default_configuration, session_factory};
pub use registry::{CurrentSessionContext, ServiceRegistry, StandardServiceRegistryBuilder};
pub use scan::EntityScanner;

pub use hiberlite_core::{EntityDescriptor, Error, FieldInfo, Model, Result, Row, SqlType, Value};
pub use hiberlite_schema::{Dialect, SchemaAction};
pub use hiberlite_session::{
    AuditEventListener, EntityEvent, EventListener, EventSource, EventType, RevisionType, Session,
    SessionConfig,
};
pub use hiberlite_sqlite::{
    ConnectionProvider, DatabaseUrl, EmbeddedConnectionProvider, PhysicalConnection,
    ProviderCapabilities,
};

/// Common imports.
pub mod prelude {
    pub use crate::{
        Configuration, Error, EventType, FieldInfo, Model, Result, Row, Session, SessionFactory,
        SqlType, StandardServiceRegistryBuilder, Value, session_factory,
    };
}

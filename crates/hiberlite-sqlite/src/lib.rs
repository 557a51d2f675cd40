//! Embedded SQLite connection provider for hiberlite.
//!
//! The session factory never opens database connections itself. It asks a
//! [`ConnectionProvider`] for a [`PhysicalConnection`] whenever a session or the
//! schema exporter needs one, and hands it back through
//! [`ConnectionProvider::close_connection`] when done.
//!
//! [`EmbeddedConnectionProvider`] is the only provider shipped here: it opens a
//! brand-new SQLite connection to a fixed database file on every request. There
//! is no pooling, retry, or health checking.

pub mod connection;
pub mod logger;
pub mod provider;
pub mod url;

pub use connection::PhysicalConnection;
pub use logger::{SqlStatementLogger, format_sql};
pub use provider::{ConnectionProvider, EmbeddedConnectionProvider, ProviderCapabilities};
pub use url::{DEFAULT_URL, DatabaseUrl};

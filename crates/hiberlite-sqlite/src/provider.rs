//! Connection providers.

use std::any::{Any, TypeId};
use std::fmt;

use hiberlite_core::Result;

use crate::connection::PhysicalConnection;
use crate::url::{DEFAULT_URL, DatabaseUrl};

/// Optional behaviors a provider may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProviderCapabilities {
    /// The engine may release connections after each statement instead of
    /// holding one for the whole session.
    pub aggressive_release: bool,
    /// The provider can expose provider-specific extensions via `unwrap`.
    pub unwrappable: bool,
}

impl ProviderCapabilities {
    /// No optional behavior.
    pub const NONE: Self = Self {
        aggressive_release: false,
        unwrappable: false,
    };
}

/// Supplies physical connections on demand.
///
/// Implementations are shared across threads by the session factory and must
/// not rely on the calling thread.
pub trait ConnectionProvider: Send + Sync + fmt::Debug {
    /// Name used in the `hibernate.connection.provider_class` setting.
    fn name(&self) -> &'static str;

    /// Open a new connection.
    fn get_connection(&self) -> Result<PhysicalConnection>;

    /// Close a connection previously returned by `get_connection`.
    fn close_connection(&self, conn: &mut PhysicalConnection) -> Result<()>;

    /// Optional behavior supported by this provider.
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::NONE
    }

    /// Whether connections may be released between statements.
    fn supports_aggressive_release(&self) -> bool {
        self.capabilities().aggressive_release
    }

    /// Whether `unwrap` can produce a value of the given type.
    fn is_unwrappable_as(&self, _type_id: TypeId) -> bool {
        self.capabilities().unwrappable
    }

    /// Provider-specific extension of the given type.
    fn unwrap(&self, _type_id: TypeId) -> Option<&dyn Any> {
        None
    }
}

impl dyn ConnectionProvider {
    /// Typed form of [`ConnectionProvider::unwrap`].
    pub fn unwrap_as<T: Any>(&self) -> Option<&T> {
        self.unwrap(TypeId::of::<T>())
            .and_then(|any| any.downcast_ref::<T>())
    }
}

/// Opens a brand-new connection to one embedded database for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedConnectionProvider {
    url: DatabaseUrl,
}

impl EmbeddedConnectionProvider {
    /// Name used in configuration.
    pub const NAME: &'static str = "EmbeddedConnectionProvider";

    /// Provider for an explicit location.
    pub fn new(url: DatabaseUrl) -> Self {
        Self { url }
    }

    /// Provider for the fixed default location ([`DEFAULT_URL`]).
    pub fn with_default_location() -> Result<Self> {
        DatabaseUrl::parse(DEFAULT_URL).map(Self::new)
    }

    /// The database location.
    pub fn url(&self) -> &DatabaseUrl {
        &self.url
    }
}

impl ConnectionProvider for EmbeddedConnectionProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn get_connection(&self) -> Result<PhysicalConnection> {
        PhysicalConnection::open(&self.url)
    }

    fn close_connection(&self, conn: &mut PhysicalConnection) -> Result<()> {
        conn.close()
    }
}

//! Service registry: the typed view of configuration properties.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use hiberlite_core::{Error, Result};
use hiberlite_schema::{Dialect, SchemaAction};
use hiberlite_session::{EventType, SessionConfig};
use hiberlite_sqlite::{
    ConnectionProvider, DEFAULT_URL, DatabaseUrl, EmbeddedConnectionProvider, SqlStatementLogger,
};

use crate::settings;

/// How the factory tracks a "current" session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentSessionContext {
    /// One session per thread and factory.
    Thread,
}

impl CurrentSessionContext {
    /// Parse the `hibernate.current_session_context_class` setting.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "thread" => Ok(CurrentSessionContext::Thread),
            other => Err(Error::config(
                settings::CURRENT_SESSION_CONTEXT_CLASS,
                format!("unsupported session context `{other}`"),
            )),
        }
    }
}

/// Parse the `hibernate.flushMode` setting into the auto-flush switch.
fn parse_flush_mode(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(true),
        "commit" => Ok(false),
        other => Err(Error::config(
            settings::FLUSH_MODE,
            format!("unsupported flush mode `{other}`"),
        )),
    }
}

/// Collects raw settings and builds a [`ServiceRegistry`].
#[derive(Debug, Clone, Default)]
pub struct StandardServiceRegistryBuilder {
    settings: BTreeMap<String, String>,
}

impl StandardServiceRegistryBuilder {
    /// Builder with no settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every setting, replacing earlier values for the same keys.
    #[must_use]
    pub fn apply_settings(mut self, settings: &BTreeMap<String, String>) -> Self {
        self.settings
            .extend(settings.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Add one setting.
    #[must_use]
    pub fn apply_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Parse and validate the settings.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn build(self) -> Result<ServiceRegistry> {
        let get = |key: &str| self.settings.get(key).map(String::as_str);

        let url = parse_url(get(settings::URL).unwrap_or(DEFAULT_URL))?;
        let provider = resolve_provider(get(settings::CONNECTION_PROVIDER), url)?;

        let dialect = get(settings::DIALECT)
            .map(Dialect::from_setting)
            .transpose()?
            .unwrap_or_default();
        let schema_action = get(settings::HBM2DDL_AUTO)
            .map(SchemaAction::parse)
            .transpose()?
            .unwrap_or_default();
        let context = get(settings::CURRENT_SESSION_CONTEXT_CLASS)
            .map(CurrentSessionContext::parse)
            .transpose()?;

        let show_sql = get(settings::SHOW_SQL)
            .map(|v| settings::parse_bool(settings::SHOW_SQL, v))
            .transpose()?
            .unwrap_or(false);
        let format_sql = get(settings::FORMAT_SQL)
            .map(|v| settings::parse_bool(settings::FORMAT_SQL, v))
            .transpose()?
            .unwrap_or(false);

        let auto_flush = get(settings::FLUSH_MODE)
            .map(parse_flush_mode)
            .transpose()?
            .unwrap_or(false);
        let autocommit = get(settings::AUTOCOMMIT)
            .map(|v| settings::parse_bool(settings::AUTOCOMMIT, v))
            .transpose()?
            .unwrap_or(false);
        let session_config = SessionConfig {
            auto_begin: !autocommit,
            auto_flush,
        };

        let mut event_bindings = BTreeMap::new();
        for (key, value) in &self.settings {
            let Some(event) = key.strip_prefix(settings::EVENT_PREFIX) else {
                continue;
            };
            let event_type = EventType::from_key(event)
                .ok_or_else(|| Error::config(key.as_str(), format!("unknown event type `{event}`")))?;
            event_bindings.insert(event_type, settings::listener_names(value));
        }

        tracing::info!(
            provider = provider.name(),
            dialect = dialect.name(),
            schema_action = schema_action.as_str(),
            show_sql,
            format_sql,
            auto_flush,
            autocommit,
            "Built service registry"
        );

        Ok(ServiceRegistry {
            provider,
            dialect,
            schema_action,
            context,
            logger: SqlStatementLogger::new(show_sql, format_sql),
            session_config,
            event_bindings,
            settings: self.settings,
        })
    }
}

fn parse_url(value: &str) -> Result<DatabaseUrl> {
    DatabaseUrl::parse(value).map_err(|e| match e {
        Error::Config { message, .. } => Error::config(settings::URL, message),
        other => other,
    })
}

fn resolve_provider(setting: Option<&str>, url: DatabaseUrl) -> Result<Arc<dyn ConnectionProvider>> {
    let name = setting.map_or(EmbeddedConnectionProvider::NAME, str::trim);
    let short = name.rsplit("::").next().unwrap_or(name);
    if short == EmbeddedConnectionProvider::NAME {
        Ok(Arc::new(EmbeddedConnectionProvider::new(url)))
    } else {
        Err(Error::config(
            settings::CONNECTION_PROVIDER,
            format!("unknown connection provider `{name}`"),
        ))
    }
}

/// Validated services a session factory is built from.
pub struct ServiceRegistry {
    provider: Arc<dyn ConnectionProvider>,
    dialect: Dialect,
    schema_action: SchemaAction,
    context: Option<CurrentSessionContext>,
    logger: SqlStatementLogger,
    session_config: SessionConfig,
    event_bindings: BTreeMap<EventType, Vec<String>>,
    settings: BTreeMap<String, String>,
}

impl ServiceRegistry {
    /// The connection provider.
    pub fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        &self.provider
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
    pub fn context(&self) -> Option<CurrentSessionContext> {
        self.context
    }

    /// Statement logger for every connection.
    pub fn logger(&self) -> SqlStatementLogger {
        self.logger
    }

    /// Flush and transaction behaviour of every session.
    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    /// Listener names bound to each event type, in binding order.
    pub fn event_bindings(&self) -> &BTreeMap<EventType, Vec<String>> {
        &self.event_bindings
    }

    /// Raw setting value.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("provider", &self.provider.name())
            .field("dialect", &self.dialect)
            .field("schema_action", &self.schema_action)
            .field("context", &self.context)
            .field("logger", &self.logger)
            .field("session_config", &self.session_config)
            .field("event_bindings", &self.event_bindings)
            .finish_non_exhaustive()
    }
}

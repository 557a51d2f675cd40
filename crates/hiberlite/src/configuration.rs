//! Configuration: raw properties, mapped entities, and named listeners.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use hiberlite_core::{EntityDescriptor, Error, Model, Result};
use hiberlite_session::{EntityCallback, EntityCallbackListener, EntityEvent, EventListener, EventType};

use crate::factory::SessionFactory;
use crate::registry::ServiceRegistry;

/// Everything needed to build a [`SessionFactory`] besides the typed services.
///
/// # Example
///
/// ```ignore
/// let mut configuration = Configuration::new();
/// configuration
///     .set_property(settings::URL, "sqlite:/tmp/app.db")
///     .set_property(settings::HBM2DDL_AUTO, "update");
/// configuration.add_model::<Person>()?;
///
/// let registry = StandardServiceRegistryBuilder::new()
///     .apply_settings(configuration.properties())
///     .build()?;
/// let factory = configuration.build_session_factory(&registry)?;
/// ```
#[derive(Default)]
pub struct Configuration {
    properties: BTreeMap<String, String>,
    entities: Vec<EntityDescriptor>,
    listeners: HashMap<String, Arc<dyn EventListener>>,
    callbacks: EntityCallbackListener,
}

impl Configuration {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing any earlier value.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Value of a property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// All properties.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Register an entity.
    ///
    /// The descriptor must be tagged as an entity, must not be generic, and
    /// must describe a valid table. Registering the same entity twice is a
    /// no-op; two entities mapping the same table is an error.
    pub fn add_annotated_entity(&mut self, descriptor: EntityDescriptor) -> Result<&mut Self> {
        let name = descriptor.qualified_name();
        if !descriptor.is_entity {
            return Err(Error::Mapping(format!("{name} is not an entity")));
        }
        if descriptor.is_generic() {
            return Err(Error::Mapping(format!(
                "{name} declares generic type parameters and cannot be mapped directly"
            )));
        }
        descriptor.validate()?;

        if let Some(existing) = self
            .entities
            .iter()
            .find(|e| e.table_name == descriptor.table_name)
        {
            if existing.qualified_name() == name {
                return Ok(self);
            }
            return Err(Error::Mapping(format!(
                "{name} and {} both map table `{}`",
                existing.qualified_name(),
                descriptor.table_name
            )));
        }

        tracing::debug!(entity = %name, table = descriptor.table_name, "Registered entity");
        self.entities.push(descriptor);
        Ok(self)
    }

    /// Register a `Model` type.
    pub fn add_model<M: Model>(&mut self) -> Result<&mut Self> {
        self.add_annotated_entity(M::descriptor())
    }

    /// Registered entities, in registration order.
    pub fn entities(&self) -> &[EntityDescriptor] {
        &self.entities
    }

    /// Make a custom listener available under `name` for
    /// `hibernate.ejb.event.*` bindings.
    pub fn register_listener(&mut self, name: impl Into<String>, listener: Arc<dyn EventListener>) -> &mut Self {
        self.listeners.insert(name.into(), listener);
        self
    }

    /// Custom listener registered under `name`.
    pub fn listener(&self, name: &str) -> Option<Arc<dyn EventListener>> {
        self.listeners.get(name).cloned()
    }

    /// Run `callback` for `event_type` events of the named entity.
    ///
    /// Callbacks run through the `callbacks` listener, so they only fire for
    /// event types that bind it.
    pub fn on_entity_event<F>(&mut self, entity: &str, event_type: EventType, callback: F) -> &mut Self
    where
        F: Fn(&EntityEvent<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let callback: EntityCallback = Arc::new(callback);
        self.callbacks.register(entity, event_type, callback);
        self
    }

    /// Per-entity callbacks.
    pub fn callbacks(&self) -> &EntityCallbackListener {
        &self.callbacks
    }

    /// Build a session factory. Runs the configured schema action.
    pub fn build_session_factory(self, registry: &ServiceRegistry) -> Result<SessionFactory> {
        SessionFactory::build(&self, registry)
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut listeners: Vec<&str> = self.listeners.keys().map(String::as_str).collect();
        listeners.sort_unstable();
        f.debug_struct("Configuration")
            .field("properties", &self.properties)
            .field(
                "entities",
                &self.entities.iter().map(|e| e.name).collect::<Vec<_>>(),
            )
            .field("listeners", &listeners)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Labelled, Person, PersonName, Tag};

    #[test]
    fn test_set_property_replaces() {
        let mut configuration = Configuration::new();
        configuration
            .set_property("hibernate.show_sql", "false")
            .set_property("hibernate.show_sql", "true");
        assert_eq!(configuration.property("hibernate.show_sql"), Some("true"));
        assert_eq!(configuration.properties().len(), 1);
    }

    #[test]
    fn test_add_entities() {
        let mut configuration = Configuration::new();
        configuration.add_model::<Person>().unwrap();
        configuration.add_model::<Tag>().unwrap();
        configuration.add_model::<Person>().unwrap();
        let names: Vec<_> = configuration.entities().iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Person", "Tag"]);
    }

    #[test]
    fn test_rejects_unmappable_descriptors() {
        let mut configuration = Configuration::new();
        assert!(matches!(
            configuration.add_annotated_entity(PersonName::DESCRIPTOR),
            Err(Error::Mapping(_))
        ));
        assert!(matches!(
            configuration.add_annotated_entity(Labelled::<i64>::DESCRIPTOR),
            Err(Error::Mapping(_))
        ));
        assert!(configuration.entities().is_empty());
    }

    #[test]
    fn test_rejects_table_clash() {
        let mut configuration = Configuration::new();
        configuration.add_model::<Person>().unwrap();
        let clash = EntityDescriptor {
            name: "People",
            ..Person::descriptor()
        };
        let err = configuration.add_annotated_entity(clash).unwrap_err();
        assert!(err.to_string().contains("person"));
    }

    #[test]
    fn test_callbacks_and_listeners() {
        let mut configuration = Configuration::new();
        configuration.on_entity_event("Person", EventType::PostInsert, |_event| Ok(()));
        configuration.register_listener("custom", Arc::new(hiberlite_session::AuditEventListener));
        assert_eq!(configuration.callbacks().len(), 1);
        assert!(configuration.listener("custom").is_some());
        assert!(configuration.listener("other").is_none());
    }
}

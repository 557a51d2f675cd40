//! Sample domain model.
//!
//! `Person` and `Tag` are mapped entities. `Labelled<T>` is tagged as an entity
//! but generic, and `PersonName` is a plain value type; both are listed as
//! candidates and left out by entity discovery.

use hiberlite_core::{EntityDescriptor, FieldInfo, Model, Result, Row, SqlType, Value};

/// Package scanned for entities by the global session factory.
pub const DOMAIN_PACKAGE: &str = module_path!();

/// Every type this module declares, as seen by entity discovery.
pub fn candidates() -> Vec<EntityDescriptor> {
    vec![
        Person::descriptor(),
        Tag::descriptor(),
        Labelled::<()>::DESCRIPTOR,
        PersonName::DESCRIPTOR,
    ]
}

/// An audited person.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Person {
    /// Generated on insert.
    pub id: Option<i64>,
    pub name: String,
    pub email: Option<String>,
    /// Free text, not tracked in the audit trail.
    pub notes: Option<String>,
}

impl Person {
    /// A new, unsaved person.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

static PERSON_FIELDS: [FieldInfo; 4] = [
    FieldInfo::new("id", "id", SqlType::BigInt)
        .primary_key(true)
        .auto_increment(true),
    FieldInfo::new("name", "name", SqlType::VarChar(255)),
    FieldInfo::new("email", "email", SqlType::VarChar(255))
        .nullable(true)
        .unique(true),
    FieldInfo::new("notes", "notes", SqlType::Text)
        .nullable(true)
        .not_audited(true),
];

impl Model for Person {
    const ENTITY_NAME: &'static str = "Person";
    const PACKAGE: &'static str = module_path!();
    const TABLE_NAME: &'static str = "person";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const AUDITED: bool = true;

    fn fields() -> &'static [FieldInfo] {
        &PERSON_FIELDS
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("name", Value::from(self.name.clone())),
            ("email", Value::from(self.email.clone())),
            ("notes", Value::from(self.notes.clone())),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_as("id")?,
            name: row.get_as("name")?,
            email: row.get_as("email")?,
            notes: row.get_as("notes")?,
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![Value::from(self.id)]
    }

    fn set_generated_key(&mut self, key: i64) {
        self.id = Some(key);
    }
}

/// A label keyed by its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub color: Option<String>,
}

static TAG_FIELDS: [FieldInfo; 2] = [
    FieldInfo::new("name", "name", SqlType::VarChar(40)).primary_key(true),
    FieldInfo::new("color", "color", SqlType::VarChar(16)).nullable(true),
];

impl Model for Tag {
    const ENTITY_NAME: &'static str = "Tag";
    const PACKAGE: &'static str = module_path!();
    const TABLE_NAME: &'static str = "tag";
    const PRIMARY_KEY: &'static [&'static str] = &["name"];

    fn fields() -> &'static [FieldInfo] {
        &TAG_FIELDS
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", Value::from(self.name.clone())),
            ("color", Value::from(self.color.clone())),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            name: row.get_as("name")?,
            color: row.get_as("color")?,
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![Value::from(self.name.clone())]
    }
}

/// A value with a label, generic over the value type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labelled<T> {
    pub id: i64,
    pub label: String,
    pub value: T,
}

impl<T> Labelled<T> {
    /// Tagged as an entity, but declares one type parameter.
    pub const DESCRIPTOR: EntityDescriptor = EntityDescriptor::declared("Labelled", module_path!())
        .entity(true)
        .type_params(1);
}

/// First and last name, embedded in other types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonName {
    pub first: String,
    pub last: String,
}

impl PersonName {
    /// Not an entity.
    pub const DESCRIPTOR: EntityDescriptor = EntityDescriptor::declared("PersonName", module_path!());
}

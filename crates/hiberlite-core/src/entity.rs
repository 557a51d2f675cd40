//! Static entity metadata.
//!
//! An `EntityDescriptor` is what the bootstrap sees of a candidate type: its
//! name and module, whether it is tagged as an entity, how many generic type
//! parameters it declares, and (for mapped types) its table layout. Candidates
//! are listed explicitly by the application instead of being found through
//! runtime type introspection.

use std::any::TypeId;

use crate::error::{Error, Result};
use crate::field::FieldInfo;
use crate::identifiers::is_valid_identifier;
use crate::model::Model;

/// Metadata about one candidate persistent type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Type name, without module path.
    pub name: &'static str,
    /// Module path the type is declared in.
    pub package: &'static str,
    /// Whether the type is tagged as a persistent entity.
    pub is_entity: bool,
    /// Number of generic type parameters the type declares.
    pub type_params: usize,
    /// Mapped table name (empty for unmapped candidates).
    pub table_name: &'static str,
    /// Primary key columns.
    pub primary_key: &'static [&'static str],
    /// Column metadata.
    pub fields: &'static [FieldInfo],
    /// Whether the entity is audited.
    pub audited: bool,
    /// Concrete Rust type, when the descriptor came from a `Model` impl.
    pub type_id: Option<TypeId>,
}

impl EntityDescriptor {
    /// Descriptor for a concrete `Model` type.
    pub fn of<M: Model>() -> Self {
        Self {
            name: M::ENTITY_NAME,
            package: M::PACKAGE,
            is_entity: true,
            type_params: 0,
            table_name: M::TABLE_NAME,
            primary_key: M::PRIMARY_KEY,
            fields: M::fields(),
            audited: M::AUDITED,
            type_id: Some(TypeId::of::<M>()),
        }
    }

    /// Descriptor for a declared type that has no `Model` impl of its own
    /// (a generic mapped superclass, an embeddable value type, ...).
    pub const fn declared(name: &'static str, package: &'static str) -> Self {
        Self {
            name,
            package,
            is_entity: false,
            type_params: 0,
            table_name: "",
            primary_key: &[],
            fields: &[],
            audited: false,
            type_id: None,
        }
    }

    /// Mark as tagged entity.
    pub const fn entity(mut self, value: bool) -> Self {
        self.is_entity = value;
        self
    }

    /// Set the number of generic type parameters.
    pub const fn type_params(mut self, count: usize) -> Self {
        self.type_params = count;
        self
    }

    /// Set the mapped table.
    pub const fn table(mut self, name: &'static str) -> Self {
        self.table_name = name;
        self
    }

    /// `package::Name`
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.package, self.name)
    }

    /// Whether the type lives in `package` or one of its submodules.
    pub fn in_package(&self, package: &str) -> bool {
        self.package == package
            || self
                .package
                .strip_prefix(package)
                .is_some_and(|rest| rest.starts_with("::"))
    }

    /// Whether the type is generic.
    pub const fn is_generic(&self) -> bool {
        self.type_params > 0
    }

    /// Columns written to the audit table.
    pub fn audited_fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter().filter(|f| f.is_audited())
    }

    /// Check that the mapping can be turned into a table.
    pub fn validate(&self) -> Result<()> {
        let name = self.qualified_name();
        if !is_valid_identifier(self.table_name) {
            return Err(Error::Mapping(format!(
                "entity {name} maps to invalid table name `{}`",
                self.table_name
            )));
        }
        if self.fields.is_empty() {
            return Err(Error::Mapping(format!("entity {name} has no columns")));
        }
        for field in self.fields {
            if !is_valid_identifier(field.column_name) {
                return Err(Error::Mapping(format!(
                    "entity {name} has invalid column name `{}`",
                    field.column_name
                )));
            }
        }
        if self.primary_key.is_empty() {
            return Err(Error::Mapping(format!("entity {name} has no primary key")));
        }
        for pk in self.primary_key {
            let field = self
                .fields
                .iter()
                .find(|f| f.column_name == *pk)
                .ok_or_else(|| {
                    Error::Mapping(format!(
                        "entity {name} declares primary key `{pk}` but has no such column"
                    ))
                })?;
            if !field.primary_key {
                return Err(Error::Mapping(format!(
                    "column `{pk}` of entity {name} is not flagged as primary key"
                )));
            }
        }
        let generated = self.fields.iter().filter(|f| f.auto_increment).count();
        if generated > 0 && (self.primary_key.len() != 1 || generated > 1) {
            return Err(Error::Mapping(format!(
                "entity {name}: auto-increment is only supported on a single-column primary key"
            )));
        }
        Ok(())
    }

    /// The auto-increment primary key column, if any.
    pub fn generated_key(&self) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.primary_key && f.auto_increment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlType;

    static FIELDS: [FieldInfo; 2] = [
        FieldInfo::new("id", "id", SqlType::BigInt)
            .primary_key(true)
            .auto_increment(true),
        FieldInfo::new("label", "label", SqlType::Text).not_audited(true),
    ];

    fn mapped() -> EntityDescriptor {
        EntityDescriptor {
            primary_key: &["id"],
            fields: &FIELDS,
            ..EntityDescriptor::declared("Label", "app::domain")
                .entity(true)
                .table("label")
        }
    }

    #[test]
    fn test_in_package_matches_submodules_only_on_boundary() {
        let d = EntityDescriptor::declared("X", "app::domain::inner");
        assert!(d.in_package("app::domain"));
        assert!(d.in_package("app::domain::inner"));
        assert!(!d.in_package("app::dom"));
        assert!(!d.in_package("app::domain::inner::deeper"));
    }

    #[test]
    fn test_declared_defaults() {
        let d = EntityDescriptor::declared("Base", "app::domain").type_params(1);
        assert!(!d.is_entity);
        assert!(d.is_generic());
        assert_eq!(d.qualified_name(), "app::domain::Base");
    }

    #[test]
    fn test_validate_accepts_mapped_entity() {
        let d = mapped();
        d.validate().unwrap();
        assert_eq!(d.generated_key().map(|f| f.column_name), Some("id"));
        let audited: Vec<_> = d.audited_fields().map(|f| f.column_name).collect();
        assert_eq!(audited, vec!["id"]);
    }

    #[test]
    fn test_validate_rejects_bad_table_name() {
        let d = EntityDescriptor {
            table_name: "bad name",
            ..mapped()
        };
        assert!(matches!(d.validate(), Err(Error::Mapping(_))));
    }

    #[test]
    fn test_validate_rejects_missing_primary_key_column() {
        let d = EntityDescriptor {
            primary_key: &["uuid"],
            ..mapped()
        };
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("uuid"));
    }
}

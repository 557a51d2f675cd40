//! The `Model` trait implemented by mapped entity types.

use crate::entity::EntityDescriptor;
use crate::error::Result;
use crate::field::FieldInfo;
use crate::row::Row;
use crate::value::Value;

/// A Rust type mapped to a database table.
///
/// Implementations are plain data holders; the session clones them into its
/// identity map, so they must be `Clone` and own their data.
///
/// # Example
///
/// ```ignore
/// static PERSON_FIELDS: [FieldInfo; 2] = [
///     FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true).auto_increment(true),
///     FieldInfo::new("name", "name", SqlType::VarChar(255)),
/// ];
///
/// impl Model for Person {
///     const ENTITY_NAME: &'static str = "Person";
///     const PACKAGE: &'static str = module_path!();
///     const TABLE_NAME: &'static str = "person";
///     const PRIMARY_KEY: &'static [&'static str] = &["id"];
///     const AUDITED: bool = true;
///     // ...
/// }
/// ```
pub trait Model: Sized + Clone + Send + Sync + 'static {
    /// Entity name used in logs, events, and mapping errors.
    const ENTITY_NAME: &'static str;
    /// Module path the entity lives in; entity discovery filters on it.
    const PACKAGE: &'static str;
    /// Table the entity maps to.
    const TABLE_NAME: &'static str;
    /// Primary key column names.
    const PRIMARY_KEY: &'static [&'static str];
    /// Whether changes to this entity are written to its audit table.
    const AUDITED: bool = false;

    /// Column metadata, in column order.
    fn fields() -> &'static [FieldInfo];

    /// Current column values, as `(column, value)` pairs in column order.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Build an instance from a selected row.
    fn from_row(row: &Row) -> Result<Self>;

    /// Primary key value(s), in `PRIMARY_KEY` order.
    fn primary_key_value(&self) -> Vec<Value>;

    /// Store a database-generated key after insert.
    ///
    /// Only called for entities with an auto-increment primary key.
    fn set_generated_key(&mut self, _key: i64) {}

    /// Static descriptor used for discovery and registration.
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
    }
}

//! Core types and traits for hiberlite.
//!
//! `hiberlite-core` is the **foundation layer** of the workspace. It defines the
//! traits and data types every other crate builds on.
//!
//! # Role In The Architecture
//!
//! - **Contract layer**: `Model` is implemented by mapped entity types, and
//!   `EntityDescriptor` is the static metadata the bootstrap scans and registers.
//! - **Data model**: `Row`, `Value`, and `SqlType` represent statement inputs/outputs and
//!   are shared across the schema, session, and driver crates.
//! - **Errors**: a single cloneable `Error` so a failed one-time initialization can be
//!   reported to every caller.
//!
//! # Who Uses This Crate
//!
//! - `hiberlite-sqlite` converts between `Value` and SQLite values and reports `Error`.
//! - `hiberlite-schema` reads `EntityDescriptor`/`FieldInfo` to generate DDL.
//! - `hiberlite-session` depends on `Model`, `Row`, and `Value` for unit-of-work flows.
//! - `hiberlite` (the facade) scans `EntityDescriptor`s and builds the session factory.

pub mod entity;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod model;
pub mod row;
pub mod types;
pub mod value;

pub use entity::EntityDescriptor;
pub use error::{Error, Result};
pub use field::FieldInfo;
pub use identifiers::{is_valid_identifier, quote_ident};
pub use model::Model;
pub use row::Row;
pub use types::SqlType;
pub use value::{FromValue, Value};

//! Schema export and validation for hiberlite.
//!
//! Turns the registered [`EntityDescriptor`](hiberlite_core::EntityDescriptor)s into
//! DDL for the configured [`Dialect`], and applies it at session-factory startup
//! according to the [`SchemaAction`] (`hibernate.hbm2ddl.auto`).

pub mod ddl;
pub mod dialect;
pub mod export;

pub use ddl::{
    REV_COLUMN, REVINFO_TABLE, REVTSTMP_COLUMN, REVTYPE_COLUMN, audit_table_name,
    generate_create_audit_table, generate_create_revinfo, generate_create_table,
    generate_drop_table,
};
pub use dialect::Dialect;
pub use export::{SchemaAction, SchemaExport};

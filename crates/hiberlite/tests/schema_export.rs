use std::path::Path;

use hiberlite::domain::{Person, Tag};
use hiberlite::{Result, SessionFactory, build_session_factory, default_configuration, settings};

fn factory_at(path: &Path, action: &str) -> Result<SessionFactory> {
    let mut configuration = default_configuration()?;
    configuration
        .set_property(settings::URL, format!("sqlite:{}", path.display()))
        .set_property(settings::HBM2DDL_AUTO, action);
    build_session_factory(configuration)
}

fn count_people(factory: &SessionFactory) -> usize {
    let mut session = factory.open_session().unwrap();
    let people = session.list::<Person>().unwrap();
    session.close().unwrap();
    people.len()
}

#[test]
fn reinitializing_recreates_the_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("examples.db");

    let first = factory_at(&path, "create-drop").unwrap();
    let mut session = first.open_session().unwrap();
    session.save(&mut Person::new("Ada")).unwrap();
    session.commit().unwrap();
    session.close().unwrap();
    assert_eq!(count_people(&first), 1);

    // the first factory is never closed, as when a process exits abruptly
    let second = factory_at(&path, "create-drop").unwrap();
    assert_eq!(count_people(&second), 0);
}

#[test]
fn update_keeps_existing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kept.db");

    let first = factory_at(&path, "update").unwrap();
    let mut session = first.open_session().unwrap();
    session
        .save(&mut Tag {
            name: "rust".to_string(),
            color: Some("orange".to_string()),
        })
        .unwrap();
    session.commit().unwrap();
    session.close().unwrap();
    first.close().unwrap();

    let second = factory_at(&path, "update").unwrap();
    let mut session = second.open_session().unwrap();
    let tag = session.get::<Tag>("rust").unwrap().unwrap();
    assert_eq!(tag.color.as_deref(), Some("orange"));
}

#[test]
fn closing_a_create_drop_factory_drops_its_tables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dropped.db");

    let factory = factory_at(&path, "create-drop").unwrap();
    factory.close().unwrap();

    let validating = factory_at(&path, "validate").unwrap_err();
    assert!(validating.to_string().contains("missing table"), "{validating}");
}

#[test]
fn validate_accepts_an_exported_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("valid.db");

    let _created = factory_at(&path, "create").unwrap();
    let validated = factory_at(&path, "validate").unwrap();
    assert_eq!(count_people(&validated), 0);
}

#[test]
fn memory_database_is_private_to_each_connection() {
    let mut configuration = default_configuration().unwrap();
    configuration.set_property(settings::URL, "sqlite::memory:");
    let factory = build_session_factory(configuration).unwrap();

    let mut session = factory.open_session().unwrap();
    assert!(!session.connection().unwrap().table_exists("person").unwrap());
    assert!(session.list::<Person>().is_err());
}

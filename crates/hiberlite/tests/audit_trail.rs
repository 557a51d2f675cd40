use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hiberlite::domain::{Person, Tag};
use hiberlite::{
    Error, EventType, Result, Row, SessionFactory, Value, build_session_factory, default_configuration,
    settings,
};

fn factory(dir: &tempfile::TempDir) -> SessionFactory {
    let mut configuration = default_configuration().unwrap();
    configuration.set_property(
        settings::URL,
        format!("sqlite:{}", dir.path().join("audit.db").display()),
    );
    build_session_factory(configuration).unwrap()
}

fn query(factory: &SessionFactory, sql: &str) -> Vec<Row> {
    let mut session = factory.open_session().unwrap();
    let rows = session.connection().unwrap().query(sql, &[]).unwrap();
    session.close().unwrap();
    rows
}

#[test]
fn each_change_gets_its_own_revision() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(&dir);

    let id = factory
        .with_current_session(|session| {
            let mut person = Person::new("Ada").with_email("ada@example.com");
            person.notes = Some("first programmer".to_string());
            session.save(&mut person)?;
            Ok(person.id)
        })
        .unwrap()
        .unwrap();
    factory.commit_current_session().unwrap();

    factory
        .with_current_session(|session| {
            let mut person = session.get::<Person>(id)?.unwrap();
            person.name = "Ada Lovelace".to_string();
            session.update(&person)
        })
        .unwrap();
    factory.commit_current_session().unwrap();

    factory
        .with_current_session(|session| {
            let person = session.get::<Person>(id)?.unwrap();
            session.delete(&person)
        })
        .unwrap();
    factory.commit_current_session().unwrap();

    let rows = query(
        &factory,
        "SELECT \"rev\", \"revtype\", \"name\", \"email\" FROM \"person_aud\" ORDER BY \"rev\"",
    );
    let revtypes: Vec<i64> = rows.iter().map(|r| r.get_as("revtype").unwrap()).collect();
    assert_eq!(revtypes, vec![0, 1, 2]);
    let names: Vec<Option<String>> = rows.iter().map(|r| r.get_as("name").unwrap()).collect();
    assert_eq!(
        names,
        vec![Some("Ada".to_string()), Some("Ada Lovelace".to_string()), None]
    );
    assert_eq!(rows[0].get_named("email"), Some(&Value::Text("ada@example.com".to_string())));

    let revisions = query(&factory, "SELECT \"rev\", \"revtstmp\" FROM \"revinfo\" ORDER BY \"rev\"");
    assert_eq!(revisions.len(), 3);
    for (revision, audited) in revisions.iter().zip(&rows) {
        assert_eq!(revision.get_named("rev"), audited.get_named("rev"));
        assert!(revision.get_as::<i64>("revtstmp").unwrap() > 0);
    }
}

#[test]
fn one_transaction_is_one_revision() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(&dir);

    factory
        .with_current_session(|session| {
            session.save(&mut Person::new("Ada"))?;
            session.save(&mut Person::new("Grace"))?;
            let mut alan = Person::new("Alan");
            session.save(&mut alan)?;
            alan.email = Some("alan@example.com".to_string());
            session.update(&alan)
        })
        .unwrap();
    factory.commit_current_session().unwrap();

    assert_eq!(query(&factory, "SELECT * FROM \"revinfo\"").len(), 1);
    let rows = query(&factory, "SELECT \"revtype\", \"email\" FROM \"person_aud\" ORDER BY \"id\"");
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.get_as::<i64>("revtype").unwrap() == 0));
    assert_eq!(
        rows[2].get_as::<Option<String>>("email").unwrap().as_deref(),
        Some("alan@example.com")
    );
}

#[test]
fn rolled_back_changes_leave_no_audit_trail() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(&dir);

    factory
        .with_current_session(|session| {
            session.save(&mut Person::new("Ada"))?;
            session.flush()
        })
        .unwrap();
    factory.rollback_current_session().unwrap();

    assert!(query(&factory, "SELECT * FROM \"person\"").is_empty());
    assert!(query(&factory, "SELECT * FROM \"person_aud\"").is_empty());
    assert!(query(&factory, "SELECT * FROM \"revinfo\"").is_empty());
}

#[test]
fn unaudited_entities_and_columns_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(&dir);

    factory
        .with_current_session(|session| {
            session.save(&mut Tag {
                name: "history".to_string(),
                color: None,
            })
        })
        .unwrap();
    factory.commit_current_session().unwrap();
    assert!(query(&factory, "SELECT * FROM \"revinfo\"").is_empty());

    factory
        .with_current_session(|session| {
            let mut person = Person::new("Ada");
            person.notes = Some("not audited".to_string());
            session.save(&mut person)
        })
        .unwrap();
    factory.commit_current_session().unwrap();
    let rows = query(&factory, "SELECT * FROM \"person_aud\"");
    assert_eq!(rows.len(), 1);
    assert!(rows[0].get_named("notes").is_none());
}

fn factory_with_callbacks(dir: &tempfile::TempDir, inserts: &Arc<AtomicUsize>, reject: bool) -> SessionFactory {
    let mut configuration = default_configuration().unwrap();
    configuration.set_property(
        settings::URL,
        format!("sqlite:{}", dir.path().join("callbacks.db").display()),
    );
    let counter = Arc::clone(inserts);
    configuration.on_entity_event("Person", EventType::PostInsert, move |event| {
        counter.fetch_add(1, Ordering::SeqCst);
        if reject && event.value("name") == Some(&Value::from("Mallory")) {
            return Err(Error::Custom("Mallory is not welcome".to_string()));
        }
        Ok(())
    });
    build_session_factory(configuration).unwrap()
}

#[test]
fn entity_callbacks_run_before_auditing() {
    let dir = tempfile::tempdir().unwrap();
    let inserts = Arc::new(AtomicUsize::new(0));
    let factory = factory_with_callbacks(&dir, &inserts, false);

    factory
        .with_current_session(|session| {
            session.save(&mut Person::new("Ada"))?;
            session.save(&mut Tag {
                name: "math".to_string(),
                color: None,
            })
        })
        .unwrap();
    factory.commit_current_session().unwrap();

    assert_eq!(inserts.load(Ordering::SeqCst), 1);
    assert_eq!(query(&factory, "SELECT * FROM \"person_aud\"").len(), 1);
}

#[test]
fn failing_callback_aborts_the_change() {
    let dir = tempfile::tempdir().unwrap();
    let inserts = Arc::new(AtomicUsize::new(0));
    let factory = factory_with_callbacks(&dir, &inserts, true);

    let result: Result<()> = factory.with_current_session(|session| session.save(&mut Person::new("Mallory")));
    assert!(matches!(result, Err(Error::Custom(ref m)) if m.contains("Mallory")));
    factory.rollback_current_session().unwrap();

    assert_eq!(inserts.load(Ordering::SeqCst), 1);
    assert!(query(&factory, "SELECT * FROM \"person\"").is_empty());
    assert!(query(&factory, "SELECT * FROM \"person_aud\"").is_empty());
}

#[test]
fn rejected_flush_cannot_be_committed_on_retry() {
    let dir = tempfile::tempdir().unwrap();
    let inserts = Arc::new(AtomicUsize::new(0));
    let factory = factory_with_callbacks(&dir, &inserts, true);

    let mut session = factory.open_session().unwrap();
    session.add(&Person::new("Mallory")).unwrap();
    let err = session.commit().unwrap_err();
    assert!(matches!(err, Error::Custom(ref m) if m.contains("Mallory")));

    let err = session.commit().unwrap_err();
    assert!(matches!(err, Error::Transaction(_)), "{err}");
    assert!(!session.in_transaction());
    session.close().unwrap();

    assert_eq!(inserts.load(Ordering::SeqCst), 1);
    assert!(query(&factory, "SELECT * FROM \"person\"").is_empty());
    assert!(query(&factory, "SELECT * FROM \"person_aud\"").is_empty());
    assert!(query(&factory, "SELECT * FROM \"revinfo\"").is_empty());
}

use std::io;
use std::sync::{Arc, Mutex};

use hiberlite::domain::Person;
use hiberlite::{build_session_factory, default_configuration, settings};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn run_with_sql_logging(show_sql: &str) -> String {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("hiberlite::sql=info"))
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let dir = tempfile::tempdir().unwrap();
        let mut configuration = default_configuration().unwrap();
        configuration
            .set_property(
                settings::URL,
                format!("sqlite:{}", dir.path().join("logged.db").display()),
            )
            .set_property(settings::SHOW_SQL, show_sql);
        let factory = build_session_factory(configuration).unwrap();

        let mut session = factory.open_session().unwrap();
        session.save(&mut Person::new("Ada")).unwrap();
        session.commit().unwrap();
        session.close().unwrap();
    });

    capture.contents()
}

#[test]
fn shown_statements_are_pretty_printed() {
    let output = run_with_sql_logging("true");

    assert!(output.contains("hiberlite::sql"), "{output}");
    assert!(output.contains("CREATE TABLE \"person\" (\n    \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,"), "{output}");
    assert!(output.contains("INSERT INTO \"person\""), "{output}");
    assert!(output.contains("INSERT INTO \"revinfo\""), "{output}");
    assert!(output.contains("\nVALUES ("), "{output}");
}

#[test]
fn hidden_statements_stay_below_info() {
    let output = run_with_sql_logging("false");
    assert!(!output.contains("CREATE TABLE"), "{output}");
    assert!(!output.contains("INSERT INTO"), "{output}");
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use hiberlite::{FactoryHolder, Result, SessionFactory, build_session_factory, default_configuration, settings};

static INITIALIZATIONS: AtomicUsize = AtomicUsize::new(0);

fn init() -> Result<SessionFactory> {
    INITIALIZATIONS.fetch_add(1, Ordering::SeqCst);
    let mut configuration = default_configuration()?;
    configuration.set_property(settings::URL, "sqlite::memory:");
    build_session_factory(configuration)
}

static HOLDER: FactoryHolder = FactoryHolder::new(init);

#[test]
fn concurrent_first_access_builds_one_factory() {
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let factory: &'static SessionFactory = HOLDER.get().unwrap();
                std::ptr::from_ref(factory) as usize
            })
        })
        .collect();
    let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(INITIALIZATIONS.load(Ordering::SeqCst), 1);
    assert!(addresses.windows(2).all(|pair| pair[0] == pair[1]));

    let again = HOLDER.get().unwrap();
    assert_eq!(std::ptr::from_ref(again) as usize, addresses[0]);
    assert_eq!(INITIALIZATIONS.load(Ordering::SeqCst), 1);
    assert!(HOLDER.is_initialized());
}

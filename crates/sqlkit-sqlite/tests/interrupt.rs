use sqlkit_sqlite::Connection;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const ENDLESS: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                       SELECT max(x) FROM c";

#[test]
fn sqlite_interrupt_from_another_thread_cancels_step() {
    let conn = Connection::open_memory().expect("open sqlite memory db");
    let handle = conn.interrupt_handle();
    let finished = Arc::new(AtomicBool::new(false));

    let interrupter = {
        let finished = Arc::clone(&finished);
        thread::spawn(move || {
            while !finished.load(Ordering::SeqCst) {
                handle.interrupt();
                thread::sleep(Duration::from_millis(5));
            }
        })
    };

    let result = conn.query_scalar(ENDLESS, &[]);
    finished.store(true, Ordering::SeqCst);
    interrupter.join().expect("interrupter thread");

    let err = result.unwrap_err();
    assert!(err.is_cancelled(), "expected cancellation, got {err}");

    // The connection survives the interruption.
    assert_eq!(
        conn.query_scalar("SELECT 1", &[]).unwrap(),
        sqlkit_sqlite::Value::Integer(1)
    );
}

#[test]
fn sqlite_interrupt_handle_is_inert_after_close() {
    let conn = Connection::open_memory().unwrap();
    let handle = conn.interrupt_handle();
    assert!(handle.is_connected());
    conn.close().unwrap();
    assert!(!handle.is_connected());

    thread::spawn(move || handle.interrupt())
        .join()
        .expect("interrupt after close");
}

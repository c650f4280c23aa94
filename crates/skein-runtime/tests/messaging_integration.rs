//! Port messaging integration tests
//!
//! Messages from many threads, error classification, cross-isolate sends,
//! and randomized sends racing host teardown.
//!
//! # Running Tests
//! ```bash
//! cargo test --test messaging_integration
//! ```

use parking_lot::Mutex;
use rand::Rng;
use serde_json::{json, Value};
use skein_engine::{CodeUnit, ErrorKind, EventKind, Isolate, Phase, RunRequest, Snapshot};
use skein_runtime::{
    Host, HostConfig, Library, LibraryCatalog, ScriptError, SendError, SendPort,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

fn count_events(host: &Host, kind: EventKind) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    host.events().on(kind, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    count
}

fn snapshot() -> Snapshot {
    Snapshot::from_data(vec![7u8; 8])
}

/// Launch `library::main`, which must publish a port as `name`
fn launch_server(host: &Host, library: &str, name: &str) -> SendPort {
    host.launch(
        snapshot(),
        &[CodeUnit::from_text("main", &format!("library {library}"))],
        &RunRequest::default(),
    )
    .unwrap();
    assert!(wait_until(|| host.port(name).is_some()));
    host.port(name).unwrap()
}

/// A library whose `main` publishes "inbox" with `handler`
fn inbox_library<F>(handler: F) -> Library
where
    F: Fn(&mut skein_runtime::ScriptContext<'_>, Value) -> Result<(), ScriptError>
        + Send
        + Sync
        + Clone
        + 'static,
{
    Library::new("app").with_function("main", move |ctx, _| {
        let port = ctx.open_port(handler.clone());
        ctx.publish("inbox", &port);
        Ok(())
    })
}

// ===== Ordering =====

#[test]
fn test_per_producer_order_is_preserved() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 250;

    let received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();
    let catalog = LibraryCatalog::new().with_library(inbox_library(move |ctx, message| {
        let mut log = log.lock();
        log.push(message);
        if log.len() as u64 == PRODUCERS * PER_PRODUCER {
            ctx.close_current_port();
        }
        Ok(())
    }));
    let host = Host::new(HostConfig::default(), catalog).unwrap();
    let exited = count_events(&host, EventKind::Exited);
    let inbox = launch_server(&host, "app", "inbox");

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let inbox = inbox.clone();
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    inbox
                        .send(json!({"producer": producer, "seq": seq}))
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert!(wait_until(|| exited.load(Ordering::SeqCst) == 1));
    let received = received.lock();
    assert_eq!(received.len() as u64, PRODUCERS * PER_PRODUCER);
    for producer in 0..PRODUCERS {
        let seqs: Vec<u64> = received
            .iter()
            .filter(|message| message["producer"] == producer)
            .filter_map(|message| message["seq"].as_u64())
            .collect();
        assert_eq!(seqs, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
}

// ===== Ownership =====

#[test]
fn test_dropped_launch_handle_keeps_serving() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();
    let catalog = LibraryCatalog::new().with_library(inbox_library(move |ctx, message| {
        if message == json!("stop") {
            ctx.close_current_port();
        }
        log.lock().push(message);
        Ok(())
    }));
    let host = Host::new(HostConfig::default(), catalog).unwrap();
    let shut_down = count_events(&host, EventKind::ShutDown);

    let isolate = host
        .launch(
            snapshot(),
            &[CodeUnit::from_text("main", "library app")],
            &RunRequest::default(),
        )
        .unwrap();
    drop(isolate);

    assert!(wait_until(|| host.port("inbox").is_some()));
    let inbox = host.port("inbox").unwrap();
    inbox.send(json!("a")).unwrap();
    assert!(wait_until(|| received.lock().len() == 1));
    assert_eq!(host.vm().live_isolates(), 1);
    assert_eq!(shut_down.load(Ordering::SeqCst), 0);

    inbox.send(json!("stop")).unwrap();
    assert!(wait_until(|| shut_down.load(Ordering::SeqCst) == 1));
    assert_eq!(*received.lock(), vec![json!("a"), json!("stop")]);
    assert_eq!(host.vm().live_isolates(), 0);
}

// ===== Shutdown from handlers =====

type Target = Arc<Mutex<Option<Weak<Isolate>>>>;

fn shut_down_target(target: &Target) -> Option<bool> {
    let isolate = target.lock().as_ref().and_then(Weak::upgrade)?;
    Some(isolate.shutdown())
}

#[test]
fn test_port_handler_shuts_down_own_isolate() {
    let target = Target::default();
    let results = Arc::new(Mutex::new(Vec::new()));
    let (slot, log) = (target.clone(), results.clone());
    let catalog = LibraryCatalog::new().with_library(inbox_library(move |_, message| {
        if message == json!("quit") {
            log.lock().push(shut_down_target(&slot));
        }
        Ok(())
    }));
    let host = Host::new(HostConfig::default(), catalog).unwrap();
    let shut_down = count_events(&host, EventKind::ShutDown);
    let exited = count_events(&host, EventKind::Exited);
    let inbox = launch_server(&host, "app", "inbox");
    let isolate = host.vm().isolate(inbox.isolate_id()).unwrap();
    *target.lock() = Some(Arc::downgrade(&isolate));

    inbox.send(json!("quit")).unwrap();

    assert!(wait_until(|| shut_down.load(Ordering::SeqCst) == 1));
    assert_eq!(*results.lock(), vec![Some(true)]);
    assert_eq!(exited.load(Ordering::SeqCst), 0);
    assert_eq!(isolate.phase(), Phase::Shutdown);
    assert!(isolate.is_shutting_down());
    assert_eq!(inbox.send(json!("late")), Err(SendError::Closed));
    assert_eq!(host.runtime().live_isolates(), 0);

    // The runner thread is free for the next isolate
    let next = launch_server(&host, "app", "inbox");
    assert_ne!(next.isolate_id(), inbox.isolate_id());
    assert_eq!(host.vm().live_isolates(), 1);
}

#[test]
fn test_service_handler_shuts_down_own_isolate() {
    let target = Target::default();
    let results = Arc::new(Mutex::new(Vec::new()));
    let (slot, log) = (target.clone(), results.clone());
    let catalog = LibraryCatalog::new()
        .with_library(inbox_library(|_, _| Ok(())))
        .with_service_handler(move |_, request| {
            if request["method"] == "kill" {
                log.lock().push(shut_down_target(&slot));
            }
        });
    let host = Host::new(HostConfig::default(), catalog).unwrap();
    let shut_down = count_events(&host, EventKind::ShutDown);
    let inbox = launch_server(&host, "app", "inbox");
    let isolate = host.vm().isolate(inbox.isolate_id()).unwrap();
    *target.lock() = Some(Arc::downgrade(&isolate));

    host.service_port(isolate.id())
        .unwrap()
        .request(json!({"method": "kill"}))
        .unwrap();

    assert!(wait_until(|| shut_down.load(Ordering::SeqCst) == 1));
    assert_eq!(*results.lock(), vec![Some(true)]);
    assert_eq!(isolate.phase(), Phase::Shutdown);
    assert!(host.port("inbox").is_none());
    assert_eq!(host.shutdown(), 0);
}

// ===== Errors =====

#[test]
fn test_uncaught_exception_keeps_isolate_running() {
    let handled = Arc::new(Mutex::new(Vec::new()));
    let log = handled.clone();
    let catalog = LibraryCatalog::new().with_library(inbox_library(move |ctx, message| {
        match message.as_str() {
            Some("boom") => return Err(ScriptError::exception("boom")),
            Some("stop") => {
                ctx.close_current_port();
            }
            _ => {}
        }
        log.lock().push(message);
        Ok(())
    }));
    let host = Host::new(HostConfig::default(), catalog).unwrap();
    let uncaught = count_events(&host, EventKind::UncaughtException);
    let shut_down = count_events(&host, EventKind::ShutDown);
    let inbox = launch_server(&host, "app", "inbox");
    let isolate = host.vm().isolate(inbox.isolate_id()).unwrap();

    for message in ["a", "boom", "b", "stop"] {
        inbox.send(json!(message)).unwrap();
    }

    assert!(wait_until(|| shut_down.load(Ordering::SeqCst) == 1));
    assert_eq!(*handled.lock(), vec![json!("a"), json!("b"), json!("stop")]);
    assert_eq!(uncaught.load(Ordering::SeqCst), 1);

    let state = isolate.message_handler_state();
    assert!(state.isolate_had_uncaught_error);
    assert!(!state.isolate_had_fatal_error);
    assert!(state.isolate_exited);
    assert_eq!(state.last_error_kind, ErrorKind::UnhandledException);
}

#[test]
fn test_fatal_error_shuts_down() {
    let handled = Arc::new(AtomicUsize::new(0));
    let count = handled.clone();
    let catalog = LibraryCatalog::new().with_library(inbox_library(move |_, message| {
        if message == json!("die") {
            return Err(ScriptError::fatal("heap corrupted"));
        }
        count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    let host = Host::new(HostConfig::default(), catalog).unwrap();
    let fatal = count_events(&host, EventKind::FatalError);
    let exited = count_events(&host, EventKind::Exited);
    let shut_down = count_events(&host, EventKind::ShutDown);
    let inbox = launch_server(&host, "app", "inbox");
    let isolate = host.vm().isolate(inbox.isolate_id()).unwrap();

    inbox.send(json!("ok")).unwrap();
    inbox.send(json!("die")).unwrap();

    assert!(wait_until(|| shut_down.load(Ordering::SeqCst) == 1));
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(fatal.load(Ordering::SeqCst), 1);
    assert_eq!(exited.load(Ordering::SeqCst), 0);
    assert!(isolate.dispatcher().has_fatal_error());
    assert_eq!(isolate.phase(), Phase::Shutdown);
    assert_eq!(inbox.send(json!("late")), Err(SendError::Closed));
    assert!(host.port("inbox").is_none());
}

#[test]
fn test_panicking_handler_is_fatal() {
    let catalog = LibraryCatalog::new().with_library(inbox_library(|_, _| {
        panic!("handler bug");
    }));
    let host = Host::new(HostConfig::default(), catalog).unwrap();
    let fatal = count_events(&host, EventKind::FatalError);
    let shut_down = count_events(&host, EventKind::ShutDown);
    let inbox = launch_server(&host, "app", "inbox");

    inbox.send(json!(null)).unwrap();

    assert!(wait_until(|| shut_down.load(Ordering::SeqCst) == 1));
    assert_eq!(fatal.load(Ordering::SeqCst), 1);

    // The runner thread survives and runs the next isolate
    let next = launch_server(&host, "app", "inbox");
    assert_ne!(next.isolate_id(), inbox.isolate_id());
}

// ===== Cross-isolate messaging =====

#[test]
fn test_isolates_talk_through_published_ports() {
    let replies = Arc::new(Mutex::new(Vec::new()));
    let log = replies.clone();
    let catalog = LibraryCatalog::new()
        .with_library(Library::new("echo").with_function("main", |ctx, _| {
            let port = ctx.open_port(|ctx, message| {
                let reply_to = message["reply_to"].as_str().unwrap_or_default().to_string();
                ctx.send(&reply_to, message["body"].clone())?;
                Ok(())
            });
            ctx.publish("echo", &port);
            Ok(())
        }))
        .with_library(Library::new("client").with_function("main", move |ctx, _| {
            let log = log.clone();
            let port = ctx.open_port(move |ctx, message| {
                log.lock().push(message);
                ctx.close_all_ports();
                Ok(())
            });
            ctx.publish("client", &port);
            ctx.send("echo", json!({"reply_to": "client", "body": "hi"}))?;
            Ok(())
        }));
    let host = Host::new(HostConfig::default(), catalog).unwrap();
    let shut_down = count_events(&host, EventKind::ShutDown);

    launch_server(&host, "echo", "echo");
    launch_server(&host, "client", "client");

    assert!(wait_until(|| shut_down.load(Ordering::SeqCst) == 1));
    assert_eq!(*replies.lock(), vec![json!("hi")]);
    assert!(host.port("client").is_none());
    assert!(host.port("echo").is_some());
    assert_eq!(host.vm().live_isolates(), 1);
}

#[test]
fn test_send_to_unknown_name_is_an_exception() {
    let catalog = LibraryCatalog::new().with_library(Library::new("app").with_function(
        "main",
        |ctx, _| {
            let port = ctx.open_port(|_, _| Ok(()));
            ctx.publish("inbox", &port);
            ctx.send("nobody", json!(1))?;
            Ok(())
        },
    ));
    let host = Host::new(HostConfig::default(), catalog).unwrap();
    let uncaught = count_events(&host, EventKind::UncaughtException);

    launch_server(&host, "app", "inbox");
    assert!(wait_until(|| uncaught.load(Ordering::SeqCst) == 1));
    assert_eq!(host.vm().live_isolates(), 1);
}

// ===== Teardown races =====

#[test]
fn test_sends_racing_teardown() {
    let mut rng = rand::thread_rng();

    for _ in 0..20 {
        let catalog = LibraryCatalog::new().with_library(inbox_library(|_, _| Ok(())));
        let host = Host::new(HostConfig::default(), catalog).unwrap();
        let inbox = launch_server(&host, "app", "inbox");

        let senders: Vec<_> = (0..rng.gen_range(1..4))
            .map(|_| {
                let inbox = inbox.clone();
                let count = rng.gen_range(10..200);
                thread::spawn(move || {
                    for i in 0..count {
                        match inbox.send(json!(i)) {
                            Ok(()) => {}
                            Err(SendError::Closed) => break,
                            Err(other) => panic!("unexpected send error: {other}"),
                        }
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_micros(rng.gen_range(0..500)));
        host.shutdown();

        for sender in senders {
            sender.join().unwrap();
        }
        assert_eq!(host.vm().live_isolates(), 0);
        assert_eq!(host.runtime().live_isolates(), 0);
        assert_eq!(inbox.send(json!("after")), Err(SendError::Closed));
    }
}

use jsworker::{
    discard_send_sync, registry, CallbackSet, ScriptOrigin, Worker, WorkerConfig, WorkerError,
    NON_STRING_REPLY,
};
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn collector() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |msg: &str| sink.lock().unwrap().push(msg.to_string()))
}

#[test]
fn basic_load_send_and_receive() {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let worker = Worker::new(
        move |msg| {
            assert_eq!(msg, "hello");
            counter.fetch_add(1, Ordering::SeqCst);
        },
        discard_send_sync,
    )
    .unwrap();

    worker.load("code.js", r#" $print("ready"); "#).unwrap();

    let err = worker
        .load("codeWithSyntaxError.js", r#" $print(hello world"); "#)
        .unwrap_err();
    assert!(matches!(err, WorkerError::Compile(_)));
    assert!(err.to_string().starts_with("codeWithSyntaxError.js:1\n"));

    worker
        .load(
            "codeWithRecv.js",
            r#"
            $recv(function(msg) {
                $print("recv msg", msg);
            });
            $print("ready");
            "#,
        )
        .unwrap();
    worker.send("hi").unwrap();

    worker
        .load("codeWithSend.js", r#" $send("hello"); $send("hello"); "#)
        .unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn typed_arrays_are_available() {
    let worker = Worker::with_config(WorkerConfig::new().with_print(false), CallbackSet::default())
        .unwrap();
    worker
        .load("buffer.js", "var uint8 = new Uint8Array(256); print(uint8);")
        .unwrap();
}

#[test]
fn workers_do_not_share_callbacks() {
    let (first, on_first) = collector();
    let (second, on_second) = collector();
    let w1 = Worker::new(on_first, discard_send_sync).unwrap();
    let w2 = Worker::new(on_second, discard_send_sync).unwrap();
    assert_ne!(w1.handle_id(), w2.handle_id());

    w1.load("1.js", r#"$send("hello1")"#).unwrap();
    w2.load("2.js", r#"$send("hello2")"#).unwrap();

    assert_eq!(*first.lock().unwrap(), vec!["hello1".to_string()]);
    assert_eq!(*second.lock().unwrap(), vec!["hello2".to_string()]);
}

#[test]
fn workers_do_not_share_globals() {
    let w1 = Worker::new(|_| {}, discard_send_sync).unwrap();
    let w2 = Worker::new(|_| {}, discard_send_sync).unwrap();

    w1.load("a.js", "var shared = 'one';").unwrap();
    let code = "recvSync(function () { return typeof shared; });";
    w2.load("b.js", code).unwrap();
    assert_eq!(w2.send_sync("").unwrap(), "undefined");
}

#[test]
fn request_from_script() {
    let (seen, on_message) = collector();
    let worker = Worker::new(on_message, |msg| format!("{msg} exchanged")).unwrap();

    worker
        .load(
            "code.js",
            r#"
            var response = $sendSync("ping");
            $send(response);
            "#,
        )
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["ping exchanged".to_string()]);
}

#[test]
fn request_from_host() {
    let (seen, on_message) = collector();
    let worker = Worker::new(on_message, discard_send_sync).unwrap();

    worker
        .load(
            "code.js",
            r#"
            $recvSync(function(msg) {
                $send("in recvSync:" + msg);
                return msg + " exchanged";
            });
            "#,
        )
        .unwrap();

    assert_eq!(worker.send_sync("pong").unwrap(), "pong exchanged");
    assert_eq!(*seen.lock().unwrap(), vec!["in recvSync:pong".to_string()]);
}

#[test]
fn request_from_host_returning_non_string() {
    let worker = Worker::new(|_| {}, discard_send_sync).unwrap();
    worker
        .load("code.js", "$recvSync(function(msg) { return 42; });")
        .unwrap();
    assert_eq!(worker.send_sync("pang").unwrap(), NON_STRING_REPLY);
    assert_eq!(NON_STRING_REPLY, "err: non-string return value");
}

#[test]
fn latest_handler_wins() {
    let (seen, on_message) = collector();
    let worker = Worker::new(on_message, discard_send_sync).unwrap();

    worker
        .load("first.js", "recv(function (m) { send('first ' + m); });")
        .unwrap();
    worker
        .load("second.js", "recv(function (m) { send('second ' + m); });")
        .unwrap();
    worker.send("x").unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["second x".to_string()]);
}

#[test]
fn throwing_handlers_surface_as_handler_errors() {
    let worker = Worker::new(|_| {}, discard_send_sync).unwrap();
    worker
        .load(
            "handlers.js",
            r#"
            recv(function (m) { throw new Error("recv failed: " + m); });
            recvSync(function (m) { throw new TypeError("recvSync failed: " + m); });
            "#,
        )
        .unwrap();

    let err = worker.send("a").unwrap_err();
    assert!(matches!(err, WorkerError::Handler(_)));
    assert!(err.to_string().contains("recv failed: a"));
    assert_eq!(worker.last_exception(), Some(err.to_string()));

    let err = worker.send_sync("b").unwrap_err();
    assert!(err.to_string().contains("TypeError: recvSync failed: b"));

    // The worker stays usable.
    worker.load("after.js", "var ok = true;").unwrap();
}

#[test]
fn exception_text_has_location_and_underline() {
    let worker = Worker::new(|_| {}, discard_send_sync).unwrap();
    let err = worker
        .load("ref.js", "var a = 1;\nvar b = missing + a;")
        .unwrap_err();

    let text = err.to_string();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("ref.js:2"));
    assert_eq!(lines.next(), Some("var b = missing + a;"));
    assert_eq!(lines.next(), Some("        ^^^^^^^"));
    assert!(text.contains("ReferenceError: missing is not defined"));
}

#[test]
fn origin_offsets_shift_reported_lines() {
    let worker = Worker::new(|_| {}, discard_send_sync).unwrap();
    let origin = ScriptOrigin::new("embedded.html").with_line_offset(10);
    let err = worker
        .load_with_origin(&origin, "throw new Error('inline');")
        .unwrap_err();
    assert!(err.to_string().starts_with("embedded.html:11\n"));
}

#[test]
fn anonymous_origin_gets_generated_name() {
    let worker = Worker::new(|_| {}, discard_send_sync).unwrap();
    let err = worker
        .load_with_origin(&ScriptOrigin::default(), "throw 1;")
        .unwrap_err();
    assert!(err.to_string().starts_with("VM"), "{err}");
}

#[test]
fn primitives_reject_wrong_argument_types() {
    let (seen, on_message) = collector();
    let worker = Worker::new(on_message, discard_send_sync).unwrap();

    worker
        .load(
            "types.js",
            r#"
            function kind(f) {
                try { f(); return "none"; } catch (e) { return e.constructor.name; }
            }
            send([
                kind(function () { send(42); }),
                kind(function () { sendSync({}); }),
                kind(function () { recv("nope"); }),
                kind(function () { recvSync(); }),
            ].join(","));
            "#,
        )
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["TypeError,TypeError,TypeError,TypeError".to_string()]
    );
}

#[test]
fn dollar_aliases_match_plain_names() {
    let (seen, on_message) = collector();
    let worker = Worker::new(on_message, |msg| msg.to_uppercase()).unwrap();
    worker
        .load(
            "aliases.js",
            r#"
            send(String($send === send && $sendSync === sendSync && $recv === recv
                && $recvSync === recvSync && $print === print));
            $send($sendSync("abc"));
            "#,
        )
        .unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["true".to_string(), "ABC".to_string()]
    );
}

#[test]
fn print_can_be_redirected() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let callbacks =
        CallbackSet::default().with_print(move |line| sink.lock().unwrap().push(line.to_string()));
    let worker = Worker::with_callbacks(callbacks).unwrap();

    worker.load("print.js", "print('a', 1, true); $print();").unwrap();
    assert_eq!(
        *lines.lock().unwrap(),
        vec!["a 1 true".to_string(), String::new()]
    );
}

#[test]
fn disabled_print_is_silent() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let callbacks =
        CallbackSet::default().with_print(move |line| sink.lock().unwrap().push(line.to_string()));
    let worker =
        Worker::with_config(WorkerConfig::new().with_print(false), callbacks).unwrap();

    worker.load("print.js", "print('hidden');").unwrap();
    assert!(lines.lock().unwrap().is_empty());
}

#[test]
fn panicking_callback_becomes_script_error() {
    let worker = Worker::new(|_| panic!("host exploded"), discard_send_sync).unwrap();
    let err = worker
        .load("panic.js", "send('boom');")
        .unwrap_err();
    assert!(matches!(err, WorkerError::Runtime(_)));
    assert!(err.to_string().contains("host callback panicked: host exploded"));

    worker
        .load(
            "caught.js",
            "try { send('again'); } catch (e) { var caught = e.message; }",
        )
        .unwrap();
}

#[test]
fn worker_deletion_loop() {
    let count = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        let counter = count.clone();
        let worker = Worker::new(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            discard_send_sync,
        )
        .unwrap();
        worker.load("1.js", r#"$send("hello1")"#).unwrap();
        // Dropped without dispose: finalization releases it.
    }
    assert_eq!(count.load(Ordering::SeqCst), 100);
}

#[test]
fn tight_create_dispose_loop() {
    for _ in 0..300 {
        let worker = Worker::with_callbacks(CallbackSet::default()).unwrap();
        let id = worker.handle_id();
        worker
            .load(
                "mytest.js",
                r#"
                // Do something
                var something = "Simple JavaScript";
                "#,
            )
            .unwrap();
        worker.dispose();
        assert!(!registry().contains(id));
    }
}

#[test]
fn terminate_from_another_thread() {
    let worker = Worker::new(|_| {}, discard_send_sync).unwrap();
    let handle = worker.terminate_handle();

    let killer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        handle.terminate_execution()
    });

    let started = Instant::now();
    let err = worker.load("forever.js", " while (true) { ; } ").unwrap_err();
    assert_eq!(err, WorkerError::Terminated);
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(killer.join().unwrap());

    assert!(worker.is_terminated());
    assert_eq!(worker.send("x").unwrap_err(), WorkerError::Terminated);
}

#[test]
fn terminate_blocked_send() {
    let worker = Worker::new(|_| {}, discard_send_sync).unwrap();
    worker
        .load("spin.js", "recv(function () { while (true) {} });")
        .unwrap();
    let handle = worker.terminate_handle();

    let killer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        handle.terminate_execution()
    });

    assert_eq!(worker.send("go").unwrap_err(), WorkerError::Terminated);
    assert!(killer.join().unwrap());
    assert!(worker.is_terminated());
    assert_eq!(worker.stats().failed_deliveries, 1);
}

#[test]
fn terminate_blocked_send_sync() {
    let worker = Worker::new(|_| {}, discard_send_sync).unwrap();
    worker
        .load("spin.js", "recvSync(function () { for (;;) {} });")
        .unwrap();
    let handle = worker.terminate_handle();

    let killer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        handle.terminate_execution()
    });

    assert_eq!(worker.send_sync("go").unwrap_err(), WorkerError::Terminated);
    assert!(killer.join().unwrap());
    assert!(worker.is_terminated());
    assert_eq!(worker.send_sync("again").unwrap_err(), WorkerError::Terminated);
}

#[test]
fn execution_timeout_interrupts_runaway_handler() {
    let config = WorkerConfig::new().with_execution_timeout(Duration::from_millis(100));
    let worker = Worker::with_config(config, CallbackSet::default()).unwrap();
    worker
        .load("spin.js", "recv(function () { while (true) {} });")
        .unwrap();

    let err = worker.send("go").unwrap_err();
    assert_eq!(err, WorkerError::Timeout(Duration::from_millis(100)));
    assert!(worker.is_terminated());
}

#[test]
fn terminating_one_worker_leaves_others_usable() {
    let victim = Worker::new(|_| {}, discard_send_sync).unwrap();
    let bystander = Worker::new(|_| {}, |m| m.to_string()).unwrap();
    bystander
        .load("echo.js", "recvSync(function (m) { return sendSync(m); });")
        .unwrap();

    victim.terminate_execution();
    assert!(victim.load("spin.js", "for (;;) {}").is_err());

    assert_eq!(bystander.send_sync("still here").unwrap(), "still here");
}

#[test]
fn terminate_handle_after_dispose_reports_false() {
    let worker = Worker::new(|_| {}, discard_send_sync).unwrap();
    let handle = worker.terminate_handle();
    worker.dispose();
    assert!(!handle.terminate_execution());
}

#[test]
fn execution_timeout_interrupts_runaway_script() {
    let config = WorkerConfig::new().with_execution_timeout(Duration::from_millis(100));
    let worker = Worker::with_config(config, CallbackSet::default()).unwrap();

    let err = worker.load("spin.js", "while (true) {}").unwrap_err();
    assert_eq!(err, WorkerError::Timeout(Duration::from_millis(100)));
    assert!(err.is_termination());
    assert!(worker.is_terminated());
}

#[test]
fn execution_timeout_leaves_fast_calls_alone() {
    let config = WorkerConfig::new().with_execution_timeout(Duration::from_secs(5));
    let worker = Worker::with_config(config, CallbackSet::default()).unwrap();

    for i in 0..20 {
        worker.load("quick.js", &format!("var x{i} = {i};")).unwrap();
    }
    assert!(!worker.is_terminated());
}

thread_local! {
    static REENTRANT: RefCell<Option<Worker>> = const { RefCell::new(None) };
}

#[test]
fn host_callback_can_reenter_the_same_worker() {
    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = replies.clone();

    let worker = Worker::new(
        |msg| {
            if msg == "reenter" {
                REENTRANT.with(|slot| {
                    let slot = slot.borrow();
                    let worker = slot.as_ref().unwrap();
                    worker.load("nested.js", "var nested = 'yes';").unwrap();
                    worker.send("from host").unwrap();
                });
            }
        },
        move |msg| {
            let reply = REENTRANT.with(|slot| {
                let slot = slot.borrow();
                slot.as_ref().unwrap().send_sync(&format!("inner {msg}")).unwrap()
            });
            sink.lock().unwrap().push(reply.clone());
            reply
        },
    )
    .unwrap();

    worker
        .load(
            "outer.js",
            r#"
            var log = [];
            recv(function (m) { log.push(m); });
            recvSync(function (m) {
                if (m.indexOf("inner") === 0) { return m + " handled"; }
                return sendSync(m);
            });
            "#,
        )
        .unwrap();

    REENTRANT.with(|slot| *slot.borrow_mut() = Some(worker));

    REENTRANT.with(|slot| {
        let slot = slot.borrow();
        let worker = slot.as_ref().unwrap();
        worker.load("trigger.js", "send('reenter');").unwrap();
        worker
            .load(
                "check.js",
                "recvSync(function () { return nested + ':' + log.join(','); });",
            )
            .unwrap();
        assert_eq!(worker.send_sync("").unwrap(), "yes:from host");
    });

    REENTRANT.with(|slot| {
        let slot = slot.borrow();
        let worker = slot.as_ref().unwrap();
        worker
            .load(
                "sync.js",
                r#"
                recvSync(function (m) {
                    if (m.indexOf("inner") === 0) { return m + " handled"; }
                    return sendSync(m);
                });
                "#,
            )
            .unwrap();
        assert_eq!(worker.send_sync("q").unwrap(), "inner q handled");
    });
    assert_eq!(*replies.lock().unwrap(), vec!["inner q handled".to_string()]);

    REENTRANT.with(|slot| slot.borrow_mut().take());
}

#[test]
fn host_callback_can_drive_another_worker() {
    let (seen, on_message) = collector();
    let inner = Worker::new(on_message, discard_send_sync).unwrap();
    inner
        .load("inner.js", "recv(function (m) { send('inner saw ' + m); });")
        .unwrap();

    thread_local! {
        static INNER: RefCell<Option<Worker>> = const { RefCell::new(None) };
    }
    INNER.with(|slot| *slot.borrow_mut() = Some(inner));

    let outer = Worker::new(
        |msg| {
            INNER.with(|slot| slot.borrow().as_ref().unwrap().send(msg).unwrap());
        },
        discard_send_sync,
    )
    .unwrap();
    outer.load("outer.js", "send('relay');").unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["inner saw relay".to_string()]);

    outer.dispose();
    INNER.with(|slot| slot.borrow_mut().take());
}

thread_local! {
    static PING: RefCell<Option<Worker>> = const { RefCell::new(None) };
    static PONG: RefCell<Option<Worker>> = const { RefCell::new(None) };
}

#[test]
fn nested_calls_bounce_between_two_workers() {
    let ping = Worker::new(
        |msg| {
            PONG.with(|slot| slot.borrow().as_ref().unwrap().send(msg).unwrap());
        },
        discard_send_sync,
    )
    .unwrap();
    ping.load(
        "ping.js",
        r#"
        var log = [];
        recv(function (m) { log.push(m); });
        recvSync(function () { return log.join(","); });
        "#,
    )
    .unwrap();

    let pong = Worker::new(
        |msg| {
            PING.with(|slot| {
                let slot = slot.borrow();
                let ping = slot.as_ref().unwrap();
                ping.send(&format!("{msg} back")).unwrap();
                assert_eq!(ping.send_sync("").unwrap(), format!("{msg} back"));
            });
        },
        discard_send_sync,
    )
    .unwrap();
    pong.load("pong.js", "recv(function (m) { send('pong saw ' + m); });")
        .unwrap();

    PING.with(|slot| *slot.borrow_mut() = Some(ping));
    PONG.with(|slot| *slot.borrow_mut() = Some(pong));

    PING.with(|slot| {
        let slot = slot.borrow();
        let ping = slot.as_ref().unwrap();
        ping.load("go.js", "send('hello');").unwrap();
        assert_eq!(ping.send_sync("").unwrap(), "pong saw hello back");
        assert!(ping.last_exception().is_none());
    });

    PONG.with(|slot| slot.borrow_mut().take());
    PING.with(|slot| slot.borrow_mut().take());
}

#[test]
fn stats_count_calls() {
    let worker = Worker::new(|_| {}, discard_send_sync).unwrap();
    worker.load("ok.js", "recv(function () {});").unwrap();
    let _ = worker.load("bad.js", "(");
    worker.send("a").unwrap();
    worker.send_sync("b").unwrap();

    let stats = worker.stats();
    assert_eq!(stats.loads, 2);
    assert_eq!(stats.failed_loads, 1);
    assert_eq!(stats.sends, 1);
    assert_eq!(stats.sync_sends, 1);
    assert_eq!(stats.failed_deliveries, 0);
}

#[test]
fn engine_version_is_reported() {
    assert!(!jsworker::engine_version().is_empty());
}

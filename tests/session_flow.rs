//! Two applications talking through an in-process bus and a scripted daemon

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use appmgr::bus::{BusMessage, HandlerResult, MemoryBus, Value};
use appmgr::registry::{MemoryRegistry, Registry};
use appmgr::{DEFAULT_ALREADY_RUNNING_CODE, Error, LaunchOutcome, SessionBuilder};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn launch_forward_and_lifecycle_signals() {
    init_tracing();

    let bus = MemoryBus::new();
    bus.serve("am.dbus.interface", |_| {
        Ok(vec![Value::Int32(1), Value::Int32(DEFAULT_ALREADY_RUNNING_CODE)])
    });
    let registry = Arc::new(
        MemoryRegistry::new()
            .with("/appmgr/calendar/info/AppID", 12)
            .with("/appmgr/launcher/info/AppID", 1),
    );

    let calendar = SessionBuilder::new("calendar")
        .process_id(100)
        .registry(registry.clone())
        .register(&bus)
        .await
        .unwrap();
    let launcher = SessionBuilder::new("launcher")
        .process_id(200)
        .registry(registry.clone())
        .register(&bus)
        .await
        .unwrap();

    let forwarded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&forwarded);
    calendar.on_exec(move |args| sink.lock().unwrap().extend_from_slice(args));

    let focused = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&focused);
    calendar.on_focus_gained(move || flag.store(true, Ordering::SeqCst));

    let launcher_focused = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&launcher_focused);
    launcher.on_focus_gained(move || flag.store(true, Ordering::SeqCst));

    let exited = Arc::new(AtomicU32::new(0));
    let pid_sink = Arc::clone(&exited);
    launcher.on_death(move |pid| pid_sink.store(pid, Ordering::SeqCst));

    // the daemon reports calendar as running, so the arguments travel as exec
    let outcome = launcher.launch("calendar", &["2024-01-01"]).await.unwrap();
    assert_eq!(outcome, LaunchOutcome::Forwarded);
    assert_eq!(calendar.process_next().await, Some(HandlerResult::Handled));
    assert_eq!(*forwarded.lock().unwrap(), vec!["2024-01-01".to_string()]);

    bus.emit(
        BusMessage::signal("/org/clp/appmanager", "org.clp.appmanager", "AppExit")
            .unwrap()
            .arg(100u32),
    );
    assert_eq!(launcher.process_next().await, Some(HandlerResult::Handled));
    assert_eq!(exited.load(Ordering::SeqCst), 100);
    // calendar has no death handler but still consumes the signal
    assert_eq!(calendar.process_next().await, Some(HandlerResult::Handled));

    bus.emit(
        BusMessage::signal("/org/clp/matchboxwm", "org.clp.matchboxwm", "UserInteractionGained")
            .unwrap()
            .arg(100i32),
    );
    calendar.process_next().await;
    launcher.process_next().await;
    assert!(focused.load(Ordering::SeqCst));
    assert!(!launcher_focused.load(Ordering::SeqCst));

    // once shutdown is requested no launch reaches the daemon
    launcher.request_shutdown().unwrap();
    assert_eq!(registry.get_bool("/appmgr/Shutdown").unwrap(), Some(true));
    bus.clear_journal();
    assert!(matches!(
        launcher.launch::<&str>("calendar", &[]).await,
        Err(Error::SystemShuttingDown)
    ));
    assert!(bus.journal().is_empty());
}

#[tokio::test]
async fn message_between_instances() {
    init_tracing();

    let bus = MemoryBus::new();
    let registry = Arc::new(
        MemoryRegistry::new()
            .with("/appmgr/notes/info/AppID", 7)
            .with("/appmgr/notes/LastInstId", 3)
            .with("/LiMo/System/AppInfo/7/AppMultiInstance", true),
    );

    let notes = SessionBuilder::new("notes.bin")
        .registry(registry.clone())
        .register(&bus)
        .await
        .unwrap();
    assert_eq!(notes.instance_name(), "notes:3");

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    notes.on_message(move |args| sink.lock().unwrap().push(args.to_vec()));

    let sender = SessionBuilder::new("home").register(&bus).await.unwrap();
    sender.send_message::<&str>("notes:3", &[]).unwrap();
    sender.send_message("notes:3", &["open", "todo.txt"]).unwrap();
    // addressed to a different instance, never delivered
    sender.send_message("notes:4", &["lost"]).unwrap();

    notes.process_next().await;
    notes.process_next().await;

    assert_eq!(
        *received.lock().unwrap(),
        vec![Vec::<String>::new(), vec!["open".to_string(), "todo.txt".to_string()]]
    );
}

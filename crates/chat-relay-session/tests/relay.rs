use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chat_relay_core::{
    AccountCredentials, AdapterConfig, AdapterEvent, BoxError, Envelope, EventKind, NetworkResponse,
    SessionState,
    scripted::{Body, LoginScript, Row, SCRIPTED_APP_URL, ScriptedPage},
};
use chat_relay_session::{ChatAdapter, TriggerOutcome};

type Log = Arc<Mutex<Vec<AdapterEvent>>>;

async fn relaying(page: &ScriptedPage) -> (ChatAdapter<ScriptedPage>, Log) {
    let adapter = ChatAdapter::new(page.clone(), AdapterConfig::default()).unwrap();
    let log: Log = Arc::default();
    for kind in [
        EventKind::Message,
        EventKind::Text,
        EventKind::Image,
        EventKind::Error,
        EventKind::Close,
    ] {
        let log = Arc::clone(&log);
        adapter.events().subscribe(kind, move |envelope: Envelope| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(envelope.event);
                Ok(())
            }
        });
    }

    let state = adapter
        .start(AccountCredentials::new("user@example.com", "secret"))
        .await
        .unwrap();
    assert_eq!(state, SessionState::Authenticated);
    (adapter, log)
}

fn page() -> ScriptedPage {
    ScriptedPage::new(LoginScript::Success)
        .with_chat("a")
        .with_chat("b")
        .with_chat("c")
        .with_open_chat("a")
}

fn kinds(log: &Log) -> Vec<EventKind> {
    log.lock().unwrap().iter().map(AdapterEvent::kind).collect()
}

fn relayed_texts(log: &Log) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            AdapterEvent::Text { message } => Some(message.text.clone()),
            _ => None,
        })
        .collect()
}

async fn run(outcome: TriggerOutcome) {
    match outcome {
        TriggerOutcome::Started(pass) => pass.await.unwrap(),
        TriggerOutcome::Dropped => panic!("expected a pass to start"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_trigger_is_dropped_while_in_flight() {
    let page = page();
    page.push("b", Row::text("1", "Ben", "09:00", "hello"));
    let (adapter, log) = relaying(&page).await;
    let orchestrator = adapter.orchestrator().unwrap();

    let first = orchestrator.trigger();
    let second = orchestrator.trigger();

    assert!(first.is_started());
    assert!(matches!(second, TriggerOutcome::Dropped));
    assert!(orchestrator.is_in_flight());

    run(first).await;

    assert!(!orchestrator.is_in_flight());
    assert_eq!(page.notification_scans(), 1);
    assert_eq!(relayed_texts(&log), ["hello"]);

    run(orchestrator.trigger()).await;
    assert_eq!(page.notification_scans(), 2);
    assert_eq!(relayed_texts(&log), ["hello"]);
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_activity_runs_one_pass() {
    let page = page();
    let (_adapter, log) = relaying(&page).await;

    page.push("b", Row::text("1", "Ben", "09:00", "first"));
    page.emit_activity();
    page.emit_activity();
    page.emit_activity();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(page.notification_scans(), 1);
    assert_eq!(relayed_texts(&log), ["first"]);

    page.push("c", Row::text("2", "Cat", "09:01", "second"));
    page.emit_activity();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(page.notification_scans(), 2);
    assert_eq!(relayed_texts(&log), ["first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_or_failed_responses_are_not_signals() {
    let page = page();
    let (_adapter, _log) = relaying(&page).await;

    page.emit_response(NetworkResponse::new("https://cdn.example.com/sticker.png", 200));
    page.emit_response(NetworkResponse::new(SCRIPTED_APP_URL, 500));
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(page.notification_scans(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_messages_fan_out_by_kind() {
    let page = page();
    page.push("b", Row::text("1", "Ben", "10:00", "look"));
    page.push("b", Row::image("2", "Ben", "10:01"));
    page.push("b", Row::sticker("3", "Ben", "10:02"));
    let (adapter, log) = relaying(&page).await;

    run(adapter.orchestrator().unwrap().trigger()).await;

    assert_eq!(
        kinds(&log),
        [
            EventKind::Message,
            EventKind::Text,
            EventKind::Message,
            EventKind::Image,
            EventKind::Message,
        ]
    );
    let events = log.lock().unwrap();
    let AdapterEvent::Image { message } = &events[3] else {
        panic!("expected image event");
    };
    assert_eq!(message.sender, "Ben");
    assert_eq!(message.time, "10:01");
}

#[tokio::test(start_paused = true)]
async fn test_failed_pass_reports_error_and_releases_gate() {
    let page = page();
    page.push(
        "b",
        Row::Message {
            id: Some("9".to_string()),
            sender: None,
            time: Some("11:00".to_string()),
            body: Body::Text("who said this".to_string()),
        },
    );
    let (adapter, log) = relaying(&page).await;
    let orchestrator = adapter.orchestrator().unwrap();

    run(orchestrator.trigger()).await;

    assert_eq!(kinds(&log), [EventKind::Error]);
    assert!(!orchestrator.is_in_flight());
    assert_eq!(adapter.state(), SessionState::Authenticated);
    assert!(orchestrator.trigger().is_started());
}

#[tokio::test(start_paused = true)]
async fn test_failing_handler_does_not_roll_back_cursor() {
    let page = page();
    let (adapter, log) = relaying(&page).await;
    let failed_once = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&failed_once);
    adapter
        .events()
        .subscribe(EventKind::Message, move |_envelope: Envelope| {
            let flag = Arc::clone(&flag);
            async move {
                if flag.swap(true, Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err::<(), BoxError>("downstream unavailable".into())
                }
            }
        });
    let orchestrator = adapter.orchestrator().unwrap();

    page.push("b", Row::text("1", "Ben", "12:00", "lost"));
    run(orchestrator.trigger()).await;
    assert_eq!(kinds(&log), [EventKind::Message, EventKind::Error]);

    page.push("b", Row::text("2", "Ben", "12:01", "kept"));
    run(orchestrator.trigger()).await;

    assert_eq!(relayed_texts(&log), ["kept"]);
    assert_eq!(adapter.state(), SessionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_pass_in_flight() {
    let page = page();
    page.push("b", Row::text("1", "Ben", "13:00", "just in time"));
    let (adapter, log) = relaying(&page).await;
    let orchestrator = adapter.orchestrator().unwrap();

    let pass = orchestrator.trigger();
    assert!(pass.is_started());
    adapter.shutdown().await.unwrap();

    assert_eq!(
        kinds(&log),
        [EventKind::Message, EventKind::Text, EventKind::Close]
    );
    assert_eq!(relayed_texts(&log), ["just in time"]);
    assert!(page.is_released());
    assert!(orchestrator.is_stopped());
    assert!(!orchestrator.is_in_flight());
    assert!(matches!(orchestrator.trigger(), TriggerOutcome::Dropped));
    run(pass).await;
}

#[tokio::test(start_paused = true)]
async fn test_dropping_adapter_cancels_pass_in_flight() {
    let page = page();
    page.push("b", Row::text("1", "Ben", "14:00", "never relayed"));
    let (adapter, log) = relaying(&page).await;
    let orchestrator = adapter.orchestrator().unwrap();

    let TriggerOutcome::Started(pass) = orchestrator.trigger() else {
        panic!("expected a pass to start");
    };
    drop(adapter);

    assert!(pass.await.unwrap_err().is_cancelled());
    assert!(orchestrator.is_stopped());
    assert!(!orchestrator.is_in_flight());
    assert_eq!(page.notification_scans(), 0);
    assert!(log.lock().unwrap().is_empty());
}

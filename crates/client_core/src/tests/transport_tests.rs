use super::*;
use serde_json::json;

fn counting_handler(counter: &Arc<AtomicU64>) -> EventHandler {
    let counter = Arc::clone(counter);
    Arc::new(move |_payload: &Value| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn dispatch_reaches_only_handlers_of_that_kind() {
    let bus = EventBus::new();
    let reads = Arc::new(AtomicU64::new(0));
    let messages = Arc::new(AtomicU64::new(0));
    bus.on(RoomEventKind::MessageRead, counting_handler(&reads));
    bus.on(RoomEventKind::NewMessage, counting_handler(&messages));

    assert_eq!(bus.dispatch(RoomEventKind::MessageRead, &json!({})), 1);
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    assert_eq!(messages.load(Ordering::SeqCst), 0);
}

#[test]
fn off_removes_exactly_one_registration() {
    let bus = EventBus::new();
    let counter = Arc::new(AtomicU64::new(0));
    let first = bus.on(RoomEventKind::NewMessage, counting_handler(&counter));
    bus.on(RoomEventKind::NewMessage, counting_handler(&counter));

    assert!(bus.off(RoomEventKind::NewMessage, first));
    assert!(!bus.off(RoomEventKind::NewMessage, first));
    assert!(!bus.off(RoomEventKind::MessageRead, first));
    assert_eq!(bus.handler_count(RoomEventKind::NewMessage), 1);

    bus.dispatch(RoomEventKind::NewMessage, &Value::Null);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn handler_may_unregister_itself_during_dispatch() {
    let bus = Arc::new(EventBus::new());
    let slot: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));
    let handler: EventHandler = {
        let bus = Arc::clone(&bus);
        let slot = Arc::clone(&slot);
        Arc::new(move |_payload: &Value| {
            if let Some(id) = slot.lock().expect("slot").take() {
                bus.off(RoomEventKind::NewMessage, id);
            }
        })
    };
    let id = bus.on(RoomEventKind::NewMessage, handler);
    *slot.lock().expect("slot") = Some(id);

    assert_eq!(bus.dispatch(RoomEventKind::NewMessage, &Value::Null), 1);
    assert_eq!(bus.handler_count(RoomEventKind::NewMessage), 0);
}

#[test]
fn unknown_frames_are_ignored() {
    let bus = EventBus::new();
    let counter = Arc::new(AtomicU64::new(0));
    bus.on(RoomEventKind::NewMessage, counting_handler(&counter));

    let frame = RawFrame {
        event: "typing".to_string(),
        payload: json!({ "userId": "u1" }),
    };
    assert_eq!(bus.dispatch_frame(&frame), 0);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[test]
fn local_transport_refuses_to_emit_while_disconnected() {
    let transport = LocalTransport::new();
    assert!(matches!(
        transport.emit(OutboundEvent::ConnectToRoom),
        Err(TransportError::Unavailable)
    ));

    transport.set_connection(ConnectionState::Connected);
    transport.emit(OutboundEvent::ConnectToRoom).expect("emit");
    assert_eq!(transport.sent(), vec![OutboundEvent::ConnectToRoom]);
}

use super::*;
use crate::domain::UserId;
use serde_json::json;

#[test]
fn event_kind_names_round_trip_through_from_str() {
    for kind in RoomEventKind::ALL {
        assert_eq!(kind.as_str().parse::<RoomEventKind>(), Ok(kind));
    }
    assert_eq!(
        "typing".parse::<RoomEventKind>(),
        Err(UnknownEventKind("typing".to_string()))
    );
}

#[test]
fn message_status_defaults_to_empty_when_absent_or_null() {
    let absent: Message = serde_json::from_value(json!({
        "id": "m1",
        "roomId": "r1",
        "senderId": "u1",
        "content": "hi",
        "createdAt": "2024-05-01T10:00:00Z"
    }))
    .expect("absent status");
    assert!(absent.status.is_empty());

    let null: Message = serde_json::from_value(json!({
        "id": "m1",
        "roomId": "r1",
        "senderId": "u1",
        "content": "hi",
        "createdAt": "2024-05-01T10:00:00Z",
        "status": null
    }))
    .expect("null status");
    assert!(null.status.is_empty());
}

#[test]
fn message_status_reads_camel_case_wire_fields() {
    let status: MessageStatus = serde_json::from_value(json!({
        "id": "s1",
        "messageId": "m1",
        "userId": "u2",
        "deliveredAt": "2024-05-01T10:00:00Z",
        "readAt": null,
        "user": { "id": "u2", "username": "bob" }
    }))
    .expect("status");

    assert_eq!(status.message_id.as_str(), "m1");
    assert_eq!(status.user_id, UserId::from("u2"));
    assert!(status.delivered_at.is_some());
    assert!(status.read_at.is_none());
    assert_eq!(status.user.map(|user| user.username), Some("bob".to_string()));
}

#[test]
fn outbound_events_use_type_and_payload_envelope() {
    let connect = serde_json::to_value(OutboundEvent::ConnectToRoom).expect("serialize");
    assert_eq!(connect, json!({ "type": "connectToRoom" }));

    let received = serde_json::to_value(OutboundEvent::MessageReceived {
        room_id: RoomId::from("r1"),
        message_id: MessageId::from("m1"),
    })
    .expect("serialize");
    assert_eq!(
        received,
        json!({
            "type": "receiveMessage",
            "payload": { "roomId": "r1", "messageId": "m1" }
        })
    );
}

#[test]
fn raw_frame_tolerates_missing_payload() {
    let frame: RawFrame = serde_json::from_str(r#"{"type":"messagesRead"}"#).expect("frame");
    assert_eq!(frame.event, "messagesRead");
    assert!(frame.payload.is_null());
}

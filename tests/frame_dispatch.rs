mod common;

use common::*;
use meshcore_bot::meshcore::framer::encode_from_radio;
use meshcore_bot::meshcore::{MessageKind, FRAME_STALE_TIMEOUT};
use std::time::Duration;

#[tokio::test]
async fn queue_empty_writes_nothing() {
    let (mut session, radio) = started_session().await;
    radio.feed(&[0x3E, 0x01, 0x00, 0x0A]);
    assert!(wait_until(|| session.handle().metrics().frames_received == 1).await);
    settle().await;
    assert!(radio.writes().is_empty());
    session.stop().await;
}

#[tokio::test]
async fn message_waiting_triggers_exactly_one_drain() {
    let (mut session, radio) = started_session().await;
    radio.feed(&code_frame(0x83));
    assert!(wait_until(|| !radio.writes().is_empty()).await);
    settle().await;
    assert_eq!(radio.writes(), vec![DRAIN.to_vec()]);
    session.stop().await;
}

#[tokio::test]
async fn send_confirmation_also_drains() {
    let (mut session, radio) = started_session().await;
    radio.feed(&code_frame(0x82));
    assert!(wait_until(|| radio.writes() == vec![DRAIN.to_vec()]).await);
    session.stop().await;
}

#[tokio::test]
async fn device_time_request_is_answered() {
    let (mut session, radio) = started_session().await;
    let before = chrono::Utc::now().timestamp() as u32;
    radio.feed(&code_frame(0x05));
    assert!(wait_until(|| !radio.writes().is_empty()).await);
    let after = chrono::Utc::now().timestamp() as u32;

    let reply = radio.writes().remove(0);
    assert_eq!(&reply[..4], &[b'<', 0x05, 0x00, 0x09]);
    let ts = u32::from_le_bytes(reply[4..8].try_into().unwrap());
    assert!(ts >= before && ts <= after);
    session.stop().await;
}

#[tokio::test]
async fn self_info_records_node_name_without_writing() {
    let (mut session, radio) = started_session().await;
    radio.feed(&self_info_frame("MyNode"));
    assert!(wait_until(|| session.handle().node_name().is_some()).await);
    settle().await;
    assert_eq!(session.handle().node_name().as_deref(), Some("MyNode"));
    assert!(radio.writes().is_empty());
    session.stop().await;
}

#[tokio::test]
async fn channel_message_is_dispatched_then_drained() {
    let (mut session, radio) = started_session().await;
    let seen = recorder(&session, MessageKind::Text);
    radio.feed(&channel_frame(1, 1_771_711_343, "Alice: hello"));

    assert!(wait_until(|| count(&seen) == 1).await);
    let msg = seen.lock().unwrap()[0].clone();
    assert_eq!(msg.sender, "Alice");
    assert_eq!(msg.content, "hello");
    assert_eq!(msg.channel_index, Some(1));
    assert_eq!(msg.channel_name, None);
    assert_eq!(msg.timestamp, 1_771_711_343);
    assert!(wait_until(|| radio.writes() == vec![DRAIN.to_vec()]).await);
    session.stop().await;
}

#[tokio::test]
async fn extended_layout_and_inline_push_are_decoded() {
    let (mut session, radio) = started_session().await;
    let seen = recorder(&session, MessageKind::Text);

    radio.feed(&channel_frame_extended(2, 10, "Bob: wx leeds"));
    let mut push = vec![0x88, 3, 0xFF, 0x00];
    push.extend_from_slice(&11u32.to_le_bytes());
    push.extend_from_slice(b"Carol: alerts?");
    radio.feed(&encode_from_radio(&push));

    assert!(wait_until(|| count(&seen) == 2).await);
    let seen = seen.lock().unwrap().clone();
    assert_eq!((seen[0].sender.as_str(), seen[0].content.as_str()), ("Bob", "wx leeds"));
    assert_eq!(seen[0].channel_index, Some(2));
    assert_eq!((seen[1].sender.as_str(), seen[1].content.as_str()), ("Carol", "alerts?"));
    assert_eq!(seen[1].channel_index, Some(3));
    session.stop().await;
}

#[tokio::test]
async fn text_without_separator_has_unknown_sender() {
    let (mut session, radio) = started_session().await;
    let seen = recorder(&session, MessageKind::Text);
    radio.feed(&channel_frame(0, 5, "just text"));
    assert!(wait_until(|| count(&seen) == 1).await);
    let msg = seen.lock().unwrap()[0].clone();
    assert_eq!(msg.sender, "unknown");
    assert_eq!(msg.content, "just text");
    session.stop().await;
}

#[tokio::test]
async fn direct_message_carries_sender_key() {
    let (mut session, radio) = started_session().await;
    let seen = recorder(&session, MessageKind::Direct);
    let key = [0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6];
    radio.feed(&direct_frame(key, 99, "ping"));

    assert!(wait_until(|| count(&seen) == 1).await);
    let msg = seen.lock().unwrap()[0].clone();
    assert_eq!(msg.kind, MessageKind::Direct);
    assert_eq!(msg.sender, "a1b2c3d4e5f6");
    assert_eq!(msg.sender_key, Some(key));
    assert_eq!(msg.content, "ping");
    assert!(wait_until(|| radio.writes() == vec![DRAIN.to_vec()]).await);
    session.stop().await;
}

#[tokio::test]
async fn undersized_channel_message_is_dropped_without_drain() {
    let (mut session, radio) = started_session().await;
    let seen = recorder(&session, MessageKind::Text);
    radio.feed(&encode_from_radio(&[0x08, 1, 0, 0, 1, 2]));
    assert!(wait_until(|| session.handle().metrics().frames_received == 1).await);
    settle().await;
    assert_eq!(count(&seen), 0);
    assert!(radio.writes().is_empty());
    session.stop().await;
}

#[tokio::test]
async fn unknown_codes_are_ignored() {
    let (mut session, radio) = started_session().await;
    radio.feed(&encode_from_radio(&[0x42, 1, 2, 3]));
    radio.feed(&code_frame(0x00));
    radio.feed(&code_frame(0x01));
    assert!(wait_until(|| session.handle().metrics().frames_received == 3).await);
    settle().await;
    assert!(radio.writes().is_empty());
    session.stop().await;
}

#[tokio::test]
async fn out_of_range_length_resyncs_to_next_frame() {
    let (mut session, radio) = started_session().await;
    let seen = recorder(&session, MessageKind::Text);
    let mut bytes = vec![0x3E, 0xFF, 0xFF];
    bytes.extend_from_slice(&channel_frame(1, 7, "Dave: after noise"));
    radio.feed(&bytes);

    assert!(wait_until(|| count(&seen) == 1).await);
    assert_eq!(seen.lock().unwrap()[0].content, "after noise");
    assert!(session.handle().metrics().frames_discarded >= 1);
    session.stop().await;
}

#[tokio::test]
async fn frame_split_across_reads_is_reassembled() {
    let (mut session, radio) = started_session().await;
    let seen = recorder(&session, MessageKind::Text);
    let frame = channel_frame(1, 7, "Erin: split");
    radio.feed(&frame[..5]);
    settle().await;
    assert_eq!(count(&seen), 0);
    radio.feed(&frame[5..]);
    assert!(wait_until(|| count(&seen) == 1).await);
    session.stop().await;
}

#[tokio::test]
async fn stale_partial_frame_is_discarded() {
    let (mut session, radio) = started_session().await;
    let seen = recorder(&session, MessageKind::Text);
    // Header promises 40 bytes that never arrive
    radio.feed(&[0x3E, 40, 0x00, 0x08, 0x01]);
    tokio::time::sleep(FRAME_STALE_TIMEOUT + Duration::from_millis(500)).await;
    assert!(session.handle().metrics().frames_discarded >= 1);

    radio.feed(&channel_frame(1, 7, "Finn: recovered"));
    assert!(wait_until(|| count(&seen) == 1).await);
    session.stop().await;
}

#[tokio::test]
async fn device_info_is_recorded() {
    let (mut session, radio) = started_session().await;
    radio.feed(&encode_from_radio(&[0x0D, 9, 50]));
    assert!(wait_until(|| session.handle().device_info().is_some()).await);
    let info = session.handle().device_info().unwrap();
    assert_eq!(info.fw_ver_code, 9);
    assert_eq!(info.max_contacts, 100);
    session.stop().await;
}

#[tokio::test]
async fn panicking_handler_does_not_stop_the_listener() {
    let (mut session, radio) = started_session().await;
    session.register(MessageKind::Text, |msg, _session| {
        if msg.content == "boom" {
            panic!("handler failure");
        }
    });
    radio.feed(&channel_frame(1, 1, "Gus: boom"));
    assert!(wait_until(|| radio.writes().len() == 1).await);

    radio.feed(&code_frame(0x83));
    assert!(wait_until(|| radio.writes().len() == 2).await);
    assert!(session.is_running());
    session.stop().await;
}

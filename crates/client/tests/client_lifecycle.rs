//! Lifecycle tests for ProtocolClient against a scripted transport.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::time::Duration;

use agentlink_client::{ClientConfig, ClientError, ConnError, ConnectionState, ProtocolClient};
use agentlink_wire::{Message, MessageKind};
use common::{Event, MockTransport, data_id, eventually};
use tokio::time::Instant;

fn fast_config() -> ClientConfig {
    ClientConfig::new()
        .with_retry_interval(Duration::from_millis(10))
        .with_agent_info_refresh(Duration::from_secs(3600))
}

#[tokio::test(start_paused = true)]
async fn start_gives_up_after_retry_times_dials() {
    // GIVEN an agent that never accepts connections
    let mock = MockTransport::new();
    mock.fail_dials_forever();
    let config = ClientConfig::new()
        .with_retry_times(4)
        .with_retry_interval(Duration::from_secs(3));
    let client = ProtocolClient::new(config, mock.clone()).unwrap();

    // WHEN the client starts
    let started = Instant::now();
    let err = client.start().await.unwrap_err();
    let elapsed = started.elapsed();

    // THEN exactly retry_times dials were made, spaced by retry_interval
    assert!(matches!(
        err,
        ClientError::ExhaustedRetries {
            attempts: 4,
            last: ConnError::Dial { .. }
        }
    ));
    assert_eq!(mock.dial_count(), 4);
    assert!(elapsed >= Duration::from_secs(9));
    assert!(elapsed < Duration::from_secs(9) + Duration::from_millis(50));

    let times = mock.dial_times();
    for pair in times.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_secs(3));
        assert!(gap < Duration::from_secs(3) + Duration::from_millis(20));
    }

    // AND no background task was launched
    assert_eq!(client.running_tasks(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn start_succeeds_after_transient_dial_failures() {
    let mock = MockTransport::new();
    mock.fail_dials(2);
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();

    client.start().await.unwrap();

    assert_eq!(mock.dial_count(), 3);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.running_tasks(), 3);
    client.close().await;
}

#[tokio::test]
async fn write_failures_reconnect_once_each_and_recover() {
    // GIVEN the first two writes of data frames fail
    let mock = MockTransport::new();
    mock.fail_writes(MessageKind::Common, 2);
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();
    client.start().await.unwrap();

    // WHEN a data message is sent
    client
        .send(Message::common(1001, b"payload".to_vec()))
        .await
        .unwrap();
    eventually(|| mock.written(MessageKind::Common).len() == 1).await;

    // THEN each failure was followed by exactly one reconnect
    let common = MessageKind::Common.code();
    let trace: Vec<Event> = mock
        .events()
        .into_iter()
        .filter(|e| match e {
            Event::Dial { .. } => true,
            Event::Write { msg_type, .. } => *msg_type == common,
            Event::Close { .. } => false,
        })
        .collect();
    let conn = mock.conn_id();
    assert_eq!(
        trace,
        vec![
            Event::Dial { conn, ok: true },
            Event::Write { conn, msg_type: common, ok: false },
            Event::Dial { conn, ok: true },
            Event::Write { conn, msg_type: common, ok: false },
            Event::Dial { conn, ok: true },
            Event::Write { conn, msg_type: common, ok: true },
        ]
    );
    assert_eq!(client.state(), ConnectionState::Connected);
    client.close().await;
}

#[tokio::test]
async fn message_is_abandoned_after_three_failed_writes() {
    let mock = MockTransport::new();
    mock.fail_writes(MessageKind::Common, 3);
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();
    client.start().await.unwrap();

    client.send(Message::common(1, b"lost".to_vec())).await.unwrap();
    client.send(Message::common(2, b"kept".to_vec())).await.unwrap();
    eventually(|| mock.written(MessageKind::Common).len() == 1).await;

    // the first message was given up on, the next one went through
    let written = mock.written(MessageKind::Common);
    assert_eq!(data_id(&written[0]), 2);
    client.close().await;
}

#[tokio::test]
async fn messages_are_written_in_send_order() {
    let mock = MockTransport::new();
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();
    client.start().await.unwrap();

    for id in 1..=5 {
        client
            .send(Message::common(id, format!("event-{id}").into_bytes()))
            .await
            .unwrap();
    }
    eventually(|| mock.written(MessageKind::Common).len() == 5).await;

    let ids: Vec<i32> = mock
        .written(MessageKind::Common)
        .iter()
        .map(|frame| data_id(frame))
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    client.close().await;
}

#[tokio::test]
async fn agent_info_is_requested_on_start() {
    let mock = MockTransport::new();
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();
    client.start().await.unwrap();

    eventually(|| !mock.written(MessageKind::RequestConfig).is_empty()).await;

    let request = &mock.written(MessageKind::RequestConfig)[0];
    assert_eq!(request.len(), 24);
    // every header field except msg_type is zero
    assert!(request[4..].iter().all(|b| *b == 0));
    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn agent_info_is_refreshed_periodically() {
    let mock = MockTransport::new();
    let config = ClientConfig::new().with_agent_info_refresh(Duration::from_secs(31));
    let client = ProtocolClient::new(config, mock.clone()).unwrap();
    client.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(31 * 2 + 1)).await;

    // immediate request plus one per elapsed period
    assert_eq!(mock.written(MessageKind::RequestConfig).len(), 3);
    client.close().await;
}

#[tokio::test]
async fn config_response_updates_agent_info() {
    let mock = MockTransport::new();
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();
    assert!(!client.agent_info().is_known());
    client.start().await.unwrap();

    mock.push_agent_info(r#"{"bizid": 2, "cloudid": 1, "ip": "10.0.0.8"}"#);

    let info = client
        .wait_for_agent_info(Duration::from_millis(5), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(info.ip, "10.0.0.8");
    assert_eq!(info.business_id, 2);
    assert_eq!(info.cloud_id, 1);
    client.close().await;
}

#[tokio::test]
async fn unrelated_frames_are_drained_without_reconnecting() {
    let mock = MockTransport::new();
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();
    client.start().await.unwrap();

    // GIVEN a frame of an unknown type followed by a config response
    mock.push_frame(0x77, b"not json at all");
    mock.push_agent_info(r#"{"ip": "192.168.1.4"}"#);

    // THEN the config response is still framed correctly
    let info = client
        .wait_for_agent_info(Duration::from_millis(5), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(info.ip, "192.168.1.4");
    assert_eq!(mock.dial_count(), 1);
    client.close().await;
}

#[tokio::test]
async fn invalid_agent_info_body_keeps_previous_value() {
    let mock = MockTransport::new();
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();
    client.start().await.unwrap();

    mock.push_agent_info(r#"{"ip": "10.1.1.1"}"#);
    client
        .wait_for_agent_info(Duration::from_millis(5), Duration::from_secs(5))
        .await
        .unwrap();

    mock.push_agent_info("{broken");
    mock.push_agent_info(r#"{"IP": "10.2.2.2", "BizID": 7}"#);
    eventually(|| client.agent_info().ip == "10.2.2.2").await;
    assert_eq!(client.agent_info().business_id, 7);
    client.close().await;
}

#[tokio::test]
async fn agent_hangup_triggers_reconnect() {
    let mock = MockTransport::new();
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();
    client.start().await.unwrap();
    assert_eq!(mock.dial_count(), 1);

    mock.push_eof();

    eventually(|| mock.dial_count() == 2).await;
    eventually(|| client.state() == ConnectionState::Connected).await;
    client.close().await;
}

#[tokio::test]
async fn send_with_new_connection_leaves_shared_connection_alone() {
    let mock = MockTransport::new();
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();
    client.start().await.unwrap();
    let shared = mock.conn_id();

    client
        .send_with_new_connection(Message::op(295, b"{}".to_vec()))
        .await
        .unwrap();

    let events = mock.events();
    let private: Vec<&Event> = events.iter().filter(|e| e.conn() != shared).collect();
    let op = MessageKind::Op.code();
    assert!(matches!(private[0], Event::Dial { ok: true, .. }));
    assert!(matches!(private[1], Event::Write { msg_type, ok: true, .. } if *msg_type == op));
    assert!(matches!(private[2], Event::Close { .. }));

    assert!(
        !events
            .iter()
            .any(|e| matches!(e, Event::Close { conn } if *conn == shared))
    );
    assert_eq!(client.state(), ConnectionState::Connected);
    client.close().await;
}

#[tokio::test]
async fn send_with_new_connection_works_before_start() {
    let mock = MockTransport::new();
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();

    client
        .send_with_new_connection(Message::op(295, b"{}".to_vec()))
        .await
        .unwrap();

    assert_eq!(mock.written(MessageKind::Op).len(), 1);
    assert_eq!(client.running_tasks(), 0);
}

#[tokio::test]
async fn send_with_new_connection_retries_on_private_connection() {
    let mock = MockTransport::new();
    mock.fail_writes(MessageKind::Op, 2);
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();

    client
        .send_with_new_connection(Message::op(295, b"{}".to_vec()))
        .await
        .unwrap();

    assert_eq!(mock.written(MessageKind::Op).len(), 1);
    assert_eq!(mock.dial_count(), 3);
}

#[tokio::test]
async fn send_with_new_connection_reports_unreachable_agent() {
    let mock = MockTransport::new();
    mock.fail_dials_forever();
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();

    let err = client
        .send_with_new_connection(Message::op(295, b"{}".to_vec()))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Connection(ConnError::Dial { .. })));
}

#[tokio::test]
async fn close_stops_tasks_and_rejects_sends() {
    let mock = MockTransport::new();
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();
    client.start().await.unwrap();
    assert_eq!(client.running_tasks(), 3);

    client.close().await;

    assert_eq!(client.running_tasks(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    let err = client
        .send(Message::common(1, b"late".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Closed));
}

#[tokio::test(start_paused = true)]
async fn close_interrupts_a_reconnect_in_progress() {
    // GIVEN a client whose agent disappears after startup
    let mock = MockTransport::new();
    let config = ClientConfig::new()
        .with_retry_times(100)
        .with_retry_interval(Duration::from_secs(60));
    let client = ProtocolClient::new(config, mock.clone()).unwrap();
    client.start().await.unwrap();
    mock.fail_dials_forever();
    mock.fail_writes(MessageKind::Common, 1);

    client.send(Message::common(1, b"x".to_vec())).await.unwrap();
    eventually(|| mock.dial_count() >= 2).await;

    // WHEN the client is closed mid-reconnect
    let closed = tokio::time::timeout(Duration::from_secs(1), client.close()).await;

    // THEN close returns promptly
    assert!(closed.is_ok());
    assert_eq!(client.running_tasks(), 0);
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let mock = MockTransport::new();
    let client = ProtocolClient::new(fast_config(), mock.clone()).unwrap();
    client.start().await.unwrap();

    assert!(matches!(
        client.start().await,
        Err(ClientError::AlreadyStarted)
    ));
    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn wait_for_agent_info_times_out() {
    let client = ProtocolClient::new(fast_config(), MockTransport::new()).unwrap();

    let err = client
        .wait_for_agent_info(Duration::from_secs(1), Duration::from_secs(10))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::AgentInfoTimeout { waited } if waited == Duration::from_secs(10)));
}

#[test]
fn invalid_configuration_is_rejected_at_construction() {
    let config = ClientConfig::new().with_queue_capacity(0);
    let err = ProtocolClient::new(config, MockTransport::new()).unwrap_err();
    assert!(matches!(err, ClientError::Configuration { .. }));
}

#[test]
fn configured_endpoint_overrides_transport_host() {
    use agentlink_client::Transport;

    let config = fast_config().with_endpoint("/run/custom/agent.sock");
    let client = ProtocolClient::new(config, MockTransport::new()).unwrap();
    assert_eq!(client.config().endpoint.as_deref(), Some("/run/custom/agent.sock"));

    let mut transport = MockTransport::new();
    transport.set_host("/run/custom/agent.sock");
    assert_eq!(transport.host(), "/run/custom/agent.sock");
}

//! Integration tests for dispatch reliability: outage survival, reconnection
//! replay, and terminal outcome reporting across the whole stack.

mod common;

use common::{harness, seed_healthy_chain};
use serde_json::json;
use std::time::Duration;
use tether::{SendOptions, SendOutcome, TetherEvent};
use tether_common::errors::GatewayError;
use tether_common::mock::ScriptedReply;
use tether_common::types::{SessionId, SocketStatus};

#[tokio::test(start_paused = true)]
async fn validated_send_round_trip() {
    let h = harness();
    seed_healthy_chain(&h, "m1", "s1");

    let outcome = h
        .dispatcher
        .send(&SessionId::new("s1"), json!({"body": "compile the branch"}))
        .await;
    assert!(matches!(outcome, SendOutcome::Delivered { attempts: 1, .. }));

    // Validation probed machine then session before the payload went out.
    let methods: Vec<(String, String)> = h
        .gateway
        .calls()
        .iter()
        .map(|c| (c.target.clone(), c.method.clone()))
        .collect();
    assert_eq!(
        methods,
        vec![
            ("m1".to_string(), "ping".to_string()),
            ("s1".to_string(), "status".to_string()),
            ("s1".to_string(), "message".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn offline_machine_fails_fast_without_queueing() {
    let h = harness();
    seed_healthy_chain(&h, "m1", "s1");
    h.gateway.push_reply(
        "m1",
        "ping",
        ScriptedReply::err(GatewayError::Transport("no route to daemon".into())),
    );

    let outcome = h
        .dispatcher
        .send(&SessionId::new("s1"), json!({"body": "hello"}))
        .await;
    let SendOutcome::Failed { reason } = outcome else {
        panic!("expected terminal failure, got {outcome:?}");
    };
    assert_eq!(
        reason,
        "chain unhealthy: machine offline: transport error: no route to daemon"
    );
    // The payload never left and nothing waits for a retry.
    assert_eq!(h.gateway.call_count("s1", "message"), 0);
    assert_eq!(h.dispatcher.queued_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn outage_then_recovery_delivers_with_backoff() {
    let h = harness();
    let mut rx = h.events.subscribe();
    h.dispatcher.start();

    // Two transient failures, then the transport comes back.
    h.gateway.push_reply(
        "s1",
        "message",
        ScriptedReply::err(GatewayError::Transport("relay restarting".into())),
    );
    h.gateway.push_reply(
        "s1",
        "message",
        ScriptedReply::err(GatewayError::Timeout(Duration::from_secs(10))),
    );

    let outcome = h
        .dispatcher
        .send_with(
            &SessionId::new("s1"),
            json!({"body": "survive this"}),
            SendOptions {
                validate_connection: false,
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(outcome, SendOutcome::Queued { .. }));

    // Retry 1 (+2s) fails, retry 2 (+4s) succeeds against the default reply.
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(h.dispatcher.queued_len(), 0);
    assert_eq!(h.gateway.call_count("s1", "message"), 3);

    let mut delivered_attempts = None;
    while let Ok(envelope) = rx.try_recv() {
        if let TetherEvent::MessageDelivered { attempts, .. } = envelope.event {
            delivered_attempts = Some(attempts);
        }
    }
    assert_eq!(delivered_attempts, Some(3));

    h.dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_replays_whole_queue_in_order() {
    let h = harness();
    h.dispatcher
        .handle_socket_status(SocketStatus::Disconnected)
        .await;

    for n in 1..=2 {
        let session = format!("s{n}");
        h.gateway.push_reply(
            &session,
            "message",
            ScriptedReply::err(GatewayError::Transport("socket down".into())),
        );
        let outcome = h
            .dispatcher
            .send_with(
                &SessionId::new(session),
                json!({"n": n}),
                SendOptions {
                    validate_connection: false,
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(outcome, SendOutcome::Queued { .. }));
    }
    assert_eq!(h.dispatcher.queued_len(), 2);

    // No virtual time passes: scheduled retries are still 2s out when the
    // socket reports connected, yet both messages go immediately.
    h.snapshot.set_socket(SocketStatus::Connected);
    h.dispatcher
        .handle_socket_status(SocketStatus::Connected)
        .await;
    assert_eq!(h.dispatcher.queued_len(), 0);

    let replayed: Vec<String> = h
        .gateway
        .calls()
        .iter()
        .filter(|c| c.method == "message")
        .skip(2)
        .map(|c| c.target.clone())
        .collect();
    assert_eq!(replayed, vec!["s1".to_string(), "s2".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_a_reasoned_failure() {
    let h = harness();
    let mut rx = h.events.subscribe();
    h.gateway.set_default_reply(ScriptedReply::err(GatewayError::Transport(
        "daemon unreachable".into(),
    )));
    h.dispatcher.start();

    let outcome = h
        .dispatcher
        .send_with(
            &SessionId::new("s1"),
            json!({"body": "doomed"}),
            SendOptions {
                validate_connection: false,
                ..Default::default()
            },
        )
        .await;
    let SendOutcome::Queued { id } = outcome else {
        panic!("expected queued outcome");
    };

    // 2s + 4s + 8s of backoff, then the fourth failure is terminal.
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(h.dispatcher.queued_len(), 0);
    assert_eq!(h.gateway.call_count("s1", "message"), 4);

    let mut terminal = None;
    while let Ok(envelope) = rx.try_recv() {
        if let TetherEvent::MessageFailed {
            id: failed_id,
            reason,
        } = envelope.event
        {
            terminal = Some((failed_id, reason));
        }
    }
    let (failed_id, reason) = terminal.expect("terminal failure event");
    assert_eq!(failed_id, id);
    assert!(reason.contains("retries exhausted after 4 attempts"));
    assert!(reason.contains("daemon unreachable"));

    h.dispatcher.stop().await;
}

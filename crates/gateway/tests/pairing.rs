#![allow(clippy::unwrap_used, clippy::expect_used)]
//! DM pairing gate, end to end.

mod support;

use switchyard_protocol::Frame;

use support::{Client, dm, spawn_gateway, test_config};

fn pairing_config() -> switchyard_config::GatewayConfig {
    switchyard_config::GatewayConfig {
        pairing: switchyard_config::PairingConfig {
            enabled: true,
            channels: vec!["whatsapp".into()],
            ..Default::default()
        },
        ..test_config()
    }
}

#[tokio::test]
async fn dm_gated_until_code_presented() {
    let (gateway, addr) = spawn_gateway(pairing_config()).await;
    let state = gateway.state();

    let mut worker = Client::connect(addr, Some("secret")).await.unwrap();
    worker.register("n1", &[], None).await;
    state.bind_channel("whatsapp", "n1").await;

    let mut producer = Client::connect(addr, Some("secret")).await.unwrap();
    producer.register("n2", &[], None).await;

    // Unknown peer: blocked, no downstream delivery.
    producer.send(&dm("m1", "whatsapp", "p1", "hello")).await;
    let error = producer.expect_error(403).await;
    assert_eq!(error.title, "Pairing required");
    assert_eq!(state.dispatcher.read().await.total_queued("n1"), 0);
    assert_eq!(state.tracker.read().await.pending_count("n1"), 0);

    // Out-of-band code exchange unlocks the peer.
    let code = state.generate_pairing_code("n1", "whatsapp").await;
    assert_eq!(code.formatted.len(), 9);
    assert_eq!(&code.formatted[4..5], "-");

    producer
        .send(&dm("m2", "whatsapp", "p1", &code.formatted))
        .await;
    producer
        .recv_matching("ack m2", |f| {
            matches!(f, Frame::LaneMessageAck(a) if a.message_id == "m2")
        })
        .await;

    // Approved from now on.
    producer.send(&dm("m3", "whatsapp", "p1", "hello again")).await;
    producer
        .recv_matching("ack m3", |f| {
            matches!(f, Frame::LaneMessageAck(a) if a.message_id == "m3")
        })
        .await;

    gateway.stop().await;
}

#[tokio::test]
async fn group_traffic_and_other_channels_bypass_pairing() {
    let (gateway, addr) = spawn_gateway(pairing_config()).await;
    let state = gateway.state();

    let mut worker = Client::connect(addr, Some("secret")).await.unwrap();
    worker.register("n1", &[], None).await;
    state.bind_channel("whatsapp", "n1").await;
    state.bind_channel("telegram", "n1").await;

    let mut producer = Client::connect(addr, Some("secret")).await.unwrap();
    producer.register("n2", &[], None).await;

    // Non-pairing channel.
    producer.send(&dm("m1", "telegram", "p1", "hi")).await;
    producer
        .recv_matching("ack m1", |f| {
            matches!(f, Frame::LaneMessageAck(a) if a.message_id == "m1")
        })
        .await;

    // Group message on the pairing channel.
    let group = support::lane_frame(
        "m2",
        "whatsapp",
        switchyard_protocol::Lane::Collect,
        serde_json::json!({ "text": "hello room" }),
        Some(switchyard_protocol::RoutingContext {
            peer_id: Some("p1".into()),
            group_id: Some("room-1".into()),
            message_type: Some(switchyard_protocol::MessageType::Group),
            ..Default::default()
        }),
    );
    producer.send(&group).await;
    producer
        .recv_matching("ack m2", |f| {
            matches!(f, Frame::LaneMessageAck(a) if a.message_id == "m2")
        })
        .await;

    gateway.stop().await;
}

#[tokio::test]
async fn repeated_blocked_attempts_rate_limit() {
    let config = switchyard_config::GatewayConfig {
        pairing: switchyard_config::PairingConfig {
            enabled: true,
            channels: vec!["whatsapp".into()],
            max_attempts: 2,
            ..Default::default()
        },
        ..test_config()
    };
    let (gateway, addr) = spawn_gateway(config).await;
    let state = gateway.state();

    let mut worker = Client::connect(addr, Some("secret")).await.unwrap();
    worker.register("n1", &[], None).await;
    state.bind_channel("whatsapp", "n1").await;

    let mut producer = Client::connect(addr, Some("secret")).await.unwrap();
    producer.register("n2", &[], None).await;

    producer.send(&dm("m1", "whatsapp", "p1", "guess")).await;
    let error = producer.expect_error(403).await;
    assert_eq!(error.title, "Pairing required");

    producer.send(&dm("m2", "whatsapp", "p1", "guess")).await;
    let error = producer.expect_error(429).await;
    assert_eq!(error.title, "Rate limited");

    gateway.stop().await;
}

//! Integration Tests with Real MQTT Broker
//!
//! Requires a broker at localhost:1883, so every test is ignored by default.
//! These tests validate:
//! - Connection and graceful disconnect
//! - Publish from one agent, receive on another through the default topics
//! - Subscriptions restored after a second connect


use mqtt_integration_helpers::{client_id, connect_options};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_agent::transport::MqttTransport;
use tether_agent::{Agent, ConnectionState, Listener, Payload, Plug, Qos};
use tokio::time::{sleep, Instant};

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    condition()
}

fn broker_agent(agent_type: &str, agent_id: &str) -> Agent {
    let transport = Arc::new(MqttTransport::new(client_id(agent_type)));
    Agent::new(agent_type, Some(agent_id), transport).expect("Agent creation should succeed")
}

#[tokio::test]
#[ignore = "requires MQTT broker on localhost:1883"]
async fn test_connect_and_disconnect() {
    // Arrange
    let agent = broker_agent("test", "connect");

    // Act
    agent.connect(&connect_options()).expect("Connect request should succeed");

    // Assert
    assert!(wait_for(|| agent.is_connected()).await, "Should connect to broker");

    agent.disconnect().expect("Disconnect request should succeed");
    assert!(
        wait_for(|| agent.connection_state() == ConnectionState::Disconnected).await,
        "Should report disconnected after graceful disconnect"
    );
}

#[tokio::test]
#[ignore = "requires MQTT broker on localhost:1883"]
async fn test_publish_reaches_separate_subscriber() {
    // Arrange: a subscriber agent listening on +/+/temp
    let subscriber = broker_agent("monitor", "m1");
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let input = subscriber
        .create_input(
            "temp",
            Qos::AtLeastOnce,
            None,
            Some(Listener::new(move |topic, payload| {
                sink.lock().unwrap().push((topic.to_string(), payload.clone()));
            })),
        )
        .unwrap();
    assert_eq!(input.topic(), "+/+/temp");
    subscriber.connect(&connect_options()).unwrap();
    assert!(wait_for(|| input.is_subscribed()).await, "Subscription should be acknowledged");

    // and a publishing agent with its own session
    let publisher = broker_agent("test", "abc123");
    let output = publisher.create_output("temp", Qos::AtLeastOnce, false, None).unwrap();
    assert_eq!(output.topic(), "test/abc123/temp");
    publisher.connect(&connect_options()).unwrap();
    assert!(wait_for(|| publisher.is_connected()).await, "Publisher should connect");

    // Act
    output.publish(&21.5).expect("Publish should succeed");

    // Assert
    assert!(wait_for(|| !received.lock().unwrap().is_empty()).await, "Message should arrive");
    let received = received.lock().unwrap();
    assert_eq!(received[0].0, "test/abc123/temp");
    assert_eq!(received[0].1, Payload::Float(21.5));
}

#[tokio::test]
#[ignore = "requires MQTT broker on localhost:1883"]
async fn test_subscriptions_restored_on_second_connect() {
    let agent = broker_agent("test", "reconnect");
    let input = agent.create_input("restored", Qos::AtMostOnce, None, None).unwrap();

    agent.connect(&connect_options()).unwrap();
    assert!(wait_for(|| input.is_subscribed()).await);

    agent.disconnect().unwrap();
    assert!(wait_for(|| agent.connection_state() == ConnectionState::Disconnected).await);
    assert!(!input.is_subscribed());

    agent.connect(&connect_options()).unwrap();
    assert!(
        wait_for(|| input.is_subscribed()).await,
        "Input should be subscribed again after reconnect"
    );
    assert_eq!(input.granted_qos(), Some(Qos::AtMostOnce));
}

//! Pure connection configuration and reconnection policy for the MQTT transport

use crate::transport::{ConnectOptions, Qos};
use rumqttc::{MqttOptions, QoS, Transport as RumqttcTransport};
use std::time::Duration;

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for the given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    /// Decide whether another attempt should be made after a failure
    pub fn should_attempt_reconnection(
        &self,
        current_attempts: u32,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = self.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        ReconnectionDecision::Proceed {
            attempt: current_attempts + 1,
            delay_ms: self.calculate_backoff_delay(current_attempts + 1),
        }
    }
}

/// Reconnection decision
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded,
}

/// Build rumqttc options for a session
pub fn configure_mqtt_options(client_id: &str, options: &ConnectOptions) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(client_id, options.host.clone(), options.port);

    if options.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(credentials) = &options.credentials {
        mqtt_options.set_credentials(
            credentials.username.clone(),
            credentials.password.clone().unwrap_or_default(),
        );
    }

    mqtt_options.set_keep_alive(keepalive_interval(options.keepalive));
    mqtt_options.set_clean_session(true);
    mqtt_options
}

/// rumqttc keep-alive works in whole seconds; zero disables it
fn keepalive_interval(requested: Duration) -> Duration {
    match requested.as_secs() {
        0 if requested.is_zero() => Duration::ZERO,
        0 => Duration::from_secs(1),
        secs => Duration::from_secs(secs),
    }
}

pub fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

pub fn from_mqtt_qos(qos: QoS) -> Qos {
    match qos {
        QoS::AtMostOnce => Qos::AtMostOnce,
        QoS::AtLeastOnce => Qos::AtLeastOnce,
        QoS::ExactlyOnce => Qos::ExactlyOnce,
    }
}

use crate::config::SupervisorConfig;
use crate::listener::{ConnectionState, IntakeListener, ListenerError};
use backoff::{backoff::Backoff, ExponentialBackoff};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run the intake listener on its own task, restarting it with exponential
/// backoff after connection failures.
///
/// The task ends when `token` is cancelled, or when `max_restarts` consecutive
/// runs failed without ever reaching the broker. In the latter case the
/// connection state is left at [`ConnectionState::Failed`].
pub fn spawn_supervised_listener(
    mut listener: IntakeListener,
    config: SupervisorConfig,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = restart_backoff(&config);
        let mut failures = 0u32;

        loop {
            listener.set_state(if failures == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            });

            let error = match listener.run(&token).await {
                Ok(()) => {
                    info!("Intake listener stopped");
                    break;
                }
                Err(e) => e,
            };

            // A run that reached the broker starts a fresh failure streak
            if matches!(error, ListenerError::ConnectionLost(_)) {
                failures = 0;
                backoff.reset();
            }
            failures += 1;
            metrics::counter!("backup.listener.restarts").increment(1);

            if config.max_restarts > 0 && failures > config.max_restarts {
                error!(
                    error = %error,
                    failures = failures,
                    "Intake listener exceeded restart limit, giving up"
                );
                listener.set_state(ConnectionState::Failed);
                break;
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or_else(|| config.restart_max_delay());

            warn!(
                error = %error,
                failures = failures,
                delay_ms = delay.as_millis() as u64,
                "Intake listener failed, restarting"
            );

            tokio::select! {
                _ = token.cancelled() => {
                    listener.set_state(ConnectionState::Disconnected);
                    info!("Intake listener stopped during restart delay");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    })
}

fn restart_backoff(config: &SupervisorConfig) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: config.restart_base_delay(),
        initial_interval: config.restart_base_delay(),
        max_interval: config.restart_max_delay(),
        max_elapsed_time: None,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollisionPolicy, MqttConfig};
    use crate::handler::BackupHandler;
    use crate::placement::ObjectPlacementWriter;
    use crate::store::MemoryObjectStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    fn unreachable_listener() -> (IntakeListener, watch::Receiver<ConnectionState>) {
        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            client_id: "supervisor-test".to_string(),
            topic_root: "/biofield-signal".to_string(),
            qos: 1,
            keep_alive_secs: 30,
            clean_session: true,
            username: None,
            password: None,
            max_packet_size_bytes: 1024 * 1024,
            channel_capacity: 10,
        };
        let handler = Arc::new(BackupHandler::new(ObjectPlacementWriter::new(
            Arc::new(MemoryObjectStore::new()),
            CollisionPolicy::Overwrite,
        )));
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        (IntakeListener::new(&config, handler, tx).unwrap(), rx)
    }

    fn fast_restarts(max_restarts: u32) -> SupervisorConfig {
        SupervisorConfig {
            max_restarts,
            restart_base_delay_ms: 5,
            restart_max_delay_ms: 20,
        }
    }

    #[test]
    fn test_first_restart_delay_follows_base_delay() {
        let mut backoff = restart_backoff(&fast_restarts(0));

        // Default randomization factor is 0.5
        let first = backoff.next_backoff().unwrap();
        assert!(first <= Duration::from_micros(7_500), "first delay was {first:?}");

        for _ in 0..10 {
            let delay = backoff.next_backoff().unwrap();
            assert!(delay <= Duration::from_millis(30), "delay was {delay:?}");
        }
    }

    #[tokio::test]
    async fn test_gives_up_after_restart_limit() {
        let (listener, state) = unreachable_listener();
        let handle =
            spawn_supervised_listener(listener, fast_restarts(2), CancellationToken::new());

        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("supervisor did not give up")
            .unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_stops_unlimited_restarts() {
        let (listener, state) = unreachable_listener();
        let token = CancellationToken::new();
        let handle = spawn_supervised_listener(listener, fast_restarts(0), token.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("supervisor ignored cancellation")
            .unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }
}

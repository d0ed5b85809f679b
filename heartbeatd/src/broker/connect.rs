use std::time::Duration;
use crate::broker::Connector;
use crate::config::BrokerConfig;
use crate::error::BrokerConnectError;

/// Bounded, fixed-delay retry for the initial broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

impl From<&BrokerConfig> for RetryPolicy {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            attempts: config.connect_attempts.max(1),
            delay: config.connect_delay(),
        }
    }
}

/// Try `policy.attempts` times, sleeping `policy.delay` between attempts.
/// There is no sleep after the final failure.
pub async fn connect_with_retry<C: Connector>(
    connector: &C,
    policy: &RetryPolicy,
) -> Result<C::Broker, BrokerConnectError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match connector.connect().await {
            Ok(broker) => return Ok(broker),
            Err(e) if attempt >= attempts => {
                tracing::error!(
                    endpoint = %connector.endpoint(),
                    attempts,
                    "Broker is unreachable, giving up"
                );
                return Err(BrokerConnectError::Exhausted {
                    attempts,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = %connector.endpoint(),
                    attempt,
                    attempts,
                    error = %e,
                    "Broker connection failed, retrying in {:?}",
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryConnector;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_exactly_five_attempts() {
        let connector = MemoryConnector::failing(u32::MAX);
        let started = Instant::now();

        let err = connect_with_retry(&connector, &RetryPolicy::default()).await.err().unwrap();

        assert!(matches!(err, BrokerConnectError::Exhausted { attempts: 5, .. }));
        assert_eq!(connector.attempts(), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_last_attempt() {
        let connector = MemoryConnector::failing(4);

        let broker = connect_with_retry(&connector, &RetryPolicy::default()).await;

        assert!(broker.is_ok());
        assert_eq!(connector.attempts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_needs_no_delay() {
        let connector = MemoryConnector::failing(0);
        let started = Instant::now();

        connect_with_retry(&connector, &RetryPolicy::default()).await.unwrap();

        assert_eq!(connector.attempts(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_policy_from_config() {
        let config = BrokerConfig {
            connect_attempts: 0,
            connect_delay_secs: 2,
            ..Default::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.delay, Duration::from_secs(2));
    }
}

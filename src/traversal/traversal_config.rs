use std::time::Duration;

use anyhow::bail;

use crate::messaging::MAX_FRAME_SIZE;

#[derive(Debug, Clone)]
pub struct TraversalConfig {
    /// capacity of both the router's inbound and its outbound queue
    pub queue_capacity: usize,
    /// capacity of each control channel's writer queue. A peer that lets it fill up loses its
    ///  channel.
    pub channel_queue_capacity: usize,

    /// delay between the hole punch request to the target and the one to the initiator. The
    ///  target's dial should go out slightly before the initiator's so the initiator's NAT
    ///  already has a mapping when the target's SYN arrives.
    pub punch_stagger: Duration,

    pub dial_attempts: usize,
    pub dial_timeout: Duration,
    /// pause before the next attempt after the host reported the remote as unreachable
    pub unreachable_pause: Duration,

    pub discovery_timeout: Duration,

    pub max_frame_size: usize,
    /// keep loopback, private and link-local addresses when resolving peers for a hole punch
    pub allow_private_addresses: bool,
}

impl TraversalConfig {
    pub fn new() -> TraversalConfig {
        TraversalConfig {
            queue_capacity: 10,
            channel_queue_capacity: 64,
            punch_stagger: Duration::from_millis(500),
            dial_attempts: 3,
            dial_timeout: Duration::from_secs(5),
            unreachable_pause: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(30),
            max_frame_size: MAX_FRAME_SIZE,
            allow_private_addresses: false,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue_capacity == 0 {
            bail!("queue capacity must be at least 1");
        }
        if self.channel_queue_capacity == 0 {
            bail!("channel queue capacity must be at least 1");
        }
        if self.dial_attempts == 0 {
            bail!("at least one dial attempt is required");
        }
        if self.dial_timeout.is_zero() {
            bail!("dial timeout must be positive");
        }
        if self.discovery_timeout.is_zero() {
            bail!("discovery timeout must be positive");
        }
        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            bail!("max frame size must be between 1 and {} bytes", u32::MAX);
        }
        Ok(())
    }
}

impl Default for TraversalConfig {
    fn default() -> Self {
        TraversalConfig::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let config = TraversalConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.channel_queue_capacity, 64);
        assert_eq!(config.punch_stagger, Duration::from_millis(500));
        assert_eq!(config.dial_attempts, 3);
        assert_eq!(config.max_frame_size, 1024 * 1024);
    }

    #[rstest]
    #[case::no_queue(|c: &mut TraversalConfig| c.queue_capacity = 0)]
    #[case::no_channel_queue(|c: &mut TraversalConfig| c.channel_queue_capacity = 0)]
    #[case::no_attempts(|c: &mut TraversalConfig| c.dial_attempts = 0)]
    #[case::zero_dial_timeout(|c: &mut TraversalConfig| c.dial_timeout = Duration::ZERO)]
    #[case::zero_discovery_timeout(|c: &mut TraversalConfig| c.discovery_timeout = Duration::ZERO)]
    #[case::zero_frame_size(|c: &mut TraversalConfig| c.max_frame_size = 0)]
    fn test_invalid(#[case] modify: fn(&mut TraversalConfig)) {
        let mut config = TraversalConfig::new();
        modify(&mut config);
        assert!(config.validate().is_err());
    }
}

//! Simulation configuration.
//!
//! Every tunable of the simulated stack lives in one [`SimConfig`] value:
//! link behaviour (seed, queue capacity, loss rates, MTU), socket behaviour
//! (retransmit timeout, listen backlog) and the defaults used by the traffic
//! drivers in [`crate::driver`].  The binary fills it from CLI flags; tests
//! build it with struct-update syntax over [`SimConfig::default`].

use std::time::Duration;

use thiserror::Error;

/// Configuration validation failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// A probability field is outside `[0.0, 1.0]`.
    #[error("{field} must be within [0.0, 1.0], got {value}")]
    InvalidProbability { field: &'static str, value: f64 },
    /// A size or count field that must be positive is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    /// A product of two fields does not fit in `usize`.
    #[error("{0} overflows")]
    Overflow(&'static str),
}

/// All tunables of one simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Seed for every channel's random source; fixed for reproducible runs.
    pub random_seed: u64,
    /// Segments each link direction can buffer before `send` waits.
    pub channel_capacity: usize,
    /// Drop probability on the client → server direction.
    pub loss_rate_data: f64,
    /// Drop probability on the server → client direction.
    pub loss_rate_ack: f64,
    /// Link MTU in bytes.
    pub mtu: usize,
    /// Period of the per-socket one-shot retransmit timer.
    pub retransmit_timeout: Duration,
    /// Accepted connections a listener holds before `accept` drains them.
    pub listen_backlog: usize,
    /// Sender driver: number of writes.
    pub send_count: usize,
    /// Sender driver: bytes per write.
    pub send_size: usize,
    /// Sender driver: delay before each write.
    pub send_interval: Duration,
    /// Receiver driver: read buffer size.
    pub receive_buffer_size: usize,
    /// Receiver driver: delay between reads.
    pub receive_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        // Lossless by default; the CLI and tests opt into loss explicitly.
        Self {
            random_seed: 1,
            channel_capacity: 100,
            loss_rate_data: 0.0,
            loss_rate_ack: 0.0,
            mtu: 1500,
            retransmit_timeout: Duration::from_millis(500),
            listen_backlog: 10,
            send_count: 5,
            send_size: 3000,
            send_interval: Duration::from_millis(100),
            receive_buffer_size: 2000,
            receive_interval: Duration::from_millis(500),
        }
    }
}

impl SimConfig {
    /// Check every field for values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_probability("loss_rate_data", self.loss_rate_data)?;
        check_probability("loss_rate_ack", self.loss_rate_ack)?;
        check_positive("channel_capacity", self.channel_capacity)?;
        check_positive("mtu", self.mtu)?;
        check_positive("listen_backlog", self.listen_backlog)?;
        check_positive("send_size", self.send_size)?;
        check_positive("receive_buffer_size", self.receive_buffer_size)?;
        self.send_count
            .checked_mul(self.send_size)
            .ok_or(ConfigError::Overflow("send_count * send_size"))?;
        Ok(())
    }

    /// Total bytes the sender driver writes, and so the receiver expects.
    ///
    /// Saturates on a configuration that [`validate`](Self::validate)
    /// rejects.
    pub fn total_send_bytes(&self) -> usize {
        self.send_count.saturating_mul(self.send_size)
    }
}

fn check_probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    // NaN fails `contains` too.
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidProbability { field, value });
    }
    Ok(())
}

fn check_positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero(field));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SimConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.mtu, 1500);
        assert_eq!(config.listen_backlog, 10);
        assert_eq!(config.total_send_bytes(), 15_000);
    }

    #[test]
    fn rejects_out_of_range_loss() {
        let config = SimConfig {
            loss_rate_ack: 1.5,
            ..SimConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidProbability {
                field: "loss_rate_ack",
                value: 1.5
            })
        );

        let config = SimConfig {
            loss_rate_data: -0.1,
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_nan_loss() {
        let config = SimConfig {
            loss_rate_data: f64::NAN,
            ..SimConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProbability { field: "loss_rate_data", .. })
        ));
    }

    #[test]
    fn rejects_zero_sizes() {
        let config = SimConfig {
            channel_capacity: 0,
            ..SimConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("channel_capacity")));

        let config = SimConfig {
            listen_backlog: 0,
            ..SimConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("listen_backlog")));
    }

    #[test]
    fn rejects_overflowing_send_total() {
        let config = SimConfig {
            send_count: usize::MAX,
            send_size: 2,
            ..SimConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Overflow("send_count * send_size"))
        );
        assert_eq!(config.total_send_bytes(), usize::MAX);

        let config = SimConfig {
            send_count: usize::MAX,
            send_size: 1,
            ..SimConfig::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn boundary_probabilities_are_accepted() {
        let config = SimConfig {
            loss_rate_data: 0.0,
            loss_rate_ack: 1.0,
            ..SimConfig::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }
}

//! Simulated network with deterministic latency, duplication and packet loss.

use crate::NodeIndex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

/// Configuration for simulated network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Base one-way latency.
    pub latency: Duration,
    /// Jitter as a fraction of base latency (0.0 - 1.0).
    pub jitter_fraction: f64,
    /// Packet loss rate (0.0 - 1.0). Messages are dropped with this probability.
    pub packet_loss_rate: f64,
    /// Probability that a delivered message arrives a second time.
    pub duplicate_rate: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(10),
            jitter_fraction: 0.5,
            packet_loss_rate: 0.0,
            duplicate_rate: 0.0,
        }
    }
}

/// Simulated network for deterministic message delivery.
#[derive(Debug)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Check if a packet should be dropped based on the configured loss rate.
    pub fn should_drop_packet(&self, rng: &mut ChaCha8Rng) -> bool {
        self.config.packet_loss_rate > 0.0 && rng.gen::<f64>() < self.config.packet_loss_rate
    }

    /// Latency with jitter applied.
    pub fn sample_latency(&self, rng: &mut ChaCha8Rng) -> Duration {
        let jitter = self.config.jitter_fraction.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return self.config.latency;
        }
        let factor = 1.0 + jitter * rng.gen_range(-1.0..1.0);
        self.config.latency.mul_f64(factor.max(0.0))
    }

    /// Delays after which copies of a message from `from` reach `to`.
    ///
    /// Empty if the message is lost; two entries if it is duplicated. A node
    /// delivers to itself immediately and reliably.
    pub fn delivery_delays(
        &self,
        from: NodeIndex,
        to: NodeIndex,
        rng: &mut ChaCha8Rng,
    ) -> Vec<Duration> {
        if from == to {
            return vec![Duration::ZERO];
        }
        if self.should_drop_packet(rng) {
            return vec![];
        }

        let mut delays = vec![self.sample_latency(rng)];
        if self.config.duplicate_rate > 0.0 && rng.gen::<f64>() < self.config.duplicate_rate {
            delays.push(self.sample_latency(rng));
        }
        delays
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_self_delivery_is_immediate() {
        let network = SimulatedNetwork::new(NetworkConfig {
            packet_loss_rate: 1.0,
            ..Default::default()
        });
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(network.delivery_delays(2, 2, &mut rng), vec![Duration::ZERO]);
        assert!(network.delivery_delays(2, 3, &mut rng).is_empty());
    }

    #[test]
    fn test_latency_stays_within_jitter() {
        let network = SimulatedNetwork::new(NetworkConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            let latency = network.sample_latency(&mut rng);
            assert!(latency >= Duration::from_millis(5));
            assert!(latency <= Duration::from_millis(15));
        }
    }

    #[test]
    fn test_duplicates() {
        let network = SimulatedNetwork::new(NetworkConfig {
            duplicate_rate: 1.0,
            ..Default::default()
        });
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(network.delivery_delays(0, 1, &mut rng).len(), 2);
    }
}

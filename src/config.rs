//! # Runtime, transport and supervisor configuration.
//!
//! Plain structs with public fields and `Default` impls. Prefer the helper
//! accessors over sprinkling sentinel checks (`0`) across the codebase.
//!
//! ## Sentinel values
//! - `RuntimeConfig::worker_threads = 0` → one worker per available core
//! - `SupervisorConfig::grace = 0s` → `stop` waits for children indefinitely
//! - `TransportConfig::connect_timeout = 0s` → no connect timeout

use std::time::Duration;

use crate::policies::{BackoffPolicy, RestartPolicy};
use crate::supervisor::RestartStrategy;

/// Default upper bound for one frame body (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Configuration of the runtime glue.
///
/// ## Field semantics
/// - `worker_threads`: size of the fixed worker pool (`0` = available parallelism)
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `default_capacity`: capacity used by [`RuntimeContext::default_channel`](crate::RuntimeContext::default_channel)
/// - `transport`: settings shared by socket transports
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Number of worker threads executing task bodies and channel I/O.
    pub worker_threads: usize,
    /// Capacity of the event bus broadcast ring buffer.
    pub bus_capacity: usize,
    /// Capacity for channels created without an explicit one.
    pub default_capacity: usize,
    /// Transport settings.
    pub transport: TransportConfig,
}

impl RuntimeConfig {
    /// Resolves the worker pool size.
    pub fn worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.worker_threads
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for RuntimeConfig {
    /// - `worker_threads = 0` (one per core)
    /// - `bus_capacity = 1024`
    /// - `default_capacity = 64`
    fn default() -> Self {
        Self {
            worker_threads: 0,
            bus_capacity: 1024,
            default_capacity: 64,
            transport: TransportConfig::default(),
        }
    }
}

/// Settings shared by the socket transports.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Bound on outbound connection establishment (`0s` = none).
    pub connect_timeout: Duration,
    /// Largest accepted frame body.
    pub max_frame_len: usize,
    /// Receive buffer size for datagram transports.
    pub datagram_size: usize,
    /// Capacity of each link's inbound and per-peer outbound queue.
    pub link_queue: usize,
    /// Reliable multicast settings.
    pub multicast: MulticastConfig,
}

impl TransportConfig {
    /// Returns the connect timeout as an `Option`.
    pub fn connect_timeout(&self) -> Option<Duration> {
        if self.connect_timeout == Duration::ZERO {
            None
        } else {
            Some(self.connect_timeout)
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            datagram_size: 65_507,
            link_queue: 256,
            multicast: MulticastConfig::default(),
        }
    }
}

/// Reliable multicast settings.
///
/// ## Field semantics
/// - `retry_budget`: NAKs a receiver sends for one gap, and retransmissions a sender
///   performs for one sequence, before giving up
/// - `window`: datagrams the sender keeps for retransmission
/// - `nak_interval`: how often receivers re-request missing sequences
/// - `ttl`: multicast hop limit
/// - `loopback`: deliver to listeners on the sending host
#[derive(Clone, Debug)]
pub struct MulticastConfig {
    /// Bounded retry budget per missing datagram.
    pub retry_budget: u32,
    /// Retransmit window in datagrams.
    pub window: usize,
    /// Interval between NAK rounds.
    pub nak_interval: Duration,
    /// Multicast TTL.
    pub ttl: u32,
    /// Multicast loopback.
    pub loopback: bool,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            retry_budget: 5,
            window: 1024,
            nak_interval: Duration::from_millis(50),
            ttl: 1,
            loopback: true,
        }
    }
}

/// Configuration of one supervisor.
///
/// ## Field semantics
/// - `strategy`: which siblings restart when one child fails
/// - `max_restarts` / `window`: restart intensity; more than `max_restarts` restarts
///   inside the trailing `window` stops the tree
/// - `dynamic_children`: allow `register` after `start`
/// - `grace`: bound on `stop` (`0s` = wait for every child indefinitely)
/// - `restart` / `backoff`: defaults inherited by [`ChildSpec`](crate::ChildSpec)
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Restart strategy.
    pub strategy: RestartStrategy,
    /// Restarts tolerated inside `window`.
    pub max_restarts: usize,
    /// Sliding window for restart intensity.
    pub window: Duration,
    /// Allow registration after start.
    pub dynamic_children: bool,
    /// Maximum wait for children to stop.
    pub grace: Duration,
    /// Default per-child restart policy.
    pub restart: RestartPolicy,
    /// Default per-child restart delay.
    pub backoff: BackoffPolicy,
}

impl SupervisorConfig {
    /// Returns the stop grace as an `Option`.
    ///
    /// - `None` → wait indefinitely
    /// - `Some(d)` → give up after `d`
    #[inline]
    pub fn grace(&self) -> Option<Duration> {
        if self.grace == Duration::ZERO {
            None
        } else {
            Some(self.grace)
        }
    }
}

impl Default for SupervisorConfig {
    /// Default configuration:
    ///
    /// - `strategy = OneForOne`
    /// - `max_restarts = 3`, `window = 5s`
    /// - `dynamic_children = false`
    /// - `grace = 0s` (wait indefinitely)
    /// - `restart = RestartPolicy::OnFailure`
    /// - `backoff = BackoffPolicy::immediate()`
    fn default() -> Self {
        Self {
            strategy: RestartStrategy::OneForOne,
            max_restarts: 3,
            window: Duration::from_secs(5),
            dynamic_children: false,
            grace: Duration::ZERO,
            restart: RestartPolicy::default(),
            backoff: BackoffPolicy::immediate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sentinels_resolve() {
        let cfg = RuntimeConfig {
            worker_threads: 0,
            bus_capacity: 0,
            ..RuntimeConfig::default()
        };
        assert!(cfg.worker_threads() >= 1);
        assert_eq!(cfg.bus_capacity_clamped(), 1);

        let sup = SupervisorConfig::default();
        assert_eq!(sup.grace(), None);

        let transport = TransportConfig {
            connect_timeout: Duration::ZERO,
            ..TransportConfig::default()
        };
        assert_eq!(transport.connect_timeout(), None);
    }
}

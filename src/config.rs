//! Node-wide tuning knobs, in the same `const fn` + named-preset idiom as
//! [`collage_net::ConnectionConfig`] and `collage_wire`'s `QueueConfig`.

use std::time::Duration;

/// Configuration for a [`crate::LocalNode`].
#[derive(Debug, Clone, Copy)]
pub struct NodeConfig {
    /// Byte budget for the node-local instance cache.
    pub instance_cache_budget: usize,
    /// Whether newly registered objects are queued for idle broadcast by
    /// default (`enableSendOnRegister` starts already incremented).
    pub send_on_register_default: bool,
    /// How long `find_master_node_id` waits for a reply before yielding
    /// `NodeId::ZERO`.
    pub discovery_timeout: Duration,
    /// How long `map_object_sync`/`commit_sync` wait before surfacing a
    /// timeout to the caller.
    pub request_timeout: Duration,
}

impl NodeConfig {
    pub const fn new(
        instance_cache_budget: usize,
        send_on_register_default: bool,
        discovery_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            instance_cache_budget,
            send_on_register_default,
            discovery_timeout,
            request_timeout,
        }
    }

    /// Small cache, short timeouts; favors quick failure over patience.
    pub const fn low_latency() -> Self {
        Self {
            instance_cache_budget: 1 << 20,
            send_on_register_default: false,
            discovery_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(500),
        }
    }

    /// Large cache, generous timeouts; favors tolerating slow peers.
    pub const fn high_throughput() -> Self {
        Self {
            instance_cache_budget: 64 << 20,
            send_on_register_default: false,
            discovery_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            instance_cache_budget: 16 << 20,
            send_on_register_default: false,
            discovery_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
        }
    }
}

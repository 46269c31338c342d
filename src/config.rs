/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Transport configuration.
//!
//! `RdmaTransportConfig` holds every tunable of the transport: the listen
//! port, queue count, arena and segment sizing, queue-pair capability
//! limits, and the fixed connection negotiation parameters exchanged over
//! the connection-manager handshake. `num_queues` must match between a
//! client and the server it connects to.

use serde::Deserialize;
use serde::Serialize;

/// Configuration for one transport endpoint (client or server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RdmaTransportConfig {
    /// `listen_port` - The TCP-style port the server listens on via the
    /// connection manager.
    pub listen_port: u16,
    /// `num_queues` - Number of independent reliable connections. Must be
    /// identical on the client and the server.
    pub num_queues: usize,
    /// `arena_size_bytes` - Size of the server's pinned memory arena.
    pub arena_size_bytes: usize,
    /// `segment_size_bytes` - Per-queue registered bounce buffer size; the
    /// upper bound on a single remote read/write.
    pub segment_size_bytes: usize,
    /// `max_send_wr` - The maximum number of outstanding send work requests.
    pub max_send_wr: u32,
    /// `max_recv_wr` - The maximum number of outstanding receive work
    /// requests. Small: no receive traffic carries data, only the CM
    /// handshake.
    pub max_recv_wr: u32,
    /// `cq_capacity` - Completion queue capacity, sized to `max_send_wr`.
    pub cq_capacity: i32,
    /// `resolve_timeout_ms` - Deadline for address and route resolution.
    pub resolve_timeout_ms: i32,
    /// `completion_timeout_ms` - Optional deadline around the completion
    /// poll loop. `None` preserves the unbounded busy-poll contract.
    pub completion_timeout_ms: Option<u64>,
    /// `initiator_depth` - Outstanding RDMA reads this endpoint may have in
    /// flight toward the peer.
    pub initiator_depth: u8,
    /// `responder_resources` - Incoming RDMA reads this endpoint accepts.
    pub responder_resources: u8,
    /// `retry_count` - Transport retry count for the connection.
    pub retry_count: u8,
    /// `rnr_retry_count` - Receiver-not-ready retry count.
    pub rnr_retry_count: u8,
    /// `flow_control` - Whether to request flow control on the connection.
    pub flow_control: bool,
}

impl Default for RdmaTransportConfig {
    fn default() -> Self {
        Self {
            listen_port: 20886,
            num_queues: 20,
            arena_size_bytes: 32 * 1024 * 1024 * 1024,
            segment_size_bytes: 1 << 16,
            max_send_wr: 4096,
            max_recv_wr: 4,
            cq_capacity: 4096,
            resolve_timeout_ms: 2000,
            completion_timeout_ms: None,
            initiator_depth: 16,
            responder_resources: 16,
            retry_count: 7,
            rnr_retry_count: 7,
            flow_control: true,
        }
    }
}

impl std::fmt::Display for RdmaTransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RdmaTransportConfig {{ listen_port: {}, num_queues: {}, arena_size_bytes: {}, segment_size_bytes: {}, max_send_wr: {}, max_recv_wr: {}, cq_capacity: {}, resolve_timeout_ms: {}, initiator_depth: {}, responder_resources: {}, retry_count: {}, rnr_retry_count: {}, flow_control: {} }}",
            self.listen_port,
            self.num_queues,
            self.arena_size_bytes,
            self.segment_size_bytes,
            self.max_send_wr,
            self.max_recv_wr,
            self.cq_capacity,
            self.resolve_timeout_ms,
            self.initiator_depth,
            self.responder_resources,
            self.retry_count,
            self.rnr_retry_count,
            self.flow_control,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RdmaTransportConfig::default();
        assert_eq!(config.listen_port, 20886);
        assert_eq!(config.num_queues, 20);
        assert_eq!(config.arena_size_bytes, 32 * 1024 * 1024 * 1024);
        assert_eq!(config.segment_size_bytes, 65536);
        assert_eq!(config.max_send_wr, 4096);
        assert_eq!(config.max_recv_wr, 4);
        assert_eq!(config.cq_capacity as u32, config.max_send_wr);
        assert_eq!(config.resolve_timeout_ms, 2000);
        assert_eq!(config.completion_timeout_ms, None);
        assert_eq!(config.initiator_depth, 16);
        assert_eq!(config.responder_resources, 16);
        assert_eq!(config.retry_count, 7);
        assert_eq!(config.rnr_retry_count, 7);
        assert!(config.flow_control);
    }

    #[test]
    fn test_display_lists_ports_and_queues() {
        let config = RdmaTransportConfig::default();
        let rendered = format!("{}", config);
        assert!(rendered.contains("listen_port: 20886"));
        assert!(rendered.contains("num_queues: 20"));
    }

    #[test]
    fn test_serde_round_trip() {
        let config = RdmaTransportConfig {
            num_queues: 2,
            arena_size_bytes: 4096,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: RdmaTransportConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.num_queues, 2);
        assert_eq!(back.arena_size_bytes, 4096);
        assert_eq!(back.listen_port, config.listen_port);
    }
}

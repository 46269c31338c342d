/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Client endpoint.
//!
//! `RdmaClient::connect` brings up `num_queues` independent reliable
//! connections to one server, strictly one at a time. Each queue walks the
//! connection-manager state machine (resolve address, resolve route,
//! connect, established), captures the server's arena descriptor from the
//! handshake private data, and registers its own bounce buffer. The device
//! context, protection domain, and completion channel are created lazily
//! when the first queue resolves and are shared by all queues.
//!
//! Bring-up is fail-fast: if any queue fails at any step, every queue
//! established so far is torn down in reverse order and the error
//! propagates. There are no partially connected clients.

use std::net::Ipv4Addr;
use std::net::SocketAddrV4;
use std::time::Duration;

use crate::cm::CmEvent;
use crate::cm::CmId;
use crate::cm::EventChannel;
use crate::config::RdmaTransportConfig;
use crate::error::RdmaTransportError;
use crate::rdma_components::CompChannel;
use crate::rdma_components::MemoryRegion;
use crate::rdma_components::QueueState;
use crate::rdma_components::RdmaDomain;
use crate::rdma_components::RdmaQueue;
use crate::rdma_components::RemoteMemoryDescriptor;
use crate::rdma_components::connect_param;
use crate::rdma_components::create_transport_resources;

/// A connected client endpoint: `num_queues` reliable connections to one
/// server arena.
///
/// Queues are independent once established; spread them across worker
/// threads with `queues_mut` / `take_queues`. Dropping the client
/// disconnects and releases every queue, then the shared completion
/// channel, protection domain, and event channel, in that order.
pub struct RdmaClient {
    config: RdmaTransportConfig,
    server_descriptor: Option<RemoteMemoryDescriptor>,
    // Field order is teardown order: queues, completion channel, domain,
    // event channel.
    queues: Vec<RdmaQueue>,
    comp_channel: Option<CompChannel>,
    domain: Option<RdmaDomain>,
    channel: EventChannel,
}

impl std::fmt::Debug for RdmaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdmaClient")
            .field("queues", &self.queues.len())
            .field("server_descriptor", &self.server_descriptor)
            .finish()
    }
}

impl RdmaClient {
    /// Connects to the server at `server` (port taken from
    /// `config.listen_port`), establishing all `config.num_queues` queues
    /// before returning.
    pub fn connect(
        server: Ipv4Addr,
        config: RdmaTransportConfig,
    ) -> Result<Self, RdmaTransportError> {
        let dst = SocketAddrV4::new(server, config.listen_port);
        tracing::info!(server = %dst, num_queues = config.num_queues, "connecting");

        let channel = EventChannel::new()?;
        let mut domain: Option<RdmaDomain> = None;
        let mut comp_channel: Option<CompChannel> = None;
        let mut server_descriptor: Option<RemoteMemoryDescriptor> = None;
        let mut queues: Vec<RdmaQueue> = Vec::with_capacity(config.num_queues);

        for index in 0..config.num_queues {
            match establish_queue(
                &channel,
                &mut domain,
                &mut comp_channel,
                &mut server_descriptor,
                dst,
                index,
                &config,
            ) {
                Ok(queue) => queues.push(queue),
                Err(err) => {
                    tracing::error!(
                        queue = index,
                        error = %err,
                        "queue bring-up failed, rolling back"
                    );
                    // Tear down in reverse establishment order; each drop
                    // disconnects and releases the queue's resources.
                    while queues.pop().is_some() {}
                    return Err(err);
                }
            }
        }

        tracing::info!(server = %dst, queues = queues.len(), "connected");
        Ok(Self {
            config,
            server_descriptor,
            queues,
            comp_channel,
            domain,
            channel,
        })
    }

    pub fn num_queues(&self) -> usize {
        self.queues.len()
    }

    /// The arena descriptor captured during establishment. `None` only when
    /// the client was configured with zero queues.
    pub fn server_descriptor(&self) -> Option<RemoteMemoryDescriptor> {
        self.server_descriptor
    }

    pub fn config(&self) -> &RdmaTransportConfig {
        &self.config
    }

    pub fn queue_mut(&mut self, index: usize) -> Option<&mut RdmaQueue> {
        self.queues.get_mut(index)
    }

    pub fn queues_mut(&mut self) -> &mut [RdmaQueue] {
        &mut self.queues
    }

    /// Disconnects every queue and releases all endpoint resources.
    /// Equivalent to dropping the client; provided for call sites that want
    /// teardown to be visible.
    pub fn close(mut self) {
        tracing::debug!(queues = self.queues.len(), "closing client endpoint");
        while self.queues.pop().is_some() {}
    }
}

/// Walks one queue through the full bring-up state machine.
///
/// The shared domain and completion channel are created here, on the first
/// queue to resolve a route; later queues reuse them. The passed
/// `server_descriptor` slot is filled by the first established queue and
/// checked against by the rest.
fn establish_queue(
    channel: &EventChannel,
    domain: &mut Option<RdmaDomain>,
    comp_channel: &mut Option<CompChannel>,
    server_descriptor: &mut Option<RemoteMemoryDescriptor>,
    server: SocketAddrV4,
    index: usize,
    config: &RdmaTransportConfig,
) -> Result<RdmaQueue, RdmaTransportError> {
    let mut state = QueueState::Init;
    trace_state(index, state);

    let cm_id = CmId::new(channel)?;

    cm_id.resolve_addr(server, config.resolve_timeout_ms)?;
    state = QueueState::AddrResolving;
    trace_state(index, state);

    expect_event(
        channel,
        rdma_sys::rdma_cm_event_type::RDMA_CM_EVENT_ADDR_RESOLVED,
        "address resolution",
        config.resolve_timeout_ms,
    )?
    .ack()?;
    state = QueueState::AddrResolved;
    trace_state(index, state);

    cm_id.resolve_route(config.resolve_timeout_ms)?;
    expect_event(
        channel,
        rdma_sys::rdma_cm_event_type::RDMA_CM_EVENT_ROUTE_RESOLVED,
        "route resolution",
        config.resolve_timeout_ms,
    )?
    .ack()?;
    state = QueueState::RouteResolved;
    trace_state(index, state);

    let dom = match domain {
        Some(d) => &*d,
        None => &*domain.insert(RdmaDomain::from_cm_id(&cm_id)?),
    };
    let comp = match comp_channel {
        Some(c) => &*c,
        None => &*comp_channel.insert(CompChannel::new(cm_id.verbs())?),
    };

    let (cq, qp) = create_transport_resources(&cm_id, dom, comp, config)?;

    let mut param = connect_param(config, qp.qp_num());
    cm_id.connect(&mut param)?;
    state = QueueState::Connecting;
    trace_state(index, state);

    let event = expect_event(
        channel,
        rdma_sys::rdma_cm_event_type::RDMA_CM_EVENT_ESTABLISHED,
        "connection establishment",
        config.resolve_timeout_ms,
    )?;
    let desc = descriptor_from_event(&event);
    let desc = match desc {
        Some(d) => d,
        None => {
            // Acknowledge first, then unwind the now-established connection.
            drop(event);
            cm_id.disconnect();
            return Err(RdmaTransportError::MissingDescriptor);
        }
    };
    event.ack()?;
    state = QueueState::Connected;
    trace_state(index, state);

    match *server_descriptor {
        None => {
            tracing::debug!(
                queue = index,
                base_addr = format_args!("{:#x}", desc.base_addr),
                access_key = desc.access_key,
                "captured server arena descriptor"
            );
            *server_descriptor = Some(desc);
        }
        Some(first) if first != desc => {
            tracing::warn!(
                queue = index,
                first = ?first,
                this = ?desc,
                "server arena descriptor differs between queues"
            );
        }
        Some(_) => {}
    }

    let mut buffer = vec![0u8; config.segment_size_bytes].into_boxed_slice();
    let local_mr = match MemoryRegion::register(dom.pd(), buffer.as_mut_ptr(), buffer.len()) {
        Ok(mr) => mr,
        Err(err) => {
            cm_id.disconnect();
            return Err(err);
        }
    };

    Ok(RdmaQueue::new(
        qp,
        cq,
        cm_id,
        local_mr,
        buffer,
        desc,
        config.completion_timeout_ms.map(Duration::from_millis),
    ))
}

fn descriptor_from_event(event: &CmEvent<'_>) -> Option<RemoteMemoryDescriptor> {
    event
        .private_data()
        .and_then(RemoteMemoryDescriptor::from_bytes)
}

fn trace_state(index: usize, state: QueueState) {
    tracing::trace!(queue = index, state = ?state, "queue bring-up");
}

/// Waits for `expected`, turning the timeout status librdmacm reports
/// through the corresponding error event into a `Timeout`.
fn expect_event<'a>(
    channel: &'a EventChannel,
    expected: rdma_sys::rdma_cm_event_type::Type,
    phase: &'static str,
    timeout_ms: i32,
) -> Result<CmEvent<'a>, RdmaTransportError> {
    channel.wait_for_event(expected).map_err(|err| match err {
        RdmaTransportError::Status { status } if status == -libc::ETIMEDOUT => {
            RdmaTransportError::Timeout {
                operation: phase,
                timeout_ms: timeout_ms as u64,
            }
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdma_supported;

    #[test]
    fn test_connect_unroutable_address_fails_fast() {
        if !rdma_supported() {
            println!("Skipping test: RDMA not supported on this system");
            return;
        }
        let config = RdmaTransportConfig {
            num_queues: 1,
            resolve_timeout_ms: 100,
            ..Default::default()
        };
        // TEST-NET-1, guaranteed unroutable.
        let result = RdmaClient::connect(Ipv4Addr::new(192, 0, 2, 1), config);
        assert!(result.is_err());
    }

    #[test]
    fn test_connect_zero_queues_yields_empty_client() {
        if !rdma_supported() {
            println!("Skipping test: RDMA not supported on this system");
            return;
        }
        let config = RdmaTransportConfig {
            num_queues: 0,
            ..Default::default()
        };
        let client = match RdmaClient::connect(Ipv4Addr::LOCALHOST, config) {
            Ok(c) => c,
            Err(_) => {
                println!("Skipping test: rdma_cm not available");
                return;
            }
        };
        assert_eq!(client.num_queues(), 0);
        assert!(client.server_descriptor().is_none());
        client.close();
    }
}

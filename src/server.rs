/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Server endpoint.
//!
//! `RdmaServer::serve` binds a listening connection identifier and returns;
//! `accept_all` then drives the event loop until `num_queues` connections
//! are established. Connection handling is fully serialized: one event at a
//! time, in arrival order.
//!
//! The arena is allocated and registered lazily, on the first connect
//! request, and its descriptor (base address + remote access key) is
//! embedded in the private data of every accept so each client queue
//! captures it during the handshake. After establishment the server's CPU
//! is not involved in data transfer at all; clients read and write the
//! arena directly.

use std::ffi::c_void;

use crate::cm::CmId;
use crate::cm::EventChannel;
use crate::cm::event_type_str;
use crate::config::RdmaTransportConfig;
use crate::error::RdmaTransportError;
use crate::rdma_components::CompChannel;
use crate::rdma_components::CompletionQueue;
use crate::rdma_components::MemoryRegion;
use crate::rdma_components::QueuePair;
use crate::rdma_components::QueueState;
use crate::rdma_components::RdmaDomain;
use crate::rdma_components::RemoteMemoryDescriptor;
use crate::rdma_components::create_transport_resources;

/// One accepted connection on the server side.
///
/// Slots are assigned by a monotonically increasing counter, one per connect
/// request; a disconnected slot's resources are released but the slot is not
/// reused.
struct ServerSlot {
    state: QueueState,
    // Teardown order: queue pair, completion queue, identifier.
    qp: Option<QueuePair>,
    cq: Option<CompletionQueue>,
    cm_id: Option<CmId>,
}

impl ServerSlot {
    fn empty() -> Self {
        Self {
            state: QueueState::Init,
            qp: None,
            cq: None,
            cm_id: None,
        }
    }

    fn matches(&self, id: *mut rdma_sys::rdma_cm_id) -> bool {
        self.cm_id.as_ref().map(|c| c.as_ptr()) == Some(id)
    }

    fn release(&mut self) {
        self.qp = None;
        self.cq = None;
        self.cm_id = None;
        self.state = QueueState::Init;
    }
}

impl Drop for ServerSlot {
    fn drop(&mut self) {
        if self.state == QueueState::Connected {
            if let Some(cm_id) = &self.cm_id {
                cm_id.disconnect();
            }
        }
        // Field order then destroys qp, cq, id.
    }
}

/// A listening server endpoint exporting one pinned arena.
pub struct RdmaServer {
    config: RdmaTransportConfig,
    next_slot: usize,
    descriptor: Option<RemoteMemoryDescriptor>,
    // Field order is teardown order: slots, completion channel, arena
    // registration, arena buffer, domain, listener, event channel.
    slots: Vec<ServerSlot>,
    comp_channel: Option<CompChannel>,
    arena_mr: Option<MemoryRegion>,
    arena: Vec<u8>,
    domain: Option<RdmaDomain>,
    listener: CmId,
    channel: EventChannel,
}

impl std::fmt::Debug for RdmaServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdmaServer")
            .field("listen_port", &self.config.listen_port)
            .field("connected", &self.connected_queues())
            .field("arena_len", &self.arena.len())
            .finish()
    }
}

impl RdmaServer {
    /// Binds `0.0.0.0:listen_port` and starts listening. The arena is not
    /// allocated yet; that happens on the first connect request.
    pub fn serve(config: RdmaTransportConfig) -> Result<Self, RdmaTransportError> {
        let channel = EventChannel::new()?;
        let listener = CmId::new(&channel)?;
        listener.bind(config.listen_port)?;
        listener.listen(config.num_queues as i32 + 1)?;
        tracing::info!(
            port = config.listen_port,
            num_queues = config.num_queues,
            arena_size = config.arena_size_bytes,
            "listening"
        );

        let slots = (0..config.num_queues).map(|_| ServerSlot::empty()).collect();
        Ok(Self {
            config,
            next_slot: 0,
            descriptor: None,
            slots,
            comp_channel: None,
            arena_mr: None,
            arena: Vec::new(),
            domain: None,
            listener,
            channel,
        })
    }

    /// Drives the event loop until `num_queues` connections are
    /// established. Fail-fast: an error accepting any connection aborts the
    /// whole server.
    pub fn accept_all(&mut self) -> Result<(), RdmaTransportError> {
        while self.connected_queues() < self.config.num_queues {
            self.handle_next_event()?;
        }
        tracing::info!(queues = self.config.num_queues, "all queues established");
        Ok(())
    }

    /// Blocks for one connection-manager event and handles it.
    ///
    /// Events other than connect request, established, and disconnected can
    /// surface here (address changes, timewait exit); they are logged and
    /// ignored.
    pub fn handle_next_event(&mut self) -> Result<(), RdmaTransportError> {
        let event = self.channel.next_event()?;
        let kind = event.kind();
        let id = event.id();
        match kind {
            rdma_sys::rdma_cm_event_type::RDMA_CM_EVENT_CONNECT_REQUEST => {
                // Copy the negotiation parameters out before the
                // acknowledge invalidates the event.
                let requested = event.conn_param();
                event.ack()?;
                self.handle_connect_request(CmId::from_raw(id), &requested)
            }
            rdma_sys::rdma_cm_event_type::RDMA_CM_EVENT_ESTABLISHED => {
                event.ack()?;
                self.handle_established(id)
            }
            rdma_sys::rdma_cm_event_type::RDMA_CM_EVENT_DISCONNECTED => {
                event.ack()?;
                self.handle_disconnected(id)
            }
            other => {
                tracing::warn!(event = %event_type_str(other), "ignoring CM event");
                event.ack()
            }
        }
    }

    /// Number of slots currently in the connected state.
    pub fn connected_queues(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == QueueState::Connected)
            .count()
    }

    /// Registered arena length in bytes; zero before the first connect
    /// request arrives.
    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }

    /// The arena descriptor sent to clients; `None` before the arena is
    /// registered.
    pub fn descriptor(&self) -> Option<RemoteMemoryDescriptor> {
        self.descriptor
    }

    /// Disconnects every slot and releases the arena and listener.
    /// Equivalent to dropping the server.
    pub fn stop(mut self) {
        tracing::debug!(connected = self.connected_queues(), "stopping server endpoint");
        self.slots.clear();
    }

    fn handle_connect_request(
        &mut self,
        cm_id: CmId,
        requested: &rdma_sys::rdma_conn_param,
    ) -> Result<(), RdmaTransportError> {
        let slot = self.next_slot;
        assert!(
            slot < self.slots.len(),
            "connect request beyond configured queue count {}",
            self.slots.len()
        );
        assert_eq!(
            self.slots[slot].state,
            QueueState::Init,
            "connect request for an occupied slot"
        );
        self.next_slot += 1;
        tracing::debug!(slot, "connect request");

        let dom = match &self.domain {
            Some(d) => d,
            None => self.domain.insert(RdmaDomain::from_cm_id(&cm_id)?),
        };

        if self.arena_mr.is_none() {
            self.arena = vec![0u8; self.config.arena_size_bytes];
            let mr = MemoryRegion::register(dom.pd(), self.arena.as_mut_ptr(), self.arena.len())?;
            let desc = RemoteMemoryDescriptor {
                base_addr: mr.addr(),
                access_key: mr.rkey(),
            };
            tracing::info!(
                base_addr = format_args!("{:#x}", desc.base_addr),
                access_key = desc.access_key,
                arena_len = self.arena.len(),
                "registered far-memory arena"
            );
            self.arena_mr = Some(mr);
            self.descriptor = Some(desc);
        }
        let desc = match self.descriptor {
            Some(d) => d,
            None => return Err(RdmaTransportError::MissingDescriptor),
        };

        let comp = match &self.comp_channel {
            Some(c) => c,
            None => self.comp_channel.insert(CompChannel::new(cm_id.verbs())?),
        };

        let (cq, qp) = create_transport_resources(&cm_id, dom, comp, &self.config)?;

        // Echo the requester's negotiated limits and piggyback the arena
        // descriptor; librdmacm copies the private data before returning.
        let desc_bytes = desc.to_bytes();
        // SAFETY: zeroed param with the negotiated fields set explicitly.
        let mut param = unsafe { std::mem::zeroed::<rdma_sys::rdma_conn_param>() };
        param.responder_resources = requested.responder_resources;
        param.initiator_depth = requested.initiator_depth;
        param.flow_control = requested.flow_control;
        param.rnr_retry_count = requested.rnr_retry_count;
        param.private_data = desc_bytes.as_ptr() as *const c_void;
        param.private_data_len = desc_bytes.len() as u8;
        cm_id.accept(&mut param)?;

        self.slots[slot] = ServerSlot {
            state: QueueState::Connecting,
            qp: Some(qp),
            cq: Some(cq),
            cm_id: Some(cm_id),
        };
        Ok(())
    }

    fn handle_established(&mut self, id: *mut rdma_sys::rdma_cm_id) -> Result<(), RdmaTransportError> {
        match self.slots.iter_mut().position(|s| s.matches(id)) {
            Some(slot) => {
                self.slots[slot].state = QueueState::Connected;
                tracing::info!(slot, "connection established");
            }
            None => {
                tracing::warn!("established event for unknown connection id");
            }
        }
        Ok(())
    }

    fn handle_disconnected(&mut self, id: *mut rdma_sys::rdma_cm_id) -> Result<(), RdmaTransportError> {
        match self.slots.iter_mut().position(|s| s.matches(id)) {
            Some(slot) => {
                tracing::info!(slot, "connection disconnected");
                self.slots[slot].release();
            }
            None => {
                tracing::warn!("disconnect event for unknown connection id");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdma_supported;

    fn test_config() -> RdmaTransportConfig {
        RdmaTransportConfig {
            num_queues: 2,
            arena_size_bytes: 4096,
            ..Default::default()
        }
    }

    #[test]
    fn test_released_slot_returns_to_init() {
        let mut slot = ServerSlot::empty();
        slot.state = QueueState::Connected;
        slot.release();
        assert_eq!(slot.state, QueueState::Init);
        assert!(slot.qp.is_none());
        assert!(slot.cq.is_none());
        assert!(slot.cm_id.is_none());
    }

    #[test]
    fn test_serve_binds_without_arena() {
        if !rdma_supported() {
            println!("Skipping test: RDMA not supported on this system");
            return;
        }
        let config = RdmaTransportConfig {
            // Distinct port so concurrent tests do not collide.
            listen_port: 21911,
            ..test_config()
        };
        let server = match RdmaServer::serve(config) {
            Ok(s) => s,
            Err(_) => {
                println!("Skipping test: rdma_cm not available");
                return;
            }
        };
        // The arena is lazy; before any connect request there is nothing
        // pinned.
        assert_eq!(server.arena_len(), 0);
        assert!(server.descriptor().is_none());
        assert_eq!(server.connected_queues(), 0);
        server.stop();
    }
}

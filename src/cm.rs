/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Connection-manager driver.
//!
//! Wraps the librdmacm event protocol behind three owning types:
//!
//! * `EventChannel` - one event channel per endpoint, shared by every
//!   connection identifier created from it.
//! * `CmId` - one connection identifier (client queue, server slot, or
//!   server listener).
//! * `CmEvent` - a retrieved event. Events are acknowledged exactly once:
//!   either explicitly with `ack()` after the caller has copied out any
//!   event-carried data (private handshake bytes live in memory the
//!   acknowledge invalidates), or implicitly on drop. `wait_for_event`
//!   returns the event *without* acknowledging it for exactly this reason.
//!
//! Consuming events for one connection must not race consumption for
//! another on the same channel; bring-up is serialized by the endpoints.

use std::ffi::CStr;
use std::io::Error;
use std::net::SocketAddrV4;

use crate::error::RdmaTransportError;

/// Renders a CM event type through `rdma_event_str` for logs and errors.
pub(crate) fn event_type_str(event: rdma_sys::rdma_cm_event_type::Type) -> String {
    // SAFETY: rdma_event_str returns a pointer to a static string table.
    unsafe {
        let s = rdma_sys::rdma_event_str(event);
        if s.is_null() {
            return format!("unknown event ({})", event);
        }
        CStr::from_ptr(s).to_string_lossy().into_owned()
    }
}

pub(crate) fn sockaddr_in_from(addr: SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    }
}

/// Owning wrapper around an `rdma_event_channel`.
pub struct EventChannel {
    raw: *mut rdma_sys::rdma_event_channel,
}

// SAFETY: The channel pointer may be used and destroyed from any thread;
// librdmacm serializes access internally. The endpoints never consume events
// from two threads concurrently.
unsafe impl Send for EventChannel {}

impl EventChannel {
    pub fn new() -> Result<Self, RdmaTransportError> {
        // SAFETY: plain constructor call, null-checked below.
        let raw = unsafe { rdma_sys::rdma_create_event_channel() };
        if raw.is_null() {
            return Err(RdmaTransportError::EventChannel(Error::last_os_error()));
        }
        Ok(Self { raw })
    }

    pub(crate) fn as_ptr(&self) -> *mut rdma_sys::rdma_event_channel {
        self.raw
    }

    /// Blocks until the next event arrives on this channel and returns it
    /// un-acknowledged.
    pub fn next_event(&self) -> Result<CmEvent<'_>, RdmaTransportError> {
        let mut raw: *mut rdma_sys::rdma_cm_event = std::ptr::null_mut();
        // SAFETY: channel pointer is valid for the lifetime of self; the
        // out-pointer is written only on success.
        let rc = unsafe { rdma_sys::rdma_get_cm_event(self.raw, &mut raw) };
        if rc != 0 {
            return Err(RdmaTransportError::EventChannel(Error::last_os_error()));
        }
        Ok(CmEvent {
            raw,
            _channel: std::marker::PhantomData,
        })
    }

    /// Blocks for the next event and checks it against `expected`.
    ///
    /// A non-zero event status fails with `Status`; a wrong event type fails
    /// with `UnexpectedEvent`. In both failure cases the event is
    /// acknowledged before returning. On success the event is returned
    /// un-acknowledged so the caller may read event-carried data first.
    pub fn wait_for_event(
        &self,
        expected: rdma_sys::rdma_cm_event_type::Type,
    ) -> Result<CmEvent<'_>, RdmaTransportError> {
        let event = self.next_event()?;
        let status = event.status();
        if status != 0 {
            tracing::debug!(
                status,
                event = %event_type_str(event.kind()),
                "CM event carried non-zero status"
            );
            // Dropping the guard acknowledges the event.
            return Err(RdmaTransportError::Status { status });
        }
        if event.kind() != expected {
            let actual = event_type_str(event.kind());
            tracing::debug!(
                actual = %actual,
                expected = %event_type_str(expected),
                "unexpected CM event"
            );
            return Err(RdmaTransportError::UnexpectedEvent {
                expected: event_type_str(expected),
                actual,
            });
        }
        Ok(event)
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        // SAFETY: raw is non-null and owned; all ids created from this
        // channel are destroyed before the endpoint drops the channel.
        unsafe {
            rdma_sys::rdma_destroy_event_channel(self.raw);
        }
    }
}

/// A retrieved connection-manager event, valid until acknowledged.
///
/// The borrow of the channel prevents the channel from being destroyed while
/// an event from it is outstanding. Private handshake data returned by
/// `private_data` borrows from the event itself and must be copied out
/// before `ack`.
pub struct CmEvent<'a> {
    raw: *mut rdma_sys::rdma_cm_event,
    _channel: std::marker::PhantomData<&'a EventChannel>,
}

impl CmEvent<'_> {
    pub fn kind(&self) -> rdma_sys::rdma_cm_event_type::Type {
        // SAFETY: raw is valid until acknowledged.
        unsafe { (*self.raw).event }
    }

    pub fn status(&self) -> i32 {
        // SAFETY: raw is valid until acknowledged.
        unsafe { (*self.raw).status }
    }

    /// The connection identifier this event refers to. For a connect
    /// request this is the passively created identifier for the new
    /// connection, which the acceptor takes ownership of.
    pub fn id(&self) -> *mut rdma_sys::rdma_cm_id {
        // SAFETY: raw is valid until acknowledged.
        unsafe { (*self.raw).id }
    }

    /// Copy of the connection negotiation parameters carried by the event.
    /// The embedded `private_data` pointer is only valid until `ack`.
    pub fn conn_param(&self) -> rdma_sys::rdma_conn_param {
        // SAFETY: raw is valid until acknowledged; the union member `conn`
        // is the active one for connection-oriented port spaces.
        unsafe { (*self.raw).param.conn }
    }

    /// Private handshake bytes piggybacked on this event, if any.
    pub fn private_data(&self) -> Option<&[u8]> {
        // SAFETY: raw is valid until acknowledged; private_data/len describe
        // a buffer owned by the event.
        unsafe {
            let conn = &(*self.raw).param.conn;
            if conn.private_data.is_null() || conn.private_data_len == 0 {
                return None;
            }
            Some(std::slice::from_raw_parts(
                conn.private_data as *const u8,
                conn.private_data_len as usize,
            ))
        }
    }

    /// Acknowledges the event, invalidating any borrowed event data.
    pub fn ack(mut self) -> Result<(), RdmaTransportError> {
        // SAFETY: raw is non-null (cleared below so Drop does not double-ack).
        let rc = unsafe { rdma_sys::rdma_ack_cm_event(self.raw) };
        self.raw = std::ptr::null_mut();
        if rc != 0 {
            return Err(RdmaTransportError::EventChannel(Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for CmEvent<'_> {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // SAFETY: raw is valid and un-acknowledged.
            unsafe {
                rdma_sys::rdma_ack_cm_event(self.raw);
            }
        }
    }
}

/// Owning wrapper around an `rdma_cm_id`.
///
/// Destroying the identifier is all this guard does; the queue pair bound to
/// it is owned by a separate guard so that teardown can destroy the queue
/// pair, then the completion queue, then the identifier, in that order.
pub struct CmId {
    raw: *mut rdma_sys::rdma_cm_id,
}

// SAFETY: the identifier may be driven and destroyed from any thread; each
// CmId is exclusively owned by one queue or endpoint.
unsafe impl Send for CmId {}

impl CmId {
    /// Creates a fresh identifier bound to `channel`, reliable
    /// connection-oriented port space.
    pub fn new(channel: &EventChannel) -> Result<Self, RdmaTransportError> {
        let mut raw: *mut rdma_sys::rdma_cm_id = std::ptr::null_mut();
        // SAFETY: out-pointer is written only on success.
        let rc = unsafe {
            rdma_sys::rdma_create_id(
                channel.as_ptr(),
                &mut raw,
                std::ptr::null_mut(),
                rdma_sys::rdma_port_space::RDMA_PS_TCP,
            )
        };
        if rc != 0 {
            return Err(RdmaTransportError::last_os_error_resource("rdma_create_id"));
        }
        Ok(Self { raw })
    }

    /// Takes ownership of a passively created identifier (from a connect
    /// request event).
    pub(crate) fn from_raw(raw: *mut rdma_sys::rdma_cm_id) -> Self {
        Self { raw }
    }

    pub(crate) fn as_ptr(&self) -> *mut rdma_sys::rdma_cm_id {
        self.raw
    }

    /// The verbs context of the device this identifier resolved to. Only
    /// valid after address resolution (client) or on a connect-request
    /// identifier (server).
    pub(crate) fn verbs(&self) -> *mut rdma_sys::ibv_context {
        // SAFETY: raw is valid for the lifetime of self.
        unsafe { (*self.raw).verbs }
    }

    pub fn resolve_addr(
        &self,
        server: SocketAddrV4,
        timeout_ms: i32,
    ) -> Result<(), RdmaTransportError> {
        let mut dst = sockaddr_in_from(server);
        // SAFETY: dst outlives the call; librdmacm copies the address.
        let rc = unsafe {
            rdma_sys::rdma_resolve_addr(
                self.raw,
                std::ptr::null_mut(),
                &mut dst as *mut libc::sockaddr_in as *mut libc::sockaddr,
                timeout_ms,
            )
        };
        if rc != 0 {
            return Err(RdmaTransportError::last_os_error_resource(
                "rdma_resolve_addr",
            ));
        }
        Ok(())
    }

    pub fn resolve_route(&self, timeout_ms: i32) -> Result<(), RdmaTransportError> {
        // SAFETY: raw is valid; address resolution has completed.
        let rc = unsafe { rdma_sys::rdma_resolve_route(self.raw, timeout_ms) };
        if rc != 0 {
            return Err(RdmaTransportError::last_os_error_resource(
                "rdma_resolve_route",
            ));
        }
        Ok(())
    }

    pub fn connect(
        &self,
        param: &mut rdma_sys::rdma_conn_param,
    ) -> Result<(), RdmaTransportError> {
        // SAFETY: raw is valid; param outlives the call.
        let rc = unsafe { rdma_sys::rdma_connect(self.raw, param) };
        if rc != 0 {
            return Err(RdmaTransportError::last_os_error_resource("rdma_connect"));
        }
        Ok(())
    }

    pub fn accept(
        &self,
        param: &mut rdma_sys::rdma_conn_param,
    ) -> Result<(), RdmaTransportError> {
        // SAFETY: raw is valid; param (and the private data it points at)
        // outlives the call, librdmacm copies the payload before returning.
        let rc = unsafe { rdma_sys::rdma_accept(self.raw, param) };
        if rc != 0 {
            return Err(RdmaTransportError::last_os_error_resource("rdma_accept"));
        }
        Ok(())
    }

    pub fn bind(&self, port: u16) -> Result<(), RdmaTransportError> {
        let mut addr = sockaddr_in_from(SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, port));
        // SAFETY: addr outlives the call.
        let rc = unsafe {
            rdma_sys::rdma_bind_addr(
                self.raw,
                &mut addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
            )
        };
        if rc != 0 {
            return Err(RdmaTransportError::last_os_error_resource("rdma_bind_addr"));
        }
        Ok(())
    }

    pub fn listen(&self, backlog: i32) -> Result<(), RdmaTransportError> {
        // SAFETY: raw is valid and bound.
        let rc = unsafe { rdma_sys::rdma_listen(self.raw, backlog) };
        if rc != 0 {
            return Err(RdmaTransportError::last_os_error_resource("rdma_listen"));
        }
        Ok(())
    }

    /// Initiates disconnect. Failures are ignored: by the time this is
    /// called the connection is being torn down anyway.
    pub fn disconnect(&self) {
        // SAFETY: raw is valid; disconnect on a non-connected id is a no-op
        // error librdmacm tolerates.
        unsafe {
            rdma_sys::rdma_disconnect(self.raw);
        }
    }
}

impl Drop for CmId {
    fn drop(&mut self) {
        // SAFETY: raw is owned; any queue pair bound to this id has already
        // been destroyed by its own guard.
        unsafe {
            rdma_sys::rdma_destroy_id(self.raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn test_sockaddr_conversion() {
        let sa = sockaddr_in_from(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 20886));
        assert_eq!(sa.sin_family, libc::AF_INET as libc::sa_family_t);
        assert_eq!(u16::from_be(sa.sin_port), 20886);
        assert_eq!(sa.sin_addr.s_addr.to_ne_bytes(), [10, 0, 0, 1]);
    }

    #[test]
    fn test_event_channel_create_and_destroy() {
        // Skip test if the rdma_cm device is not available
        let channel = match EventChannel::new() {
            Ok(c) => c,
            Err(_) => {
                println!("Skipping test: rdma_cm not available");
                return;
            }
        };
        drop(channel);
    }

    #[test]
    fn test_cm_id_create_and_destroy() {
        // Skip test if the rdma_cm device is not available
        let channel = match EventChannel::new() {
            Ok(c) => c,
            Err(_) => {
                println!("Skipping test: rdma_cm not available");
                return;
            }
        };
        let id = CmId::new(&channel);
        assert!(id.is_ok());
    }
}

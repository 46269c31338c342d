/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Error taxonomy for the far-memory transport.
//!
//! Setup-phase errors (`Allocation`, `EventChannel`, `Status`,
//! `UnexpectedEvent`, `TransportResource`, `Timeout`) are fatal to the queue
//! being established and are routed through the bring-up rollback path;
//! steady-state errors (`RemoteOperation`, `PostSend`, `CompletionPoll`) are
//! returned to the caller and leave the rest of the endpoint untouched.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RdmaTransportError {
    /// Device context, protection domain, buffer, or memory-region
    /// registration failed.
    #[error("resource allocation failed ({context}): {source}")]
    Allocation {
        context: &'static str,
        source: io::Error,
    },

    /// Retrieving or acknowledging an event on the connection-manager event
    /// channel failed.
    #[error("event channel failure: {0}")]
    EventChannel(#[source] io::Error),

    /// A connection-manager event carried a non-zero status. This is also
    /// the shape a remote rejection takes.
    #[error("connection-manager event carried non-zero status {status}")]
    Status { status: i32 },

    /// An event of a different type arrived where a specific one was
    /// required by the connection state machine.
    #[error("unexpected connection-manager event: got {actual}, expected {expected}")]
    UnexpectedEvent { expected: String, actual: String },

    /// Completion-queue or queue-pair creation failed.
    #[error("transport resource creation failed ({context}): {source}")]
    TransportResource {
        context: &'static str,
        source: io::Error,
    },

    /// An established connection delivered no remote memory descriptor in
    /// its handshake private data.
    #[error("connection handshake carried no usable memory descriptor")]
    MissingDescriptor,

    /// Posting the work request to the send queue failed.
    #[error("posting work request failed: {0}")]
    PostSend(#[source] io::Error),

    /// Polling the completion queue failed outright.
    #[error("polling completion queue failed: {0}")]
    CompletionPoll(#[source] io::Error),

    /// A remote read/write completed with a non-success completion status.
    /// Carries the verbs status code and its string form. The queue remains
    /// connected; retry is the caller's policy.
    #[error("remote operation failed with completion status {status} ({status_str})")]
    RemoteOperation { status: u32, status_str: String },

    /// A deadline elapsed: address/route resolution, or (when configured)
    /// completion polling.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// A remote operation was issued on a queue that is not connected.
    #[error("queue is not connected")]
    NotConnected,

    /// The requested transfer does not fit the queue's registered segment.
    #[error("transfer length {len} exceeds segment capacity {max}")]
    LengthExceedsSegment { len: usize, max: usize },
}

impl RdmaTransportError {
    pub(crate) fn last_os_error_alloc(context: &'static str) -> Self {
        Self::Allocation {
            context,
            source: io::Error::last_os_error(),
        }
    }

    pub(crate) fn last_os_error_resource(context: &'static str) -> Self {
        Self::TransportResource {
            context,
            source: io::Error::last_os_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RdmaTransportError::LengthExceedsSegment {
            len: 100_000,
            max: 65536,
        };
        assert_eq!(
            err.to_string(),
            "transfer length 100000 exceeds segment capacity 65536"
        );

        let err = RdmaTransportError::UnexpectedEvent {
            expected: "RDMA_CM_EVENT_ESTABLISHED".to_string(),
            actual: "RDMA_CM_EVENT_REJECTED".to_string(),
        };
        assert!(err.to_string().contains("RDMA_CM_EVENT_REJECTED"));

        let err = RdmaTransportError::Status { status: -110 };
        assert!(err.to_string().contains("-110"));
    }

    #[test]
    fn test_remote_operation_carries_status() {
        let err = RdmaTransportError::RemoteOperation {
            status: 12,
            status_str: "transport retry counter exceeded".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("12"));
        assert!(rendered.contains("transport retry counter exceeded"));
    }
}

/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Symmetric RDMA client/server transport for far memory.
//!
//! The server pins one large arena and exports it; the client establishes a
//! set of independent reliable connections ("queues") to it and performs
//! offset-addressed one-sided reads and writes. After connection
//! establishment the server's CPU is out of the data path entirely.
//!
//! ```no_run
//! use farmem_rdma::RdmaClient;
//! use farmem_rdma::RdmaTransportConfig;
//!
//! # fn main() -> Result<(), farmem_rdma::RdmaTransportError> {
//! let config = RdmaTransportConfig::default();
//! let mut client = RdmaClient::connect("10.0.0.1".parse().unwrap(), config)?;
//! let queue = client.queue_mut(0).unwrap();
//! queue.remote_write(0, b"hello")?;
//! let mut buf = [0u8; 5];
//! queue.remote_read(0, &mut buf)?;
//! # Ok(())
//! # }
//! ```

// RDMA requires frequent unsafe code blocks
#![allow(clippy::undocumented_unsafe_blocks)]

mod client;
mod cm;
mod config;
mod error;
mod rdma_components;
mod server;

pub use client::RdmaClient;
pub use cm::CmId;
pub use cm::EventChannel;
pub use config::RdmaTransportConfig;
pub use error::RdmaTransportError;
pub use rdma_components::MemoryRegion;
pub use rdma_components::QueueState;
pub use rdma_components::RdmaDomain;
pub use rdma_components::RdmaQueue;
pub use rdma_components::RemoteMemoryDescriptor;
pub use rdma_components::rdma_supported;
pub use server::RdmaServer;

#[cfg(test)]
mod loopback_tests;

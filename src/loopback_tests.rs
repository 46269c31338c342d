/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! End-to-end loopback tests: a server endpoint on one thread, a client on
//! the test thread, connected over 127.0.0.1. These require an RDMA device
//! that supports loopback (hardware or a soft-RoCE rxe device) and skip
//! themselves otherwise.

use std::net::Ipv4Addr;
use std::sync::mpsc;

use crate::RdmaClient;
use crate::RdmaServer;
use crate::RdmaTransportConfig;
use crate::RdmaTransportError;
use crate::rdma_supported;

fn loopback_config(listen_port: u16) -> RdmaTransportConfig {
    RdmaTransportConfig {
        listen_port,
        num_queues: 2,
        arena_size_bytes: 4096,
        // Loopback tests should fail rather than spin forever if the
        // device wedges.
        completion_timeout_ms: Some(5_000),
        ..Default::default()
    }
}

/// Runs the server side: accept every queue, then drain events until the
/// client has disconnected them all.
fn run_server(
    config: RdmaTransportConfig,
    ready: mpsc::Sender<Result<(), String>>,
) -> Result<(), RdmaTransportError> {
    let mut server = match RdmaServer::serve(config) {
        Ok(s) => s,
        Err(err) => {
            let _ = ready.send(Err(err.to_string()));
            return Err(err);
        }
    };
    let _ = ready.send(Ok(()));
    server.accept_all()?;
    while server.connected_queues() > 0 {
        server.handle_next_event()?;
    }
    server.stop();
    Ok(())
}

#[test]
fn test_loopback_write_then_read() {
    if !rdma_supported() {
        println!("Skipping test: RDMA not supported on this system");
        return;
    }
    let config = loopback_config(21886);
    let (ready_tx, ready_rx) = mpsc::channel();
    let server_config = config.clone();
    let server = std::thread::spawn(move || run_server(server_config, ready_tx));

    match ready_rx.recv() {
        Ok(Ok(())) => {}
        _ => {
            println!("Skipping test: rdma_cm not available");
            let _ = server.join();
            return;
        }
    }

    let mut client = match RdmaClient::connect(Ipv4Addr::LOCALHOST, config) {
        Ok(c) => c,
        Err(err) => {
            println!("Skipping test: loopback connect failed ({err})");
            let _ = server.join();
            return;
        }
    };
    assert_eq!(client.num_queues(), 2);
    assert!(client.server_descriptor().is_some());

    let queue = client.queue_mut(0).unwrap();
    queue.remote_write(128, b"TEST").unwrap();
    let mut readback = [0u8; 4];
    queue.remote_read(128, &mut readback).unwrap();
    assert_eq!(&readback, b"TEST");

    // The arena is shared: a write through queue 0 is visible through
    // queue 1.
    let other = client.queue_mut(1).unwrap();
    let mut cross = [0u8; 4];
    other.remote_read(128, &mut cross).unwrap();
    assert_eq!(&cross, b"TEST");

    client.close();
    server.join().unwrap().unwrap();
}

#[test]
fn test_loopback_concurrent_queues_are_isolated() {
    if !rdma_supported() {
        println!("Skipping test: RDMA not supported on this system");
        return;
    }
    let config = loopback_config(21888);
    let (ready_tx, ready_rx) = mpsc::channel();
    let server_config = config.clone();
    let server = std::thread::spawn(move || run_server(server_config, ready_tx));

    match ready_rx.recv() {
        Ok(Ok(())) => {}
        _ => {
            println!("Skipping test: rdma_cm not available");
            let _ = server.join();
            return;
        }
    }

    let mut client = match RdmaClient::connect(Ipv4Addr::LOCALHOST, config) {
        Ok(c) => c,
        Err(err) => {
            println!("Skipping test: loopback connect failed ({err})");
            let _ = server.join();
            return;
        }
    };

    // Every queue of one client carries the same arena descriptor.
    let desc = client.server_descriptor().unwrap();
    let (first, second) = client.queues_mut().split_at_mut(1);
    let q0 = &mut first[0];
    let q1 = &mut second[0];
    assert_eq!(q0.server_descriptor(), desc);
    assert_eq!(q1.server_descriptor(), desc);

    // Hammer disjoint arena regions from two threads at once; neither
    // queue's traffic may bleed into the other's region.
    std::thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..64 {
                q0.remote_write(0, &[0xAA; 512]).unwrap();
            }
        });
        scope.spawn(|| {
            for _ in 0..64 {
                q1.remote_write(2048, &[0x55; 512]).unwrap();
            }
        });
    });

    let mut low = [0u8; 512];
    let mut high = [0u8; 512];
    let queue = client.queue_mut(0).unwrap();
    queue.remote_read(0, &mut low).unwrap();
    queue.remote_read(2048, &mut high).unwrap();
    assert_eq!(low, [0xAA; 512]);
    assert_eq!(high, [0x55; 512]);

    client.close();
    server.join().unwrap().unwrap();
}

#[test]
fn test_loopback_rejects_oversized_transfer() {
    if !rdma_supported() {
        println!("Skipping test: RDMA not supported on this system");
        return;
    }
    let config = RdmaTransportConfig {
        num_queues: 1,
        segment_size_bytes: 1024,
        ..loopback_config(21887)
    };
    let (ready_tx, ready_rx) = mpsc::channel();
    let server_config = config.clone();
    let server = std::thread::spawn(move || run_server(server_config, ready_tx));

    match ready_rx.recv() {
        Ok(Ok(())) => {}
        _ => {
            println!("Skipping test: rdma_cm not available");
            let _ = server.join();
            return;
        }
    }

    let mut client = match RdmaClient::connect(Ipv4Addr::LOCALHOST, config) {
        Ok(c) => c,
        Err(err) => {
            println!("Skipping test: loopback connect failed ({err})");
            let _ = server.join();
            return;
        }
    };

    let queue = client.queue_mut(0).unwrap();
    let too_big = vec![0u8; 2048];
    match queue.remote_write(0, &too_big) {
        Err(RdmaTransportError::LengthExceedsSegment { len, max }) => {
            assert_eq!(len, 2048);
            assert_eq!(max, 1024);
        }
        other => panic!("expected LengthExceedsSegment, got {other:?}"),
    }
    // Zero-length transfers are rejected too.
    assert!(queue.remote_write(0, &[]).is_err());

    client.close();
    server.join().unwrap().unwrap();
}

//! Fan-out of one frame to every registered connection except its sender.

use std::net::SocketAddr;

use thiserror::Error;
use tracing::debug;

use crate::{
    frame::{EncodedFrame, FrameError},
    registry::{ConnectionId, Registry},
};

/// A target that could not be written to during a broadcast.
#[derive(Debug)]
pub struct FailedTarget {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub error: FrameError,
}

#[derive(Debug, Error)]
#[error("broadcast reached {delivered} connection(s) but failed for {}", .failed.len())]
pub struct SendFailure {
    pub delivered: usize,
    pub failed: Vec<FailedTarget>,
}

/// Delivers `frame` to every member of `registry` other than `sender`.
///
/// Targets are written one after another in registry order and each is tried
/// exactly once, even after an earlier target failed. Failed targets are
/// removed from the registry and their write half is shut down; their own
/// handlers notice the dead socket on their next read. Returns the number of
/// connections that received the frame.
pub async fn broadcast(
    registry: &Registry,
    sender: ConnectionId,
    frame: &EncodedFrame,
) -> Result<usize, SendFailure> {
    let mut delivered = 0;
    let mut failed = Vec::new();

    for target in registry.snapshot() {
        if target.id() == sender {
            continue;
        }

        match target.send(frame).await {
            Ok(()) => delivered += 1,
            Err(error) => {
                registry.remove(target.id());
                if let Err(close_error) = target.close().await {
                    debug!(peer = %target.peer(), error = ?close_error, "failed to close dead target");
                }
                failed.push(FailedTarget {
                    id: target.id(),
                    peer: target.peer(),
                    error,
                });
            }
        }
    }

    if failed.is_empty() {
        Ok(delivered)
    } else {
        Err(SendFailure { delivered, failed })
    }
}

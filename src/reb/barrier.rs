//! Peer liveness probing and the cluster-wide termination barrier.
//!
//! Before kickoff every peer is pinged with an exponentially widening
//! timeout. After the initiator finishes its own rebalance it waits, per
//! peer, for (1) the peer's cluster map to catch up to the rebalanced
//! version, (2) a fixed settling delay, and (3) the peer's health endpoint
//! to stop reporting an active rebalance. A peer that becomes unreachable
//! is declared down and no longer blocks the barrier.

use crate::cluster::smap::Smap;
use crate::config::Config;
use crate::error::Error;
use crate::net::client::call;
use crate::net::message::Message;
use crate::types::{TargetId, TargetInfo};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Probe a peer's health endpoint until it answers or the retry budget
/// runs out. The per-call timeout widens by half each attempt, capped at
/// `max_keepalive`; the total budget is `dest_retry_time`.
pub async fn ping_target(self_id: &TargetId, peer: &TargetInfo, config: &Config) -> bool {
    let mut timeout = config.timeout.keepalive;
    let retries = (config.rebalance.dest_retry_time.as_millis()
        / config.timeout.keepalive.as_millis().max(1))
    .max(1) as u64;

    for attempt in 1..=retries {
        match call(
            peer.control_addr,
            &Message::HealthQuery {
                from_id: self_id.clone(),
            },
            timeout,
        )
        .await
        {
            Ok(Message::HealthStatus(_)) => {
                info!(peer = %peer, "peer is online");
                return true;
            }
            Ok(other) => {
                warn!(peer = %peer, response = ?other, "unexpected health response");
            }
            Err(e) => {
                info!(attempt, peer = %peer, error = %e, "peer is offline, retrying");
            }
        }
        timeout = (timeout + timeout / 2).min(config.timeout.max_keepalive);
        tokio::time::sleep(config.timeout.keepalive_retry).await;
    }
    false
}

/// Wait for one peer to complete the rebalance toward `smap_version`.
pub async fn wait_for_rebalance_finish(
    self_id: &TargetId,
    peer: &TargetInfo,
    smap_version: u64,
    config: &Config,
) {
    // Phase 1: poll until the peer's cluster map is at least our version.
    loop {
        let mut res = call(peer.control_addr, &Message::SmapQuery, config.timeout.default).await;
        if matches!(res, Err(Error::Timeout)) {
            // One retry with a doubled keepalive timeout.
            res = call(
                peer.control_addr,
                &Message::SmapQuery,
                config.timeout.keepalive * 2,
            )
            .await;
        }
        match res {
            Ok(Message::SmapResponse(smap)) => {
                if smap.version() >= smap_version {
                    break;
                }
            }
            Ok(other) => {
                error!(peer = %peer, response = ?other, "unexpected cluster-map response");
                return;
            }
            Err(e) => {
                error!(peer = %peer, error = %e, "failed to call peer, assuming down/unavailable");
                return;
            }
        }
        tokio::time::sleep(config.timeout.keepalive_retry).await;
    }

    // Phase 2: give the peer time to notice its own need to rebalance.
    tokio::time::sleep(config.rebalance.neighbor_start_delay).await;

    // Phase 3: poll health until the peer stops rebalancing.
    loop {
        match call(
            peer.control_addr,
            &Message::HealthQuery {
                from_id: self_id.clone(),
            },
            config.timeout.default,
        )
        .await
        {
            Ok(Message::HealthStatus(status)) => {
                if !status.is_rebalancing {
                    break;
                }
            }
            Ok(other) => {
                error!(peer = %peer, response = ?other, "unexpected health response");
                break;
            }
            Err(e) => {
                error!(peer = %peer, error = %e, "failed to call peer, assuming down/unavailable");
                break;
            }
        }
        info!(peer = %peer, "waiting for rebalance");
        tokio::time::sleep(config.timeout.keepalive_retry).await;
    }
}

/// Fan the wait out to every peer; returns when all have completed (or
/// were declared unreachable).
pub async fn poll_rebalancing_done(smap: &Smap, config: &Arc<Config>) {
    let mut waits = JoinSet::new();
    for peer in smap.peers_of(&config.target_id) {
        let peer = peer.clone();
        let config = config.clone();
        let version = smap.version();
        waits.spawn(async move {
            wait_for_rebalance_finish(&config.target_id, &peer, version, &config).await;
        });
    }
    while waits.join_next().await.is_some() {}
}

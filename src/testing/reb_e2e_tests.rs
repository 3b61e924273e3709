//! End-to-end rebalance tests over in-process targets.
//!
//! Each test spins real targets — control server, receiver, manager — on
//! loopback ports and drives a rebalance across them, then checks object
//! placement, counters, markers, and lock balance.

#[cfg(test)]
mod tests {
    use crate::cluster::bucket::{Bck, Provider};
    use crate::cluster::placement::target_for;
    use crate::cluster::smap::Smap;
    use crate::reb::manager::GLOBAL_REB_MARKER;
    use crate::reb::xaction::KIND_GLOBAL;
    use crate::stats::{REB_GLOBAL_COUNT, REB_GLOBAL_SIZE, RX_COUNT, RX_SIZE};
    use crate::testing::{make_smap, wait_for, TestTarget};
    use std::time::Duration;

    /// Object names from `pool` that `smap` places on `owner`.
    fn names_owned_by(bck: &Bck, smap: &Smap, owner: &str, want: usize) -> Vec<String> {
        let mut names = Vec::new();
        for i in 0.. {
            let name = format!("shard/{i:05}.blob");
            if target_for(bck, &name, smap).unwrap().id == owner {
                names.push(name);
                if names.len() == want {
                    break;
                }
            }
        }
        names
    }

    #[tokio::test]
    async fn test_global_rebalance_moves_misplaced_objects() {
        crate::testing::init_logging();
        let base = tempfile::tempdir().unwrap();
        let a = TestTarget::spawn("a", base.path(), 2).await.unwrap();
        let b = TestTarget::spawn("b", base.path(), 2).await.unwrap();
        let smap = make_smap(7, &[&a, &b]);

        let bck = Bck::new("bench", Provider::Ais);
        let to_b = names_owned_by(&bck, &smap, "b", 5);
        let stays = names_owned_by(&bck, &smap, "a", 3);

        let mut moved_bytes = 0i64;
        for (i, name) in to_b.iter().enumerate() {
            let body = format!("payload of {name} {}", "x".repeat(i)).into_bytes();
            moved_bytes += body.len() as i64;
            a.put_object(&bck, name, &body).await.unwrap();
        }
        for name in &stays {
            a.put_object(&bck, name, b"stays put").await.unwrap();
        }

        a.manager.run_global(smap.clone(), None).await.unwrap();

        for name in &to_b {
            assert!(b.has_object(&bck, name).await, "{name} not committed on b");
            assert!(!a.has_object(&bck, name).await, "{name} still on a");
        }
        for name in &stays {
            assert!(a.has_object(&bck, name).await, "{name} vanished from a");
        }

        // Moved == received, cluster-wide.
        assert_eq!(a.stats.get(REB_GLOBAL_COUNT), to_b.len() as i64);
        assert_eq!(a.stats.get(REB_GLOBAL_SIZE), moved_bytes);
        assert_eq!(b.stats.get(RX_COUNT), to_b.len() as i64);
        assert_eq!(b.stats.get(RX_SIZE), moved_bytes);

        // Clean completion removed the marker, and the registry is idle.
        assert!(!a.manager.marker_present(KIND_GLOBAL).await);
        assert!(!a.manager.is_rebalancing());

        // Lock registry balanced: every name is write-lockable again.
        for name in to_b.iter().chain(stays.iter()) {
            let uname = bck.make_uname(name);
            let guard = tokio::time::timeout(Duration::from_secs(1), a.locker.wlock(&uname))
                .await
                .expect("lock leaked by rebalance");
            drop(guard);
        }
    }

    #[tokio::test]
    async fn test_second_run_against_same_snapshot_is_noop() {
        let base = tempfile::tempdir().unwrap();
        let a = TestTarget::spawn("a", base.path(), 1).await.unwrap();
        let b = TestTarget::spawn("b", base.path(), 1).await.unwrap();
        let smap = make_smap(4, &[&a, &b]);

        let bck = Bck::new("bench", Provider::Ais);
        for name in names_owned_by(&bck, &smap, "b", 4) {
            a.put_object(&bck, &name, b"once").await.unwrap();
        }

        a.manager.run_global(smap.clone(), None).await.unwrap();
        let moved = a.stats.get(REB_GLOBAL_COUNT);
        let received = b.stats.get(RX_COUNT);
        assert_eq!(moved, 4);

        a.manager.run_global(smap.clone(), None).await.unwrap();
        assert_eq!(a.stats.get(REB_GLOBAL_COUNT), moved, "objects moved twice");
        assert_eq!(b.stats.get(RX_COUNT), received, "objects received twice");
    }

    #[tokio::test]
    async fn test_every_object_streams_to_single_new_peer_once() {
        let base = tempfile::tempdir().unwrap();
        let a = TestTarget::spawn("a", base.path(), 2).await.unwrap();
        let b = TestTarget::spawn("b", base.path(), 1).await.unwrap();
        let smap = make_smap(9, &[&a, &b]);

        let bck = Bck::new("bench", Provider::Gcp);
        let names = names_owned_by(&bck, &smap, "b", 12);
        for name in &names {
            a.put_object(&bck, name, b"going to b").await.unwrap();
        }

        a.manager.run_global(smap, None).await.unwrap();

        assert_eq!(b.stats.get(RX_COUNT), names.len() as i64);
        for name in &names {
            assert!(b.has_object(&bck, name).await);
        }
    }

    #[tokio::test]
    async fn test_foreground_writer_interlocks_with_walker() {
        let base = tempfile::tempdir().unwrap();
        let a = TestTarget::spawn("a", base.path(), 1).await.unwrap();
        let b = TestTarget::spawn("b", base.path(), 1).await.unwrap();
        let smap = make_smap(5, &[&a, &b]);

        let bck = Bck::new("bench", Provider::Ais);
        let name = names_owned_by(&bck, &smap, "b", 1).remove(0);
        a.put_object(&bck, &name, b"contended").await.unwrap();

        // Foreground mutator holds the write side.
        let wlock = a.locker.wlock(&bck.make_uname(&name)).await;

        let manager = a.manager.clone();
        let run = tokio::spawn(async move { manager.run_global(smap, None).await });

        // The walker must block on the read side and the run must not
        // conclude while the writer holds the name.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!run.is_finished(), "rebalance finished past a held write lock");

        drop(wlock);
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("rebalance finished after release")
            .unwrap()
            .unwrap();

        assert!(b.has_object(&bck, &name).await);
        assert_eq!(b.stats.get(RX_COUNT), 1);
    }

    #[tokio::test]
    async fn test_abort_mid_walk_preserves_marker() {
        let base = tempfile::tempdir().unwrap();
        let a = TestTarget::spawn("a", base.path(), 2).await.unwrap();
        let b = TestTarget::spawn("b", base.path(), 1).await.unwrap();
        let smap = make_smap(6, &[&a, &b]);

        let bck = Bck::new("bench", Provider::Ais);
        let names = names_owned_by(&bck, &smap, "b", 20);
        for name in &names {
            a.put_object(&bck, name, b"abortable").await.unwrap();
        }

        // Pin every name with a write lock so walkers park at their first
        // entry and the abort lands mid-walk, deterministically.
        let mut guards = Vec::new();
        for name in &names {
            guards.push(a.locker.wlock(&bck.make_uname(name)).await);
        }

        let manager = a.manager.clone();
        let run = tokio::spawn(async move { manager.run_global(smap, None).await });

        assert!(
            wait_for(|| a.manager.is_rebalancing(), Duration::from_secs(2)).await,
            "activity never started"
        );
        let xact = a.manager.xactions().running_global().expect("running activity");
        xact.abort();
        drop(guards);

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("aborted rebalance wound down")
            .unwrap()
            .unwrap();

        assert!(xact.aborted());
        // In-flight sends completed; the traversal stopped at the next
        // entry boundary, so most objects never moved.
        assert!(b.stats.get(RX_COUNT) < names.len() as i64);
        // Abort preserves the marker as evidence for the next startup.
        assert!(a.manager.marker_present(KIND_GLOBAL).await);
        assert!(a
            .manager
            .marker_path(KIND_GLOBAL)
            .ends_with(GLOBAL_REB_MARKER));

        // Locks balanced even on the abort path.
        for name in &names {
            let uname = bck.make_uname(name);
            drop(
                tokio::time::timeout(Duration::from_secs(1), a.locker.wlock(&uname))
                    .await
                    .expect("lock leaked on abort path"),
            );
        }
    }

    #[tokio::test]
    async fn test_newcomer_waits_for_slow_peer() {
        let base = tempfile::tempdir().unwrap();
        let a = TestTarget::spawn("a", base.path(), 1).await.unwrap();
        let b = TestTarget::spawn("b", base.path(), 1).await.unwrap();
        let smap = make_smap(8, &[&a, &b]);

        // Peer b reports an active rebalance for a while.
        let b_xact = b.manager.xactions().renew_local().expect("local activity");
        let slow = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            b_xact.set_end_time(std::time::Instant::now());
        });

        let started = std::time::Instant::now();
        a.manager
            .run_global(smap, Some("a"))
            .await
            .unwrap();
        let elapsed = started.elapsed();
        slow.await.unwrap();

        // The initiator's barrier polled b through phases 1-3.
        assert!(
            elapsed >= Duration::from_millis(250),
            "barrier returned before the peer quiesced: {elapsed:?}"
        );
        assert!(!b.manager.is_rebalancing());
        assert!(!a.manager.marker_present(KIND_GLOBAL).await);
    }
}

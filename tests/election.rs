//! End-to-end election scenarios against the in-memory lease store.
//!
//! All tests run with a paused clock so settle delays, retry spacing and
//! renewal intervals elapse deterministically and instantly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use elector::testing::lease_record;
use elector::testing::MemLeaseApi;
use elector::Config;
use elector::Elector;
use elector::Identity;
use elector::LeaderEvent;
use elector::LeaseApi;
use elector::LogAtLevel;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config(await_leadership: bool) -> Arc<Config> {
    init_tracing();

    Arc::new(Config {
        lease_name: "L".to_string(),
        namespace: "N".to_string(),
        renewal_interval: 1000,
        log_at_level: LogAtLevel::Debug,
        await_leadership,
    })
}

fn host_a() -> Identity {
    Identity::from_hostname("hostA")
}

fn elector_on(store: &Arc<MemLeaseApi>, config: Arc<Config>) -> Elector {
    Elector::new(host_a(), config, Some(store.clone() as Arc<dyn LeaseApi>))
}

fn drain(rx: &mut broadcast::Receiver<LeaderEvent>) -> Vec<LeaderEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn holder_of(store: &MemLeaseApi) -> Option<String> {
    store.lease("N", "L").and_then(|l| l.spec.and_then(|s| s.holder_identity))
}

#[tokio::test(start_paused = true)]
async fn test_cold_start_creates_lease_and_elects() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    let elector = elector_on(&store, test_config(true));
    let mut events = elector.subscribe();

    elector.start().await?;

    assert!(elector.is_leader());
    assert_eq!(1, store.create_count());

    let lease = store.lease("N", "L").unwrap();
    let spec = lease.spec.unwrap();
    assert_eq!(Some("elector-hostA".to_string()), spec.holder_identity);
    assert_eq!(Some(2), spec.lease_duration_seconds);
    assert_eq!(spec.acquire_time, spec.renew_time);

    assert_eq!(
        vec![LeaderEvent::Elected {
            lease_name: "L".to_string()
        }],
        drain(&mut events)
    );

    elector.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unexpired_peer_lease_stays_follower_after_three_attempts() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    store.apply("N", lease_record("L", Some("elector-hostB"), Some(Utc::now()), 2));

    let elector = elector_on(&store, test_config(true));
    let mut events = elector.subscribe();

    // Blocks until the acquisition sequence is exhausted.
    elector.start().await?;

    assert!(!elector.is_leader());
    assert_eq!(3, store.read_count());
    assert_eq!(0, store.create_count());
    assert_eq!(0, store.replace_count());
    assert_eq!(Vec::<LeaderEvent>::new(), drain(&mut events));
    assert_eq!(Some("elector-hostB".to_string()), holder_of(&store));

    elector.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_expired_lease_takeover() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    let stale = Utc::now() - chrono::Duration::seconds(3);
    store.apply("N", lease_record("L", Some("elector-hostB"), Some(stale), 2));

    let elector = elector_on(&store, test_config(true));
    let mut events = elector.subscribe();

    elector.start().await?;

    assert!(elector.is_leader());
    assert_eq!(0, store.create_count());
    assert_eq!(1, store.replace_count());
    assert_eq!(Some("elector-hostA".to_string()), holder_of(&store));

    let spec = store.lease("N", "L").unwrap().spec.unwrap();
    assert!(spec.renew_time.unwrap().0 > stale);

    assert_eq!(
        vec![LeaderEvent::Elected {
            lease_name: "L".to_string()
        }],
        drain(&mut events)
    );

    elector.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_crash_restart_reclaims_own_lease_without_writing() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    store.apply("N", lease_record("L", Some("elector-hostA"), Some(Utc::now()), 2));

    let elector = elector_on(&store, test_config(true));
    let mut events = elector.subscribe();

    elector.start().await?;

    assert!(elector.is_leader());
    assert_eq!(0, store.create_count());
    assert_eq!(0, store.replace_count());
    assert_eq!(
        vec![LeaderEvent::Elected {
            lease_name: "L".to_string()
        }],
        drain(&mut events)
    );

    elector.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_leader_renews_its_lease() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    let elector = elector_on(&store, test_config(true));
    let mut events = elector.subscribe();

    elector.start().await?;
    assert!(elector.is_leader());

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(elector.is_leader());
    assert!(
        store.replace_count() >= 2,
        "expected at least 2 renewals, got {}",
        store.replace_count()
    );
    assert_eq!(Some("elector-hostA".to_string()), holder_of(&store));

    // Renewals and own-write echoes must not re-emit Elected.
    assert_eq!(
        vec![LeaderEvent::Elected {
            lease_name: "L".to_string()
        }],
        drain(&mut events)
    );

    elector.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_loss_via_watch_takeover() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    // Start from an existing claim so becoming leader writes nothing: the
    // only watch traffic in this test is the peer's takeover.
    store.apply("N", lease_record("L", Some("elector-hostA"), Some(Utc::now()), 10));

    // A renewal interval comfortably longer than the watch settle delay, so
    // the takeover is observed through the watch, not through a renewal.
    let config = Arc::new(Config {
        renewal_interval: 5000,
        ..(*test_config(true)).clone()
    });
    let elector = elector_on(&store, config);
    let mut events = elector.subscribe();

    elector.start().await?;
    assert!(elector.is_leader());

    // Let the watch subscription establish before the peer writes.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A peer overwrites the lease through its own connection.
    store.apply("N", lease_record("L", Some("elector-hostC"), Some(Utc::now()), 10));

    elector.wait(Some(Duration::from_secs(10))).follower("peer takeover").await?;
    assert!(!elector.is_leader());

    let events = drain(&mut events);
    assert_eq!(
        vec![
            LeaderEvent::Elected {
                lease_name: "L".to_string()
            },
            LeaderEvent::Lost {
                lease_name: "L".to_string()
            },
        ],
        events
    );

    // The renewal timer is cancelled: no further writes from us.
    let replaces = store.replace_count();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(replaces, store.replace_count());
    assert_eq!(Some("elector-hostC".to_string()), holder_of(&store));

    elector.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_graceful_release_clears_holder_without_lost_event() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    let elector = elector_on(&store, test_config(true));
    let mut events = elector.subscribe();

    elector.start().await?;
    assert!(elector.is_leader());

    elector.shutdown().await?;

    assert!(!elector.is_leader());
    let spec = store.lease("N", "L").unwrap().spec.unwrap();
    assert_eq!(None, spec.holder_identity);
    assert_eq!(None, spec.renew_time);

    // Release is caller-initiated: Elected only, no Lost.
    assert_eq!(
        vec![LeaderEvent::Elected {
            lease_name: "L".to_string()
        }],
        drain(&mut events)
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_release_when_not_leader_performs_no_writes() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    store.apply("N", lease_record("L", Some("elector-hostB"), Some(Utc::now()), 2));

    let elector = elector_on(&store, test_config(true));
    elector.start().await?;
    assert!(!elector.is_leader());

    let reads = store.read_count();
    elector.shutdown().await?;

    assert_eq!(reads, store.read_count());
    assert_eq!(0, store.replace_count());
    assert_eq!(Some("elector-hostB".to_string()), holder_of(&store));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_standalone_mode_leads_without_lease_operations() -> Result<()> {
    let elector = Elector::new(host_a(), test_config(false), None);
    let mut events = elector.subscribe();

    elector.start().await?;

    // Degenerate single-node mode: leadership holds as soon as start returns.
    assert!(elector.is_leader());
    assert_eq!(
        vec![LeaderEvent::Elected {
            lease_name: "L".to_string()
        }],
        drain(&mut events)
    );

    // Leadership persists; there is no lease to lose.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(elector.is_leader());

    elector.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_conflict_on_replace_stays_follower() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    let stale = Utc::now() - chrono::Duration::seconds(10);
    store.apply("N", lease_record("L", Some("elector-hostB"), Some(stale), 2));
    store.set_conflict_on_replace(true);

    let elector = elector_on(&store, test_config(true));
    let mut events = elector.subscribe();

    elector.start().await?;

    assert!(!elector.is_leader());
    assert_eq!(3, store.replace_count());
    assert_eq!(Vec::<LeaderEvent>::new(), drain(&mut events));

    elector.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_renewal_failure_steps_down() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    // Reclaim an existing claim so no write echo lingers in the watch.
    store.apply("N", lease_record("L", Some("elector-hostA"), Some(Utc::now()), 2));

    let elector = elector_on(&store, test_config(true));
    let mut events = elector.subscribe();

    elector.start().await?;
    assert!(elector.is_leader());

    store.set_offline(true);

    elector.wait(Some(Duration::from_secs(10))).follower("store unreachable").await?;

    let events = drain(&mut events);
    assert_eq!(2, events.len());
    assert!(matches!(events[1], LeaderEvent::Lost { .. }));

    elector.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_own_write_echo_does_not_reelect() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    let elector = elector_on(&store, test_config(true));
    let mut events = elector.subscribe();

    elector.start().await?;
    assert!(elector.is_leader());

    // Watch delivers our own holder record back to us, twice.
    store.apply("N", lease_record("L", Some("elector-hostA"), Some(Utc::now()), 2));
    store.apply("N", lease_record("L", Some("elector-hostA"), Some(Utc::now()), 2));

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(elector.is_leader());
    assert_eq!(
        vec![LeaderEvent::Elected {
            lease_name: "L".to_string()
        }],
        drain(&mut events)
    );

    elector.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_deleted_lease_triggers_acquisition() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    store.apply("N", lease_record("L", Some("elector-hostB"), Some(Utc::now()), 2));

    let elector = elector_on(&store, test_config(true));
    elector.start().await?;
    assert!(!elector.is_leader());

    store.remove("N", "L");

    elector.wait(Some(Duration::from_secs(10))).leader("lease deleted").await?;
    assert_eq!(Some("elector-hostA".to_string()), holder_of(&store));

    elector.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_watch_reconnects_after_stream_close() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    store.apply("N", lease_record("L", Some("elector-hostB"), Some(Utc::now()), 2));

    let elector = elector_on(&store, test_config(false));
    elector.start().await?;

    // Let the first subscription establish, then drop it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(1, store.watch_count());
    store.close_watches();

    // The loop reconnects 5s after the stream ends.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(2, store.watch_count());

    // Events flow again through the new subscription.
    store.remove("N", "L");
    elector.wait(Some(Duration::from_secs(10))).leader("post-reconnect delete").await?;

    elector.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() -> Result<()> {
    let store = Arc::new(MemLeaseApi::new());
    let elector = elector_on(&store, test_config(true));
    let mut events = elector.subscribe();

    elector.start().await?;
    elector.start().await?;
    elector.start().await?;

    assert_eq!(1, store.watch_count());
    assert_eq!(1, store.create_count());
    assert_eq!(1, drain(&mut events).len());

    elector.shutdown().await?;
    Ok(())
}

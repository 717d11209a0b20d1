//! End-to-end reconciliation scenarios against the in-memory store and the
//! fake Fabric: initial sync to a fixed point, monitored takeover, the
//! failure-classification ladder, divergence reset, and fault mirroring.

use fabricsync::agent::{Reconciler, TickOutcome, UniverseKind};
use fabricsync::core::model::{BridgeDomain, Subnet, Tenant};
use fabricsync::core::{
    AgentConfig, Dn, Error, ManagedObject, MemoryStore, ModelObject, Store, SyncStatus,
};
use fabricsync::fabric::testing::FakeFabric;
use std::sync::Arc;
use std::time::Duration;

macro_rules! wait_until {
    ($what:expr, $cond:expr) => {{
        let mut done = false;
        for _ in 0..250 {
            if $cond {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(done, "timed out waiting for {}", $what);
    }};
}

const SYSTEM_ID: &str = "test-sys";

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> AgentConfig {
    init_logging();
    AgentConfig {
        agent_id: "aid-h1".into(),
        system_id: SYSTEM_ID.into(),
        single_agent_mode: true,
        tenant_polling_yield_secs: 0,
        max_operation_retry: 4,
        retry_cooldown_secs: -1,
        ..Default::default()
    }
}

fn tenant(name: &str) -> ModelObject {
    ModelObject::Tenant(Tenant {
        name: name.into(),
        ..Default::default()
    })
}

fn bridge_domain(tenant_name: &str, name: &str, vrf: &str) -> ModelObject {
    ModelObject::BridgeDomain(BridgeDomain {
        tenant_name: tenant_name.into(),
        name: name.into(),
        vrf_name: vrf.into(),
        ..Default::default()
    })
}

fn subnet(tenant_name: &str, bd: &str, gw: &str) -> ModelObject {
    ModelObject::Subnet(Subnet {
        tenant_name: tenant_name.into(),
        bd_name: bd.into(),
        gw_ip_mask: gw.into(),
        ..Default::default()
    })
}

fn mo_tenant(name: &str) -> ManagedObject {
    ManagedObject::new("fvTenant", &Dn::new(format!("uni/tn-{name}")))
        .with_attr("name", name)
        .with_attr("descr", "")
}

fn mo_bd(tenant_name: &str, name: &str) -> ManagedObject {
    ManagedObject::new("fvBD", &Dn::new(format!("uni/tn-{tenant_name}/BD-{name}")))
        .with_attr("name", name)
        .with_attr("arpFlood", "no")
        .with_attr("unicastRoute", "no")
}

fn key(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn is_warm(rec: &Reconciler, root: &str) -> bool {
    rec.workers()
        .get(root)
        .map(|w| w.is_warm())
        .unwrap_or(false)
}

async fn status_of(store: &MemoryStore, dn: &str) -> Option<SyncStatus> {
    store
        .get_status(dn)
        .await
        .unwrap()
        .map(|row| row.sync_status)
}

// S1: empty fabric, intent with a tenant and a bridge domain. Two observed
// rounds later the config pair is a fixed point and the objects are SYNCED.
#[tokio::test]
async fn initial_sync_reaches_fixed_point() {
    let store = Arc::new(MemoryStore::new());
    let fabric = Arc::new(FakeFabric::new());
    store.put_desired(tenant("test-tenant")).await.unwrap();
    store
        .put_desired(bridge_domain("test-tenant", "test", "test"))
        .await
        .unwrap();

    let mut rec = Reconciler::new(config(), store.clone(), fabric.clone());
    rec.tick().await.unwrap();
    wait_until!("worker warm", is_warm(&rec, "tn-test-tenant"));

    rec.tick().await.unwrap();
    wait_until!(
        "bd created in fabric",
        fabric.has_object(&Dn::new("uni/tn-test-tenant/BD-test"))
    );
    wait_until!("observed view catches up", {
        let worker = rec.workers().get("tn-test-tenant").unwrap();
        worker
            .snapshot_config()
            .find(&key(&[
                "fvTenant|tn-test-tenant",
                "fvBD|BD-test",
                "fvRsCtx|rsctx",
            ]))
            .is_some()
    });

    rec.tick().await.unwrap();

    let current = rec
        .multiverse()
        .universe(UniverseKind::CurrentConfig)
        .state("tn-test-tenant");
    let desired = rec
        .multiverse()
        .universe(UniverseKind::DesiredConfig)
        .state("tn-test-tenant");
    assert!(
        current.diff(&desired).is_empty(),
        "config pair should be a fixed point after convergence"
    );

    assert_eq!(
        Some(SyncStatus::Synced),
        status_of(&store, "uni/tn-test-tenant/BD-test").await
    );
    assert_eq!(
        Some(SyncStatus::Synced),
        status_of(&store, "uni/tn-test-tenant").await
    );
    // Every created object carries our ownership tag.
    assert!(fabric.has_object(&Dn::new(format!(
        "uni/tn-test-tenant/BD-test/tag-{SYSTEM_ID}"
    ))));
    assert!(fabric.has_object(&Dn::new(format!(
        "uni/tn-test-tenant/BD-test/rsctx/tag-{SYSTEM_ID}"
    ))));

    // Dropping the BD from intent deletes it (children first) from the
    // fabric as well.
    store
        .delete_desired(&Dn::new("uni/tn-test-tenant/BD-test"))
        .await
        .unwrap();
    rec.tick().await.unwrap();
    wait_until!(
        "bd deleted from fabric",
        !fabric.has_object(&Dn::new("uni/tn-test-tenant/BD-test"))
    );
    assert!(fabric.has_object(&Dn::new("uni/tn-test-tenant")));
}

// S2: a monitored tenant with a fabric-owned BD. Intent adds a subnet under
// it: the subnet syncs and is tagged, the BD stays untagged and monitored.
// When the fabric drops the BD, the subnet fails after its retry budget and
// the monitored row disappears.
#[tokio::test]
async fn monitored_takeover_and_external_delete() {
    let store = Arc::new(MemoryStore::new());
    let fabric = Arc::new(FakeFabric::new());
    let mut monitored_tenant = tenant("t");
    monitored_tenant.set_monitored(true);
    store.put_desired(monitored_tenant).await.unwrap();
    fabric.seed_object(mo_tenant("t"));
    fabric.seed_object(mo_bd("t", "mybd"));

    let mut rec = Reconciler::new(config(), store.clone(), fabric.clone());
    rec.tick().await.unwrap();
    wait_until!("worker warm", is_warm(&rec, "tn-t"));
    wait_until!("monitored view catches up", {
        let worker = rec.workers().get("tn-t").unwrap();
        worker
            .snapshot_monitored()
            .find(&key(&["fvTenant|tn-t", "fvBD|BD-mybd"]))
            .is_some()
    });

    rec.tick().await.unwrap();
    wait_until!(
        "monitored rows mirrored",
        store
            .monitored_objects("tn-t")
            .await
            .unwrap()
            .iter()
            .any(|o| matches!(o, ModelObject::BridgeDomain(_)))
    );

    rec.tick().await.unwrap();
    assert!(
        fabric.posted_transactions().is_empty(),
        "monitored objects must never be pushed"
    );

    // Intent: a subnet under the fabric-owned BD.
    let subnet_dn = "uni/tn-t/BD-mybd/subnet-[10.10.10.1/28]";
    store
        .put_desired(subnet("t", "mybd", "10.10.10.1/28"))
        .await
        .unwrap();
    rec.tick().await.unwrap();
    wait_until!("subnet created", fabric.has_object(&Dn::new(subnet_dn)));
    wait_until!("subnet observed", {
        let worker = rec.workers().get("tn-t").unwrap();
        worker
            .snapshot_config()
            .find(&key(&[
                "fvTenant|tn-t",
                "fvBD|BD-mybd",
                "fvSubnet|subnet-[10.10.10.1/28]",
            ]))
            .is_some()
    });
    rec.tick().await.unwrap();

    assert_eq!(Some(SyncStatus::Synced), status_of(&store, subnet_dn).await);
    assert!(fabric.has_object(&Dn::new(format!("{subnet_dn}/tag-{SYSTEM_ID}"))));
    assert!(
        !fabric.has_object(&Dn::new(format!("uni/tn-t/BD-mybd/tag-{SYSTEM_ID}"))),
        "the monitored BD must stay untagged"
    );
    assert!(store
        .monitored_objects("tn-t")
        .await
        .unwrap()
        .iter()
        .any(|o| o.monitored() && matches!(o, ModelObject::BridgeDomain(_))));

    // The fabric drops the BD from under us.
    fabric.remove_external(&Dn::new("uni/tn-t/BD-mybd"));
    wait_until!("bd gone from observed view", {
        let worker = rec.workers().get("tn-t").unwrap();
        worker
            .snapshot_config()
            .find(&key(&["fvTenant|tn-t", "fvBD|BD-mybd"]))
            .is_none()
    });

    // Re-creating the subnet keeps failing (no parent); the retry budget
    // runs out and the object goes FAILED.
    for _ in 0..8 {
        rec.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(Some(SyncStatus::Failed), status_of(&store, subnet_dn).await);
    wait_until!(
        "monitored bd row dropped",
        !store
            .monitored_objects("tn-t")
            .await
            .unwrap()
            .iter()
            .any(|o| matches!(o, ModelObject::BridgeDomain(_)))
    );
}

// S6: the fabric silently swallows writes. The diverging object is retried,
// the pair gets exactly one reset mid-ladder, and the object finally fails
// with no further pushes.
#[tokio::test]
async fn divergence_triggers_reset_then_purge() {
    let store = Arc::new(MemoryStore::new());
    let fabric = Arc::new(FakeFabric::new());
    store.put_desired(tenant("t")).await.unwrap();

    // max_operation_retry = 4: reset after 2 futile pushes, purge after 4.
    let mut rec = Reconciler::new(config(), store.clone(), fabric.clone());
    rec.tick().await.unwrap();
    wait_until!("worker warm", is_warm(&rec, "tn-t"));
    rec.tick().await.unwrap();
    wait_until!("tenant created", fabric.has_object(&Dn::new("uni/tn-t")));
    wait_until!("tenant observed", {
        let worker = rec.workers().get("tn-t").unwrap();
        worker
            .snapshot_config()
            .find(&key(&["fvTenant|tn-t"]))
            .is_some()
    });
    rec.tick().await.unwrap();

    fabric.clear_posted();
    fabric.set_silent_posts(true);
    store.put_desired(bridge_domain("t", "bd1", "")).await.unwrap();

    // Push 1 and push 2.
    rec.tick().await.unwrap();
    wait_until!("first push attempted", fabric.posted_transactions().len() == 1);
    rec.tick().await.unwrap();
    wait_until!("second push attempted", fabric.posted_transactions().len() == 2);

    // Reset tick: both universes rebuild, nothing is pushed.
    rec.tick().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(2, fabric.posted_transactions().len());
    wait_until!("tenant re-observed after reset", {
        let worker = rec.workers().get("tn-t").unwrap();
        worker
            .snapshot_config()
            .find(&key(&["fvTenant|tn-t"]))
            .is_some()
    });

    // One more futile push, then the purge tick fails the object.
    rec.tick().await.unwrap();
    wait_until!("third push attempted", fabric.posted_transactions().len() == 3);
    rec.tick().await.unwrap();
    assert_eq!(
        Some(SyncStatus::Failed),
        status_of(&store, "uni/tn-t/BD-bd1").await
    );

    // Failed objects are excluded from the diff: no further pushes.
    rec.tick().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(3, fabric.posted_transactions().len());
}

// The failure ladder: object-permanent codes fail immediately, object
// codes retry to the purge limit, environment trouble retries forever, and
// an expired session is fatal for the whole process.
#[tokio::test]
async fn error_classification_ladder() {
    let store = Arc::new(MemoryStore::new());
    let fabric = Arc::new(FakeFabric::new());
    let mut cfg = config();
    cfg.max_operation_retry = 2;
    store.put_desired(tenant("t1")).await.unwrap();

    let mut rec = Reconciler::new(cfg, store.clone(), fabric.clone());
    rec.tick().await.unwrap();
    wait_until!("worker warm", is_warm(&rec, "tn-t1"));

    // OPERATION_CRITICAL: failed on the next tick.
    fabric.set_post_error(Some(Error::fabric_response("uni/tn-t1", "122", "bad value")));
    rec.tick().await.unwrap();
    wait_until!("push attempted", !fabric.posted_transactions().is_empty());
    rec.tick().await.unwrap();
    assert_eq!(Some(SyncStatus::Failed), status_of(&store, "uni/tn-t1").await);

    // Touching the intent restores the retry budget.
    store
        .put_desired(ModelObject::Tenant(Tenant {
            name: "t1".into(),
            descr: "touched".into(),
            ..Default::default()
        }))
        .await
        .unwrap();
    fabric.clear_posted();
    fabric.set_post_error(Some(Error::fabric_response("uni/tn-t1", "102", "busy")));

    // OPERATION_TRANSIENT: pending through the ladder, failed at the purge.
    rec.tick().await.unwrap();
    wait_until!("retry push attempted", !fabric.posted_transactions().is_empty());
    assert_eq!(Some(SyncStatus::Pending), status_of(&store, "uni/tn-t1").await);
    rec.tick().await.unwrap(); // reset tick
    rec.tick().await.unwrap(); // purge tick
    assert_eq!(Some(SyncStatus::Failed), status_of(&store, "uni/tn-t1").await);

    // SYSTEM_TRANSIENT: retried indefinitely, never failed.
    store
        .put_desired(ModelObject::Tenant(Tenant {
            name: "t1".into(),
            descr: "touched-again".into(),
            ..Default::default()
        }))
        .await
        .unwrap();
    fabric.set_post_error(Some(Error::FabricUnreachable("connection reset".into())));
    for _ in 0..5 {
        rec.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(Some(SyncStatus::Pending), status_of(&store, "uni/tn-t1").await);

    // SYSTEM_CRITICAL: the tick demands process termination.
    fabric.set_post_error(Some(Error::SessionExpired("auth cookie gone".into())));
    let mut fatal = None;
    for _ in 0..6 {
        if let TickOutcome::Fatal(code) = rec.tick().await.unwrap() {
            fatal = Some(code);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(Some(fabricsync::core::EXIT_AUTH_EXPIRED), fatal);
}

// Observed faults surface as fault rows keyed by the fault DN and clear
// when the fabric clears them.
#[tokio::test]
async fn observed_faults_are_mirrored_and_cleared() {
    let store = Arc::new(MemoryStore::new());
    let fabric = Arc::new(FakeFabric::new());
    store.put_desired(tenant("t")).await.unwrap();

    let mut rec = Reconciler::new(config(), store.clone(), fabric.clone());
    rec.tick().await.unwrap();
    wait_until!("worker warm", is_warm(&rec, "tn-t"));
    rec.tick().await.unwrap();
    wait_until!("tenant created", fabric.has_object(&Dn::new("uni/tn-t")));

    let fault_dn = "uni/tn-t/fault-F0100";
    fabric.seed_object(
        ManagedObject::new("faultInst", &Dn::new(fault_dn))
            .with_attr("code", "F0100")
            .with_attr("severity", "major")
            .with_attr("descr", "endpoint flapping")
            .with_attr("cause", "config"),
    );
    wait_until!("fault observed", {
        let worker = rec.workers().get("tn-t").unwrap();
        worker
            .snapshot_operational()
            .find(&key(&["fvTenant|tn-t", "faultInst|fault-F0100"]))
            .is_some()
    });

    rec.tick().await.unwrap();
    let faults = store.list_faults("tn-t").await.unwrap();
    assert_eq!(1, faults.len());
    assert_eq!(fault_dn, faults[0].external_identifier);
    assert_eq!("major", faults[0].severity);
    assert_eq!("uni/tn-t", faults[0].status_id);

    // The fabric clears the fault.
    fabric.remove_external(&Dn::new(fault_dn));
    wait_until!("fault gone from observed view", {
        let worker = rec.workers().get("tn-t").unwrap();
        worker
            .snapshot_operational()
            .find(&key(&["fvTenant|tn-t", "faultInst|fault-F0100"]))
            .is_none()
    });
    rec.tick().await.unwrap();
    assert!(store.list_faults("tn-t").await.unwrap().is_empty());
}

// Losing the serve set stops the worker; the next tick with intent restores
// it.
#[tokio::test]
async fn serve_transitions_start_and_stop_workers() {
    let store = Arc::new(MemoryStore::new());
    let fabric = Arc::new(FakeFabric::new());
    store.put_desired(tenant("t")).await.unwrap();

    let mut rec = Reconciler::new(config(), store.clone(), fabric.clone());
    rec.tick().await.unwrap();
    assert!(rec.workers().get("tn-t").is_some());
    wait_until!("worker warm", is_warm(&rec, "tn-t"));

    // The intent vanishes before anything reached the fabric: the root has
    // no observed state either, so it is destroyed and the worker stopped.
    store.delete_desired(&Dn::new("uni/tn-t")).await.unwrap();
    rec.tick().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    rec.tick().await.unwrap();
    assert!(rec.workers().get("tn-t").is_none(), "worker should be stopped");
}

//! Guard and store used together, without HTTP

use chrono::{TimeZone, Utc};
use panel_gateway::admission_guard::{
    AdmissionGuard, AdmissionOutcome, GuardPolicy, MethodClass, RequestDescriptor,
};
use panel_gateway::client_registry::ClientKey;
use panel_gateway::entity_store::{
    Entity, EntityQuery, EntityState, EntityStore, StateChange, StoreLimits,
};
use std::sync::Arc;
use std::time::Duration;

fn state(id: &str, value: &str) -> EntityState {
    EntityState::new(id, value, "{}", Utc.timestamp_millis_opt(1_000).unwrap())
}

#[test]
fn test_switch_fan_round_trip() {
    let store = EntityStore::new(StoreLimits::default()).unwrap();
    store.upsert_entity(Entity::minimal("switch.fan")).unwrap();
    store.upsert_state(state("switch.fan", "on")).unwrap();

    let states = store.list_states(10).unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].state, "on");

    let before = store.state_revision().unwrap();
    assert_eq!(
        store.upsert_state(state("switch.fan", "off")).unwrap(),
        StateChange::Updated
    );
    assert_eq!(store.list_states(10).unwrap()[0].state, "off");
    assert_eq!(store.state_revision().unwrap(), before + 1);
}

#[test]
fn test_state_before_entity_synthesizes_it() {
    let store = EntityStore::new(StoreLimits::default()).unwrap();
    store.upsert_state(state("light.kitchen", "on")).unwrap();

    let lights = store
        .list_entities(&EntityQuery::default().domain("light"), 10)
        .unwrap();
    assert_eq!(lights.len(), 1);
    assert_eq!(lights[0].id, "light.kitchen");
}

#[tokio::test]
async fn test_guarded_writers_never_exceed_limit() {
    let guard = Arc::new(
        AdmissionGuard::new(GuardPolicy {
            max_active_requests: 4,
            rate_per_sec: 1000,
            burst: 1000,
            ..GuardPolicy::default()
        })
        .unwrap(),
    );
    let store = Arc::new(EntityStore::new(StoreLimits::default()).unwrap());

    let mut handles = Vec::new();
    for n in 0..16u32 {
        let guard = guard.clone();
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let client = ClientKey::from(n % 4 + 1);
            let req = RequestDescriptor::controlled(client, MethodClass::Mutate);
            guard
                .admit_and_run(&req, move || async move {
                    let id = format!("sensor.s{}", n);
                    let change = store.upsert_state(state(&id, "1"));
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    change
                })
                .await
        }));
    }

    let mut passed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            AdmissionOutcome::Pass(change) => {
                assert_eq!(change.unwrap(), StateChange::Inserted);
                passed += 1;
            }
            outcome => assert!(outcome.rejection().is_some()),
        }
    }

    assert!(passed >= 1);
    assert_eq!(store.list_states(64).unwrap().len(), passed);
    assert_eq!(guard.available_global_slots(), 4);
    for key in 1..=4u32 {
        assert_eq!(guard.client_in_flight(ClientKey::from(key)), 0);
    }
}

use super::*;
use anyhow::anyhow;
use serde_json::json;
use shared::{domain::ItemType, protocol::ItemEvent};
use tokio::sync::broadcast::error::TryRecvError;

use crate::{
    item::ItemHandle,
    item_registry::RegistrationState,
    readiness::ReadinessSignals,
    test_support::{env, handle, host_with, ScriptedController, TestContent, TestItem},
    ImmediateReadiness, MissingContent,
};

fn drain(events: &mut broadcast::Receiver<HostEvent>) -> Vec<HostEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test]
async fn mount_announces_ready() {
    let host = ItemHost::new(Arc::new(ImmediateReadiness), Arc::new(MissingContent));
    let mut events = host.subscribe_events();

    host.mount();

    assert_eq!(events.try_recv().expect("event"), HostEvent::Ready);
}

#[tokio::test]
async fn sessions_without_controller_resolve_as_skipped() {
    let host = host_with(Arc::new(TestContent::default()), Arc::new(ImmediateReadiness));
    let mut events = host.subscribe_events();

    let settled = host
        .set_sessions(json!([{"id": "q1"}]))
        .await
        .expect("sessions");

    assert!(settled.refresh.skipped);
    assert_eq!(settled.value, vec![Session::new("q1")]);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn non_array_sessions_are_rejected_and_prior_sessions_kept() {
    let host = host_with(Arc::new(TestContent::default()), Arc::new(ImmediateReadiness));
    host.set_sessions(json!([{"id": "q1", "response": "x"}]))
        .await
        .expect("sessions");
    let held = host.session(&ItemId::from("q1")).expect("held");

    let err = host
        .set_sessions(json!({"id": "q2"}))
        .await
        .expect_err("must fail");

    assert!(matches!(err, HostError::InvalidArgument(_)));
    assert_eq!(err.code(), shared::error::ErrorCode::InvalidArgument);
    let sessions = host.sessions().expect("sessions");
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].same_record(&held));
    assert_eq!(held.get("response"), Some(json!("x")));
}

#[tokio::test]
async fn item_is_bound_once_its_type_is_ready_and_status_follows_events() {
    let item = TestItem::new("my-item");
    let signals = Arc::new(ReadinessSignals::new());
    let host = Arc::new(host_with(TestContent::with(&[("q1", &item)]), signals.clone()));
    let mut events = host.subscribe_events();

    host.set_controller(Arc::new(ScriptedController::returning(vec![
        Model::for_element("q1", "my-item"),
    ])))
    .await
    .expect("controller");
    host.set_environment(env()).await.expect("environment");

    let pending = {
        let host = Arc::clone(&host);
        tokio::spawn(async move { host.set_sessions(json!([{"id": "q1"}])).await })
    };
    tokio::task::yield_now().await;
    assert_eq!(
        host.registry().state(&ItemId::from("q1")),
        RegistrationState::AwaitingTypeReady
    );

    signals.mark_ready("my-item");
    let settled = pending.await.expect("join").expect("sessions");

    assert_eq!(settled.refresh.pushed_ids(), vec![ItemId::from("q1")]);
    assert_eq!(
        host.registry().state(&ItemId::from("q1")),
        RegistrationState::Registered
    );
    assert_eq!(
        drain(&mut events),
        vec![HostEvent::ModelUpdated { generation: 1 }]
    );
    assert_eq!(
        host.status().await.expect("status"),
        vec![StatusEntry {
            id: ItemId::from("q1"),
            complete: None
        }]
    );

    assert_eq!(item.emit(ItemEvent::model_set(true)), Propagation::Stop);

    let expected = vec![StatusEntry {
        id: ItemId::from("q1"),
        complete: Some(true),
    }];
    assert_eq!(host.status().await.expect("status"), expected);
    assert_eq!(drain(&mut events), vec![HostEvent::SessionsChanged(expected)]);
}

#[tokio::test]
async fn status_follows_session_order_not_registration_order() {
    let a = TestItem::new("my-item");
    let b = TestItem::new("my-item");
    let host = host_with(Arc::new(TestContent::default()), Arc::new(ImmediateReadiness));
    host.set_sessions(json!([{"id": "a"}, {"id": "b"}]))
        .await
        .expect("sessions");

    host.handle_registration(RegistrationEvent::new("b", handle(&b)))
        .expect("b");
    host.handle_registration(RegistrationEvent::new("a", handle(&a)))
        .expect("a");
    b.emit(ItemEvent::session_changed(false));

    assert_eq!(
        host.status().await.expect("status"),
        vec![
            StatusEntry::untracked(ItemId::from("a")),
            StatusEntry {
                id: ItemId::from("b"),
                complete: Some(false)
            },
        ]
    );
}

#[tokio::test]
async fn status_requires_sessions() {
    let host = host_with(Arc::new(TestContent::default()), Arc::new(ImmediateReadiness));
    let err = host.status().await.expect_err("must fail");
    assert!(matches!(err, HostError::NotInitialized("sessions")));
}

#[tokio::test]
async fn registration_requires_an_identifier_and_rejects_duplicates() {
    let host = host_with(Arc::new(TestContent::default()), Arc::new(ImmediateReadiness));
    let first = TestItem::new("my-item");
    let second = TestItem::new("my-item");

    let err = host
        .handle_registration(RegistrationEvent::anonymous(handle(&first)))
        .expect_err("must fail");
    assert!(matches!(err, HostError::MissingIdentifier { .. }));

    assert_eq!(
        host.handle_registration(RegistrationEvent::new("q1", handle(&first)))
            .expect("first"),
        Propagation::Stop
    );
    let err = host
        .handle_registration(RegistrationEvent::new("q1", handle(&second)))
        .expect_err("must fail");

    assert!(matches!(err, HostError::DuplicateRegistration { .. }));
    assert_eq!(
        host.registry()
            .get(&ItemId::from("q1"))
            .expect("bound")
            .handle_id(),
        first.handle_id()
    );
    assert_eq!(second.listener_count(), 0);
}

#[tokio::test]
async fn outcomes_delegate_to_the_controller() {
    let host = host_with(Arc::new(TestContent::default()), Arc::new(ImmediateReadiness));
    let outcome: Outcome =
        serde_json::from_value(json!({"id": "q1", "score": 1})).expect("outcome");

    let err = host.outcomes().await.expect_err("must fail");
    assert!(matches!(err, HostError::NotInitialized("controller")));

    host.set_controller(Arc::new(
        ScriptedController::returning(Vec::new()).with_outcomes(vec![outcome.clone()]),
    ))
    .await
    .expect("controller");
    host.set_environment(env()).await.expect("environment");
    let err = host.outcomes().await.expect_err("must fail");
    assert!(matches!(err, HostError::NotInitialized("sessions")));

    host.set_sessions(json!([{"id": "q1"}]))
        .await
        .expect("sessions");
    assert_eq!(host.outcomes().await.expect("outcomes"), vec![outcome]);
}

#[tokio::test]
async fn reset_responses_keeps_what_the_predicate_returns() {
    let host = host_with(Arc::new(TestContent::default()), Arc::new(ImmediateReadiness));
    host.set_sessions(json!([{"id": "q1", "response": "x", "note": "y"}]))
        .await
        .expect("sessions");
    let held = host.session(&ItemId::from("q1")).expect("held");

    let reset = host
        .reset_responses(|proposal| async move { Ok(proposal) })
        .await
        .expect("reset");

    assert_eq!(reset, vec![Session::new("q1").with_field("note", json!("y"))]);
    assert_eq!(held.get("response"), None);
    assert_eq!(held.get("note"), Some(json!("y")));
}

#[tokio::test]
async fn full_reset_offers_ids_only() {
    let host = host_with(Arc::new(TestContent::default()), Arc::new(ImmediateReadiness));
    host.set_sessions(json!([{"id": "q1", "response": "x", "note": "y"}]))
        .await
        .expect("sessions");

    let reset = host
        .reset(|proposal| async move {
            assert_eq!(proposal, vec![Session::new("q1")]);
            Ok(proposal)
        })
        .await
        .expect("reset");

    assert_eq!(reset, vec![Session::new("q1")]);
}

#[tokio::test]
async fn failed_reset_predicate_leaves_sessions_alone() {
    let host = host_with(Arc::new(TestContent::default()), Arc::new(ImmediateReadiness));
    host.set_sessions(json!([{"id": "q1", "response": "x"}]))
        .await
        .expect("sessions");

    let err = host
        .reset(|_| async { Err(anyhow!("user cancelled")) })
        .await
        .expect_err("must fail");

    assert!(matches!(err, HostError::PredicateFailure(_)));
    assert_eq!(
        host.session(&ItemId::from("q1"))
            .expect("session")
            .get("response"),
        Some(json!("x"))
    );
}

#[tokio::test]
async fn declared_element_models_receive_environment_and_properties() {
    let banner = TestItem::new("x-banner");
    let host = host_with(
        TestContent::with(&[("d1", &banner)]),
        Arc::new(ImmediateReadiness),
    );
    host.set_environment(env()).await.expect("environment");

    let located = host
        .declare_item_models(vec![
            Model::for_element("d1", "x-banner").with_field("text", json!("hello")),
            Model::for_element("d2", "x-banner"),
        ])
        .await;

    assert_eq!(located, 1);
    assert_eq!(host.declared_elements(), vec![ItemId::from("d1")]);
    assert_eq!(banner.environments(), vec![env()]);
    assert_eq!(
        banner.properties(),
        vec![("text".to_string(), json!("hello"))]
    );

    let updated = Environment::new(json!({"mode": "evaluate"}));
    host.set_environment(updated.clone())
        .await
        .expect("environment");
    assert_eq!(banner.environments(), vec![env(), updated]);
    assert_eq!(banner.item_type(), ItemType::from("x-banner"));
}

//! Recurrence trigger ticks against an in-memory store.

mod common;

use std::sync::Arc;

use chrono::{TimeDelta, Weekday};
use common::*;
use rpaflow_core::recurrence::{Frequency, RecurrenceRule};
use rpaflow_core::{ExecutionRecord, ScheduledEvent};
use rpaflow_engine::credentials::JwtConfig;
use rpaflow_engine::{JwtIssuer, RecurrenceTrigger, SystemClock};
use rpaflow_store::collections;
use rpaflow_store::repositories::ScheduledEventRepo;
use rpaflow_store::EntityStore;
use serde_json::json;

// Token validation checks `exp` against wall time, so the issuer runs on
// the system clock even though the trigger runs on the manual one.
fn issuer() -> Arc<JwtIssuer<SystemClock>> {
    Arc::new(JwtIssuer::new(
        JwtConfig {
            secret: "test-secret".into(),
            expiry_mins: 5,
        },
        SystemClock,
    ))
}

fn trigger(h: &Harness) -> RecurrenceTrigger {
    RecurrenceTrigger::new(
        h.store.clone(),
        service_session(),
        h.dispatcher.clone(),
        issuer(),
        h.clock(),
        3_600_000,
    )
}

fn event(id: &str, workflow_id: &str, rrule: RecurrenceRule) -> ScheduledEvent {
    ScheduledEvent {
        id: id.into(),
        kind: "scheduledevent".into(),
        name: format!("event {id}"),
        workflow_id: workflow_id.into(),
        created_by: "u-7".into(),
        created_by_name: "grace".into(),
        rrule,
    }
}

async fn seed_workflow(h: &Harness, id: &str, expiration: Option<i64>) {
    let mut doc = json!({
        "_id": id,
        "name": format!("Workflow {id}"),
        "templateId": format!("tpl-{id}"),
        "defaultArguments": {"region": "eu"}
    });
    if let Some(expiration) = expiration {
        doc["expiration"] = json!(expiration);
    }
    h.store
        .insert_one(&service_session(), collections::WORKFLOWS, doc)
        .await
        .unwrap();
}

async fn seed_event(h: &Harness, ev: &ScheduledEvent) {
    ScheduledEventRepo::insert(h.store.as_ref(), &service_session(), ev)
        .await
        .unwrap();
}

async fn records(h: &Harness) -> Vec<ExecutionRecord> {
    h.executions()
        .await
        .into_iter()
        .map(|d| serde_json::from_value(d).unwrap())
        .collect()
}

// ---------------------------------------------------------------------------
// Due evaluation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_c_identical_rules_fire_once_per_event() {
    let h = Harness::new().await;
    seed_workflow(&h, "wf-a", None).await;
    seed_workflow(&h, "wf-b", None).await;
    let rule = RecurrenceRule::new(t0(), Frequency::Daily);
    seed_event(&h, &event("e1", "wf-a", rule.clone())).await;
    seed_event(&h, &event("e2", "wf-b", rule)).await;

    h.clock.set(t0() + TimeDelta::days(1) + TimeDelta::seconds(12));
    let report = trigger(&h).tick().await.unwrap();
    assert_eq!(report.due, 2);
    assert_eq!(report.dispatched, 2);

    let recs = records(&h).await;
    assert_eq!(recs.len(), 2);
    let mut workflows: Vec<_> = recs.iter().map(|r| r.workflow_id.as_str()).collect();
    workflows.sort_unstable();
    assert_eq!(workflows, vec!["wf-a", "wf-b"]);
    assert_ne!(recs[0].correlation_id, recs[1].correlation_id);
}

#[tokio::test]
async fn due_event_runs_as_its_creator_with_workflow_defaults() {
    let h = Harness::new().await;
    seed_workflow(&h, "wf-a", Some(90_000)).await;
    seed_event(&h, &event("e1", "wf-a", RecurrenceRule::new(t0(), Frequency::Hourly))).await;

    h.clock.set(t0() + TimeDelta::hours(3));
    trigger(&h).tick().await.unwrap();

    let recs = records(&h).await;
    assert_eq!(recs.len(), 1);
    let rec = &recs[0];
    assert_eq!(rec.user_id, "u-7");
    assert_eq!(rec.user_name, "grace");
    assert_eq!(rec.template_id, "tpl-wf-a");
    assert_eq!(rec.expiration, 90_000);
    assert_eq!(rec.arguments["region"], "eu");

    let claims = issuer()
        .validate(h.messaging.sent_messages()[0].jwt.as_deref().unwrap())
        .unwrap();
    assert_eq!(claims.sub, "u-7");
}

#[tokio::test]
async fn workflow_without_expiration_uses_default() {
    let h = Harness::new().await;
    seed_workflow(&h, "wf-a", None).await;
    seed_event(&h, &event("e1", "wf-a", RecurrenceRule::new(t0(), Frequency::Minutely))).await;

    trigger(&h).tick().await.unwrap();
    assert_eq!(records(&h).await[0].expiration, 3_600_000);
}

#[tokio::test]
async fn weekly_monday_rule_fires_only_on_mondays_at_nine() {
    // t0 is Monday 2026-03-02 09:00 UTC.
    let h = Harness::new().await;
    seed_workflow(&h, "wf-a", None).await;
    let rule = RecurrenceRule::new(t0(), Frequency::Weekly).with_weekdays([Weekday::Mon]);
    seed_event(&h, &event("e1", "wf-a", rule)).await;
    let trigger = trigger(&h);

    for (offset, expect_due) in [
        (TimeDelta::zero(), true),
        (TimeDelta::minutes(1), false),
        (TimeDelta::days(1), false),
        (TimeDelta::days(6) + TimeDelta::hours(23), false),
        (TimeDelta::weeks(1), true),
        (TimeDelta::weeks(2) - TimeDelta::minutes(1), false),
        (TimeDelta::weeks(5), true),
    ] {
        h.clock.set(t0() + offset);
        let report = trigger.tick().await.unwrap();
        assert_eq!(report.due == 1, expect_due, "offset {offset}");
    }
    assert_eq!(records(&h).await.len(), 3);
}

#[tokio::test]
async fn ended_rule_is_never_due() {
    let h = Harness::new().await;
    seed_workflow(&h, "wf-a", None).await;
    let rule = RecurrenceRule::new(t0(), Frequency::Daily).with_until(t0() + TimeDelta::days(2));
    seed_event(&h, &event("e1", "wf-a", rule)).await;

    h.clock.set(t0() + TimeDelta::days(3));
    let report = trigger(&h).tick().await.unwrap();
    assert_eq!(report.active, 0);
    assert!(records(&h).await.is_empty());
}

// ---------------------------------------------------------------------------
// Tick guards and failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn same_minute_is_evaluated_once() {
    let h = Harness::new().await;
    seed_workflow(&h, "wf-a", None).await;
    seed_event(&h, &event("e1", "wf-a", RecurrenceRule::new(t0(), Frequency::Daily))).await;
    let trigger = trigger(&h);

    trigger.tick().await.unwrap();
    h.clock.advance(TimeDelta::seconds(30));
    let second = trigger.tick().await.unwrap();

    assert!(second.repeated);
    assert_eq!(records(&h).await.len(), 1);
}

#[tokio::test]
async fn missing_workflow_does_not_block_other_events() {
    let h = Harness::new().await;
    seed_workflow(&h, "wf-b", None).await;
    let rule = RecurrenceRule::new(t0(), Frequency::Daily);
    seed_event(&h, &event("e1", "wf-missing", rule.clone())).await;
    seed_event(&h, &event("e2", "wf-b", rule)).await;

    let report = trigger(&h).tick().await.unwrap();
    assert_eq!(report.due, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.dispatched, 1);
    assert_eq!(records(&h).await[0].workflow_id, "wf-b");
}

#[tokio::test]
async fn no_catch_up_for_missed_minutes() {
    let h = Harness::new().await;
    seed_workflow(&h, "wf-a", None).await;
    seed_event(&h, &event("e1", "wf-a", RecurrenceRule::new(t0(), Frequency::Daily))).await;

    // The 09:00 occurrence was missed; 09:01 is not due.
    h.clock.set(t0() + TimeDelta::minutes(1));
    let report = trigger(&h).tick().await.unwrap();
    assert_eq!(report.due, 0);
    assert!(records(&h).await.is_empty());
}

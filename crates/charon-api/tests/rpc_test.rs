//! RPC dispatch over the in-memory stores

use charon_api::Responder;
use charon_core::models::{
    Destination, DestinationRate, RateInterval, RateSlot, RatingPlan, RatingPlanActivation,
    RatingProfile, TimingSpec,
};
use charon_core::{AppConfig, AppError};
use charon_engine::{ActionExecutor, Context};
use charon_scheduler::Scheduler;
use charon_store::{LogMailer, MemAccountingStore, MemCdrStore, MemTariffStore};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TENANT: &str = "cgrates.org";

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

struct Fixture {
    responder: Arc<Responder>,
    tariff: Arc<MemTariffStore>,
}

/// UK numbers rated under the direct subject; `*any` as a fallback subject
/// prices everything at zero
async fn fixture() -> Fixture {
    let tariff = Arc::new(MemTariffStore::new());
    let accounting = Arc::new(MemAccountingStore::new());

    tariff.add_destination(Destination::new(TENANT, "DST_UK", &["44"]));

    let mut uk_plan = RatingPlan::new(TENANT, "RP_UK");
    uk_plan.add_rate_interval(
        "44",
        "DST_UK",
        RateInterval {
            timing: TimingSpec::default(),
            rating: DestinationRate::new(
                dec!(0),
                vec![RateSlot::new(
                    Duration::from_secs(0),
                    dec!(0.10),
                    Duration::from_secs(60),
                    Duration::from_secs(1),
                )],
            ),
            weight: 10.0,
        },
    );
    tariff.add_rating_plan(uk_plan);

    let mut any_plan = RatingPlan::new(TENANT, "RP_ANY");
    any_plan.add_rate_interval(
        charon_core::models::ANY,
        charon_core::models::ANY,
        RateInterval {
            timing: TimingSpec::default(),
            rating: DestinationRate::new(
                dec!(0),
                vec![RateSlot::new(
                    Duration::from_secs(0),
                    dec!(0),
                    Duration::from_secs(1),
                    Duration::from_secs(1),
                )],
            ),
            weight: 10.0,
        },
    );
    tariff.add_rating_plan(any_plan);

    let profile = |subject: &str, plan: &str, fallbacks: Vec<String>| RatingProfile {
        direction: "*out".to_string(),
        tenant: TENANT.to_string(),
        category: "call".to_string(),
        subject: subject.to_string(),
        activations: vec![RatingPlanActivation {
            activation_time: ts("2013-01-01T00:00:00Z"),
            rating_plan_id: plan.to_string(),
            fallback_subjects: fallbacks,
        }],
    };
    tariff.add_rating_profile(profile("testauthpostpaid1", "RP_UK", vec![]));
    tariff.add_rating_profile(profile(
        "testauthpostpaid2",
        "RP_UK",
        vec!["*any".to_string()],
    ));
    tariff.add_rating_profile(profile("*any", "RP_ANY", vec![]));

    let ctx = Context::new(
        AppConfig::default(),
        tariff.clone(),
        accounting,
        Arc::new(MemCdrStore::new()),
        Arc::new(LogMailer),
    );
    ctx.reload_tenant(TENANT).await.unwrap();
    let executor = ActionExecutor::new(ctx.clone());
    let (_scheduler, handle) = Scheduler::new(ctx.clone(), executor.clone());
    Fixture {
        responder: Responder::new(ctx, executor, handle),
        tariff,
    }
}

fn descriptor(subject: &str, destination: &str) -> serde_json::Value {
    json!({
        "direction": "*out",
        "category": "call",
        "tenant": TENANT,
        "subject": subject,
        "account": subject,
        "destination": destination,
        "time_start": "2015-08-27T11:26:00Z",
        "time_end": "2015-08-27T11:27:00Z",
        "tor": "*monetary",
    })
}

#[tokio::test]
async fn test_get_cost() {
    let fx = fixture().await;
    let result = fx
        .responder
        .dispatch(
            "Responder.GetCost",
            descriptor("testauthpostpaid1", "441231234"),
        )
        .await
        .unwrap();
    // 60 seconds at 0.10 per minute
    let cost: Decimal = result["cost"].as_str().unwrap().parse().unwrap();
    assert_eq!(cost, dec!(0.10));
}

#[tokio::test]
async fn test_max_session_time_with_fallback_is_unlimited() {
    let fx = fixture().await;
    fx.responder
        .dispatch(
            "Account.Set",
            json!({
                "tenant": TENANT,
                "account": "testauthpostpaid2",
                "allow_negative": true,
            }),
        )
        .await
        .unwrap();
    let result = fx
        .responder
        .dispatch(
            "Responder.GetMaxSessionTime",
            descriptor("testauthpostpaid2", "441231234"),
        )
        .await
        .unwrap();
    assert_eq!(result, json!(-1.0));
}

#[tokio::test]
async fn test_cost_without_fallback_fails_on_foreign_destination() {
    let fx = fixture().await;
    let err = fx
        .responder
        .dispatch(
            "Responder.GetCost",
            descriptor("testauthpostpaid1", "331231234"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RatingPlanNotFound(_)));
    assert_eq!(err.kind(), "rating_plan_not_found");
}

#[tokio::test]
async fn test_fallback_prices_foreign_destination_free() {
    let fx = fixture().await;
    let result = fx
        .responder
        .dispatch(
            "Responder.GetCost",
            descriptor("testauthpostpaid2", "331231234"),
        )
        .await
        .unwrap();
    let cost: Decimal = result["cost"].as_str().unwrap().parse().unwrap();
    assert_eq!(cost, dec!(0));
}

#[tokio::test]
async fn test_account_set_get_and_balance_add() {
    let fx = fixture().await;
    fx.responder
        .dispatch(
            "Account.Set",
            json!({"tenant": TENANT, "account": "12344"}),
        )
        .await
        .unwrap();

    fx.responder
        .dispatch(
            "Balance.Add",
            json!({
                "tenant": TENANT,
                "account": "12344",
                "type": "*voice",
                "filter": {"id": "mins"},
                "value": "40",
            }),
        )
        .await
        .unwrap();

    let result = fx
        .responder
        .dispatch("Account.Get", json!({"tenant": TENANT, "account": "12344"}))
        .await
        .unwrap();
    let summaries = result["summary"]["balance_summaries"].as_array().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0]["id"], "mins");

    let err = fx
        .responder
        .dispatch("Account.Get", json!({"tenant": TENANT, "account": "nope"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_binding_asap_plan_enqueues_task() {
    use charon_core::models::{ActionPlan, ActionTiming};
    let fx = fixture().await;
    fx.tariff.add_action_plan(ActionPlan {
        tenant: TENANT.to_string(),
        name: "TOPUP10_AT".to_string(),
        timings: vec![ActionTiming::new("TOPUP10_AC", TimingSpec::asap())],
    });

    fx.responder
        .dispatch(
            "Account.Set",
            json!({
                "tenant": TENANT,
                "account": "12344",
                "action_plan": "TOPUP10_AT",
            }),
        )
        .await
        .unwrap();
    assert_eq!(fx.tariff.pending_tasks(), 1);
}

#[tokio::test]
async fn test_unknown_method() {
    let fx = fixture().await;
    let err = fx
        .responder
        .dispatch("Responder.NoSuchThing", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

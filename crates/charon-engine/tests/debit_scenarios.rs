//! End-to-end debit scenarios over the in-memory stores

use charon_core::models::{
    action, Account, Action, ActionGroup, ActionTrigger, ActionTriggerGroup, Balance,
    BalanceFilter, BalanceType, CallDescriptor, Destination, DestinationRate, RateInterval,
    RateSlot, RatingPlan, RatingPlanActivation, RatingProfile, ThresholdType, TimingSpec,
};
use charon_core::{AppConfig, AppError};
use charon_engine::{ActionExecutor, Context, Debiter};
use charon_store::{LogMailer, MemAccountingStore, MemCdrStore, MemTariffStore};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const TENANT: &str = "cgrates.org";

struct Fixture {
    executor: Arc<ActionExecutor>,
    debiter: Debiter,
    tariff: Arc<MemTariffStore>,
    accounting: Arc<MemAccountingStore>,
}

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Tariff data of the simple-rated-call scenario: UK mobile numbers under
/// a 0.01 connect fee and the given per-second rate
async fn fixture(rate_per_second: Decimal) -> Fixture {
    let tariff = Arc::new(MemTariffStore::new());
    let accounting = Arc::new(MemAccountingStore::new());

    tariff.add_destination(Destination::new(TENANT, "DST_UK_Mobile_BIG5", &["447956"]));

    let mut plan = RatingPlan::new(TENANT, "RP_UK_MOBILE");
    plan.add_rate_interval(
        "447956",
        "DST_UK_Mobile_BIG5",
        RateInterval {
            timing: TimingSpec::default(),
            rating: DestinationRate::new(
                dec!(0.01),
                vec![RateSlot::new(secs(0), rate_per_second, secs(1), secs(1))],
            ),
            weight: 10.0,
        },
    );
    tariff.add_rating_plan(plan);

    tariff.add_rating_profile(RatingProfile {
        direction: "*out".to_string(),
        tenant: TENANT.to_string(),
        category: "call".to_string(),
        subject: "12344".to_string(),
        activations: vec![RatingPlanActivation {
            activation_time: ts("2013-01-01T00:00:00Z"),
            rating_plan_id: "RP_UK_MOBILE".to_string(),
            fallback_subjects: Vec::new(),
        }],
    });

    let ctx = Context::new(
        AppConfig::default(),
        tariff.clone(),
        accounting.clone(),
        Arc::new(MemCdrStore::new()),
        Arc::new(LogMailer),
    );
    ctx.reload_tenant(TENANT).await.unwrap();
    let executor = ActionExecutor::new(ctx.clone());
    let debiter = Debiter::new(ctx, executor.clone());
    Fixture {
        executor,
        debiter,
        tariff,
        accounting,
    }
}

/// Account 12344: 10 monetary units plus 40 voice seconds scoped to the
/// UK mobile destination
fn seeded_account() -> Account {
    let mut account = Account::new(TENANT, "12344");
    account.add_balance(
        BalanceType::Monetary,
        Balance {
            id: "money".to_string(),
            value: dec!(10),
            ..Balance::default()
        },
    );
    let mut scoped = HashMap::new();
    scoped.insert("DST_UK_Mobile_BIG5".to_string(), true);
    account.add_balance(
        BalanceType::Voice,
        Balance {
            id: "uk_minutes".to_string(),
            value: dec!(40),
            weight: 10.0,
            destination_ids: scoped,
            ..Balance::default()
        },
    );
    account
}

fn uk_call(start: &str, seconds: i64) -> CallDescriptor {
    let time_start = ts(start);
    let time_end = time_start + chrono::Duration::seconds(seconds);
    CallDescriptor {
        direction: "*out".to_string(),
        category: "call".to_string(),
        tenant: TENANT.to_string(),
        subject: "12344".to_string(),
        account: String::new(),
        destination: "447956933443".to_string(),
        time_start,
        time_end,
        duration_index: (time_end - time_start).to_std().unwrap(),
        tor: BalanceType::Voice,
        fallback_subjects: Vec::new(),
    }
}

async fn balance_value(accounting: &MemAccountingStore, name: &str, tor: BalanceType) -> Decimal {
    use charon_core::traits::AccountingStore;
    let account = accounting
        .get_account(TENANT, name)
        .await
        .unwrap()
        .expect("account exists");
    account.balances[&tor].iter().map(|b| b.value).sum()
}

#[tokio::test]
async fn test_simple_rated_call() {
    use charon_core::traits::AccountingStore;
    // free seconds covered by the voice balance, connect fee from money
    let fx = fixture(dec!(0)).await;
    fx.accounting.set_account(&seeded_account()).await.unwrap();

    let cc = fx
        .debiter
        .debit(&uk_call("2014-03-04T06:00:00Z", 10))
        .await
        .unwrap();

    assert_eq!(cc.cost(), dec!(0.01));
    assert_eq!(
        balance_value(&fx.accounting, "12344", BalanceType::Voice).await,
        dec!(30)
    );
    assert_eq!(
        balance_value(&fx.accounting, "12344", BalanceType::Monetary).await,
        dec!(9.99)
    );
    // every increment names the balance that paid it
    let paid: Decimal = cc
        .timespans
        .iter()
        .flat_map(|span| span.increments.iter())
        .filter_map(|inc| inc.balance_info.unit.as_ref())
        .map(|unit| unit.consumed)
        .sum();
    assert!(paid > Decimal::ZERO);
}

#[tokio::test]
async fn test_debit_conservation() {
    use charon_core::traits::AccountingStore;
    // priced seconds paid by money: 0.10/s for 10s plus the connect fee
    let fx = fixture(dec!(0.10)).await;
    let mut account = Account::new(TENANT, "12344");
    account.add_balance(
        BalanceType::Monetary,
        Balance {
            id: "money".to_string(),
            value: dec!(10),
            ..Balance::default()
        },
    );
    fx.accounting.set_account(&account).await.unwrap();

    let mut cd = uk_call("2014-03-04T06:00:00Z", 10);
    cd.tor = BalanceType::Monetary;
    let cc = fx.debiter.debit(&cd).await.unwrap();

    assert_eq!(cc.cost(), dec!(1.01));
    // sum of balance deltas equals the negated cost
    assert_eq!(
        balance_value(&fx.accounting, "12344", BalanceType::Monetary).await,
        dec!(8.99)
    );
}

#[tokio::test]
async fn test_insufficient_credit_is_atomic() {
    use charon_core::traits::AccountingStore;
    let fx = fixture(dec!(0.10)).await;
    let mut account = Account::new(TENANT, "12344");
    account.add_balance(
        BalanceType::Monetary,
        Balance {
            id: "money".to_string(),
            value: dec!(5),
            ..Balance::default()
        },
    );
    fx.accounting.set_account(&account).await.unwrap();

    let mut cd = uk_call("2014-03-04T06:00:00Z", 60);
    cd.tor = BalanceType::Monetary;
    let err = fx.debiter.debit(&cd).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientCredit { .. }));

    // no partial consumption is observable
    assert_eq!(
        balance_value(&fx.accounting, "12344", BalanceType::Monetary).await,
        dec!(5)
    );
}

#[tokio::test]
async fn test_max_debit_truncates() {
    use charon_core::traits::AccountingStore;
    let fx = fixture(dec!(0.10)).await;
    let mut account = Account::new(TENANT, "12344");
    account.add_balance(
        BalanceType::Monetary,
        Balance {
            id: "money".to_string(),
            value: dec!(1.01),
            ..Balance::default()
        },
    );
    fx.accounting.set_account(&account).await.unwrap();

    let mut cd = uk_call("2014-03-04T06:00:00Z", 60);
    cd.tor = BalanceType::Monetary;
    let cc = fx.debiter.max_debit(&cd).await.unwrap();

    // 0.01 connect + 10 seconds at 0.10
    assert_eq!(cc.duration(), secs(10));
    assert_eq!(cc.cost(), dec!(1.01));
    assert_eq!(
        balance_value(&fx.accounting, "12344", BalanceType::Monetary).await,
        dec!(0)
    );
}

#[tokio::test]
async fn test_dry_run_leaves_no_trace() {
    use charon_core::traits::AccountingStore;
    let fx = fixture(dec!(0)).await;
    fx.accounting.set_account(&seeded_account()).await.unwrap();

    let cc = fx
        .debiter
        .dry_run(&uk_call("2014-03-04T06:00:00Z", 10))
        .await
        .unwrap();
    assert_eq!(cc.cost(), dec!(0.01));

    assert_eq!(
        balance_value(&fx.accounting, "12344", BalanceType::Voice).await,
        dec!(40)
    );
    assert_eq!(
        balance_value(&fx.accounting, "12344", BalanceType::Monetary).await,
        dec!(10)
    );
}

#[tokio::test]
async fn test_disabled_account_is_refused() {
    use charon_core::traits::AccountingStore;
    let fx = fixture(dec!(0)).await;
    let mut account = seeded_account();
    account.disabled = true;
    fx.accounting.set_account(&account).await.unwrap();

    let err = fx
        .debiter
        .debit(&uk_call("2014-03-04T06:00:00Z", 10))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AccountDisabled(_)));
}

#[tokio::test]
async fn test_min_balance_trigger_disables_account() {
    use charon_core::traits::AccountingStore;
    let fx = fixture(dec!(0.10)).await;

    fx.tariff.add_action_group(ActionGroup {
        tenant: TENANT.to_string(),
        name: "DISABLE_ACNT".to_string(),
        actions: vec![Action::new(action::DISABLE_ACCOUNT)],
    });
    fx.tariff.add_trigger_group(ActionTriggerGroup {
        tenant: TENANT.to_string(),
        name: "TG_LOW_BALANCE".to_string(),
        triggers: vec![ActionTrigger {
            unique_id: "at_low_money".to_string(),
            threshold_type: ThresholdType::MinBalance,
            threshold_value: dec!(5),
            tor: BalanceType::Monetary,
            filter: BalanceFilter::default(),
            actions_id: "DISABLE_ACNT".to_string(),
            recurrent: false,
            min_sleep: Duration::ZERO,
            activation_time: None,
            expiration_time: None,
            weight: 10.0,
            min_queued_items: 0,
        }],
    });

    let mut account = Account::new(TENANT, "12344");
    account.trigger_ids = vec!["TG_LOW_BALANCE".to_string()];
    account.add_balance(
        BalanceType::Monetary,
        Balance {
            id: "money".to_string(),
            value: dec!(10),
            ..Balance::default()
        },
    );
    fx.accounting.set_account(&account).await.unwrap();

    // debit 6 monetary units through the action path
    let mut debit = Action::new(action::DEBIT);
    debit.tor = Some(BalanceType::Monetary);
    debit.filter = BalanceFilter {
        id: Some("money".to_string()),
        value: Some(dec!(6)),
        ..BalanceFilter::default()
    };
    fx.debiter
        .apply_account_action(TENANT, "12344", debit)
        .await
        .unwrap();

    let account = fx
        .accounting
        .get_account(TENANT, "12344")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.balances[&BalanceType::Monetary][0].value, dec!(4));
    assert!(account.disabled);
    assert!(account.trigger_records["at_low_money"].executed);
}

#[tokio::test]
async fn test_topup_reset_sets_exact_value() {
    use charon_core::traits::AccountingStore;
    let fx = fixture(dec!(0)).await;

    let mut topup = Action::new(action::TOPUP_RESET);
    topup.tor = Some(BalanceType::Voice);
    topup.filter = BalanceFilter {
        id: Some("free_minutes".to_string()),
        value: Some(dec!(40)),
        ..BalanceFilter::default()
    };
    fx.tariff.add_action_group(ActionGroup {
        tenant: TENANT.to_string(),
        name: "TOPUP10_AC".to_string(),
        actions: vec![topup],
    });

    let mut account = Account::new(TENANT, "12344");
    account.add_balance(
        BalanceType::Voice,
        Balance {
            id: "free_minutes".to_string(),
            value: dec!(7),
            ..Balance::default()
        },
    );
    fx.accounting.set_account(&account).await.unwrap();

    fx.executor
        .execute_for_account(TENANT, "12344", "TOPUP10_AC")
        .await
        .unwrap();
    assert_eq!(
        balance_value(&fx.accounting, "12344", BalanceType::Voice).await,
        dec!(40)
    );

    // running it again keeps the value exact, not additive
    fx.executor
        .execute_for_account(TENANT, "12344", "TOPUP10_AC")
        .await
        .unwrap();
    assert_eq!(
        balance_value(&fx.accounting, "12344", BalanceType::Voice).await,
        dec!(40)
    );
}

#[tokio::test]
async fn test_add_then_remove_leaves_account_unchanged() {
    use charon_core::traits::AccountingStore;
    let fx = fixture(dec!(0)).await;
    fx.accounting.set_account(&seeded_account()).await.unwrap();

    let filter = BalanceFilter {
        id: Some("money".to_string()),
        ..BalanceFilter::default()
    };
    let mut add = Action::new(action::TOPUP);
    add.tor = Some(BalanceType::Monetary);
    add.filter = filter.clone();
    add.filter.value = Some(dec!(2.5));
    fx.debiter
        .apply_account_action(TENANT, "12344", add)
        .await
        .unwrap();

    let mut sub = Action::new(action::DEBIT);
    sub.tor = Some(BalanceType::Monetary);
    sub.filter = filter;
    sub.filter.value = Some(dec!(2.5));
    fx.debiter
        .apply_account_action(TENANT, "12344", sub)
        .await
        .unwrap();

    assert_eq!(
        balance_value(&fx.accounting, "12344", BalanceType::Monetary).await,
        dec!(10)
    );
}

#[tokio::test]
async fn test_no_prefix_match_fails_rating() {
    let fx = fixture(dec!(0)).await;
    use charon_core::traits::AccountingStore;
    fx.accounting.set_account(&seeded_account()).await.unwrap();

    let mut cd = uk_call("2014-03-04T06:00:00Z", 10);
    cd.destination = "331234".to_string();
    let err = fx.debiter.debit(&cd).await.unwrap_err();
    assert!(matches!(err, AppError::RatingPlanNotFound(_)));
}

#[tokio::test]
async fn test_get_max_session_time() {
    use charon_core::traits::AccountingStore;
    let fx = fixture(dec!(0.10)).await;

    // postpaid: unlimited
    let mut postpaid = Account::new(TENANT, "12344");
    postpaid.allow_negative = true;
    fx.accounting.set_account(&postpaid).await.unwrap();
    let mut cd = uk_call("2014-03-04T06:00:00Z", 60);
    cd.tor = BalanceType::Monetary;
    assert_eq!(fx.debiter.get_max_session_time(&cd).await.unwrap(), -1.0);

    // prepaid with 1.01: connect fee plus ten seconds
    let mut prepaid = Account::new(TENANT, "12344");
    prepaid.add_balance(
        BalanceType::Monetary,
        Balance {
            id: "money".to_string(),
            value: dec!(1.01),
            ..Balance::default()
        },
    );
    fx.accounting.set_account(&prepaid).await.unwrap();
    let seconds = fx.debiter.get_max_session_time(&cd).await.unwrap();
    assert_eq!(seconds, 10.0);
    // the probe must not consume anything
    assert_eq!(
        balance_value(&fx.accounting, "12344", BalanceType::Monetary).await,
        dec!(1.01)
    );
}

#[tokio::test]
async fn test_shared_group_pays_from_member() {
    use charon_core::models::{SharedGroup, SharingStrategy};
    use charon_core::traits::AccountingStore;
    let fx = fixture(dec!(0.10)).await;

    let mut group = SharedGroup::new(TENANT, "SG_FAMILY", SharingStrategy::Highest);
    group.add_member("12344");
    group.add_member("12345");
    fx.tariff.add_shared_group(group);

    // the caller owns an empty shared balance; the sibling holds the money
    let mut caller = Account::new(TENANT, "12344");
    caller.add_balance(
        BalanceType::Monetary,
        Balance {
            id: "pool".to_string(),
            value: dec!(0.02),
            shared_groups: vec!["SG_FAMILY".to_string()],
            ..Balance::default()
        },
    );
    fx.accounting.set_account(&caller).await.unwrap();

    let mut sibling = Account::new(TENANT, "12345");
    sibling.add_balance(
        BalanceType::Monetary,
        Balance {
            id: "pool".to_string(),
            value: dec!(10),
            shared_groups: vec!["SG_FAMILY".to_string()],
            ..Balance::default()
        },
    );
    fx.accounting.set_account(&sibling).await.unwrap();

    let mut cd = uk_call("2014-03-04T06:00:00Z", 10);
    cd.tor = BalanceType::Monetary;
    let cc = fx.debiter.debit(&cd).await.unwrap();
    assert_eq!(cc.cost(), dec!(1.01));

    // the highest-value member paid
    assert_eq!(
        balance_value(&fx.accounting, "12345", BalanceType::Monetary).await,
        dec!(8.99)
    );
    assert_eq!(
        balance_value(&fx.accounting, "12344", BalanceType::Monetary).await,
        dec!(0.02)
    );
}

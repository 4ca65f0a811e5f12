//! Full-system scenarios: events in through the mock gateway hubs, state
//! convergence and enforcement observed at the boundaries.

use chrono::{TimeDelta, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::{sync::Arc, time::Duration};
use vigil::{
    config::{CooldownTier, LockoutUntilConfig, UnrealizedScope, VigilConfig},
    system::{SystemBuilder, VigilSystem},
};
use vigil_gateway::{
    id::{AccountId, ContractId, OrderId, PositionId, SymbolId, TradeId},
    mock::{MockAction, MockGateway},
    realtime::UserHubEvent,
    types::{
        AccountUpdate, Contract, OrderSide, PositionSide, PositionSnapshot, QuoteUpdate,
        TradeFill,
    },
};
use vigil_store::{LockoutKind, Store};

const ACCOUNT: i64 = 12345;

fn base_config() -> VigilConfig {
    serde_json::from_value(serde_json::json!({
        "accounts": [ACCOUNT],
        "gateway": {
            "rest_url": "https://gateway.test",
            "user_hub_url": "wss://gateway.test/hubs/user",
            "market_hub_url": "wss://gateway.test/hubs/market"
        },
        "rules": {}
    }))
    .unwrap()
}

fn mnq() -> Contract {
    Contract::new(
        ContractId::new("CON.F.US.MNQ.U25"),
        SymbolId::new("F.US.MNQ"),
        dec!(0.25),
        dec!(0.50),
        "Micro E-mini Nasdaq-100".to_string(),
    )
}

fn ep() -> Contract {
    Contract::new(
        ContractId::new("CON.F.US.EP.U25"),
        SymbolId::new("F.US.EP"),
        dec!(0.25),
        dec!(12.50),
        "E-mini S&P 500".to_string(),
    )
}

fn position(id: i64, contract: &Contract, side: PositionSide, size: u32, entry: Decimal) -> PositionSnapshot {
    PositionSnapshot {
        id: PositionId::new(id),
        account_id: AccountId::new(ACCOUNT),
        contract_id: contract.id.clone(),
        side,
        size,
        average_price: entry,
        creation_timestamp: Utc::now(),
    }
}

fn trade(id: i64, pnl: Option<Decimal>) -> TradeFill {
    TradeFill {
        id: TradeId::new(id),
        account_id: AccountId::new(ACCOUNT),
        contract_id: ContractId::new("CON.F.US.MNQ.U25"),
        order_id: OrderId::new(id),
        side: OrderSide::Sell,
        size: 1,
        price: dec!(21000),
        profit_and_loss: pnl,
        fees: dec!(0.74),
        voided: false,
        creation_timestamp: Utc::now(),
    }
}

fn quote(contract: &Contract, last: Decimal) -> QuoteUpdate {
    QuoteUpdate {
        contract_id: contract.id.clone(),
        best_bid: Some(last - dec!(0.25)),
        best_ask: Some(last + dec!(0.25)),
        last_price: last,
        timestamp: Utc::now(),
    }
}

async fn start(config: VigilConfig, gateway: &MockGateway, store: Arc<Store>) -> VigilSystem<MockGateway> {
    gateway.insert_contract(mnq());
    gateway.insert_contract(ep());
    SystemBuilder::new(
        config,
        gateway.clone(),
        Arc::new(gateway.clone()),
        Arc::new(gateway.clone()),
        store,
    )
    .start()
    .await
    .expect("system starts")
}

/// Poll until `predicate` holds or the deadline passes.
async fn wait_for<F>(mut predicate: F, what: &str)
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// S1 - MaxContracts breach: two opens totalling six contracts against a
/// limit of five trigger close-all; the state tracker converges to empty and
/// the enforcement log records the action.
#[tokio::test(flavor = "multi_thread")]
async fn test_s1_max_contracts_close_all() {
    let mut config = base_config();
    config.rules.max_contracts.enabled = true;
    config.rules.max_contracts.limit = 5;

    let gateway = MockGateway::new();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let system = start(config, &gateway, Arc::clone(&store)).await;
    let admin = system.admin();

    gateway.push_user_event(UserHubEvent::Position(position(
        1, &mnq(), PositionSide::Long, 3, dec!(21000),
    )));
    wait_for(
        || admin.positions(AccountId::new(ACCOUNT)).len() == 1,
        "first position tracked",
    )
    .await;

    gateway.push_user_event(UserHubEvent::Position(position(
        2, &ep(), PositionSide::Long, 3, dec!(5400),
    )));

    wait_for(
        || admin.positions(AccountId::new(ACCOUNT)).is_empty(),
        "positions closed after breach",
    )
    .await;

    let closes: Vec<_> = gateway
        .actions()
        .into_iter()
        .filter(|action| matches!(action, MockAction::ClosePosition { .. }))
        .collect();
    assert_eq!(closes.len(), 2);

    let log = admin.recent_enforcements(10).unwrap();
    assert!(
        log.iter()
            .any(|record| record.rule_id == "R1"
                && record.action == "close_all_positions"
                && record.success)
    );

    system.stop().await.unwrap();
}

/// S2 - Daily realized loss: -200, -250, -150 crosses the -500 limit on the
/// third fill; close-all + cancel-all run and a hard lockout holds until the
/// next scheduled reset.
#[tokio::test(flavor = "multi_thread")]
async fn test_s2_daily_realized_loss_lockout() {
    let mut config = base_config();
    config.rules.daily_realized_loss.enabled = true;
    config.rules.daily_realized_loss.loss_limit = dec!(500);
    config.rules.daily_realized_loss.lockout = LockoutUntilConfig::DailyReset;

    let gateway = MockGateway::new();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let system = start(config, &gateway, Arc::clone(&store)).await;
    let admin = system.admin();
    let account = AccountId::new(ACCOUNT);

    for (id, pnl) in [(1, dec!(-200)), (2, dec!(-250)), (3, dec!(-150))] {
        gateway.push_user_event(UserHubEvent::Trade(trade(id, Some(pnl))));
    }

    wait_for(
        || admin.is_locked_out(account, Utc::now()),
        "lockout after third trade",
    )
    .await;

    assert_eq!(admin.daily_realized(account), dec!(-600));

    let info = admin.lockout_info(account, Utc::now()).unwrap();
    assert_eq!(info.kind, LockoutKind::Hard);
    let expected_until = system.reset_scheduler().next_reset_time(Utc::now());
    assert_eq!(info.until, Some(expected_until));

    let log = admin.recent_enforcements(10).unwrap();
    for action in ["close_all_positions", "cancel_all_orders", "apply_lockout"] {
        assert!(
            log.iter()
                .any(|record| record.rule_id == "R3" && record.action == action),
            "missing {action}"
        );
    }

    system.stop().await.unwrap();
}

/// S3 - Unrealized loss on quotes: Long 3 MNQ @21000 with a -300 total
/// limit; the -300 quote is not a breach, the -450 quote closes the
/// position.
#[tokio::test(flavor = "multi_thread")]
async fn test_s3_unrealized_loss_on_quote() {
    let mut config = base_config();
    config.rules.daily_unrealized_loss.enabled = true;
    config.rules.daily_unrealized_loss.loss_limit = dec!(300);
    config.rules.daily_unrealized_loss.scope = UnrealizedScope::Total;

    let gateway = MockGateway::new();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let system = start(config, &gateway, Arc::clone(&store)).await;
    let admin = system.admin();
    let account = AccountId::new(ACCOUNT);

    gateway.push_user_event(UserHubEvent::Position(position(
        1, &mnq(), PositionSide::Long, 3, dec!(21000),
    )));
    wait_for(|| admin.positions(account).len() == 1, "position tracked").await;

    for last in [dec!(21000), dec!(20950), dec!(20900)] {
        gateway.push_quote(quote(&mnq(), last));
    }
    // Give the -300 quote time to be (not) acted on.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(gateway.actions().is_empty(), "no breach at the limit");
    assert_eq!(admin.positions(account).len(), 1);

    gateway.push_quote(quote(&mnq(), dec!(20850)));
    wait_for(|| admin.positions(account).is_empty(), "position closed").await;

    system.stop().await.unwrap();
}

/// S4 - Cooldown after loss: a -350 fill takes the most severe matching
/// tier (1800s); the cooldown lockout and its paired timer both exist.
#[tokio::test(flavor = "multi_thread")]
async fn test_s4_cooldown_after_loss() {
    let mut config = base_config();
    config.rules.cooldown_after_loss.enabled = true;
    config.rules.cooldown_after_loss.tiers = vec![
        CooldownTier { loss_amount: dec!(-100), cooldown_secs: 300 },
        CooldownTier { loss_amount: dec!(-200), cooldown_secs: 900 },
        CooldownTier { loss_amount: dec!(-300), cooldown_secs: 1800 },
    ];

    let gateway = MockGateway::new();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let system = start(config, &gateway, Arc::clone(&store)).await;
    let admin = system.admin();
    let account = AccountId::new(ACCOUNT);

    gateway.push_user_event(UserHubEvent::Trade(trade(1, Some(dec!(-350)))));

    wait_for(|| admin.is_locked_out(account, Utc::now()), "cooldown lockout").await;

    let info = admin.lockout_info(account, Utc::now()).unwrap();
    assert_eq!(info.kind, LockoutKind::Cooldown);
    assert!(info.remaining_secs > 1700 && info.remaining_secs <= 1800);

    let timers = admin.active_timers(Utc::now());
    assert!(
        timers
            .iter()
            .any(|timer| timer.name == format!("cooldown_{ACCOUNT}"))
    );

    system.stop().await.unwrap();
}

/// S5 - No-stop-loss grace: a position that never sees a qualifying stop is
/// closed by the sweep once the grace period elapses.
#[tokio::test(flavor = "multi_thread")]
async fn test_s5_stop_loss_grace_close() {
    let mut config = base_config();
    config.rules.no_stop_loss_grace.enabled = true;
    config.rules.no_stop_loss_grace.grace_period_secs = 1;

    let gateway = MockGateway::new();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let system = start(config, &gateway, Arc::clone(&store)).await;
    let admin = system.admin();
    let account = AccountId::new(ACCOUNT);

    gateway.push_user_event(UserHubEvent::Position(position(
        1, &mnq(), PositionSide::Long, 2, dec!(21000),
    )));
    wait_for(
        || admin.pending_stops(account).len() == 1,
        "position tracked awaiting stop",
    )
    .await;

    // The 1 Hz sweep fires the rule once elapsed exceeds the grace period.
    wait_for(|| admin.positions(account).is_empty(), "position closed by grace rule").await;
    assert!(admin.pending_stops(account).is_empty());

    let log = admin.recent_enforcements(10).unwrap();
    assert!(log.iter().any(|record| record.rule_id == "R8"));

    system.stop().await.unwrap();
}

/// S6 - Daily reset: P&L zeroed, trade ring cleared, due lockout swept,
/// and the once-per-date guard holds.
#[tokio::test(flavor = "multi_thread")]
async fn test_s6_daily_reset() {
    let config = base_config();
    let gateway = MockGateway::new();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let system = start(config, &gateway, Arc::clone(&store)).await;
    let admin = system.admin();
    let account = AccountId::new(ACCOUNT);

    gateway.push_user_event(UserHubEvent::Trade(trade(1, Some(dec!(-250)))));
    wait_for(
        || admin.daily_realized(account) == dec!(-250),
        "realized pnl applied",
    )
    .await;
    assert_eq!(admin.trade_counts(account, Utc::now()).session, 1);

    let reset_at = Utc::now();
    assert!(system.reset_scheduler().trigger_now(reset_at));

    assert_eq!(admin.daily_realized(account), Decimal::ZERO);
    assert_eq!(admin.trade_counts(account, Utc::now()).session, 0);

    // Already fired for this date: the guard refuses a second firing.
    assert!(!system.reset_scheduler().trigger_now(reset_at + TimeDelta::minutes(1)));

    system.stop().await.unwrap();
}

/// S7 - Crash recovery: state written through to the store is rebuilt by a
/// fresh system over the same store, and new fills continue the running
/// total.
#[tokio::test(flavor = "multi_thread")]
async fn test_s7_crash_recovery() {
    let mut config = base_config();
    config.rules.daily_realized_loss.enabled = true;
    config.rules.daily_realized_loss.loss_limit = dec!(500);

    let gateway = MockGateway::new();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let account = AccountId::new(ACCOUNT);

    {
        let system = start(config.clone(), &gateway, Arc::clone(&store)).await;
        let admin = system.admin();

        gateway.push_user_event(UserHubEvent::Trade(trade(1, Some(dec!(-250)))));
        gateway.push_user_event(UserHubEvent::Position(position(
            1, &mnq(), PositionSide::Long, 1, dec!(21000),
        )));
        wait_for(
            || admin.daily_realized(account) == dec!(-250) && admin.positions(account).len() == 1,
            "pre-crash state",
        )
        .await;
        // Crash: the system is dropped without an orderly stop. Write-through
        // persistence is all that survives.
        drop(system);
    }

    let system = start(config, &gateway, Arc::clone(&store)).await;
    let admin = system.admin();

    assert_eq!(admin.daily_realized(account), dec!(-250));
    assert_eq!(admin.positions(account).len(), 1);

    gateway.push_user_event(UserHubEvent::Trade(trade(2, Some(dec!(50)))));
    wait_for(
        || admin.daily_realized(account) == dec!(-200),
        "post-restart fill applied",
    )
    .await;

    system.stop().await.unwrap();
}

/// R10 end to end: an account update with trading revoked flattens the
/// account and applies a permanent lockout.
#[tokio::test(flavor = "multi_thread")]
async fn test_auth_loss_guard_permanent_lockout() {
    let mut config = base_config();
    config.rules.auth_loss_guard.enabled = true;

    let gateway = MockGateway::new();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let system = start(config, &gateway, Arc::clone(&store)).await;
    let admin = system.admin();
    let account = AccountId::new(ACCOUNT);

    gateway.seed_position(position(1, &mnq(), PositionSide::Long, 2, dec!(21000)));
    gateway.push_user_event(UserHubEvent::Account(AccountUpdate::new(account, false, false)));

    wait_for(|| admin.is_locked_out(account, Utc::now()), "permanent lockout").await;

    let info = admin.lockout_info(account, Utc::now()).unwrap();
    assert_eq!(info.kind, LockoutKind::Permanent);
    assert_eq!(info.until, None);

    // Permanent lockouts survive any amount of time.
    assert!(admin.is_locked_out(account, Utc::now() + TimeDelta::days(30)));

    system.stop().await.unwrap();
}

/// User hub outage: after the reconnect markers the daemon re-subscribes and
/// keeps processing events.
#[tokio::test(flavor = "multi_thread")]
async fn test_reconnect_continues_processing() {
    let config = base_config();
    let gateway = MockGateway::new();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let system = start(config, &gateway, Arc::clone(&store)).await;
    let admin = system.admin();
    let account = AccountId::new(ACCOUNT);

    assert_eq!(gateway.subscribed_accounts(), vec![account]);

    gateway.interrupt_user_hub();
    gateway.push_user_event(UserHubEvent::Trade(trade(1, Some(dec!(-25)))));

    wait_for(
        || admin.daily_realized(account) == dec!(-25),
        "event processed after reconnect",
    )
    .await;

    system.stop().await.unwrap();
}

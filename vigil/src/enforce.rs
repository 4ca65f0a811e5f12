use crate::{
    config::RetryConfig,
    lockout::LockoutManager,
    reset::ResetScheduler,
    rules::{Breach, EnforcementAction, LockoutUntil, RuleId},
    state::{StateTracker, contracts::ContractCache, pending_stop::PendingStopTracker},
    timer::{TimerWheel, cooldown_timer_name},
};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use vigil_gateway::{
    error::GatewayError,
    id::{AccountId, ContractId, OrderId, PositionId},
    rest::GatewayRestApi,
    types::{OrderKind, OrderRequest, OrderSide, PositionSide},
};
use vigil_store::{EnforcementRecord, LockoutKind, LockoutRecord, Store};

/// Jittered exponential backoff for transient gateway faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        // Jitter in [0.5, 1.5).
        let jitter = rand::rng().random_range(0.5..1.5);
        exponential.mul_f64(jitter).min(self.max_delay)
    }
}

/// Run `op` with the retry taxonomy: transient faults retry with jittered
/// backoff, rate limits honour `Retry-After`, everything else fails
/// immediately.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_transient() => return Err(error),
            Err(error) => {
                attempt += 1;
                if attempt >= policy.attempts {
                    return Err(error);
                }
                let delay = error
                    .retry_after()
                    .unwrap_or_else(|| policy.delay_for(attempt - 1));
                warn!(attempt, ?delay, %error, "transient gateway fault, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// A breach queued for the executor pool.
#[derive(Debug)]
pub struct EnforcementJob {
    pub account: AccountId,
    pub breach: Breach,
}

/// The only component that mutates the outside world.
///
/// Closes positions, cancels orders, applies lockouts; every action is
/// idempotent (state is re-read immediately before acting) and appended to
/// the durable enforcement log. Actions for the same account are serialized;
/// different accounts proceed in parallel.
#[derive(Debug)]
pub struct EnforcementExecutor<Rest> {
    rest: Rest,
    store: Arc<Store>,
    state: Arc<StateTracker>,
    lockouts: Arc<LockoutManager>,
    timers: Arc<TimerWheel>,
    reset: Arc<ResetScheduler>,
    contracts: Arc<ContractCache<Rest>>,
    pending_stops: Arc<PendingStopTracker>,
    retry: RetryPolicy,
    account_locks: Mutex<FnvHashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
    /// Guards the apply/remove/log lockout sequence against interleaving.
    lockout_write: Mutex<()>,
}

impl<Rest> EnforcementExecutor<Rest>
where
    Rest: GatewayRestApi + Clone,
{
    pub fn new(
        rest: Rest,
        store: Arc<Store>,
        state: Arc<StateTracker>,
        lockouts: Arc<LockoutManager>,
        timers: Arc<TimerWheel>,
        reset: Arc<ResetScheduler>,
        contracts: Arc<ContractCache<Rest>>,
        pending_stops: Arc<PendingStopTracker>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            rest,
            store,
            state,
            lockouts,
            timers,
            reset,
            contracts,
            pending_stops,
            retry,
            account_locks: Mutex::new(FnvHashMap::default()),
            lockout_write: Mutex::new(()),
        }
    }

    fn account_lock(&self, account: AccountId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.account_locks
                .lock()
                .entry(account)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Execute every action of a breach, in order. Returns overall success
    /// (`all actions succeeded`).
    pub async fn enforce(&self, account: AccountId, breach: &Breach, now: DateTime<Utc>) -> bool {
        let lock = self.account_lock(account);
        let _guard = lock.lock().await;

        info!(
            %account,
            rule = %breach.rule,
            reason = %breach.reason,
            actions = breach.actions.len(),
            "enforcing breach"
        );

        let mut success = true;
        for action in &breach.actions {
            success &= self.run_action(account, breach, action, now).await;
        }
        success
    }

    async fn run_action(
        &self,
        account: AccountId,
        breach: &Breach,
        action: &EnforcementAction,
        now: DateTime<Utc>,
    ) -> bool {
        let started = std::time::Instant::now();
        let (name, outcome) = match action {
            EnforcementAction::CloseAllPositions => {
                ("close_all_positions", self.close_all_positions(account).await)
            }
            EnforcementAction::CancelAllOrders => {
                ("cancel_all_orders", self.cancel_all_orders(account).await)
            }
            EnforcementAction::CloseContract { contract } => {
                ("close_position", self.close_contract(account, contract).await)
            }
            EnforcementAction::ReduceContractTo { contract, target } => (
                "reduce_position",
                self.reduce_contract_to(account, contract, *target).await,
            ),
            EnforcementAction::ReduceAccountToNet { target } => (
                "reduce_to_limit",
                self.reduce_account_to_net(account, *target).await,
            ),
            EnforcementAction::CancelOrder { order } => {
                ("cancel_order", self.cancel_order(account, *order).await)
            }
            EnforcementAction::PlaceStopLoss {
                position,
                offset_ticks,
            } => (
                "place_stop_loss",
                self.place_stop_loss(account, *position, *offset_ticks, now)
                    .await,
            ),
            EnforcementAction::ApplyLockout {
                kind,
                until,
                reason,
            } => (
                "apply_lockout",
                self.apply_lockout(account, breach.rule, *kind, *until, reason, now),
            ),
            EnforcementAction::StartCooldown {
                duration_secs,
                reason,
            } => (
                "start_cooldown",
                self.start_cooldown(account, breach.rule, *duration_secs, reason, now),
            ),
        };

        let execution_ms = started.elapsed().as_millis() as i64;
        let (success, details) = match outcome {
            Ok(details) => (true, details),
            Err(error) => {
                error!(%account, rule = %breach.rule, action = name, %error, "enforcement action failed");
                (false, serde_json::json!({ "error": error.to_string() }))
            }
        };

        self.log_enforcement(EnforcementRecord {
            time: now,
            account_id: account,
            rule_id: breach.rule.to_string(),
            action: name.to_string(),
            reason: breach.reason.clone(),
            details,
            success,
            execution_ms,
        });
        success
    }

    async fn close_all_positions(
        &self,
        account: AccountId,
    ) -> Result<serde_json::Value, GatewayError> {
        let positions = with_retry(self.retry, || self.rest.search_open_positions(account)).await?;
        if positions.is_empty() {
            return Ok(serde_json::json!({ "count": 0 }));
        }

        let mut closed = 0usize;
        let mut failures = Vec::new();
        for position in &positions {
            match with_retry(self.retry, || {
                self.rest.close_position(account, &position.contract_id)
            })
            .await
            {
                Ok(()) => {
                    closed += 1;
                    self.pending_stops.remove(position.id);
                }
                Err(error) => {
                    // One stuck position must not stop the rest closing.
                    error!(%account, contract = %position.contract_id, %error, "failed to close position");
                    failures.push(position.contract_id.as_ref().to_string());
                }
            }
        }

        if failures.is_empty() {
            Ok(serde_json::json!({ "count": closed }))
        } else {
            Err(GatewayError::Api {
                code: None,
                message: format!("failed to close: {}", failures.join(", ")),
            })
        }
    }

    async fn cancel_all_orders(
        &self,
        account: AccountId,
    ) -> Result<serde_json::Value, GatewayError> {
        let orders = with_retry(self.retry, || self.rest.search_open_orders(account)).await?;
        if orders.is_empty() {
            return Ok(serde_json::json!({ "count": 0 }));
        }

        let mut cancelled = 0usize;
        let mut failures = Vec::new();
        for order in &orders {
            match with_retry(self.retry, || self.rest.cancel_order(account, order.id)).await {
                Ok(()) => cancelled += 1,
                Err(error) => {
                    error!(%account, order = %order.id, %error, "failed to cancel order");
                    failures.push(order.id.to_string());
                }
            }
        }

        if failures.is_empty() {
            Ok(serde_json::json!({ "count": cancelled }))
        } else {
            Err(GatewayError::Api {
                code: None,
                message: format!("failed to cancel: {}", failures.join(", ")),
            })
        }
    }

    async fn close_contract(
        &self,
        account: AccountId,
        contract: &ContractId,
    ) -> Result<serde_json::Value, GatewayError> {
        // Re-read immediately before acting: a position already closed by a
        // previous action (or the trader) is a no-op.
        let positions = with_retry(self.retry, || self.rest.search_open_positions(account)).await?;
        let open: Vec<_> = positions
            .iter()
            .filter(|position| &position.contract_id == contract)
            .collect();
        if open.is_empty() {
            return Ok(serde_json::json!({ "count": 0, "noop": true }));
        }

        with_retry(self.retry, || self.rest.close_position(account, contract)).await?;
        for position in open {
            self.pending_stops.remove(position.id);
        }
        Ok(serde_json::json!({ "contract": contract.as_ref() }))
    }

    async fn reduce_contract_to(
        &self,
        account: AccountId,
        contract: &ContractId,
        target: u32,
    ) -> Result<serde_json::Value, GatewayError> {
        let positions = with_retry(self.retry, || self.rest.search_open_positions(account)).await?;
        let current: u32 = positions
            .iter()
            .filter(|position| &position.contract_id == contract)
            .map(|position| position.size)
            .sum();
        if current <= target {
            return Ok(serde_json::json!({ "count": current, "noop": true }));
        }

        let excess = current - target;
        with_retry(self.retry, || {
            self.rest.close_position_partial(account, contract, excess)
        })
        .await?;
        Ok(serde_json::json!({ "from": current, "to": target }))
    }

    async fn reduce_account_to_net(
        &self,
        account: AccountId,
        target: u32,
    ) -> Result<serde_json::Value, GatewayError> {
        let mut positions =
            with_retry(self.retry, || self.rest.search_open_positions(account)).await?;
        let total: u32 = positions.iter().map(|position| position.size).sum();
        if total <= target {
            return Ok(serde_json::json!({ "count": total, "noop": true }));
        }

        // Trim the largest positions first until the account-wide count
        // reaches the target.
        positions.sort_by(|a, b| b.size.cmp(&a.size));
        let mut excess = total - target;
        let mut reduced = Vec::new();
        for position in &positions {
            if excess == 0 {
                break;
            }
            let cut = position.size.min(excess);
            with_retry(self.retry, || {
                self.rest
                    .close_position_partial(account, &position.contract_id, cut)
            })
            .await?;
            excess -= cut;
            reduced.push(serde_json::json!({
                "contract": position.contract_id.as_ref(),
                "cut": cut,
            }));
        }

        Ok(serde_json::json!({ "from": total, "to": target, "reduced": reduced }))
    }

    async fn cancel_order(
        &self,
        account: AccountId,
        order: OrderId,
    ) -> Result<serde_json::Value, GatewayError> {
        let orders = with_retry(self.retry, || self.rest.search_open_orders(account)).await?;
        if !orders.iter().any(|open| open.id == order) {
            return Ok(serde_json::json!({ "order": order.0, "noop": true }));
        }

        with_retry(self.retry, || self.rest.cancel_order(account, order)).await?;
        Ok(serde_json::json!({ "order": order.0 }))
    }

    async fn place_stop_loss(
        &self,
        account: AccountId,
        position_id: PositionId,
        offset_ticks: u32,
        now: DateTime<Utc>,
    ) -> Result<serde_json::Value, GatewayError> {
        // The position may already be gone by the time the executor runs.
        let Some(position) = self.state.position(account, position_id) else {
            return Ok(serde_json::json!({ "position": position_id.0, "noop": true }));
        };

        let contract = self
            .contracts
            .get(&position.contract_id, now)
            .await
            .ok_or_else(|| GatewayError::Api {
                code: None,
                message: format!("no metadata for {}", position.contract_id),
            })?;

        let offset = contract.tick_size * rust_decimal::Decimal::from(offset_ticks);
        let (side, stop_price) = match position.side {
            PositionSide::Long => (OrderSide::Sell, position.average_price - offset),
            PositionSide::Short => (OrderSide::Buy, position.average_price + offset),
        };

        let request = OrderRequest {
            account_id: account,
            contract_id: position.contract_id.clone(),
            kind: OrderKind::Stop,
            side,
            size: position.size,
            limit_price: None,
            stop_price: Some(stop_price),
        };
        let order_id = with_retry(self.retry, || self.rest.place_order(&request)).await?;

        Ok(serde_json::json!({
            "position": position_id.0,
            "order": order_id.0,
            "stop_price": stop_price,
        }))
    }

    fn apply_lockout(
        &self,
        account: AccountId,
        rule: RuleId,
        kind: LockoutKind,
        until: LockoutUntil,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<serde_json::Value, GatewayError> {
        let _guard = self.lockout_write.lock();

        let until = match until {
            LockoutUntil::NextReset => Some(self.reset.next_reset_time(now)),
            LockoutUntil::After { hours } => Some(now + TimeDelta::hours(hours as i64)),
            LockoutUntil::Permanent => None,
        };

        self.lockouts
            .set_lockout(LockoutRecord::new(
                account,
                reason.to_string(),
                rule.to_string(),
                kind,
                now,
                until,
            ))
            .map_err(|error| GatewayError::Api {
                code: None,
                message: format!("lockout persistence failed: {error}"),
            })?;

        Ok(serde_json::json!({ "kind": kind, "until": until }))
    }

    /// Cooldown = Cooldown-kind lockout + matching `cooldown_<acct>` timer
    /// whose expiry clears the lockout. The pair exists or neither does.
    fn start_cooldown(
        &self,
        account: AccountId,
        rule: RuleId,
        duration_secs: u64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<serde_json::Value, GatewayError> {
        let _guard = self.lockout_write.lock();
        let duration = TimeDelta::seconds(duration_secs as i64);

        self.lockouts
            .set_lockout(LockoutRecord::new(
                account,
                reason.to_string(),
                rule.to_string(),
                LockoutKind::Cooldown,
                now,
                Some(now + duration),
            ))
            .map_err(|error| GatewayError::Api {
                code: None,
                message: format!("cooldown persistence failed: {error}"),
            })?;

        let lockouts = Arc::clone(&self.lockouts);
        self.timers.start(
            cooldown_timer_name(account),
            duration,
            Some(Box::new(move || {
                if let Err(error) = lockouts.remove_lockout(account) {
                    error!(%account, %error, "failed to clear cooldown lockout");
                }
            })),
            now,
        );

        Ok(serde_json::json!({ "duration_secs": duration_secs }))
    }

    /// Admin unlock: clears the slot, cancels any cooldown timer, and logs.
    pub fn remove_lockout(&self, account: AccountId, now: DateTime<Utc>) -> bool {
        let _guard = self.lockout_write.lock();
        self.timers.cancel(&cooldown_timer_name(account));
        let removed = match self.lockouts.remove_lockout(account) {
            Ok(removed) => removed,
            Err(error) => {
                error!(%account, %error, "failed to remove lockout");
                false
            }
        };

        self.log_enforcement(EnforcementRecord {
            time: now,
            account_id: account,
            rule_id: "admin".to_string(),
            action: "remove_lockout".to_string(),
            reason: "lockout removed".to_string(),
            details: serde_json::json!({ "removed": removed }),
            success: removed,
            execution_ms: 0,
        });
        removed
    }

    fn log_enforcement(&self, record: EnforcementRecord) {
        info!(
            account = %record.account_id,
            rule = %record.rule_id,
            action = %record.action,
            success = record.success,
            execution_ms = record.execution_ms,
            "enforcement: {}",
            record.reason
        );
        if let Err(error) = self.store.append_enforcement(&record) {
            error!(%error, "failed to append enforcement log record");
        }
    }
}

/// Spawn the bounded executor pool servicing queued enforcement jobs.
pub fn spawn_pool<Rest>(
    executor: Arc<EnforcementExecutor<Rest>>,
    rx: mpsc::Receiver<EnforcementJob>,
    workers: usize,
) -> Vec<tokio::task::JoinHandle<()>>
where
    Rest: GatewayRestApi + Clone + Send + Sync + 'static,
{
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    (0..workers)
        .map(|worker| {
            let executor = Arc::clone(&executor);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        break;
                    };
                    executor
                        .enforce(job.account, &job.breach, Utc::now())
                        .await;
                }
                tracing::debug!(worker, "executor worker drained");
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use vigil_gateway::{
        id::SymbolId,
        mock::{MockAction, MockGateway},
        types::{Contract, PositionSnapshot},
    };

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    struct Harness {
        gateway: MockGateway,
        executor: EnforcementExecutor<MockGateway>,
        lockouts: Arc<LockoutManager>,
        timers: Arc<TimerWheel>,
        store: Arc<Store>,
        state: Arc<StateTracker>,
        pending_stops: Arc<PendingStopTracker>,
    }

    fn harness() -> Harness {
        let gateway = MockGateway::new();
        gateway.insert_contract(Contract::new(
            ContractId::new("CON.F.US.MNQ.U25"),
            SymbolId::new("F.US.MNQ"),
            dec!(0.25),
            dec!(0.50),
            "Micro E-mini Nasdaq-100".to_string(),
        ));

        let store = Arc::new(Store::open_in_memory().unwrap());
        let state = Arc::new(StateTracker::new(Arc::clone(&store)));
        let lockouts = Arc::new(LockoutManager::new(Arc::clone(&store)));
        let timers = Arc::new(TimerWheel::new());
        let reset = Arc::new(ResetScheduler::new(17, 0, chrono_tz::America::New_York));
        let contracts = Arc::new(ContractCache::new(
            gateway.clone(),
            Arc::clone(&store),
            100,
            TimeDelta::hours(1),
        ));
        let pending_stops = Arc::new(PendingStopTracker::new());

        let executor = EnforcementExecutor::new(
            gateway.clone(),
            Arc::clone(&store),
            Arc::clone(&state),
            Arc::clone(&lockouts),
            Arc::clone(&timers),
            reset,
            contracts,
            Arc::clone(&pending_stops),
            RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        );

        Harness {
            gateway,
            executor,
            lockouts,
            timers,
            store,
            state,
            pending_stops,
        }
    }

    fn seed_position(harness: &Harness, id: i64, contract: &str, size: u32) {
        harness.gateway.seed_position(PositionSnapshot {
            id: PositionId::new(id),
            account_id: AccountId::new(12345),
            contract_id: ContractId::new(contract),
            side: PositionSide::Long,
            size,
            average_price: dec!(21000),
            creation_timestamp: now(),
        });
    }

    #[tokio::test]
    async fn test_close_all_positions_success_and_log() {
        let harness = harness();
        seed_position(&harness, 1, "CON.F.US.MNQ.U25", 3);
        seed_position(&harness, 2, "CON.F.US.EP.U25", 3);

        let breach = Breach::new(
            RuleId::R1,
            "MaxContracts breach (net=6, limit=5)",
            vec![EnforcementAction::CloseAllPositions],
        );
        let success = harness
            .executor
            .enforce(AccountId::new(12345), &breach, now())
            .await;

        assert!(success);
        assert!(
            harness
                .gateway
                .search_open_positions(AccountId::new(12345))
                .await
                .unwrap()
                .is_empty()
        );

        let log = harness.store.recent_enforcements(10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].rule_id, "R1");
        assert_eq!(log[0].action, "close_all_positions");
        assert!(log[0].success);
    }

    #[tokio::test]
    async fn test_close_all_twice_second_is_noop() {
        let harness = harness();
        seed_position(&harness, 1, "CON.F.US.MNQ.U25", 3);

        let breach = Breach::new(
            RuleId::R1,
            "limit",
            vec![EnforcementAction::CloseAllPositions],
        );
        assert!(
            harness
                .executor
                .enforce(AccountId::new(12345), &breach, now())
                .await
        );
        assert!(
            harness
                .executor
                .enforce(AccountId::new(12345), &breach, now())
                .await
        );

        // Log records both attempts; the gateway only saw one close.
        assert_eq!(harness.store.recent_enforcements(10).unwrap().len(), 2);
        assert_eq!(harness.gateway.actions().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_fault_retried_to_success() {
        let harness = harness();
        seed_position(&harness, 1, "CON.F.US.MNQ.U25", 2);
        harness.gateway.fail_next_transient(1);

        let breach = Breach::new(
            RuleId::R4,
            "unrealized",
            vec![EnforcementAction::CloseContract {
                contract: ContractId::new("CON.F.US.MNQ.U25"),
            }],
        );
        let success = harness
            .executor
            .enforce(AccountId::new(12345), &breach, now())
            .await;

        assert!(success);
    }

    #[tokio::test]
    async fn test_cooldown_pairs_lockout_with_timer() {
        let harness = harness();
        let account = AccountId::new(12345);

        let breach = Breach::new(
            RuleId::R7,
            "loss of -350",
            vec![EnforcementAction::StartCooldown {
                duration_secs: 1800,
                reason: "take a break".to_string(),
            }],
        );
        assert!(harness.executor.enforce(account, &breach, now()).await);

        assert!(harness.lockouts.is_locked_out(account, now()));
        assert!(
            harness
                .timers
                .is_active(&cooldown_timer_name(account), now())
        );

        // Timer expiry clears the lockout (the S4 pairing invariant).
        harness.timers.tick(now() + TimeDelta::seconds(1800));
        assert!(!harness.lockouts.is_locked_out(account, now() + TimeDelta::seconds(1800)));
    }

    #[tokio::test]
    async fn test_reduce_account_trims_largest_first() {
        let harness = harness();
        seed_position(&harness, 1, "CON.F.US.MNQ.U25", 4);
        seed_position(&harness, 2, "CON.F.US.EP.U25", 2);

        let breach = Breach::new(
            RuleId::R1,
            "reduce",
            vec![EnforcementAction::ReduceAccountToNet { target: 5 }],
        );
        assert!(
            harness
                .executor
                .enforce(AccountId::new(12345), &breach, now())
                .await
        );

        let actions = harness.gateway.actions();
        assert_eq!(
            actions[0],
            MockAction::ClosePositionPartial {
                account: AccountId::new(12345),
                contract: ContractId::new("CON.F.US.MNQ.U25"),
                quantity: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_place_stop_loss_computes_offset_price() {
        let harness = harness();
        let position = PositionSnapshot {
            id: PositionId::new(7),
            account_id: AccountId::new(12345),
            contract_id: ContractId::new("CON.F.US.MNQ.U25"),
            side: PositionSide::Long,
            size: 2,
            average_price: dec!(21000),
            creation_timestamp: now(),
        };
        harness.state.update_position(&position).unwrap();

        let breach = Breach::new(
            RuleId::R12,
            "auto stop",
            vec![EnforcementAction::PlaceStopLoss {
                position: PositionId::new(7),
                offset_ticks: 10,
            }],
        );
        assert!(
            harness
                .executor
                .enforce(AccountId::new(12345), &breach, now())
                .await
        );

        let actions = harness.gateway.actions();
        let MockAction::PlaceOrder(request) = &actions[0] else {
            panic!("expected order placement, got {actions:?}");
        };
        assert_eq!(request.kind, OrderKind::Stop);
        assert_eq!(request.side, OrderSide::Sell);
        // 10 ticks * 0.25 below entry.
        assert_eq!(request.stop_price, Some(dec!(20997.50)));
    }

    #[tokio::test]
    async fn test_stop_loss_for_missing_position_is_noop() {
        let harness = harness();

        let breach = Breach::new(
            RuleId::R12,
            "auto stop",
            vec![EnforcementAction::PlaceStopLoss {
                position: PositionId::new(99),
                offset_ticks: 10,
            }],
        );
        assert!(
            harness
                .executor
                .enforce(AccountId::new(12345), &breach, now())
                .await
        );
        assert!(harness.gateway.actions().is_empty());
    }

    #[tokio::test]
    async fn test_failed_action_logged_with_success_false() {
        let harness = harness();
        seed_position(&harness, 1, "CON.F.US.MNQ.U25", 2);
        // Exhaust every retry attempt.
        harness.gateway.fail_next_transient(10);

        let breach = Breach::new(
            RuleId::R3,
            "daily loss",
            vec![EnforcementAction::CloseAllPositions],
        );
        let success = harness
            .executor
            .enforce(AccountId::new(12345), &breach, now())
            .await;

        assert!(!success);
        let log = harness.store.recent_enforcements(1).unwrap();
        assert!(!log[0].success);
    }

    #[tokio::test]
    async fn test_close_contract_releases_pending_stop() {
        let harness = harness();
        seed_position(&harness, 1, "CON.F.US.MNQ.U25", 2);
        let tracked = PositionSnapshot {
            id: PositionId::new(1),
            account_id: AccountId::new(12345),
            contract_id: ContractId::new("CON.F.US.MNQ.U25"),
            side: PositionSide::Long,
            size: 2,
            average_price: dec!(21000),
            creation_timestamp: now(),
        };
        harness.pending_stops.track_if_unprotected(&tracked, &[], now());

        let breach = Breach::new(
            RuleId::R8,
            "no stop in grace",
            vec![EnforcementAction::CloseContract {
                contract: ContractId::new("CON.F.US.MNQ.U25"),
            }],
        );
        assert!(
            harness
                .executor
                .enforce(AccountId::new(12345), &breach, now())
                .await
        );
        assert!(!harness.pending_stops.contains(PositionId::new(1)));
    }
}

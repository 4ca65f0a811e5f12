use crate::{
    admin::AdminView,
    config::{VigilConfig, parse_zone},
    enforce::{EnforcementExecutor, EnforcementJob, RetryPolicy, spawn_pool},
    engine::{
        AccountEngine, dispatcher,
        dispatcher::SubscriptionChange,
        queue::AccountQueue,
        run_account_worker,
    },
    error::VigilError,
    event::AccountEvent,
    lockout::LockoutManager,
    reset::ResetScheduler,
    rules::build_catalog,
    state::{
        StateTracker, contracts::ContractCache, pending_stop::PendingStopTracker,
        pnl::PnlTracker, quotes::QuoteTracker, trades::TradeCounter,
    },
    timer::{TimerWheel, cooldown_timer_name},
};
use chrono::{TimeDelta, Utc};
use fnv::FnvHashMap;
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use vigil_gateway::{
    id::AccountId,
    realtime::{MarketHub, UserHub},
    rest::GatewayRestApi,
};
use vigil_store::{LockoutKind, Store};

/// Bounded per-account queue depth.
const ACCOUNT_QUEUE_CAPACITY: usize = 1024;

/// Enforcement pool sizing.
const EXECUTOR_WORKERS: usize = 8;
const JOB_QUEUE_CAPACITY: usize = 128;

/// Wires a full daemon instance from its boundary dependencies.
#[derive(Debug)]
pub struct SystemBuilder<Rest, User, Market> {
    config: VigilConfig,
    rest: Rest,
    user_hub: Arc<User>,
    market_hub: Arc<Market>,
    store: Arc<Store>,
}

impl<Rest, User, Market> SystemBuilder<Rest, User, Market>
where
    Rest: GatewayRestApi + Clone + Send + Sync + 'static,
    User: UserHub + 'static,
    Market: MarketHub + 'static,
{
    pub fn new(
        config: VigilConfig,
        rest: Rest,
        user_hub: Arc<User>,
        market_hub: Arc<Market>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            config,
            rest,
            user_hub,
            market_hub,
            store,
        }
    }

    /// Build every component, reload durable state, connect both hubs, and
    /// spawn the runtime tasks. Returns once both hubs report connected, or
    /// fails after `connect_timeout_secs`.
    pub async fn start(self) -> Result<VigilSystem<Rest>, VigilError> {
        let Self {
            config,
            rest,
            user_hub,
            market_hub,
            store,
        } = self;
        config.validate()?;
        let zone = parse_zone(&config.reset.zone, "reset.zone")?;
        let now = Utc::now();
        let accounts = config.accounts.clone();

        // State plane, store-authoritative on start.
        let state = Arc::new(StateTracker::new(Arc::clone(&store)));
        state.load_from_store()?;

        let quotes = Arc::new(QuoteTracker::new());

        let contracts = Arc::new(ContractCache::new(
            rest.clone(),
            Arc::clone(&store),
            config.contract_cache.max_size,
            TimeDelta::seconds(config.contract_cache.ttl_secs as i64),
        ));
        contracts.load_from_store()?;
        // Metadata for restored positions must be warm before price math.
        contracts
            .preload(&state.contracts_with_positions(), now)
            .await;

        let reset = Arc::new(ResetScheduler::new(
            config.reset.hour,
            config.reset.minute,
            zone,
        ));
        if let Some(path) = &config.reset.holidays_path {
            reset.load_holidays(path)?;
        }
        // A persisted session start at or after the previous scheduled
        // instant proves today's reset already fired before a restart; seed
        // the once-per-date guard so it does not fire twice.
        if let Some(latest) = store
            .load_session_starts()?
            .into_iter()
            .map(|(_, start)| start)
            .max()
        {
            if latest >= reset.previous_reset_time(now) {
                reset.mark_fired(latest.with_timezone(&zone).date_naive());
            }
        }

        let pnl = Arc::new(PnlTracker::new(Arc::clone(&store), zone, now));
        pnl.load_from_store(&accounts)?;

        let trades = Arc::new(TradeCounter::new(
            Arc::clone(&store),
            reset.previous_reset_time(now),
        ));
        trades.load_from_store(now)?;

        let lockouts = Arc::new(LockoutManager::new(Arc::clone(&store)));
        let loaded_lockouts = lockouts.load_from_store(now)?;
        info!(loaded = loaded_lockouts, "lockouts restored");

        let timers = Arc::new(TimerWheel::new());
        // Re-arm cooldown timers so the lockout/timer pairing survives
        // restarts.
        for record in lockouts.active_lockouts() {
            if record.kind == LockoutKind::Cooldown {
                if let Some(until) = record.until {
                    let account = record.account_id;
                    let lockouts_for_timer = Arc::clone(&lockouts);
                    timers.start(
                        cooldown_timer_name(account),
                        until - now,
                        Some(Box::new(move || {
                            if let Err(error) = lockouts_for_timer.remove_lockout(account) {
                                error!(%account, %error, "failed to clear cooldown lockout");
                            }
                        })),
                        now,
                    );
                }
            }
        }

        let pending_stops = Arc::new(PendingStopTracker::new());
        for account in &accounts {
            for position in state.positions(*account) {
                let orders = state.orders_for_contract(*account, &position.contract_id);
                let opened_at = position.creation_timestamp;
                pending_stops.track_if_unprotected(&position, &orders, opened_at);
            }
        }

        let rules = Arc::new(build_catalog(&config.rules));

        let executor = Arc::new(EnforcementExecutor::new(
            rest.clone(),
            Arc::clone(&store),
            Arc::clone(&state),
            Arc::clone(&lockouts),
            Arc::clone(&timers),
            Arc::clone(&reset),
            Arc::clone(&contracts),
            Arc::clone(&pending_stops),
            RetryPolicy::from(&config.executor_retry),
        ));

        // Daily reset wiring: P&L zeroed, trade rings cleared, session
        // boundary moved, due lockouts swept.
        {
            let pnl = Arc::clone(&pnl);
            let trades = Arc::clone(&trades);
            let lockouts = Arc::clone(&lockouts);
            let reset_accounts = accounts.clone();
            reset.on_reset(Box::new(move |at| {
                for account in &reset_accounts {
                    if let Err(error) = pnl.reset_daily(*account, at) {
                        error!(account = %account, %error, "daily pnl reset failed");
                    }
                    if let Err(error) = trades.reset_session(*account, at) {
                        error!(account = %account, %error, "session reset failed");
                    }
                }
                if let Err(error) = lockouts.cleanup_expired(at) {
                    error!(%error, "lockout sweep at reset failed");
                }
            }));
        }

        // Connect both hubs within the configured deadline.
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let (user_stream, market_stream) = tokio::time::timeout(connect_timeout, async {
            let user_stream = user_hub.connect().await?;
            let market_stream = market_hub.connect().await?;
            Ok::<_, vigil_gateway::error::GatewayError>((user_stream, market_stream))
        })
        .await
        .map_err(|_| VigilError::ConnectTimeout {
            timeout_secs: config.connect_timeout_secs,
        })??;

        user_hub.subscribe_accounts(&accounts).await?;
        market_hub
            .subscribe_contracts(&state.contracts_with_positions())
            .await?;

        // Channels and queues.
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (jobs_tx, jobs_rx) = mpsc::channel::<EnforcementJob>(JOB_QUEUE_CAPACITY);
        let (subscriptions_tx, subscriptions_rx) = mpsc::unbounded_channel::<SubscriptionChange>();

        let queues: Arc<FnvHashMap<AccountId, Arc<AccountQueue>>> = Arc::new(
            accounts
                .iter()
                .map(|account| (*account, Arc::new(AccountQueue::new(ACCOUNT_QUEUE_CAPACITY))))
                .collect(),
        );

        // Runtime tasks.
        let mut handles = Vec::new();

        handles.push(tokio::spawn(dispatcher::run_user_reader(
            Arc::clone(&user_hub),
            user_stream,
            accounts.clone(),
            Arc::clone(&queues),
            shutdown_rx.clone(),
        )));

        handles.push(tokio::spawn(dispatcher::run_market_reader(
            Arc::clone(&market_hub),
            market_stream,
            Arc::clone(&quotes),
            Arc::clone(&state),
            Arc::clone(&queues),
            subscriptions_rx,
            shutdown_rx.clone(),
        )));

        let mut worker_handles = Vec::new();
        for (account, queue) in queues.iter() {
            let engine = AccountEngine::new(
                *account,
                Arc::clone(&state),
                Arc::clone(&pnl),
                Arc::clone(&quotes),
                Arc::clone(&contracts),
                Arc::clone(&trades),
                Arc::clone(&pending_stops),
                Arc::clone(&lockouts),
                Arc::clone(&rules),
                jobs_tx.clone(),
                subscriptions_tx.clone(),
                TimeDelta::seconds(config.quote_stale_after_secs as i64),
            );
            let queue = Arc::clone(queue);
            worker_handles.push(tokio::spawn(async move {
                if let Err(error) = run_account_worker(engine, queue).await {
                    error!(%error, "account worker stopped on store failure");
                }
            }));
        }

        // 1 Hz housekeeping: timer sweep, lockout expiry, reset check,
        // trade-ring prune, grace re-check.
        {
            let timers = Arc::clone(&timers);
            let lockouts = Arc::clone(&lockouts);
            let reset = Arc::clone(&reset);
            let trades = Arc::clone(&trades);
            let queues = Arc::clone(&queues);
            let mut shutdown = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = interval.tick() => {
                            let now = Utc::now();
                            timers.tick(now);
                            if let Err(error) = lockouts.cleanup_expired(now) {
                                error!(%error, "lockout expiry sweep failed");
                            }
                            reset.check(now);
                            trades.cleanup_older_than(now);
                            for queue in queues.values() {
                                queue.push(AccountEvent::GraceSweep);
                            }
                        }
                    }
                }
            }));
        }

        let executor_handles = spawn_pool(Arc::clone(&executor), jobs_rx, EXECUTOR_WORKERS);

        info!(
            accounts = accounts.len(),
            "vigil system started, both hubs connected"
        );

        Ok(VigilSystem {
            shutdown_tx,
            queues,
            handles,
            worker_handles,
            executor_handles,
            jobs_tx: Some(jobs_tx),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
            store,
            state,
            pnl,
            quotes,
            contracts,
            trades,
            timers,
            lockouts,
            pending_stops,
            reset,
            executor,
        })
    }
}

/// A running daemon instance.
///
/// Dropping it without `stop` abandons the tasks; orderly shutdown drains
/// per-account queues, lets in-flight enforcement finish within the grace
/// window, then snapshots state.
#[derive(Debug)]
pub struct VigilSystem<Rest> {
    shutdown_tx: watch::Sender<bool>,
    queues: Arc<FnvHashMap<AccountId, Arc<AccountQueue>>>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    worker_handles: Vec<tokio::task::JoinHandle<()>>,
    executor_handles: Vec<tokio::task::JoinHandle<()>>,
    jobs_tx: Option<mpsc::Sender<EnforcementJob>>,
    shutdown_grace: Duration,
    store: Arc<Store>,
    state: Arc<StateTracker>,
    pnl: Arc<PnlTracker>,
    quotes: Arc<QuoteTracker>,
    contracts: Arc<ContractCache<Rest>>,
    trades: Arc<TradeCounter>,
    timers: Arc<TimerWheel>,
    lockouts: Arc<LockoutManager>,
    pending_stops: Arc<PendingStopTracker>,
    reset: Arc<ResetScheduler>,
    executor: Arc<EnforcementExecutor<Rest>>,
}

impl<Rest> VigilSystem<Rest>
where
    Rest: GatewayRestApi + Clone,
{
    /// Thread-safe read-only snapshots for dashboards and the admin CLI.
    pub fn admin(&self) -> AdminView<Rest> {
        AdminView::new(
            Arc::clone(&self.state),
            Arc::clone(&self.pnl),
            Arc::clone(&self.quotes),
            Arc::clone(&self.contracts),
            Arc::clone(&self.trades),
            Arc::clone(&self.timers),
            Arc::clone(&self.lockouts),
            Arc::clone(&self.pending_stops),
            Arc::clone(&self.store),
        )
    }

    pub fn reset_scheduler(&self) -> &Arc<ResetScheduler> {
        &self.reset
    }

    pub fn executor(&self) -> &Arc<EnforcementExecutor<Rest>> {
        &self.executor
    }

    /// Orderly shutdown: stop readers, drain account queues, finish
    /// in-flight enforcement within the grace window, snapshot state.
    pub async fn stop(mut self) -> Result<(), VigilError> {
        info!("vigil system stopping");
        let _ = self.shutdown_tx.send(true);

        // No new events: close the queues and let the workers drain.
        for queue in self.queues.values() {
            queue.close();
        }
        for handle in self.worker_handles.drain(..) {
            if tokio::time::timeout(self.shutdown_grace, handle).await.is_err() {
                warn!("account worker exceeded shutdown grace, abandoning");
            }
        }

        // Close the job channel; executor workers finish in-flight actions.
        self.jobs_tx.take();
        for handle in self.executor_handles.drain(..) {
            if tokio::time::timeout(self.shutdown_grace, handle).await.is_err() {
                warn!("executor worker exceeded shutdown grace, abandoning");
            }
        }

        for handle in self.handles.drain(..) {
            handle.abort();
        }

        self.state.save_snapshot()?;
        info!("vigil system stopped, state snapshot saved");
        Ok(())
    }
}

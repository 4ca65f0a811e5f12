use crate::{
    config::MaxContractsPerInstrumentConfig,
    event::AccountEvent,
    rules::{Breach, EnforcementAction, RiskRule, RuleId, StateView},
};

/// R2: per-symbol contract caps.
///
/// Counts sum across every position whose contract shares the symbol root
/// (all expiries of one instrument). Symbols missing from the limit table
/// fall back to `unknown_symbol_limit`, or pass unconstrained when that is
/// unset. Positions whose metadata is not cached are skipped for this event.
#[derive(Debug)]
pub struct MaxContractsPerInstrument {
    config: MaxContractsPerInstrumentConfig,
}

impl MaxContractsPerInstrument {
    pub fn new(config: MaxContractsPerInstrumentConfig) -> Self {
        Self { config }
    }

    fn limit_for(&self, symbol_root: &str) -> Option<u32> {
        self.config
            .limits
            .get(symbol_root)
            .copied()
            .or(self.config.unknown_symbol_limit)
    }
}

impl RiskRule for MaxContractsPerInstrument {
    fn id(&self) -> RuleId {
        RuleId::R2
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn check(&self, event: &AccountEvent, view: &StateView<'_>) -> Option<Breach> {
        let AccountEvent::Position(position) = event else {
            return None;
        };

        let contract = view.contracts.peek(&position.contract_id)?;
        let symbol_root = contract.symbol_id.root().to_string();
        let limit = self.limit_for(&symbol_root)?;

        // Sum every position sharing the symbol root, not just this
        // contract id (other expiries count toward the same cap).
        let symbol_total: u32 = view
            .state
            .positions(view.account)
            .iter()
            .filter(|other| {
                view.contracts
                    .peek(&other.contract_id)
                    .is_some_and(|meta| meta.symbol_id.root() == symbol_root)
            })
            .map(|other| other.size)
            .sum();

        if symbol_total <= limit {
            return None;
        }

        // Reduce the event's contract by the symbol-wide excess.
        let excess = symbol_total - limit;
        let this_contract = view.state.contract_count(view.account, &position.contract_id);
        let target = this_contract.saturating_sub(excess);

        Some(
            Breach::new(
                RuleId::R2,
                format!(
                    "per-instrument limit breach ({symbol_root}: {symbol_total} > {limit})"
                ),
                vec![EnforcementAction::ReduceContractTo {
                    contract: position.contract_id.clone(),
                    target,
                }],
            )
            .with_details(serde_json::json!({
                "symbol": symbol_root,
                "count": symbol_total,
                "limit": limit,
            })),
        )
    }
}

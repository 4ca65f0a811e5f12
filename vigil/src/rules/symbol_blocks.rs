use crate::{
    config::SymbolBlocksConfig,
    event::AccountEvent,
    rules::{Breach, EnforcementAction, LockoutUntil, RiskRule, RuleId, StateView},
};
use vigil_store::LockoutKind;

/// R11: blocked symbol list.
///
/// Working orders on a blocked symbol are cancelled; existing positions are
/// closed when `close_existing` is set; an optional hard lockout punishes the
/// attempt. Metadata must be cached to resolve the symbol - unknown contracts
/// pass (they are handled when metadata arrives with the next event).
#[derive(Debug)]
pub struct SymbolBlocks {
    config: SymbolBlocksConfig,
}

impl SymbolBlocks {
    pub fn new(config: SymbolBlocksConfig) -> Self {
        Self { config }
    }

    fn is_blocked(&self, symbol_root: &str) -> bool {
        self.config
            .blocked_symbols
            .iter()
            .any(|blocked| blocked == symbol_root)
    }

    fn lockout_action(&self, symbol_root: &str) -> Option<EnforcementAction> {
        self.config.lockout.then(|| EnforcementAction::ApplyLockout {
            kind: LockoutKind::Hard,
            until: LockoutUntil::NextReset,
            reason: format!("traded blocked symbol {symbol_root}"),
        })
    }
}

impl RiskRule for SymbolBlocks {
    fn id(&self) -> RuleId {
        RuleId::R11
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn check(&self, event: &AccountEvent, view: &StateView<'_>) -> Option<Breach> {
        let (contract_id, order) = match event {
            AccountEvent::Order(order) if order.status.is_working() => {
                (&order.contract_id, Some(order))
            }
            AccountEvent::Position(position) if !position.is_closed() => {
                (&position.contract_id, None)
            }
            _ => return None,
        };

        let contract = view.contracts.peek(contract_id)?;
        let symbol_root = contract.symbol_id.root().to_string();
        if !self.is_blocked(&symbol_root) {
            return None;
        }

        let mut actions = Vec::new();
        if let Some(order) = order {
            actions.push(EnforcementAction::CancelOrder { order: order.id });
        } else if self.config.close_existing {
            actions.push(EnforcementAction::CloseContract {
                contract: contract_id.clone(),
            });
        } else {
            return None;
        }
        actions.extend(self.lockout_action(&symbol_root));

        Some(
            Breach::new(
                RuleId::R11,
                format!("symbol {symbol_root} is blocked"),
                actions,
            )
            .with_details(serde_json::json!({
                "symbol": symbol_root,
                "contract": contract_id.as_ref(),
            })),
        )
    }
}

use crate::{
    config::SessionBlockConfig,
    event::AccountEvent,
    rules::{Breach, EnforcementAction, RiskRule, RuleId, StateView},
};
use chrono::NaiveTime;
use chrono_tz::Tz;

/// R9: cancel orders arriving outside the allowed session window.
///
/// The window is inclusive on both ends, evaluated on the wall clock of the
/// configured zone. Windows that wrap midnight (start > end) are supported.
#[derive(Debug)]
pub struct SessionBlockOutside {
    enabled: bool,
    start: NaiveTime,
    end: NaiveTime,
    zone: Tz,
}

impl SessionBlockOutside {
    pub fn new(config: SessionBlockConfig) -> Self {
        // Config validation already proved these parse; fall back to an
        // always-open window if construction is reached without it.
        let start = NaiveTime::parse_from_str(&config.start, "%H:%M")
            .unwrap_or(NaiveTime::MIN);
        let end = NaiveTime::parse_from_str(&config.end, "%H:%M")
            .unwrap_or_else(|_| NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN));
        let zone = config
            .zone
            .parse::<Tz>()
            .unwrap_or(chrono_tz::America::Chicago);

        Self {
            enabled: config.enabled,
            start,
            end,
            zone,
        }
    }

    fn in_session(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

impl RiskRule for SessionBlockOutside {
    fn id(&self) -> RuleId {
        RuleId::R9
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn check(&self, event: &AccountEvent, view: &StateView<'_>) -> Option<Breach> {
        let AccountEvent::Order(order) = event else {
            return None;
        };
        if !order.status.is_working() {
            return None;
        }

        let local_time = view.now.with_timezone(&self.zone).time();
        if self.in_session(local_time) {
            return None;
        }

        Some(
            Breach::new(
                RuleId::R9,
                format!(
                    "order outside session hours ({} not in {}-{} {})",
                    local_time.format("%H:%M"),
                    self.start.format("%H:%M"),
                    self.end.format("%H:%M"),
                    self.zone
                ),
                vec![EnforcementAction::CancelOrder { order: order.id }],
            )
            .with_details(serde_json::json!({
                "order": order.id.0,
                "local_time": local_time.format("%H:%M:%S").to_string(),
                "zone": self.zone.to_string(),
            })),
        )
    }
}

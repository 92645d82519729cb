//! Static table from strategy identifier to factory.
//!
//! Adding a strategy means adding a row to [`REGISTRY`].

use crate::domain::error::BotError;
use crate::domain::strategy::ichimoku::{self, IchimokuSettings, IchimokuStrategy};
use crate::domain::strategy::{Strategy, StrategyDeps};

/// Per-strategy parameters, one field per registered strategy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategySettings {
    pub ichimoku: IchimokuSettings,
}

pub type StrategyFactory = fn(&StrategySettings, &StrategyDeps) -> Box<dyn Strategy>;

pub const REGISTRY: &[(&str, StrategyFactory)] = &[(ichimoku::ID, build_ichimoku)];

fn build_ichimoku(settings: &StrategySettings, deps: &StrategyDeps) -> Box<dyn Strategy> {
    Box::new(IchimokuStrategy::new(settings.ichimoku.clone(), deps.clone()))
}

pub fn lookup(id: &str) -> Option<StrategyFactory> {
    REGISTRY
        .iter()
        .find(|(name, _)| *name == id)
        .map(|(_, factory)| *factory)
}

pub fn known_ids() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

pub fn build(
    id: &str,
    settings: &StrategySettings,
    deps: &StrategyDeps,
) -> Result<Box<dyn Strategy>, BotError> {
    let factory = lookup(id).ok_or_else(|| BotError::UnknownStrategy {
        name: id.to_string(),
    })?;
    Ok(factory(settings, deps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::{PositionSizer, SharedBalance};

    fn deps() -> StrategyDeps {
        StrategyDeps {
            sizer: PositionSizer::default(),
            balance: SharedBalance::new(10000.0),
        }
    }

    #[test]
    fn builds_registered_strategy() {
        let strategy = build("ichimoku", &StrategySettings::default(), &deps()).unwrap();
        assert_eq!(strategy.id(), "ichimoku");
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        let err = build("astrology", &StrategySettings::default(), &deps())
            .err()
            .unwrap();
        assert!(matches!(err, BotError::UnknownStrategy { name } if name == "astrology"));
    }

    #[test]
    fn known_ids_lists_table() {
        assert_eq!(known_ids().collect::<Vec<_>>(), vec!["ichimoku"]);
    }
}

//! Algorithms that are accepted in configuration but have no trading logic.

use super::{AlgorithmProcessor, ExecutionEnv, ExecutionOutcome};
use crate::domain::error::TradebotError;
use crate::domain::strategy::{AlgorithmKind, Strategy};

#[derive(Debug, Clone, Copy)]
pub struct PlaceholderProcessor {
    kind: AlgorithmKind,
}

impl PlaceholderProcessor {
    pub fn new(kind: AlgorithmKind) -> Self {
        PlaceholderProcessor { kind }
    }
}

impl AlgorithmProcessor for PlaceholderProcessor {
    fn kind(&self) -> AlgorithmKind {
        self.kind
    }

    fn execute(
        &self,
        _strategy: &Strategy,
        _env: &ExecutionEnv<'_>,
    ) -> Result<ExecutionOutcome, TradebotError> {
        Err(TradebotError::AlgorithmNotImplemented { kind: self.kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::algorithm::test_support::*;
    use crate::domain::strategy::{AlgorithmConfig, Cycle};

    #[test]
    fn placeholders_report_not_implemented() {
        let market = ScriptedMarket::default();
        let signals = RecordingSignals::default();
        let env = ExecutionEnv::new(&market, &signals);
        let strategy = Strategy::new(
            "ha",
            "heikin ashi",
            vec!["BTCUSDT".into()],
            Cycle::OneHour,
            AlgorithmConfig::HeikinAshi,
        );

        let processor = PlaceholderProcessor::new(AlgorithmKind::HeikinAshi);
        match processor.execute(&strategy, &env) {
            Err(TradebotError::AlgorithmNotImplemented { kind }) => {
                assert_eq!(kind, AlgorithmKind::HeikinAshi)
            }
            other => panic!("expected AlgorithmNotImplemented, got {other:?}"),
        }
        assert!(market.kline_requests.borrow().is_empty());
        assert!(signals.buys.borrow().is_empty());
    }
}

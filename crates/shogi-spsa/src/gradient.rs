//! 2局の結果から勾配の向きを決め、パラメーターへ反映する

use crate::store::ParameterStore;
use crate::tracker::Outcome;

/// 調整対象側から見た勝ち +1、負け -1、引き分け 0
pub fn win(outcome: Outcome) -> f64 {
    match outcome {
        Outcome::FirstWins => 1.0,
        Outcome::SecondWins => -1.0,
        Outcome::Draw => 0.0,
    }
}

/// + 側と - 側の結果の差の半分。+ 側が勝って - 側が負ければ 1。
pub fn step_from_outcomes(plus: Outcome, minus: Outcome) -> f64 {
    (win(plus) - win(minus)) / 2.0
}

/// 各パラメーターを `shift[i] * step * mobility * delta_i` だけ動かす。
pub fn apply_gradient(store: &ParameterStore, shift: &[f64], step: f64, mobility: f64) {
    store.apply_scaled_by_delta(shift, step * mobility);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamKind, Parameter, ParameterTable};
    use proptest::prelude::*;

    fn outcome_strategy() -> impl Strategy<Value = Outcome> {
        prop_oneof![Just(Outcome::FirstWins), Just(Outcome::SecondWins), Just(Outcome::Draw)]
    }

    proptest! {
        #[test]
        fn step_is_antisymmetric(plus in outcome_strategy(), minus in outcome_strategy()) {
            prop_assert_eq!(step_from_outcomes(plus, minus), -step_from_outcomes(minus, plus));
            prop_assert!(step_from_outcomes(plus, minus).abs() <= 1.0);
        }
    }

    #[test]
    fn step_values() {
        assert_eq!(step_from_outcomes(Outcome::FirstWins, Outcome::SecondWins), 1.0);
        assert_eq!(step_from_outcomes(Outcome::FirstWins, Outcome::Draw), 0.5);
        assert_eq!(step_from_outcomes(Outcome::Draw, Outcome::Draw), 0.0);
        assert_eq!(step_from_outcomes(Outcome::SecondWins, Outcome::FirstWins), -1.0);
    }

    #[test]
    fn gradient_moves_by_delta_and_mobility() {
        let table = ParameterTable::from_params(vec![
            Parameter::new("a", ParamKind::Integer, 10.0, 0.0, 20.0, 1.0, 0.5),
            Parameter::new("b", ParamKind::Real, 1.0, 0.0, 2.0, 0.1, 2.0),
        ]);
        let store = ParameterStore::new(table);
        apply_gradient(&store, &[1.0, -0.1], 1.0, 2.0);
        let snap = store.snapshot();
        assert_eq!(snap[0].value, 11.0);
        assert!((snap[1].value - 0.6).abs() < 1e-12);
        assert_eq!(store.update_count(), 1);

        // 引き分け同士では値は動かないが、更新回数は数える
        apply_gradient(&store, &[1.0, -0.1], 0.0, 2.0);
        assert_eq!(store.snapshot()[0].value, 11.0);
        assert_eq!(store.update_count(), 2);
    }
}

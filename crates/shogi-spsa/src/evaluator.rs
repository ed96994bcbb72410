//! 試行設定で1局指させ、調整対象側から見た結果を返す

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::{MatchMode, TunerSettings};
use crate::engine::{EngineProcess, UsiEngine};
use crate::error::Result;
use crate::game::{play_game, GameConfig};
use crate::kif::KifLog;
use crate::perturb::{Trial, TrialSide};
use crate::position::StartPositions;
use crate::tracker::Outcome;

/// 試行1局分の評価器。ワーカーごとに1つ持つ。
pub trait TrialEvaluator: Send {
    /// ログ用の名前(エンジンのラベル)
    fn label(&self) -> String;

    /// 調整対象側に `trial` の `side` 側の設定を与えて1局指す。
    fn play(&mut self, trial: &Trial, side: TrialSide, tuned_first: bool) -> Result<Outcome>;
}

/// USI エンジン2本による評価器
pub struct EngineMatch<E: UsiEngine> {
    tuned: E,
    opponent: E,
    mode: MatchMode,
    game: GameConfig,
    starts: Arc<StartPositions>,
    kif: Option<Arc<KifLog>>,
    rng: ChaCha8Rng,
}

impl<E: UsiEngine> EngineMatch<E> {
    pub fn new(
        tuned: E,
        opponent: E,
        mode: MatchMode,
        game: GameConfig,
        starts: Arc<StartPositions>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        Self {
            tuned,
            opponent,
            mode,
            game,
            starts,
            kif: None,
            rng,
        }
    }

    pub fn with_kif(mut self, kif: Arc<KifLog>) -> Self {
        self.kif = Some(kif);
        self
    }
}

impl EngineMatch<EngineProcess> {
    /// 設定に従ってエンジンを2本起動する。
    pub fn spawn(
        settings: &TunerSettings,
        worker_id: usize,
        starts: Arc<StartPositions>,
        kif: Option<Arc<KifLog>>,
    ) -> Result<Self> {
        let timeout = settings.ready_timeout();
        let tuned = EngineProcess::spawn(&settings.tuned.engine_config(worker_id, timeout))?;
        let opponent_settings = settings.opponent_engine();
        let mut opponent_cfg = opponent_settings.engine_config(worker_id, timeout);
        if settings.mode == MatchMode::Paired && settings.opponent.is_none() {
            opponent_cfg.label = format!("{}#{worker_id}-opp", settings.tuned.display_label());
        }
        let opponent = EngineProcess::spawn(&opponent_cfg)?;
        let game = GameConfig {
            max_ply: settings.max_ply,
            nodes_tuned: settings.tuned.nodes,
            nodes_opponent: opponent_settings.nodes,
        };
        let seed = settings.seed.map(|s| s.wrapping_add(worker_id as u64));
        let mut evaluator = Self::new(tuned, opponent, settings.mode, game, starts, seed);
        evaluator.kif = kif;
        Ok(evaluator)
    }
}

impl<E: UsiEngine> TrialEvaluator for EngineMatch<E> {
    fn label(&self) -> String {
        format!("{} vs {}", self.tuned.label(), self.opponent.label())
    }

    fn play(&mut self, trial: &Trial, side: TrialSide, tuned_first: bool) -> Result<Outcome> {
        // 設定が反映されるまで(readyok)待ってから対局を始める
        self.tuned.configure(trial.options(side))?;
        if self.mode == MatchMode::Paired {
            self.opponent.configure(trial.options(side.opposite()))?;
        }
        self.tuned.new_game()?;
        self.opponent.new_game()?;

        let start = self.starts.pick(&mut self.rng);
        let result = play_game(&mut self.tuned, &mut self.opponent, tuned_first, start, &self.game)?;
        log::debug!(
            "{}: {} game, {} after {} plies ({})",
            self.tuned.label(),
            side.label(),
            result.outcome.label(),
            result.plies,
            result.termination.label()
        );
        if let Some(kif) = &self.kif {
            if let Err(e) = kif.write_game(&result.record) {
                log::warn!("failed to write kif: {e}");
            }
        }
        Ok(result.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tests::ScriptedEngine;
    use crate::position::ParsedPosition;
    use crate::store::ParamSnapshot;

    fn trial() -> Trial {
        let params = vec![ParamSnapshot {
            name: "p".into(),
            value: 10.0,
            min: 0.0,
            max: 20.0,
            step: 2.0,
            delta: 0.01,
            active: true,
            is_int: true,
        }];
        Trial::with_shift(&params, vec![2.0], 1.0)
    }

    fn starts() -> Arc<StartPositions> {
        Arc::new(StartPositions::from_positions(vec![ParsedPosition::startpos()]))
    }

    fn game() -> GameConfig {
        GameConfig {
            max_ply: 100,
            nodes_tuned: 10,
            nodes_opponent: 10,
        }
    }

    #[test]
    fn paired_mode_configures_both_sides() {
        let tuned = ScriptedEngine::new("t", &["resign"]);
        let opp = ScriptedEngine::new("o", &[]);
        let mut ev = EngineMatch::new(tuned, opp, MatchMode::Paired, game(), starts(), Some(1));
        let outcome = ev.play(&trial(), TrialSide::Minus, true).unwrap();
        assert_eq!(outcome, Outcome::SecondWins);
        assert_eq!(ev.tuned.configured[0][0].value, "8");
        assert_eq!(ev.opponent.configured[0][0].value, "12");
        assert_eq!(ev.label(), "t vs o");
    }

    #[test]
    fn baseline_opponent_is_left_alone() {
        let tuned = ScriptedEngine::new("t", &[]);
        let opp = ScriptedEngine::new("o", &["resign"]);
        let mut ev = EngineMatch::new(tuned, opp, MatchMode::Baseline, game(), starts(), Some(1));
        let outcome = ev.play(&trial(), TrialSide::Plus, false).unwrap();
        assert_eq!(outcome, Outcome::FirstWins);
        assert_eq!(ev.tuned.configured[0][0].value, "12");
        assert!(ev.opponent.configured.is_empty());
    }

    #[test]
    fn kif_receives_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let kif = Arc::new(KifLog::new(dir.path(), false));
        let tuned = ScriptedEngine::new("t", &["7g7f", "resign"]);
        let opp = ScriptedEngine::new("o", &["3c3d"]);
        let mut ev =
            EngineMatch::new(tuned, opp, MatchMode::Paired, game(), starts(), Some(1)).with_kif(kif.clone());
        ev.play(&trial(), TrialSide::Plus, true).unwrap();
        let path = kif.path().unwrap();
        kif.close().unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text, "startpos moves 7g7f 3c3d resign\n");
    }
}

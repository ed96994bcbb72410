use crate::engine::{SearchReply, UsiEngine};
use crate::error::{Result, TuneError};
use crate::position::ParsedPosition;
use crate::tracker::Outcome;

/// 1局の設定
#[derive(Clone, Debug)]
pub struct GameConfig {
    /// 開始局面の手数を含めた手数上限。これを超えたら引き分け
    pub max_ply: u32,
    pub nodes_tuned: u64,
    pub nodes_opponent: u64,
}

/// 対局の終わり方
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Resign,
    DeclareWin,
    IllegalMove,
    Repetition,
    MaxPly,
}

impl Termination {
    pub fn label(self) -> &'static str {
        match self {
            Termination::Resign => "resign",
            Termination::DeclareWin => "win",
            Termination::IllegalMove => "illegal",
            Termination::Repetition => "repetition",
            Termination::MaxPly => "max_ply",
        }
    }
}

/// 対局結果
#[derive(Clone, Debug)]
pub struct GameResult {
    pub outcome: Outcome,
    pub termination: Termination,
    /// 開始局面からの手数
    pub plies: u32,
    /// 棋譜1行(開始局面 + 指し手 + 終局理由)
    pub record: String,
}

/// 1局を実行する。
///
/// - `tuned`: 調整対象側のエンジン。結果はこちらから見た [`Outcome`] で返す
/// - `opponent`: 相手側のエンジン
/// - `tuned_first`: 開始局面の手番を調整対象側が持つか
/// - `start`: 開始局面
///
/// 各手の要求前に千日手と手数上限を確認する。エンジンの異常は呼び出し元へ返す。
pub fn play_game<T, O>(
    tuned: &mut T,
    opponent: &mut O,
    tuned_first: bool,
    start: &ParsedPosition,
    config: &GameConfig,
) -> Result<GameResult>
where
    T: UsiEngine + ?Sized,
    O: UsiEngine + ?Sized,
{
    let mut board = start
        .build_board()
        .map_err(|e| TuneError::format("start position", 0, e.to_string()))?;
    let mut position = start.describe();
    let mut has_moves = !start.moves.is_empty();
    let mut played = Vec::new();
    let mut tuned_to_move = tuned_first;

    let (tuned_won, termination) = loop {
        if board.is_repetition() {
            break (None, Termination::Repetition);
        }
        if board.ply() > config.max_ply {
            break (None, Termination::MaxPly);
        }

        let reply = if tuned_to_move {
            tuned.search(&position, config.nodes_tuned)?
        } else {
            opponent.search(&position, config.nodes_opponent)?
        };

        match reply {
            SearchReply::Resign => break (Some(!tuned_to_move), Termination::Resign),
            SearchReply::DeclareWin => break (Some(tuned_to_move), Termination::DeclareWin),
            SearchReply::Move { token, eval } => {
                if let Some(eval) = eval {
                    let mover = if tuned_to_move { tuned.label() } else { opponent.label() };
                    log::trace!("{mover}: {token} ({eval})");
                }
                if let Err(e) = board.apply_usi(&token) {
                    let mover = if tuned_to_move { tuned.label() } else { opponent.label() };
                    log::warn!("{mover}: illegal move, {e} , position : {position}");
                    played.push(token);
                    break (Some(!tuned_to_move), Termination::IllegalMove);
                }
                position.push_str(if has_moves { " " } else { " moves " });
                position.push_str(&token);
                has_moves = true;
                played.push(token);
                tuned_to_move = !tuned_to_move;
            }
        }
    };

    let outcome = match tuned_won {
        Some(true) => Outcome::FirstWins,
        Some(false) => Outcome::SecondWins,
        None => Outcome::Draw,
    };
    let mut record = start.describe();
    if !played.is_empty() {
        record.push_str(if start.moves.is_empty() { " moves " } else { " " });
        record.push_str(&played.join(" "));
    }
    record.push(' ');
    record.push_str(termination.label());

    Ok(GameResult {
        outcome,
        termination,
        plies: played.len() as u32,
        record,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::perturb::EngineOption;

    /// 台本どおりに応答するエンジン
    pub(crate) struct ScriptedEngine {
        pub label: String,
        pub replies: VecDeque<SearchReply>,
        pub positions: Vec<String>,
        pub configured: Vec<Vec<EngineOption>>,
    }

    impl ScriptedEngine {
        pub(crate) fn new(label: &str, moves: &[&str]) -> Self {
            let replies = moves
                .iter()
                .map(|m| SearchReply::from_bestmove(m, None, label).unwrap())
                .collect();
            Self {
                label: label.to_string(),
                replies,
                positions: Vec::new(),
                configured: Vec::new(),
            }
        }
    }

    impl UsiEngine for ScriptedEngine {
        fn label(&self) -> &str {
            &self.label
        }

        fn configure(&mut self, options: &[EngineOption]) -> Result<()> {
            self.configured.push(options.to_vec());
            Ok(())
        }

        fn new_game(&mut self) -> Result<()> {
            Ok(())
        }

        fn search(&mut self, position: &str, _nodes: u64) -> Result<SearchReply> {
            self.positions.push(position.to_string());
            self.replies
                .pop_front()
                .ok_or_else(|| TuneError::protocol(&self.label, "engine exited unexpectedly"))
        }
    }

    fn config(max_ply: u32) -> GameConfig {
        GameConfig {
            max_ply,
            nodes_tuned: 1000,
            nodes_opponent: 1000,
        }
    }

    #[test]
    fn resign_gives_the_other_side_the_win() {
        let mut tuned = ScriptedEngine::new("tuned", &["7g7f", "2g2f"]);
        let mut opp = ScriptedEngine::new("opp", &["3c3d", "resign"]);
        let result = play_game(&mut tuned, &mut opp, true, &ParsedPosition::startpos(), &config(100)).unwrap();
        assert_eq!(result.outcome, Outcome::FirstWins);
        assert_eq!(result.termination, Termination::Resign);
        assert_eq!(result.plies, 3);
        assert_eq!(result.record, "startpos moves 7g7f 3c3d 2g2f resign");
        assert_eq!(opp.positions, vec!["startpos moves 7g7f", "startpos moves 7g7f 3c3d 2g2f"]);
    }

    #[test]
    fn declared_win_goes_to_the_mover() {
        let mut tuned = ScriptedEngine::new("tuned", &["3c3d"]);
        let mut opp = ScriptedEngine::new("opp", &["7g7f", "win"]);
        let result = play_game(&mut tuned, &mut opp, false, &ParsedPosition::startpos(), &config(100)).unwrap();
        assert_eq!(result.outcome, Outcome::SecondWins);
        assert_eq!(result.termination, Termination::DeclareWin);
        assert_eq!(tuned.positions, vec!["startpos moves 7g7f"]);
    }

    #[test]
    fn illegal_move_loses() {
        let mut tuned = ScriptedEngine::new("tuned", &["5e5d"]);
        let mut opp = ScriptedEngine::new("opp", &[]);
        let result = play_game(&mut tuned, &mut opp, true, &ParsedPosition::startpos(), &config(100)).unwrap();
        assert_eq!(result.outcome, Outcome::SecondWins);
        assert_eq!(result.termination, Termination::IllegalMove);
        assert_eq!(result.record, "startpos moves 5e5d illegal");
    }

    #[test]
    fn repetition_is_a_draw() {
        let mut tuned = ScriptedEngine::new("tuned", &["5i4h", "4h5i"]);
        let mut opp = ScriptedEngine::new("opp", &["5a4b", "4b5a"]);
        let result = play_game(&mut tuned, &mut opp, true, &ParsedPosition::startpos(), &config(100)).unwrap();
        assert_eq!(result.outcome, Outcome::Draw);
        assert_eq!(result.termination, Termination::Repetition);
        assert_eq!(result.plies, 4);
    }

    #[test]
    fn ply_cap_counts_start_position_moves() {
        // 開始局面で2手、上限3手。3手目までは指せて、4手目で上限を超える
        let start = crate::position::parse_position_line("startpos moves 7g7f 3c3d").unwrap();
        let mut tuned = ScriptedEngine::new("tuned", &["2g2f"]);
        let mut opp = ScriptedEngine::new("opp", &["8c8d"]);
        let result = play_game(&mut tuned, &mut opp, true, &start, &config(3)).unwrap();
        assert_eq!(result.outcome, Outcome::Draw);
        assert_eq!(result.termination, Termination::MaxPly);
        assert_eq!(result.record, "startpos moves 7g7f 3c3d 2g2f 8c8d max_ply");
        assert_eq!(opp.positions, vec!["startpos moves 7g7f 3c3d 2g2f"]);
    }

    #[test]
    fn reaching_the_cap_is_not_yet_a_draw() {
        let mut tuned = ScriptedEngine::new("tuned", &["7g7f", "resign"]);
        let mut opp = ScriptedEngine::new("opp", &["3c3d"]);
        let result = play_game(&mut tuned, &mut opp, true, &ParsedPosition::startpos(), &config(2)).unwrap();
        assert_eq!(result.termination, Termination::Resign);
        assert_eq!(result.outcome, Outcome::SecondWins);
        assert_eq!(result.plies, 2);
    }

    #[test]
    fn engine_failure_is_propagated() {
        let mut tuned = ScriptedEngine::new("tuned", &[]);
        let mut opp = ScriptedEngine::new("opp", &[]);
        let err = play_game(&mut tuned, &mut opp, true, &ParsedPosition::startpos(), &config(10)).unwrap_err();
        assert!(matches!(err, TuneError::EngineProtocol { .. }));
    }
}

//! 思考エンジン(USI)との境界
//!
//! `bestmove resign` / `bestmove win` はここで `SearchReply` に変換し、
//! それより内側では文字列として扱わない。

pub mod info;
pub mod process;

pub use info::{InfoSnapshot, Score};
pub use process::{EngineConfig, EngineProcess};

use crate::error::{Result, TuneError};
use crate::perturb::EngineOption;

/// 1回の探索結果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchReply {
    Move { token: String, eval: Option<Score> },
    Resign,
    DeclareWin,
}

impl SearchReply {
    /// `bestmove` 以降の文字列を解釈する。
    pub fn from_bestmove(rest: &str, eval: Option<Score>, engine: &str) -> Result<Self> {
        match rest.split_whitespace().next() {
            Some("resign") => Ok(SearchReply::Resign),
            Some("win") => Ok(SearchReply::DeclareWin),
            Some(token) => Ok(SearchReply::Move {
                token: token.to_string(),
                eval,
            }),
            None => Err(TuneError::protocol(engine, "bestmove without a move")),
        }
    }
}

/// チューナーから見た思考エンジンの操作。
///
/// 実プロセスは [`EngineProcess`]、テストでは台本どおりに応答するモックを使う。
pub trait UsiEngine: Send {
    fn label(&self) -> &str;

    /// オプションを設定し、`readyok` が返るまで待つ。
    fn configure(&mut self, options: &[EngineOption]) -> Result<()>;

    fn new_game(&mut self) -> Result<()>;

    /// `position` 行(先頭の "position " は含まない)の局面を `nodes` ノードで探索する。
    fn search(&mut self, position: &str, nodes: u64) -> Result<SearchReply>;
}

impl<E: UsiEngine + ?Sized> UsiEngine for Box<E> {
    fn label(&self) -> &str {
        (**self).label()
    }

    fn configure(&mut self, options: &[EngineOption]) -> Result<()> {
        (**self).configure(options)
    }

    fn new_game(&mut self) -> Result<()> {
        (**self).new_game()
    }

    fn search(&mut self, position: &str, nodes: u64) -> Result<SearchReply> {
        (**self).search(position, nodes)
    }
}

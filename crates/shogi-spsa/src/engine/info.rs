//! `info` 行から評価値などを拾う

use std::fmt;

/// エンジンが報告した評価値
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Score {
    Cp(i32),
    /// 正なら自分の勝ち、負なら負けまでの手数。`mate +` / `mate -` は ±1 とみなす。
    Mate(i32),
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Cp(cp) => write!(f, "cp {cp}"),
            Score::Mate(n) => write!(f, "mate {n}"),
        }
    }
}

#[derive(Default, Clone, Debug)]
pub struct InfoSnapshot {
    pub score: Option<Score>,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
}

impl InfoSnapshot {
    /// info 行を解析し、multipv=1 の情報を保持する。
    pub fn update_from_line(&mut self, line: &str) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first().copied() != Some("info") {
            return;
        }
        if let Some(pos) = tokens.iter().position(|t| *t == "multipv") {
            let multipv = tokens.get(pos + 1).and_then(|t| t.parse::<u32>().ok()).unwrap_or(1);
            if multipv != 1 {
                return;
            }
        }
        let mut i = 1;
        while i < tokens.len() {
            match tokens[i] {
                "depth" => {
                    if let Some(v) = tokens.get(i + 1) {
                        self.depth = v.parse().ok();
                        i += 1;
                    }
                }
                "nodes" => {
                    if let Some(v) = tokens.get(i + 1) {
                        self.nodes = v.parse().ok();
                        i += 1;
                    }
                }
                "score" => {
                    if let (Some(kind), Some(v)) = (tokens.get(i + 1), tokens.get(i + 2)) {
                        self.score = parse_score(kind, v).or(self.score);
                        i += 2;
                    }
                }
                // pv 以降は指し手列なので読まない
                "pv" => break,
                _ => {}
            }
            i += 1;
        }
    }
}

fn parse_score(kind: &str, value: &str) -> Option<Score> {
    match kind {
        "cp" => value.parse().ok().map(Score::Cp),
        "mate" => match value {
            "+" => Some(Score::Mate(1)),
            "-" => Some(Score::Mate(-1)),
            v => v.parse().ok().map(Score::Mate),
        },
        _ => None,
    }
}

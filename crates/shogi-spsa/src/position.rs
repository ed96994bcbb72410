use std::io::{BufRead, BufReader};
use std::path::Path;

use rand::Rng;

use crate::board::{Board, BoardError};
use crate::error::{Result, TuneError};

/// USI position 行を分解した結果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedPosition {
    pub startpos: bool,
    pub sfen: Option<String>,
    pub moves: Vec<String>,
}

impl ParsedPosition {
    pub fn startpos() -> Self {
        Self {
            startpos: true,
            sfen: None,
            moves: Vec::new(),
        }
    }

    /// 開始局面の盤面を作り、付随する指し手を適用する。
    pub fn build_board(&self) -> std::result::Result<Board, BoardError> {
        let mut board = match &self.sfen {
            Some(sfen) if !self.startpos => Board::from_sfen(sfen)?,
            _ => Board::hirate(),
        };
        for mv in &self.moves {
            board.apply_usi(mv)?;
        }
        Ok(board)
    }

    /// `position` コマンドの引数部分(先頭の "position " を除く)。指し手を追加できる形で返す。
    pub fn describe(&self) -> String {
        let mut buf = if self.startpos {
            "startpos".to_string()
        } else {
            format!("sfen {}", self.sfen.as_deref().unwrap_or_default())
        };
        if !self.moves.is_empty() {
            buf.push_str(" moves ");
            buf.push_str(&self.moves.join(" "));
        }
        buf
    }
}

/// 対局開始局面の集合
#[derive(Clone, Debug)]
pub struct StartPositions {
    positions: Vec<ParsedPosition>,
}

impl StartPositions {
    /// ファイル未指定なら平手1局面。
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let Some(path) = file else {
            return Ok(Self {
                positions: vec![ParsedPosition::startpos()],
            });
        };
        if !path.exists() {
            return Err(TuneError::NotFound(path.to_path_buf()));
        }
        let source = path.display().to_string();
        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut positions = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let parsed = parse_position_line(trimmed)
                .or_else(|_| parse_sfen_only(trimmed))
                .map_err(|e| TuneError::format(&source, idx + 1, e))?;
            parsed
                .build_board()
                .map_err(|e| TuneError::format(&source, idx + 1, e.to_string()))?;
            positions.push(parsed);
        }
        if positions.is_empty() {
            return Err(TuneError::format(&source, 0, "no usable positions"));
        }
        log::info!("read start positions, path = {source}, {} positions", positions.len());
        Ok(Self { positions })
    }

    /// 空なら平手1局面。
    pub fn from_positions(positions: Vec<ParsedPosition>) -> Self {
        if positions.is_empty() {
            return Self {
                positions: vec![ParsedPosition::startpos()],
            };
        }
        Self { positions }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn pick(&self, rng: &mut impl Rng) -> &ParsedPosition {
        &self.positions[rng.random_range(0..self.positions.len())]
    }
}

/// `position ...` 形式(先頭の "position" は省略可)の行をパースする。
pub fn parse_position_line(line: &str) -> std::result::Result<ParsedPosition, String> {
    let mut tokens = line.split_whitespace().peekable();
    tokens.next_if_eq(&"position");
    match tokens.next() {
        Some("startpos") => Ok(ParsedPosition {
            startpos: true,
            sfen: None,
            moves: parse_moves(tokens)?,
        }),
        Some("sfen") => {
            let mut sfen_tokens = Vec::new();
            while let Some(token) = tokens.next_if(|t| *t != "moves") {
                sfen_tokens.push(token);
            }
            if sfen_tokens.is_empty() {
                return Err("missing SFEN payload".to_string());
            }
            Ok(ParsedPosition {
                startpos: false,
                sfen: Some(sfen_tokens.join(" ")),
                moves: parse_moves(tokens)?,
            })
        }
        other => Err(format!("expected 'startpos' or 'sfen', got {other:?}")),
    }
}

/// sfen 文字列だけが渡されたときの簡易パーサ。
pub fn parse_sfen_only(line: &str) -> std::result::Result<ParsedPosition, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err("empty SFEN".to_string());
    }
    let (sfen, moves) = match trimmed.split_once(" moves") {
        Some((sfen, rest)) => (sfen, rest.split_whitespace().map(str::to_string).collect()),
        None => (trimmed, Vec::new()),
    };
    Ok(ParsedPosition {
        startpos: false,
        sfen: Some(sfen.trim().to_string()),
        moves,
    })
}

/// moves トークン以降を USI 形式の指し手列として回収する。
fn parse_moves<'a, I>(iter: I) -> std::result::Result<Vec<String>, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut iter = iter.peekable();
    match iter.peek() {
        Some(&"moves") => {
            iter.next();
            Ok(iter.map(str::to_string).collect())
        }
        Some(other) => Err(format!("expected 'moves' before move list, got '{other}'")),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_position_line_covers_startpos_and_sfen() {
        let parsed = parse_position_line("position startpos moves 7g7f 3c3d").unwrap();
        assert!(parsed.startpos);
        assert_eq!(parsed.moves, vec!["7g7f", "3c3d"]);
        assert_eq!(parsed.describe(), "startpos moves 7g7f 3c3d");

        let sfen_line = "sfen lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL b - 1 moves 7g7f";
        let parsed_sfen = parse_position_line(sfen_line).unwrap();
        assert!(!parsed_sfen.startpos);
        assert_eq!(parsed_sfen.moves, vec!["7g7f"]);
        assert_eq!(parsed_sfen.build_board().unwrap().ply(), 1);

        assert!(parse_position_line("position startpos 7g7f").is_err());
    }

    #[test]
    fn load_reads_lines_and_rejects_broken_positions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# openings").unwrap();
        writeln!(file, "startpos moves 2g2f").unwrap();
        writeln!(file, "lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL w - 2").unwrap();
        let loaded = StartPositions::load(Some(file.path())).unwrap();
        assert_eq!(loaded.len(), 2);

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        writeln!(broken, "startpos moves 5e5d").unwrap();
        assert!(matches!(
            StartPositions::load(Some(broken.path())),
            Err(TuneError::Format { line: 1, .. })
        ));

        assert!(matches!(
            StartPositions::load(Some(Path::new("/nonexistent/start.sfen"))),
            Err(TuneError::NotFound(_))
        ));
    }

    #[test]
    fn oversized_hand_is_format_error() {
        let parsed = parse_position_line("sfen 4k4/9/9/9/9/9/9/9/4K4 b 200P200P 1").unwrap();
        assert!(parsed.build_board().is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "startpos").unwrap();
        writeln!(file, "sfen 4k4/9/9/9/9/9/9/9/4K4 b 300p 1").unwrap();
        assert!(matches!(
            StartPositions::load(Some(file.path())),
            Err(TuneError::Format { line: 2, .. })
        ));
    }
}

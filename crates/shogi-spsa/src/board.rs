//! 千日手判定のための最小限の盤面
//!
//! 合法性はエンジン側を信頼し、ここでは駒の配置・持ち駒・手番だけを追跡する。
//! 王手の判定や指し手生成は行わない。

use std::collections::HashMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

/// 平手初期局面
pub const SFEN_HIRATE: &str = "lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL b - 1";

const SQUARES: usize = 81;
const HAND_KINDS: usize = 7;

const PROMOTED: u8 = 0x10;
const WHITE: u8 = 0x20;
const KIND_MASK: u8 = 0x0f;

/// 駒種(成りは別フラグ)。持ち駒の添字は `Pawn..=Rook` の順。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum Kind {
    Pawn = 1,
    Lance,
    Knight,
    Silver,
    Gold,
    Bishop,
    Rook,
    King,
}

impl Kind {
    fn from_char(c: char) -> Option<Self> {
        Some(match c.to_ascii_uppercase() {
            'P' => Kind::Pawn,
            'L' => Kind::Lance,
            'N' => Kind::Knight,
            'S' => Kind::Silver,
            'G' => Kind::Gold,
            'B' => Kind::Bishop,
            'R' => Kind::Rook,
            'K' => Kind::King,
            _ => return None,
        })
    }

    fn from_code(code: u8) -> Option<Self> {
        Some(match code & KIND_MASK {
            1 => Kind::Pawn,
            2 => Kind::Lance,
            3 => Kind::Knight,
            4 => Kind::Silver,
            5 => Kind::Gold,
            6 => Kind::Bishop,
            7 => Kind::Rook,
            8 => Kind::King,
            _ => return None,
        })
    }

    fn can_promote(self) -> bool {
        !matches!(self, Kind::Gold | Kind::King)
    }

    fn hand_index(self) -> Option<usize> {
        (self != Kind::King).then(|| self as usize - 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Black,
    White,
}

impl Side {
    pub fn flip(self) -> Self {
        match self {
            Side::Black => Side::White,
            Side::White => Side::Black,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::Black => 0,
            Side::White => 1,
        }
    }

    fn owns(self, code: u8) -> bool {
        code != 0 && ((code & WHITE != 0) == (self == Side::White))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    Sfen(String),
    Move(String),
}

impl fmt::Display for BoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardError::Sfen(msg) => write!(f, "invalid sfen: {msg}"),
            BoardError::Move(msg) => write!(f, "cannot apply move: {msg}"),
        }
    }
}

impl std::error::Error for BoardError {}

/// 駒の配置・持ち駒・手番
#[derive(Clone, Debug)]
pub struct Board {
    squares: [u8; SQUARES],
    hands: [[u8; HAND_KINDS]; 2],
    side: Side,
    /// 初期局面からの手数(開始局面の手数を含む)
    ply: u32,
    seen: HashMap<u64, u32>,
}

fn square_index(file: u8, rank: u8) -> usize {
    (rank as usize - 1) * 9 + (file as usize - 1)
}

fn parse_square(bytes: &[u8]) -> Option<usize> {
    let file = bytes.first()?.checked_sub(b'0')?;
    let rank = bytes.get(1)?.checked_sub(b'a')? + 1;
    ((1..=9).contains(&file) && (1..=9).contains(&rank)).then(|| square_index(file, rank))
}

impl Board {
    pub fn hirate() -> Self {
        // 定数文字列なので失敗しない
        Self::from_sfen(SFEN_HIRATE).unwrap_or_else(|_| unreachable!())
    }

    pub fn from_sfen(sfen: &str) -> Result<Self, BoardError> {
        let mut fields = sfen.split_whitespace();
        if fields.clone().next() == Some("sfen") {
            fields.next();
        }
        let placement = fields.next().ok_or_else(|| BoardError::Sfen("empty".into()))?;
        let side = match fields.next() {
            Some("b") | None => Side::Black,
            Some("w") => Side::White,
            Some(other) => return Err(BoardError::Sfen(format!("bad side to move '{other}'"))),
        };
        let hands_str = fields.next().unwrap_or("-");
        let move_number = match fields.next() {
            Some(n) => n
                .parse::<u32>()
                .map_err(|_| BoardError::Sfen(format!("bad move number '{n}'")))?,
            None => 1,
        };

        let mut squares = [0u8; SQUARES];
        let ranks: Vec<&str> = placement.split('/').collect();
        if ranks.len() != 9 {
            return Err(BoardError::Sfen(format!("expected 9 ranks, got {}", ranks.len())));
        }
        for (r, row) in ranks.iter().enumerate() {
            let rank = r as u8 + 1;
            let mut file = 9i32;
            let mut promoted = false;
            for c in row.chars() {
                if c == '+' {
                    promoted = true;
                    continue;
                }
                if let Some(n) = c.to_digit(10) {
                    file -= n as i32;
                    continue;
                }
                let kind = Kind::from_char(c)
                    .ok_or_else(|| BoardError::Sfen(format!("unknown piece '{c}'")))?;
                if file < 1 {
                    return Err(BoardError::Sfen(format!("rank {rank} overflows")));
                }
                let mut code = kind as u8;
                if promoted {
                    code |= PROMOTED;
                }
                if c.is_ascii_lowercase() {
                    code |= WHITE;
                }
                squares[square_index(file as u8, rank)] = code;
                file -= 1;
                promoted = false;
            }
            if file != 0 {
                return Err(BoardError::Sfen(format!("rank {rank} has wrong width")));
            }
        }

        let mut hands = [[0u8; HAND_KINDS]; 2];
        if hands_str != "-" {
            let too_many = || BoardError::Sfen(format!("too many pieces in hand '{hands_str}'"));
            let mut count = 0u32;
            for c in hands_str.chars() {
                if let Some(d) = c.to_digit(10) {
                    count = count.checked_mul(10).and_then(|n| n.checked_add(d)).ok_or_else(too_many)?;
                    continue;
                }
                let kind = Kind::from_char(c)
                    .and_then(|k| k.hand_index().map(|i| (k, i)))
                    .ok_or_else(|| BoardError::Sfen(format!("bad hand piece '{c}'")))?;
                let owner = if c.is_ascii_uppercase() { Side::Black } else { Side::White };
                let n = u8::try_from(count.max(1)).map_err(|_| too_many())?;
                let slot = &mut hands[owner.index()][kind.1];
                *slot = slot.checked_add(n).ok_or_else(too_many)?;
                count = 0;
            }
        }

        let mut board = Self {
            squares,
            hands,
            side,
            ply: move_number.saturating_sub(1),
            seen: HashMap::new(),
        };
        board.remember();
        Ok(board)
    }

    pub fn side_to_move(&self) -> Side {
        self.side
    }

    pub fn ply(&self) -> u32 {
        self.ply
    }

    /// USI 形式の指し手(`7g7f`, `8h2b+`, `P*5e`)を適用する。合法性は検査しない。
    pub fn apply_usi(&mut self, mv: &str) -> Result<(), BoardError> {
        let bytes = mv.as_bytes();
        let bad = || BoardError::Move(mv.to_string());
        let us = self.side;

        if bytes.get(1) == Some(&b'*') {
            let kind = Kind::from_char(bytes[0] as char).ok_or_else(bad)?;
            let hand = kind.hand_index().ok_or_else(bad)?;
            let to = parse_square(&bytes[2..]).ok_or_else(bad)?;
            if bytes.len() != 4 || self.squares[to] != 0 || self.hands[us.index()][hand] == 0 {
                return Err(bad());
            }
            self.hands[us.index()][hand] -= 1;
            let mut code = kind as u8;
            if us == Side::White {
                code |= WHITE;
            }
            self.squares[to] = code;
        } else {
            let from = parse_square(bytes).ok_or_else(bad)?;
            let to = parse_square(bytes.get(2..).unwrap_or_default()).ok_or_else(bad)?;
            let promote = match &bytes[4..] {
                [] => false,
                [b'+'] => true,
                _ => return Err(bad()),
            };
            let piece = self.squares[from];
            if !us.owns(piece) || us.owns(self.squares[to]) {
                return Err(bad());
            }
            let mut moved = piece;
            if promote {
                let kind = Kind::from_code(piece).ok_or_else(bad)?;
                if piece & PROMOTED != 0 || !kind.can_promote() {
                    return Err(bad());
                }
                moved |= PROMOTED;
            }
            let captured = self.squares[to];
            if captured != 0 {
                let kind = Kind::from_code(captured).ok_or_else(bad)?;
                let hand = kind.hand_index().ok_or_else(bad)?;
                let slot = &mut self.hands[us.index()][hand];
                *slot = slot.checked_add(1).ok_or_else(bad)?;
            }
            self.squares[from] = 0;
            self.squares[to] = moved;
        }

        self.side = us.flip();
        self.ply = self.ply.saturating_add(1);
        self.remember();
        Ok(())
    }

    /// 現局面が過去に一度でも現れていれば true
    pub fn is_repetition(&self) -> bool {
        self.seen.get(&self.key()).is_some_and(|&n| n > 1)
    }

    /// 配置・持ち駒・手番から作る局面キー
    pub fn key(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.squares.hash(&mut h);
        self.hands.hash(&mut h);
        self.side.hash(&mut h);
        h.finish()
    }

    fn remember(&mut self) {
        *self.seen.entry(self.key()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hirate_parses_with_empty_hands() {
        let b = Board::hirate();
        assert_eq!(b.side_to_move(), Side::Black);
        assert_eq!(b.ply(), 0);
        assert!(!b.is_repetition());
    }

    #[test]
    fn moves_captures_and_drops() {
        let mut b = Board::hirate();
        for mv in ["7g7f", "3c3d", "8h2b+", "3a2b", "B*4e"] {
            b.apply_usi(mv).unwrap();
        }
        assert_eq!(b.ply(), 5);
        assert_eq!(b.side_to_move(), Side::White);
        // 手持ちの角は打ったので、もう一度は打てない
        b.apply_usi("8c8d").unwrap();
        assert!(b.apply_usi("B*5e").is_err());
    }

    #[test]
    fn rejects_moves_that_do_not_fit_the_placement() {
        let mut b = Board::hirate();
        assert!(b.apply_usi("5e5d").is_err()); // 空きマス
        assert!(b.apply_usi("3c3d").is_err()); // 相手の駒
        assert!(b.apply_usi("P*5e").is_err()); // 持ち駒なし
        assert!(b.apply_usi("6i5h+").is_err()); // 金は成れない
        assert!(b.apply_usi("resign").is_err());
        assert_eq!(b.ply(), 0);
    }

    #[test]
    fn shuffling_pieces_repeats_position() {
        let mut b = Board::hirate();
        for mv in ["5i4h", "5a4b", "4h5i"] {
            b.apply_usi(mv).unwrap();
            assert!(!b.is_repetition());
        }
        b.apply_usi("4b5a").unwrap();
        assert!(b.is_repetition());
    }

    #[test]
    fn sfen_with_hands_and_move_number() {
        let b = Board::from_sfen("sfen 4k4/9/9/9/9/9/9/9/4K4 w 2Pr 31").unwrap();
        assert_eq!(b.side_to_move(), Side::White);
        assert_eq!(b.ply(), 30);
        assert!(Board::from_sfen("4k4/9/9 b - 1").is_err());
        assert!(Board::from_sfen("4k5/9/9/9/9/9/9/9/4K4 b - 1").is_err());
    }

    #[test]
    fn oversized_hand_counts_are_rejected() {
        for sfen in [
            "4k4/9/9/9/9/9/9/9/4K4 b 200P200P 1",
            "4k4/9/9/9/9/9/9/9/4K4 b 256P 1",
            "4k4/9/9/9/9/9/9/9/4K4 b 99999999999P 1",
        ] {
            assert!(matches!(Board::from_sfen(sfen), Err(BoardError::Sfen(_))), "{sfen}");
        }
        let b = Board::from_sfen("4k4/9/9/9/9/9/9/9/4K4 b 18P2p 1").unwrap();
        assert_eq!(b.hands[Side::Black.index()][0], 18);
        assert_eq!(b.hands[Side::White.index()][0], 2);
        assert!(Board::from_sfen("4k4/9/9/9/9/9/9/9/4K4 b 255P 1").is_ok());
    }
}

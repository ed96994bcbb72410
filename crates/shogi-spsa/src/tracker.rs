//! 対局結果の記録と、直近の区間ごとの勝率・レーティング差の集計

use std::fmt;

use parking_lot::Mutex;

/// 調整対象(first)から見た1局の結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    FirstWins,
    SecondWins,
    Draw,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Outcome::FirstWins => "win",
            Outcome::SecondWins => "lose",
            Outcome::Draw => "draw",
        }
    }
}

/// 直近 `window` 局の集計
#[derive(Clone, Debug, PartialEq)]
pub struct WindowStats {
    pub window: usize,
    pub wins: usize,
    pub losses: usize,
    pub draws: usize,
    /// 引き分けを除いた勝率。勝敗のついた対局がなければ None
    pub win_rate: Option<f64>,
    /// 勝率から求めたレーティング差。勝率 0/1 では ∓∞/±∞
    pub rating: Option<f64>,
}

impl fmt::Display for WindowStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}-{}-{}", self.window, self.wins, self.draws, self.losses)?;
        match (self.win_rate, self.rating) {
            (Some(w), Some(r)) => write!(f, " win {:.1}% R {:+.1}", w * 100.0, r),
            _ => write!(f, " win -- R --"),
        }
    }
}

/// 勝率 w に対応するレーティング差。w が 0 または 1 のときは無限大に飽和する。
pub fn rating_from_win_rate(w: f64) -> f64 {
    if w <= 0.0 {
        f64::NEG_INFINITY
    } else if w >= 1.0 {
        f64::INFINITY
    } else {
        -400.0 * (1.0 / w - 1.0).log10()
    }
}

/// `len` 局目で集計を出すべきか
pub fn report_due(len: usize, base_window: usize) -> bool {
    base_window > 0 && len > 0 && len.is_multiple_of(base_window)
}

/// 全ワーカー共有の対局結果履歴。追記のみ。
#[derive(Default)]
pub struct OutcomeTracker {
    history: Mutex<Vec<Outcome>>,
}

impl OutcomeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 結果を追記し、追記後の局数を返す。
    pub fn record(&self, outcome: Outcome) -> usize {
        let mut history = self.history.lock();
        history.push(outcome);
        history.len()
    }

    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `base, 2*base, 4*base, ...` 局の区間を集計し、大きい方から `cols` 個を
    /// 小さい区間(直近)から順に返す。
    pub fn report(&self, base_window: usize, cols: usize) -> Vec<WindowStats> {
        if base_window == 0 || cols == 0 {
            return Vec::new();
        }
        let history = self.history.lock();
        let mut windows = Vec::new();
        let mut window = base_window;
        while window <= history.len() {
            windows.push(window);
            window = match window.checked_mul(2) {
                Some(w) => w,
                None => break,
            };
        }
        let skip = windows.len().saturating_sub(cols);
        windows[skip..]
            .iter()
            .map(|&window| summarize(&history[history.len() - window..], window))
            .collect()
    }
}

fn summarize(recent: &[Outcome], window: usize) -> WindowStats {
    let mut wins = 0;
    let mut losses = 0;
    let mut draws = 0;
    for outcome in recent {
        match outcome {
            Outcome::FirstWins => wins += 1,
            Outcome::SecondWins => losses += 1,
            Outcome::Draw => draws += 1,
        }
    }
    let decisive = wins + losses;
    let win_rate = (decisive > 0).then(|| wins as f64 / decisive as f64);
    WindowStats {
        window,
        wins,
        losses,
        draws,
        win_rate,
        rating: win_rate.map(rating_from_win_rate),
    }
}

/// 集計結果を1行にまとめる
pub fn format_report(total: usize, stats: &[WindowStats]) -> String {
    let mut line = format!("games {total}");
    for s in stats {
        line.push_str(" | ");
        line.push_str(&s.to_string());
    }
    line
}

//! 摂動ベクトルの生成と ± 方向の試行パラメーターの構築

use rand::Rng;

use crate::params::option_value_string;
use crate::store::ParamSnapshot;

/// どちら向きに摂動させた設定か
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrialSide {
    Plus,
    Minus,
}

impl TrialSide {
    pub fn sign(self) -> f64 {
        match self {
            TrialSide::Plus => 1.0,
            TrialSide::Minus => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            TrialSide::Plus => TrialSide::Minus,
            TrialSide::Minus => TrialSide::Plus,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TrialSide::Plus => "plus",
            TrialSide::Minus => "minus",
        }
    }
}

/// エンジンへ送る `setoption` 1件分
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOption {
    pub name: String,
    pub value: String,
}

/// 1組(2局)分の試行。永続化はしない。
#[derive(Clone, Debug)]
pub struct Trial {
    pub shift: Vec<f64>,
    pub plus: Vec<f64>,
    pub minus: Vec<f64>,
    options_plus: Vec<EngineOption>,
    options_minus: Vec<EngineOption>,
}

impl Trial {
    pub fn new(params: &[ParamSnapshot], rng: &mut impl Rng, scale: f64) -> Self {
        let shift = generate_shift(params, rng);
        Self::with_shift(params, shift, scale)
    }

    pub fn with_shift(params: &[ParamSnapshot], shift: Vec<f64>, scale: f64) -> Self {
        let plus = build(params, &shift, TrialSide::Plus.sign(), scale);
        let minus = build(params, &shift, TrialSide::Minus.sign(), scale);
        let options_plus = engine_options(params, &plus);
        let options_minus = engine_options(params, &minus);
        Self {
            shift,
            plus,
            minus,
            options_plus,
            options_minus,
        }
    }

    pub fn values(&self, side: TrialSide) -> &[f64] {
        match side {
            TrialSide::Plus => &self.plus,
            TrialSide::Minus => &self.minus,
        }
    }

    pub fn options(&self, side: TrialSide) -> &[EngineOption] {
        match side {
            TrialSide::Plus => &self.options_plus,
            TrialSide::Minus => &self.options_minus,
        }
    }
}

/// -1 と 1 を 1/2 の確率でとる(Rademacher 分布)符号に各パラメーターの step を掛けたもの。
/// 未使用パラメーターは 0。
pub fn generate_shift(params: &[ParamSnapshot], rng: &mut impl Rng) -> Vec<f64> {
    params
        .iter()
        .map(|p| {
            if !p.active {
                0.0
            } else if rng.random_bool(0.5) {
                p.step
            } else {
                -p.step
            }
        })
        .collect()
}

/// `value + sign * scale * shift[i]` を [min, max] に収めた値ベクトル。
/// 内部値は丸めない(int の丸めはエンジンへ渡す時だけ)。
pub fn build(params: &[ParamSnapshot], shift: &[f64], sign: f64, scale: f64) -> Vec<f64> {
    params
        .iter()
        .zip(shift.iter())
        .map(|(p, s)| (p.value + sign * scale * s).clamp(p.min, p.max))
        .collect()
}

/// 有効なパラメーターだけを USI オプションに変換する。
pub fn engine_options(params: &[ParamSnapshot], values: &[f64]) -> Vec<EngineOption> {
    params
        .iter()
        .zip(values.iter())
        .filter(|(p, _)| p.active)
        .map(|(p, &v)| EngineOption {
            name: p.name.clone(),
            value: option_value_string(p.is_int, v),
        })
        .collect()
}

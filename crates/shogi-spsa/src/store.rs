//! 全ワーカーで共有するパラメーターストア
//!
//! 読み出し(snapshot)は共有ロック、書き込み(apply)は排他ロックで1回の更新をまとめて行う。
//! ロックはベクトル操作の間だけ保持し、エンジン呼び出しをまたいで保持することはない。

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::Result;
use crate::params::{write_table, Parameter, ParameterTable, TableLayout};

/// ある時点でのパラメーター1つ分の値
#[derive(Clone, Debug, PartialEq)]
pub struct ParamSnapshot {
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub delta: f64,
    pub active: bool,
    pub is_int: bool,
}

pub struct ParameterStore {
    params: RwLock<Vec<Parameter>>,
    layout: TableLayout,
    updates: AtomicU64,
}

impl ParameterStore {
    pub fn new(table: ParameterTable) -> Self {
        Self {
            params: RwLock::new(table.params),
            layout: table.layout,
            updates: AtomicU64::new(0),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(ParameterTable::load(path)?))
    }

    pub fn len(&self) -> usize {
        self.params.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.read().is_empty()
    }

    /// 一貫した時点の値を取り出す。
    pub fn snapshot(&self) -> Vec<ParamSnapshot> {
        self.params
            .read()
            .iter()
            .map(|p| ParamSnapshot {
                name: p.name.clone(),
                value: p.value,
                min: p.min,
                max: p.max,
                step: p.step,
                delta: p.delta,
                active: p.active,
                is_int: p.is_int(),
            })
            .collect()
    }

    /// パラメーター定義(名前・型・コメント等を含む)の複製
    pub fn parameters(&self) -> Vec<Parameter> {
        self.params.read().clone()
    }

    /// 有効なパラメーターを `value + shift[i] * magnitude` に動かし、[min, max] に収める。
    pub fn apply(&self, shift: &[f64], magnitude: f64) {
        self.mutate(shift, |_| magnitude);
    }

    /// 勾配更新用。移動量に各パラメーターの delta を掛ける。
    pub fn apply_scaled_by_delta(&self, shift: &[f64], magnitude: f64) {
        self.mutate(shift, |p| magnitude * p.delta);
    }

    fn mutate(&self, shift: &[f64], factor: impl Fn(&Parameter) -> f64) {
        {
            let mut params = self.params.write();
            for (p, &s) in params.iter_mut().zip(shift.iter()) {
                if !p.active {
                    continue;
                }
                let updated = p.value + s * factor(p);
                // NaN が混入しても範囲外の値を残さない
                p.value = if updated.is_nan() { p.value } else { p.clamp(updated) };
            }
        }
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    /// これまでに行われた更新の回数
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// 読み込み時の書式を保ったまま書き戻す。
    pub fn persist(&self, path: &Path) -> Result<()> {
        let params = self.parameters();
        write_table(path, &self.layout, &params)?;
        log::info!("write parameter file {}, {} parameters", path.display(), params.len());
        Ok(())
    }

    pub fn render(&self) -> String {
        self.layout.render(&self.params.read())
    }
}

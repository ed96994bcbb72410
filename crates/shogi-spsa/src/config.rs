//! 設定ファイル(TOML)と実行中に変更できる値
//!
//! ```toml
//! params = "params/tune.txt"
//! start_positions = "book/start_sfens.txt"
//! mode = "paired"
//! workers = 4
//!
//! [tuned]
//! path = "engines/suisho/YaneuraOu"
//! nodes = 500000
//! usi_options = ["EvalDir=eval"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;

use crate::engine::EngineConfig;
use crate::error::{Result, TuneError};

/// 相手側の設定の決め方
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// 相手も同じエンジンで、試行の反対側の設定を持つ
    #[default]
    Paired,
    /// 相手は設定を変えない基準エンジン
    Baseline,
}

/// 1本分のエンジン定義
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub path: PathBuf,
    /// 表示名。空ならファイル名
    pub label: String,
    /// 1手あたりの探索ノード数
    pub nodes: u64,
    pub threads: usize,
    pub hash_mb: u32,
    /// 追加のUSIオプション (Name=Value 形式)
    pub usi_options: Vec<String>,
    pub args: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            label: String::new(),
            nodes: 500_000,
            threads: 1,
            hash_mb: 256,
            usi_options: Vec::new(),
            args: Vec::new(),
        }
    }
}

impl EngineSettings {
    pub fn display_label(&self) -> String {
        if !self.label.is_empty() {
            return self.label.clone();
        }
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "engine".to_string())
    }

    /// ワーカーごとの起動設定。ラベルにはワーカー番号を付ける。
    pub fn engine_config(&self, worker_id: usize, ready_timeout: Duration) -> EngineConfig {
        EngineConfig {
            path: self.path.clone(),
            args: self.args.clone(),
            label: format!("{}#{worker_id}", self.display_label()),
            threads: self.threads,
            hash_mb: self.hash_mb,
            usi_options: self.usi_options.clone(),
            ready_timeout,
        }
    }
}

/// チューナーの設定
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TunerSettings {
    /// パラメーター表
    pub params: PathBuf,
    /// 開始局面ファイル。未指定なら平手
    pub start_positions: Option<PathBuf>,
    /// 棋譜の出力先
    pub kif_dir: PathBuf,
    pub kif_gzip: bool,
    pub mode: MatchMode,
    pub workers: usize,
    /// 開始局面の手数を含めた手数上限
    pub max_ply: u32,
    /// 集計を出す間隔(局数)。区間幅の最小値も兼ねる
    pub base_window: usize,
    pub report_columns: usize,
    pub scale: f64,
    pub mobility: f64,
    /// 乱数のシード。指定するとワーカー i はシード + i を使う
    pub seed: Option<u64>,
    pub ready_timeout_secs: u64,
    pub tuned: EngineSettings,
    /// baseline モードの相手。paired モードで省略すると tuned と同じ
    pub opponent: Option<EngineSettings>,
}

impl Default for TunerSettings {
    fn default() -> Self {
        Self {
            params: PathBuf::from("params.txt"),
            start_positions: None,
            kif_dir: PathBuf::from("kif"),
            kif_gzip: false,
            mode: MatchMode::Paired,
            workers: 1,
            max_ply: 240,
            base_window: 100,
            report_columns: 4,
            scale: 1.0,
            mobility: 1.0,
            seed: None,
            ready_timeout_secs: 30,
            tuned: EngineSettings::default(),
            opponent: None,
        }
    }
}

impl TunerSettings {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TuneError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let settings = Self::parse(&text)?;
        log::info!("read settings, path = {}", path.display());
        Ok(settings)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tuned.path.as_os_str().is_empty() {
            return Err(TuneError::InvalidSetting("tuned.path is required".into()));
        }
        if self.mode == MatchMode::Baseline && self.opponent.is_none() {
            return Err(TuneError::InvalidSetting("baseline mode requires [opponent]".into()));
        }
        if self.base_window == 0 {
            return Err(TuneError::InvalidSetting("base_window must be positive".into()));
        }
        if self.max_ply == 0 {
            return Err(TuneError::InvalidSetting("max_ply must be positive".into()));
        }
        RuntimeKnobs::check_scale(self.scale)?;
        RuntimeKnobs::check_mobility(self.mobility)?;
        Ok(())
    }

    /// 相手側のエンジン定義
    pub fn opponent_engine(&self) -> &EngineSettings {
        self.opponent.as_ref().unwrap_or(&self.tuned)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn knobs(&self) -> RuntimeKnobs {
        RuntimeKnobs::new(self.scale, self.mobility, self.report_columns)
    }
}

/// 実行中に変更できる値
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KnobValues {
    /// 摂動の大きさ
    pub scale: f64,
    /// 更新の大きさ
    pub mobility: f64,
    pub report_columns: usize,
}

/// コンソールから変更される値。ワーカーは各サイクルの先頭で読む。
pub struct RuntimeKnobs {
    values: RwLock<KnobValues>,
}

impl RuntimeKnobs {
    pub fn new(scale: f64, mobility: f64, report_columns: usize) -> Self {
        Self {
            values: RwLock::new(KnobValues {
                scale,
                mobility,
                report_columns,
            }),
        }
    }

    pub fn get(&self) -> KnobValues {
        *self.values.read()
    }

    pub fn set_scale(&self, scale: f64) -> Result<()> {
        Self::check_scale(scale)?;
        self.values.write().scale = scale;
        Ok(())
    }

    pub fn set_mobility(&self, mobility: f64) -> Result<()> {
        Self::check_mobility(mobility)?;
        self.values.write().mobility = mobility;
        Ok(())
    }

    pub fn set_report_columns(&self, cols: usize) -> Result<()> {
        if cols == 0 {
            return Err(TuneError::InvalidSetting("report columns must be at least 1".into()));
        }
        self.values.write().report_columns = cols;
        Ok(())
    }

    fn check_scale(scale: f64) -> Result<()> {
        if !scale.is_finite() || scale < 0.0 {
            return Err(TuneError::InvalidSetting(format!("scale must be a finite non-negative number, got {scale}")));
        }
        Ok(())
    }

    fn check_mobility(mobility: f64) -> Result<()> {
        if !mobility.is_finite() || mobility < 0.0 {
            return Err(TuneError::InvalidSetting(format!(
                "mobility must be a finite non-negative number, got {mobility}"
            )));
        }
        Ok(())
    }
}

impl Default for RuntimeKnobs {
    fn default() -> Self {
        Self::new(1.0, 1.0, 4)
    }
}

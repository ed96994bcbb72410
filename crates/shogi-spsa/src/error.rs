//! チューナー全体のエラー型

use std::path::PathBuf;

/// SPSA チューナーのエラー
#[derive(thiserror::Error, Debug)]
pub enum TuneError {
    /// パラメーター表・開始局面ファイルの書式エラー
    #[error("{path}({line}): {message}")]
    Format {
        path: String,
        line: usize,
        message: String,
    },

    /// パラメーター表・エンジンバイナリ等が見つからない
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// エンジンとのやり取りで想定外の応答・異常終了があった
    #[error("{engine}: {message}")]
    EngineProtocol { engine: String, message: String },

    /// 実行時ノブへの不正な値
    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    /// 設定ファイル(TOML)の解析エラー
    #[error(transparent)]
    Settings(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TuneError {
    pub fn format(path: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        TuneError::Format {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn protocol(engine: impl Into<String>, message: impl Into<String>) -> Self {
        TuneError::EngineProtocol {
            engine: engine.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TuneError>;

//! USI 将棋エンジンの探索パラメーターを SPSA で自己対局から調整する。

pub mod board;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod game;
pub mod gradient;
pub mod kif;
pub mod orchestrator;
pub mod params;
pub mod perturb;
pub mod position;
pub mod store;
pub mod tracker;

pub use error::{Result, TuneError};

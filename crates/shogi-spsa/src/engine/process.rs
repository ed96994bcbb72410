use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use super::info::InfoSnapshot;
use super::{SearchReply, UsiEngine};
use crate::error::{Result, TuneError};
use crate::perturb::EngineOption;

pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// エンジンプロセス起動時の設定。
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub label: String,
    pub threads: usize,
    pub hash_mb: u32,
    /// 追加のUSIオプション (Name=Value 形式)
    pub usi_options: Vec<String>,
    pub ready_timeout: Duration,
}

/// 1本のエンジンに対する入出力をカプセル化する。
pub struct EngineProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    opt_names: HashSet<String>,
    warned_missing: HashSet<String>,
    ready_timeout: Duration,
    /// 直近に探索させた局面(エラー報告用)
    searching: String,
    pub label: String,
}

impl EngineProcess {
    pub fn spawn(cfg: &EngineConfig) -> Result<Self> {
        if !cfg.path.is_file() {
            return Err(TuneError::NotFound(cfg.path.clone()));
        }
        let mut cmd = Command::new(&cfg.path);
        if !cfg.args.is_empty() {
            cmd.args(&cfg.args);
        }
        // 評価関数ファイル等を実行ファイル相対で読むエンジンのため、作業ディレクトリを合わせる
        if let Some(dir) = cfg.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        let mut child = cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TuneError::protocol(&cfg.label, "no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TuneError::protocol(&cfg.label, "no stdout"))?;
        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut proc = Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            opt_names: HashSet::new(),
            warned_missing: HashSet::new(),
            ready_timeout: cfg.ready_timeout,
            searching: String::new(),
            label: cfg.label.clone(),
        };
        proc.initialize(cfg)?;
        log::info!("{}: engine started ({})", proc.label, cfg.path.display());
        Ok(proc)
    }

    fn initialize(&mut self, cfg: &EngineConfig) -> Result<()> {
        self.write_line("usi")?;
        loop {
            let line = self.recv_line(self.ready_timeout)?;
            if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    self.opt_names.insert(name);
                }
            } else if line == "usiok" {
                break;
            }
        }
        self.set_option_if_available("Threads", &cfg.threads.to_string())?;
        let hash = cfg.hash_mb.to_string();
        self.set_option_if_available("USI_Hash", &hash)?;
        self.set_option_if_available("Hash", &hash)?;
        for opt in &cfg.usi_options {
            if let Some((name, value)) = opt.split_once('=') {
                self.set_option_if_available(name.trim(), value.trim())?;
            } else {
                // "=" がない場合はオプション名のみとみなし、値なしで送る
                self.write_line(&format!("setoption name {}", opt.trim()))?;
            }
        }
        self.sync_ready()?;
        self.write_line("usinewgame")?;
        Ok(())
    }

    /// `isready` を送り `readyok` を待つ。待機中に "Error" を含む行が来たら致命的エラー。
    pub fn sync_ready(&mut self) -> Result<()> {
        self.write_line("isready")?;
        loop {
            let line = self.recv_line(self.ready_timeout)?;
            if line.contains("Error") {
                return Err(self.protocol_error(format!("engine error: {line}")));
            }
            if line == "readyok" {
                return Ok(());
            }
        }
    }

    pub fn recv_line(&self, timeout: Duration) -> Result<String> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => self.protocol_error("engine read timeout"),
            RecvTimeoutError::Disconnected => self.protocol_error("engine exited unexpectedly"),
        })
    }

    pub fn set_option_if_available(&mut self, name: &str, value: &str) -> Result<()> {
        if self.opt_names.is_empty() || self.opt_names.contains(name) {
            self.write_line(&format!("setoption name {} value {}", name, value))?;
        } else if self.warned_missing.insert(name.to_string()) {
            log::warn!("{}: engine has no option '{}', skipped", self.label, name);
        }
        Ok(())
    }

    /// 調整対象パラメーターを設定する。エンジンが持たないオプションは黙って捨てずにエラーにする。
    pub fn set_trial_option(&mut self, name: &str, value: &str) -> Result<()> {
        if !self.opt_names.contains(name) {
            return Err(self.protocol_error(format!("engine has no option '{name}' to tune")));
        }
        self.write_line(&format!("setoption name {} value {}", name, value))
    }

    pub fn write_line(&mut self, msg: &str) -> Result<()> {
        let written = self
            .stdin
            .write_all(msg.as_bytes())
            .and_then(|_| self.stdin.write_all(b"\n"))
            .and_then(|_| self.stdin.flush());
        written.map_err(|e| self.protocol_error(format!("write failed: {e}")))
    }

    fn protocol_error(&self, message: impl Into<String>) -> TuneError {
        let mut message = message.into();
        if !self.searching.is_empty() {
            message.push_str(&format!(" , search position : {}", self.searching));
        }
        TuneError::protocol(&self.label, message)
    }
}

impl UsiEngine for EngineProcess {
    fn label(&self) -> &str {
        &self.label
    }

    fn configure(&mut self, options: &[EngineOption]) -> Result<()> {
        for opt in options {
            self.set_trial_option(&opt.name, &opt.value)?;
        }
        self.sync_ready()
    }

    fn new_game(&mut self) -> Result<()> {
        self.write_line("usinewgame")?;
        self.sync_ready()
    }

    /// 探索を実行する。探索は途中で打ち切らず、`bestmove` が返るまで待つ。
    fn search(&mut self, position: &str, nodes: u64) -> Result<SearchReply> {
        self.searching = position.to_string();
        self.write_line(&format!("position {position}"))?;
        self.write_line(&format!("go nodes {nodes}"))?;

        let start = Instant::now();
        let mut snapshot = InfoSnapshot::default();
        loop {
            let line = self
                .rx
                .recv()
                .map_err(|_| self.protocol_error("engine exited unexpectedly"))?;
            if line.starts_with("info") {
                snapshot.update_from_line(&line);
                continue;
            }
            if let Some(rest) = line.strip_prefix("bestmove") {
                log::trace!(
                    "{}: bestmove{} in {}ms (depth {:?})",
                    self.label,
                    rest,
                    start.elapsed().as_millis(),
                    snapshot.depth
                );
                return SearchReply::from_bestmove(rest, snapshot.score, &self.label);
            }
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        let _ = self.write_line("quit");
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let mut parts = Vec::new();
            while let Some(next) = tokens.next_if(|t| *t != "type") {
                parts.push(next.to_string());
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}

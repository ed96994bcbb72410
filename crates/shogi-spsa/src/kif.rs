//! 対局棋譜の書き出し(1局1行のテキスト)
//!
//! 全ワーカーで1つのファイルを共有する。ファイルは最初の1局を書く時に
//! `<kif_dir>/<YYYYMMDDHHMMSS>.txt`(gzip 指定時は `.txt.gz`)として作られる。

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;

/// Writer wrapper to propagate finish/close errors for compressed outputs.
#[must_use = "call .close() to propagate compression/IO errors"]
pub enum Writer {
    Plain(BufWriter<File>),
    Gz(flate2::write::GzEncoder<File>),
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Writer::Plain(f) => f.write(buf),
            Writer::Gz(e) => e.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Writer::Plain(f) => f.flush(),
            Writer::Gz(e) => e.flush(),
        }
    }
}

impl Writer {
    /// 拡張子が `.gz` なら gzip で書く。
    pub fn create(path: &Path) -> io::Result<Self> {
        let f = File::create(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        if ext.eq_ignore_ascii_case("gz") {
            return Ok(Writer::Gz(flate2::write::GzEncoder::new(f, flate2::Compression::default())));
        }
        Ok(Writer::Plain(BufWriter::new(f)))
    }

    /// Finalize the stream and flush underlying file.
    pub fn close(self) -> io::Result<()> {
        match self {
            Writer::Plain(f) => {
                let mut file = f.into_inner().map_err(|e| e.into_error())?;
                file.flush()
            }
            Writer::Gz(e) => {
                let mut f = e.finish()?;
                f.flush()
            }
        }
    }
}

struct KifState {
    writer: Option<Writer>,
    path: Option<PathBuf>,
    games: u64,
}

pub struct KifLog {
    dir: PathBuf,
    gzip: bool,
    state: Mutex<KifState>,
}

impl KifLog {
    pub fn new(dir: impl Into<PathBuf>, gzip: bool) -> Self {
        Self {
            dir: dir.into(),
            gzip,
            state: Mutex::new(KifState {
                writer: None,
                path: None,
                games: 0,
            }),
        }
    }

    /// 棋譜を一行書き出す。
    pub fn write_game(&self, line: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.writer.is_none() {
            fs::create_dir_all(&self.dir)?;
            let ext = if self.gzip { "txt.gz" } else { "txt" };
            let path = self.dir.join(format!("{}.{ext}", Local::now().format("%Y%m%d%H%M%S")));
            state.writer = Some(Writer::create(&path)?);
            log::info!("kif file: {}", path.display());
            state.path = Some(path);
        }
        if let Some(w) = state.writer.as_mut() {
            w.write_all(line.as_bytes())?;
            w.write_all(b"\n")?;
            w.flush()?;
        }
        state.games += 1;
        Ok(())
    }

    pub fn games_written(&self) -> u64 {
        self.state.lock().games
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.state.lock().path.clone()
    }

    /// ファイルを閉じる。以降の書き込みは新しいファイルになる。
    pub fn close(&self) -> io::Result<()> {
        let writer = self.state.lock().writer.take();
        match writer {
            Some(w) => w.close(),
            None => Ok(()),
        }
    }
}

//! ワーカースレッド群の管理
//!
//! 各ワーカーはエンジン2本を持ち、(摂動 → + 側の対局 → - 側の対局 → 更新) を繰り返す。
//! 一時停止・停止はサイクルの先頭でだけ確認するので、対局の途中で止まることはない。

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel as chan;
use parking_lot::{Condvar, Mutex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::{KnobValues, RuntimeKnobs};
use crate::error::Result;
use crate::evaluator::TrialEvaluator;
use crate::gradient::{apply_gradient, step_from_outcomes};
use crate::perturb::{Trial, TrialSide};
use crate::store::ParameterStore;
use crate::tracker::{format_report, report_due, Outcome, OutcomeTracker};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GateState {
    Open,
    Paused,
    Stopped,
}

/// `checkpoint` の結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateSignal {
    Proceed,
    Stop,
}

/// 全ワーカー共通の一時停止・停止スイッチ
pub struct PauseGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self {
            state: Mutex::new(GateState::Open),
            cv: Condvar::new(),
        }
    }
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 一時停止中は再開か停止まで待つ。
    pub fn checkpoint(&self) -> GateSignal {
        let mut state = self.state.lock();
        while *state == GateState::Paused {
            self.cv.wait(&mut state);
        }
        match *state {
            GateState::Stopped => GateSignal::Stop,
            _ => GateSignal::Proceed,
        }
    }

    pub fn pause(&self) {
        let mut state = self.state.lock();
        if *state == GateState::Open {
            *state = GateState::Paused;
        }
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        if *state == GateState::Paused {
            *state = GateState::Open;
            self.cv.notify_all();
        }
    }

    /// 停止は取り消せない。
    pub fn stop(&self) {
        *self.state.lock() = GateState::Stopped;
        self.cv.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.state.lock() == GateState::Paused
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Paused,
    Stopping,
    Terminated,
}

impl WorkerState {
    pub fn label(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Running => "running",
            WorkerState::Paused => "paused",
            WorkerState::Stopping => "stopping",
            WorkerState::Terminated => "terminated",
        }
    }
}

/// ワーカーの外から見える状態
pub struct WorkerStatus {
    pub id: usize,
    state: Mutex<WorkerState>,
    label: Mutex<String>,
    pairs: AtomicU64,
    error: Mutex<Option<String>>,
}

impl WorkerStatus {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            state: Mutex::new(WorkerState::Idle),
            label: Mutex::new(String::new()),
            pairs: AtomicU64::new(0),
            error: Mutex::new(None),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
    }

    /// 終えた試行(2局)の数
    pub fn pairs(&self) -> u64 {
        self.pairs.load(Ordering::Relaxed)
    }

    pub fn label(&self) -> String {
        self.label.lock().clone()
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }
}

/// 全ワーカーが共有するもの
pub struct TuningContext {
    pub store: Arc<ParameterStore>,
    pub tracker: OutcomeTracker,
    pub knobs: RuntimeKnobs,
    pub gate: PauseGate,
    pub base_window: usize,
}

impl TuningContext {
    pub fn new(store: Arc<ParameterStore>, knobs: RuntimeKnobs, base_window: usize) -> Self {
        Self {
            store,
            tracker: OutcomeTracker::new(),
            knobs,
            gate: PauseGate::new(),
            base_window,
        }
    }

    /// 結果を記録し、区切りの局数なら集計を出す。
    fn record(&self, outcome: Outcome, columns: usize) {
        let len = self.tracker.record(outcome);
        if report_due(len, self.base_window) {
            let stats = self.tracker.report(self.base_window, columns);
            log::info!("{}", format_report(len, &stats));
        }
    }
}

/// 1サイクル分の結果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CycleOutcome {
    pub plus: Outcome,
    pub minus: Outcome,
    pub step: f64,
}

/// 1スレッド分の試行ループ
pub struct Worker {
    id: usize,
    evaluator: Box<dyn TrialEvaluator>,
    ctx: Arc<TuningContext>,
    status: Arc<WorkerStatus>,
    rng: ChaCha8Rng,
    /// 次の対局で調整対象側が先に指すか
    tuned_first: bool,
}

impl Worker {
    pub fn new(
        evaluator: Box<dyn TrialEvaluator>,
        ctx: Arc<TuningContext>,
        status: Arc<WorkerStatus>,
        seed: Option<u64>,
    ) -> Self {
        let mut rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        // 開始局面の手番は先手とは限らないので、どちらが先に指すかで決める
        let tuned_first = rng.random_bool(0.5);
        *status.label.lock() = evaluator.label();
        Self {
            id: status.id,
            evaluator,
            ctx,
            status,
            rng,
            tuned_first,
        }
    }

    /// 摂動 → + 側 → - 側 → 更新 → 記録 を1回行う。
    pub fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let KnobValues {
            scale,
            mobility,
            report_columns,
        } = self.ctx.knobs.get();
        let snapshot = self.ctx.store.snapshot();
        let trial = Trial::new(&snapshot, &mut self.rng, scale);

        let plus = self.evaluator.play(&trial, TrialSide::Plus, self.tuned_first)?;
        self.tuned_first = !self.tuned_first;
        let minus = self.evaluator.play(&trial, TrialSide::Minus, self.tuned_first)?;
        self.tuned_first = !self.tuned_first;

        let step = step_from_outcomes(plus, minus);
        apply_gradient(&self.ctx.store, &trial.shift, step, mobility);

        self.ctx.record(plus, report_columns);
        self.ctx.record(minus, report_columns);
        self.status.pairs.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "worker {}: plus {} / minus {} , step {step}",
            self.id,
            plus.label(),
            minus.label()
        );
        Ok(CycleOutcome { plus, minus, step })
    }

    /// 停止されるかエラーが起きるまでサイクルを繰り返す。
    pub fn run(mut self) -> Result<()> {
        loop {
            if self.ctx.gate.is_paused() {
                self.status.set_state(WorkerState::Paused);
            }
            if self.ctx.gate.checkpoint() == GateSignal::Stop {
                self.status.set_state(WorkerState::Stopping);
                return Ok(());
            }
            self.status.set_state(WorkerState::Running);
            self.run_cycle()?;
        }
    }
}

/// ワーカーの終了通知
#[derive(Debug)]
pub struct WorkerExit {
    pub id: usize,
    pub error: Option<String>,
}

/// ワーカーごとに評価器(エンジン2本)を作る関数。ワーカースレッド上で呼ばれる。
pub type EvaluatorFactory = dyn Fn(usize) -> Result<Box<dyn TrialEvaluator>> + Send + Sync;

struct WorkerHandle {
    status: Arc<WorkerStatus>,
    thread: Option<JoinHandle<()>>,
}

pub struct Orchestrator {
    ctx: Arc<TuningContext>,
    factory: Arc<EvaluatorFactory>,
    seed: Option<u64>,
    workers: Vec<WorkerHandle>,
    exit_tx: chan::Sender<WorkerExit>,
    exit_rx: chan::Receiver<WorkerExit>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<TuningContext>, factory: Arc<EvaluatorFactory>, seed: Option<u64>) -> Self {
        let (exit_tx, exit_rx) = chan::unbounded();
        Self {
            ctx,
            factory,
            seed,
            workers: Vec::new(),
            exit_tx,
            exit_rx,
        }
    }

    /// ワーカーを `count` 本追加で起動する。
    pub fn start(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let id = self.workers.len();
            let status = Arc::new(WorkerStatus::new(id));
            let ctx = self.ctx.clone();
            let factory = self.factory.clone();
            let tx = self.exit_tx.clone();
            let seed = self.seed.map(|s| s.wrapping_add(id as u64));
            let st = status.clone();
            let handle = thread::Builder::new()
                .name(format!("spsa-worker-{id}"))
                .spawn(move || worker_main(id, factory, ctx, st, seed, tx))?;
            self.workers.push(WorkerHandle {
                status,
                thread: Some(handle),
            });
        }
        log::info!("started {count} workers ({} total)", self.workers.len());
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn pause(&self) {
        self.ctx.gate.pause();
        log::info!("pause requested; workers stop after the current pair");
    }

    pub fn resume(&self) {
        self.ctx.gate.resume();
        log::info!("resumed");
    }

    pub fn set_scale(&self, scale: f64) -> Result<()> {
        self.ctx.knobs.set_scale(scale)
    }

    pub fn set_mobility(&self, mobility: f64) -> Result<()> {
        self.ctx.knobs.set_mobility(mobility)
    }

    pub fn set_report_columns(&self, cols: usize) -> Result<()> {
        self.ctx.knobs.set_report_columns(cols)
    }

    /// 現在のパラメーター一覧
    pub fn print_parameters(&self) -> String {
        let mut out = String::new();
        for p in self.ctx.store.parameters() {
            out.push_str(&p.to_string());
            out.push('\n');
        }
        out
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        self.ctx.store.persist(path)
    }

    /// 終了したワーカーの通知を回収してログに出す。
    pub fn poll_exits(&self) -> Vec<WorkerExit> {
        let exits: Vec<WorkerExit> = self.exit_rx.try_iter().collect();
        for exit in &exits {
            match &exit.error {
                Some(e) => log::warn!("worker {} terminated: {e}", exit.id),
                None => log::info!("worker {} finished", exit.id),
            }
        }
        exits
    }

    pub fn status(&self) -> StatusReport {
        let workers = self
            .workers
            .iter()
            .map(|w| WorkerLine {
                id: w.status.id,
                label: w.status.label(),
                state: w.status.state(),
                pairs: w.status.pairs(),
                error: w.status.error(),
            })
            .collect();
        StatusReport {
            workers,
            games: self.ctx.tracker.len(),
            updates: self.ctx.store.update_count(),
            knobs: self.ctx.knobs.get(),
            paused: self.ctx.gate.is_paused(),
        }
    }

    /// 全ワーカーを止めて終了を待つ。対局中のワーカーはその組を指し終えてから止まる。
    pub fn shutdown(&mut self) {
        self.ctx.gate.stop();
        for w in &mut self.workers {
            if let Some(handle) = w.thread.take() {
                if handle.join().is_err() {
                    log::error!("worker {} panicked", w.status.id);
                }
            }
        }
        self.poll_exits();
    }

    /// ワーカーを止めてから書き出す。対局中だった組の更新も保存に含まれる。
    pub fn shutdown_and_persist(&mut self, path: &Path) -> Result<()> {
        self.shutdown();
        self.persist(path)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_main(
    id: usize,
    factory: Arc<EvaluatorFactory>,
    ctx: Arc<TuningContext>,
    status: Arc<WorkerStatus>,
    seed: Option<u64>,
    tx: chan::Sender<WorkerExit>,
) {
    let result = factory(id).and_then(|evaluator| {
        let worker = Worker::new(evaluator, ctx, status.clone(), seed);
        log::info!("worker {id}: {}", status.label());
        worker.run()
    });
    let error = result.err().map(|e| {
        let label = status.label();
        log::error!("worker {id} ({label}) stopped: {e}");
        e.to_string()
    });
    *status.error.lock() = error.clone();
    status.set_state(WorkerState::Terminated);
    let _ = tx.send(WorkerExit { id, error });
}

/// `status` コマンドの出力
#[derive(Clone, Debug)]
pub struct StatusReport {
    pub workers: Vec<WorkerLine>,
    pub games: usize,
    pub updates: u64,
    pub knobs: KnobValues,
    pub paused: bool,
}

#[derive(Clone, Debug)]
pub struct WorkerLine {
    pub id: usize,
    pub label: String,
    pub state: WorkerState,
    pub pairs: u64,
    pub error: Option<String>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "games {} , updates {} , scale {} , mobility {} , report columns {}{}",
            self.games,
            self.updates,
            self.knobs.scale,
            self.knobs.mobility,
            self.knobs.report_columns,
            if self.paused { " (paused)" } else { "" }
        )?;
        for w in &self.workers {
            write!(f, "  worker {:>2} {:<10} pairs {:>6}  {}", w.id, w.state.label(), w.pairs, w.label)?;
            if let Some(e) = &w.error {
                write!(f, "  error: {e}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

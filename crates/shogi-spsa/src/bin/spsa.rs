use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use shogi_spsa::config::TunerSettings;
use shogi_spsa::console::{ConsoleCommand, HELP};
use shogi_spsa::evaluator::{EngineMatch, TrialEvaluator};
use shogi_spsa::kif::KifLog;
use shogi_spsa::orchestrator::{EvaluatorFactory, Orchestrator, TuningContext};
use shogi_spsa::position::StartPositions;
use shogi_spsa::store::ParameterStore;

#[derive(Parser, Debug)]
#[command(author, version, about = "Concurrent SPSA tuner for USI engines")]
struct Cli {
    /// 設定ファイル(TOML)
    #[arg(long, default_value = "spsa.toml")]
    settings: PathBuf,

    /// パラメーター表(name, type, v, min, max, step, delta)。設定ファイルの値を上書きする
    #[arg(long)]
    params: Option<PathBuf>,

    /// 対局スレッド数。設定ファイルの値を上書きする
    #[arg(long)]
    workers: Option<usize>,

    /// 起動直後にチューニングを始める
    #[arg(long, default_value_t = false)]
    autostart: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = TunerSettings::load(&cli.settings)
        .with_context(|| format!("failed to load settings {}", cli.settings.display()))?;
    if let Some(params) = cli.params {
        settings.params = params;
    }
    if let Some(workers) = cli.workers {
        settings.workers = workers;
    }

    let store = Arc::new(
        ParameterStore::load(&settings.params)
            .with_context(|| format!("failed to read parameters {}", settings.params.display()))?,
    );
    log::info!("read parameter file {}, {} parameters", settings.params.display(), store.len());
    let starts = Arc::new(
        StartPositions::load(settings.start_positions.as_deref()).context("failed to read start positions")?,
    );
    let kif = Arc::new(KifLog::new(&settings.kif_dir, settings.kif_gzip));

    // Ctrl-C でもパラメーターを書き出してから終了する
    {
        let store = store.clone();
        let path = settings.params.clone();
        let kif = kif.clone();
        let installed = ctrlc::set_handler(move || {
            eprintln!("\nInterrupted, writing parameters...");
            if let Err(e) = store.persist(&path) {
                log::error!("failed to write parameters: {e}");
            }
            let _ = kif.close();
            std::process::exit(0);
        });
        if let Err(e) = installed {
            log::warn!("failed to install Ctrl-C handler, parameters will not be written on interrupt: {e}");
        }
    }

    let ctx = Arc::new(TuningContext::new(store.clone(), settings.knobs(), settings.base_window));
    let settings = Arc::new(settings);
    let factory: Arc<EvaluatorFactory> = {
        let settings = settings.clone();
        let kif = kif.clone();
        Arc::new(move |id: usize| -> shogi_spsa::Result<Box<dyn TrialEvaluator>> {
            let evaluator = EngineMatch::spawn(&settings, id, starts.clone(), Some(kif.clone()))?;
            Ok(Box::new(evaluator))
        })
    };
    let mut orch = Orchestrator::new(ctx, factory, settings.seed);

    if cli.autostart {
        orch.start(settings.workers)?;
    }

    let stdin = io::stdin();
    let mut save_on_exit = true;
    print_prompt();
    for line in stdin.lock().lines() {
        let line = line?;
        orch.poll_exits();
        if line.trim().is_empty() {
            print_prompt();
            continue;
        }
        let cmd = match line.parse::<ConsoleCommand>() {
            Ok(cmd) => cmd,
            Err(e) => {
                println!("{e}");
                print_prompt();
                continue;
            }
        };
        match cmd {
            ConsoleCommand::Quit => break,
            ConsoleCommand::QuitWithoutSave => {
                save_on_exit = false;
                break;
            }
            ConsoleCommand::Start => {
                if orch.worker_count() > 0 {
                    println!("already started ({} workers)", orch.worker_count());
                } else {
                    orch.start(settings.workers)?;
                }
            }
            ConsoleCommand::Pause => orch.pause(),
            ConsoleCommand::Resume => orch.resume(),
            ConsoleCommand::PrintParameters => print!("{}", orch.print_parameters()),
            ConsoleCommand::WriteParameters => {
                if let Err(e) = orch.persist(&settings.params) {
                    log::error!("failed to write parameters: {e}");
                }
            }
            ConsoleCommand::SetMobility(v) => report_knob(orch.set_mobility(v), "mobility", v),
            ConsoleCommand::SetScale(v) => report_knob(orch.set_scale(v), "scale", v),
            ConsoleCommand::SetReportColumns(n) => report_knob(orch.set_report_columns(n), "report columns", n),
            ConsoleCommand::Status => print!("{}", orch.status()),
            ConsoleCommand::Help => println!("{HELP}"),
        }
        print_prompt();
    }

    if orch.worker_count() > 0 {
        log::info!("waiting for workers to finish the current pair...");
    }
    // 対局中の組の更新まで含めるため、ワーカーを止めてから書き出す
    if save_on_exit {
        orch.shutdown_and_persist(&settings.params)
            .with_context(|| format!("failed to write parameters {}", settings.params.display()))?;
    } else {
        orch.shutdown();
    }
    kif.close().context("failed to close kif file")?;
    if let Some(path) = kif.path() {
        log::info!("wrote {} games to {}", kif.games_written(), path.display());
    }
    Ok(())
}

fn print_prompt() {
    print!("[Q]uit [S]tart [H]elp> ");
    let _ = io::stdout().flush();
}

fn report_knob<T: std::fmt::Display>(result: shogi_spsa::Result<()>, name: &str, value: T) {
    match result {
        Ok(()) => println!("{name} = {value}"),
        Err(e) => println!("{e}"),
    }
}

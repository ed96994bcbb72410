#![cfg(unix)]

//! `/bin/sh` で書いた台本エンジンを相手に USI の入出力を確かめる

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use shogi_spsa::engine::{EngineConfig, EngineProcess, Score, SearchReply, UsiEngine};
use shogi_spsa::perturb::EngineOption;
use shogi_spsa::TuneError;

/// 台本エンジンの応答。各フィールドはシェルのコマンド列。
struct Script {
    ready: &'static str,
    go: &'static str,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            ready: "echo readyok",
            go: "echo \"info depth 3 score cp 42 pv 7g7f\"; echo \"bestmove 7g7f ponder 3c3d\"",
        }
    }
}

/// 台本を書き出し、`setoption` を記録するログのパスと一緒に返す。
fn write_engine(dir: &Path, script: Script) -> (PathBuf, PathBuf) {
    let log = dir.join("setoption.log");
    let body = format!(
        r#"while read -r line; do
  case "$line" in
    usi)
      echo "id name fake"
      echo "option name Threads type spin default 1 min 1 max 64"
      echo "option name p type spin default 10 min 0 max 20"
      echo "usiok" ;;
    isready) {ready} ;;
    setoption*) echo "$line" >> "{log}" ;;
    go*) {go} ;;
    quit) exit 0 ;;
  esac
done
"#,
        ready = script.ready,
        go = script.go,
        log = log.display()
    );
    let path = dir.join("engine.sh");
    std::fs::write(&path, body).unwrap();
    (path, log)
}

fn config(script: &Path) -> EngineConfig {
    EngineConfig {
        path: PathBuf::from("/bin/sh"),
        args: vec![script.display().to_string()],
        label: "fake#0".to_string(),
        threads: 2,
        hash_mb: 16,
        usi_options: Vec::new(),
        ready_timeout: Duration::from_secs(5),
    }
}

fn option(name: &str, value: &str) -> EngineOption {
    EngineOption {
        name: name.to_string(),
        value: value.to_string(),
    }
}

#[test]
fn configure_waits_for_readyok_and_search_decodes_bestmove() {
    let dir = tempfile::tempdir().unwrap();
    let (script, log) = write_engine(
        dir.path(),
        Script {
            ready: "sleep 0.2; echo readyok",
            ..Script::default()
        },
    );
    let mut engine = EngineProcess::spawn(&config(&script)).unwrap();
    // 持っていない Hash / USI_Hash は送らない
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "setoption name Threads value 2\n");

    let started = Instant::now();
    engine.configure(&[option("p", "12")]).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(
        std::fs::read_to_string(&log).unwrap(),
        "setoption name Threads value 2\nsetoption name p value 12\n"
    );

    engine.new_game().unwrap();
    let reply = engine.search("startpos", 1000).unwrap();
    assert_eq!(
        reply,
        SearchReply::Move {
            token: "7g7f".to_string(),
            eval: Some(Score::Cp(42)),
        }
    );
}

#[test]
fn resign_is_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let (script, _) = write_engine(
        dir.path(),
        Script {
            go: "echo \"info depth 1 score mate -2\"; echo \"bestmove resign\"",
            ..Script::default()
        },
    );
    let mut engine = EngineProcess::spawn(&config(&script)).unwrap();
    assert_eq!(engine.search("startpos moves 7g7f", 1000).unwrap(), SearchReply::Resign);
}

#[test]
fn error_line_while_waiting_for_readyok_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (script, _) = write_engine(
        dir.path(),
        Script {
            ready: "echo \"Error! : failed to open eval file\"; echo readyok",
            ..Script::default()
        },
    );
    match EngineProcess::spawn(&config(&script)) {
        Err(TuneError::EngineProtocol { engine, message }) => {
            assert_eq!(engine, "fake#0");
            assert!(message.contains("failed to open eval file"), "{message}");
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("engine error was ignored"),
    }
}

#[test]
fn engine_exit_during_search_is_protocol_error() {
    let dir = tempfile::tempdir().unwrap();
    let (script, _) = write_engine(
        dir.path(),
        Script {
            go: "exit 0",
            ..Script::default()
        },
    );
    let mut engine = EngineProcess::spawn(&config(&script)).unwrap();
    let err = engine.search("startpos", 1000).unwrap_err();
    match err {
        TuneError::EngineProtocol { message, .. } => {
            assert!(message.contains("search position : startpos"), "{message}");
        }
        e => panic!("unexpected error: {e}"),
    }
}

#[test]
fn silent_engine_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let (script, _) = write_engine(
        dir.path(),
        Script {
            ready: ":",
            ..Script::default()
        },
    );
    let mut cfg = config(&script);
    cfg.ready_timeout = Duration::from_millis(300);
    assert!(matches!(
        EngineProcess::spawn(&cfg),
        Err(TuneError::EngineProtocol { .. })
    ));
}

#[test]
fn tuning_an_option_the_engine_lacks_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (script, log) = write_engine(dir.path(), Script::default());
    let mut engine = EngineProcess::spawn(&config(&script)).unwrap();
    let err = engine.configure(&[option("p", "11"), option("q", "3")]).unwrap_err();
    match err {
        TuneError::EngineProtocol { message, .. } => assert!(message.contains("'q'"), "{message}"),
        e => panic!("unexpected error: {e}"),
    }
    assert!(!std::fs::read_to_string(&log).unwrap().contains("name q"));
}

//! 対話コンソールのコマンド

use std::fmt;

pub const HELP: &str = "\
commands:
  quit, q                  write parameters and exit
  quit-without-save        exit without writing parameters
  start, s                 start the worker pool
  pause / resume           pause after the current pair / resume
  print-parameters, p      show current parameter values
  write-parameters, w      write the parameter file now
  set-mobility <f>         set the update multiplier
  set-scale <f>            set the perturbation multiplier
  set-report-columns <n>   number of windows shown in reports
  status                   show worker states and knobs
  help, h                  show this help";

#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleCommand {
    Quit,
    QuitWithoutSave,
    Start,
    Pause,
    Resume,
    PrintParameters,
    WriteParameters,
    SetMobility(f64),
    SetScale(f64),
    SetReportColumns(usize),
    Status,
    Help,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseCommandError {
    Empty,
    Unknown(String),
    MissingArgument(&'static str),
    BadArgument { command: &'static str, value: String },
}

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCommandError::Empty => write!(f, "empty command"),
            ParseCommandError::Unknown(cmd) => write!(f, "unknown command '{cmd}' (try 'help')"),
            ParseCommandError::MissingArgument(cmd) => write!(f, "{cmd} needs an argument"),
            ParseCommandError::BadArgument { command, value } => {
                write!(f, "{command}: cannot parse '{value}'")
            }
        }
    }
}

impl std::error::Error for ParseCommandError {}

impl std::str::FromStr for ConsoleCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let Some(head) = tokens.next() else {
            return Err(ParseCommandError::Empty);
        };
        let arg = tokens.next();
        Ok(match head.to_ascii_lowercase().as_str() {
            "quit" | "q" => ConsoleCommand::Quit,
            "quit-without-save" => ConsoleCommand::QuitWithoutSave,
            "start" | "s" => ConsoleCommand::Start,
            "pause" => ConsoleCommand::Pause,
            "resume" => ConsoleCommand::Resume,
            "print-parameters" | "p" => ConsoleCommand::PrintParameters,
            "write-parameters" | "w" => ConsoleCommand::WriteParameters,
            "set-mobility" => ConsoleCommand::SetMobility(parse_arg("set-mobility", arg)?),
            "set-scale" => ConsoleCommand::SetScale(parse_arg("set-scale", arg)?),
            "set-report-columns" => ConsoleCommand::SetReportColumns(parse_arg("set-report-columns", arg)?),
            "status" => ConsoleCommand::Status,
            "help" | "h" => ConsoleCommand::Help,
            _ => return Err(ParseCommandError::Unknown(head.to_string())),
        })
    }
}

fn parse_arg<T: std::str::FromStr>(command: &'static str, arg: Option<&str>) -> Result<T, ParseCommandError> {
    let value = arg.ok_or(ParseCommandError::MissingArgument(command))?;
    value.parse().map_err(|_| ParseCommandError::BadArgument {
        command,
        value: value.to_string(),
    })
}

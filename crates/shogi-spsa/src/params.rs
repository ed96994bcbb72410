//! SPSA パラメーター表の読み書き
//!
//! 1行1パラメーターで `name, type, v, min, max, step, delta` の順にカンマ区切りで並ぶ。
//! `//` 以降はコメント、`[[NOT USED]]` を含む行は未使用パラメーターとして扱う。
//! 書き戻し時は読み込んだ行の書式(空白・数値表記・コメント)をそのまま保ち、
//! 値が変化したフィールドだけを差し替える。

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Result, TuneError};

/// パラメーターファイルで、そのパラメーターを使っていないことを示す文字列。
pub const PARAM_NOT_USED_MARKER: &str = "[[NOT USED]]";

/// 1行に必要なフィールド数
const REQUIRED_FIELDS: usize = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Integer,
    Real,
}

impl ParamKind {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "integer" => Some(ParamKind::Integer),
            "float" | "real" | "double" => Some(ParamKind::Real),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ParamKind::Integer => "int",
            ParamKind::Real => "float",
        }
    }
}

/// 読み込んだ行のうち value フィールドの前後の生テキスト
#[derive(Clone, Debug, PartialEq)]
struct RowLayout {
    head: String,
    value_text: String,
    loaded_value: f64,
    tail: String,
}

/// チューニング対象のパラメーター1つ分。
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub kind: ParamKind,
    /// 現在値。int 型でも小数のまま保持し、エンジンへ渡す時だけ丸める。
    pub value: f64,
    pub min: f64,
    pub max: f64,
    /// 摂動幅(SPSA の c)
    pub step: f64,
    /// 1回の更新量(SPSA の a)
    pub delta: f64,
    pub active: bool,
    pub comment: String,
    layout: Option<RowLayout>,
}

impl Parameter {
    pub fn new(
        name: impl Into<String>,
        kind: ParamKind,
        value: f64,
        min: f64,
        max: f64,
        step: f64,
        delta: f64,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            value: value.clamp(min, max),
            min,
            max,
            step,
            delta,
            active: true,
            comment: String::new(),
            layout: None,
        }
    }

    pub fn is_int(&self) -> bool {
        self.kind == ParamKind::Integer
    }

    pub fn clamp(&self, raw: f64) -> f64 {
        raw.clamp(self.min, self.max)
    }

    /// エンジンに渡す USI オプション値の文字列。int は四捨五入(0.5 は 0 から遠い側)。
    pub fn option_value_string(&self, value: f64) -> String {
        option_value_string(self.is_int(), value)
    }

    /// 1行分に整形する。読み込み元の書式があればそれを保つ。
    pub fn to_row(&self) -> String {
        if let Some(layout) = &self.layout {
            let value_text = if layout.loaded_value.to_bits() == self.value.to_bits() {
                layout.value_text.clone()
            } else {
                format_number(self.value)
            };
            return format!("{}{}{}", layout.head, value_text, layout.tail);
        }

        let mut line = format!(
            "{}, {}, {}, {}, {}, {}, {}",
            self.name,
            self.kind.label(),
            format_number(self.value),
            format_number(self.min),
            format_number(self.max),
            format_number(self.step),
            format_number(self.delta)
        );
        if !self.comment.is_empty() {
            line.push_str(" //");
            line.push_str(&self.comment);
        }
        if !self.active {
            line.push_str(PARAM_NOT_USED_MARKER);
        }
        line
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {:.4}", self.name, self.value)?;
        if self.is_int() {
            write!(f, " (-> {})", self.value.round() as i64)?;
        }
        write!(f, " [{}, {}]", self.min, self.max)?;
        if !self.active {
            write!(f, " {PARAM_NOT_USED_MARKER}")?;
        }
        Ok(())
    }
}

/// USI オプション値の文字列化
pub fn option_value_string(is_int: bool, value: f64) -> String {
    if is_int {
        format!("{}", value.round() as i64)
    } else {
        format!("{value:.6}")
    }
}

/// 最短で往復可能な10進表記
fn format_number(v: f64) -> String {
    format!("{v}")
}

#[derive(Clone, Debug, PartialEq)]
enum TableLine {
    Param(usize),
    Verbatim(String),
}

/// パラメーター以外の行(空行・`#` 行)も含めたファイルの骨格
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableLayout {
    lines: Vec<TableLine>,
    trailing_newline: bool,
    /// 読み込み元の改行が CRLF だったか
    crlf: bool,
}

impl TableLayout {
    fn newline(&self) -> &'static str {
        if self.crlf { "\r\n" } else { "\n" }
    }

    /// `params` を骨格に流し込んでファイル内容を作る。
    pub fn render(&self, params: &[Parameter]) -> String {
        let newline = self.newline();
        let mut out = String::new();
        let mut emitted = 0usize;
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push_str(newline);
            }
            match line {
                TableLine::Param(idx) => {
                    if let Some(p) = params.get(*idx) {
                        out.push_str(&p.to_row());
                        emitted += 1;
                    }
                }
                TableLine::Verbatim(text) => out.push_str(text),
            }
        }
        // 骨格に無いパラメーター(プログラムから追加されたもの)は末尾へ
        for p in params.iter().skip(emitted) {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push_str(newline);
            }
            out.push_str(&p.to_row());
        }
        if self.trailing_newline && !out.is_empty() {
            out.push_str(newline);
        }
        out
    }
}

/// 読み込んだパラメーター表
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterTable {
    pub params: Vec<Parameter>,
    pub layout: TableLayout,
}

impl ParameterTable {
    pub fn from_params(params: Vec<Parameter>) -> Self {
        Self {
            params,
            layout: TableLayout {
                lines: Vec::new(),
                trailing_newline: true,
                crlf: false,
            },
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TuneError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let table = Self::parse(&text, &path.display().to_string())?;
        log::info!("read parameters, path = {}, {} parameters", path.display(), table.params.len());
        Ok(table)
    }

    pub fn parse(text: &str, source: &str) -> Result<Self> {
        let mut params: Vec<Parameter> = Vec::new();
        let mut lines = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            match parse_param_line(line, source, idx + 1)? {
                Some(param) => {
                    if params.iter().any(|p| p.name == param.name) {
                        return Err(TuneError::format(
                            source,
                            idx + 1,
                            format!("duplicate parameter name '{}'", param.name),
                        ));
                    }
                    lines.push(TableLine::Param(params.len()));
                    params.push(param);
                }
                None => lines.push(TableLine::Verbatim(line.to_string())),
            }
        }
        if params.is_empty() {
            return Err(TuneError::format(source, 0, "no parameters loaded"));
        }
        Ok(Self {
            params,
            layout: TableLayout {
                lines,
                trailing_newline: text.ends_with('\n'),
                crlf: text.find('\n').is_some_and(|i| text[..i].ends_with('\r')),
            },
        })
    }

    pub fn render(&self) -> String {
        self.layout.render(&self.params)
    }
}

/// 表の内容をファイルへ書き出す。途中で落ちても元ファイルが壊れないよう一時ファイル経由で置き換える。
pub fn write_table(path: &Path, layout: &TableLayout, params: &[Parameter]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)?;
        let mut w = BufWriter::new(file);
        w.write_all(layout.render(params).as_bytes())?;
        w.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn parse_param_line(line: &str, source: &str, line_no: usize) -> Result<Option<Parameter>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let active = !line.contains(PARAM_NOT_USED_MARKER);
    let payload = line.replace(PARAM_NOT_USED_MARKER, "");

    let (val_part, comment) = match payload.split_once("//") {
        Some((left, right)) => (left, right.to_string()),
        None => (payload.as_str(), String::new()),
    };

    let cols: Vec<&str> = val_part.split(',').map(str::trim).collect();
    if cols.len() < REQUIRED_FIELDS {
        return Err(TuneError::format(
            source,
            line_no,
            format!("expected {REQUIRED_FIELDS} fields, got {}: '{line}'", cols.len()),
        ));
    }
    if cols[0].is_empty() {
        return Err(TuneError::format(source, line_no, "empty parameter name"));
    }

    let kind = ParamKind::parse(cols[1]).ok_or_else(|| {
        TuneError::format(source, line_no, format!("unknown parameter type '{}'", cols[1]))
    })?;
    let number = |i: usize, field: &str| -> Result<f64> {
        // nan や inf は f64 としては読めるが、範囲判定や clamp が壊れるので弾く
        cols[i]
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| TuneError::format(source, line_no, format!("invalid {field} '{}'", cols[i])))
    };
    let value = number(2, "v")?;
    let min = number(3, "min")?;
    let max = number(4, "max")?;
    let step = number(5, "step")?;
    let delta = number(6, "delta")?;
    if min > max {
        return Err(TuneError::format(source, line_no, format!("min {min} > max {max}")));
    }

    let mut param = Parameter {
        name: cols[0].to_string(),
        kind,
        value,
        min,
        max,
        step,
        delta,
        active,
        comment,
        layout: None,
    };
    if !(min..=max).contains(&value) {
        log::warn!("{source}({line_no}): {} = {value} is out of [{min}, {max}], clamped", param.name);
        param.value = param.clamp(value);
    }

    param.layout = locate_value(line).and_then(|(start, end)| {
        let text = &line[start..end];
        (text == cols[2]).then(|| RowLayout {
            head: line[..start].to_string(),
            value_text: text.to_string(),
            loaded_value: value,
            tail: line[end..].to_string(),
        })
    });
    Ok(Some(param))
}

/// 生の行から value フィールド(3番目)の byte 範囲を求める。
fn locate_value(line: &str) -> Option<(usize, usize)> {
    let body_end = line.find("//").unwrap_or(line.len());
    let body = &line[..body_end];
    let mut commas = body.match_indices(',').map(|(i, _)| i);
    let start = commas.nth(1)? + 1;
    let end = commas.next()?;
    let seg = &body[start..end];
    let lead = seg.len() - seg.trim_start().len();
    let len = seg.trim().len();
    Some((start + lead, start + lead + len))
}

//! Phase plan grammar.
//!
//! Each non-empty line is one phase:
//!
//! ```text
//! PhaseNumber "Goal" "Hypothesis" N "Param1" .. "ParamN" "Min1" .. "MinN" "Max1" .. "MaxN" NumTrials
//! ```
//!
//! Quoted spans are read in order; the bare integers left after removing them
//! must be the phase number, `N` and the trial count.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::warn;

use crate::error::{DseError, Result};
use crate::value::ParamValue;

pub const MAX_PARAMS_PER_PHASE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub number: u64,
    pub goal: String,
    pub hypothesis: String,
    pub params_changed: Vec<String>,
    pub param_ranges: Vec<(ParamValue, ParamValue)>,
    pub num_trials: usize,
}

impl Phase {
    pub fn range_of(&self, param: &str) -> Option<&(ParamValue, ParamValue)> {
        self.params_changed
            .iter()
            .position(|p| p == param)
            .and_then(|i| self.param_ranges.get(i))
    }

    /// Renders the phase in canonical grammar form.
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{} {} {} {}",
            self.number,
            quote(&self.goal),
            quote(&self.hypothesis),
            self.params_changed.len()
        );
        for name in &self.params_changed {
            let _ = write!(line, " {}", quote(name));
        }
        for (start, _) in &self.param_ranges {
            let _ = write!(line, " {}", quote(&start.to_string()));
        }
        for (_, end) in &self.param_ranges {
            let _ = write!(line, " {}", quote(&end.to_string()));
        }
        let _ = write!(line, " {}", self.num_trials);
        line
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub phases: Vec<Phase>,
}

impl Plan {
    /// Parses plan text. Pure: the same text always yields the same plan.
    pub fn parse(text: &str) -> Result<Self> {
        let mut phases = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            if raw.trim().is_empty() {
                continue;
            }
            phases.push(parse_phase_line(raw, idx + 1)?);
        }
        Ok(Plan { phases })
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for phase in &self.phases {
            out.push_str(&phase.to_line());
            out.push('\n');
        }
        out
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Phase> {
        self.phases.get(index)
    }
}

fn quote(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| match c {
            '"' => '\'',
            '\n' | '\r' => ' ',
            other => other,
        })
        .collect();
    format!("\"{}\"", cleaned)
}

/// Splits a line into its quoted spans and the text left outside them.
fn split_quoted(line: &str, line_no: usize) -> Result<(Vec<String>, String)> {
    let mut quoted = Vec::new();
    let mut bare = String::new();
    let mut current: Option<String> = None;
    for c in line.chars() {
        if c == '"' {
            match current.take() {
                Some(done) => quoted.push(done),
                None => {
                    current = Some(String::new());
                    bare.push(' ');
                }
            }
        } else if let Some(buf) = current.as_mut() {
            buf.push(c);
        } else {
            bare.push(c);
        }
    }
    if current.is_some() {
        return Err(DseError::malformed(line_no, "unterminated quoted field"));
    }
    Ok((quoted, bare))
}

fn parse_phase_line(line: &str, line_no: usize) -> Result<Phase> {
    let (quoted, bare) = split_quoted(line, line_no)?;
    let mut ints = Vec::new();
    for token in bare.split_whitespace() {
        if token.bytes().all(|b| b.is_ascii_digit()) {
            let v = token
                .parse::<u64>()
                .map_err(|_| DseError::malformed(line_no, format!("integer out of range: {}", token)))?;
            ints.push(v);
        }
    }
    if ints.len() < 3 {
        return Err(DseError::malformed(
            line_no,
            format!(
                "expected phase number, parameter count and trial count, found {} bare integer(s)",
                ints.len()
            ),
        ));
    }
    if ints.len() > 3 {
        warn!(line = line_no, extra = ints.len() - 3, "ignoring extra bare integers in plan line");
    }
    let (number, n, num_trials) = (ints[0], ints[1] as usize, ints[2] as usize);
    if !(1..=MAX_PARAMS_PER_PHASE).contains(&n) {
        return Err(DseError::malformed(
            line_no,
            format!(
                "parameter count {} outside 1..={}",
                n, MAX_PARAMS_PER_PHASE
            ),
        ));
    }
    let needed = 2 + 3 * n;
    if quoted.len() < needed {
        return Err(DseError::malformed(
            line_no,
            format!(
                "expected {} quoted fields for {} parameter(s), found {}",
                needed,
                n,
                quoted.len()
            ),
        ));
    }
    if quoted.len() > needed {
        warn!(line = line_no, extra = quoted.len() - needed, "ignoring extra quoted fields in plan line");
    }
    if num_trials == 0 {
        return Err(DseError::malformed(line_no, "trial count must be positive"));
    }

    let params_changed: Vec<String> = quoted[2..2 + n].to_vec();
    let mins = &quoted[2 + n..2 + 2 * n];
    let maxs = &quoted[2 + 2 * n..2 + 3 * n];
    let param_ranges = mins
        .iter()
        .zip(maxs)
        .map(|(lo, hi)| (ParamValue::coerce(lo), ParamValue::coerce(hi)))
        .collect();

    Ok(Phase {
        number,
        goal: quoted[0].clone(),
        hypothesis: quoted[1].clone(),
        params_changed,
        param_ranges,
        num_trials,
    })
}

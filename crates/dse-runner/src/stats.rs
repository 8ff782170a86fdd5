//! Result extraction from the simulator's statistics report.

use crate::error::{DseError, Result};
use crate::state::TrialResult;

pub const SIM_SECONDS_POS: usize = 0;
pub const MEMORY_BYTES_POS: usize = 6;
pub const INSTRUCTION_RATE_POS: usize = 9;

const MIN_TOKENS: usize = INSTRUCTION_RATE_POS + 1;

/// Every whitespace-delimited token that is a signed or unsigned integer or
/// decimal, in report order.
pub fn numeric_tokens(report: &str) -> Vec<f64> {
    report
        .split_whitespace()
        .filter(|t| is_numeric_token(t))
        .filter_map(|t| t.parse::<f64>().ok())
        .collect()
}

fn is_numeric_token(token: &str) -> bool {
    let body = token.strip_prefix(['+', '-']).unwrap_or(token);
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    match frac_part {
        None => !int_part.is_empty() && digits(int_part),
        Some(frac) => {
            (!int_part.is_empty() || !frac.is_empty()) && digits(int_part) && digits(frac)
        }
    }
}

pub fn extract_result(report: Option<&str>) -> Result<TrialResult> {
    let report = report.ok_or_else(|| DseError::MissingStats("no report produced".into()))?;
    let tokens = numeric_tokens(report);
    if tokens.len() < MIN_TOKENS {
        return Err(DseError::MissingStats(format!(
            "expected at least {} numeric tokens, found {}",
            MIN_TOKENS,
            tokens.len()
        )));
    }
    Ok(TrialResult {
        sim_seconds: tokens[SIM_SECONDS_POS],
        memory_bytes_used: tokens[MEMORY_BYTES_POS],
        instruction_rate: tokens[INSTRUCTION_RATE_POS],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEM5_HEAD: &str = "
---------- Begin Simulation Statistics ----------
simSeconds                                   0.000042                       # Number of seconds simulated (Second)
simTicks                                     42000000                       # Number of ticks simulated (Tick)
finalTick                                    42000000                       # Number of ticks from beginning of simulation (Tick)
simFreq                                  1000000000000                       # The number of ticks per simulated second ((Tick/Second))
hostSeconds                                      0.52                       # Real time elapsed on the host (Second)
hostTickRate                                 80591447                       # The number of ticks simulated per host second (ticks/s) ((Tick/Second))
hostMemory                                   11243520                       # Number of bytes of host memory used (Byte)
simInsts                                        68810                       # Number of instructions simulated (Count)
simOps                                         127210                       # Number of ops (including micro ops) simulated (Count)
hostInstRate                                   131985                       # Simulator instruction rate (inst/s) ((Count/Second))
";

    #[test]
    fn reads_fixed_positions_from_gem5_style_report() {
        let result = extract_result(Some(GEM5_HEAD)).expect("stats");
        assert_eq!(result.sim_seconds, 0.000042);
        assert_eq!(result.memory_bytes_used, 11243520.0);
        assert_eq!(result.instruction_rate, 131985.0);
    }

    #[test]
    fn numeric_token_shapes() {
        assert_eq!(
            numeric_tokens("a 1 -2 +3.5 .5 7. x1 1e5 - . 0.25%"),
            vec![1.0, -2.0, 3.5, 0.5, 7.0]
        );
    }

    #[test]
    fn missing_or_short_reports_fail() {
        assert!(matches!(extract_result(None), Err(DseError::MissingStats(_))));
        assert!(matches!(
            extract_result(Some("1 2 3 4 5 6 7 8 9")),
            Err(DseError::MissingStats(_))
        ));
        let ok = extract_result(Some("1 2 3 4 5 6 7 8 9 10")).expect("ten tokens");
        assert_eq!(ok.instruction_rate, 10.0);
    }
}

//! Per-trial parameter values within a phase's bounds.
//!
//! Integer parameters step linearly with denominator `N` (the last trial stops
//! one step short of `end`). Quantity parameters step in log2 space with
//! denominator `N - 1`, snapping to powers of two and hitting both endpoints.
//! Byte-size units (`kB`, `MB`, `GB`, ...) are compared on a common scale, so
//! a range may cross units; other units must match exactly.

use crate::error::{DseError, Result};
use crate::plan::Phase;
use crate::value::{ParamValue, Quantity};

pub fn interpolate(
    param: &str,
    start: &ParamValue,
    end: &ParamValue,
    trial: usize,
    num_trials: usize,
) -> Result<ParamValue> {
    if start == end {
        return Err(DseError::invalid_range(
            param,
            format!("start and end are both {}", start),
        ));
    }
    if trial >= num_trials {
        return Err(DseError::invalid_range(
            param,
            format!("trial {} outside 0..{}", trial, num_trials),
        ));
    }
    match (start, end) {
        (ParamValue::Int(a), ParamValue::Int(b)) => {
            let frac = trial as f64 / num_trials as f64;
            let value = *a as f64 + frac * (*b - *a) as f64;
            Ok(ParamValue::Int(value.round() as i64))
        }
        (ParamValue::Quantity(a), ParamValue::Quantity(b)) => {
            let lo: Quantity = a.parse()?;
            let hi: Quantity = b.parse()?;
            interpolate_quantity(param, &lo, &hi, trial, num_trials)
                .map(|q| ParamValue::Quantity(q.to_string()))
        }
        _ => Err(DseError::invalid_range(
            param,
            format!("bounds {} and {} are of different kinds", start, end),
        )),
    }
}

fn interpolate_quantity(
    param: &str,
    start: &Quantity,
    end: &Quantity,
    trial: usize,
    num_trials: usize,
) -> Result<Quantity> {
    let (start_shift, end_shift) = match (start.unit_shift(), end.unit_shift()) {
        (Some(a), Some(b)) => (a, b),
        _ if start.unit == end.unit => (0, 0),
        _ => {
            return Err(DseError::invalid_range(
                param,
                format!("unit mismatch: {} vs {}", start.unit, end.unit),
            ))
        }
    };
    if start.magnitude == 0 || end.magnitude == 0 {
        return Err(DseError::invalid_range(param, "zero magnitude has no log2"));
    }
    let lo = (start.magnitude as f64).log2() + start_shift as f64;
    let hi = (end.magnitude as f64).log2() + end_shift as f64;
    if lo == hi {
        return Err(DseError::invalid_range(
            param,
            format!("start {} and end {} are the same size", start, end),
        ));
    }
    if trial == 0 {
        return Ok(start.clone());
    }
    if trial == num_trials - 1 {
        return Ok(end.clone());
    }
    // Intermediate values take the finer of the two units so they stay whole.
    let (unit, unit_shift) = if end_shift < start_shift {
        (&end.unit, end_shift)
    } else {
        (&start.unit, start_shift)
    };
    let frac = trial as f64 / (num_trials - 1) as f64;
    let exp = (lo + frac * (hi - lo)).round() - unit_shift as f64;
    if !(0.0..64.0).contains(&exp) {
        return Err(DseError::invalid_range(param, "exponent out of range"));
    }
    Ok(Quantity::new(1u64 << exp as u32, unit.clone()))
}

/// Values for every swept parameter of `phase` at `trial`, in sweep order.
/// Nothing is returned unless every parameter interpolates cleanly.
pub fn phase_values(phase: &Phase, trial: usize) -> Result<Vec<(String, ParamValue)>> {
    phase
        .params_changed
        .iter()
        .zip(&phase.param_ranges)
        .map(|(name, (start, end))| {
            interpolate(name, start, end, trial, phase.num_trials).map(|v| (name.clone(), v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> ParamValue {
        ParamValue::Quantity(s.to_string())
    }

    fn magnitude(v: &ParamValue) -> u64 {
        match v {
            ParamValue::Quantity(s) => s.parse::<Quantity>().expect("quantity").magnitude,
            other => panic!("expected quantity, got {:?}", other),
        }
    }

    #[test]
    fn integer_sweep_uses_trial_count_denominator() {
        let values: Vec<i64> = (0..4)
            .map(|t| match interpolate("assoc", &2.into(), &10.into(), t, 4).expect("value") {
                ParamValue::Int(v) => v,
                other => panic!("expected int, got {:?}", other),
            })
            .collect();
        assert_eq!(values, vec![2, 4, 6, 8]);
    }

    #[test]
    fn integer_sweep_starts_at_start_and_rounds() {
        assert_eq!(
            interpolate("cores", &1.into(), &4.into(), 0, 3).expect("value"),
            ParamValue::Int(1)
        );
        // 1 + 1/3 * 3 = 2, 1 + 2/3 * 3 = 3
        assert_eq!(
            interpolate("cores", &1.into(), &4.into(), 2, 3).expect("value"),
            ParamValue::Int(3)
        );
        // 8 + 1/4 * (2 - 8) = 6.5 rounds away from zero
        assert_eq!(
            interpolate("assoc", &8.into(), &2.into(), 1, 4).expect("value"),
            ParamValue::Int(7)
        );
    }

    #[test]
    fn quantity_sweep_hits_both_endpoints() {
        let n = 7;
        assert_eq!(interpolate("l2", &q("256kB"), &q("4096kB"), 0, n).expect("v"), q("256kB"));
        assert_eq!(
            interpolate("l2", &q("256kB"), &q("4096kB"), n - 1, n).expect("v"),
            q("4096kB")
        );
    }

    #[test]
    fn quantity_sweep_stays_on_powers_of_two() {
        let n = 15;
        let mut prev = 0;
        for t in 0..n {
            let v = interpolate("l1d_size", &q("2kB"), &q("32kB"), t, n).expect("value");
            let m = magnitude(&v);
            assert!(m.is_power_of_two(), "trial {} produced {}", t, m);
            assert!(m >= prev, "trial {} went backwards: {} < {}", t, m, prev);
            prev = m;
        }
    }

    #[test]
    fn descending_quantity_sweep() {
        let n = 5;
        let mags: Vec<u64> = (0..n)
            .map(|t| magnitude(&interpolate("l1i", &q("64kB"), &q("4kB"), t, n).expect("v")))
            .collect();
        assert_eq!(mags, vec![64, 32, 16, 8, 4]);
    }

    #[test]
    fn quantity_sweep_crosses_byte_units() {
        let n = 6;
        let values: Vec<ParamValue> = (0..n)
            .map(|t| interpolate("l2_size", &q("128kB"), &q("4MB"), t, n).expect("v"))
            .collect();
        assert_eq!(
            values,
            vec![
                q("128kB"),
                q("256kB"),
                q("512kB"),
                q("1024kB"),
                q("2048kB"),
                q("4MB")
            ]
        );
        let down: Vec<ParamValue> = (0..3)
            .map(|t| interpolate("mem", &q("8GB"), &q("512MB"), t, 3).expect("v"))
            .collect();
        assert_eq!(down, vec![q("8GB"), q("2048MB"), q("512MB")]);
    }

    #[test]
    fn single_trial_quantity_phase_yields_start() {
        assert_eq!(interpolate("mem", &q("1GB"), &q("4GB"), 0, 1).expect("v"), q("1GB"));
    }

    #[test]
    fn degenerate_and_mismatched_ranges_are_rejected() {
        assert!(matches!(
            interpolate("x", &4.into(), &4.into(), 0, 3),
            Err(DseError::InvalidRange { .. })
        ));
        assert!(matches!(
            interpolate("x", &q("2kB"), &q("2kB"), 0, 3),
            Err(DseError::InvalidRange { .. })
        ));
        assert!(matches!(
            interpolate("x", &q("1024kB"), &q("1MB"), 1, 3),
            Err(DseError::InvalidRange { .. })
        ));
        assert!(matches!(
            interpolate("x", &q("2GHz"), &q("4MHz"), 1, 3),
            Err(DseError::InvalidRange { .. })
        ));
        assert!(matches!(
            interpolate("x", &2.into(), &q("2MB"), 1, 3),
            Err(DseError::InvalidRange { .. })
        ));
        assert!(matches!(
            interpolate("x", &2.into(), &8.into(), 3, 3),
            Err(DseError::InvalidRange { .. })
        ));
        assert!(matches!(
            interpolate("x", &q("big"), &q("2kB"), 1, 3),
            Err(DseError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn phase_values_fail_as_a_whole() {
        let phase = Phase {
            number: 0,
            goal: "g".into(),
            hypothesis: "h".into(),
            params_changed: vec!["l1d_assoc".into(), "l2_size".into()],
            param_ranges: vec![(2.into(), 8.into()), (q("1MB"), q("1MB"))],
            num_trials: 4,
        };
        assert!(phase_values(&phase, 1).is_err());
    }
}

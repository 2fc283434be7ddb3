//! Textual grammar of one data cell.
//!
//! | cell | meaning |
//! |---|---|
//! | `3.2` | observed value |
//! | `{1,3,4}` | one of the listed values |
//! | `[1.5:2]` | inside the interval |
//! | `[-inf:2]` | at most 2 |
//! | `[1.5:+inf]` | at least 1.5 |
//! | anything else (`?`, `NA`, empty) | completely missing |

use crate::data::MisVal;

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedValue {
    Present(f64),
    Missing(MisVal<f64>),
}

fn parse_number(token: &str) -> Result<f64, String> {
    token
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
        .ok_or_else(|| format!("could not read \"{}\" as a number.\n", token.trim()))
}

fn parse_bound(token: &str) -> Result<Option<f64>, String> {
    match token.trim() {
        "-inf" | "+inf" | "inf" => Ok(None),
        other => parse_number(other).map(Some),
    }
}

/// Parses one cell. Only malformed brackets are errors; unknown tokens are missing values.
///
/// # Examples
///
/// ```rust
/// use mixtcomp::data::MisVal;
/// use mixtcomp::io::{parse_cell, ParsedValue};
///
/// assert_eq!(parse_cell("2.5").unwrap(), ParsedValue::Present(2.5));
/// assert_eq!(parse_cell("[-inf:3]").unwrap(), ParsedValue::Missing(MisVal::LeftUnbounded(3.0)));
/// assert_eq!(parse_cell("NA").unwrap(), ParsedValue::Missing(MisVal::Missing));
/// assert!(parse_cell("{1,x}").is_err());
/// ```
pub fn parse_cell(cell: &str) -> Result<ParsedValue, String> {
    let cell = cell.trim();

    if let Ok(x) = cell.parse::<f64>() {
        return Ok(if x.is_finite() {
            ParsedValue::Present(x)
        } else {
            ParsedValue::Missing(MisVal::Missing)
        });
    }

    if let Some(inner) = cell.strip_prefix('{').and_then(|c| c.strip_suffix('}')) {
        let values = inner
            .split(',')
            .map(parse_number)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(ParsedValue::Missing(MisVal::FiniteValues(values)));
    }

    if let Some(inner) = cell.strip_prefix('[').and_then(|c| c.strip_suffix(']')) {
        let (lo, hi) = inner
            .split_once(':')
            .ok_or_else(|| format!("interval \"{cell}\" must be written [a:b].\n"))?;
        let lo_is_lower_inf = lo.trim() == "-inf";
        let hi_is_upper_inf = matches!(hi.trim(), "+inf" | "inf");
        let mis_val = match (parse_bound(lo)?, parse_bound(hi)?) {
            (Some(lo), Some(hi)) if lo <= hi => MisVal::Interval(lo, hi),
            (Some(_), Some(_)) => {
                return Err(format!("interval \"{cell}\" has its lower bound above its upper bound.\n"))
            }
            (None, Some(hi)) if lo_is_lower_inf => MisVal::LeftUnbounded(hi),
            (Some(lo), None) if hi_is_upper_inf => MisVal::RightUnbounded(lo),
            (None, None) if lo_is_lower_inf && hi_is_upper_inf => MisVal::Missing,
            _ => return Err(format!("interval \"{cell}\" has misplaced infinite bounds.\n")),
        };
        return Ok(ParsedValue::Missing(mis_val));
    }

    Ok(ParsedValue::Missing(MisVal::Missing))
}

//! Text rendering of reports in the familiar `pprof top` layout

use super::{Report, Row, Unit};
use std::fmt;

const HEADER: &str = "      flat  flat%   sum%        cum   cum%";

fn value(v: f64, unit: Unit) -> String {
    match unit {
        Unit::None | Unit::Byte => format!("{}", v.round() as i64),
        unit => format!("{:.2}{}", v, unit),
    }
}

impl Row {
    /// One table line, function name last
    pub fn to_line(&self, unit: Unit) -> String {
        format!(
            "{:>10} {:>5.2}% {:>5.2}% {:>10} {:>5.2}%  {}",
            value(self.flat, unit),
            self.flat_percent,
            self.sum_percent,
            value(self.cum, unit),
            self.cum_percent,
            self.function
        )
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Report: {}", self.label)?;
        for err in &self.errors {
            writeln!(f, "error: {}", err)?;
        }
        if self.rows.is_empty() {
            return writeln!(f, "(no rows)");
        }
        writeln!(f, "Showing top {} nodes", self.rows.len())?;
        writeln!(f, "{}", HEADER)?;
        for row in &self.rows {
            writeln!(f, "{}", row.to_line(self.unit))?;
        }
        Ok(())
    }
}

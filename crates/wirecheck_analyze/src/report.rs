//! Plain-text rendering of an analysis.

use crate::analyzer::{Analysis, DiffDetail};
use std::fmt::Write;

const BULLET: &str = " - ";
const INDENT: &str = "   ";

/// Render an analysis for a terminal
#[must_use]
pub fn render(analysis: &Analysis) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write_report(&mut out, analysis);
    out
}

fn write_report(out: &mut String, analysis: &Analysis) -> std::fmt::Result {
    writeln!(out, "Diff:")?;
    for record in &analysis.records {
        writeln!(out, "{}{}", BULLET, record.message)?;
        writeln!(out, "{}kind: {}", INDENT, record.kind)?;
        match &record.detail {
            DiffDetail::Lone { origin, commands } => {
                writeln!(out, "{}{}:", INDENT, origin)?;
                for command in commands {
                    writeln!(out, "{}{}{}", INDENT, BULLET, command)?;
                }
            }
            DiffDetail::Counts { first, second } => {
                writeln!(out, "{}original:", INDENT)?;
                for command in first {
                    writeln!(out, "{}{}{}", INDENT, BULLET, command)?;
                }
                writeln!(out, "{}replay:", INDENT)?;
                for command in second {
                    writeln!(out, "{}{}{}", INDENT, BULLET, command)?;
                }
            }
            DiffDetail::Commands {
                index,
                first,
                second,
            } => {
                writeln!(out, "{}command #{}", INDENT, index + 1)?;
                writeln!(out, "{}original:", INDENT)?;
                writeln!(out, "{}{}{}", INDENT, BULLET, first)?;
                writeln!(out, "{}replay:", INDENT)?;
                writeln!(out, "{}{}{}", INDENT, BULLET, second)?;
            }
        }
    }

    write!(
        out,
        "{} difference(s) across {} correlation id(s)",
        analysis.records.len(),
        analysis.compared
    )?;
    if analysis.skipped_first + analysis.skipped_second > 0 {
        write!(
            out,
            "; skipped {} + {} unparsable line(s)",
            analysis.skipped_first, analysis.skipped_second
        )?;
    }
    writeln!(out)
}

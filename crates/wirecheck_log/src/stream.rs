//! Peekable stream of log entries read from lines.

use crate::entry::LogEntry;
use std::io::{self, BufRead};
use wirecheck_core::{CoreError, CoreResult};

/// Entry stream with one entry of lookahead
///
/// Blank lines are skipped. Line numbers are 1-based and refer to the
/// underlying line source.
pub struct EntryStream<I> {
    lines: I,
    peeked: Option<(usize, LogEntry)>,
    line_no: usize,
    consumed: usize,
}

impl<I> EntryStream<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    /// Wrap a line source
    pub const fn new(lines: I) -> Self {
        Self {
            lines,
            peeked: None,
            line_no: 0,
            consumed: 0,
        }
    }

    /// Read the next entry and its line number
    ///
    /// # Errors
    ///
    /// Returns a format error for an unreadable or malformed line
    pub fn next_entry(&mut self) -> CoreResult<Option<(usize, LogEntry)>> {
        let next = match self.peeked.take() {
            Some(entry) => Some(entry),
            None => self.read()?,
        };
        if next.is_some() {
            self.consumed += 1;
        }
        Ok(next)
    }

    /// Look at the next entry without consuming it
    ///
    /// # Errors
    ///
    /// Returns a format error for an unreadable or malformed line
    pub fn peek_entry(&mut self) -> CoreResult<Option<&LogEntry>> {
        if self.peeked.is_none() {
            self.peeked = self.read()?;
        }
        Ok(self.peeked.as_ref().map(|(_, entry)| entry))
    }

    /// Number of entries consumed so far
    #[must_use]
    pub const fn consumed(&self) -> usize {
        self.consumed
    }

    /// Whether the stream has no more entries
    ///
    /// # Errors
    ///
    /// Returns a format error if looking ahead hits a malformed line
    pub fn is_end(&mut self) -> CoreResult<bool> {
        Ok(self.peek_entry()?.is_none())
    }

    fn read(&mut self) -> CoreResult<Option<(usize, LogEntry)>> {
        for line in self.lines.by_ref() {
            self.line_no += 1;
            let line_no = self.line_no;
            let line = line
                .map_err(|e| CoreError::format(format!("line {}: read failure: {}", line_no, e)))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = LogEntry::parse(&line).map_err(|e| match e {
                CoreError::Format { reason } => {
                    CoreError::format(format!("line {}: {}", line_no, reason))
                }
                other => other,
            })?;
            return Ok(Some((line_no, entry)));
        }
        Ok(None)
    }
}

impl EntryStream<std::vec::IntoIter<io::Result<String>>> {
    /// Stream over in-memory lines
    pub fn from_lines<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        let lines: Vec<io::Result<String>> = lines.into_iter().map(|l| Ok(l.into())).collect();
        Self::new(lines.into_iter())
    }
}

impl<R: BufRead> EntryStream<io::Lines<R>> {
    /// Stream over a reader
    pub fn from_reader(reader: R) -> Self {
        Self::new(reader.lines())
    }
}

impl<I> Iterator for EntryStream<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    type Item = CoreResult<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose().map(|r| r.map(|(_, entry)| entry))
    }
}

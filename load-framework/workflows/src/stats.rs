//! Per-kind success/error counters and their in-place terminal rendering.

use std::{
    fmt,
    io::{self, Write},
    sync::atomic::{AtomicU64, Ordering},
};

use crossterm::{
    cursor::MoveToPreviousLine,
    queue,
    style::Print,
    terminal::{Clear, ClearType},
};

use crate::mix::OperationKind;

const HEADER_KIND: &str = "operation";

/// How a single operation settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

#[derive(Debug, Default)]
struct Counters {
    success: AtomicU64,
    error: AtomicU64,
}

/// Lock-free counters, one success/error pair per operation kind.
#[derive(Debug, Default)]
pub struct StatsTable {
    counters: [Counters; OperationKind::COUNT],
}

impl StatsTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: OperationKind, outcome: Outcome) {
        let counters = &self.counters[kind.index()];
        let counter = match outcome {
            Outcome::Success => &counters.success,
            Outcome::Error => &counters.error,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `result` and returns the outcome it mapped to.
    pub fn record_result<T, E>(&self, kind: OperationKind, result: &Result<T, E>) -> Outcome {
        let outcome = if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Error
        };
        self.record(kind, outcome);
        outcome
    }

    /// Reads every counter. Rows come back in [`OperationKind::ALL`] order.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let rows = OperationKind::ALL.map(|kind| {
            let counters = &self.counters[kind.index()];
            KindStats {
                kind,
                success: counters.success.load(Ordering::Relaxed),
                error: counters.error.load(Ordering::Relaxed),
            }
        });
        StatsSnapshot { rows }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KindStats {
    pub kind: OperationKind,
    pub success: u64,
    pub error: u64,
}

impl KindStats {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.success + self.error
    }
}

/// Point-in-time copy of a [`StatsTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatsSnapshot {
    rows: [KindStats; OperationKind::COUNT],
}

impl StatsSnapshot {
    #[must_use]
    pub fn rows(&self) -> &[KindStats] {
        &self.rows
    }

    #[must_use]
    pub const fn get(&self, kind: OperationKind) -> KindStats {
        self.rows[kind.index()]
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.rows.iter().map(|row| row.success).sum()
    }

    #[must_use]
    pub fn errors(&self) -> u64 {
        self.rows.iter().map(|row| row.error).sum()
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.successes() + self.errors()
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in format_table(self) {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Header plus one line per kind, kind names right-aligned to the longest.
#[must_use]
pub fn format_table(snapshot: &StatsSnapshot) -> Vec<String> {
    let width = OperationKind::ALL
        .iter()
        .map(|kind| kind.label().len())
        .chain([HEADER_KIND.len()])
        .max()
        .unwrap_or_default();

    let mut lines = Vec::with_capacity(OperationKind::COUNT + 1);
    lines.push(format!(
        "{HEADER_KIND:>width$}  {:>10}  {:>10}",
        "success", "error"
    ));
    for row in snapshot.rows() {
        lines.push(format!(
            "{:>width$}  {:>10}  {:>10}",
            row.kind.label(),
            row.success,
            row.error
        ));
    }
    lines
}

/// Repaints the stats block over its previous paint.
#[derive(Debug)]
pub struct StatsRenderer<W: Write> {
    out: W,
    painted_lines: u16,
}

impl<W: Write> StatsRenderer<W> {
    pub const fn new(out: W) -> Self {
        Self {
            out,
            painted_lines: 0,
        }
    }

    pub fn render(&mut self, snapshot: &StatsSnapshot) -> io::Result<()> {
        if self.painted_lines > 0 {
            queue!(self.out, MoveToPreviousLine(self.painted_lines))?;
        }

        let lines = format_table(snapshot);
        for line in &lines {
            queue!(
                self.out,
                Clear(ClearType::CurrentLine),
                Print(line),
                Print("\n")
            )?;
        }
        self.out.flush()?;

        self.painted_lines = u16::try_from(lines.len()).unwrap_or(u16::MAX);
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/*!
 * Machine-readable progress records.
 *
 * One line per update on the configured sink (stdout by default):
 * `GLOBAL <done>/<total> (<pct>%) | <chapter> | <extra>`
 */

use std::io::Write;

/// Format one progress line without the trailing newline
pub fn format_global(done: usize, total: usize, chapter: &str, extra: &str) -> String {
    let pct = if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    };
    format!("GLOBAL {}/{} ({:.1}%) | {} | {}", done, total, pct, chapter, extra)
}

/// Writes progress records to a sink
pub struct ProgressReporter {
    sink: Box<dyn Write + Send>,
    total: usize,
    done: usize,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("total", &self.total)
            .field("done", &self.done)
            .finish()
    }
}

impl ProgressReporter {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self { sink, total: 0, done: 0 }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Reporter that discards everything
    pub fn silent() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    pub fn set_total(&mut self, total: usize) {
        self.total = total;
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn done(&self) -> usize {
        self.done
    }

    /// Count `n` more segments as done and emit a record
    pub fn advance(&mut self, n: usize, chapter: &str, extra: &str) {
        self.done += n;
        self.emit(chapter, extra);
    }

    /// Emit a record without changing the counter
    pub fn emit(&mut self, chapter: &str, extra: &str) {
        let line = format_global(self.done, self.total, chapter, extra);
        // Progress output is best effort; a closed pipe must not stop a run
        let _ = writeln!(self.sink, "{}", line);
        let _ = self.sink.flush();
    }
}

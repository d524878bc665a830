use std::collections::VecDeque;

/// Bounded FIFO of recent console lines, oldest first.
#[derive(Debug)]
pub struct OutputHistory {
    max_lines: usize,
    lines: VecDeque<String>,
}

impl Default for OutputHistory {
    fn default() -> Self {
        Self::with_capacity(crate::support::history_max_lines())
    }
}

impl OutputHistory {
    pub fn with_capacity(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            max_lines,
            lines: VecDeque::with_capacity(max_lines.min(4096)),
        }
    }

    pub fn push(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    /// Last `limit` lines in arrival order.
    pub fn recent(&self, limit: usize) -> Vec<String> {
        let start = self.lines.len().saturating_sub(limit);
        self.lines.iter().skip(start).cloned().collect()
    }

    /// Replay form: every line terminated by `\n`.
    pub fn joined(&self, limit: usize) -> String {
        let start = self.lines.len().saturating_sub(limit);
        let mut out = String::new();
        for line in self.lines.iter().skip(start) {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}

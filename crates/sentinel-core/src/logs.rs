use std::collections::{HashMap, VecDeque};

/// Per-task streamed log lines, each capped as a ring buffer.
#[derive(Clone, Debug)]
pub struct LogBuffers {
    capacity: usize,
    buffers: HashMap<String, VecDeque<String>>,
}

impl LogBuffers {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: HashMap::new(),
        }
    }

    /// Replaces whatever was buffered for `key`.
    pub fn seed<I, S>(&mut self, key: &str, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let buffer = self.buffers.entry(key.to_string()).or_default();
        buffer.clear();
        for line in lines {
            push_capped(buffer, line.into(), self.capacity);
        }
    }

    pub fn append(&mut self, key: &str, line: impl Into<String>) {
        let buffer = self.buffers.entry(key.to_string()).or_default();
        push_capped(buffer, line.into(), self.capacity);
    }

    pub fn lines(&self, key: &str) -> Vec<String> {
        self.buffers
            .get(key)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, key: &str) -> usize {
        self.buffers.get(key).map(VecDeque::len).unwrap_or(0)
    }

    /// Forgets every task's lines.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

impl Default for LogBuffers {
    fn default() -> Self {
        Self::new(1_000)
    }
}

fn push_capped(buffer: &mut VecDeque<String>, line: String, capacity: usize) {
    while buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(line);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_only_touches_its_own_task() {
        let mut logs = LogBuffers::new(10);
        logs.append("t1", "compiling");
        logs.append("t2", "queued");
        logs.append("t1", "compiling");

        assert_eq!(logs.lines("t1"), vec!["compiling", "compiling"]);
        assert_eq!(logs.lines("t2"), vec!["queued"]);
        assert!(logs.lines("t3").is_empty());
    }

    #[test]
    fn oldest_lines_fall_off_at_capacity() {
        let mut logs = LogBuffers::new(3);
        for idx in 0..5 {
            logs.append("t1", format!("line {idx}"));
        }
        assert_eq!(logs.lines("t1"), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn seeding_replaces_previous_lines() {
        let mut logs = LogBuffers::new(5);
        logs.append("t1", "stale");
        logs.seed("t1", ["boot", "tunnel"]);
        assert_eq!(logs.lines("t1"), vec!["boot", "tunnel"]);
        assert_eq!(logs.len("t1"), 2);
    }

    #[test]
    fn clear_forgets_every_task() {
        let mut logs = LogBuffers::new(5);
        logs.append("t1", "compiling");
        logs.append("t2", "queued");
        logs.clear();
        assert_eq!(logs.len("t1"), 0);
        assert!(logs.lines("t2").is_empty());
    }
}

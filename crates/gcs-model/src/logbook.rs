use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use time::macros::format_description;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Level {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub level: Level,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let ts = self.at.format(&fmt).map_err(|_| fmt::Error)?;
        match self.level {
            Level::Info => write!(f, "[{}] {}", ts, self.text),
            Level::Warn => write!(f, "[{}] WARN {}", ts, self.text),
            Level::Error => write!(f, "[{}] ERR {}", ts, self.text),
        }
    }
}

/// Operator-facing log lines, bounded; oldest entries fall off.
#[derive(Debug, Clone)]
pub struct LogBook {
    max: usize,
    buf: VecDeque<LogEntry>,
}

impl LogBook {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self { max, buf: VecDeque::with_capacity(max) }
    }

    pub fn push(&mut self, level: Level, text: impl Into<String>) {
        if self.buf.len() == self.max {
            self.buf.pop_front();
        }
        self.buf.push_back(LogEntry {
            at: OffsetDateTime::now_utc(),
            level,
            text: text.into(),
        });
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.push(Level::Info, text)
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.push(Level::Warn, text)
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.push(Level::Error, text)
    }

    /// Newest first.
    pub fn recent(&self, n: usize) -> Vec<&LogEntry> {
        self.buf.iter().rev().take(n).collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for LogBook {
    fn default() -> Self {
        Self::new(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_and_newest_first() {
        let mut b = LogBook::new(2);
        b.info("one");
        b.warn("two");
        b.error("three");
        assert_eq!(b.len(), 2);
        let r = b.recent(5);
        assert_eq!(r[0].text, "three");
        assert_eq!(r[1].text, "two");
        assert!(r[0].to_string().contains("ERR three"));
    }
}

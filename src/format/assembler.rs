use super::{Payload, PhysicalLine, classify_payload, parse_line};

/// True when `line` opens a new record: a numbered line carrying a marker.
pub fn is_record_start(line: &str) -> bool {
    match parse_line(line) {
        PhysicalLine::Numbered { payload, .. } => {
            matches!(classify_payload(payload), Payload::Marker { .. })
        }
        PhysicalLine::Continuation { .. } => false,
    }
}

/// Groups physical lines into record sections as they stream past.
///
/// Feed every line to [`push`](Self::push); a completed section is returned
/// when the next record starts. Call [`finish`](Self::finish) at EOF for
/// the last one. Lines before the first record are counted as orphans and
/// dropped.
#[derive(Debug, Default)]
pub struct SectionAssembler {
    current: Vec<String>,
    started: bool,
    orphans: u64,
}

impl SectionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: &str) -> Option<Vec<String>> {
        if is_record_start(line) {
            let done = self.started.then(|| std::mem::take(&mut self.current));
            self.started = true;
            self.current.push(line.to_string());
            return done;
        }

        if !self.started {
            self.orphans += 1;
            return None;
        }

        self.current.push(line.to_string());
        None
    }

    pub fn finish(self) -> Option<Vec<String>> {
        self.started.then_some(self.current)
    }

    /// Lines seen before the first record start.
    pub fn orphan_lines(&self) -> u64 {
        self.orphans
    }

    /// Physical lines buffered for the open section.
    pub fn pending_lines(&self) -> usize {
        self.current.len()
    }
}

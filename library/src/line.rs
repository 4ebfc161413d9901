use arrayvec::ArrayString;

use crate::MAX_CMD_SIZE;

pub type CommandLine = ArrayString<MAX_CMD_SIZE>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Serial,
    File,
}

#[derive(Debug, PartialEq)]
pub enum Fed {
    Pending,
    Line(CommandLine),
    /// A file `#` ended the line; the caller stops buffering until the queue drains.
    Halt(Option<CommandLine>),
}

/// Byte at a time line assembler shared by the serial and file sources.
pub struct LineReader {
    kind: SourceKind,
    buffer: CommandLine,
    comment: bool,
    escape: bool,
}

impl LineReader {
    pub fn new(kind: SourceKind) -> Self {
        Self { kind, buffer: CommandLine::new(), comment: false, escape: false }
    }

    pub fn feed(&mut self, byte: u8) -> Fed {
        if !byte.is_ascii() {
            return Fed::Pending;
        }
        let c = byte as char;
        if self.escape {
            self.escape = false;
            if !self.comment {
                self.push(c);
            }
            return Fed::Pending;
        }
        let file = self.kind == SourceKind::File;
        if c == '\n' || c == '\r' || (file && !self.comment && (c == '#' || c == ':')) {
            let line = self.finish();
            if file && c == '#' {
                return Fed::Halt(line);
            }
            return line.map_or(Fed::Pending, Fed::Line);
        }
        if self.buffer.len() >= MAX_CMD_SIZE - 1 {
            return Fed::Pending;
        }
        match c {
            '\\' if !file => self.escape = true,
            ';' => self.comment = true,
            _ if !self.comment => self.push(c),
            _ => {}
        }
        Fed::Pending
    }

    /// Ends the current line, e.g. at end of file. Blank lines yield nothing.
    pub fn finish(&mut self) -> Option<CommandLine> {
        self.comment = false;
        self.escape = false;
        let line = core::mem::take(&mut self.buffer);
        let trimmed = line.trim_start_matches(' ');
        if trimmed.is_empty() {
            None
        }
        else {
            CommandLine::from(trimmed).ok()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn push(&mut self, c: char) {
        let _ = self.buffer.try_push(c);
    }
}

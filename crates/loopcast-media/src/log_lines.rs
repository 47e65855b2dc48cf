//! Splitting engine stderr into log lines.

use std::io::{BufRead, ErrorKind};

/// Iterator over the log lines of a reader.
///
/// ffmpeg terminates progress lines with `\r` rather than `\n`, so both are
/// treated as line breaks. Blank lines are skipped and invalid UTF-8 is
/// replaced.
pub struct LogLines<R> {
    reader: R,
    pending: Vec<u8>,
    done: bool,
}

impl<R: BufRead> LogLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            done: false,
        }
    }

    fn take_pending(&mut self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        (!line.is_empty()).then_some(line)
    }
}

impl<R: BufRead> Iterator for LogLines<R> {
    type Item = std::io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let (consumed, found_break) = {
                let buf = match self.reader.fill_buf() {
                    Ok(buf) => buf,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                };

                if buf.is_empty() {
                    self.done = true;
                    break;
                }

                match buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
                    Some(pos) => {
                        self.pending.extend_from_slice(&buf[..pos]);
                        (pos + 1, true)
                    }
                    None => {
                        self.pending.extend_from_slice(buf);
                        (buf.len(), false)
                    }
                }
            };
            self.reader.consume(consumed);

            if found_break {
                if let Some(line) = self.take_pending() {
                    return Some(Ok(line));
                }
            }
        }

        self.take_pending().map(Ok)
    }
}

use crate::common::error::{PanelError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Message-level view of the serial connection: newline-terminated UTF-8
/// text lines. Byte framing below one line is the transport's problem.
pub trait SerialLink {
    /// Blocks until a full line arrives. EOF is a link error.
    fn read_line(&mut self) -> Result<String>;

    fn write_line(&mut self, message: &str) -> Result<()>;
}

/// `SerialLink` over any buffered reader / writer pair.
pub struct LineLink<R: BufRead, W: Write> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> LineLink<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl LineLink<BufReader<File>, File> {
    /// Opens a character device (e.g. `/dev/ttyUSB0`) for line traffic.
    /// Port parameters are expected to be configured by the transport layer.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| PanelError::Link(format!("Failed to open {}: {}", path.display(), e)))?;
        let writer = file
            .try_clone()
            .map_err(|e| PanelError::Link(format!("Failed to clone handle: {}", e)))?;
        Ok(Self::new(BufReader::new(file), writer))
    }
}

impl<R: BufRead, W: Write> SerialLink for LineLink<R, W> {
    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(|e| PanelError::Link(format!("Read failed: {}", e)))?;
        if read == 0 {
            return Err(PanelError::Link("Link closed".into()));
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        tracing::debug!("<- {}", line);
        Ok(line)
    }

    fn write_line(&mut self, message: &str) -> Result<()> {
        tracing::debug!("-> {}", message);
        self.writer
            .write_all(format!("{}\n", message).as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| PanelError::Link(format!("Write failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_lines_and_strips_terminators() {
        let input = Cursor::new(b"AlarmActive\r\n0101010101\nlast".to_vec());
        let mut link = LineLink::new(input, Vec::new());

        assert_eq!(link.read_line().unwrap(), "AlarmActive");
        assert_eq!(link.read_line().unwrap(), "0101010101");
        assert_eq!(link.read_line().unwrap(), "last");
        assert!(matches!(link.read_line(), Err(PanelError::Link(_))));
    }

    #[test]
    fn writes_newline_terminated_lines() {
        let mut link = LineLink::new(Cursor::new(Vec::new()), Vec::new());
        link.write_line("SystemStart").unwrap();
        link.write_line("Abort").unwrap();
        assert_eq!(link.writer, b"SystemStart\nAbort\n");
    }
}

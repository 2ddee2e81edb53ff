//! Operator input: one newline-delimited line per read.
//!
//! Reads happen on a dedicated OS thread, as blocking stdin reads cannot be
//! cancelled and would otherwise hold up runtime shutdown. The thread starts
//! on the first read and hands each outcome over a channel of capacity one,
//! so it never reads more than a line ahead of the relay.

use std::io::{self, BufRead, Write};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Result of one read from the local stream.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete line with the trailing `\n` / `\r\n` removed.
    Line(String),
    /// Nothing usable this time (interrupted read, non-UTF-8 bytes); read again.
    Empty,
    /// The stream reached end of input.
    Closed,
    /// The stream failed and will produce nothing more.
    Fatal(io::Error),
}

pub struct LineReader {
    rx: mpsc::Receiver<ReadOutcome>,
    start: Option<Box<dyn FnOnce() + Send>>,
    output: Box<dyn Write + Send>,
    prompt: String,
}

impl LineReader {
    /// Read from the process stdin, prompting on stdout.
    pub fn stdio(prompt: impl Into<String>) -> Self {
        Self::from_reader(io::BufReader::new(io::stdin()), io::stdout(), prompt)
    }

    pub fn from_reader<R, W>(reader: R, output: W, prompt: impl Into<String>) -> Self
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let start: Box<dyn FnOnce() + Send> = Box::new(move || {
            std::thread::spawn(move || read_lines(reader, tx));
        });
        Self {
            rx,
            start: Some(start),
            output: Box::new(output),
            prompt: prompt.into(),
        }
    }

    /// Write the prompt marker. Failures only lose the marker.
    pub fn prompt(&mut self) {
        if self.prompt.is_empty() {
            return;
        }
        let result = self
            .output
            .write_all(self.prompt.as_bytes())
            .and_then(|_| self.output.flush());
        if let Err(e) = result {
            debug!("failed to write prompt: {}", e);
        }
    }

    /// Wait for the next line.
    pub async fn next_line(&mut self) -> ReadOutcome {
        if let Some(start) = self.start.take() {
            start();
        }
        self.rx.recv().await.unwrap_or(ReadOutcome::Closed)
    }
}

fn read_lines<R: BufRead>(mut reader: R, tx: mpsc::Sender<ReadOutcome>) {
    loop {
        let outcome = read_one(&mut reader);
        let last = matches!(outcome, ReadOutcome::Closed | ReadOutcome::Fatal(_));
        if tx.blocking_send(outcome).is_err() || last {
            break;
        }
    }
}

fn read_one<R: BufRead>(reader: &mut R) -> ReadOutcome {
    let mut buf = Vec::new();
    match reader.read_until(b'\n', &mut buf) {
        Ok(0) => ReadOutcome::Closed,
        Ok(_) => {
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            match String::from_utf8(buf) {
                Ok(line) => ReadOutcome::Line(line),
                Err(e) => {
                    warn!("dropping line that is not valid UTF-8: {}", e);
                    ReadOutcome::Empty
                }
            }
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => ReadOutcome::Empty,
        Err(e) => ReadOutcome::Fatal(e),
    }
}

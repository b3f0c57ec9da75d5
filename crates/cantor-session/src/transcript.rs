//! Protocol transcripts.
//!
//! A transcript records everything written to and read from the interpreter
//! as JSON lines: a header object followed by `[time, stream, data]` arrays,
//! where `stream` is `"i"` for input, `"o"` for standard output and `"e"`
//! for standard error. Time is in seconds since the transcript started.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use cantor_core::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stream {
    /// Written to the interpreter
    #[serde(rename = "i")]
    Input,
    /// Read from standard output
    #[serde(rename = "o")]
    Output,
    /// Read from standard error
    #[serde(rename = "e")]
    Error,
}

/// First line of a transcript file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptHeader {
    /// Format version
    pub version: u8,
    /// Backend profile name
    pub backend: String,
    /// Interpreter executable
    pub program: String,
    /// Unix timestamp of the start of the transcript
    pub timestamp: i64,
}

/// One recorded chunk, serialized as `[time, stream, data]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry(pub f64, pub Stream, pub String);

/// In-memory transcript of one session.
#[derive(Debug)]
pub struct Transcript {
    backend: String,
    program: String,
    started_at: DateTime<Utc>,
    start: Instant,
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    /// Start an empty transcript.
    pub fn new(backend: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            program: program.into(),
            started_at: Utc::now(),
            start: Instant::now(),
            entries: Vec::new(),
        }
    }

    /// Record bytes on `stream`.
    pub fn record(&mut self, stream: Stream, data: &[u8]) {
        self.entries.push(TranscriptEntry(
            self.start.elapsed().as_secs_f64(),
            stream,
            String::from_utf8_lossy(data).into_owned(),
        ));
    }

    /// Recorded entries.
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Header describing this transcript.
    pub fn header(&self) -> TranscriptHeader {
        TranscriptHeader {
            version: 1,
            backend: self.backend.clone(),
            program: self.program.clone(),
            timestamp: self.started_at.timestamp(),
        }
    }

    /// Write the transcript as JSON lines.
    pub fn save_to_writer<W: Write>(&self, writer: &mut W) -> Result<()> {
        serde_json::to_writer(&mut *writer, &self.header())?;
        writeln!(writer)?;
        for entry in &self.entries {
            serde_json::to_writer(&mut *writer, entry)?;
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the transcript to `path`.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = BufWriter::new(File::create(path)?);
        self.save_to_writer(&mut file)
    }
}

//! Script (`.scp`) index files: one `<id> <location>` entry per line.
//!
//! A location is resolved into a [`ByteSource`] positioned at the start of a
//! binary record:
//!
//! - `cmd args... |`: run the command and buffer its standard output
//! - `path:offset`: open the file and seek to the byte offset
//! - `path`: open the file from the start

use crate::archive::{ArkRecord, collect_map};
use crate::config::KeyPolicy;
use crate::error::{Result, ScriptError};
use crate::matrix::Matrix;
use indexmap::IndexMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Where a script entry's bytes come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptLocation {
    /// Whole file, read from offset 0
    File(PathBuf),
    /// File positioned at a byte offset
    FileOffset { path: PathBuf, offset: u64 },
    /// Standard output of a command
    Command { program: String, args: Vec<String> },
}

impl ScriptLocation {
    /// Interpret the value field of a script line.
    pub fn parse(value: &str) -> Self {
        if let Some(command) = value.strip_suffix('|') {
            let mut words = command.split_whitespace().map(str::to_string);
            let program = words.next().unwrap_or_default();
            return ScriptLocation::Command {
                program,
                args: words.collect(),
            };
        }

        if let Some((path, offset)) = value.rsplit_once(':')
            && !offset.is_empty()
            && offset.bytes().all(|b| b.is_ascii_digit())
            && let Ok(offset) = offset.parse()
        {
            return ScriptLocation::FileOffset {
                path: PathBuf::from(path),
                offset,
            };
        }

        ScriptLocation::File(PathBuf::from(value))
    }

    /// Acquire the bytes behind this location.
    pub fn open<C: CommandRunner + ?Sized>(&self, runner: &C) -> Result<ByteSource> {
        match self {
            ScriptLocation::File(path) => Ok(ByteSource::File(BufReader::new(File::open(path)?))),
            ScriptLocation::FileOffset { path, offset } => {
                let mut file = File::open(path)?;
                file.seek(SeekFrom::Start(*offset))?;
                Ok(ByteSource::File(BufReader::new(file)))
            }
            ScriptLocation::Command { program, args } => {
                if program.is_empty() {
                    return Err(ScriptError::EmptyCommand.into());
                }
                let output = runner.run(program, args)?;
                Ok(ByteSource::Buffer(Cursor::new(output)))
            }
        }
    }
}

/// One parsed line of a script file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptEntry {
    pub id: String,
    pub location: ScriptLocation,
}

impl ScriptEntry {
    /// Parse a line, returning `None` for malformed lines.
    ///
    /// A line is malformed unless it splits into an id and a non-blank value
    /// at its first run of whitespace.
    pub fn parse(line: &str) -> Option<Self> {
        let (id, value) = line.trim().split_once(char::is_whitespace)?;
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        Some(Self {
            id: id.to_string(),
            location: ScriptLocation::parse(value),
        })
    }
}

/// Capability to run an external command and capture its standard output.
pub trait CommandRunner {
    /// Run `program` to completion and return everything it wrote to stdout.
    fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>>;
}

impl<C: CommandRunner + ?Sized> CommandRunner for &C {
    fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>> {
        (**self).run(program, args)
    }
}

/// Runs commands as local child processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>> {
        tracing::debug!(program, ?args, "running script command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            return Err(ScriptError::CommandFailed {
                command: std::iter::once(program)
                    .chain(args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" "),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(output.stdout)
    }
}

/// Readable bytes behind a script entry.
///
/// Files are closed and buffered command output is freed when the source is
/// dropped.
#[derive(Debug)]
pub enum ByteSource {
    File(BufReader<File>),
    Buffer(Cursor<Vec<u8>>),
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ByteSource::File(r) => r.read(buf),
            ByteSource::Buffer(r) => r.read(buf),
        }
    }
}

impl BufRead for ByteSource {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            ByteSource::File(r) => r.fill_buf(),
            ByteSource::Buffer(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            ByteSource::File(r) => r.consume(amt),
            ByteSource::Buffer(r) => r.consume(amt),
        }
    }
}

/// Lazy iterator over the well-formed entries of a script stream.
///
/// Malformed lines are skipped with a warning.
pub struct ScriptEntries<R> {
    lines: io::Lines<R>,
    line_number: usize,
}

impl<R: BufRead> ScriptEntries<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }
}

impl<R: BufRead> Iterator for ScriptEntries<R> {
    type Item = Result<ScriptEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_number += 1;

            match ScriptEntry::parse(&line) {
                Some(entry) => return Some(Ok(entry)),
                None => tracing::warn!(line = self.line_number, "skipping malformed script line"),
            }
        }
    }
}

/// Lazy iterator resolving script entries into `(id, byte source)` pairs.
///
/// A source is only acquired when its entry is pulled, and released when the
/// caller drops it.
pub struct ScpReader<R, C = ProcessRunner> {
    entries: ScriptEntries<R>,
    runner: C,
}

impl<R: BufRead> ScpReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_runner(reader, ProcessRunner)
    }
}

impl<R: BufRead, C: CommandRunner> ScpReader<R, C> {
    /// Resolve command entries through a custom runner.
    pub fn with_runner(reader: R, runner: C) -> Self {
        Self {
            entries: ScriptEntries::new(reader),
            runner,
        }
    }

    /// Decode one record from each resolved source.
    pub fn records<T: ArkRecord>(self) -> impl Iterator<Item = Result<(String, T)>> {
        self.map(|item| {
            let (id, mut source) = item?;
            let value = T::decode(&mut source)?;
            Ok((id, value))
        })
    }

    /// Decode one matrix from each resolved source.
    pub fn matrices(self) -> impl Iterator<Item = Result<(String, Matrix)>> {
        self.records()
    }
}

impl<R: BufRead, C: CommandRunner> Iterator for ScpReader<R, C> {
    type Item = Result<(String, ByteSource)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.entries.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };

        tracing::debug!(id = entry.id.as_str(), location = ?entry.location, "resolving script entry");
        Some(
            entry
                .location
                .open(&self.runner)
                .map(|source| (entry.id, source)),
        )
    }
}

/// Resolve every entry of a script stream and decode its record into a map.
pub fn read_scp_map<T: ArkRecord, R: BufRead>(
    reader: R,
    policy: KeyPolicy,
) -> Result<IndexMap<String, T>> {
    collect_map(ScpReader::new(reader).records(), policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingRunner {
        calls: RefCell<Vec<(String, Vec<String>)>>,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>> {
            self.calls
                .borrow_mut()
                .push((program.to_string(), args.to_vec()));
            Ok(format!("{program} output").into_bytes())
        }
    }

    #[test]
    fn parses_offset_entry() {
        let entry = ScriptEntry::parse("utt1 /tmp/a.ark:128").unwrap();

        assert_eq!(entry.id, "utt1");
        assert_eq!(
            entry.location,
            ScriptLocation::FileOffset {
                path: PathBuf::from("/tmp/a.ark"),
                offset: 128
            }
        );
    }

    #[test]
    fn parses_command_entry() {
        let entry = ScriptEntry::parse("utt2 cat foo.wav |").unwrap();

        assert_eq!(entry.id, "utt2");
        assert_eq!(
            entry.location,
            ScriptLocation::Command {
                program: "cat".to_string(),
                args: vec!["foo.wav".to_string()]
            }
        );
    }

    #[test]
    fn parses_plain_path_entry() {
        let entry = ScriptEntry::parse("utt3\tdata/feats.ark\n").unwrap();

        assert_eq!(entry.location, ScriptLocation::File(PathBuf::from("data/feats.ark")));
    }

    #[test]
    fn non_numeric_suffix_is_part_of_path() {
        for value in ["C:\\feats.ark", "a.ark:", "a.ark:12x"] {
            assert_eq!(
                ScriptLocation::parse(value),
                ScriptLocation::File(PathBuf::from(value))
            );
        }
    }

    #[test]
    fn skips_malformed_lines() {
        assert!(ScriptEntry::parse("badline").is_none());
        assert!(ScriptEntry::parse("").is_none());
        assert!(ScriptEntry::parse("utt4    ").is_none());
    }

    #[test]
    fn entries_skip_malformed_lines() {
        let text = "badline\nutt1 a.ark:0\n\nutt2 b.ark\n";

        let ids: Vec<String> = ScriptEntries::new(text.as_bytes())
            .map(|e| e.unwrap().id)
            .collect();

        assert_eq!(ids, ["utt1", "utt2"]);
    }

    #[test]
    fn command_output_becomes_byte_source() {
        let runner = RecordingRunner::default();
        let reader = ScpReader::with_runner("utt2 cat foo.wav |\n".as_bytes(), &runner);

        let sources: Vec<_> = reader.collect::<Result<_>>().unwrap();
        let (id, mut source) = sources.into_iter().next().unwrap();

        let mut content = String::new();
        source.read_to_string(&mut content).unwrap();
        assert_eq!(id, "utt2");
        assert_eq!(content, "cat output");
        assert_eq!(
            runner.calls.borrow().as_slice(),
            [("cat".to_string(), vec!["foo.wav".to_string()])]
        );
    }

    #[test]
    fn sources_are_resolved_lazily() {
        let runner = RecordingRunner::default();
        let text = "a first |\nb second |\n";
        let mut reader = ScpReader::with_runner(text.as_bytes(), &runner);

        let _ = reader.next();
        assert_eq!(runner.calls.borrow().len(), 1);
    }

    #[test]
    fn empty_command_is_an_error() {
        let runner = RecordingRunner::default();
        let location = ScriptLocation::parse(" |");

        let err = location.open(&runner).unwrap_err();
        assert!(matches!(err, Error::Script(ScriptError::EmptyCommand)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let location = ScriptLocation::File(PathBuf::from("/nonexistent/kaldi-io/feats.ark"));

        let err = location.open(&ProcessRunner).unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_reports_failed_commands() {
        let err = ProcessRunner.run("false", &[]).unwrap_err();

        assert!(matches!(err, Error::Script(ScriptError::CommandFailed { .. })));
    }
}

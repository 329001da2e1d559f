//! Flushing windows to CSV logs.
//!
//! Each connection epoch writes to its own [`LogDestination`], a UTF-8,
//! comma-delimited, append-only file named after its creation time. The
//! [`WindowFlusher`] writes every filled slot of a window as one row and then
//! resets the window for reuse.
//!
//! Rows of one flush go to the file as a single batch. If a batch cannot be
//! written in full, the file is cut back to the end of the previous batch, so
//! the window can be flushed again without duplicating rows.

use crate::core::window::{SampleWindow, WindowSlot};
use crate::error::{RecorderError, RecorderResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Upper bound on name suffixes tried when a log name is already taken.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Row layout of a log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Header `timestamp`, rows `smoothed,ch0,...,ch7`.
    ///
    /// The header does not describe the rows; it is kept so existing tooling
    /// keeps parsing the files.
    #[default]
    Legacy,
    /// Header and rows both `timestamp,smoothed,ch0,...,ch7`.
    Timestamped,
}

impl LogFormat {
    /// First line written to a new log.
    pub fn header(&self) -> &'static str {
        match self {
            LogFormat::Legacy => "timestamp",
            LogFormat::Timestamped => "timestamp,smoothed,ch0,ch1,ch2,ch3,ch4,ch5,ch6,ch7",
        }
    }

    /// Append one row, newline included, to `out`.
    pub fn write_record(&self, slot: &WindowSlot, out: &mut String) {
        if *self == LogFormat::Timestamped {
            let _ = write!(out, "{},", slot.timestamp);
        }
        let _ = write!(out, "{}", slot.smoothed);
        for value in slot.channels {
            let _ = write!(out, ",{value}");
        }
        out.push('\n');
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "legacy" => Ok(LogFormat::Legacy),
            "timestamped" => Ok(LogFormat::Timestamped),
            other => Err(format!(
                "unknown log format '{other}' (expected legacy or timestamped)"
            )),
        }
    }
}

/// Byte storage behind a [`LogDestination`].
///
/// Writes only append. `truncate` cuts the storage back to `len` bytes and
/// leaves the write position at the new end.
pub trait LogSink: Write + Send {
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Make everything written so far durable.
    fn sync(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl LogSink for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// An open CSV log for one connection epoch.
pub struct LogDestination {
    path: PathBuf,
    created_at: DateTime<Utc>,
    format: LogFormat,
    sink: Box<dyn LogSink>,
    /// Bytes of complete batches in the sink
    committed: u64,
    records_written: u64,
}

impl fmt::Debug for LogDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogDestination")
            .field("path", &self.path)
            .field("created_at", &self.created_at)
            .field("format", &self.format)
            .field("committed", &self.committed)
            .field("records_written", &self.records_written)
            .finish_non_exhaustive()
    }
}

impl LogDestination {
    /// Create a new log in `dir` named after the current time.
    pub fn create(dir: &Path, format: LogFormat) -> RecorderResult<Self> {
        Self::create_at(dir, format, Utc::now())
    }

    /// Create a new log in `dir` named after `created_at`.
    ///
    /// The file is `emg-<unix millis>.csv`; if that name exists, a numeric
    /// suffix is added. An existing file is never reopened.
    pub fn create_at(
        dir: &Path,
        format: LogFormat,
        created_at: DateTime<Utc>,
    ) -> RecorderResult<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| RecorderError::io("failed to create log directory", dir, e))?;

        let stem = format!("emg-{}", created_at.timestamp_millis());
        let (path, file) = open_unique(dir, &stem)?;
        let destination = Self::from_sink(path, format, created_at, Box::new(file))?;

        debug!(path = %destination.path.display(), "Opened log destination");
        Ok(destination)
    }

    /// Start a log on an empty, already opened sink and write its header.
    ///
    /// `path` only names the log in errors and reports.
    pub fn from_sink(
        path: impl Into<PathBuf>,
        format: LogFormat,
        created_at: DateTime<Utc>,
        sink: Box<dyn LogSink>,
    ) -> RecorderResult<Self> {
        let mut destination = Self {
            path: path.into(),
            created_at,
            format,
            sink,
            committed: 0,
            records_written: 0,
        };
        let header = format!("{}\n", format.header());
        destination
            .write_batch(&header)
            .map_err(|e| RecorderError::io("failed to write log header", &destination.path, e))?;
        Ok(destination)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Number of data rows written so far.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Append pre-formatted rows as one batch.
    fn append(&mut self, rows: &str, count: usize) -> RecorderResult<()> {
        self.write_batch(rows)
            .map_err(|e| RecorderError::io("failed to append to log", &self.path, e))?;
        self.records_written += count as u64;
        Ok(())
    }

    /// Write all of `text` or, on failure, none of it.
    fn write_batch(&mut self, text: &str) -> io::Result<()> {
        let written = self
            .sink
            .write_all(text.as_bytes())
            .and_then(|_| self.sink.flush());
        match written {
            Ok(()) => {
                self.committed += text.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.sink.truncate(self.committed) {
                    warn!(
                        path = %self.path.display(),
                        committed = self.committed,
                        "Could not cut back partial batch: {rollback}"
                    );
                }
                Err(e)
            }
        }
    }

    /// Flush and sync the log, then release it.
    pub fn close(mut self) -> RecorderResult<()> {
        self.sink
            .flush()
            .and_then(|_| self.sink.sync())
            .map_err(|e| RecorderError::io("failed to close log", &self.path, e))
    }
}

fn open_unique(dir: &Path, stem: &str) -> RecorderResult<(PathBuf, File)> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{stem}.csv")
        } else {
            format!("{stem}-{attempt}.csv")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(RecorderError::io("failed to open log", path, e)),
        }
    }
    Err(RecorderError::io(
        "no free log name",
        dir.join(format!("{stem}.csv")),
        io::Error::from(io::ErrorKind::AlreadyExists),
    ))
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlushReport {
    /// Rows written
    pub records: usize,
    /// Timestamp of the oldest flushed slot
    pub first_timestamp: Option<u64>,
    /// Timestamp of the newest flushed slot
    pub last_timestamp: Option<u64>,
    /// Largest smoothed value in the flushed window
    pub peak_smoothed: f64,
}

/// Writes windows to a log destination and resets them.
#[derive(Default)]
pub struct WindowFlusher {
    has_flushed: bool,
    records_written: u64,
    echo: Option<Box<dyn Write + Send>>,
}

impl WindowFlusher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also print every flushed row to `sink`.
    pub fn with_echo(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.echo = Some(sink);
        self
    }

    /// Whether any record has been written.
    pub fn has_flushed(&self) -> bool {
        self.has_flushed
    }

    /// Total records written across all flushes.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Write every filled slot of `window`, oldest first, then reset it.
    ///
    /// If the write fails the window keeps its contents and the error is
    /// returned, so the same slots can be flushed again.
    pub fn flush(
        &mut self,
        window: &mut SampleWindow,
        destination: &mut LogDestination,
    ) -> RecorderResult<FlushReport> {
        if window.is_empty() {
            window.reset();
            return Ok(FlushReport::default());
        }

        let format = destination.format();
        let mut rows = String::with_capacity(window.len() * 48);
        let mut report = FlushReport::default();
        for slot in window.iter() {
            format.write_record(&slot, &mut rows);
            if report.first_timestamp.is_none() {
                report.first_timestamp = Some(slot.timestamp);
            }
            report.last_timestamp = Some(slot.timestamp);
            report.peak_smoothed = report.peak_smoothed.max(slot.smoothed);
            report.records += 1;
        }

        destination.append(&rows, report.records)?;
        self.echo_window(window);

        self.records_written += report.records as u64;
        self.has_flushed = true;
        window.reset();
        Ok(report)
    }

    fn echo_window(&mut self, window: &SampleWindow) {
        let Some(sink) = self.echo.as_mut() else {
            return;
        };
        let filled = window.len();
        for slot in window.iter() {
            let mut line = format!(
                "[{}/{}] t={} smoothed={:.3} ",
                slot.index, filled, slot.timestamp, slot.smoothed
            );
            for value in slot.channels {
                let _ = write!(line, "[{value}]");
            }
            if writeln!(sink, "{line}").is_err() {
                debug!("Echo sink closed, disabling echo");
                self.echo = None;
                return;
            }
        }
        let _ = sink.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::EmgSample;
    use crate::core::energy::MovingEnergyFilter;
    use std::sync::{Arc, Mutex};

    fn filled_window(count: usize) -> SampleWindow {
        let filter = MovingEnergyFilter::default();
        let mut window = SampleWindow::new(250);
        for i in 0..count {
            let sample = EmgSample::new(1000 + i as u64, [i as i8, -1, 0, 0, 0, 0, 0, 2]);
            let slot = window.append(&sample).unwrap();
            filter.apply(&mut window, slot);
        }
        window
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// In-memory sink that stops accepting bytes once `limit` are stored.
    #[derive(Clone, Default)]
    struct LimitedSink {
        bytes: Arc<Mutex<Vec<u8>>>,
        limit: Arc<Mutex<Option<usize>>>,
    }

    impl LimitedSink {
        fn set_limit(&self, limit: Option<usize>) {
            *self.limit.lock().unwrap() = limit;
        }

        fn contents(&self) -> String {
            String::from_utf8(self.bytes.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for LimitedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut bytes = self.bytes.lock().unwrap();
            let room = match *self.limit.lock().unwrap() {
                Some(limit) => limit.saturating_sub(bytes.len()),
                None => buf.len(),
            };
            if room == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = room.min(buf.len());
            bytes.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogSink for LimitedSink {
        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.bytes.lock().unwrap().truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn test_new_log_has_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let destination = LogDestination::create(dir.path(), LogFormat::Legacy).unwrap();
        let path = destination.path().to_path_buf();
        destination.close().unwrap();

        assert_eq!(read_lines(&path), vec!["timestamp"]);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("emg-") && name.ends_with(".csv"));
    }

    #[test]
    fn test_flush_writes_filled_slots_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut destination = LogDestination::create(dir.path(), LogFormat::Legacy).unwrap();
        let mut window = filled_window(10);
        let mut flusher = WindowFlusher::new();

        let report = flusher.flush(&mut window, &mut destination).unwrap();
        assert_eq!(report.records, 10);
        assert_eq!(report.first_timestamp, Some(1000));
        assert_eq!(report.last_timestamp, Some(1009));
        assert!(window.is_empty());
        assert!(flusher.has_flushed());
        assert_eq!(destination.records_written(), 10);

        let lines = read_lines(destination.path());
        assert_eq!(lines.len(), 11);
        assert_eq!(lines[0], "timestamp");
        assert_eq!(lines[1], "0,0,-1,0,0,0,0,0,2");
        for (i, line) in lines[1..].iter().enumerate() {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields.len(), 9);
            assert_eq!(fields[1], i.to_string());
        }
    }

    #[test]
    fn test_timestamped_format_leads_with_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let mut destination = LogDestination::create(dir.path(), LogFormat::Timestamped).unwrap();
        let mut window = filled_window(2);
        WindowFlusher::new().flush(&mut window, &mut destination).unwrap();

        let lines = read_lines(destination.path());
        assert_eq!(lines[0], LogFormat::Timestamped.header());
        assert_eq!(lines[1], "1000,0,0,-1,0,0,0,0,0,2");
        assert!(lines[2].starts_with("1001,"));
        assert_eq!(lines[2].split(',').count(), 10);
    }

    #[test]
    fn test_flush_empty_window_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut destination = LogDestination::create(dir.path(), LogFormat::Legacy).unwrap();
        let mut window = SampleWindow::new(8);
        let mut flusher = WindowFlusher::new();

        let report = flusher.flush(&mut window, &mut destination).unwrap();
        assert_eq!(report, FlushReport::default());
        assert!(!flusher.has_flushed());
        assert_eq!(read_lines(destination.path()), vec!["timestamp"]);
    }

    #[test]
    fn test_repeated_flushes_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut destination = LogDestination::create(dir.path(), LogFormat::Legacy).unwrap();
        let mut flusher = WindowFlusher::new();

        let mut window = filled_window(3);
        flusher.flush(&mut window, &mut destination).unwrap();
        let mut window = filled_window(4);
        flusher.flush(&mut window, &mut destination).unwrap();

        assert_eq!(flusher.records_written(), 7);
        assert_eq!(read_lines(destination.path()).len(), 8);
    }

    #[test]
    fn test_same_instant_gets_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc::now();
        let first = LogDestination::create_at(dir.path(), LogFormat::Legacy, at).unwrap();
        let second = LogDestination::create_at(dir.path(), LogFormat::Legacy, at).unwrap();

        assert_ne!(first.path(), second.path());
        assert_eq!(first.created_at(), second.created_at());
        assert!(second
            .path()
            .to_string_lossy()
            .ends_with(&format!("emg-{}-1.csv", at.timestamp_millis())));
    }

    #[test]
    fn test_echo_prints_each_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut destination = LogDestination::create(dir.path(), LogFormat::Legacy).unwrap();
        let sink = SharedSink::default();
        let mut flusher = WindowFlusher::new().with_echo(Box::new(sink.clone()));

        let mut window = filled_window(3);
        flusher.flush(&mut window, &mut destination).unwrap();

        let printed = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert_eq!(printed.lines().count(), 3);
        assert!(printed.starts_with("[0/3] t=1000"));
        assert!(printed.contains("[-1][0][0][0][0][0][2]"));
    }

    #[test]
    fn test_first_row_of_window_has_plain_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut destination = LogDestination::create(dir.path(), LogFormat::Legacy).unwrap();
        let mut window = filled_window(1);
        WindowFlusher::new().flush(&mut window, &mut destination).unwrap();

        let lines = read_lines(destination.path());
        assert!(lines[1].starts_with("0,"), "first row: {}", lines[1]);
    }

    #[test]
    fn test_failed_flush_is_cut_back_and_retry_writes_rows_once() {
        let sink = LimitedSink::default();
        sink.set_limit(Some(1024));
        let mut destination = LogDestination::from_sink(
            "memory.csv",
            LogFormat::Legacy,
            Utc::now(),
            Box::new(sink.clone()),
        )
        .unwrap();
        let mut window = filled_window(200);
        let mut flusher = WindowFlusher::new();

        assert!(matches!(
            flusher.flush(&mut window, &mut destination),
            Err(RecorderError::Io { .. })
        ));
        assert_eq!(window.len(), 200);
        assert!(!flusher.has_flushed());
        assert_eq!(destination.records_written(), 0);
        assert_eq!(sink.contents(), "timestamp\n");

        sink.set_limit(None);
        let report = flusher.flush(&mut window, &mut destination).unwrap();
        assert_eq!(report.records, 200);
        assert_eq!(destination.records_written(), 200);

        let text = sink.contents();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 201);
        assert_eq!(lines[0], "timestamp");
        for (i, line) in lines[1..].iter().enumerate() {
            let expected = (i as i8).to_string();
            assert_eq!(line.split(',').nth(1), Some(expected.as_str()), "row {i}");
        }
    }

    #[test]
    fn test_file_sink_truncate_moves_write_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.csv");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"timestamp\npartial row").unwrap();

        LogSink::truncate(&mut file, 10).unwrap();
        file.write_all(b"1,2\n").unwrap();
        drop(file);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "timestamp\n1,2\n");
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("legacy".parse::<LogFormat>(), Ok(LogFormat::Legacy));
        assert_eq!(" Timestamped ".parse::<LogFormat>(), Ok(LogFormat::Timestamped));
        assert!("json".parse::<LogFormat>().is_err());
    }
}

use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Clock and transcript sink used by the chat core.
///
/// `append_log` never fails from the caller's point of view: a sink error is
/// reported and the chat keeps going.
pub trait Journal: Send + Sync {
    /// Timestamp shown inside chat lines, e.g. `18/10/2026 - 14:03:59`
    fn format_timestamp(&self) -> String;

    /// Append one already formatted line to the transcript
    fn append_log(&self, line: &str);
}

/// Writes the transcript to `<dir>/log<DDMMYYYY>.txt`, one file per day.
///
/// The file is opened in append mode for every line, so a rotated or deleted
/// file is simply recreated.
#[derive(Debug, Clone)]
pub struct FileJournal {
    dir: PathBuf,
}

impl FileJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileJournal { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Transcript file for the day of `now`
    pub fn path_for(&self, now: &DateTime<Local>) -> PathBuf {
        self.dir.join(format!("log{}.txt", now.format("%d%m%Y")))
    }

    fn try_append(&self, line: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(&Local::now()))?;
        file.write_all(line.as_bytes())
    }
}

impl Journal for FileJournal {
    fn format_timestamp(&self) -> String {
        format_timestamp(&Local::now())
    }

    fn append_log(&self, line: &str) {
        if let Err(e) = self.try_append(line) {
            log::error!("Error writing to log file in {}: {}", self.dir.display(), e);
        }
    }
}

/// In-memory journal with a fixed clock, for embedding and tests.
#[derive(Debug)]
pub struct MemoryJournal {
    timestamp: String,
    lines: Mutex<Vec<String>>,
}

impl MemoryJournal {
    pub fn new(timestamp: impl Into<String>) -> Self {
        MemoryJournal {
            timestamp: timestamp.into(),
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Every line appended so far, in order
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl Journal for MemoryJournal {
    fn format_timestamp(&self) -> String {
        self.timestamp.clone()
    }

    fn append_log(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

/// `DD/MM/YYYY - HH:MM:SS`
pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format("%d/%m/%Y - %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_is_day_month_year_then_time() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(format_timestamp(&at), "07/03/2024 - 09:05:01");
    }

    #[test]
    fn transcript_file_is_named_after_the_day() {
        let journal = FileJournal::new("logs");
        let at = Local.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(journal.path_for(&at), PathBuf::from("logs/log31122024.txt"));
    }

    #[test]
    fn lines_are_appended_and_directory_created() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = FileJournal::new(tmp.path().join("logs"));

        journal.append_log("[ts] first\n");
        journal.append_log("[ts] second\n");

        let written = fs::read_to_string(journal.path_for(&Local::now())).unwrap();
        assert_eq!(written, "[ts] first\n[ts] second\n");
    }

    #[test]
    fn memory_journal_keeps_order_and_fixed_clock() {
        let journal = MemoryJournal::new("ts");
        journal.append_log("a\n");
        journal.append_log("b\n");
        assert_eq!(journal.format_timestamp(), "ts");
        assert_eq!(journal.lines(), vec!["a\n", "b\n"]);
    }

    #[test]
    fn unwritable_sink_is_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        fs::write(&blocker, "file").unwrap();

        // The directory path is a regular file, so every append fails quietly.
        let journal = FileJournal::new(&blocker);
        journal.append_log("[ts] lost\n");
        assert!(journal.try_append("[ts] lost\n").is_err());
    }
}

// Received-message log: append-only duplicate suppression per inbound contact
//
// One decimal id per line. Only membership is ever asked of it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const LOG_FILE: &str = "log";

pub struct MessageLog {
    path: PathBuf,
}

impl MessageLog {
    /// Log living in the given inbound contact directory
    pub fn new(contact_dir: &Path) -> Self {
        Self {
            path: contact_dir.join(LOG_FILE),
        }
    }

    /// Whether `id` has been logged. A missing log means nothing was received yet;
    /// any other read problem is an error because the answer is unknown.
    pub fn is_present(&self, id: u64) -> io::Result<bool> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let logged: u64 = line.parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("malformed log entry {:?}", line),
                )
            })?;
            if logged == id {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn add(&self, id: u64) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", id)?;
        file.sync_data()
    }

    /// Forget every id. Used when the sender starts a new channel and its
    /// ids start over.
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

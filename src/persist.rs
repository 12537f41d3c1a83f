use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Reservation;

/// Whole-registry JSON document on disk.
///
/// Every write replaces the file: the registry goes to `<file>.tmp`, is
/// fsynced, and is renamed over the target, so a crash mid-write leaves the
/// previous version intact.
#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Read the persisted registry. Missing file → empty. Unreadable or
    /// unparseable file → logged and empty.
    pub fn load(&self) -> Vec<Reservation> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("cannot read {}: {e}; starting empty", self.path.display());
                return Vec::new();
            }
        };
        match serde_json::from_slice::<Vec<Reservation>>(&bytes) {
            Ok(records) => records,
            Err(e) => {
                warn!("corrupt registry file {}: {e}; starting empty", self.path.display());
                Vec::new()
            }
        }
    }

    /// Overwrite the file with `records`.
    pub fn write(&self, records: &[Reservation]) -> io::Result<()> {
        let tmp_path = self.tmp_path();
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, records)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp_path, &self.path)
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{Local, NaiveDate};

/// Root directory all generated images land under.
pub const OUTPUT_ROOT: &str = "Output";

/// Dated output layout: a `Output/<YYYYMMDD>` directory holding
/// `<stem>_<unix-timestamp>_<index>.png` files.
///
/// Filenames carry a one-second timestamp, so within a run the index is the
/// only guaranteed differentiator; another process writing the same directory
/// in the same second overwrites silently.
pub struct OutputLayout {
    dir: PathBuf,
    stem: String,
}

impl OutputLayout {
    /// Creates the dated directory for `date` (a pre-existing directory is
    /// fine) and strips the extension off the output base name.
    pub fn create(root: &Path, date: NaiveDate, output: &str) -> Result<Self> {
        let dir = root.join(date.format("%Y%m%d").to_string());
        fs::create_dir_all(&dir)?;
        let stem = match output.rsplit_once('.') {
            Some((stem, _ext)) if !stem.is_empty() => stem.to_string(),
            _ => output.to_string(),
        };
        Ok(Self { dir, stem })
    }

    pub fn for_today(output: &str) -> Result<Self> {
        Self::create(Path::new(OUTPUT_ROOT), Local::now().date_naive(), output)
    }

    /// Path for the `index`-th image (1-based) saved at `timestamp` unix
    /// seconds.
    pub fn image_path(&self, timestamp: i64, index: usize) -> PathBuf {
        self.dir
            .join(format!("{}_{}_{}.png", self.stem, timestamp, index))
    }
}

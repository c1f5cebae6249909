//! Timestamped image files for QR codes and screenshots.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

// Upper bound on `_N` suffixes tried within one second under one prefix.
const MAX_SAME_SECOND: u32 = 10_000;

/// Atomically creates `prefix_YYYYMMDD_HHMMSS.png` in `dir`.
///
/// When another artifact already claimed that name in the same second, a
/// counter is appended (`prefix_YYYYMMDD_HHMMSS_2.png`, ...) instead of
/// overwriting it.
pub fn claim_png(dir: &Path, prefix: &str, at: DateTime<Local>) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    let stamp = at.format("%Y%m%d_%H%M%S");

    for n in 1..=MAX_SAME_SECOND {
        let name = if n == 1 {
            format!("{prefix}_{stamp}.png")
        } else {
            format!("{prefix}_{stamp}_{n}.png")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free {prefix}_{stamp} filename in {}", dir.display()),
    ))
}

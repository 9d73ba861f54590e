use std::path::{Path, PathBuf};
use std::{fs, io};

use crate::data_path;

const LOG_FILE: &str = "regchart-current.log";
const PREVIOUS_LOG_FILE: &str = "regchart-previous.log";

/// مسیر فایل لاگ جاری؛ پوشه داده‌ها در صورت نبود ساخته می‌شود
pub fn path() -> Result<PathBuf, Error> {
    let full_path = data_path(Some(LOG_FILE));
    ensure_parent(&full_path)?;

    Ok(full_path)
}

/// انتقال لاگ اجرای قبلی به `regchart-previous.log`؛ فقط یک نسخه قبلی نگه داشته می‌شود
pub fn rotate(current: &Path) -> Result<(), Error> {
    let previous = current
        .parent()
        .map_or_else(|| PathBuf::from(PREVIOUS_LOG_FILE), |dir| {
            dir.join(PREVIOUS_LOG_FILE)
        });

    match fs::remove_file(&previous) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if current.exists() {
        fs::rename(current, &previous)?;
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Invalid log file path"))?;

    if !parent.exists() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// خطاهای راه‌اندازی لاگ
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    SetLog(#[from] log::SetLoggerError), // لاگر قبلاً نصب شده
    #[error(transparent)]
    ParseLevel(#[from] log::ParseLevelError), // مقدار نامعتبر RUST_LOG
}

use std::path::{Path, PathBuf};
use thiserror::Error;

use super::constants::REQUIRED_COLUMNS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has an invalid update window time {0:?}; expected dd.mm.YYYY HH:MM")]
    BadUpdateWindow(String),
}

#[derive(Debug, Error)]
pub enum AssayTableError {
    #[error("Can't find the assay table at {0:?}. If it has moved, update the configuration with its new location")]
    BadFilePath(PathBuf),
    #[error("AssayTable failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("AssayTable failed to parse the table: {0}")]
    ParsingError(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("Can't find the formula workbook at {0:?}. If it has moved, update the configuration with its new location")]
    BadFilePath(PathBuf),
    #[error("Formula workbook could not be read: {0}")]
    WorkbookError(#[from] calamine::Error),
    #[error("Formula workbook has no formula in cell {0}")]
    MissingFormula(String),
    #[error("Reference loading failed due to assay table error: {0}")]
    AssayError(#[from] AssayTableError),
}

#[derive(Debug, Error)]
pub enum ExportParseError {
    #[error("Export parsing failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error(
        "{path:?} doesn't look right.\nIt is either missing a column we need, or it is not an export file.\nCheck that you ticked 'Results' when exporting.\nColumns needed: {cols}.",
        cols = REQUIRED_COLUMNS.join(", ")
    )]
    MalformedExport { path: PathBuf },
    #[error("Export {path:?} has no 'key = value' metadata on line {line}")]
    BadMetadata { path: PathBuf, line: usize },
    #[error("Export parsing failed to read a row: {0}")]
    CsvError(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("{0:?} is open in another program. Close it and re-try.")]
    FileLocked(PathBuf),
    #[error("Workbook writing failed: {0}")]
    XlsxError(#[from] rust_xlsxwriter::XlsxError),
    #[error("Existing workbook could not be read: {0}")]
    WorkbookError(#[from] calamine::Error),
    #[error("Workbook writing failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Existing workbook package could not be opened: {0}")]
    ZipError(#[from] zip::result::ZipError),
    #[error("Existing workbook has a part that is not valid XML: {0}")]
    XmlError(#[from] quick_xml::Error),
    #[error("{path:?} has {features} that would be lost by adding a sheet to it. Choose another workbook.")]
    CannotPreserve { path: PathBuf, features: String },
    #[error("Could not find a free sheet name for {0}")]
    SheetNamesExhausted(String),
}

/// Windows ERROR_SHARING_VIOLATION and ERROR_LOCK_VIOLATION
const SHARING_VIOLATION: i32 = 32;
const LOCK_VIOLATION: i32 = 33;

/// The file is held by another program, e.g. a workbook open in Excel
pub fn is_locked(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::PermissionDenied
        || (cfg!(windows)
            && matches!(error.raw_os_error(), Some(SHARING_VIOLATION | LOCK_VIOLATION)))
}

impl WriterError {
    /// An I/O failure on the workbook at `path`
    pub fn from_io(error: std::io::Error, path: &Path) -> Self {
        if is_locked(&error) {
            Self::FileLocked(path.to_path_buf())
        } else {
            Self::IOError(error)
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{0}")]
    Parse(#[from] ExportParseError),
    #[error("{0}")]
    Writer(#[from] WriterError),
}

impl ExportError {
    /// Errors worth another attempt after a pause (slow network share, file still being written)
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Parse(ExportParseError::IOError(_)) => true,
            Self::Writer(WriterError::IOError(e)) => !is_locked(e),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("File watcher failed: {0}")]
    NotifyError(#[from] notify::Error),
    #[error("Watch folder could not be created: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unrecognised command: {0}")]
    Unrecognised(String),
    #[error("'{0}' needs a workbook path, e.g. '{0} C:\\exports\\plate.xlsx'")]
    MissingPath(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_locked_files() {
        assert!(is_locked(&Error::from(ErrorKind::PermissionDenied)));
        assert!(!is_locked(&Error::from(ErrorKind::NotFound)));
        let mapped = WriterError::from_io(Error::from(ErrorKind::PermissionDenied), Path::new("a.xlsx"));
        assert!(matches!(mapped, WriterError::FileLocked(p) if p == Path::new("a.xlsx")));
    }

    #[cfg(windows)]
    #[test]
    fn test_sharing_violations_are_locked() {
        assert!(is_locked(&Error::from_raw_os_error(32)));
        assert!(is_locked(&Error::from_raw_os_error(33)));
        let mapped = WriterError::from_io(Error::from_raw_os_error(32), Path::new("a.xlsx"));
        assert!(matches!(mapped, WriterError::FileLocked(_)));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_os_codes_only_lock_on_windows() {
        // 32 is EPIPE here
        assert!(!is_locked(&Error::from_raw_os_error(32)));
    }

    #[test]
    fn test_writer_io_errors_are_transient() {
        let gone = ExportError::Writer(WriterError::from_io(
            Error::from(ErrorKind::NotFound),
            Path::new("a.xlsx"),
        ));
        assert!(gone.is_transient());
        let locked = ExportError::Writer(WriterError::from_io(
            Error::from(ErrorKind::PermissionDenied),
            Path::new("a.xlsx"),
        ));
        assert!(!locked.is_transient());
    }
}

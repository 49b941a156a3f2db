use std::fmt::Display;
use std::path::{Path, PathBuf};

use super::constants::{
    CONTROL_SAMPLE_LINE, ENDO_CONTROL_LINE, HEADER_CANDIDATES, REQUIRED_COLUMNS, UNDETERMINED,
};
use super::error::ExportParseError;

/// A cycle threshold: either a finite value or "Undetermined" (no amplification)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ct {
    Value(f64),
    Undetermined,
}

impl Ct {
    /// Anything that is not a finite number is Undetermined
    pub fn parse(value: &str) -> Self {
        match value.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Self::Value(v),
            _ => Self::Undetermined,
        }
    }

    pub fn is_undetermined(&self) -> bool {
        matches!(self, Self::Undetermined)
    }
}

impl Display for Ct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Undetermined => write!(f, "{UNDETERMINED}"),
        }
    }
}

/// One row of the Results table of a qPCR export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub well: String,
    pub omitted: bool,
    pub sample: String,
    pub target: String,
    pub reporter: String,
    pub rq: Option<f64>,
    pub ct: Ct,
    pub delta_ct: Option<f64>,
    pub delta_delta_ct: Option<f64>,
}

/// Run level information from the export preamble. Both names are lower-cased
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    pub endogenous_control: String,
    pub control_sample: String,
}

/// A parsed export file
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub path: PathBuf,
    pub metadata: RunMetadata,
    pub rows: Vec<ExportRow>,
}

impl ExportFile {
    /// Read and parse an export file
    pub fn read(path: &Path) -> Result<Self, ExportParseError> {
        let bytes = std::fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);
        Self::parse(path, &content)
    }

    /// Parse export text. `path` is only used for error reporting
    pub fn parse(path: &Path, content: &str) -> Result<Self, ExportParseError> {
        let content = content.trim_start_matches('\u{feff}');
        let lines: Vec<&str> = content.lines().collect();
        let metadata = RunMetadata {
            endogenous_control: read_metadata_line(path, &lines, ENDO_CONTROL_LINE)?,
            control_sample: read_metadata_line(path, &lines, CONTROL_SAMPLE_LINE)?,
        };

        // The header offset counts non-blank lines only
        let non_blank: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, _)| idx)
            .collect();

        for (offset, delimiter) in HEADER_CANDIDATES {
            let Some(&header_line) = non_blank.get(offset) else {
                continue;
            };
            let body = lines[header_line..].join("\n");
            if let Some(rows) = read_body(&body, delimiter)? {
                spdlog::debug!(
                    "Read {} rows from {} (header at line {}, delimiter {:?})",
                    rows.len(),
                    path.display(),
                    header_line,
                    delimiter as char
                );
                return Ok(Self {
                    path: path.to_path_buf(),
                    metadata,
                    rows,
                });
            }
        }
        Err(ExportParseError::MalformedExport {
            path: path.to_path_buf(),
        })
    }
}

/// Value after the first `=` on an absolute line, trimmed and lower-cased
fn read_metadata_line(path: &Path, lines: &[&str], line: usize) -> Result<String, ExportParseError> {
    lines
        .get(line)
        .and_then(|l| l.split_once('='))
        .map(|(_, value)| value.trim().to_lowercase())
        .ok_or_else(|| ExportParseError::BadMetadata {
            path: path.to_path_buf(),
            line,
        })
}

/// Returns None if the header does not hold every required column
fn read_body(body: &str, delimiter: u8) -> Result<Option<Vec<ExportRow>>, ExportParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers = reader.headers()?.clone();
    let mut columns = [0usize; REQUIRED_COLUMNS.len()];
    for (slot, name) in columns.iter_mut().zip(REQUIRED_COLUMNS) {
        match headers.iter().position(|h| h.trim() == name) {
            Some(idx) => *slot = idx,
            None => return Ok(None),
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |col: usize| record.get(columns[col]).unwrap_or("").trim();
        if field(0).is_empty() {
            continue;
        }
        rows.push(ExportRow {
            well: field(0).to_string(),
            omitted: field(1).eq_ignore_ascii_case("true"),
            sample: field(2).to_string(),
            target: field(3).to_string(),
            reporter: field(4).to_string(),
            rq: parse_optional(field(5)),
            ct: Ct::parse(field(6)),
            delta_ct: parse_optional(field(7)),
            delta_delta_ct: parse_optional(field(8)),
        });
    }
    Ok(Some(rows))
}

fn parse_optional(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_parse_tab_export() {
        let text = export_text("ACTB", "Control_Het", &scenario_rows(), '\t');
        let export = ExportFile::parse(Path::new("PMG0012345_Export.txt"), &text).unwrap();
        assert_eq!(export.metadata.endogenous_control, "actb");
        assert_eq!(export.metadata.control_sample, "control_het");
        assert_eq!(export.rows.len(), 4);

        let first = &export.rows[0];
        assert_eq!(first.well, "A1");
        assert_eq!(first.sample, "pmgb11.2a");
        assert_eq!(first.reporter, "FAM");
        assert_eq!(first.rq, Some(1.2));
        assert_eq!(first.ct, Ct::Value(24.1));
        assert_eq!(first.delta_delta_ct, Some(0.1));
        assert!(export.rows[2].ct.is_undetermined());
        assert_eq!(export.rows[2].rq, None);
        assert!(export.rows.iter().all(|r| !r.omitted));
    }

    #[test]
    fn test_omitted_flag() {
        let mut rows = scenario_rows();
        rows.push("A3\tTRUE\tpmgb11.3a\tactb\tENDOGENOUS CONTROL\tVIC\t\t\t\t");
        let text = export_text("actb", "ctrl", &rows, '\t');
        let export = ExportFile::parse(Path::new("x.txt"), &text).unwrap();
        assert!(export.rows[4].omitted);
        assert!(export.rows[4].ct.is_undetermined());
    }

    #[test]
    fn test_parse_comma_export_with_extra_line() {
        let mut text = export_text("actb", "ctrl", &scenario_rows(), ',');
        // An extra non-blank line pushes the header to offset 15
        text = text.replacen("[Results]", "[Results]\n# exported by ViiA 7 v1.2", 1);
        let export = ExportFile::parse(Path::new("x.txt"), &text).unwrap();
        assert_eq!(export.rows.len(), 4);
        assert_eq!(export.rows[1].target, "actb");
    }

    #[test]
    fn test_parse_is_idempotent() {
        let text = export_text("actb", "ctrl", &scenario_rows(), '\t');
        let a = ExportFile::parse(Path::new("x.txt"), &text).unwrap();
        let b = ExportFile::parse(Path::new("x.txt"), &text).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_column_is_malformed() {
        let text = export_text("actb", "ctrl", &scenario_rows(), '\t').replace("Reporter", "Dye");
        let err = ExportFile::parse(Path::new("bad.txt"), &text).unwrap_err();
        assert!(matches!(err, ExportParseError::MalformedExport { .. }));
        assert!(err.to_string().contains("Well, Omitted, Sample"));
    }

    #[test]
    fn test_missing_metadata() {
        let err = ExportFile::parse(Path::new("short.txt"), "Well\tSample\n").unwrap_err();
        assert!(matches!(err, ExportParseError::BadMetadata { line: 4, .. }));
    }

    #[test]
    fn test_ct_normalisation() {
        assert_eq!(Ct::parse(" 31.25 "), Ct::Value(31.25));
        assert_eq!(Ct::parse("Undetermined"), Ct::Undetermined);
        assert_eq!(Ct::parse("NaN"), Ct::Undetermined);
        assert_eq!(Ct::parse("inf"), Ct::Undetermined);
        assert_eq!(Ct::Undetermined.to_string(), "Undetermined");
    }
}

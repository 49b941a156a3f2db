//! Reads what an existing xlsx package holds besides its cell values.
//!
//! Number formats, horizontal alignment, column widths and hidden sheets can be written
//! back when a sheet is added to the workbook. Everything else that would not survive
//! (merged cells, fonts and fills, charts, macros, ...) is listed as a [`Feature`].
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use fxhash::FxHashMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use rust_xlsxwriter::{Format, FormatAlign};
use zip::result::ZipError;
use zip::ZipArchive;

use super::error::WriterError;

/// Highest column number in a worksheet (XFD)
const MAX_COLUMNS: u32 = 16_384;

/// A cell's number format: one of the built-in ids, or a custom format code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumFormat {
    Builtin(u8),
    Custom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

/// The parts of a cell style that can be written again
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellStyle {
    pub num_format: Option<NumFormat>,
    pub align: Option<Align>,
}

impl CellStyle {
    pub fn is_default(&self) -> bool {
        self.num_format.is_none() && self.align.is_none()
    }

    /// `base` with this style on top
    pub fn apply(&self, base: &Format) -> Format {
        let mut format = base.clone();
        match &self.num_format {
            Some(NumFormat::Builtin(id)) => format = format.set_num_format_index(*id),
            Some(NumFormat::Custom(code)) => format = format.set_num_format(code),
            None => (),
        }
        if let Some(align) = self.align {
            format = format.set_align(match align {
                Align::Left => FormatAlign::Left,
                Align::Center => FormatAlign::Center,
                Align::Right => FormatAlign::Right,
            });
        }
        format
    }
}

/// Something in a workbook that is lost if the workbook is written again from its cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    CellDecoration,
    MergedCells,
    ConditionalFormatting,
    DataValidation,
    Hyperlinks,
    AutoFilter,
    Protection,
    Drawings,
    Comments,
    Tables,
    PivotTables,
    Macros,
    DefinedNames,
    ExternalLinks,
    Chartsheets,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CellDecoration => "fonts, fills or borders",
            Self::MergedCells => "merged cells",
            Self::ConditionalFormatting => "conditional formatting",
            Self::DataValidation => "data validation",
            Self::Hyperlinks => "hyperlinks",
            Self::AutoFilter => "filters",
            Self::Protection => "sheet protection",
            Self::Drawings => "charts or pictures",
            Self::Comments => "comments",
            Self::Tables => "tables",
            Self::PivotTables => "pivot tables",
            Self::Macros => "macros",
            Self::DefinedNames => "named ranges",
            Self::ExternalLinks => "links to other workbooks",
            Self::Chartsheets => "chart sheets",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A run of columns sharing a width, zero based and inclusive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnStyle {
    pub first: u16,
    pub last: u16,
    pub width_pixels: Option<u16>,
    pub hidden: bool,
}

/// What a single worksheet carries besides its cells
#[derive(Debug, Clone, Default)]
pub struct SheetStyle {
    /// Styled cells by zero based (row, column)
    pub cells: BTreeMap<(u32, u16), CellStyle>,
    pub columns: Vec<ColumnStyle>,
    pub hidden: bool,
    pub features: BTreeSet<Feature>,
}

/// One entry of the workbook's cell formats
#[derive(Debug, Clone, Default)]
struct Xf {
    style: CellStyle,
    decorated: bool,
}

/// The inspected package of an xlsx workbook
#[derive(Debug, Default)]
pub struct Package {
    sheets: FxHashMap<String, SheetStyle>,
    features: BTreeSet<Feature>,
}

impl Package {
    pub fn read(path: &Path) -> Result<Self, WriterError> {
        let file = File::open(path).map_err(|e| WriterError::from_io(e, path))?;
        let mut archive = ZipArchive::new(file).map_err(|e| map_zip_error(e, path))?;

        let mut package = Self::default();
        let names: Vec<String> = archive.file_names().map(String::from).collect();
        for name in names.iter() {
            if let Some(feature) = part_feature(name) {
                package.features.insert(feature);
            }
        }

        let xfs = match read_part(&mut archive, "xl/styles.xml", path)? {
            Some(xml) => parse_styles(&xml)?,
            None => Vec::new(),
        };
        let targets = match read_part(&mut archive, "xl/_rels/workbook.xml.rels", path)? {
            Some(xml) => parse_relationships(&xml)?,
            None => FxHashMap::default(),
        };
        let Some(workbook) = read_part(&mut archive, "xl/workbook.xml", path)? else {
            return Ok(package);
        };
        for entry in parse_workbook(&workbook, &mut package.features)? {
            let Some(target) = targets.get(&entry.rel_id) else {
                continue;
            };
            if target.chartsheet {
                package.features.insert(Feature::Chartsheets);
                continue;
            }
            let Some(xml) = read_part(&mut archive, &target.part, path)? else {
                continue;
            };
            let mut sheet = parse_sheet(&xml, &xfs)?;
            sheet.hidden = entry.hidden;
            package.sheets.insert(entry.name, sheet);
        }
        Ok(package)
    }

    pub fn sheet(&self, name: &str) -> Option<&SheetStyle> {
        self.sheets.get(name)
    }

    /// Workbook level features, e.g. macros or pivot caches
    pub fn features(&self) -> &BTreeSet<Feature> {
        &self.features
    }
}

fn map_zip_error(error: ZipError, path: &Path) -> WriterError {
    match error {
        ZipError::Io(e) => WriterError::from_io(e, path),
        e => WriterError::ZipError(e),
    }
}

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    path: &Path,
) -> Result<Option<String>, WriterError> {
    let mut part = match archive.by_name(name) {
        Ok(part) => part,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(map_zip_error(e, path)),
    };
    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .map_err(|e| WriterError::from_io(e, path))?;
    Ok(Some(xml))
}

fn part_feature(name: &str) -> Option<Feature> {
    let name = name.to_ascii_lowercase();
    if name.starts_with("xl/drawings/") || name.starts_with("xl/charts/") || name.starts_with("xl/media/") {
        Some(Feature::Drawings)
    } else if name.starts_with("xl/comments") || name.starts_with("xl/threadedcomments/") {
        Some(Feature::Comments)
    } else if name.starts_with("xl/tables/") {
        Some(Feature::Tables)
    } else if name.starts_with("xl/pivottables/") || name.starts_with("xl/pivotcache/") {
        Some(Feature::PivotTables)
    } else if name.ends_with("vbaproject.bin") {
        Some(Feature::Macros)
    } else if name.starts_with("xl/externallinks/") {
        Some(Feature::ExternalLinks)
    } else {
        None
    }
}

fn attribute(element: &BytesStart, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| {
            std::str::from_utf8(&a.value)
                .ok()
                .and_then(|v| quick_xml::escape::unescape(v).ok())
                .map(|v| v.into_owned())
        })
}

fn number<T: std::str::FromStr>(element: &BytesStart, name: &[u8]) -> Option<T> {
    attribute(element, name).and_then(|v| v.parse().ok())
}

fn flag(element: &BytesStart, name: &[u8]) -> bool {
    matches!(attribute(element, name).as_deref(), Some("1") | Some("true"))
}

/// Zero based (row, column) of an `A1` style reference
fn cell_position(reference: &str) -> Option<(u32, u16)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        return None;
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
        if col > MAX_COLUMNS {
            return None;
        }
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, (col - 1) as u16))
}

fn parse_styles(xml: &str) -> Result<Vec<Xf>, WriterError> {
    let mut reader = Reader::from_str(xml);
    let mut custom: FxHashMap<u32, String> = FxHashMap::default();
    let mut records: Vec<(u32, Xf)> = Vec::new();
    let mut in_num_fmts = false;
    let mut in_cell_xfs = false;
    loop {
        let (element, opened) = match reader.read_event()? {
            Event::Start(e) => (e, true),
            Event::Empty(e) => (e, false),
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"numFmts" => in_num_fmts = false,
                    b"cellXfs" => in_cell_xfs = false,
                    _ => (),
                }
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };
        match element.local_name().as_ref() {
            b"numFmts" => in_num_fmts = opened,
            b"cellXfs" => in_cell_xfs = opened,
            b"numFmt" if in_num_fmts => {
                if let (Some(id), Some(code)) = (number(&element, b"numFmtId"), attribute(&element, b"formatCode")) {
                    custom.insert(id, code);
                }
            }
            b"xf" if in_cell_xfs => {
                let font: u32 = number(&element, b"fontId").unwrap_or(0);
                let fill: u32 = number(&element, b"fillId").unwrap_or(0);
                let border: u32 = number(&element, b"borderId").unwrap_or(0);
                let xf = Xf {
                    style: CellStyle::default(),
                    // Fills 0 and 1 are the defaults every workbook carries
                    decorated: font > 0 || fill > 1 || border > 0,
                };
                records.push((number(&element, b"numFmtId").unwrap_or(0), xf));
            }
            b"alignment" if in_cell_xfs => {
                if let Some((_, xf)) = records.last_mut() {
                    read_alignment(&element, xf);
                }
            }
            _ => (),
        }
    }

    Ok(records
        .into_iter()
        .map(|(id, mut xf)| {
            xf.style.num_format = match custom.get(&id) {
                Some(code) => Some(NumFormat::Custom(code.clone())),
                None if id == 0 => None,
                None => u8::try_from(id).ok().map(NumFormat::Builtin),
            };
            xf
        })
        .collect())
}

fn read_alignment(element: &BytesStart, xf: &mut Xf) {
    for attr in element.attributes().flatten() {
        let value = std::str::from_utf8(&attr.value)
            .ok()
            .and_then(|v| quick_xml::escape::unescape(v).ok())
            .map(|v| v.into_owned())
            .unwrap_or_default();
        match (attr.key.local_name().as_ref(), value.as_str()) {
            (b"horizontal", "left") => xf.style.align = Some(Align::Left),
            (b"horizontal", "center") => xf.style.align = Some(Align::Center),
            (b"horizontal", "right") => xf.style.align = Some(Align::Right),
            (b"horizontal", "general") | (b"vertical", "bottom") => (),
            _ => xf.decorated = true,
        }
    }
}

struct Relationship {
    part: String,
    chartsheet: bool,
}

fn parse_relationships(xml: &str) -> Result<FxHashMap<String, Relationship>, WriterError> {
    let mut reader = Reader::from_str(xml);
    let mut targets = FxHashMap::default();
    loop {
        let element = match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => e,
            Event::Eof => break,
            _ => continue,
        };
        if element.local_name().as_ref() != b"Relationship" {
            continue;
        }
        let (Some(id), Some(target)) = (attribute(&element, b"Id"), attribute(&element, b"Target")) else {
            continue;
        };
        let part = match target.strip_prefix('/') {
            Some(absolute) => absolute.to_string(),
            None => format!("xl/{target}"),
        };
        let chartsheet = attribute(&element, b"Type").is_some_and(|t| t.ends_with("/chartsheet"));
        targets.insert(id, Relationship { part, chartsheet });
    }
    Ok(targets)
}

struct SheetEntry {
    name: String,
    rel_id: String,
    hidden: bool,
}

fn parse_workbook(xml: &str, features: &mut BTreeSet<Feature>) -> Result<Vec<SheetEntry>, WriterError> {
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();
    loop {
        let element = match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => e,
            Event::Eof => break,
            _ => continue,
        };
        match element.local_name().as_ref() {
            b"sheet" => {
                let (Some(name), Some(rel_id)) = (attribute(&element, b"name"), attribute(&element, b"id")) else {
                    continue;
                };
                let hidden = attribute(&element, b"state").is_some_and(|s| s != "visible");
                sheets.push(SheetEntry { name, rel_id, hidden });
            }
            b"definedName" => {
                features.insert(Feature::DefinedNames);
            }
            _ => (),
        }
    }
    Ok(sheets)
}

fn parse_sheet(xml: &str, xfs: &[Xf]) -> Result<SheetStyle, WriterError> {
    let mut reader = Reader::from_str(xml);
    let mut sheet = SheetStyle::default();
    let mut next: (u32, u16) = (0, 0);
    loop {
        let element = match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => e,
            Event::Eof => break,
            _ => continue,
        };
        let feature = match element.local_name().as_ref() {
            b"row" => {
                let row = number::<u32>(&element, b"r").map_or(next.0, |r| r.saturating_sub(1));
                next = (row, 0);
                if flag(&element, b"customFormat") {
                    sheet.check_shared_style(&element, xfs);
                }
                None
            }
            b"c" => {
                let position = attribute(&element, b"r")
                    .and_then(|r| cell_position(&r))
                    .unwrap_or(next);
                next = (position.0, position.1.saturating_add(1));
                if let Some(xf) = number::<usize>(&element, b"s").and_then(|s| xfs.get(s)) {
                    if xf.decorated {
                        sheet.features.insert(Feature::CellDecoration);
                    }
                    if !xf.style.is_default() {
                        sheet.cells.insert(position, xf.style.clone());
                    }
                }
                None
            }
            b"col" => {
                sheet.add_columns(&element);
                sheet.check_shared_style(&element, xfs);
                None
            }
            b"mergeCell" => Some(Feature::MergedCells),
            b"conditionalFormatting" => Some(Feature::ConditionalFormatting),
            b"dataValidation" => Some(Feature::DataValidation),
            b"hyperlink" => Some(Feature::Hyperlinks),
            b"autoFilter" => Some(Feature::AutoFilter),
            b"sheetProtection" => Some(Feature::Protection),
            b"drawing" => Some(Feature::Drawings),
            b"legacyDrawing" => Some(Feature::Comments),
            b"tablePart" => Some(Feature::Tables),
            _ => None,
        };
        if let Some(feature) = feature {
            sheet.features.insert(feature);
        }
    }
    Ok(sheet)
}

impl SheetStyle {
    fn add_columns(&mut self, element: &BytesStart) {
        let (Some(min), Some(max)) = (number::<u32>(element, b"min"), number::<u32>(element, b"max")) else {
            return;
        };
        let max = max.min(MAX_COLUMNS);
        if min == 0 || min > max {
            return;
        }
        let width_pixels = if flag(element, b"customWidth") {
            number::<f64>(element, b"width").map(|w| (w * 7.0).round() as u16)
        } else {
            None
        };
        let hidden = flag(element, b"hidden");
        if width_pixels.is_some() || hidden {
            self.columns.push(ColumnStyle {
                first: (min - 1) as u16,
                last: (max - 1) as u16,
                width_pixels,
                hidden,
            });
        }
    }

    /// Row and column styles apply to cells nobody has typed in yet; they can't be kept
    fn check_shared_style(&mut self, element: &BytesStart, xfs: &[Xf]) {
        if let Some(xf) = number::<usize>(element, b"style").or_else(|| number(element, b"s")).and_then(|s| xfs.get(s)) {
            if xf.decorated || !xf.style.is_default() {
                self.features.insert(Feature::CellDecoration);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    #[test]
    fn test_cell_position() {
        assert_eq!(cell_position("A1"), Some((0, 0)));
        assert_eq!(cell_position("AB12"), Some((11, 27)));
        assert_eq!(cell_position("XFD1048576"), Some((1_048_575, 16_383)));
        assert_eq!(cell_position("A0"), None);
        assert_eq!(cell_position("12"), None);
        assert_eq!(cell_position("B"), None);
    }

    #[test]
    fn test_styles() {
        let xml = r#"<styleSheet>
            <numFmts count="1"><numFmt numFmtId="164" formatCode="yyyy-mm-dd"/></numFmts>
            <cellStyleXfs count="1"><xf numFmtId="0" fontId="3"/></cellStyleXfs>
            <cellXfs count="5">
                <xf numFmtId="0" fontId="0" fillId="0" borderId="0"/>
                <xf numFmtId="164" fontId="0" fillId="0" borderId="0"/>
                <xf numFmtId="10" fontId="0" fillId="1" borderId="0"><alignment horizontal="center"/></xf>
                <xf numFmtId="0" fontId="1" fillId="0" borderId="0"/>
                <xf numFmtId="0" fontId="0" fillId="0" borderId="0"><alignment wrapText="1"/></xf>
            </cellXfs>
            <dxfs count="1"><dxf><numFmt numFmtId="165" formatCode="0.0"/></dxf></dxfs>
        </styleSheet>"#;
        let xfs = parse_styles(xml).unwrap();
        assert_eq!(xfs.len(), 5);
        assert!(xfs[0].style.is_default() && !xfs[0].decorated);
        assert_eq!(xfs[1].style.num_format, Some(NumFormat::Custom(String::from("yyyy-mm-dd"))));
        assert_eq!(
            xfs[2].style,
            CellStyle {
                num_format: Some(NumFormat::Builtin(10)),
                align: Some(Align::Center),
            }
        );
        assert!(!xfs[2].decorated);
        assert!(xfs[3].decorated);
        assert!(xfs[4].decorated);
    }

    #[test]
    fn test_read_package() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plates.xlsx");
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet().set_name("Plates").unwrap();
        worksheet
            .write_number_with_format(0, 0, 43678.0, &Format::new().set_num_format("yyyy-mm-dd"))
            .unwrap();
        worksheet
            .write_number_with_format(1, 0, 0.5, &Format::new().set_num_format_index(10))
            .unwrap();
        worksheet.write_string(2, 0, "plain").unwrap();
        worksheet.set_column_width(0, 20.0).unwrap();
        let notes = workbook.add_worksheet().set_name("Notes").unwrap();
        notes
            .write_string_with_format(0, 0, "Title", &Format::new().set_bold())
            .unwrap();
        notes.merge_range(1, 0, 1, 3, "Merged", &Format::new()).unwrap();
        workbook.save(&path).unwrap();

        let package = Package::read(&path).unwrap();
        assert!(package.features().is_empty());

        let plates = package.sheet("Plates").unwrap();
        assert!(plates.features.is_empty());
        assert!(matches!(
            plates.cells.get(&(0, 0)).and_then(|s| s.num_format.clone()),
            Some(NumFormat::Custom(_))
        ));
        assert_eq!(
            plates.cells.get(&(1, 0)).and_then(|s| s.num_format.clone()),
            Some(NumFormat::Builtin(10))
        );
        assert!(!plates.cells.contains_key(&(2, 0)));
        assert_eq!(plates.columns.len(), 1);
        assert_eq!(plates.columns[0].first, 0);
        assert!(plates.columns[0].width_pixels.is_some());

        let notes = package.sheet("Notes").unwrap();
        assert!(notes.features.contains(&Feature::CellDecoration));
        assert!(notes.features.contains(&Feature::MergedCells));
    }

    #[test]
    fn test_not_a_package() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plates.xlsx");
        std::fs::write(&path, "not a zip").unwrap();
        assert!(Package::read(&path).is_err());
        let missing = dir.path().join("gone.xlsx");
        assert!(matches!(Package::read(&missing), Err(WriterError::IOError(_))));
    }
}

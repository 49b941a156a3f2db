use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::{
    Color, ConditionalFormatText, ConditionalFormatTextRule, Format, FormatAlign, FormatPattern,
    Workbook, Worksheet, XlsxError,
};

use super::constants::{COLUMN_WIDTHS, GENOTYPE_COLUMN, OUTPUT_COLUMNS, UNDETERMINED};
use super::error::WriterError;
use super::export_file::Ct;
use super::sheet_name::{sheet_name, unique_sheet_name};
use super::transform::{ClassifiedRow, ExportTable};
use super::xlsx_package::{CellStyle, Feature, Package, SheetStyle};

/// Where a table ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenSheet {
    pub output: PathBuf,
    pub sheet: String,
    /// True if the sheet was added to an existing workbook
    pub appended: bool,
    pub rows: usize,
}

/// A cell value as read back from an existing workbook
#[derive(Debug, Clone, PartialEq)]
enum CellValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Formula(String),
}

/// A sheet of an existing workbook, held in memory so it can be written out again
#[derive(Debug, Clone)]
struct ExistingSheet {
    name: String,
    cells: BTreeMap<(u32, u16), CellValue>,
}

impl ExistingSheet {
    /// Does the header row match the layout we write
    fn is_export_layout(&self) -> bool {
        OUTPUT_COLUMNS.iter().enumerate().all(|(col, name)| {
            matches!(self.cells.get(&(0, col as u16)), Some(CellValue::Text(t)) if t == name)
        })
    }

    /// Number of rows below the header
    fn data_rows(&self) -> u32 {
        self.cells.keys().map(|(row, _)| *row).max().unwrap_or(0)
    }
}

/// The formats used on every export sheet
struct SheetFormats {
    plain: Format,
    centre: Format,
}

impl SheetFormats {
    fn new() -> Self {
        Self {
            plain: Format::new(),
            centre: Format::new().set_align(FormatAlign::Center),
        }
    }

    fn for_column(&self, col: u16) -> &Format {
        if COLUMN_WIDTHS.iter().any(|(c, _)| *c == col) {
            &self.centre
        } else {
            &self.plain
        }
    }
}

/// The workbook written for an export: same folder and name, `.xlsx` extension
pub fn output_path(input: &Path) -> PathBuf {
    input.with_extension("xlsx")
}

/// I/O failures keep their own variants so a locked file or a dropped share can be told apart
fn map_save_error(error: XlsxError, path: &Path) -> WriterError {
    match error {
        XlsxError::IoError(e) => WriterError::from_io(e, path),
        e => WriterError::XlsxError(e),
    }
}

fn map_read_error(error: calamine::Error, path: &Path) -> WriterError {
    match error {
        calamine::Error::Io(e) | calamine::Error::Xlsx(calamine::XlsxError::Io(e)) => {
            WriterError::from_io(e, path)
        }
        e => WriterError::WorkbookError(e),
    }
}

/// Read every sheet of a workbook: values first, then formulas on top
fn read_existing(path: &Path) -> Result<Vec<ExistingSheet>, WriterError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| map_read_error(e, path))?;
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let mut cells = BTreeMap::new();

        let values = workbook
            .worksheet_range(&name)
            .map_err(|e| map_read_error(e, path))?;
        let (row0, col0) = values.start().unwrap_or((0, 0));
        for (row, col, data) in values.used_cells() {
            let value = match data {
                Data::Int(v) => CellValue::Number(*v as f64),
                Data::Float(v) => CellValue::Number(*v),
                Data::String(s) => CellValue::Text(s.clone()),
                Data::Bool(b) => CellValue::Bool(*b),
                Data::DateTime(d) => CellValue::Number(d.as_f64()),
                Data::Empty => continue,
                other => CellValue::Text(other.to_string()),
            };
            let Ok(col) = u16::try_from(col0 as usize + col) else {
                continue;
            };
            cells.insert((row0 + row as u32, col), value);
        }

        let formulas = workbook
            .worksheet_formula(&name)
            .map_err(|e| map_read_error(e, path))?;
        let (row0, col0) = formulas.start().unwrap_or((0, 0));
        for (row, col, formula) in formulas.used_cells() {
            if formula.is_empty() {
                continue;
            }
            let Ok(col) = u16::try_from(col0 as usize + col) else {
                continue;
            };
            cells.insert((row0 + row as u32, col), CellValue::Formula(formula.clone()));
        }

        sheets.push(ExistingSheet { name, cells });
    }
    Ok(sheets)
}

/// Column widths, frozen header and genotype highlighting for a sheet with `rows` data rows
fn apply_layout(worksheet: &mut Worksheet, rows: u32) -> Result<(), XlsxError> {
    for (col, width) in COLUMN_WIDTHS {
        worksheet.set_column_width(col, width)?;
    }
    worksheet.set_freeze_panes(1, 0)?;

    let light = Color::RGB(0xDCE6F0);
    let dark = Color::RGB(0xB8CCE4);
    let red = Color::RGB(0xFFC7CE);
    let solid = |color: Color| {
        Format::new()
            .set_pattern(FormatPattern::Solid)
            .set_background_color(color)
    };
    let highlights = [
        ("Het", solid(light)),
        ("Hom", solid(dark)),
        (
            "Hemi",
            Format::new()
                .set_pattern(FormatPattern::LightUp)
                .set_background_color(light)
                .set_foreground_color(dark),
        ),
        ("Fail", solid(red)),
        ("Retest", solid(red)),
    ];
    // One row past the data, so a row typed in underneath is highlighted too
    let last_row = rows + 1;
    for (genotype, format) in highlights {
        let rule = ConditionalFormatText::new()
            .set_rule(ConditionalFormatTextRule::Contains(genotype.to_string()))
            .set_format(format)
            .set_stop_if_true(true);
        worksheet.add_conditional_format(1, GENOTYPE_COLUMN, last_row, GENOTYPE_COLUMN, &rule)?;
    }
    Ok(())
}

/// Refuse to rewrite a workbook holding anything the rewrite would drop
fn check_preserved(path: &Path, package: &Package, sheets: &[ExistingSheet]) -> Result<(), WriterError> {
    let mut lost = package.features().clone();
    for sheet in sheets {
        let Some(style) = package.sheet(&sheet.name) else {
            continue;
        };
        // Export sheets get their genotype highlighting written again
        let export_layout = sheet.is_export_layout();
        lost.extend(
            style
                .features
                .iter()
                .filter(|f| !(export_layout && **f == Feature::ConditionalFormatting)),
        );
    }
    if lost.is_empty() {
        return Ok(());
    }
    let features = lost
        .iter()
        .map(Feature::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    spdlog::warn!("Not adding to {}: it has {}", path.display(), features);
    Err(WriterError::CannotPreserve {
        path: path.to_path_buf(),
        features,
    })
}

fn write_existing(
    workbook: &mut Workbook,
    sheet: &ExistingSheet,
    style: Option<&SheetStyle>,
) -> Result<(), XlsxError> {
    let formats = SheetFormats::new();
    let export_layout = sheet.is_export_layout();
    let unstyled = CellStyle::default();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(&sheet.name)?;
    for (&(row, col), value) in sheet.cells.iter() {
        let base = if export_layout {
            formats.for_column(col)
        } else {
            &formats.plain
        };
        let carried = style.and_then(|s| s.cells.get(&(row, col))).unwrap_or(&unstyled);
        let format = carried.apply(base);
        match value {
            CellValue::Number(v) => worksheet.write_number_with_format(row, col, *v, &format)?,
            CellValue::Text(t) => worksheet.write_string_with_format(row, col, t, &format)?,
            CellValue::Bool(b) => worksheet.write_boolean_with_format(row, col, *b, &format)?,
            CellValue::Formula(f) => {
                worksheet.write_formula_with_format(row, col, format!("={f}").as_str(), &format)?
            }
        };
    }
    if let Some(style) = style {
        // Formatted cells nobody has filled in yet
        for (&(row, col), carried) in style.cells.iter() {
            if !sheet.cells.contains_key(&(row, col)) {
                worksheet.write_blank(row, col, &carried.apply(&formats.plain))?;
            }
        }
        for column in style.columns.iter() {
            for col in column.first..=column.last {
                if let Some(width) = column.width_pixels {
                    worksheet.set_column_width_pixels(col, width)?;
                }
                if column.hidden {
                    worksheet.set_column_hidden(col)?;
                }
            }
        }
        if style.hidden {
            worksheet.set_hidden(true);
        }
    }
    if export_layout {
        apply_layout(worksheet, sheet.data_rows())?;
    }
    Ok(())
}

fn write_optional_number(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: Option<f64>,
    formats: &SheetFormats,
) -> Result<(), XlsxError> {
    let format = formats.for_column(col);
    match value {
        Some(v) => worksheet.write_number_with_format(row, col, v, format)?,
        None => worksheet.write_blank(row, col, format)?,
    };
    Ok(())
}

fn write_text(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &str,
    formats: &SheetFormats,
) -> Result<(), XlsxError> {
    let format = formats.for_column(col);
    if value.is_empty() {
        worksheet.write_blank(row, col, format)?;
    } else {
        worksheet.write_string_with_format(row, col, value, format)?;
    }
    Ok(())
}

/// One row in the 25 column layout. Controls leave the sample-only columns blank
fn write_row(
    worksheet: &mut Worksheet,
    row: u32,
    classified: &ClassifiedRow,
    plate_barcode: &str,
    formats: &SheetFormats,
) -> Result<(), XlsxError> {
    let export = &classified.row;
    write_text(worksheet, row, 0, &export.well, formats)?;
    worksheet.write_boolean_with_format(row, 1, export.omitted, formats.for_column(1))?;
    write_text(worksheet, row, 2, &export.sample, formats)?;
    write_text(worksheet, row, 3, &export.target, formats)?;
    write_text(worksheet, row, 4, &export.reporter, formats)?;
    write_optional_number(worksheet, row, 5, classified.rq, formats)?;
    match export.ct {
        Ct::Value(v) => worksheet.write_number_with_format(row, 6, v, formats.for_column(6))?,
        Ct::Undetermined => {
            worksheet.write_string_with_format(row, 6, UNDETERMINED, formats.for_column(6))?
        }
    };
    write_optional_number(worksheet, row, 7, export.delta_ct, formats)?;
    write_optional_number(worksheet, row, 8, export.delta_delta_ct, formats)?;

    if let Some(annotation) = &classified.annotation {
        let formulas = &annotation.formulas;
        write_text(worksheet, row, 9, &export.sample, formats)?;
        worksheet.write_formula_with_format(
            row,
            10,
            formulas.genotype.as_str(),
            formats.for_column(10),
        )?;
        write_text(worksheet, row, 13, plate_barcode, formats)?;
        write_text(worksheet, row, 14, annotation.assay_type.as_str(), formats)?;
        write_text(worksheet, row, 15, &annotation.assay_name, formats)?;
        worksheet.write_formula_with_format(row, 16, formulas.result.as_str(), formats.for_column(16))?;
        worksheet.write_formula_with_format(
            row,
            17,
            formulas.confirmed.as_str(),
            formats.for_column(17),
        )?;
        let het = if annotation.het_control { "Yes" } else { "" };
        write_text(worksheet, row, 22, het, formats)?;
        let transgene = if annotation.transgene { "Transgene" } else { "" };
        write_text(worksheet, row, 23, transgene, formats)?;
    }
    worksheet.write_boolean_with_format(
        row,
        24,
        classified.omitted_endo,
        formats.for_column(24),
    )?;
    Ok(())
}

fn write_table(
    workbook: &mut Workbook,
    name: &str,
    table: &ExportTable,
) -> Result<(), XlsxError> {
    let formats = SheetFormats::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(name)?;
    for (col, header) in OUTPUT_COLUMNS.iter().enumerate() {
        let col = col as u16;
        worksheet.write_string_with_format(0, col, *header, formats.for_column(col))?;
    }
    for (idx, classified) in table.rows().enumerate() {
        write_row(worksheet, idx as u32 + 1, classified, &table.plate_barcode, &formats)?;
    }
    apply_layout(worksheet, table.len() as u32)?;
    worksheet.set_active(true);
    Ok(())
}

/// Write a transformed export as a new sheet.
///
/// The workbook is `destination` if given, else the input path with an `.xlsx` extension.
/// If that workbook already exists the sheet is added to it, renamed if its name is taken.
/// Number formats, alignment and column widths of the existing sheets are kept; a workbook
/// with anything else that can't be written again is left alone and an error returned.
pub fn write_export(
    input: &Path,
    table: &ExportTable,
    users: &[String],
    destination: Option<&Path>,
) -> Result<WrittenSheet, WriterError> {
    let output = destination
        .map(Path::to_path_buf)
        .unwrap_or_else(|| output_path(input));
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let base = sheet_name(&stem, users);

    let appended = output.exists();
    let (package, existing) = if appended {
        let package = Package::read(&output)?;
        let existing = read_existing(&output)?;
        check_preserved(&output, &package, &existing)?;
        (package, existing)
    } else {
        (Package::default(), Vec::new())
    };
    let existing_names: Vec<String> = existing.iter().map(|s| s.name.clone()).collect();
    let sheet = unique_sheet_name(&base, &existing_names)
        .ok_or_else(|| WriterError::SheetNamesExhausted(base.clone()))?;

    let mut workbook = Workbook::new();
    for old in existing.iter() {
        write_existing(&mut workbook, old, package.sheet(&old.name))?;
    }
    write_table(&mut workbook, &sheet, table)?;
    workbook
        .save(&output)
        .map_err(|e| map_save_error(e, &output))?;

    spdlog::info!(
        "Wrote {} rows to sheet {} of {} ({} existing sheets)",
        table.len(),
        sheet,
        output.display(),
        existing.len()
    );
    Ok(WrittenSheet {
        output,
        sheet,
        appended,
        rows: table.len(),
    })
}

use std::path::Path;
use std::sync::OnceLock;

use calamine::{open_workbook_auto, Reader};
use regex::Regex;

use super::constants::{
    CONFIRMED_FORMULA_CELL, FORMULA_SHEET, GENOTYPE_FORMULA_CELL, RESULT_FORMULA_CELL,
};
use super::error::ReferenceError;

fn cell_reference() -> &'static Regex {
    static CELL_REF: OnceLock<Regex> = OnceLock::new();
    CELL_REF.get_or_init(|| Regex::new(r"(\$?[A-Za-z]{1,3})(\$?)\d+").unwrap())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FormulaPart {
    Text(String),
    /// A cell reference whose row is filled in per output row. `$` anchors are kept
    Reference { column: String, row_anchor: bool },
}

/// A workbook formula with the row numbers of its cell references replaced by a placeholder.
///
/// `=IF(F3="","",F3*2)` becomes `=IF(F{row}="","",F{row}*2)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaTemplate {
    parts: Vec<FormulaPart>,
}

impl FormulaTemplate {
    pub fn parse(formula: &str) -> Self {
        let body = formula.trim().trim_start_matches('=');
        let mut parts = Vec::new();
        let mut in_string = false;
        let mut chunk_start = 0;

        // Split into string literals (kept verbatim) and expression chunks (scanned for refs)
        for (idx, c) in body.char_indices() {
            if c == '"' {
                if in_string {
                    parts.push(FormulaPart::Text(body[chunk_start..=idx].to_string()));
                    chunk_start = idx + 1;
                } else {
                    Self::split_expression(&body[chunk_start..idx], &mut parts);
                    chunk_start = idx;
                }
                in_string = !in_string;
            }
        }
        if in_string {
            parts.push(FormulaPart::Text(body[chunk_start..].to_string()));
        } else {
            Self::split_expression(&body[chunk_start..], &mut parts);
        }

        Self { parts }
    }

    fn split_expression(expr: &str, parts: &mut Vec<FormulaPart>) {
        let bytes = expr.as_bytes();
        let mut last = 0;
        for found in cell_reference().captures_iter(expr) {
            let Some(whole) = found.get(0) else {
                continue;
            };
            let before = whole.start().checked_sub(1).map(|i| bytes[i]);
            let after = bytes.get(whole.end()).copied();
            let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
            // Skip function names (LOG10() and pieces of longer identifiers
            if before.is_some_and(is_word) || after.is_some_and(|b| is_word(b) || b == b'(') {
                continue;
            }
            if whole.start() > last {
                parts.push(FormulaPart::Text(expr[last..whole.start()].to_string()));
            }
            parts.push(FormulaPart::Reference {
                column: found[1].to_string(),
                row_anchor: !found[2].is_empty(),
            });
            last = whole.end();
        }
        if last < expr.len() {
            parts.push(FormulaPart::Text(expr[last..].to_string()));
        }
    }

    /// Fill in the 1-based spreadsheet row
    pub fn instantiate(&self, row: u32) -> String {
        let mut formula = String::from("=");
        for part in self.parts.iter() {
            match part {
                FormulaPart::Text(text) => formula.push_str(text),
                FormulaPart::Reference { column, row_anchor } => {
                    formula.push_str(column);
                    if *row_anchor {
                        formula.push('$');
                    }
                    formula.push_str(&row.to_string());
                }
            }
        }
        formula
    }
}

/// The three formulas written into every sample row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaSet {
    pub genotype: FormulaTemplate,
    pub result: FormulaTemplate,
    pub confirmed: FormulaTemplate,
}

/// The formulas of one output row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFormulas {
    pub genotype: String,
    pub result: String,
    pub confirmed: String,
}

impl FormulaSet {
    /// Load the formulas from the reference workbook
    pub fn new(path: &Path) -> Result<Self, ReferenceError> {
        if !path.exists() {
            return Err(ReferenceError::BadFilePath(path.to_path_buf()));
        }
        let mut workbook = open_workbook_auto(path)?;
        let formulas = workbook.worksheet_formula(FORMULA_SHEET)?;
        let read_cell = |cell: (u32, u32)| -> Result<FormulaTemplate, ReferenceError> {
            match formulas.get_value(cell) {
                Some(f) if !f.trim().is_empty() => Ok(FormulaTemplate::parse(f)),
                _ => Err(ReferenceError::MissingFormula(cell_name(cell))),
            }
        };
        Ok(Self {
            genotype: read_cell(GENOTYPE_FORMULA_CELL)?,
            result: read_cell(RESULT_FORMULA_CELL)?,
            confirmed: read_cell(CONFIRMED_FORMULA_CELL)?,
        })
    }

    pub fn from_formulas(genotype: &str, result: &str, confirmed: &str) -> Self {
        Self {
            genotype: FormulaTemplate::parse(genotype),
            result: FormulaTemplate::parse(result),
            confirmed: FormulaTemplate::parse(confirmed),
        }
    }

    pub fn instantiate(&self, row: u32) -> RowFormulas {
        RowFormulas {
            genotype: self.genotype.instantiate(row),
            result: self.result.instantiate(row),
            confirmed: self.confirmed.instantiate(row),
        }
    }
}

/// A1 name of a zero based (row, col) cell; columns past Z are not needed here
fn cell_name((row, col): (u32, u32)) -> String {
    let letter = char::from(b'A' + (col % 26) as u8);
    format!("{}{}", letter, row + 1)
}

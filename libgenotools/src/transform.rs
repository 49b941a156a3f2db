use std::path::Path;
use std::sync::OnceLock;

use fxhash::FxHashSet;
use regex::Regex;

use super::assay_table::{AssayTable, AssayType};
use super::constants::{FIRST_DATA_ROW, SAMPLE_NAME_PATTERN};
use super::export_file::{ExportFile, ExportRow};
use super::formula::{FormulaSet, RowFormulas};

fn sample_name() -> &'static Regex {
    static SAMPLE_NAME: OnceLock<Regex> = OnceLock::new();
    SAMPLE_NAME.get_or_init(|| Regex::new(SAMPLE_NAME_PATTERN).unwrap())
}

/// The lookup tables every transformation needs. Loaded once at startup
#[derive(Debug, Clone)]
pub struct References {
    pub assays: AssayTable,
    pub formulas: FormulaSet,
}

/// The extra columns only real samples get
#[derive(Debug, Clone, PartialEq)]
pub struct SampleAnnotation {
    pub assay_type: AssayType,
    pub assay_name: String,
    pub het_control: bool,
    pub transgene: bool,
    /// 1-based spreadsheet row this sample is written to
    pub sheet_row: u32,
    pub formulas: RowFormulas,
}

/// An export row after endo cleanup and classification
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRow {
    pub row: ExportRow,
    pub omitted_endo: bool,
    /// RQ after zero filling
    pub rq: Option<f64>,
    /// None for control rows
    pub annotation: Option<SampleAnnotation>,
}

/// The finished table of one export: samples first, then controls
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTable {
    pub plate_barcode: String,
    pub samples: Vec<ClassifiedRow>,
    pub controls: Vec<ClassifiedRow>,
}

impl ExportTable {
    pub fn len(&self) -> usize {
        self.samples.len() + self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rows(&self) -> impl Iterator<Item = &ClassifiedRow> {
        self.samples.iter().chain(self.controls.iter())
    }
}

/// The targets the run's control sample was assayed for
#[derive(Debug, Clone, Default)]
pub struct ControlInfo {
    pub name: String,
    pub targets: FxHashSet<String>,
}

impl ControlInfo {
    pub fn applies_to(&self, target: &str) -> bool {
        self.targets.contains(target)
    }

    pub fn is_het(&self) -> bool {
        self.name.to_lowercase().contains("het")
    }
}

/// Drop the endogenous control rows and join their omitted flag onto the rows sharing a well.
///
/// This is an inner join: wells without an endo row are dropped.
pub fn endo_cleanup(rows: &[ExportRow], endo: &str) -> Vec<(ExportRow, bool)> {
    let endo = endo.to_lowercase();
    let is_endo = |row: &ExportRow| row.target.to_lowercase() == endo;
    let endos: Vec<&ExportRow> = rows.iter().filter(|&r| is_endo(r)).collect();

    let mut cleaned = Vec::new();
    for row in rows.iter().filter(|&r| !is_endo(r)) {
        let mut matched = false;
        for endo_row in endos.iter().filter(|e| e.well == row.well) {
            cleaned.push((row.clone(), endo_row.omitted));
            matched = true;
        }
        if !matched {
            spdlog::debug!(
                "Dropping {} / {} in well {}: no endogenous control on that well",
                row.sample,
                row.target,
                row.well
            );
        }
    }
    cleaned
}

/// Collect the targets the control sample applies to. Must run before controls are separated
pub fn control_info(rows: &[(ExportRow, bool)], control_name: &str) -> ControlInfo {
    let name = control_name.to_lowercase();
    let targets = rows
        .iter()
        .filter(|(r, _)| r.sample.to_lowercase() == name)
        .map(|(r, _)| r.target.clone())
        .collect();
    ControlInfo { name, targets }
}

pub fn is_real_sample(sample: &str) -> bool {
    sample_name().is_match(&sample.to_lowercase())
}

/// Split into (samples, controls). Controls are sorted by (target, sample)
pub fn separate_controls(rows: Vec<(ExportRow, bool)>) -> (Vec<(ExportRow, bool)>, Vec<(ExportRow, bool)>) {
    let (samples, mut controls): (Vec<_>, Vec<_>) =
        rows.into_iter().partition(|(r, _)| is_real_sample(&r.sample));
    controls.sort_by(|(a, _), (b, _)| (&a.target, &a.sample).cmp(&(&b.target, &b.sample)));
    (samples, controls)
}

/// Assay type and canonical name of a target
pub fn classify_assay(assays: &AssayTable, target: &str) -> (AssayType, String) {
    if let Some(info) = assays.get(target) {
        return (info.assay_type.clone(), info.name.clone());
    }
    let lower = target.to_lowercase();
    if lower.contains("_wt") || lower.contains("_ce") {
        (AssayType::LoA, target.to_string())
    } else {
        (AssayType::Unknown, target.to_string())
    }
}

/// RQ with zeros filled in where the control shows an undetermined CT is a real zero
pub fn zero_filled_rq(row: &ExportRow, omitted_endo: bool, control: &ControlInfo) -> Option<f64> {
    if omitted_endo {
        None
    } else if row.ct.is_undetermined() {
        if control.applies_to(&row.target) {
            Some(0.0)
        } else {
            None
        }
    } else {
        row.rq
    }
}

pub fn is_transgene(assay_name: &str) -> bool {
    assay_name.to_lowercase().contains("_tg")
}

/// First underscore separated token of the file name, upper-cased
pub fn plate_barcode(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.split('_').next().unwrap_or_default().to_uppercase()
}

/// Run the full classification on a parsed export
pub fn transform(export: &ExportFile, refs: &References) -> ExportTable {
    let cleaned = endo_cleanup(&export.rows, &export.metadata.endogenous_control);
    let control = control_info(&cleaned, &export.metadata.control_sample);
    let (samples, controls) = separate_controls(cleaned);

    let mut samples: Vec<(ExportRow, bool, AssayType, String)> = samples
        .into_iter()
        .map(|(row, omitted_endo)| {
            let (assay_type, assay_name) = classify_assay(&refs.assays, &row.target);
            (row, omitted_endo, assay_type, assay_name)
        })
        .collect();
    // Must happen before formulas, which reference the final row numbers
    samples.sort_by(|a, b| {
        (a.2.as_str(), &a.0.target, &a.0.sample).cmp(&(b.2.as_str(), &b.0.target, &b.0.sample))
    });

    let samples = samples
        .into_iter()
        .enumerate()
        .map(|(idx, (row, omitted_endo, assay_type, assay_name))| {
            let sheet_row = idx as u32 + FIRST_DATA_ROW;
            let annotation = SampleAnnotation {
                assay_type,
                het_control: control.is_het() && control.applies_to(&row.target),
                transgene: is_transgene(&assay_name),
                assay_name,
                sheet_row,
                formulas: refs.formulas.instantiate(sheet_row),
            };
            ClassifiedRow {
                rq: zero_filled_rq(&row, omitted_endo, &control),
                row,
                omitted_endo,
                annotation: Some(annotation),
            }
        })
        .collect();

    let controls = controls
        .into_iter()
        .map(|(row, omitted_endo)| ClassifiedRow {
            rq: zero_filled_rq(&row, omitted_endo, &control),
            row,
            omitted_endo,
            annotation: None,
        })
        .collect();

    ExportTable {
        plate_barcode: plate_barcode(&export.path),
        samples,
        controls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export_file::fixtures::{export_text, scenario_rows};
    use crate::export_file::Ct;

    fn references() -> References {
        let assays = AssayTable::from_reader(
            "Variant\tType\tAssay\ngene2_mut\tqPCR\tGene2_TG\nzz_other\tLoA\tzz_other\ngene4_cnv\tddPCR\tgene4\n".as_bytes(),
        )
        .unwrap();
        References {
            assays,
            formulas: FormulaSet::from_formulas("=F3", "=K3", "=Q3"),
        }
    }

    fn row(well: &str, sample: &str, target: &str, ct: Ct, omitted: bool) -> ExportRow {
        ExportRow {
            well: well.to_string(),
            omitted,
            sample: sample.to_string(),
            target: target.to_string(),
            reporter: String::from("FAM"),
            rq: Some(1.0),
            ct,
            delta_ct: None,
            delta_delta_ct: None,
        }
    }

    #[test]
    fn test_scenario() {
        let text = export_text("actb", "control_het", &scenario_rows(), '\t');
        let export =
            ExportFile::parse(Path::new("PMG0012345_Export_20190801.txt"), &text).unwrap();
        let table = transform(&export, &references());

        assert_eq!(table.plate_barcode, "PMG0012345");
        assert_eq!(table.samples.len(), 1);
        assert_eq!(table.controls.len(), 1);

        let sample = &table.samples[0];
        assert_eq!(sample.row.well, "A1");
        assert_eq!(sample.row.sample, "pmgb11.2a");
        let annotation = sample.annotation.as_ref().unwrap();
        assert_eq!(annotation.assay_type, AssayType::LoA);
        assert_eq!(annotation.sheet_row, 2);
        assert_eq!(annotation.formulas.genotype, "=F2");
        assert!(annotation.het_control);
        assert_eq!(sample.rq, Some(1.2));

        let control = &table.controls[0];
        assert_eq!(control.row.well, "A2");
        assert!(control.annotation.is_none());
        assert!(!control.omitted_endo);
        // Undetermined on a target the control applies to is a real zero
        assert_eq!(control.rq, Some(0.0));
        assert!(table.rows().all(|r| r.row.target != "actb"));
    }

    #[test]
    fn test_endo_omitted_flag_follows_the_well() {
        let rows = vec![
            row("A1", "pmgb1.1a", "gene1_wt", Ct::Value(20.0), false),
            row("A1", "pmgb1.1a", "ACTB", Ct::Value(20.0), true),
            row("B1", "pmgb1.2a", "gene1_wt", Ct::Value(20.0), false),
            row("B1", "pmgb1.2a", "actb", Ct::Value(20.0), false),
            row("C1", "pmgb1.3a", "gene1_wt", Ct::Value(20.0), false),
        ];
        let cleaned = endo_cleanup(&rows, "actb");
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].0.well, "A1");
        assert!(cleaned[0].1);
        assert_eq!(cleaned[1].0.well, "B1");
        assert!(!cleaned[1].1);
    }

    #[test]
    fn test_control_partition_is_total_and_disjoint() {
        let names = ["pmgb11.2a", "M02983000", "NTC", "control_het", "abc1.1b", "ab1.1b"];
        let rows: Vec<(ExportRow, bool)> = names
            .iter()
            .map(|n| (row("A1", n, "t", Ct::Value(1.0), false), false))
            .collect();
        let (samples, controls) = separate_controls(rows);
        assert_eq!(samples.len() + controls.len(), names.len());
        for (r, _) in samples.iter() {
            assert!(is_real_sample(&r.sample));
        }
        for (r, _) in controls.iter() {
            assert!(!is_real_sample(&r.sample));
        }
        let control_names: Vec<&str> = controls.iter().map(|(r, _)| r.sample.as_str()).collect();
        assert_eq!(control_names, vec!["NTC", "ab1.1b", "control_het"]);
    }

    #[test]
    fn test_assay_classification() {
        let refs = references();
        assert_eq!(
            classify_assay(&refs.assays, "GENE2_MUT"),
            (AssayType::QPcr, String::from("Gene2_TG"))
        );
        assert_eq!(classify_assay(&refs.assays, "abc_CE").0, AssayType::LoA);
        assert_eq!(
            classify_assay(&refs.assays, "mystery"),
            (AssayType::Unknown, String::from("mystery"))
        );
        assert_eq!(
            classify_assay(&refs.assays, "gene4_cnv"),
            (AssayType::Other(String::from("ddPCR")), String::from("gene4"))
        );
        assert!(is_transgene("Gene2_TG"));
        assert!(!is_transgene("gene2_wt"));
    }

    #[test]
    fn test_rq_zero_fill() {
        let mut control = ControlInfo {
            name: String::from("wt_control"),
            ..Default::default()
        };
        control.targets.insert(String::from("gene1_wt"));

        let undetermined = row("A1", "pmgb1.1a", "gene1_wt", Ct::Undetermined, false);
        assert_eq!(zero_filled_rq(&undetermined, false, &control), Some(0.0));
        assert_eq!(zero_filled_rq(&undetermined, true, &control), None);

        let other = row("A1", "pmgb1.1a", "gene9_wt", Ct::Undetermined, false);
        assert_eq!(zero_filled_rq(&other, false, &control), None);

        let detected = row("A1", "pmgb1.1a", "gene9_wt", Ct::Value(30.0), false);
        assert_eq!(zero_filled_rq(&detected, false, &control), Some(1.0));
        assert!(!control.is_het());
    }

    #[test]
    fn test_samples_sorted_before_row_numbers() {
        let export = ExportFile {
            path: Path::new("plate_run.txt").to_path_buf(),
            metadata: crate::export_file::RunMetadata {
                endogenous_control: String::from("actb"),
                control_sample: String::from("ntc"),
            },
            rows: vec![
                row("A1", "pmgb2.1a", "zz_wt", Ct::Value(20.0), false),
                row("A1", "pmgb2.1a", "actb", Ct::Value(20.0), false),
                row("A2", "pmgb1.1a", "gene2_mut", Ct::Value(20.0), false),
                row("A2", "pmgb1.1a", "actb", Ct::Value(20.0), false),
                row("A3", "pmgb3.1a", "odd", Ct::Value(20.0), false),
                row("A3", "pmgb3.1a", "actb", Ct::Value(20.0), false),
            ],
        };
        let table = transform(&export, &references());
        let order: Vec<(&str, u32)> = table
            .samples
            .iter()
            .map(|r| {
                let a = r.annotation.as_ref().unwrap();
                (r.row.target.as_str(), a.sheet_row)
            })
            .collect();
        // LoA < Unknown < qPCR
        assert_eq!(order, vec![("zz_wt", 2), ("odd", 3), ("gene2_mut", 4)]);
        assert!(table.samples[2].annotation.as_ref().unwrap().transgene);
        assert_eq!(table.plate_barcode, "PLATE");
    }
}

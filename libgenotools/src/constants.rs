// Export file layout

/// Columns every export body must carry (names as printed by the instrument, trimmed)
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "Well", "Omitted", "Sample", "Target", "Reporter", "RQ", "Cт", "ΔCт", "ΔΔCт",
];

/// (header offset in non-blank lines, delimiter) combinations, tried in order
pub const HEADER_CANDIDATES: [(usize, u8); 4] = [(14, b'\t'), (15, b'\t'), (14, b','), (15, b',')];

/// Absolute line holding `Endogenous Control = <name>`
pub const ENDO_CONTROL_LINE: usize = 4;
/// Absolute line holding `Reference Sample = <name>`
pub const CONTROL_SAMPLE_LINE: usize = 12;

pub const UNDETERMINED: &str = "Undetermined";

/// A real sample is a mouse or blast id such as `pmgb11.2a` or `m02983000`
pub const SAMPLE_NAME_PATTERN: &str = r"[a-z]{3,4}\d{1,3}\.\d{1,2}[a-z]|m\d{8}";

// Workbook layout

pub const OUTPUT_COLUMNS: [&str; 25] = [
    "Well",
    "Omitted",
    "Sample",
    "Target",
    "Reporter",
    "RQ",
    "Cт",
    "ΔCт",
    "ΔΔCт",
    "Mouse",
    "Genotype",
    "Allele",
    "Locked",
    "Plate Barcode",
    "Assay Type",
    "Assay Name",
    "Result",
    "Confirmed",
    "Comment",
    "Name",
    "Compare",
    "Gender",
    "Het Control?",
    "X-Linked?",
    "Omitted_endo",
];

/// Zero based index of the Genotype column (K)
pub const GENOTYPE_COLUMN: u16 = 10;

/// (column, width) pairs; these columns are also centred
pub const COLUMN_WIDTHS: [(u16, f64); 11] = [
    (0, 5.0),    // A
    (2, 11.0),   // C
    (9, 11.0),   // J
    (10, 9.14),  // K
    (13, 12.57), // N
    (14, 10.0),  // O
    (15, 18.0),  // P
    (17, 10.0),  // R
    (18, 15.14), // S
    (22, 11.43), // W
    (24, 13.43), // Y
];

pub const MAX_SHEET_NAME_LEN: usize = 31;

pub const DEFAULT_KNOWN_USERS: [&str; 7] = ["jb40", "db11", "es16", "sa24", "dg4", "er1", "db7"];

// Formula reference workbook

pub const FORMULA_SHEET: &str = "Sheet1";
/// Zero based (row, col) of the genotype, result and confirmation formulas (K2, Q2, R2)
pub const GENOTYPE_FORMULA_CELL: (u32, u32) = (1, 10);
pub const RESULT_FORMULA_CELL: (u32, u32) = (1, 16);
pub const CONFIRMED_FORMULA_CELL: (u32, u32) = (1, 17);

/// First data row of a written sheet, in 1-based spreadsheet numbering
pub const FIRST_DATA_ROW: u32 = 2;

// Watching

pub const RECENT_EVENTS_CAPACITY: usize = 30;
pub const MIN_EDS_SIZE_BYTES: u64 = 1_300_000;

/// Setting a zero count again arms the counter "for all runs"
pub const ALWAYS_NOTIFY_COUNT: u32 = 1337;
/// Largest count that still means "notify on the Nth run"
pub const MAX_ARMED_COUNT: u32 = 9;

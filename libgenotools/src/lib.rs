//! # genotools
//!
//! genotools is a small utility for the genotyping lab, written in Rust. It watches the
//! folders the Qiaxcel and Viia7 instruments write to and tells you when runs finish, and
//! it turns Viia7 qPCR export files into xlsx workbooks with the genotype formulas and
//! conditional formatting already filled in.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, see the
//! [Rust docs](https://www.rust-lang.org/tools/install) to install the tool chain, then
//! use `cargo install --path ./genotools_cli` from the top level of the repository.
//!
//! ## Configuration
//!
//! Everything is read from a YAML file, passed with `-p/--path`. A template is written by
//! `genotools_cli -p config.yml new`. The format is as follows:
//!
//! ```yml
//! assay_table_path: /share/Genotyping/Assays.txt
//! formula_workbook_path: /share/Genotyping/Formulas.xlsx
//! qiaxcel_path: /share/Qiaxcel/Results
//! genotyping_path: /share/Genotyping
//! user: null
//! known_users: [...]
//! auto_export: true
//! recursive: false
//! eds_debounce_ms: 1000
//! export_debounce_ms: 300
//! min_eds_size_bytes: 1300000
//! reconnect_interval_secs: 10
//! tick_interval_secs: 30
//! retry:
//!   max_attempts: 2
//!   delay_ms: 4000
//! update_window: null
//! ```
//!
//! If `user` is null, the `USERNAME` or `USER` environment variable is used. Runs and
//! exports whose path contains your login are always announced.
//!
//! `update_window` takes a `start` and `end` in `dd.mm.YYYY HH:MM`. While the current time
//! is inside it the watcher shuts down, so the program can be updated on the share.
//!
//! ### Assay table
//!
//! A tab separated file with at least the columns `Variant`, `Type` and `Assay`. The
//! `Type` is `LoA` or `qPCR`. Other columns are ignored.
//!
//! ### Formula workbook
//!
//! An xlsx workbook whose `Sheet1` holds three formulas in `K2` (genotype), `Q2` (result)
//! and `R2` (confirmed). Their cell references are re-anchored for every row of an export.
//!
//! ## Watched folders
//!
//! ```text
//! {qiaxcel_path}                                  .xdrx files, Qiaxcel runs
//! {genotyping_path}/qPCR {YYYY}/Experiments/{Mon YYYY}     .eds files, Viia7 runs
//! {genotyping_path}/qPCR {YYYY}/Results Export/{Mon YYYY}  .txt exports
//! ```
//!
//! The current and previous month are watched, and the schedule moves on when the month
//! changes. Month folders may be spelled `Sep`, `September` or `Sept`; a missing current
//! month folder is created.
//!
//! ## Output
//!
//! Each export becomes `{export name}.xlsx` next to the export, with one sheet named after
//! the plate barcode, the export and the user. In multi export mode later exports are
//! added as new sheets of the first workbook. Adding to an existing workbook keeps its
//! values, formulas, number formats and column widths; a workbook with merged cells,
//! fonts, charts or the like is left alone and the export is reported as failed. The log
//! is written to `genotools.log`.
pub mod assay_table;
pub mod command;
pub mod config;
pub mod constants;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod export_file;
pub mod export_session;
pub mod formula;
pub mod message;
pub mod notifier;
pub mod process;
pub mod sheet_name;
pub mod transform;
pub mod watch_event;
pub mod watch_schedule;
pub mod watcher;
pub mod xlsx_package;
pub mod xlsx_writer;

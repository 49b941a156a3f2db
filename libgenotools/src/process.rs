use std::path::Path;

use super::config::RetryPolicy;
use super::error::ExportError;
use super::export_file::ExportFile;
use super::transform::{transform, References};
use super::xlsx_writer::{write_export, WrittenSheet};

/// Parse, transform and write one export file.
///
/// `users` are the user name tokens used when naming the sheet. If `destination` is given
/// the sheet is added to that workbook instead of one next to the input.
pub fn process_export(
    input: &Path,
    refs: &References,
    users: &[String],
    destination: Option<&Path>,
) -> Result<WrittenSheet, ExportError> {
    spdlog::info!("Processing export {}...", input.display());
    let export = ExportFile::read(input)?;
    let table = transform(&export, refs);
    spdlog::info!(
        "Export {} has {} samples and {} controls",
        input.display(),
        table.samples.len(),
        table.controls.len()
    );
    let written = write_export(input, &table, users, destination)?;
    Ok(written)
}

/// [`process_export`], attempted again after a pause if it fails in a way that might
/// clear up on its own (the share dropped out, the instrument was still writing)
pub fn process_export_with_retry(
    input: &Path,
    refs: &References,
    users: &[String],
    destination: Option<&Path>,
    policy: &RetryPolicy,
) -> Result<WrittenSheet, ExportError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match process_export(input, refs, users, destination) {
            Err(e) if e.is_transient() && attempt < attempts => {
                spdlog::warn!(
                    "Export of {} failed on attempt {} of {}: {}. Trying again in {} ms",
                    input.display(),
                    attempt,
                    attempts,
                    e,
                    policy.delay_ms
                );
                std::thread::sleep(policy.delay());
                attempt += 1;
            }
            result => return result,
        }
    }
}

use std::sync::OnceLock;

use regex::Regex;

use super::constants::MAX_SHEET_NAME_LEN;

fn plate_barcode() -> &'static Regex {
    static PLATE: OnceLock<Regex> = OnceLock::new();
    PLATE.get_or_init(|| Regex::new(r"(?i)^c0000\d{5}|^sl000\d{5}|^\d{5}").unwrap())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Plate barcode without its padding prefix, cut to 5 characters
fn short_barcode(barcode: &str) -> String {
    let lower = barcode.to_lowercase();
    let stripped = if lower.starts_with("sl000") || lower.starts_with("c0000") {
        &barcode[5..]
    } else {
        barcode
    };
    truncate(stripped, 5)
}

/// Replace characters Excel does not allow in sheet names
fn sanitize(name: &str) -> String {
    let mut clean: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c => c,
        })
        .collect();
    if clean.starts_with('\'') {
        clean.replace_range(0..1, "_");
    }
    if clean.ends_with('\'') {
        let end = clean.len();
        clean.replace_range(end - 1..end, "_");
    }
    if clean.is_empty() {
        clean = String::from("Sheet");
    }
    clean
}

/// Build a sheet name of at most 31 characters from an export file stem.
///
/// The stem is split on underscores into plate barcodes, user names and everything else.
/// If the rejoined name is too long, progressively lossier forms are tried.
pub fn sheet_name(stem: &str, users: &[String]) -> String {
    let mut tokens: Vec<&str> = stem.split('_').collect();
    if let Some(idx) = tokens.iter().position(|t| *t == "data") {
        tokens.remove(idx);
    }

    let mut plates: Vec<String> = Vec::new();
    let mut user: Vec<String> = Vec::new();
    let mut rest: Vec<String> = Vec::new();
    for token in tokens {
        if users.iter().any(|u| u.eq_ignore_ascii_case(token)) {
            user.push(token.to_string());
        } else if let Some(found) = plate_barcode().find(token) {
            plates.push(found.as_str().to_string());
        } else {
            rest.push(token.to_string());
        }
    }
    let plates_small: Vec<String> = plates.iter().map(|p| short_barcode(p)).collect();
    let first_small: Vec<String> = plates_small.iter().take(1).cloned().collect();

    let candidates = [
        [plates.as_slice(), rest.as_slice(), user.as_slice()].concat(),
        [plates_small.as_slice(), rest.as_slice(), user.as_slice()].concat(),
        [first_small.as_slice(), rest.as_slice(), user.as_slice()].concat(),
        [first_small.as_slice(), rest.as_slice()].concat(),
    ];
    let mut name = String::new();
    for parts in candidates.iter() {
        name = parts.join("_");
        if char_len(&name) < MAX_SHEET_NAME_LEN {
            break;
        }
    }
    if char_len(&name) >= MAX_SHEET_NAME_LEN {
        name = truncate(&name, MAX_SHEET_NAME_LEN);
    }
    sanitize(&name)
}

/// Resolve a collision with existing sheet names by appending 1, 2, ...
///
/// Excel compares sheet names case-insensitively, so we do too.
pub fn unique_sheet_name(base: &str, existing: &[String]) -> Option<String> {
    let taken = |name: &str| existing.iter().any(|e| e.to_lowercase() == name.to_lowercase());
    if !taken(base) {
        return Some(base.to_string());
    }
    for idx in 1..100 {
        let suffix = idx.to_string();
        let keep = MAX_SHEET_NAME_LEN - suffix.len();
        let candidate = format!("{}{}", truncate(base, keep), suffix);
        if !taken(&candidate) {
            return Some(candidate);
        }
    }
    None
}

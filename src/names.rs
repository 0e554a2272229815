//! Worker-name normalisation.
//!
//! Pool APIs disagree on how a worker is named: some report the bare suffix
//! (`worker001`), some the fully-qualified `account.worker001`, and operator
//! input occasionally carries invisible Unicode. Matching between a miner
//! row and a pool observation goes through the helpers here.

use unicode_normalization::UnicodeNormalization;

/// Zero-width characters that survive copy-paste from pool dashboards.
const ZERO_WIDTH: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

/// NFKC-normalise, drop zero-width joiners/spaces, trim ASCII whitespace.
pub fn clean(s: &str) -> String {
    s.nfkc()
        .filter(|c| !ZERO_WIDTH.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Prefix before the first `.`; empty when the name has no dot.
pub fn head(s: &str) -> String {
    let s = clean(s);
    match s.find('.') {
        Some(idx) => s[..idx].to_string(),
        None => String::new(),
    }
}

/// Suffix after the last `.`; the whole string when the name has no dot.
pub fn tail(s: &str) -> String {
    let s = clean(s);
    match s.rfind('.') {
        Some(idx) => s[idx + 1..].to_string(),
        None => s,
    }
}

/// Lowercased [`tail`] with leading zeros folded away, so `001`, `01` and
/// `1` compare equal. A literal `"0"` is preserved.
pub fn tail_key(s: &str) -> String {
    let t = tail(s).to_lowercase();
    let stripped = t.trim_start_matches('0');
    if stripped.is_empty() && !t.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

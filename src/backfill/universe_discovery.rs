// =============================================================================
// Brute-force alphabet universe
// =============================================================================
//
// All uppercase A-Z strings of length 1..4 (475,254 candidates), unioned with
// a reference CSV of length->=5 symbols, used by discovery to probe for
// symbols not yet known to the system.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::thread_rng;

const ALPHABET: [char; 26] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U',
    'V', 'W', 'X', 'Y', 'Z',
];

/// Every uppercase string of length 1..=4 over A-Z, in lexicographic order.
pub fn brute_force_alphabet_universe() -> Vec<String> {
    let mut out = Vec::with_capacity(26 + 26 * 26 + 26 * 26 * 26 + 26 * 26 * 26 * 26);
    for len in 1..=4 {
        generate_length(len, &mut String::new(), &mut out);
    }
    out
}

fn generate_length(remaining: usize, prefix: &mut String, out: &mut Vec<String>) {
    if remaining == 0 {
        out.push(prefix.clone());
        return;
    }
    for c in ALPHABET {
        prefix.push(c);
        generate_length(remaining - 1, prefix, out);
        prefix.pop();
    }
}

/// Read a reference CSV's first column as length->=5 symbols, ignoring
/// shorter entries (those are already covered by the brute-force set).
pub fn read_long_symbols(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(symbol) = record.get(0) {
            let symbol = symbol.trim().to_uppercase();
            if symbol.len() >= 5 {
                out.push(symbol);
            }
        }
    }
    Ok(out)
}

/// Build the full discovery candidate set: brute-force alphabet union the
/// reference long-symbol list, shuffled.
pub fn shuffled_discovery_candidates(reference_long_symbols_path: &Path) -> Result<Vec<String>> {
    let mut candidates = brute_force_alphabet_universe();
    candidates.extend(read_long_symbols(reference_long_symbols_path)?);
    candidates.shuffle(&mut thread_rng());
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brute_force_universe_has_expected_count() {
        let universe = brute_force_alphabet_universe();
        assert_eq!(universe.len(), 26 + 676 + 17_576 + 456_976);
        assert_eq!(universe.len(), 475_254);
    }

    #[test]
    fn brute_force_universe_is_lexicographic_and_all_uppercase() {
        let universe = brute_force_alphabet_universe();
        assert_eq!(universe[0], "A");
        assert!(universe.iter().all(|s| s.chars().all(|c| c.is_ascii_uppercase())));
        for window in universe.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn read_long_symbols_filters_short_entries() {
        let dir = std::env::temp_dir().join(format!("jupitor-longsym-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("long-symbols.csv");
        std::fs::write(&path, "symbol\nAAPL\nGOOGL\nabcde\n").unwrap();

        let symbols = read_long_symbols(&path).unwrap();
        assert!(symbols.contains(&"GOOGL".to_string()));
        assert!(symbols.contains(&"ABCDE".to_string()));
        assert!(!symbols.iter().any(|s| s == "SYMBOL"));
        std::fs::remove_dir_all(&dir).ok();
    }
}

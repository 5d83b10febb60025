//! Resolves the scan watchlist from the first non-empty source, tried in order:
//! `scan.symbols` (config.yaml) → `watchlist` (config.yaml) → `watchlist.txt`.

use std::path::Path;

pub fn resolve(
    scan_symbols: Option<&[String]>,
    watchlist_key: Option<&[String]>,
    watchlist_txt_path: &Path,
) -> Vec<String> {
    if let Some(symbols) = scan_symbols
        && !symbols.is_empty()
    {
        return dedupe_uppercase(symbols);
    }
    if let Some(symbols) = watchlist_key
        && !symbols.is_empty()
    {
        return dedupe_uppercase(symbols);
    }
    if let Ok(contents) = std::fs::read_to_string(watchlist_txt_path) {
        let lines: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        if !lines.is_empty() {
            return dedupe_uppercase(&lines);
        }
    }
    Vec::new()
}

fn dedupe_uppercase(symbols: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let upper = symbol.to_uppercase();
        if seen.insert(upper.clone()) {
            out.push(upper);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_symbols_wins_over_other_sources() {
        let resolved = resolve(
            Some(&["aapl".to_string(), "msft".to_string()]),
            Some(&["tsla".to_string()]),
            Path::new("/nonexistent/watchlist.txt"),
        );
        assert_eq!(resolved, vec!["AAPL".to_string(), "MSFT".to_string()]);
    }

    #[test]
    fn falls_back_to_watchlist_key_when_scan_symbols_absent() {
        let resolved = resolve(None, Some(&["tsla".to_string()]), Path::new("/nonexistent/watchlist.txt"));
        assert_eq!(resolved, vec!["TSLA".to_string()]);
    }

    #[test]
    fn duplicates_collapse_keeping_first_occurrence_order() {
        let resolved = resolve(Some(&["AAPL".to_string(), "aapl".to_string(), "MSFT".to_string()]), None, Path::new(""));
        assert_eq!(resolved, vec!["AAPL".to_string(), "MSFT".to_string()]);
    }

    #[test]
    fn watchlist_txt_skips_blank_and_comment_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchlist.txt");
        std::fs::write(&path, "# comment\naapl\n\nmsft\n").unwrap();
        let resolved = resolve(None, None, &path);
        assert_eq!(resolved, vec!["AAPL".to_string(), "MSFT".to_string()]);
    }
}

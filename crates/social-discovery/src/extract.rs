use agent_core::SentimentHint;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Candidate symbols from free text: 2-5 uppercase letters, with or without
/// a `$` prefix, filtered through the noise denylist.
pub fn extract_candidates(text: &str, denylist: &HashSet<String>) -> Vec<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"\$?\b([A-Z]{2,5})\b").expect("ticker regex"));

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for capture in re.captures_iter(text) {
        let symbol = capture[1].to_string();
        if denylist.contains(&symbol) {
            continue;
        }
        if seen.insert(symbol.clone()) {
            out.push(symbol);
        }
    }
    out
}

/// Count occurrences of one symbol (with or without `$`) in a text.
pub fn mention_count(text: &str, symbol: &str) -> u32 {
    let upper = text.to_uppercase();
    let mut count = 0u32;
    let mut from = 0usize;
    while let Some(pos) = upper[from..].find(symbol) {
        let absolute = from + pos;
        let before = upper[..absolute].chars().next_back();
        let after = upper[absolute + symbol.len()..].chars().next();
        let boundary_before = before.map(|c| !c.is_ascii_alphanumeric()).unwrap_or(true);
        let boundary_after = after.map(|c| !c.is_ascii_alphanumeric()).unwrap_or(true);
        if boundary_before && boundary_after {
            count += 1;
        }
        from = absolute + symbol.len();
    }
    count
}

/// Keyword-based sentiment hint for a discussion snippet.
pub fn sentiment_of(text: &str) -> SentimentHint {
    let lowered = text.to_lowercase();
    let bullish = ["calls", "moon", "bullish", "buy", "long", "undervalued", "breakout", "rip"];
    let bearish = ["puts", "bearish", "sell", "short", "overvalued", "crash", "dump", "tank"];

    let bull_hits: usize = bullish.iter().filter(|w| lowered.contains(*w)).count();
    let bear_hits: usize = bearish.iter().filter(|w| lowered.contains(*w)).count();

    if bull_hits > bear_hits {
        SentimentHint::Bullish
    } else if bear_hits > bull_hits {
        SentimentHint::Bearish
    } else {
        SentimentHint::Neutral
    }
}

/// Short context snippet around the first mention of a symbol.
pub fn context_snippet(text: &str, symbol: &str, radius: usize) -> Option<String> {
    let upper = text.to_uppercase();
    let pos = upper.find(&symbol.to_uppercase())?;
    let start = text[..pos]
        .char_indices()
        .rev()
        .nth(radius)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let end = text[pos..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| pos + i)
        .unwrap_or(text.len());
    Some(text[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denylist() -> HashSet<String> {
        ["DD", "YOLO", "CEO", "THE"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_dollar_and_bare_symbols() {
        let out = extract_candidates("Loaded up on $NVDA and PLTR after the DD", &denylist());
        assert_eq!(out, vec!["NVDA", "PLTR"]);
    }

    #[test]
    fn denylist_tokens_never_extracted() {
        let out = extract_candidates("THE CEO did a YOLO", &denylist());
        assert!(out.is_empty());
    }

    #[test]
    fn mention_count_respects_word_boundaries() {
        assert_eq!(mention_count("NVDA up. NVDA! NVDAX", "NVDA"), 2);
    }

    #[test]
    fn sentiment_keywords() {
        assert_eq!(sentiment_of("buying calls, this will moon"), SentimentHint::Bullish);
        assert_eq!(sentiment_of("puts printing, crash incoming"), SentimentHint::Bearish);
        assert_eq!(sentiment_of("earnings on tuesday"), SentimentHint::Neutral);
    }
}

//! Self-contained BM25 ranking over a small chunk set.
//!
//! Each query builds and discards its own ranker; chunk counts are tens to
//! low hundreds, so there is no persistent index. Selection is deterministic:
//! ties break on the lower chunk index.

use std::collections::HashMap;

const K1: f64 = 1.5;
const B: f64 = 0.75;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Rank `chunks` against `query`, returning up to `top_k` (index, score)
/// pairs, best first. Chunks that share no token with the query score 0 and
/// are excluded.
pub fn rank(query: &str, chunks: &[String], top_k: usize) -> Vec<(usize, f64)> {
    if chunks.is_empty() || top_k == 0 {
        return Vec::new();
    }

    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return Vec::new();
    }

    let tokenized: Vec<Vec<String>> = chunks.iter().map(|c| tokenize(c)).collect();
    let n = tokenized.len() as f64;
    let avg_len = tokenized.iter().map(Vec::len).sum::<usize>() as f64 / n;

    // Document frequency per query token
    let mut doc_freq: HashMap<&str, f64> = HashMap::new();
    for token in &query_tokens {
        let df = tokenized
            .iter()
            .filter(|doc| doc.iter().any(|t| t == token))
            .count() as f64;
        doc_freq.insert(token.as_str(), df);
    }

    let mut scores: Vec<(usize, f64)> = Vec::with_capacity(tokenized.len());
    for (index, doc) in tokenized.iter().enumerate() {
        let doc_len = doc.len() as f64;
        let mut term_counts: HashMap<&str, f64> = HashMap::new();
        for t in doc {
            *term_counts.entry(t.as_str()).or_insert(0.0) += 1.0;
        }

        let mut score = 0.0;
        for token in &query_tokens {
            let tf = term_counts.get(token.as_str()).copied().unwrap_or(0.0);
            if tf == 0.0 {
                continue;
            }
            let df = doc_freq[token.as_str()];
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let denom = tf + K1 * (1.0 - B + B * doc_len / avg_len.max(1.0));
            score += idf * tf * (K1 + 1.0) / denom;
        }
        if score > 0.0 {
            scores.push((index, score));
        }
    }

    // Stable sort keeps equal-score chunks in index order.
    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scores.truncate(top_k);
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn relevant_chunk_ranks_first() {
        let docs = chunks(&[
            "the weather today is sunny and warm",
            "earnings grew 40 percent on data center demand",
            "the cat sat on the mat",
        ]);
        let ranked = rank("what drove earnings growth", &docs, 3);
        assert_eq!(ranked[0].0, 1);
    }

    #[test]
    fn no_overlap_means_no_results() {
        let docs = chunks(&["alpha beta", "gamma delta"]);
        assert!(rank("zeta", &docs, 3).is_empty());
    }

    #[test]
    fn ranking_is_deterministic() {
        let docs = chunks(&["revenue up", "revenue up", "revenue down"]);
        let a = rank("revenue", &docs, 3);
        let b = rank("revenue", &docs, 3);
        assert_eq!(a, b);
        // Equal scores keep index order
        assert_eq!(a[0].0, 0);
        assert_eq!(a[1].0, 1);
    }

    #[test]
    fn top_k_truncates() {
        let docs = chunks(&["x y", "x z", "x w", "x v"]);
        assert_eq!(rank("x", &docs, 3).len(), 3);
    }

    #[test]
    fn punctuation_and_case_are_normalized() {
        let docs = chunks(&["NVIDIA's margin expanded."]);
        let ranked = rank("nvidia margin", &docs, 1);
        assert_eq!(ranked.len(), 1);
    }
}

//! Case-insensitive fuzzy matching used for ranking catalog candidates.

/// Similarity of `query` to the best-matching stretch of `target`, in [0, 1].
///
/// Both sides are lowercased and `-`, `_`, `.`, `/` are treated as spaces.
/// The result is the better of the spaced and the space-free comparison, so
/// `phi3` matches `Phi-3.5-mini` as well as `phi 3` does.
pub fn similarity(query: &str, target: &str) -> f32 {
    let query = normalize(query);
    let target = normalize(target);
    if query.is_empty() || target.is_empty() {
        return 0.0;
    }

    let spaced = partial_ratio(&query, &target);
    let compact = partial_ratio(&query.replace(' ', ""), &target.replace(' ', ""));
    spaced.max(compact)
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if matches!(c, '-' | '_' | '.' | '/') { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Best normalized edit similarity between the shorter string and every
/// window of the same length in the longer one.
fn partial_ratio(a: &str, b: &str) -> f32 {
    let (short, long) = if a.chars().count() <= b.chars().count() { (a, b) } else { (b, a) };
    let m = short.chars().count();
    if m == 0 {
        return 0.0;
    }

    let long: Vec<char> = long.chars().collect();
    let mut best = 0.0f64;
    for window in long.windows(m) {
        let window: String = window.iter().collect();
        best = best.max(strsim::normalized_levenshtein(short, &window));
        if best >= 1.0 {
            break;
        }
    }
    best as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_substring_scores_one() {
        assert_eq!(similarity("llama 3", "Meta-Llama-3.1-8B-Instruct"), 1.0);
        assert_eq!(similarity("phi3", "Phi-3.5-mini-instruct"), 1.0);
    }

    #[test]
    fn typos_score_between_zero_and_one() {
        let score = similarity("mistrel", "Mistral-7B-Instruct-v0.3");
        assert!(score > 0.7 && score < 1.0, "{score}");
    }

    #[test]
    fn unrelated_names_score_low() {
        assert!(similarity("qwen", "Codestral-22B-v0.1") < 0.6);
    }

    #[test]
    fn empty_input_scores_zero() {
        assert_eq!(similarity("", "anything"), 0.0);
        assert_eq!(similarity("---", "anything"), 0.0);
    }

    #[test]
    fn partial_ratio_scores_the_closest_window() {
        // best window of "sitting" is "sittin", two edits from "kitten"
        assert!((partial_ratio("kitten", "sitting") - 4.0 / 6.0).abs() < 1e-6);
        assert_eq!(partial_ratio("mini", "phi 3 mini instruct"), 1.0);
        assert_eq!(partial_ratio("ab", "ab"), 1.0);
    }
}

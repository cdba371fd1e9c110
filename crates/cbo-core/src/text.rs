//! Tokenization helpers shared by ranking, gap detection and claim linking.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "me", "more", "most", "my",
    "no", "not", "of", "on", "or", "our", "she", "should", "so", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "those", "to", "was", "were", "what",
    "when", "where", "which", "who", "whom", "whose", "why", "will", "with", "would", "you",
    "your",
];

fn quoted_phrase_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]{2,})""#).expect("valid regex"))
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// Lowercased alphanumeric words, in input order.
pub fn words(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| word.to_lowercase())
        .collect()
}

/// Strips a handful of English inflections so that "founded" and "founder" meet at "found".
pub fn stem(word: &str) -> String {
    let mut current = word.to_string();
    // Two passes so plural agent nouns ("founders") reduce as far as the verb ("founded").
    for _ in 0..2 {
        match strip_inflection(&current) {
            Some(root) => current = root,
            None => break,
        }
    }
    current
}

fn strip_inflection(word: &str) -> Option<String> {
    for suffix in ["ing", "ed", "er", "es", "s"] {
        if let Some(root) = word.strip_suffix(suffix) {
            if root.chars().count() >= 4 {
                return Some(root.to_string());
            }
        }
    }
    None
}

/// Ranking terms: stemmed, stop-word free, at least three characters, first occurrence order.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut terms = Vec::new();
    for word in words(text) {
        if word.chars().count() < 3 || is_stop_word(&word) {
            continue;
        }
        let stemmed = stem(&word);
        if seen.insert(stemmed.clone()) {
            terms.push(stemmed);
        }
    }
    terms
}

pub fn term_set(text: &str) -> BTreeSet<String> {
    query_terms(text).into_iter().collect()
}

/// Literal lookup terms: every non-stop word longer than two characters plus quoted phrases.
pub fn literal_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for phrase in quoted_phrases(text) {
        if !terms.contains(&phrase) {
            terms.push(phrase);
        }
    }
    for word in words(text) {
        if word.chars().count() > 2 && !is_stop_word(&word) && !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

pub fn quoted_phrases(text: &str) -> Vec<String> {
    quoted_phrase_regex()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_lowercase())
        .filter(|phrase| !phrase.is_empty())
        .collect()
}

/// Evidence-overlap tokens: lowercase alphanumeric runs of four or more characters.
pub fn overlap_tokens(text: &str) -> BTreeSet<String> {
    words(text)
        .into_iter()
        .filter(|word| word.chars().count() >= 4)
        .collect()
}

pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if matches!(ch, '\n' | '.' | '!' | '?') {
            push_trimmed(&mut sentences, &current);
            current.clear();
        } else {
            current.push(ch);
        }
    }
    push_trimmed(&mut sentences, &current);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, candidate: &str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect()
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_words_are_sorted_for_binary_search() {
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS);
    }

    #[test]
    fn query_terms_stem_and_drop_stop_words() {
        assert_eq!(query_terms("Who founded the company?"), vec!["found", "company"]);
        assert_eq!(query_terms("founder founders"), vec!["found"]);
    }

    #[test]
    fn literal_terms_keep_quoted_phrases_first() {
        let terms = literal_terms("Where is the \"Iron Gate\" located?");
        assert_eq!(terms[0], "iron gate");
        assert!(terms.contains(&"located".to_string()));
        assert!(!terms.contains(&"the".to_string()));
    }

    #[test]
    fn sentences_split_on_terminators_and_newlines() {
        let sentences = split_sentences("Jane founded Acme. She left!\n\nWhy?  ");
        assert_eq!(sentences, vec!["Jane founded Acme", "She left", "Why"]);
        assert!(split_sentences("  \n . ").is_empty());
    }

    #[test]
    fn overlap_tokens_require_four_characters() {
        let tokens = overlap_tokens("Jane ran the Acme lab in 1999");
        assert!(tokens.contains("jane"));
        assert!(tokens.contains("acme"));
        assert!(tokens.contains("1999"));
        assert!(!tokens.contains("lab"));
    }
}

//! Capability providers: deterministic offline ones and an external command bridge.

mod chapter_text;
mod command;
mod lexical;

pub use chapter_text::ChapterTextExtractor;
pub use command::CommandCapability;
pub use lexical::{LexicalReasoner, UNANSWERED};

/// Strips list, quote and heading markers plus a trailing `(Source: ...)` from a line.
fn clean_line(line: &str) -> &str {
    let trimmed = line
        .trim()
        .trim_start_matches(['-', '+', '>', '#'])
        .trim_start();
    let trimmed = match trimmed.strip_prefix("**Claim**:") {
        Some(rest) => rest.trim(),
        None => trimmed.strip_prefix("* ").unwrap_or(trimmed).trim(),
    };
    match trimmed.find("(Source:") {
        Some(index) => trimmed[..index].trim_end(),
        None => trimmed,
    }
}

/// Sentences of a markdown body, cleaned of markup, in document order.
fn body_sentences(body: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    for line in body.lines() {
        let line = clean_line(line);
        if line.is_empty() {
            continue;
        }
        for sentence in cbo_core::text::split_sentences(line) {
            let sentence = cbo_core::text::normalize_whitespace(&sentence);
            if !sentence.is_empty() && !sentences.contains(&sentence) {
                sentences.push(sentence);
            }
        }
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_lose_markup_and_source_suffix() {
        assert_eq!(clean_line("- Jane founded Acme."), "Jane founded Acme.");
        assert_eq!(
            clean_line("> Jane founded Acme in 1999. (Source: chapter_4)"),
            "Jane founded Acme in 1999."
        );
        assert_eq!(clean_line("**Claim**: Acme is old"), "Acme is old");
        assert_eq!(clean_line("## Related"), "Related");
    }

    #[test]
    fn body_sentences_are_deduplicated() {
        let body = "- Jane founded Acme.\n\n> Jane founded Acme. (Source: ch1)\nShe left in 2004!";
        assert_eq!(
            body_sentences(body),
            vec!["Jane founded Acme".to_string(), "She left in 2004".to_string()]
        );
    }
}

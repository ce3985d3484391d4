use regex::Regex;
use std::sync::OnceLock;

static ANNOTATIONS: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn annotations() -> Option<&'static Regex> {
    ANNOTATIONS
        .get_or_init(|| Regex::new(r"\[.*?\]|\{.*?\}|\(.*?\)"))
        .as_ref()
        .ok()
}

/// Collapses stuttered words and strips bracketed annotations such as
/// `[BLANK_AUDIO]` or `(music)`.
pub fn post_process_transcription(text: &str) -> String {
    let mut deduped_words: Vec<&str> = Vec::new();
    for word in text.split_whitespace() {
        if deduped_words.last() != Some(&word) {
            deduped_words.push(word);
        }
    }
    let deduped = deduped_words.join(" ");

    let stripped = match annotations() {
        Some(re) => re.replace_all(&deduped, "").into_owned(),
        None => deduped,
    };
    let cleaned = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    tracing::debug!("Post-processed: '{}' -> '{}'", text.trim(), cleaned);

    cleaned
}

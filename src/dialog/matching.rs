//! Text normalization, echo detection and yes/no classification.

/// Normalized candidates shorter than this are never treated as a prompt fragment.
const MIN_ECHO_FRAGMENT: usize = 6;

/// Phrases the dialog itself speaks while confirming (already normalized).
const CONFIRMATION_TEMPLATES: &[&str] = &["yesorno", "sayyes", "isthiscorrect"];

const AFFIRMATIVE: &[&str] = &["yes", "correct", "yeah", "yep"];
const NEGATIVE: &[&str] = &["no", "nope", "nah", "wrong"];

/// Classification of a reply while confirming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Reply {
    Affirmative,
    Negative,
    Ambiguous,
}

/// Lowercase and strip everything that is not alphanumeric.
pub(super) fn normalize(text: &str) -> String {
    text.chars().filter(|c| c.is_alphanumeric()).flat_map(char::to_lowercase).collect()
}

/// Whether `candidate` is the assistant hearing its own `prompt` (or a confirmation request).
pub(super) fn is_echo(candidate: &str, prompt: &str) -> bool {
    let candidate = normalize(candidate);
    let prompt = normalize(prompt);

    if candidate.is_empty() {
        return true;
    }
    if !prompt.is_empty() && candidate.contains(&prompt) {
        return true;
    }
    if candidate.chars().count() >= MIN_ECHO_FRAGMENT && prompt.contains(&candidate) {
        return true;
    }
    CONFIRMATION_TEMPLATES.iter().any(|t| candidate.contains(t))
}

/// Strict yes/no matching: the whole normalized reply must be a known token.
pub(super) fn classify(text: &str) -> Reply {
    let reply = normalize(text);
    if AFFIRMATIVE.contains(&reply.as_str()) {
        Reply::Affirmative
    } else if NEGATIVE.contains(&reply.as_str()) {
        Reply::Negative
    } else {
        Reply::Ambiguous
    }
}

/// Spell digits one by one so numbers are read back as individual digits.
pub(super) fn spell_digits(text: &str) -> String {
    let mut tokens: Vec<String> = Vec::new();
    let mut word = String::new();

    for c in text.chars() {
        if c.is_ascii_digit() {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() {
            word.push(c);
        } else if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }

    tokens.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("What is your full name?"), "whatisyourfullname");
        assert_eq!(normalize("  555-0199 "), "5550199");
    }

    #[test]
    fn test_echo_of_prompt() {
        let prompt = "What is your full name?";
        assert!(is_echo("What is your full name", prompt));
        assert!(is_echo("what is your full name? John", prompt));
        assert!(is_echo("your full name", prompt));
        assert!(!is_echo("John Smith", prompt));
        // Short fragments are real answers, not echoes
        assert!(!is_echo("Name", "What is your full name?"));
    }

    #[test]
    fn test_echo_of_confirmation_request() {
        assert!(is_echo("Is this correct? Say yes or no.", "How old are you?"));
        assert!(is_echo("Please say just Yes or No.", "How old are you?"));
        assert!(!is_echo("yes", "How old are you?"));
    }

    #[test]
    fn test_blank_candidate_is_discarded() {
        assert!(is_echo(" ... ", "How old are you?"));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("Yes."), Reply::Affirmative);
        assert_eq!(classify("yep!"), Reply::Affirmative);
        assert_eq!(classify("Correct"), Reply::Affirmative);
        assert_eq!(classify("Nope"), Reply::Negative);
        assert_eq!(classify("wrong"), Reply::Negative);
        assert_eq!(classify("yes please"), Reply::Ambiguous);
        assert_eq!(classify("maybe"), Reply::Ambiguous);
    }

    #[test]
    fn test_spell_digits() {
        assert_eq!(spell_digits("555-0199"), "5 5 5 0 1 9 9");
        assert_eq!(spell_digits("call 42"), "call 4 2");
        assert_eq!(spell_digits("John Smith"), "John Smith");
    }
}

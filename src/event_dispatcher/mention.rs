//! Case-insensitive, word-boundary `@user` mention detection.

use regex::Regex;
use std::sync::OnceLock;

use crate::domain_types::MentionUser;

fn mention_pattern(user: &str) -> Regex {
    let escaped = regex::escape(user);
    Regex::new(&format!(r"(?i)(?:^|[^\w@]|\b)@{escaped}(?:[^\w]|$)")).expect("mention pattern is always valid regex")
}

/// Returns whether `body` mentions `user` with `@user`, case-insensitively,
/// respecting word boundaries so `@alice2` does not match a search for
/// `alice`.
#[must_use]
pub fn contains_mention(body: &str, user: &MentionUser) -> bool {
    mention_pattern(user.as_ref()).is_match(body)
}

fn work_mode_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\bfix (this|the|that)\b",
            r"(?i)\bimplement (this|that)\b",
            r"(?i)\bplease (fix|implement|add|create|update|refactor)\b",
            r"(?i)\b(create|open) a pr\b",
            r"(?i)\bmake (this|the|these) change",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("work-mode pattern is always valid regex"))
        .collect()
    })
}

/// Whether `body` expresses a code-change intent, selecting the work-task
/// dispatch path over a plain conversational session.
#[must_use]
pub fn is_work_mode(body: &str) -> bool {
    work_mode_patterns().iter().any(|p| p.is_match(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> MentionUser {
        MentionUser::try_new(name.to_string()).unwrap()
    }

    #[test]
    fn matches_case_insensitively() {
        assert!(contains_mention("hey @Bot please help", &user("bot")));
    }

    #[test]
    fn respects_word_boundary() {
        assert!(!contains_mention("hey @bot2 please help", &user("bot")));
        assert!(contains_mention("hey @bot, please help", &user("bot")));
        assert!(contains_mention("@bot", &user("bot")));
    }

    #[test]
    fn work_mode_detects_fix_intent() {
        assert!(is_work_mode("@bot please fix the login bug"));
        assert!(is_work_mode("can you implement this feature"));
        assert!(!is_work_mode("what does this function do?"));
    }
}

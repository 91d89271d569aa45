//! Canned health questions offered next to the chat input.

/// Questions recommended for every member.
pub const RECOMMENDED_QUESTIONS: [&str; 3] = [
    "Are there any drug interactions I should be aware of?",
    "Is there any prescriptions I should be particularly concerned about if added to my list?",
    "Are there any medical symptoms I should monitor for when taking my prescriptions?",
];

/// Additional research-oriented questions.
pub const OPTIONAL_QUESTIONS: [&str; 3] = [
    "Could you display the two most influential medical articles for me?",
    "Can you provide summaries of both articles, limited to 150 words each?",
    "Are there any clinical trials which would interest me?",
];

/// All suggestions, recommended first.
pub fn all() -> impl Iterator<Item = &'static str> {
    RECOMMENDED_QUESTIONS
        .into_iter()
        .chain(OPTIONAL_QUESTIONS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_lists_recommended_first() {
        let questions: Vec<&str> = all().collect();
        assert_eq!(questions.len(), 6);
        assert_eq!(questions[0], RECOMMENDED_QUESTIONS[0]);
        assert_eq!(questions[5], OPTIONAL_QUESTIONS[2]);
        assert!(questions.iter().all(|q| q.ends_with('?')));
    }
}

pub fn answer_prompt(answer: &str, question: &str) -> String {
    format!(
        "Based on web search results, answer the following: \"{answer}\". The original question was: \"{question}\""
    )
}

pub fn snippets_prompt(snippets: &str, question: &str) -> String {
    format!(
        "Based on web search results, here are some relevant snippets: \"{snippets}\". The original question was: \"{question}\""
    )
}

//! Prompt composition for triggered agent sessions and work tasks.

const INSTRUCTIONS_BLOCK: &str = "\n\n---\n\
**Instructions:**\n\
- Reply to this thread using the chat CLI so the mentioner sees your response.\n\
- If this requires a code change, invoke the work-task creation tool rather than editing files directly in this session.\n\
- Always leave a reply, even if only to say the request could not be completed.";

/// Context extracted from one webhook payload, used to render a prompt.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    /// The `owner/name` repository slug.
    pub repo: &'a str,
    /// The issue or pull-request number.
    pub number: u64,
    /// The issue or pull-request title.
    pub title: &'a str,
    /// The comment or issue author's handle.
    pub author: &'a str,
    /// A link back to the originating issue/PR/comment.
    pub html_url: &'a str,
    /// The raw mention body (comment or issue body).
    pub body: &'a str,
    /// Labels present on the issue, if any (only populated for `issues`).
    pub labels: &'a [String],
}

/// Renders the prompt for a triggered `session` (conversational) dispatch.
#[must_use]
pub fn render_session_prompt(ctx: &PromptContext<'_>) -> String {
    format!(
        "**Repository:** {repo}\n\
         **Issue/PR:** #{number} — {title}\n\
         **Author:** {author}\n\
         **URL:** {html_url}\n\n\
         > {body}\n{instructions}",
        repo = ctx.repo,
        number = ctx.number,
        title = ctx.title,
        author = ctx.author,
        html_url = ctx.html_url,
        body = ctx.body.replace('\n', "\n> "),
        instructions = INSTRUCTIONS_BLOCK,
    )
}

/// Renders the prompt for a triggered `work_task` (code-change) dispatch.
#[must_use]
pub fn render_work_task_prompt(ctx: &PromptContext<'_>) -> String {
    let labels = if ctx.labels.is_empty() {
        String::new()
    } else {
        format!("\n**Labels:** {}", ctx.labels.join(", "))
    };

    format!(
        "**Repository:** {repo}\n\
         **Issue/PR:** #{number} — {title}\n\
         **Author:** {author}\n\
         **URL:** {html_url}{labels}\n\n\
         > {body}\n{instructions}",
        repo = ctx.repo,
        number = ctx.number,
        title = ctx.title,
        author = ctx.author,
        html_url = ctx.html_url,
        body = ctx.body.replace('\n', "\n> "),
        instructions = INSTRUCTIONS_BLOCK,
    )
}

/// The short description recorded on a created work task: a fixed prefix
/// followed by up to the first line of the mention body.
#[must_use]
pub fn work_task_description(body: &str) -> String {
    let first_line = body.lines().next().unwrap_or("").trim();
    format!("GitHub webhook: {first_line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(body: &'a str) -> PromptContext<'a> {
        PromptContext {
            repo: "acme/widgets",
            number: 42,
            title: "Widget is broken",
            author: "alice",
            html_url: "https://example.com/acme/widgets/issues/42",
            body,
            labels: &[],
        }
    }

    #[test]
    fn session_prompt_contains_repository_header_and_body() {
        let rendered = render_session_prompt(&ctx("what does this do?"));
        assert!(rendered.contains("**Repository:**"));
        assert!(rendered.contains("what does this do?"));
        assert!(rendered.contains("invoke the work-task creation tool"));
    }

    #[test]
    fn work_task_description_takes_first_line() {
        let description = work_task_description("please fix the login bug\nmore detail here");
        assert_eq!(description, "GitHub webhook: please fix the login bug");
    }
}

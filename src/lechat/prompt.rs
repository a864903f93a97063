//! System prompt assembly for chat turns.

use crate::config::RouteKnowledgeMode;
use crate::lechat::chat::PageContext;
use crate::lechat::preferences::Preferences;

/// Phrases that suggest the reader wants to find or move to a page.
const NAVIGATION_INTENT: &[&str] = &[
    "navigate",
    "go to",
    "goto",
    "take me",
    "bring me",
    "open",
    "where",
    "link",
    "page",
    "find",
    "show me",
    "jump to",
    "redirect",
    "section",
    "docs for",
    "documentation for",
];

/// Everything the system prompt can mention.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub site_name: &'a str,
    pub page: Option<&'a PageContext>,
    /// Pinned context page as `(path, title)`.
    pub context_page: Option<(&'a str, Option<&'a str>)>,
    pub preferences: Preferences,
    /// Route listing, when it should be included for this turn.
    pub route_knowledge: Option<&'a str>,
}

/// Whether route knowledge belongs in this turn's prompt.
pub fn wants_route_knowledge(
    mode: RouteKnowledgeMode,
    latest_user_message: &str,
    has_context_page: bool,
) -> bool {
    match mode {
        RouteKnowledgeMode::Always => true,
        RouteKnowledgeMode::Never => false,
        RouteKnowledgeMode::Auto => {
            if has_context_page {
                return true;
            }
            let lower = latest_user_message.to_lowercase();
            NAVIGATION_INTENT.iter().any(|phrase| lower.contains(phrase))
        }
    }
}

pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
    let site = ctx.site_name;
    let mut prompt = format!(
        "You are LeChat, a helpful AI assistant for the {site} documentation.\n\n\
         IMPORTANT: Only answer questions about the {site} documentation. If the user asks \
         about topics not related to the documentation, politely remind them that you can \
         only help with documentation-related questions.\n\n\
         Be concise, helpful, and reference specific parts of the documentation when \
         relevant. If you're not sure about something, suggest the user check the official \
         documentation."
    );

    if let Some(page) = ctx.page {
        prompt.push_str(&format!(
            "\n\nThe user is currently reading the page titled \"{}\" ({}).",
            page.title, page.url
        ));
    }

    if let Some((path, title)) = ctx.context_page {
        let label = title.unwrap_or(path);
        prompt.push_str(&format!(
            "\n\nThe user selected \"{label}\" ({path}) as the context for this conversation. \
             Ground your answers in that page where possible."
        ));
    }

    prompt.push_str(
        "\n\n**Directives:**\n\
         Put each directive on its own line at the very end of your reply, never inside code blocks:\n\
         - NAVIGATE: /exact-route (move the user to a page)\n\
         - SET_CONTEXT: /exact-route (when the user asks to use a page as context for following questions)\n\
         - SET_PREFERENCE: alwaysNavigate=true or alwaysNavigate=false (when the user asks you to always, or no longer, navigate automatically)",
    );

    if ctx.preferences.always_navigate {
        prompt.push_str(
            "\n\n**Navigation:** The user enabled automatic navigation. When they ask to go to, \
             open, or see a page, end your reply with \"NAVIGATE: /exact-route\" right away.",
        );
    } else {
        prompt.push_str(
            "\n\n**Navigation:** The user has not enabled automatic navigation. When they ask to \
             go to a page, name it with a Markdown link and ask whether they want to go there. \
             Only emit \"NAVIGATE: /exact-route\" once they confirm or explicitly tell you to \
             navigate.",
        );
    }
    prompt.push_str(
        " Otherwise use standard Markdown links like \"[Page Name](/exact-route)\" in your text.",
    );

    match ctx.route_knowledge {
        Some(knowledge) => {
            prompt.push_str("\n\n");
            prompt.push_str(knowledge);
        }
        None => prompt.push_str(
            "\n\nOnly link to documentation routes you are certain exist. Never invent URLs.",
        ),
    }

    prompt
}

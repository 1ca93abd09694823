//! Page composition for the chat application.
//!
//! The application region served at `/` is a single static tree: a theme
//! provider wrapping a notification overlay and the chat window. The chat
//! window is configured with exactly two strings — a display title and the
//! input placeholder. Nothing in this module carries state; rendering the
//! page any number of times produces identical output.

/// Display title for the chat window.
pub const TITLE_TEXT: &str = "CHMC chatbot 🏙";

/// Placeholder text for the chat input field.
pub const PLACEHOLDER: &str = "What the housing need in British Columbia?";

/// The application region: theme provider wrapping the notification overlay
/// and the chat window, in that order.
#[must_use]
pub fn page_root() -> String {
    format!(
        r#"<theme-provider>
    <toast-overlay></toast-overlay>
    <chat-window title-text="{TITLE_TEXT}" placeholder="{PLACEHOLDER}"></chat-window>
</theme-provider>"#
    )
}

/// Generate the HTML shell for the application.
fn html_shell(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="description" content="Chat over CMHC housing reports">
    <title>{title}</title>

    <!-- Web component bundle (local) -->
    <script type="module" src="/static/main.js"></script>
    <link rel="stylesheet" href="/static/app.css">
</head>
<body class="min-h-screen bg-background text-textPrimary antialiased">
    <main id="app" class="flex-1 container mx-auto px-4 py-4 max-w-5xl">
        {content}
    </main>
</body>
</html>"#
    )
}

/// The full index page served at `/`.
#[must_use]
pub fn index_page() -> String {
    html_shell(TITLE_TEXT, &page_root())
}

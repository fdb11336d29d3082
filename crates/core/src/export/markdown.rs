//! Markdown to HTML with the extensions generated documents rely on.

use pulldown_cmark::{html, Options, Parser};

/// Render markdown to an HTML fragment. Tables and strikethrough are on.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Escape text for use inside HTML element content or attributes
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // Writing into a String cannot fail
    let _ = pulldown_cmark_escape::escape_html(&mut out, text);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_render() {
        let html = render_markdown("| Name | Moat |\n|---|---|\n| Globex | Data |\n");
        assert!(html.contains("<table>"));
        assert!(html.contains("<th>Name</th>"));
        assert!(html.contains("<td>Globex</td>"));
    }

    #[test]
    fn test_headings_and_strikethrough() {
        let html = render_markdown("## Goals\n\n~~old~~ new");
        assert!(html.contains("<h2>Goals</h2>"));
        assert!(html.contains("<del>old</del>"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape_html("<R&D \"team\">"), "&lt;R&amp;D &quot;team&quot;&gt;");
    }
}

//! DOM reduction for prompts.

use scraper::{ElementRef, Html};

/// Elements dropped before anything else looks at the page.
const NOISE: [&str; 2] = ["script", "svg"];

fn parse_without_noise(html: &str) -> Html {
    let mut document = Html::parse_document(html);
    let noisy: Vec<_> = document
        .tree
        .nodes()
        .filter(|node| {
            node.value()
                .as_element()
                .is_some_and(|el| NOISE.contains(&el.name()))
        })
        .map(|node| node.id())
        .collect();
    for id in noisy {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
    document
}

/// Remove `<script>` and `<svg>` elements from raw HTML.
pub fn strip_noise(html: &str) -> String {
    parse_without_noise(html).html()
}

/// Link-only form of a page: every `<a>` element on its own line, with
/// scripts and inline SVG removed and whitespace collapsed.
///
/// Anchors with neither an `href` nor any text are skipped.
pub fn links_only(html: &str) -> String {
    let document = parse_without_noise(html);
    document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "a")
        .filter(|el| {
            el.value().attr("href").is_some() || el.text().any(|t| !t.trim().is_empty())
        })
        .map(|el| el.html().split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate on a char boundary, appending a marker when anything was cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => format!(
            "{}\n... [truncated, {} total chars]",
            &text[..cut],
            text.chars().count()
        ),
    }
}

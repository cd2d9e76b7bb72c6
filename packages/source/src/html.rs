//! Small helpers on top of [`scraper`] for HTML extractors.
//!
//! [`scraper::Html`] is not `Send`, so extractors parse documents inside
//! synchronous functions and only hand plain values back to async code.

use scraper::node::Node;
use scraper::{ElementRef, Selector};

use crate::SourceError;

/// Compiles a CSS selector.
///
/// # Panics
///
/// Panics if `css` is not a valid selector. Only used with literals.
#[must_use]
pub fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector '{css}': {e}"))
}

/// Concatenated text content of an element, trimmed.
#[must_use]
pub fn text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Text content with `<br>` turned into line breaks. Every line is
/// trimmed and empty lines are dropped.
#[must_use]
pub fn text_lines(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(text) => raw.push_str(text),
            Node::Element(e) if e.name() == "br" => raw.push('\n'),
            _ => {}
        }
    }

    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// First element matching `selector` below `element`.
///
/// # Errors
///
/// Returns [`SourceError::Extraction`] naming `what` if nothing matches.
pub fn select_first<'a>(
    element: ElementRef<'a>,
    selector: &Selector,
    what: &str,
) -> Result<ElementRef<'a>, SourceError> {
    element
        .select(selector)
        .next()
        .ok_or_else(|| SourceError::extraction(format!("missing {what}")))
}

/// Direct element children named `tag`.
#[must_use]
pub fn child_elements<'a>(element: ElementRef<'a>, tag: &str) -> Vec<ElementRef<'a>> {
    element
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name() == tag)
        .collect()
}

/// Whether the element carries CSS class `class`.
#[must_use]
pub fn has_class(element: ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

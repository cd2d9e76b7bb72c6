//! Namespace-agnostic lookups on [`roxmltree`] documents.
//!
//! Feeds such as DATEX II wrap everything in namespaces and are not
//! consistent about tag case, so elements are matched by case-insensitive
//! local name.

use roxmltree::{Document, Node};

use crate::SourceError;

/// Parses an XML document.
///
/// # Errors
///
/// Returns [`SourceError::Extraction`] if `text` is not well-formed XML.
pub fn parse(text: &str) -> Result<Document<'_>, SourceError> {
    Document::parse(text).map_err(|e| SourceError::extraction(format!("invalid XML: {e}")))
}

/// Whether `node` is an element with local name `name`.
#[must_use]
pub fn is_named(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name().eq_ignore_ascii_case(name)
}

/// Direct element children named `name`.
pub fn children<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children().filter(move |child| is_named(*child, name))
}

/// Descendant elements named `name`, excluding `node` itself.
pub fn descendants<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.descendants()
        .skip(1)
        .filter(move |child| is_named(*child, name))
}

/// First descendant element named `name`, excluding `node` itself.
#[must_use]
pub fn find<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.descendants().skip(1).find(|child| is_named(*child, name))
}

/// Trimmed text of the first descendant named `name`.
#[must_use]
pub fn find_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    find(node, name).and_then(|n| n.text()).map(str::trim)
}

/// Value of attribute `name` (matched by local name).
#[must_use]
pub fn attribute<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attributes()
        .find(|attr| attr.name().eq_ignore_ascii_case(name))
        .map(|attr| attr.value())
}

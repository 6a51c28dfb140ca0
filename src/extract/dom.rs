//! Tree-walking helpers over a parsed [`scraper::Html`] document.
//!
//! Lookups by tag or class go through static [`scraper::Selector`]s at the
//! call sites. What is left here are the walks selectors cannot express:
//! visible text in document order and bounded ancestor climbing.

use scraper::ElementRef;

use crate::utils::clean;

/// Elements whose text content is never user-visible page text.
const NON_TEXT_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// `root` followed by every element below it, in document order.
pub fn self_and_descendants<'a>(root: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    root.descendants().filter_map(ElementRef::wrap)
}

/// Visible text nodes under `root`, lazily and in document order.
///
/// Text inside a script, style, noscript or template element below `root`
/// is skipped.
pub fn text_nodes<'a>(root: ElementRef<'a>) -> impl Iterator<Item = &'a str> {
    root.descendants().filter_map(move |node| {
        let text = node.value().as_text()?;
        let hidden = node
            .ancestors()
            .take_while(|a| a.id() != root.id())
            .filter_map(|a| a.value().as_element())
            .any(|el| NON_TEXT_ELEMENTS.contains(&el.name()));
        (!hidden).then_some(&**text)
    })
}

/// Normalized text content of `el`.
pub fn element_text(el: ElementRef<'_>) -> String {
    clean(&text_nodes(el).collect::<String>())
}

/// Text of `el` split into lines, one per text node and embedded line break.
pub fn text_lines(el: ElementRef<'_>) -> Vec<&str> {
    text_nodes(el)
        .flat_map(|chunk| chunk.split(is_line_break))
        .collect()
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\u{0b}' | '\u{0c}' | '\u{1c}' | '\u{1d}' | '\u{1e}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Compare the normalized text of `el` to `expected` ignoring ASCII case,
/// bailing out as soon as the text grows past the expected length.
pub fn text_equals_ignore_case(el: ElementRef<'_>, expected: &str) -> bool {
    let limit = expected.len();
    let mut normalized = String::with_capacity(limit + 1);
    let mut pending_space = false;

    for chunk in text_nodes(el) {
        for c in chunk.chars() {
            if c.is_whitespace() {
                pending_space = !normalized.is_empty();
                continue;
            }
            if pending_space {
                normalized.push(' ');
                pending_space = false;
            }
            normalized.push(c);
            if normalized.len() > limit {
                return false;
            }
        }
    }
    normalized.eq_ignore_ascii_case(expected)
}

/// The element ancestors of `start`, nearest first, at most `max_hops` of them.
///
/// Stops early at the document's root element.
pub fn ancestors_within<'a>(
    start: ElementRef<'a>,
    max_hops: usize,
) -> impl Iterator<Item = ElementRef<'a>> {
    start.ancestors().filter_map(ElementRef::wrap).take(max_hops)
}

/// Nearest ancestor within `max_hops` for which `pred(element, hop)` holds.
pub fn nearest_ancestor<'a, P>(start: ElementRef<'a>, max_hops: usize, mut pred: P) -> Option<ElementRef<'a>>
where
    P: FnMut(ElementRef<'a>, usize) -> bool,
{
    ancestors_within(start, max_hops)
        .enumerate()
        .find(|(i, el)| pred(*el, i + 1))
        .map(|(_, el)| el)
}

/// Ascend exactly `hops` levels, or as far as the root element allows.
pub fn climb<'a>(start: ElementRef<'a>, hops: usize) -> ElementRef<'a> {
    nearest_ancestor(start, hops, |_, hop| hop == hops)
        .or_else(|| ancestors_within(start, hops).last())
        .unwrap_or(start)
}

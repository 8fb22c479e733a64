//! Synchronous DOM engine behind the `html` import namespace
//!
//! A parsed document owns its node arena (`ego_tree` inside `scraper`);
//! node descriptors elsewhere carry the document's rid plus arena indices,
//! so upward references never need shared ownership.

use crate::abi::HtmlError;
use ego_tree::{NodeId, Tree};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Post-filter re-applied after stripping historical wildcard idioms from
/// a selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrFilter {
    None,
    /// `[*]`: the element must carry at least one attribute.
    HasAny,
    /// `:not([*])`: the element must carry no attributes.
    HasNone,
}

/// Rewrite the two wildcard idioms the native selector engine does not
/// understand, returning the cleaned selector and the filter to re-apply.
fn preprocess_selector(selector: &str) -> (String, AttrFilter) {
    let (cleaned, filter) = if selector.contains(":not([*])") {
        (selector.replace(":not([*])", ""), AttrFilter::HasNone)
    } else if selector.contains("[*]") {
        (selector.replace("[*]", ""), AttrFilter::HasAny)
    } else {
        (selector.to_string(), AttrFilter::None)
    };
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        ("*".to_string(), filter)
    } else {
        (cleaned, filter)
    }
}

fn attr_filter_matches(filter: AttrFilter, element: &ElementRef<'_>) -> bool {
    match filter {
        AttrFilter::None => true,
        AttrFilter::HasAny => element.value().attrs().next().is_some(),
        AttrFilter::HasNone => element.value().attrs().next().is_none(),
    }
}

/// A parsed HTML document and its base URI
#[derive(Debug, Clone)]
pub struct HtmlDocument {
    html: Html,
    base_url: Option<Url>,
}

impl HtmlDocument {
    pub fn parse(text: &str, base_url: Option<&str>) -> Self {
        Self {
            html: Html::parse_document(text),
            base_url: base_url.and_then(|u| Url::parse(u).ok()),
        }
    }

    pub fn parse_fragment(text: &str, base_url: Option<&str>) -> Self {
        Self {
            html: Html::parse_fragment(text),
            base_url: base_url.and_then(|u| Url::parse(u).ok()),
        }
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// The root scope for document-level selects.
    pub fn root_nodes(&self) -> Vec<NodeId> {
        root_element_id(&self.html).map(|id| vec![id]).unwrap_or_default()
    }

    fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    /// CSS selection over a node scope, in document order, deduplicated.
    pub fn select(&self, scope: &[NodeId], selector: &str) -> Result<Vec<NodeId>, HtmlError> {
        let (cleaned, filter) = preprocess_selector(selector);
        let compiled = Selector::parse(&cleaned).map_err(|_| HtmlError::InvalidQuery)?;

        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for &root in scope {
            let Some(element) = self.element(root) else {
                continue;
            };
            if compiled.matches(&element) && attr_filter_matches(filter, &element) {
                if seen.insert(element.id()) {
                    out.push(element.id());
                }
            }
            for matched in element.select(&compiled) {
                if attr_filter_matches(filter, &matched) && seen.insert(matched.id()) {
                    out.push(matched.id());
                }
            }
        }
        Ok(out)
    }

    /// Attribute of the first node carrying it. The `abs:` prefix resolves
    /// the value against the document's base URI.
    pub fn attr(&self, scope: &[NodeId], name: &str) -> Option<String> {
        let (name, absolute) = match name.strip_prefix("abs:") {
            Some(rest) => (rest, true),
            None => (name, false),
        };
        let raw = scope.iter().find_map(|&id| {
            self.element(id)
                .and_then(|e| e.value().attr(name))
                .map(str::to_string)
        })?;
        if !absolute {
            return Some(raw);
        }
        match self.base_url.as_ref() {
            Some(base) => base.join(&raw).map(|u| u.to_string()).ok().or(Some(raw)),
            None => Some(raw),
        }
    }

    /// Whitespace-normalized text of the scope.
    pub fn text(&self, scope: &[NodeId]) -> String {
        let raw = self.untrimmed_text(scope);
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn untrimmed_text(&self, scope: &[NodeId]) -> String {
        let mut out = String::new();
        for &id in scope {
            if let Some(element) = self.element(id) {
                for chunk in element.text() {
                    out.push_str(chunk);
                }
            }
        }
        out
    }

    /// Text of direct child text nodes only, normalized.
    pub fn own_text(&self, scope: &[NodeId]) -> String {
        let mut out = String::new();
        for &id in scope {
            let Some(node) = self.html.tree.get(id) else {
                continue;
            };
            for child in node.children() {
                if let Node::Text(text) = child.value() {
                    out.push_str(text);
                }
            }
        }
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Combined raw data of script/style/comment children.
    pub fn data(&self, scope: &[NodeId]) -> String {
        let mut out = String::new();
        for &id in scope {
            let Some(node) = self.html.tree.get(id) else {
                continue;
            };
            for child in node.descendants() {
                match child.value() {
                    Node::Text(text) => out.push_str(text),
                    Node::Comment(comment) => out.push_str(comment),
                    _ => {}
                }
            }
        }
        out
    }

    pub fn inner_html(&self, scope: &[NodeId]) -> String {
        scope
            .iter()
            .filter_map(|&id| self.element(id).map(|e| e.inner_html()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn outer_html(&self, scope: &[NodeId]) -> String {
        scope
            .iter()
            .filter_map(|&id| self.element(id).map(|e| e.html()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn parent(&self, scope: &[NodeId]) -> Vec<NodeId> {
        let mut out = Vec::new();
        for &id in scope {
            if let Some(parent) = self
                .html
                .tree
                .get(id)
                .and_then(|n| n.parent())
                .and_then(|p| ElementRef::wrap(p))
            {
                out.push(parent.id());
            }
        }
        out
    }

    /// Child elements, in order.
    pub fn children(&self, scope: &[NodeId]) -> Vec<NodeId> {
        let mut out = Vec::new();
        for &id in scope {
            if let Some(node) = self.html.tree.get(id) {
                out.extend(node.children().filter_map(|c| ElementRef::wrap(c)).map(|e| e.id()));
            }
        }
        out
    }

    /// Sibling elements, excluding the node itself.
    pub fn siblings(&self, scope: &[NodeId]) -> Vec<NodeId> {
        let mut out = Vec::new();
        for &id in scope {
            let Some(node) = self.html.tree.get(id) else {
                continue;
            };
            let Some(parent) = node.parent() else {
                continue;
            };
            out.extend(
                parent
                    .children()
                    .filter(|c| c.id() != id)
                    .filter_map(|c| ElementRef::wrap(c))
                    .map(|e| e.id()),
            );
        }
        out
    }

    pub fn next_sibling(&self, scope: &[NodeId]) -> Vec<NodeId> {
        scope
            .iter()
            .filter_map(|&id| {
                let mut sibling = self.html.tree.get(id)?.next_sibling();
                while let Some(node) = sibling {
                    if let Some(element) = ElementRef::wrap(node) {
                        return Some(element.id());
                    }
                    sibling = node.next_sibling();
                }
                None
            })
            .collect()
    }

    pub fn prev_sibling(&self, scope: &[NodeId]) -> Vec<NodeId> {
        scope
            .iter()
            .filter_map(|&id| {
                let mut sibling = self.html.tree.get(id)?.prev_sibling();
                while let Some(node) = sibling {
                    if let Some(element) = ElementRef::wrap(node) {
                        return Some(element.id());
                    }
                    sibling = node.prev_sibling();
                }
                None
            })
            .collect()
    }

    pub fn tag_name(&self, scope: &[NodeId]) -> Option<String> {
        let element = self.element(*scope.first()?)?;
        Some(element.value().name().to_string())
    }

    pub fn class_name(&self, scope: &[NodeId]) -> Option<String> {
        let element = self.element(*scope.first()?)?;
        Some(element.value().attr("class").unwrap_or_default().to_string())
    }

    pub fn id_attr(&self, scope: &[NodeId]) -> Option<String> {
        let element = self.element(*scope.first()?)?;
        Some(element.value().attr("id").unwrap_or_default().to_string())
    }

    /// Whether any node in the scope carries the class.
    pub fn has_class(&self, scope: &[NodeId], class: &str) -> bool {
        scope.iter().any(|&id| {
            self.element(id).is_some_and(|e| {
                e.value()
                    .attr("class")
                    .is_some_and(|c| c.split_whitespace().any(|part| part == class))
            })
        })
    }

    pub fn has_attr(&self, scope: &[NodeId], name: &str) -> bool {
        scope
            .iter()
            .any(|&id| self.element(id).is_some_and(|e| e.value().attr(name).is_some()))
    }

    // Mutation. New content is parsed as a fragment and deep-copied into
    // this document's arena.

    pub fn set_html(&mut self, scope: &[NodeId], html: &str) {
        let fragment = Html::parse_fragment(html);
        for &id in scope {
            detach_children(&mut self.html.tree, id);
            append_fragment(&mut self.html.tree, id, &fragment, false);
        }
    }

    pub fn set_text(&mut self, scope: &[NodeId], text: &str) {
        self.set_html(scope, &escape_text(text));
    }

    pub fn append(&mut self, scope: &[NodeId], html: &str) {
        let fragment = Html::parse_fragment(html);
        for &id in scope {
            append_fragment(&mut self.html.tree, id, &fragment, false);
        }
    }

    pub fn prepend(&mut self, scope: &[NodeId], html: &str) {
        let fragment = Html::parse_fragment(html);
        for &id in scope {
            append_fragment(&mut self.html.tree, id, &fragment, true);
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn detach_children(tree: &mut Tree<Node>, id: NodeId) {
    loop {
        let child = match tree.get(id) {
            Some(node) => node.first_child().map(|c| c.id()),
            None => None,
        };
        match child {
            Some(child_id) => {
                if let Some(mut node) = tree.get_mut(child_id) {
                    node.detach();
                }
            }
            None => break,
        }
    }
}

fn root_element_id(html: &Html) -> Option<NodeId> {
    html.tree
        .root()
        .children()
        .find_map(|c| ElementRef::wrap(c).map(|e| e.id()))
}

/// Copy the fragment's content (the children of its synthetic root
/// element) under `target`.
fn append_fragment(tree: &mut Tree<Node>, target: NodeId, fragment: &Html, prepend: bool) {
    let Some(root_id) = root_element_id(fragment) else {
        return;
    };
    let Some(root) = fragment.tree.get(root_id) else {
        return;
    };
    let children: Vec<NodeId> = root.children().map(|c| c.id()).collect();
    if prepend {
        for &child in children.iter().rev() {
            deep_copy(tree, target, &fragment.tree, child, true);
        }
    } else {
        for &child in &children {
            deep_copy(tree, target, &fragment.tree, child, false);
        }
    }
}

fn deep_copy(
    tree: &mut Tree<Node>,
    parent: NodeId,
    src_tree: &Tree<Node>,
    src_id: NodeId,
    prepend: bool,
) {
    let Some(src) = src_tree.get(src_id) else {
        return;
    };
    let value = src.value().clone();
    let new_id = {
        let Some(mut parent_mut) = tree.get_mut(parent) else {
            return;
        };
        if prepend {
            parent_mut.prepend(value).id()
        } else {
            parent_mut.append(value).id()
        }
    };
    for child in src.children() {
        deep_copy(tree, new_id, src_tree, child.id(), false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
            <div id="list" class="wide main">
                <a href="/one" class="entry">First</a>
                <a href="/two" class="entry" data-x="1">Second</a>
            </div>
            <p>Some <b>bold</b> text</p>
        </body></html>
    "#;

    fn doc() -> HtmlDocument {
        HtmlDocument::parse(PAGE, Some("https://example.com/base/"))
    }

    #[test]
    fn test_select_and_text() {
        let doc = doc();
        let root = doc.root_nodes();
        let entries = doc.select(&root, "a.entry").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(doc.text(&entries[..1]), "First");
        assert_eq!(doc.text(&entries), "First Second");
    }

    #[test]
    fn test_select_invalid_query() {
        let doc = doc();
        let root = doc.root_nodes();
        assert_eq!(doc.select(&root, "a[["), Err(HtmlError::InvalidQuery));
    }

    #[test]
    fn test_abs_attr_resolution() {
        let doc = doc();
        let root = doc.root_nodes();
        let entries = doc.select(&root, "a").unwrap();
        assert_eq!(doc.attr(&entries, "href").as_deref(), Some("/one"));
        assert_eq!(
            doc.attr(&entries, "abs:href").as_deref(),
            Some("https://example.com/one")
        );
    }

    #[test]
    fn test_wildcard_attr_filters() {
        let doc = doc();
        let root = doc.root_nodes();
        // Only the second anchor has attributes beyond href/class... every
        // anchor has attributes, so [*] keeps both and :not([*]) drops both.
        let any = doc.select(&root, "a[*]").unwrap();
        assert_eq!(any.len(), 2);
        let none = doc.select(&root, "a:not([*])").unwrap();
        assert!(none.is_empty());
        // <b> carries no attributes.
        let bare = doc.select(&root, "b:not([*])").unwrap();
        assert_eq!(bare.len(), 1);
    }

    #[test]
    fn test_traversal() {
        let doc = doc();
        let root = doc.root_nodes();
        let list = doc.select(&root, "#list").unwrap();
        let children = doc.children(&list);
        assert_eq!(children.len(), 2);
        let next = doc.next_sibling(&children[..1]);
        assert_eq!(doc.text(&next), "Second");
        let parent = doc.parent(&children[..1]);
        assert_eq!(doc.id_attr(&parent).as_deref(), Some("list"));
    }

    #[test]
    fn test_identity_accessors() {
        let doc = doc();
        let root = doc.root_nodes();
        let list = doc.select(&root, "div").unwrap();
        assert_eq!(doc.tag_name(&list).as_deref(), Some("div"));
        assert_eq!(doc.class_name(&list).as_deref(), Some("wide main"));
        assert!(doc.has_class(&list, "main"));
        assert!(!doc.has_class(&list, "mai"));
        assert!(doc.has_attr(&list, "id"));
    }

    #[test]
    fn test_own_text_excludes_children() {
        let doc = doc();
        let root = doc.root_nodes();
        let p = doc.select(&root, "p").unwrap();
        assert_eq!(doc.text(&p), "Some bold text");
        assert_eq!(doc.own_text(&p), "Some text");
    }

    #[test]
    fn test_mutation_roundtrip() {
        let mut doc = doc();
        let root = doc.root_nodes();
        let p = doc.select(&root, "p").unwrap();
        doc.set_html(&p, "<i>new</i>");
        assert_eq!(doc.inner_html(&p), "<i>new</i>");
        doc.append(&p, "<u>tail</u>");
        doc.prepend(&p, "<s>head</s>");
        assert_eq!(doc.inner_html(&p), "<s>head</s><i>new</i><u>tail</u>");
        doc.set_text(&p, "a < b");
        assert_eq!(doc.text(&p), "a < b");
    }
}

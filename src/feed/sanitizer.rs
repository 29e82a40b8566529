//! Allow-list HTML sanitiser for entry content.
//!
//! Feed content is hostile input. The fragment is parsed with an HTML5
//! parser and re-serialised keeping only allow-listed tags, attributes,
//! CSS properties and URL schemes. Text is always escaped on output, so
//! there is no input the sanitiser rejects.

use std::collections::{HashMap, HashSet};

use scraper::{Html, Node};

use crate::config::SanitizerConfig;

/// Elements whose contents are dropped along with the element.
const DROP_WITH_CONTENT: &[&str] = &["script", "style", "template", "iframe", "object"];

/// Elements serialised without a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

/// Attributes holding a URL.
const URL_ATTRIBUTES: &[&str] = &["href", "src", "cite", "action", "longdesc", "poster"];

/// Attribute key applying to every tag.
const ANY_TAG: &str = "*";

/// Allow-lists applied by [`Sanitizer`].
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    pub tags: HashSet<String>,
    /// Allowed attributes per tag; `*` applies to all tags.
    pub attributes: HashMap<String, HashSet<String>>,
    pub styles: HashSet<String>,
    pub protocols: HashSet<String>,
}

impl AllowList {
    fn allows_attribute(&self, tag: &str, attr: &str) -> bool {
        [tag, ANY_TAG].iter().any(|key| {
            self.attributes
                .get(*key)
                .is_some_and(|names| names.contains(attr))
        })
    }
}

impl From<&SanitizerConfig> for AllowList {
    fn from(config: &SanitizerConfig) -> Self {
        let lower = |items: &[String]| -> HashSet<String> {
            items.iter().map(|s| s.trim().to_ascii_lowercase()).collect()
        };
        Self {
            tags: lower(&config.allowed_tags),
            attributes: config
                .allowed_attributes
                .iter()
                .map(|(tag, attrs)| (tag.trim().to_ascii_lowercase(), lower(attrs)))
                .collect(),
            styles: lower(&config.allowed_styles),
            protocols: lower(&config.allowed_protocols),
        }
    }
}

/// Cleans untrusted HTML fragments.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    allow: AllowList,
}

impl Sanitizer {
    /// Create a sanitiser with the given allow-lists.
    pub fn new(allow: AllowList) -> Self {
        Self { allow }
    }

    /// Create a sanitiser from configuration.
    pub fn from_config(config: &SanitizerConfig) -> Self {
        Self::new(AllowList::from(config))
    }

    /// Sanitise an HTML fragment.
    ///
    /// The tree is walked with an explicit stack, so nesting depth is only
    /// bounded by memory.
    pub fn clean(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }
        let fragment = Html::parse_fragment(raw);
        let mut out = String::with_capacity(raw.len());
        let mut stack = Vec::new();
        push_children(&mut stack, fragment.root_element().children());

        while let Some(step) = stack.pop() {
            let node = match step {
                Step::Visit(node) => node,
                Step::Close(name) => {
                    out.push_str("</");
                    out.push_str(name);
                    out.push('>');
                    continue;
                }
            };
            match node.value() {
                Node::Text(text) => push_escaped_text(&mut out, text),
                Node::Element(el) => {
                    let name = el.name();
                    if DROP_WITH_CONTENT.contains(&name) {
                        continue;
                    }
                    if !self.allow.tags.contains(name) {
                        // Strip the tag, keep what it wraps.
                        push_children(&mut stack, node.children());
                        continue;
                    }

                    let mut attrs: Vec<(&str, String)> = el
                        .attrs()
                        .filter_map(|(attr, value)| {
                            self.clean_attribute(name, attr, value).map(|v| (attr, v))
                        })
                        .collect();
                    attrs.sort_by(|a, b| a.0.cmp(b.0));

                    out.push('<');
                    out.push_str(name);
                    for (attr, value) in attrs {
                        out.push(' ');
                        out.push_str(attr);
                        out.push_str("=\"");
                        push_escaped_attr(&mut out, &value);
                        out.push('"');
                    }
                    out.push('>');

                    if VOID_ELEMENTS.contains(&name) {
                        continue;
                    }
                    stack.push(Step::Close(name));
                    push_children(&mut stack, node.children());
                }
                // Comments, doctypes and processing instructions are dropped.
                _ => {}
            }
        }
        out
    }

    /// Returns the value to keep for an attribute, or `None` to drop it.
    fn clean_attribute(&self, tag: &str, attr: &str, value: &str) -> Option<String> {
        if !self.allow.allows_attribute(tag, attr) {
            return None;
        }
        if attr == "style" {
            let style = self.clean_style(value);
            return (!style.is_empty()).then_some(style);
        }
        if URL_ATTRIBUTES.contains(&attr) && !self.allows_url(value) {
            return None;
        }
        Some(value.to_string())
    }

    fn clean_style(&self, style: &str) -> String {
        let mut kept = Vec::new();
        for declaration in style.split(';') {
            let Some((property, value)) = declaration.split_once(':') else {
                continue;
            };
            let property = property.trim().to_ascii_lowercase();
            let value = value.trim();
            if value.is_empty() || !self.allow.styles.contains(&property) {
                continue;
            }
            let lowered = value.to_ascii_lowercase();
            if lowered.contains("url(") || lowered.contains("expression(") {
                continue;
            }
            kept.push(format!("{property}: {value};"));
        }
        kept.join(" ")
    }

    /// Relative URLs are always allowed; absolute ones need an allowed scheme.
    fn allows_url(&self, value: &str) -> bool {
        // Browsers ignore whitespace and control characters inside schemes.
        let compact: String = value
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_control())
            .collect();
        match url_scheme(&compact) {
            Some(scheme) => self.allow.protocols.contains(&scheme.to_ascii_lowercase()),
            None => true,
        }
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::from_config(&SanitizerConfig::default())
    }
}

/// Pending work for the serialiser.
enum Step<'a, N> {
    Visit(N),
    Close(&'a str),
}

/// Queue `children` so that they pop in document order.
fn push_children<'a, N>(stack: &mut Vec<Step<'a, N>>, children: impl Iterator<Item = N>) {
    let start = stack.len();
    stack.extend(children.map(Step::Visit));
    stack[start..].reverse();
}

/// Scheme of an absolute URL, if any.
fn url_scheme(url: &str) -> Option<&str> {
    let end = url.find(|c: char| matches!(c, ':' | '/' | '?' | '#'))?;
    if !url[end..].starts_with(':') || end == 0 {
        return None;
    }
    let scheme = &url[..end];
    let valid = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

fn push_escaped_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn push_escaped_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

//! Owned XML tree with namespace-agnostic path queries.
//!
//! Every sensor family reads its metadata through this one type, whatever
//! the schema. Namespace prefixes are stripped while parsing so queries
//! use bare local names.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::str::FromStr;

use crate::types::{ProductError, ProductResult};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

#[derive(Debug)]
enum Predicate {
    Attr(String, String),
    ChildText(String, String),
}

#[derive(Debug)]
struct Step {
    name: String,
    descendant: bool,
    predicate: Option<Predicate>,
}

impl XmlElement {
    /// Parse a whole document and return its root element
    pub fn parse(xml: &str) -> ProductResult<XmlElement> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let element = Self::open_element(&e)?;
                    stack.push(element);
                }
                Ok(Event::Empty(e)) => {
                    let element = Self::open_element(&e)?;
                    Self::attach(&mut stack, &mut root, element);
                }
                Ok(Event::End(_)) => {
                    if let Some(element) = stack.pop() {
                        Self::attach(&mut stack, &mut root, element);
                    }
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| ProductError::XmlParsing(e.to_string()))?;
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&text);
                    }
                }
                Ok(Event::CData(c)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(ProductError::XmlParsing(format!(
                        "error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(ProductError::XmlParsing(format!(
                "unclosed element <{}>",
                stack.last().map(|e| e.name.as_str()).unwrap_or_default()
            )));
        }
        root.ok_or_else(|| ProductError::XmlParsing("document has no root element".to_string()))
    }

    fn open_element(e: &quick_xml::events::BytesStart<'_>) -> ProductResult<XmlElement> {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|e| ProductError::XmlParsing(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let local = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| ProductError::XmlParsing(e.to_string()))?
                .into_owned();
            attributes.push((local, value));
        }
        Ok(XmlElement {
            name,
            attributes,
            ..Default::default()
        })
    }

    fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None => *root = Some(element),
        }
    }

    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All elements below this one, depth first
    pub fn descendants(&self) -> Vec<&XmlElement> {
        let mut out = Vec::new();
        for child in &self.children {
            out.push(child);
            out.extend(child.descendants());
        }
        out
    }

    /// Every element matching `path`.
    ///
    /// Supported syntax: `A/B`, `.//A` (descendants), `A//B`, `*`,
    /// `A[@attr='v']` and `A[CHILD='v']`.
    pub fn find_all(&self, path: &str) -> Vec<&XmlElement> {
        let mut current: Vec<&XmlElement> = vec![self];
        for step in parse_path(path) {
            let mut next = Vec::new();
            for node in current {
                let candidates: Vec<&XmlElement> = if step.descendant {
                    node.descendants()
                } else {
                    node.children.iter().collect()
                };
                next.extend(candidates.into_iter().filter(|c| step.matches(c)));
            }
            current = next;
        }
        current
    }

    pub fn find(&self, path: &str) -> Option<&XmlElement> {
        self.find_all(path).into_iter().next()
    }

    pub fn find_text(&self, path: &str) -> Option<&str> {
        self.find(path).map(|e| e.text()).filter(|t| !t.is_empty())
    }

    /// `Ok(None)` when the field is absent, `InvalidMetadata` when present but unparsable
    pub fn parse_field<T: FromStr>(&self, path: &str) -> ProductResult<Option<T>> {
        match self.find_text(path) {
            None => Ok(None),
            Some(text) => text.parse::<T>().map(Some).map_err(|_| {
                ProductError::invalid_metadata(path, format!("cannot parse value '{}'", text))
            }),
        }
    }

    /// Like [`parse_field`](Self::parse_field), but a missing field is malformed metadata too
    pub fn require<T: FromStr>(&self, path: &str) -> ProductResult<T> {
        self.parse_field(path)?
            .ok_or_else(|| ProductError::invalid_metadata(path, "required field is missing"))
    }

    /// Whitespace-separated values of this element's text
    pub fn parse_list<T: FromStr>(&self) -> ProductResult<Vec<T>> {
        self.text()
            .split_whitespace()
            .map(|v| {
                v.parse::<T>().map_err(|_| {
                    ProductError::invalid_metadata(self.name.clone(), format!("cannot parse list value '{}'", v))
                })
            })
            .collect()
    }
}

impl Step {
    fn matches(&self, element: &XmlElement) -> bool {
        if self.name != "*" && element.name != self.name {
            return false;
        }
        match &self.predicate {
            None => true,
            Some(Predicate::Attr(k, v)) => element.attr(k) == Some(v.as_str()),
            Some(Predicate::ChildText(k, v)) => element
                .children
                .iter()
                .any(|c| c.name == *k && c.text() == v),
        }
    }
}

fn parse_path(path: &str) -> Vec<Step> {
    let (rest, mut descendant) = if let Some(r) = path.strip_prefix(".//") {
        (r, true)
    } else if let Some(r) = path.strip_prefix("//") {
        (r, true)
    } else {
        (path.trim_start_matches("./"), false)
    };

    let mut steps = Vec::new();
    for token in rest.split('/') {
        if token.is_empty() {
            descendant = true;
            continue;
        }
        let (name, predicate) = match token.find('[') {
            Some(open) => {
                let inner = token[open + 1..].trim_end_matches(']');
                (token[..open].to_string(), parse_predicate(inner))
            }
            None => (token.to_string(), None),
        };
        steps.push(Step { name, descendant, predicate });
        descendant = false;
    }
    steps
}

fn parse_predicate(inner: &str) -> Option<Predicate> {
    let (key, value) = inner.split_once('=')?;
    let value = value.trim().trim_matches(|c| c == '\'' || c == '"').to_string();
    let key = key.trim();
    match key.strip_prefix('@') {
        Some(attr) => Some(Predicate::Attr(attr.to_string(), value)),
        None => Some(Predicate::ChildText(key.to_string(), value)),
    }
}

//! Owned XML documents with element handles and event-stream surgery.
//!
//! A [`Document`] stores the XML text and hands out opaque [`NodeRef`]
//! handles to elements. Handles are stamped with the identity of the
//! document that issued them; a mutation re-stamps the document, so stale
//! handles are rejected instead of silently resolving to the wrong node.

use quick_xml::events::{BytesEnd, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

pub type Result<T> = std::result::Result<T, Error>;

/// Attribute names consulted when locating an element by ID, in order.
pub const DEFAULT_ID_ATTRIBUTES: &[&str] = &["Id", "ID", "id"];

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_document_id() -> u64 {
    NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("XML parse error: {0}")]
    Parse(String),

    #[error("node handle does not belong to this document or is stale")]
    DetachedNode,

    #[error("anchor element is not a child of the insertion parent")]
    NotAChild,

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Utf8(err.utf8_error())
    }
}

/// Opaque handle to an element inside a [`Document`].
///
/// Identifies the element by its position in document order and the
/// identity of the issuing document. Any mutation of the document
/// invalidates all previously issued handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    doc: u64,
    ordinal: usize,
}

/// An owned XML document, validated at parse time.
pub struct Document {
    id: u64,
    text: String,
    element_count: usize,
}

impl Document {
    /// Parse and validate XML, taking ownership of the text.
    pub fn parse(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let element_count = count_elements(&text)?;
        if element_count == 0 {
            return Err(Error::Parse("document has no root element".into()));
        }
        Ok(Self {
            id: next_document_id(),
            text,
            element_count,
        })
    }

    /// Get the raw XML text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Handle to the document root element.
    pub fn root(&self) -> NodeRef {
        NodeRef {
            doc: self.id,
            ordinal: 0,
        }
    }

    /// Find the first element with the given local name, in document order.
    pub fn element_by_name(&self, local_name: &str) -> Option<NodeRef> {
        self.find_element(|e| e.name().local_name().as_ref() == local_name.as_bytes())
    }

    /// Find the first element carrying the given attribute with the given value.
    ///
    /// The attribute name matches either the qualified name (`wsu:Id`) or
    /// the local name (`Id`).
    pub fn element_by_attr(&self, name: &str, value: &str) -> Option<NodeRef> {
        self.find_element(|e| {
            e.attributes().with_checks(false).any(|attr| {
                attr.ok().is_some_and(|attr| {
                    attr_name_matches(attr.key.as_ref(), name)
                        && attr.unescape_value().ok().as_deref() == Some(value)
                })
            })
        })
    }

    /// Find the first element whose ID attribute has the given value, using
    /// the built-in detection list [`DEFAULT_ID_ATTRIBUTES`].
    pub fn element_by_id(&self, value: &str) -> Option<NodeRef> {
        self.find_element(|e| {
            e.attributes().with_checks(false).any(|attr| {
                attr.ok().is_some_and(|attr| {
                    DEFAULT_ID_ATTRIBUTES
                        .iter()
                        .any(|name| attr.key.local_name().as_ref() == name.as_bytes())
                        && attr.unescape_value().ok().as_deref() == Some(value)
                })
            })
        })
    }

    /// Resolve the ID attribute value of an element.
    ///
    /// A `preferred` attribute name, when given, is consulted before the
    /// built-in detection list. Returns `None` when the element carries no
    /// recognizable ID attribute.
    pub fn id_of(&self, node: NodeRef, preferred: Option<&str>) -> Result<Option<String>> {
        if let Some(name) = preferred {
            if let Some(value) = self.attribute_value(node, name)? {
                return Ok(Some(value));
            }
        }
        for name in DEFAULT_ID_ATTRIBUTES {
            if let Some(value) = self.attribute_value(node, name)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Get an attribute value of an element, matching the attribute by
    /// qualified or local name.
    pub fn attribute_value(&self, node: NodeRef, name: &str) -> Result<Option<String>> {
        let ordinal = self.check_handle(node)?;
        let mut found = None;
        self.visit_element(ordinal, |e| {
            for attr in e.attributes().with_checks(false) {
                let attr = attr?;
                if attr_name_matches(attr.key.as_ref(), name) {
                    found = Some(attr.unescape_value()?.into_owned());
                    return Ok(());
                }
            }
            Ok(())
        })?;
        Ok(found)
    }

    /// Local name of an element.
    pub fn local_name_of(&self, node: NodeRef) -> Result<String> {
        let ordinal = self.check_handle(node)?;
        let mut name = String::new();
        self.visit_element(ordinal, |e| {
            name = String::from_utf8(e.name().local_name().as_ref().to_vec())?;
            Ok(())
        })?;
        Ok(name)
    }

    /// Extract the subtree rooted at an element as XML text.
    ///
    /// Empty elements are expanded to start/end pairs; everything else is
    /// carried over verbatim.
    pub fn subtree(&self, node: NodeRef) -> Result<String> {
        let ordinal = self.check_handle(node)?;

        let mut reader = Reader::from_str(&self.text);
        reader.config_mut().trim_text(false);
        reader.config_mut().expand_empty_elements = true;

        let mut writer = Writer::new(Cursor::new(Vec::new()));
        let mut buf = Vec::new();
        let mut counter = 0usize;
        let mut depth = 0usize;
        let mut capturing = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let ord = counter;
                    counter += 1;
                    if capturing {
                        depth += 1;
                        writer.write_event(Event::Start(e.to_owned()))?;
                    } else if ord == ordinal {
                        capturing = true;
                        depth = 1;
                        writer.write_event(Event::Start(e.to_owned()))?;
                    }
                }
                Ok(Event::End(e)) => {
                    if capturing {
                        writer.write_event(Event::End(e.to_owned()))?;
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Ok(e) => {
                    if capturing {
                        writer.write_event(e.into_owned())?;
                    }
                }
                Err(e) => return Err(e.into()),
            }
            buf.clear();
        }

        if !capturing {
            return Err(Error::DetachedNode);
        }
        Ok(String::from_utf8(writer.into_inner().into_inner())?)
    }

    /// Concatenated character content of an element's subtree, unescaped.
    pub fn text_of(&self, node: NodeRef) -> Result<String> {
        let ordinal = self.check_handle(node)?;

        let mut reader = Reader::from_str(&self.text);
        reader.config_mut().trim_text(false);
        reader.config_mut().expand_empty_elements = true;

        let mut buf = Vec::new();
        let mut counter = 0usize;
        let mut depth = 0usize;
        let mut capturing = false;
        let mut content = String::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(_)) => {
                    let ord = counter;
                    counter += 1;
                    if capturing {
                        depth += 1;
                    } else if ord == ordinal {
                        capturing = true;
                        depth = 1;
                    }
                }
                Ok(Event::End(_)) => {
                    if capturing {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                }
                Ok(Event::Text(e)) => {
                    if capturing {
                        let text = e.unescape().map_err(|e| Error::Parse(e.to_string()))?;
                        content.push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    if capturing {
                        content.push_str(std::str::from_utf8(&e.into_inner())?);
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
            buf.clear();
        }

        if !capturing {
            return Err(Error::DetachedNode);
        }
        Ok(content)
    }

    /// Namespace declarations in scope at an element, inherited from its
    /// ancestors. The element's own declarations are not included (they
    /// travel with the extracted subtree). The default namespace is keyed
    /// by the empty string.
    pub fn namespace_scope(&self, node: NodeRef) -> Result<BTreeMap<String, String>> {
        let ordinal = self.check_handle(node)?;

        let mut reader = Reader::from_str(&self.text);
        reader.config_mut().trim_text(false);
        reader.config_mut().expand_empty_elements = true;

        let mut buf = Vec::new();
        let mut counter = 0usize;
        let mut scopes: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let ord = counter;
                    counter += 1;
                    if ord == ordinal {
                        return Ok(scopes.last().cloned().unwrap_or_default());
                    }
                    let mut scope = scopes.last().cloned().unwrap_or_default();
                    for attr in e.attributes().with_checks(false) {
                        let attr = attr?;
                        let key = attr.key.as_ref();
                        let prefix = if key == b"xmlns" {
                            Some(String::new())
                        } else if let Some(rest) = key.strip_prefix(b"xmlns:") {
                            Some(String::from_utf8(rest.to_vec())?)
                        } else {
                            None
                        };
                        if let Some(prefix) = prefix {
                            let uri = attr.unescape_value()?.into_owned();
                            if uri.is_empty() {
                                scope.remove(&prefix);
                            } else {
                                scope.insert(prefix, uri);
                            }
                        }
                    }
                    scopes.push(scope);
                }
                Ok(Event::End(_)) => {
                    scopes.pop();
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
            buf.clear();
        }

        Err(Error::DetachedNode)
    }

    /// Splice a well-formed XML fragment into the document as a child of
    /// `parent`: immediately before the `anchor` child when given, as the
    /// last child otherwise.
    ///
    /// Existing children keep their order and bytes. On success every
    /// previously issued handle becomes stale; re-query what you need.
    pub fn insert_child(
        &mut self,
        parent: NodeRef,
        anchor: Option<NodeRef>,
        fragment: &str,
    ) -> Result<()> {
        let parent_ord = self.check_handle(parent)?;
        let anchor_ord = anchor.map(|a| self.check_handle(a)).transpose()?;
        if anchor_ord == Some(parent_ord) {
            return Err(Error::NotAChild);
        }
        count_elements(fragment).map_err(|e| Error::Parse(format!("bad fragment: {e}")))?;

        let mut reader = Reader::from_str(&self.text);
        reader.config_mut().trim_text(false);

        let mut writer = Writer::new(Cursor::new(Vec::new()));
        let mut buf = Vec::new();
        let mut counter = 0usize;
        let mut depth = 0usize;
        let mut in_parent = false;
        let mut inserted = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let ord = counter;
                    counter += 1;
                    if !in_parent && ord == parent_ord {
                        in_parent = true;
                        depth = 1;
                    } else if in_parent && !inserted {
                        if depth == 1 && anchor_ord == Some(ord) {
                            writer.get_mut().write_all(fragment.as_bytes())?;
                            inserted = true;
                        }
                        depth += 1;
                    } else if in_parent {
                        depth += 1;
                    }
                    writer.write_event(Event::Start(e.to_owned()))?;
                }
                Ok(Event::Empty(e)) => {
                    let ord = counter;
                    counter += 1;
                    if !in_parent && ord == parent_ord {
                        if anchor_ord.is_some() {
                            return Err(Error::NotAChild);
                        }
                        // A childless parent: expand it around the fragment.
                        let name = e.name().as_ref().to_vec();
                        writer.write_event(Event::Start(e.to_owned()))?;
                        writer.get_mut().write_all(fragment.as_bytes())?;
                        writer.write_event(Event::End(BytesEnd::new(String::from_utf8(name)?)))?;
                        inserted = true;
                        in_parent = false;
                    } else {
                        if in_parent && !inserted && depth == 1 && anchor_ord == Some(ord) {
                            writer.get_mut().write_all(fragment.as_bytes())?;
                            inserted = true;
                        }
                        writer.write_event(Event::Empty(e.to_owned()))?;
                    }
                }
                Ok(Event::End(e)) => {
                    if in_parent {
                        depth -= 1;
                        if depth == 0 {
                            in_parent = false;
                            if !inserted {
                                if anchor_ord.is_some() {
                                    // Parent closed without meeting the anchor.
                                    return Err(Error::NotAChild);
                                }
                                writer.get_mut().write_all(fragment.as_bytes())?;
                                inserted = true;
                            }
                        }
                    }
                    writer.write_event(Event::End(e.to_owned()))?;
                }
                Ok(Event::Eof) => break,
                Ok(e) => writer.write_event(e.into_owned())?,
                Err(e) => return Err(e.into()),
            }
            buf.clear();
        }

        if !inserted {
            return Err(Error::DetachedNode);
        }

        let text = String::from_utf8(writer.into_inner().into_inner())?;
        let element_count = count_elements(&text)?;
        debug!(
            fragment_len = fragment.len(),
            anchored = anchor.is_some(),
            "Spliced fragment into document"
        );
        self.id = next_document_id();
        self.text = text;
        self.element_count = element_count;
        Ok(())
    }

    fn check_handle(&self, node: NodeRef) -> Result<usize> {
        if node.doc != self.id || node.ordinal >= self.element_count {
            return Err(Error::DetachedNode);
        }
        Ok(node.ordinal)
    }

    fn find_element<F>(&self, mut predicate: F) -> Option<NodeRef>
    where
        F: FnMut(&quick_xml::events::BytesStart) -> bool,
    {
        let mut reader = Reader::from_str(&self.text);
        reader.config_mut().trim_text(false);
        reader.config_mut().expand_empty_elements = true;

        let mut buf = Vec::new();
        let mut counter = 0usize;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let ord = counter;
                    counter += 1;
                    if predicate(&e) {
                        return Some(NodeRef {
                            doc: self.id,
                            ordinal: ord,
                        });
                    }
                }
                Ok(Event::Eof) | Err(_) => return None,
                Ok(_) => {}
            }
            buf.clear();
        }
    }

    fn visit_element<F>(&self, ordinal: usize, mut visit: F) -> Result<()>
    where
        F: FnMut(&quick_xml::events::BytesStart) -> Result<()>,
    {
        let mut reader = Reader::from_str(&self.text);
        reader.config_mut().trim_text(false);
        reader.config_mut().expand_empty_elements = true;

        let mut buf = Vec::new();
        let mut counter = 0usize;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let ord = counter;
                    counter += 1;
                    if ord == ordinal {
                        return visit(&e);
                    }
                }
                Ok(Event::Eof) => return Err(Error::DetachedNode),
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
            buf.clear();
        }
    }
}

fn attr_name_matches(key: &[u8], name: &str) -> bool {
    if key == name.as_bytes() {
        return true;
    }
    match key.iter().position(|&b| b == b':') {
        Some(pos) => &key[pos + 1..] == name.as_bytes(),
        None => false,
    }
}

/// Validate XML and count its elements.
fn count_elements(text: &str) -> Result<usize> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);
    reader.config_mut().expand_empty_elements = true;

    let mut buf = Vec::new();
    let mut count = 0usize;
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => {
                count += 1;
                depth += 1;
            }
            Ok(Event::End(_)) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::Parse("unexpected closing tag".into()))?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }
        buf.clear();
    }
    if depth != 0 {
        return Err(Error::Parse("unclosed element".into()));
    }
    Ok(count)
}

use std::io::Cursor;

use xmltree::{Element, EmitterConfig, XMLNode};

use crate::store::PropName;

pub(crate) trait ElementExt {
    /// Parse, returning `None` for anything that is not well-formed.
    fn parse_tolerant(data: &[u8]) -> Option<Element>;
    /// Child elements, skipping text and comments.
    fn child_elems(&self) -> Box<dyn Iterator<Item = &Element> + '_>;
    /// First element with this local name: this one, or a descendant.
    fn find_elem(&self, name: &str) -> Option<&Element>;
    /// Concatenated text content of the direct children.
    fn text_content(&self) -> String;
    /// The children serialized as XML, without a document declaration.
    fn inner_xml(&self) -> String;
    fn prop_name(&self) -> PropName;
}

impl ElementExt for Element {
    fn parse_tolerant(data: &[u8]) -> Option<Element> {
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return None;
        }
        match Element::parse(Cursor::new(data)) {
            Ok(e) => Some(e),
            Err(e) => {
                debug!("ignoring malformed XML body: {e}");
                None
            }
        }
    }

    fn child_elems(&self) -> Box<dyn Iterator<Item = &Element> + '_> {
        Box::new(self.children.iter().filter_map(|n| match n {
            XMLNode::Element(e) => Some(e),
            _ => None,
        }))
    }

    fn find_elem(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        self.child_elems().find_map(|e| e.find_elem(name))
    }

    fn text_content(&self) -> String {
        let mut text = String::new();
        for n in &self.children {
            match n {
                XMLNode::Text(t) | XMLNode::CData(t) => text.push_str(t),
                _ => {}
            }
        }
        text
    }

    fn inner_xml(&self) -> String {
        let mut out = Vec::new();
        for e in self.child_elems() {
            let config = EmitterConfig::new()
                .write_document_declaration(false)
                .perform_indent(false);
            if let Err(err) = e.write_with_config(&mut out, config) {
                debug!("cannot serialize <{}>: {err}", e.name);
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    fn prop_name(&self) -> PropName {
        PropName::new(self.namespace.clone().unwrap_or_default(), self.name.clone())
    }
}

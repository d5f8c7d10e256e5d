//! Minimal XML document model for SQS and S3 responses.
//!
//! Both services answer with small, shallow XML documents. Parsing them into
//! a tree once keeps the per-operation code down to lookups by element name.

use crate::error::SerializationError;
use quick_xml::events::Event;
use quick_xml::Reader;

/// One XML element with its text content and child elements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Parse a document; the returned element is a synthetic root holding
    /// the document element as its only child
    ///
    /// Whitespace is kept as-is since message bodies are significant.
    pub fn parse(xml: &str) -> Result<XmlElement, SerializationError> {
        let mut reader = Reader::from_str(xml);
        let mut stack = vec![XmlElement::default()];
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    stack.push(XmlElement {
                        name: local_name(e.local_name().as_ref())?,
                        ..Default::default()
                    });
                }
                Ok(Event::Empty(ref e)) => {
                    let element = XmlElement {
                        name: local_name(e.local_name().as_ref())?,
                        ..Default::default()
                    };
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(element);
                    }
                }
                Ok(Event::Text(e)) => {
                    let text = e.unescape().map_err(|e| SerializationError::MalformedResponse {
                        message: format!("Failed to unescape text: {}", e),
                    })?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8(e.into_inner().into_owned())
                        .map_err(|_| SerializationError::InvalidUtf8)?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                Ok(Event::End(_)) => {
                    let element = stack.pop();
                    match (element, stack.last_mut()) {
                        (Some(element), Some(parent)) => parent.children.push(element),
                        _ => {
                            return Err(SerializationError::MalformedResponse {
                                message: "Unbalanced closing tag".to_string(),
                            })
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(SerializationError::MalformedResponse {
                        message: format!("XML parsing error: {}", e),
                    })
                }
                _ => {}
            }
            buf.clear();
        }

        if stack.len() != 1 {
            return Err(SerializationError::MalformedResponse {
                message: "Document ended inside an element".to_string(),
            });
        }

        Ok(stack.pop().unwrap_or_default())
    }

    /// First direct child with the given name
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Text of the first direct child with the given name
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// All elements with the given name at any depth, in document order
    pub fn descendants<'a>(&'a self, name: &str) -> Vec<&'a XmlElement> {
        let mut found = Vec::new();
        self.collect_descendants(name, &mut found);
        found
    }

    /// Text of the first element with the given name at any depth
    pub fn find_text(&self, name: &str) -> Option<&str> {
        self.descendants(name).first().map(|e| e.text.as_str())
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if child.name == name {
                found.push(child);
            }
            child.collect_descendants(name, found);
        }
    }
}

fn local_name(raw: &[u8]) -> Result<String, SerializationError> {
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|_| SerializationError::InvalidUtf8)
}

/// Code and message of an `<Error>` element, if the document has one
pub fn parse_error(xml: &str) -> Option<(String, String)> {
    let root = XmlElement::parse(xml).ok()?;
    let error = root.descendants("Error").into_iter().next()?;
    let code = error.child_text("Code").unwrap_or("Unknown").trim().to_string();
    let message = error
        .child_text("Message")
        .unwrap_or("Unknown error")
        .trim()
        .to_string();
    Some((code, message))
}

#[cfg(test)]
#[path = "xml_tests.rs"]
mod tests;

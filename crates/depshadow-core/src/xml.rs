//! Small element tree over `quick-xml` events, shared by the project,
//! manifest, solution and NuGet.Config readers, plus writer helpers.

use std::borrow::Cow;
use std::path::Path;

use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesRef, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};

use crate::error::{Error, Result};

/// An element with its attributes, child elements and trimmed text.
/// Names are local names; namespace prefixes are dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    /// Case-insensitive attribute lookup, as MSBuild and NuGet treat them.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.is(name))
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.is(name))
    }
}

/// Parse a whole document into its root element.
pub fn parse_document(text: &str, path: Option<&Path>) -> Result<Element> {
    let fail = |message: &dyn std::fmt::Display| Error::xml(path.map(Path::to_path_buf), message);

    let mut reader = Reader::from_str(text);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event().map_err(|e| fail(&e))? {
            Event::Start(start) => stack.push(open(&start, path)?),
            Event::Empty(start) => {
                let element = open(&start, path)?;
                close(element, &mut stack, &mut root);
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| fail(&"unbalanced end tag"))?;
                close(element, &mut stack, &mut root);
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&decode_text(&text, path)?);
                }
            }
            Event::GeneralRef(reference) => {
                if let Some(top) = stack.last_mut() {
                    resolve_reference(&reference, &mut top.text, path)?;
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    let raw = std::str::from_utf8(&data).map_err(|e| fail(&e))?;
                    top.text.push_str(raw);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(fail(&"unexpected end of document"));
    }
    root.ok_or_else(|| fail(&"document has no root element"))
}

fn open(start: &BytesStart<'_>, path: Option<&Path>) -> Result<Element> {
    let fail = |message: &dyn std::fmt::Display| Error::xml(path.map(Path::to_path_buf), message);

    let name = std::str::from_utf8(start.local_name().as_ref())
        .map_err(|e| fail(&e))?
        .to_string();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| fail(&e))?;
        let key = std::str::from_utf8(attr.key.local_name().as_ref())
            .map_err(|e| fail(&e))?
            .to_string();
        let raw = std::str::from_utf8(&attr.value).map_err(|e| fail(&e))?;
        let value = unescape(raw).map_err(|e| fail(&e))?.into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        ..Element::default()
    })
}

fn close(mut element: Element, stack: &mut [Element], root: &mut Option<Element>) {
    let trimmed = element.text.trim();
    if trimmed.len() != element.text.len() {
        element.text = trimmed.to_string();
    }
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn decode_text(text: &BytesText<'_>, path: Option<&Path>) -> Result<String> {
    let raw = std::str::from_utf8(text).map_err(|e| Error::xml(path.map(Path::to_path_buf), e))?;
    Ok(unescape(raw)
        .map_err(|e| Error::xml(path.map(Path::to_path_buf), e))?
        .into_owned())
}

/// `&amp;`, `&#38;` and friends inside text. Unknown entities stay verbatim.
fn resolve_reference(reference: &BytesRef<'_>, out: &mut String, path: Option<&Path>) -> Result<()> {
    let fail = |message: &dyn std::fmt::Display| Error::xml(path.map(Path::to_path_buf), message);

    if let Some(c) = reference.resolve_char_ref().map_err(|e| fail(&e))? {
        out.push(c);
        return Ok(());
    }
    let name = std::str::from_utf8(reference).map_err(|e| fail(&e))?;
    match resolve_predefined_entity(name) {
        Some(value) => out.push_str(value),
        None => {
            out.push('&');
            out.push_str(name);
            out.push(';');
        }
    }
    Ok(())
}

/// Escape only what a double-quoted attribute or element text requires,
/// so MSBuild conditions keep their single quotes.
fn escape_minimal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// True when `name` can stand as an element or attribute name: a letter
/// or `_`, then letters, digits, `_`, `-` or `.`. Colons are left out
/// since MSBuild has no namespaced properties.
pub fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// `name="value"` with minimal escaping, for `BytesStart::push_attribute`.
pub fn attribute<'a>(name: &'a str, value: &str) -> Attribute<'a> {
    Attribute {
        key: QName(name.as_bytes()),
        value: Cow::Owned(escape_minimal(value).into_bytes()),
    }
}

/// Indented writer used for every generated XML file.
pub struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    pub fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    pub fn declaration(&mut self) -> Result<()> {
        self.emit(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
    }

    pub fn start(&mut self, start: BytesStart<'_>) -> Result<()> {
        self.emit(Event::Start(start))
    }

    pub fn end(&mut self, name: &str) -> Result<()> {
        self.emit(Event::End(BytesEnd::new(name)))
    }

    pub fn empty(&mut self, element: BytesStart<'_>) -> Result<()> {
        self.emit(Event::Empty(element))
    }

    /// `<name>text</name>`
    pub fn text_element(&mut self, name: &str, text: &str) -> Result<()> {
        if !is_name(name) {
            return Err(Error::xml(None, format!("'{}' is not a valid element name", name)));
        }
        self.start(BytesStart::new(name))?;
        self.emit(Event::Text(BytesText::from_escaped(escape_minimal(text))))?;
        self.end(name)
    }

    fn emit(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| Error::xml(None, e))
    }

    /// The finished document with a trailing newline.
    pub fn finish(self) -> Vec<u8> {
        let mut bytes = self.writer.into_inner();
        bytes.push(b'\n');
        bytes
    }
}

impl Default for XmlOut {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_element_tree() {
        let doc = r#"<?xml version="1.0"?>
<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <TargetFramework>net6.0</TargetFramework>
  </PropertyGroup>
  <ItemGroup Condition=" '$(TargetFramework)' == 'net6.0' ">
    <PackageReference Include="Foo" Version="1.0.0" />
  </ItemGroup>
</Project>"#;
        let root = parse_document(doc, None).unwrap();
        assert!(root.is("project"));
        assert_eq!(root.attr("sdk"), Some("Microsoft.NET.Sdk"));

        let tfm = root
            .child("PropertyGroup")
            .and_then(|g| g.child("TargetFramework"))
            .unwrap();
        assert_eq!(tfm.text, "net6.0");

        let group = root.child("ItemGroup").unwrap();
        assert_eq!(group.attr("Condition"), Some(" '$(TargetFramework)' == 'net6.0' "));
        let reference = group.children_named("PackageReference").next().unwrap();
        assert_eq!(reference.attr("Include"), Some("Foo"));
    }

    #[test]
    fn unescapes_attributes_and_drops_namespaces() {
        let doc = r#"<package xmlns="urn:x"><n:item xmlns:n="urn:n" a="x &amp; y"/></package>"#;
        let root = parse_document(doc, None).unwrap();
        let item = root.child("item").unwrap();
        assert_eq!(item.attr("a"), Some("x & y"));
    }

    #[test]
    fn resolves_references_in_text() {
        let doc = "<metadata><title>\n  Tom &amp; Jerry &#65;\n</title></metadata>";
        let root = parse_document(doc, None).unwrap();
        assert_eq!(root.child("title").unwrap().text, "Tom & Jerry A");
    }

    #[test]
    fn rejects_truncated_documents() {
        assert!(parse_document("<Project><ItemGroup>", None).is_err());
        assert!(parse_document("", None).is_err());
    }

    #[test]
    fn writes_indented_documents() {
        let mut out = XmlOut::new();
        let mut root = BytesStart::new("Project");
        root.push_attribute(attribute("Sdk", "Microsoft.NET.Sdk"));
        root.push_attribute(attribute("Condition", " '$(A)' == \"b\" "));
        out.start(root).unwrap();
        out.text_element("Name", "a < b 'c'").unwrap();
        out.end("Project").unwrap();
        let text = String::from_utf8(out.finish()).unwrap();
        assert_eq!(
            text,
            "<Project Sdk=\"Microsoft.NET.Sdk\" Condition=\" '$(A)' == &quot;b&quot; \">\n  <Name>a &lt; b 'c'</Name>\n</Project>\n"
        );
    }

    #[test]
    fn element_names_are_checked() {
        assert!(is_name("TargetFramework"));
        assert!(is_name("_Private.Value-2"));
        for bad in ["", "2Fast", "a b", "x><Injected", "ns:Name", "-dash"] {
            assert!(!is_name(bad), "{bad:?} should be rejected");
        }

        let mut out = XmlOut::new();
        assert!(out.text_element("Foo><Bar", "1").is_err());
    }
}

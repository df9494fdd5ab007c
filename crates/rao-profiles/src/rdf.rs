//! ---
//! rao_section: "02-profile-conversion"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Exchange profile reading and validation."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Minimal RDF/XML object reader and writer.
//!
//! Exchange profiles are flat: a `rdf:RDF` root holding one `md:FullModel`
//! header followed by object elements, each carrying literal properties or
//! `rdf:resource` references. Anything deeper is rejected as malformed.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::LocalName;
use quick_xml::{Reader, Writer};

use crate::errors::{ProfileError, Result};

pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const CIM_NS: &str = "http://iec.ch/TC57/CIM100#";
pub const NC_NS: &str = "http://entsoe.eu/ns/nc#";
pub const MD_NS: &str = "http://iec.ch/TC57/61970-552/ModelDescription/1#";
pub const DCAT_NS: &str = "http://www.w3.org/ns/dcat#";
pub const DCTERMS_NS: &str = "http://purl.org/dc/terms/#";

const HEADER_CLASS: &str = "FullModel";

/// Property value of an RDF object.
#[derive(Debug, Clone, PartialEq)]
pub enum RdfValue {
    Literal(String),
    /// Normalised identifier of the referenced object.
    Resource(String),
}

/// One object element.
#[derive(Debug, Clone, PartialEq)]
pub struct RdfObject {
    /// Local class name, e.g. `AssessedElement`.
    pub class: String,
    /// Normalised `rdf:ID` / `rdf:about`.
    pub about: String,
    /// Local property names with values, in document order.
    pub properties: Vec<(String, RdfValue)>,
}

impl RdfObject {
    fn matches(name: &str, property: &str) -> bool {
        name == property
            || (name.len() > property.len()
                && name.ends_with(property)
                && name.as_bytes()[name.len() - property.len() - 1] == b'.')
    }

    /// First value whose name equals `property` or ends with `.property`.
    pub fn value(&self, property: &str) -> Option<&RdfValue> {
        self.properties
            .iter()
            .find(|(name, _)| Self::matches(name, property))
            .map(|(_, value)| value)
    }

    pub fn literal(&self, property: &str) -> Option<&str> {
        match self.value(property)? {
            RdfValue::Literal(text) => Some(text.as_str()),
            RdfValue::Resource(_) => None,
        }
    }

    pub fn resource(&self, property: &str) -> Option<&str> {
        match self.value(property)? {
            RdfValue::Resource(id) => Some(id.as_str()),
            RdfValue::Literal(_) => None,
        }
    }

    /// Literal text, or the enumeration member of a resource
    /// (`...#LimitTypeKind.patl` yields `patl`).
    pub fn enumeration(&self, property: &str) -> Option<&str> {
        match self.value(property)? {
            RdfValue::Literal(text) => Some(text.rsplit('.').next().unwrap_or(text)),
            RdfValue::Resource(id) => Some(id.rsplit('.').next().unwrap_or(id)),
        }
    }
}

/// Header plus objects of one document.
#[derive(Debug, Clone, Default)]
pub struct RdfGraph {
    pub header: Option<RdfObject>,
    pub objects: Vec<RdfObject>,
}

/// Strip `#`, a `urn:uuid:` prefix and one leading underscore.
pub fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains("://") {
        // Enumeration IRIs keep their fragment, e.g. `LimitTypeKind.patl`.
        return trimmed
            .rsplit_once('#')
            .map(|(_, fragment)| fragment)
            .unwrap_or(trimmed)
            .to_owned();
    }
    let fragment = trimmed.trim_start_matches('#');
    let fragment = fragment.strip_prefix("urn:uuid:").unwrap_or(fragment);
    fragment.strip_prefix('_').unwrap_or(fragment).to_owned()
}

fn local_name_as_str<'a>(name: &'a LocalName<'a>) -> &'a str {
    std::str::from_utf8(name.as_ref()).unwrap_or_default()
}

fn attribute_value(profile: &str, event: &BytesStart, key: &str) -> Result<Option<String>> {
    for attr in event.attributes().with_checks(false) {
        let attr = attr.map_err(|err| {
            ProfileError::malformed(profile, element_label(event), format!("bad attribute: {err}"))
        })?;
        if attr.key.local_name().as_ref() == key.as_bytes() {
            let value = attr.unescape_value().map_err(|err| {
                ProfileError::malformed(profile, element_label(event), err.to_string())
            })?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn element_label(event: &BytesStart) -> String {
    String::from_utf8_lossy(event.name().as_ref()).into_owned()
}

/// Parse a document into its header and objects, enforcing the flat layout.
pub fn read_graph(profile: &str, xml: &str) -> Result<RdfGraph> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut graph = RdfGraph::default();
    let mut saw_root = false;
    let mut depth = 0usize;
    let mut current: Option<RdfObject> = None;
    let mut property: Option<(String, String)> = None;

    loop {
        let event = reader.read_event().map_err(|err| {
            ProfileError::malformed(
                profile,
                format!("byte {}", reader.buffer_position()),
                format!("xml syntax: {err}"),
            )
        })?;
        match event {
            Event::Start(ref e) => {
                match depth {
                    0 => open_root(profile, e, &mut saw_root)?,
                    1 => current = Some(open_object(profile, e)?),
                    2 => {
                        let name = e.local_name();
                        property = Some((local_name_as_str(&name).to_owned(), String::new()));
                    }
                    _ => {
                        return Err(ProfileError::malformed(
                            profile,
                            element_label(e),
                            "nested elements below property level are not supported",
                        ))
                    }
                }
                depth += 1;
            }
            Event::Empty(ref e) => match depth {
                0 => {
                    open_root(profile, e, &mut saw_root)?;
                }
                1 => {
                    let object = open_object(profile, e)?;
                    push_object(profile, &mut graph, object)?;
                }
                2 => {
                    let name = e.local_name();
                    let name = local_name_as_str(&name).to_owned();
                    let resource = attribute_value(profile, e, "resource")?.ok_or_else(|| {
                        ProfileError::malformed(
                            profile,
                            element_label(e),
                            "empty property without rdf:resource",
                        )
                    })?;
                    if let Some(object) = current.as_mut() {
                        object
                            .properties
                            .push((name, RdfValue::Resource(normalize_id(&resource))));
                    }
                }
                _ => {
                    return Err(ProfileError::malformed(
                        profile,
                        element_label(e),
                        "nested elements below property level are not supported",
                    ))
                }
            },
            Event::Text(e) => {
                if let Some((_, text)) = property.as_mut() {
                    let value = e.unescape().map_err(|err| {
                        ProfileError::malformed(profile, "text", err.to_string())
                    })?;
                    text.push_str(value.trim());
                }
            }
            Event::CData(e) => {
                if let Some((_, text)) = property.as_mut() {
                    text.push_str(String::from_utf8_lossy(&e.into_inner()).trim());
                }
            }
            Event::End(_) => {
                match depth {
                    3 => {
                        if let (Some(object), Some((name, text))) =
                            (current.as_mut(), property.take())
                        {
                            object.properties.push((name, RdfValue::Literal(text)));
                        }
                    }
                    2 => {
                        if let Some(object) = current.take() {
                            push_object(profile, &mut graph, object)?;
                        }
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(ProfileError::malformed(profile, "rdf:RDF", "missing rdf:RDF root element"));
    }
    if depth != 0 {
        return Err(ProfileError::malformed(profile, "document", "unexpected end of document"));
    }
    Ok(graph)
}

fn open_root(profile: &str, e: &BytesStart, saw_root: &mut bool) -> Result<()> {
    let name = e.local_name();
    if local_name_as_str(&name) != "RDF" || *saw_root {
        return Err(ProfileError::malformed(
            profile,
            element_label(e),
            "root element must be a single rdf:RDF",
        ));
    }
    *saw_root = true;
    Ok(())
}

fn open_object(profile: &str, e: &BytesStart) -> Result<RdfObject> {
    let name = e.local_name();
    let class = local_name_as_str(&name).to_owned();
    let about = match attribute_value(profile, e, "ID")? {
        Some(id) => id,
        None => attribute_value(profile, e, "about")?.ok_or_else(|| {
            ProfileError::malformed(profile, element_label(e), "object has neither rdf:ID nor rdf:about")
        })?,
    };
    Ok(RdfObject {
        class,
        about: normalize_id(&about),
        properties: Vec::new(),
    })
}

fn push_object(profile: &str, graph: &mut RdfGraph, object: RdfObject) -> Result<()> {
    if object.class == HEADER_CLASS {
        if graph.header.is_some() {
            return Err(ProfileError::malformed(
                profile,
                object.about,
                "document declares more than one FullModel header",
            ));
        }
        graph.header = Some(object);
    } else {
        graph.objects.push(object);
    }
    Ok(())
}

/// Streaming RDF/XML writer with a fixed namespace set.
pub struct RdfWriter {
    profile: String,
    writer: Writer<Vec<u8>>,
}

impl RdfWriter {
    pub fn new(profile: impl Into<String>) -> Result<Self> {
        let mut this = Self {
            profile: profile.into(),
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        };
        this.emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let root = BytesStart::new("rdf:RDF").with_attributes([
            ("xmlns:rdf", RDF_NS),
            ("xmlns:cim", CIM_NS),
            ("xmlns:nc", NC_NS),
            ("xmlns:md", MD_NS),
            ("xmlns:dcat", DCAT_NS),
            ("xmlns:dcterms", DCTERMS_NS),
        ]);
        this.emit(Event::Start(root))?;
        Ok(this)
    }

    fn emit(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|err| ProfileError::Write {
                profile: self.profile.clone(),
                reason: err.to_string(),
            })
    }

    /// Write the `md:FullModel` header.
    pub fn header(&mut self, about: &str, properties: &[(&str, RdfValue)]) -> Result<()> {
        let about = format!("urn:uuid:{about}");
        self.element("md:FullModel", "rdf:about", &about, properties)
    }

    /// Write an object with `rdf:ID="_<id>"`.
    pub fn object(&mut self, class: &str, id: &str, properties: &[(&str, RdfValue)]) -> Result<()> {
        let id = format!("_{id}");
        self.element(class, "rdf:ID", &id, properties)
    }

    fn element(
        &mut self,
        class: &str,
        id_attr: &str,
        id: &str,
        properties: &[(&str, RdfValue)],
    ) -> Result<()> {
        self.emit(Event::Start(
            BytesStart::new(class).with_attributes([(id_attr, id)]),
        ))?;
        for (name, value) in properties {
            match value {
                RdfValue::Literal(text) => {
                    self.emit(Event::Start(BytesStart::new(*name)))?;
                    self.emit(Event::Text(BytesText::new(text)))?;
                    self.emit(Event::End(BytesEnd::new(*name)))?;
                }
                RdfValue::Resource(target) => {
                    let reference = if target.contains("://") {
                        target.clone()
                    } else {
                        format!("#_{target}")
                    };
                    self.emit(Event::Empty(
                        BytesStart::new(*name).with_attributes([("rdf:resource", reference.as_str())]),
                    ))?;
                }
            }
        }
        self.emit(Event::End(BytesEnd::new(class)))
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.emit(Event::End(BytesEnd::new("rdf:RDF")))?;
        let mut bytes = self.writer.into_inner();
        bytes.push(b'\n');
        Ok(bytes)
    }
}

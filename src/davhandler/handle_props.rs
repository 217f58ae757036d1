use std::io::Write;

use bytes::Bytes;
use http::{HeaderValue, Request, Response, StatusCode};
use xml::common::XmlVersion;
use xml::writer::{EventWriter, XmlEvent};
use xml::EmitterConfig;
use xmltree::Element;

use crate::body::Body;
use crate::conditional::{self, check_lock, quote_etag};
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::store::{is_collection, PropMap, PropName, PropValue, NS_DAV_URI};
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339, MemBuffer};
use crate::xmltree_ext::ElementExt;
use crate::DavResult;

// Microsoft's datatypes namespace, for `creationdate`.
const NS_MS_DATATYPES_URI: &str = "urn:uuid:c2f41010-65b3-11d1-a29f-00aa00c14882/";

type Writer = EventWriter<MemBuffer>;

/// Property names a PROPFIND body asks for.
///
/// `None` means "the default set": no body, malformed XML, no `propfind`
/// element, or an `allprop` / `propname` request.
pub(crate) fn requested_properties(xmldata: &[u8]) -> Option<Vec<PropName>> {
    let root = Element::parse_tolerant(xmldata)?;
    let propfind = root.find_elem("propfind")?;
    let prop = propfind.child_elems().find(|e| e.name == "prop")?;
    let mut names: Vec<PropName> = Vec::new();
    for name in prop.child_elems().map(|e| e.prop_name()) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Some(names)
}

// Namespace URI to alias, `d` for DAV: and `rnsN` for the rest.
struct Namespaces(Vec<(String, String)>);

impl Namespaces {
    fn new() -> Namespaces {
        Namespaces(vec![(NS_DAV_URI.to_string(), "d".to_string())])
    }

    fn add(&mut self, uri: &str) {
        if uri.is_empty() || self.0.iter().any(|(u, _)| u == uri) {
            return;
        }
        let alias = format!("rns{}", self.0.len() - 1);
        self.0.push((uri.to_string(), alias));
    }

    fn qname(&self, name: &PropName) -> String {
        match self.0.iter().find(|(u, _)| *u == name.ns) {
            Some((_, alias)) => format!("{}:{}", alias, name.name),
            None => name.name.clone(),
        }
    }
}

fn write_text_elem(xw: &mut Writer, name: &str, text: &str) -> DavResult<()> {
    xw.write(XmlEvent::start_element(name))?;
    if !text.is_empty() {
        xw.write(XmlEvent::characters(text))?;
    }
    xw.write(XmlEvent::end_element())?;
    Ok(())
}

fn write_empty_elem(xw: &mut Writer, name: &str) -> DavResult<()> {
    xw.write(XmlEvent::start_element(name))?;
    xw.write(XmlEvent::end_element())?;
    Ok(())
}

fn write_prop(xw: &mut Writer, ns: &Namespaces, name: &PropName, value: &PropValue) -> DavResult<()> {
    let qname = ns.qname(name);
    match value {
        PropValue::Empty => write_empty_elem(xw, &qname)?,
        _ if name.is_dav("resourcetype") => {
            xw.write(XmlEvent::start_element(qname.as_str()))?;
            match value {
                PropValue::Xml { xml, .. } => xw.inner_mut().write_all(xml.as_bytes())?,
                v if is_collection_value(v) => write_empty_elem(xw, "d:collection")?,
                _ => {}
            }
            xw.write(XmlEvent::end_element())?;
        }
        PropValue::Text(t) if name.is_dav("getetag") => write_text_elem(xw, &qname, &quote_etag(t))?,
        PropValue::Text(t) => write_text_elem(xw, &qname, t)?,
        PropValue::Bool(b) => write_text_elem(xw, &qname, if *b { "true" } else { "false" })?,
        PropValue::Date(t) if name.is_dav("creationdate") => {
            xw.write(
                XmlEvent::start_element(qname.as_str())
                    .ns("ns0", NS_MS_DATATYPES_URI)
                    .attr("ns0:dt", "dateTime.tz"),
            )?;
            xw.write(XmlEvent::characters(&systemtime_to_rfc3339(*t)))?;
            xw.write(XmlEvent::end_element())?;
        }
        PropValue::Date(t) => write_text_elem(xw, &qname, &systemtime_to_httpdate(*t))?,
        PropValue::Xml { attributes, xml } => {
            let mut start = XmlEvent::start_element(qname.as_str());
            for (k, v) in attributes {
                start = start.attr(k.as_str(), v.as_str());
            }
            xw.write(start)?;
            // the fragment is written as-is.
            xw.inner_mut().write_all(xml.as_bytes())?;
            xw.write(XmlEvent::end_element())?;
        }
    }
    Ok(())
}

fn is_collection_value(v: &PropValue) -> bool {
    match v {
        PropValue::Text(t) => t == "collection",
        PropValue::Bool(b) => *b,
        _ => false,
    }
}

/// Serialize a `<d:multistatus>` document.
///
/// Each item is a resource plus its properties; `None` becomes a response
/// with a `404` status. Properties in `requested` that an item lacks are
/// reported in a separate `404` propstat.
pub(crate) fn write_multistatus(
    items: &[(DavPath, Option<PropMap>)],
    requested: Option<&[PropName]>,
) -> DavResult<Bytes> {
    let mut ns = Namespaces::new();
    for props in items.iter().filter_map(|(_, p)| p.as_ref()) {
        props.keys().for_each(|k| ns.add(&k.ns));
    }
    requested.unwrap_or_default().iter().for_each(|k| ns.add(&k.ns));

    let config = EmitterConfig::new()
        .perform_indent(false)
        .normalize_empty_elements(false);
    let mut xw = EventWriter::new_with_config(MemBuffer::new(), config);
    xw.write(XmlEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;

    let mut start = XmlEvent::start_element("d:multistatus");
    for (uri, alias) in &ns.0 {
        start = start.ns(alias.as_str(), uri.as_str());
    }
    xw.write(start)?;

    for (path, props) in items {
        xw.write(XmlEvent::start_element("d:response"))?;
        write_text_elem(&mut xw, "d:href", &path.as_url_string())?;
        match props {
            None => write_text_elem(&mut xw, "d:status", "HTTP/1.1 404 Not Found")?,
            Some(props) => {
                let missing: Vec<&PropName> = requested
                    .unwrap_or_default()
                    .iter()
                    .filter(|p| !props.contains_key(*p))
                    .collect();
                if !props.is_empty() || missing.is_empty() {
                    xw.write(XmlEvent::start_element("d:propstat"))?;
                    xw.write(XmlEvent::start_element("d:prop"))?;
                    for (name, value) in props {
                        write_prop(&mut xw, &ns, name, value)?;
                    }
                    xw.write(XmlEvent::end_element())?;
                    write_text_elem(&mut xw, "d:status", "HTTP/1.1 200 OK")?;
                    xw.write(XmlEvent::end_element())?;
                }
                if !missing.is_empty() {
                    xw.write(XmlEvent::start_element("d:propstat"))?;
                    xw.write(XmlEvent::start_element("d:prop"))?;
                    for name in missing {
                        write_empty_elem(&mut xw, &ns.qname(name))?;
                    }
                    xw.write(XmlEvent::end_element())?;
                    write_text_elem(&mut xw, "d:status", "HTTP/1.1 404 Not Found")?;
                    xw.write(XmlEvent::end_element())?;
                }
            }
        }
        xw.write(XmlEvent::end_element())?;
    }
    xw.write(XmlEvent::end_element())?;

    Ok(xw.into_inner().take())
}

impl crate::DavHandler {
    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        // only an explicit "0" (or an empty value) limits the depth.
        let depth = match conditional::depth(req.headers()) {
            Ok(Some(Depth::Zero)) => 0,
            _ => 1,
        };
        let requested = requested_properties(xmldata);
        let requested = requested.as_deref();

        let mut path = self.path(req)?;
        let props = self
            .store
            .properties(&path, requested, depth)
            .await?
            .ok_or_else(|| DavError::new(StatusCode::NOT_FOUND, "Resource not found"))?;
        let collection = is_collection(&props);
        if collection {
            path.add_slash();
        }

        let mut items = vec![(path.clone(), Some(props))];
        if depth == 1 && collection {
            match self.store.list(&path, requested).await {
                Ok(entries) => {
                    for entry in entries {
                        let mut child = path.join(&entry.name);
                        let props = match entry.props {
                            Some(props) => Some(props),
                            None => self
                                .store
                                .properties(&child, requested, 0)
                                .await
                                .unwrap_or_else(|e| {
                                    warn!("properties of {child} failed: {e}");
                                    None
                                }),
                        };
                        if props.as_ref().map(is_collection).unwrap_or(false) {
                            child.add_slash();
                        }
                        items.push((child, props));
                    }
                }
                Err(e) => error!("listing {path} failed: {e}"),
            }
        }

        let body = write_multistatus(&items, requested)?;
        let mut res = Response::new(Body::from(body));
        *res.status_mut() = StatusCode::MULTI_STATUS;
        res.headers_mut().insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        Ok(res)
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        check_lock(&*self.store, req.headers(), &path, None).await?;
        self.store.set_properties(&path, xmldata).await?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::MULTI_STATUS;
        Ok(res)
    }
}

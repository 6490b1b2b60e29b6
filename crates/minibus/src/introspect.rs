//! Introspection documents.
//!
//! The data model of `org.freedesktop.DBus.Introspectable.Introspect`
//! output — objects, interfaces, members, typed arguments — and the XML
//! writer for it. The client builds these from its export registry; they
//! can also be built by hand to describe remote objects.

use minibus_types::{InterfaceName, MemberName, ObjectPath, Signature, Type};

/// An introspected object: a path, its interfaces, and child objects.
#[derive(Debug, Clone)]
pub struct Object {
    pub path: ObjectPath,
    pub interfaces: Vec<Interface>,
    pub children: Vec<Object>,
}

impl Object {
    /// An object with no interfaces and no children.
    pub fn new(path: ObjectPath) -> Object {
        Object {
            path,
            interfaces: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// An interface and its members.
#[derive(Debug, Clone)]
pub struct Interface {
    pub name: InterfaceName,
    pub methods: Vec<Method>,
    pub signals: Vec<Signal>,
    pub properties: Vec<Property>,
}

impl Interface {
    /// An interface with no members.
    pub fn new(name: InterfaceName) -> Interface {
        Interface {
            name,
            methods: Vec::new(),
            signals: Vec::new(),
            properties: Vec::new(),
        }
    }
}

/// A method and its typed arguments.
#[derive(Debug, Clone)]
pub struct Method {
    pub name: MemberName,
    pub args: Vec<Arg>,
}

/// A signal declaration and its typed arguments.
#[derive(Debug, Clone)]
pub struct Signal {
    pub name: MemberName,
    pub args: Vec<Arg>,
}

/// A property.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub ty: Type,
    pub access: PropertyAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAccess {
    Read,
    Write,
    ReadWrite,
}

impl PropertyAccess {
    fn as_str(self) -> &'static str {
        match self {
            PropertyAccess::Read => "read",
            PropertyAccess::Write => "write",
            PropertyAccess::ReadWrite => "readwrite",
        }
    }
}

/// A typed argument of a method or signal.
#[derive(Debug, Clone)]
pub struct Arg {
    pub name: Option<String>,
    pub ty: Type,
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// Split a method's signatures into argument lists: every input type
/// becomes an `in` argument, every output type an `out` argument.
pub fn method_args(in_sig: &Signature, out_sig: &Signature) -> Vec<Arg> {
    let arg = |ty: &Type, direction: Direction| Arg {
        name: None,
        ty: ty.clone(),
        direction: Some(direction),
    };
    in_sig
        .types()
        .iter()
        .map(|ty| arg(ty, Direction::In))
        .chain(out_sig.types().iter().map(|ty| arg(ty, Direction::Out)))
        .collect()
}

/// Signal arguments carry no direction attribute.
pub fn signal_args(signature: &Signature) -> Vec<Arg> {
    signature
        .types()
        .iter()
        .map(|ty| Arg {
            name: None,
            ty: ty.clone(),
            direction: None,
        })
        .collect()
}

const DOCTYPE: &str = "<!DOCTYPE node PUBLIC \
\"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\" \
\"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n";

/// Render the standard introspection document for `object`.
///
/// Returns `None` when the document cannot be produced: a child path not
/// nested under its parent, or an argument type with no legal signature.
pub fn to_xml(object: &Object) -> Option<String> {
    let mut out = String::from(DOCTYPE);
    write_node(object, None, 0, &mut out)?;
    Some(out)
}

/// The child's node name: its path relative to the parent.
fn relative_name(parent: &ObjectPath, child: &ObjectPath) -> Option<String> {
    let parent = parent.as_str();
    let child = child.as_str();
    let rest = child.strip_prefix(parent)?;
    let rest = if parent == "/" {
        rest
    } else {
        rest.strip_prefix('/')?
    };
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_owned())
    }
}

fn write_node(
    object: &Object,
    parent: Option<&ObjectPath>,
    depth: usize,
    out: &mut String,
) -> Option<()> {
    let pad = " ".repeat(depth);
    match parent {
        None => {
            out.push_str(&pad);
            out.push_str("<node>\n");
        }
        Some(parent) => {
            let name = relative_name(parent, &object.path)?;
            out.push_str(&pad);
            out.push_str(&format!("<node name=\"{}\">\n", escape(&name)));
        }
    }
    for interface in &object.interfaces {
        write_interface(interface, depth + 1, out)?;
    }
    for child in &object.children {
        write_node(child, Some(&object.path), depth + 1, out)?;
    }
    out.push_str(&pad);
    out.push_str("</node>\n");
    Some(())
}

fn write_interface(interface: &Interface, depth: usize, out: &mut String) -> Option<()> {
    let pad = " ".repeat(depth);
    out.push_str(&format!(
        "{pad}<interface name=\"{}\">\n",
        escape(interface.name.as_str())
    ));
    for method in &interface.methods {
        out.push_str(&format!(
            "{pad} <method name=\"{}\">\n",
            escape(method.name.as_str())
        ));
        for arg in &method.args {
            write_arg(arg, depth + 2, out)?;
        }
        out.push_str(&format!("{pad} </method>\n"));
    }
    for signal in &interface.signals {
        out.push_str(&format!(
            "{pad} <signal name=\"{}\">\n",
            escape(signal.name.as_str())
        ));
        for arg in &signal.args {
            write_arg(arg, depth + 2, out)?;
        }
        out.push_str(&format!("{pad} </signal>\n"));
    }
    for property in &interface.properties {
        let ty = type_attribute(&property.ty)?;
        out.push_str(&format!(
            "{pad} <property name=\"{}\" type=\"{}\" access=\"{}\"/>\n",
            escape(&property.name),
            escape(&ty),
            property.access.as_str()
        ));
    }
    out.push_str(&format!("{pad}</interface>\n"));
    Some(())
}

fn write_arg(arg: &Arg, depth: usize, out: &mut String) -> Option<()> {
    let pad = " ".repeat(depth);
    let ty = type_attribute(&arg.ty)?;
    out.push_str(&pad);
    out.push_str("<arg");
    if let Some(name) = &arg.name {
        out.push_str(&format!(" name=\"{}\"", escape(name)));
    }
    out.push_str(&format!(" type=\"{}\"", escape(&ty)));
    if let Some(direction) = arg.direction {
        out.push_str(&format!(" direction=\"{}\"", direction.as_str()));
    }
    out.push_str("/>\n");
    Some(())
}

fn type_attribute(ty: &Type) -> Option<String> {
    Signature::single(ty.clone()).ok().map(|sig| sig.text())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_root_document() {
        let xml = to_xml(&Object::new(ObjectPath::from_static("/"))).unwrap();
        assert!(xml.starts_with("<!DOCTYPE node"));
        assert!(xml.contains("<node>\n</node>"));
    }

    #[test]
    fn children_are_named_relative_to_parent() {
        let mut root = Object::new(ObjectPath::from_static("/"));
        root.children.push(Object::new(ObjectPath::from_static("/x")));
        root.children.push(Object::new(ObjectPath::from_static("/y/z")));
        let xml = to_xml(&root).unwrap();
        assert!(xml.contains("<node name=\"x\">"));
        assert!(xml.contains("<node name=\"y/z\">"));

        let mut deep = Object::new(ObjectPath::from_static("/a"));
        deep.children.push(Object::new(ObjectPath::from_static("/a/b")));
        let xml = to_xml(&deep).unwrap();
        assert!(xml.contains("<node name=\"b\">"));
    }

    #[test]
    fn unrelated_child_fails() {
        let mut root = Object::new(ObjectPath::from_static("/a"));
        root.children.push(Object::new(ObjectPath::from_static("/b")));
        assert!(to_xml(&root).is_none());
    }

    #[test]
    fn interface_members_are_rendered() {
        let in_sig = Signature::parse("su").unwrap();
        let out_sig = Signature::parse("v").unwrap();
        let mut iface = Interface::new(InterfaceName::from_static("org.example.Iface"));
        iface.methods.push(Method {
            name: MemberName::from_static("Get"),
            args: method_args(&in_sig, &out_sig),
        });
        iface.signals.push(Signal {
            name: MemberName::from_static("Changed"),
            args: signal_args(&Signature::parse("s").unwrap()),
        });
        iface.properties.push(Property {
            name: "Version".into(),
            ty: Type::Word32,
            access: PropertyAccess::Read,
        });

        let mut object = Object::new(ObjectPath::from_static("/"));
        object.interfaces.push(iface);
        let xml = to_xml(&object).unwrap();

        assert!(xml.contains("<interface name=\"org.example.Iface\">"));
        assert!(xml.contains("<method name=\"Get\">"));
        assert!(xml.contains("<arg type=\"s\" direction=\"in\"/>"));
        assert!(xml.contains("<arg type=\"u\" direction=\"in\"/>"));
        assert!(xml.contains("<arg type=\"v\" direction=\"out\"/>"));
        assert!(xml.contains("<signal name=\"Changed\">"));
        assert!(xml.contains("<arg type=\"s\"/>"));
        assert!(xml.contains("<property name=\"Version\" type=\"u\" access=\"read\"/>"));
    }

    #[test]
    fn escaping() {
        assert_eq!(escape("a<b>&\"'"), "a&lt;b&gt;&amp;&quot;&apos;");
    }
}

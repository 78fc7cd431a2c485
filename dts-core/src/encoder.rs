//! DTS encoder.
//!
//! Rendering is total: every [`DtsMap`] that passed the tree store's checks
//! has a textual form, so the encoder is a plain [`fmt::Display`]
//! implementation.

use std::fmt::{self, Write};

use crate::node::DtsNode;
use crate::tree::DtsMap;
use crate::value::{Cell, PropertyEntry, PropertyValue};

const INDENT: usize = 4;

/// Render a device tree as DTS source text.
///
/// The output is canonical: decoding it yields a model equal to `tree`.
///
/// # Examples
///
/// ```
/// # use dts_core::{to_string, DtsMap, Node, PropertyValue};
/// let mut tree = DtsMap::new();
/// let isp = Node::builder("isp@0").property("blob", vec![0x00u8, 0xff]).build();
/// tree.insert_child("/", isp).unwrap();
/// assert!(to_string(&tree).contains("blob = [00 ff];"));
/// ```
pub fn to_string(tree: &DtsMap) -> String {
    tree.to_string()
}

impl fmt::Display for DtsMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "/dts-v1/;")?;
        writeln!(f)?;
        if !self.memory_reservations().is_empty() {
            for r in self.memory_reservations() {
                writeln!(f, "/memreserve/ {:#x} {:#x};", r.address, r.size)?;
            }
            writeln!(f)?;
        }
        self.fmt_node(f, self.root(), 0)
    }
}

impl DtsMap {
    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, node: &DtsNode, indent: usize) -> fmt::Result {
        write!(f, "{:indent$}", "", indent = indent)?;
        for label in node.labels() {
            write!(f, "{label}: ")?;
        }
        if node.is_root() {
            writeln!(f, "/ {{")?;
        } else {
            writeln!(f, "{} {{", node.name())?;
        }

        for prop in node.properties() {
            fmt_property(f, prop, indent + INDENT)?;
        }

        for child in self.children(node) {
            writeln!(f)?;
            self.fmt_node(f, child, indent + INDENT)?;
        }

        writeln!(f, "{:indent$}}};", "", indent = indent)
    }
}

fn fmt_property(f: &mut fmt::Formatter<'_>, prop: &PropertyEntry, indent: usize) -> fmt::Result {
    write!(f, "{:indent$}{}", "", prop.name, indent = indent)?;
    match &prop.value {
        PropertyValue::Empty => {}
        PropertyValue::Text(s) => {
            f.write_str(" = ")?;
            fmt_string(f, s)?;
        }
        PropertyValue::TextList(list) => {
            f.write_str(" = ")?;
            for (i, s) in list.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                fmt_string(f, s)?;
            }
        }
        PropertyValue::Cells(cells) => {
            f.write_str(" = <")?;
            for (i, cell) in cells.iter().enumerate() {
                if i > 0 {
                    f.write_char(' ')?;
                }
                match cell {
                    Cell::Num(n) => write!(f, "{n:#x}")?,
                    Cell::Ref(label) => write!(f, "&{label}")?,
                }
            }
            f.write_char('>')?;
        }
        PropertyValue::PhandleRef(label) => write!(f, " = &{label}")?,
        PropertyValue::Bytes(bytes) => {
            f.write_str(" = [")?;
            for (i, b) in bytes.iter().enumerate() {
                if i > 0 {
                    f.write_char(' ')?;
                }
                write!(f, "{b:02x}")?;
            }
            f.write_char(']')?;
        }
    }
    writeln!(f, ";")
}

/// Write a quoted string literal.
fn fmt_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c if c.is_control() => write!(f, "\\x{:02x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::value::MemoryReservation;
    use pretty_assertions::assert_eq;

    fn encode_property(name: &str, value: PropertyValue) -> String {
        let mut tree = DtsMap::new();
        tree.set_property("/", PropertyEntry::new(name, value)).unwrap();
        let text = to_string(&tree);
        text.lines()
            .find(|line| line.trim_start().starts_with(name))
            .map(|line| line.trim().to_owned())
            .unwrap()
    }

    #[test]
    fn property_rendering() {
        use PropertyValue::*;

        for (name, value, expected) in [
            ("cache-unified", Empty, "cache-unified;"),
            ("status", Text("okay".into()), r#"status = "okay";"#),
            (
                "compatible",
                TextList(vec!["sony,imx219".into(), "sony,imx".into()]),
                r#"compatible = "sony,imx219", "sony,imx";"#,
            ),
            ("reg", Cells(vec![Cell::Num(0), Cell::Num(4096)]), "reg = <0x0 0x1000>;"),
            (
                "clocks",
                Cells(vec![Cell::Ref("cru".into()), Cell::Num(31)]),
                "clocks = <&cru 0x1f>;",
            ),
            ("pinctrl-0", Cells(vec![]), "pinctrl-0 = <>;"),
            ("remote", PhandleRef("csi0".into()), "remote = &csi0;"),
            ("blob", Bytes(vec![0x00, 0xff]), "blob = [00 ff];"),
            ("empty", Bytes(vec![]), "empty = [];"),
        ] {
            assert_eq!(encode_property(name, value), expected);
        }
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(
            encode_property("model", PropertyValue::Text("a \"b\" \\ c\n\t\u{1}".into())),
            r#"model = "a \"b\" \\ c\n\t\x01";"#
        );
    }

    #[test]
    fn full_tree() {
        let mut tree = DtsMap::from_root(
            Node::builder("")
                .property("#address-cells", 1u32)
                .child(
                    Node::builder("isp@fe801000")
                        .label("isp0")
                        .property("status", "okay")
                        .child(Node::builder("port").property("reg", 0u32).build())
                        .build(),
                )
                .child(Node::new("chosen"))
                .build(),
        )
        .unwrap();
        tree.memory_reservations_mut()
            .push(MemoryReservation::new(0x1000_0000, 0x4000));

        let expected = "\
/dts-v1/;

/memreserve/ 0x10000000 0x4000;

/ {
    #address-cells = <0x1>;

    isp0: isp@fe801000 {
        status = \"okay\";

        port {
            reg = <0x0>;
        };
    };

    chosen {
    };
};
";
        assert_eq!(to_string(&tree), expected);
    }
}

//! In-memory device tree model with a DTS text encoder and decoder.
//!
//! A [`DtsMap`] stores the nodes of a tree in pre-order together with a
//! path index, so any node can be looked up by its absolute path in constant
//! time. [`from_str`] decodes DTS source text into a tree and [`to_string`]
//! renders a tree back into canonical DTS text; the two are inverses of each
//! other up to formatting.
//!
//! ```
//! use dts_core::{from_str, to_string, PropertyValue};
//!
//! let source = r#"
//!     /dts-v1/;
//!     / {
//!         isp@0 {
//!             status = "okay";
//!             reg = <0x0>;
//!         };
//!     };
//! "#;
//!
//! let tree = from_str(source).unwrap();
//! let isp = tree.lookup("/isp@0").unwrap();
//! assert_eq!(isp.property("reg"), Some(&PropertyValue::from(0u32)));
//!
//! let again = from_str(&to_string(&tree)).unwrap();
//! assert_eq!(tree, again);
//! ```

mod encoder;
mod error;
mod lexer;
mod node;
mod parser;
mod tree;
mod value;

pub use encoder::to_string;
pub use error::{Error, Location, Result};
pub use node::{DtsNode, Node, NodeBuilder};
pub use parser::from_str;
pub use tree::{DtsMap, ROOT_PATH};
pub use value::{Cell, MemoryReservation, PropertyEntry, PropertyValue};

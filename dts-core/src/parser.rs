//! DTS decoder.
//!
//! The decoder runs over the token stream produced by the lexer. It is a
//! small state machine; nested nodes are tracked with an explicit stack of
//! frames rather than recursion. The tree is assembled as detached
//! [`Node`]s and flattened into a [`DtsMap`] once the whole input has been
//! accepted, so a failure never yields a partial tree.

use std::collections::HashSet;

use crate::error::{Error, Location, Result};
use crate::lexer::{tokenize, Spanned, Token};
use crate::node::{is_valid_label, is_valid_node_name, join_path, Node};
use crate::tree::DtsMap;
use crate::value::{Cell, MemoryReservation, PropertyEntry, PropertyValue};

/// Parse a device tree from DTS source text.
///
/// # Examples
///
/// ```
/// # use dts_core::{from_str, PropertyValue};
/// let tree = from_str("/dts-v1/;\n/ { isp@0 { status = \"okay\"; }; };").unwrap();
/// let isp = tree.lookup("/isp@0").unwrap();
/// assert_eq!(isp.property("status"), Some(&PropertyValue::from("okay")));
/// ```
pub fn from_str(source: &str) -> Result<DtsMap> {
    let tokens = tokenize(source)?;
    Decoder::new(tokens).run()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ExpectHeader,
    ExpectRootNode,
    InNodeBody,
    AfterRoot,
    Done,
}

/// Where a top-level block is merged once it closes.
#[derive(Debug)]
enum Target {
    Root,
    Label(String),
}

/// A node whose body is being parsed.
#[derive(Debug)]
struct Frame {
    node: Node,
    path: String,
    child_names: HashSet<String>,
}

impl Frame {
    fn new(node: Node, path: String) -> Self {
        Self {
            node,
            path,
            child_names: HashSet::new(),
        }
    }
}

/// One comma-separated piece of a property value.
enum Group {
    Str(String),
    Cells(Vec<Cell>),
    Bytes(Vec<u8>),
    Ref(String),
}

struct Decoder {
    tokens: Vec<Spanned>,
    pos: usize,
    frames: Vec<Frame>,
    target: Target,
    root: Option<Node>,
    reservations: Vec<MemoryReservation>,
}

impl Decoder {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
            frames: Vec::new(),
            target: Target::Root,
            root: None,
            reservations: Vec::new(),
        }
    }

    fn run(mut self) -> Result<DtsMap> {
        let mut state = State::ExpectHeader;
        while state != State::Done {
            state = match state {
                State::ExpectHeader => self.header()?,
                State::ExpectRootNode => self.root_opener()?,
                State::InNodeBody => self.node_body()?,
                State::AfterRoot => self.top_level()?,
                State::Done => State::Done,
            };
        }

        let location = self.peek().location;
        let root = self.root.ok_or(Error::MalformedRoot { location })?;
        let mut tree = DtsMap::from_root(root)?;
        tree.set_memory_reservations(self.reservations);
        Ok(tree)
    }

    /* === States === */

    /// Expect the `/dts-v1/;` header.
    fn header(&mut self) -> Result<State> {
        let location = self.peek().location;
        match (self.peek_token(0), self.peek_token(1)) {
            (Token::Version, Token::Punct(';')) => {
                self.pos += 2;
                Ok(State::ExpectRootNode)
            }
            _ => Err(Error::MissingHeader { location }),
        }
    }

    /// Expect any `/memreserve/` entries followed by `/ {`.
    fn root_opener(&mut self) -> Result<State> {
        while *self.peek_token(0) == Token::MemReserve {
            self.bump();
            let address = self.reservation_number("reservation address")?;
            let size = self.reservation_number("reservation size")?;
            self.expect_punct(';')?;
            self.reservations.push(MemoryReservation::new(address, size));
        }

        let location = self.peek().location;
        let labels = self.labels()?;
        match (self.peek_token(0), self.peek_token(1)) {
            (Token::Punct('/'), Token::Punct('{')) => {
                self.pos += 2;
                self.open_block(Target::Root, "/".to_owned(), labels);
                Ok(State::InNodeBody)
            }
            _ => Err(Error::MalformedRoot { location }),
        }
    }

    /// Handle one statement inside the innermost open node.
    fn node_body(&mut self) -> Result<State> {
        let Spanned { token, location } = self.peek().clone();
        match token {
            Token::Punct('}') => self.close_node(),
            Token::Eof => Err(Error::UnterminatedNode {
                path: self.frame().path.clone(),
                location,
            }),
            Token::Word(name) => match self.peek_token(1) {
                Token::Punct(':' | '@' | '{') => {
                    self.child_node()?;
                    Ok(State::InNodeBody)
                }
                Token::Punct('=') => {
                    self.pos += 2;
                    let value = self.property_value(&name)?;
                    self.end_property(&name)?;
                    self.frame_mut()
                        .node
                        .set_property(PropertyEntry::new(name, value));
                    Ok(State::InNodeBody)
                }
                Token::Punct(';') => {
                    self.pos += 2;
                    self.frame_mut().node.set_property(PropertyEntry::flag(name));
                    Ok(State::InNodeBody)
                }
                Token::Eof => Err(Error::UnterminatedProperty {
                    name,
                    location: self.peek_nth(1).location,
                }),
                _ => Err(self.unexpected(1, "`=`, `;` or `{`")),
            },
            _ => Err(self.unexpected(0, "a property or a child node")),
        }
    }

    /// Accept further root blocks, `&label` overrides or the end of input.
    fn top_level(&mut self) -> Result<State> {
        let Spanned { token, location } = self.peek().clone();
        match token {
            Token::Eof => Ok(State::Done),
            Token::Punct('/') | Token::Word(_) => {
                let labels = self.labels()?;
                if *self.peek_token(0) != Token::Punct('/') {
                    return Err(self.unexpected(0, "`/`"));
                }
                self.bump();
                self.expect_punct('{')?;
                self.open_block(Target::Root, "/".to_owned(), labels);
                Ok(State::InNodeBody)
            }
            Token::Ref(label) => {
                if !is_valid_label(&label) {
                    return Err(self.unexpected(0, "a label reference"));
                }
                self.bump();
                self.expect_punct('{')?;

                let path = self
                    .root
                    .as_ref()
                    .and_then(|root| root.label_path("/", &label))
                    .ok_or(Error::UnknownLabel { label, location })?;
                self.open_block(Target::Label(path.clone()), path, Vec::new());
                Ok(State::InNodeBody)
            }
            _ => Err(Error::UnexpectedToken {
                expected: "a root node, a `&label` override or the end of input".into(),
                found: token.describe(),
                location,
            }),
        }
    }

    /* === Nodes === */

    fn open_block(&mut self, target: Target, path: String, labels: Vec<String>) {
        let mut node = Node::default();
        for label in labels {
            node.add_label(label);
        }
        self.target = target;
        self.frames.push(Frame::new(node, path));
    }

    /// Consume any `label:` prefixes.
    fn labels(&mut self) -> Result<Vec<String>> {
        let mut labels = Vec::new();
        while let (Token::Word(label), Token::Punct(':')) = (self.peek_token(0), self.peek_token(1))
        {
            if !is_valid_label(label) {
                return Err(self.unexpected(0, "a label"));
            }
            labels.push(label.clone());
            self.pos += 2;
        }
        Ok(labels)
    }

    /// Parse `[label:]... name[@unit] {` and open a frame for it.
    fn child_node(&mut self) -> Result<()> {
        let labels = self.labels()?;

        let location = self.peek().location;
        let mut name = match self.peek_token(0) {
            Token::Word(name) => name.clone(),
            _ => return Err(self.unexpected(0, "a node name")),
        };
        self.bump();
        if *self.peek_token(0) == Token::Punct('@') {
            self.bump();
            match self.peek_token(0) {
                Token::Word(unit) => {
                    name.push('@');
                    name.push_str(unit);
                }
                _ => return Err(self.unexpected(0, "a unit address")),
            }
            self.bump();
        }
        if !is_valid_node_name(&name) {
            return Err(Error::UnexpectedToken {
                expected: "a node name".into(),
                found: format!("`{name}`"),
                location,
            });
        }
        self.expect_punct('{')?;

        let parent = self.frame_mut();
        let path = join_path(&parent.path, &name);
        if !parent.child_names.insert(name.clone()) {
            return Err(Error::DuplicatePath {
                path,
                location: Some(location),
            });
        }

        let mut node = Node::new(name);
        for label in labels {
            node.add_label(label);
        }
        self.frames.push(Frame::new(node, path));
        Ok(())
    }

    /// Consume `};` and attach the finished node to its parent.
    fn close_node(&mut self) -> Result<State> {
        self.bump();
        let Spanned { token, location } = self.peek().clone();
        match token {
            Token::Punct(';') => self.bump(),
            Token::Eof => {
                return Err(Error::UnterminatedNode {
                    path: self.frame().path.clone(),
                    location,
                })
            }
            _ => return Err(self.unexpected(0, "`;`")),
        };

        let Some(frame) = self.frames.pop() else {
            unreachable!("a node body is always parsed inside a frame");
        };
        if let Some(parent) = self.frames.last_mut() {
            parent.node.add_child(frame.node);
            return Ok(State::InNodeBody);
        }

        match std::mem::replace(&mut self.target, Target::Root) {
            Target::Root => match self.root.as_mut() {
                Some(root) => root.merge(frame.node),
                None => self.root = Some(frame.node),
            },
            Target::Label(path) => {
                if let Some(node) = self.root.as_mut().and_then(|r| r.descendant_mut(&path)) {
                    node.merge(frame.node);
                }
            }
        }
        Ok(State::AfterRoot)
    }

    /* === Property values === */

    /// Parse a property value, after `=` and up to (not including) `;`.
    fn property_value(&mut self, name: &str) -> Result<PropertyValue> {
        let mut groups: Vec<(Group, Location)> = Vec::new();
        loop {
            let Spanned { token, location } = self.peek().clone();
            let group = match token {
                Token::Str(s) => {
                    self.bump();
                    Group::Str(s)
                }
                Token::Punct('<') => {
                    self.bump();
                    Group::Cells(self.cells(name)?)
                }
                Token::Punct('[') => {
                    self.bump();
                    Group::Bytes(self.bytes(name)?)
                }
                Token::Ref(label) => Group::Ref(self.reference(label, location)?),
                Token::Eof => {
                    return Err(Error::UnterminatedProperty {
                        name: name.to_owned(),
                        location,
                    })
                }
                other => {
                    return Err(Error::InvalidValueSyntax {
                        message: format!("a value cannot start with {}", other.describe()),
                        location,
                    })
                }
            };
            groups.push((group, location));

            if *self.peek_token(0) == Token::Punct(',') {
                self.bump();
            } else {
                break;
            }
        }
        combine(groups)
    }

    /// Parse the inside of `<...>` after the opening chevron.
    fn cells(&mut self, name: &str) -> Result<Vec<Cell>> {
        let mut cells = Vec::new();
        loop {
            let Spanned { token, location } = self.peek().clone();
            match token {
                Token::Punct('>') => {
                    self.bump();
                    return Ok(cells);
                }
                Token::Word(w) => {
                    let n = parse_integer(&w)
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| Error::InvalidValueSyntax {
                            message: format!("`{w}` is not a 32-bit cell"),
                            location,
                        })?;
                    self.bump();
                    cells.push(Cell::Num(n));
                }
                Token::Ref(label) => cells.push(Cell::Ref(self.reference(label, location)?)),
                Token::Eof => {
                    return Err(Error::UnterminatedProperty {
                        name: name.to_owned(),
                        location,
                    })
                }
                other => {
                    return Err(Error::InvalidValueSyntax {
                        message: format!("unexpected {} in a cell array", other.describe()),
                        location,
                    })
                }
            }
        }
    }

    /// Parse the inside of `[...]` after the opening bracket. Bytes may be
    /// separated by whitespace or run together (`[0011 2233]`).
    fn bytes(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        loop {
            let Spanned { token, location } = self.peek().clone();
            match token {
                Token::Punct(']') => {
                    self.bump();
                    return Ok(bytes);
                }
                Token::Word(w) => {
                    let invalid = || Error::InvalidValueSyntax {
                        message: format!("`{w}` is not a sequence of hex byte pairs"),
                        location,
                    };
                    if w.len() % 2 != 0 || !w.chars().all(|c| c.is_ascii_hexdigit()) {
                        return Err(invalid());
                    }
                    for pair in w.as_bytes().chunks(2) {
                        let pair = std::str::from_utf8(pair).map_err(|_| invalid())?;
                        bytes.push(u8::from_str_radix(pair, 16).map_err(|_| invalid())?);
                    }
                    self.bump();
                }
                Token::Eof => {
                    return Err(Error::UnterminatedProperty {
                        name: name.to_owned(),
                        location,
                    })
                }
                other => {
                    return Err(Error::InvalidValueSyntax {
                        message: format!("unexpected {} in a byte string", other.describe()),
                        location,
                    })
                }
            }
        }
    }

    /// Accept the `&label` token under the cursor.
    fn reference(&mut self, label: String, location: Location) -> Result<String> {
        if !is_valid_label(&label) {
            return Err(Error::InvalidValueSyntax {
                message: format!("`&{label}` does not refer to a valid label"),
                location,
            });
        }
        self.bump();
        Ok(label)
    }

    fn end_property(&mut self, name: &str) -> Result<()> {
        let Spanned { token, location } = self.peek().clone();
        if token == Token::Punct(';') {
            self.bump();
            Ok(())
        } else {
            Err(Error::UnterminatedProperty {
                name: name.to_owned(),
                location,
            })
        }
    }

    fn reservation_number(&mut self, expected: &str) -> Result<u64> {
        if let Token::Word(w) = self.peek_token(0) {
            if let Some(n) = parse_integer(w) {
                self.bump();
                return Ok(n);
            }
        }
        Err(self.unexpected(0, expected))
    }

    /* === Cursor === */

    fn peek(&self) -> &Spanned {
        self.peek_nth(0)
    }

    /// The stream always ends with `Eof`, which is returned for any lookahead
    /// past the end.
    fn peek_nth(&self, n: usize) -> &Spanned {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn peek_token(&self, n: usize) -> &Token {
        &self.peek_nth(n).token
    }

    fn bump(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<()> {
        if *self.peek_token(0) == Token::Punct(c) {
            self.bump();
            Ok(())
        } else {
            Err(self.unexpected(0, &format!("`{c}`")))
        }
    }

    fn unexpected(&self, n: usize, expected: &str) -> Error {
        let Spanned { token, location } = self.peek_nth(n);
        Error::UnexpectedToken {
            expected: expected.to_owned(),
            found: token.describe(),
            location: *location,
        }
    }

    fn frame(&self) -> &Frame {
        let Some(frame) = self.frames.last() else {
            unreachable!("a node body is always parsed inside a frame");
        };
        frame
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let Some(frame) = self.frames.last_mut() else {
            unreachable!("a node body is always parsed inside a frame");
        };
        frame
    }
}

/// Classify the comma-separated groups of a value into one variant.
///
/// Strings form a `Text` or `TextList`; cell arrays and byte strings are
/// concatenated; a reference must stand alone. Anything else is ambiguous
/// and rejected.
fn combine(groups: Vec<(Group, Location)>) -> Result<PropertyValue> {
    let mut iter = groups.into_iter();
    let Some((first, _)) = iter.next() else {
        unreachable!("a property value has at least one group");
    };

    let kind = std::mem::discriminant(&first);
    let mut value = match first {
        Group::Str(s) => PropertyValue::TextList(vec![s]),
        Group::Cells(cells) => PropertyValue::Cells(cells),
        Group::Bytes(bytes) => PropertyValue::Bytes(bytes),
        Group::Ref(label) => PropertyValue::PhandleRef(label),
    };
    for (group, location) in iter {
        if std::mem::discriminant(&group) != kind {
            return Err(Error::InvalidValueSyntax {
                message: "a property value cannot mix value kinds".into(),
                location,
            });
        }
        match (&mut value, group) {
            (PropertyValue::TextList(list), Group::Str(s)) => list.push(s),
            (PropertyValue::Cells(cells), Group::Cells(more)) => cells.extend(more),
            (PropertyValue::Bytes(bytes), Group::Bytes(more)) => bytes.extend(more),
            _ => {
                return Err(Error::InvalidValueSyntax {
                    message: "a phandle reference must stand alone".into(),
                    location,
                })
            }
        }
    }
    Ok(value.normalized())
}

/// Parse an integer literal: `0x` hex, leading-zero octal or decimal, with
/// optional C `U`/`L` suffixes.
fn parse_integer(word: &str) -> Option<u64> {
    let digits = word.trim_end_matches(['u', 'U', 'l', 'L']);
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8).ok()
    } else {
        digits.parse().ok()
    }
}

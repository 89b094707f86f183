//! Lenient HTML tree builder for server fragments.
//!
//! Fragments come from a trusted dashboard server, so the builder only needs to
//! recover the element structure and attributes the dispatcher keys on. It never
//! rejects input: unknown constructs are skipped and unbalanced tags are closed
//! at the end of the input.

/// Element node with lowercase tag/attribute names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    fn root() -> Self {
        Self {
            tag: "#root".to_owned(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(key, _)| key == name)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|item| item == class))
    }

    pub fn classes(&self) -> Vec<String> {
        self.attr("class")
            .map(|classes| classes.split_ascii_whitespace().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// Concatenated descendant text, raw-text elements excluded.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        if self.attr("id") == Some(id) {
            return Some(self);
        }

        self.children.iter().find_map(|child| match child {
            Node::Element(element) => element.find_by_id(id),
            Node::Text(_) => None,
        })
    }

    pub fn find_tag(&self, tag: &str) -> Option<&Element> {
        if self.tag == tag {
            return Some(self);
        }

        self.children.iter().find_map(|child| match child {
            Node::Element(element) => element.find_tag(tag),
            Node::Text(_) => None,
        })
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                if is_raw_text_tag(&element.tag) {
                    continue;
                }
                collect_text(&element.children, out);
            }
        }
    }
}

/// Re-serializes the children of `element`.
pub fn inner_html(element: &Element) -> String {
    let mut out = String::new();
    for child in &element.children {
        write_node(child, &mut out);
    }
    out
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Text(text) => out.push_str(&escape_text(text)),
        Node::Element(element) => {
            out.push('<');
            out.push_str(&element.tag);
            for (name, value) in &element.attrs {
                out.push(' ');
                out.push_str(name);
                if !value.is_empty() {
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
            }
            out.push('>');

            if is_void(&element.tag) {
                return;
            }

            for child in &element.children {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(&element.tag);
            out.push('>');
        }
    }
}

fn escape_text(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(input: &str) -> String {
    escape_text(input).replace('"', "&quot;")
}

#[derive(Debug)]
enum Token {
    Open {
        tag: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    Close {
        tag: String,
    },
    Text(String),
}

/// Builds an element tree rooted at a synthetic `#root` element.
pub fn parse(source: &str) -> Element {
    build_tree(Tokenizer::new(source).run())
}

struct Tokenizer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
}

impl<'a> Tokenizer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Token> {
        while self.pos < self.bytes.len() {
            if self.bytes[self.pos] != b'<' {
                self.text();
                continue;
            }

            if self.starts_with(b"<!--") {
                self.pos = find_subslice(self.bytes, self.pos + 4, b"-->")
                    .map(|end| end + 3)
                    .unwrap_or(self.bytes.len());
                continue;
            }

            if self.starts_with(b"<!") || self.starts_with(b"<?") {
                self.pos = find_byte(self.bytes, self.pos, b'>')
                    .map(|end| end + 1)
                    .unwrap_or(self.bytes.len());
                continue;
            }

            if self.starts_with(b"</") {
                if !self.close_tag() {
                    self.literal_lt();
                }
                continue;
            }

            if !self.open_tag() {
                self.literal_lt();
            }
        }

        self.tokens
    }

    fn starts_with(&self, pattern: &[u8]) -> bool {
        self.bytes[self.pos..].starts_with(pattern)
    }

    fn literal_lt(&mut self) {
        self.tokens.push(Token::Text("<".to_owned()));
        self.pos += 1;
    }

    fn text(&mut self) {
        let end = find_byte(self.bytes, self.pos, b'<').unwrap_or(self.bytes.len());
        let raw = &self.source[self.pos..end];
        if !raw.is_empty() {
            self.tokens.push(Token::Text(decode_entities(raw)));
        }
        self.pos = end;
    }

    fn name_at(&self, start: usize) -> (String, usize) {
        let mut end = start;
        while end < self.bytes.len() && is_name_char(self.bytes[end]) {
            end += 1;
        }
        (self.source[start..end].to_ascii_lowercase(), end)
    }

    fn close_tag(&mut self) -> bool {
        let (tag, after_name) = self.name_at(self.pos + 2);
        if tag.is_empty() {
            return false;
        }

        let Some(gt) = find_byte(self.bytes, after_name, b'>') else {
            return false;
        };
        self.tokens.push(Token::Close { tag });
        self.pos = gt + 1;
        true
    }

    fn open_tag(&mut self) -> bool {
        let (tag, mut cursor) = self.name_at(self.pos + 1);
        if tag.is_empty() {
            return false;
        }

        let mut attrs = Vec::new();
        let mut self_closing = false;

        loop {
            cursor = skip_spaces(self.bytes, cursor);
            match self.bytes.get(cursor).copied() {
                None => return false,
                Some(b'>') => {
                    cursor += 1;
                    break;
                }
                Some(b'/') => {
                    self_closing = true;
                    cursor += 1;
                }
                Some(_) => {
                    let (name, after_name) = self.attr_name_at(cursor);
                    if name.is_empty() {
                        cursor += 1;
                        continue;
                    }
                    let (value, after_value) = self.attr_value_at(after_name);
                    attrs.push((name, decode_entities(&value)));
                    cursor = after_value;
                }
            }
        }

        let raw_text = !self_closing && is_raw_text_tag(&tag);
        self.tokens.push(Token::Open {
            tag: tag.clone(),
            attrs,
            self_closing,
        });
        self.pos = cursor;

        if raw_text {
            self.raw_text_until_close(&tag);
        }
        true
    }

    fn attr_name_at(&self, start: usize) -> (String, usize) {
        let mut end = start;
        while end < self.bytes.len()
            && !self.bytes[end].is_ascii_whitespace()
            && !matches!(self.bytes[end], b'=' | b'>' | b'/' | b'"' | b'\'')
        {
            end += 1;
        }
        (self.source[start..end].to_ascii_lowercase(), end)
    }

    fn attr_value_at(&self, start: usize) -> (String, usize) {
        let cursor = skip_spaces(self.bytes, start);
        if self.bytes.get(cursor).copied() != Some(b'=') {
            return (String::new(), start);
        }

        let cursor = skip_spaces(self.bytes, cursor + 1);
        match self.bytes.get(cursor).copied() {
            Some(quote @ (b'"' | b'\'')) => {
                let end = find_byte(self.bytes, cursor + 1, quote).unwrap_or(self.bytes.len());
                let value = self.source[cursor + 1..end].to_owned();
                (value, (end + 1).min(self.bytes.len()))
            }
            _ => {
                let mut end = cursor;
                while end < self.bytes.len()
                    && !self.bytes[end].is_ascii_whitespace()
                    && self.bytes[end] != b'>'
                {
                    end += 1;
                }
                (self.source[cursor..end].to_owned(), end)
            }
        }
    }

    fn raw_text_until_close(&mut self, tag: &str) {
        let closing = format!("</{tag}");
        let mut cursor = self.pos;
        while cursor < self.bytes.len() {
            if self.bytes[cursor..]
                .get(..closing.len())
                .is_some_and(|window| window.eq_ignore_ascii_case(closing.as_bytes()))
            {
                break;
            }
            cursor += 1;
        }

        if cursor > self.pos {
            self.tokens
                .push(Token::Text(self.source[self.pos..cursor].to_owned()));
        }
        self.pos = cursor;
    }
}

fn build_tree(tokens: Vec<Token>) -> Element {
    let mut stack = vec![Element::root()];

    for token in tokens {
        match token {
            Token::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.children.push(Node::Text(text));
                }
            }
            Token::Open {
                tag,
                attrs,
                self_closing,
            } => {
                let element = Element {
                    tag,
                    attrs,
                    children: Vec::new(),
                };
                if self_closing || is_void(&element.tag) {
                    if let Some(current) = stack.last_mut() {
                        current.children.push(Node::Element(element));
                    }
                } else {
                    stack.push(element);
                }
            }
            Token::Close { tag } => {
                // Stray end tags with no matching open element are dropped.
                if !stack.iter().skip(1).any(|open| open.tag == tag) {
                    continue;
                }
                while stack.len() > 1 {
                    let Some(done) = stack.pop() else {
                        break;
                    };
                    let matched = done.tag == tag;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Element(done));
                    }
                    if matched {
                        break;
                    }
                }
            }
        }
    }

    while stack.len() > 1 {
        let Some(done) = stack.pop() else {
            break;
        };
        if let Some(parent) = stack.last_mut() {
            parent.children.push(Node::Element(done));
        }
    }

    stack.pop().unwrap_or_else(Element::root)
}

pub(crate) fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_owned();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        let decoded = tail
            .find(';')
            .filter(|semi| *semi <= 10)
            .and_then(|semi| decode_entity(&tail[..semi]).map(|ch| (ch, semi)));

        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let number = entity.strip_prefix('#')?;
            let value = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse::<u32>().ok()?,
            };
            char::from_u32(value)
        }
    }
}

fn skip_spaces(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx += 1;
    }
    idx
}

fn is_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn is_raw_text_tag(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "textarea")
}

fn is_void(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "source"
            | "track"
            | "wbr"
    )
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }

    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_byte(bytes: &[u8], from: usize, byte: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|candidate| *candidate == byte)
        .map(|offset| from + offset)
}

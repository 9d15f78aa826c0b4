//
// jsonc.rs
//
// Position-tracking parser for the JSON dialect used by manifest files
//
// Manifests are JSON with two relaxations: `//` and `/* */` comments, and
// trailing commas in arrays and objects. Every parsed node records the byte
// offset and length of its source span so the manifest layer can report
// line/column sections. String spans include both quote characters.
//

use std::fmt;

/// A parsed value together with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Byte offset of the first character of the value.
    pub offset: usize,
    /// Byte length of the value, including string quotes.
    pub length: usize,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// Raw source text of the number literal.
    Number(String),
    /// Decoded string contents (escapes resolved, quotes stripped).
    String(String),
    Array(Vec<Node>),
    Object(Vec<Property>),
}

/// One `"key": value` entry of an object.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: String,
    /// Byte offset of the key's opening quote.
    pub key_offset: usize,
    /// Byte length of the key literal, including quotes.
    pub key_length: usize,
    pub value: Node,
}

impl Node {
    /// Object member lookup by key. Returns `None` for non-objects.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match &self.value {
            Value::Object(props) => props.iter().find(|p| p.key == key).map(|p| &p.value),
            _ => None,
        }
    }

    /// Array elements, or `None` for non-arrays.
    pub fn items(&self) -> Option<&[Node]> {
        match &self.value {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self.value, Value::String(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.value, Value::Array(_))
    }

    /// Scalar value rendered as text, taken verbatim from the source for
    /// numbers. Containers yield `None`.
    pub fn scalar_text(&self) -> Option<String> {
        match &self.value {
            Value::Null => Some("null".to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(raw) => Some(raw.clone()),
            Value::String(s) => Some(s.clone()),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// Parse failure with the byte offset where it occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

impl std::error::Error for ParseError {}

/// Parse a complete document into a node tree.
pub fn parse(text: &str) -> Result<Node, ParseError> {
    let mut parser = Parser {
        bytes: text.as_bytes(),
        pos: 0,
    };
    parser.skip_trivia()?;
    let root = parser.parse_value()?;
    parser.skip_trivia()?;
    if parser.pos < parser.bytes.len() {
        return Err(parser.error("unexpected trailing content"));
    }
    Ok(root)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> ParseError {
        ParseError {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    /// Skip whitespace and comments. Errors on an unterminated block comment.
    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => self.pos += 1,
                Some(b'/') => match self.bytes.get(self.pos + 1) {
                    Some(b'/') => {
                        self.pos += 2;
                        while let Some(b) = self.peek() {
                            self.pos += 1;
                            if b == b'\n' {
                                break;
                            }
                        }
                    }
                    Some(b'*') => {
                        let start = self.pos;
                        self.pos += 2;
                        loop {
                            match self.peek() {
                                Some(b'*') if self.bytes.get(self.pos + 1) == Some(&b'/') => {
                                    self.pos += 2;
                                    break;
                                }
                                Some(_) => self.pos += 1,
                                None => {
                                    return Err(ParseError {
                                        offset: start,
                                        message: "unterminated block comment".to_string(),
                                    });
                                }
                            }
                        }
                    }
                    _ => return Err(self.error("unexpected character '/'")),
                },
                _ => return Ok(()),
            }
        }
    }

    fn parse_value(&mut self) -> Result<Node, ParseError> {
        match self.peek() {
            Some(b'{') => self.parse_object(),
            Some(b'[') => self.parse_array(),
            Some(b'"') => self.parse_string_node(),
            Some(b't' | b'f' | b'n') => self.parse_literal(),
            Some(b'-' | b'0'..=b'9') => self.parse_number(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_object(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        self.pos += 1; // consume '{'
        let mut props = Vec::new();
        loop {
            self.skip_trivia()?;
            match self.peek() {
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                Some(b'"') => {
                    let key_offset = self.pos;
                    let key = self.parse_string_literal()?;
                    let key_length = self.pos - key_offset;
                    self.skip_trivia()?;
                    if self.peek() != Some(b':') {
                        return Err(self.error("expected ':' after object key"));
                    }
                    self.pos += 1;
                    self.skip_trivia()?;
                    let value = self.parse_value()?;
                    props.push(Property {
                        key,
                        key_offset,
                        key_length,
                        value,
                    });
                    self.skip_trivia()?;
                    match self.peek() {
                        Some(b',') => self.pos += 1, // trailing comma is fine
                        Some(b'}') => {}
                        _ => return Err(self.error("expected ',' or '}' in object")),
                    }
                }
                _ => return Err(self.error("expected object key or '}'")),
            }
        }
        Ok(Node {
            offset: start,
            length: self.pos - start,
            value: Value::Object(props),
        })
    }

    fn parse_array(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        self.pos += 1; // consume '['
        let mut items = Vec::new();
        loop {
            self.skip_trivia()?;
            match self.peek() {
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {
                    items.push(self.parse_value()?);
                    self.skip_trivia()?;
                    match self.peek() {
                        Some(b',') => self.pos += 1, // trailing comma is fine
                        Some(b']') => {}
                        _ => return Err(self.error("expected ',' or ']' in array")),
                    }
                }
                None => return Err(self.error("unterminated array")),
            }
        }
        Ok(Node {
            offset: start,
            length: self.pos - start,
            value: Value::Array(items),
        })
    }

    fn parse_string_node(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        let decoded = self.parse_string_literal()?;
        Ok(Node {
            offset: start,
            length: self.pos - start,
            value: Value::String(decoded),
        })
    }

    /// Parse a quoted string and return the decoded contents. Leaves the
    /// cursor one past the closing quote.
    fn parse_string_literal(&mut self) -> Result<String, ParseError> {
        self.pos += 1; // consume opening quote
        let mut out = String::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'"') => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'/') => out.push('/'),
                        Some(b'b') => out.push('\u{0008}'),
                        Some(b'f') => out.push('\u{000C}'),
                        Some(b'n') => out.push('\n'),
                        Some(b'r') => out.push('\r'),
                        Some(b't') => out.push('\t'),
                        Some(b'u') => {
                            self.pos += 1;
                            let code = self.parse_hex4()?;
                            // Surrogate pairs encode characters above the BMP.
                            let ch = if (0xD800..0xDC00).contains(&code) {
                                if self.peek() == Some(b'\\')
                                    && self.bytes.get(self.pos + 1) == Some(&b'u')
                                {
                                    self.pos += 2;
                                    let low = self.parse_hex4()?;
                                    if (0xDC00..0xE000).contains(&low) {
                                        let combined =
                                            0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                                        char::from_u32(combined)
                                    } else {
                                        None
                                    }
                                } else {
                                    None
                                }
                            } else {
                                char::from_u32(code)
                            };
                            match ch {
                                Some(c) => out.push(c),
                                None => return Err(self.error("invalid unicode escape")),
                            }
                            continue;
                        }
                        _ => return Err(self.error("invalid escape sequence")),
                    }
                    self.pos += 1;
                }
                Some(b'\n') | None => return Err(self.error("unterminated string")),
                Some(_) => {
                    // Copy a full UTF-8 sequence starting at pos.
                    let rest = &self.bytes[self.pos..];
                    let len = utf8_len(rest[0]);
                    let chunk = rest.get(..len).ok_or_else(|| self.error("invalid UTF-8"))?;
                    let s = std::str::from_utf8(chunk)
                        .map_err(|_| self.error("invalid UTF-8"))?;
                    out.push_str(s);
                    self.pos += len;
                }
            }
        }
    }

    /// Parse exactly four hex digits, leaving the cursor after them.
    fn parse_hex4(&mut self) -> Result<u32, ParseError> {
        let mut code: u32 = 0;
        for _ in 0..4 {
            let digit = match self.peek() {
                Some(b @ b'0'..=b'9') => u32::from(b - b'0'),
                Some(b @ b'a'..=b'f') => u32::from(b - b'a') + 10,
                Some(b @ b'A'..=b'F') => u32::from(b - b'A') + 10,
                _ => return Err(self.error("invalid unicode escape")),
            };
            code = code * 16 + digit;
            self.pos += 1;
        }
        Ok(code)
    }

    fn parse_literal(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        for (text, value) in [
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("null", Value::Null),
        ] {
            if self.bytes[self.pos..].starts_with(text.as_bytes()) {
                self.pos += text.len();
                return Ok(Node {
                    offset: start,
                    length: text.len(),
                    value,
                });
            }
        }
        Err(self.error("unexpected literal"))
    }

    fn parse_number(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let digits_start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.pos == digits_start {
            return Err(self.error("invalid number"));
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            let frac_start = self.pos;
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
            if self.pos == frac_start {
                return Err(self.error("invalid number"));
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            let exp_start = self.pos;
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
            if self.pos == exp_start {
                return Err(self.error("invalid number"));
            }
        }
        let raw = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.error("invalid UTF-8"))?
            .to_string();
        Ok(Node {
            offset: start,
            length: raw.len(),
            value: Value::Number(raw),
        })
    }
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

//! MOO values and their literal grammar
//!
//! Captured step results are re-serialized through this grammar when they
//! are substituted into later steps, so parsing and serialization must be
//! exact two-sided inverses of each other.

use std::fmt;

/// Object number for "no object"
pub const NOTHING: i64 = -1;
/// Object number for an ambiguous name match
pub const AMBIGUOUS_MATCH: i64 = -2;
/// Object number for a failed name match
pub const FAILED_MATCH: i64 = -3;
/// Object number some servers use as a non-existent-object sentinel
pub const NONEXISTENT: i64 = -4;

/// MOO error codes, in their server-internal numeric order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum ErrorCode {
    ENone,
    EType,
    EDiv,
    EPerm,
    EPropnf,
    EVerbnf,
    EVarnf,
    EInvind,
    ERecmove,
    EMaxrec,
    ERange,
    EArgs,
    ENacc,
    EInvarg,
    EQuota,
    EFloat,
    EFile,
    EExec,
    EIntrpt,
}

impl ErrorCode {
    const ALL: [(ErrorCode, &'static str); 19] = [
        (ErrorCode::ENone, "E_NONE"),
        (ErrorCode::EType, "E_TYPE"),
        (ErrorCode::EDiv, "E_DIV"),
        (ErrorCode::EPerm, "E_PERM"),
        (ErrorCode::EPropnf, "E_PROPNF"),
        (ErrorCode::EVerbnf, "E_VERBNF"),
        (ErrorCode::EVarnf, "E_VARNF"),
        (ErrorCode::EInvind, "E_INVIND"),
        (ErrorCode::ERecmove, "E_RECMOVE"),
        (ErrorCode::EMaxrec, "E_MAXREC"),
        (ErrorCode::ERange, "E_RANGE"),
        (ErrorCode::EArgs, "E_ARGS"),
        (ErrorCode::ENacc, "E_NACC"),
        (ErrorCode::EInvarg, "E_INVARG"),
        (ErrorCode::EQuota, "E_QUOTA"),
        (ErrorCode::EFloat, "E_FLOAT"),
        (ErrorCode::EFile, "E_FILE"),
        (ErrorCode::EExec, "E_EXEC"),
        (ErrorCode::EIntrpt, "E_INTRPT"),
    ];

    /// Parse an `E_*` token. Unknown tokens are rejected; the set of error
    /// codes is fixed by the language.
    pub fn parse(token: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|(_, name)| *name == token)
            .map(|(code, _)| *code)
    }

    /// The `E_*` token as it appears in MOO source
    pub fn name(&self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(code, _)| code == self)
            .map(|(_, name)| *name)
            .expect("every code is in ALL")
    }

    /// The server-internal numeric value (`E_NONE` = 0 .. `E_INTRPT` = 18)
    pub fn numeric(&self) -> i64 {
        Self::ALL
            .iter()
            .position(|(code, _)| code == self)
            .expect("every code is in ALL") as i64
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A MOO value: the substitution currency between captured variables and
/// subsequent step text.
#[derive(Debug, Clone)]
pub enum MooValue {
    Int(i64),
    Float(f64),
    Str(String),
    /// `{a, b, c}` — ordered
    List(Vec<MooValue>),
    /// `[k -> v, ...]` — insertion order preserved, irrelevant for equality
    Map(Vec<(MooValue, MooValue)>),
    /// `#N`; negative numbers are the match sentinels
    Obj(i64),
    /// `*#N`, or the bare `*anonymous*` some servers print for fresh anons
    Anon(Option<i64>),
    Err(ErrorCode),
}

impl MooValue {
    /// The runtime type tag as used in `expect.type`
    pub fn type_name(&self) -> &'static str {
        match self {
            MooValue::Int(_) => "int",
            MooValue::Float(_) => "float",
            MooValue::Str(_) => "str",
            MooValue::List(_) => "list",
            MooValue::Map(_) => "map",
            MooValue::Obj(_) => "obj",
            MooValue::Anon(_) => "anon",
            MooValue::Err(_) => "err",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MooValue::Int(i) => Some(*i as f64),
            MooValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// Structural equality: floats compare within 1e-9, int/float compare
/// numerically, map entry order is ignored. Everything else is exact.
impl PartialEq for MooValue {
    fn eq(&self, other: &Self) -> bool {
        use MooValue::*;
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => (a - b).abs() < 1e-9,
            (Int(a), Float(b)) | (Float(b), Int(a)) => (*a as f64 - b).abs() < 1e-9,
            (Str(a), Str(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter().any(|(bk, bv)| bk == k && bv == v)
                    })
            }
            (Obj(a), Obj(b)) => a == b,
            (Anon(a), Anon(b)) => a == b,
            (Err(a), Err(b)) => a == b,
            _ => false,
        }
    }
}

/// Canonical literal serialization, exactly as the value would be written
/// in MOO source. This is what `{name}` placeholders expand to.
impl fmt::Display for MooValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MooValue::Int(i) => write!(f, "{i}"),
            MooValue::Float(x) => {
                let s = format!("{x:?}");
                if s.contains('.') || s.contains('e') || s.contains('E') {
                    f.write_str(&s)
                } else {
                    write!(f, "{s}.0")
                }
            }
            MooValue::Str(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '\\' => f.write_str("\\\\")?,
                        '"' => f.write_str("\\\"")?,
                        _ => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
            MooValue::List(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
            MooValue::Map(pairs) => {
                f.write_str("[")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k} -> {v}")?;
                }
                f.write_str("]")
            }
            MooValue::Obj(n) => write!(f, "#{n}"),
            MooValue::Anon(Some(n)) => write!(f, "*#{n}"),
            MooValue::Anon(None) => f.write_str("*anonymous*"),
            MooValue::Err(e) => write!(f, "{e}"),
        }
    }
}

/// Parse a complete MOO literal. Trailing garbage is an error, with one
/// exception: an object reference may carry the server's echoed name
/// suffix (`#2  (Wizard)`), which is discarded.
pub fn parse_literal(text: &str) -> Result<MooValue, String> {
    let mut p = Parser::new(text);
    p.skip_ws();
    let value = p.parse_value()?;
    p.skip_ws();

    // Toast echoes the object name after the number
    if let MooValue::Obj(_) = value {
        if p.peek() == Some('(') {
            p.skip_object_name()?;
            p.skip_ws();
        }
    }

    if p.pos < p.src.len() {
        return Err(format!(
            "trailing input at offset {}: {:?}",
            p.pos,
            &text[p.pos..]
        ));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), String> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(format!(
                "expected {:?} at offset {}, found {:?}",
                c,
                self.pos,
                self.peek()
            ))
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn parse_value(&mut self) -> Result<MooValue, String> {
        match self.peek() {
            Some('#') => self.parse_objref(),
            Some('*') => self.parse_anon(),
            Some('"') => self.parse_string(),
            Some('{') => self.parse_list(),
            Some('[') => self.parse_map(),
            Some('E') => self.parse_error_or_number(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.parse_number(),
            other => Err(format!("unexpected input {:?} at offset {}", other, self.pos)),
        }
    }

    fn parse_signed_int(&mut self) -> Result<i64, String> {
        let start = self.pos;
        self.eat('-');
        let digits_start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.pos == digits_start {
            return Err(format!("expected digits at offset {}", self.pos));
        }
        self.src[start..self.pos]
            .parse::<i64>()
            .map_err(|e| e.to_string())
    }

    fn parse_objref(&mut self) -> Result<MooValue, String> {
        self.expect('#')?;
        Ok(MooValue::Obj(self.parse_signed_int()?))
    }

    fn parse_anon(&mut self) -> Result<MooValue, String> {
        self.expect('*')?;
        if self.eat('#') {
            return Ok(MooValue::Anon(Some(self.parse_signed_int()?)));
        }
        // bare "*anonymous*" form
        let rest = &self.src[self.pos..];
        if let Some(stripped) = rest.strip_prefix("anonymous*") {
            self.pos = self.src.len() - stripped.len();
            return Ok(MooValue::Anon(None));
        }
        Err(format!("malformed anonymous reference at offset {}", self.pos))
    }

    fn parse_string(&mut self) -> Result<MooValue, String> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string literal".to_string()),
                Some('"') => return Ok(MooValue::Str(out)),
                Some('\\') => match self.bump() {
                    None => return Err("unterminated escape in string literal".to_string()),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_list(&mut self) -> Result<MooValue, String> {
        self.expect('{')?;
        self.skip_ws();
        let mut items = Vec::new();
        if self.eat('}') {
            return Ok(MooValue::List(items));
        }
        loop {
            items.push(self.parse_value()?);
            self.skip_ws();
            if self.eat(',') {
                self.skip_ws();
                continue;
            }
            self.expect('}')?;
            return Ok(MooValue::List(items));
        }
    }

    fn parse_map(&mut self) -> Result<MooValue, String> {
        self.expect('[')?;
        self.skip_ws();
        let mut pairs = Vec::new();
        if self.eat(']') {
            return Ok(MooValue::Map(pairs));
        }
        loop {
            let key = self.parse_value()?;
            self.skip_ws();
            if !(self.eat('-') && self.eat('>')) {
                return Err(format!("expected '->' at offset {}", self.pos));
            }
            self.skip_ws();
            let value = self.parse_value()?;
            pairs.push((key, value));
            self.skip_ws();
            if self.eat(',') {
                self.skip_ws();
                continue;
            }
            self.expect(']')?;
            return Ok(MooValue::Map(pairs));
        }
    }

    fn parse_error_or_number(&mut self) -> Result<MooValue, String> {
        let rest = &self.src[self.pos..];
        if rest.starts_with("E_") {
            let end = rest
                .char_indices()
                .find(|(_, c)| !(c.is_ascii_uppercase() || *c == '_'))
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            let token = &rest[..end];
            let code = ErrorCode::parse(token)
                .ok_or_else(|| format!("unknown error code {token:?}"))?;
            self.pos += end;
            return Ok(MooValue::Err(code));
        }
        Err(format!("unexpected input at offset {}", self.pos))
    }

    fn parse_number(&mut self) -> Result<MooValue, String> {
        let start = self.pos;
        self.eat('-');
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.pos == start + usize::from(self.src[start..].starts_with('-')) {
            return Err(format!("expected digits at offset {}", self.pos));
        }

        let mut is_float = false;
        if self.peek() == Some('.')
            && self.src[self.pos + 1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
        {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mark = self.pos;
            self.bump();
            if !self.eat('+') {
                self.eat('-');
            }
            let digits_start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
            if self.pos == digits_start {
                // not an exponent after all
                self.pos = mark;
            } else {
                is_float = true;
            }
        }

        let text = &self.src[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(MooValue::Float)
                .map_err(|e| e.to_string())
        } else {
            text.parse::<i64>()
                .map(MooValue::Int)
                .map_err(|e| e.to_string())
        }
    }

    fn skip_object_name(&mut self) -> Result<(), String> {
        self.expect('(')?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.bump() {
                None => return Err("unterminated object name suffix".to_string()),
                Some('(') => depth += 1,
                Some(')') => depth -= 1,
                Some(_) => {}
            }
        }
        Ok(())
    }
}

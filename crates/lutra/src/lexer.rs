//! Tokenizer for JavaScript source.
//!
//! The lexer classifies the first byte of each lexeme through a 256-entry
//! dispatch table and scans from there. Identifiers are interned; keywords are
//! recognized through a static table. Comments and whitespace never surface as
//! tokens, but every token records whether a line terminator preceded it,
//! which drives automatic semicolon insertion and the "no LineTerminator
//! here" productions.
//!
//! The lexer does not decide the regex-vs-division ambiguity. It emits
//! `Slash`/`SlashAssign`; when the parser sits at an expression-start position
//! it calls [`Lexer::relex_regexp`] to re-scan the same bytes as a regular
//! expression literal. Template literals are parser-driven through
//! [`Lexer::template_chunk`].

use std::{collections::VecDeque, sync::LazyLock};

use ahash::AHashMap;
use strum::IntoStaticStr;

use crate::{
    error::{JsError, LexResult},
    intern::{Interns, StringId},
};

/// Token types. Also reused as the AST node tag for leaf nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub(crate) enum TokenKind {
    End,

    // Literals and names
    Name,
    Number,
    /// String literal with no backslash in it; the value shares bytes with
    /// the source and needs no decoding.
    String,
    /// String literal containing at least one escape; the parser must run the
    /// escape decoder over the raw contents.
    EscapeString,
    /// Produced only by `relex_regexp`, never by plain scanning.
    Regexp,
    /// Back-tick. The parser switches the lexer into template mode.
    Grave,

    // Punctuators
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semicolon,
    Colon,
    Comma,
    Dot,
    Ellipsis,
    Conditional,
    OptionalChain,
    Coalesce,
    Arrow,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    RemAssign,
    ExpAssign,
    ShlAssign,
    ShrAssign,
    UshrAssign,
    BitAndAssign,
    BitXorAssign,
    BitOrAssign,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Inc,
    Dec,
    Shl,
    Shr,
    Ushr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Neq,
    StrictEq,
    StrictNeq,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Not,
    And,
    Or,

    // Keywords
    Var,
    Let,
    Const,
    Function,
    Return,
    If,
    Else,
    While,
    Do,
    For,
    Break,
    Continue,
    Switch,
    Case,
    Default,
    Try,
    Catch,
    Finally,
    Throw,
    New,
    Delete,
    Typeof,
    Instanceof,
    In,
    Void,
    This,
    Null,
    True,
    False,
    Import,
    Export,
    // Recognized so the parser can reject them cleanly.
    Class,
    Extends,
    Super,
    Static,
    Enum,
    With,
    Yield,
    Debugger,
}

impl TokenKind {
    /// Display name used in "Unexpected token" diagnostics.
    pub(crate) fn as_str(self) -> &'static str {
        self.into()
    }
}

static KEYWORDS: LazyLock<AHashMap<&'static str, TokenKind>> = LazyLock::new(|| {
    use TokenKind::*;
    let entries: &[(&str, TokenKind)] = &[
        ("var", Var),
        ("let", Let),
        ("const", Const),
        ("function", Function),
        ("return", Return),
        ("if", If),
        ("else", Else),
        ("while", While),
        ("do", Do),
        ("for", For),
        ("break", Break),
        ("continue", Continue),
        ("switch", Switch),
        ("case", Case),
        ("default", Default),
        ("try", Try),
        ("catch", Catch),
        ("finally", Finally),
        ("throw", Throw),
        ("new", New),
        ("delete", Delete),
        ("typeof", Typeof),
        ("instanceof", Instanceof),
        ("in", In),
        ("void", Void),
        ("this", This),
        ("null", Null),
        ("true", True),
        ("false", False),
        ("import", Import),
        ("export", Export),
        ("class", Class),
        ("extends", Extends),
        ("super", Super),
        ("static", Static),
        ("enum", Enum),
        ("with", With),
        ("yield", Yield),
        ("debugger", Debugger),
    ];
    entries.iter().copied().collect()
});

/// First-byte character classes for the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteClass {
    Illegal,
    Space,
    LineEnd,
    Letter,
    Digit,
    Quote,
    Punct,
    Grave,
}

static BYTE_CLASS: LazyLock<[ByteClass; 256]> = LazyLock::new(|| {
    let mut table = [ByteClass::Illegal; 256];
    table[b'\t' as usize] = ByteClass::Space;
    table[0x0b] = ByteClass::Space;
    table[0x0c] = ByteClass::Space;
    table[b' ' as usize] = ByteClass::Space;
    table[b'\n' as usize] = ByteClass::LineEnd;
    table[b'\r' as usize] = ByteClass::LineEnd;
    for b in b'A'..=b'Z' {
        table[b as usize] = ByteClass::Letter;
    }
    for b in b'a'..=b'z' {
        table[b as usize] = ByteClass::Letter;
    }
    table[b'_' as usize] = ByteClass::Letter;
    table[b'$' as usize] = ByteClass::Letter;
    for b in b'0'..=b'9' {
        table[b as usize] = ByteClass::Digit;
    }
    table[b'"' as usize] = ByteClass::Quote;
    table[b'\'' as usize] = ByteClass::Quote;
    table[b'`' as usize] = ByteClass::Grave;
    for b in b"!%&()*+,-./:;<=>?[]^{|}~" {
        table[*b as usize] = ByteClass::Punct;
    }
    table
});

/// One lexed token. Payload fields are valid per kind: `sid` for
/// Name/String/EscapeString (and regex pattern), `num` for Number.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Interned text for names and string-ish tokens; regex flags for Regexp.
    pub sid: StringId,
    /// Second interned payload: regex flags.
    pub aux_sid: StringId,
    pub num: f64,
    pub line: u32,
    /// A line terminator (or comment containing one) appeared before this
    /// token. Drives ASI and the restricted productions.
    pub newline_before: bool,
    /// Byte offset of the first byte of the token.
    pub start: usize,
    /// Byte offset just past the token.
    pub end: usize,
}

impl Token {
    fn new(kind: TokenKind, line: u32, start: usize, end: usize) -> Self {
        Self {
            kind,
            sid: StringId::default(),
            aux_sid: StringId::default(),
            num: 0.0,
            line,
            newline_before: false,
            start,
            end,
        }
    }
}

/// A scanned template literal chunk.
#[derive(Debug)]
pub(crate) struct TemplateChunk {
    /// Decoded ("cooked") chunk contents.
    pub cooked: String,
    /// True when the chunk ended at `${`; the parser should parse an
    /// expression, consume the closing brace, and resume with
    /// [`Lexer::template_chunk`]. False when the closing back-tick was seen.
    pub substitution: bool,
    pub line: u32,
}

/// The tokenizer. Owns the source bytes, the intern table and a FIFO of
/// pre-read tokens for unbounded lookahead.
#[derive(Debug)]
pub(crate) struct Lexer {
    source: String,
    pos: usize,
    line: u32,
    /// Pending line-terminator flag for the next scanned token.
    newline_pending: bool,
    /// Pre-read tokens. `peek(k)` fills this, `next()` drains it.
    queue: VecDeque<Token>,
    /// End offset of the last token handed out by `next()`.
    last_end: usize,
    pub interns: Interns,
}

impl Lexer {
    pub fn new(source: String, interns: Interns) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            newline_pending: false,
            queue: VecDeque::new(),
            last_end: 0,
            interns,
        }
    }

    /// Appends more source in accumulative mode.
    ///
    /// Any queued lookahead stays valid: appended bytes can only extend the
    /// stream past the point already scanned.
    pub fn append_source(&mut self, more: &str) {
        // Drop a queued End marker so scanning continues into the new bytes.
        while matches!(self.queue.back().map(|t| t.kind), Some(TokenKind::End)) {
            self.queue.pop_back();
        }
        self.source.push_str(more);
    }

    /// Returns the next significant token, consuming it.
    pub fn next(&mut self) -> LexResult<Token> {
        let token = match self.queue.pop_front() {
            Some(token) => token,
            None => self.scan()?,
        };
        if token.kind != TokenKind::End {
            self.last_end = token.end;
        }
        Ok(token)
    }

    /// Returns the k-th upcoming token without consuming anything.
    pub fn peek(&mut self, k: usize) -> LexResult<Token> {
        while self.queue.len() <= k {
            let token = self.scan()?;
            let at_end = token.kind == TokenKind::End;
            self.queue.push_back(token);
            if at_end {
                break;
            }
        }
        let idx = k.min(self.queue.len() - 1);
        Ok(self.queue[idx])
    }

    /// Pushes a consumed token back onto the front of the queue.
    pub fn rollback(&mut self, token: Token) {
        self.last_end = token.start;
        self.queue.push_front(token);
    }

    /// Current line number (for diagnostics issued between tokens).
    pub fn line(&self) -> u32 {
        self.line
    }

    /// The source bytes of a token, for keyword-as-property-name positions
    /// where the parser needs the original text back.
    pub fn slice(&self, start: usize, end: usize) -> &str {
        &self.source[start..end]
    }

    /// Re-scans the source at a `/` or `/=` token as a regex literal.
    ///
    /// The parser calls this when a division token shows up at an
    /// expression-start position. All queued lookahead is discarded and the
    /// scan restarts from the slash.
    pub fn relex_regexp(&mut self, slash: Token) -> LexResult<Token> {
        self.queue.clear();
        self.pos = slash.start;
        self.line = slash.line;
        let token = self.scan_regexp()?;
        self.last_end = token.end;
        Ok(token)
    }

    /// Scans one template chunk starting after a back-tick or a substitution's
    /// closing brace. Parser-driven: plain scanning never enters template
    /// mode on its own.
    pub fn template_chunk(&mut self) -> LexResult<TemplateChunk> {
        self.queue.clear();
        self.pos = self.last_end;
        let line = self.line;
        let mut cooked = String::new();
        loop {
            let Some(byte) = self.byte(0) else {
                return Err(JsError::syntax("unterminated template literal", self.line));
            };
            match byte {
                b'`' => {
                    self.pos += 1;
                    self.last_end = self.pos;
                    return Ok(TemplateChunk {
                        cooked,
                        substitution: false,
                        line,
                    });
                }
                b'$' if self.byte(1) == Some(b'{') => {
                    self.pos += 2;
                    self.last_end = self.pos;
                    return Ok(TemplateChunk {
                        cooked,
                        substitution: true,
                        line,
                    });
                }
                b'\\' => {
                    let (decoded, consumed) = decode_one_escape(&self.source.as_bytes()[self.pos..], self.line)?;
                    if let Some(ch) = decoded {
                        cooked.push(ch);
                    }
                    for b in &self.source.as_bytes()[self.pos..self.pos + consumed] {
                        if *b == b'\n' {
                            self.line += 1;
                        }
                    }
                    self.pos += consumed;
                }
                b'\n' => {
                    self.line += 1;
                    cooked.push('\n');
                    self.pos += 1;
                }
                _ => {
                    let ch_len = utf8_len(byte);
                    cooked.push_str(&self.source[self.pos..self.pos + ch_len]);
                    self.pos += ch_len;
                }
            }
        }
    }

    fn byte(&self, ahead: usize) -> Option<u8> {
        self.source.as_bytes().get(self.pos + ahead).copied()
    }

    /// Scans one token from the current position.
    fn scan(&mut self) -> LexResult<Token> {
        self.skip_trivia()?;
        let start = self.pos;
        let Some(byte) = self.byte(0) else {
            let mut token = Token::new(TokenKind::End, self.line, start, start);
            token.newline_before = self.newline_pending;
            return Ok(token);
        };
        let mut token = match BYTE_CLASS[byte as usize] {
            ByteClass::Letter => self.scan_word(),
            ByteClass::Digit => self.scan_number()?,
            ByteClass::Quote => self.scan_string(byte)?,
            ByteClass::Punct => self.scan_punctuator()?,
            ByteClass::Grave => {
                self.pos += 1;
                Token::new(TokenKind::Grave, self.line, start, self.pos)
            }
            ByteClass::Space | ByteClass::LineEnd => unreachable!("trivia skipped above"),
            ByteClass::Illegal => {
                return Err(JsError::syntax(
                    format!("illegal character \"{}\"", &self.source[start..start + utf8_len(byte)]),
                    self.line,
                ));
            }
        };
        token.newline_before = self.newline_pending;
        self.newline_pending = false;
        Ok(token)
    }

    /// Skips whitespace and comments, recording line terminators.
    fn skip_trivia(&mut self) -> LexResult<()> {
        loop {
            match self.byte(0) {
                Some(b' ' | b'\t' | 0x0b | 0x0c | b'\r') => self.pos += 1,
                Some(b'\n') => {
                    self.pos += 1;
                    self.line += 1;
                    self.newline_pending = true;
                }
                Some(b'/') if self.byte(1) == Some(b'/') => {
                    self.pos += 2;
                    while let Some(b) = self.byte(0) {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.byte(1) == Some(b'*') => {
                    let line = self.line;
                    self.pos += 2;
                    loop {
                        match self.byte(0) {
                            Some(b'*') if self.byte(1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(b'\n') => {
                                self.pos += 1;
                                self.line += 1;
                                self.newline_pending = true;
                            }
                            Some(_) => self.pos += 1,
                            None => return Err(JsError::syntax("unterminated comment", line)),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Identifier or keyword.
    fn scan_word(&mut self) -> Token {
        let start = self.pos;
        while let Some(b) = self.byte(0) {
            if matches!(BYTE_CLASS[b as usize], ByteClass::Letter | ByteClass::Digit) {
                self.pos += 1;
            } else {
                break;
            }
        }
        let word = &self.source[start..self.pos];
        if let Some(&kind) = KEYWORDS.get(word) {
            return Token::new(kind, self.line, start, self.pos);
        }
        let sid = self.interns.intern(word);
        let mut token = Token::new(TokenKind::Name, self.line, start, self.pos);
        token.sid = sid;
        token
    }

    fn scan_number(&mut self) -> LexResult<Token> {
        let start = self.pos;
        let bytes = self.source.as_bytes();
        let mut value: f64;

        if bytes[start] == b'0' && self.byte(1).is_some_and(|b| matches!(b, b'x' | b'X' | b'o' | b'O' | b'b' | b'B')) {
            let radix = match bytes[start + 1] {
                b'x' | b'X' => 16,
                b'o' | b'O' => 8,
                _ => 2,
            };
            self.pos += 2;
            let digits_start = self.pos;
            value = 0.0;
            while let Some(b) = self.byte(0) {
                let Some(digit) = (b as char).to_digit(radix) else { break };
                value = value * f64::from(radix) + f64::from(digit);
                self.pos += 1;
            }
            if self.pos == digits_start {
                return Err(JsError::syntax("missing digits after numeric base prefix", self.line));
            }
        } else {
            if bytes[start] == b'0' && self.byte(1).is_some_and(|b| b.is_ascii_digit()) {
                return Err(JsError::syntax("legacy octal literals are not supported", self.line));
            }
            while self.byte(0).is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
            if self.byte(0) == Some(b'.') {
                self.pos += 1;
                while self.byte(0).is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
            if self.byte(0).is_some_and(|b| matches!(b, b'e' | b'E')) {
                let mut ahead = 1;
                if self.byte(1).is_some_and(|b| matches!(b, b'+' | b'-')) {
                    ahead = 2;
                }
                if self.byte(ahead).is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += ahead;
                    while self.byte(0).is_some_and(|b| b.is_ascii_digit()) {
                        self.pos += 1;
                    }
                } else {
                    return Err(JsError::syntax("missing digits in exponent", self.line));
                }
            }
            value = self.source[start..self.pos]
                .parse()
                .map_err(|_| JsError::syntax("invalid number literal", self.line))?;
        }

        // A letter glued onto a number is always malformed, e.g. `0b19` or `3in`.
        if self.byte(0).is_some_and(|b| BYTE_CLASS[b as usize] == ByteClass::Letter) {
            return Err(JsError::syntax(
                format!("unexpected trailer after number at \"{}\"", &self.source[start..=self.pos]),
                self.line,
            ));
        }

        let mut token = Token::new(TokenKind::Number, self.line, start, self.pos);
        token.num = value;
        Ok(token)
    }

    /// `.5` is a number, `.x` is DOT, `...` is ELLIPSIS; handled by the
    /// punctuator scanner which owns the `.` family.
    fn scan_string(&mut self, quote: u8) -> LexResult<Token> {
        let line = self.line;
        let start = self.pos;
        self.pos += 1;
        let content_start = self.pos;
        let mut has_escape = false;
        loop {
            match self.byte(0) {
                Some(b) if b == quote => break,
                Some(b'\\') => {
                    has_escape = true;
                    self.pos += 1;
                    if self.byte(0) == Some(b'\n') {
                        self.line += 1;
                    }
                    if self.byte(0).is_some() {
                        self.pos += 1;
                    }
                }
                Some(b'\n') | None => {
                    return Err(JsError::syntax("unterminated string literal", line));
                }
                Some(b) => self.pos += utf8_len(b),
            }
        }
        let content_end = self.pos;
        self.pos += 1;
        let kind = if has_escape { TokenKind::EscapeString } else { TokenKind::String };
        let sid = self.interns.intern(&self.source[content_start..content_end]);
        let mut token = Token::new(kind, line, start, self.pos);
        token.sid = sid;
        Ok(token)
    }

    /// Regex literal body, entered by `relex_regexp` at a `/`.
    fn scan_regexp(&mut self) -> LexResult<Token> {
        let line = self.line;
        let start = self.pos;
        debug_assert_eq!(self.byte(0), Some(b'/'));
        self.pos += 1;
        let body_start = self.pos;
        let mut in_class = false;
        loop {
            match self.byte(0) {
                Some(b'/') if !in_class => break,
                Some(b'[') => {
                    in_class = true;
                    self.pos += 1;
                }
                Some(b']') => {
                    in_class = false;
                    self.pos += 1;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    if self.byte(0).is_none() || self.byte(0) == Some(b'\n') {
                        return Err(JsError::syntax("unterminated regexp literal", line));
                    }
                    self.pos += 1;
                }
                Some(b'\n') | None => {
                    return Err(JsError::syntax("unterminated regexp literal", line));
                }
                Some(b) => self.pos += utf8_len(b),
            }
        }
        let body_end = self.pos;
        self.pos += 1;

        let flags_start = self.pos;
        let mut seen = [false; 26];
        while let Some(b) = self.byte(0) {
            if BYTE_CLASS[b as usize] != ByteClass::Letter {
                break;
            }
            if !matches!(b, b'g' | b'i' | b'm' | b's' | b'u' | b'y') {
                return Err(JsError::syntax(format!("invalid regexp flag \"{}\"", b as char), line));
            }
            let slot = (b - b'a') as usize;
            if seen[slot] {
                return Err(JsError::syntax(format!("duplicate regexp flag \"{}\"", b as char), line));
            }
            seen[slot] = true;
            self.pos += 1;
        }

        let pattern = self.interns.intern(&self.source[body_start..body_end]);
        let flags = self.interns.intern(&self.source[flags_start..self.pos]);
        let mut token = Token::new(TokenKind::Regexp, line, start, self.pos);
        token.sid = pattern;
        token.aux_sid = flags;
        Ok(token)
    }

    fn scan_punctuator(&mut self) -> LexResult<Token> {
        use TokenKind::*;
        let start = self.pos;
        let line = self.line;
        let bytes = self.source.as_bytes();
        let b0 = bytes[start];
        let b1 = self.byte(1);
        let b2 = self.byte(2);
        let b3 = self.byte(3);

        // Longest match first within each first-byte family.
        let (kind, len) = match b0 {
            b'{' => (LBrace, 1),
            b'}' => (RBrace, 1),
            b'(' => (LParen, 1),
            b')' => (RParen, 1),
            b'[' => (LBracket, 1),
            b']' => (RBracket, 1),
            b';' => (Semicolon, 1),
            b':' => (Colon, 1),
            b',' => (Comma, 1),
            b'.' => match b1 {
                Some(b'.') if b2 == Some(b'.') => (Ellipsis, 3),
                Some(d) if d.is_ascii_digit() => return self.scan_leading_dot_number(),
                _ => (Dot, 1),
            },
            b'?' => match b1 {
                Some(b'?') => (Coalesce, 2),
                Some(b'.') if !b2.is_some_and(|b| b.is_ascii_digit()) => (OptionalChain, 2),
                _ => (Conditional, 1),
            },
            b'=' => match (b1, b2) {
                (Some(b'='), Some(b'=')) => (StrictEq, 3),
                (Some(b'='), _) => (Eq, 2),
                (Some(b'>'), _) => (Arrow, 2),
                _ => (Assign, 1),
            },
            b'!' => match (b1, b2) {
                (Some(b'='), Some(b'=')) => (StrictNeq, 3),
                (Some(b'='), _) => (Neq, 2),
                _ => (Not, 1),
            },
            b'+' => match b1 {
                Some(b'+') => (Inc, 2),
                Some(b'=') => (AddAssign, 2),
                _ => (Plus, 1),
            },
            b'-' => match b1 {
                Some(b'-') => (Dec, 2),
                Some(b'=') => (SubAssign, 2),
                _ => (Minus, 1),
            },
            b'*' => match (b1, b2) {
                (Some(b'*'), Some(b'=')) => (ExpAssign, 3),
                (Some(b'*'), _) => (StarStar, 2),
                (Some(b'='), _) => (MulAssign, 2),
                _ => (Star, 1),
            },
            b'/' => match b1 {
                Some(b'=') => (DivAssign, 2),
                _ => (Slash, 1),
            },
            b'%' => match b1 {
                Some(b'=') => (RemAssign, 2),
                _ => (Percent, 1),
            },
            b'<' => match (b1, b2) {
                (Some(b'<'), Some(b'=')) => (ShlAssign, 3),
                (Some(b'<'), _) => (Shl, 2),
                (Some(b'='), _) => (Le, 2),
                _ => (Lt, 1),
            },
            b'>' => match (b1, b2, b3) {
                (Some(b'>'), Some(b'>'), Some(b'=')) => (UshrAssign, 4),
                (Some(b'>'), Some(b'>'), _) => (Ushr, 3),
                (Some(b'>'), Some(b'='), _) => (ShrAssign, 3),
                (Some(b'>'), _, _) => (Shr, 2),
                (Some(b'='), _, _) => (Ge, 2),
                _ => (Gt, 1),
            },
            b'&' => match b1 {
                Some(b'&') => (And, 2),
                Some(b'=') => (BitAndAssign, 2),
                _ => (BitAnd, 1),
            },
            b'|' => match b1 {
                Some(b'|') => (Or, 2),
                Some(b'=') => (BitOrAssign, 2),
                _ => (BitOr, 1),
            },
            b'^' => match b1 {
                Some(b'=') => (BitXorAssign, 2),
                _ => (BitXor, 1),
            },
            b'~' => (BitNot, 1),
            _ => unreachable!("byte classified as punctuator: {b0}"),
        };
        self.pos += len;
        Ok(Token::new(kind, line, start, self.pos))
    }

    /// `.5`, `.5e3` — a leading dot directly followed by a digit.
    fn scan_leading_dot_number(&mut self) -> LexResult<Token> {
        let start = self.pos;
        self.pos += 1;
        while self.byte(0).is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.byte(0).is_some_and(|b| matches!(b, b'e' | b'E')) {
            let mut ahead = 1;
            if self.byte(1).is_some_and(|b| matches!(b, b'+' | b'-')) {
                ahead = 2;
            }
            if self.byte(ahead).is_some_and(|b| b.is_ascii_digit()) {
                self.pos += ahead;
                while self.byte(0).is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let value: f64 = self.source[start..self.pos]
            .parse()
            .map_err(|_| JsError::syntax("invalid number literal", self.line))?;
        let mut token = Token::new(TokenKind::Number, self.line, start, self.pos);
        token.num = value;
        Ok(token)
    }
}

fn utf8_len(first: u8) -> usize {
    match first {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}

/// Decodes the escape sequences in a raw string-literal body.
///
/// Called by the parser for `EscapeString` tokens; the fast-path `String`
/// token never needs it.
pub(crate) fn decode_escapes(raw: &str, line: u32) -> Result<String, JsError> {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let (decoded, consumed) = decode_one_escape(&bytes[i..], line)?;
            if let Some(ch) = decoded {
                out.push(ch);
            }
            i += consumed;
        } else {
            let len = utf8_len(bytes[i]);
            out.push_str(&raw[i..i + len]);
            i += len;
        }
    }
    Ok(out)
}

/// Decodes one `\`-escape at the start of `bytes`, returning the decoded
/// character (None for a line continuation) and the bytes consumed.
fn decode_one_escape(bytes: &[u8], line: u32) -> Result<(Option<char>, usize), JsError> {
    debug_assert_eq!(bytes.first(), Some(&b'\\'));
    let Some(&esc) = bytes.get(1) else {
        return Err(JsError::syntax("truncated escape sequence", line));
    };
    let simple = |c: char| Ok((Some(c), 2));
    match esc {
        b'n' => simple('\n'),
        b't' => simple('\t'),
        b'r' => simple('\r'),
        b'b' => simple('\u{8}'),
        b'f' => simple('\u{c}'),
        b'v' => simple('\u{b}'),
        b'0' if !bytes.get(2).is_some_and(u8::is_ascii_digit) => simple('\0'),
        b'\n' => Ok((None, 2)),
        b'\r' => {
            if bytes.get(2) == Some(&b'\n') {
                Ok((None, 3))
            } else {
                Ok((None, 2))
            }
        }
        b'x' => {
            let hex = bytes
                .get(2..4)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u32::from_str_radix(h, 16).ok())
                .ok_or_else(|| JsError::syntax("invalid hexadecimal escape", line))?;
            let ch = char::from_u32(hex).ok_or_else(|| JsError::syntax("invalid hexadecimal escape", line))?;
            Ok((Some(ch), 4))
        }
        b'u' => {
            if bytes.get(2) == Some(&b'{') {
                let close = bytes
                    .iter()
                    .position(|&b| b == b'}')
                    .ok_or_else(|| JsError::syntax("invalid Unicode escape", line))?;
                let digits = std::str::from_utf8(&bytes[3..close])
                    .map_err(|_| JsError::syntax("invalid Unicode escape", line))?;
                let cp = u32::from_str_radix(digits, 16).map_err(|_| JsError::syntax("invalid Unicode escape", line))?;
                let ch = char::from_u32(cp).ok_or_else(|| JsError::syntax("invalid Unicode escape", line))?;
                Ok((Some(ch), close + 1))
            } else {
                let hex = bytes
                    .get(2..6)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u32::from_str_radix(h, 16).ok())
                    .ok_or_else(|| JsError::syntax("invalid Unicode escape", line))?;
                let ch = char::from_u32(hex).ok_or_else(|| JsError::syntax("invalid Unicode escape", line))?;
                Ok((Some(ch), 6))
            }
        }
        _ => {
            // Any other escaped character stands for itself.
            let len = utf8_len(esc);
            let s = std::str::from_utf8(&bytes[1..1 + len]).map_err(|_| JsError::syntax("invalid escape", line))?;
            Ok((s.chars().next(), 1 + len))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interns;

    fn lex_kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src.to_owned(), Interns::new());
        let mut kinds = Vec::new();
        loop {
            let token = lexer.next().unwrap();
            if token.kind == TokenKind::End {
                break;
            }
            kinds.push(token.kind);
        }
        kinds
    }

    #[test]
    fn keywords_and_names() {
        use TokenKind::*;
        assert_eq!(lex_kinds("var x = functionX"), vec![Var, Name, Assign, Name]);
    }

    #[test]
    fn numbers() {
        let mut lexer = Lexer::new("0x10 0b101 0o17 1.5e2 .5 3".to_owned(), Interns::new());
        let values: Vec<f64> = (0..6).map(|_| lexer.next().unwrap().num).collect();
        assert_eq!(values, vec![16.0, 5.0, 15.0, 150.0, 0.5, 3.0]);
    }

    #[test]
    fn legacy_octal_rejected() {
        let mut lexer = Lexer::new("0123".to_owned(), Interns::new());
        assert!(lexer.next().is_err());
    }

    #[test]
    fn bad_binary_trailer_rejected() {
        let mut lexer = Lexer::new("0b19".to_owned(), Interns::new());
        assert!(lexer.next().is_err());
    }

    #[test]
    fn punctuator_maximal_munch() {
        use TokenKind::*;
        assert_eq!(lex_kinds("a >>>= b >>> c >> d >= e"), vec![
            Name, UshrAssign, Name, Ushr, Name, Shr, Name, Ge, Name
        ]);
        assert_eq!(lex_kinds("a ?? b ?. c ? d : e"), vec![
            Name, Coalesce, Name, OptionalChain, Name, Conditional, Name, Colon, Name
        ]);
    }

    #[test]
    fn string_fast_path_vs_escape() {
        let mut lexer = Lexer::new(r#"'plain' 'with\n'"#.to_owned(), Interns::new());
        assert_eq!(lexer.next().unwrap().kind, TokenKind::String);
        let escaped = lexer.next().unwrap();
        assert_eq!(escaped.kind, TokenKind::EscapeString);
        let raw = lexer.interns.get(escaped.sid).to_owned();
        assert_eq!(decode_escapes(&raw, 1).unwrap(), "with\n");
    }

    #[test]
    fn unterminated_string() {
        let mut lexer = Lexer::new("'oops\n'".to_owned(), Interns::new());
        assert!(lexer.next().is_err());
    }

    #[test]
    fn peek_then_next_agree() {
        let mut lexer = Lexer::new("a + b * c".to_owned(), Interns::new());
        for _ in 0..6 {
            let peeked = lexer.peek(0).unwrap();
            let taken = lexer.next().unwrap();
            assert_eq!(peeked.kind, taken.kind);
            assert_eq!(peeked.start, taken.start);
        }
    }

    #[test]
    fn rollback_restores_front() {
        let mut lexer = Lexer::new("x y".to_owned(), Interns::new());
        let x = lexer.next().unwrap();
        lexer.rollback(x);
        assert_eq!(lexer.next().unwrap().start, x.start);
    }

    #[test]
    fn newline_tracking() {
        let mut lexer = Lexer::new("a\nb /* c\n */ d e".to_owned(), Interns::new());
        assert!(!lexer.next().unwrap().newline_before);
        assert!(lexer.next().unwrap().newline_before);
        assert!(lexer.next().unwrap().newline_before);
        assert!(!lexer.next().unwrap().newline_before);
    }

    #[test]
    fn relex_division_as_regexp() {
        let mut lexer = Lexer::new("/ab[c/]d/gi".to_owned(), Interns::new());
        let slash = lexer.next().unwrap();
        assert_eq!(slash.kind, TokenKind::Slash);
        let regexp = lexer.relex_regexp(slash).unwrap();
        assert_eq!(regexp.kind, TokenKind::Regexp);
        assert_eq!(lexer.interns.get(regexp.sid), "ab[c/]d");
        assert_eq!(lexer.interns.get(regexp.aux_sid), "gi");
    }

    #[test]
    fn duplicate_regexp_flag_rejected() {
        let mut lexer = Lexer::new("/a/gg".to_owned(), Interns::new());
        let slash = lexer.next().unwrap();
        assert!(lexer.relex_regexp(slash).is_err());
    }

    #[test]
    fn template_chunks() {
        let mut lexer = Lexer::new("`a${x}b`".to_owned(), Interns::new());
        let grave = lexer.next().unwrap();
        assert_eq!(grave.kind, TokenKind::Grave);
        let first = lexer.template_chunk().unwrap();
        assert_eq!(first.cooked, "a");
        assert!(first.substitution);
        let x = lexer.next().unwrap();
        assert_eq!(x.kind, TokenKind::Name);
        let brace = lexer.next().unwrap();
        assert_eq!(brace.kind, TokenKind::RBrace);
        let second = lexer.template_chunk().unwrap();
        assert_eq!(second.cooked, "b");
        assert!(!second.substitution);
    }

    #[test]
    fn accumulative_append() {
        let mut lexer = Lexer::new("var a".to_owned(), Interns::new());
        assert_eq!(lexer.next().unwrap().kind, TokenKind::Var);
        assert_eq!(lexer.next().unwrap().kind, TokenKind::Name);
        assert_eq!(lexer.peek(0).unwrap().kind, TokenKind::End);
        lexer.append_source(" = 1");
        assert_eq!(lexer.next().unwrap().kind, TokenKind::Assign);
        assert_eq!(lexer.next().unwrap().kind, TokenKind::Number);
    }
}

use std::fmt;

use unicode_xid::UnicodeXID;

use super::ReadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// `@name`
    Global(&'a str),
    /// bare word: keywords, type names
    Word(&'a str),
    Int(u64),
    /// `"..."`, raw contents
    Str(&'a str),
    /// `c"..."`, decoded
    Bytes(Vec<u8>),
    /// `!"..."`
    MetaStr(&'a str),
    /// `!name`
    MetaName(&'a str),
    /// `!{`
    MetaOpen,
    Eq,
    Comma,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Minus,
    Eof,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Global(name) => write!(f, "`@{name}`"),
            Token::Word(word) => write!(f, "`{word}`"),
            Token::Int(value) => write!(f, "`{value}`"),
            Token::Str(_) | Token::Bytes(_) => f.write_str("string literal"),
            Token::MetaStr(_) => f.write_str("metadata string"),
            Token::MetaName(name) => write!(f, "`!{name}`"),
            Token::MetaOpen => f.write_str("`!{`"),
            Token::Eq => f.write_str("`=`"),
            Token::Comma => f.write_str("`,`"),
            Token::LBracket => f.write_str("`[`"),
            Token::RBracket => f.write_str("`]`"),
            Token::LBrace => f.write_str("`{`"),
            Token::RBrace => f.write_str("`}`"),
            Token::LParen => f.write_str("`(`"),
            Token::RParen => f.write_str("`)`"),
            Token::Minus => f.write_str("`-`"),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
}

fn is_name_start(c: char) -> bool {
    c.is_xid_start() || matches!(c, '_' | '.' | '$')
}

fn is_name_continue(c: char) -> bool {
    c.is_xid_continue() || matches!(c, '.' | '$' | '-')
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some('\n') => {
                    self.line += 1;
                    self.pos += 1;
                }
                Some(c) if c.is_whitespace() => self.pos += c.len_utf8(),
                Some(';') => {
                    let rest = self.rest().as_bytes();
                    self.pos += memchr::memchr(b'\n', rest).unwrap_or(rest.len());
                }
                _ => return,
            }
        }
    }

    fn name(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(i, c)| {
                let accepted = if i == 0 {
                    is_name_start(c) || c.is_ascii_digit()
                } else {
                    is_name_continue(c)
                };
                !accepted
            })
            .map_or(rest.len(), |(i, _)| i);
        self.pos += len;
        &rest[..len]
    }

    /// Consumes a quoted string starting at the opening quote. Escapes are
    /// written as `\XX`, so the closing quote is the next `"`.
    fn string(&mut self) -> Result<&'a str, ReadError> {
        let line = self.line;
        self.pos += 1;
        let rest = self.rest();
        let Some(end) = memchr::memchr(b'"', rest.as_bytes()) else {
            return Err(ReadError::UnterminatedString { line });
        };
        let contents = &rest[..end];
        if memchr::memchr(b'\n', contents.as_bytes()).is_some() {
            return Err(ReadError::UnterminatedString { line });
        }
        self.pos += end + 1;
        Ok(contents)
    }

    fn decode(&self, raw: &str) -> Result<Vec<u8>, ReadError> {
        let invalid = || ReadError::InvalidEscape { line: self.line };
        let raw = raw.as_bytes();
        let mut bytes = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] != b'\\' {
                bytes.push(raw[i]);
                i += 1;
                continue;
            }
            if raw.get(i + 1) == Some(&b'\\') {
                bytes.push(b'\\');
                i += 2;
                continue;
            }
            let hex = raw.get(i + 1..i + 3).ok_or_else(invalid)?;
            let hex = std::str::from_utf8(hex).map_err(|_| invalid())?;
            bytes.push(u8::from_str_radix(hex, 16).map_err(|_| invalid())?);
            i += 3;
        }
        Ok(bytes)
    }

    fn int(&mut self) -> Result<u64, ReadError> {
        let rest = self.rest();
        let len = rest
            .bytes()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(rest.len());
        self.pos += len;
        rest[..len]
            .parse()
            .map_err(|_| ReadError::IntegerOverflow { line: self.line })
    }

    pub fn next_token(&mut self) -> Result<Token<'a>, ReadError> {
        self.skip_trivia();
        let Some(c) = self.peek_char() else {
            return Ok(Token::Eof);
        };

        let punct = match c {
            '=' => Some(Token::Eq),
            ',' => Some(Token::Comma),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '-' => Some(Token::Minus),
            _ => None,
        };
        if let Some(token) = punct {
            self.pos += 1;
            return Ok(token);
        }

        match c {
            '@' => {
                self.pos += 1;
                if self.peek_char() == Some('"') {
                    return Ok(Token::Global(self.string()?));
                }
                Ok(Token::Global(self.name()))
            }
            '!' => {
                self.pos += 1;
                match self.peek_char() {
                    Some('"') => Ok(Token::MetaStr(self.string()?)),
                    Some('{') => {
                        self.pos += 1;
                        Ok(Token::MetaOpen)
                    }
                    Some(c) if is_name_start(c) => Ok(Token::MetaName(self.name())),
                    _ => Err(ReadError::UnexpectedChar {
                        line: self.line,
                        found: '!',
                    }),
                }
            }
            '"' => Ok(Token::Str(self.string()?)),
            c if c.is_ascii_digit() => Ok(Token::Int(self.int()?)),
            c if is_name_start(c) => {
                let word = self.name();
                if word == "c" && self.peek_char() == Some('"') {
                    let raw = self.string()?;
                    return Ok(Token::Bytes(self.decode(raw)?));
                }
                Ok(Token::Word(word))
            }
            found => Err(ReadError::UnexpectedChar {
                line: self.line,
                found,
            }),
        }
    }
}

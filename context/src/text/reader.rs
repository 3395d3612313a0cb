use ustr::ustr;

use super::lexer::{Lexer, Token};
use super::ReadError;
use crate::module::{
    AbsoluteSymbol, AliasTarget, GlobalAlias, GlobalVariable, Initializer, Linkage, Module,
    Visibility,
};
use crate::types::{AggregateTy, ArrayTy, FloatTy, PointerTy, Type};
use crate::utils::FxHashSet;

enum Entity {
    Global(GlobalVariable),
    Alias(GlobalAlias),
}

struct Reader<'a> {
    lexer: Lexer<'a>,
    peeked: Option<Token<'a>>,
    line: u32,
}

/// Parses a module from its textual form.
pub fn read_module(src: &str) -> Result<Module, ReadError> {
    let mut reader = Reader {
        lexer: Lexer::new(src),
        peeked: None,
        line: 1,
    };
    let mut module = Module::default();
    let mut names = FxHashSet::default();

    loop {
        match reader.bump()? {
            Token::Eof => return Ok(module),
            Token::Word("target") => {
                reader.expect(Token::Word("triple"), "`triple`")?;
                reader.expect(Token::Eq, "`=`")?;
                let triple = reader.string()?;
                module.set_triple(triple);
            }
            Token::Global(name) => {
                if !names.insert(ustr(name)) {
                    return Err(ReadError::Redefinition {
                        line: reader.line,
                        name: name.to_owned(),
                    });
                }
                reader.expect(Token::Eq, "`=`")?;
                match reader.entity(name)? {
                    Entity::Global(global) => {
                        module.add_global(global);
                    }
                    Entity::Alias(alias) => module.add_alias(alias),
                }
            }
            Token::MetaName("typetests") => {
                reader.expect(Token::Eq, "`=`")?;
                reader.expect(Token::MetaOpen, "`!{`")?;
                if !reader.eat(Token::RBrace)? {
                    loop {
                        let type_id = reader.meta_string()?;
                        module.add_type_test(ustr(type_id));
                        if !reader.eat(Token::Comma)? {
                            break;
                        }
                    }
                    reader.expect(Token::RBrace, "`}`")?;
                }
            }
            found => return Err(reader.expected("a top-level entity", &found)),
        }
    }
}

impl<'a> Reader<'a> {
    fn lex(&mut self) -> Result<Token<'a>, ReadError> {
        let token = self.lexer.next_token()?;
        self.line = self.lexer.line();
        Ok(token)
    }

    fn peek(&mut self) -> Result<&Token<'a>, ReadError> {
        let token = match self.peeked.take() {
            Some(token) => token,
            None => self.lex()?,
        };
        Ok(self.peeked.insert(token))
    }

    fn bump(&mut self) -> Result<Token<'a>, ReadError> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.lex(),
        }
    }

    fn eat(&mut self, token: Token<'static>) -> Result<bool, ReadError> {
        if *self.peek()? == token {
            self.peeked = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expected(&self, expected: &'static str, found: &Token<'_>) -> ReadError {
        ReadError::Expected {
            line: self.line,
            expected,
            found: found.to_string(),
        }
    }

    fn expect(&mut self, token: Token<'static>, expected: &'static str) -> Result<(), ReadError> {
        let found = self.bump()?;
        if found == token {
            Ok(())
        } else {
            Err(self.expected(expected, &found))
        }
    }

    fn int(&mut self) -> Result<u64, ReadError> {
        match self.bump()? {
            Token::Int(value) => Ok(value),
            found => Err(self.expected("an integer", &found)),
        }
    }

    fn string(&mut self) -> Result<&'a str, ReadError> {
        match self.bump()? {
            Token::Str(value) => Ok(value),
            found => Err(self.expected("a string", &found)),
        }
    }

    fn meta_string(&mut self) -> Result<&'a str, ReadError> {
        match self.bump()? {
            Token::MetaStr(value) => Ok(value),
            found => Err(self.expected("a metadata string", &found)),
        }
    }

    fn ty(&mut self) -> Result<Type, ReadError> {
        match self.bump()? {
            Token::Word("ptr") => Ok(Type::Pointer(PointerTy)),
            Token::Word(word) => {
                let int = word
                    .strip_prefix('i')
                    .and_then(|bits| bits.parse::<u16>().ok())
                    .and_then(Type::int);
                let float = || FloatTy::from_keyword(word).map(Type::Float);
                int.or_else(float).ok_or_else(|| ReadError::UnknownType {
                    line: self.line,
                    name: word.to_owned(),
                })
            }
            Token::LBracket => {
                let len = self.int()?;
                self.expect(Token::Word("x"), "`x`")?;
                let element = self.ty()?;
                self.expect(Token::RBracket, "`]`")?;
                Ok(Type::Array(ArrayTy::new(len, element)))
            }
            Token::LBrace => {
                let mut fields = Vec::new();
                if !self.eat(Token::RBrace)? {
                    loop {
                        fields.push(self.ty()?);
                        if !self.eat(Token::Comma)? {
                            break;
                        }
                    }
                    self.expect(Token::RBrace, "`}`")?;
                }
                Ok(Type::Aggregate(AggregateTy::new(fields)))
            }
            found => Err(self.expected("a type", &found)),
        }
    }

    fn initializer(&mut self, ty: &Type) -> Result<Initializer, ReadError> {
        let mismatch = |line| ReadError::InitializerMismatch {
            line,
            ty: ty.to_string(),
        };
        match self.bump()? {
            Token::Word("zeroinitializer") => Ok(Initializer::Zero),
            Token::Int(value) => match ty {
                Type::Int(int) if int.bits().get() >= 64 || value >> int.bits().get() == 0 => {
                    Ok(Initializer::Int(value))
                }
                _ => Err(mismatch(self.line)),
            },
            Token::Bytes(bytes) => match ty {
                Type::Array(array)
                    if *array.element == Type::I8 && array.len == bytes.len() as u64 =>
                {
                    Ok(Initializer::Bytes(bytes))
                }
                _ => Err(mismatch(self.line)),
            },
            found => Err(self.expected("an initializer", &found)),
        }
    }

    /// `iN`
    fn int_width(&mut self) -> Result<u32, ReadError> {
        match self.bump()? {
            Token::Word(word) => word
                .strip_prefix('i')
                .and_then(|bits| bits.parse().ok())
                .filter(|&bits| bits > 0)
                .ok_or_else(|| ReadError::UnknownType {
                    line: self.line,
                    name: word.to_owned(),
                }),
            found => Err(self.expected("an integer type", &found)),
        }
    }

    /// An unsigned bound, or `None` for `-1`.
    fn bound(&mut self) -> Result<Option<u64>, ReadError> {
        if self.eat(Token::Minus)? {
            self.expect(Token::Int(1), "`1`")?;
            return Ok(None);
        }
        self.int().map(Some)
    }

    /// `!{i64 lo, i64 hi}`, with `-1, -1` for the full set.
    fn absolute_symbol(&mut self) -> Result<AbsoluteSymbol, ReadError> {
        self.expect(Token::MetaOpen, "`!{`")?;
        self.expect(Token::Word("i64"), "`i64`")?;
        let lo = self.bound()?;
        self.expect(Token::Comma, "`,`")?;
        self.expect(Token::Word("i64"), "`i64`")?;
        let hi = self.bound()?;
        self.expect(Token::RBrace, "`}`")?;
        match (lo, hi) {
            (Some(lo), Some(hi)) => Ok(AbsoluteSymbol::Range { lo, hi }),
            (None, None) => Ok(AbsoluteSymbol::FullSet),
            _ => Err(self.expected("a bounded range or `-1, -1`", &Token::Minus)),
        }
    }

    /// `getelementptr (i8, ptr @base, iN offset)` or `inttoptr (iN value to ptr)`
    fn alias_target(&mut self) -> Result<AliasTarget, ReadError> {
        match self.bump()? {
            Token::Word("getelementptr") => {
                self.expect(Token::LParen, "`(`")?;
                self.expect(Token::Word("i8"), "`i8`")?;
                self.expect(Token::Comma, "`,`")?;
                self.expect(Token::Word("ptr"), "`ptr`")?;
                let base = match self.bump()? {
                    Token::Global(base) => ustr(base),
                    found => return Err(self.expected("a global", &found)),
                };
                self.expect(Token::Comma, "`,`")?;
                let index_bits = self.int_width()?;
                let offset = self.int()?;
                self.expect(Token::RParen, "`)`")?;
                Ok(AliasTarget::Offset {
                    base,
                    offset,
                    index_bits,
                })
            }
            Token::Word("inttoptr") => {
                self.expect(Token::LParen, "`(`")?;
                let bits = self.int_width()?;
                let value = self.int()?;
                if bits < 64 && value >> bits != 0 {
                    return Err(ReadError::InitializerMismatch {
                        line: self.line,
                        ty: format!("i{bits}"),
                    });
                }
                self.expect(Token::Word("to"), "`to`")?;
                self.expect(Token::Word("ptr"), "`ptr`")?;
                self.expect(Token::RParen, "`)`")?;
                Ok(AliasTarget::Absolute { value, bits })
            }
            found => Err(self.expected("`getelementptr` or `inttoptr`", &found)),
        }
    }

    /// Everything after `@name =`: a definition, an `external` declaration or
    /// an alias.
    fn entity(&mut self, name: &str) -> Result<Entity, ReadError> {
        let mut linkage = Linkage::External;
        let mut visibility = Visibility::Default;

        let mut token = self.bump()?;
        let external = token == Token::Word("external");
        match token {
            Token::Word("external") => token = self.bump()?,
            Token::Word("private") => {
                linkage = Linkage::Private;
                token = self.bump()?;
            }
            Token::Word("internal") => {
                linkage = Linkage::Internal;
                token = self.bump()?;
            }
            _ => {}
        }
        if token == Token::Word("hidden") {
            visibility = Visibility::Hidden;
            token = self.bump()?;
        }
        let is_constant = match token {
            Token::Word("constant") => true,
            Token::Word("global") => false,
            Token::Word("alias") if !external => {
                let value_type = self.ty()?;
                self.expect(Token::Comma, "`,`")?;
                let target = self.alias_target()?;
                return Ok(Entity::Alias(GlobalAlias {
                    name: ustr(name),
                    linkage,
                    visibility,
                    value_type,
                    target,
                }));
            }
            found => return Err(self.expected("`global` or `constant`", &found)),
        };

        let ty = self.ty()?;
        let mut global = if external {
            GlobalVariable::declaration(name, ty)
        } else {
            let initializer = self.initializer(&ty)?;
            GlobalVariable::new(name, ty, initializer)
        };
        global.linkage = linkage;
        global.visibility = visibility;
        global.is_constant = is_constant;

        while self.eat(Token::Comma)? {
            match self.bump()? {
                Token::Word("align") => {
                    let align = self.int()?;
                    if !align.is_power_of_two() {
                        return Err(ReadError::InvalidAlignment {
                            line: self.line,
                            align,
                        });
                    }
                    global.align = Some(align);
                }
                Token::MetaName("type") => {
                    self.expect(Token::MetaOpen, "`!{`")?;
                    self.expect(Token::Word("i64"), "`i64`")?;
                    let offset = self.int()?;
                    self.expect(Token::Comma, "`,`")?;
                    let type_id = self.meta_string()?;
                    self.expect(Token::RBrace, "`}`")?;
                    global.add_type_metadata(offset, ustr(type_id));
                }
                Token::MetaName("absolute_symbol") if external => {
                    global.absolute_symbol = Some(self.absolute_symbol()?);
                }
                found if external => {
                    return Err(self.expected("`align`, `!type` or `!absolute_symbol`", &found))
                }
                found => return Err(self.expected("`align` or `!type`", &found)),
            }
        }

        Ok(Entity::Global(global))
    }
}

//! Query text to `Query` AST.
//!
//! Grammar:
//!
//! ```text
//! query     := header? '{' block* '}'
//! header    := 'query' NAME? ( '(' decl (',' decl)* ')' )?
//! decl      := '$'NAME ':' TYPE ( '=' literal )?
//! block     := ALIAS '(' 'func' ':' func ')' selection
//! func      := has(PRED) | eq(PRED, value) | uid(value, ...) | type(value)
//! selection := '{' field+ '}'
//! field     := ( 'uid' | PRED | '~'PRED ) selection?
//! value     := "string" | word | '$'NAME
//! ```

use crate::primitives::MAX_QUERY_DEPTH;
use crate::{TesseraError, Uid};
use std::collections::{BTreeMap, BTreeSet};

/// A parsed query: one result block per alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub alias: String,
    pub root: RootFunc,
    pub fields: Vec<Field>,
}

/// Root selector of a block. Literals stay textual until the executor knows
/// the predicate's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootFunc {
    Has(String),
    Eq(String, String),
    Uid(Vec<Uid>),
    Type(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub children: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LBrace,
    RBrace,
    LParen,
    RParen,
    Colon,
    Comma,
    Equals,
    Word(String),
    Var(String),
    Str(String),
}

fn invalid(msg: impl Into<String>) -> TesseraError {
    TesseraError::InvalidQuery(msg.into())
}

const fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '~' | '-' | '+')
}

fn tokenize(text: &str) -> Result<Vec<Token>, TesseraError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                while chars.next_if(|&c| c != '\n').is_some() {}
            }
            '{' | '}' | '(' | ')' | ':' | ',' | '=' => {
                chars.next();
                tokens.push(match c {
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ':' => Token::Colon,
                    ',' => Token::Comma,
                    _ => Token::Equals,
                });
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => return Err(invalid("unterminated string")),
                        },
                        Some(other) => s.push(other),
                        None => return Err(invalid("unterminated string")),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '$' => {
                chars.next();
                let mut name = String::new();
                while let Some(c) = chars.next_if(|&c| is_word_char(c)) {
                    name.push(c);
                }
                if name.is_empty() {
                    return Err(invalid("'$' must be followed by a variable name"));
                }
                tokens.push(Token::Var(name));
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some(c) = chars.next_if(|&c| is_word_char(c)) {
                    word.push(c);
                }
                tokens.push(Token::Word(word));
            }
            other => return Err(invalid(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Caller-supplied values, keyed without the `$`.
    vars: BTreeMap<String, String>,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, want: &Token) -> Result<(), TesseraError> {
        match self.next() {
            Some(ref got) if got == want => Ok(()),
            Some(got) => Err(invalid(format!("expected {want:?}, found {got:?}"))),
            None => Err(invalid(format!("expected {want:?}, found end of query"))),
        }
    }

    fn word(&mut self) -> Result<String, TesseraError> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            Some(got) => Err(invalid(format!("expected a name, found {got:?}"))),
            None => Err(invalid("expected a name, found end of query")),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn variable(&self, name: &str) -> Result<String, TesseraError> {
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| invalid(format!("variable ${name} has no value")))
    }

    fn value(&mut self) -> Result<String, TesseraError> {
        match self.next() {
            Some(Token::Str(s) | Token::Word(s)) => Ok(s),
            Some(Token::Var(name)) => self.variable(&name),
            Some(got) => Err(invalid(format!("expected a value, found {got:?}"))),
            None => Err(invalid("expected a value, found end of query")),
        }
    }

    fn header(&mut self) -> Result<(), TesseraError> {
        if self.peek() != Some(&Token::Word("query".to_string())) {
            return Ok(());
        }
        self.pos += 1;
        if matches!(self.peek(), Some(Token::Word(_))) {
            self.pos += 1;
        }
        if !self.eat(&Token::LParen) {
            return Ok(());
        }
        loop {
            let name = match self.next() {
                Some(Token::Var(name)) => name,
                got => return Err(invalid(format!("expected $variable, found {got:?}"))),
            };
            self.expect(&Token::Colon)?;
            let ty = self.word()?;
            if !matches!(ty.as_str(), "string" | "int" | "float" | "bool" | "uid") {
                return Err(invalid(format!("unknown variable type '{ty}'")));
            }
            if self.eat(&Token::Equals) {
                let default = self.value()?;
                self.vars.entry(name).or_insert(default);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)
    }

    fn root(&mut self) -> Result<RootFunc, TesseraError> {
        let func = self.word()?;
        self.expect(&Token::LParen)?;
        let root = match func.as_str() {
            "has" => RootFunc::Has(self.word()?),
            "eq" => {
                let predicate = self.word()?;
                self.expect(&Token::Comma)?;
                RootFunc::Eq(predicate, self.value()?)
            }
            "type" => RootFunc::Type(self.value()?),
            "uid" => {
                let mut uids = BTreeSet::new();
                loop {
                    // A variable may hold a comma-separated uid list.
                    for part in self.value()?.split(',') {
                        let uid = Uid::parse(part)
                            .ok_or_else(|| invalid(format!("invalid uid '{}'", part.trim())))?;
                        uids.insert(uid);
                    }
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                RootFunc::Uid(uids.into_iter().collect())
            }
            other => return Err(invalid(format!("unsupported function '{other}'"))),
        };
        self.expect(&Token::RParen)?;
        Ok(root)
    }

    fn selection(&mut self, depth: usize) -> Result<Vec<Field>, TesseraError> {
        if depth > MAX_QUERY_DEPTH {
            return Err(invalid(format!(
                "selection nested deeper than {MAX_QUERY_DEPTH} levels"
            )));
        }
        self.expect(&Token::LBrace)?;
        let mut fields = Vec::new();
        while !self.eat(&Token::RBrace) {
            let name = self.word()?;
            let children = if self.peek() == Some(&Token::LBrace) {
                self.selection(depth + 1)?
            } else {
                Vec::new()
            };
            fields.push(Field { name, children });
        }
        if fields.is_empty() {
            return Err(invalid("empty selection"));
        }
        Ok(fields)
    }

    fn block(&mut self) -> Result<Block, TesseraError> {
        let alias = self.word()?;
        self.expect(&Token::LParen)?;
        match self.word()?.as_str() {
            "func" => {}
            other => return Err(invalid(format!("expected 'func', found '{other}'"))),
        }
        self.expect(&Token::Colon)?;
        let root = self.root()?;
        self.expect(&Token::RParen)?;
        let fields = self.selection(1)?;
        Ok(Block {
            alias,
            root,
            fields,
        })
    }
}

/// Parse `text`, substituting `$variables` from `vars` (keys with or without
/// the leading `$`) and from defaults declared in the query header.
pub fn parse(text: &str, vars: &BTreeMap<String, String>) -> Result<Query, TesseraError> {
    let vars = vars
        .iter()
        .map(|(k, v)| (k.trim_start_matches('$').to_string(), v.clone()))
        .collect();
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
        vars,
    };

    parser.header()?;
    parser.expect(&Token::LBrace)?;
    let mut blocks = Vec::new();
    let mut aliases = BTreeSet::new();
    while !parser.eat(&Token::RBrace) {
        let block = parser.block()?;
        if !aliases.insert(block.alias.clone()) {
            return Err(invalid(format!("duplicate block '{}'", block.alias)));
        }
        blocks.push(block);
    }
    if let Some(extra) = parser.next() {
        return Err(invalid(format!("unexpected {extra:?} after query")));
    }

    Ok(Query { blocks })
}

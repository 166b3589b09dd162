//! N-Quad text parsing.
//!
//! One statement per line: `subject <predicate> object .` where subject is
//! `_:label` or `<0x..>`, and object is a node, a `"literal"` (optionally
//! typed with `^^<xs:int>` and friends) or `*`. Lines starting with `#` are
//! comments.

use super::{NQuad, Object};
use crate::{TesseraError, Value};
use std::iter::Peekable;
use std::str::Chars;

/// Parse N-Quad text into structured quads.
pub fn parse_nquads(text: &str) -> Result<Vec<NQuad>, TesseraError> {
    let mut quads = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let quad = parse_line(line)
            .map_err(|msg| TesseraError::InvalidMutation(format!("line {}: {msg}", index + 1)))?;
        quads.push(quad);
    }
    Ok(quads)
}

#[derive(Debug, PartialEq)]
enum Term {
    Iri(String),
    Blank(String),
    Literal(Value),
    Star,
    Dot,
}

fn parse_line(line: &str) -> Result<NQuad, String> {
    let mut chars = line.chars().peekable();

    let subject = match next_term(&mut chars)? {
        Some(Term::Iri(iri)) => iri,
        Some(Term::Blank(label)) => label,
        other => return Err(format!("expected subject, found {}", describe(other.as_ref()))),
    };
    let predicate = match next_term(&mut chars)? {
        Some(Term::Iri(iri)) => iri,
        other => return Err(format!("expected <predicate>, found {}", describe(other.as_ref()))),
    };
    let object = match next_term(&mut chars)? {
        Some(Term::Iri(iri)) => Object::Id(iri),
        Some(Term::Blank(label)) => Object::Id(label),
        Some(Term::Literal(value)) => Object::Value(value),
        Some(Term::Star) => Object::Star,
        other => return Err(format!("expected object, found {}", describe(other.as_ref()))),
    };
    match next_term(&mut chars)? {
        Some(Term::Dot) => {}
        other => return Err(format!("expected '.', found {}", describe(other.as_ref()))),
    }
    if let Some(extra) = next_term(&mut chars)? {
        return Err(format!("unexpected {} after '.'", describe(Some(&extra))));
    }

    Ok(NQuad {
        subject,
        predicate,
        object,
    })
}

fn describe(term: Option<&Term>) -> String {
    match term {
        None => "end of line".to_string(),
        Some(Term::Iri(iri)) => format!("<{iri}>"),
        Some(Term::Blank(label)) => label.clone(),
        Some(Term::Literal(value)) => format!("\"{value}\""),
        Some(Term::Star) => "'*'".to_string(),
        Some(Term::Dot) => "'.'".to_string(),
    }
}

fn next_term(chars: &mut Peekable<Chars<'_>>) -> Result<Option<Term>, String> {
    while chars.next_if(|c| c.is_whitespace()).is_some() {}

    let Some(&c) = chars.peek() else {
        return Ok(None);
    };
    match c {
        '<' => {
            chars.next();
            read_iri(chars).map(|iri| Some(Term::Iri(iri)))
        }
        '_' => {
            let mut label = String::new();
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                label.push(c);
            }
            if label.len() <= 2 || !label.starts_with("_:") {
                return Err(format!("invalid blank node '{label}'"));
            }
            Ok(Some(Term::Blank(label)))
        }
        '"' => {
            chars.next();
            let text = read_string(chars)?;
            let value = if chars.next_if_eq(&'^').is_some() {
                if chars.next_if_eq(&'^').is_none() || chars.next_if_eq(&'<').is_none() {
                    return Err("expected ^^<type> after literal".to_string());
                }
                typed_literal(&text, &read_iri(chars)?)?
            } else {
                Value::Str(text)
            };
            Ok(Some(Term::Literal(value)))
        }
        '*' => {
            chars.next();
            Ok(Some(Term::Star))
        }
        '.' => {
            chars.next();
            Ok(Some(Term::Dot))
        }
        other => Err(format!("unexpected character '{other}'")),
    }
}

fn read_iri(chars: &mut Peekable<Chars<'_>>) -> Result<String, String> {
    let mut iri = String::new();
    for c in chars.by_ref() {
        if c == '>' {
            let iri = iri.trim().to_string();
            if iri.is_empty() {
                return Err("empty <>".to_string());
            }
            return Ok(iri);
        }
        iri.push(c);
    }
    Err("unterminated '<'".to_string())
}

fn read_string(chars: &mut Peekable<Chars<'_>>) -> Result<String, String> {
    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(out),
            '\\' => match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).collect();
                    let code = u32::from_str_radix(&hex, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| format!("invalid escape \\u{hex}"))?;
                    out.push(code);
                }
                Some(other) => return Err(format!("invalid escape \\{other}")),
                None => break,
            },
            other => out.push(other),
        }
    }
    Err("unterminated string literal".to_string())
}

fn typed_literal(text: &str, iri: &str) -> Result<Value, String> {
    let ty = iri
        .strip_prefix("xs:")
        .or_else(|| iri.strip_prefix("http://www.w3.org/2001/XMLSchema#"))
        .unwrap_or(iri);
    let bad = || format!("'{text}' is not a valid {ty}");
    match ty {
        "string" => Ok(Value::Str(text.to_string())),
        "int" | "integer" | "long" => text.parse().map(Value::Int).map_err(|_| bad()),
        "float" | "double" | "decimal" => match text.parse::<f64>() {
            Ok(x) if x.is_finite() => Ok(Value::Float(x)),
            _ => Err(bad()),
        },
        "boolean" => match text {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(bad()),
        },
        other => Err(format!("unsupported literal type <{other}>")),
    }
}

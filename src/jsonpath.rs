// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! A small JSONPath subset used to name fields that a `CustomTransform` removes.
//!
//! # Grammar
//!
//! A query is `$` followed by zero or more selectors:
//!
//! - `.name` - member by identifier (`[A-Za-z0-9_-]+`)
//! - `.*` or `[*]` - every member of an object or element of an array
//! - `[index]` - array element; negative indexes count from the end
//! - `["name"]` or `['name']` - member by arbitrary string, e.g. `["app.kubernetes.io/name"]`
//! - `[a, b, ...]` - union of the quoted names and indexes above
//!
//! The bare `$` parses but identifies the whole object, which is not a valid removal.
//! Recursive descent (`..`) and filter expressions are not supported.
//!
//! # Example
//!
//! ```rust
//! use binding_transport::jsonpath;
//! use serde_json::json;
//!
//! let query = jsonpath::parse(r#"$.metadata.labels["env"]"#).unwrap();
//! let mut obj = json!({"metadata": {"labels": {"env": "prod", "app": "web"}}});
//! query.remove_from(&mut obj);
//! assert_eq!(obj, json!({"metadata": {"labels": {"app": "web"}}}));
//! ```

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// One step of a [`Query`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    /// Object member by name.
    Child(String),
    /// Array element by position.
    Index(i64),
    /// Every member or element.
    Wildcard,
    /// Any of the listed selectors.
    Union(Vec<Selector>),
}

/// A compiled removal query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    source: String,
    selectors: Vec<Selector>,
}

/// Why a query failed to parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl Query {
    /// True for `$`, which selects the entire document.
    #[must_use]
    pub fn is_whole_object(&self) -> bool {
        self.selectors.is_empty()
    }

    #[must_use]
    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    /// Removes every field the query selects. Paths that do not exist are skipped.
    /// Returns the number of fields removed.
    pub fn remove_from(&self, value: &mut Value) -> usize {
        remove_at(value, &self.selectors)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parses a query in the subset described in the module docs.
///
/// # Errors
///
/// Returns a [`ParseError`] naming the offending offset.
pub fn parse(input: &str) -> Result<Query, ParseError> {
    let mut parser = Parser {
        chars: input.char_indices().collect(),
        pos: 0,
        len: input.len(),
    };
    let selectors = parser.parse_query()?;
    Ok(Query {
        source: input.to_string(),
        selectors,
    })
}

struct Parser {
    chars: Vec<(usize, char)>,
    pos: usize,
    len: usize,
}

impl Parser {
    fn offset(&self) -> usize {
        self.chars.get(self.pos).map_or(self.len, |(off, _)| *off)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError {
            offset: self.offset(),
            message: message.into(),
        })
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse_query(&mut self) -> Result<Vec<Selector>, ParseError> {
        if self.bump() != Some('$') {
            self.pos = 0;
            return self.error("query must start with '$'");
        }
        let mut selectors = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                '.' => {
                    self.bump();
                    selectors.push(self.parse_dot_selector()?);
                }
                '[' => {
                    self.bump();
                    selectors.push(self.parse_bracket_selector()?);
                }
                other => return self.error(format!("unexpected character {other:?}")),
            }
        }
        Ok(selectors)
    }

    fn parse_dot_selector(&mut self) -> Result<Selector, ParseError> {
        match self.peek() {
            Some('.') => self.error("recursive descent ('..') is not supported"),
            Some('*') => {
                self.bump();
                Ok(Selector::Wildcard)
            }
            Some(c) if is_name_char(c) => {
                let mut name = String::new();
                while let Some(c) = self.peek().filter(|c| is_name_char(*c)) {
                    name.push(c);
                    self.bump();
                }
                Ok(Selector::Child(name))
            }
            _ => self.error("expected a member name after '.'"),
        }
    }

    fn parse_bracket_selector(&mut self) -> Result<Selector, ParseError> {
        self.skip_whitespace();
        if self.peek() == Some('*') {
            self.bump();
            self.skip_whitespace();
            return self.expect_close().map(|()| Selector::Wildcard);
        }

        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            let item = match self.peek() {
                Some(q @ ('"' | '\'')) => {
                    self.bump();
                    Selector::Child(self.parse_quoted(q)?)
                }
                Some(c) if c == '-' || c.is_ascii_digit() => Selector::Index(self.parse_index()?),
                Some(']') if items.is_empty() => return self.error("empty brackets"),
                _ => return self.error("expected a quoted name or an index"),
            };
            items.push(item);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                _ => break,
            }
        }
        self.expect_close()?;

        if items.len() == 1 {
            Ok(items.remove(0))
        } else {
            Ok(Selector::Union(items))
        }
    }

    fn expect_close(&mut self) -> Result<(), ParseError> {
        if self.peek() == Some(']') {
            self.bump();
            Ok(())
        } else {
            self.error("expected ']'")
        }
    }

    fn parse_quoted(&mut self, quote: char) -> Result<String, ParseError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return self.error("unterminated string"),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return self.error("unterminated escape"),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_index(&mut self) -> Result<i64, ParseError> {
        let start = self.pos;
        let mut digits = String::new();
        if self.peek() == Some('-') {
            digits.push('-');
            self.bump();
        }
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            digits.push(c);
            self.bump();
        }
        digits.parse::<i64>().or_else(|_| {
            self.pos = start;
            self.error("invalid array index")
        })
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let idx = if index < 0 { len + index } else { index };
    if (0..len).contains(&idx) {
        usize::try_from(idx).ok()
    } else {
        None
    }
}

fn remove_at(value: &mut Value, selectors: &[Selector]) -> usize {
    let Some((first, rest)) = selectors.split_first() else {
        return 0;
    };
    if rest.is_empty() {
        return remove_matching(value, first);
    }
    let mut removed = 0;
    for_each_match(value, first, &mut |child: &mut Value| {
        removed += remove_at(child, rest);
    });
    removed
}

fn for_each_match(value: &mut Value, selector: &Selector, f: &mut dyn FnMut(&mut Value)) {
    match (selector, value) {
        (Selector::Child(name), Value::Object(map)) => {
            if let Some(child) = map.get_mut(name) {
                f(child);
            }
        }
        (Selector::Index(index), Value::Array(items)) => {
            if let Some(child) = resolve_index(*index, items.len()).and_then(|i| items.get_mut(i)) {
                f(child);
            }
        }
        (Selector::Wildcard, Value::Object(map)) => map.values_mut().for_each(f),
        (Selector::Wildcard, Value::Array(items)) => items.iter_mut().for_each(f),
        (Selector::Union(options), value) => {
            for option in options {
                for_each_match(value, option, f);
            }
        }
        _ => {}
    }
}

fn remove_matching(value: &mut Value, selector: &Selector) -> usize {
    let options = match selector {
        Selector::Union(options) => options.as_slice(),
        single => std::slice::from_ref(single),
    };
    match value {
        Value::Object(map) => {
            if options.contains(&Selector::Wildcard) {
                let n = map.len();
                map.clear();
                return n;
            }
            options
                .iter()
                .filter_map(|opt| match opt {
                    Selector::Child(name) => map.remove(name),
                    _ => None,
                })
                .count()
        }
        Value::Array(items) => {
            if options.contains(&Selector::Wildcard) {
                let n = items.len();
                items.clear();
                return n;
            }
            let mut doomed: Vec<usize> = options
                .iter()
                .filter_map(|opt| match opt {
                    Selector::Index(index) => resolve_index(*index, items.len()),
                    _ => None,
                })
                .collect();
            doomed.sort_unstable();
            doomed.dedup();
            for idx in doomed.iter().rev() {
                items.remove(*idx);
            }
            doomed.len()
        }
        _ => 0,
    }
}

#[cfg(test)]
#[path = "jsonpath_tests.rs"]
mod jsonpath_tests;

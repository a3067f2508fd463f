//! Value Renderer (C1): expands `${prefix:expression}` tokens in strings and structured values,
//! and evaluates the small boolean expression language used by `discover`/`analysis` conditions.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Maximum number of rescans the renderer performs while resolving nested tokens before giving
/// up and returning the string as-is. The spec requires "≥8"; 16 gives headroom for definitions
/// that legitimately nest a few levels without risking an infinite loop on a self-referential one.
const MAX_RENDER_PASSES: usize = 16;

/// A resolved token value: either a scalar (the common case) or a list, used when a token
/// expands into multiple values (e.g. a captured, newline-separated query result).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolved {
    Scalar(String),
    List(Vec<String>),
}

impl Resolved {
    fn into_scalar(self) -> String {
        match self {
            Self::Scalar(s) => s,
            Self::List(items) => items.join(","),
        }
    }
}

/// Supplies values for `${prefix:expression}` tokens. Implementations are cheap to construct per
/// render call; they typically borrow a [`crate::definition::DefinitionFile`] and a handful of
/// ambient facts (compiler path, host triple, working directory).
pub trait Resolver {
    /// Resolve a single token. `prefix` is empty for bare `${expression}` tokens.
    fn resolve(&self, prefix: &str, expression: &str) -> Option<Resolved>;
}

/// A resolver with no context of its own, for expressions evaluated without a compiler candidate
/// (e.g. a definition's `conditions` block, which sees only its own fields).
pub struct NullResolver;

impl Resolver for NullResolver {
    fn resolve(&self, _prefix: &str, _expression: &str) -> Option<Resolved> {
        None
    }
}

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    // Matches one token with no nested `${`/`}` inside it, so repeated application resolves
    // innermost tokens first.
    Regex::new(r"\$\{(?:([A-Za-z_][A-Za-z0-9_.]*):)?([^${}]*)\}").unwrap()
});

/// Expands every `${prefix:expression}` token in `template`, re-scanning until no tokens remain
/// or [`MAX_RENDER_PASSES`] is reached.
pub fn render(template: &str, resolver: &dyn Resolver) -> String {
    let mut current = template.to_string();
    for _ in 0..MAX_RENDER_PASSES {
        if !TOKEN_RE.is_match(&current) {
            break;
        }
        let mut changed = false;
        let next = TOKEN_RE
            .replace_all(&current, |caps: &regex::Captures<'_>| {
                changed = true;
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                let expr = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                match resolver.resolve(prefix, expr) {
                    Some(resolved) => resolved.into_scalar(),
                    None => String::new(),
                }
            })
            .into_owned();
        if !changed || next == current {
            current = next;
            break;
        }
        current = next;
    }
    current
}

/// Renders every string leaf of a JSON value, preserving object/array structure.
pub fn recursive_render(value: &Value, resolver: &dyn Resolver) -> Value {
    match value {
        Value::String(s) => Value::String(render(s, resolver)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| recursive_render(v, resolver)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter().map(|(k, v)| (k.clone(), recursive_render(v, resolver))).collect(),
        ),
        other => other.clone(),
    }
}

/// Renders `expr`, then interprets the result as a small boolean expression evaluated against
/// `data`. Returns `false` on any parse error — evaluation never panics or propagates an error,
/// per the spec's "sandboxed; on parse error the result is falsy".
pub fn evaluate_expression(expr: &str, data: &Value, resolver: &dyn Resolver) -> bool {
    let rendered = render(expr, resolver);
    expr_lang::parse_and_eval(&rendered, data).unwrap_or(false)
}

/// A minimal recursive-descent evaluator for the boolean expression language used inside
/// `expression` action blocks: literals, dotted identifiers looked up in a [`Value`], relational
/// and logical operators, string equality. No function calls, no assignment, no external I/O.
mod expr_lang {
    use serde_json::Value;

    #[derive(Clone, Debug, PartialEq)]
    pub enum Lit {
        Str(String),
        Num(f64),
        Bool(bool),
        Null,
    }

    impl Lit {
        fn truthy(&self) -> bool {
            match self {
                Lit::Str(s) => !s.is_empty(),
                Lit::Num(n) => *n != 0.0,
                Lit::Bool(b) => *b,
                Lit::Null => false,
            }
        }
    }

    struct Parser<'a> {
        tokens: Vec<Token<'a>>,
        pos: usize,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum Token<'a> {
        Ident(&'a str),
        Str(String),
        Num(f64),
        Op(&'static str),
        LParen,
        RParen,
    }

    fn tokenize(src: &str) -> Option<Vec<Token<'_>>> {
        let bytes = src.as_bytes();
        let mut i = 0;
        let mut tokens = Vec::new();
        while i < bytes.len() {
            let c = bytes[i] as char;
            if c.is_whitespace() {
                i += 1;
                continue;
            }
            match c {
                '(' => {
                    tokens.push(Token::LParen);
                    i += 1;
                }
                ')' => {
                    tokens.push(Token::RParen);
                    i += 1;
                }
                '\'' | '"' => {
                    let quote = c;
                    let start = i + 1;
                    let mut j = start;
                    while j < bytes.len() && bytes[j] as char != quote {
                        j += 1;
                    }
                    if j >= bytes.len() {
                        return None;
                    }
                    tokens.push(Token::Str(src[start..j].to_string()));
                    i = j + 1;
                }
                '=' if bytes.get(i + 1) == Some(&b'=') => {
                    tokens.push(Token::Op("=="));
                    i += 2;
                }
                '!' if bytes.get(i + 1) == Some(&b'=') => {
                    tokens.push(Token::Op("!="));
                    i += 2;
                }
                '!' => {
                    tokens.push(Token::Op("!"));
                    i += 1;
                }
                '<' if bytes.get(i + 1) == Some(&b'=') => {
                    tokens.push(Token::Op("<="));
                    i += 2;
                }
                '<' => {
                    tokens.push(Token::Op("<"));
                    i += 1;
                }
                '>' if bytes.get(i + 1) == Some(&b'=') => {
                    tokens.push(Token::Op(">="));
                    i += 2;
                }
                '>' => {
                    tokens.push(Token::Op(">"));
                    i += 1;
                }
                '&' if bytes.get(i + 1) == Some(&b'&') => {
                    tokens.push(Token::Op("&&"));
                    i += 2;
                }
                '|' if bytes.get(i + 1) == Some(&b'|') => {
                    tokens.push(Token::Op("||"));
                    i += 2;
                }
                c if c.is_ascii_digit() || (c == '-' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit())) => {
                    let start = i;
                    i += 1;
                    while i < bytes.len() && (bytes[i] as char).is_ascii_digit() || bytes.get(i) == Some(&b'.') {
                        i += 1;
                    }
                    let num: f64 = src[start..i].parse().ok()?;
                    tokens.push(Token::Num(num));
                }
                c if c.is_alphabetic() || c == '_' => {
                    let start = i;
                    while i < bytes.len() {
                        let ch = bytes[i] as char;
                        if ch.is_alphanumeric() || ch == '_' || ch == '.' {
                            i += 1;
                        } else {
                            break;
                        }
                    }
                    tokens.push(Token::Ident(&src[start..i]));
                }
                _ => return None,
            }
        }
        Some(tokens)
    }

    impl<'a> Parser<'a> {
        fn peek(&self) -> Option<&Token<'a>> {
            self.tokens.get(self.pos)
        }

        fn next(&mut self) -> Option<Token<'a>> {
            let t = self.tokens.get(self.pos).cloned();
            self.pos += 1;
            t
        }

        fn or_expr(&mut self, data: &Value) -> Option<bool> {
            let mut left = self.and_expr(data)?;
            while matches!(self.peek(), Some(Token::Op("||"))) {
                self.next();
                let right = self.and_expr(data)?;
                left = left || right;
            }
            Some(left)
        }

        fn and_expr(&mut self, data: &Value) -> Option<bool> {
            let mut left = self.not_expr(data)?;
            while matches!(self.peek(), Some(Token::Op("&&"))) {
                self.next();
                let right = self.not_expr(data)?;
                left = left && right;
            }
            Some(left)
        }

        fn not_expr(&mut self, data: &Value) -> Option<bool> {
            if matches!(self.peek(), Some(Token::Op("!"))) {
                self.next();
                return Some(!self.not_expr(data)?);
            }
            self.comparison(data)
        }

        fn comparison(&mut self, data: &Value) -> Option<bool> {
            if matches!(self.peek(), Some(Token::LParen)) {
                self.next();
                let inner = self.or_expr(data)?;
                if !matches!(self.next(), Some(Token::RParen)) {
                    return None;
                }
                return Some(inner);
            }

            let left = self.primary(data)?;
            let op = match self.peek() {
                Some(Token::Op(op @ ("==" | "!=" | "<" | "<=" | ">" | ">="))) => *op,
                _ => return Some(left.truthy()),
            };
            self.next();
            let right = self.primary(data)?;
            Some(compare(&left, op, &right))
        }

        fn primary(&mut self, data: &Value) -> Option<Lit> {
            match self.next()? {
                Token::Str(s) => Some(Lit::Str(s)),
                Token::Num(n) => Some(Lit::Num(n)),
                Token::Ident("true") => Some(Lit::Bool(true)),
                Token::Ident("false") => Some(Lit::Bool(false)),
                Token::Ident(path) => Some(lookup(data, path)),
                Token::LParen => {
                    let inner = self.or_expr(data)?;
                    if !matches!(self.next(), Some(Token::RParen)) {
                        return None;
                    }
                    Some(Lit::Bool(inner))
                }
                _ => None,
            }
        }
    }

    fn lookup(data: &Value, path: &str) -> Lit {
        let mut cur = data;
        for part in path.split('.') {
            match cur.get(part) {
                Some(v) => cur = v,
                None => return Lit::Null,
            }
        }
        match cur {
            Value::String(s) => Lit::Str(s.clone()),
            Value::Bool(b) => Lit::Bool(*b),
            Value::Number(n) => Lit::Num(n.as_f64().unwrap_or(0.0)),
            Value::Null => Lit::Null,
            other => Lit::Str(other.to_string()),
        }
    }

    fn compare(left: &Lit, op: &str, right: &Lit) -> bool {
        use Lit::*;
        let ordering = match (left, right) {
            (Str(a), Str(b)) => Some(a.cmp(b)),
            (Num(a), Num(b)) => a.partial_cmp(b),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            _ => None,
        };
        match op {
            "==" => left == right,
            "!=" => left != right,
            "<" => ordering.is_some_and(|o| o.is_lt()),
            "<=" => ordering.is_some_and(|o| o.is_le()),
            ">" => ordering.is_some_and(|o| o.is_gt()),
            ">=" => ordering.is_some_and(|o| o.is_ge()),
            _ => false,
        }
    }

    pub fn parse_and_eval(src: &str, data: &Value) -> Option<bool> {
        let tokens = tokenize(src)?;
        let mut parser = Parser { tokens, pos: 0 };
        let result = parser.or_expr(data)?;
        if parser.pos != parser.tokens.len() {
            return None;
        }
        Some(result)
    }
}

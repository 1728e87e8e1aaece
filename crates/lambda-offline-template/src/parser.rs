//! Template parser: source text to a node tree.

use std::rc::Rc;

use serde_json::Value;

use crate::error::TemplateRenderError;

type Result<T> = std::result::Result<T, TemplateRenderError>;

/// A parsed template fragment.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Reference(Reference),
    Set {
        name: String,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Option<Vec<Node>>,
    },
    Foreach {
        var: String,
        iterable: Expr,
        body: Vec<Node>,
    },
    Define {
        name: String,
        body: Rc<Vec<Node>>,
    },
}

/// `$root.a.b(...)[i]`, possibly quiet.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reference {
    pub quiet: bool,
    pub root: String,
    pub accessors: Vec<Accessor>,
    /// Source text, used in error messages.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Accessor {
    Property(String),
    Method(String, Vec<Expr>),
    Index(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    /// Double-quoted string containing references.
    Interpolated(Vec<Node>),
    Reference(Reference),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

/// What ended a block.
enum Terminator {
    Eof,
    End,
    Else,
    ElseIf(Expr),
}

enum Directive {
    Set,
    If,
    ElseIf,
    Else,
    End,
    Foreach,
    Define,
}

/// Parse a whole template.
pub(crate) fn parse_template(src: &str) -> Result<Vec<Node>> {
    let mut parser = Parser::new(src);
    let (nodes, terminator) = parser.parse_block()?;
    match terminator {
        Terminator::Eof => Ok(nodes),
        Terminator::End => Err(TemplateRenderError::Unmatched("end")),
        Terminator::Else => Err(TemplateRenderError::Unmatched("else")),
        Terminator::ElseIf(_) => Err(TemplateRenderError::Unmatched("elseif")),
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

fn is_ident_start(c: Option<char>) -> bool {
    matches!(c, Some(c) if c.is_ascii_alphabetic() || c == '_')
}

fn is_ident_char(c: Option<char>) -> bool {
    matches!(c, Some(c) if c.is_ascii_alphanumeric() || c == '_')
}

impl Parser {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        let len = s.chars().count();
        let matches = s
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c));
        if matches {
            self.pos += len;
        }
        matches
    }

    /// Consume a keyword only when it is not the prefix of a longer identifier.
    fn eat_word(&mut self, word: &str) -> bool {
        let len = word.chars().count();
        let matches = word
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
            && !is_ident_char(self.peek_at(len));
        if matches {
            self.pos += len;
        }
        matches
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn found(&self) -> String {
        match self.peek() {
            Some(c) => format!("'{}'", c),
            None => "end of template".to_string(),
        }
    }

    fn expect(&mut self, c: char, expected: &'static str) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(TemplateRenderError::Unexpected {
                found: self.found(),
                expected,
                offset: self.pos,
            })
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while is_ident_char(self.peek()) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_block(&mut self) -> Result<(Vec<Node>, Terminator)> {
        let mut nodes = Vec::new();
        let mut text = String::new();

        macro_rules! flush {
            () => {
                if !text.is_empty() {
                    nodes.push(Node::Text(std::mem::take(&mut text)));
                }
            };
        }

        while let Some(c) = self.peek() {
            match c {
                '#' if self.peek_at(1) == Some('#') => {
                    // line comment, newline included
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                '#' if self.peek_at(1) == Some('*') => {
                    let start = self.pos;
                    self.pos += 2;
                    if !self.skip_until("*#") {
                        return Err(TemplateRenderError::Unterminated {
                            what: "block comment",
                            offset: start,
                        });
                    }
                }
                '#' => match self.directive() {
                    Some(Directive::End) => {
                        flush!();
                        return Ok((nodes, Terminator::End));
                    }
                    Some(Directive::Else) => {
                        flush!();
                        return Ok((nodes, Terminator::Else));
                    }
                    Some(Directive::ElseIf) => {
                        flush!();
                        let cond = self.parse_condition()?;
                        return Ok((nodes, Terminator::ElseIf(cond)));
                    }
                    Some(Directive::Set) => {
                        flush!();
                        nodes.push(self.parse_set()?);
                    }
                    Some(Directive::If) => {
                        flush!();
                        nodes.push(self.parse_if()?);
                    }
                    Some(Directive::Foreach) => {
                        flush!();
                        nodes.push(self.parse_foreach()?);
                    }
                    Some(Directive::Define) => {
                        flush!();
                        nodes.push(self.parse_define()?);
                    }
                    None => {
                        text.push('#');
                        self.pos += 1;
                    }
                },
                '$' => match self.reference()? {
                    Some(reference) => {
                        flush!();
                        nodes.push(Node::Reference(reference));
                    }
                    None => {
                        text.push('$');
                        self.pos += 1;
                    }
                },
                '\\' if matches!(self.peek_at(1), Some('$' | '#')) => {
                    // escaped sigil
                    self.pos += 1;
                    text.push(self.bump().unwrap_or('\\'));
                }
                _ => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }

        flush!();
        Ok((nodes, Terminator::Eof))
    }

    fn skip_until(&mut self, marker: &str) -> bool {
        while self.peek().is_some() {
            if self.eat_str(marker) {
                return true;
            }
            self.pos += 1;
        }
        false
    }

    /// Recognise a directive at `#`; restores the position when there is none.
    fn directive(&mut self) -> Option<Directive> {
        let start = self.pos;
        self.pos += 1;
        let braced = self.eat('{');
        let name_start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        let name: String = self.chars[name_start..self.pos].iter().collect();
        if braced && !self.eat('}') {
            self.pos = start;
            return None;
        }
        let directive = match name.as_str() {
            "set" => Directive::Set,
            "if" => Directive::If,
            "elseif" => Directive::ElseIf,
            "else" => Directive::Else,
            "end" => Directive::End,
            "foreach" => Directive::Foreach,
            "define" => Directive::Define,
            _ => {
                self.pos = start;
                return None;
            }
        };
        Some(directive)
    }

    /// Parse a reference at `$`. Returns `None` (position restored) when the
    /// sigil is not followed by an identifier.
    fn reference(&mut self) -> Result<Option<Reference>> {
        let start = self.pos;
        self.pos += 1;
        let quiet = self.eat('!');
        let braced = self.eat('{');
        if !is_ident_start(self.peek()) {
            self.pos = start;
            return Ok(None);
        }
        let root = self.ident();
        let accessors = self.accessors()?;
        if braced && !self.eat('}') {
            return Err(TemplateRenderError::Unterminated {
                what: "reference",
                offset: start,
            });
        }
        Ok(Some(Reference {
            quiet,
            root,
            accessors,
            source: self.chars[start..self.pos].iter().collect(),
        }))
    }

    fn accessors(&mut self) -> Result<Vec<Accessor>> {
        let mut accessors = Vec::new();
        loop {
            if self.peek() == Some('.') && is_ident_start(self.peek_at(1)) {
                self.pos += 1;
                let name = self.ident();
                if self.eat('(') {
                    let args = self.arguments()?;
                    accessors.push(Accessor::Method(name, args));
                } else {
                    accessors.push(Accessor::Property(name));
                }
            } else if self.peek() == Some('[') {
                self.pos += 1;
                let index = self.expr()?;
                self.skip_ws();
                self.expect(']', "']'")?;
                accessors.push(Accessor::Index(index));
            } else {
                return Ok(accessors);
            }
        }
    }

    /// Arguments after an opening parenthesis, through the closing one.
    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.eat(')') {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.expect(')', "')' or ','")?;
            return Ok(args);
        }
    }

    fn parse_condition(&mut self) -> Result<Expr> {
        self.skip_ws();
        self.expect('(', "'('")?;
        let cond = self.expr()?;
        self.skip_ws();
        self.expect(')', "')'")?;
        Ok(cond)
    }

    /// `$name` inside a directive header.
    fn variable(&mut self) -> Result<String> {
        self.skip_ws();
        self.expect('$', "a variable")?;
        self.eat('!');
        let braced = self.eat('{');
        if !is_ident_start(self.peek()) {
            return Err(TemplateRenderError::Unexpected {
                found: self.found(),
                expected: "a variable name",
                offset: self.pos,
            });
        }
        let name = self.ident();
        if braced {
            self.expect('}', "'}'")?;
        }
        Ok(name)
    }

    fn parse_set(&mut self) -> Result<Node> {
        self.skip_ws();
        self.expect('(', "'('")?;
        let name = self.variable()?;
        self.skip_ws();
        self.expect('=', "'='")?;
        let value = self.expr()?;
        self.skip_ws();
        self.expect(')', "')'")?;
        Ok(Node::Set { name, value })
    }

    fn parse_if(&mut self) -> Result<Node> {
        let start = self.pos;
        let cond = self.parse_condition()?;
        let (body, mut terminator) = self.parse_block()?;
        let mut branches = vec![(cond, body)];
        let mut otherwise = None;
        loop {
            match terminator {
                Terminator::End => break,
                Terminator::ElseIf(cond) => {
                    let (body, next) = self.parse_block()?;
                    branches.push((cond, body));
                    terminator = next;
                }
                Terminator::Else => {
                    let (body, next) = self.parse_block()?;
                    match next {
                        Terminator::End => {}
                        Terminator::Eof => {
                            return Err(TemplateRenderError::Unterminated {
                                what: "#if",
                                offset: start,
                            })
                        }
                        Terminator::Else => return Err(TemplateRenderError::Unmatched("else")),
                        Terminator::ElseIf(_) => {
                            return Err(TemplateRenderError::Unmatched("elseif"))
                        }
                    }
                    otherwise = Some(body);
                    break;
                }
                Terminator::Eof => {
                    return Err(TemplateRenderError::Unterminated {
                        what: "#if",
                        offset: start,
                    })
                }
            }
        }
        Ok(Node::If {
            branches,
            otherwise,
        })
    }

    /// Body of `#foreach` / `#define`, which must end in `#end`.
    fn block_until_end(&mut self, what: &'static str, start: usize) -> Result<Vec<Node>> {
        let (body, terminator) = self.parse_block()?;
        match terminator {
            Terminator::End => Ok(body),
            Terminator::Eof => Err(TemplateRenderError::Unterminated {
                what,
                offset: start,
            }),
            Terminator::Else => Err(TemplateRenderError::Unmatched("else")),
            Terminator::ElseIf(_) => Err(TemplateRenderError::Unmatched("elseif")),
        }
    }

    fn parse_foreach(&mut self) -> Result<Node> {
        let start = self.pos;
        self.skip_ws();
        self.expect('(', "'('")?;
        let var = self.variable()?;
        self.skip_ws();
        if !self.eat_word("in") {
            return Err(TemplateRenderError::Unexpected {
                found: self.found(),
                expected: "'in'",
                offset: self.pos,
            });
        }
        let iterable = self.expr()?;
        self.skip_ws();
        self.expect(')', "')'")?;
        let body = self.block_until_end("#foreach", start)?;
        Ok(Node::Foreach {
            var,
            iterable,
            body,
        })
    }

    fn parse_define(&mut self) -> Result<Node> {
        let start = self.pos;
        self.skip_ws();
        self.expect('(', "'('")?;
        let name = self.variable()?;
        self.skip_ws();
        self.expect(')', "')'")?;
        let body = self.block_until_end("#define", start)?;
        Ok(Node::Define {
            name,
            body: Rc::new(body),
        })
    }

    // Expressions, lowest precedence first.

    fn expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        loop {
            self.skip_ws();
            if self.eat_str("||") || self.eat_word("or") {
                let right = self.and_expr()?;
                left = Expr::Binary(Box::new(left), BinOp::Or, Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        loop {
            self.skip_ws();
            if self.eat_str("&&") || self.eat_word("and") {
                let right = self.comparison()?;
                left = Expr::Binary(Box::new(left), BinOp::And, Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.unary()?;
        self.skip_ws();
        let op = if self.eat_str("==") || self.eat_word("eq") {
            BinOp::Eq
        } else if self.eat_str("!=") || self.eat_word("ne") {
            BinOp::Ne
        } else if self.eat_str("<=") || self.eat_word("le") {
            BinOp::Le
        } else if self.eat_str(">=") || self.eat_word("ge") {
            BinOp::Ge
        } else if self.eat('<') || self.eat_word("lt") {
            BinOp::Lt
        } else if self.eat('>') || self.eat_word("gt") {
            BinOp::Gt
        } else {
            return Ok(left);
        };
        let right = self.unary()?;
        Ok(Expr::Binary(Box::new(left), op, Box::new(right)))
    }

    fn unary(&mut self) -> Result<Expr> {
        self.skip_ws();
        if self.peek() == Some('!') && self.peek_at(1) != Some('=') {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat_word("not") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        self.skip_ws();
        let offset = self.pos;
        match self.peek() {
            Some('$') => match self.reference()? {
                Some(reference) => Ok(Expr::Reference(reference)),
                None => Err(TemplateRenderError::Unexpected {
                    found: "'$'".to_string(),
                    expected: "a reference",
                    offset,
                }),
            },
            Some(q @ ('\'' | '"')) => self.string(q),
            Some('[') => {
                self.pos += 1;
                let mut items = Vec::new();
                self.skip_ws();
                if self.eat(']') {
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.expr()?);
                    self.skip_ws();
                    if self.eat(',') {
                        continue;
                    }
                    self.expect(']', "']' or ','")?;
                    return Ok(Expr::List(items));
                }
            }
            Some('(') => {
                self.pos += 1;
                let inner = self.expr()?;
                self.skip_ws();
                self.expect(')', "')'")?;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || (c == '-' && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit())) => {
                self.number()
            }
            Some(_) if self.eat_word("true") => Ok(Expr::Literal(Value::Bool(true))),
            Some(_) if self.eat_word("false") => Ok(Expr::Literal(Value::Bool(false))),
            Some(_) if self.eat_word("null") => Ok(Expr::Literal(Value::Null)),
            Some(_) => Err(TemplateRenderError::Unexpected {
                found: self.found(),
                expected: "an expression",
                offset,
            }),
            None => Err(TemplateRenderError::Unterminated {
                what: "expression",
                offset,
            }),
        }
    }

    fn number(&mut self) -> Result<Expr> {
        let start = self.pos;
        self.eat('-');
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        serde_json::from_str::<Value>(&raw)
            .map(Expr::Literal)
            .map_err(|_| TemplateRenderError::Unexpected {
                found: raw,
                expected: "a number",
                offset: start,
            })
    }

    fn string(&mut self, quote: char) -> Result<Expr> {
        let start = self.pos;
        self.pos += 1;
        let mut content = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(TemplateRenderError::Unterminated {
                        what: "string",
                        offset: start,
                    })
                }
                Some(c) if c == quote => break,
                Some('\\') => match self.peek() {
                    Some(c) if c == quote || c == '\\' => {
                        content.push(c);
                        self.pos += 1;
                    }
                    _ => content.push('\\'),
                },
                Some(c) => content.push(c),
            }
        }

        if quote == '"' && (content.contains('$') || content.contains('#')) {
            let nodes = parse_template(&content)?;
            if nodes.iter().any(|n| !matches!(n, Node::Text(_))) {
                return Ok(Expr::Interpolated(nodes));
            }
        }
        Ok(Expr::Literal(Value::String(content)))
    }
}

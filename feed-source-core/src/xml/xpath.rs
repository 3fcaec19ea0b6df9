//! A compiled XPath 1.0 subset evaluated over [`Document`] arenas.
//!
//! Supported: absolute and relative location paths, `//`, `.`, `..`, `*`,
//! `@name`, `text()`, `node()`, the axes `child`, `descendant`,
//! `descendant-or-self`, `parent`, `ancestor`, `ancestor-or-self`, `self`,
//! `attribute`, `following-sibling` and `preceding-sibling`, predicates
//! (positional and boolean), unions, `and`/`or`, comparisons, and the common
//! string/node-set functions. Arithmetic other than unary minus is not
//! supported.

use std::sync::Arc;

use thiserror::Error;

use super::namespace::NamespaceRegistry;
use super::tree::{Document, NodeData, NodeId, QName, XmlElement, ROOT};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum XPathError {
    #[error("unexpected character `{0}` at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal")]
    UnterminatedLiteral,
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("unknown axis `{0}`")]
    UnknownAxis(String),
    #[error("function `{0}` called with the wrong number of arguments")]
    Arity(String),
    #[error("expression does not select nodes")]
    NotANodeSet,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Pipe,
    Dot,
    DotDot,
    Star,
    Minus,
    Cmp(CmpOp),
    Literal(String),
    Number(f64),
    Name(String),
    AxisName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn flip(self) -> Self {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            other => other,
        }
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn tokenize(src: &str) -> Result<Vec<Token>, XPathError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let peek = |i: usize| chars.get(i).copied();

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '/' if peek(i + 1) == Some('/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += 1;
            }
            '!' if peek(i + 1) == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Neq));
                i += 2;
            }
            '<' | '>' => {
                let or_equal = peek(i + 1) == Some('=');
                let op = match (c, or_equal) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    ('>', false) => CmpOp::Gt,
                    _ => CmpOp::Ge,
                };
                tokens.push(Token::Cmp(op));
                i += if or_equal { 2 } else { 1 };
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == c)
                    .ok_or(XPathError::UnterminatedLiteral)?;
                tokens.push(Token::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '.' if peek(i + 1) == Some('.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' if !peek(i + 1).is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| XPathError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Number(number));
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                let mut name: String = chars[start..i].iter().collect();
                if peek(i) == Some(':') && peek(i + 1) == Some(':') {
                    tokens.push(Token::AxisName(name));
                    i += 2;
                    continue;
                }
                if peek(i) == Some(':') {
                    match peek(i + 1) {
                        Some('*') => {
                            name.push_str(":*");
                            i += 2;
                        }
                        Some(n) if is_name_start(n) => {
                            let local_start = i + 1;
                            i += 1;
                            while i < chars.len() && is_name_char(chars[i]) {
                                i += 1;
                            }
                            name.push(':');
                            name.extend(&chars[local_start..i]);
                        }
                        _ => return Err(XPathError::UnexpectedChar(':', i)),
                    }
                }
                tokens.push(Token::Name(name));
            }
            other => return Err(XPathError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    Ancestor,
    AncestorOrSelf,
    SelfAxis,
    Attribute,
    FollowingSibling,
    PrecedingSibling,
}

impl Axis {
    fn from_name(name: &str) -> Result<Self, XPathError> {
        Ok(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "self" => Axis::SelfAxis,
            "attribute" => Axis::Attribute,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            other => return Err(XPathError::UnknownAxis(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(QName),
    Wildcard,
    PrefixWildcard(String),
    Text,
    Node,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Path { absolute: bool, steps: Vec<Step> },
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
    Literal(String),
    Number(f64),
    Function(String, Vec<Expr>),
}

const FUNCTIONS: &[(&str, usize, usize)] = &[
    ("last", 0, 0),
    ("position", 0, 0),
    ("count", 1, 1),
    ("not", 1, 1),
    ("true", 0, 0),
    ("false", 0, 0),
    ("boolean", 1, 1),
    ("string", 0, 1),
    ("number", 0, 1),
    ("concat", 2, usize::MAX),
    ("contains", 2, 2),
    ("starts-with", 2, 2),
    ("substring-before", 2, 2),
    ("substring-after", 2, 2),
    ("normalize-space", 0, 1),
    ("string-length", 0, 1),
    ("name", 0, 1),
    ("local-name", 0, 1),
];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), XPathError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(XPathError::UnexpectedToken(format!("{token:?}"))),
            None => Err(XPathError::UnexpectedEnd),
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(name)) if name == keyword)
    }

    fn parse_or(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_and()?;
        while self.at_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_comparison()?;
        while self.at_keyword("and") {
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_unary()?;
        while let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, XPathError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Negate(Box::new(self.parse_unary()?)));
        }
        self.parse_union()
    }

    fn parse_union(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_path_expr()?;
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            let right = self.parse_path_expr()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn starts_primary(&self) -> bool {
        match self.peek() {
            Some(Token::Literal(_)) | Some(Token::Number(_)) | Some(Token::LParen) => true,
            Some(Token::Name(name)) => {
                self.peek_at(1) == Some(&Token::LParen)
                    && !matches!(name.as_str(), "text" | "node")
            }
            _ => false,
        }
    }

    fn parse_path_expr(&mut self) -> Result<Expr, XPathError> {
        if !self.starts_primary() {
            return self.parse_location_path();
        }
        let primary = self.parse_primary()?;
        let predicates = self.parse_predicates()?;
        let mut steps = Vec::new();
        self.parse_trailing_steps(&mut steps)?;
        if predicates.is_empty() && steps.is_empty() {
            return Ok(primary);
        }
        Ok(Expr::Filter {
            primary: Box::new(primary),
            predicates,
            steps,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, XPathError> {
        match self.next() {
            Some(Token::Literal(text)) => Ok(Expr::Literal(text)),
            Some(Token::Number(number)) => Ok(Expr::Number(number)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) => {
                self.expect(Token::LParen)?;
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    args.push(self.parse_or()?);
                    while self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                        args.push(self.parse_or()?);
                    }
                }
                self.expect(Token::RParen)?;
                let (_, min, max) = FUNCTIONS
                    .iter()
                    .find(|(known, _, _)| *known == name)
                    .ok_or_else(|| XPathError::UnknownFunction(name.clone()))?;
                if args.len() < *min || args.len() > *max {
                    return Err(XPathError::Arity(name));
                }
                Ok(Expr::Function(name, args))
            }
            Some(token) => Err(XPathError::UnexpectedToken(format!("{token:?}"))),
            None => Err(XPathError::UnexpectedEnd),
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, XPathError> {
        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            self.pos += 1;
            predicates.push(self.parse_or()?);
            self.expect(Token::RBracket)?;
        }
        Ok(predicates)
    }

    fn starts_step(&self) -> bool {
        match self.peek() {
            Some(Token::Dot)
            | Some(Token::DotDot)
            | Some(Token::At)
            | Some(Token::Star)
            | Some(Token::AxisName(_)) => true,
            Some(Token::Name(name)) => {
                self.peek_at(1) != Some(&Token::LParen) || matches!(name.as_str(), "text" | "node")
            }
            _ => false,
        }
    }

    fn parse_location_path(&mut self) -> Result<Expr, XPathError> {
        let mut steps = Vec::new();
        let absolute = match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                if self.starts_step() {
                    steps.push(self.parse_step()?);
                }
                true
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                steps.push(descendant_or_self());
                steps.push(self.parse_step()?);
                true
            }
            _ => {
                steps.push(self.parse_step()?);
                false
            }
        };
        self.parse_trailing_steps(&mut steps)?;
        Ok(Expr::Path { absolute, steps })
    }

    fn parse_trailing_steps(&mut self, steps: &mut Vec<Step>) -> Result<(), XPathError> {
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.pos += 1;
                    steps.push(self.parse_step()?);
                }
                Some(Token::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(descendant_or_self());
                    steps.push(self.parse_step()?);
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_step(&mut self) -> Result<Step, XPathError> {
        match self.peek() {
            Some(Token::Dot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::SelfAxis,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            Some(Token::DotDot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            _ => {}
        }
        let axis = match self.peek().cloned() {
            Some(Token::At) => {
                self.pos += 1;
                Axis::Attribute
            }
            Some(Token::AxisName(name)) => {
                self.pos += 1;
                Axis::from_name(&name)?
            }
            _ => Axis::Child,
        };
        let test = match self.next() {
            Some(Token::Star) => NodeTest::Wildcard,
            Some(Token::Name(name)) if self.peek() == Some(&Token::LParen) => {
                self.pos += 1;
                self.expect(Token::RParen)?;
                match name.as_str() {
                    "text" => NodeTest::Text,
                    "node" => NodeTest::Node,
                    _ => return Err(XPathError::UnexpectedToken(name)),
                }
            }
            Some(Token::Name(name)) => match name.strip_suffix(":*") {
                Some(prefix) => NodeTest::PrefixWildcard(prefix.to_string()),
                None => NodeTest::Name(QName::parse(&name)),
            },
            Some(token) => return Err(XPathError::UnexpectedToken(format!("{token:?}"))),
            None => return Err(XPathError::UnexpectedEnd),
        };
        let predicates = self.parse_predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }
}

fn descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Node,
        predicates: Vec::new(),
    }
}

/// A node addressed during evaluation: a tree node or the n-th attribute of
/// an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Item {
    Node(NodeId),
    Attr(NodeId, usize),
}

impl Item {
    fn order_key(self) -> (NodeId, usize) {
        match self {
            Item::Node(id) => (id, 0),
            Item::Attr(owner, index) => (owner, index + 1),
        }
    }
}

#[derive(Debug, Clone)]
enum Value {
    Nodes(Vec<Item>),
    Str(String),
    Num(f64),
    Bool(bool),
}

/// One result of [`XPath::select`].
#[derive(Debug, Clone, PartialEq)]
pub enum XPathMatch {
    Element(XmlElement),
    Attribute { name: String, value: String },
    Text(String),
}

impl XPathMatch {
    pub fn string_value(&self) -> String {
        match self {
            XPathMatch::Element(element) => element.string_value(),
            XPathMatch::Attribute { value, .. } => value.clone(),
            XPathMatch::Text(text) => text.clone(),
        }
    }
}

#[derive(Clone, Copy)]
struct Context<'a> {
    doc: &'a Document,
    namespaces: &'a NamespaceRegistry,
    item: Item,
    position: usize,
    size: usize,
}

/// A compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    pub fn compile(source: &str) -> Result<Self, XPathError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(XPathError::UnexpectedEnd);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(XPathError::UnexpectedToken(format!("{token:?}")));
        }
        Ok(XPath {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluates with `context` as context node; the result must be a
    /// node-set. Matches come back in document order.
    pub fn select(
        &self,
        context: &XmlElement,
        namespaces: &NamespaceRegistry,
    ) -> Result<Vec<XPathMatch>, XPathError> {
        self.select_at(context.document(), context.id(), namespaces)
    }

    /// Evaluates with the document node as context.
    pub fn select_from_root(
        &self,
        doc: &Arc<Document>,
        namespaces: &NamespaceRegistry,
    ) -> Result<Vec<XPathMatch>, XPathError> {
        self.select_at(doc, ROOT, namespaces)
    }

    fn select_at(
        &self,
        doc: &Arc<Document>,
        id: NodeId,
        namespaces: &NamespaceRegistry,
    ) -> Result<Vec<XPathMatch>, XPathError> {
        let ctx = Context {
            doc,
            namespaces,
            item: Item::Node(id),
            position: 1,
            size: 1,
        };
        match eval(&self.expr, &ctx)? {
            Value::Nodes(items) => Ok(items
                .into_iter()
                .filter_map(|item| to_match(doc, item))
                .collect()),
            _ => Err(XPathError::NotANodeSet),
        }
    }

    /// Evaluates as a boolean with `context` as context node.
    pub fn matches(
        &self,
        context: &XmlElement,
        namespaces: &NamespaceRegistry,
    ) -> Result<bool, XPathError> {
        let ctx = Context {
            doc: context.document(),
            namespaces,
            item: Item::Node(context.id()),
            position: 1,
            size: 1,
        };
        Ok(to_bool(&eval(&self.expr, &ctx)?))
    }
}

fn to_match(doc: &Arc<Document>, item: Item) -> Option<XPathMatch> {
    match item {
        Item::Node(id) => match doc.data(id) {
            NodeData::Element(_) => Some(XPathMatch::Element(XmlElement::new(doc.clone(), id))),
            NodeData::Text(text) => Some(XPathMatch::Text(text.clone())),
            NodeData::Root => None,
        },
        Item::Attr(owner, index) => {
            let attribute = doc.element(owner)?.attributes.get(index)?;
            Some(XPathMatch::Attribute {
                name: attribute.name.qualified(),
                value: attribute.value.clone(),
            })
        }
    }
}

fn eval(expr: &Expr, ctx: &Context<'_>) -> Result<Value, XPathError> {
    Ok(match expr {
        Expr::Literal(text) => Value::Str(text.clone()),
        Expr::Number(number) => Value::Num(*number),
        Expr::Negate(inner) => Value::Num(-to_number(ctx.doc, &eval(inner, ctx)?)),
        Expr::Or(left, right) => {
            Value::Bool(to_bool(&eval(left, ctx)?) || to_bool(&eval(right, ctx)?))
        }
        Expr::And(left, right) => {
            Value::Bool(to_bool(&eval(left, ctx)?) && to_bool(&eval(right, ctx)?))
        }
        Expr::Compare(op, left, right) => {
            let left = eval(left, ctx)?;
            let right = eval(right, ctx)?;
            Value::Bool(compare(ctx.doc, *op, &left, &right))
        }
        Expr::Union(left, right) => {
            let (Value::Nodes(mut items), Value::Nodes(more)) = (eval(left, ctx)?, eval(right, ctx)?)
            else {
                return Err(XPathError::NotANodeSet);
            };
            items.extend(more);
            Value::Nodes(document_order(items))
        }
        Expr::Path { absolute, steps } => {
            let start = if *absolute {
                Item::Node(ROOT)
            } else {
                ctx.item
            };
            Value::Nodes(eval_steps(steps, vec![start], ctx)?)
        }
        Expr::Filter {
            primary,
            predicates,
            steps,
        } => {
            let Value::Nodes(mut items) = eval(primary, ctx)? else {
                return Err(XPathError::NotANodeSet);
            };
            for predicate in predicates {
                items = apply_predicate(items, predicate, ctx)?;
            }
            Value::Nodes(eval_steps(steps, items, ctx)?)
        }
        Expr::Function(name, args) => call(name, args, ctx)?,
    })
}

fn eval_steps(
    steps: &[Step],
    start: Vec<Item>,
    ctx: &Context<'_>,
) -> Result<Vec<Item>, XPathError> {
    let mut current = start;
    for step in steps {
        let mut next = Vec::new();
        for &item in &current {
            let mut candidates: Vec<Item> = axis_items(ctx.doc, item, step.axis)
                .into_iter()
                .filter(|&candidate| node_test(ctx, candidate, step.axis, &step.test))
                .collect();
            for predicate in &step.predicates {
                candidates = apply_predicate(candidates, predicate, ctx)?;
            }
            next.extend(candidates);
        }
        current = document_order(next);
    }
    Ok(current)
}

fn document_order(mut items: Vec<Item>) -> Vec<Item> {
    items.sort_by_key(|item| item.order_key());
    items.dedup();
    items
}

fn apply_predicate(
    items: Vec<Item>,
    predicate: &Expr,
    ctx: &Context<'_>,
) -> Result<Vec<Item>, XPathError> {
    let size = items.len();
    let mut kept = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let inner = Context {
            item,
            position: index + 1,
            size,
            ..*ctx
        };
        let keep = match eval(predicate, &inner)? {
            Value::Num(n) => n == (index + 1) as f64,
            other => to_bool(&other),
        };
        if keep {
            kept.push(item);
        }
    }
    Ok(kept)
}

fn axis_items(doc: &Document, item: Item, axis: Axis) -> Vec<Item> {
    let id = match item {
        Item::Node(id) => id,
        Item::Attr(owner, _) => {
            return match axis {
                Axis::SelfAxis => vec![item],
                Axis::Parent => vec![Item::Node(owner)],
                Axis::Ancestor | Axis::AncestorOrSelf => {
                    let mut out = if axis == Axis::AncestorOrSelf {
                        vec![item]
                    } else {
                        Vec::new()
                    };
                    out.push(Item::Node(owner));
                    out.extend(ancestors(doc, owner).into_iter().map(Item::Node));
                    out
                }
                _ => Vec::new(),
            };
        }
    };
    match axis {
        Axis::Child => doc.children(id).iter().map(|&c| Item::Node(c)).collect(),
        Axis::Descendant => {
            let mut out = Vec::new();
            descendants(doc, id, &mut out);
            out.into_iter().map(Item::Node).collect()
        }
        Axis::DescendantOrSelf => {
            let mut out = vec![id];
            descendants(doc, id, &mut out);
            out.into_iter().map(Item::Node).collect()
        }
        Axis::Parent => doc.parent(id).map(Item::Node).into_iter().collect(),
        Axis::Ancestor => ancestors(doc, id).into_iter().map(Item::Node).collect(),
        Axis::AncestorOrSelf => std::iter::once(id)
            .chain(ancestors(doc, id))
            .map(Item::Node)
            .collect(),
        Axis::SelfAxis => vec![item],
        Axis::Attribute => doc
            .element(id)
            .map(|data| (0..data.attributes.len()).map(|i| Item::Attr(id, i)).collect())
            .unwrap_or_default(),
        Axis::FollowingSibling | Axis::PrecedingSibling => {
            let Some(parent) = doc.parent(id) else {
                return Vec::new();
            };
            let siblings = doc.children(parent);
            let index = siblings.iter().position(|&s| s == id).unwrap_or(0);
            if axis == Axis::FollowingSibling {
                siblings[index + 1..].iter().map(|&s| Item::Node(s)).collect()
            } else {
                siblings[..index].iter().rev().map(|&s| Item::Node(s)).collect()
            }
        }
    }
}

fn descendants(doc: &Document, id: NodeId, out: &mut Vec<NodeId>) {
    for &child in doc.children(id) {
        out.push(child);
        descendants(doc, child, out);
    }
}

/// Nearest first.
fn ancestors(doc: &Document, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut current = doc.parent(id);
    while let Some(parent) = current {
        out.push(parent);
        current = doc.parent(parent);
    }
    out
}

fn name_matches(
    namespaces: &NamespaceRegistry,
    test: &QName,
    name: &QName,
    namespace: Option<&str>,
) -> bool {
    if test.local != name.local {
        return false;
    }
    match &test.prefix {
        None => name.prefix.is_none(),
        Some(prefix) => match namespaces.resolve(prefix) {
            Some(uri) => namespace == Some(uri),
            None => name.prefix.as_deref() == Some(prefix.as_str()),
        },
    }
}

fn prefix_matches(
    namespaces: &NamespaceRegistry,
    prefix: &str,
    name: &QName,
    namespace: Option<&str>,
) -> bool {
    match namespaces.resolve(prefix) {
        Some(uri) => namespace == Some(uri),
        None => name.prefix.as_deref() == Some(prefix),
    }
}

fn node_test(ctx: &Context<'_>, item: Item, axis: Axis, test: &NodeTest) -> bool {
    match item {
        Item::Attr(owner, index) => {
            let Some(attribute) = ctx.doc.element(owner).and_then(|d| d.attributes.get(index))
            else {
                return false;
            };
            match test {
                NodeTest::Node => true,
                NodeTest::Wildcard => axis == Axis::Attribute || axis == Axis::SelfAxis,
                NodeTest::Name(name) => name_matches(
                    ctx.namespaces,
                    name,
                    &attribute.name,
                    attribute.namespace.as_deref(),
                ),
                NodeTest::PrefixWildcard(prefix) => prefix_matches(
                    ctx.namespaces,
                    prefix,
                    &attribute.name,
                    attribute.namespace.as_deref(),
                ),
                NodeTest::Text => false,
            }
        }
        Item::Node(id) => match (ctx.doc.data(id), test) {
            (_, NodeTest::Node) => true,
            (NodeData::Text(_), NodeTest::Text) => true,
            (NodeData::Element(_), NodeTest::Wildcard) => true,
            (NodeData::Element(data), NodeTest::Name(name)) => {
                name_matches(ctx.namespaces, name, &data.name, data.namespace.as_deref())
            }
            (NodeData::Element(data), NodeTest::PrefixWildcard(prefix)) => {
                prefix_matches(ctx.namespaces, prefix, &data.name, data.namespace.as_deref())
            }
            _ => false,
        },
    }
}

fn item_string(doc: &Document, item: Item) -> String {
    match item {
        Item::Node(id) => doc.string_value(id),
        Item::Attr(owner, index) => doc
            .element(owner)
            .and_then(|d| d.attributes.get(index))
            .map(|a| a.value.clone())
            .unwrap_or_default(),
    }
}

fn item_name(doc: &Document, item: Item, local: bool) -> String {
    let name = match item {
        Item::Node(id) => doc.element(id).map(|d| &d.name),
        Item::Attr(owner, index) => doc
            .element(owner)
            .and_then(|d| d.attributes.get(index))
            .map(|a| &a.name),
    };
    match name {
        Some(name) if local => name.local.clone(),
        Some(name) => name.qualified(),
        None => String::new(),
    }
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn to_string(doc: &Document, value: &Value) -> String {
    match value {
        Value::Nodes(items) => items
            .first()
            .map(|&item| item_string(doc, item))
            .unwrap_or_default(),
        Value::Str(text) => text.clone(),
        Value::Num(n) => number_to_string(*n),
        Value::Bool(b) => b.to_string(),
    }
}

fn str_to_number(text: &str) -> f64 {
    text.trim().parse::<f64>().unwrap_or(f64::NAN)
}

fn to_number(doc: &Document, value: &Value) -> f64 {
    match value {
        Value::Num(n) => *n,
        Value::Bool(b) => f64::from(u8::from(*b)),
        other => str_to_number(&to_string(doc, other)),
    }
}

fn to_bool(value: &Value) -> bool {
    match value {
        Value::Nodes(items) => !items.is_empty(),
        Value::Str(text) => !text.is_empty(),
        Value::Num(n) => *n != 0.0 && !n.is_nan(),
        Value::Bool(b) => *b,
    }
}

fn compare_atomic(doc: &Document, op: CmpOp, left: &Value, right: &Value) -> bool {
    match op {
        CmpOp::Eq | CmpOp::Neq => {
            let equal = if matches!(left, Value::Bool(_)) || matches!(right, Value::Bool(_)) {
                to_bool(left) == to_bool(right)
            } else if matches!(left, Value::Num(_)) || matches!(right, Value::Num(_)) {
                to_number(doc, left) == to_number(doc, right)
            } else {
                to_string(doc, left) == to_string(doc, right)
            };
            equal == (op == CmpOp::Eq)
        }
        _ => {
            let (l, r) = (to_number(doc, left), to_number(doc, right));
            match op {
                CmpOp::Lt => l < r,
                CmpOp::Le => l <= r,
                CmpOp::Gt => l > r,
                _ => l >= r,
            }
        }
    }
}

fn compare(doc: &Document, op: CmpOp, left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Nodes(a), Value::Nodes(b)) => a.iter().any(|&x| {
            let xs = Value::Str(item_string(doc, x));
            b.iter()
                .any(|&y| compare_atomic(doc, op, &xs, &Value::Str(item_string(doc, y))))
        }),
        (Value::Nodes(_), Value::Bool(_)) | (Value::Bool(_), Value::Nodes(_)) => {
            compare_atomic(doc, op, &Value::Bool(to_bool(left)), &Value::Bool(to_bool(right)))
        }
        (Value::Nodes(items), other) => items
            .iter()
            .any(|&x| compare_atomic(doc, op, &Value::Str(item_string(doc, x)), other)),
        (other, Value::Nodes(_)) => compare(doc, op.flip(), right, other),
        _ => compare_atomic(doc, op, left, right),
    }
}

fn call(name: &str, args: &[Expr], ctx: &Context<'_>) -> Result<Value, XPathError> {
    let doc = ctx.doc;
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval(arg, ctx)?);
    }
    let string_arg = |i: usize| -> String {
        values
            .get(i)
            .map(|v| to_string(doc, v))
            .unwrap_or_else(|| item_string(doc, ctx.item))
    };
    Ok(match name {
        "last" => Value::Num(ctx.size as f64),
        "position" => Value::Num(ctx.position as f64),
        "count" => match &values[0] {
            Value::Nodes(items) => Value::Num(items.len() as f64),
            _ => return Err(XPathError::NotANodeSet),
        },
        "not" => Value::Bool(!to_bool(&values[0])),
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "boolean" => Value::Bool(to_bool(&values[0])),
        "string" => Value::Str(string_arg(0)),
        "number" => Value::Num(match values.first() {
            Some(value) => to_number(doc, value),
            None => str_to_number(&item_string(doc, ctx.item)),
        }),
        "concat" => Value::Str(values.iter().map(|v| to_string(doc, v)).collect()),
        "contains" => Value::Bool(string_arg(0).contains(&string_arg(1))),
        "starts-with" => Value::Bool(string_arg(0).starts_with(&string_arg(1))),
        "substring-before" => {
            let (haystack, needle) = (string_arg(0), string_arg(1));
            Value::Str(
                haystack
                    .split_once(needle.as_str())
                    .map(|(before, _)| before.to_string())
                    .unwrap_or_default(),
            )
        }
        "substring-after" => {
            let (haystack, needle) = (string_arg(0), string_arg(1));
            Value::Str(
                haystack
                    .split_once(needle.as_str())
                    .map(|(_, after)| after.to_string())
                    .unwrap_or_default(),
            )
        }
        "normalize-space" => Value::Str(
            string_arg(0)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        ),
        "string-length" => Value::Num(string_arg(0).chars().count() as f64),
        "name" | "local-name" => {
            let target = match values.first() {
                Some(Value::Nodes(items)) => items.first().copied(),
                Some(_) => return Err(XPathError::NotANodeSet),
                None => Some(ctx.item),
            };
            Value::Str(
                target
                    .map(|item| item_name(doc, item, name == "local-name"))
                    .unwrap_or_default(),
            )
        }
        other => return Err(XPathError::UnknownFunction(other.to_string())),
    })
}

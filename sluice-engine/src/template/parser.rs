// Template Parser
// Builds the expression AST and the block tree (if/for) from template segments

use crate::parser::models::Value;
use crate::template::error::{TemplateError, TemplateErrorKind};
use crate::template::lexer::{split_segments, Lexer, Segment, Token};

use std::fmt;

/// Abstract Syntax Tree node for tag expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value: 'text', 42, true, none
    Literal(Value),

    /// List literal: [a, 'b', 3]
    List(Vec<Expr>),

    /// Root variable lookup
    Variable(String),

    /// Member access: obj.property
    Member { object: Box<Expr>, property: String },

    /// Index access: arr[0], obj['key']
    Index { object: Box<Expr>, index: Box<Expr> },

    /// Function call: current_date('%Y-%m-%d')
    Call { name: String, args: Vec<Expr> },

    /// Filter application: expr | name(args)
    Filter {
        expr: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },

    /// Unary operation: not expr, -expr
    Unary { op: UnaryOp, expr: Box<Expr> },

    /// Binary operation: a == b, a ~ b
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // String concatenation
    Concat,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,

    // Logical
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Concat => "~",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        };
        f.write_str(symbol)
    }
}

/// Recursive descent parser for tag expressions
pub struct ExprParser {
    tokens: Vec<Token>,
    position: usize,
}

impl ExprParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse expression from string
    pub fn parse_str(input: &str) -> Result<Expr, TemplateError> {
        let tokens = Lexer::new(input).tokenize()?;
        Self::new(tokens).parse()
    }

    /// Parse the token stream into a single expression
    pub fn parse(&mut self) -> Result<Expr, TemplateError> {
        let expr = self.parse_or()?;

        if !self.is_at_end() {
            return Err(self.error(&format!("unexpected token '{}'", self.peek())));
        }

        Ok(expr)
    }

    // Precedence (lowest to highest):
    // 1. or
    // 2. and
    // 3. not
    // 4. Comparison: == != < <= > >= in, not in
    // 5. Concatenation: ~
    // 6. Additive: + -
    // 7. Multiplicative: * / %
    // 8. Unary: -
    // 9. Filter: |
    // 10. Postfix: . [] ()

    fn parse_or(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_and()?;

        while self.check(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_not()?;

        while self.check(&Token::And) {
            self.advance();
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }

        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, TemplateError> {
        if self.check(&Token::Not) {
            self.advance();
            let expr = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_concat()?;

        loop {
            let op = match self.peek() {
                Token::Eq => BinaryOp::Eq,
                Token::Ne => BinaryOp::Ne,
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                Token::In => BinaryOp::In,
                Token::Not if self.peek_at(1) == &Token::In => {
                    self.advance();
                    BinaryOp::NotIn
                }
                _ => break,
            };
            self.advance();
            let right = self.parse_concat()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_concat(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_additive()?;

        while self.check(&Token::Tilde) {
            self.advance();
            let right = self.parse_additive()?;
            left = binary(BinaryOp::Concat, left, right);
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, TemplateError> {
        if self.check(&Token::Minus) {
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }

        self.parse_filtered()
    }

    fn parse_filtered(&mut self) -> Result<Expr, TemplateError> {
        let mut expr = self.parse_postfix()?;

        while self.check(&Token::Pipe) {
            self.advance();
            let Token::Identifier(name) = self.advance().clone() else {
                return Err(self.error("expected filter name after '|'"));
            };
            let args = if self.check(&Token::LParen) {
                self.parse_args()?
            } else {
                Vec::new()
            };
            expr = Expr::Filter {
                expr: Box::new(expr),
                name,
                args,
            };
        }

        Ok(expr)
    }

    fn parse_postfix(&mut self) -> Result<Expr, TemplateError> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.check(&Token::Dot) {
                self.advance();
                let property = match self.advance().clone() {
                    Token::Identifier(name) => name,
                    Token::Number(n) if n.fract() == 0.0 => {
                        expr = Expr::Index {
                            object: Box::new(expr),
                            index: Box::new(Expr::Literal(Value::Integer(n as i64))),
                        };
                        continue;
                    }
                    _ => return Err(self.error("expected property name after '.'")),
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.check(&Token::LBracket) {
                self.advance();
                let index = self.parse_or()?;
                self.expect(&Token::RBracket, "expected ']'")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, TemplateError> {
        match self.peek().clone() {
            Token::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Value::number(n)))
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::Identifier(name) => {
                self.advance();
                if self.check(&Token::LParen) {
                    let args = self.parse_args()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect(&Token::RParen, "expected ')'")?;
                Ok(expr)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(&Token::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if !self.check(&Token::Comma) {
                            break;
                        }
                        self.advance();
                    }
                }
                self.expect(&Token::RBracket, "expected ']'")?;
                Ok(Expr::List(items))
            }
            Token::Eof => Err(self.error("unexpected end of expression")),
            token => Err(self.error(&format!("unexpected token '{}'", token))),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, TemplateError> {
        self.expect(&Token::LParen, "expected '('")?;

        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if !self.check(&Token::Comma) {
                    break;
                }
                self.advance();
            }
        }

        self.expect(&Token::RParen, "expected ')'")?;
        Ok(args)
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        self.tokens.get(self.position + ahead).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> &Token {
        let token = self.tokens.get(self.position).unwrap_or(&Token::Eof);
        self.position += 1;
        token
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(token)
    }

    fn expect(&mut self, token: &Token, msg: &str) -> Result<(), TemplateError> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(msg))
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn error(&self, message: &str) -> TemplateError {
        TemplateError::new(message, TemplateErrorKind::Syntax)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

// =============================================================================
// Block Tree
// =============================================================================

/// A node of a parsed template
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    /// `{{ expr }}`; `source` is kept to re-emit undefined placeholders
    Output { expr: Expr, source: String },
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    For {
        target: String,
        iterable: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// A parsed template ready to render
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let segments = split_segments(source)?;
        let mut builder = BlockBuilder {
            segments,
            position: 0,
        };
        let (nodes, end) = builder.parse_block(&[])?;
        if let Some(tag) = end {
            return Err(unbalanced(&format!("unexpected '{{% {} %}}'", tag.keyword), tag.position));
        }
        Ok(Self { nodes })
    }
}

/// Block-terminating tag met while parsing a body
struct EndTag {
    keyword: String,
    rest: String,
    position: usize,
}

struct BlockBuilder {
    segments: Vec<Segment>,
    position: usize,
}

impl BlockBuilder {
    /// Parse nodes until one of `terminators` (or end of input when empty)
    fn parse_block(
        &mut self,
        terminators: &[&str],
    ) -> Result<(Vec<Node>, Option<EndTag>), TemplateError> {
        let mut nodes = Vec::new();

        while let Some(segment) = self.segments.get(self.position).cloned() {
            self.position += 1;
            match segment {
                Segment::Text(text) => nodes.push(Node::Text(text)),
                Segment::Output { source, position } => {
                    let expr =
                        ExprParser::parse_str(&source).map_err(|e| e.offset_by(position))?;
                    nodes.push(Node::Output { expr, source });
                }
                Segment::Tag { source, position } => {
                    let (keyword, rest) = split_keyword(&source);
                    match keyword {
                        "if" => nodes.push(self.parse_if(rest, position)?),
                        "for" => nodes.push(self.parse_for(rest, position)?),
                        k if terminators.contains(&k) => {
                            return Ok((
                                nodes,
                                Some(EndTag {
                                    keyword: k.to_string(),
                                    rest: rest.to_string(),
                                    position,
                                }),
                            ));
                        }
                        "elif" | "else" | "endif" | "endfor" => {
                            return Err(unbalanced(
                                &format!("unexpected '{{% {} %}}'", keyword),
                                position,
                            ));
                        }
                        other => {
                            return Err(TemplateError::new(
                                format!("unknown tag '{}'", other),
                                TemplateErrorKind::Syntax,
                            )
                            .at(position));
                        }
                    }
                }
            }
        }

        if terminators.is_empty() {
            Ok((nodes, None))
        } else {
            Err(TemplateError::new(
                format!("missing '{{% {} %}}'", terminators[terminators.len() - 1]),
                TemplateErrorKind::UnbalancedBlock,
            ))
        }
    }

    fn parse_if(&mut self, condition: &str, position: usize) -> Result<Node, TemplateError> {
        let mut branches = Vec::new();
        let mut otherwise = Vec::new();
        let mut condition = parse_tag_expr(condition, position)?;

        loop {
            let (body, end) = self.parse_block(&["elif", "else", "endif"])?;
            let Some(end) = end else {
                return Err(unbalanced("missing '{% endif %}'", position));
            };
            branches.push((condition, body));

            match end.keyword.as_str() {
                "elif" => {
                    condition = parse_tag_expr(&end.rest, end.position)?;
                }
                "else" => {
                    let (body, end) = self.parse_block(&["endif"])?;
                    if end.is_none() {
                        return Err(unbalanced("missing '{% endif %}'", position));
                    }
                    otherwise = body;
                    break;
                }
                _ => break,
            }
        }

        Ok(Node::If {
            branches,
            otherwise,
        })
    }

    fn parse_for(&mut self, header: &str, position: usize) -> Result<Node, TemplateError> {
        let tokens = Lexer::new(header)
            .tokenize()
            .map_err(|e| e.offset_by(position))?;
        let (target, iterable_tokens) = match tokens.as_slice() {
            [Token::Identifier(target), Token::In, rest @ ..] => (target.clone(), rest.to_vec()),
            _ => {
                return Err(TemplateError::new(
                    "expected '{% for <name> in <expression> %}'",
                    TemplateErrorKind::Syntax,
                )
                .at(position))
            }
        };
        let iterable = ExprParser::new(iterable_tokens)
            .parse()
            .map_err(|e| e.at(position))?;

        let (body, end) = self.parse_block(&["else", "endfor"])?;
        let Some(end) = end else {
            return Err(unbalanced("missing '{% endfor %}'", position));
        };
        let otherwise = if end.keyword == "else" {
            let (body, end) = self.parse_block(&["endfor"])?;
            if end.is_none() {
                return Err(unbalanced("missing '{% endfor %}'", position));
            }
            body
        } else {
            Vec::new()
        };

        Ok(Node::For {
            target,
            iterable,
            body,
            otherwise,
        })
    }
}

fn split_keyword(source: &str) -> (&str, &str) {
    match source.find(char::is_whitespace) {
        Some(index) => (&source[..index], source[index..].trim()),
        None => (source, ""),
    }
}

fn parse_tag_expr(source: &str, position: usize) -> Result<Expr, TemplateError> {
    if source.is_empty() {
        return Err(
            TemplateError::new("missing condition", TemplateErrorKind::Syntax).at(position),
        );
    }
    ExprParser::parse_str(source).map_err(|e| e.at(position))
}

fn unbalanced(message: &str, position: usize) -> TemplateError {
    TemplateError::new(message, TemplateErrorKind::UnbalancedBlock).at(position)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literals() {
        assert_eq!(ExprParser::parse_str("none").unwrap(), Expr::Literal(Value::Null));
        assert_eq!(
            ExprParser::parse_str("'us'").unwrap(),
            Expr::Literal(Value::String("us".to_string()))
        );
        assert_eq!(
            ExprParser::parse_str("42").unwrap(),
            Expr::Literal(Value::Number(42.0))
        );
    }

    #[test]
    fn test_parse_member_and_index() {
        let expr = ExprParser::parse_str("config.regions[0]").unwrap();
        let Expr::Index { object, .. } = expr else {
            panic!("expected index access");
        };
        assert!(matches!(*object, Expr::Member { ref property, .. } if property == "regions"));
    }

    #[test]
    fn test_parse_filter_chain() {
        let expr = ExprParser::parse_str("name | lower | replace('-', '_')").unwrap();
        let Expr::Filter { name, args, expr } = expr else {
            panic!("expected filter");
        };
        assert_eq!(name, "replace");
        assert_eq!(args.len(), 2);
        assert!(matches!(*expr, Expr::Filter { ref name, .. } if name == "lower"));
    }

    #[test]
    fn test_parse_not_in() {
        let expr = ExprParser::parse_str("region not in ['us', 'eu']").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::NotIn, .. }));
    }

    #[test]
    fn test_parse_operator_precedence() {
        // a or b and c => a or (b and c)
        let expr = ExprParser::parse_str("a or b and c").unwrap();
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Or);
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::And, .. }));
    }

    #[test]
    fn test_parse_if_elif_else() {
        let template =
            Template::parse("{% if a %}1{% elif b %}2{% else %}3{% endif %}").unwrap();
        let [Node::If { branches, otherwise }] = template.nodes.as_slice() else {
            panic!("expected a single if block");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(otherwise, &vec![Node::Text("3".to_string())]);
    }

    #[test]
    fn test_parse_for_with_else() {
        let template =
            Template::parse("{% for r in regions %}{{ r }}{% else %}none{% endfor %}").unwrap();
        let [Node::For { target, body, otherwise, .. }] = template.nodes.as_slice() else {
            panic!("expected a single for block");
        };
        assert_eq!(target, "r");
        assert_eq!(body.len(), 1);
        assert_eq!(otherwise.len(), 1);
    }

    #[test]
    fn test_missing_endif_is_error() {
        let err = Template::parse("{% if a %}x").unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::UnbalancedBlock);
    }

    #[test]
    fn test_stray_endfor_is_error() {
        let err = Template::parse("x{% endfor %}").unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::UnbalancedBlock);
        assert_eq!(err.position, Some(1));
    }

    #[test]
    fn test_unknown_tag_is_error() {
        let err = Template::parse("{% macro m() %}").unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::Syntax);
    }
}

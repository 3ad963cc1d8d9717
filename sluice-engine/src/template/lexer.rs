// Template Lexer
// Splits template source into text and tag segments, and tokenizes tag expressions

use crate::template::error::{TemplateError, TemplateErrorKind};

use std::fmt;

/// A raw piece of template source
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text copied to the output
    Text(String),
    /// `{{ expr }}` with the trimmed expression source
    Output { source: String, position: usize },
    /// `{% statement %}` with the trimmed statement source
    Tag { source: String, position: usize },
}

/// Split template source into segments. Comments (`{# #}`) are dropped and
/// `-` whitespace markers trim the neighbouring text.
pub fn split_segments(input: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = input;
    let mut offset = 0;
    let mut trim_next_text = false;

    loop {
        let Some(open) = find_open(rest) else {
            push_text(&mut segments, rest, trim_next_text);
            break;
        };

        let (kind, start) = open;
        let mut text = &rest[..start];
        let body_start = start + 2;
        let trim_left = rest[body_start..].starts_with('-');
        if trim_left {
            text = text.trim_end();
        }
        push_text(&mut segments, text, trim_next_text);

        let close = match kind {
            '{' => "}}",
            '%' => "%}",
            _ => "#}",
        };
        let Some(close_rel) = rest[body_start..].find(close) else {
            return Err(TemplateError::new(
                format!("unclosed '{{{}' tag", kind),
                TemplateErrorKind::Syntax,
            )
            .at(offset + start));
        };
        let body_end = body_start + close_rel;
        let mut body = &rest[body_start..body_end];
        if trim_left {
            body = &body[1..];
        }
        trim_next_text = body.ends_with('-');
        if trim_next_text {
            body = &body[..body.len() - 1];
        }

        let position = offset + start;
        match kind {
            '{' => segments.push(Segment::Output {
                source: body.trim().to_string(),
                position,
            }),
            '%' => segments.push(Segment::Tag {
                source: body.trim().to_string(),
                position,
            }),
            _ => {}
        }

        let consumed = body_end + close.len();
        offset += consumed;
        rest = &rest[consumed..];
    }

    Ok(segments)
}

fn find_open(input: &str) -> Option<(char, usize)> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' {
            match bytes[i + 1] {
                b'{' => return Some(('{', i)),
                b'%' => return Some(('%', i)),
                b'#' => return Some(('#', i)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn push_text(segments: &mut Vec<Segment>, text: &str, trim_start: bool) {
    let text = if trim_start { text.trim_start() } else { text };
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text(previous)) = segments.last_mut() {
        previous.push_str(text);
    } else {
        segments.push(Segment::Text(text.to_string()));
    }
}

/// Token types for tag expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Null,
    True,
    False,
    Number(f64),
    String(String),

    // Identifiers and keywords
    Identifier(String),
    And,
    Or,
    Not,
    In,

    // Operators
    Plus,    // +
    Minus,   // -
    Star,    // *
    Slash,   // /
    Percent, // %
    Tilde,   // ~
    Pipe,    // |
    Eq,      // ==
    Ne,      // !=
    Lt,      // <
    Le,      // <=
    Gt,      // >
    Ge,      // >=
    Dot,     // .
    Comma,   // ,

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Null => write!(f, "none"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Number(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "'{}'", s),
            Token::Identifier(s) => write!(f, "{}", s),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::In => write!(f, "in"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Tilde => write!(f, "~"),
            Token::Pipe => write!(f, "|"),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Eof => write!(f, "end of expression"),
        }
    }
}

/// Lexer for tag expressions
pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            position: 0,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> Result<Vec<Token>, TemplateError> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }

        Ok(tokens)
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Result<Token, TemplateError> {
        self.skip_whitespace();

        let Some(&(pos, ch)) = self.chars.peek() else {
            return Ok(Token::Eof);
        };

        self.position = pos;

        let single = |token: Token, lexer: &mut Self| {
            lexer.advance();
            Ok(token)
        };

        match ch {
            '+' => single(Token::Plus, self),
            '-' => single(Token::Minus, self),
            '*' => single(Token::Star, self),
            '/' => single(Token::Slash, self),
            '%' => single(Token::Percent, self),
            '~' => single(Token::Tilde, self),
            '|' => single(Token::Pipe, self),
            '.' => single(Token::Dot, self),
            ',' => single(Token::Comma, self),
            '(' => single(Token::LParen, self),
            ')' => single(Token::RParen, self),
            '[' => single(Token::LBracket, self),
            ']' => single(Token::RBracket, self),

            '=' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(Token::Eq)
                } else {
                    Err(self.error("expected '==' operator", pos))
                }
            }
            '!' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(Token::Ne)
                } else {
                    Err(self.error("expected '!=' operator", pos))
                }
            }
            '<' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(Token::Le)
                } else {
                    Ok(Token::Lt)
                }
            }
            '>' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(Token::Ge)
                } else {
                    Ok(Token::Gt)
                }
            }

            '\'' | '"' => self.read_string(ch),

            '0'..='9' => self.read_number(),

            c if c.is_alphabetic() || c == '_' => self.read_identifier(),

            _ => Err(self.error(&format!("unexpected character: '{}'", ch), pos)),
        }
    }

    fn error(&self, message: &str, position: usize) -> TemplateError {
        TemplateError::new(message, TemplateErrorKind::Syntax).at(position)
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, TemplateError> {
        let start = self.position;
        self.advance(); // opening quote

        let mut value = String::new();

        loop {
            match self.advance() {
                Some((_, '\\')) => match self.advance() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, other)) => value.push(other),
                    None => return Err(self.error("unterminated string", start)),
                },
                Some((_, ch)) if ch == quote => break,
                Some((_, ch)) => value.push(ch),
                None => return Err(self.error("unterminated string", start)),
            }
        }

        Ok(Token::String(value))
    }

    fn read_number(&mut self) -> Result<Token, TemplateError> {
        let start = self.position;
        let mut num_str = String::new();

        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_ascii_digit() {
                num_str.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        // Decimal part only when '.' is followed by a digit (keeps `items.0` style access out)
        if self.peek_char() == Some('.') {
            let mut peek_iter = self.chars.clone();
            peek_iter.next();
            if let Some(&(_, next_ch)) = peek_iter.peek() {
                if next_ch.is_ascii_digit() {
                    num_str.push('.');
                    self.advance();

                    while let Some(&(_, ch)) = self.chars.peek() {
                        if ch.is_ascii_digit() {
                            num_str.push(ch);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
            }
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(&format!("invalid number: {}", num_str), start))
    }

    fn read_identifier(&mut self) -> Result<Token, TemplateError> {
        let mut ident = String::new();

        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let token = match ident.as_str() {
            "none" | "None" | "null" => Token::Null,
            "true" | "True" => Token::True,
            "false" | "False" => Token::False,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "in" => Token::In,
            _ => Token::Identifier(ident),
        };

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_text_and_output() {
        let segments = split_segments("select * from {{ this }} where x = 1").unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::Text("select * from ".to_string()));
        assert_eq!(
            segments[1],
            Segment::Output {
                source: "this".to_string(),
                position: 14
            }
        );
        assert_eq!(segments[2], Segment::Text(" where x = 1".to_string()));
    }

    #[test]
    fn test_split_drops_comments() {
        let segments = split_segments("a{# note #}b").unwrap();
        assert_eq!(segments, vec![Segment::Text("ab".to_string())]);
    }

    #[test]
    fn test_whitespace_markers_trim_text() {
        let segments = split_segments("a  {%- if x -%}  b").unwrap();
        assert_eq!(segments[0], Segment::Text("a".to_string()));
        assert!(matches!(&segments[1], Segment::Tag { source, .. } if source == "if x"));
        assert_eq!(segments[2], Segment::Text("b".to_string()));
    }

    #[test]
    fn test_unclosed_tag_is_syntax_error() {
        let err = split_segments("select {{ foo").unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::Syntax);
        assert_eq!(err.position, Some(7));
    }

    #[test]
    fn test_tokenize_filter_expression() {
        let tokens = Lexer::new("regions | join(', ')").tokenize().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Identifier("regions".to_string()),
                Token::Pipe,
                Token::Identifier("join".to_string()),
                Token::LParen,
                Token::String(", ".to_string()),
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_keywords_and_numbers() {
        let tokens = Lexer::new("not x in [1, 2.5] and true").tokenize().unwrap();
        assert_eq!(tokens[0], Token::Not);
        assert_eq!(tokens[2], Token::In);
        assert_eq!(tokens[4], Token::Number(1.0));
        assert_eq!(tokens[6], Token::Number(2.5));
        assert_eq!(tokens[8], Token::And);
        assert_eq!(tokens[9], Token::True);
    }
}

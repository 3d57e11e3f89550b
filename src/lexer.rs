//! Hand-rolled tokenizer. No regex or parser-generator crate: the token grammar is
//! small enough that a single `chars().peekable()` scan reads cleanly, matching the
//! teacher's own tokenizer style.

use crate::ast::SourceSpan;
use crate::errors::{CompileError, ErrorKind, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    IntegerLiteral(String),
    DoubleLiteral(String),
    StringLiteral(String),
    // keywords
    Program,
    Const,
    Type,
    Var,
    Function,
    Procedure,
    Begin,
    End,
    If,
    Then,
    Else,
    While,
    Do,
    Repeat,
    Until,
    For,
    To,
    Downto,
    Array,
    Of,
    Record,
    // operators & punctuation
    Assign,    // :=
    Equal,     // =
    NotEqual,  // <>
    LessEqual, // <=
    GreaterEqual, // >=
    Less,
    Greater,
    Plus,
    Minus,
    Star,
    Slash,
    Caret, // ^ pointer deref / type
    At,    // @
    Comma,
    Semicolon,
    Colon,
    Dot,
    DotDot, // ..
    LParen,
    RParen,
    LBracket,
    RBracket,
    KwAnd,
    KwOr,
    KwXor,
    KwDiv,
    KwMod,
    KwNot,
    KwShl,
    KwShr,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: SourceSpan,
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    trace: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, trace: bool) -> Self {
        Lexer {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
            trace,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            if self.trace {
                tracing::trace!(?tok.kind, line = tok.span.line, column = tok.span.column, "token");
            }
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn span(&self) -> SourceSpan {
        SourceSpan::new(self.line, self.column)
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('{') => {
                    let start = self.span();
                    self.advance();
                    loop {
                        match self.advance() {
                            Some('}') => break,
                            Some(_) => continue,
                            None => {
                                return Err(CompileError::at(
                                    ErrorKind::Lexical,
                                    "unterminated comment",
                                    start,
                                ))
                            }
                        }
                    }
                }
                Some('(') => {
                    // Only a comment opener if followed by `*`; otherwise let the
                    // main scan handle it as LParen.
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    if lookahead.peek() == Some(&'*') {
                        let start = self.span();
                        self.advance();
                        self.advance();
                        loop {
                            match self.advance() {
                                Some('*') if self.peek() == Some(')') => {
                                    self.advance();
                                    break;
                                }
                                Some(_) => continue,
                                None => {
                                    return Err(CompileError::at(
                                        ErrorKind::Lexical,
                                        "unterminated comment",
                                        start,
                                    ))
                                }
                            }
                        }
                    } else {
                        return Ok(());
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia()?;
        let span = self.span();
        let Some(c) = self.peek() else {
            return Ok(Token { kind: TokenKind::Eof, span });
        };

        if c.is_ascii_digit() {
            return self.lex_number(span);
        }
        if c == '\'' {
            return self.lex_string(span);
        }
        if c.is_alphabetic() || c == '_' {
            return self.lex_identifier_or_keyword(span);
        }

        self.advance();
        let kind = match c {
            ':' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::Assign
                } else {
                    TokenKind::Colon
                }
            }
            '=' => TokenKind::Equal,
            '<' => match self.peek() {
                Some('>') => {
                    self.advance();
                    TokenKind::NotEqual
                }
                Some('=') => {
                    self.advance();
                    TokenKind::LessEqual
                }
                _ => TokenKind::Less,
            },
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '^' => TokenKind::Caret,
            '@' => TokenKind::At,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '.' => {
                if self.peek() == Some('.') {
                    self.advance();
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            other => {
                return Err(CompileError::at(
                    ErrorKind::Lexical,
                    format!("unrecognized character `{other}`"),
                    span,
                ))
            }
        };
        Ok(Token { kind, span })
    }

    fn lex_number(&mut self, span: SourceSpan) -> Result<Token> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let mut is_double = false;
        if self.peek() == Some('.') {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            if matches!(lookahead.peek(), Some(d) if d.is_ascii_digit()) {
                is_double = true;
                text.push('.');
                self.advance();
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            is_double = true;
            text.push('e');
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                text.push(self.advance().unwrap());
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let kind = if is_double {
            TokenKind::DoubleLiteral(text)
        } else {
            TokenKind::IntegerLiteral(text)
        };
        Ok(Token { kind, span })
    }

    fn lex_string(&mut self, span: SourceSpan) -> Result<Token> {
        self.advance(); // opening quote
        let mut text = String::from("'");
        loop {
            match self.advance() {
                Some('\'') => {
                    if self.peek() == Some('\'') {
                        text.push('\'');
                        text.push('\'');
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(c) => text.push(c),
                None => {
                    return Err(CompileError::at(ErrorKind::Lexical, "unterminated string literal", span))
                }
            }
        }
        Ok(Token { kind: TokenKind::StringLiteral(text), span })
    }

    fn lex_identifier_or_keyword(&mut self, span: SourceSpan) -> Result<Token> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = match text.to_ascii_lowercase().as_str() {
            "program" => TokenKind::Program,
            "const" => TokenKind::Const,
            "type" => TokenKind::Type,
            "var" => TokenKind::Var,
            "function" => TokenKind::Function,
            "procedure" => TokenKind::Procedure,
            "begin" => TokenKind::Begin,
            "end" => TokenKind::End,
            "if" => TokenKind::If,
            "then" => TokenKind::Then,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "do" => TokenKind::Do,
            "repeat" => TokenKind::Repeat,
            "until" => TokenKind::Until,
            "for" => TokenKind::For,
            "to" => TokenKind::To,
            "downto" => TokenKind::Downto,
            "array" => TokenKind::Array,
            "of" => TokenKind::Of,
            "record" => TokenKind::Record,
            "and" => TokenKind::KwAnd,
            "or" => TokenKind::KwOr,
            "xor" => TokenKind::KwXor,
            "div" => TokenKind::KwDiv,
            "mod" => TokenKind::KwMod,
            "not" => TokenKind::KwNot,
            "shl" => TokenKind::KwShl,
            "shr" => TokenKind::KwShr,
            _ => TokenKind::Identifier(text),
        };
        Ok(Token { kind, span })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, false)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_keywords_case_insensitively() {
        assert_eq!(kinds("BEGIN end"), vec![TokenKind::Begin, TokenKind::End, TokenKind::Eof]);
    }

    #[test]
    fn classifies_numeric_literals() {
        assert_eq!(
            kinds("42 3.14 1e10"),
            vec![
                TokenKind::IntegerLiteral("42".into()),
                TokenKind::DoubleLiteral("3.14".into()),
                TokenKind::DoubleLiteral("1e10".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn handles_doubled_quote_escape_in_strings() {
        assert_eq!(
            kinds("'it''s'"),
            vec![TokenKind::StringLiteral("'it''s'".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn distinguishes_assign_from_colon() {
        assert_eq!(kinds(":= :"), vec![TokenKind::Assign, TokenKind::Colon, TokenKind::Eof]);
    }

    #[test]
    fn skips_both_comment_styles() {
        assert_eq!(
            kinds("{ a comment } begin (* another *) end"),
            vec![TokenKind::Begin, TokenKind::End, TokenKind::Eof]
        );
    }

    #[test]
    fn unterminated_string_is_a_lexical_error() {
        let err = Lexer::new("'abc", false).tokenize().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lexical);
    }

    #[test]
    fn dotdot_is_distinct_from_two_dots() {
        assert_eq!(kinds("1..3"), vec![
            TokenKind::IntegerLiteral("1".into()),
            TokenKind::DotDot,
            TokenKind::IntegerLiteral("3".into()),
            TokenKind::Eof,
        ]);
    }
}

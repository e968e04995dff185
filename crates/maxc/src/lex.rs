//! The lexer: UTF-8 source text to a token vector.
//!
//! Numbers keep their int/float distinction here (a `.` in the lexeme makes
//! a float), strings and chars handle the usual escapes, `//` and `/* */`
//! comments are skipped, and back-quoted operator literals (`` `+` ``) carry
//! the operator code used by overload definitions. The output always ends
//! with a single `End` token.

use crate::{
    errors::Diagnostics,
    operators::BinOp,
    token::{Loc, Span, Token, TokenKind},
};

/// Lexes `source`, reporting lexical errors into `diags`.
///
/// Errors do not stop the scan; the offending character is skipped so parsing
/// can still run over the rest of the input and report more.
pub fn lex(source: &str, diags: &mut Diagnostics) -> Vec<Token> {
    Lexer::new(source).run(diags)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn run(mut self, diags: &mut Diagnostics) -> Vec<Token> {
        let mut tokens = Vec::new();

        loop {
            self.skip_trivia(diags);
            let start = self.loc();
            let Some(c) = self.peek() else {
                tokens.push(Token::new(TokenKind::End, Span::new(start, start)));
                return tokens;
            };

            let kind = if c.is_ascii_digit() {
                self.number()
            } else if c == '"' {
                self.string(diags)
            } else if c == '\'' {
                self.char_lit(diags)
            } else if c == '`' {
                self.backquote_op(diags)
            } else if c == '_' || c.is_alphabetic() {
                self.ident_or_keyword()
            } else {
                match self.symbol() {
                    Some(kind) => kind,
                    None => {
                        diags.report(format!("unexpected character `{c}`"), Span::new(start, start));
                        self.bump();
                        continue;
                    }
                }
            };

            let end = self.prev_loc();
            tokens.push(Token::new(kind, Span::new(start, end)));
        }
    }

    fn loc(&self) -> Loc {
        Loc::new(self.line, self.col)
    }

    /// Location of the last consumed character.
    fn prev_loc(&self) -> Loc {
        Loc::new(self.line, self.col.saturating_sub(1).max(1))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self, diags: &mut Diagnostics) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek2() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek2() == Some('*') => {
                    let start = self.loc();
                    self.bump();
                    self.bump();
                    let mut closed = false;
                    while let Some(c) = self.bump() {
                        if c == '*' && self.eat('/') {
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        diags.report("unterminated block comment", Span::new(start, self.loc()));
                    }
                }
                _ => return,
            }
        }
    }

    fn number(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        // a single `.` followed by a digit makes this a float literal
        if self.peek() == Some('.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            return TokenKind::Float(text.parse().unwrap_or(0.0));
        }
        TokenKind::Int(text.parse().unwrap_or(0))
    }

    fn escape(&mut self, diags: &mut Diagnostics) -> char {
        match self.bump() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('0') => '\0',
            Some('\\') => '\\',
            Some('"') => '"',
            Some('\'') => '\'',
            Some(other) => {
                diags.report(
                    format!("unknown escape sequence `\\{other}`"),
                    Span::new(self.prev_loc(), self.prev_loc()),
                );
                other
            }
            None => '\0',
        }
    }

    fn string(&mut self, diags: &mut Diagnostics) -> TokenKind {
        let start = self.loc();
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('"') => return TokenKind::Str(text),
                Some('\\') => text.push(self.escape(diags)),
                Some(c) => text.push(c),
                None => {
                    diags.report("unterminated string literal", Span::new(start, self.loc()));
                    return TokenKind::Str(text);
                }
            }
        }
    }

    fn char_lit(&mut self, diags: &mut Diagnostics) -> TokenKind {
        let start = self.loc();
        self.bump(); // opening quote
        let c = match self.bump() {
            Some('\\') => self.escape(diags),
            Some('\'') => {
                diags.report("empty char literal", Span::new(start, self.loc()));
                return TokenKind::Char('\0');
            }
            Some(c) => c,
            None => {
                diags.report("unterminated char literal", Span::new(start, self.loc()));
                return TokenKind::Char('\0');
            }
        };
        if !self.eat('\'') {
            diags.report("unterminated char literal", Span::new(start, self.loc()));
        }
        TokenKind::Char(c)
    }

    /// `` `+` `` style operator literal used by operator overload definitions.
    fn backquote_op(&mut self, diags: &mut Diagnostics) -> TokenKind {
        let start = self.loc();
        self.bump(); // opening backquote
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('`') => break,
                Some(c) => text.push(c),
                None => {
                    diags.report("unterminated operator literal", Span::new(start, self.loc()));
                    break;
                }
            }
        }
        let op = match text.as_str() {
            "+" => Some(BinOp::Add),
            "-" => Some(BinOp::Sub),
            "*" => Some(BinOp::Mul),
            "/" => Some(BinOp::Div),
            "%" => Some(BinOp::Mod),
            "==" => Some(BinOp::Eq),
            "!=" => Some(BinOp::NotEq),
            "<" => Some(BinOp::Lt),
            "<=" => Some(BinOp::Lte),
            ">" => Some(BinOp::Gt),
            ">=" => Some(BinOp::Gte),
            "<<" => Some(BinOp::Shl),
            ">>" => Some(BinOp::Shr),
            _ => None,
        };
        match op {
            Some(op) => TokenKind::BackquoteOp(op),
            None => {
                diags.report(
                    format!("`{text}` cannot be overloaded"),
                    Span::new(start, self.prev_loc()),
                );
                TokenKind::BackquoteOp(BinOp::Add)
            }
        }
    }

    fn ident_or_keyword(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        match text.as_str() {
            "let" => TokenKind::Let,
            "const" => TokenKind::Const,
            "fn" => TokenKind::Fn,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "while" => TokenKind::While,
            "return" => TokenKind::Return,
            "break" => TokenKind::Break,
            "object" => TokenKind::Object,
            "import" => TokenKind::Import,
            "typedef" => TokenKind::Typedef,
            "new" => TokenKind::New,
            "in" => TokenKind::In,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "and" => TokenKind::KAnd,
            "or" => TokenKind::KOr,
            "FAILURE" => TokenKind::Failure,
            "int" => TokenKind::TInt,
            "uint" => TokenKind::TUint,
            "float" => TokenKind::TFloat,
            "bool" => TokenKind::TBool,
            "string" => TokenKind::TString,
            "char" => TokenKind::TChar,
            "none" => TokenKind::TNone,
            _ => TokenKind::Ident(text),
        }
    }

    fn symbol(&mut self) -> Option<TokenKind> {
        let c = self.peek()?;
        let kind = match c {
            '+' => {
                self.bump();
                if self.eat('+') {
                    TokenKind::Inc
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                self.bump();
                if self.eat('-') {
                    TokenKind::Dec
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                self.bump();
                TokenKind::Asterisk
            }
            '/' => {
                self.bump();
                TokenKind::Slash
            }
            '%' => {
                self.bump();
                TokenKind::Percent
            }
            '=' => {
                self.bump();
                if self.eat('=') {
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                self.bump();
                if self.eat('=') {
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                self.bump();
                if self.eat('=') {
                    TokenKind::Lte
                } else if self.eat('<') {
                    TokenKind::Shl
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                self.bump();
                if self.eat('=') {
                    TokenKind::Gte
                } else if self.eat('>') {
                    TokenKind::Shr
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if self.peek2() != Some('&') {
                    return None;
                }
                self.bump();
                self.bump();
                TokenKind::LogAnd
            }
            '|' => {
                if self.peek2() != Some('|') {
                    return None;
                }
                self.bump();
                self.bump();
                TokenKind::LogOr
            }
            '?' => {
                self.bump();
                TokenKind::Question
            }
            '(' => {
                self.bump();
                TokenKind::Lparen
            }
            ')' => {
                self.bump();
                TokenKind::Rparen
            }
            '{' => {
                self.bump();
                TokenKind::Lbrace
            }
            '}' => {
                self.bump();
                TokenKind::Rbrace
            }
            '[' => {
                self.bump();
                TokenKind::Lbracket
            }
            ']' => {
                self.bump();
                TokenKind::Rbracket
            }
            ',' => {
                self.bump();
                TokenKind::Comma
            }
            ':' => {
                self.bump();
                TokenKind::Colon
            }
            ';' => {
                self.bump();
                TokenKind::Semicolon
            }
            '.' => {
                self.bump();
                TokenKind::Dot
            }
            _ => return None,
        };
        Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut diags = Diagnostics::new("test.mxc");
        let tokens = lex(source, &mut diags);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn numbers_split_on_dot() {
        assert_eq!(
            kinds("1 23 4.5"),
            vec![
                TokenKind::Int(1),
                TokenKind::Int(23),
                TokenKind::Float(4.5),
                TokenKind::End
            ]
        );
    }

    #[test]
    fn member_access_is_not_a_float() {
        assert_eq!(
            kinds("xs.len"),
            vec![
                TokenKind::Ident("xs".to_owned()),
                TokenKind::Dot,
                TokenKind::Ident("len".to_owned()),
                TokenKind::End
            ]
        );
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(
            kinds(r#""a\nb""#),
            vec![TokenKind::Str("a\nb".to_owned()), TokenKind::End]
        );
    }

    #[test]
    fn comments_are_trivia() {
        assert_eq!(
            kinds("1 // line\n/* block */ 2"),
            vec![TokenKind::Int(1), TokenKind::Int(2), TokenKind::End]
        );
    }

    #[test]
    fn backquoted_operator_carries_the_op() {
        assert_eq!(
            kinds("`+`"),
            vec![TokenKind::BackquoteOp(BinOp::Add), TokenKind::End]
        );
    }

    #[test]
    fn compound_symbols() {
        assert_eq!(
            kinds("== != <= >= << >> && || ++ --"),
            vec![
                TokenKind::Eq,
                TokenKind::NotEq,
                TokenKind::Lte,
                TokenKind::Gte,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::LogAnd,
                TokenKind::LogOr,
                TokenKind::Inc,
                TokenKind::Dec,
                TokenKind::End
            ]
        );
    }

    #[test]
    fn spans_are_one_based() {
        let mut diags = Diagnostics::new("test.mxc");
        let tokens = lex("let x", &mut diags);
        assert_eq!(tokens[0].span.start, Loc::new(1, 1));
        assert_eq!(tokens[0].span.end, Loc::new(1, 3));
        assert_eq!(tokens[1].span.start, Loc::new(1, 5));
    }
}

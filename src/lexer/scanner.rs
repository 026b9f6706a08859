// Carbon Scanner (Lexer)
// Converts source code into tokens

use crate::builtins::{BuiltinFunction, BuiltinType};
use crate::error::{CarbonError, CarbonResult, Span};
use crate::lexer::token::{Token, TokenKind};

/// Scanner that tokenizes Carbon source code
pub struct Scanner {
    source: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_column: usize,
    file: String,
}

impl Scanner {
    pub fn new(source: &str, file: impl Into<String>) -> Self {
        Self {
            source: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_column: 1,
            file: file.into(),
        }
    }

    /// Scan all tokens from the source
    pub fn scan_tokens(mut self) -> CarbonResult<Vec<Token>> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_column = self.column;
            self.scan_token()?;
        }

        self.tokens.push(Token::new(
            TokenKind::Eof,
            "",
            Span::single(self.line, self.column, self.current),
        ));

        Ok(self.tokens)
    }

    fn scan_token(&mut self) -> CarbonResult<()> {
        let c = self.advance();

        match c {
            '(' => self.add_token(TokenKind::LeftParen),
            ')' => self.add_token(TokenKind::RightParen),
            '{' => self.add_token(TokenKind::LeftBrace),
            '}' => self.add_token(TokenKind::RightBrace),
            '[' => self.add_token(TokenKind::LeftBracket),
            ']' => self.add_token(TokenKind::RightBracket),
            ',' => self.add_token(TokenKind::Comma),
            ';' => self.add_token(TokenKind::Semicolon),
            ':' => self.add_token(TokenKind::Colon),
            '~' => self.add_token(TokenKind::Tilde),
            '.' => {
                if self.peek().is_ascii_digit() {
                    self.number()?;
                } else {
                    self.add_token(TokenKind::Dot);
                }
            }

            '+' => self.add_with_assign(TokenKind::Plus, TokenKind::PlusEqual),
            '-' => self.add_with_assign(TokenKind::Minus, TokenKind::MinusEqual),
            '*' => self.add_with_assign(TokenKind::Star, TokenKind::StarEqual),
            '%' => self.add_with_assign(TokenKind::Percent, TokenKind::PercentEqual),
            '^' => self.add_with_assign(TokenKind::Caret, TokenKind::CaretEqual),
            '!' => self.add_with_assign(TokenKind::Bang, TokenKind::BangEqual),
            '=' => self.add_with_assign(TokenKind::Equal, TokenKind::EqualEqual),
            '/' => {
                if self.match_char('/') {
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else if self.match_char('*') {
                    self.block_comment()?;
                } else {
                    self.add_with_assign(TokenKind::Slash, TokenKind::SlashEqual);
                }
            }
            '<' => {
                if self.match_char('<') {
                    self.add_with_assign(TokenKind::LessLess, TokenKind::LessLessEqual);
                } else {
                    self.add_with_assign(TokenKind::Less, TokenKind::LessEqual);
                }
            }
            '>' => {
                if self.match_char('>') {
                    self.add_with_assign(TokenKind::GreaterGreater, TokenKind::GreaterGreaterEqual);
                } else {
                    self.add_with_assign(TokenKind::Greater, TokenKind::GreaterEqual);
                }
            }
            '&' => {
                if self.match_char('&') {
                    self.add_token(TokenKind::And);
                } else {
                    self.add_with_assign(TokenKind::Ampersand, TokenKind::AmpersandEqual);
                }
            }
            '|' => {
                if self.match_char('|') {
                    self.add_token(TokenKind::Or);
                } else {
                    self.add_with_assign(TokenKind::Pipe, TokenKind::PipeEqual);
                }
            }

            // Whitespace
            ' ' | '\r' | '\t' => {}
            '\n' => {
                self.line += 1;
                self.column = 1;
            }

            '"' | '\'' => self.string(c)?,

            c if c.is_ascii_digit() => self.number()?,
            c if c.is_alphabetic() || c == '_' => self.identifier(),

            _ => {
                return Err(self
                    .error(&format!("unexpected character '{}'.", c))
                    .with_help("Remove this character or check for typos"));
            }
        }

        Ok(())
    }

    fn add_with_assign(&mut self, plain: TokenKind, with_equal: TokenKind) {
        let kind = if self.match_char('=') {
            with_equal
        } else {
            plain
        };
        self.add_token(kind);
    }

    fn string(&mut self, quote_char: char) -> CarbonResult<()> {
        let start_line = self.line;
        let start_col = self.start_column;
        let mut value = String::new();

        while self.peek() != quote_char && !self.is_at_end() {
            let c = self.advance();
            match c {
                '\\' => {
                    if self.is_at_end() {
                        break;
                    }
                    let escaped = self.advance();
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        '\\' => '\\',
                        '"' => '"',
                        '\'' => '\'',
                        '\n' => {
                            self.line += 1;
                            self.column = 1;
                            continue;
                        }
                        other => {
                            return Err(self
                                .error(&format!("invalid escape sequence '\\{}'.", other))
                                .with_help("Valid escapes are \\n \\t \\r \\0 \\\\ \\\" \\'"));
                        }
                    });
                }
                '\n' => {
                    self.line += 1;
                    self.column = 1;
                    value.push('\n');
                }
                other => value.push(other),
            }
        }

        if self.is_at_end() {
            return Err(CarbonError::syntax_error(
                "unexpected EOF while parsing string.",
                Span::from_positions(start_line, start_col, self.line, self.column),
                &self.file,
            )
            .with_help(format!("Add a closing {} to terminate the string", quote_char)));
        }

        // closing quote
        self.advance();
        let lexeme: String = self.source[self.start..self.current].iter().collect();
        let span = Span::from_positions(start_line, start_col, self.line, self.column - 1);
        self.tokens
            .push(Token::new(TokenKind::String(value), lexeme, span));
        Ok(())
    }

    fn number(&mut self) -> CarbonResult<()> {
        let first = self.source[self.start];

        if first == '0' && (self.peek() == 'x' || self.peek() == 'X') {
            self.advance();
            return self.radix_number(16, "0x");
        }
        if first == '0' && (self.peek() == 'b' || self.peek() == 'B') {
            self.advance();
            return self.radix_number(2, "0b");
        }

        let mut is_float = first == '.';
        while self.peek().is_ascii_digit() || self.peek() == '_' {
            self.advance();
        }
        if !is_float && self.peek() == '.' && self.peek_next().is_ascii_digit() {
            is_float = true;
            self.advance();
        }
        while self.peek().is_ascii_digit() || self.peek() == '_' {
            self.advance();
        }
        if self.peek() == 'e' || self.peek() == 'E' {
            is_float = true;
            self.advance();
            if self.peek() == '+' || self.peek() == '-' {
                self.advance();
            }
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let lexeme: String = self.source[self.start..self.current]
            .iter()
            .filter(|c| **c != '_')
            .collect();

        let kind = if is_float {
            TokenKind::Float(
                lexeme
                    .parse()
                    .map_err(|_| self.error(&format!("invalid numeric value \"{}\".", lexeme)))?,
            )
        } else {
            TokenKind::Int(
                lexeme
                    .parse()
                    .map_err(|_| self.error(&format!("invalid numeric value \"{}\".", lexeme)))?,
            )
        };
        self.add_token(kind);
        Ok(())
    }

    fn radix_number(&mut self, radix: u32, prefix: &str) -> CarbonResult<()> {
        while self.peek().is_digit(radix) || self.peek() == '_' {
            self.advance();
        }
        let digits: String = self.source[self.start + 2..self.current]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if digits.is_empty() {
            return Err(self.error(&format!("expected digits after \"{}\".", prefix)));
        }
        let value = i64::from_str_radix(&digits, radix).map_err(|_| {
            self.error(&format!("invalid numeric value \"{}{}\".", prefix, digits))
        })?;
        self.add_token(TokenKind::Int(value));
        Ok(())
    }

    fn identifier(&mut self) {
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }

        let text: String = self.source[self.start..self.current].iter().collect();
        let kind = self.keyword_or_identifier(&text);
        self.add_token(kind);
    }

    fn keyword_or_identifier(&self, text: &str) -> TokenKind {
        if let Some(keyword) = TokenKind::keyword(text) {
            keyword
        } else if let Some(func) = BuiltinFunction::from_name(text) {
            TokenKind::BuiltinFunc(func)
        } else if let Some(ty) = BuiltinType::from_name(text) {
            TokenKind::BuiltinType(ty)
        } else {
            TokenKind::Identifier(text.to_string())
        }
    }

    fn block_comment(&mut self) -> CarbonResult<()> {
        let start_line = self.line;
        let start_col = self.start_column;

        while !self.is_at_end() {
            if self.peek() == '*' && self.peek_next() == '/' {
                self.advance();
                self.advance();
                return Ok(());
            }
            if self.peek() == '\n' {
                self.advance();
                self.line += 1;
                self.column = 1;
            } else {
                self.advance();
            }
        }

        Err(CarbonError::syntax_error(
            "unexpected EOF while parsing comment.",
            Span::from_positions(start_line, start_col, self.line, self.column),
            &self.file,
        )
        .with_help("Add '*/' to close the block comment"))
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        self.column += 1;
        c
    }

    fn peek(&self) -> char {
        self.source.get(self.current).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.source.get(self.current + 1).copied().unwrap_or('\0')
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() != expected || self.is_at_end() {
            return false;
        }
        self.advance();
        true
    }

    fn add_token(&mut self, kind: TokenKind) {
        let lexeme: String = self.source[self.start..self.current].iter().collect();
        let span = Span::from_positions(self.line, self.start_column, self.line, self.column - 1);
        self.tokens.push(Token::new(kind, lexeme, span));
    }

    fn error(&self, message: &str) -> CarbonError {
        CarbonError::syntax_error(
            message,
            Span::from_positions(self.line, self.start_column, self.line, self.column),
            &self.file,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source, "test.cb")
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_keywords_and_builtins() {
        let tokens = kinds("func main() { println(int(\"1\")); }");
        assert_eq!(tokens[0], TokenKind::Func);
        assert_eq!(tokens[1], TokenKind::Identifier("main".to_string()));
        assert_eq!(tokens[5], TokenKind::BuiltinFunc(BuiltinFunction::Println));
        assert_eq!(tokens[7], TokenKind::BuiltinType(BuiltinType::Int));
    }

    #[test]
    fn test_numbers() {
        let tokens = kinds("42 3.5 0xff 0b101 1_000 .5");
        assert_eq!(tokens[0], TokenKind::Int(42));
        assert_eq!(tokens[1], TokenKind::Float(3.5));
        assert_eq!(tokens[2], TokenKind::Int(255));
        assert_eq!(tokens[3], TokenKind::Int(5));
        assert_eq!(tokens[4], TokenKind::Int(1000));
        assert_eq!(tokens[5], TokenKind::Float(0.5));
    }

    #[test]
    fn test_compound_operators() {
        let tokens = kinds("a <<= 1; b >>= 2; c &= d && e;");
        assert!(tokens.contains(&TokenKind::LessLessEqual));
        assert!(tokens.contains(&TokenKind::GreaterGreaterEqual));
        assert!(tokens.contains(&TokenKind::AmpersandEqual));
        assert!(tokens.contains(&TokenKind::And));
    }

    #[test]
    fn test_word_operators() {
        let tokens = kinds("a and not b or c");
        assert_eq!(tokens[1], TokenKind::And);
        assert_eq!(tokens[2], TokenKind::Bang);
        assert_eq!(tokens[4], TokenKind::Or);
    }

    #[test]
    fn test_string_escapes() {
        let tokens = kinds(r#""a\tb\n" 'c'"#);
        assert_eq!(tokens[0], TokenKind::String("a\tb\n".to_string()));
        assert_eq!(tokens[1], TokenKind::String("c".to_string()));
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = kinds("// line\n/* block\n comment */ var");
        assert_eq!(tokens, vec![TokenKind::Var, TokenKind::Eof]);
    }

    #[test]
    fn test_unterminated_string() {
        let err = Scanner::new("\"abc", "test.cb").scan_tokens().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::SyntaxError);
    }

    #[test]
    fn test_token_lines() {
        let tokens = Scanner::new("var a;\nvar b;", "test.cb").scan_tokens().unwrap();
        assert_eq!(tokens[0].span.start.line, 1);
        assert_eq!(tokens[3].span.start.line, 2);
    }
}

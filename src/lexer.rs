use crate::token::{Token, TokenKind};

#[derive(Debug)]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for LexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for LexerError {}

/// Hand-written scanner for Cinder source text.
///
/// Produces the token vocabulary the parser depends on: dedicated kinds for
/// the composite operators (`<` `>` `<=` `>=` `<<` `>>` `->` `->*` `.*` `::`
/// `...`), keyword classes (type specifiers, storage classes, qualifiers,
/// access specifiers), and generic `Operator` tokens for the rest.
pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.source.get(self.pos + 2).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn error(&self, message: impl Into<String>, line: usize, col: usize) -> LexerError {
        LexerError {
            message: message.into(),
            line,
            col,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch == ' ' || ch == '\t' || ch == '\r' || ch == '\n' {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Tokenizes the whole input. The result always ends with an `Eof` token.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();
            if self.current().is_none() {
                break;
            }
            tokens.push(self.next_token()?);
        }

        tokens.push(Token::new(TokenKind::Eof, "", self.line, self.col));
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, LexerError> {
        let ch = self.current().unwrap();

        if ch == '#' {
            return Ok(self.read_preprocessor());
        }
        if ch.is_ascii_digit() {
            return Ok(self.read_number());
        }
        if ch.is_ascii_alphabetic() || ch == '_' {
            return Ok(self.read_identifier());
        }
        if ch == '"' {
            return self.read_string();
        }
        if ch == '\'' {
            return self.read_character();
        }
        if ch == '/' {
            match self.peek() {
                Some('/') => return Ok(self.read_line_comment()),
                Some('*') => return self.read_block_comment(),
                _ => {}
            }
        }
        if matches!(ch, '<' | '>' | '-' | ':' | '.') || "+*/=!&|^%~?".contains(ch) {
            return self.read_operator();
        }
        self.read_punctuation()
    }

    fn read_preprocessor(&mut self) -> Token {
        let (line, col) = (self.line, self.col);
        let mut text = String::new();
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            text.push(ch);
            self.advance();
        }
        Token::new(TokenKind::Preprocessor, text, line, col)
    }

    fn read_number(&mut self) -> Token {
        let (line, col) = (self.line, self.col);
        let mut text = String::new();
        let mut has_dot = false;
        let mut has_exponent = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot && !has_exponent {
                has_dot = true;
                text.push(ch);
                self.advance();
            } else if (ch == 'e' || ch == 'E') && !has_exponent {
                has_exponent = true;
                text.push(ch);
                self.advance();
                if let Some(sign @ ('+' | '-')) = self.current() {
                    text.push(sign);
                    self.advance();
                }
            } else {
                break;
            }
        }

        // Type suffixes: f, l, u, plus ul/ll/ull combinations.
        if let Some(suffix) = self.current() {
            if matches!(suffix.to_ascii_lowercase(), 'f' | 'l' | 'u') {
                text.push(suffix);
                self.advance();
                if let Some(next) = self.current() {
                    if next.to_ascii_lowercase() == 'l' {
                        text.push(next);
                        self.advance();
                        if let Some(next2) = self.current() {
                            if next2.to_ascii_lowercase() == 'l' {
                                text.push(next2);
                                self.advance();
                            }
                        }
                    }
                }
            }
        }

        Token::new(TokenKind::Number, text, line, col)
    }

    fn read_identifier(&mut self) -> Token {
        let (line, col) = (self.line, self.col);
        let mut text = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        let kind = categorize_word(&text);
        Token::new(kind, text, line, col)
    }

    fn read_string(&mut self) -> Result<Token, LexerError> {
        let (start_line, start_col) = (self.line, self.col);
        self.advance(); // opening quote

        let mut text = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Ok(Token::new(TokenKind::Str, text, start_line, start_col));
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('r') => text.push('\r'),
                        Some('\\') => text.push('\\'),
                        Some('"') => text.push('"'),
                        Some('0') => text.push('\0'),
                        Some(ch) => {
                            return Err(self.error(
                                format!("unknown escape sequence: \\{}", ch),
                                self.line,
                                self.col,
                            ));
                        }
                        None => {
                            return Err(self.error(
                                "unexpected EOF in escape sequence",
                                self.line,
                                self.col,
                            ));
                        }
                    }
                    self.advance();
                }
                Some(ch) => {
                    text.push(ch);
                    self.advance();
                }
                None => {
                    return Err(self.error(
                        "unterminated string literal",
                        start_line,
                        start_col,
                    ));
                }
            }
        }
    }

    fn read_character(&mut self) -> Result<Token, LexerError> {
        let (start_line, start_col) = (self.line, self.col);
        self.advance(); // opening quote

        let mut text = String::new();
        let mut escaped = false;
        loop {
            match self.current() {
                Some('\'') if !escaped => {
                    self.advance();
                    return Ok(Token::new(TokenKind::Character, text, start_line, start_col));
                }
                Some(ch) => {
                    escaped = ch == '\\' && !escaped;
                    text.push(ch);
                    self.advance();
                }
                None => {
                    return Err(self.error(
                        "unterminated character literal",
                        start_line,
                        start_col,
                    ));
                }
            }
        }
    }

    fn read_line_comment(&mut self) -> Token {
        let (line, col) = (self.line, self.col);
        self.advance(); // '/'
        self.advance(); // '/'
        let mut text = String::new();
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            text.push(ch);
            self.advance();
        }
        Token::new(TokenKind::Comment, text, line, col)
    }

    fn read_block_comment(&mut self) -> Result<Token, LexerError> {
        let (start_line, start_col) = (self.line, self.col);
        self.advance(); // '/'
        self.advance(); // '*'
        let mut text = String::new();
        loop {
            match self.current() {
                Some('*') if self.peek() == Some('/') => {
                    self.advance();
                    self.advance();
                    return Ok(Token::new(TokenKind::Comment, text, start_line, start_col));
                }
                Some(ch) => {
                    text.push(ch);
                    self.advance();
                }
                None => {
                    return Err(self.error(
                        "unterminated block comment",
                        start_line,
                        start_col,
                    ));
                }
            }
        }
    }

    fn read_operator(&mut self) -> Result<Token, LexerError> {
        let (line, col) = (self.line, self.col);
        let ch = self.current().unwrap();

        match ch {
            '<' => {
                if self.peek() == Some('<') && self.peek2() == Some('=') {
                    return Ok(self.take(3, TokenKind::Operator, line, col));
                }
                if self.peek() == Some('<') {
                    return Ok(self.take(2, TokenKind::LeftShift, line, col));
                }
                if self.peek() == Some('=') {
                    return Ok(self.take(2, TokenKind::LessEqual, line, col));
                }
                Ok(self.take(1, TokenKind::Less, line, col))
            }
            '>' => {
                if self.peek() == Some('>') && self.peek2() == Some('=') {
                    return Ok(self.take(3, TokenKind::Operator, line, col));
                }
                if self.peek() == Some('>') {
                    return Ok(self.take(2, TokenKind::RightShift, line, col));
                }
                if self.peek() == Some('=') {
                    return Ok(self.take(2, TokenKind::GreaterEqual, line, col));
                }
                Ok(self.take(1, TokenKind::Greater, line, col))
            }
            '-' => {
                if self.peek() == Some('>') && self.peek2() == Some('*') {
                    return Ok(self.take(3, TokenKind::ArrowStar, line, col));
                }
                if self.peek() == Some('>') {
                    return Ok(self.take(2, TokenKind::Arrow, line, col));
                }
                if self.peek() == Some('-') || self.peek() == Some('=') {
                    return Ok(self.take(2, TokenKind::Operator, line, col));
                }
                Ok(self.take(1, TokenKind::Operator, line, col))
            }
            ':' => {
                if self.peek() == Some(':') {
                    return Ok(self.take(2, TokenKind::ScopeResolution, line, col));
                }
                Ok(self.take(1, TokenKind::Colon, line, col))
            }
            '.' => {
                if self.peek() == Some('.') && self.peek2() == Some('.') {
                    return Ok(self.take(3, TokenKind::Ellipsis, line, col));
                }
                if self.peek() == Some('*') {
                    return Ok(self.take(2, TokenKind::DotStar, line, col));
                }
                Ok(self.take(1, TokenKind::Dot, line, col))
            }
            _ => {
                // Remaining two-char operators: ++ += *= /= %= == != && || &= |= ^=
                if let Some(next) = self.peek() {
                    let two: String = [ch, next].iter().collect();
                    if matches!(
                        two.as_str(),
                        "++" | "+=" | "*=" | "/=" | "%=" | "==" | "!=" | "&&" | "||" | "&="
                            | "|=" | "^="
                    ) {
                        return Ok(self.take(2, TokenKind::Operator, line, col));
                    }
                }
                Ok(self.take(1, TokenKind::Operator, line, col))
            }
        }
    }

    fn read_punctuation(&mut self) -> Result<Token, LexerError> {
        let (line, col) = (self.line, self.col);
        let ch = self.current().unwrap();
        let kind = match ch {
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            _ => {
                return Err(self.error(format!("unknown symbol: {}", ch), line, col));
            }
        };
        Ok(self.take(1, kind, line, col))
    }

    fn take(&mut self, count: usize, kind: TokenKind, line: usize, col: usize) -> Token {
        let mut text = String::new();
        for _ in 0..count {
            if let Some(ch) = self.advance() {
                text.push(ch);
            }
        }
        Token::new(kind, text, line, col)
    }
}

/// Maps an identifier-shaped word to its keyword class, or `Identifier`.
fn categorize_word(word: &str) -> TokenKind {
    match word {
        "public" | "private" | "protected" => TokenKind::AccessSpecifier,

        "void" | "char" | "short" | "int" | "long" | "float" | "double" | "signed"
        | "unsigned" | "class" | "struct" | "union" | "enum" | "typedef" => {
            TokenKind::TypeSpecifier
        }

        "static" | "extern" | "auto" | "register" => TokenKind::StorageClass,

        "const" | "volatile" => TokenKind::TypeQualifier,

        // Control flow
        "if" | "else" | "while" | "for" | "do" | "switch" | "case" | "default" | "break"
        | "continue" | "return" | "goto"
        // Exceptions
        | "try" | "catch" | "throw"
        // OOP
        | "this" | "virtual" | "explicit" | "friend" | "inline" | "operator" | "template"
        | "typename" | "mutable"
        // Namespaces
        | "namespace" | "using"
        // Casts
        | "dynamic_cast" | "static_cast" | "const_cast" | "reinterpret_cast" | "typeid"
        // Memory
        | "new" | "delete" | "sizeof"
        // Other
        | "asm" | "export" | "wchar_t" | "bool" | "true" | "false" => TokenKind::Keyword,

        _ => TokenKind::Identifier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Token> {
        Lexer::new(src).tokenize().expect("lex failed")
    }

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_declaration() {
        let toks = lex("int x = 10;");
        assert_eq!(toks[0].kind, TokenKind::TypeSpecifier);
        assert_eq!(toks[0].value, "int");
        assert_eq!(toks[1].kind, TokenKind::Identifier);
        assert_eq!(toks[2].kind, TokenKind::Operator);
        assert_eq!(toks[2].value, "=");
        assert_eq!(toks[3].kind, TokenKind::Number);
        assert_eq!(toks[3].value, "10");
        assert_eq!(toks[4].kind, TokenKind::Semicolon);
        assert_eq!(toks[5].kind, TokenKind::Eof);
    }

    #[test]
    fn test_composite_operators() {
        assert_eq!(
            kinds("< > <= >= << >> -> ->* .* :: ..."),
            vec![
                TokenKind::Less,
                TokenKind::Greater,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::LeftShift,
                TokenKind::RightShift,
                TokenKind::Arrow,
                TokenKind::ArrowStar,
                TokenKind::DotStar,
                TokenKind::ScopeResolution,
                TokenKind::Ellipsis,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_multi_char_operators_keep_text() {
        let toks = lex("++ -- += == != && || <<=");
        let values: Vec<&str> = toks[..8].iter().map(|t| t.value.as_str()).collect();
        assert_eq!(values, vec!["++", "--", "+=", "==", "!=", "&&", "||", "<<="]);
        assert!(toks[..8].iter().all(|t| t.kind == TokenKind::Operator));
    }

    #[test]
    fn test_keyword_classes() {
        assert_eq!(kinds("static")[0], TokenKind::StorageClass);
        assert_eq!(kinds("const")[0], TokenKind::TypeQualifier);
        assert_eq!(kinds("public")[0], TokenKind::AccessSpecifier);
        assert_eq!(kinds("double")[0], TokenKind::TypeSpecifier);
        assert_eq!(kinds("while")[0], TokenKind::Keyword);
        assert_eq!(kinds("new")[0], TokenKind::Keyword);
    }

    #[test]
    fn test_float_literal_with_suffix() {
        let toks = lex("1.5f 2e10 3.25 7ull");
        assert_eq!(toks[0].value, "1.5f");
        assert_eq!(toks[1].value, "2e10");
        assert_eq!(toks[2].value, "3.25");
        assert_eq!(toks[3].value, "7ull");
        assert!(toks[..4].iter().all(|t| t.kind == TokenKind::Number));
    }

    #[test]
    fn test_string_escapes_decoded() {
        let toks = lex(r#""hello\nworld""#);
        assert_eq!(toks[0].kind, TokenKind::Str);
        assert_eq!(toks[0].value, "hello\nworld");
    }

    #[test]
    fn test_character_literal_kept_verbatim() {
        let toks = lex(r"'a' '\n'");
        assert_eq!(toks[0].kind, TokenKind::Character);
        assert_eq!(toks[0].value, "a");
        assert_eq!(toks[1].value, "\\n");
    }

    #[test]
    fn test_comments_are_tokens() {
        let toks = lex("int x; // note\n/* block */ int y;");
        let comments: Vec<&Token> =
            toks.iter().filter(|t| t.kind == TokenKind::Comment).collect();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].value, " note");
        assert_eq!(comments[1].value, " block ");
    }

    #[test]
    fn test_preprocessor_line() {
        let toks = lex("#include <iostream>\nint main;");
        assert_eq!(toks[0].kind, TokenKind::Preprocessor);
        assert_eq!(toks[0].value, "#include <iostream>");
        assert_eq!(toks[1].kind, TokenKind::TypeSpecifier);
    }

    #[test]
    fn test_line_and_column_tracking() {
        let toks = lex("int\n  x;");
        assert_eq!((toks[0].line, toks[0].col), (1, 1));
        assert_eq!((toks[1].line, toks[1].col), (2, 3));
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let err = Lexer::new("\"oops").tokenize().unwrap_err();
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn test_unknown_symbol_is_error() {
        let err = Lexer::new("int x @").tokenize().unwrap_err();
        assert!(err.message.contains("unknown symbol"));
    }
}

use crate::ast::{LiteralKind, Node, NodeKind, Param, Program};
use crate::parser_error::ParserError;
use crate::token::{Token, TokenKind};

/// Recursive-descent parser for the Cinder language.
///
/// Consumes the lexer's token stream and produces a `Program`. The grammar is
/// a strict subset of a curly-braced, class-based language: declarations
/// (variables, functions, classes, structs, namespaces, templates), the usual
/// control-flow statements, and a C-style expression precedence ladder.
///
/// Type syntax is the tricky part: `parse_type` recognizes storage classes,
/// qualifiers, qualified names (`A::B`), bracketed template-argument runs and
/// pointer/reference markers, and a non-consuming twin (`parse_type_lookahead`)
/// lets the dispatcher peek past a complex type to decide between a function
/// and a variable declaration.
///
/// The first violation aborts parsing with a `ParserError`; there is no
/// recovery.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Set while parsing a class body, for constructor/destructor detection.
    current_class: String,
}

impl Parser {
    /// Creates a parser from lexer output. Comment tokens are filtered out up
    /// front; spans stay intact because they come from the original tokens.
    pub fn new(tokens: Vec<Token>) -> Self {
        let tokens: Vec<Token> = tokens
            .into_iter()
            .filter(|t| t.kind != TokenKind::Comment)
            .collect();
        Parser {
            tokens,
            pos: 0,
            current_class: String::new(),
        }
    }

    // ------------------------------------------------------------------
    // Token cursor
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        let idx = self.pos.min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn peek_at(&self, idx: usize) -> Option<&Token> {
        self.tokens.get(idx)
    }

    fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) {
        if !self.at_end() {
            self.pos += 1;
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        !self.at_end() && self.peek().kind == kind
    }

    fn check_value(&self, kind: TokenKind, value: &str) -> bool {
        self.check(kind) && self.peek().value == value
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, msg: &str) -> Result<(), ParserError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(msg))
        }
    }

    /// Builds a diagnostic at the current token, with a window of the
    /// surrounding tokens as context.
    fn error(&self, message: &str) -> ParserError {
        let tok = self.peek();
        let start = self.pos.saturating_sub(3);
        let end = (self.pos + 3).min(self.tokens.len());
        let context = self.tokens[start..end]
            .iter()
            .map(|t| t.value.clone())
            .collect();
        ParserError {
            message: message.to_string(),
            line: tok.line,
            col: tok.col,
            context,
        }
    }

    // ------------------------------------------------------------------
    // Type recognition
    // ------------------------------------------------------------------

    /// Consumes a (possibly complex) type: storage classes, qualifiers, a
    /// base type or qualified user-defined name with template arguments, then
    /// pointer/reference markers. Returns the collected type tokens.
    fn parse_type(&mut self) -> Vec<String> {
        let mut type_tokens = Vec::new();

        while self.check(TokenKind::StorageClass) {
            type_tokens.push(self.peek().value.clone());
            self.advance();
        }

        while self.check(TokenKind::TypeQualifier) {
            type_tokens.push(self.peek().value.clone());
            self.advance();
        }

        if self.check(TokenKind::TypeSpecifier) {
            type_tokens.push(self.peek().value.clone());
            self.advance();
        } else if self.check(TokenKind::Identifier)
            || self.check_value(TokenKind::Keyword, "typename")
            || self.check_value(TokenKind::Keyword, "class")
        {
            let mut fullname = self.peek().value.clone();
            self.advance();

            // A leading 'typename'/'class' attaches the next identifier as
            // the actual type name.
            if fullname == "typename" || fullname == "class" {
                if self.check(TokenKind::Identifier) {
                    fullname.push(' ');
                    fullname.push_str(&self.peek().value);
                    self.advance();
                }
            }

            loop {
                if self.check(TokenKind::ScopeResolution) {
                    self.advance();
                    if self.check(TokenKind::Identifier) {
                        fullname.push_str("::");
                        fullname.push_str(&self.peek().value);
                        self.advance();
                        continue;
                    }
                    break;
                }

                if self.check(TokenKind::Less) {
                    // Collect the template-argument text until the matching
                    // '>' with numeric depth tracking.
                    let mut templ = String::from("<");
                    self.advance();
                    let mut depth = 1;
                    while !self.at_end() && depth > 0 {
                        if self.check(TokenKind::Less) {
                            templ.push('<');
                            self.advance();
                            depth += 1;
                            continue;
                        }
                        if self.check(TokenKind::Greater) {
                            templ.push('>');
                            self.advance();
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            continue;
                        }
                        templ.push_str(&self.peek().value);
                        self.advance();
                    }
                    fullname.push_str(&templ);
                    continue;
                }

                break;
            }

            type_tokens.push(fullname);
        }

        while self.check_value(TokenKind::Operator, "*")
            || self.check_value(TokenKind::Operator, "&")
        {
            type_tokens.push(self.peek().value.clone());
            self.advance();

            // qualifier after pointer: int* const
            while self.check(TokenKind::TypeQualifier) {
                type_tokens.push(self.peek().value.clone());
                self.advance();
            }
        }

        type_tokens
    }

    /// Non-consuming variant of `parse_type`: performs the same recognition
    /// on a temporary index so the dispatcher can peek past a complex type.
    fn parse_type_lookahead(&self, pos: &mut usize) -> Vec<String> {
        let mut type_tokens = Vec::new();
        let mut p = *pos;

        while matches!(self.peek_at(p), Some(t) if t.kind == TokenKind::StorageClass) {
            type_tokens.push(self.tokens[p].value.clone());
            p += 1;
        }

        while matches!(self.peek_at(p), Some(t) if t.kind == TokenKind::TypeQualifier) {
            type_tokens.push(self.tokens[p].value.clone());
            p += 1;
        }

        while let Some(t) = self.peek_at(p) {
            let starts_type = t.kind == TokenKind::TypeSpecifier
                || t.kind == TokenKind::Identifier
                || (t.kind == TokenKind::Keyword
                    && (t.value == "typename" || t.value == "class"));
            if !starts_type {
                break;
            }

            let mut fullname = t.value.clone();
            p += 1;

            while matches!(self.peek_at(p), Some(t) if t.kind == TokenKind::ScopeResolution) {
                p += 1;
                if matches!(self.peek_at(p), Some(t) if t.kind == TokenKind::Identifier) {
                    fullname.push_str("::");
                    fullname.push_str(&self.tokens[p].value);
                    p += 1;
                } else {
                    break;
                }
            }

            if matches!(self.peek_at(p), Some(t) if t.kind == TokenKind::Less) {
                let mut templ = String::from("<");
                p += 1;
                let mut depth = 1;
                while depth > 0 {
                    match self.peek_at(p) {
                        Some(t) if t.kind == TokenKind::Less => {
                            templ.push('<');
                            depth += 1;
                            p += 1;
                        }
                        Some(t) if t.kind == TokenKind::Greater => {
                            templ.push('>');
                            depth -= 1;
                            p += 1;
                        }
                        Some(t) => {
                            templ.push_str(&t.value);
                            p += 1;
                        }
                        None => break,
                    }
                }
                fullname.push_str(&templ);
            }

            type_tokens.push(fullname);

            // Multi-word bases: unsigned long, long long, ...
            if matches!(self.peek_at(p), Some(t) if t.kind == TokenKind::TypeSpecifier
                && matches!(t.value.as_str(), "long" | "short" | "signed" | "unsigned"))
            {
                continue;
            }
            break;
        }

        while matches!(self.peek_at(p), Some(t) if t.kind == TokenKind::Operator
            && (t.value == "*" || t.value == "&"))
        {
            type_tokens.push(self.tokens[p].value.clone());
            p += 1;
        }

        *pos = p;
        type_tokens
    }

    // ------------------------------------------------------------------
    // Top level
    // ------------------------------------------------------------------

    pub fn parse_program(&mut self) -> Result<Program, ParserError> {
        let mut top = Vec::new();
        while !self.at_end() {
            if let Some(node) = self.parse_declaration_or_statement()? {
                top.push(node);
            }
        }
        Ok(Program { top })
    }

    fn parse_declaration_or_statement(&mut self) -> Result<Option<Node>, ParserError> {
        let kind = self.peek().kind;
        let value = self.peek().value.clone();

        if kind == TokenKind::Preprocessor {
            return Ok(Some(self.parse_include_directive()));
        }

        if kind == TokenKind::AccessSpecifier {
            return self.parse_access_specifier().map(Some);
        }

        // Statement keywords win over declaration dispatch.
        if kind == TokenKind::Keyword
            && matches!(
                value.as_str(),
                "return" | "if" | "while" | "for" | "break" | "continue" | "throw" | "delete"
                    | "new"
            )
        {
            return self.parse_statement();
        }

        if matches!(
            kind,
            TokenKind::Keyword
                | TokenKind::TypeSpecifier
                | TokenKind::StorageClass
                | TokenKind::TypeQualifier
        ) {
            match value.as_str() {
                "class" => return self.parse_class().map(Some),
                "struct" => return self.parse_struct().map(Some),
                "namespace" => return self.parse_namespace().map(Some),
                "template" => return self.parse_template().map(Some),
                "using" => return self.parse_using_directive(),
                _ => {}
            }

            // Peek past the type: IDENTIFIER '(' means a function.
            let mut la = self.pos;
            let _ = self.parse_type_lookahead(&mut la);
            if matches!(self.peek_at(la), Some(t) if t.kind == TokenKind::Identifier)
                && matches!(self.peek_at(la + 1), Some(t) if t.kind == TokenKind::LeftParen)
            {
                return self.parse_function_declaration().map(Some);
            }

            return self.parse_var_declaration().map(Some);
        }

        // User-defined type declarations (qualified names, templates).
        if kind == TokenKind::Identifier {
            let mut la = self.pos;
            let tt = self.parse_type_lookahead(&mut la);
            if !tt.is_empty() {
                if matches!(self.peek_at(la), Some(t) if t.kind == TokenKind::Identifier) {
                    return self.parse_var_declaration().map(Some);
                }
            }
        }

        self.parse_statement()
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn parse_class(&mut self) -> Result<Node, ParserError> {
        let (line, col) = (self.peek().line, self.peek().col);
        self.advance(); // 'class'

        if !self.check(TokenKind::Identifier) {
            return Err(self.error("Expected class name"));
        }
        let name = self.peek().value.clone();
        self.advance();

        let old_class = std::mem::replace(&mut self.current_class, name.clone());

        let mut bases = Vec::new();
        if self.eat(TokenKind::Colon) {
            while !self.check(TokenKind::LeftBrace) && !self.at_end() {
                if self.check(TokenKind::AccessSpecifier) || self.check(TokenKind::Keyword) {
                    self.advance();
                }
                if self.check(TokenKind::Identifier) {
                    bases.push(self.peek().value.clone());
                    self.advance();
                }
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.expect(TokenKind::LeftBrace, "Expected '{' after class name")?;

        let mut members = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.at_end() {
            if let Some(member) = self.parse_class_member()? {
                members.push(member);
            }
        }

        self.expect(TokenKind::RightBrace, "Expected '}' after class body")?;
        self.expect(TokenKind::Semicolon, "Expected ';' after class declaration")?;

        self.current_class = old_class;
        Ok(Node::new(
            NodeKind::ClassDecl {
                name,
                members,
                bases,
            },
            line,
            col,
        ))
    }

    fn parse_struct(&mut self) -> Result<Node, ParserError> {
        let (line, col) = (self.peek().line, self.peek().col);
        self.advance(); // 'struct'

        if !self.check(TokenKind::Identifier) {
            return Err(self.error("Expected struct name"));
        }
        let name = self.peek().value.clone();
        self.advance();

        self.expect(TokenKind::LeftBrace, "Expected '{' after struct name")?;

        let mut members = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.at_end() {
            if let Some(member) = self.parse_class_member()? {
                members.push(member);
            }
        }

        self.expect(TokenKind::RightBrace, "Expected '}' after struct body")?;
        self.expect(TokenKind::Semicolon, "Expected ';' after struct declaration")?;

        Ok(Node::new(NodeKind::StructDecl { name, members }, line, col))
    }

    fn parse_namespace(&mut self) -> Result<Node, ParserError> {
        let (line, col) = (self.peek().line, self.peek().col);
        self.advance(); // 'namespace'

        let mut name = String::new();
        if self.check(TokenKind::Identifier) {
            name = self.peek().value.clone();
            self.advance();
            // qualified namespace names: A::B::C
            while self.check(TokenKind::ScopeResolution) {
                self.advance();
                if self.check(TokenKind::Identifier) {
                    name.push_str("::");
                    name.push_str(&self.peek().value);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        self.expect(TokenKind::LeftBrace, "Expected '{' after namespace")?;

        let mut stmts = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.at_end() {
            if let Some(decl) = self.parse_declaration_or_statement()? {
                stmts.push(decl);
            }
        }

        self.expect(TokenKind::RightBrace, "Expected '}' after namespace body")?;

        let body = Box::new(Node::new(NodeKind::Block { stmts }, line, col));
        Ok(Node::new(NodeKind::NamespaceDecl { name, body }, line, col))
    }

    fn parse_template(&mut self) -> Result<Node, ParserError> {
        let (line, col) = (self.peek().line, self.peek().col);
        self.advance(); // 'template'
        self.expect(TokenKind::Less, "Expected '<' after template")?;

        let params = self.parse_template_params();

        self.expect(TokenKind::Greater, "Expected '>' after template parameters")?;

        // Lookahead for a templated function declaration.
        let mut la = self.pos;
        let _ = self.parse_type_lookahead(&mut la);
        let is_function = matches!(self.peek_at(la), Some(t) if t.kind == TokenKind::Identifier)
            && matches!(self.peek_at(la + 1), Some(t) if t.kind == TokenKind::LeftParen);

        // Fallback: scan forward for IDENTIFIER '(' before '{' or ';'.
        let found_func = is_function || {
            let mut k = self.pos;
            let mut found = false;
            while let (Some(a), Some(b)) = (self.peek_at(k), self.peek_at(k + 1)) {
                if a.kind == TokenKind::Identifier && b.kind == TokenKind::LeftParen {
                    found = true;
                    break;
                }
                if a.kind == TokenKind::LeftBrace || a.kind == TokenKind::Semicolon {
                    break;
                }
                k += 1;
            }
            found
        };

        let decl = if found_func {
            self.parse_function_declaration()?
        } else {
            self.parse_declaration_or_statement()?
                .ok_or_else(|| self.error("Expected declaration after template parameters"))?
        };

        Ok(Node::new(
            NodeKind::TemplateDecl {
                params,
                decl: Box::new(decl),
            },
            line,
            col,
        ))
    }

    fn parse_template_params(&mut self) -> Vec<String> {
        let mut params = Vec::new();

        while !self.check(TokenKind::Greater) && !self.at_end() {
            if self.check_value(TokenKind::Keyword, "typename")
                || self.check_value(TokenKind::Keyword, "class")
            {
                self.advance();
                if self.check(TokenKind::Identifier) {
                    params.push(self.peek().value.clone());
                    self.advance();
                    // default parameter: = T
                    if self.check_value(TokenKind::Operator, "=") {
                        self.advance();
                        if self.check(TokenKind::Identifier)
                            || self.check(TokenKind::TypeSpecifier)
                        {
                            self.advance();
                        }
                    }
                }
            }

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        params
    }

    fn parse_function_declaration(&mut self) -> Result<Node, ParserError> {
        let (line, col) = (self.peek().line, self.peek().col);

        let mut return_type = Vec::new();
        let name;

        if !self.current_class.is_empty()
            && self.check_value(TokenKind::Identifier, &self.current_class.clone())
        {
            // Constructor
            name = self.peek().value.clone();
            self.advance();
        } else if self.check_value(TokenKind::Operator, "~") {
            // Destructor
            self.advance();
            if !self.check(TokenKind::Identifier) || self.peek().value != self.current_class {
                return Err(self.error("Expected class name after '~'"));
            }
            name = format!("~{}", self.peek().value);
            self.advance();
        } else {
            return_type = self.parse_type();
            if self.check(TokenKind::LeftParen) && !return_type.is_empty() {
                // parse_type swallowed the function name (e.g. 'auto peek')
                name = return_type.pop().unwrap();
            } else {
                if !self.check(TokenKind::Identifier) {
                    return Err(self.error("Expected function name"));
                }
                name = self.peek().value.clone();
                self.advance();
            }
        }

        let params = self.parse_function_params()?;

        let mut is_const = false;
        if self.check_value(TokenKind::TypeQualifier, "const") {
            is_const = true;
            self.advance();
        }

        let body = if self.check(TokenKind::LeftBrace) {
            Some(Box::new(self.parse_block()?))
        } else {
            self.expect(TokenKind::Semicolon, "Expected ';' or function body")?;
            None
        };

        Ok(Node::new(
            NodeKind::FunctionDecl {
                return_type,
                name,
                params,
                body,
                is_const,
            },
            line,
            col,
        ))
    }

    fn parse_function_params(&mut self) -> Result<Vec<Param>, ParserError> {
        let mut params = Vec::new();
        self.expect(TokenKind::LeftParen, "Expected '(' after function name")?;

        while !self.check(TokenKind::RightParen) && !self.at_end() {
            let type_tokens = self.parse_type();
            if type_tokens.is_empty() {
                return Err(self.error("Expected type in parameter list"));
            }

            // Parameter name is optional in prototypes.
            let mut name = String::new();
            if self.check(TokenKind::Identifier) {
                name = self.peek().value.clone();
                self.advance();
            }

            params.push(Param { type_tokens, name });

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.expect(TokenKind::RightParen, "Expected ')' after parameters")?;
        Ok(params)
    }

    fn parse_access_specifier(&mut self) -> Result<Node, ParserError> {
        let tok = self.peek().clone();
        self.advance();
        self.expect(TokenKind::Colon, "Expected ':' after access specifier")?;
        Ok(Node::new(
            NodeKind::AccessSpec { access: tok.value },
            tok.line,
            tok.col,
        ))
    }

    fn parse_include_directive(&mut self) -> Node {
        let tok = self.peek().clone();
        self.advance();

        // Extract the filename out of the raw "#include <x>" text.
        let mut file = String::new();
        let mut is_system = false;
        if let Some(idx) = tok.value.find("include") {
            let rest = tok.value[idx + 7..].trim_start();
            if let Some(stripped) = rest.strip_prefix('<') {
                is_system = true;
                if let Some(end) = stripped.find('>') {
                    file = stripped[..end].to_string();
                }
            } else if let Some(stripped) = rest.strip_prefix('"') {
                if let Some(end) = stripped.find('"') {
                    file = stripped[..end].to_string();
                }
            }
        }

        Node::new(NodeKind::Include { file, is_system }, tok.line, tok.col)
    }

    fn parse_using_directive(&mut self) -> Result<Option<Node>, ParserError> {
        let tok = self.peek().clone();
        self.advance(); // 'using'

        if self.check_value(TokenKind::Keyword, "namespace") {
            self.advance();
            if !self.check(TokenKind::Identifier) {
                return Err(self.error("Expected namespace name"));
            }
            let name = self.peek().value.clone();
            self.advance();
            self.expect(TokenKind::Semicolon, "Expected ';' after using directive")?;
            return Ok(Some(Node::new(
                NodeKind::UsingNamespace { name },
                tok.line,
                tok.col,
            )));
        }

        // using declarations (using std::cout;) are skipped.
        while !self.check(TokenKind::Semicolon) && !self.at_end() {
            self.advance();
        }
        self.expect(TokenKind::Semicolon, "Expected ';' after using declaration")?;
        Ok(None)
    }

    fn parse_class_member(&mut self) -> Result<Option<Node>, ParserError> {
        if self.check(TokenKind::AccessSpecifier) {
            return self.parse_access_specifier().map(Some);
        }

        // Constructor: ClassName '('
        if !self.current_class.is_empty()
            && self.check_value(TokenKind::Identifier, &self.current_class.clone())
        {
            if matches!(self.peek_at(self.pos + 1), Some(t) if t.kind == TokenKind::LeftParen) {
                return self.parse_function_declaration().map(Some);
            }
        }

        // Destructor: '~' ClassName
        if self.check_value(TokenKind::Operator, "~") {
            if matches!(self.peek_at(self.pos + 1), Some(t) if t.kind == TokenKind::Identifier
                && t.value == self.current_class)
            {
                return self.parse_function_declaration().map(Some);
            }
        }

        self.parse_declaration_or_statement()
    }

    fn parse_var_declaration(&mut self) -> Result<Node, ParserError> {
        let (line, col) = (self.peek().line, self.peek().col);

        let type_tokens = self.parse_type();

        if !self.check(TokenKind::Identifier) {
            return Err(self.error("Expected identifier after type"));
        }

        let is_pointer = type_tokens.iter().any(|t| t == "*");
        let is_reference = type_tokens.iter().any(|t| t == "&");

        // One or more comma-separated declarators.
        let mut decls = Vec::new();
        loop {
            let name = self.peek().value.clone();
            self.advance();

            let mut init = None;
            let mut is_array = false;

            if self.check(TokenKind::LeftBracket) {
                // Array declarator: arr[size]. The size expression is parsed
                // and discarded.
                is_array = true;
                self.advance();
                let _size = self.parse_expression()?;
                self.expect(TokenKind::RightBracket, "Expected ']' in array declarator")?;
                if self.check_value(TokenKind::Operator, "=") {
                    self.advance();
                    init = Some(Box::new(self.parse_initializer()?));
                }
            } else if self.check_value(TokenKind::Operator, "=") {
                self.advance();
                init = Some(Box::new(self.parse_initializer()?));
            } else if self.check(TokenKind::LeftParen) {
                // Constructor-style initializer: T name(args)
                self.advance();
                let mut args = Vec::new();
                while !self.check(TokenKind::RightParen) && !self.at_end() {
                    args.push(self.parse_expression()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(
                    TokenKind::RightParen,
                    "Expected ')' after constructor arguments",
                )?;
                let type_name = type_tokens.first().cloned().unwrap_or_default();
                let callee = Node::new(NodeKind::Identifier { name: type_name }, line, col);
                init = Some(Box::new(Node::new(
                    NodeKind::Call {
                        callee: Box::new(callee),
                        args,
                    },
                    line,
                    col,
                )));
            }

            decls.push(Node::new(
                NodeKind::VarDecl {
                    type_tokens: type_tokens.clone(),
                    name,
                    init,
                    is_pointer,
                    is_reference,
                    is_array,
                },
                line,
                col,
            ));

            if !self.eat(TokenKind::Comma) {
                break;
            }
            if !self.check(TokenKind::Identifier) {
                return Err(self.error("Expected identifier after ','"));
            }
        }

        // The trailing ';' is optional so a declaration can appear as a
        // range-for initializer (followed by ':' or ')').
        if self.check(TokenKind::Semicolon) {
            self.advance();
        }

        if decls.len() == 1 {
            return Ok(decls.pop().unwrap());
        }
        Ok(Node::new(NodeKind::Block { stmts: decls }, line, col))
    }

    /// Parses `= expr` or `= { ... }` right-hand sides. A brace initializer
    /// list is collapsed into a single `Brace` literal holding the token
    /// text.
    fn parse_initializer(&mut self) -> Result<Node, ParserError> {
        if self.check(TokenKind::LeftBrace) {
            let (line, col) = (self.peek().line, self.peek().col);
            self.advance();
            let mut contents = String::new();
            while !self.check(TokenKind::RightBrace) && !self.at_end() {
                contents.push_str(&self.peek().value);
                self.advance();
            }
            self.expect(TokenKind::RightBrace, "Expected '}' after initializer list")?;
            return Ok(Node::new(
                NodeKind::Literal {
                    value: contents,
                    literal_kind: LiteralKind::Brace,
                },
                line,
                col,
            ));
        }
        self.parse_expression()
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Option<Node>, ParserError> {
        if self.check(TokenKind::Preprocessor) {
            self.advance();
            return Ok(None);
        }

        if self.check_value(TokenKind::Keyword, "using") {
            return self.parse_declaration_or_statement();
        }

        if self.check(TokenKind::LeftBrace) {
            return self.parse_block().map(Some);
        }
        if self.check_value(TokenKind::Keyword, "if") {
            return self.parse_if().map(Some);
        }
        if self.check_value(TokenKind::Keyword, "while") {
            return self.parse_while().map(Some);
        }
        if self.check_value(TokenKind::Keyword, "for") {
            return self.parse_for().map(Some);
        }
        if self.check_value(TokenKind::Keyword, "return") {
            return self.parse_return().map(Some);
        }
        if self.check_value(TokenKind::Keyword, "throw") {
            return self.parse_throw().map(Some);
        }

        self.parse_expression_statement().map(Some)
    }

    fn parse_statement_required(&mut self) -> Result<Node, ParserError> {
        self.parse_statement()?
            .ok_or_else(|| self.error("Expected statement"))
    }

    fn parse_block(&mut self) -> Result<Node, ParserError> {
        let (line, col) = (self.peek().line, self.peek().col);
        self.expect(TokenKind::LeftBrace, "Expected '{' to start block")?;

        let mut stmts = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.at_end() {
            if let Some(stmt) = self.parse_declaration_or_statement()? {
                stmts.push(stmt);
            }
        }

        self.expect(TokenKind::RightBrace, "Expected '}' after block")?;
        Ok(Node::new(NodeKind::Block { stmts }, line, col))
    }

    fn parse_expression_statement(&mut self) -> Result<Node, ParserError> {
        let expr = self.parse_expression()?;
        let (line, col) = (expr.line, expr.col);
        self.expect(TokenKind::Semicolon, "Expected ';' after expression")?;
        Ok(Node::new(
            NodeKind::ExprStmt {
                expr: Some(Box::new(expr)),
            },
            line,
            col,
        ))
    }

    fn parse_if(&mut self) -> Result<Node, ParserError> {
        let (line, col) = (self.peek().line, self.peek().col);
        self.advance(); // 'if'
        self.expect(TokenKind::LeftParen, "Expected '(' after if")?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::RightParen, "Expected ')' after if condition")?;
        let then_branch = self.parse_statement_required()?;
        let mut else_branch = None;
        if self.check_value(TokenKind::Keyword, "else") {
            self.advance();
            else_branch = Some(Box::new(self.parse_statement_required()?));
        }
        Ok(Node::new(
            NodeKind::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch,
            },
            line,
            col,
        ))
    }

    fn parse_while(&mut self) -> Result<Node, ParserError> {
        let (line, col) = (self.peek().line, self.peek().col);
        self.advance(); // 'while'
        self.expect(TokenKind::LeftParen, "Expected '(' after while")?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::RightParen, "Expected ')' after while condition")?;
        let body = self.parse_statement_required()?;
        Ok(Node::new(
            NodeKind::While {
                cond: Box::new(cond),
                body: Box::new(body),
            },
            line,
            col,
        ))
    }

    fn parse_for(&mut self) -> Result<Node, ParserError> {
        let (line, col) = (self.peek().line, self.peek().col);
        self.advance(); // 'for'
        self.expect(TokenKind::LeftParen, "Expected '(' after for")?;

        let init = if self.check(TokenKind::Semicolon) {
            self.expect(TokenKind::Semicolon, "Expected ';' after for init (empty)")?;
            None
        } else if self.check(TokenKind::TypeSpecifier)
            || self.check(TokenKind::TypeQualifier)
            || self.check(TokenKind::StorageClass)
        {
            Some(Box::new(self.parse_var_declaration()?))
        } else {
            let expr = self.parse_expression()?;
            self.expect(TokenKind::Semicolon, "Expected ';' after for init")?;
            Some(Box::new(expr))
        };

        // Range-based form: for (decl : expr)
        if self.check(TokenKind::Colon) {
            self.advance();
            let range_expr = self.parse_expression()?;
            self.expect(TokenKind::RightParen, "Expected ')' after for range")?;
            let body = self.parse_statement_required()?;
            return Ok(Node::new(
                NodeKind::For {
                    init,
                    cond: None,
                    post: Some(Box::new(range_expr)),
                    body: Box::new(body),
                },
                line,
                col,
            ));
        }

        let cond = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect(TokenKind::Semicolon, "Expected ';' after for condition")?;

        let post = if self.check(TokenKind::RightParen) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect(TokenKind::RightParen, "Expected ')' after for clauses")?;

        let body = self.parse_statement_required()?;
        Ok(Node::new(
            NodeKind::For {
                init,
                cond,
                post,
                body: Box::new(body),
            },
            line,
            col,
        ))
    }

    fn parse_return(&mut self) -> Result<Node, ParserError> {
        let (line, col) = (self.peek().line, self.peek().col);
        self.advance(); // 'return'
        let expr = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect(TokenKind::Semicolon, "Expected ';' after return")?;
        Ok(Node::new(NodeKind::Return { expr }, line, col))
    }

    fn parse_throw(&mut self) -> Result<Node, ParserError> {
        let (line, col) = (self.peek().line, self.peek().col);
        self.advance(); // 'throw'
        let expr = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect(TokenKind::Semicolon, "Expected ';' after throw")?;
        // throw is represented as an expression statement
        Ok(Node::new(NodeKind::ExprStmt { expr }, line, col))
    }

    // ------------------------------------------------------------------
    // Expressions, lowest to highest precedence
    // ------------------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Node, ParserError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Node, ParserError> {
        let left = self.parse_conditional()?;
        if self.check_value(TokenKind::Operator, "=") {
            let op = self.peek().clone();
            self.advance();
            let right = self.parse_assignment()?;
            return Ok(Node::new(
                NodeKind::Binary {
                    op: op.value,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                op.line,
                op.col,
            ));
        }
        Ok(left)
    }

    /// Conditional `?:`. The condition is parsed and then dropped: the node
    /// keeps only the two arms under the `"?:"` operator tag.
    fn parse_conditional(&mut self) -> Result<Node, ParserError> {
        let expr = self.parse_logical_or()?;
        if self.check_value(TokenKind::Operator, "?") {
            let op = self.peek().clone();
            self.advance();
            let then_expr = self.parse_expression()?;
            self.expect(TokenKind::Colon, "Expected ':' in conditional expression")?;
            let else_expr = self.parse_expression()?;
            return Ok(Node::new(
                NodeKind::Binary {
                    op: "?:".to_string(),
                    left: Box::new(then_expr),
                    right: Box::new(else_expr),
                },
                op.line,
                op.col,
            ));
        }
        Ok(expr)
    }

    fn parse_logical_or(&mut self) -> Result<Node, ParserError> {
        let mut node = self.parse_logical_and()?;
        while self.check_value(TokenKind::Operator, "||") {
            let op = self.peek().clone();
            self.advance();
            let right = self.parse_logical_and()?;
            node = Node::new(
                NodeKind::Binary {
                    op: op.value,
                    left: Box::new(node),
                    right: Box::new(right),
                },
                op.line,
                op.col,
            );
        }
        Ok(node)
    }

    fn parse_logical_and(&mut self) -> Result<Node, ParserError> {
        let mut node = self.parse_equality()?;
        while self.check_value(TokenKind::Operator, "&&") {
            let op = self.peek().clone();
            self.advance();
            let right = self.parse_equality()?;
            node = Node::new(
                NodeKind::Binary {
                    op: op.value,
                    left: Box::new(node),
                    right: Box::new(right),
                },
                op.line,
                op.col,
            );
        }
        Ok(node)
    }

    fn parse_equality(&mut self) -> Result<Node, ParserError> {
        let mut node = self.parse_comparison()?;
        while self.check_value(TokenKind::Operator, "==")
            || self.check_value(TokenKind::Operator, "!=")
        {
            let op = self.peek().clone();
            self.advance();
            let right = self.parse_comparison()?;
            node = Node::new(
                NodeKind::Binary {
                    op: op.value,
                    left: Box::new(node),
                    right: Box::new(right),
                },
                op.line,
                op.col,
            );
        }
        Ok(node)
    }

    fn parse_comparison(&mut self) -> Result<Node, ParserError> {
        let mut node = self.parse_shift()?;
        loop {
            let is_cmp = self.check(TokenKind::Less)
                || self.check(TokenKind::Greater)
                || self.check(TokenKind::LessEqual)
                || self.check(TokenKind::GreaterEqual)
                || self.check_value(TokenKind::Operator, "<")
                || self.check_value(TokenKind::Operator, ">")
                || self.check_value(TokenKind::Operator, "<=")
                || self.check_value(TokenKind::Operator, ">=");
            if !is_cmp {
                break;
            }
            let op = self.peek().clone();
            self.advance();
            let right = self.parse_shift()?;
            node = Node::new(
                NodeKind::Binary {
                    op: op.value,
                    left: Box::new(node),
                    right: Box::new(right),
                },
                op.line,
                op.col,
            );
        }
        Ok(node)
    }

    fn parse_shift(&mut self) -> Result<Node, ParserError> {
        let mut node = self.parse_additive()?;
        while self.check(TokenKind::LeftShift)
            || self.check(TokenKind::RightShift)
            || self.check_value(TokenKind::Operator, "<<")
            || self.check_value(TokenKind::Operator, ">>")
        {
            let op = self.peek().clone();
            self.advance();
            let right = self.parse_additive()?;
            node = Node::new(
                NodeKind::Binary {
                    op: op.value,
                    left: Box::new(node),
                    right: Box::new(right),
                },
                op.line,
                op.col,
            );
        }
        Ok(node)
    }

    fn parse_additive(&mut self) -> Result<Node, ParserError> {
        let mut node = self.parse_multiplicative()?;
        while self.check_value(TokenKind::Operator, "+")
            || self.check_value(TokenKind::Operator, "-")
        {
            let op = self.peek().clone();
            self.advance();
            let right = self.parse_multiplicative()?;
            node = Node::new(
                NodeKind::Binary {
                    op: op.value,
                    left: Box::new(node),
                    right: Box::new(right),
                },
                op.line,
                op.col,
            );
        }
        Ok(node)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ParserError> {
        let mut node = self.parse_unary()?;
        while self.check_value(TokenKind::Operator, "*")
            || self.check_value(TokenKind::Operator, "/")
            || self.check_value(TokenKind::Operator, "%")
        {
            let op = self.peek().clone();
            self.advance();
            let right = self.parse_unary()?;
            node = Node::new(
                NodeKind::Binary {
                    op: op.value,
                    left: Box::new(node),
                    right: Box::new(right),
                },
                op.line,
                op.col,
            );
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Node, ParserError> {
        if self.check_value(TokenKind::Keyword, "new") {
            let op = self.peek().clone();
            self.advance();

            if self.check(TokenKind::TypeSpecifier) {
                let type_name = self.peek().value.clone();
                self.advance();

                // Array allocation: new T[size]
                if self.check(TokenKind::LeftBracket) {
                    self.advance();
                    let size = self.parse_expression()?;
                    self.expect(TokenKind::RightBracket, "Expected ']' after array size")?;

                    let array = Node::new(
                        NodeKind::Identifier { name: type_name },
                        op.line,
                        op.col,
                    );
                    let subscript = Node::new(
                        NodeKind::Index {
                            array: Box::new(array),
                            index: Box::new(size),
                        },
                        op.line,
                        op.col,
                    );
                    return Ok(Node::new(
                        NodeKind::Unary {
                            op: "new".to_string(),
                            operand: Box::new(subscript),
                        },
                        op.line,
                        op.col,
                    ));
                }

                // Single allocation: new T
                let operand = Node::new(NodeKind::Identifier { name: type_name }, op.line, op.col);
                return Ok(Node::new(
                    NodeKind::Unary {
                        op: "new".to_string(),
                        operand: Box::new(operand),
                    },
                    op.line,
                    op.col,
                ));
            }

            let operand = self.parse_unary()?;
            return Ok(Node::new(
                NodeKind::Unary {
                    op: "new".to_string(),
                    operand: Box::new(operand),
                },
                op.line,
                op.col,
            ));
        }

        if self.check_value(TokenKind::Keyword, "delete") {
            let op = self.peek().clone();
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Node::new(
                NodeKind::Unary {
                    op: "delete".to_string(),
                    operand: Box::new(operand),
                },
                op.line,
                op.col,
            ));
        }

        if self.check(TokenKind::Operator)
            && matches!(self.peek().value.as_str(), "!" | "-" | "+" | "*" | "&" | "~")
        {
            let op = self.peek().clone();
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Node::new(
                NodeKind::Unary {
                    op: op.value,
                    operand: Box::new(operand),
                },
                op.line,
                op.col,
            ));
        }

        self.parse_call_and_primary()
    }

    fn parse_call_and_primary(&mut self) -> Result<Node, ParserError> {
        let tok = self.peek().clone();

        // Lambda: consume through the balanced body, keep a placeholder.
        if tok.kind == TokenKind::LeftBracket {
            self.advance();
            while !self.check(TokenKind::LeftBrace) && !self.at_end() {
                self.advance();
            }
            if self.check(TokenKind::LeftBrace) {
                self.advance();
                let mut depth = 1;
                while !self.at_end() && depth > 0 {
                    if self.check(TokenKind::LeftBrace) {
                        depth += 1;
                    } else if self.check(TokenKind::RightBrace) {
                        depth -= 1;
                    }
                    self.advance();
                }
            }
            return Ok(Node::new(
                NodeKind::Literal {
                    value: "<lambda>".to_string(),
                    literal_kind: LiteralKind::Brace,
                },
                tok.line,
                tok.col,
            ));
        }

        // Literals
        if matches!(
            tok.kind,
            TokenKind::Number | TokenKind::Str | TokenKind::Character
        ) {
            self.advance();
            let literal_kind = match tok.kind {
                TokenKind::Str => LiteralKind::Str,
                TokenKind::Character => LiteralKind::Char,
                _ => LiteralKind::Number,
            };
            return Ok(Node::new(
                NodeKind::Literal {
                    value: tok.value,
                    literal_kind,
                },
                tok.line,
                tok.col,
            ));
        }

        // Identifier followed by a postfix chain.
        if tok.kind == TokenKind::Identifier {
            self.advance();
            let mut left = Node::new(NodeKind::Identifier { name: tok.value }, tok.line, tok.col);

            loop {
                if self.check(TokenKind::Arrow) {
                    let op = self.peek().clone();
                    self.advance();
                    if !self.check(TokenKind::Identifier) {
                        return Err(self.error("Expected member name after '->'"));
                    }
                    let member = self.peek().value.clone();
                    self.advance();
                    left = Node::new(
                        NodeKind::Member {
                            object: Box::new(left),
                            member,
                            arrow: true,
                        },
                        op.line,
                        op.col,
                    );
                } else if self.check(TokenKind::Dot) {
                    let op = self.peek().clone();
                    self.advance();
                    if !self.check(TokenKind::Identifier) {
                        return Err(self.error("Expected member name after '.'"));
                    }
                    let member = self.peek().value.clone();
                    self.advance();
                    left = Node::new(
                        NodeKind::Member {
                            object: Box::new(left),
                            member,
                            arrow: false,
                        },
                        op.line,
                        op.col,
                    );
                } else if self.check(TokenKind::LeftBracket) {
                    let op = self.peek().clone();
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RightBracket, "Expected ']' after array index")?;
                    left = Node::new(
                        NodeKind::Index {
                            array: Box::new(left),
                            index: Box::new(index),
                        },
                        op.line,
                        op.col,
                    );
                } else if self.check(TokenKind::LeftParen) {
                    let op = self.peek().clone();
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(TokenKind::RightParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(
                        TokenKind::RightParen,
                        "Expected ')' after function call arguments",
                    )?;
                    left = Node::new(
                        NodeKind::Call {
                            callee: Box::new(left),
                            args,
                        },
                        op.line,
                        op.col,
                    );
                } else if self.check_value(TokenKind::Operator, "++")
                    || self.check_value(TokenKind::Operator, "--")
                {
                    let op = self.peek().clone();
                    self.advance();
                    left = Node::new(
                        NodeKind::Unary {
                            op: format!("{}_post", op.value),
                            operand: Box::new(left),
                        },
                        op.line,
                        op.col,
                    );
                } else if self.check(TokenKind::ScopeResolution) {
                    // Fold A::B into the identifier's textual name.
                    self.advance();
                    if self.check(TokenKind::Identifier) {
                        let next = self.peek().clone();
                        self.advance();
                        if let NodeKind::Identifier { name } = &left.kind {
                            let qualified = format!("{}::{}", name, next.value);
                            left = Node::new(
                                NodeKind::Identifier { name: qualified },
                                next.line,
                                next.col,
                            );
                        }
                    }
                } else {
                    break;
                }
            }

            return Ok(left);
        }

        // Parenthesized expression
        if tok.kind == TokenKind::LeftParen {
            self.advance();
            let expr = self.parse_expression()?;
            self.expect(TokenKind::RightParen, "Expected ')' after expression")?;
            return Ok(expr);
        }

        Err(self.error("Expected expression"))
    }
}

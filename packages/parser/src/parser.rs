use crate::ast::{Attribute, Block, Expr, LineMap, SourceRange, TemplatePart};
use crate::error::ParseError;
use crate::lexer::{tokenize, Token};
use std::ops::Range;

/// Block-grammar parser for one NaCl file.
///
/// Error recovery is a property of the parse session, fixed at
/// construction: with it enabled the `*` wildcard lowers to a dynamic
/// expression, without it the wildcard is a syntax error.
pub struct Parser<'src> {
    source: &'src str,
    tokens: Vec<(Token<'src>, Range<usize>)>,
    pos: usize,
    filename: String,
    line_map: LineMap,
    error_recovery: bool,
    errors: Vec<ParseError>,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str, filename: &str, error_recovery: bool) -> Self {
        Self {
            source,
            tokens: tokenize(source),
            pos: 0,
            filename: filename.to_string(),
            line_map: LineMap::new(source),
            error_recovery,
            errors: Vec::new(),
        }
    }

    /// Parse the whole file into top-level blocks, recovering at block
    /// boundaries after syntax errors.
    pub fn parse_blocks(mut self) -> (Vec<Block>, Vec<ParseError>) {
        let mut blocks = Vec::new();
        while !self.is_at_end() {
            match self.parse_block() {
                Ok(block) => blocks.push(block),
                Err(error) => {
                    self.errors.push(error);
                    self.recover_to_block_end();
                }
            }
        }
        (blocks, self.errors)
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let start = self.current_span_start();
        let (block_type, type_range) = self.parse_type_word()?;

        let mut labels = Vec::new();
        loop {
            match self.peek() {
                Some((Token::Word(w), _)) => {
                    labels.push(w.to_string());
                    self.advance();
                }
                Some((Token::DottedWord(w), _)) => {
                    labels.push(w.to_string());
                    self.advance();
                }
                Some((Token::String(raw), span)) => {
                    let span = span.clone();
                    let label = decode_quoted(strip_quotes(raw), &self.range_of(&span));
                    labels.push(label.0);
                    self.advance();
                }
                _ => break,
            }
        }

        self.expect_token(&Token::LBrace, "{")?;

        let mut attrs: Vec<Attribute> = Vec::new();
        let mut blocks = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(ParseError::new(
                        "Unexpected end of file inside block",
                        self.range_between(start, self.source.len()),
                        self.eof_range(),
                    ));
                }
                Some((Token::RBrace, _)) => {
                    self.advance();
                    break;
                }
                _ => {
                    if self.peek_is_attribute() {
                        match self.parse_attribute() {
                            Ok(attr) => {
                                if let Some(existing) =
                                    attrs.iter().find(|a| a.key == attr.key)
                                {
                                    self.errors.push(ParseError::new(
                                        format!("Attribute redefined: {}", attr.key),
                                        existing.range.clone(),
                                        attr.key_range.clone(),
                                    ));
                                } else {
                                    attrs.push(attr);
                                }
                            }
                            Err(error) => {
                                self.errors.push(error);
                                self.recover_to_item_boundary();
                            }
                        }
                    } else {
                        match self.parse_block() {
                            Ok(block) => blocks.push(block),
                            Err(error) => {
                                self.errors.push(error);
                                self.recover_to_item_boundary();
                            }
                        }
                    }
                }
            }
        }

        let end = self.previous_span_end();
        Ok(Block {
            block_type,
            labels,
            attrs,
            blocks,
            range: self.range_between(start, end),
            type_range,
        })
    }

    /// A type word: `word`, `dotted.word`, or a container like
    /// `list<dotted.word>`, flattened back into a single string
    fn parse_type_word(&mut self) -> Result<(String, SourceRange), ParseError> {
        let start = self.current_span_start();
        let word = match self.peek() {
            Some((Token::Word(w), _)) => w.to_string(),
            Some((Token::DottedWord(w), _)) => w.to_string(),
            _ => {
                return Err(self.unexpected("a block type or field type"));
            }
        };
        self.advance();

        let mut spelled = word;
        if matches!(self.peek(), Some((Token::LAngle, _))) {
            self.advance();
            let (inner, _) = self.parse_type_word()?;
            self.expect_token(&Token::RAngle, ">")?;
            spelled = format!("{}<{}>", spelled, inner);
        }

        let end = self.previous_span_end();
        Ok((spelled, self.range_between(start, end)))
    }

    fn peek_is_attribute(&self) -> bool {
        let key_ok = matches!(
            self.peek(),
            Some((Token::Word(_), _)) | Some((Token::DottedWord(_), _))
        );
        key_ok && matches!(self.peek_at(1), Some((Token::Equals, _)))
    }

    fn parse_attribute(&mut self) -> Result<Attribute, ParseError> {
        let start = self.current_span_start();
        let (key, key_range) = match self.peek() {
            Some((Token::Word(w), span)) | Some((Token::DottedWord(w), span)) => {
                let key = w.to_string();
                let range = self.range_of(&span.clone());
                self.advance();
                (key, range)
            }
            _ => return Err(self.unexpected("an attribute key")),
        };
        self.expect_token(&Token::Equals, "=")?;
        let value = self.parse_expr()?;
        let end = self.previous_span_end();
        Ok(Attribute {
            key,
            value,
            key_range,
            range: self.range_between(start, end),
        })
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some((Token::String(raw), span)) => {
                let span = span.clone();
                let raw = *raw;
                self.advance();
                let range = self.range_of(&span);
                let (parts, errors) = parse_template(strip_quotes(raw), &range);
                self.errors.extend(errors);
                Ok(Expr::Str { parts, range })
            }
            Some((Token::MultilineString(raw), span)) => {
                let span = span.clone();
                let raw = *raw;
                self.advance();
                let inner = &raw[3..raw.len() - 3];
                // trim exactly one trailing newline
                let value = inner.strip_suffix('\n').unwrap_or(inner).to_string();
                Ok(Expr::Multiline {
                    value,
                    range: self.range_of(&span),
                })
            }
            Some((Token::Number(text), span)) => {
                let span = span.clone();
                let text = *text;
                self.advance();
                let range = self.range_of(&span);
                let value = text.parse::<f64>().map_err(|_| {
                    ParseError::at(format!("Invalid number: {}", text), range.clone())
                })?;
                Ok(Expr::Number { value, range })
            }
            Some((Token::True, span)) => {
                let range = self.range_of(&span.clone());
                self.advance();
                Ok(Expr::Bool { value: true, range })
            }
            Some((Token::False, span)) => {
                let range = self.range_of(&span.clone());
                self.advance();
                Ok(Expr::Bool { value: false, range })
            }
            Some((Token::LBracket, span)) => {
                let start = span.start;
                self.advance();
                let mut items = Vec::new();
                while !matches!(self.peek(), Some((Token::RBracket, _)) | None) {
                    items.push(self.parse_expr()?);
                    if !matches!(self.peek(), Some((Token::RBracket, _))) {
                        self.expect_token(&Token::Comma, ",")?;
                    }
                }
                self.expect_token(&Token::RBracket, "]")?;
                let end = self.previous_span_end();
                Ok(Expr::List {
                    items,
                    range: self.range_between(start, end),
                })
            }
            Some((Token::LBrace, span)) => {
                let start = span.start;
                self.advance();
                let mut attrs: Vec<Attribute> = Vec::new();
                while !matches!(self.peek(), Some((Token::RBrace, _)) | None) {
                    let attr = self.parse_attribute()?;
                    if let Some(existing) = attrs.iter().find(|a| a.key == attr.key) {
                        self.errors.push(ParseError::new(
                            format!("Attribute redefined: {}", attr.key),
                            existing.range.clone(),
                            attr.key_range.clone(),
                        ));
                    } else {
                        attrs.push(attr);
                    }
                }
                self.expect_token(&Token::RBrace, "}")?;
                let end = self.previous_span_end();
                Ok(Expr::Object {
                    attrs,
                    range: self.range_between(start, end),
                })
            }
            Some((Token::Word(w), span)) => {
                let name = w.to_string();
                let start = span.start;
                self.advance();
                if matches!(self.peek(), Some((Token::LParen, _))) {
                    self.advance();
                    let mut args = Vec::new();
                    while !matches!(self.peek(), Some((Token::RParen, _)) | None) {
                        args.push(self.parse_expr()?);
                        if !matches!(self.peek(), Some((Token::RParen, _))) {
                            self.expect_token(&Token::Comma, ",")?;
                        }
                    }
                    self.expect_token(&Token::RParen, ")")?;
                    let end = self.previous_span_end();
                    Ok(Expr::Call {
                        name,
                        args,
                        range: self.range_between(start, end),
                    })
                } else {
                    let end = self.previous_span_end();
                    Err(ParseError::at(
                        format!("Expected an expression, found bare word '{}'", name),
                        self.range_between(start, end),
                    ))
                }
            }
            Some((Token::DottedWord(path), span)) => {
                let span = span.clone();
                let path = path.to_string();
                self.advance();
                Ok(Expr::Reference {
                    path,
                    range: self.range_of(&span),
                })
            }
            Some((Token::Wildcard, span)) => {
                let range = self.range_of(&span.clone());
                self.advance();
                if self.error_recovery {
                    Ok(Expr::Dynamic { range })
                } else {
                    Err(ParseError::at(
                        "Wildcard '*' is only allowed in error recovery mode",
                        range,
                    ))
                }
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    // --- recovery ---

    /// Skip past the close of the block we errored inside of
    fn recover_to_block_end(&mut self) {
        let mut depth = 0usize;
        while let Some((token, _)) = self.peek() {
            match token {
                Token::LBrace => depth += 1,
                Token::RBrace => {
                    self.advance();
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    continue;
                }
                _ => {}
            }
            self.advance();
        }
    }

    /// Skip to the next plausible block item (or the enclosing close brace)
    fn recover_to_item_boundary(&mut self) {
        while let Some((token, _)) = self.peek() {
            match token {
                Token::RBrace => return,
                Token::Word(_) | Token::DottedWord(_) => return,
                Token::LBrace => {
                    // swallow a stray sub-block entirely
                    self.advance();
                    self.recover_to_block_end();
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    // --- token plumbing ---

    fn peek(&self) -> Option<&(Token<'src>, Range<usize>)> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&(Token<'src>, Range<usize>)> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect_token(&mut self, expected: &Token<'src>, spelled: &str) -> Result<(), ParseError> {
        match self.peek() {
            Some((token, _)) if token == expected => {
                self.advance();
                Ok(())
            }
            _ => Err(self.unexpected(&format!("'{}'", spelled))),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some((token, span)) => ParseError::at(
                format!("Expected {}, found {:?}", expected, token),
                self.range_of(&span.clone()),
            ),
            None => ParseError::at(
                format!("Expected {}, found end of file", expected),
                self.eof_range(),
            ),
        }
    }

    fn current_span_start(&self) -> usize {
        self.peek().map(|(_, span)| span.start).unwrap_or(self.source.len())
    }

    fn previous_span_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|(_, span)| span.end)
            .unwrap_or(0)
    }

    fn range_of(&self, span: &Range<usize>) -> SourceRange {
        self.line_map.range(&self.filename, span.clone())
    }

    fn range_between(&self, start: usize, end: usize) -> SourceRange {
        self.line_map.range(&self.filename, start..end)
    }

    fn eof_range(&self) -> SourceRange {
        let len = self.source.len();
        self.line_map.range(&self.filename, len..len)
    }
}

fn strip_quotes(raw: &str) -> &str {
    &raw[1..raw.len() - 1]
}

/// Decode a quoted-string body into template parts: literal runs with
/// `\n \t \" \\` escapes applied, and `${...}` reference fragments.
fn parse_template(body: &str, range: &SourceRange) -> (Vec<TemplatePart>, Vec<ParseError>) {
    let mut parts = Vec::new();
    let mut errors = Vec::new();
    let mut literal = String::new();
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => literal.push('\n'),
                Some('t') => literal.push('\t'),
                Some('"') => literal.push('"'),
                Some('\\') => literal.push('\\'),
                Some(other) => {
                    // unknown escapes pass through unchanged
                    literal.push('\\');
                    literal.push(other);
                }
                None => literal.push('\\'),
            },
            '$' if chars.peek() == Some(&'{') => {
                chars.next();
                let mut path = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    path.push(inner);
                }
                if !closed {
                    errors.push(ParseError::at(
                        "Unterminated '${' interpolation",
                        range.clone(),
                    ));
                    literal.push_str("${");
                    literal.push_str(&path);
                    continue;
                }
                if !literal.is_empty() {
                    parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(TemplatePart::Reference(path.trim().to_string()));
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() || parts.is_empty() {
        parts.push(TemplatePart::Literal(literal));
    }
    (parts, errors)
}

/// Decode a quoted string that is not allowed to contain interpolation
/// (block labels), reporting references as plain text
fn decode_quoted(body: &str, range: &SourceRange) -> (String, Vec<ParseError>) {
    let (parts, errors) = parse_template(body, range);
    let text = parts
        .into_iter()
        .map(|part| match part {
            TemplatePart::Literal(s) => s,
            TemplatePart::Reference(path) => format!("${{{}}}", path),
        })
        .collect();
    (text, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Vec<Block> {
        let (blocks, errors) = Parser::new(source, "test.nacl", false).parse_blocks();
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        blocks
    }

    #[test]
    fn test_parse_empty_block() {
        let blocks = parse_ok("type salesforce.Account {}");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_type, "type");
        assert_eq!(blocks[0].labels, vec!["salesforce.Account"]);
    }

    #[test]
    fn test_parse_attributes_and_nested_blocks() {
        let blocks = parse_ok(
            r#"
            type salesforce.Account {
                _required = true
                string Name {
                    label = "Account name"
                }
            }
            "#,
        );
        let block = &blocks[0];
        assert_eq!(block.attrs.len(), 1);
        assert_eq!(block.attrs[0].key, "_required");
        assert_eq!(block.blocks.len(), 1);
        assert_eq!(block.blocks[0].block_type, "string");
        assert_eq!(block.blocks[0].labels, vec!["Name"]);
    }

    #[test]
    fn test_parse_container_type_word() {
        let blocks = parse_ok("type salesforce.Account { list<salesforce.Tag> tags {} }");
        assert_eq!(blocks[0].blocks[0].block_type, "list<salesforce.Tag>");
    }

    #[test]
    fn test_parse_expressions() {
        let blocks = parse_ok(
            r#"
            salesforce.Account prod {
                name = "Main"
                count = 3
                active = true
                tags = ["a", "b"]
                address = { city = "SF" }
                owner = salesforce.User.instance.admin
                logo = file("logo.png")
            }
            "#,
        );
        let attrs = &blocks[0].attrs;
        assert_eq!(attrs.len(), 7);
        assert!(matches!(attrs[1].value, Expr::Number { value, .. } if value == 3.0));
        assert!(matches!(&attrs[5].value, Expr::Reference { path, .. }
            if path == "salesforce.User.instance.admin"));
        assert!(matches!(&attrs[6].value, Expr::Call { name, args, .. }
            if name == "file" && args.len() == 1));
    }

    #[test]
    fn test_duplicate_attribute_is_error_first_wins() {
        let (blocks, errors) = Parser::new(
            "type salesforce.Account { a = 1\n a = 2 }",
            "test.nacl",
            false,
        )
        .parse_blocks();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Attribute redefined"));
        // the error points at the second occurrence
        assert_eq!(errors[0].subject.start.line, 2);
        assert_eq!(blocks[0].attrs.len(), 1);
        assert!(matches!(blocks[0].attrs[0].value, Expr::Number { value, .. } if value == 1.0));
    }

    #[test]
    fn test_wildcard_rejected_outside_recovery_mode() {
        let (_, errors) =
            Parser::new("type salesforce.Account { a = * }", "test.nacl", false).parse_blocks();
        assert!(errors.iter().any(|e| e.message.contains("Wildcard")));

        let (blocks, errors) =
            Parser::new("type salesforce.Account { a = * }", "test.nacl", true).parse_blocks();
        assert!(errors.is_empty());
        assert!(matches!(blocks[0].attrs[0].value, Expr::Dynamic { .. }));
    }

    #[test]
    fn test_recovery_continues_after_bad_block() {
        let (blocks, errors) = Parser::new(
            "type salesforce.Broken { a = }\ntype salesforce.Fine { b = 1 }",
            "test.nacl",
            false,
        )
        .parse_blocks();
        assert!(!errors.is_empty());
        assert!(blocks.iter().any(|b| b.labels == vec!["salesforce.Fine"]));
    }

    #[test]
    fn test_multiline_string_trims_one_trailing_newline() {
        let blocks = parse_ok("salesforce.Account prod { body = '''line one\nline two\n''' }");
        match &blocks[0].attrs[0].value {
            Expr::Multiline { value, .. } => assert_eq!(value, "line one\nline two"),
            other => panic!("expected multiline, got {:?}", other),
        }
    }

    #[test]
    fn test_template_parts() {
        let blocks = parse_ok(r#"salesforce.Account prod { greeting = "hi ${var.name}!" }"#);
        match &blocks[0].attrs[0].value {
            Expr::Str { parts, .. } => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], TemplatePart::Literal("hi ".to_string()));
                assert_eq!(parts[1], TemplatePart::Reference("var.name".to_string()));
                assert_eq!(parts[2], TemplatePart::Literal("!".to_string()));
            }
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn test_escapes_decoded() {
        let blocks = parse_ok(r#"salesforce.Account prod { s = "a\tb\n\"q\"\\" }"#);
        match &blocks[0].attrs[0].value {
            Expr::Str { parts, .. } => {
                assert_eq!(parts[0], TemplatePart::Literal("a\tb\n\"q\"\\".to_string()));
            }
            other => panic!("expected string, got {:?}", other),
        }
    }
}

use logos::Logos;

/// Token types for the NaCl language
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token<'src> {
    #[token("true")]
    True,

    #[token("false")]
    False,

    // Bare identifiers: block types, labels, attribute keys
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice())]
    Word(&'src str),

    // Dotted paths: type names and references
    #[regex(
        r"[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_0-9][a-zA-Z0-9_]*)+",
        |lex| lex.slice()
    )]
    DottedWord(&'src str),

    // Multiline strings keep their content verbatim
    #[regex(r"'''([^']|'[^']|''[^'])*'''", |lex| lex.slice())]
    MultilineString(&'src str),

    // Quoted strings, escapes and ${...} interpolation handled at lowering
    #[regex(r#""([^"\\]|\\.)*""#, |lex| lex.slice())]
    String(&'src str),

    #[regex(r"-?[0-9]+(\.[0-9]+)?", |lex| lex.slice())]
    Number(&'src str),

    #[token("=")]
    Equals,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token(",")]
    Comma,

    #[token("<")]
    LAngle,

    #[token(">")]
    RAngle,

    // Only meaningful in error-recovery mode
    #[token("*")]
    Wildcard,
}

/// Tokenize source into (token, byte range) pairs, dropping unlexable
/// spans so the parser can report them from the gaps it encounters.
pub fn tokenize(source: &str) -> Vec<(Token<'_>, std::ops::Range<usize>)> {
    Token::lexer(source)
        .spanned()
        .filter_map(|(token, span)| token.ok().map(|t| (t, span)))
        .collect()
}

//! The token definition for the query language.

/// A token is a single unit of the language, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-based character position of the first non-blank character.
    pub position: usize,
    pub span: Span,
    /// First key of a bracketed item, e.g. the driver of `[Driver > Attribute]`.
    pub key1: Option<String>,
    /// Second key of a bracketed item, e.g. the attribute of `[Driver > Attribute]`.
    pub key2: Option<String>,
    /// Literal payload, already unescaped.
    pub value: Option<String>,
}

impl Token {
    pub fn new(kind: TokenKind, position: usize, span: Span) -> Self {
        Self { kind, position, span, key1: None, key2: None, value: None }
    }

    /// Literal payload, or an empty string for tokens that carry none.
    pub fn text(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }
}

/// The kind of a token, listed in matching priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Boolean keywords
    And,
    Or,
    Not,

    // Comparators
    Is,
    In,

    // Punctuation
    BracketIn,  // (
    BracketOut, // )

    // Comparators
    Contains,
    ContainsNoCase,
    Matches,
    StartsWith,
    EndsWith,
    Before,
    After,
    LessThan,
    GreaterThan,

    // Binary values
    True,
    False,

    // Items
    Ip,
    Mac,
    Module,
    Interface,
    Vrf,
    VirtualName,
    Id,
    Domain,
    Type,
    Driver,
    Diagnostic,    // [Diagnostic > key2]
    Rule,          // [Rule > key1 > key2]
    DriverAttr,    // [key1 > key2]
    GenericAttr,   // [key2]

    // Literals
    SubnetV4,
    Ipv4,
    SubnetV6,
    Ipv6,
    MacSubnet,
    MacAddress,
    QuotedText,
    NumericValue,
    EnumWord,
}

impl TokenKind {
    /// Canonical spelling used when re-rendering queries.
    pub fn command(&self) -> &'static str {
        match self {
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Not => "not",
            TokenKind::Is => "is",
            TokenKind::In => "in",
            TokenKind::BracketIn => "(",
            TokenKind::BracketOut => ")",
            TokenKind::Contains => "contains",
            TokenKind::ContainsNoCase => "containsnocase",
            TokenKind::Matches => "matches",
            TokenKind::StartsWith => "startswith",
            TokenKind::EndsWith => "endswith",
            TokenKind::Before => "before",
            TokenKind::After => "after",
            TokenKind::LessThan => "lessthan",
            TokenKind::GreaterThan => "greaterthan",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Ip => "IP",
            TokenKind::Mac => "MAC",
            TokenKind::Module => "Module",
            TokenKind::Interface => "Interface",
            TokenKind::Vrf => "VRF",
            TokenKind::VirtualName => "Virtual Name",
            TokenKind::Id => "ID",
            TokenKind::Domain => "Domain",
            TokenKind::Type => "Type",
            TokenKind::Driver => "Driver",
            TokenKind::Diagnostic => "Diagnostic",
            TokenKind::Rule => "Rule",
            _ => "",
        }
    }
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

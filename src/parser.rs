//! 查询语言的语法分析器
//!
//! ## 解析流程
//!
//! ```text
//! parse_level(tokens)              一个括号层级
//!   ├─ 括号折叠：顶层 ( ... ) 递归解析为 Node::Group
//!   ├─ 只有一个 Group → 直接返回
//!   ├─ NOT 只能出现在本层第一个位置
//!   └─ parse_nodes(nodes)
//!        ├─ 按顶层 OR 切分 → Or(segments)
//!        ├─ 按顶层 AND 切分 → And(segments)
//!        ├─ 以 NOT 开头 → Not(rest)
//!        └─ parse_leaf(tokens)     [Item] 运算符 值
//! ```
//!
//! ## 优先级（从高到低）
//!
//! 1. **括号分组** `(expression)`
//! 2. **NOT**，仅限括号层级的开头
//! 3. **AND**
//! 4. **OR**
//!
//! 叶子解析时完成注册表查找（驱动、属性、诊断、策略与规则），
//! 名称未知或不可搜索都是解析错误。

use regex::Regex;

use crate::ast::{AttributeRef, Expression, Operator, TextMatch, ValueCondition};
use crate::error::ParseError;
use crate::lexer::tokenize;
use crate::literal::{parse_number, CheckResult, Ipv4Network, Ipv6Network, MacAddress, TypedDate};
use crate::registry::{
    builtin_attribute, AttributeDefinition, AttributeType, DiagnosticResultType, ParseContext,
    PolicyRef,
};
use crate::sql_compiler::Query;
use crate::token::{Token, TokenKind};

/// 括号折叠后的节点
#[derive(Debug)]
enum Node<'t> {
    Token(&'t Token),
    Group { expression: Expression, position: usize },
}

impl Node<'_> {
    fn position(&self) -> usize {
        match self {
            Node::Token(token) => token.position,
            Node::Group { position, .. } => *position,
        }
    }

    fn is(&self, kind: TokenKind) -> bool {
        matches!(self, Node::Token(token) if token.kind == kind)
    }
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    context: ParseContext<'a>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token], context: ParseContext<'a>) -> Self {
        Parser { tokens, context }
    }

    /// 解析整个 token 序列，空输入得到 `Expression::Null`
    pub fn parse(&self) -> Result<Expression, ParseError> {
        if self.tokens.is_empty() {
            return Ok(Expression::Null);
        }
        self.parse_level(self.tokens)
    }

    fn parse_level(&self, tokens: &[Token]) -> Result<Expression, ParseError> {
        let mut nodes = Vec::new();
        let mut depth = 0usize;
        let mut start = 0;
        let mut opening = 0;
        for (i, token) in tokens.iter().enumerate() {
            match token.kind {
                TokenKind::BracketIn => {
                    if depth == 0 {
                        start = i + 1;
                        opening = token.position;
                    }
                    depth += 1;
                }
                TokenKind::BracketOut => {
                    if depth == 0 {
                        return Err(ParseError::at(
                            token.position,
                            "Parsing error, unexpected closing bracket.",
                        ));
                    }
                    depth -= 1;
                    if depth == 0 {
                        let expression = self.parse_level(&tokens[start..i])?;
                        nodes.push(Node::Group { expression, position: opening });
                    }
                }
                _ if depth > 0 => {}
                _ => nodes.push(Node::Token(token)),
            }
        }
        if depth > 0 {
            return Err(ParseError::at(opening, "Parsing error, missing closing bracket."));
        }
        if nodes.is_empty() {
            return Err(ParseError::new("Parsing error, no more token to parse"));
        }
        if let Some(misplaced) = nodes.iter().skip(1).find(|n| n.is(TokenKind::Not)) {
            let position = misplaced.position();
            return Err(ParseError::at(
                position,
                format!("Parsing error, misplaced NOT at character {position}."),
            ));
        }
        if nodes.len() == 1 && matches!(nodes[0], Node::Group { .. }) {
            if let Some(Node::Group { expression, .. }) = nodes.pop() {
                return Ok(expression);
            }
        }
        self.parse_nodes(&nodes)
    }

    fn parse_segment(&self, nodes: &[Node]) -> Result<Expression, ParseError> {
        match nodes {
            [Node::Group { expression, .. }] => Ok(expression.clone()),
            _ => self.parse_nodes(nodes),
        }
    }

    fn parse_nodes(&self, nodes: &[Node]) -> Result<Expression, ParseError> {
        if let Some(children) = self.split(nodes, TokenKind::Or, "OR")? {
            return Ok(Expression::Or(children));
        }
        if let Some(children) = self.split(nodes, TokenKind::And, "AND")? {
            return Ok(Expression::And(children));
        }
        if let Some((first, rest)) = nodes.split_first() {
            if first.is(TokenKind::Not) {
                if rest.is_empty() {
                    return Err(ParseError::at(
                        first.position(),
                        "Parsing error, no more token to parse",
                    ));
                }
                return Ok(Expression::Not(Box::new(self.parse_segment(rest)?)));
            }
        }

        let mut tokens = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Node::Token(token) => tokens.push(*token),
                Node::Group { position, .. } => return Err(ParseError::unrecognized(*position)),
            }
        }
        self.parse_leaf(&tokens)
    }

    /// 按顶层分隔符切分，没有分隔符时返回 `None`
    fn split(
        &self,
        nodes: &[Node],
        separator: TokenKind,
        word: &str,
    ) -> Result<Option<Vec<Expression>>, ParseError> {
        let mut children = Vec::new();
        let mut segment_start = 0;
        let mut last_separator = None;
        for (i, node) in nodes.iter().enumerate() {
            if !node.is(separator) {
                continue;
            }
            let position = node.position();
            if i == segment_start {
                return Err(ParseError::at(
                    position,
                    format!("Parsing error, nothing before {word} at character {position}."),
                ));
            }
            children.push(self.parse_segment(&nodes[segment_start..i])?);
            segment_start = i + 1;
            last_separator = Some(position);
        }
        let Some(position) = last_separator else {
            return Ok(None);
        };
        if segment_start == nodes.len() {
            return Err(ParseError::at(
                position,
                format!("Parsing error, nothing after last {word}."),
            ));
        }
        children.push(self.parse_segment(&nodes[segment_start..])?);
        Ok(Some(children))
    }

    fn parse_leaf(&self, tokens: &[&Token]) -> Result<Expression, ParseError> {
        let Some(item) = tokens.first() else {
            return Err(ParseError::new("Parsing error, no more token to parse"));
        };
        match item.kind {
            TokenKind::Module => Ok(Expression::Module(text_match(tokens, "MODULE")?)),
            TokenKind::Interface => Ok(Expression::Interface(text_match(tokens, "INTERFACE")?)),
            TokenKind::Vrf => Ok(Expression::Vrf(text_match(tokens, "VRF")?)),
            TokenKind::VirtualName => {
                Ok(Expression::VirtualName(text_match(tokens, "VIRTUALNAME")?))
            }
            TokenKind::Id => Ok(Expression::Device(identifier(tokens, "DEVICE")?)),
            TokenKind::Domain => Ok(Expression::Domain(identifier(tokens, "DOMAIN")?)),
            TokenKind::Type | TokenKind::Driver => {
                let condition = text_match(tokens, "TYPE")?;
                let drivers =
                    self.context.registry.drivers().into_iter().map(|d| d.to_ref()).collect();
                Ok(Expression::Driver { condition, drivers })
            }
            TokenKind::Ip => parse_ip(tokens),
            TokenKind::Mac => parse_mac(tokens),
            TokenKind::Diagnostic => self.parse_diagnostic(tokens),
            TokenKind::Rule => self.parse_rule(tokens),
            TokenKind::DriverAttr | TokenKind::GenericAttr => self.parse_attribute(tokens),
            _ => Err(ParseError::unrecognized(item.position)),
        }
    }

    fn parse_diagnostic(&self, tokens: &[&Token]) -> Result<Expression, ParseError> {
        let item = tokens[0];
        let name = item.key2.as_deref().unwrap_or("");
        let diagnostic = self.context.registry.diagnostic_by_name(name).ok_or_else(|| {
            ParseError::at(
                item.position,
                format!("Unknown diagnostic '{name}' at character {}.", item.position),
            )
        })?;
        let label = "DIAGNOSTIC";
        let condition = match diagnostic.result_type {
            DiagnosticResultType::Text | DiagnosticResultType::LongText => {
                ValueCondition::Text(text_match(tokens, label)?)
            }
            DiagnosticResultType::Numeric => numeric_condition(tokens, label)?,
            DiagnosticResultType::Binary => binary_condition(tokens, label)?,
        };
        Ok(Expression::Diagnostic { diagnostic: diagnostic.clone(), condition })
    }

    fn parse_rule(&self, tokens: &[&Token]) -> Result<Expression, ParseError> {
        let item = tokens[0];
        let policy_name = item.key1.as_deref().unwrap_or("");
        let rule_name = item.key2.as_deref().unwrap_or("");
        let registry = self.context.registry;
        let policy = registry.policy_by_name(policy_name).ok_or_else(|| {
            ParseError::at(
                item.position,
                format!("Unknown policy '{policy_name}' at character {}.", item.position),
            )
        })?;
        let rule = registry.rule_by_name(policy, rule_name).ok_or_else(|| {
            ParseError::at(
                item.position,
                format!(
                    "Unknown rule '{rule_name}' for policy '{policy_name}' at character {}.",
                    item.position
                ),
            )
        })?;
        let (op, value) = operands(tokens, "RULE")?;
        operator(op, &[Operator::Is], "RULE")?;
        let result = match value.kind {
            TokenKind::QuotedText | TokenKind::EnumWord => value.text().parse::<CheckResult>().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            ParseError::at(
                value.position,
                format!("Invalid value for rule result at character {}.", value.position),
            )
        })?;
        Ok(Expression::ComplianceRule {
            policy: PolicyRef { id: policy.id, name: policy.name.clone() },
            rule: rule.clone(),
            result,
        })
    }

    /// 解析属性引用：内置属性优先，其次是上下文驱动，或显式的 `[驱动 > 属性]`
    fn resolve_attribute(&self, item: &Token) -> Result<AttributeRef, ParseError> {
        let title = item.key2.as_deref().unwrap_or("");
        let position = item.position;
        let Some(description) = item.key1.as_deref() else {
            if let Some(definition) = builtin_attribute(title) {
                return Ok(AttributeRef { driver: None, definition: definition.clone() });
            }
            if let Some(driver) = self.context.driver {
                if let Some(definition) = driver.attribute_by_title(title) {
                    searchable(definition, &driver.description, position)?;
                    return Ok(AttributeRef {
                        driver: Some(driver.to_ref()),
                        definition: definition.clone(),
                    });
                }
            }
            return Err(ParseError::at(
                position,
                format!("Unknown configuration field [{title}] at character {position}."),
            ));
        };
        let driver = self.context.registry.driver_by_description(description).ok_or_else(|| {
            ParseError::at(
                position,
                format!("Parsing error at character {position}, unknown driver '{description}'."),
            )
        })?;
        let definition = driver.attribute_by_title(title).ok_or_else(|| {
            ParseError::at(
                position,
                format!(
                    "Parsing error at character {position}, attribute '{title}' of driver '{description}' does not exist."
                ),
            )
        })?;
        searchable(definition, description, position)?;
        Ok(AttributeRef { driver: Some(driver.to_ref()), definition: definition.clone() })
    }

    fn parse_attribute(&self, tokens: &[&Token]) -> Result<Expression, ParseError> {
        let attribute = self.resolve_attribute(tokens[0])?;
        let definition = &attribute.definition;
        let label = definition.title.as_str();
        let condition = match definition.attribute_type {
            AttributeType::Text | AttributeType::LongText => {
                ValueCondition::Text(text_match(tokens, label)?)
            }
            AttributeType::Date => date_condition(tokens, label)?,
            AttributeType::Enum => enum_condition(tokens, definition)?,
            AttributeType::Numeric => numeric_condition(tokens, label)?,
            AttributeType::Binary => binary_condition(tokens, label)?,
        };
        Ok(Expression::Attribute { attribute, condition })
    }
}

fn searchable(
    definition: &AttributeDefinition,
    driver: &str,
    position: usize,
) -> Result<(), ParseError> {
    if definition.searchable {
        return Ok(());
    }
    Err(ParseError::at(
        position,
        format!(
            "Parsing error at character {position}, attribute '{}' of driver '{driver}' is not searchable.",
            definition.title
        ),
    ))
}

/// 叶子必须恰好是 `[Item] 运算符 值`
fn operands<'t>(tokens: &[&'t Token], label: &str) -> Result<(&'t Token, &'t Token), ParseError> {
    match tokens {
        [_, op, value] => Ok((*op, *value)),
        [item, ..] => Err(ParseError::at(
            item.position,
            format!(
                "Incomplete or incorrect expression after {label} item at character {}.",
                item.position
            ),
        )),
        [] => Err(ParseError::new("Parsing error, no more token to parse")),
    }
}

fn operator(token: &Token, allowed: &[Operator], label: &str) -> Result<Operator, ParseError> {
    Operator::from_token(token.kind).filter(|op| allowed.contains(op)).ok_or_else(|| {
        ParseError::at(
            token.position,
            format!("Invalid operator after {label} at character {}.", token.position),
        )
    })
}

fn text_match(tokens: &[&Token], label: &str) -> Result<TextMatch, ParseError> {
    let (op, value) = operands(tokens, label)?;
    let op = operator(op, Operator::TEXT, label)?;
    if value.kind != TokenKind::QuotedText {
        return Err(ParseError::at(
            value.position,
            format!("Expecting a quoted string for {label} at character {}.", value.position),
        ));
    }
    if op == Operator::Matches && Regex::new(value.text()).is_err() {
        return Err(ParseError::at(
            value.position,
            format!("Parsing error, invalid regular expression at character {}.", value.position),
        ));
    }
    Ok(TextMatch::new(op, value.text()))
}

fn identifier(tokens: &[&Token], label: &str) -> Result<i64, ParseError> {
    let (op, value) = operands(tokens, label)?;
    operator(op, &[Operator::Is], label)?;
    let id = match value.kind {
        TokenKind::NumericValue => value.text().replace(',', "").parse::<i64>().ok(),
        _ => None,
    };
    id.ok_or_else(|| {
        ParseError::at(
            value.position,
            format!("Expecting a numeric value for {label} at character {}.", value.position),
        )
    })
}

fn date_condition(tokens: &[&Token], label: &str) -> Result<ValueCondition, ParseError> {
    let (op, value) = operands(tokens, label)?;
    let op = operator(op, Operator::DATE, label)?;
    if value.kind != TokenKind::QuotedText {
        return Err(ParseError::at(
            value.position,
            format!("Expecting a quoted date for {label} at character {}.", value.position),
        ));
    }
    let date = TypedDate::parse(value.text()).ok_or_else(|| {
        ParseError::at(
            value.position,
            format!("Invalid date/time at position {}.", value.position),
        )
    })?;
    Ok(ValueCondition::Date { op, value: date })
}

fn enum_condition(
    tokens: &[&Token],
    definition: &AttributeDefinition,
) -> Result<ValueCondition, ParseError> {
    let label = definition.title.as_str();
    let (op, value) = operands(tokens, label)?;
    operator(op, &[Operator::Is], label)?;
    let valid = matches!(value.kind, TokenKind::QuotedText | TokenKind::EnumWord)
        && definition.choices.iter().any(|c| c == value.text());
    if !valid {
        return Err(ParseError::at(
            value.position,
            format!("Invalid value for item {label} at character {}.", value.position),
        ));
    }
    Ok(ValueCondition::Enum(value.text().to_string()))
}

fn numeric_condition(tokens: &[&Token], label: &str) -> Result<ValueCondition, ParseError> {
    let (op, value) = operands(tokens, label)?;
    let op = operator(op, Operator::NUMERIC, label)?;
    let number = match value.kind {
        TokenKind::NumericValue => parse_number(value.text()),
        _ => None,
    };
    let value = number.ok_or_else(|| {
        ParseError::at(
            value.position,
            format!("Expecting a numeric value for {label} at character {}.", value.position),
        )
    })?;
    Ok(ValueCondition::Numeric { op, value })
}

fn binary_condition(tokens: &[&Token], label: &str) -> Result<ValueCondition, ParseError> {
    let (op, value) = operands(tokens, label)?;
    operator(op, &[Operator::Is], label)?;
    match value.kind {
        TokenKind::True => Ok(ValueCondition::Binary(true)),
        TokenKind::False => Ok(ValueCondition::Binary(false)),
        _ => Err(ParseError::at(
            value.position,
            format!("Expecting true or false for {label} at character {}.", value.position),
        )),
    }
}

fn parse_ip(tokens: &[&Token]) -> Result<Expression, ParseError> {
    let (op_token, value) = operands(tokens, "IP")?;
    let invalid_address = || {
        ParseError::at(
            value.position,
            format!("Invalid IP address or subnet at character {}.", value.position),
        )
    };
    match value.kind {
        TokenKind::Ipv4 | TokenKind::SubnetV4 => {
            let with_mask = value.kind == TokenKind::SubnetV4;
            let allowed: &[Operator] = if with_mask {
                &[Operator::Is, Operator::In]
            } else {
                &[Operator::Is, Operator::Contains]
            };
            let op = operator(op_token, allowed, "IP")?;
            let target = Ipv4Network::parse(value.text()).ok_or_else(invalid_address)?;
            Ok(Expression::Ipv4 { op, target, with_mask })
        }
        TokenKind::Ipv6 | TokenKind::SubnetV6 => {
            let with_mask = value.kind == TokenKind::SubnetV6;
            let allowed: &[Operator] =
                if with_mask { &[Operator::Is, Operator::In] } else { &[Operator::Is] };
            let op = operator(op_token, allowed, "IP")?;
            let target = Ipv6Network::parse(value.text()).ok_or_else(invalid_address)?;
            Ok(Expression::Ipv6 { op, target, with_mask })
        }
        _ => Err(ParseError::at(
            value.position,
            format!("Expecting an IP address or subnet at character {}.", value.position),
        )),
    }
}

fn parse_mac(tokens: &[&Token]) -> Result<Expression, ParseError> {
    let (op_token, value) = operands(tokens, "MAC")?;
    let invalid = || {
        ParseError::at(
            value.position,
            format!("Invalid MAC address or subnet at character {}.", value.position),
        )
    };
    match value.kind {
        TokenKind::MacAddress => {
            let op = operator(op_token, &[Operator::Is], "MAC")?;
            let target = MacAddress::parse(value.text()).ok_or_else(invalid)?;
            Ok(Expression::Mac { op, target, prefix_length: None })
        }
        TokenKind::MacSubnet => {
            let op = operator(op_token, &[Operator::In], "MAC")?;
            let (address, length) = value.text().split_once('/').ok_or_else(invalid)?;
            let target = MacAddress::parse(address).ok_or_else(invalid)?;
            let length: u8 = length.parse().ok().filter(|l| *l <= 48).ok_or_else(invalid)?;
            Ok(Expression::Mac { op, target, prefix_length: Some(length) })
        }
        _ => Err(ParseError::at(
            value.position,
            format!("Expecting a MAC address or subnet at character {}.", value.position),
        )),
    }
}

/// 词法分析加语法分析，得到可编译、可执行的查询
pub fn parse_query(text: &str, context: &ParseContext) -> Result<Query, ParseError> {
    let tokens = tokenize(text)?;
    let expression = Parser::new(&tokens, *context).parse()?;
    Ok(Query::new(expression))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{sample_registry, InMemoryRegistry, Registry};

    fn parse_with(registry: &InMemoryRegistry, input: &str) -> Result<Expression, ParseError> {
        parse_query(input, &ParseContext::new(registry)).map(|q| q.expression().clone())
    }

    fn parse(input: &str) -> Expression {
        parse_with(&sample_registry(), input).unwrap()
    }

    fn parse_err(input: &str) -> ParseError {
        parse_with(&sample_registry(), input).unwrap_err()
    }

    fn canonical(input: &str) -> String {
        parse(input).to_string()
    }

    #[test]
    fn test_empty_query_is_null() {
        assert_eq!(parse(""), Expression::Null);
        assert_eq!(parse("   "), Expression::Null);
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let flat = parse(r#"[Name] IS "a" OR [Name] IS "b" AND [Name] IS "c""#);
        let grouped = parse(r#"([Name] IS "a") OR (([Name] IS "b") AND ([Name] IS "c"))"#);
        assert_eq!(flat, grouped);
        match flat {
            Expression::Or(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(&children[1], Expression::And(c) if c.len() == 2));
            }
            other => panic!("expected OR, got {other:?}"),
        }
    }

    #[test]
    fn test_not_placement() {
        let err = parse_err(r#"[Name] IS "a" AND NOT [Name] IS "b""#);
        assert_eq!(err.position, Some(19));
        assert!(err.message.contains("misplaced NOT"));

        assert!(matches!(parse(r#"NOT ([Name] IS "a")"#), Expression::Not(_)));
        assert!(matches!(parse(r#"NOT [Name] IS "a""#), Expression::Not(_)));

        let nested = parse(r#"[Name] IS "a" AND (NOT [Name] IS "b")"#);
        assert!(matches!(&nested, Expression::And(c) if matches!(c[1], Expression::Not(_))));
        assert!(parse_with(&sample_registry(), r#"NOT NOT [Name] IS "a""#).is_err());
    }

    #[test]
    fn test_unknown_token_position() {
        let err = parse_err(r#"[Name] ISS "x""#);
        assert_eq!(err.position, Some(8));
    }

    #[test]
    fn test_bracket_errors() {
        let err = parse_err(r#"[Name] is "a")"#);
        assert_eq!(err.message, "Parsing error, unexpected closing bracket.");
        let err = parse_err(r#"(([Name] is "a")"#);
        assert_eq!(err.message, "Parsing error, missing closing bracket.");
        let err = parse_err("()");
        assert_eq!(err.message, "Parsing error, no more token to parse");
    }

    #[test]
    fn test_empty_operands() {
        let err = parse_err(r#"AND [Name] is "a""#);
        assert_eq!(err.message, "Parsing error, nothing before AND at character 1.");
        let err = parse_err(r#"[Name] is "a" OR"#);
        assert_eq!(err.message, "Parsing error, nothing after last OR.");
        let err = parse_err(r#"[Name] is "a" OR OR [Name] is "b""#);
        assert_eq!(err.position, Some(18));
    }

    #[test]
    fn test_canonical_rendering() {
        assert_eq!(
            canonical(
                r#"[NAME] STARTSWITH "router0001" OR [NAME] STARTSWITH "router0002" AND ([NAME] IS "router00010")"#
            ),
            r#"([Name] startswith "router0001") or (([Name] startswith "router0002") and ([Name] is "router00010"))"#
        );
        assert_eq!(canonical(r#"[CREATION DATE] IS "TODAY - 1 D""#), r#"[Creation Date] is "Today -1d""#);
        assert_eq!(canonical("[device] is 1,042"), "[ID] is 1042");
        assert_eq!(canonical(r#"[driver] is "Juniper Junos""#), r#"[Type] is "Juniper Junos""#);
        assert_eq!(canonical("[ip] CONTAINS 10.0.0.1"), "[IP] contains 10.0.0.1");
        assert_eq!(canonical("[Status] is INPRODUCTION"), r#"[Status] is "INPRODUCTION""#);
    }

    #[test]
    fn test_canonicalization_is_idempotent() {
        let queries = [
            r#"[Name] contains "core" and (not [Module] containsnocase "WS-C")"#,
            r#"NOT ([Software Level] is "GOLD") OR [Interface] endswith "0/1""#,
            r#"[IP] in 10.0.0.0/24 or [IP] is 2001:db8::/32 or [MAC] in 0011.2233.4455/24"#,
            r#"[Cisco IOS and IOS-XE > IOS image file] matches "^c[0-9]+\\.bin$""#,
            r#"[Cisco IOS and IOS-XE > Configuration saved] is false and [Domain] is 2"#,
            r#"[Diagnostic > CPU Usage] greaterthan 80.5 and [Diagnostic > Is Reachable] is true"#,
            r#"[Rule > Security > NoTelnet] is NONCONFORMING"#,
            r#"[Creation Date] before "Now -7d +2h" and [End of Life Date] after "2024-01-31""#,
            r#"[Comments] is "quote \" and backslash \\""#,
            r#"[VRF] is "blue" and [Virtual Name] startswith "ctx" and [Type] contains "IOS""#,
        ];
        let registry = sample_registry();
        for query in queries {
            let first = parse_with(&registry, query).unwrap();
            let rendered = first.to_string();
            let second = parse_with(&registry, &rendered).unwrap();
            assert_eq!(first, second, "{query} => {rendered}");
            assert_eq!(second.to_string(), rendered);
        }
    }

    #[test]
    fn test_ipv4_mapped_ipv6_round_trip() {
        let registry = sample_registry();
        for (query, expected) in [
            ("[IP] is ::ffff:a00:1", "[IP] is ::ffff:10.0.0.1"),
            ("[IP] is ::ffff:10.0.0.1", "[IP] is ::ffff:10.0.0.1"),
            ("[IP] in ::ffff:a00:0/104", "[IP] in ::ffff:10.0.0.0/104"),
        ] {
            let first = parse_with(&registry, query).unwrap();
            assert!(matches!(first, Expression::Ipv6 { .. }), "{query}");
            assert_eq!(first.to_string(), expected);
            let second = parse_with(&registry, expected).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_leaf_validation() {
        let err = parse_err(r#"[Name] lessthan "a""#);
        assert_eq!(err.message, "Invalid operator after Name at character 8.");
        let err = parse_err("[Name] is 12");
        assert_eq!(err.position, Some(11));
        let err = parse_err(r#"[Name] is "a" "b""#);
        assert!(err.message.starts_with("Incomplete or incorrect expression after Name"));
        let err = parse_err(r#"[Name] matches "(unclosed""#);
        assert!(err.message.contains("invalid regular expression"));
        let err = parse_err("[IP] in 10.0.0.1");
        assert!(err.message.starts_with("Invalid operator after IP"));
        let err = parse_err("[IP] contains 2001:db8::1");
        assert!(err.message.starts_with("Invalid operator after IP"));
        let err = parse_err("[MAC] is 0011.2233.4455/24");
        assert!(err.message.starts_with("Invalid operator after MAC"));
        let err = parse_err(r#"[Creation Date] is "yesterday""#);
        assert_eq!(err.message, "Invalid date/time at position 20.");
        let err = parse_err(r#"[Status] is "RETIRED""#);
        assert_eq!(err.message, "Invalid value for item Status at character 13.");
        let err = parse_err(r#"[Status] is "inproduction""#);
        assert!(err.message.starts_with("Invalid value for item Status"));
        let err = parse_err(r#"is "a""#);
        assert_eq!(err.message, "Parsing error at character 1.");
    }

    #[test]
    fn test_address_leaves() {
        match parse("[IP] is 10.0.0.0/24") {
            Expression::Ipv4 { op, target, with_mask } => {
                assert_eq!(op, Operator::Is);
                assert!(with_mask);
                assert_eq!(target.prefix_length, 24);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(parse("[IP] is fe80::1"), Expression::Ipv6 { with_mask: false, .. }));
        assert!(matches!(
            parse("[MAC] in 0011.2233.4455/0"),
            Expression::Mac { prefix_length: Some(0), .. }
        ));
    }

    #[test]
    fn test_registry_resolution() {
        let err = parse_err(r#"[Serial] is "x""#);
        assert_eq!(err.message, "Unknown configuration field [Serial] at character 1.");
        let err = parse_err(r#"[Arista EOS > Serial] is "x""#);
        assert!(err.message.contains("unknown driver 'Arista EOS'"));
        let err = parse_err(r#"[Cisco IOS and IOS-XE > Serial] is "x""#);
        assert!(err.message.contains("does not exist"));
        let err = parse_err(r#"[Cisco IOS and IOS-XE > Running config] contains "x""#);
        assert!(err.message.contains("is not searchable"));
        let err = parse_err(r#"[Diagnostic > Memory] is "x""#);
        assert_eq!(err.message, "Unknown diagnostic 'Memory' at character 1.");
        let err = parse_err(r#"[Rule > Unknown > NoTelnet] is "CONFORMING""#);
        assert!(err.message.starts_with("Unknown policy 'Unknown'"));
        let err = parse_err(r#"[Rule > Security > Missing] is "CONFORMING""#);
        assert!(err.message.starts_with("Unknown rule 'Missing' for policy 'Security'"));
        let err = parse_err(r#"[Rule > Security > NoTelnet] is "BROKEN""#);
        assert!(err.message.starts_with("Invalid value for rule result"));
    }

    #[test]
    fn test_driver_context_resolves_bare_attribute() {
        let registry = sample_registry();
        let driver = registry.driver_by_name("CiscoIOS12").unwrap();
        let context = ParseContext::with_driver(&registry, Some(driver));
        let query = parse_query("[Main memory size] greaterthan 512", &context).unwrap();
        match query.expression() {
            Expression::Attribute { attribute, .. } => {
                assert_eq!(attribute.driver.as_ref().unwrap().name, "CiscoIOS12");
                assert_eq!(attribute.definition.name, "mainMemorySize");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            query.canonical_text(),
            "[Cisco IOS and IOS-XE > Main memory size] greaterthan 512"
        );
        assert!(parse_with(&registry, "[Main memory size] greaterthan 512").is_err());
    }

    #[test]
    fn test_typed_attribute_conditions() {
        match parse("[Cisco IOS and IOS-XE > Boot mode] is ROMMON") {
            Expression::Attribute { condition, .. } => {
                assert_eq!(condition, ValueCondition::Enum("ROMMON".into()))
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse("[Diagnostic > CPU Usage] lessthan 1,000.5") {
            Expression::Diagnostic { diagnostic, condition } => {
                assert_eq!(diagnostic.id, 2);
                assert_eq!(
                    condition,
                    ValueCondition::Numeric { op: Operator::LessThan, value: 1000.5 }
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse(r#"[RULE > Security > NoTelnet] IS "NONCONFORMING""#) {
            Expression::ComplianceRule { policy, rule, result } => {
                assert_eq!((policy.id, rule.id), (10, 100));
                assert_eq!(result, CheckResult::NonConforming);
            }
            other => panic!("unexpected {other:?}"),
        }
        let types: Vec<_> = match parse(r#"[Type] is "Juniper Junos""#) {
            Expression::Driver { drivers, .. } => drivers.into_iter().map(|d| d.name).collect(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(types, ["CiscoIOS12", "JuniperJunos"]);
    }
}

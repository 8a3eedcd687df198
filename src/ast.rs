//! 查询表达式树
//!
//! 组合节点（And/Or/Not）与每种可查询项对应的叶子节点。叶子在解析阶段
//! 已经完成了注册表解析，持有驱动、诊断、规则等句柄。
//! `Display` 输出规范文本：重新解析规范文本得到结构相同的树。

use std::fmt;

use crate::lexer::{escape_key, escape_value};
use crate::literal::{format_number, CheckResult, Ipv4Network, Ipv6Network, MacAddress, TypedDate};
use crate::registry::{AttributeDefinition, Diagnostic, DriverRef, PolicyRef, Rule};
use crate::token::TokenKind;

/// 叶子表达式的比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Is,
    In,
    Contains,
    ContainsNoCase,
    Matches,
    StartsWith,
    EndsWith,
    Before,
    After,
    LessThan,
    GreaterThan,
}

impl Operator {
    pub fn from_token(kind: TokenKind) -> Option<Self> {
        let op = match kind {
            TokenKind::Is => Operator::Is,
            TokenKind::In => Operator::In,
            TokenKind::Contains => Operator::Contains,
            TokenKind::ContainsNoCase => Operator::ContainsNoCase,
            TokenKind::Matches => Operator::Matches,
            TokenKind::StartsWith => Operator::StartsWith,
            TokenKind::EndsWith => Operator::EndsWith,
            TokenKind::Before => Operator::Before,
            TokenKind::After => Operator::After,
            TokenKind::LessThan => Operator::LessThan,
            TokenKind::GreaterThan => Operator::GreaterThan,
            _ => return None,
        };
        Some(op)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Operator::Is => "is",
            Operator::In => "in",
            Operator::Contains => "contains",
            Operator::ContainsNoCase => "containsnocase",
            Operator::Matches => "matches",
            Operator::StartsWith => "startswith",
            Operator::EndsWith => "endswith",
            Operator::Before => "before",
            Operator::After => "after",
            Operator::LessThan => "lessthan",
            Operator::GreaterThan => "greaterthan",
        }
    }

    /// 文本类条件允许的运算符
    pub const TEXT: &'static [Operator] = &[
        Operator::Is,
        Operator::Contains,
        Operator::ContainsNoCase,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Matches,
    ];

    pub const DATE: &'static [Operator] = &[Operator::Is, Operator::Before, Operator::After];

    pub const NUMERIC: &'static [Operator] =
        &[Operator::Is, Operator::LessThan, Operator::GreaterThan];
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// 文本比较：运算符加已反转义的文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    pub op: Operator,
    pub value: String,
}

impl TextMatch {
    pub fn new(op: Operator, value: impl Into<String>) -> Self {
        Self { op, value: value.into() }
    }
}

impl fmt::Display for TextMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.op, escape_value(&self.value))
    }
}

/// 属性或诊断结果上的条件
#[derive(Debug, Clone, PartialEq)]
pub enum ValueCondition {
    Text(TextMatch),
    Date { op: Operator, value: TypedDate },
    Enum(String),
    Numeric { op: Operator, value: f64 },
    Binary(bool),
}

impl fmt::Display for ValueCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueCondition::Text(m) => m.fmt(f),
            ValueCondition::Date { op, value } => {
                write!(f, "{} \"{}\"", op, escape_value(&value.text()))
            }
            ValueCondition::Enum(value) => {
                write!(f, "{} \"{}\"", Operator::Is, escape_value(value))
            }
            ValueCondition::Numeric { op, value } => write!(f, "{} {}", op, format_number(*value)),
            ValueCondition::Binary(value) => write!(f, "{} {}", Operator::Is, value),
        }
    }
}

/// 被查询的属性：内置属性没有驱动
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRef {
    pub driver: Option<DriverRef>,
    pub definition: AttributeDefinition,
}

/// 查询表达式
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// 空查询，恒为真
    Null,
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    /// 未移除模块的序列号或料号
    Module(TextMatch),
    /// 接口名或接口描述
    Interface(TextMatch),
    Vrf(TextMatch),
    /// 虚拟设备名或设备名
    VirtualName(TextMatch),
    Device(i64),
    Domain(i64),
    /// 按驱动描述匹配，保存解析时的驱动列表快照
    Driver { condition: TextMatch, drivers: Vec<DriverRef> },
    Ipv4 { op: Operator, target: Ipv4Network, with_mask: bool },
    Ipv6 { op: Operator, target: Ipv6Network, with_mask: bool },
    Mac { op: Operator, target: MacAddress, prefix_length: Option<u8> },
    Diagnostic { diagnostic: Diagnostic, condition: ValueCondition },
    ComplianceRule { policy: PolicyRef, rule: Rule, result: CheckResult },
    Attribute { attribute: AttributeRef, condition: ValueCondition },
}

impl Expression {
    pub fn is_null(&self) -> bool {
        matches!(self, Expression::Null)
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[Expression], sep: &str) -> fmt::Result {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, " {sep} ")?;
        }
        write!(f, "({child})")?;
    }
    Ok(())
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Null => Ok(()),
            Expression::And(children) => write_joined(f, children, "and"),
            Expression::Or(children) => write_joined(f, children, "or"),
            Expression::Not(child) => write!(f, "not ({child})"),
            Expression::Module(m) => write!(f, "[Module] {m}"),
            Expression::Interface(m) => write!(f, "[Interface] {m}"),
            Expression::Vrf(m) => write!(f, "[VRF] {m}"),
            Expression::VirtualName(m) => write!(f, "[Virtual Name] {m}"),
            Expression::Device(id) => write!(f, "[ID] is {id}"),
            Expression::Domain(id) => write!(f, "[Domain] is {id}"),
            Expression::Driver { condition, .. } => write!(f, "[Type] {condition}"),
            Expression::Ipv4 { op, target, with_mask } => {
                let text = if *with_mask { target.prefix() } else { target.ip() };
                write!(f, "[IP] {op} {text}")
            }
            Expression::Ipv6 { op, target, with_mask } => {
                let text = if *with_mask { target.prefix() } else { target.ip() };
                write!(f, "[IP] {op} {text}")
            }
            Expression::Mac { op, target, prefix_length } => match prefix_length {
                Some(len) => write!(f, "[MAC] {op} {target}/{len}"),
                None => write!(f, "[MAC] {op} {target}"),
            },
            Expression::Diagnostic { diagnostic, condition } => {
                write!(f, "[Diagnostic > {}] {}", escape_key(&diagnostic.name), condition)
            }
            Expression::ComplianceRule { policy, rule, result } => write!(
                f,
                "[Rule > {} > {}] is \"{}\"",
                escape_key(&policy.name),
                escape_key(&rule.name),
                result
            ),
            Expression::Attribute { attribute, condition } => match &attribute.driver {
                Some(driver) => write!(
                    f,
                    "[{} > {}] {}",
                    escape_key(&driver.description),
                    escape_key(&attribute.definition.title),
                    condition
                ),
                None => write!(f, "[{}] {}", escape_key(&attribute.definition.title), condition),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::builtin_attribute;

    fn name_is(value: &str) -> Expression {
        Expression::Attribute {
            attribute: AttributeRef {
                driver: None,
                definition: builtin_attribute("Name").unwrap().clone(),
            },
            condition: ValueCondition::Text(TextMatch::new(Operator::Is, value)),
        }
    }

    #[test]
    fn test_render_composites() {
        let expr = Expression::Or(vec![
            name_is("a"),
            Expression::And(vec![name_is("b"), Expression::Not(Box::new(name_is("c")))]),
        ]);
        assert_eq!(
            expr.to_string(),
            r#"([Name] is "a") or (([Name] is "b") and (not ([Name] is "c")))"#
        );
        assert_eq!(Expression::Null.to_string(), "");
    }

    #[test]
    fn test_render_escapes_values_and_keys() {
        assert_eq!(name_is(r#"say "hi" \o/"#).to_string(), r#"[Name] is "say \"hi\" \\o/""#);
        let expr = Expression::ComplianceRule {
            policy: PolicyRef { id: 1, name: "A > B".into() },
            rule: Rule { id: 2, name: "x]y".into() },
            result: CheckResult::NonConforming,
        };
        assert_eq!(expr.to_string(), r#"[Rule > A \> B > x\]y] is "NONCONFORMING""#);
    }

    #[test]
    fn test_render_addresses() {
        let subnet = Expression::Ipv4 {
            op: Operator::In,
            target: Ipv4Network::parse("10.0.0.0/24").unwrap(),
            with_mask: true,
        };
        assert_eq!(subnet.to_string(), "[IP] in 10.0.0.0/24");
        let host = Expression::Ipv4 {
            op: Operator::Is,
            target: Ipv4Network::parse("10.0.0.1").unwrap(),
            with_mask: false,
        };
        assert_eq!(host.to_string(), "[IP] is 10.0.0.1");
        let mac = Expression::Mac {
            op: Operator::In,
            target: MacAddress::parse("0011.2233.4455").unwrap(),
            prefix_length: Some(24),
        };
        assert_eq!(mac.to_string(), "[MAC] in 0011.2233.4455/24");
    }

    #[test]
    fn test_render_value_conditions() {
        let numeric = ValueCondition::Numeric { op: Operator::GreaterThan, value: 80.0 };
        assert_eq!(numeric.to_string(), "greaterthan 80");
        assert_eq!(ValueCondition::Binary(false).to_string(), "is false");
        assert_eq!(ValueCondition::Enum("GOLD".into()).to_string(), "is \"GOLD\"");
        let date = ValueCondition::Date {
            op: Operator::Before,
            value: TypedDate::Now { days: -7, hours: 0 },
        };
        assert_eq!(date.to_string(), "before \"Now -7d\"");
    }
}

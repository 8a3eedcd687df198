//! 使用 sea-query 将表达式树编译为 SQL
//!
//! 每个节点用层级前缀命名自己的参数：根前缀为 `var`，组合节点的第 i 个子节点
//! 使用 `前缀_i`，NOT 的子节点固定使用 `前缀_0`，因此整棵树中参数名不会冲突。
//! 参数以 `:名称` 的形式写入 SQL，由存储层按名称绑定。

use chrono::{DateTime, Local};
use sea_query::{
    Alias, BinOper, Expr, Func, Iden, JoinType, Order, SelectStatement, SimpleExpr,
    SqliteQueryBuilder, Value,
};

use crate::ast::{AttributeRef, Expression, Operator, TextMatch, ValueCondition};
use crate::error::StoreError;
use crate::literal::{Ipv4Network, Ipv6Network, Ipv6Range, MacAddress};
use crate::registry::AttributeLevel;
use crate::store::DeviceStore;

/// 根节点的参数前缀
pub const ROOT_PREFIX: &str = "var";
/// 驱动过滤条件的参数名
pub const DRIVER_FILTER: &str = "driver_filter";
/// 设备表别名
const DEVICE_ALIAS: &str = "d";

/// 表名
#[derive(Debug, Clone, Copy)]
pub enum Table {
    Device,
    NetworkInterface,
    InterfaceIpv4,
    InterfaceIpv6,
    DeviceModule,
    DeviceVrf,
    DeviceVirtualName,
    DeviceAttribute,
    Config,
    ConfigAttribute,
    DiagnosticResult,
    CheckResult,
}

impl Iden for Table {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let name = match self {
            Table::Device => "device",
            Table::NetworkInterface => "network_interface",
            Table::InterfaceIpv4 => "interface_ipv4",
            Table::InterfaceIpv6 => "interface_ipv6",
            Table::DeviceModule => "device_module",
            Table::DeviceVrf => "device_vrf",
            Table::DeviceVirtualName => "device_virtual_name",
            Table::DeviceAttribute => "device_attribute",
            Table::Config => "config",
            Table::ConfigAttribute => "config_attribute",
            Table::DiagnosticResult => "diagnostic_result",
            Table::CheckResult => "check_result",
        };
        write!(s, "{}", name).unwrap();
    }
}

/// 列名
#[derive(Debug, Clone, Copy)]
pub enum Column {
    Id,
    Name,
    Driver,
    DomainId,
    MgmtAddress,
    MgmtPrefixLength,
    LastConfigId,
    DeviceId,
    InterfaceId,
    InterfaceName,
    Description,
    MacAddress,
    Address,
    Address1,
    Address2,
    PrefixLength,
    SerialNumber,
    PartNumber,
    Removed,
    ConfigId,
    Text,
    Number,
    Assumption,
    Moment,
    Choice,
    DiagnosticId,
    RuleId,
    Result,
}

impl Iden for Column {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let name = match self {
            Column::Id => "id",
            Column::Name => "name",
            Column::Driver => "driver",
            Column::DomainId => "domain_id",
            Column::MgmtAddress => "mgmt_address",
            Column::MgmtPrefixLength => "mgmt_prefix_length",
            Column::LastConfigId => "last_config_id",
            Column::DeviceId => "device_id",
            Column::InterfaceId => "interface_id",
            Column::InterfaceName => "interface_name",
            Column::Description => "description",
            Column::MacAddress => "mac_address",
            Column::Address => "address",
            Column::Address1 => "address1",
            Column::Address2 => "address2",
            Column::PrefixLength => "prefix_length",
            Column::SerialNumber => "serial_number",
            Column::PartNumber => "part_number",
            Column::Removed => "removed",
            Column::ConfigId => "config_id",
            Column::Text => "text",
            Column::Number => "number",
            Column::Assumption => "assumption",
            Column::Moment => "moment",
            Column::Choice => "choice",
            Column::DiagnosticId => "diagnostic_id",
            Column::RuleId => "rule_id",
            Column::Result => "result",
        };
        write!(s, "{}", name).unwrap();
    }
}

/// 按名称绑定的参数，保持绑定顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    bindings: Vec<(String, Value)>,
}

impl Parameters {
    /// 绑定一个参数，返回 SQL 中的占位符 `:name`
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<Value>) -> SimpleExpr {
        let name = name.into();
        let placeholder = Expr::custom_keyword(Alias::new(format!(":{name}"))).into();
        self.bindings.push((name, value.into()));
        placeholder
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> Vec<&str> {
        self.bindings.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// 编译结果：选择设备 ID 的语句加参数
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub statement: SelectStatement,
    pub parameters: Parameters,
}

impl CompiledQuery {
    pub fn sql(&self) -> String {
        self.statement.to_string(SqliteQueryBuilder)
    }
}

/// 解析得到的查询：表达式树及其规范文本
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    expression: Expression,
    canonical_text: String,
}

impl Query {
    pub fn new(expression: Expression) -> Self {
        let canonical_text = expression.to_string();
        Self { expression, canonical_text }
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    pub fn canonical_text(&self) -> &str {
        &self.canonical_text
    }

    /// `[ID] is device and (query)`，用于单台设备的增量检查
    pub fn restricted_to(&self, device_id: i64) -> Query {
        let device = Expression::Device(device_id);
        match &self.expression {
            Expression::Null => Query::new(device),
            other => Query::new(Expression::And(vec![device, other.clone()])),
        }
    }

    pub fn compile(&self, driver_filter: Option<&str>) -> CompiledQuery {
        SqlCompiler::new().compile(&self.expression, driver_filter)
    }

    pub fn to_sql(&self) -> String {
        self.compile(None).sql()
    }

    /// 在设备存储上执行，返回按 ID 排序的设备
    pub fn execute<S: DeviceStore + ?Sized>(
        &self,
        store: &S,
        driver_filter: Option<&str>,
    ) -> Result<Vec<i64>, StoreError> {
        store.find_devices(&self.compile(driver_filter))
    }
}

fn device() -> Alias {
    Alias::new(DEVICE_ALIAS)
}

fn col(table: &Alias, column: Column) -> Expr {
    Expr::col((table.clone(), column))
}

fn always() -> SimpleExpr {
    Expr::cust("1 = 1")
}

fn never() -> SimpleExpr {
    Expr::cust("1 = 0")
}

/// `d.id IN (子查询)`
fn device_in(subquery: &SelectStatement) -> SimpleExpr {
    col(&device(), Column::Id).in_subquery(subquery.to_owned())
}

fn like_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// 按运算符生成绑定值：LIKE 类运算符加上通配符
fn bind_text(m: &TextMatch, name: &str, params: &mut Parameters) -> SimpleExpr {
    let value = match m.op {
        Operator::Contains => format!("%{}%", like_escape(&m.value)),
        Operator::ContainsNoCase => format!("%{}%", like_escape(&m.value.to_lowercase())),
        Operator::StartsWith => format!("{}%", like_escape(&m.value)),
        Operator::EndsWith => format!("%{}", like_escape(&m.value)),
        _ => m.value.clone(),
    };
    params.bind(name, value)
}

fn like(target: SimpleExpr, pattern: &SimpleExpr) -> SimpleExpr {
    Expr::expr(target).binary(
        BinOper::Like,
        pattern.clone().binary(BinOper::Escape, Expr::val("\\")),
    )
}

fn text_condition(target: SimpleExpr, op: Operator, value: &SimpleExpr) -> SimpleExpr {
    match op {
        Operator::Matches => {
            Func::cust(Alias::new("regexp_like")).arg(target).arg(value.clone()).into()
        }
        Operator::ContainsNoCase => like(Func::lower(target).into(), value),
        Operator::Contains | Operator::StartsWith | Operator::EndsWith => like(target, value),
        _ => Expr::expr(target).eq(value.clone()),
    }
}

/// 条件作用于动态属性表或诊断结果表时使用的值列
fn value_column(condition: &ValueCondition) -> Column {
    match condition {
        ValueCondition::Text(_) => Column::Text,
        ValueCondition::Date { .. } => Column::Moment,
        ValueCondition::Enum(_) => Column::Choice,
        ValueCondition::Numeric { .. } => Column::Number,
        ValueCondition::Binary(_) => Column::Assumption,
    }
}

/// 表达式树编译器，日期按构造时的时刻计算
pub struct SqlCompiler {
    now: DateTime<Local>,
}

impl Default for SqlCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCompiler {
    pub fn new() -> Self {
        Self { now: Local::now() }
    }

    pub fn at(now: DateTime<Local>) -> Self {
        Self { now }
    }

    pub fn compile(&self, expression: &Expression, driver_filter: Option<&str>) -> CompiledQuery {
        let mut parameters = Parameters::default();
        let predicate = self.predicate(expression, ROOT_PREFIX, &mut parameters);
        let d = device();
        let mut statement = SelectStatement::new();
        statement
            .distinct()
            .column((d.clone(), Column::Id))
            .from_as(Table::Device, d.clone())
            .and_where(predicate);
        if let Some(driver) = driver_filter {
            let filter = parameters.bind(DRIVER_FILTER, driver);
            statement.and_where(col(&d, Column::Driver).eq(filter));
        }
        statement.order_by((d, Column::Id), Order::Asc);
        CompiledQuery { statement, parameters }
    }

    fn predicate(&self, expression: &Expression, p: &str, params: &mut Parameters) -> SimpleExpr {
        match expression {
            Expression::Null => always(),
            Expression::And(children) => children
                .iter()
                .enumerate()
                .map(|(i, c)| self.predicate(c, &format!("{p}_{i}"), params))
                .reduce(SimpleExpr::and)
                .unwrap_or_else(always),
            Expression::Or(children) => children
                .iter()
                .enumerate()
                .map(|(i, c)| self.predicate(c, &format!("{p}_{i}"), params))
                .reduce(SimpleExpr::or)
                .unwrap_or_else(never),
            Expression::Not(child) => self.predicate(child, &format!("{p}_0"), params).not(),
            Expression::Module(m) => {
                let alias = Alias::new(format!("{p}_m"));
                let value = bind_text(m, p, params);
                let serial = text_condition(col(&alias, Column::SerialNumber).into(), m.op, &value);
                let part = text_condition(col(&alias, Column::PartNumber).into(), m.op, &value);
                let subquery = SelectStatement::new()
                    .column((alias.clone(), Column::DeviceId))
                    .from_as(Table::DeviceModule, alias.clone())
                    .and_where(col(&alias, Column::Removed).is_not(true))
                    .and_where(serial.or(part))
                    .to_owned();
                device_in(&subquery)
            }
            Expression::Interface(m) => {
                let alias = Alias::new(format!("{p}_ni"));
                let value = bind_text(m, p, params);
                let name = text_condition(col(&alias, Column::InterfaceName).into(), m.op, &value);
                let description =
                    text_condition(col(&alias, Column::Description).into(), m.op, &value);
                let subquery = SelectStatement::new()
                    .column((alias.clone(), Column::DeviceId))
                    .from_as(Table::NetworkInterface, alias.clone())
                    .and_where(name.or(description))
                    .to_owned();
                device_in(&subquery)
            }
            Expression::Vrf(m) => {
                let alias = Alias::new(format!("{p}_vrf"));
                let value = bind_text(m, p, params);
                let subquery = SelectStatement::new()
                    .column((alias.clone(), Column::DeviceId))
                    .from_as(Table::DeviceVrf, alias.clone())
                    .and_where(text_condition(col(&alias, Column::Name).into(), m.op, &value))
                    .to_owned();
                device_in(&subquery)
            }
            Expression::VirtualName(m) => {
                let alias = Alias::new(format!("{p}_vn"));
                let value = bind_text(m, p, params);
                let own_name = text_condition(col(&device(), Column::Name).into(), m.op, &value);
                let subquery = SelectStatement::new()
                    .column((alias.clone(), Column::DeviceId))
                    .from_as(Table::DeviceVirtualName, alias.clone())
                    .and_where(text_condition(col(&alias, Column::Name).into(), m.op, &value))
                    .to_owned();
                own_name.or(device_in(&subquery))
            }
            Expression::Device(id) => col(&device(), Column::Id).eq(params.bind(p, *id)),
            Expression::Domain(id) => col(&device(), Column::DomainId).eq(params.bind(p, *id)),
            Expression::Driver { condition, drivers } => {
                let driver = col(&device(), Column::Driver);
                let mut iter = drivers.iter();
                let Some(first) = iter.next() else {
                    return never();
                };
                let mut case = Expr::case(
                    driver.clone().eq(first.name.as_str()),
                    first.description.as_str(),
                );
                for other in iter {
                    case = case.case(driver.clone().eq(other.name.as_str()), other.description.as_str());
                }
                let value = bind_text(condition, p, params);
                text_condition(case.into(), condition.op, &value)
            }
            Expression::Ipv4 { op, target, with_mask } => {
                self.ipv4(*op, target, *with_mask, p, params)
            }
            Expression::Ipv6 { op, target, with_mask } => {
                self.ipv6(*op, target, *with_mask, p, params)
            }
            Expression::Mac { target, prefix_length, .. } => {
                self.mac(target, *prefix_length, p, params)
            }
            Expression::Diagnostic { diagnostic, condition } => {
                let alias = Alias::new(format!("{p}_dr"));
                let id = params.bind(format!("{p}_diagnostic"), diagnostic.id);
                let target = col(&alias, value_column(condition)).into();
                let subquery = SelectStatement::new()
                    .column((alias.clone(), Column::DeviceId))
                    .from_as(Table::DiagnosticResult, alias.clone())
                    .and_where(col(&alias, Column::DiagnosticId).eq(id))
                    .and_where(self.value_condition(condition, target, p, params))
                    .to_owned();
                device_in(&subquery)
            }
            Expression::ComplianceRule { rule, result, .. } => {
                let alias = Alias::new(format!("{p}_cr"));
                let rule_id = params.bind(format!("{p}_rule"), rule.id);
                let result = params.bind(p, result.as_str());
                let subquery = SelectStatement::new()
                    .column((alias.clone(), Column::DeviceId))
                    .from_as(Table::CheckResult, alias.clone())
                    .and_where(col(&alias, Column::RuleId).eq(rule_id))
                    .and_where(col(&alias, Column::Result).eq(result))
                    .to_owned();
                device_in(&subquery)
            }
            Expression::Attribute { attribute, condition } => {
                self.attribute(attribute, condition, p, params)
            }
        }
    }

    fn value_condition(
        &self,
        condition: &ValueCondition,
        target: SimpleExpr,
        p: &str,
        params: &mut Parameters,
    ) -> SimpleExpr {
        let target = Expr::expr(target);
        match condition {
            ValueCondition::Text(m) => {
                let value = bind_text(m, p, params);
                text_condition(target.into(), m.op, &value)
            }
            ValueCondition::Date { op, value } => {
                let (start, end) = value.interval_at(self.now);
                let (start, end) = (start.timestamp_millis(), end.timestamp_millis());
                match op {
                    Operator::After => target.gte(params.bind(p, start)),
                    Operator::Before => target.lte(params.bind(p, end)),
                    _ => {
                        let start = params.bind(format!("{p}_1"), start);
                        let end = params.bind(format!("{p}_2"), end);
                        target.clone().gte(start).and(target.lte(end))
                    }
                }
            }
            ValueCondition::Enum(value) => target.eq(params.bind(p, value.as_str())),
            ValueCondition::Numeric { op, value } => {
                let value = params.bind(p, *value);
                match op {
                    Operator::LessThan => target.lt(value),
                    Operator::GreaterThan => target.gt(value),
                    _ => target.eq(value),
                }
            }
            ValueCondition::Binary(value) => target.eq(params.bind(p, *value)),
        }
    }

    fn attribute(
        &self,
        attribute: &AttributeRef,
        condition: &ValueCondition,
        p: &str,
        params: &mut Parameters,
    ) -> SimpleExpr {
        let d = device();
        let definition = &attribute.definition;
        let Some(driver) = &attribute.driver else {
            // 内置属性直接对应设备表或配置表的列
            let column = Alias::new(definition.name.as_str());
            return match definition.level {
                AttributeLevel::Device => {
                    self.value_condition(condition, Expr::col((d, column)).into(), p, params)
                }
                AttributeLevel::Config => {
                    let alias = Alias::new(format!("{p}_c"));
                    let target = Expr::col((alias.clone(), column)).into();
                    let subquery = SelectStatement::new()
                        .column((alias.clone(), Column::Id))
                        .from_as(Table::Config, alias.clone())
                        .and_where(self.value_condition(condition, target, p, params))
                        .to_owned();
                    col(&d, Column::LastConfigId).in_subquery(subquery)
                }
            };
        };
        let driver_name = params.bind(format!("{p}_driver"), driver.name.as_str());
        let attribute_name = params.bind(format!("{p}_name"), definition.name.as_str());
        let same_driver = col(&d, Column::Driver).eq(driver_name);
        match definition.level {
            AttributeLevel::Device => {
                let alias = Alias::new(format!("{p}_da"));
                let target = col(&alias, value_column(condition)).into();
                let subquery = SelectStatement::new()
                    .column((alias.clone(), Column::DeviceId))
                    .from_as(Table::DeviceAttribute, alias.clone())
                    .and_where(col(&alias, Column::Name).eq(attribute_name))
                    .and_where(self.value_condition(condition, target, p, params))
                    .to_owned();
                same_driver.and(device_in(&subquery))
            }
            AttributeLevel::Config => {
                let alias = Alias::new(format!("{p}_ca"));
                let target = col(&alias, value_column(condition)).into();
                let subquery = SelectStatement::new()
                    .column((alias.clone(), Column::ConfigId))
                    .from_as(Table::ConfigAttribute, alias.clone())
                    .and_where(col(&alias, Column::Name).eq(attribute_name))
                    .and_where(self.value_condition(condition, target, p, params))
                    .to_owned();
                same_driver.and(col(&d, Column::LastConfigId).in_subquery(subquery))
            }
        }
    }

    fn ipv4(
        &self,
        op: Operator,
        target: &Ipv4Network,
        with_mask: bool,
        p: &str,
        params: &mut Parameters,
    ) -> SimpleExpr {
        let d = device();
        let alias = Alias::new(format!("{p}_ip4"));
        let address = col(&alias, Column::Address);
        let interfaces = |condition: Option<SimpleExpr>| {
            interface_addresses(p, Table::InterfaceIpv4, &alias, condition)
        };
        match op {
            Operator::In => match target.bounds() {
                Some((min, max)) => {
                    let min = params.bind(format!("{p}_0"), min);
                    let max = params.bind(format!("{p}_1"), max);
                    col(&d, Column::MgmtAddress)
                        .between(min.clone(), max.clone())
                        .or(interfaces(Some(address.between(min, max))))
                }
                None => col(&d, Column::MgmtAddress).is_not_null().or(interfaces(None)),
            },
            Operator::Contains => {
                // 接口所在子网包含给定地址，按无符号 32 位计算
                let value = params.bind(p, target.unsigned_address());
                let unsigned = address.binary(BinOper::BitAnd, Expr::val(0xFFFF_FFFFi64));
                let size = Expr::val(1i64)
                    .left_shift(Expr::val(32i64).sub(col(&alias, Column::PrefixLength)));
                let network = unsigned.clone().sub(Expr::expr(unsigned).modulo(size.clone()));
                let last = network.clone().add(size).sub(1i64);
                let condition = Expr::expr(network)
                    .lte(value.clone())
                    .and(Expr::expr(value).lte(last));
                interfaces(Some(condition))
            }
            _ if with_mask => {
                let ip = params.bind(format!("{p}_0"), target.int_address());
                let length = params.bind(format!("{p}_1"), i32::from(target.prefix_length));
                let management = col(&d, Column::MgmtAddress)
                    .eq(ip.clone())
                    .and(col(&d, Column::MgmtPrefixLength).eq(length.clone()));
                let on_interface = address
                    .eq(ip)
                    .and(col(&alias, Column::PrefixLength).eq(length));
                management.or(interfaces(Some(on_interface)))
            }
            _ => {
                let ip = params.bind(p, target.int_address());
                col(&d, Column::MgmtAddress)
                    .eq(ip.clone())
                    .or(interfaces(Some(address.eq(ip))))
            }
        }
    }

    fn ipv6(
        &self,
        op: Operator,
        target: &Ipv6Network,
        with_mask: bool,
        p: &str,
        params: &mut Parameters,
    ) -> SimpleExpr {
        let alias = Alias::new(format!("{p}_ip6"));
        let high = col(&alias, Column::Address1);
        let low = col(&alias, Column::Address2);
        let condition = match op {
            Operator::In => match target.range() {
                Ipv6Range::Any => None,
                Ipv6Range::High { min, max } => {
                    let min = params.bind(format!("{p}_0"), min);
                    let max = params.bind(format!("{p}_1"), max);
                    Some(high.between(min, max))
                }
                Ipv6Range::Low { high: fixed, min, max } => {
                    let min = params.bind(format!("{p}_0"), min);
                    let max = params.bind(format!("{p}_1"), max);
                    let fixed = params.bind(format!("{p}_2"), fixed);
                    Some(high.eq(fixed).and(low.between(min, max)))
                }
            },
            _ => {
                let address1 = params.bind(format!("{p}_0"), target.address1());
                let address2 = params.bind(format!("{p}_1"), target.address2());
                let exact = high.eq(address1).and(low.eq(address2));
                if with_mask {
                    let length = params.bind(format!("{p}_2"), i32::from(target.prefix_length));
                    Some(exact.and(col(&alias, Column::PrefixLength).eq(length)))
                } else {
                    Some(exact)
                }
            }
        };
        interface_addresses(p, Table::InterfaceIpv6, &alias, condition)
    }

    fn mac(
        &self,
        target: &MacAddress,
        prefix_length: Option<u8>,
        p: &str,
        params: &mut Parameters,
    ) -> SimpleExpr {
        let alias = Alias::new(format!("{p}_ni"));
        let mac = col(&alias, Column::MacAddress);
        let condition = match prefix_length {
            None => mac.eq(params.bind(p, target.as_i64())),
            Some(length) => match target.bounds(length) {
                Some((min, max)) => {
                    let min = params.bind(format!("{p}_0"), min);
                    let max = params.bind(format!("{p}_1"), max);
                    mac.between(min, max)
                }
                None => mac.is_not_null(),
            },
        };
        let subquery = SelectStatement::new()
            .column((alias.clone(), Column::DeviceId))
            .from_as(Table::NetworkInterface, alias.clone())
            .and_where(condition)
            .to_owned();
        device_in(&subquery)
    }
}

/// 拥有满足条件的接口地址的设备
fn interface_addresses(
    p: &str,
    table: Table,
    alias: &Alias,
    condition: Option<SimpleExpr>,
) -> SimpleExpr {
    let interface = Alias::new(format!("{p}_ni"));
    let mut subquery = SelectStatement::new();
    subquery
        .column((interface.clone(), Column::DeviceId))
        .from_as(Table::NetworkInterface, interface.clone())
        .join_as(
            JoinType::InnerJoin,
            table,
            alias.clone(),
            col(alias, Column::InterfaceId).equals((interface, Column::Id)),
        );
    if let Some(condition) = condition {
        subquery.and_where(condition);
    }
    device_in(&subquery)
}

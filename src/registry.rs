//! 驱动、诊断与合规策略的只读注册表
//!
//! 解析阶段通过 [`ParseContext`] 注入注册表，所有名称解析都在这里完成，
//! 解析器本身不做任何 I/O。

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::literal::{DeviceStatus, NetworkClass, SoftwareLevel};

/// 属性值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttributeType {
    Text,
    LongText,
    Numeric,
    Date,
    Enum,
    Binary,
}

/// 属性挂载的层级：设备本身或设备的最新配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttributeLevel {
    Device,
    Config,
}

fn default_searchable() -> bool {
    true
}

/// 属性定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
    pub level: AttributeLevel,
    /// 内部名称，用作存储中的键
    pub name: String,
    /// 查询中使用的显示标题
    pub title: String,
    #[serde(default = "default_searchable")]
    pub searchable: bool,
    /// 枚举属性的可选值
    #[serde(default)]
    pub choices: Vec<String>,
}

impl AttributeDefinition {
    pub fn new(
        attribute_type: AttributeType,
        level: AttributeLevel,
        name: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            attribute_type,
            level,
            name: name.into(),
            title: title.into(),
            searchable: true,
            choices: Vec::new(),
        }
    }

    pub fn with_choices(mut self, choices: Vec<String>) -> Self {
        self.choices = choices;
        self
    }

    pub fn not_searchable(mut self) -> Self {
        self.searchable = false;
        self
    }
}

/// 设备驱动：定义某类设备有哪些属性
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDriver {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
}

impl DeviceDriver {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), attributes: Vec::new() }
    }

    pub fn with_attribute(mut self, attribute: AttributeDefinition) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// 按标题查找属性，忽略大小写
    pub fn attribute_by_title(&self, title: &str) -> Option<&AttributeDefinition> {
        self.attributes.iter().find(|a| a.title.eq_ignore_ascii_case(title))
    }

    pub fn to_ref(&self) -> DriverRef {
        DriverRef { name: self.name.clone(), description: self.description.clone() }
    }
}

/// 解析后表达式持有的驱动句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DriverRef {
    pub name: String,
    pub description: String,
}

/// 诊断结果类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiagnosticResultType {
    Text,
    LongText,
    Numeric,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub id: i64,
    pub name: String,
    pub result_type: DiagnosticResultType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// 表达式持有的策略句柄，不含规则列表
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyRef {
    pub id: i64,
    pub name: String,
}

/// 名称查找接口
pub trait Registry: Send + Sync {
    fn driver_by_name(&self, name: &str) -> Option<&DeviceDriver>;
    fn driver_by_description(&self, description: &str) -> Option<&DeviceDriver>;
    /// 所有驱动，按名称排序
    fn drivers(&self) -> Vec<&DeviceDriver>;
    fn diagnostic_by_name(&self, name: &str) -> Option<&Diagnostic>;
    fn policy_by_name(&self, name: &str) -> Option<&Policy>;

    fn rule_by_name<'a>(&self, policy: &'a Policy, name: &str) -> Option<&'a Rule> {
        policy.rules.iter().find(|r| r.name == name)
    }
}

/// 从配置文件载入的注册表快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryRegistry {
    #[serde(default)]
    pub drivers: Vec<DeviceDriver>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default)]
    pub policies: Vec<Policy>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_driver(mut self, driver: DeviceDriver) -> Self {
        self.drivers.push(driver);
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }
}

impl Registry for InMemoryRegistry {
    fn driver_by_name(&self, name: &str) -> Option<&DeviceDriver> {
        self.drivers.iter().find(|d| d.name == name)
    }

    fn driver_by_description(&self, description: &str) -> Option<&DeviceDriver> {
        self.drivers.iter().find(|d| d.description == description)
    }

    fn drivers(&self) -> Vec<&DeviceDriver> {
        let mut drivers: Vec<_> = self.drivers.iter().collect();
        drivers.sort_by(|a, b| a.name.cmp(&b.name));
        drivers
    }

    fn diagnostic_by_name(&self, name: &str) -> Option<&Diagnostic> {
        self.diagnostics.iter().find(|d| d.name == name)
    }

    fn policy_by_name(&self, name: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.name == name)
    }
}

/// 解析上下文：注册表，以及可选的驱动（动态组的驱动过滤条件）
#[derive(Clone, Copy)]
pub struct ParseContext<'a> {
    pub registry: &'a dyn Registry,
    pub driver: Option<&'a DeviceDriver>,
}

impl<'a> ParseContext<'a> {
    pub fn new(registry: &'a dyn Registry) -> Self {
        Self { registry, driver: None }
    }

    pub fn with_driver(registry: &'a dyn Registry, driver: Option<&'a DeviceDriver>) -> Self {
        Self { registry, driver }
    }
}

/// 内置设备属性，`name` 即 device 表的列名
pub static BUILTIN_ATTRIBUTES: LazyLock<Vec<AttributeDefinition>> = LazyLock::new(|| {
    use AttributeLevel::Device;
    use AttributeType::{Date, Enum, Text};
    vec![
        AttributeDefinition::new(Text, Device, "name", "Name"),
        AttributeDefinition::new(Text, Device, "comments", "Comments"),
        AttributeDefinition::new(Text, Device, "family", "Family"),
        AttributeDefinition::new(Text, Device, "contact", "Contact"),
        AttributeDefinition::new(Text, Device, "location", "Location"),
        AttributeDefinition::new(Text, Device, "software_version", "Software Version"),
        AttributeDefinition::new(Date, Device, "created_date", "Creation Date"),
        AttributeDefinition::new(Date, Device, "change_date", "Last Change Date"),
        AttributeDefinition::new(Date, Device, "eos_date", "End of Sale Date"),
        AttributeDefinition::new(Date, Device, "eol_date", "End of Life Date"),
        AttributeDefinition::new(Enum, Device, "network_class", "Network Class")
            .with_choices(NetworkClass::choices()),
        AttributeDefinition::new(Enum, Device, "software_level", "Software Level")
            .with_choices(SoftwareLevel::choices()),
        AttributeDefinition::new(Enum, Device, "status", "Status")
            .with_choices(DeviceStatus::choices()),
    ]
});

static BUILTIN_BY_TITLE: LazyLock<HashMap<String, usize>> = LazyLock::new(|| {
    BUILTIN_ATTRIBUTES
        .iter()
        .enumerate()
        .map(|(i, a)| (a.title.to_lowercase(), i))
        .collect()
});

/// 按标题查找内置属性，忽略大小写
pub fn builtin_attribute(title: &str) -> Option<&'static AttributeDefinition> {
    BUILTIN_BY_TITLE.get(&title.to_lowercase()).map(|&i| &BUILTIN_ATTRIBUTES[i])
}

/// 单元测试共用的注册表
#[cfg(test)]
pub(crate) fn sample_registry() -> InMemoryRegistry {
    use AttributeLevel::{Config, Device};
    use AttributeType::*;
    InMemoryRegistry::new()
        .with_driver(
            DeviceDriver::new("CiscoIOS12", "Cisco IOS and IOS-XE")
                .with_attribute(AttributeDefinition::new(Text, Config, "iosImageFile", "IOS image file"))
                .with_attribute(AttributeDefinition::new(
                    Binary,
                    Device,
                    "configurationSaved",
                    "Configuration saved",
                ))
                .with_attribute(AttributeDefinition::new(
                    Numeric,
                    Device,
                    "mainMemorySize",
                    "Main memory size",
                ))
                .with_attribute(
                    AttributeDefinition::new(Enum, Device, "bootMode", "Boot mode")
                        .with_choices(vec!["NORMAL".into(), "ROMMON".into()]),
                )
                .with_attribute(AttributeDefinition::new(
                    Date,
                    Config,
                    "licenseExpiry",
                    "License expiry",
                ))
                .with_attribute(
                    AttributeDefinition::new(LongText, Config, "runningConfig", "Running config")
                        .not_searchable(),
                ),
        )
        .with_driver(DeviceDriver::new("JuniperJunos", "Juniper Junos").with_attribute(
            AttributeDefinition::new(Numeric, Device, "mainMemorySize", "Main memory size"),
        ))
        .with_diagnostic(Diagnostic {
            id: 1,
            name: "System Status".into(),
            result_type: DiagnosticResultType::Text,
        })
        .with_diagnostic(Diagnostic {
            id: 2,
            name: "CPU Usage".into(),
            result_type: DiagnosticResultType::Numeric,
        })
        .with_diagnostic(Diagnostic {
            id: 3,
            name: "Is Reachable".into(),
            result_type: DiagnosticResultType::Binary,
        })
        .with_policy(Policy {
            id: 10,
            name: "Security".into(),
            rules: vec![
                Rule { id: 100, name: "NoTelnet".into() },
                Rule { id: 101, name: "Password Check".into() },
            ],
        })
        .with_policy(Policy {
            id: 11,
            name: "Config Policy".into(),
            rules: vec![Rule { id: 110, name: "Hostname Standard".into() }],
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup_ignores_case() {
        let attribute = builtin_attribute("software VERSION").unwrap();
        assert_eq!(attribute.name, "software_version");
        assert_eq!(attribute.attribute_type, AttributeType::Text);
        assert_eq!(builtin_attribute("Status").unwrap().choices.len(), 3);
        assert!(builtin_attribute("Serial").is_none());
    }

    #[test]
    fn test_registry_lookups() {
        let registry = InMemoryRegistry::new()
            .with_driver(DeviceDriver::new("ZDriver", "Zeta"))
            .with_driver(
                DeviceDriver::new("CiscoIOS12", "Cisco IOS and IOS-XE").with_attribute(
                    AttributeDefinition::new(
                        AttributeType::Text,
                        AttributeLevel::Config,
                        "iosImageFile",
                        "IOS image file",
                    ),
                ),
            )
            .with_policy(Policy {
                id: 7,
                name: "Security".into(),
                rules: vec![Rule { id: 70, name: "NoTelnet".into() }],
            });

        let driver = registry.driver_by_description("Cisco IOS and IOS-XE").unwrap();
        assert_eq!(driver.name, "CiscoIOS12");
        assert_eq!(driver.attribute_by_title("ios IMAGE file").unwrap().name, "iosImageFile");
        let names: Vec<_> = registry.drivers().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["CiscoIOS12", "ZDriver"]);

        let policy = registry.policy_by_name("Security").unwrap();
        assert_eq!(registry.rule_by_name(policy, "NoTelnet").unwrap().id, 70);
        assert!(registry.rule_by_name(policy, "notelnet").is_none());
    }

    #[test]
    fn test_registry_from_json() {
        let json = r#"{
            "drivers": [{
                "name": "FortiOS",
                "description": "Fortinet FortiOS",
                "attributes": [
                    {"type": "ENUM", "level": "DEVICE", "name": "haMode", "title": "HA mode",
                     "choices": ["STANDALONE", "ACTIVE_PASSIVE"]},
                    {"type": "LONGTEXT", "level": "CONFIG", "name": "running", "title": "Running",
                     "searchable": false}
                ]
            }],
            "diagnostics": [{"id": 3, "name": "Uptime", "result_type": "NUMERIC"}]
        }"#;
        let registry: InMemoryRegistry = serde_json::from_str(json).unwrap();
        let driver = registry.driver_by_name("FortiOS").unwrap();
        assert_eq!(driver.attributes[0].choices.len(), 2);
        assert!(driver.attributes[0].searchable);
        assert!(!driver.attributes[1].searchable);
        assert_eq!(
            registry.diagnostic_by_name("Uptime").unwrap().result_type,
            DiagnosticResultType::Numeric
        );
        assert!(registry.policies.is_empty());
    }
}

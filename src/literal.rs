//! 叶子表达式使用的类型化字面量
//!
//! 地址类字面量保留一个规范文本形式和一个用于范围比较的整数形式：
//! IPv4 以有符号 32 位整数存储，IPv6 拆成两个有符号 64 位半段，
//! MAC 为 48 位整数。

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{
    DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, TimeZone,
    Utc,
};
use regex::Regex;

/// 48 位 MAC 地址掩码
const MAC_BITS: u64 = 0xFFFF_FFFF_FFFF;
/// 相对日期允许的最大偏移，保证时间运算不会溢出
const MAX_DAY_SHIFT: i64 = 1_000_000;
const MAX_HOUR_SHIFT: i64 = MAX_DAY_SHIFT * 24;

/// 一个 IPv4 地址及其前缀长度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Network {
    pub address: Ipv4Addr,
    pub prefix_length: u8,
}

impl Ipv4Network {
    /// 解析 `a.b.c.d` 或 `a.b.c.d/len`
    pub fn parse(text: &str) -> Option<Self> {
        let (ip, prefix_length) = split_prefix(text, 32)?;
        Some(Self { address: ip.parse().ok()?, prefix_length })
    }

    /// 存储使用的有符号整数形式
    pub fn int_address(&self) -> i32 {
        u32::from(self.address) as i32
    }

    /// 子网的有符号 `[min, max]` 范围，`/0` 表示整个地址空间时返回 `None`
    pub fn bounds(&self) -> Option<(i32, i32)> {
        if self.prefix_length == 0 {
            return None;
        }
        let mask = u32::MAX << (32 - u32::from(self.prefix_length));
        let address = u32::from(self.address);
        let min = (address & mask) as i32;
        let max = (address | !mask) as i32;
        Some((min.min(max), min.max(max)))
    }

    /// 同一地址的无符号形式，用于 CONTAINS 的算术比较
    pub fn unsigned_address(&self) -> i64 {
        i64::from(u32::from(self.address))
    }

    pub fn ip(&self) -> String {
        self.address.to_string()
    }

    pub fn prefix(&self) -> String {
        format!("{}/{}", self.address, self.prefix_length)
    }
}

/// 一个 IPv6 地址及其前缀长度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Network {
    pub address: Ipv6Addr,
    pub prefix_length: u8,
}

/// IPv6 子网的匹配范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv6Range {
    /// `/0`，不限制
    Any,
    /// 高半段落在 `[min, max]` 内
    High { min: i64, max: i64 },
    /// 高半段固定，低半段落在 `[min, max]` 内
    Low { high: i64, min: i64, max: i64 },
}

impl Ipv6Network {
    pub fn parse(text: &str) -> Option<Self> {
        let (ip, prefix_length) = split_prefix(text, 128)?;
        Some(Self { address: ip.parse().ok()?, prefix_length })
    }

    /// 高 64 位，按有符号整数存储
    pub fn address1(&self) -> i64 {
        (u128::from(self.address) >> 64) as u64 as i64
    }

    /// 低 64 位，按有符号整数存储
    pub fn address2(&self) -> i64 {
        u128::from(self.address) as u64 as i64
    }

    pub fn range(&self) -> Ipv6Range {
        match self.prefix_length {
            0 => Ipv6Range::Any,
            p @ 1..=64 => {
                let (min, max) = half_bounds(self.address1(), 64 - u32::from(p));
                Ipv6Range::High { min, max }
            }
            p => {
                let (min, max) = half_bounds(self.address2(), 128 - u32::from(p));
                Ipv6Range::Low { high: self.address1(), min, max }
            }
        }
    }

    pub fn ip(&self) -> String {
        self.address.to_string()
    }

    pub fn prefix(&self) -> String {
        format!("{}/{}", self.address, self.prefix_length)
    }
}

/// 在一个 64 位半段内计算范围，`host_bits` 小于 64
fn half_bounds(half: i64, host_bits: u32) -> (i64, i64) {
    let mask = u64::MAX << host_bits;
    let min = ((half as u64) & mask) as i64;
    let max = ((half as u64) | !mask) as i64;
    (min.min(max), min.max(max))
}

fn split_prefix(text: &str, width: u8) -> Option<(&str, u8)> {
    match text.split_once('/') {
        Some((ip, len)) => {
            let len: u8 = len.trim().parse().ok()?;
            (len <= width).then_some((ip.trim(), len))
        }
        None => Some((text.trim(), width)),
    }
}

/// 48 位物理地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(u64);

static MAC_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^([0-9A-F]{2})([0-9A-F]{2})[-.]([0-9A-F]{2})([0-9A-F]{2})[-.]([0-9A-F]{2})([0-9A-F]{2})$",
        r"(?i)^([0-9A-F]{1,2})[-.:]([0-9A-F]{1,2})[-.:]([0-9A-F]{1,2})[-.:]([0-9A-F]{1,2})[-.:]([0-9A-F]{1,2})[-.:]([0-9A-F]{1,2})$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

impl MacAddress {
    pub fn new(address: u64) -> Self {
        Self(address & MAC_BITS)
    }

    /// 支持 `0011.2233.4455`、`00-11-22-33-44-55`、`0:11:22:33:44:55` 等写法
    pub fn parse(text: &str) -> Option<Self> {
        for pattern in MAC_PATTERNS.iter() {
            let Some(caps) = pattern.captures(text.trim()) else {
                continue;
            };
            let mut address = 0u64;
            for i in 1..=6 {
                let byte = u64::from_str_radix(caps.get(i)?.as_str(), 16).ok()?;
                address = (address << 8) | byte;
            }
            return Some(Self(address));
        }
        None
    }

    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    /// 前缀长度为 `prefix_length` 的范围，`/0` 返回 `None`
    pub fn bounds(&self, prefix_length: u8) -> Option<(i64, i64)> {
        if prefix_length == 0 {
            return None;
        }
        let mask = (MAC_BITS << (48 - u32::from(prefix_length.min(48)))) & MAC_BITS;
        let min = self.0 & mask;
        let max = self.0 | (!mask & MAC_BITS);
        Some((min as i64, max as i64))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(f, "{:02x}{:02x}.{:02x}{:02x}.{:02x}{:02x}", b[2], b[3], b[4], b[5], b[6], b[7])
    }
}

/// 绝对或相对日期
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedDate {
    /// 带时区的 ISO-8601 时间点
    Zoned(DateTime<FixedOffset>),
    /// 本地时间点
    Local(NaiveDateTime),
    /// 一整天
    Day(NaiveDate),
    /// 当前时刻加偏移
    Now { days: i64, hours: i64 },
    /// 今天一整天加偏移
    Today { days: i64, hours: i64 },
}

static NOW_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| relative_pattern("Now"));
static TODAY_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| relative_pattern("Today"));

fn relative_pattern(anchor: &str) -> Option<Regex> {
    Regex::new(&format!(
        r"(?i)^{anchor}(?:\s*(?P<days>[+-]\s*[0-9]+)\s*D)?(?:\s*(?P<hours>[+-]\s*[0-9]+)\s*H)?$"
    ))
    .ok()
}

fn parse_shift(caps: &regex::Captures, name: &str, limit: i64) -> Option<i64> {
    match caps.name(name) {
        Some(m) => {
            let value: i64 = m.as_str().replace(char::is_whitespace, "").parse().ok()?;
            (value.abs() <= limit).then_some(value)
        }
        None => Some(0),
    }
}

fn parse_relative(pattern: &Option<Regex>, text: &str) -> Option<(i64, i64)> {
    let caps = pattern.as_ref()?.captures(text)?;
    let days = parse_shift(&caps, "days", MAX_DAY_SHIFT)?;
    let hours = parse_shift(&caps, "hours", MAX_HOUR_SHIFT)?;
    Some((days, hours))
}

fn shift_text(days: i64, hours: i64) -> String {
    let mut text = String::new();
    if days != 0 {
        text.push_str(&format!(" {}{}d", if days > 0 { "+" } else { "-" }, days.abs()));
    }
    if hours != 0 {
        text.push_str(&format!(" {}{}h", if hours > 0 { "+" } else { "-" }, hours.abs()));
    }
    text
}

/// 本地时间转为时间点，夏令时空档时退回 UTC 解释
fn local_instant(naive: NaiveDateTime) -> DateTime<Utc> {
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    }
}

impl TypedDate {
    /// 依次尝试：带时区时间、本地时间、日期、`Now±Nd±Nh`、`Today±Nd±Nh`
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(date) = DateTime::parse_from_rfc3339(text) {
            return Some(TypedDate::Zoned(date));
        }
        if let Ok(date) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M%:z") {
            return Some(TypedDate::Zoned(date));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(date) = NaiveDateTime::parse_from_str(text, format) {
                return Some(TypedDate::Local(date));
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return Some(TypedDate::Day(date));
        }
        if let Some((days, hours)) = parse_relative(&NOW_PATTERN, text) {
            return Some(TypedDate::Now { days, hours });
        }
        if let Some((days, hours)) = parse_relative(&TODAY_PATTERN, text) {
            return Some(TypedDate::Today { days, hours });
        }
        None
    }

    /// 规范文本形式
    pub fn text(&self) -> String {
        match self {
            TypedDate::Zoned(date) => date.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            TypedDate::Local(date) => date.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            TypedDate::Day(date) => date.format("%Y-%m-%d").to_string(),
            TypedDate::Now { days, hours } => format!("Now{}", shift_text(*days, *hours)),
            TypedDate::Today { days, hours } => format!("Today{}", shift_text(*days, *hours)),
        }
    }

    /// 相对于 `now` 计算 `[start, end]` 区间
    pub fn interval_at(&self, now: DateTime<Local>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            TypedDate::Zoned(date) => {
                let instant = date.with_timezone(&Utc);
                (instant, instant)
            }
            TypedDate::Local(date) => {
                let instant = local_instant(*date);
                (instant, instant)
            }
            TypedDate::Day(date) => {
                let start = local_instant(date.and_time(chrono::NaiveTime::MIN));
                let end = date
                    .succ_opt()
                    .map(|next| local_instant(next.and_time(chrono::NaiveTime::MIN)))
                    .unwrap_or(start);
                (start, end)
            }
            TypedDate::Now { days, hours } => {
                let instant = now.naive_local() + TimeDelta::days(*days);
                let instant = local_instant(instant) + TimeDelta::hours(*hours);
                (instant, instant)
            }
            TypedDate::Today { days, hours } => {
                let midnight = now.date_naive().and_time(chrono::NaiveTime::MIN);
                let start = local_instant(midnight + TimeDelta::days(*days)) + TimeDelta::hours(*hours);
                let end = local_instant(midnight + TimeDelta::days(1 + *days)) + TimeDelta::hours(*hours);
                (start, end)
            }
        }
    }

    /// 以当前时刻计算区间
    pub fn interval(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        self.interval_at(Local::now())
    }
}

/// 解析数值字面量，逗号视为千位分隔符
pub fn parse_number(text: &str) -> Option<f64> {
    let cleaned = text.replace(',', "");
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// 数值的规范文本形式：最短可回读表示，不带分组
pub fn format_number(value: f64) -> String {
    format!("{value}")
}

/// 在固定取值集合中生成字符串枚举
macro_rules! literal_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn choices() -> Vec<String> {
                Self::ALL.iter().map(|v| v.as_str().to_string()).collect()
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| format!("invalid {} value '{}'", stringify!($name), s))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

literal_enum!(
    /// 设备的网络角色
    NetworkClass {
        Firewall => "FIREWALL",
        LoadBalancer => "LOADBALANCER",
        Router => "ROUTER",
        Server => "SERVER",
        Switch => "SWITCH",
        SwitchRouter => "SWITCHROUTER",
        AccessPoint => "ACCESSPOINT",
        WirelessController => "WIRELESSCONTROLLER",
        ConsoleServer => "CONSOLESERVER",
        Unknown => "UNKNOWN",
        VoiceGateway => "VOICEGATEWAY",
    }
);

literal_enum!(
    /// 软件合规等级
    SoftwareLevel {
        Gold => "GOLD",
        Silver => "SILVER",
        Bronze => "BRONZE",
        Unknown => "UNKNOWN",
    }
);

literal_enum!(
    /// 设备状态
    DeviceStatus {
        Disabled => "DISABLED",
        InProduction => "INPRODUCTION",
        PreProduction => "PREPRODUCTION",
    }
);

literal_enum!(
    /// 合规检查结果
    CheckResult {
        Conforming => "CONFORMING",
        Exempted => "EXEMPTED",
        InvalidRule => "INVALIDRULE",
        Disabled => "DISABLED",
        NonConforming => "NONCONFORMING",
        NotApplicable => "NOTAPPLICABLE",
    }
);

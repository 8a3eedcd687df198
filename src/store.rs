//! 设备存储与组成员持久化
//!
//! `SqliteStore` 是参考实现：执行编译后的查询，保存动态组与静态组的成员行。
//! 连接打开时注册 `regexp_like` 和按 Unicode 规则小写的 `lower`，并让 LIKE
//! 区分大小写，使 CONTAINS 与 CONTAINSNOCASE 的语义由查询本身决定。

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use sea_query::Value;
use tracing::{debug, trace};

use crate::error::StoreError;
use crate::group::{ChangeKind, DynamicGroup, MembershipChange, StaticGroup};
use crate::literal::{CheckResult, Ipv4Network, Ipv6Network, MacAddress};
use crate::registry::BUILTIN_ATTRIBUTES;
use crate::sql_compiler::CompiledQuery;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 执行编译后的设备查询
pub trait DeviceStore: Send + Sync {
    /// 返回满足条件的设备 ID，按 ID 升序
    fn find_devices(&self, query: &CompiledQuery) -> Result<Vec<i64>, StoreError>;
}

/// 组与成员行的持久化，每个写操作是一个事务
pub trait GroupStore: DeviceStore {
    fn dynamic_groups(&self) -> Result<Vec<DynamicGroup>, StoreError>;
    fn dynamic_group(&self, id: i64) -> Result<DynamicGroup, StoreError>;
    fn create_dynamic_group(
        &self,
        name: &str,
        driver_filter: Option<&str>,
        query_text: &str,
    ) -> Result<DynamicGroup, StoreError>;
    /// 组当前持久化的成员
    fn group_members(&self, group_id: i64) -> Result<BTreeSet<i64>, StoreError>;
    /// 保存规范化后的查询文本并增删成员行
    fn update_group(
        &self,
        group_id: i64,
        query_text: &str,
        added: &BTreeSet<i64>,
        removed: &BTreeSet<i64>,
    ) -> Result<(), StoreError>;
    /// 全部变更在同一事务中生效，任何一条失败则全部回滚
    fn apply_membership_changes(&self, changes: &[MembershipChange]) -> Result<(), StoreError>;
    fn create_static_group(&self, name: &str) -> Result<StaticGroup, StoreError>;
    fn static_group(&self, id: i64) -> Result<StaticGroup, StoreError>;
    fn save_static_group(&self, group: &StaticGroup) -> Result<(), StoreError>;
    /// 删除组及其成员行
    fn delete_group(&self, group_id: i64) -> Result<(), StoreError>;
}

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;
PRAGMA case_sensitive_like = ON;

CREATE TABLE IF NOT EXISTS device (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    driver TEXT NOT NULL,
    domain_id INTEGER,
    mgmt_address INTEGER,
    mgmt_prefix_length INTEGER,
    last_config_id INTEGER,
    comments TEXT,
    family TEXT,
    contact TEXT,
    location TEXT,
    software_version TEXT,
    created_date INTEGER,
    change_date INTEGER,
    eos_date INTEGER,
    eol_date INTEGER,
    network_class TEXT,
    software_level TEXT,
    status TEXT
);

CREATE TABLE IF NOT EXISTS config (
    id INTEGER PRIMARY KEY,
    device_id INTEGER NOT NULL REFERENCES device(id) ON DELETE CASCADE,
    change_date INTEGER
);

CREATE TABLE IF NOT EXISTS network_interface (
    id INTEGER PRIMARY KEY,
    device_id INTEGER NOT NULL REFERENCES device(id) ON DELETE CASCADE,
    interface_name TEXT NOT NULL,
    description TEXT,
    mac_address INTEGER
);

CREATE TABLE IF NOT EXISTS interface_ipv4 (
    id INTEGER PRIMARY KEY,
    interface_id INTEGER NOT NULL REFERENCES network_interface(id) ON DELETE CASCADE,
    address INTEGER NOT NULL,
    prefix_length INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS interface_ipv6 (
    id INTEGER PRIMARY KEY,
    interface_id INTEGER NOT NULL REFERENCES network_interface(id) ON DELETE CASCADE,
    address1 INTEGER NOT NULL,
    address2 INTEGER NOT NULL,
    prefix_length INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS device_module (
    id INTEGER PRIMARY KEY,
    device_id INTEGER NOT NULL REFERENCES device(id) ON DELETE CASCADE,
    serial_number TEXT,
    part_number TEXT,
    removed INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS device_vrf (
    device_id INTEGER NOT NULL REFERENCES device(id) ON DELETE CASCADE,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS device_virtual_name (
    device_id INTEGER NOT NULL REFERENCES device(id) ON DELETE CASCADE,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS device_attribute (
    device_id INTEGER NOT NULL REFERENCES device(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    text TEXT,
    number REAL,
    assumption INTEGER,
    moment INTEGER,
    choice TEXT,
    PRIMARY KEY (device_id, name)
);

CREATE TABLE IF NOT EXISTS config_attribute (
    config_id INTEGER NOT NULL REFERENCES config(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    text TEXT,
    number REAL,
    assumption INTEGER,
    moment INTEGER,
    choice TEXT,
    PRIMARY KEY (config_id, name)
);

CREATE TABLE IF NOT EXISTS diagnostic_result (
    device_id INTEGER NOT NULL REFERENCES device(id) ON DELETE CASCADE,
    diagnostic_id INTEGER NOT NULL,
    text TEXT,
    number REAL,
    assumption INTEGER,
    moment INTEGER,
    choice TEXT,
    PRIMARY KEY (device_id, diagnostic_id)
);

CREATE TABLE IF NOT EXISTS check_result (
    device_id INTEGER NOT NULL REFERENCES device(id) ON DELETE CASCADE,
    rule_id INTEGER NOT NULL,
    result TEXT NOT NULL,
    PRIMARY KEY (device_id, rule_id)
);

CREATE TABLE IF NOT EXISTS device_group (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    dynamic INTEGER NOT NULL,
    driver_filter TEXT,
    query_text TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS group_member (
    group_id INTEGER NOT NULL REFERENCES device_group(id) ON DELETE CASCADE,
    device_id INTEGER NOT NULL REFERENCES device(id) ON DELETE CASCADE,
    PRIMARY KEY (group_id, device_id)
);

CREATE INDEX IF NOT EXISTS idx_interface_device ON network_interface(device_id);
CREATE INDEX IF NOT EXISTS idx_ipv4_address ON interface_ipv4(address);
CREATE INDEX IF NOT EXISTS idx_module_device ON device_module(device_id);
CREATE INDEX IF NOT EXISTS idx_check_rule ON check_result(rule_id, result);
";

/// 新设备的基础字段
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub name: String,
    pub driver: String,
    pub domain_id: Option<i64>,
    pub management: Option<Ipv4Network>,
    /// 内置属性列及其取值
    pub fields: Vec<(String, SqlValue)>,
}

impl NewDevice {
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            domain_id: None,
            management: None,
            fields: Vec::new(),
        }
    }

    pub fn in_domain(mut self, domain_id: i64) -> Self {
        self.domain_id = Some(domain_id);
        self
    }

    pub fn with_management(mut self, address: Ipv4Network) -> Self {
        self.management = Some(address);
        self
    }

    /// 设置内置属性列，`column` 为属性的内部名
    pub fn with_field(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.fields.push((column.into(), value.into()));
        self
    }

    pub fn with_date(self, column: impl Into<String>, date: DateTime<Utc>) -> Self {
        self.with_field(column, date.timestamp_millis())
    }
}

/// 动态属性或诊断结果的取值，每种类型落在各自的列
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Number(f64),
    Assumption(bool),
    Moment(DateTime<Utc>),
    Choice(String),
}

impl AttributeValue {
    fn column(&self) -> &'static str {
        match self {
            AttributeValue::Text(_) => "text",
            AttributeValue::Number(_) => "number",
            AttributeValue::Assumption(_) => "assumption",
            AttributeValue::Moment(_) => "moment",
            AttributeValue::Choice(_) => "choice",
        }
    }

    fn to_sql(&self) -> SqlValue {
        match self {
            AttributeValue::Text(v) | AttributeValue::Choice(v) => SqlValue::Text(v.clone()),
            AttributeValue::Number(v) => SqlValue::Real(*v),
            AttributeValue::Assumption(v) => SqlValue::Integer(i64::from(*v)),
            AttributeValue::Moment(v) => SqlValue::Integer(v.timestamp_millis()),
        }
    }
}

/// 把 sea-query 的参数值转换为 SQLite 值
fn to_sql_value(name: &str, value: &Value) -> Result<SqlValue, StoreError> {
    let converted = match value {
        Value::Bool(Some(v)) => SqlValue::Integer(i64::from(*v)),
        Value::Int(Some(v)) => SqlValue::Integer(i64::from(*v)),
        Value::BigInt(Some(v)) => SqlValue::Integer(*v),
        Value::Double(Some(v)) => SqlValue::Real(*v),
        Value::String(Some(v)) => SqlValue::Text(v.as_ref().clone()),
        Value::Bool(None)
        | Value::Int(None)
        | Value::BigInt(None)
        | Value::Double(None)
        | Value::String(None) => SqlValue::Null,
        other => {
            return Err(StoreError::UnsupportedValue {
                name: name.to_string(),
                value: format!("{other:?}"),
            })
        }
    };
    Ok(converted)
}

/// 注册查询依赖的 SQL 函数
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("regexp_like", 2, flags, |ctx| {
        // 同一语句内的正则只编译一次
        let regex = ctx.get_or_create_aux(1, |vr| -> Result<_, BoxError> {
            Ok(Regex::new(vr.as_str()?)?)
        })?;
        let text: Option<String> = ctx.get(0)?;
        Ok(text.is_some_and(|t| regex.is_match(&t)))
    })?;
    conn.create_scalar_function("lower", 1, flags, |ctx| {
        let text: Option<String> = ctx.get(0)?;
        Ok(text.map(|t| t.to_lowercase()))
    })?;
    Ok(())
}

/// 基于 SQLite 的设备与组存储
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// 内存数据库，用于测试和控制台
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        register_functions(&conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn add_device(&self, device: &NewDevice) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO device (name, driver, domain_id, mgmt_address, mgmt_prefix_length)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                device.name,
                device.driver,
                device.domain_id,
                device.management.as_ref().map(Ipv4Network::int_address),
                device.management.as_ref().map(|m| m.prefix_length),
            ],
        )?;
        let id = tx.last_insert_rowid();
        for (column, value) in &device.fields {
            // 列名只能来自内置属性表
            if !BUILTIN_ATTRIBUTES.iter().any(|a| &a.name == column) {
                return Err(StoreError::UnknownColumn(column.clone()));
            }
            tx.execute(
                &format!("UPDATE device SET {column} = ?1 WHERE id = ?2"),
                params![value, id],
            )?;
        }
        tx.commit()?;
        debug!(device = id, name = %device.name, "device added");
        Ok(id)
    }

    pub fn rename_device(&self, device_id: i64, name: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("UPDATE device SET name = ?1 WHERE id = ?2", params![name, device_id])?;
        Ok(())
    }

    /// 新建一份配置并设为设备的当前配置
    pub fn add_config(&self, device_id: i64, change_date: DateTime<Utc>) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO config (device_id, change_date) VALUES (?1, ?2)",
            params![device_id, change_date.timestamp_millis()],
        )?;
        let config_id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE device SET last_config_id = ?1 WHERE id = ?2",
            params![config_id, device_id],
        )?;
        tx.commit()?;
        Ok(config_id)
    }

    pub fn add_interface(
        &self,
        device_id: i64,
        name: &str,
        description: Option<&str>,
        mac_address: Option<MacAddress>,
    ) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO network_interface (device_id, interface_name, description, mac_address)
             VALUES (?1, ?2, ?3, ?4)",
            params![device_id, name, description, mac_address.map(|m| m.as_i64())],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_ipv4(&self, interface_id: i64, address: &Ipv4Network) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO interface_ipv4 (interface_id, address, prefix_length) VALUES (?1, ?2, ?3)",
            params![interface_id, address.int_address(), address.prefix_length],
        )?;
        Ok(())
    }

    pub fn add_ipv6(&self, interface_id: i64, address: &Ipv6Network) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO interface_ipv6 (interface_id, address1, address2, prefix_length)
             VALUES (?1, ?2, ?3, ?4)",
            params![interface_id, address.address1(), address.address2(), address.prefix_length],
        )?;
        Ok(())
    }

    pub fn add_module(
        &self,
        device_id: i64,
        serial_number: &str,
        part_number: &str,
        removed: bool,
    ) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO device_module (device_id, serial_number, part_number, removed)
             VALUES (?1, ?2, ?3, ?4)",
            params![device_id, serial_number, part_number, removed],
        )?;
        Ok(())
    }

    pub fn add_vrf(&self, device_id: i64, name: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("INSERT INTO device_vrf (device_id, name) VALUES (?1, ?2)", params![device_id, name])?;
        Ok(())
    }

    pub fn add_virtual_name(&self, device_id: i64, name: &str) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO device_virtual_name (device_id, name) VALUES (?1, ?2)",
            params![device_id, name],
        )?;
        Ok(())
    }

    pub fn set_device_attribute(
        &self,
        device_id: i64,
        name: &str,
        value: &AttributeValue,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT OR REPLACE INTO device_attribute (device_id, name, {}) VALUES (?1, ?2, ?3)",
            value.column()
        );
        self.conn.lock().execute(&sql, params![device_id, name, value.to_sql()])?;
        Ok(())
    }

    pub fn set_config_attribute(
        &self,
        config_id: i64,
        name: &str,
        value: &AttributeValue,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT OR REPLACE INTO config_attribute (config_id, name, {}) VALUES (?1, ?2, ?3)",
            value.column()
        );
        self.conn.lock().execute(&sql, params![config_id, name, value.to_sql()])?;
        Ok(())
    }

    pub fn set_diagnostic_result(
        &self,
        device_id: i64,
        diagnostic_id: i64,
        value: &AttributeValue,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT OR REPLACE INTO diagnostic_result (device_id, diagnostic_id, {}) VALUES (?1, ?2, ?3)",
            value.column()
        );
        self.conn.lock().execute(&sql, params![device_id, diagnostic_id, value.to_sql()])?;
        Ok(())
    }

    pub fn set_check_result(
        &self,
        device_id: i64,
        rule_id: i64,
        result: CheckResult,
    ) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO check_result (device_id, rule_id, result) VALUES (?1, ?2, ?3)",
            params![device_id, rule_id, result.as_str()],
        )?;
        Ok(())
    }
}

fn members(conn: &Connection, group_id: i64) -> Result<BTreeSet<i64>, StoreError> {
    let mut stmt = conn.prepare("SELECT device_id FROM group_member WHERE group_id = ?1")?;
    let rows = stmt.query_map([group_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<BTreeSet<i64>, _>>()?)
}

fn group_row(conn: &Connection, id: i64, dynamic: bool) -> Result<(String, Option<String>, String), StoreError> {
    conn.query_row(
        "SELECT name, driver_filter, query_text FROM device_group WHERE id = ?1 AND dynamic = ?2",
        params![id, dynamic],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()?
    .ok_or(StoreError::UnknownGroup(id))
}

impl DeviceStore for SqliteStore {
    fn find_devices(&self, query: &CompiledQuery) -> Result<Vec<i64>, StoreError> {
        let sql = query.sql();
        let values = query
            .parameters
            .iter()
            .map(|(name, value)| Ok((format!(":{name}"), to_sql_value(name, value)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let bindings: Vec<(&str, &dyn ToSql)> =
            values.iter().map(|(name, value)| (name.as_str(), value as &dyn ToSql)).collect();
        trace!(%sql, parameters = query.parameters.len(), "executing device query");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(bindings.as_slice(), |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<i64>, _>>()?)
    }
}

impl GroupStore for SqliteStore {
    fn dynamic_groups(&self) -> Result<Vec<DynamicGroup>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, driver_filter, query_text FROM device_group WHERE dynamic = 1 ORDER BY id",
        )?;
        let mut groups = stmt
            .query_map([], |row| {
                Ok(DynamicGroup {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    driver_filter: row.get(2)?,
                    query_text: row.get(3)?,
                    cached_members: BTreeSet::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for group in &mut groups {
            group.cached_members = members(&conn, group.id)?;
        }
        Ok(groups)
    }

    fn dynamic_group(&self, id: i64) -> Result<DynamicGroup, StoreError> {
        let conn = self.conn.lock();
        let (name, driver_filter, query_text) = group_row(&conn, id, true)?;
        Ok(DynamicGroup { id, name, driver_filter, query_text, cached_members: members(&conn, id)? })
    }

    fn create_dynamic_group(
        &self,
        name: &str,
        driver_filter: Option<&str>,
        query_text: &str,
    ) -> Result<DynamicGroup, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO device_group (name, dynamic, driver_filter, query_text) VALUES (?1, 1, ?2, ?3)",
            params![name, driver_filter, query_text],
        )?;
        Ok(DynamicGroup {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            driver_filter: driver_filter.map(str::to_string),
            query_text: query_text.to_string(),
            cached_members: BTreeSet::new(),
        })
    }

    fn group_members(&self, group_id: i64) -> Result<BTreeSet<i64>, StoreError> {
        members(&self.conn.lock(), group_id)
    }

    fn update_group(
        &self,
        group_id: i64,
        query_text: &str,
        added: &BTreeSet<i64>,
        removed: &BTreeSet<i64>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE device_group SET query_text = ?1 WHERE id = ?2",
            params![query_text, group_id],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownGroup(group_id));
        }
        for device_id in added {
            tx.execute(
                "INSERT OR IGNORE INTO group_member (group_id, device_id) VALUES (?1, ?2)",
                params![group_id, device_id],
            )?;
        }
        for device_id in removed {
            tx.execute(
                "DELETE FROM group_member WHERE group_id = ?1 AND device_id = ?2",
                params![group_id, device_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn apply_membership_changes(&self, changes: &[MembershipChange]) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for change in changes {
            let sql = match change.kind {
                ChangeKind::Added => {
                    "INSERT OR IGNORE INTO group_member (group_id, device_id) VALUES (?1, ?2)"
                }
                ChangeKind::Removed => {
                    "DELETE FROM group_member WHERE group_id = ?1 AND device_id = ?2"
                }
            };
            tx.execute(sql, params![change.group_id, change.device_id])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn create_static_group(&self, name: &str) -> Result<StaticGroup, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO device_group (name, dynamic) VALUES (?1, 0)",
            params![name],
        )?;
        Ok(StaticGroup::new(conn.last_insert_rowid(), name))
    }

    fn static_group(&self, id: i64) -> Result<StaticGroup, StoreError> {
        let conn = self.conn.lock();
        let (name, _, _) = group_row(&conn, id, false)?;
        let mut group = StaticGroup::new(id, name);
        for device_id in members(&conn, id)? {
            group.add(device_id);
        }
        Ok(group)
    }

    fn save_static_group(&self, group: &StaticGroup) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE device_group SET name = ?1 WHERE id = ?2 AND dynamic = 0",
            params![group.name, group.id],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownGroup(group.id));
        }
        tx.execute("DELETE FROM group_member WHERE group_id = ?1", [group.id])?;
        for device_id in group.members() {
            tx.execute(
                "INSERT INTO group_member (group_id, device_id) VALUES (?1, ?2)",
                params![group.id, device_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_group(&self, group_id: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM group_member WHERE group_id = ?1", [group_id])?;
        let deleted = tx.execute("DELETE FROM device_group WHERE id = ?1", [group_id])?;
        if deleted == 0 {
            return Err(StoreError::UnknownGroup(group_id));
        }
        tx.commit()?;
        debug!(group = group_id, "group deleted");
        Ok(())
    }
}

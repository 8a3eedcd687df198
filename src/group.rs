//! 设备组与成员缓存
//!
//! 动态组保存查询文本和成员缓存。全量刷新重新执行整条查询；增量检查只针对
//! 一台设备，对每个动态组执行 `[ID] is 设备 and (查询)`，所有组的变更在一个
//! 事务中落库。两条路径共用进程级的 [`MEMBERSHIP_LOCK`]，同一时刻只有一个
//! 刷新在读写成员表。

use std::collections::BTreeSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{GroupError, ParseError};
use crate::parser::parse_query;
use crate::registry::{ParseContext, Registry};
use crate::sql_compiler::Query;
use crate::store::{DeviceStore, GroupStore};

/// 成员表的全局串行化点，没有超时也没有排队优先级
pub static MEMBERSHIP_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// 成员变更方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Removed,
}

/// 单条成员变更
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MembershipChange {
    pub group_id: i64,
    pub device_id: i64,
    pub kind: ChangeKind,
}

/// 由查询决定成员的设备组
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicGroup {
    pub id: i64,
    pub name: String,
    /// 仅包含该驱动的设备，同时作为解析时的驱动上下文
    pub driver_filter: Option<String>,
    pub query_text: String,
    pub cached_members: BTreeSet<i64>,
}

impl DynamicGroup {
    fn context<'a>(&'a self, registry: &'a dyn Registry) -> ParseContext<'a> {
        let driver = self.driver_filter.as_deref().and_then(|name| registry.driver_by_name(name));
        ParseContext::with_driver(registry, driver)
    }

    /// 在组的驱动上下文中解析查询文本
    pub fn query(&self, registry: &dyn Registry) -> Result<Query, ParseError> {
        parse_query(&self.query_text, &self.context(registry))
    }

    fn parsed(&self, registry: &dyn Registry) -> Result<Query, GroupError> {
        self.query(registry).map_err(|source| GroupError::Parse { group: self.id, source })
    }

    /// 解析成功时把查询文本替换为规范形式
    pub fn validate_query(&mut self, registry: &dyn Registry) -> Result<(), ParseError> {
        let query = self.query(registry)?;
        self.query_text = query.canonical_text().to_string();
        Ok(())
    }

    /// 单台设备当前是否满足组的查询（不读取缓存）
    pub fn check_device_membership<S: DeviceStore + ?Sized>(
        &self,
        store: &S,
        registry: &dyn Registry,
        device_id: i64,
    ) -> Result<bool, GroupError> {
        let query = self.parsed(registry)?;
        is_match(&query, store, self.driver_filter.as_deref(), device_id)
    }

    /// 全量刷新：重新执行查询，把成员缓存对齐到结果集
    ///
    /// 差异以存储中的成员行为准，而不是内存缓存，过期的副本刷新后存储同样等于
    /// 结果集。先持久化差异，成功后才修改内存中的缓存；解析失败时缓存和存储都不变。
    pub fn refresh_cache<S: GroupStore + ?Sized>(
        &mut self,
        store: &S,
        registry: &dyn Registry,
    ) -> Result<(), GroupError> {
        let _guard = MEMBERSHIP_LOCK.lock();
        let query = self.parsed(registry)?;
        let members: BTreeSet<i64> =
            query.execute(store, self.driver_filter.as_deref())?.into_iter().collect();

        let stored = store.group_members(self.id)?;
        let added: BTreeSet<i64> = members.difference(&stored).copied().collect();
        let removed: BTreeSet<i64> = stored.difference(&members).copied().collect();
        let canonical = query.canonical_text().to_string();
        store.update_group(self.id, &canonical, &added, &removed)?;

        self.cached_members = members;
        self.query_text = canonical;
        debug!(
            group = self.id,
            members = self.cached_members.len(),
            added = added.len(),
            removed = removed.len(),
            "group cache refreshed"
        );
        Ok(())
    }
}

fn is_match<S: DeviceStore + ?Sized>(
    query: &Query,
    store: &S,
    driver_filter: Option<&str>,
    device_id: i64,
) -> Result<bool, GroupError> {
    let found = query.restricted_to(device_id).execute(store, driver_filter)?;
    Ok(found.contains(&device_id))
}

/// 设备变更后重新检查它在所有动态组中的成员关系
pub fn refresh_all_groups<S: GroupStore + ?Sized>(
    store: &S,
    registry: &dyn Registry,
    device_id: i64,
) -> Result<Vec<MembershipChange>, GroupError> {
    refresh_all_groups_of_devices(store, registry, &[device_id])
}

/// 批量版本：所有设备、所有组的变更在同一事务中提交
///
/// 查询无法解析的组记录警告后跳过；其它错误中止整个批次，不留下部分结果。
pub fn refresh_all_groups_of_devices<S: GroupStore + ?Sized>(
    store: &S,
    registry: &dyn Registry,
    device_ids: &[i64],
) -> Result<Vec<MembershipChange>, GroupError> {
    let _guard = MEMBERSHIP_LOCK.lock();
    let groups = store.dynamic_groups()?;
    let mut changes = Vec::new();
    for group in &groups {
        let query = match group.query(registry) {
            Ok(query) => query,
            Err(e) => {
                warn!(group = group.id, name = %group.name, error = %e, "skipping group with invalid query");
                continue;
            }
        };
        for &device_id in device_ids {
            let matches = is_match(&query, store, group.driver_filter.as_deref(), device_id)?;
            let kind = match (matches, group.cached_members.contains(&device_id)) {
                (true, false) => ChangeKind::Added,
                (false, true) => ChangeKind::Removed,
                _ => continue,
            };
            changes.push(MembershipChange { group_id: group.id, device_id, kind });
        }
    }
    store.apply_membership_changes(&changes)?;
    if !changes.is_empty() {
        info!(devices = device_ids.len(), changes = changes.len(), "group memberships updated");
    }
    Ok(changes)
}

/// 手工维护成员的设备组
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticGroup {
    pub id: i64,
    pub name: String,
    members: BTreeSet<i64>,
}

impl StaticGroup {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self { id, name: name.into(), members: BTreeSet::new() }
    }

    /// 返回是否为新成员
    pub fn add(&mut self, device_id: i64) -> bool {
        self.members.insert(device_id)
    }

    pub fn remove(&mut self, device_id: i64) -> bool {
        self.members.remove(&device_id)
    }

    pub fn contains(&self, device_id: i64) -> bool {
        self.members.contains(&device_id)
    }

    pub fn members(&self) -> &BTreeSet<i64> {
        &self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::literal::{CheckResult, Ipv4Network};
    use crate::registry::sample_registry;
    use crate::store::{AttributeValue, NewDevice, SqliteStore};

    struct Fixture {
        store: SqliteStore,
        devices: Vec<i64>,
    }

    fn fixture() -> Fixture {
        let store = SqliteStore::in_memory().unwrap();
        let mut devices = Vec::new();
        for (i, name) in ["core-router-1", "core-router-2", "access-sw-1", "edge-fw-1"].iter().enumerate() {
            let driver = if i < 3 { "CiscoIOS12" } else { "JuniperJunos" };
            let address = Ipv4Network::parse(&format!("10.0.0.{}", i + 1)).unwrap();
            devices.push(store.add_device(&NewDevice::new(*name, driver).with_management(address)).unwrap());
        }
        Fixture { store, devices }
    }

    #[test]
    fn test_refresh_cache_converges() {
        let f = fixture();
        let registry = sample_registry();
        let mut group = f
            .store
            .create_dynamic_group("routers", None, r#"[name]   CONTAINSNOCASE "ROUTER""#)
            .unwrap();
        group.cached_members.insert(f.devices[3]);

        group.refresh_cache(&f.store, &registry).unwrap();
        assert_eq!(group.cached_members, BTreeSet::from([f.devices[0], f.devices[1]]));
        assert_eq!(group.query_text, r#"[Name] containsnocase "ROUTER""#);
        assert_eq!(f.store.group_members(group.id).unwrap(), group.cached_members);
        assert_eq!(f.store.dynamic_group(group.id).unwrap().query_text, group.query_text);

        for &device in &f.devices {
            assert_eq!(
                group.cached_members.contains(&device),
                group.check_device_membership(&f.store, &registry, device).unwrap()
            );
        }
    }

    #[test]
    fn test_refresh_cache_parse_error_keeps_cache() {
        let f = fixture();
        let registry = sample_registry();
        let mut group = f.store.create_dynamic_group("broken", None, "[Name] is").unwrap();
        group.cached_members.insert(f.devices[0]);
        let err = group.refresh_cache(&f.store, &registry).unwrap_err();
        assert!(matches!(err, GroupError::Parse { .. }));
        assert_eq!(group.cached_members, BTreeSet::from([f.devices[0]]));
        assert_eq!(group.query_text, "[Name] is");
    }

    #[test]
    fn test_driver_filter_and_context() {
        let f = fixture();
        let registry = sample_registry();
        f.store
            .set_device_attribute(f.devices[0], "mainMemorySize", &AttributeValue::Number(2048.0))
            .unwrap();
        f.store
            .set_device_attribute(f.devices[3], "mainMemorySize", &AttributeValue::Number(4096.0))
            .unwrap();
        let mut group = f
            .store
            .create_dynamic_group("big", Some("CiscoIOS12"), "[Main memory size] greaterthan 1000")
            .unwrap();
        group.refresh_cache(&f.store, &registry).unwrap();
        assert_eq!(group.cached_members, BTreeSet::from([f.devices[0]]));
        assert_eq!(
            group.query_text,
            "[Cisco IOS and IOS-XE > Main memory size] greaterthan 1000"
        );

        let mut empty = f.store.create_dynamic_group("cisco", Some("CiscoIOS12"), "").unwrap();
        empty.refresh_cache(&f.store, &registry).unwrap();
        assert_eq!(empty.cached_members.len(), 3);
    }

    #[test]
    fn test_validate_query_canonicalizes() {
        let registry = sample_registry();
        let mut group = DynamicGroup {
            id: 1,
            name: "g".into(),
            driver_filter: None,
            query_text: r#"[IP] IN 10.0.0.0/8 AND [Status] IS "INPRODUCTION""#.into(),
            cached_members: BTreeSet::new(),
        };
        group.validate_query(&registry).unwrap();
        assert_eq!(group.query_text, r#"([IP] in 10.0.0.0/8) and ([Status] is "INPRODUCTION")"#);

        group.query_text = "[IP] is".into();
        assert!(group.validate_query(&registry).is_err());
        assert_eq!(group.query_text, "[IP] is");
    }

    #[test]
    fn test_incremental_refresh_touches_only_device() {
        let f = fixture();
        let registry = sample_registry();
        let mut routers = f
            .store
            .create_dynamic_group("routers", None, r#"[Name] contains "router""#)
            .unwrap();
        let mut telnet = f
            .store
            .create_dynamic_group("telnet", None, r#"[Rule > Security > NoTelnet] is "NONCONFORMING""#)
            .unwrap();
        routers.refresh_cache(&f.store, &registry).unwrap();
        telnet.refresh_cache(&f.store, &registry).unwrap();
        assert!(telnet.cached_members.is_empty());

        // 两台设备都变化，但只为其中一台做增量检查
        f.store.rename_device(f.devices[0], "core-switch-1").unwrap();
        f.store.rename_device(f.devices[2], "access-router-1").unwrap();
        f.store.set_check_result(f.devices[0], 100, CheckResult::NonConforming).unwrap();

        let changes = refresh_all_groups(&f.store, &registry, f.devices[0]).unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.device_id == f.devices[0]));
        assert!(changes.contains(&MembershipChange {
            group_id: routers.id,
            device_id: f.devices[0],
            kind: ChangeKind::Removed,
        }));
        assert!(changes.contains(&MembershipChange {
            group_id: telnet.id,
            device_id: f.devices[0],
            kind: ChangeKind::Added,
        }));
        assert_eq!(f.store.group_members(routers.id).unwrap(), BTreeSet::from([f.devices[1]]));
        assert_eq!(f.store.group_members(telnet.id).unwrap(), BTreeSet::from([f.devices[0]]));

        // 与全量刷新的结论一致
        let mut full = f.store.dynamic_group(telnet.id).unwrap();
        full.refresh_cache(&f.store, &registry).unwrap();
        assert_eq!(full.cached_members, BTreeSet::from([f.devices[0]]));

        // 再次检查没有变更
        assert!(refresh_all_groups(&f.store, &registry, f.devices[0]).unwrap().is_empty());
    }

    #[test]
    fn test_incremental_refresh_skips_broken_groups() {
        let f = fixture();
        let registry = sample_registry();
        f.store.create_dynamic_group("broken", None, "[Unknown field] is \"x\"").unwrap();
        let all = f.store.create_dynamic_group("all", None, "").unwrap();

        let changes = refresh_all_groups_of_devices(&f.store, &registry, &f.devices).unwrap();
        assert_eq!(changes.len(), f.devices.len());
        assert!(changes.iter().all(|c| c.group_id == all.id && c.kind == ChangeKind::Added));
        assert_eq!(f.store.group_members(all.id).unwrap().len(), f.devices.len());
    }

    #[test]
    fn test_refresh_stale_group_reconciles_stored_rows() {
        let f = fixture();
        let registry = sample_registry();
        let mut current = f
            .store
            .create_dynamic_group("routers", None, r#"[Name] contains "router""#)
            .unwrap();
        let mut stale = current.clone();

        current.refresh_cache(&f.store, &registry).unwrap();
        assert_eq!(
            f.store.group_members(current.id).unwrap(),
            BTreeSet::from([f.devices[0], f.devices[1]])
        );

        // 副本的缓存仍为空，不知道存储里已有两名成员
        f.store.rename_device(f.devices[0], "core-switch-1").unwrap();
        stale.refresh_cache(&f.store, &registry).unwrap();
        assert_eq!(stale.cached_members, BTreeSet::from([f.devices[1]]));
        assert_eq!(f.store.group_members(stale.id).unwrap(), BTreeSet::from([f.devices[1]]));
    }

    #[test]
    fn test_concurrent_refreshes_leave_consistent_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("finder.db")).unwrap();
        let registry = sample_registry();
        let mut devices = Vec::new();
        for i in 0..12 {
            let name = if i % 2 == 0 { format!("core-router-{i}") } else { format!("access-sw-{i}") };
            let driver = if i % 3 == 0 { "JuniperJunos" } else { "CiscoIOS12" };
            let address = Ipv4Network::parse(&format!("10.0.{}.{}", i % 4, i + 1)).unwrap();
            devices.push(store.add_device(&NewDevice::new(name, driver).with_management(address)).unwrap());
        }
        let queries = [
            (None, r#"[Name] contains "router""#),
            (None, "[IP] in 10.0.0.0/23"),
            (Some("CiscoIOS12"), ""),
            (None, r#"not [Name] contains "sw""#),
        ];
        let groups: Vec<i64> = queries
            .iter()
            .enumerate()
            .map(|(i, (driver, text))| store.create_dynamic_group(&format!("g{i}"), *driver, text).unwrap().id)
            .collect();
        for &id in &groups {
            store.dynamic_group(id).unwrap().refresh_cache(&store, &registry).unwrap();
        }

        std::thread::scope(|scope| {
            // 设备改名后立即做增量检查
            scope.spawn(|| {
                for (round, &device) in devices.iter().enumerate() {
                    let name = if round % 2 == 0 { format!("edge-sw-{round}") } else { format!("edge-router-{round}") };
                    store.rename_device(device, &name).unwrap();
                    refresh_all_groups(&store, &registry, device).unwrap();
                }
            });
            for &id in &groups {
                let (store, registry) = (&store, &registry);
                scope.spawn(move || {
                    for _ in 0..5 {
                        let mut group = store.dynamic_group(id).unwrap();
                        group.refresh_cache(store, registry).unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..5 {
                    refresh_all_groups_of_devices(&store, &registry, &devices).unwrap();
                }
            });
        });

        for &id in &groups {
            let group = store.dynamic_group(id).unwrap();
            let expected: BTreeSet<i64> = group
                .query(&registry)
                .unwrap()
                .execute(&store, group.driver_filter.as_deref())
                .unwrap()
                .into_iter()
                .collect();
            assert_eq!(store.group_members(id).unwrap(), expected, "group {}", group.name);
            assert_eq!(group.cached_members, expected);
        }
    }
}

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use device_finder::config::AppConfig;
use device_finder::group::refresh_all_groups;
use device_finder::parse_query;
use device_finder::registry::ParseContext;
use device_finder::store::{GroupStore, SqliteStore};

const CONFIG_FILE: &str = "finder.json";

fn print_help() {
    println!("输入查询语句直接执行，例如: [Name] containsnocase \"router\" and [IP] in 10.0.0.0/8");
    println!("  :groups                     列出动态组及成员");
    println!("  :group <名称> <查询>        创建动态组并刷新成员");
    println!("  :refresh <设备ID>           重新检查设备在所有动态组中的成员关系");
    println!("  :help                       显示帮助");
    println!("  :quit                       退出");
}

/// 解析、编译并执行一条查询
fn run_query(store: &SqliteStore, config: &AppConfig, text: &str) -> Result<()> {
    let query = match parse_query(text, &ParseContext::new(&config.registry)) {
        Ok(query) => query,
        Err(e) => {
            println!("✗ {}", e.message);
            if let Some(position) = e.position {
                println!("  {}", text.trim());
                println!("  {}^", " ".repeat(position.saturating_sub(1)));
            }
            return Ok(());
        }
    };
    let compiled = query.compile(None);
    println!("[规范文本]: {}", query.canonical_text());
    println!("[SQL]: {}", compiled.sql());
    for (name, value) in compiled.parameters.iter() {
        println!("  :{} = {:?}", name, value);
    }
    let devices = query.execute(store, None)?;
    println!("✓ 匹配 {} 台设备: {:?}", devices.len(), devices);
    Ok(())
}

fn list_groups(store: &SqliteStore) -> Result<()> {
    for group in store.dynamic_groups()? {
        println!(
            "#{} {} [{}] -> {:?}",
            group.id,
            group.name,
            group.query_text,
            group.cached_members
        );
    }
    Ok(())
}

fn create_group(store: &SqliteStore, config: &AppConfig, args: &str) -> Result<()> {
    let (name, text) = args.split_once(' ').unwrap_or((args, ""));
    let mut group = store.create_dynamic_group(name, None, text)?;
    match group.refresh_cache(store, &config.registry) {
        Ok(()) => println!("✓ 组 #{} 共 {} 台设备", group.id, group.cached_members.len()),
        Err(e) => println!("✗ {}", e),
    }
    Ok(())
}

fn refresh_device(store: &SqliteStore, config: &AppConfig, args: &str) -> Result<()> {
    let device_id: i64 = args.trim().parse().context("设备ID必须是整数")?;
    let changes = refresh_all_groups(store, &config.registry, device_id)?;
    println!("✓ {} 处成员变更", changes.len());
    for change in changes {
        println!("  组 #{} {:?}", change.group_id, change.kind);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_FILE.to_string());
    let config = AppConfig::load_or_default(&path);
    let store = match &config.database {
        Some(database) => SqliteStore::open(database)
            .with_context(|| format!("无法打开数据库 {}", database.display()))?,
        None => SqliteStore::in_memory()?,
    };

    println!("--- Device Finder: 查询语言到 SQL 编译器 ---");
    println!("已加载 {} 个驱动，输入 :help 查看命令", config.registry.drivers.len());

    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match editor.readline("finder> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        let result = match line.split_once(' ').unwrap_or((line, "")) {
            (":quit" | ":q", _) => break,
            (":help", _) => {
                print_help();
                Ok(())
            }
            (":groups", _) => list_groups(&store),
            (":group", args) => create_group(&store, &config, args),
            (":refresh", args) => refresh_device(&store, &config, args),
            _ => run_query(&store, &config, line),
        };
        if let Err(e) = result {
            println!("✗ {:#}", e);
        }
    }
    Ok(())
}

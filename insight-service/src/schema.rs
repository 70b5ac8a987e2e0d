//! Schema introspection.
//!
//! One representative table's DDL stands in for every configured target.
//! The DDL is also snapshotted to disk at startup so tool descriptions can
//! be built from it without touching the database again.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::errors::{AppError, AppResult};
use common::models::TargetTable;
use serde_json::Value;

use crate::pool_manager::PoolRegistry;

const SNAPSHOT_FILE: &str = "schema_snapshot.sql";

pub struct SchemaIntrospector {
    registry: Arc<PoolRegistry>,
    targets: Vec<TargetTable>,
}

impl SchemaIntrospector {
    pub fn new(registry: Arc<PoolRegistry>, targets: Vec<TargetTable>) -> Self {
        Self { registry, targets }
    }

    /// Raw `SHOW CREATE TABLE` text of one target.
    pub async fn fetch_ddl(&self, target: &TargetTable) -> AppResult<String> {
        let pool = self.registry.acquire_target(target).await?;
        let sql = format!("SHOW CREATE TABLE {}", quote_ident(&target.table));
        let rows = pool.fetch_all(&sql).await?;

        rows.iter()
            .find_map(|row| row.get("Create Table").and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::DatabaseQuery(format!("{} 没有返回建表语句", target.qualified()))
            })
    }

    /// DDL of the first target, prefixed with the list of all targets.
    pub async fn describe(&self) -> AppResult<String> {
        let representative = self
            .targets
            .first()
            .ok_or_else(|| AppError::Config("没有配置目标表".into()))?;
        let ddl = self.fetch_ddl(representative).await?;
        Ok(format_description(&self.targets, &ddl))
    }

    /// Fails when any target's structure differs from the first one's.
    pub async fn verify_identical(&self) -> AppResult<()> {
        let Some((first, rest)) = self.targets.split_first() else {
            return Ok(());
        };
        let expected = normalize_ddl(&self.fetch_ddl(first).await?, &first.table);

        for target in rest {
            let actual = normalize_ddl(&self.fetch_ddl(target).await?, &target.table);
            if actual != expected {
                tracing::error!(expected = %first, actual = %target, "目标表结构不一致");
                return Err(AppError::SchemaMismatch(format!(
                    "{} 与 {} 的表结构不同",
                    target, first
                )));
            }
        }
        tracing::info!(targets = self.targets.len(), "目标表结构一致");
        Ok(())
    }

    /// `database.table` for every table in the configured databases.
    pub async fn list_tables(&self) -> AppResult<Vec<String>> {
        let mut tables = BTreeSet::new();
        let mut seen = BTreeSet::new();

        for target in &self.targets {
            if !seen.insert(target.database.as_str()) {
                continue;
            }
            let pool = self.registry.acquire(&target.database).await?;
            for row in pool.fetch_all("SHOW TABLES").await? {
                if let Some(name) = row.values().next().and_then(Value::as_str) {
                    tables.insert(format!("{}.{}", target.database, name));
                }
            }
        }
        Ok(tables.into_iter().collect())
    }
}

/// Prefixes `ddl` with the names of every target.
pub fn format_description(targets: &[TargetTable], ddl: &str) -> String {
    let names: Vec<String> = targets.iter().map(TargetTable::qualified).collect();
    let prefix = if names.len() > 1 {
        format!(
            "表 [{}] 的结构信息如下（{}个表DDL是相同的）：\n",
            names.join(", "),
            names.len()
        )
    } else {
        format!("表 {} 的结构信息如下：\n", names.join(""))
    };
    format!("{}{}\n", prefix, ddl)
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Strips the parts of a DDL that legitimately differ between shards.
fn normalize_ddl(ddl: &str, table: &str) -> String {
    let own_name = quote_ident(table);
    ddl.split_whitespace()
        .filter(|token| !token.to_ascii_uppercase().starts_with("AUTO_INCREMENT="))
        .map(|token| if token == own_name { "`<table>`" } else { token })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============== Snapshot ==============

/// On-disk copy of the representative DDL. Never invalidated.
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    path: PathBuf,
}

impl SchemaSnapshot {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SNAPSHOT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, ddl: &str) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, ddl).await?;
        tracing::info!(path = %self.path.display(), "表结构快照已写入");
        Ok(())
    }

    /// Blocking read for the description builder.
    pub fn read(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(ddl) if !ddl.trim().is_empty() => Some(ddl),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "表结构快照不可用");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;

    const DDL_A: &str = "CREATE TABLE `wx_record` (\n  `id` bigint NOT NULL AUTO_INCREMENT,\n  `content` text,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB AUTO_INCREMENT=120 DEFAULT CHARSET=utf8mb4";
    const DDL_B: &str = "CREATE TABLE `wx_record` (\n  `id` bigint NOT NULL AUTO_INCREMENT,\n  `content` text,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB AUTO_INCREMENT=7 DEFAULT CHARSET=utf8mb4";
    const DDL_OTHER: &str = "CREATE TABLE `wx_record` (\n  `id` int NOT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB";

    fn targets() -> Vec<TargetTable> {
        vec![
            TargetTable::new("test1", "wx_record"),
            TargetTable::new("test2", "wx_record"),
        ]
    }

    fn introspector(connector: MockConnector) -> (Arc<MockConnector>, SchemaIntrospector) {
        let connector = Arc::new(connector);
        let registry = Arc::new(PoolRegistry::new(connector.clone()));
        (connector, SchemaIntrospector::new(registry, targets()))
    }

    #[tokio::test]
    async fn test_describe_uses_first_target_only() {
        let (connector, schema) =
            introspector(MockConnector::new().with_ddl("test1", DDL_A).with_ddl("test2", DDL_OTHER));

        let text = schema.describe().await.unwrap();

        assert!(text.starts_with("表 [test1.wx_record, test2.wx_record] 的结构信息如下（2个表DDL是相同的）：\n"));
        assert!(text.contains("`content` text"));
        let dbs: Vec<_> = connector.executed().into_iter().map(|(db, _)| db).collect();
        assert_eq!(dbs, vec!["test1"]);
    }

    #[test]
    fn test_single_target_prefix() {
        let text = format_description(&[TargetTable::new("test1", "wx_record")], "CREATE TABLE x");
        assert_eq!(text, "表 test1.wx_record 的结构信息如下：\nCREATE TABLE x\n");
    }

    #[tokio::test]
    async fn test_missing_table_propagates() {
        let (_, schema) = introspector(MockConnector::new());
        assert!(matches!(schema.describe().await.unwrap_err(), AppError::DatabaseQuery(_)));
    }

    #[tokio::test]
    async fn test_verify_ignores_auto_increment_counter() {
        let (_, schema) =
            introspector(MockConnector::new().with_ddl("test1", DDL_A).with_ddl("test2", DDL_B));
        assert!(schema.verify_identical().await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_detects_mismatch() {
        let (_, schema) =
            introspector(MockConnector::new().with_ddl("test1", DDL_A).with_ddl("test2", DDL_OTHER));
        let err = schema.verify_identical().await.unwrap_err();
        assert!(matches!(err, AppError::SchemaMismatch(_)));
        assert!(err.to_string().contains("test2.wx_record"));
    }

    #[tokio::test]
    async fn test_list_tables_prefixes_database() {
        let (_, schema) = introspector(
            MockConnector::new()
                .with_tables("test1", &["wx_record", "wx_contact"])
                .with_tables("test2", &["wx_record"]),
        );

        let tables = schema.list_tables().await.unwrap();

        assert_eq!(
            tables,
            vec!["test1.wx_contact", "test1.wx_record", "test2.wx_record"]
        );
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = std::env::temp_dir().join(format!("chatinsight-snapshot-{}", std::process::id()));
        let snapshot = SchemaSnapshot::in_dir(&dir);

        assert!(snapshot.read().is_none());
        snapshot.write(DDL_A).await.unwrap();
        assert_eq!(snapshot.read().as_deref(), Some(DDL_A));

        let _ = std::fs::remove_dir_all(&dir);
    }
}

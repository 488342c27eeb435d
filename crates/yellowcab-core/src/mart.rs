//! Provisioning of the dimensional data mart.

use std::path::Path;

use serde::Serialize;
use tracing::{error, info};

use crate::db::{Provisioner, ScriptRunner};
use crate::error::Result;

pub const CREATION_SCRIPT: &str = "creation.sql";
pub const INSERTION_SCRIPT: &str = "insertion.sql";

/// Tables created by the schema script, facts last.
pub const MART_TABLES: [&str; 5] = [
    "dimension_vendor",
    "dimension_time",
    "dimension_zone",
    "dimension_payment",
    "fact_yellow_taxi",
];

const EMBEDDED_CREATION: &str = include_str!("../sql/creation.sql");
const EMBEDDED_INSERTION: &str = include_str!("../sql/insertion.sql");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MartScripts {
    pub creation: String,
    pub insertion: String,
}

impl Default for MartScripts {
    fn default() -> Self {
        Self {
            creation: EMBEDDED_CREATION.to_string(),
            insertion: EMBEDDED_INSERTION.to_string(),
        }
    }
}

impl MartScripts {
    /// Embedded scripts, each replaced by the same-named file in `dir` when
    /// one exists there.
    pub async fn load(dir: Option<&Path>) -> Result<Self> {
        let mut scripts = Self::default();
        let Some(dir) = dir else {
            return Ok(scripts);
        };

        if let Some(sql) = read_override(&dir.join(CREATION_SCRIPT)).await? {
            scripts.creation = sql;
        }
        if let Some(sql) = read_override(&dir.join(INSERTION_SCRIPT)).await? {
            scripts.insertion = sql;
        }
        Ok(scripts)
    }
}

async fn read_override(path: &Path) -> Result<Option<String>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }
    info!(path = %path.display(), "using mart script override");
    Ok(Some(tokio::fs::read_to_string(path).await?))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MartReport {
    pub database: String,
    pub database_created: bool,
    pub seeded: bool,
}

pub struct MartBuilder<'a> {
    provisioner: &'a dyn Provisioner,
    runner: &'a dyn ScriptRunner,
    database: String,
    scripts: MartScripts,
}

impl<'a> MartBuilder<'a> {
    pub fn new(
        provisioner: &'a dyn Provisioner,
        runner: &'a dyn ScriptRunner,
        database: impl Into<String>,
        scripts: MartScripts,
    ) -> Self {
        Self {
            provisioner,
            runner,
            database: database.into(),
            scripts,
        }
    }

    pub async fn create(&self, with_seed: bool) -> Result<MartReport> {
        let database_created = if self.provisioner.database_exists(&self.database).await? {
            false
        } else {
            self.provisioner.create_database(&self.database).await?;
            info!(database = %self.database, "mart database created");
            true
        };

        self.run(CREATION_SCRIPT, &self.scripts.creation).await?;
        info!(database = %self.database, "mart tables created");

        if with_seed {
            self.run(INSERTION_SCRIPT, &self.scripts.insertion).await?;
            info!(database = %self.database, "mart reference rows inserted");
        }

        Ok(MartReport {
            database: self.database.clone(),
            database_created,
            seeded: with_seed,
        })
    }

    async fn run(&self, name: &str, sql: &str) -> Result<()> {
        self.runner
            .run_script(&self.database, name, sql)
            .await
            .inspect_err(|err| {
                error!(database = %self.database, script = name, error = %err, "mart script failed")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_schema_declares_every_mart_table() {
        let scripts = MartScripts::default();
        for table in MART_TABLES {
            assert!(
                scripts
                    .creation
                    .contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "{table} missing from schema"
            );
        }
        assert!(scripts.insertion.contains("dimension_payment"));
    }

    #[tokio::test]
    async fn directory_overrides_only_present_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(INSERTION_SCRIPT), "SELECT 1;")
            .await
            .unwrap();

        let scripts = MartScripts::load(Some(dir.path())).await.unwrap();
        assert_eq!(scripts.insertion, "SELECT 1;");
        assert_eq!(scripts.creation, MartScripts::default().creation);
    }
}

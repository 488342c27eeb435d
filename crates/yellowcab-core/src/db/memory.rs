use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Catalog, Provisioner, ReplaceWindow, ScriptRunner, TableSink};
use crate::dataset::{Cell, TableBatch};
use crate::error::{PipelineError, Result};

#[derive(Debug, Default, Clone)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Default)]
struct ServerState {
    databases: HashMap<String, HashMap<String, MemoryTable>>,
    scripts: Vec<(String, String)>,
}

/// In-process stand-in for a PostgreSQL server, used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
    unreachable: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    fail_scripts: Arc<AtomicBool>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Makes every subsequent [`TableSink::write`] fail after provisioning.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent [`ScriptRunner::run_script`] fail without
    /// recording the script.
    pub fn set_fail_scripts(&self, fail: bool) {
        self.fail_scripts.store(fail, Ordering::SeqCst);
    }

    pub fn create_table(&self, database: &str, table: &str) {
        let mut state = self.lock();
        state
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(table.to_string())
            .or_default();
    }

    pub fn has_database(&self, database: &str) -> bool {
        self.lock().databases.contains_key(database)
    }

    pub fn column_names(&self, database: &str, table: &str) -> Option<Vec<String>> {
        let state = self.lock();
        state
            .databases
            .get(database)
            .and_then(|tables| tables.get(table))
            .map(|table| table.columns.clone())
    }

    pub fn rows(&self, database: &str, table: &str) -> Vec<Vec<Cell>> {
        let state = self.lock();
        state
            .databases
            .get(database)
            .and_then(|tables| tables.get(table))
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    /// Names of the scripts executed so far, in order.
    pub fn executed_scripts(&self) -> Vec<String> {
        self.lock()
            .scripts
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(PipelineError::Sqlx(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Provisioner for MemoryServer {
    async fn database_exists(&self, database: &str) -> Result<bool> {
        self.ensure_reachable()?;
        Ok(self.has_database(database))
    }

    async fn create_database(&self, database: &str) -> Result<()> {
        self.ensure_reachable()?;
        let mut state = self.lock();
        if state.databases.contains_key(database) {
            return Err(PipelineError::Processing(format!(
                "database \"{database}\" already exists"
            )));
        }
        state.databases.insert(database.to_string(), HashMap::new());
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<()> {
        self.ensure_reachable()?;
        self.lock().databases.remove(database);
        Ok(())
    }
}

#[async_trait]
impl TableSink for MemoryServer {
    async fn write(
        &self,
        database: &str,
        table: &str,
        batch: &TableBatch,
        replace: Option<&ReplaceWindow>,
    ) -> Result<u64> {
        self.ensure_reachable()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PipelineError::Processing(format!(
                "simulated write failure on {database}.{table}"
            )));
        }

        let mut state = self.lock();
        let tables = state
            .databases
            .get_mut(database)
            .ok_or_else(|| missing_database(database))?;
        let stored = tables.entry(table.to_string()).or_default();
        if stored.columns.is_empty() {
            stored.columns = batch
                .columns()
                .iter()
                .map(|column| column.name.clone())
                .collect();
        }

        if let Some(window) = replace {
            let index = stored
                .columns
                .iter()
                .position(|name| name == &window.column)
                .ok_or_else(|| {
                    let column = &window.column;
                    PipelineError::Processing(format!("column \"{column}\" does not exist"))
                })?;
            stored.rows.retain(|row| match &row[index] {
                Cell::Timestamp(ts) => !(window.start <= *ts && *ts < window.end),
                _ => true,
            });
        }

        let positions: Vec<Option<usize>> = stored
            .columns
            .iter()
            .map(|name| batch.columns().iter().position(|column| &column.name == name))
            .collect();
        for row in 0..batch.row_count() {
            let cells = batch.row(row);
            stored.rows.push(
                positions
                    .iter()
                    .map(|position| position.map_or(Cell::Null, |p| cells[p].clone()))
                    .collect(),
            );
        }

        Ok(batch.row_count() as u64)
    }

    async fn row_count(&self, database: &str, table: &str) -> Result<i64> {
        self.ensure_reachable()?;
        Ok(self.rows(database, table).len() as i64)
    }
}

#[async_trait]
impl ScriptRunner for MemoryServer {
    async fn run_script(&self, database: &str, name: &str, sql: &str) -> Result<()> {
        self.ensure_reachable()?;
        if self.fail_scripts.load(Ordering::SeqCst) {
            return Err(PipelineError::Processing(format!(
                "simulated failure of {name} on {database}"
            )));
        }
        let mut state = self.lock();
        let tables = state
            .databases
            .get_mut(database)
            .ok_or_else(|| missing_database(database))?;
        for created in created_tables(sql) {
            tables.entry(created).or_default();
        }
        state.scripts.push((name.to_string(), sql.to_string()));
        Ok(())
    }
}

#[async_trait]
impl Catalog for MemoryServer {
    async fn ping(&self, database: &str) -> Result<()> {
        self.ensure_reachable()?;
        if self.has_database(database) {
            Ok(())
        } else {
            Err(missing_database(database))
        }
    }

    async fn relation_exists(&self, database: &str, table: &str) -> Result<bool> {
        self.ensure_reachable()?;
        let state = self.lock();
        Ok(state
            .databases
            .get(database)
            .is_some_and(|tables| tables.contains_key(table)))
    }
}

fn missing_database(database: &str) -> PipelineError {
    PipelineError::Processing(format!("database \"{database}\" does not exist"))
}

/// Table names declared by `CREATE TABLE [IF NOT EXISTS] name` statements.
fn created_tables(sql: &str) -> HashSet<String> {
    let tokens: Vec<&str> = sql
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|token| !token.is_empty())
        .collect();

    let mut names = HashSet::new();
    let mut idx = 0;
    while idx + 2 < tokens.len() {
        if tokens[idx].eq_ignore_ascii_case("create")
            && tokens[idx + 1].eq_ignore_ascii_case("table")
        {
            let mut name_idx = idx + 2;
            if tokens[name_idx].eq_ignore_ascii_case("if")
                && tokens.get(name_idx + 1).is_some_and(|t| t.eq_ignore_ascii_case("not"))
                && tokens.get(name_idx + 2).is_some_and(|t| t.eq_ignore_ascii_case("exists"))
            {
                name_idx += 3;
            }
            if let Some(name) = tokens.get(name_idx) {
                let name = name.trim_matches('"');
                let name = name.strip_prefix("public.").unwrap_or(name);
                names.insert(name.to_string());
            }
        }
        idx += 1;
    }
    names
}

//! 内存版事务存储（InMemoryDatabase）
//!
//! 以 JSON 行的形式保存任意实现了 `Row` 的类型，提供：
//! - 事务内暂存写入，提交时统一做版本校验并原子应用，回滚/丢弃时不留痕迹；
//! - 每次写入由存储层递增行版本（插入为 1）；
//! - 行级锁与 `select_for_update_skip_locked`，语义对齐 Postgres 的
//!   `FOR UPDATE SKIP LOCKED`：锁持有到事务结束，其他事务选取时直接跳过。
//!
//! 典型用途：测试环境、示例与本地开发。
use super::Row;
use crate::error::{DomainError, DomainResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type RowId = (&'static str, String);

struct StoredRow {
    seq: u64,
    version: i64,
    value: Value,
}

#[derive(Default)]
struct DatabaseState {
    tables: HashMap<&'static str, HashMap<String, StoredRow>>,
    locks: HashMap<RowId, u64>,
    next_tx_id: u64,
    next_seq: u64,
}

impl DatabaseState {
    fn committed_version(&self, table: &'static str, key: &str) -> Option<i64> {
        self.tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .map(|row| row.version)
    }

    fn release_locks(&mut self, tx_id: u64) {
        self.locks.retain(|_, owner| *owner != tx_id);
    }
}

fn lock_state(state: &Mutex<DatabaseState>) -> DomainResult<MutexGuard<'_, DatabaseState>> {
    state
        .lock()
        .map_err(|_| DomainError::database("in-memory database mutex poisoned"))
}

/// 简单的内存事务存储
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<Mutex<DatabaseState>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> DomainResult<InMemoryTx> {
        let mut state = lock_state(&self.state)?;
        state.next_tx_id += 1;
        Ok(InMemoryTx {
            id: state.next_tx_id,
            state: self.state.clone(),
            writes: Vec::new(),
            open: true,
        })
    }

    /// 读取已提交的全部行（按写入顺序），用于观察与断言
    pub fn all<T: Row>(&self) -> DomainResult<Vec<T>> {
        let state = lock_state(&self.state)?;
        let Some(rows) = state.tables.get(T::TABLE) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<&StoredRow> = rows.values().collect();
        rows.sort_by_key(|row| row.seq);
        rows.into_iter()
            .map(|row| decode::<T>(&row.value, row.version))
            .collect()
    }

    /// 读取已提交的单行
    pub fn get<T: Row>(&self, key: &str) -> DomainResult<Option<T>> {
        let state = lock_state(&self.state)?;
        state
            .tables
            .get(T::TABLE)
            .and_then(|rows| rows.get(key))
            .map(|row| decode::<T>(&row.value, row.version))
            .transpose()
    }

    /// 当前被事务持有的行锁数量
    pub fn held_locks(&self) -> DomainResult<usize> {
        Ok(lock_state(&self.state)?.locks.len())
    }
}

enum WriteKind {
    Insert,
    Update { expected: i64 },
}

struct StagedWrite {
    table: &'static str,
    key: String,
    kind: WriteKind,
    version: i64,
    value: Value,
}

/// 内存事务：写入先暂存，提交时原子应用
pub struct InMemoryTx {
    id: u64,
    state: Arc<Mutex<DatabaseState>>,
    writes: Vec<StagedWrite>,
    open: bool,
}

impl InMemoryTx {
    fn staged(&self, table: &'static str, key: &str) -> Option<&StagedWrite> {
        self.writes
            .iter()
            .rev()
            .find(|w| w.table == table && w.key == key)
    }

    fn ensure_open(&self) -> DomainResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(DomainError::database("transaction already finished"))
        }
    }

    /// 事务视角下读取单行（本事务暂存的写入优先）
    pub fn get<T: Row>(&self, key: &str) -> DomainResult<Option<T>> {
        self.ensure_open()?;
        if let Some(write) = self.staged(T::TABLE, key) {
            return decode::<T>(&write.value, write.version).map(Some);
        }

        let state = lock_state(&self.state)?;
        state
            .tables
            .get(T::TABLE)
            .and_then(|rows| rows.get(key))
            .map(|row| decode::<T>(&row.value, row.version))
            .transpose()
    }

    pub fn insert<T: Row>(&mut self, row: &T) -> DomainResult<T> {
        self.ensure_open()?;
        let key = row.key();
        let exists = self.staged(T::TABLE, &key).is_some()
            || lock_state(&self.state)?
                .committed_version(T::TABLE, &key)
                .is_some();
        if exists {
            return Err(DomainError::database(format!(
                "duplicate key {key} in {}",
                T::TABLE
            )));
        }

        self.stage(row, WriteKind::Insert, 1)
    }

    /// 带版本校验的更新：`row.version()` 必须等于当前可见版本
    pub fn update<T: Row>(&mut self, row: &T) -> DomainResult<T> {
        self.ensure_open()?;
        let key = row.key();

        let current = match self.staged(T::TABLE, &key) {
            Some(write) => write.version,
            None => {
                let mut state = lock_state(&self.state)?;
                let current = state.committed_version(T::TABLE, &key).ok_or_else(|| {
                    DomainError::not_found(format!("{key} in {}", T::TABLE))
                })?;
                let row_id = (T::TABLE, key.clone());
                match state.locks.get(&row_id) {
                    Some(owner) if *owner != self.id => {
                        return Err(DomainError::database(format!(
                            "row {key} in {} is locked by another transaction",
                            T::TABLE
                        )));
                    }
                    _ => {
                        state.locks.insert(row_id, self.id);
                    }
                }
                current
            }
        };

        if current != row.version() {
            return Err(DomainError::VersionConflict {
                key,
                expected: row.version(),
                actual: current,
            });
        }

        self.stage(row, WriteKind::Update { expected: current }, current + 1)
    }

    fn stage<T: Row>(&mut self, row: &T, kind: WriteKind, version: i64) -> DomainResult<T> {
        let mut stored = row.clone();
        stored.set_version(version);
        let value = serde_json::to_value(&stored)?;

        self.writes.push(StagedWrite {
            table: T::TABLE,
            key: row.key(),
            kind,
            version,
            value,
        });
        Ok(stored)
    }

    /// 选取至多 `limit` 条满足条件且未被其他事务锁定的行，并为本事务加锁
    pub fn select_for_update_skip_locked<T, F>(
        &mut self,
        limit: usize,
        filter: F,
    ) -> DomainResult<Vec<T>>
    where
        T: Row,
        F: Fn(&T) -> bool,
    {
        self.ensure_open()?;
        let mut state = lock_state(&self.state)?;
        let Some(rows) = state.tables.get(T::TABLE) else {
            return Ok(Vec::new());
        };

        let mut ordered: Vec<(&String, &StoredRow)> = rows.iter().collect();
        ordered.sort_by_key(|(_, row)| row.seq);

        let mut selected = Vec::new();
        for (key, row) in ordered {
            if selected.len() >= limit {
                break;
            }
            let row_id = (T::TABLE, key.clone());
            if state.locks.get(&row_id).is_some_and(|owner| *owner != self.id) {
                continue;
            }

            let candidate = match self.staged(T::TABLE, key) {
                Some(write) => decode::<T>(&write.value, write.version)?,
                None => decode::<T>(&row.value, row.version)?,
            };
            if filter(&candidate) {
                selected.push((row_id, candidate));
            }
        }

        let mut out = Vec::with_capacity(selected.len());
        for (row_id, candidate) in selected {
            state.locks.insert(row_id, self.id);
            out.push(candidate);
        }
        Ok(out)
    }

    pub fn commit(mut self) -> DomainResult<()> {
        self.ensure_open()?;
        self.open = false;
        let writes = std::mem::take(&mut self.writes);

        let mut state = lock_state(&self.state)?;

        // 先整体校验，再整体应用，保证提交的原子性
        let mut overlay: HashMap<RowId, i64> = HashMap::new();
        for write in &writes {
            let row_id = (write.table, write.key.clone());
            let current = overlay
                .get(&row_id)
                .copied()
                .or_else(|| state.committed_version(write.table, &write.key));

            let conflict = match (&write.kind, current) {
                (WriteKind::Insert, None) => None,
                (WriteKind::Insert, Some(_)) => Some(DomainError::database(format!(
                    "duplicate key {} in {}",
                    write.key, write.table
                ))),
                (WriteKind::Update { expected }, Some(actual)) if *expected == actual => None,
                (WriteKind::Update { expected }, actual) => Some(DomainError::VersionConflict {
                    key: write.key.clone(),
                    expected: *expected,
                    actual: actual.unwrap_or_default(),
                }),
            };
            if let Some(err) = conflict {
                state.release_locks(self.id);
                return Err(err);
            }
            overlay.insert(row_id, write.version);
        }

        for write in writes {
            state.next_seq += 1;
            let next_seq = state.next_seq;
            let rows = state.tables.entry(write.table).or_default();
            match rows.get_mut(&write.key) {
                Some(row) => {
                    row.version = write.version;
                    row.value = write.value;
                }
                None => {
                    rows.insert(
                        write.key,
                        StoredRow {
                            seq: next_seq,
                            version: write.version,
                            value: write.value,
                        },
                    );
                }
            }
        }

        state.release_locks(self.id);
        Ok(())
    }

    pub fn rollback(mut self) -> DomainResult<()> {
        self.ensure_open()?;
        self.open = false;
        self.writes.clear();
        lock_state(&self.state)?.release_locks(self.id);
        Ok(())
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        // 未提交即丢弃等价于回滚
        if self.open {
            if let Ok(mut state) = self.state.lock() {
                state.release_locks(self.id);
            }
        }
    }
}

fn decode<T: Row>(value: &Value, version: i64) -> DomainResult<T> {
    let mut row: T = serde_json::from_value(value.clone())?;
    row.set_version(version);
    Ok(row)
}

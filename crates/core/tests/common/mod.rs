//! 测试用内存数据库：记录事务生命周期事件，可按需注入失败

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use txguard_errors::{DbError, DbResult};
use txguard_ports::{Database, Driver, PoolStats, Row, SqlValue, Transaction, TransactionOptions};

#[derive(Default)]
struct Shared {
    events: Mutex<Vec<String>>,
    begin_failures: Mutex<VecDeque<DbError>>,
    commit_failures: Mutex<VecDeque<DbError>>,
    begins: AtomicU32,
    commits: AtomicU32,
    rollbacks: AtomicU32,
    pings: AtomicU32,
    ping_fails: AtomicBool,
    ping_delay: Mutex<Duration>,
    begin_delay: Mutex<Duration>,
    stats: Mutex<PoolStats>,
    rows: Mutex<HashMap<String, Vec<Row>>>,
    options: Mutex<Vec<TransactionOptions>>,
}

#[derive(Clone)]
pub struct FakeDatabase {
    shared: Arc<Shared>,
    driver: Driver,
}

impl FakeDatabase {
    pub fn new() -> Self {
        let db = Self {
            shared: Arc::new(Shared::default()),
            driver: Driver::Postgres,
        };
        db.set_stats(PoolStats {
            acquired: 1,
            idle: 4,
            total: 5,
            max: 10,
        });
        db
    }

    pub fn with_driver(mut self, driver: Driver) -> Self {
        self.driver = driver;
        self
    }

    pub fn into_arc(self) -> Arc<dyn Database> {
        Arc::new(self)
    }

    pub fn fail_begin(&self, err: DbError) {
        self.shared.begin_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_commit(&self, err: DbError) {
        self.shared.commit_failures.lock().unwrap().push_back(err);
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.shared.ping_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        *self.shared.ping_delay.lock().unwrap() = delay;
    }

    pub fn set_begin_delay(&self, delay: Duration) {
        *self.shared.begin_delay.lock().unwrap() = delay;
    }

    pub fn set_stats(&self, stats: PoolStats) {
        *self.shared.stats.lock().unwrap() = stats;
    }

    pub fn set_rows(&self, sql: &str, rows: Vec<Row>) {
        self.shared.rows.lock().unwrap().insert(sql.to_string(), rows);
    }

    pub fn events(&self) -> Vec<String> {
        self.shared.events.lock().unwrap().clone()
    }

    pub fn begins(&self) -> u32 {
        self.shared.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u32 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u32 {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> u32 {
        self.shared.pings.load(Ordering::SeqCst)
    }

    pub fn begin_options(&self) -> Vec<TransactionOptions> {
        self.shared.options.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.shared.events.lock().unwrap().push(event);
    }

    async fn do_ping(&self) -> DbResult<()> {
        self.shared.pings.fetch_add(1, Ordering::SeqCst);
        let delay = *self.shared.ping_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.shared.ping_fails.load(Ordering::SeqCst) {
            return Err(DbError::unavailable("connection refused"));
        }
        Ok(())
    }

    fn rows_for(&self, sql: &str) -> Vec<Row> {
        self.shared
            .rows
            .lock()
            .unwrap()
            .get(sql)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Database for FakeDatabase {
    async fn begin(&self, options: &TransactionOptions) -> DbResult<Box<dyn Transaction>> {
        let delay = *self.shared.begin_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.shared.begin_failures.lock().unwrap().pop_front() {
            self.record("begin_failed".to_string());
            return Err(err);
        }
        let id = self.shared.begins.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.options.lock().unwrap().push(options.clone());
        self.record(format!("begin:{id}"));
        Ok(Box::new(FakeTransaction {
            db: self.clone(),
            id,
        }))
    }

    async fn ping(&self) -> DbResult<()> {
        self.do_ping().await
    }

    async fn ping_detailed(&self) -> DbResult<()> {
        self.do_ping().await
    }

    async fn fetch_all(&self, sql: &str, _args: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.record(format!("query:{sql}"));
        Ok(self.rows_for(sql))
    }

    fn pool_stats(&self) -> PoolStats {
        *self.shared.stats.lock().unwrap()
    }

    fn driver(&self) -> Driver {
        self.driver
    }

    async fn close(&self) {
        self.record("close".to_string());
    }
}

pub struct FakeTransaction {
    db: FakeDatabase,
    id: u32,
}

#[async_trait]
impl Transaction for FakeTransaction {
    async fn execute(&self, sql: &str, _args: &[SqlValue]) -> DbResult<u64> {
        self.db.record(format!("exec:{}:{sql}", self.id));
        Ok(1)
    }

    async fn fetch_all(&self, sql: &str, _args: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.db.record(format!("query:{}:{sql}", self.id));
        Ok(self.db.rows_for(sql))
    }

    async fn commit(&self) -> DbResult<()> {
        if let Some(err) = self.db.shared.commit_failures.lock().unwrap().pop_front() {
            self.db.record(format!("commit_failed:{}", self.id));
            return Err(err);
        }
        self.db.shared.commits.fetch_add(1, Ordering::SeqCst);
        self.db.record(format!("commit:{}", self.id));
        Ok(())
    }

    async fn rollback(&self) -> DbResult<()> {
        self.db.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.db.record(format!("rollback:{}", self.id));
        Ok(())
    }
}

pub fn fast_retry(max_attempts: u32) -> txguard_common::RetryConfig {
    txguard_common::RetryConfig::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
}

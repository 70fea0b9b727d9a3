//! Recording connection and schema fixture shared by the integration tests.

#![allow(dead_code)]

use dbml::{ColumnMeta, Connection, DbSchema, DbmlResult, Row, Schema, TableMeta, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One statement seen by a [`Recorder`].
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub link: &'static str,
    pub sql: String,
    pub params: Vec<Value>,
}

pub type Log = Arc<Mutex<Vec<Call>>>;

/// A `Connection` that records every statement into a shared log and answers
/// from queued responses.
#[derive(Clone)]
pub struct Recorder {
    link: &'static str,
    log: Log,
    prepares: Arc<AtomicUsize>,
    rows: Arc<Mutex<VecDeque<Vec<Row>>>>,
    affected: Arc<Mutex<VecDeque<u64>>>,
}

impl Recorder {
    pub fn new(link: &'static str, log: &Log) -> Self {
        Self {
            link,
            log: Arc::clone(log),
            prepares: Arc::new(AtomicUsize::new(0)),
            rows: Arc::default(),
            affected: Arc::default(),
        }
    }

    /// Rows returned by the next query.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.rows.lock().unwrap().push_back(rows);
    }

    /// Count returned by the next execute (default 1).
    pub fn push_affected(&self, n: u64) {
        self.affected.lock().unwrap().push_back(n);
    }

    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.log.lock().unwrap().push(Call {
            link: self.link,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }
}

impl Connection for Recorder {
    type Prepared = String;

    async fn prepare(&self, sql: &str) -> DbmlResult<String> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(sql.to_string())
    }

    async fn query(&self, stmt: &String, params: &[Value]) -> DbmlResult<Vec<Row>> {
        self.record(stmt, params);
        Ok(self.rows.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn execute(&self, stmt: &String, params: &[Value]) -> DbmlResult<u64> {
        self.record(stmt, params);
        Ok(self.affected.lock().unwrap().pop_front().unwrap_or(1))
    }

    async fn batch_execute(&self, sql: &str) -> DbmlResult<()> {
        self.record(sql, &[]);
        Ok(())
    }
}

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// SQL of every logged call, prefixed by its link.
pub fn statements(log: &Log) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .map(|call| format!("{}: {}", call.link, call.sql))
        .collect()
}

pub fn clear(log: &Log) {
    log.lock().unwrap().clear();
}

/// `t_user` <- `t_article` <- `t_comment`.
pub fn schema() -> Arc<Schema> {
    Arc::new(Schema::new(
        DbSchema::new()
            .with_table(
                TableMeta::new("t_user")
                    .column(ColumnMeta::new("id", "integer").not_null().auto_increment())
                    .column(ColumnMeta::new("name", "text"))
                    .column(ColumnMeta::new("email", "text"))
                    .primary_key(["id"]),
            )
            .with_table(
                TableMeta::new("t_article")
                    .column(ColumnMeta::new("id", "integer").not_null().auto_increment())
                    .column(ColumnMeta::new("user_id", "integer").not_null())
                    .column(ColumnMeta::new("title", "text"))
                    .column(ColumnMeta::new("state", "integer"))
                    .primary_key(["id"])
                    .foreign_key("fk_article_user", ["user_id"], "t_user", ["id"]),
            )
            .with_table(
                TableMeta::new("t_comment")
                    .column(ColumnMeta::new("id", "integer").not_null().auto_increment())
                    .column(ColumnMeta::new("article_id", "integer").not_null())
                    .column(ColumnMeta::new("body", "text"))
                    .primary_key(["id"])
                    .foreign_key("fk_comment_article", ["article_id"], "t_article", ["id"]),
            ),
    ))
}

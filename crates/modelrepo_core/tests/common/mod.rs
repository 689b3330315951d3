#![allow(dead_code)]

use modelrepo_core::{open_db_in_memory, ModelDescriptor, ModelFactory};
use rusqlite::{params, Connection};
use std::cell::Cell;
use std::sync::Arc;

pub const ARTICLE_COUNT: i64 = 42;
pub const ACTIVE_COUNT: i64 = 25;

thread_local! {
    static STATEMENTS: Cell<usize> = const { Cell::new(0) };
}

fn count_statement(_sql: &str) {
    STATEMENTS.with(|count| count.set(count.get() + 1));
}

/// Statements executed on this thread since the last `reset_statements`.
pub fn statements() -> usize {
    STATEMENTS.with(Cell::get)
}

pub fn reset_statements() {
    STATEMENTS.with(|count| count.set(0));
}

/// In-memory database with `ARTICLE_COUNT` articles; ids up to
/// `ACTIVE_COUNT` are active, the rest drafts. Every tenth row is news.
pub fn fixture_db() -> Connection {
    let mut conn = open_db_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "CREATE TABLE articles (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            status TEXT NOT NULL,
            kind TEXT NOT NULL,
            rating REAL
        );",
    )
    .expect("create fixture table");

    for id in 1..=ARTICLE_COUNT {
        let status = if id <= ACTIVE_COUNT { "active" } else { "draft" };
        let kind = if id % 10 == 0 { "news" } else { "article" };
        conn.execute(
            "INSERT INTO articles (id, title, status, kind, rating) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, format!("Article {id:02}"), status, kind, id as f64 / 2.0],
        )
        .expect("insert fixture row");
    }

    conn.trace(Some(count_statement));
    reset_statements();
    conn
}

pub fn factory() -> Arc<ModelFactory> {
    Arc::new(
        ModelFactory::new()
            .with(ModelDescriptor::new("article", "articles").with_properties(["title", "status"]))
            .with(ModelDescriptor::new("news", "articles").with_properties(["title"])),
    )
}

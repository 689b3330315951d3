//! Found-rows protocol for SQLite connections.
//!
//! A paginated SELECT prefixed with `SQL_CALC_FOUND_ROWS` records, on its
//! connection, how many rows it would have matched without its trailing
//! LIMIT clause. `SELECT FOUND_ROWS()` issued afterwards on the same
//! connection returns that number.
//!
//! # Responsibility
//! - Register the `found_rows()` and `track_found_rows(n)` SQL functions.
//! - Split tracked statements into the statement to run and its count.
//!
//! # Invariants
//! - The tracked value lives in the connection; another connection never
//!   observes it.
//! - Only a trailing, top-level LIMIT clause is dropped for counting.

use super::{DbError, DbResult};
use crate::model::value::Value;
use log::debug;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params_from_iter, Connection};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Column-list modifier that asks the session to track found rows.
pub const CALC_FOUND_ROWS: &str = "SQL_CALC_FOUND_ROWS";
/// Prefix identifying a tracked statement.
pub const TRACKED_SELECT_PREFIX: &str = "SELECT SQL_CALC_FOUND_ROWS";
/// Follow-up statement reading the tracked value.
pub const FOUND_ROWS_SQL: &str = "SELECT FOUND_ROWS()";

const TRACK_FUNCTION: &str = "track_found_rows";

/// A tracked statement split into its executable parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedQuery {
    /// The statement without the modifier.
    pub select_sql: String,
    /// Records the unpaginated row count on the connection.
    pub count_sql: String,
}

/// Registers the found-rows functions on `conn`.
pub fn register_found_rows(conn: &Connection) -> rusqlite::Result<()> {
    let found = Arc::new(AtomicI64::new(0));
    let tracked = Arc::clone(&found);

    conn.create_scalar_function(TRACK_FUNCTION, 1, FunctionFlags::SQLITE_UTF8, move |ctx| {
        let rows: i64 = ctx.get(0)?;
        tracked.store(rows, Ordering::SeqCst);
        Ok(rows)
    })?;
    conn.create_scalar_function("found_rows", 0, FunctionFlags::SQLITE_UTF8, move |_ctx| {
        Ok(found.load(Ordering::SeqCst))
    })?;
    Ok(())
}

/// Returns whether `sql` carries the found-rows modifier.
pub fn is_tracked(sql: &str) -> bool {
    sql.trim_start().starts_with(TRACKED_SELECT_PREFIX)
}

/// Splits a tracked statement. Returns `None` for untracked statements.
pub fn split_tracked(sql: &str) -> DbResult<Option<TrackedQuery>> {
    let sql = sql.trim();
    let Some(rest) = sql.strip_prefix(TRACKED_SELECT_PREFIX) else {
        return Ok(None);
    };

    let body = rest.trim().trim_end_matches(';').trim_end();
    if body.is_empty() {
        return Err(DbError::MalformedTrackedQuery(sql.to_string()));
    }

    let unbounded = strip_trailing_limit(body);
    Ok(Some(TrackedQuery {
        select_sql: format!("SELECT {body}"),
        count_sql: format!("SELECT {TRACK_FUNCTION}(COUNT(*)) FROM (SELECT {unbounded})"),
    }))
}

/// Runs the counting half of a tracked statement on `conn`.
///
/// Trailing binds that belonged to the dropped LIMIT clause are ignored.
pub fn record_found_rows(conn: &Connection, tracked: &TrackedQuery, binds: &[Value]) -> DbResult<()> {
    debug!(
        "event=found_rows module=db status=track sql={}",
        tracked.count_sql
    );
    let mut stmt = conn.prepare(&tracked.count_sql)?;
    let bound = stmt.parameter_count().min(binds.len());
    stmt.query_row(params_from_iter(&binds[..bound]), |row| row.get::<_, i64>(0))?;
    Ok(())
}

/// Reads the value recorded by the last tracked statement on `conn`.
pub fn read_found_rows(conn: &Connection) -> DbResult<u64> {
    debug!("event=found_rows module=db status=read sql={FOUND_ROWS_SQL}");
    let rows = conn.query_row(FOUND_ROWS_SQL, [], |row| row.get::<_, i64>(0))?;
    Ok(u64::try_from(rows).unwrap_or(0))
}

/// Cuts the last top-level `LIMIT` clause off `body`.
///
/// Parenthesized subqueries and quoted literals or identifiers are skipped;
/// any ASCII whitespace may precede the keyword.
fn strip_trailing_limit(body: &str) -> &str {
    let bytes = body.as_bytes();
    let mut depth = 0_usize;
    let mut quote: Option<u8> = None;
    let mut limit_at = None;

    for (index, &byte) in bytes.iter().enumerate() {
        if let Some(close) = quote {
            if byte == close {
                quote = None;
            }
            continue;
        }
        match byte {
            b'\'' | b'"' | b'`' => quote = Some(byte),
            b'[' => quote = Some(b']'),
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            _ if depth == 0 && byte.is_ascii_whitespace() && starts_with_limit(&bytes[index + 1..]) => {
                limit_at = Some(index);
            }
            _ => {}
        }
    }

    limit_at.map_or(body, |position| body[..position].trim_end())
}

fn starts_with_limit(rest: &[u8]) -> bool {
    const KEYWORD: &[u8] = b"LIMIT";
    rest.len() >= KEYWORD.len()
        && rest[..KEYWORD.len()].eq_ignore_ascii_case(KEYWORD)
        && rest
            .get(KEYWORD.len())
            .map_or(true, |next| !(next.is_ascii_alphanumeric() || *next == b'_'))
}

//! SQLite connection bootstrap and session-scoped helpers.
//!
//! # Responsibility
//! - Open and configure SQLite connections used by loaders.
//! - Provide the found-rows protocol on top of plain SQLite.
//!
//! # Invariants
//! - Connections handed to loaders have the found-rows functions registered.
//! - This crate never creates or migrates application tables.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod found_rows;
mod open;

pub use open::{open_db, open_db_in_memory, prepare_connection};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// A tracked statement could not be split into its select and count parts.
    MalformedTrackedQuery(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::MalformedTrackedQuery(sql) => {
                write!(f, "found-rows tracking requires a SELECT statement: `{sql}`")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::MalformedTrackedQuery(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

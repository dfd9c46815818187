use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::models::{Contacts, ListingCandidate, StoredListing};

/// Result of persisting one listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    Inserted(i64),
    /// A row with the same detail link already exists; nothing was written.
    Duplicate,
    Failed(String),
}

impl Upsert {
    #[cfg(test)]
    pub fn did_insert(&self) -> bool {
        matches!(self, Upsert::Inserted(_))
    }
}

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn default_path() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobtrawl") {
            proj_dirs.data_dir().join("jobtrawl.db")
        } else {
            PathBuf::from("jobtrawl.db")
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                location TEXT NOT NULL,
                detail_link TEXT NOT NULL UNIQUE,
                easy_apply TEXT,
                description TEXT NOT NULL,
                emails TEXT NOT NULL DEFAULT '[]',
                phones TEXT NOT NULL DEFAULT '[]',
                captured_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_listings_captured ON listings(captured_at);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='listings'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'jobtrawl init' first."));
        }
        Ok(())
    }

    /// Store a listing keyed on its detail link. An existing row with the same
    /// link wins and is left untouched. Errors are logged here and reported as
    /// `Upsert::Failed`, never returned.
    pub fn upsert(&self, listing: &ListingCandidate) -> Upsert {
        match self.insert_listing(listing) {
            Ok(Some(id)) => Upsert::Inserted(id),
            Ok(None) => Upsert::Duplicate,
            Err(e) => {
                tracing::error!("Failed to save listing '{}': {:#}", listing.title, e);
                Upsert::Failed(format!("{:#}", e))
            }
        }
    }

    fn insert_listing(&self, listing: &ListingCandidate) -> Result<Option<i64>> {
        let link = listing
            .detail_link
            .as_deref()
            .ok_or_else(|| anyhow!("Listing has no detail link"))?;
        let emails = serde_json::to_string(&listing.contacts.emails)?;
        let phones = serde_json::to_string(&listing.contacts.phones)?;

        let changed = self
            .conn
            .execute(
                "INSERT INTO listings (title, company, location, detail_link, easy_apply, description, emails, phones)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (detail_link) DO NOTHING",
                params![
                    listing.title,
                    listing.company,
                    listing.location,
                    link,
                    listing.easy_apply_link,
                    listing.description,
                    emails,
                    phones,
                ],
            )
            .context("Insert into listings failed")?;

        if changed == 0 {
            Ok(None)
        } else {
            Ok(Some(self.conn.last_insert_rowid()))
        }
    }

    pub fn list_listings(&self, limit: usize) -> Result<Vec<StoredListing>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, company, location, detail_link, easy_apply, description,
                    emails, phones, captured_at
             FROM listings ORDER BY captured_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], Self::row_to_listing)?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list listings")
    }

    pub fn get_listing(&self, id: i64) -> Result<Option<StoredListing>> {
        let result = self.conn.query_row(
            "SELECT id, title, company, location, detail_link, easy_apply, description,
                    emails, phones, captured_at
             FROM listings WHERE id = ?1",
            [id],
            Self::row_to_listing,
        );
        match result {
            Ok(listing) => Ok(Some(listing)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn count(&self) -> Result<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM listings", [], |row| row.get(0))?;
        Ok(n)
    }

    fn row_to_listing(row: &rusqlite::Row) -> rusqlite::Result<StoredListing> {
        let emails: String = row.get(7)?;
        let phones: String = row.get(8)?;
        Ok(StoredListing {
            id: row.get(0)?,
            title: row.get(1)?,
            company: row.get(2)?,
            location: row.get(3)?,
            detail_link: row.get(4)?,
            easy_apply: row.get(5)?,
            description: row.get(6)?,
            contacts: Contacts {
                emails: parse_set(7, &emails)?,
                phones: parse_set(8, &phones)?,
            },
            captured_at: row.get(9)?,
        })
    }
}

fn parse_set(column: usize, raw: &str) -> rusqlite::Result<BTreeSet<String>> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

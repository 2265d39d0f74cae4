use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::parser::ContactRecord;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS contacts (
            id            INTEGER PRIMARY KEY,
            name          TEXT,
            email         TEXT,
            phone         TEXT,
            company       TEXT,
            job_title     TEXT,
            website       TEXT,
            source        TEXT NOT NULL,
            raw_text      TEXT NOT NULL,
            scanned_at    TEXT NOT NULL,
            crm_ref       TEXT,
            crm_synced_at TEXT,
            crm_error     TEXT,
            crm_attempts  INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_contacts_synced ON contacts(crm_synced_at);
        CREATE INDEX IF NOT EXISTS idx_contacts_email ON contacts(email);
        ",
    )?;
    Ok(())
}

// ── Contacts ──

/// Where a record came from. Supplied by the caller, never by the parser.
pub struct Provenance {
    pub source: String,
    pub raw_text: String,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredContact {
    pub id: i64,
    #[serde(flatten)]
    pub record: ContactRecord,
    pub source: String,
    pub scanned_at: String,
    pub crm_ref: Option<String>,
    pub crm_synced_at: Option<String>,
    pub crm_error: Option<String>,
    pub crm_attempts: i64,
}

const CONTACT_COLUMNS: &str = "id, name, email, phone, company, job_title, website,
     source, scanned_at, crm_ref, crm_synced_at, crm_error, crm_attempts";

fn contact_from_row(row: &Row) -> rusqlite::Result<StoredContact> {
    Ok(StoredContact {
        id: row.get(0)?,
        record: ContactRecord {
            name: row.get(1)?,
            email: row.get(2)?,
            phone: row.get(3)?,
            company: row.get(4)?,
            job_title: row.get(5)?,
            website: row.get(6)?,
        },
        source: row.get(7)?,
        scanned_at: row.get(8)?,
        crm_ref: row.get(9)?,
        crm_synced_at: row.get(10)?,
        crm_error: row.get(11)?,
        crm_attempts: row.get(12)?,
    })
}

/// Insert one record and return its generated id.
pub fn save_contact(
    conn: &Connection,
    record: &ContactRecord,
    provenance: &Provenance,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO contacts
         (name, email, phone, company, job_title, website, source, raw_text, scanned_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            record.name, record.email, record.phone, record.company, record.job_title,
            record.website, provenance.source, provenance.raw_text,
            provenance.scanned_at.to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn fetch_contact(conn: &Connection, id: i64) -> Result<Option<StoredContact>> {
    let sql = format!("SELECT {} FROM contacts WHERE id = ?1", CONTACT_COLUMNS);
    let contact = conn.query_row(&sql, [id], contact_from_row).optional()?;
    Ok(contact)
}

/// Most recent first.
pub fn fetch_contacts(conn: &Connection, limit: usize) -> Result<Vec<StoredContact>> {
    let sql = format!(
        "SELECT {} FROM contacts ORDER BY id DESC LIMIT {}",
        CONTACT_COLUMNS, limit
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], contact_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Contacts never accepted by the CRM, oldest first.
pub fn fetch_unsynced(conn: &Connection, limit: Option<usize>) -> Result<Vec<StoredContact>> {
    let sql = format!(
        "SELECT {} FROM contacts WHERE crm_synced_at IS NULL ORDER BY id{}",
        CONTACT_COLUMNS,
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], contact_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── CRM sync ──

/// Result of one CRM push, produced by the sync worker.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub contact_id: i64,
    pub crm_ref: Option<String>,
    pub error: Option<String>,
}

pub fn save_sync_outcomes(conn: &Connection, outcomes: &[SyncOutcome]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut ok_stmt = tx.prepare(
            "UPDATE contacts
             SET crm_ref = ?2, crm_synced_at = datetime('now'), crm_error = NULL,
                 crm_attempts = crm_attempts + 1
             WHERE id = ?1",
        )?;
        let mut err_stmt = tx.prepare(
            "UPDATE contacts
             SET crm_error = ?2, crm_attempts = crm_attempts + 1
             WHERE id = ?1",
        )?;
        for o in outcomes {
            match &o.error {
                None => ok_stmt.execute(rusqlite::params![o.contact_id, o.crm_ref])?,
                Some(e) => err_stmt.execute(rusqlite::params![o.contact_id, e])?,
            };
        }
    }
    tx.commit()?;
    Ok(())
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub synced: usize,
    pub failed: usize,
    pub pending: usize,
    pub empty: usize,
    pub with_name: usize,
    pub with_email: usize,
    pub with_phone: usize,
    pub with_company: usize,
    pub with_job_title: usize,
    pub with_website: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let stats = conn.query_row(
        "SELECT COUNT(*),
                COUNT(crm_synced_at),
                COALESCE(SUM(crm_synced_at IS NULL AND crm_error IS NOT NULL), 0),
                COALESCE(SUM(COALESCE(name, email, phone, company, job_title, website) IS NULL), 0),
                COUNT(name), COUNT(email), COUNT(phone),
                COUNT(company), COUNT(job_title), COUNT(website)
         FROM contacts",
        [],
        |r| {
            let total: usize = r.get(0)?;
            let synced: usize = r.get(1)?;
            Ok(Stats {
                total,
                synced,
                failed: r.get(2)?,
                pending: total - synced,
                empty: r.get(3)?,
                with_name: r.get(4)?,
                with_email: r.get(5)?,
                with_phone: r.get(6)?,
                with_company: r.get(7)?,
                with_job_title: r.get(8)?,
                with_website: r.get(9)?,
            })
        },
    )?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn provenance(source: &str) -> Provenance {
        Provenance {
            source: source.to_string(),
            raw_text: "raw".to_string(),
            scanned_at: Utc::now(),
        }
    }

    fn sample() -> ContactRecord {
        ContactRecord {
            name: Some("John Smith".into()),
            email: Some("john.smith@acme.com".into()),
            phone: Some("+1-555-123-4567".into()),
            ..Default::default()
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = memory_db();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn save_and_fetch() {
        let conn = memory_db();
        let id = save_contact(&conn, &sample(), &provenance("card.jpg")).unwrap();
        let stored = fetch_contact(&conn, id).unwrap().unwrap();
        assert_eq!(stored.record, sample());
        assert_eq!(stored.source, "card.jpg");
        assert!(stored.crm_synced_at.is_none());
        assert_eq!(stored.crm_attempts, 0);
        assert!(fetch_contact(&conn, id + 1).unwrap().is_none());
    }

    #[test]
    fn empty_record_is_stored() {
        let conn = memory_db();
        save_contact(&conn, &ContactRecord::default(), &provenance("blank.png")).unwrap();
        let s = get_stats(&conn).unwrap();
        assert_eq!(s.total, 1);
        assert_eq!(s.empty, 1);
    }

    #[test]
    fn fetch_contacts_newest_first() {
        let conn = memory_db();
        let a = save_contact(&conn, &sample(), &provenance("a")).unwrap();
        let b = save_contact(&conn, &sample(), &provenance("b")).unwrap();
        let rows = fetch_contacts(&conn, 10).unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b, a]);
        assert_eq!(fetch_contacts(&conn, 1).unwrap().len(), 1);
    }

    #[test]
    fn sync_outcomes_update_rows() {
        let conn = memory_db();
        let ok = save_contact(&conn, &sample(), &provenance("ok")).unwrap();
        let bad = save_contact(&conn, &sample(), &provenance("bad")).unwrap();
        save_sync_outcomes(
            &conn,
            &[
                SyncOutcome { contact_id: ok, crm_ref: Some("crm-1".into()), error: None },
                SyncOutcome { contact_id: bad, crm_ref: None, error: Some("HTTP 503".into()) },
            ],
        )
        .unwrap();

        let unsynced = fetch_unsynced(&conn, None).unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, bad);
        assert_eq!(unsynced[0].crm_error.as_deref(), Some("HTTP 503"));
        assert_eq!(unsynced[0].crm_attempts, 1);

        let synced = fetch_contact(&conn, ok).unwrap().unwrap();
        assert_eq!(synced.crm_ref.as_deref(), Some("crm-1"));
        assert!(synced.crm_synced_at.is_some());

        let s = get_stats(&conn).unwrap();
        assert_eq!((s.total, s.synced, s.failed, s.pending), (2, 1, 1, 1));
        assert_eq!(s.with_name, 2);
        assert_eq!(s.with_website, 0);
    }

    #[test]
    fn stats_on_empty_table() {
        let conn = memory_db();
        let s = get_stats(&conn).unwrap();
        assert_eq!((s.total, s.synced, s.failed, s.empty), (0, 0, 0, 0));
    }
}

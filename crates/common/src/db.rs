//! SQLite database for CoTravel state persistence

use crate::types::*;
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Wallet identities
            CREATE TABLE IF NOT EXISTS users (
                wallet_address TEXT PRIMARY KEY,
                role TEXT NOT NULL DEFAULT 'user',
                created_at INTEGER NOT NULL
            );

            -- Auth sessions (revoked on disconnect, swept on expiry)
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                wallet_address TEXT NOT NULL,
                issued_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_wallet ON sessions(wallet_address);

            -- Invoices
            CREATE TABLE IF NOT EXISTS invoices (
                id TEXT PRIMARY KEY,
                organizer_wallet TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                deadline INTEGER NOT NULL,
                penalty_percent INTEGER NOT NULL,
                auto_release INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                total_required INTEGER NOT NULL,
                total_collected INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 1,
                contract_invoice_id INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_invoices_organizer ON invoices(organizer_wallet);
            CREATE INDEX IF NOT EXISTS idx_invoices_status ON invoices(status);

            -- Invoice line items, replaced wholesale on item changes
            CREATE TABLE IF NOT EXISTS invoice_items (
                invoice_id TEXT NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                description TEXT NOT NULL,
                amount INTEGER NOT NULL,
                recipient_wallet TEXT NOT NULL,
                PRIMARY KEY (invoice_id, position)
            );

            -- One row per participant per invoice, running active balance
            CREATE TABLE IF NOT EXISTS contributions (
                invoice_id TEXT NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
                participant_wallet TEXT NOT NULL,
                amount INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (invoice_id, participant_wallet)
            );
            CREATE INDEX IF NOT EXISTS idx_contributions_wallet ON contributions(participant_wallet);

            -- Pending item changes awaiting re-consent
            CREATE TABLE IF NOT EXISTS modifications (
                id TEXT PRIMARY KEY,
                invoice_id TEXT NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
                version INTEGER NOT NULL,
                summary TEXT NOT NULL,
                items TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_modifications_invoice ON modifications(invoice_id);

            CREATE TABLE IF NOT EXISTS modification_consents (
                modification_id TEXT NOT NULL REFERENCES modifications(id) ON DELETE CASCADE,
                wallet_address TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (modification_id, wallet_address)
            );

            -- Chain transaction audit trail
            CREATE TABLE IF NOT EXISTS transactions (
                hash TEXT PRIMARY KEY,
                invoice_id TEXT NOT NULL,
                wallet TEXT NOT NULL,
                kind TEXT NOT NULL,
                amount INTEGER NOT NULL,
                ledger INTEGER,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_invoice ON transactions(invoice_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_wallet ON transactions(wallet);

            -- Business directory
            CREATE TABLE IF NOT EXISTS businesses (
                id TEXT PRIMARY KEY,
                owner_wallet TEXT NOT NULL,
                name TEXT NOT NULL,
                category TEXT,
                description TEXT,
                contact_email TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_businesses_owner ON businesses(owner_wallet);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Fetch a user, creating a default-role row on first sight of the wallet
    pub fn find_or_create_user(&self, wallet: &str) -> Result<User> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT OR IGNORE INTO users (wallet_address, role, created_at) VALUES (?1, 'user', ?2)",
            params![wallet, now],
        )?;

        let user = conn.query_row(
            "SELECT wallet_address, role, created_at FROM users WHERE wallet_address = ?1",
            params![wallet],
            row_to_user,
        )?;
        Ok(user)
    }

    pub fn get_user(&self, wallet: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                "SELECT wallet_address, role, created_at FROM users WHERE wallet_address = ?1",
                params![wallet],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_user_role(&self, wallet: &str, role: Role) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE users SET role = ?1 WHERE wallet_address = ?2",
            params![role.to_string(), wallet],
        )?;
        Ok(rows > 0)
    }

    pub fn list_users(&self, offset: u32, limit: u32) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT wallet_address, role, created_at FROM users
             ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], row_to_user)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    pub fn count_users(&self) -> Result<u32> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub fn insert_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, wallet_address, issued_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session.token,
                session.wallet_address,
                session.issued_at,
                session.expires_at
            ],
        )?;
        Ok(())
    }

    /// Look up a live session. Expired rows are invisible here and swept
    /// separately.
    pub fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        let session = conn
            .query_row(
                "SELECT s.token, s.wallet_address, s.issued_at, s.expires_at, u.role
                 FROM sessions s JOIN users u ON u.wallet_address = s.wallet_address
                 WHERE s.token = ?1 AND s.expires_at > ?2",
                params![token, now],
                |row| {
                    let role_str: String = row.get(4)?;
                    Ok(Session {
                        token: row.get(0)?,
                        wallet_address: row.get(1)?,
                        issued_at: row.get(2)?,
                        expires_at: row.get(3)?,
                        role: Role::from_str(&role_str).unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(rows > 0)
    }

    /// Remove expired sessions, returning how many were swept
    pub fn sweep_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        let rows = conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])?;
        if rows > 0 {
            debug!("Swept {} expired sessions", rows);
        }
        Ok(rows)
    }

    // ========================================================================
    // Invoices
    // ========================================================================

    /// Insert an invoice together with its line items, atomically
    pub fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO invoices (id, organizer_wallet, name, description, deadline,
                 penalty_percent, auto_release, status, total_required, total_collected,
                 version, contract_invoice_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                invoice.id,
                invoice.organizer_wallet,
                invoice.name,
                invoice.description,
                invoice.deadline,
                invoice.penalty_percent,
                invoice.auto_release,
                invoice.status.to_string(),
                invoice.total_required,
                invoice.total_collected,
                invoice.version,
                invoice.contract_invoice_id,
                invoice.created_at,
                invoice.updated_at,
            ],
        )?;

        for (pos, item) in invoice.items.iter().enumerate() {
            tx.execute(
                "INSERT INTO invoice_items (invoice_id, position, description, amount, recipient_wallet)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    invoice.id,
                    pos as i64,
                    item.description,
                    item.amount,
                    item.recipient_wallet
                ],
            )?;
        }

        tx.commit()?;
        debug!("Inserted invoice {}", invoice.id);
        Ok(())
    }

    pub fn get_invoice(&self, id: &str) -> Result<Option<Invoice>> {
        let conn = self.conn.lock();
        let invoice = conn
            .query_row(
                "SELECT id, organizer_wallet, name, description, deadline, penalty_percent,
                        auto_release, status, total_required, total_collected, version,
                        contract_invoice_id, created_at, updated_at
                 FROM invoices WHERE id = ?1",
                params![id],
                row_to_invoice,
            )
            .optional()?;

        let Some(mut invoice) = invoice else {
            return Ok(None);
        };
        invoice.items = load_items(&conn, id)?;
        Ok(Some(invoice))
    }

    /// List invoices, newest first. Items are loaded per invoice; listings
    /// are small enough that N+1 is fine here.
    pub fn list_invoices(&self, offset: u32, limit: u32) -> Result<Vec<Invoice>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, organizer_wallet, name, description, deadline, penalty_percent,
                    auto_release, status, total_required, total_collected, version,
                    contract_invoice_id, created_at, updated_at
             FROM invoices ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], row_to_invoice)?;

        let mut invoices = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        for invoice in &mut invoices {
            invoice.items = load_items(&conn, &invoice.id)?;
        }
        Ok(invoices)
    }

    /// Invoices a wallet organizes or contributes to
    pub fn list_invoices_for_wallet(&self, wallet: &str) -> Result<Vec<Invoice>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT i.id, i.organizer_wallet, i.name, i.description, i.deadline,
                    i.penalty_percent, i.auto_release, i.status, i.total_required,
                    i.total_collected, i.version, i.contract_invoice_id, i.created_at, i.updated_at
             FROM invoices i
             LEFT JOIN contributions c ON c.invoice_id = i.id
             WHERE i.organizer_wallet = ?1 OR c.participant_wallet = ?1
             ORDER BY i.created_at DESC",
        )?;
        let rows = stmt.query_map(params![wallet], row_to_invoice)?;

        let mut invoices = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        for invoice in &mut invoices {
            invoice.items = load_items(&conn, &invoice.id)?;
        }
        Ok(invoices)
    }

    pub fn count_invoices(&self) -> Result<u32> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row("SELECT COUNT(*) FROM invoices", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn update_invoice_status(&self, id: &str, status: InvoiceStatus) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        let rows = conn.execute(
            "UPDATE invoices SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_string(), now, id],
        )?;
        if rows == 0 {
            return Err(Error::invoice_not_found(id));
        }
        Ok(())
    }

    pub fn update_invoice_collected(&self, id: &str, total_collected: i64) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        let rows = conn.execute(
            "UPDATE invoices SET total_collected = ?1, updated_at = ?2 WHERE id = ?3",
            params![total_collected, now, id],
        )?;
        if rows == 0 {
            return Err(Error::invoice_not_found(id));
        }
        Ok(())
    }

    pub fn set_contract_invoice_id(&self, id: &str, contract_invoice_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        let rows = conn.execute(
            "UPDATE invoices SET contract_invoice_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![contract_invoice_id, now, id],
        )?;
        if rows == 0 {
            return Err(Error::invoice_not_found(id));
        }
        Ok(())
    }

    /// Replace an invoice's items and bump its version, atomically
    pub fn replace_invoice_items(
        &self,
        id: &str,
        items: &[LineItem],
        total_required: i64,
    ) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().timestamp();

        tx.execute("DELETE FROM invoice_items WHERE invoice_id = ?1", params![id])?;
        for (pos, item) in items.iter().enumerate() {
            tx.execute(
                "INSERT INTO invoice_items (invoice_id, position, description, amount, recipient_wallet)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, pos as i64, item.description, item.amount, item.recipient_wallet],
            )?;
        }
        let rows = tx.execute(
            "UPDATE invoices SET total_required = ?1, version = version + 1, updated_at = ?2
             WHERE id = ?3",
            params![total_required, now, id],
        )?;
        if rows == 0 {
            return Err(Error::invoice_not_found(id));
        }
        let version: i64 = tx.query_row(
            "SELECT version FROM invoices WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;

        tx.commit()?;
        Ok(version)
    }

    // ========================================================================
    // Contributions
    // ========================================================================

    pub fn get_contribution(&self, invoice_id: &str, wallet: &str) -> Result<Option<Contribution>> {
        let conn = self.conn.lock();
        let contribution = conn
            .query_row(
                "SELECT invoice_id, participant_wallet, amount, status, created_at, updated_at
                 FROM contributions WHERE invoice_id = ?1 AND participant_wallet = ?2",
                params![invoice_id, wallet],
                row_to_contribution,
            )
            .optional()?;
        Ok(contribution)
    }

    pub fn list_contributions(&self, invoice_id: &str) -> Result<Vec<Contribution>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT invoice_id, participant_wallet, amount, status, created_at, updated_at
             FROM contributions WHERE invoice_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![invoice_id], row_to_contribution)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    /// Wallets with a live stake in the invoice
    pub fn list_active_contributors(&self, invoice_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT participant_wallet FROM contributions
             WHERE invoice_id = ?1 AND status = 'active' AND amount > 0
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![invoice_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    /// Add to a participant's running balance, reactivating a withdrawn row
    pub fn upsert_contribution(&self, invoice_id: &str, wallet: &str, amount: i64) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO contributions (invoice_id, participant_wallet, amount, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'active', ?4, ?4)
             ON CONFLICT (invoice_id, participant_wallet)
             DO UPDATE SET amount = amount + ?3, status = 'active', updated_at = ?4",
            params![invoice_id, wallet, amount, now],
        )?;
        Ok(())
    }

    /// Zero a participant's balance and mark the row with the given status
    pub fn close_contribution(
        &self,
        invoice_id: &str,
        wallet: &str,
        status: ContributionStatus,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "UPDATE contributions SET amount = 0, status = ?1, updated_at = ?2
             WHERE invoice_id = ?3 AND participant_wallet = ?4",
            params![status.to_string(), now, invoice_id, wallet],
        )?;
        Ok(())
    }

    // ========================================================================
    // Modifications
    // ========================================================================

    pub fn insert_modification(&self, modification: &Modification) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO modifications (id, invoice_id, version, summary, items, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                modification.id,
                modification.invoice_id,
                modification.version,
                modification.summary,
                serde_json::to_string(&modification.items)?,
                modification.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_modification(&self, id: &str) -> Result<Option<Modification>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT id, invoice_id, version, summary, items, created_at
                 FROM modifications WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, invoice_id, version, summary, items_json, created_at)) = raw else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT wallet_address FROM modification_consents
             WHERE modification_id = ?1 ORDER BY rowid ASC",
        )?;
        let consented = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(Some(Modification {
            id,
            invoice_id,
            version,
            summary,
            items: serde_json::from_str(&items_json)?,
            consented,
            created_at,
        }))
    }

    /// The open modification for an invoice, if any. At most one is open at
    /// a time; resolved ones are deleted.
    pub fn open_modification_for_invoice(&self, invoice_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let id = conn
            .query_row(
                "SELECT id FROM modifications WHERE invoice_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![invoice_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn add_modification_consent(&self, modification_id: &str, wallet: &str) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT OR IGNORE INTO modification_consents (modification_id, wallet_address, created_at)
             VALUES (?1, ?2, ?3)",
            params![modification_id, wallet, now],
        )?;
        Ok(())
    }

    pub fn delete_modification(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM modifications WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub fn insert_tx(&self, tx: &TxRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO transactions (hash, invoice_id, wallet, kind, amount, ledger, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tx.hash,
                tx.invoice_id,
                tx.wallet,
                tx.kind.to_string(),
                tx.amount,
                tx.ledger,
                tx.status.to_string(),
                tx.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_tx_status(&self, hash: &str, status: TxStatus, ledger: Option<u32>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE transactions SET status = ?1, ledger = COALESCE(?2, ledger) WHERE hash = ?3",
            params![status.to_string(), ledger, hash],
        )?;
        Ok(())
    }

    pub fn list_txs_for_invoice(&self, invoice_id: &str) -> Result<Vec<TxRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT hash, invoice_id, wallet, kind, amount, ledger, status, created_at
             FROM transactions WHERE invoice_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![invoice_id], row_to_tx)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    pub fn count_txs(&self) -> Result<u32> {
        let conn = self.conn.lock();
        let count: u32 =
            conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }

    // ========================================================================
    // Businesses
    // ========================================================================

    pub fn insert_business(&self, business: &Business) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO businesses (id, owner_wallet, name, category, description, contact_email, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                business.id,
                business.owner_wallet,
                business.name,
                business.category,
                business.description,
                business.contact_email,
                business.created_at,
                business.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_business(&self, id: &str) -> Result<Option<Business>> {
        let conn = self.conn.lock();
        let business = conn
            .query_row(
                "SELECT id, owner_wallet, name, category, description, contact_email, created_at, updated_at
                 FROM businesses WHERE id = ?1",
                params![id],
                row_to_business,
            )
            .optional()?;
        Ok(business)
    }

    pub fn list_businesses(&self, offset: u32, limit: u32) -> Result<Vec<Business>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, owner_wallet, name, category, description, contact_email, created_at, updated_at
             FROM businesses ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], row_to_business)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    pub fn count_businesses(&self) -> Result<u32> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row("SELECT COUNT(*) FROM businesses", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn update_business(&self, business: &Business) -> Result<bool> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        let rows = conn.execute(
            "UPDATE businesses SET name = ?1, category = ?2, description = ?3,
                 contact_email = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                business.name,
                business.category,
                business.description,
                business.contact_email,
                now,
                business.id,
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_business(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM businesses WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }
}

fn load_items(conn: &Connection, invoice_id: &str) -> rusqlite::Result<Vec<LineItem>> {
    let mut stmt = conn.prepare(
        "SELECT description, amount, recipient_wallet FROM invoice_items
         WHERE invoice_id = ?1 ORDER BY position ASC",
    )?;
    let rows = stmt.query_map(params![invoice_id], |row| {
        Ok(LineItem {
            description: row.get(0)?,
            amount: row.get(1)?,
            recipient_wallet: row.get(2)?,
        })
    })?;
    rows.collect()
}

fn parse_column<T: FromStr>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    T::from_str(&s).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("bad enum value: {}", s).into(),
        )
    })
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        wallet_address: row.get(0)?,
        role: parse_column(row, 1)?,
        created_at: row.get(2)?,
    })
}

fn row_to_invoice(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        id: row.get(0)?,
        organizer_wallet: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        deadline: row.get(4)?,
        penalty_percent: row.get(5)?,
        auto_release: row.get(6)?,
        status: parse_column(row, 7)?,
        total_required: row.get(8)?,
        total_collected: row.get(9)?,
        version: row.get(10)?,
        contract_invoice_id: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        items: Vec::new(),
    })
}

fn row_to_contribution(row: &Row<'_>) -> rusqlite::Result<Contribution> {
    Ok(Contribution {
        invoice_id: row.get(0)?,
        participant_wallet: row.get(1)?,
        amount: row.get(2)?,
        status: parse_column(row, 3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_tx(row: &Row<'_>) -> rusqlite::Result<TxRecord> {
    Ok(TxRecord {
        hash: row.get(0)?,
        invoice_id: row.get(1)?,
        wallet: row.get(2)?,
        kind: parse_column(row, 3)?,
        amount: row.get(4)?,
        ledger: row.get(5)?,
        status: parse_column(row, 6)?,
        created_at: row.get(7)?,
    })
}

fn row_to_business(row: &Row<'_>) -> rusqlite::Result<Business> {
    Ok(Business {
        id: row.get(0)?,
        owner_wallet: row.get(1)?,
        name: row.get(2)?,
        category: row.get(3)?,
        description: row.get(4)?,
        contact_email: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

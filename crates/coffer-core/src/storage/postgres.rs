//! PostgreSQL storage backend.
//!
//! The workspace row carries the balance column. Every balance change runs in
//! a transaction together with the ledger insert, and the debit floor is a
//! conditional UPDATE so two concurrent debits cannot both pass it.

use super::traits::{
    CofferStorage, InvoiceStore, LedgerStore, LedgerTotals, MembershipStore, QueryWindow,
    WorkspaceStore,
};
use super::{StorageError, StorageResult};
use crate::capability::{Capability, CapabilityRegistry};
use crate::types::{
    EntryDirection, EntrySource, Identity, Invoice, InvoiceKind, LedgerEntry, LedgerPosting,
    Membership, PaymentRequest, PayoutId, RoleGrant, Workspace, WorkspaceId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::{Acquire, Row};

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed coffer storage.
#[derive(Clone)]
pub struct PostgresCofferStorage {
    pool: PgPool,
}

impl PostgresCofferStorage {
    /// Connect with default pool parameters and initialize the schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS coffer_workspaces (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                owner TEXT NOT NULL,
                deleted BOOLEAN NOT NULL DEFAULT FALSE,
                balance BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS coffer_members (
                workspace_id TEXT NOT NULL REFERENCES coffer_workspaces(id),
                identity TEXT NOT NULL,
                joined_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (workspace_id, identity)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS coffer_role_grants (
                workspace_id TEXT NOT NULL,
                identity TEXT NOT NULL,
                capability TEXT NOT NULL,
                granted_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (workspace_id, identity, capability),
                FOREIGN KEY (workspace_id, identity)
                    REFERENCES coffer_members(workspace_id, identity) ON DELETE CASCADE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS coffer_ledger_entries (
                seq BIGSERIAL PRIMARY KEY,
                entry_id TEXT NOT NULL UNIQUE,
                workspace_id TEXT NOT NULL REFERENCES coffer_workspaces(id),
                direction TEXT NOT NULL,
                amount BIGINT NOT NULL CHECK (amount > 0),
                sender TEXT,
                receiver TEXT,
                source_kind TEXT NOT NULL,
                source_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (workspace_id, source_kind, source_id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS coffer_ledger_entries_ws_idx ON coffer_ledger_entries(workspace_id, seq DESC)",
            r#"
            CREATE TABLE IF NOT EXISTS coffer_invoices (
                payment_request TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES coffer_workspaces(id),
                kind TEXT NOT NULL,
                amount BIGINT NOT NULL,
                payer TEXT,
                settled BOOLEAN NOT NULL DEFAULT FALSE,
                consumed BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL,
                settled_at TIMESTAMPTZ,
                consumed_at TIMESTAMPTZ
            )
            "#,
            "CREATE INDEX IF NOT EXISTS coffer_invoices_open_idx ON coffer_invoices(workspace_id, created_at) WHERE consumed = FALSE",
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl WorkspaceStore for PostgresCofferStorage {
    async fn create_workspace(&self, workspace: Workspace) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO coffer_workspaces (id, name, owner, deleted, balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, $6)
            "#,
        )
        .bind(workspace.id.as_str())
        .bind(&workspace.name)
        .bind(workspace.owner.as_str())
        .bind(workspace.deleted)
        .bind(workspace.created_at)
        .bind(workspace.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn get_workspace(&self, id: &WorkspaceId) -> StorageResult<Option<Workspace>> {
        let row = sqlx::query(
            "SELECT id, name, owner, deleted, created_at, updated_at FROM coffer_workspaces WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(workspace_from_row).transpose()
    }

    async fn list_workspaces(&self) -> StorageResult<Vec<Workspace>> {
        let rows = sqlx::query(
            "SELECT id, name, owner, deleted, created_at, updated_at FROM coffer_workspaces ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(workspace_from_row).collect()
    }

    async fn list_owned_workspaces(&self, owner: &Identity) -> StorageResult<Vec<Workspace>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, owner, deleted, created_at, updated_at
              FROM coffer_workspaces
             WHERE owner = $1
             ORDER BY created_at, id
            "#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(workspace_from_row).collect()
    }

    async fn soft_delete_workspace(
        &self,
        id: &WorkspaceId,
        deleted_at: DateTime<Utc>,
    ) -> StorageResult<Workspace> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let conn = tx.acquire().await.map_err(backend)?;

        let row = sqlx::query(
            r#"
            UPDATE coffer_workspaces
               SET deleted = TRUE, updated_at = $2
             WHERE id = $1
            RETURNING id, name, owner, deleted, created_at, updated_at
            "#,
        )
        .bind(id.as_str())
        .bind(deleted_at)
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?
        .ok_or_else(|| StorageError::NotFound(format!("workspace {id} not found")))?;

        sqlx::query("DELETE FROM coffer_members WHERE workspace_id = $1")
            .bind(id.as_str())
            .execute(&mut *conn)
            .await
            .map_err(backend)?;

        let workspace = workspace_from_row(row)?;
        tx.commit().await.map_err(backend)?;
        Ok(workspace)
    }
}

#[async_trait]
impl MembershipStore for PostgresCofferStorage {
    async fn add_member(&self, membership: Membership) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO coffer_members (workspace_id, identity, joined_at) VALUES ($1, $2, $3)",
        )
        .bind(membership.workspace_id.as_str())
        .bind(membership.identity.as_str())
        .bind(membership.joined_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn remove_member(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
    ) -> StorageResult<bool> {
        let result =
            sqlx::query("DELETE FROM coffer_members WHERE workspace_id = $1 AND identity = $2")
                .bind(workspace_id.as_str())
                .bind(identity.as_str())
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_member(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
    ) -> StorageResult<Option<Membership>> {
        let row = sqlx::query(
            r#"
            SELECT workspace_id, identity, joined_at
              FROM coffer_members
             WHERE workspace_id = $1 AND identity = $2
            "#,
        )
        .bind(workspace_id.as_str())
        .bind(identity.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(membership_from_row).transpose()
    }

    async fn list_members(&self, workspace_id: &WorkspaceId) -> StorageResult<Vec<Membership>> {
        let rows = sqlx::query(
            r#"
            SELECT workspace_id, identity, joined_at
              FROM coffer_members
             WHERE workspace_id = $1
             ORDER BY joined_at, identity
            "#,
        )
        .bind(workspace_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(membership_from_row).collect()
    }

    async fn list_memberships_for(&self, identity: &Identity) -> StorageResult<Vec<Membership>> {
        let rows = sqlx::query(
            "SELECT workspace_id, identity, joined_at FROM coffer_members WHERE identity = $1",
        )
        .bind(identity.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(membership_from_row).collect()
    }

    async fn grant_capabilities(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
        capabilities: &[Capability],
        granted_at: DateTime<Utc>,
    ) -> StorageResult<Vec<RoleGrant>> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let conn = tx.acquire().await.map_err(backend)?;

        let member = sqlx::query(
            "SELECT 1 FROM coffer_members WHERE workspace_id = $1 AND identity = $2 FOR UPDATE",
        )
        .bind(workspace_id.as_str())
        .bind(identity.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?;
        if member.is_none() {
            return Err(StorageError::NotFound(format!(
                "{identity} is not a member of {workspace_id}"
            )));
        }

        for capability in capabilities {
            sqlx::query(
                r#"
                INSERT INTO coffer_role_grants (workspace_id, identity, capability, granted_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (workspace_id, identity, capability) DO NOTHING
                "#,
            )
            .bind(workspace_id.as_str())
            .bind(identity.as_str())
            .bind(capability.as_str())
            .bind(granted_at)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
        }

        let grants = select_grants(&mut *conn, workspace_id, identity).await?;
        tx.commit().await.map_err(backend)?;
        Ok(grants)
    }

    async fn revoke_capabilities(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
        capabilities: &[Capability],
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let conn = tx.acquire().await.map_err(backend)?;

        let member = sqlx::query(
            "SELECT 1 FROM coffer_members WHERE workspace_id = $1 AND identity = $2 FOR UPDATE",
        )
        .bind(workspace_id.as_str())
        .bind(identity.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?;
        if member.is_none() {
            return Err(StorageError::NotFound(format!(
                "{identity} is not a member of {workspace_id}"
            )));
        }

        let names = capabilities
            .iter()
            .map(|c| c.as_str().to_string())
            .collect::<Vec<_>>();
        sqlx::query(
            r#"
            DELETE FROM coffer_role_grants
             WHERE workspace_id = $1 AND identity = $2 AND capability = ANY($3)
            "#,
        )
        .bind(workspace_id.as_str())
        .bind(identity.as_str())
        .bind(names)
        .execute(&mut *conn)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn list_grants(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
    ) -> StorageResult<Vec<RoleGrant>> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        select_grants(&mut *conn, workspace_id, identity).await
    }

    async fn has_grant(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
        capability: Capability,
    ) -> StorageResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM coffer_role_grants
             WHERE workspace_id = $1 AND identity = $2 AND capability = $3
            "#,
        )
        .bind(workspace_id.as_str())
        .bind(identity.as_str())
        .bind(capability.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl LedgerStore for PostgresCofferStorage {
    async fn credit(&self, posting: LedgerPosting) -> StorageResult<LedgerEntry> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let conn = tx.acquire().await.map_err(backend)?;
        let entry = LedgerEntry::from_posting(posting, EntryDirection::Credit);
        apply_credit(&mut *conn, &entry).await?;
        tx.commit().await.map_err(backend)?;
        Ok(entry)
    }

    async fn debit(&self, posting: LedgerPosting) -> StorageResult<LedgerEntry> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let conn = tx.acquire().await.map_err(backend)?;
        let entry = LedgerEntry::from_posting(posting, EntryDirection::Debit);
        let amount = to_i64(entry.amount)?;

        let updated = sqlx::query(
            r#"
            UPDATE coffer_workspaces
               SET balance = balance - $1
             WHERE id = $2 AND balance >= $1
            RETURNING balance
            "#,
        )
        .bind(amount)
        .bind(entry.workspace_id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?;

        if updated.is_none() {
            let row = sqlx::query("SELECT balance FROM coffer_workspaces WHERE id = $1")
                .bind(entry.workspace_id.as_str())
                .fetch_optional(&mut *conn)
                .await
                .map_err(backend)?
                .ok_or_else(|| {
                    StorageError::NotFound(format!("workspace {} not found", entry.workspace_id))
                })?;
            let available: i64 = row.try_get("balance").map_err(backend)?;
            return Err(StorageError::InsufficientBudget {
                available: from_i64(available)?,
                requested: entry.amount,
            });
        }

        insert_entry(&mut *conn, &entry, amount)
            .await
            .map_err(map_sqlx_conflict)?;
        tx.commit().await.map_err(backend)?;
        Ok(entry)
    }

    async fn balance(&self, workspace_id: &WorkspaceId) -> StorageResult<u64> {
        let row = sqlx::query("SELECT balance FROM coffer_workspaces WHERE id = $1")
            .bind(workspace_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StorageError::NotFound(format!("workspace {workspace_id} not found")))?;
        from_i64(row.try_get("balance").map_err(backend)?)
    }

    async fn list_entries(
        &self,
        workspace_id: &WorkspaceId,
        window: QueryWindow,
    ) -> StorageResult<Vec<LedgerEntry>> {
        let limit = if window.limit == 0 {
            i64::MAX
        } else {
            to_i64(window.limit as u64)?
        };
        let rows = sqlx::query(
            r#"
            SELECT entry_id, workspace_id, direction, amount, sender, receiver,
                   source_kind, source_id, created_at
              FROM coffer_ledger_entries
             WHERE workspace_id = $1
             ORDER BY seq DESC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(workspace_id.as_str())
        .bind(limit)
        .bind(to_i64(window.offset as u64)?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(entry_from_row).collect()
    }

    async fn ledger_totals(&self, workspace_id: &WorkspaceId) -> StorageResult<LedgerTotals> {
        let row = sqlx::query(
            r#"
            SELECT w.balance,
                   COALESCE(SUM(e.amount) FILTER (WHERE e.direction = 'credit'), 0)::BIGINT AS credited,
                   COALESCE(SUM(e.amount) FILTER (WHERE e.direction = 'debit'), 0)::BIGINT AS debited,
                   COUNT(e.entry_id) AS entry_count
              FROM coffer_workspaces w
              LEFT JOIN coffer_ledger_entries e ON e.workspace_id = w.id
             WHERE w.id = $1
             GROUP BY w.balance
            "#,
        )
        .bind(workspace_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or_else(|| StorageError::NotFound(format!("workspace {workspace_id} not found")))?;

        let entry_count: i64 = row.try_get("entry_count").map_err(backend)?;
        Ok(LedgerTotals {
            balance: from_i64(row.try_get("balance").map_err(backend)?)?,
            total_credited: from_i64(row.try_get("credited").map_err(backend)?)?,
            total_debited: from_i64(row.try_get("debited").map_err(backend)?)?,
            entry_count: usize::try_from(entry_count)
                .map_err(|_| StorageError::Backend("negative entry count".to_string()))?,
        })
    }
}

#[async_trait]
impl InvoiceStore for PostgresCofferStorage {
    async fn create_invoice(&self, invoice: Invoice) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO coffer_invoices
                (payment_request, workspace_id, kind, amount, payer, settled, consumed,
                 created_at, settled_at, consumed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(invoice.payment_request.as_str())
        .bind(invoice.workspace_id.as_str())
        .bind(invoice.kind.as_str())
        .bind(to_i64(invoice.amount)?)
        .bind(invoice.payer.as_ref().map(|p| p.as_str().to_string()))
        .bind(invoice.settled)
        .bind(invoice.consumed)
        .bind(invoice.created_at)
        .bind(invoice.settled_at)
        .bind(invoice.consumed_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn get_invoice(&self, payment_request: &PaymentRequest) -> StorageResult<Option<Invoice>> {
        let row = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM coffer_invoices WHERE payment_request = $1"
        ))
        .bind(payment_request.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(invoice_from_row).transpose()
    }

    async fn list_unreconciled_invoices(
        &self,
        workspace_id: Option<&WorkspaceId>,
        created_after: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<Invoice>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
              FROM coffer_invoices
             WHERE consumed = FALSE
               AND (settled = FALSE OR kind = 'BUDGET')
               AND ($1::TEXT IS NULL OR workspace_id = $1)
               AND ($2::TIMESTAMPTZ IS NULL OR created_at >= $2)
             ORDER BY created_at, payment_request
            "#
        ))
        .bind(workspace_id.map(|ws| ws.as_str().to_string()))
        .bind(created_after)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(invoice_from_row).collect()
    }

    async fn count_unconsumed_invoices(&self, workspace_id: &WorkspaceId) -> StorageResult<usize> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS open FROM coffer_invoices WHERE workspace_id = $1 AND consumed = FALSE",
        )
        .bind(workspace_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        let open: i64 = row.try_get("open").map_err(backend)?;
        usize::try_from(open).map_err(|_| StorageError::Backend("negative invoice count".to_string()))
    }

    async fn mark_invoice_settled(
        &self,
        payment_request: &PaymentRequest,
        settled_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE coffer_invoices
               SET settled = TRUE, settled_at = $2
             WHERE payment_request = $1 AND settled = FALSE
            "#,
        )
        .bind(payment_request.as_str())
        .bind(settled_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            if self.get_invoice(payment_request).await?.is_none() {
                return Err(StorageError::NotFound(format!(
                    "invoice {payment_request} not found"
                )));
            }
            return Ok(false);
        }
        Ok(true)
    }

    async fn consume_invoice_and_credit(
        &self,
        payment_request: &PaymentRequest,
        consumed_at: DateTime<Utc>,
    ) -> StorageResult<LedgerEntry> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let conn = tx.acquire().await.map_err(backend)?;

        let claimed = sqlx::query(&format!(
            r#"
            UPDATE coffer_invoices
               SET consumed = TRUE, consumed_at = $2
             WHERE payment_request = $1
               AND consumed = FALSE
               AND settled = TRUE
               AND kind = 'BUDGET'
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(payment_request.as_str())
        .bind(consumed_at)
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?;

        let invoice = match claimed {
            Some(row) => invoice_from_row(row)?,
            None => {
                let current = sqlx::query(&format!(
                    "SELECT {INVOICE_COLUMNS} FROM coffer_invoices WHERE payment_request = $1"
                ))
                .bind(payment_request.as_str())
                .fetch_optional(&mut *conn)
                .await
                .map_err(backend)?
                .map(invoice_from_row)
                .transpose()?;
                return Err(match current {
                    None => StorageError::NotFound(format!("invoice {payment_request} not found")),
                    Some(inv) if inv.consumed => {
                        StorageError::AlreadyConsumed(payment_request.to_string())
                    }
                    Some(inv) if !inv.settled => StorageError::InvalidInput(format!(
                        "invoice {payment_request} is not settled"
                    )),
                    Some(inv) => StorageError::InvalidInput(format!(
                        "invoice {payment_request} is {}, not BUDGET",
                        inv.kind.as_str()
                    )),
                });
            }
        };

        let credited_elsewhere = sqlx::query(
            r#"
            SELECT 1 FROM coffer_ledger_entries
             WHERE workspace_id = $1 AND source_kind = 'invoice' AND source_id = $2
            "#,
        )
        .bind(invoice.workspace_id.as_str())
        .bind(payment_request.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?
        .is_some();
        if credited_elsewhere {
            // Keep the consumed flag so the invoice leaves the poll set.
            tx.commit().await.map_err(backend)?;
            return Err(StorageError::AlreadyConsumed(payment_request.to_string()));
        }

        let entry = LedgerEntry::from_posting(
            LedgerPosting {
                workspace_id: invoice.workspace_id.clone(),
                amount: invoice.amount,
                sender: invoice.payer.clone(),
                receiver: None,
                source: EntrySource::Invoice(payment_request.clone()),
                posted_at: consumed_at,
            },
            EntryDirection::Credit,
        );
        apply_credit(&mut *conn, &entry).await?;
        tx.commit().await.map_err(backend)?;
        Ok(entry)
    }
}

impl CofferStorage for PostgresCofferStorage {
    fn backend_label(&self) -> &'static str {
        "postgres"
    }
}

const INVOICE_COLUMNS: &str = "payment_request, workspace_id, kind, amount, payer, settled, \
     consumed, created_at, settled_at, consumed_at";

async fn apply_credit(conn: &mut PgConnection, entry: &LedgerEntry) -> StorageResult<()> {
    let amount = to_i64(entry.amount)?;
    insert_entry(&mut *conn, entry, amount).await.map_err(|e| {
        if is_unique_violation(&e) {
            StorageError::AlreadyConsumed(entry.source.id().to_string())
        } else {
            backend(e)
        }
    })?;

    let result = sqlx::query("UPDATE coffer_workspaces SET balance = balance + $1 WHERE id = $2")
        .bind(amount)
        .bind(entry.workspace_id.as_str())
        .execute(&mut *conn)
        .await
        .map_err(backend)?;
    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound(format!(
            "workspace {} not found",
            entry.workspace_id
        )));
    }
    Ok(())
}

async fn insert_entry(
    conn: &mut PgConnection,
    entry: &LedgerEntry,
    amount: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO coffer_ledger_entries
            (entry_id, workspace_id, direction, amount, sender, receiver,
             source_kind, source_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&entry.entry_id)
    .bind(entry.workspace_id.as_str())
    .bind(entry.direction.as_str())
    .bind(amount)
    .bind(entry.sender.as_ref().map(|s| s.as_str().to_string()))
    .bind(entry.receiver.as_ref().map(|r| r.as_str().to_string()))
    .bind(entry.source.kind())
    .bind(entry.source.id())
    .bind(entry.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn select_grants(
    conn: &mut PgConnection,
    workspace_id: &WorkspaceId,
    identity: &Identity,
) -> StorageResult<Vec<RoleGrant>> {
    let rows = sqlx::query(
        r#"
        SELECT capability, granted_at
          FROM coffer_role_grants
         WHERE workspace_id = $1 AND identity = $2
         ORDER BY capability
        "#,
    )
    .bind(workspace_id.as_str())
    .bind(identity.as_str())
    .fetch_all(conn)
    .await
    .map_err(backend)?;

    let registry = CapabilityRegistry::standard();
    rows.into_iter()
        .map(|row| {
            let name: String = row.try_get("capability").map_err(backend)?;
            let capability = registry.resolve(&name).ok_or_else(|| {
                StorageError::Serialization(format!("unknown capability '{name}' in grants"))
            })?;
            Ok(RoleGrant {
                workspace_id: workspace_id.clone(),
                identity: identity.clone(),
                capability,
                granted_at: row.try_get("granted_at").map_err(backend)?,
            })
        })
        .collect()
}

fn workspace_from_row(row: PgRow) -> StorageResult<Workspace> {
    Ok(Workspace {
        id: WorkspaceId::new(row.try_get::<String, _>("id").map_err(backend)?),
        name: row.try_get("name").map_err(backend)?,
        owner: Identity::new(row.try_get::<String, _>("owner").map_err(backend)?),
        deleted: row.try_get("deleted").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

fn membership_from_row(row: PgRow) -> StorageResult<Membership> {
    Ok(Membership {
        workspace_id: WorkspaceId::new(row.try_get::<String, _>("workspace_id").map_err(backend)?),
        identity: Identity::new(row.try_get::<String, _>("identity").map_err(backend)?),
        joined_at: row.try_get("joined_at").map_err(backend)?,
    })
}

fn entry_from_row(row: PgRow) -> StorageResult<LedgerEntry> {
    let direction: String = row.try_get("direction").map_err(backend)?;
    let direction = match direction.as_str() {
        "credit" => EntryDirection::Credit,
        "debit" => EntryDirection::Debit,
        other => {
            return Err(StorageError::Serialization(format!(
                "unknown entry direction '{other}'"
            )))
        }
    };
    let source_kind: String = row.try_get("source_kind").map_err(backend)?;
    let source_id: String = row.try_get("source_id").map_err(backend)?;
    let source = match source_kind.as_str() {
        "invoice" => EntrySource::Invoice(PaymentRequest::new(source_id)),
        "payout" => EntrySource::Payout(PayoutId::new(source_id)),
        other => {
            return Err(StorageError::Serialization(format!(
                "unknown entry source '{other}'"
            )))
        }
    };

    Ok(LedgerEntry {
        entry_id: row.try_get("entry_id").map_err(backend)?,
        workspace_id: WorkspaceId::new(row.try_get::<String, _>("workspace_id").map_err(backend)?),
        direction,
        amount: from_i64(row.try_get("amount").map_err(backend)?)?,
        sender: row
            .try_get::<Option<String>, _>("sender")
            .map_err(backend)?
            .map(Identity::new),
        receiver: row
            .try_get::<Option<String>, _>("receiver")
            .map_err(backend)?
            .map(Identity::new),
        source,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn invoice_from_row(row: PgRow) -> StorageResult<Invoice> {
    let kind: String = row.try_get("kind").map_err(backend)?;
    Ok(Invoice {
        payment_request: PaymentRequest::new(
            row.try_get::<String, _>("payment_request").map_err(backend)?,
        ),
        workspace_id: WorkspaceId::new(row.try_get::<String, _>("workspace_id").map_err(backend)?),
        kind: InvoiceKind::parse(&kind),
        amount: from_i64(row.try_get("amount").map_err(backend)?)?,
        payer: row
            .try_get::<Option<String>, _>("payer")
            .map_err(backend)?
            .map(Identity::new),
        settled: row.try_get("settled").map_err(backend)?,
        consumed: row.try_get("consumed").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        settled_at: row.try_get("settled_at").map_err(backend)?,
        consumed_at: row.try_get("consumed_at").map_err(backend)?,
    })
}

fn backend(err: sqlx::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION))
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StorageError::Conflict(db_err.message().to_string());
        }
    }
    backend(err)
}

fn to_i64(value: u64) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| StorageError::InvalidInput("amount too large".to_string()))
}

fn from_i64(value: i64) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| StorageError::Serialization(format!("negative amount {value}")))
}

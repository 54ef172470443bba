//! PostgreSQL store for invoicing-service.

use crate::error::InvoicingError;
use crate::models::{
    format_invoice_number, ActivityEntry, Invoice, InvoiceContent, InvoiceStatus, LineItem,
    ListInvoicesFilter, NewInvoice, NewPayment, Notification, Payment, PaymentOutcome,
    PaymentSource, Role, StatusChange,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::settlement::{plan_payment, plan_status_change, settlement_payment};
use crate::services::store::{
    apply_content, draft_invoice, ensure_editable, materialize_items, InvoiceStore,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, workspace_id, invoice_number, status, project_id, \
    contractor_id, team_id, client_name, client_email, client_address, currency, issue_date, \
    due_date, tax_rate, subtotal, tax_amount, grand_total, notes, created_by, created_utc, \
    updated_utc, sent_utc, paid_utc";

const PAYMENT_COLUMNS: &str = "payment_id, workspace_id, invoice_id, amount, paid_on, method, \
    reference, direction, source, project_id, contractor_id, team_id, created_by, created_utc";

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> InvoicingError {
    move |e| InvoicingError::PersistenceFailure(anyhow::anyhow!("{}: {}", context, e))
}

fn decode<T: FromStr<Err = String>>(value: &str) -> Result<T, InvoicingError> {
    value
        .parse()
        .map_err(|e: String| InvoicingError::PersistenceFailure(anyhow::anyhow!(e)))
}

#[derive(FromRow)]
struct InvoiceRow {
    invoice_id: Uuid,
    workspace_id: Uuid,
    invoice_number: String,
    status: String,
    project_id: Option<Uuid>,
    contractor_id: Option<Uuid>,
    team_id: Option<Uuid>,
    client_name: String,
    client_email: Option<String>,
    client_address: Option<String>,
    currency: String,
    issue_date: NaiveDate,
    due_date: Option<NaiveDate>,
    tax_rate: Decimal,
    subtotal: Decimal,
    tax_amount: Decimal,
    grand_total: Decimal,
    notes: Option<String>,
    created_by: Uuid,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
    sent_utc: Option<DateTime<Utc>>,
    paid_utc: Option<DateTime<Utc>>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = InvoicingError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            invoice_id: row.invoice_id,
            workspace_id: row.workspace_id,
            invoice_number: row.invoice_number,
            status: decode(&row.status)?,
            project_id: row.project_id,
            contractor_id: row.contractor_id,
            team_id: row.team_id,
            client_name: row.client_name,
            client_email: row.client_email,
            client_address: row.client_address,
            currency: row.currency.trim_end().to_string(),
            issue_date: row.issue_date,
            due_date: row.due_date,
            tax_rate: row.tax_rate,
            subtotal: row.subtotal,
            tax_amount: row.tax_amount,
            grand_total: row.grand_total,
            notes: row.notes,
            created_by: row.created_by,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
            sent_utc: row.sent_utc,
            paid_utc: row.paid_utc,
        })
    }
}

#[derive(FromRow)]
struct PaymentRow {
    payment_id: Uuid,
    workspace_id: Uuid,
    invoice_id: Uuid,
    amount: Decimal,
    paid_on: NaiveDate,
    method: String,
    reference: Option<String>,
    direction: String,
    source: String,
    project_id: Option<Uuid>,
    contractor_id: Option<Uuid>,
    team_id: Option<Uuid>,
    created_by: Uuid,
    created_utc: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = InvoicingError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            payment_id: row.payment_id,
            workspace_id: row.workspace_id,
            invoice_id: row.invoice_id,
            amount: row.amount,
            paid_on: row.paid_on,
            method: row.method,
            reference: row.reference,
            direction: decode(&row.direction)?,
            source: decode(&row.source)?,
            project_id: row.project_id,
            contractor_id: row.contractor_id,
            team_id: row.team_id,
            created_by: row.created_by,
            created_utc: row.created_utc,
        })
    }
}

#[derive(FromRow)]
struct LineItemRow {
    line_item_id: Uuid,
    invoice_id: Uuid,
    workspace_id: Uuid,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    amount: Decimal,
    position: i32,
    created_utc: DateTime<Utc>,
}

impl From<LineItemRow> for LineItem {
    fn from(row: LineItemRow) -> Self {
        LineItem {
            line_item_id: row.line_item_id,
            invoice_id: row.invoice_id,
            workspace_id: row.workspace_id,
            description: row.description,
            quantity: row.quantity,
            unit_price: row.unit_price,
            amount: row.amount,
            position: row.position,
            created_utc: row.created_utc,
        }
    }
}

#[derive(FromRow)]
struct ActivityRow {
    activity_id: Uuid,
    workspace_id: Uuid,
    project_id: Option<Uuid>,
    actor_id: Uuid,
    action: String,
    details: String,
    invoice_id: Option<Uuid>,
    created_utc: DateTime<Utc>,
}

#[derive(FromRow)]
struct NotificationRow {
    notification_id: Uuid,
    workspace_id: Uuid,
    user_id: Uuid,
    title: String,
    message: String,
    invoice_id: Option<Uuid>,
    read: bool,
    created_utc: DateTime<Utc>,
}

/// Store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoicing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, InvoicingError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(db_error("Failed to connect"))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), InvoicingError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                InvoicingError::PersistenceFailure(anyhow::anyhow!("Migration failed: {}", e))
            })?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn insert_items(
        tx: &mut Transaction<'_, Postgres>,
        items: &[LineItem],
    ) -> Result<(), InvoicingError> {
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO line_items (
                    line_item_id, invoice_id, workspace_id, description, quantity, unit_price,
                    amount, position, created_utc
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(item.line_item_id)
            .bind(item.invoice_id)
            .bind(item.workspace_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.amount)
            .bind(item.position)
            .bind(item.created_utc)
            .execute(&mut **tx)
            .await
            .map_err(db_error("Failed to insert line item"))?;
        }
        Ok(())
    }

    async fn insert_payment(
        tx: &mut Transaction<'_, Postgres>,
        payment: &Payment,
    ) -> Result<(), InvoicingError> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                payment_id, workspace_id, invoice_id, amount, paid_on, method, reference,
                direction, source, project_id, contractor_id, team_id, created_by, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(payment.payment_id)
        .bind(payment.workspace_id)
        .bind(payment.invoice_id)
        .bind(payment.amount)
        .bind(payment.paid_on)
        .bind(&payment.method)
        .bind(&payment.reference)
        .bind(payment.direction.as_str())
        .bind(payment.source.as_str())
        .bind(payment.project_id)
        .bind(payment.contractor_id)
        .bind(payment.team_id)
        .bind(payment.created_by)
        .bind(payment.created_utc)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to insert payment"))?;
        Ok(())
    }

    /// Lock the invoice row for the rest of the transaction.
    async fn lock_invoice(
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, InvoicingError> {
        let sql = format!(
            "SELECT {} FROM invoices WHERE workspace_id = $1 AND invoice_id = $2 FOR UPDATE",
            INVOICE_COLUMNS
        );
        sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(workspace_id)
            .bind(invoice_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error("Failed to lock invoice"))?
            .map(Invoice::try_from)
            .transpose()
    }

    async fn paid_total(
        tx: &mut Transaction<'_, Postgres>,
        invoice_id: Uuid,
    ) -> Result<Decimal, InvoicingError> {
        let total: Option<Decimal> = sqlx::query_scalar(
            "SELECT SUM(amount) FROM payments WHERE invoice_id = $1 AND direction = 'INCOMING'",
        )
        .bind(invoice_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(db_error("Failed to sum payments"))?;
        Ok(total.unwrap_or(Decimal::ZERO))
    }

    async fn write_status(
        tx: &mut Transaction<'_, Postgres>,
        invoice: &Invoice,
    ) -> Result<(), InvoicingError> {
        sqlx::query(
            r#"
            UPDATE invoices
            SET status = $3, sent_utc = $4, paid_utc = $5, updated_utc = $6
            WHERE workspace_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(invoice.workspace_id)
        .bind(invoice.invoice_id)
        .bind(invoice.status.as_str())
        .bind(invoice.sent_utc)
        .bind(invoice.paid_utc)
        .bind(invoice.updated_utc)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to update invoice status"))?;
        Ok(())
    }
}

#[async_trait]
impl InvoiceStore for PgStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), InvoicingError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("Health check failed"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn member_role(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Role>, InvoicingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["member_role"])
            .start_timer();

        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM workspace_members WHERE workspace_id = $1 AND user_id = $2",
        )
        .bind(workspace_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to look up membership"))?;

        timer.observe_duration();

        role.as_deref().map(decode::<Role>).transpose()
    }

    #[instrument(skip(self, input, now), fields(workspace_id = %input.workspace_id))]
    async fn create_invoice(
        &self,
        input: NewInvoice,
        now: DateTime<Utc>,
    ) -> Result<(Invoice, Vec<LineItem>), InvoicingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let invoice_id = Uuid::new_v4();
        let items = materialize_items(input.workspace_id, invoice_id, &input.content.items, now)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_sequences (workspace_id, last_value)
            VALUES ($1, 1)
            ON CONFLICT (workspace_id)
            DO UPDATE SET last_value = invoice_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(input.workspace_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to allocate invoice number"))?;

        let invoice = draft_invoice(invoice_id, format_invoice_number(sequence), &input, now);

        sqlx::query(
            r#"
            INSERT INTO invoices (
                invoice_id, workspace_id, invoice_number, status, project_id, contractor_id,
                team_id, client_name, client_email, client_address, currency, issue_date,
                due_date, tax_rate, subtotal, tax_amount, grand_total, notes, created_by,
                created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21)
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(invoice.workspace_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.status.as_str())
        .bind(invoice.project_id)
        .bind(invoice.contractor_id)
        .bind(invoice.team_id)
        .bind(&invoice.client_name)
        .bind(&invoice.client_email)
        .bind(&invoice.client_address)
        .bind(&invoice.currency)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.tax_rate)
        .bind(invoice.subtotal)
        .bind(invoice.tax_amount)
        .bind(invoice.grand_total)
        .bind(&invoice.notes)
        .bind(invoice.created_by)
        .bind(invoice.created_utc)
        .bind(invoice.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to create invoice"))?;

        Self::insert_items(&mut tx, &items).await?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit invoice"))?;

        timer.observe_duration();

        info!(invoice_id = %invoice.invoice_id, invoice_number = %invoice.invoice_number, "Draft invoice created");

        Ok((invoice, items))
    }

    #[instrument(skip(self, content, now))]
    async fn replace_invoice(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
        content: InvoiceContent,
        now: DateTime<Utc>,
    ) -> Result<Option<(Invoice, Vec<LineItem>)>, InvoicingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_invoice"])
            .start_timer();

        let items = materialize_items(workspace_id, invoice_id, &content.items, now)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let Some(mut invoice) = Self::lock_invoice(&mut tx, workspace_id, invoice_id).await? else {
            return Ok(None);
        };
        ensure_editable(&invoice)?;
        apply_content(&mut invoice, &content, now);

        sqlx::query(
            r#"
            UPDATE invoices
            SET project_id = $3, contractor_id = $4, team_id = $5, client_name = $6,
                client_email = $7, client_address = $8, currency = $9, issue_date = $10,
                due_date = $11, tax_rate = $12, subtotal = $13, tax_amount = $14,
                grand_total = $15, notes = $16, updated_utc = $17
            WHERE workspace_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(workspace_id)
        .bind(invoice_id)
        .bind(invoice.project_id)
        .bind(invoice.contractor_id)
        .bind(invoice.team_id)
        .bind(&invoice.client_name)
        .bind(&invoice.client_email)
        .bind(&invoice.client_address)
        .bind(&invoice.currency)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.tax_rate)
        .bind(invoice.subtotal)
        .bind(invoice.tax_amount)
        .bind(invoice.grand_total)
        .bind(&invoice.notes)
        .bind(invoice.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to update invoice"))?;

        sqlx::query("DELETE FROM line_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to clear line items"))?;

        Self::insert_items(&mut tx, &items).await?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit invoice update"))?;

        timer.observe_duration();

        Ok(Some((invoice, items)))
    }

    #[instrument(skip(self))]
    async fn get_invoice(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, InvoicingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM invoices WHERE workspace_id = $1 AND invoice_id = $2",
            INVOICE_COLUMNS
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(workspace_id)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to get invoice"))?;

        timer.observe_duration();

        row.map(Invoice::try_from).transpose()
    }

    #[instrument(skip(self, filter))]
    async fn list_invoices(
        &self,
        workspace_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, InvoicingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let filter = filter.normalized();
        let sql = format!(
            r#"
            SELECT {} FROM invoices
            WHERE workspace_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR project_id = $3)
            ORDER BY created_utc DESC, invoice_number DESC
            LIMIT $4 OFFSET $5
            "#,
            INVOICE_COLUMNS
        );
        let rows = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(workspace_id)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.project_id)
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list invoices"))?;

        timer.observe_duration();

        rows.into_iter().map(Invoice::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn line_items(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<LineItem>, InvoicingError> {
        let rows = sqlx::query_as::<_, LineItemRow>(
            r#"
            SELECT line_item_id, invoice_id, workspace_id, description, quantity, unit_price,
                amount, position, created_utc
            FROM line_items
            WHERE workspace_id = $1 AND invoice_id = $2
            ORDER BY position
            "#,
        )
        .bind(workspace_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to get line items"))?;

        Ok(rows.into_iter().map(LineItem::from).collect())
    }

    #[instrument(skip(self))]
    async fn payments(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, InvoicingError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE workspace_id = $1 AND invoice_id = $2 ORDER BY created_utc",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(workspace_id)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list payments"))?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn delete_invoice(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<bool, InvoicingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        // Items and payments cascade.
        let result = sqlx::query("DELETE FROM invoices WHERE workspace_id = $1 AND invoice_id = $2")
            .bind(workspace_id)
            .bind(invoice_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to delete invoice"))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, now))]
    async fn mark_sent(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Invoice>, InvoicingError> {
        let sql = format!(
            r#"
            UPDATE invoices
            SET status = CASE WHEN status = 'DRAFT' THEN 'SENT' ELSE status END,
                sent_utc = CASE WHEN status = 'DRAFT' THEN $3 ELSE sent_utc END,
                updated_utc = CASE WHEN status = 'DRAFT' THEN $3 ELSE updated_utc END
            WHERE workspace_id = $1 AND invoice_id = $2
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(workspace_id)
            .bind(invoice_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to mark invoice sent"))?;

        row.map(Invoice::try_from).transpose()
    }

    #[instrument(skip(self, now))]
    async fn change_status(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
        requested: InvoiceStatus,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<StatusChange>, InvoicingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["change_status"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let Some(mut invoice) = Self::lock_invoice(&mut tx, workspace_id, invoice_id).await? else {
            return Ok(None);
        };
        let paid = Self::paid_total(&mut tx, invoice_id).await?;

        let plan = plan_status_change(&invoice, paid, requested)?;
        plan.apply_to(&mut invoice, now);

        let settlement = plan
            .settle
            .map(|amount| settlement_payment(&invoice, amount, actor_id, now));
        if let Some(payment) = &settlement {
            Self::insert_payment(&mut tx, payment).await?;
        }

        let mut removed_settlements = 0;
        if plan.clear_settlements {
            removed_settlements =
                sqlx::query("DELETE FROM payments WHERE invoice_id = $1 AND source = $2")
                    .bind(invoice_id)
                    .bind(PaymentSource::Settlement.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error("Failed to remove settlement payments"))?
                    .rows_affected();
        }

        if plan.transition.is_change() {
            Self::write_status(&mut tx, &invoice).await?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit status change"))?;

        timer.observe_duration();

        Ok(Some(StatusChange {
            invoice,
            transition: plan.transition,
            settlement,
            removed_settlements,
        }))
    }

    #[instrument(skip(self, input, now), fields(workspace_id = %input.workspace_id, invoice_id = %input.invoice_id))]
    async fn record_payment(
        &self,
        input: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentOutcome>, InvoicingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let Some(mut invoice) =
            Self::lock_invoice(&mut tx, input.workspace_id, input.invoice_id).await?
        else {
            return Ok(None);
        };
        let prior = Self::paid_total(&mut tx, input.invoice_id).await?;

        let (plan, total_paid) = plan_payment(&invoice, prior, input.amount)?;
        let payment = input.into_payment(&invoice, PaymentSource::Manual, now);
        Self::insert_payment(&mut tx, &payment).await?;

        plan.apply_to(&mut invoice, now);
        if plan.transition.is_change() {
            Self::write_status(&mut tx, &invoice).await?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit payment"))?;

        timer.observe_duration();

        Ok(Some(PaymentOutcome {
            payment,
            invoice,
            total_paid,
            transition: plan.transition,
        }))
    }

    async fn append_activity(&self, entry: &ActivityEntry) -> Result<(), InvoicingError> {
        sqlx::query(
            r#"
            INSERT INTO activity_logs (
                activity_id, workspace_id, project_id, actor_id, action, details, invoice_id,
                created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.activity_id)
        .bind(entry.workspace_id)
        .bind(entry.project_id)
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.details)
        .bind(entry.invoice_id)
        .bind(entry.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to append activity"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_activity(
        &self,
        workspace_id: Uuid,
        invoice_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ActivityEntry>, InvoicingError> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            r#"
            SELECT activity_id, workspace_id, project_id, actor_id, action, details, invoice_id,
                created_utc
            FROM activity_logs
            WHERE workspace_id = $1 AND ($2::uuid IS NULL OR invoice_id = $2)
            ORDER BY created_utc DESC
            LIMIT $3
            "#,
        )
        .bind(workspace_id)
        .bind(invoice_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list activity"))?;

        Ok(rows
            .into_iter()
            .map(|row| ActivityEntry {
                activity_id: row.activity_id,
                workspace_id: row.workspace_id,
                project_id: row.project_id,
                actor_id: row.actor_id,
                action: row.action,
                details: row.details,
                invoice_id: row.invoice_id,
                created_utc: row.created_utc,
            })
            .collect())
    }

    async fn append_notification(
        &self,
        notification: &Notification,
    ) -> Result<(), InvoicingError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                notification_id, workspace_id, user_id, title, message, invoice_id, read,
                created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(notification.notification_id)
        .bind(notification.workspace_id)
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.invoice_id)
        .bind(notification.read)
        .bind(notification.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to append notification"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_notifications(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Notification>, InvoicingError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT notification_id, workspace_id, user_id, title, message, invoice_id, read,
                created_utc
            FROM notifications
            WHERE workspace_id = $1 AND user_id = $2
            ORDER BY created_utc DESC
            LIMIT $3
            "#,
        )
        .bind(workspace_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list notifications"))?;

        Ok(rows
            .into_iter()
            .map(|row| Notification {
                notification_id: row.notification_id,
                workspace_id: row.workspace_id,
                user_id: row.user_id,
                title: row.title,
                message: row.message,
                invoice_id: row.invoice_id,
                read: row.read,
                created_utc: row.created_utc,
            })
            .collect())
    }
}

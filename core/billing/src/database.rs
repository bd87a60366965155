use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use knowledge_forge_schemas::{Subscriber, SubscriptionStatus};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

const SUBSCRIBER_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS subscribers (
        email TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        external_subscription_id TEXT,
        subscribed INTEGER NOT NULL DEFAULT 0,
        subscription_tier TEXT,
        subscription_end TEXT,
        status TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_subscribers_user ON subscribers(user_id);
    CREATE INDEX IF NOT EXISTS idx_subscribers_external ON subscribers(external_subscription_id);
";

const SUBSCRIBER_COLUMNS: &str =
    "email, user_id, external_subscription_id, subscribed, subscription_tier, subscription_end, status, updated_at";

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// One subscriber row per email, overwritten as billing events arrive
pub struct SubscriberStore {
    conn: Connection,
}

impl SubscriberStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SUBSCRIBER_SCHEMA)?;
        info!("Subscriber store initialized");
        Ok(Self { conn })
    }

    /// Insert or overwrite the row keyed by email.
    pub fn upsert(&self, subscriber: &Subscriber) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO subscribers (email, user_id, external_subscription_id, subscribed, subscription_tier, subscription_end, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(email) DO UPDATE SET
                    user_id = excluded.user_id,
                    external_subscription_id = excluded.external_subscription_id,
                    subscribed = excluded.subscribed,
                    subscription_tier = excluded.subscription_tier,
                    subscription_end = excluded.subscription_end,
                    status = excluded.status,
                    updated_at = excluded.updated_at",
                params![
                    subscriber.email,
                    subscriber.user_id,
                    subscriber.external_subscription_id,
                    subscriber.subscribed,
                    subscriber.subscription_tier,
                    subscriber.subscription_end,
                    subscriber.status.as_str(),
                    subscriber.updated_at,
                ],
            )
            .context("Failed to upsert subscriber")?;

        debug!(
            "Stored subscriber {} ({}, subscribed={})",
            subscriber.email,
            subscriber.status.as_str(),
            subscriber.subscribed
        );
        Ok(())
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<Subscriber>> {
        self.find_one("email = ?1", email)
    }

    pub fn find_by_user(&self, user_id: &str) -> Result<Option<Subscriber>> {
        self.find_one("user_id = ?1", user_id)
    }

    pub fn find_by_subscription_id(&self, subscription_id: &str) -> Result<Option<Subscriber>> {
        self.find_one("external_subscription_id = ?1", subscription_id)
    }

    fn find_one(&self, predicate: &str, value: &str) -> Result<Option<Subscriber>> {
        let sql = format!(
            "SELECT {} FROM subscribers WHERE {} ORDER BY updated_at DESC LIMIT 1",
            SUBSCRIBER_COLUMNS, predicate
        );

        let subscriber = self
            .conn
            .query_row(&sql, params![value], subscriber_from_row)
            .optional()?;
        Ok(subscriber)
    }
}

fn subscriber_from_row(row: &Row) -> rusqlite::Result<Subscriber> {
    let raw_status: String = row.get(6)?;
    let status = SubscriptionStatus::parse(&raw_status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("unknown subscription status '{}'", raw_status).into(),
        )
    })?;

    Ok(Subscriber {
        email: row.get(0)?,
        user_id: row.get(1)?,
        external_subscription_id: row.get(2)?,
        subscribed: row.get(3)?,
        subscription_tier: row.get(4)?,
        subscription_end: row.get(5)?,
        status,
        updated_at: row.get(7)?,
    })
}

use anyhow::{Context, Result};
use knowledge_forge_indexing::{ensure_schema, now_rfc3339};
use knowledge_forge_schemas::{
    generate_chunk_id, generate_entry_id, generate_scope_id, ChunkId, EmbeddingChunk, EntryId,
    Insights, KnowledgeEntry, KnowledgeScope, ScopeId, ScopeResult, ScopeSummary,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

use crate::brainstorm::BrainstormSeed;
use crate::classifier::scope_color;

/// A chunk of entry content with its embedding, in content order.
#[derive(Debug, Clone)]
pub struct ChunkEmbedding {
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Everything needed to persist one submission.
#[derive(Debug)]
pub struct NewEntry<'a> {
    pub user_id: &'a str,
    pub title: &'a str,
    pub content: &'a str,
    pub source_url: Option<&'a str>,
    pub scope: &'a ScopeResult,
    pub insights: &'a Insights,
    pub chunks: &'a [ChunkEmbedding],
}

#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub entry: KnowledgeEntry,
    pub scope: KnowledgeScope,
    pub chunk_count: usize,
}

/// Scope, entry and embedding tables for the write path and dashboard reads
pub struct KnowledgeStore {
    conn: Connection,
}

impl KnowledgeStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        ensure_schema(&conn)?;
        info!("Knowledge store initialized");
        Ok(Self { conn })
    }

    /// Atomic get-or-create on (user_id, name).
    pub fn get_or_create_scope(
        &self,
        user_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<KnowledgeScope> {
        get_or_create_scope(&self.conn, user_id, name, description)
    }

    /// Persist scope, entry and chunks in one transaction. Any failure rolls
    /// back every step.
    pub fn store(&mut self, new: NewEntry<'_>) -> Result<StoredEntry> {
        let tx = self.conn.transaction()?;

        let scope = get_or_create_scope(
            &tx,
            new.user_id,
            &new.scope.scope,
            Some(new.scope.reasoning.as_str()),
        )
        .context("Failed to resolve scope")?;

        let now = now_rfc3339();
        let entry = KnowledgeEntry {
            id: generate_entry_id(),
            user_id: new.user_id.to_string(),
            scope_id: scope.id.clone(),
            title: new.title.to_string(),
            content: new.content.to_string(),
            source_url: new.source_url.map(str::to_string),
            processed_content: new.insights.clone(),
            created_at: now.clone(),
            updated_at: now.clone(),
        };

        tx.execute(
            "INSERT INTO knowledge_entries (id, user_id, scope_id, title, content, source_url, processed_content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.id.0,
                entry.user_id,
                entry.scope_id.0,
                entry.title,
                entry.content,
                entry.source_url,
                serde_json::to_string(&entry.processed_content)?,
                entry.created_at,
                entry.updated_at,
            ],
        )
        .context("Failed to insert knowledge entry")?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO knowledge_embeddings (id, entry_id, user_id, content_chunk, embedding, chunk_index, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for (index, chunk) in new.chunks.iter().enumerate() {
                stmt.execute(params![
                    generate_chunk_id().0,
                    entry.id.0,
                    entry.user_id,
                    chunk.content,
                    serde_json::to_string(&chunk.embedding)?,
                    index as u32,
                    now,
                ])
                .with_context(|| format!("Failed to insert embedding chunk {}", index))?;
            }
        }

        tx.commit()?;

        info!(
            "Stored entry {} in scope '{}' with {} chunks",
            entry.id,
            scope.name,
            new.chunks.len()
        );

        Ok(StoredEntry {
            entry,
            scope,
            chunk_count: new.chunks.len(),
        })
    }

    /// Delete an entry owned by the user; its chunks go with it.
    /// Returns false when no such entry exists for this user.
    pub fn delete_entry(&self, user_id: &str, entry_id: &EntryId) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM knowledge_entries WHERE id = ?1 AND user_id = ?2",
            params![entry_id.0, user_id],
        )?;

        debug!("Deleted {} entries for id {}", deleted, entry_id);
        Ok(deleted > 0)
    }

    pub fn get_entry(&self, user_id: &str, entry_id: &EntryId) -> Result<Option<KnowledgeEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT id, user_id, scope_id, title, content, source_url, processed_content, created_at, updated_at
                 FROM knowledge_entries WHERE id = ?1 AND user_id = ?2",
                params![entry_id.0, user_id],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// The user's scopes with entry counts, alphabetical.
    pub fn list_scopes(&self, user_id: &str) -> Result<Vec<ScopeSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.user_id, s.name, s.description, s.color, s.created_at, s.updated_at,
                    COUNT(e.id)
             FROM knowledge_scopes s
             LEFT JOIN knowledge_entries e ON e.scope_id = s.id
             WHERE s.user_id = ?1
             GROUP BY s.id
             ORDER BY s.name",
        )?;

        let scopes = stmt
            .query_map(params![user_id], |row| {
                Ok(ScopeSummary {
                    scope: scope_from_row(row)?,
                    entry_count: row.get::<_, i64>(7)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(scopes)
    }

    /// Newest entries first, optionally within one scope.
    pub fn list_entries(
        &self,
        user_id: &str,
        scope_id: Option<&ScopeId>,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, scope_id, title, content, source_url, processed_content, created_at, updated_at
             FROM knowledge_entries
             WHERE user_id = ?1 AND (?2 IS NULL OR scope_id = ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3",
        )?;

        let entries = stmt
            .query_map(
                params![user_id, scope_id.map(|s| s.0.as_str()), limit as i64],
                entry_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    pub fn get_chunks(&self, entry_id: &EntryId) -> Result<Vec<EmbeddingChunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entry_id, user_id, content_chunk, embedding, chunk_index, created_at
             FROM knowledge_embeddings
             WHERE entry_id = ?1
             ORDER BY chunk_index",
        )?;

        let chunks = stmt
            .query_map(params![entry_id.0], |row| {
                Ok(EmbeddingChunk {
                    id: ChunkId(row.get(0)?),
                    entry_id: EntryId(row.get(1)?),
                    user_id: row.get(2)?,
                    content_chunk: row.get(3)?,
                    embedding: json_column(row, 4)?,
                    chunk_index: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(chunks)
    }

    /// Recent entries as brainstorming material.
    pub fn brainstorm_seeds(&self, user_id: &str, limit: usize) -> Result<Vec<BrainstormSeed>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.title, s.name, e.processed_content
             FROM knowledge_entries e
             JOIN knowledge_scopes s ON s.id = e.scope_id
             WHERE e.user_id = ?1
             ORDER BY e.created_at DESC, e.rowid DESC
             LIMIT ?2",
        )?;

        let seeds = stmt
            .query_map(params![user_id, limit as i64], |row| {
                let insights: Insights = json_column(row, 2)?;
                Ok(BrainstormSeed {
                    title: row.get(0)?,
                    scope_name: row.get(1)?,
                    summary: insights.summary,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(seeds)
    }

    pub fn count_scopes(&self, user_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM knowledge_scopes WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn count_entries(&self, user_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM knowledge_entries WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn get_or_create_scope(
    conn: &Connection,
    user_id: &str,
    name: &str,
    description: Option<&str>,
) -> Result<KnowledgeScope> {
    let now = now_rfc3339();
    let inserted = conn.execute(
        "INSERT INTO knowledge_scopes (id, user_id, name, description, color, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(user_id, name) DO NOTHING",
        params![
            generate_scope_id().0,
            user_id,
            name,
            description,
            scope_color(name),
            now
        ],
    )?;

    if inserted > 0 {
        info!("Created scope '{}' for user {}", name, user_id);
    }

    let scope = conn.query_row(
        "SELECT id, user_id, name, description, color, created_at, updated_at
         FROM knowledge_scopes WHERE user_id = ?1 AND name = ?2",
        params![user_id, name],
        scope_from_row,
    )?;

    Ok(scope)
}

fn scope_from_row(row: &Row) -> rusqlite::Result<KnowledgeScope> {
    Ok(KnowledgeScope {
        id: ScopeId(row.get(0)?),
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        color: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn entry_from_row(row: &Row) -> rusqlite::Result<KnowledgeEntry> {
    Ok(KnowledgeEntry {
        id: EntryId(row.get(0)?),
        user_id: row.get(1)?,
        scope_id: ScopeId(row.get(2)?),
        title: row.get(3)?,
        content: row.get(4)?,
        source_url: row.get(5)?,
        processed_content: json_column(row, 6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, index: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn scope(name: &str) -> ScopeResult {
        ScopeResult {
            scope: name.to_string(),
            confidence: 0.9,
            reasoning: format!("About {}", name),
        }
    }

    fn chunks(n: usize) -> Vec<ChunkEmbedding> {
        (0..n)
            .map(|i| ChunkEmbedding {
                content: format!("chunk {}", i),
                embedding: vec![i as f32, 1.0, 0.5],
            })
            .collect()
    }

    fn store_entry(store: &mut KnowledgeStore, user: &str, scope_name: &str, n: usize) -> StoredEntry {
        let scope = scope(scope_name);
        let insights = Insights {
            summary: format!("Summary for {}", scope_name),
            ..Default::default()
        };
        let chunks = chunks(n);
        store
            .store(NewEntry {
                user_id: user,
                title: "Title",
                content: "Content",
                source_url: Some("https://example.com"),
                scope: &scope,
                insights: &insights,
                chunks: &chunks,
            })
            .unwrap()
    }

    #[test]
    fn test_store_persists_entry_and_ordered_chunks() {
        let temp = NamedTempFile::new().unwrap();
        let mut store = KnowledgeStore::new(temp.path()).unwrap();

        let stored = store_entry(&mut store, "u1", "Technology & AI", 3);
        assert_eq!(stored.chunk_count, 3);
        assert_eq!(stored.scope.name, "Technology & AI");
        assert_eq!(stored.scope.description.as_deref(), Some("About Technology & AI"));
        assert_eq!(stored.scope.color, "#3B82F6");

        let chunks = store.get_chunks(&stored.entry.id).unwrap();
        let indexes: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(chunks[2].embedding, vec![2.0, 1.0, 0.5]);
        assert!(chunks.iter().all(|c| c.user_id == "u1"));

        let entry = store.get_entry("u1", &stored.entry.id).unwrap().unwrap();
        assert_eq!(entry.scope_id, stored.scope.id);
        assert_eq!(entry.processed_content.summary, "Summary for Technology & AI");
        assert_eq!(entry.source_url.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_sequential_submissions_share_one_scope() {
        let mut store = KnowledgeStore::in_memory().unwrap();

        let first = store_entry(&mut store, "u1", "Health & Wellness", 1);
        let second = store_entry(&mut store, "u1", "Health & Wellness", 1);
        store_entry(&mut store, "u2", "Health & Wellness", 1);

        assert_eq!(first.scope.id, second.scope.id);
        assert_eq!(store.count_scopes("u1").unwrap(), 1);
        assert_eq!(store.count_scopes("u2").unwrap(), 1);
        // First reasoning wins
        assert_eq!(second.scope.description.as_deref(), Some("About Health & Wellness"));
    }

    #[test]
    fn test_failed_chunk_insert_rolls_back_everything() {
        let mut store = KnowledgeStore::in_memory().unwrap();
        store.conn.execute_batch("DROP TABLE knowledge_embeddings").unwrap();

        let scope = scope("Creative Projects");
        let insights = Insights::default();
        let chunks = chunks(2);
        let result = store.store(NewEntry {
            user_id: "u1",
            title: "T",
            content: "C",
            source_url: None,
            scope: &scope,
            insights: &insights,
            chunks: &chunks,
        });

        assert!(result.is_err());
        assert_eq!(store.count_entries("u1").unwrap(), 0);
        assert_eq!(store.count_scopes("u1").unwrap(), 0);
    }

    #[test]
    fn test_delete_cascades_and_respects_owner() {
        let mut store = KnowledgeStore::in_memory().unwrap();
        let stored = store_entry(&mut store, "u1", "Finance & Investing", 4);

        assert!(!store.delete_entry("intruder", &stored.entry.id).unwrap());
        assert_eq!(store.get_chunks(&stored.entry.id).unwrap().len(), 4);

        assert!(store.delete_entry("u1", &stored.entry.id).unwrap());
        assert!(store.get_chunks(&stored.entry.id).unwrap().is_empty());
        assert!(store.get_entry("u1", &stored.entry.id).unwrap().is_none());
        assert!(!store.delete_entry("u1", &stored.entry.id).unwrap());
    }

    #[test]
    fn test_dashboard_reads() {
        let mut store = KnowledgeStore::in_memory().unwrap();
        let a = store_entry(&mut store, "u1", "Business Strategy", 1);
        store_entry(&mut store, "u1", "Business Strategy", 1);
        let c = store_entry(&mut store, "u1", "Learning & Education", 1);

        let scopes = store.list_scopes("u1").unwrap();
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[0].scope.name, "Business Strategy");
        assert_eq!(scopes[0].entry_count, 2);
        assert_eq!(scopes[1].entry_count, 1);

        let all = store.list_entries("u1", None, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, c.entry.id);

        let business = store.list_entries("u1", Some(&a.scope.id), 10).unwrap();
        assert_eq!(business.len(), 2);
        assert_eq!(store.list_entries("u1", None, 1).unwrap().len(), 1);
        assert!(store.list_entries("u2", None, 10).unwrap().is_empty());

        let seeds = store.brainstorm_seeds("u1", 10).unwrap();
        assert_eq!(seeds.len(), 3);
        assert_eq!(seeds[0].scope_name, "Learning & Education");
        assert_eq!(seeds[0].summary, "Summary for Learning & Education");
    }
}

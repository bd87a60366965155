use anyhow::Result;
use knowledge_forge_schemas::{EntryId, RetrievalTier, RetrievedChunk};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::embedding::{cosine_similarity, Embedder};
use crate::schema::ensure_schema;

/// Characters of entry content returned for keyword and recency rows.
const ENTRY_PREVIEW_CHARS: usize = 500;

/// Read-side queries the retriever needs. `KnowledgeIndex` is the SQLite
/// implementation.
pub trait KnowledgeLookup: Send {
    /// Rank the user's chunks by `1 - cosine_distance` to the query, keep those
    /// above `match_threshold`, best first, at most `match_count`.
    fn match_knowledge_embeddings(
        &self,
        query_embedding: &[f32],
        match_threshold: f32,
        match_count: usize,
        user_id: &str,
    ) -> Result<Vec<RetrievedChunk>>;

    /// Entries whose title or content contains any keyword (case-insensitive),
    /// newest first.
    fn keyword_matches(
        &self,
        user_id: &str,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>>;

    /// The user's newest entries.
    fn recent_entries(&self, user_id: &str, limit: usize) -> Result<Vec<RetrievedChunk>>;
}

/// Vector and text search over the knowledge tables
pub struct KnowledgeIndex {
    conn: Connection,
}

impl KnowledgeIndex {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        ensure_schema(&conn)?;
        info!("Knowledge index initialized");
        Ok(Self { conn })
    }

    fn entry_rows(
        &self,
        sql: &str,
        values: Vec<String>,
        tier: RetrievalTier,
    ) -> Result<Vec<RetrievedChunk>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| entry_row(row, tier))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn entry_row(row: &Row, tier: RetrievalTier) -> rusqlite::Result<RetrievedChunk> {
    let entry_id: String = row.get(0)?;
    Ok(RetrievedChunk {
        id: entry_id.clone(),
        entry_id: EntryId(entry_id),
        title: row.get(1)?,
        content_chunk: row.get(2)?,
        scope_name: row.get(3)?,
        similarity: 0.0,
        tier,
    })
}

/// `keywords` must already be lowercase.
fn contains_any(text: &str, keywords: &[String]) -> bool {
    let text = text.to_lowercase();
    keywords.iter().any(|k| text.contains(k.as_str()))
}

impl KnowledgeLookup for KnowledgeIndex {
    fn match_knowledge_embeddings(
        &self,
        query_embedding: &[f32],
        match_threshold: f32,
        match_count: usize,
        user_id: &str,
    ) -> Result<Vec<RetrievedChunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.content_chunk, c.embedding, c.entry_id, e.title, s.name
             FROM knowledge_embeddings c
             JOIN knowledge_entries e ON e.id = c.entry_id
             JOIN knowledge_scopes s ON s.id = e.scope_id
             WHERE c.user_id = ?1 AND e.user_id = ?1",
        )?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut matches: Vec<RetrievedChunk> = Vec::new();
        let mut skipped = 0usize;

        for (id, content_chunk, embedding_json, entry_id, title, scope_name) in rows {
            let embedding: Vec<f32> = match serde_json::from_str(&embedding_json) {
                Ok(embedding) => embedding,
                Err(e) => {
                    warn!("Skipping chunk {} with unreadable embedding: {}", id, e);
                    continue;
                }
            };

            if embedding.len() != query_embedding.len() {
                skipped += 1;
                continue;
            }

            let similarity = cosine_similarity(query_embedding, &embedding);
            if similarity > match_threshold {
                matches.push(RetrievedChunk {
                    id,
                    entry_id: EntryId(entry_id),
                    title,
                    content_chunk,
                    scope_name,
                    similarity,
                    tier: RetrievalTier::Semantic,
                });
            }
        }

        if skipped > 0 {
            warn!("Skipped {} chunks with mismatched embedding dimension", skipped);
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        matches.truncate(match_count);

        debug!("Vector match returned {} chunks for user {}", matches.len(), user_id);
        Ok(matches)
    }

    fn keyword_matches(
        &self,
        user_id: &str,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if keywords.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        // SQLite's LIKE and lower() only fold ASCII, so matching happens here
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.title, e.content, s.name
             FROM knowledge_entries e
             JOIN knowledge_scopes s ON s.id = e.scope_id
             WHERE e.user_id = ?1
             ORDER BY e.created_at DESC, e.rowid DESC",
        )?;

        let mut matches = Vec::new();
        let mut rows = stmt.query(params![user_id])?;
        while let Some(row) = rows.next()? {
            let title: String = row.get(1)?;
            let content: String = row.get(2)?;
            if !contains_any(&title, &keywords) && !contains_any(&content, &keywords) {
                continue;
            }

            let entry_id: String = row.get(0)?;
            matches.push(RetrievedChunk {
                id: entry_id.clone(),
                entry_id: EntryId(entry_id),
                title,
                content_chunk: content.chars().take(ENTRY_PREVIEW_CHARS).collect(),
                scope_name: row.get(3)?,
                similarity: 0.0,
                tier: RetrievalTier::Keyword,
            });
            if matches.len() == limit {
                break;
            }
        }

        Ok(matches)
    }

    fn recent_entries(&self, user_id: &str, limit: usize) -> Result<Vec<RetrievedChunk>> {
        let sql = format!(
            "SELECT e.id, e.title, substr(e.content, 1, {}), s.name
             FROM knowledge_entries e
             JOIN knowledge_scopes s ON s.id = e.scope_id
             WHERE e.user_id = ?1
             ORDER BY e.created_at DESC, e.rowid DESC
             LIMIT {}",
            ENTRY_PREVIEW_CHARS, limit
        );

        self.entry_rows(&sql, vec![user_id.to_string()], RetrievalTier::Recent)
    }
}

// ============================================================================
// Tiered retrieval
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub match_threshold: f32,
    pub match_count: usize,
    /// Fewer semantic rows than this triggers the keyword tier
    pub min_semantic_results: usize,
    pub max_keywords: usize,
    pub keyword_similarity: f32,
    pub recent_limit: usize,
    pub recent_similarity: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.4,
            match_count: 15,
            min_semantic_results: 5,
            max_keywords: 3,
            keyword_similarity: 0.3,
            recent_limit: 8,
            recent_similarity: 0.1,
        }
    }
}

/// Semantic search with keyword and recency fallbacks. Tiers are concatenated
/// in order and never re-sorted together.
pub struct Retriever {
    embedder: Embedder,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(embedder: Embedder) -> Self {
        Self::with_config(embedder, RetrievalConfig::default())
    }

    pub fn with_config(embedder: Embedder, config: RetrievalConfig) -> Self {
        Self { embedder, config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub async fn retrieve<L: KnowledgeLookup>(
        &self,
        index: &Mutex<L>,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<RetrievedChunk>> {
        let query_embedding = self.embedder.embed(query).await;
        if query_embedding.is_fallback {
            warn!("Query embedding fell back to a random vector; semantic ranking is meaningless");
        }

        let index = index.lock().await;

        // Tier 1: vector similarity
        let mut results = index.match_knowledge_embeddings(
            &query_embedding.values,
            self.config.match_threshold,
            self.config.match_count,
            user_id,
        )?;
        debug!("Semantic tier: {} rows", results.len());

        // Tier 2: keyword substring match
        if results.len() < self.config.min_semantic_results {
            let keywords = extract_keywords(query, self.config.max_keywords);
            if !keywords.is_empty() {
                let seen: HashSet<EntryId> = results.iter().map(|r| r.entry_id.clone()).collect();
                let remaining = self.config.match_count.saturating_sub(results.len());
                let candidates =
                    index.keyword_matches(user_id, &keywords, remaining + seen.len())?;

                for mut row in candidates
                    .into_iter()
                    .filter(|row| !seen.contains(&row.entry_id))
                    .take(remaining)
                {
                    row.similarity = self.config.keyword_similarity;
                    results.push(row);
                }
                debug!("After keyword tier ({:?}): {} rows", keywords, results.len());
            }
        }

        // Tier 3: most recent entries
        if results.is_empty() {
            results = index
                .recent_entries(user_id, self.config.recent_limit)?
                .into_iter()
                .map(|mut row| {
                    row.similarity = self.config.recent_similarity;
                    row
                })
                .collect();
            debug!("Recency tier: {} rows", results.len());
        }

        info!("Retrieved {} rows for user {}", results.len(), user_id);
        Ok(results)
    }
}

/// Up to `max` distinct lowercase tokens longer than two characters, in query order.
pub fn extract_keywords(query: &str, max: usize) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();

    for token in query.split_whitespace() {
        let word = token
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.chars().count() > 2 && !keywords.contains(&word) {
            keywords.push(word);
        }
        if keywords.len() == max {
            break;
        }
    }

    keywords
}

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use cortex_core::{Clock, MemoryId};

use crate::db::init_db;
use crate::decay::{decayed_prominence, is_archivable};
use crate::embedder::{cosine_similarity, Embedder};
use crate::error::{MemoryError, Result};
use crate::reranker::{blend_scores, MemoryReranker};
use crate::relation::RelationInferrer;
use crate::types::{Memory, MemoryCategory, MemoryType, RelationType, RerankCandidate, SearchResult};

const DEDUP_SIMILARITY_THRESHOLD: f64 = 0.92;
const GRAPH_ACTIVATION_SEED_COUNT: usize = 10;
const EDGE_WEIGHTS: &[(RelationType, f64, f64)] = &[
    (RelationType::Updates, 0.9, 0.1),
    (RelationType::Extends, 0.7, 0.3),
    (RelationType::Derives, 0.8, 0.2),
];

/// The hybrid memory graph: single-writer, multi-reader SQLite storage per
/// spec.md §5. The writer connection is guarded by a mutex; reads open a
/// fresh connection against the same file so concurrent `search()` calls
/// never block on the writer (WAL mode makes this safe).
pub struct MemoryStore {
    write_conn: Mutex<Connection>,
    db_path: Option<String>,
    embedder: Arc<dyn Embedder>,
    relation_inferrer: Option<Arc<dyn RelationInferrer>>,
    reranker: Option<Arc<dyn MemoryReranker>>,
    clock: Arc<dyn Clock>,
}

pub struct FullDecayResult {
    pub updated: u64,
    pub archived: u64,
}

pub struct FusionResult {
    pub derived_memories: Vec<Memory>,
    pub clusters_examined: usize,
}

impl MemoryStore {
    pub fn open(
        path: &str,
        embedder: Arc<dyn Embedder>,
        relation_inferrer: Option<Arc<dyn RelationInferrer>>,
        reranker: Option<Arc<dyn MemoryReranker>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            write_conn: Mutex::new(conn),
            db_path: Some(path.to_string()),
            embedder,
            relation_inferrer,
            reranker,
            clock,
        })
    }

    pub fn open_in_memory(
        embedder: Arc<dyn Embedder>,
        relation_inferrer: Option<Arc<dyn RelationInferrer>>,
        reranker: Option<Arc<dyn MemoryReranker>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            write_conn: Mutex::new(conn),
            db_path: None,
            embedder,
            relation_inferrer,
            reranker,
            clock,
        })
    }

    /// A fresh read-only connection to the same database file. In-memory
    /// stores (used in tests) have no separate file to reopen, so reads fall
    /// back to the writer mutex in that mode only.
    fn read_conn(&self) -> Result<Option<Connection>> {
        match &self.db_path {
            Some(path) => Ok(Some(Connection::open(path)?)),
            None => Ok(None),
        }
    }

    fn with_read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match self.read_conn()? {
            Some(conn) => f(&conn),
            None => f(&self.write_conn.lock().unwrap()),
        }
    }

    // ---- write path (spec.md §4.5.1) ----

    pub async fn add(
        &self,
        user_id: &str,
        content: &str,
        category: MemoryCategory,
        source: &str,
        confidence: f64,
        detect_relations: bool,
    ) -> Result<Memory> {
        let embedding = self.embedder.embed(content).await?;

        let candidates = self.candidates_for_dedup(user_id)?;
        for candidate in &candidates {
            if let Some(existing_embedding) = &candidate.embedding {
                let sim = cosine_similarity(&embedding, existing_embedding);
                if sim > DEDUP_SIMILARITY_THRESHOLD {
                    self.bump_times_confirmed(&candidate.id)?;
                    debug!(memory_id = %candidate.id, similarity = sim, "deduplicated into existing memory");
                    return self.get(&candidate.id)?.ok_or_else(|| {
                        MemoryError::NotFound(candidate.id.clone())
                    });
                }
            }
        }

        let now = self.clock.now();
        let memory = Memory {
            id: MemoryId::new().to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            category,
            memory_type: MemoryType::Regular,
            importance: 5,
            confidence,
            prominence: 1.0,
            is_latest: true,
            source: source.to_string(),
            document_date: now,
            event_date: None,
            last_accessed: None,
            access_count: 0,
            embedding: Some(embedding),
            source_chunk: None,
            learned_from: source.to_string(),
            times_confirmed: 1,
            created_at: now,
        };
        self.insert_memory(&memory)?;

        if detect_relations {
            if let Some(inferrer) = &self.relation_inferrer {
                for candidate in &candidates {
                    if let Some(relation) = inferrer.infer(content, &candidate.id, &candidate.content).await {
                        self.insert_relation_and_maybe_supersede(&memory.id, &relation.target_id, relation.relation_type, relation.confidence)?;
                    }
                }
            }
        }

        Ok(memory)
    }

    fn candidates_for_dedup(&self, user_id: &str) -> Result<Vec<Memory>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, content, category, memory_type, importance, confidence, \
                 prominence, is_latest, source, document_date, event_date, last_accessed, \
                 access_count, embedding, source_chunk, learned_from, times_confirmed, created_at \
                 FROM memories WHERE user_id = ?1 AND is_latest = 1 ORDER BY created_at DESC LIMIT 50",
            )?;
            let rows = stmt.query_map(params![user_id], row_to_memory)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    fn bump_times_confirmed(&self, memory_id: &str) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "UPDATE memories SET times_confirmed = times_confirmed + 1, last_accessed = ?2 \
             WHERE id = ?1",
            params![memory_id, self.clock.now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn insert_memory(&self, memory: &Memory) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memories (
                id, user_id, content, category, memory_type, importance, confidence, prominence, \
                is_latest, source, document_date, event_date, last_accessed, access_count, \
                embedding, source_chunk, learned_from, times_confirmed, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                memory.id,
                memory.user_id,
                memory.content,
                memory.category.to_string(),
                memory.memory_type.to_string(),
                memory.importance,
                memory.confidence,
                memory.prominence,
                memory.is_latest as i64,
                memory.source,
                memory.document_date.to_rfc3339(),
                memory.event_date.map(|d| d.to_rfc3339()),
                memory.last_accessed.map(|d| d.to_rfc3339()),
                memory.access_count,
                memory.embedding.as_ref().map(|e| embedding_to_blob(e)),
                memory.source_chunk,
                memory.learned_from,
                memory.times_confirmed,
                memory.created_at.to_rfc3339(),
            ],
        )?;
        let rowid = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO memories_fts(rowid, content) VALUES (?1, ?2)",
            params![rowid, memory.content],
        )?;
        Ok(())
    }

    fn insert_relation_and_maybe_supersede(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: RelationType,
        confidence: f64,
    ) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO relations (source_id, target_id, relation_type, confidence, created_at) \
             VALUES (?1,?2,?3,?4,?5)",
            params![source_id, target_id, relation_type.to_string(), confidence, self.clock.now().to_rfc3339()],
        )?;
        if relation_type == RelationType::Updates {
            tx.execute(
                "UPDATE memories SET is_latest = 0, memory_type = 'superseded' WHERE id = ?1",
                params![target_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, memory_id: &str) -> Result<Option<Memory>> {
        self.with_read(|conn| {
            conn.query_row(
                "SELECT id, user_id, content, category, memory_type, importance, confidence, \
                 prominence, is_latest, source, document_date, event_date, last_accessed, \
                 access_count, embedding, source_chunk, learned_from, times_confirmed, created_at \
                 FROM memories WHERE id = ?1",
                params![memory_id],
                row_to_memory,
            )
            .optional()
            .map_err(MemoryError::from)
        })
    }

    // ---- read path: hybrid retrieval (spec.md §4.5.2) ----

    pub async fn search(&self, user_id: &str, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let query_embedding = self.embedder.embed(query).await.ok();

        let keyword_hits = self.keyword_search(user_id, query)?;
        let semantic_hits = match &query_embedding {
            Some(qe) => self.semantic_search(user_id, qe)?,
            None => Vec::new(),
        };

        let mut combined: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
        for (id, score) in keyword_hits {
            *combined.entry(id).or_insert(0.0) += score;
        }
        for (id, score) in semantic_hits {
            *combined.entry(id).or_insert(0.0) += score;
        }

        let mut seeds: Vec<(String, f64)> = combined.into_iter().collect();
        seeds.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        seeds.truncate(GRAPH_ACTIVATION_SEED_COUNT);

        let activated = self.graph_activation(&seeds)?;

        let mut scored: Vec<(String, f64)> = activated.into_iter().collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some(reranker) = &self.reranker {
            scored = self.apply_reranker(reranker.as_ref(), query, scored).await?;
        }

        scored.retain(|(_, score)| *score >= 0.05);
        scored.truncate(k);

        let mut results = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            if let Some(memory) = self.get(&id)? {
                self.bump_access(&memory.id)?;
                let related = self.related_memories(&memory.id)?;
                results.push(SearchResult { memory, score, related });
            }
        }
        Ok(results)
    }

    fn keyword_search(&self, user_id: &str, query: &str) -> Result<Vec<(String, f64)>> {
        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        self.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, bm25(memories_fts) AS rank FROM memories_fts \
                 JOIN memories m ON m.rowid = memories_fts.rowid \
                 WHERE memories_fts MATCH ?1 AND m.user_id = ?2 AND m.is_latest = 1 \
                 ORDER BY rank LIMIT 50",
            )?;
            let rows = stmt.query_map(params![sanitized, user_id], |row| {
                let id: String = row.get(0)?;
                let rank: f64 = row.get(1)?;
                // bm25() returns lower-is-better; invert into a positive signal.
                Ok((id, 1.0 / (1.0 + rank.max(0.0))))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    fn semantic_search(&self, user_id: &str, query_embedding: &[f32]) -> Result<Vec<(String, f64)>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, embedding FROM memories WHERE user_id = ?1 AND is_latest = 1 AND embedding IS NOT NULL",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((id, blob))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, blob) = row?;
                let embedding = blob_to_embedding(&blob);
                let sim = cosine_similarity(query_embedding, &embedding);
                if sim > 0.0 {
                    out.push((id, sim));
                }
            }
            out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            out.truncate(50);
            Ok(out)
        })
    }

    /// Two-hop spread from seed nodes with per-relation-type forward/back
    /// weights (spec.md §4.5.2). Deterministic: no noise term is applied,
    /// which satisfies the σ=0 requirement for reproducible tests.
    fn graph_activation(&self, seeds: &[(String, f64)]) -> Result<std::collections::HashMap<String, f64>> {
        let mut activation: std::collections::HashMap<String, f64> =
            seeds.iter().cloned().collect();

        let edges = self.with_read(|conn| {
            let mut stmt = conn.prepare("SELECT source_id, target_id, relation_type FROM relations")?;
            let rows = stmt.query_map([], |row| {
                let source: String = row.get(0)?;
                let target: String = row.get(1)?;
                let rel: String = row.get(2)?;
                Ok((source, target, rel))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok::<_, MemoryError>(out)
        })?;

        for hop in 0..2 {
            let snapshot = activation.clone();
            for (source, target, rel_str) in &edges {
                let Ok(rel) = RelationType::from_str(rel_str) else { continue };
                let Some((_, forward, back)) = EDGE_WEIGHTS.iter().find(|(t, _, _)| *t == rel) else { continue };
                if let Some(seed_score) = snapshot.get(source) {
                    let spread = seed_score * forward * (0.5f64.powi(hop));
                    *activation.entry(target.clone()).or_insert(0.0) += spread;
                }
                if let Some(seed_score) = snapshot.get(target) {
                    let spread = seed_score * back * (0.5f64.powi(hop));
                    *activation.entry(source.clone()).or_insert(0.0) += spread;
                }
            }
        }
        Ok(activation)
    }

    async fn apply_reranker(
        &self,
        reranker: &dyn MemoryReranker,
        query: &str,
        scored: Vec<(String, f64)>,
    ) -> Result<Vec<(String, f64)>> {
        const MAX_CANDIDATES: usize = 20;
        let mut limited = scored;
        limited.truncate(MAX_CANDIDATES);

        let mut contents = Vec::with_capacity(limited.len());
        for (id, _) in &limited {
            let content = self.get(id)?.map(|m| m.content).unwrap_or_default();
            contents.push(content);
        }
        let candidates: Vec<RerankCandidate> = limited
            .iter()
            .enumerate()
            .map(|(i, (_, score))| RerankCandidate { index: i, content: contents[i].as_str(), original_score: *score })
            .collect();

        let llm_scores = match reranker.rerank(query, &candidates).await {
            Ok(scores) => scores,
            Err(e) => {
                warn!(error = %e, "reranker call failed, keeping original scores");
                Vec::new()
            }
        };

        let original: Vec<(usize, f64)> = limited.iter().enumerate().map(|(i, (_, s))| (i, *s)).collect();
        let blended = blend_scores(&original, &llm_scores);
        let mut out: Vec<(String, f64)> = blended
            .into_iter()
            .map(|(i, score)| (limited[i].0.clone(), score))
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    fn bump_access(&self, memory_id: &str) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "UPDATE memories SET access_count = access_count + 1, last_accessed = ?2, prominence = 1.0 \
             WHERE id = ?1",
            params![memory_id, self.clock.now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn related_memories(&self, memory_id: &str) -> Result<Vec<Memory>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT target_id FROM relations WHERE source_id = ?1 \
                 UNION SELECT source_id FROM relations WHERE target_id = ?1",
            )?;
            let ids: Vec<String> = stmt
                .query_map(params![memory_id], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            drop(stmt);
            let mut out = Vec::new();
            for id in ids {
                if let Some(m) = self.get_locked(conn, &id)? {
                    out.push(m);
                }
            }
            Ok(out)
        })
    }

    fn get_locked(&self, conn: &Connection, memory_id: &str) -> Result<Option<Memory>> {
        conn.query_row(
            "SELECT id, user_id, content, category, memory_type, importance, confidence, \
             prominence, is_latest, source, document_date, event_date, last_accessed, \
             access_count, embedding, source_chunk, learned_from, times_confirmed, created_at \
             FROM memories WHERE id = ?1",
            params![memory_id],
            row_to_memory,
        )
        .optional()
        .map_err(MemoryError::from)
    }

    // ---- gardener hooks: decay and fusion (spec.md §4.5.4-5) ----

    pub fn process_full_decay(&self) -> Result<FullDecayResult> {
        let conn = self.write_conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, memory_type, prominence, last_accessed, created_at, access_count FROM memories \
             WHERE memory_type != 'static_profile' AND memory_type != 'archived'",
        )?;
        let rows: Vec<(String, String, f64, Option<String>, String, u32)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
            })?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);
        self.decay_rows(&conn, rows)
    }

    /// Light-tick counterpart to `process_full_decay`: only the
    /// `window_size` most recently touched non-static memories per run,
    /// cheap enough to run on a ~5 minute cadence (spec.md §4.9 light tick).
    pub fn process_hot_decay(&self, window_size: usize) -> Result<FullDecayResult> {
        let conn = self.write_conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, memory_type, prominence, last_accessed, created_at, access_count FROM memories \
             WHERE memory_type != 'static_profile' AND memory_type != 'archived' \
             ORDER BY COALESCE(last_accessed, created_at) DESC LIMIT ?1",
        )?;
        let rows: Vec<(String, String, f64, Option<String>, String, u32)> = stmt
            .query_map(params![window_size as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
            })?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);
        self.decay_rows(&conn, rows)
    }

    fn decay_rows(
        &self,
        conn: &Connection,
        rows: Vec<(String, String, f64, Option<String>, String, u32)>,
    ) -> Result<FullDecayResult> {
        let now = self.clock.now();
        let mut updated = 0u64;
        let mut archived = 0u64;
        for (id, memory_type_str, prominence, last_accessed, created_at, access_count) in rows {
            let Ok(memory_type) = MemoryType::from_str(&memory_type_str) else { continue };
            let reference: DateTime<Utc> = last_accessed
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|| {
                    DateTime::parse_from_rfc3339(&created_at).map(|d| d.with_timezone(&Utc)).unwrap_or(now)
                });
            let new_prominence = decayed_prominence(prominence, memory_type, reference, now, access_count);
            let created: DateTime<Utc> =
                DateTime::parse_from_rfc3339(&created_at).map(|d| d.with_timezone(&Utc)).unwrap_or(now);

            if is_archivable(new_prominence, created, now) {
                conn.execute(
                    "UPDATE memories SET prominence = ?2, memory_type = 'archived' WHERE id = ?1",
                    params![id, new_prominence],
                )?;
                archived += 1;
            } else {
                conn.execute("UPDATE memories SET prominence = ?2 WHERE id = ?1", params![id, new_prominence])?;
                updated += 1;
            }
        }
        Ok(FullDecayResult { updated, archived })
    }

    pub async fn run_fusion(
        &self,
        max_clusters: usize,
        summarizer: &dyn crate::fusion::FusionSummarizer,
    ) -> Result<FusionResult> {
        let clusters = self.find_dormant_clusters()?;
        let examined = clusters.len().min(max_clusters);
        let mut derived_memories = Vec::new();

        for cluster in clusters.into_iter().take(max_clusters) {
            if cluster.len() < 2 {
                continue;
            }
            let contents: Vec<String> = cluster.iter().map(|m| m.content.clone()).collect();
            if let Some(summary) = summarizer.summarize(&contents).await {
                let user_id = cluster[0].user_id.clone();
                let derived = self.apply_fusion(&user_id, &cluster, &summary.summary, summary.importance, summary.category)?;
                derived_memories.push(derived);
            }
        }

        Ok(FusionResult { derived_memories, clusters_examined: examined })
    }

    /// Dormant clusters: prominence < 0.7, type in {regular, superseded},
    /// with ≥2 members connected by EXTENDS/UPDATES edges.
    fn find_dormant_clusters(&self) -> Result<Vec<Vec<Memory>>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, content, category, memory_type, importance, confidence, \
                 prominence, is_latest, source, document_date, event_date, last_accessed, \
                 access_count, embedding, source_chunk, learned_from, times_confirmed, created_at \
                 FROM memories WHERE prominence < 0.7 AND memory_type IN ('regular', 'superseded')",
            )?;
            let dormant: Vec<Memory> = stmt.query_map([], row_to_memory)?.collect::<rusqlite::Result<_>>()?;
            drop(stmt);

            let mut stmt = conn.prepare(
                "SELECT source_id, target_id FROM relations WHERE relation_type IN ('extends', 'updates')",
            )?;
            let edges: Vec<(String, String)> = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?;
            drop(stmt);

            let dormant_ids: std::collections::HashSet<&str> = dormant.iter().map(|m| m.id.as_str()).collect();
            let mut adjacency: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
            for (a, b) in &edges {
                if dormant_ids.contains(a.as_str()) && dormant_ids.contains(b.as_str()) {
                    adjacency.entry(a.clone()).or_default().push(b.clone());
                    adjacency.entry(b.clone()).or_default().push(a.clone());
                }
            }

            let by_id: std::collections::HashMap<String, Memory> =
                dormant.into_iter().map(|m| (m.id.clone(), m)).collect();
            let mut visited = std::collections::HashSet::new();
            let mut clusters = Vec::new();
            for id in by_id.keys() {
                if visited.contains(id) {
                    continue;
                }
                let mut stack = vec![id.clone()];
                let mut component = Vec::new();
                while let Some(cur) = stack.pop() {
                    if !visited.insert(cur.clone()) {
                        continue;
                    }
                    component.push(cur.clone());
                    if let Some(neighbors) = adjacency.get(&cur) {
                        for n in neighbors {
                            if !visited.contains(n) {
                                stack.push(n.clone());
                            }
                        }
                    }
                }
                if component.len() >= 2 {
                    clusters.push(component.into_iter().filter_map(|id| by_id.get(&id).cloned()).collect());
                }
            }
            Ok(clusters)
        })
    }

    /// Writes the fusion-produced memory and its DERIVES edges, superseding
    /// every source. Called by the gardener once the LLM summarizer has
    /// returned `{summary, importance, category}` for a cluster.
    pub fn apply_fusion(
        &self,
        user_id: &str,
        sources: &[Memory],
        summary: &str,
        importance: u8,
        category: MemoryCategory,
    ) -> Result<Memory> {
        let now = self.clock.now();
        let source_chunk = sources.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
        let derived = Memory {
            id: MemoryId::new().to_string(),
            user_id: user_id.to_string(),
            content: summary.to_string(),
            category,
            memory_type: MemoryType::Derived,
            importance,
            confidence: 0.9,
            prominence: 1.0,
            is_latest: true,
            source: "fusion".to_string(),
            document_date: now,
            event_date: None,
            last_accessed: None,
            access_count: 0,
            embedding: None,
            source_chunk: Some(source_chunk),
            learned_from: "gardener_fusion".to_string(),
            times_confirmed: 1,
            created_at: now,
        };
        self.insert_memory(&derived)?;

        let conn = self.write_conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        for source in sources {
            tx.execute(
                "INSERT OR IGNORE INTO relations (source_id, target_id, relation_type, confidence, created_at) \
                 VALUES (?1,?2,'derives',1.0,?3)",
                params![derived.id, source.id, now.to_rfc3339()],
            )?;
            tx.execute(
                "UPDATE memories SET is_latest = 0, memory_type = 'superseded' WHERE id = ?1",
                params![source.id],
            )?;
        }
        tx.commit()?;
        Ok(derived)
    }

    // ---- gardener hooks: enhanced forgetting (spec.md §4.9 step 4) ----

    /// Step 4(a): flags memories never retrieved, or not retrieved within
    /// `stale_after_days`, and applies a small prominence penalty. Returns
    /// the number of memories penalized.
    pub fn apply_retrieval_audit_penalty(&self, stale_after_days: i64, penalty_factor: f64) -> Result<u64> {
        let now = self.clock.now();
        let conn = self.write_conn.lock().unwrap();
        let cutoff = (now - chrono::Duration::days(stale_after_days)).to_rfc3339();
        let n = conn.execute(
            "UPDATE memories SET prominence = prominence * ?1
             WHERE memory_type NOT IN ('static_profile', 'archived')
               AND (last_accessed IS NULL OR last_accessed < ?2)",
            params![penalty_factor, cutoff],
        )?;
        Ok(n as u64)
    }

    /// Step 4(b): moves memories below `utility_threshold` prominence and
    /// older than `min_age_days` to `archived`, capped at `cap` per run so a
    /// single deep tick cannot stall on a backlog.
    pub fn archive_low_utility(&self, utility_threshold: f64, min_age_days: i64, cap: usize) -> Result<u64> {
        let now = self.clock.now();
        let conn = self.write_conn.lock().unwrap();
        let cutoff = (now - chrono::Duration::days(min_age_days)).to_rfc3339();
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM memories
                 WHERE memory_type NOT IN ('static_profile', 'archived')
                   AND prominence < ?1 AND created_at < ?2
                 LIMIT ?3",
            )?;
            let rows: Vec<String> = stmt.query_map(params![utility_threshold, cutoff, cap as i64], |row| row.get::<_, String>(0))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };
        for id in &ids {
            conn.execute("UPDATE memories SET memory_type = 'archived' WHERE id = ?1", [id])?;
        }
        Ok(ids.len() as u64)
    }

    /// Step 4(c): deletes archived memories whose prominence has decayed
    /// below `prominence_floor`. Sessions older than a configured age are
    /// pruned by `cortex-sessions`, not here.
    pub fn hard_prune_archived(&self, prominence_floor: f64) -> Result<u64> {
        let conn = self.write_conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM memories WHERE memory_type = 'archived' AND prominence < ?1",
            [prominence_floor],
        )?;
        Ok(n as u64)
    }

    /// Step 4(d): removes relations whose source or target memory no longer
    /// exists (e.g. after `hard_prune_archived` deleted one endpoint).
    pub fn cleanup_orphan_edges(&self) -> Result<u64> {
        let conn = self.write_conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM relations
             WHERE source_id NOT IN (SELECT id FROM memories)
                OR target_id NOT IN (SELECT id FROM memories)",
            [],
        )?;
        Ok(n as u64)
    }
}

fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .map(|w| format!("{w}*"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let category_str: String = row.get(3)?;
    let memory_type_str: String = row.get(4)?;
    let document_date: String = row.get(10)?;
    let event_date: Option<String> = row.get(11)?;
    let last_accessed: Option<String> = row.get(12)?;
    let embedding_blob: Option<Vec<u8>> = row.get(14)?;
    let created_at: String = row.get(18)?;

    Ok(Memory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        category: MemoryCategory::from_str(&category_str).unwrap_or(MemoryCategory::Fact),
        memory_type: MemoryType::from_str(&memory_type_str).unwrap_or(MemoryType::Regular),
        importance: row.get(5)?,
        confidence: row.get(6)?,
        prominence: row.get(7)?,
        is_latest: row.get::<_, i64>(8)? != 0,
        source: row.get(9)?,
        document_date: parse_rfc3339(&document_date),
        event_date: event_date.as_deref().map(parse_rfc3339),
        last_accessed: last_accessed.as_deref().map(parse_rfc3339),
        access_count: row.get(13)?,
        embedding: embedding_blob.map(|b| blob_to_embedding(&b)),
        source_chunk: row.get(15)?,
        learned_from: row.get(16)?,
        times_confirmed: row.get(17)?,
        created_at: parse_rfc3339(&created_at),
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::clock::FakeClock;
    use crate::embedder::HashEmbedder;

    fn store() -> MemoryStore {
        MemoryStore::open_in_memory(Arc::new(HashEmbedder::default()), None, None, FakeClock::new(Utc::now())).unwrap()
    }

    #[tokio::test]
    async fn add_then_search_finds_memory() {
        let store = store();
        store.add("u1", "lives in Dublin", MemoryCategory::Fact, "user_said", 0.9, false).await.unwrap();
        let results = store.search("u1", "where does the user live", 5).await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn duplicate_content_bumps_confirmation_instead_of_inserting() {
        let store = store();
        let first = store.add("u1", "likes coffee", MemoryCategory::Preference, "user_said", 0.8, false).await.unwrap();
        let second = store.add("u1", "likes coffee", MemoryCategory::Preference, "user_said", 0.8, false).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.times_confirmed, 2);
    }

    #[tokio::test]
    async fn full_decay_reduces_prominence_over_time() {
        let clock = FakeClock::new(Utc::now());
        let store = MemoryStore::open_in_memory(Arc::new(HashEmbedder::default()), None, None, clock.clone()).unwrap();
        let memory = store.add("u1", "works as a pilot", MemoryCategory::Fact, "user_said", 0.9, false).await.unwrap();
        clock.advance(chrono::Duration::days(40));
        store.process_full_decay().unwrap();
        let after = store.get(&memory.id).unwrap().unwrap();
        assert!(after.prominence < 1.0);
    }

    #[test]
    fn fusion_groups_connected_dormant_memories() {
        let store = store();
        // No relations yet; a single memory can't form a cluster of ≥2.
        let clusters = store.find_dormant_clusters().unwrap();
        assert!(clusters.is_empty());
    }
}

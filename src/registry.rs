//! Enrolled-face registry.
//!
//! The registry is a small, append-only set of `{name, embedding,
//! enrolled_at}` entries. Lookups run concurrently under a read lock; an
//! insert takes the write lock for the whole duplicate-check, durable-append
//! and publish sequence, so no lookup ever observes a partial entry.
//!
//! Durability goes through the `RegistryStore` trait: SQLite for the daemon,
//! an in-memory store for tests. Embeddings persist as little-endian `f32`
//! bytes and round-trip exactly.

use std::sync::{Mutex, OnceLock, RwLock};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::errors::RegistryError;
use crate::now_s;

/// Length of a face embedding vector.
pub const EMBEDDING_DIM: usize = 128;

/// Maximum accepted length of an enrolled name.
pub const MAX_NAME_LEN: usize = 64;

/// Fixed-length identity vector for one face. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaceEmbedding {
    values: Vec<f32>,
}

impl FaceEmbedding {
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.len() != EMBEDDING_DIM {
            return Err(anyhow!(
                "embedding must have {} components, got {}",
                EMBEDDING_DIM,
                values.len()
            ));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean distance to another embedding.
    pub fn distance(&self, other: &FaceEmbedding) -> f32 {
        self.values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }

    fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(EMBEDDING_DIM * 4);
        for value in &self.values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    fn from_le_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != EMBEDDING_DIM * 4 {
            return Err(anyhow!(
                "corrupt embedding blob: expected {} bytes, got {}",
                EMBEDDING_DIM * 4,
                bytes.len()
            ));
        }
        let values = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self { values })
    }
}

/// One enrolled face.
#[derive(Clone, Debug)]
pub struct RegistryEntry {
    /// Case-sensitive unique name.
    pub name: String,
    pub embedding: FaceEmbedding,
    /// Enrollment time in seconds since the epoch.
    pub enrolled_at: u64,
}

impl RegistryEntry {
    pub fn new(name: impl Into<String>, embedding: FaceEmbedding) -> Self {
        Self {
            name: name.into(),
            embedding,
            enrolled_at: now_s(),
        }
    }
}

/// A conforming enrolled name is non-empty, at most `MAX_NAME_LEN` chars,
/// starts with an alphanumeric character and contains only alphanumerics,
/// spaces and `._'-`. Uniqueness is case-sensitive, enforced by the registry.
pub fn validate_enrolled_name(name: &str) -> Result<()> {
    static NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 ._'-]{0,63}$").unwrap()
    });

    if name.is_empty() {
        return Err(anyhow!("enrolled name must not be empty"));
    }
    if !re.is_match(name) {
        return Err(anyhow!(
            "enrolled name must match ^[A-Za-z0-9][A-Za-z0-9 ._'-]{{0,{}}}$",
            MAX_NAME_LEN - 1
        ));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Durable store
// ----------------------------------------------------------------------------

/// Durability contract for the registry: load everything at startup, append
/// one entry per successful enrollment.
pub trait RegistryStore: Send {
    fn load_all(&mut self) -> Result<Vec<RegistryEntry>>;
    fn append(&mut self, entry: &RegistryEntry) -> Result<()>;
}

/// SQLite-backed store. The UNIQUE constraint on `name` is a second line of
/// defense under the in-crate duplicate check.
pub struct SqliteRegistryStore {
    conn: Connection,
}

impl SqliteRegistryStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open registry database {}", db_path))?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS enrolled_faces (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL UNIQUE,
              embedding BLOB NOT NULL,
              enrolled_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_enrolled_at ON enrolled_faces(enrolled_at);
            "#,
        )?;
        Ok(())
    }
}

impl RegistryStore for SqliteRegistryStore {
    fn load_all(&mut self) -> Result<Vec<RegistryEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, embedding, enrolled_at FROM enrolled_faces ORDER BY id ASC")?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let enrolled_at: i64 = row.get(2)?;
            entries.push(RegistryEntry {
                name,
                embedding: FaceEmbedding::from_le_bytes(&blob)?,
                enrolled_at: enrolled_at as u64,
            });
        }
        Ok(entries)
    }

    fn append(&mut self, entry: &RegistryEntry) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO enrolled_faces(name, embedding, enrolled_at) VALUES (?1, ?2, ?3)",
                params![
                    entry.name,
                    entry.embedding.to_le_bytes(),
                    entry.enrolled_at as i64
                ],
            )
            .with_context(|| format!("append registry entry '{}'", entry.name))?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Default)]
pub struct InMemoryRegistryStore {
    entries: Vec<RegistryEntry>,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryStore for InMemoryRegistryStore {
    fn load_all(&mut self) -> Result<Vec<RegistryEntry>> {
        Ok(self.entries.clone())
    }

    fn append(&mut self, entry: &RegistryEntry) -> Result<()> {
        self.entries.push(entry.clone());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Thread-safe enrolled-face registry.
///
/// Readers-writer discipline: many concurrent `lookup_nearest` calls, at most
/// one `insert`, and the insert excludes all readers for its duration.
pub struct FaceRegistry {
    entries: RwLock<Vec<RegistryEntry>>,
    store: Mutex<Box<dyn RegistryStore>>,
}

impl FaceRegistry {
    /// Load the registry from a store. Entries keep their insertion order;
    /// that order is the deterministic tie-break for equal match distances.
    pub fn open(mut store: Box<dyn RegistryStore>) -> Result<Self> {
        let entries = store.load_all()?;
        log::info!("face registry loaded with {} entries", entries.len());
        Ok(Self {
            entries: RwLock::new(entries),
            store: Mutex::new(store),
        })
    }

    /// Nearest enrolled entry by Euclidean distance, or `None` when the
    /// registry is empty. Equal distances resolve to the earliest-inserted
    /// entry.
    pub fn lookup_nearest(&self, probe: &FaceEmbedding) -> Option<(RegistryEntry, f32)> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut best: Option<(&RegistryEntry, f32)> = None;
        for entry in entries.iter() {
            let distance = entry.embedding.distance(probe);
            let better = match best {
                None => true,
                // Strict comparison keeps the earliest-inserted entry on ties.
                Some((_, best_distance)) => distance < best_distance,
            };
            if better {
                best = Some((entry, distance));
            }
        }
        best.map(|(entry, distance)| (entry.clone(), distance))
    }

    /// Insert a new entry. Fails with `DuplicateName` when the name exists
    /// (case-sensitive); the durable append happens before the entry becomes
    /// visible to lookups, inside the same write-lock scope.
    pub fn insert(&self, entry: RegistryEntry) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.iter().any(|existing| existing.name == entry.name) {
            return Err(RegistryError::DuplicateName(entry.name));
        }
        {
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            store.append(&entry)?;
        }
        log::info!("enrolled '{}'", entry.name);
        entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enrolled names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }
}

use super::{IndexError, VectorIndex, models::Metadata, serialize_vector};
use rusqlite::params;
use std::collections::HashSet;

/// Rename repeated ids so every position keeps its own entry.
///
/// The first occurrence keeps its id; later ones get `__dup{k}` where `k` is the
/// position in the batch (bumped further if that name is itself taken).
pub fn disambiguate_ids(ids: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(ids.len());
    let mut out = Vec::with_capacity(ids.len());

    for (k, id) in ids.iter().enumerate() {
        let mut candidate = id.clone();
        let mut bump = k;
        while seen.contains(&candidate) {
            candidate = format!("{id}__dup{bump}");
            bump += ids.len();
        }
        seen.insert(candidate.clone());
        out.push(candidate);
    }

    out
}

impl VectorIndex {
    /// Insert or replace entries by id, all inside one transaction.
    ///
    /// An existing id has its document, metadata and vector fully replaced.
    /// Duplicate ids within the call are renamed (see [`disambiguate_ids`]) and the
    /// ids actually written are returned in input order.
    pub fn upsert(
        &mut self,
        ids: &[String],
        texts: &[String],
        vectors: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> Result<Vec<String>, IndexError> {
        if ids.len() != texts.len() || ids.len() != vectors.len() || ids.len() != metadatas.len()
        {
            return Err(IndexError::LengthMismatch {
                ids: ids.len(),
                texts: texts.len(),
                vectors: vectors.len(),
                metadatas: metadatas.len(),
            });
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let dims = vectors[0].len();
        if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                got: v.len(),
            });
        }
        if let Some(expected) = self.dimensions()? {
            if expected != dims {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: dims,
                });
            }
        }

        // Cosine distance is undefined for these and would poison every later query.
        if let Some(i) = vectors.iter().position(|v| !has_usable_norm(v)) {
            return Err(IndexError::DegenerateVector { id: ids[i].clone() });
        }

        let final_ids = disambiguate_ids(ids);
        let collection = self.collection().to_string();

        let tx = self.conn.transaction()?;

        tx.execute(
            "UPDATE collections SET dimensions = ? WHERE name = ? AND dimensions IS NULL",
            params![dims as i64, collection],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO entries (collection, id, document, metadata, embedding, updated_at)
                VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
                ON CONFLICT(collection, id) DO UPDATE SET
                    document = excluded.document,
                    metadata = excluded.metadata,
                    embedding = excluded.embedding,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )?;

            for (i, id) in final_ids.iter().enumerate() {
                let metadata = serde_json::to_string(&metadatas[i])?;
                stmt.execute(params![
                    collection,
                    id,
                    texts[i],
                    metadata,
                    serialize_vector(&vectors[i]),
                ])?;
            }
        }

        tx.commit()?;
        Ok(final_ids)
    }
}

fn has_usable_norm(vector: &[f32]) -> bool {
    let norm_sq: f32 = vector.iter().map(|x| x * x).sum();
    norm_sq.is_finite() && norm_sq > 0.0
}

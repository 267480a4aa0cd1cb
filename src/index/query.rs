use super::{IndexError, VectorIndex, models::Hit, models::Metadata, serialize_vector};
use rusqlite::{OptionalExtension, params};

impl VectorIndex {
    /// Nearest-neighbour search by cosine distance.
    ///
    /// Returns at most `top_k` hits ordered nearest first; ties keep insertion order.
    /// An empty collection yields an empty result. Entries whose distance is undefined
    /// (a zero vector on either side) are skipped.
    pub fn query(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<Hit>, IndexError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, document, metadata, distance
            FROM (
                SELECT
                    seq,
                    id,
                    document,
                    metadata,
                    vec_distance_cosine(embedding, ?) AS distance
                FROM entries
                WHERE collection = ?
            )
            WHERE distance IS NOT NULL
            ORDER BY distance ASC, seq ASC
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(
            params![serialize_vector(query_vector), self.collection(), top_k as i64],
            |row| {
                let id: String = row.get(0)?;
                let document: String = row.get(1)?;
                let metadata: String = row.get(2)?;
                let distance: f64 = row.get(3)?;
                Ok((id, document, metadata, distance))
            },
        )?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, document, metadata, distance) = row?;
            hits.push(Hit {
                id,
                document,
                metadata: serde_json::from_str::<Metadata>(&metadata)?,
                distance: distance as f32,
            });
        }

        Ok(hits)
    }

    /// Fetch a single entry by id, reported with a distance of zero.
    pub fn get(&self, id: &str) -> Result<Option<Hit>, IndexError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT document, metadata FROM entries WHERE collection = ? AND id = ?",
                params![self.collection(), id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(document, metadata)| -> Result<Hit, IndexError> {
            Ok(Hit {
                id: id.to_string(),
                document,
                metadata: serde_json::from_str(&metadata)?,
                distance: 0.0,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn unit(v: &[f32]) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn test_query_empty_collection() {
        let index = VectorIndex::open_in_memory("laws").unwrap();
        let hits = index.query(&unit(&[1.0, 0.0, 0.0]), 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let mut index = VectorIndex::open_in_memory("laws").unwrap();
        let vec = unit(&[0.1, 0.2, 0.3]);
        let meta = json!({"dieu_ten": "Điều 1", "row_index": 0})
            .as_object()
            .cloned()
            .unwrap();

        index
            .upsert(&[s("A1")], &[s("Phạm vi điều chỉnh")], &[vec.clone()], &[meta.clone()])
            .unwrap();

        let hits = index.query(&vec, 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "A1");
        assert_eq!(hits[0].document, "Phạm vi điều chỉnh");
        assert_eq!(hits[0].metadata, meta);
        assert!(hits[0].distance.abs() < 1e-5, "distance {}", hits[0].distance);

        let fetched = index.get("A1").unwrap().unwrap();
        assert_eq!(fetched.document, "Phạm vi điều chỉnh");
        assert!(index.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_ranking_order_and_limit() {
        let mut index = VectorIndex::open_in_memory("laws").unwrap();
        let query = unit(&[1.0, 0.0, 0.0]);

        // Inserted far-to-near so ordering cannot come from insertion order.
        let ids = vec![s("far"), s("mid"), s("near")];
        let docs = vec![s("far"), s("mid"), s("near")];
        let vectors = vec![
            unit(&[0.0, 1.0, 0.0]),
            unit(&[1.0, 1.0, 0.0]),
            unit(&[1.0, 0.1, 0.0]),
        ];
        let metas = vec![Metadata::new(), Metadata::new(), Metadata::new()];
        index.upsert(&ids, &docs, &vectors, &metas).unwrap();

        let hits = index.query(&query, 3).unwrap();
        let order: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(order, vec!["near", "mid", "far"]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(hits.iter().all(|h| h.document == h.id));

        assert_eq!(index.query(&query, 2).unwrap().len(), 2);
        assert_eq!(index.query(&query, 10).unwrap().len(), 3);
        assert!(index.query(&query, 0).unwrap().is_empty());
    }

    #[test]
    fn test_zero_vector_rows_do_not_break_queries() {
        let mut index = VectorIndex::open_in_memory("laws").unwrap();
        index
            .upsert(&[s("good")], &[s("Điều 1")], &[vec![1.0, 0.0]], &[Metadata::new()])
            .unwrap();
        // A row written before zero vectors were rejected at upsert.
        index
            .conn
            .execute(
                "INSERT INTO entries (collection, id, document, metadata, embedding) VALUES (?, ?, ?, ?, ?)",
                params!["laws", "zero", "", "{}", serialize_vector(&[0.0, 0.0])],
            )
            .unwrap();
        assert_eq!(index.count().unwrap(), 2);

        let hits = index.query(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "good");

        assert!(index.query(&[0.0, 0.0], 2).unwrap().is_empty());
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let vec = unit(&[0.3, 0.4]);
        {
            let mut index = VectorIndex::open(dir.path(), "laws").unwrap();
            index
                .upsert(&[s("k")], &[s("kept")], &[vec.clone()], &[Metadata::new()])
                .unwrap();
        }

        let index = VectorIndex::open(dir.path(), "laws").unwrap();
        let hits = index.query(&vec, 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "k");
        assert_eq!(hits[0].document, "kept");
    }
}

//! Activity rank aggregate: one score per username.

use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::RankItem;

impl Database {
    /// Add one to a member's score, creating the member at 1 if absent.
    /// Returns the new score.
    pub fn increment_rank(&self, member: &str) -> Result<f64> {
        let score = self.conn().query_row(
            "INSERT INTO rank (member, score) VALUES (?1, 1)
             ON CONFLICT(member) DO UPDATE SET score = score + 1
             RETURNING score",
            params![member],
            |row| row.get(0),
        )?;
        Ok(score)
    }

    /// All members by descending score; ties are broken by name.
    pub fn rank_descending(&self) -> Result<Vec<RankItem>> {
        let mut stmt = self.conn().prepare(
            "SELECT member, score FROM rank
             ORDER BY score DESC, member ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(RankItem {
                member: row.get(0)?,
                score: row.get(1)?,
            })
        })?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    pub fn rank_score(&self, member: &str) -> Result<Option<f64>> {
        use rusqlite::OptionalExtension;

        let score = self
            .conn()
            .query_row(
                "SELECT score FROM rank WHERE member = ?1",
                params![member],
                |row| row.get(0),
            )
            .optional()?;
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_initializes_then_adds() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.rank_score("alice").unwrap(), None);
        assert_eq!(db.increment_rank("alice").unwrap(), 1.0);
        assert_eq!(db.increment_rank("alice").unwrap(), 2.0);
        assert_eq!(db.rank_score("alice").unwrap(), Some(2.0));
    }

    #[test]
    fn descending_order() {
        let db = Database::open_in_memory().unwrap();
        db.increment_rank("bob").unwrap();
        for _ in 0..3 {
            db.increment_rank("alice").unwrap();
        }
        db.increment_rank("carol").unwrap();
        db.increment_rank("carol").unwrap();

        let members: Vec<String> = db
            .rank_descending()
            .unwrap()
            .into_iter()
            .map(|item| item.member)
            .collect();
        assert_eq!(members, vec!["alice", "carol", "bob"]);
    }
}

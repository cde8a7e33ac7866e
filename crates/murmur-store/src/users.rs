//! Profile mirror used to enrich payloads with display names and avatars.

use rusqlite::{params, OptionalExtension};

use murmur_shared::UserId;

use crate::database::{fmt_ts, parse_ts, parse_uuid, Database};
use crate::error::Result;
use crate::models::User;
use crate::repository::UserStore;

impl UserStore for Database {
    fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, avatar, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                avatar       = excluded.avatar",
            params![
                user.id.to_string(),
                user.display_name,
                user.avatar,
                fmt_ts(&user.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, display_name, avatar, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let created: String = row.get(3)?;
    Ok(User {
        id: UserId(parse_uuid(0, &id)?),
        display_name: row.get(1)?,
        avatar: row.get(2)?,
        created_at: parse_ts(3, &created)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("users.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn upsert_then_get() {
        let (_dir, db) = open();
        let mut user = User {
            id: UserId::new(),
            display_name: "Alice".into(),
            avatar: "/uploads/a.png".into(),
            created_at: Utc::now(),
        };
        db.upsert_user(&user).unwrap();

        user.display_name = "Alice B.".into();
        db.upsert_user(&user).unwrap();

        let loaded = db.get_user(&user.id).unwrap().unwrap();
        assert_eq!(loaded.display_name, "Alice B.");
        assert_eq!(loaded.avatar, "/uploads/a.png");
    }

    #[test]
    fn unknown_user_is_none() {
        let (_dir, db) = open();
        assert!(db.get_user(&UserId::new()).unwrap().is_none());
    }
}

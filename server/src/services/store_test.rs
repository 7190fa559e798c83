use super::*;
use time::macros::datetime;

#[test]
fn room_summary_serializes_camel_case() {
    let summary = RoomSummary {
        id: "room-1".into(),
        name: Some("Bob".into()),
        last_message: Some("see you there".into()),
        last_message_at: Some(datetime!(2024-01-01 10:00 UTC)),
    };

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["id"], "room-1");
    assert_eq!(json["name"], "Bob");
    assert_eq!(json["lastMessage"], "see you there");
    assert_eq!(json["lastMessageAt"], "2024-01-01T10:00:00Z");
}

#[test]
fn empty_room_summary_serializes_nulls() {
    let summary = RoomSummary {
        id: "room-1".into(),
        name: None,
        last_message: None,
        last_message_at: None,
    };

    let json = serde_json::to_value(&summary).unwrap();
    assert!(json["name"].is_null());
    assert!(json["lastMessage"].is_null());
    assert!(json["lastMessageAt"].is_null());
}

#[test]
fn unread_count_serializes_camel_case() {
    let unread = UnreadCount { room_id: "room-1".into(), count: 3 };
    let json = serde_json::to_value(&unread).unwrap();
    assert_eq!(json["roomId"], "room-1");
    assert_eq!(json["count"], 3);
}

// =============================================================================
// LIVE DATABASE TESTS
// =============================================================================
//
// Run with: cargo test --features live-db-tests
// Requires DATABASE_URL pointing at a migratable Postgres instance.

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;
    use crate::db;
    use sqlx::PgPool;

    async fn pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        db::init_pool(&url).await.expect("database unavailable")
    }

    /// Seed two users sharing a fresh room; returns (store, room_id, user_a, user_b).
    async fn seed(pool: &PgPool) -> (PgStore, String, String, String) {
        let room_id = Uuid::new_v4().to_string();
        let user_a = Uuid::new_v4().to_string();
        let user_b = Uuid::new_v4().to_string();

        for (id, name) in [(&user_a, "Alice"), (&user_b, "Bob")] {
            sqlx::query("INSERT INTO users (id, name) VALUES ($1, $2)")
                .bind(id)
                .bind(name)
                .execute(pool)
                .await
                .unwrap();
        }
        sqlx::query("INSERT INTO rooms (id) VALUES ($1)")
            .bind(&room_id)
            .execute(pool)
            .await
            .unwrap();
        for user in [&user_a, &user_b] {
            sqlx::query("INSERT INTO room_users (id, room_id, user_id) VALUES ($1, $2, $3)")
                .bind(Uuid::new_v4().to_string())
                .bind(&room_id)
                .bind(user)
                .execute(pool)
                .await
                .unwrap();
        }

        (PgStore::new(pool.clone()), room_id, user_a, user_b)
    }

    #[tokio::test]
    async fn membership_reflects_room_users_rows() {
        let pool = pool().await;
        let (store, room_id, user_a, _) = seed(&pool).await;

        assert!(store.check_membership(&user_a, &room_id).await.unwrap());
        assert!(!store.check_membership("stranger", &room_id).await.unwrap());
    }

    #[tokio::test]
    async fn messages_since_is_strictly_greater_and_ascending() {
        let pool = pool().await;
        let (store, room_id, user_a, _) = seed(&pool).await;

        let first = store.save_message(&room_id, &user_a, "first").await.unwrap();
        let second = store.save_message(&room_id, &user_a, "second").await.unwrap();

        // The watermark message itself is excluded.
        let synced = store.messages_since(&room_id, first.created_at).await.unwrap();
        assert_eq!(synced.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec![second.id.as_str()]);

        let all = store
            .messages_since(&room_id, first.created_at - time::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].created_at <= all[1].created_at);
    }

    #[tokio::test]
    async fn recent_messages_pages_backwards_but_returns_ascending() {
        let pool = pool().await;
        let (store, room_id, user_a, _) = seed(&pool).await;

        for i in 0..5 {
            store.save_message(&room_id, &user_a, &format!("m{i}")).await.unwrap();
        }

        let newest = store.recent_messages(&room_id, None, 2).await.unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].content, "m3");
        assert_eq!(newest[1].content, "m4");

        let older = store
            .recent_messages(&room_id, Some(newest[0].created_at), 2)
            .await
            .unwrap();
        assert_eq!(older[0].content, "m1");
        assert_eq!(older[1].content, "m2");
    }

    #[tokio::test]
    async fn mark_read_clears_unread_counts() {
        let pool = pool().await;
        let (store, room_id, user_a, user_b) = seed(&pool).await;

        store.save_message(&room_id, &user_b, "ping").await.unwrap();

        let before = store.unread_counts(&user_a).await.unwrap();
        let room = before.iter().find(|u| u.room_id == room_id).unwrap();
        assert_eq!(room.count, 1);

        store.mark_read(&user_a, &room_id).await.unwrap();

        let after = store.unread_counts(&user_a).await.unwrap();
        let room = after.iter().find(|u| u.room_id == room_id).unwrap();
        assert_eq!(room.count, 0);
    }

    #[tokio::test]
    async fn rooms_for_user_names_the_peer() {
        let pool = pool().await;
        let (store, room_id, user_a, user_b) = seed(&pool).await;

        store.save_message(&room_id, &user_b, "latest").await.unwrap();

        let rooms = store.rooms_for_user(&user_a).await.unwrap();
        let room = rooms.iter().find(|r| r.id == room_id).unwrap();
        assert_eq!(room.name.as_deref(), Some("Bob"));
        assert_eq!(room.last_message.as_deref(), Some("latest"));
        assert!(room.last_message_at.is_some());
    }
}

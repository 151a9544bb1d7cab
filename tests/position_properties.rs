mod common;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::*;
use moderation_queue::constants::QueueType;
use moderation_queue::queue::position::rank_of;
use moderation_queue::queue::ServingKey;
use proptest::prelude::*;

fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Enqueue one topic per entry, then pin each item's entry time to `base + offset`
async fn store_and_compare(entries: Vec<(i64, i64)>) {
    let queue = setup_test_queue().await;
    for (n, (priority, offset_secs)) in entries.iter().enumerate() {
        let (_, item) = submit_topic(&queue, &format!("topic {n}"), Some(*priority)).await;
        sqlx::query("UPDATE queue_items SET entered_queue_at = ? WHERE id = ?")
            .bind(base_time() + ChronoDuration::seconds(*offset_secs))
            .bind(item.id)
            .execute(queue.pool())
            .await
            .unwrap();
    }

    let listed = queue
        .store
        .list_pending(QueueType::TopicCreation, "global", 1000, 0)
        .await
        .unwrap();
    assert_eq!(listed.len(), entries.len());

    let keys: Vec<ServingKey> = listed.iter().map(ServingKey::from).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted, "listing order differs from serving order");

    for item in &listed {
        let expected = rank_of(&keys, &ServingKey::from(item));
        assert_eq!(item.position_in_queue, expected, "item {}", item.id);

        let fetched = queue.store.get(item.id).await.unwrap().unwrap();
        assert_eq!(fetched.position_in_queue, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_stored_positions_follow_serving_order(
        entries in prop::collection::vec((40i64..=43, 0i64..5), 1..12)
    ) {
        tokio_test::block_on(store_and_compare(entries));
    }
}

//! Subscription Relay Tests
//!
//! Verifies enrichment (including the placeholder for unresolvable actors),
//! topic isolation, and the unsubscribe lifecycle.

#[cfg(test)]
mod subscription_relay_tests {
    use anyhow::Result;
    use learnspace_core::config::SyncConfig;
    use learnspace_core::db::{ChangeAction, MemoryDocumentStore, MemoryPrimaryStore};
    use learnspace_core::models::{
        Curriculum, EntityKind, InteractionEvent, LiveEvent, MaintenanceMode, RecordFilter, User,
        UserRole,
    };
    use learnspace_core::services::{
        DbService, DbServiceError, Enrichment, FeedSource, FeedSpec, RelayedEvent,
        SubscriptionHandle, SubscriptionRelay,
    };
    use std::sync::{Arc, OnceLock};
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    struct Harness {
        mirror: Arc<MemoryDocumentStore>,
        service: Arc<DbService>,
        relay: SubscriptionRelay,
    }

    fn harness() -> Harness {
        let primary = Arc::new(MemoryPrimaryStore::new());
        let mirror = Arc::new(MemoryDocumentStore::new());
        let service = Arc::new(DbService::new(
            primary,
            mirror.clone(),
            SyncConfig {
                operation_timeout_ms: 200,
                ..SyncConfig::default()
            },
        ));
        let relay = SubscriptionRelay::new(service.clone());
        Harness {
            mirror,
            service,
            relay,
        }
    }

    fn collector() -> (
        impl Fn(RelayedEvent) + Send + Sync + 'static,
        mpsc::UnboundedReceiver<RelayedEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            move |event: RelayedEvent| {
                let _ = tx.send(event);
            },
            rx,
        )
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<RelayedEvent>) -> RelayedEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event should be relayed within 1 second")
            .expect("feed should still be open")
    }

    async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<RelayedEvent>) {
        let received = timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(
            !matches!(received, Ok(Some(_))),
            "no event expected, got {:?}",
            received
        );
    }

    #[tokio::test]
    async fn test_interaction_feed_resolves_user_name() -> Result<()> {
        let h = harness();
        h.service
            .save_user(&User::new("u1", "Sara", "sara@x.com", UserRole::Student))
            .await?;
        let (callback, mut rx) = collector();
        let handle = h
            .relay
            .subscribe_to_lesson_interactions("lesson_1", callback)
            .await?;
        assert_eq!(handle.topic(), "interaction_events:lesson_1");

        let interaction = InteractionEvent::new("lesson_1", "u1", "video_play");
        h.service.record_interaction(&interaction).await?;

        let event = next_event(&mut rx).await;
        assert_eq!(event.action, ChangeAction::Added);
        assert_eq!(event.id, interaction.id);
        let record = event.record.unwrap();
        assert_eq!(record["userName"], "Sara");
        assert_eq!(record["eventType"], "video_play");
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_actor_gets_placeholder_and_is_still_delivered() -> Result<()> {
        let h = harness();
        let (callback, mut rx) = collector();
        let _handle = h
            .relay
            .subscribe_to_lesson_interactions("lesson_1", callback)
            .await?;

        h.service
            .record_interaction(&InteractionEvent::new("lesson_1", "ghost", "video_play"))
            .await?;

        let event = next_event(&mut rx).await;
        assert_eq!(event.record.unwrap()["userName"], "Unknown user");
        Ok(())
    }

    #[tokio::test]
    async fn test_different_keys_never_see_each_others_events() -> Result<()> {
        let h = harness();
        let (first_cb, mut first_rx) = collector();
        let (second_cb, mut second_rx) = collector();
        let _first = h
            .relay
            .subscribe_to_lesson_interactions("lesson_1", first_cb)
            .await?;
        let _second = h
            .relay
            .subscribe_to_lesson_interactions("lesson_2", second_cb)
            .await?;

        h.service
            .record_interaction(&InteractionEvent::new("lesson_2", "u1", "quiz_start"))
            .await?;

        let event = next_event(&mut second_rx).await;
        assert_eq!(event.topic, "interaction_events:lesson_2");
        assert_silent(&mut first_rx).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_callbacks_and_is_idempotent() -> Result<()> {
        let h = harness();
        let (callback, mut rx) = collector();
        let handle = h
            .relay
            .subscribe_to_lesson_interactions("lesson_1", callback)
            .await?;
        assert_eq!(h.relay.active_count(), 1);

        h.service
            .record_interaction(&InteractionEvent::new("lesson_1", "u1", "video_play"))
            .await?;
        next_event(&mut rx).await;

        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!handle.is_active());
        assert_eq!(h.relay.active_count(), 0);

        h.service
            .record_interaction(&InteractionEvent::new("lesson_1", "u1", "video_pause"))
            .await?;
        assert_silent(&mut rx).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_callback_can_unsubscribe_its_own_feed() -> Result<()> {
        let h = harness();
        let slot: Arc<OnceLock<SubscriptionHandle>> = Arc::new(OnceLock::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callback = {
            let slot = slot.clone();
            move |event: RelayedEvent| {
                let _ = tx.send(event);
                if let Some(handle) = slot.get() {
                    handle.unsubscribe();
                }
            }
        };
        let handle = h
            .relay
            .subscribe_to_lesson_interactions("lesson_1", callback)
            .await?;
        let _ = slot.set(handle);

        h.service
            .record_interaction(&InteractionEvent::new("lesson_1", "u1", "video_play"))
            .await?;
        h.service
            .record_interaction(&InteractionEvent::new("lesson_1", "u1", "video_pause"))
            .await?;

        let first = next_event(&mut rx).await;
        assert_eq!(first.record.unwrap()["eventType"], "video_play");
        assert_silent(&mut rx).await;
        assert_eq!(h.relay.active_count(), 0);
        assert!(!slot.get().unwrap().is_active());
        Ok(())
    }

    #[tokio::test]
    async fn test_close_all_releases_every_feed() -> Result<()> {
        let h = harness();
        let (first_cb, _first_rx) = collector();
        let (second_cb, _second_rx) = collector();
        let first = h.relay.subscribe_to_maintenance_mode(first_cb).await?;
        let _second = h.relay.subscribe_to_live_events("room_1", second_cb).await?;
        assert_eq!(h.relay.active_count(), 2);

        h.relay.close_all();

        assert_eq!(h.relay.active_count(), 0);
        assert!(!first.is_active());
        first.unsubscribe();
        Ok(())
    }

    #[tokio::test]
    async fn test_maintenance_feed_names_the_admin() -> Result<()> {
        let h = harness();
        h.service
            .save_user(&User::new("admin_1", "Dana", "dana@x.com", UserRole::Admin))
            .await?;
        let (callback, mut rx) = collector();
        let _handle = h.relay.subscribe_to_maintenance_mode(callback).await?;

        let mode = MaintenanceMode {
            enabled: true,
            message: None,
        };
        h.service.set_maintenance_mode(&mode, Some("admin_1")).await?;

        let record = next_event(&mut rx).await.record.unwrap();
        assert_eq!(record["value"]["enabled"], true);
        assert_eq!(record["updatedByName"], "Dana");
        Ok(())
    }

    #[tokio::test]
    async fn test_user_feed_reads_primary_and_translates_naming() -> Result<()> {
        let h = harness();
        h.service
            .save_curriculum(&Curriculum::new("c1", "Fractions"))
            .await?;
        let (callback, mut rx) = collector();
        let _handle = h.relay.subscribe_to_user("u1", callback).await?;

        let mut user = User::new("u1", "Sara", "sara@x.com", UserRole::Student);
        user.curriculum_id = Some("c1".to_string());
        h.service.save_user(&user).await?;

        let record = next_event(&mut rx).await.record.unwrap();
        assert_eq!(record["curriculumId"], "c1");
        assert!(record.get("curriculum_id").is_none());
        assert_eq!(record["curriculumTitle"], "Fractions");
        Ok(())
    }

    #[tokio::test]
    async fn test_live_event_feed() -> Result<()> {
        let h = harness();
        let (callback, mut rx) = collector();
        let _handle = h.relay.subscribe_to_live_events("room_1", callback).await?;

        h.service
            .publish_live_event(&LiveEvent::new("room_1", "u9", "hand_raised"))
            .await?;
        h.service
            .publish_live_event(&LiveEvent::new("room_2", "u9", "hand_raised"))
            .await?;

        let event = next_event(&mut rx).await;
        assert_eq!(event.kind, EntityKind::LiveEvent);
        assert_eq!(event.record.unwrap()["topic"], "room_1");
        assert_silent(&mut rx).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_custom_feed_with_enrichment() -> Result<()> {
        let h = harness();
        h.service
            .save_user(&User::new("t1", "Mr. Lee", "lee@x.com", UserRole::Teacher))
            .await?;
        let spec = FeedSpec::new(
            EntityKind::Curriculum,
            "grade_5",
            FeedSource::Secondary,
            RecordFilter::by("grade", "5"),
        )
        .enrich(Enrichment::new(
            "authorId",
            EntityKind::User,
            "name",
            "authorName",
            "Unknown author",
        ));
        let (callback, mut rx) = collector();
        let _handle = h.relay.subscribe(spec, callback).await?;

        let mut curriculum = Curriculum::new("c1", "Fractions");
        curriculum.grade = Some("5".to_string());
        curriculum.author_id = Some("t1".to_string());
        h.service.save_curriculum(&curriculum).await?;

        let record = next_event(&mut rx).await.record.unwrap();
        assert_eq!(record["authorName"], "Mr. Lee");
        Ok(())
    }

    #[tokio::test]
    async fn test_subscribe_fails_when_store_is_down() -> Result<()> {
        let h = harness();
        h.mirror.set_offline(true);
        let (callback, _rx) = collector();

        let err = h
            .relay
            .subscribe_to_lesson_interactions("lesson_1", callback)
            .await
            .unwrap_err();

        assert!(matches!(err, DbServiceError::Subscription { .. }));
        assert_eq!(h.relay.active_count(), 0);
        Ok(())
    }
}

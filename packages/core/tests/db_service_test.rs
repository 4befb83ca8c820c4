//! DbService Orchestration Tests
//!
//! Exercises the write-through / best-effort mirror / read-fallback contract
//! over the in-memory backends, using their failure injection to take either
//! store offline or make it slow.

#[cfg(test)]
mod db_service_tests {
    use anyhow::Result;
    use learnspace_core::config::SyncConfig;
    use learnspace_core::db::{MemoryDocumentStore, MemoryPrimaryStore, PrimaryStore, StoreError};
    use learnspace_core::models::{
        Curriculum, EntityKind, InteractionEvent, Lesson, LiveEvent, MaintenanceMode, Question,
        Quiz, QuizAttempt, Unit, User, UserRole,
    };
    use learnspace_core::services::{
        DbService, DbServiceError, MirrorOutcome, MirrorReconciler, ReadPolicy,
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Harness {
        primary: Arc<MemoryPrimaryStore>,
        mirror: Arc<MemoryDocumentStore>,
        service: DbService,
    }

    fn harness_with(config: SyncConfig) -> Harness {
        let primary = Arc::new(MemoryPrimaryStore::new());
        let mirror = Arc::new(MemoryDocumentStore::new());
        let service = DbService::new(primary.clone(), mirror.clone(), config);
        Harness {
            primary,
            mirror,
            service,
        }
    }

    fn harness() -> Harness {
        harness_with(SyncConfig {
            operation_timeout_ms: 200,
            ..SyncConfig::default()
        })
    }

    fn sara() -> User {
        let mut user = User::new("u1", "Sara", "sara@x.com", UserRole::Student);
        user.curriculum_id = Some("c1".to_string());
        user
    }

    #[tokio::test]
    async fn test_save_writes_underscore_primary_and_camel_case_mirror() -> Result<()> {
        let h = harness();
        h.service.save_user(&sara()).await?;

        let stored = h.primary.fetch(EntityKind::User, "u1").await?.unwrap();
        assert_eq!(stored["curriculum_id"], "c1");
        assert!(stored.get("curriculumId").is_none());

        let mirrored = h.mirror.peek(EntityKind::User, "u1").await.unwrap();
        assert_eq!(mirrored["curriculumId"], "c1");
        assert!(mirrored.get("curriculum_id").is_none());

        assert_eq!(h.service.get_user("u1").await?, Some(sara()));
        Ok(())
    }

    #[tokio::test]
    async fn test_primary_write_failure_is_fatal_and_skips_mirror() -> Result<()> {
        let h = harness();
        h.primary.set_offline(true);

        let err = h.service.save_user(&sara()).await.unwrap_err();

        assert!(matches!(err, DbServiceError::PrimaryWrite { .. }));
        assert_eq!(h.mirror.write_count(), 0);
        assert!(h.mirror.peek(EntityKind::User, "u1").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_mirror_failure_does_not_fail_save() -> Result<()> {
        let h = harness();
        h.mirror.set_offline(true);

        let outcome = h.service.save_entity(&sara()).await?;

        assert_eq!(outcome.id, "u1");
        assert!(matches!(outcome.mirror, MirrorOutcome::Failed(_)));
        assert_eq!(h.primary.len(EntityKind::User).await, 1);
        assert!(h.service.drift_ledger().contains(EntityKind::User, "u1").await);
        Ok(())
    }

    #[tokio::test]
    async fn test_reconcile_repairs_recorded_drift() -> Result<()> {
        let h = harness();
        h.mirror.set_offline(true);
        h.service.save_user(&sara()).await?;
        h.service
            .save_curriculum(&Curriculum::new("c1", "Fractions"))
            .await?;

        // still offline: nothing repaired, nothing lost
        let report = h.service.reconcile_once().await;
        assert_eq!(report.still_drifted, 2);

        h.mirror.set_offline(false);
        let report = h.service.reconcile_once().await;
        assert_eq!(report.repaired, 2);
        assert_eq!(report.still_drifted, 0);
        assert!(h.service.drift_ledger().is_empty().await);
        assert_eq!(
            h.mirror.peek(EntityKind::User, "u1").await.unwrap()["curriculumId"],
            "c1"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_reconcile_removes_mirror_copy_of_deleted_record() -> Result<()> {
        let h = harness();
        h.service.save_user(&sara()).await?;

        h.mirror.set_offline(true);
        assert!(h.service.delete_user("u1").await?);
        h.mirror.set_offline(false);
        assert!(h.mirror.peek(EntityKind::User, "u1").await.is_some());

        let report = h.service.reconcile_once().await;
        assert_eq!(report.removed, 1);
        assert!(h.mirror.peek(EntityKind::User, "u1").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_background_reconciler_drains_ledger_on_wake() -> Result<()> {
        let primary = Arc::new(MemoryPrimaryStore::new());
        let mirror = Arc::new(MemoryDocumentStore::new());
        let service = DbService::new(primary.clone(), mirror.clone(), SyncConfig::default());
        let reconciler = MirrorReconciler::start(service.reconciliation(), Duration::from_secs(3600));
        let service = service.with_reconcile_waker(reconciler.waker());

        mirror.set_offline(true);
        service.save_user(&sara()).await?;
        mirror.set_offline(false);
        reconciler.wake();

        timeout(Duration::from_secs(2), async {
            while !service.drift_ledger().is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("reconciler should drain the ledger");

        assert!(mirror.peek(EntityKind::User, "u1").await.is_some());
        reconciler.shutdown();
        Ok(())
    }

    #[tokio::test]
    async fn test_read_falls_back_to_mirror_when_primary_offline() -> Result<()> {
        let h = harness();
        h.service.save_user(&sara()).await?;
        h.primary.set_offline(true);

        assert_eq!(h.service.get_user("u1").await?, Some(sara()));
        let students = h.service.get_users_by_role(UserRole::Student).await?;
        assert_eq!(students.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_read_returns_empty_when_both_stores_fail() -> Result<()> {
        let h = harness();
        h.service.save_user(&sara()).await?;
        h.primary.set_offline(true);
        h.mirror.set_offline(true);

        assert_eq!(h.service.get_user("u1").await?, None);
        assert!(h.service.get_users_by_role(UserRole::Student).await?.is_empty());
        assert_eq!(h.service.get_maintenance_mode().await?, MaintenanceMode::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_not_found_is_not_a_fallback() -> Result<()> {
        let h = harness();
        // present only in the mirror: a primary miss must win
        h.service.save_user(&sara()).await?;
        h.primary.delete(EntityKind::User, "u1").await?;

        assert_eq!(h.service.get_user("u1").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_strict_reads_surface_primary_failure() -> Result<()> {
        let h = harness();
        h.service.save_user(&sara()).await?;
        h.primary.set_offline(true);

        let err = h.service.find_user_by_email("sara@x.com").await.unwrap_err();
        assert!(matches!(err, DbServiceError::PrimaryRead { .. }));

        let err = h
            .service
            .get_record(EntityKind::User, "u1", ReadPolicy::Strict)
            .await
            .unwrap_err();
        assert!(matches!(err, DbServiceError::PrimaryRead { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_new_user_registration() -> Result<()> {
        let h = harness();
        h.service.create_user(&sara()).await?;

        let found = h.service.find_user_by_email("sara@x.com").await?;
        assert_eq!(found.map(|u| u.uid), Some("u1".to_string()));
        assert!(h.mirror.peek(EntityKind::User, "u1").await.is_some());

        let err = h.service.create_user(&sara()).await.unwrap_err();
        assert!(matches!(err, DbServiceError::Conflict { .. }));

        // the uniqueness check cannot be answered from the mirror
        h.primary.set_offline(true);
        let other = User::new("u2", "Omar", "omar@x.com", UserRole::Teacher);
        assert!(h.service.create_user(&other).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_quiz_with_questions_has_no_duplicates() -> Result<()> {
        let h = harness();
        h.service.save_question(&Question::new("q1", "2 + 2?")).await?;
        h.service.save_question(&Question::new("q2", "3 x 3?")).await?;

        let mut quiz = Quiz::new("quiz_1", "Warmup");
        quiz.question_ids = vec!["q2".into(), "q1".into(), "q2".into()];
        h.service.save_quiz(&quiz).await?;

        let stored = h.service.get_quiz("quiz_1").await?.unwrap();
        assert_eq!(stored.question_ids, vec!["q2", "q1"]);

        let joined = h.service.get_quiz_with_questions("quiz_1").await?.unwrap();
        let ids: Vec<_> = joined.questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, stored.question_ids);

        let mirrored = h.mirror.peek(EntityKind::Quiz, "quiz_1").await.unwrap();
        assert_eq!(mirrored["questionIds"], json!(["q2", "q1"]));
        Ok(())
    }

    #[tokio::test]
    async fn test_quiz_with_unknown_question_is_rejected() -> Result<()> {
        let h = harness();
        let mut quiz = Quiz::new("quiz_1", "Warmup");
        quiz.question_ids = vec!["missing".into()];

        let err = h.service.save_quiz(&quiz).await.unwrap_err();
        assert!(matches!(
            err.store_error(),
            Some(StoreError::Constraint { .. })
        ));
        assert_eq!(h.mirror.write_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_nested_entity_requires_existing_parent() -> Result<()> {
        let h = harness();
        let err = h
            .service
            .save_unit(&Unit::new("unit_1", "nope", "Intro", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbServiceError::PrimaryWrite { .. }));
        Ok(())
    }

    async fn seed_curriculum(service: &DbService) -> Result<()> {
        service
            .save_curriculum(&Curriculum::new("c1", "Fractions"))
            .await?;
        service.save_unit(&Unit::new("unit_b", "c1", "Adding", 2)).await?;
        service.save_unit(&Unit::new("unit_a", "c1", "Basics", 1)).await?;
        service
            .save_lesson(&Lesson::new("l2", "unit_a", "Halves", 2))
            .await?;
        service
            .save_lesson(&Lesson::new("l1", "unit_a", "Wholes", 1))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_curriculum_with_units_from_either_store() -> Result<()> {
        let h = harness();
        seed_curriculum(&h.service).await?;

        let from_primary = h.service.get_curriculum_with_units("c1").await?.unwrap();
        let units: Vec<_> = from_primary.units.iter().map(|u| u.unit.id.as_str()).collect();
        assert_eq!(units, vec!["unit_a", "unit_b"]);
        assert_eq!(from_primary.units[0].lesson_ids, vec!["l1", "l2"]);
        assert!(from_primary.units[1].lesson_ids.is_empty());

        h.primary.set_offline(true);
        let from_mirror = h.service.get_curriculum_with_units("c1").await?.unwrap();
        assert_eq!(from_mirror, from_primary);
        Ok(())
    }

    #[tokio::test]
    async fn test_children_listed_in_position_order() -> Result<()> {
        let h = harness();
        seed_curriculum(&h.service).await?;

        let units = h.service.get_units_by_curriculum("c1").await?;
        assert_eq!(units[0].id, "unit_a");
        let lessons = h.service.get_lessons_by_unit("unit_a").await?;
        let titles: Vec<_> = lessons.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, vec!["Wholes", "Halves"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_cascades_into_mirror() -> Result<()> {
        let h = harness();
        seed_curriculum(&h.service).await?;

        assert!(h.service.delete_curriculum("c1").await?);

        assert_eq!(h.primary.len(EntityKind::Lesson).await, 0);
        assert!(h.mirror.peek(EntityKind::Unit, "unit_a").await.is_none());
        assert!(h.mirror.peek(EntityKind::Lesson, "l1").await.is_none());
        assert!(h.service.get_lesson("l1").await?.is_none());
        assert!(!h.service.delete_curriculum("c1").await?);
        Ok(())
    }

    async fn seed_quiz(service: &DbService) -> Result<()> {
        service.save_question(&Question::new("q1", "2 + 2?")).await?;
        service.save_question(&Question::new("q2", "3 x 3?")).await?;
        let mut quiz = Quiz::new("quiz_1", "Warmup");
        quiz.question_ids = vec!["q1".into(), "q2".into()];
        service.save_quiz(&quiz).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_question_delete_updates_mirrored_quiz() -> Result<()> {
        let h = harness();
        seed_quiz(&h.service).await?;

        assert!(h.service.delete_question("q1").await?);

        let mirrored = h.mirror.peek(EntityKind::Quiz, "quiz_1").await.unwrap();
        assert_eq!(mirrored["questionIds"], json!(["q2"]));
        assert!(h.service.drift_ledger().is_empty().await);

        let from_primary = h.service.get_quiz("quiz_1").await?.unwrap();
        h.primary.set_offline(true);
        let from_mirror = h.service.get_quiz("quiz_1").await?.unwrap();
        assert_eq!(from_mirror.question_ids, vec!["q2".to_string()]);
        assert_eq!(from_mirror.question_ids, from_primary.question_ids);
        Ok(())
    }

    #[tokio::test]
    async fn test_question_delete_with_mirror_down_records_quiz_drift() -> Result<()> {
        let h = harness();
        seed_quiz(&h.service).await?;

        h.mirror.set_offline(true);
        assert!(h.service.delete_question("q1").await?);
        assert!(h.service.drift_ledger().contains(EntityKind::Quiz, "quiz_1").await);
        assert!(h.service.drift_ledger().contains(EntityKind::Question, "q1").await);

        h.mirror.set_offline(false);
        let report = h.service.reconcile_once().await;
        assert_eq!(report.still_drifted, 0);

        let mirrored = h.mirror.peek(EntityKind::Quiz, "quiz_1").await.unwrap();
        assert_eq!(mirrored["questionIds"], json!(["q2"]));
        assert!(h.mirror.peek(EntityKind::Question, "q1").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_slow_primary_times_out_and_falls_back() -> Result<()> {
        let h = harness_with(SyncConfig {
            operation_timeout_ms: 50,
            ..SyncConfig::default()
        });
        h.service.save_user(&sara()).await?;
        h.primary.set_latency(Duration::from_millis(500));

        assert_eq!(h.service.get_user("u1").await?, Some(sara()));

        let err = h.service.save_user(&sara()).await.unwrap_err();
        assert!(matches!(err.store_error(), Some(StoreError::Timeout { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_attempts_and_interactions() -> Result<()> {
        let h = harness();
        h.service.save_user(&sara()).await?;
        h.service.save_question(&Question::new("q1", "2 + 2?")).await?;
        let mut quiz = Quiz::new("quiz_1", "Warmup");
        quiz.question_ids = vec!["q1".into()];
        h.service.save_quiz(&quiz).await?;

        let attempt = QuizAttempt::new("quiz_1", "u1", 0.8);
        h.service.save_quiz_attempt(&attempt).await?;
        assert_eq!(h.service.get_attempts_by_user("u1").await?, vec![attempt.clone()]);
        assert_eq!(h.service.get_attempts_by_quiz("quiz_1").await?.len(), 1);

        let first = InteractionEvent::new("l1", "u1", "video_play");
        let mut second = InteractionEvent::new("l1", "u1", "video_pause")
            .with_payload(json!({"at": 42}));
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        h.service.record_interaction(&second).await?;
        h.service.record_interaction(&first).await?;

        let events = h.service.get_interactions_by_lesson("l1").await?;
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["video_play", "video_pause"]);
        assert_eq!(events[1].payload["at"], 42);
        Ok(())
    }

    #[tokio::test]
    async fn test_maintenance_mode_round_trip() -> Result<()> {
        let h = harness();
        assert!(!h.service.get_maintenance_mode().await?.enabled);

        let mode = MaintenanceMode {
            enabled: true,
            message: Some("Back at noon".to_string()),
        };
        h.service.set_maintenance_mode(&mode, Some("admin_1")).await?;

        assert_eq!(h.service.get_maintenance_mode().await?, mode);
        let setting = h.mirror.peek(EntityKind::AppSetting, "maintenance").await.unwrap();
        assert_eq!(setting["updatedBy"], "admin_1");
        Ok(())
    }

    #[tokio::test]
    async fn test_live_events_live_only_in_mirror() -> Result<()> {
        let h = harness();
        let event = LiveEvent::new("lesson_1", "u1", "hand_raised");

        let outcome = h.service.save_entity(&event).await?;
        assert_eq!(outcome.mirror, MirrorOutcome::Skipped);
        assert_eq!(h.primary.len(EntityKind::LiveEvent).await, 0);
        assert_eq!(h.service.get_live_events("lesson_1").await?, vec![event.clone()]);

        h.mirror.set_offline(true);
        let err = h
            .service
            .publish_live_event(&LiveEvent::new("lesson_1", "u1", "typing"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbServiceError::SecondaryWrite { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_resync_rebuilds_mirror_and_drops_orphans() -> Result<()> {
        let h = harness();
        seed_curriculum(&h.service).await?;
        h.service.save_user(&sara()).await?;
        h.primary.delete(EntityKind::User, "u1").await?;
        h.mirror.set_offline(true);
        h.service
            .save_curriculum(&Curriculum::new("c2", "Decimals"))
            .await?;
        h.mirror.set_offline(false);

        let report = h.service.resync_all().await?;

        assert_eq!(report.mirrored, 6);
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(report.failed, 0);
        assert!(h.mirror.peek(EntityKind::Curriculum, "c2").await.is_some());
        assert!(h.mirror.peek(EntityKind::User, "u1").await.is_none());
        assert!(h.service.drift_ledger().is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_health_check_reports_each_store() -> Result<()> {
        let h = harness();
        assert!(h.service.health_check().await.is_healthy());

        h.mirror.set_offline(true);
        let health = h.service.health_check().await;
        assert!(health.primary.is_ok());
        assert!(health.secondary.is_err());
        Ok(())
    }
}

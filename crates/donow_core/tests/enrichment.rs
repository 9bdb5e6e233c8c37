use async_trait::async_trait;
use donow_core::db::open_db_in_memory;
use donow_core::{
    Enricher, Enrichment, EnrichmentError, EnrichmentProvider, EnrichmentRequest,
    EnrichmentSource, ItemService, ItemServiceError, ItemType, Priority, SqliteItemRepository,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const USER: &str = "user-1";

struct SlowProvider {
    delay: Duration,
}

#[async_trait]
impl EnrichmentProvider for SlowProvider {
    async fn enhance(&self, request: &EnrichmentRequest) -> Result<Enrichment, EnrichmentError> {
        tokio::time::sleep(self.delay).await;
        Ok(Enrichment {
            title: Some(format!("late: {}", request.text)),
            description: None,
            suggested_date_time: None,
            suggested_priority: Some(Priority::Low),
            suggested_category: None,
            suggested_tags: Vec::new(),
            source: EnrichmentSource::Provider,
        })
    }
}

struct FailingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl EnrichmentProvider for FailingProvider {
    async fn enhance(&self, _request: &EnrichmentRequest) -> Result<Enrichment, EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EnrichmentError::Status(503))
    }
}

struct FixedProvider;

#[async_trait]
impl EnrichmentProvider for FixedProvider {
    async fn enhance(&self, request: &EnrichmentRequest) -> Result<Enrichment, EnrichmentError> {
        assert!(request.generate_title);
        Ok(Enrichment {
            title: Some("Call mom".to_string()),
            description: Some("Phone call with mom".to_string()),
            suggested_date_time: Some(1_893_456_000_000),
            suggested_priority: Some(Priority::High),
            suggested_category: Some("life".to_string()),
            suggested_tags: vec!["family".to_string()],
            source: EnrichmentSource::Provider,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_enrichment_falls_back_and_creation_succeeds() {
    let conn = open_db_in_memory().unwrap();
    let service = ItemService::new(SqliteItemRepository::try_new(&conn).unwrap());
    let enricher = Enricher::new(
        Arc::new(SlowProvider {
            delay: Duration::from_secs(60),
        }),
        Duration::from_secs(10),
    );

    let item = service
        .create_from_text(USER, "call mom tomorrow", ItemType::Task, &enricher)
        .await
        .unwrap();

    assert_eq!(item.title, "call mom tomorrow");
    assert_eq!(item.description.as_deref(), Some("call mom tomorrow"));
    assert_eq!(item.priority, Some(Priority::Medium));
    assert_eq!(item.category.as_deref(), Some("General"));
    assert_eq!(item.original_input.as_deref(), Some("call mom tomorrow"));
    assert_eq!(service.get_status_history(item.id).unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn provider_within_budget_is_used() {
    let enricher = Enricher::new(
        Arc::new(SlowProvider {
            delay: Duration::from_secs(2),
        }),
        Duration::from_secs(10),
    );
    let enrichment = enricher.enhance("water plants", ItemType::Task).await;
    assert_eq!(enrichment.source, EnrichmentSource::Provider);
    assert_eq!(enrichment.title.as_deref(), Some("late: water plants"));
}

#[tokio::test]
async fn failing_provider_falls_back() {
    let provider = Arc::new(FailingProvider {
        calls: AtomicUsize::new(0),
    });
    let enricher = Enricher::new(provider.clone(), Duration::from_secs(1));

    let enrichment = enricher.enhance("pay rent", ItemType::Task).await;
    assert_eq!(enrichment.source, EnrichmentSource::Fallback);
    assert_eq!(enrichment.title.as_deref(), Some("pay rent"));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn long_input_title_is_truncated_to_one_hundred_chars() {
    let conn = open_db_in_memory().unwrap();
    let service = ItemService::new(SqliteItemRepository::try_new(&conn).unwrap());
    let text = "word ".repeat(60);

    let item = service
        .create_from_text(USER, &text, ItemType::Note, &Enricher::fallback_only())
        .await
        .unwrap();
    assert!(item.title.chars().count() <= 100);
    assert!(text.starts_with(&item.title));
}

#[tokio::test]
async fn suggested_date_maps_by_item_type() {
    let conn = open_db_in_memory().unwrap();
    let service = ItemService::new(SqliteItemRepository::try_new(&conn).unwrap());
    let enricher = Enricher::new(Arc::new(FixedProvider), Duration::from_secs(5));

    let task = service
        .create_from_text(USER, "call mom tomorrow", ItemType::Task, &enricher)
        .await
        .unwrap();
    assert_eq!(task.title, "Call mom");
    assert_eq!(task.due_date, Some(1_893_456_000_000));
    assert_eq!(task.event_time, None);
    assert_eq!(task.priority, Some(Priority::High));
    assert_eq!(task.tags, vec!["family"]);

    let event = service
        .create_from_text(USER, "call mom tomorrow", ItemType::Event, &enricher)
        .await
        .unwrap();
    assert_eq!(event.event_time, Some(1_893_456_000_000));
    assert_eq!(event.due_date, None);
    assert_eq!(event.category.as_deref(), Some("life"));
}

#[tokio::test]
async fn blank_text_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let service = ItemService::new(SqliteItemRepository::try_new(&conn).unwrap());
    let err = service
        .create_from_text(USER, "  \n ", ItemType::Task, &Enricher::fallback_only())
        .await
        .unwrap_err();
    assert!(matches!(err, ItemServiceError::Validation(_)));
}

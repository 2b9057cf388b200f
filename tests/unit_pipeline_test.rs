use flywall::core::learning::{LearningEngine, LearningPipeline, RuleState};
use flywall::core::model::{LearningConfig, LearningMode};
use flywall::core::verdict::{BusVerdict, InlineQueue, LogGroupSource, PacketInfo};
use std::sync::Arc;
use std::time::Duration;

fn packet(dst_port: u16) -> PacketInfo {
    PacketInfo {
        src_mac: "aa:bb:cc:dd:ee:ff".to_string(),
        src_ip: "10.0.0.2".parse().unwrap(),
        dst_ip: "8.8.8.8".parse().unwrap(),
        dst_port,
        protocol: "tcp".to_string(),
        interface: "wan0".to_string(),
        policy_tag: None,
    }
}

fn pipeline_with(
    settings: LearningConfig,
    queue: Arc<InlineQueue>,
) -> (Arc<LearningPipeline>, Arc<LogGroupSource>, Arc<LogGroupSource>) {
    let engine = Arc::new(LearningEngine::new(settings));
    let base = Arc::new(LogGroupSource::new(0));
    let learn = Arc::new(LogGroupSource::new(100));
    let pipeline = Arc::new(LearningPipeline::new(
        engine,
        base.clone(),
        learn.clone(),
        queue,
    ));
    (pipeline, base, learn)
}

#[tokio::test]
async fn test_async_mode_ingests_from_both_log_groups() {
    let (pipeline, base, learn) = pipeline_with(
        LearningConfig::default(),
        Arc::new(InlineQueue::new(0)),
    );
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    pipeline.start(&shutdown_tx).await.unwrap();
    assert_eq!(pipeline.effective_mode(), Some(LearningMode::Async));

    base.inject(packet(80));
    learn.inject(packet(443));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(pipeline.engine().list_rules().len(), 2);
    pipeline.stop().await;
}

#[tokio::test]
async fn test_inline_mode_resolves_verdicts_through_queue() {
    let queue = Arc::new(InlineQueue::new(1));
    let (pipeline, _base, _learn) = pipeline_with(
        LearningConfig {
            mode: LearningMode::Inline,
            queue_num: 1,
            ..LearningConfig::default()
        },
        queue.clone(),
    );
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    pipeline.start(&shutdown_tx).await.unwrap();
    assert_eq!(pipeline.effective_mode(), Some(LearningMode::Inline));

    // Unknown tuple: inspected, which accepts without a mark.
    assert_eq!(queue.submit(packet(22)), BusVerdict::Accept);

    // Deny the learned rule; the next packet drops.
    let engine = pipeline.engine();
    let id = engine.list_rules()[0].id;
    engine
        .transition_rule(id, RuleState::Denied, Some("ops"))
        .unwrap();
    assert_eq!(queue.submit(packet(22)), BusVerdict::Drop);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_inline_bind_refusal_falls_back_to_async() {
    let (pipeline, base, _learn) = pipeline_with(
        LearningConfig {
            mode: LearningMode::Inline,
            ..LearningConfig::default()
        },
        Arc::new(InlineQueue::refusing(0)),
    );
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    pipeline.start(&shutdown_tx).await.unwrap();
    assert_eq!(pipeline.effective_mode(), Some(LearningMode::Async));

    // The fallback path still learns.
    base.inject(packet(8080));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pipeline.engine().list_rules().len(), 1);
    pipeline.stop().await;
}

#[tokio::test]
async fn test_disabled_learning_starts_nothing() {
    let (pipeline, base, _learn) = pipeline_with(
        LearningConfig {
            enabled: false,
            ..LearningConfig::default()
        },
        Arc::new(InlineQueue::new(0)),
    );
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    pipeline.start(&shutdown_tx).await.unwrap();
    assert_eq!(pipeline.effective_mode(), None);

    base.inject(packet(80));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(pipeline.engine().list_rules().is_empty());
}

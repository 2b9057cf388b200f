use flywall::core::errors::FlywallError;
use flywall::core::verdict::{
    BusVerdict, EngineVerdict, InlineQueue, LogGroupSource, PacketInfo, PacketSource,
    VerdictQueue, map_verdict,
};
use std::sync::Arc;

fn packet() -> PacketInfo {
    PacketInfo {
        src_mac: "aa:bb:cc:dd:ee:ff".to_string(),
        src_ip: "192.168.1.10".parse().unwrap(),
        dst_ip: "1.1.1.1".parse().unwrap(),
        dst_port: 53,
        protocol: "udp".to_string(),
        interface: "eth1".to_string(),
        policy_tag: Some("lan-out".to_string()),
    }
}

const OFFLOAD_MARK: u32 = 0x0001_0000;

#[test]
fn test_engine_to_bus_verdict_mapping() {
    let decisions = [
        EngineVerdict::Allow,
        EngineVerdict::Drop,
        EngineVerdict::Offload,
        EngineVerdict::Inspect,
    ];
    let verdicts: Vec<BusVerdict> = decisions
        .into_iter()
        .map(|d| map_verdict(Ok(d), OFFLOAD_MARK))
        .collect();
    assert_eq!(
        verdicts,
        vec![
            BusVerdict::Accept,
            BusVerdict::Drop,
            BusVerdict::AcceptWithMark(OFFLOAD_MARK),
            BusVerdict::Accept,
        ]
    );
}

#[test]
fn test_engine_error_fails_open() {
    let verdict = map_verdict(
        Err(FlywallError::Internal("engine exploded".into())),
        OFFLOAD_MARK,
    );
    assert_eq!(verdict, BusVerdict::Accept);
}

#[tokio::test]
async fn test_source_start_stop_are_idempotent() {
    let source = LogGroupSource::new(0);
    source.start().await.unwrap();
    source.start().await.unwrap();
    assert!(source.is_running());
    source.stop().await;
    source.stop().await;
    assert!(!source.is_running());
}

#[tokio::test]
async fn test_source_delivers_to_subscriber() {
    let source = LogGroupSource::new(0);
    source.start().await.unwrap();
    let mut rx = source.subscribe();

    source.inject(packet());
    let event = rx.recv().await.unwrap();
    assert_eq!(event.dst_port, 53);
    assert_eq!(source.dropped(), 0);
}

#[tokio::test]
async fn test_stalled_subscriber_causes_drops_not_deadlock() {
    let source = LogGroupSource::new(0);
    source.start().await.unwrap();
    // Subscribe but never drain.
    let _rx = source.subscribe();

    // Push well past the channel capacity; inject never blocks.
    for _ in 0..2000 {
        source.inject(packet());
    }
    assert!(source.dropped() > 0);
}

#[tokio::test]
async fn test_injects_before_start_are_ignored() {
    let source = LogGroupSource::new(0);
    let mut rx = source.subscribe();
    source.inject(packet());
    source.start().await.unwrap();
    source.stop().await;
    // Channel was cleared by stop; nothing was ever delivered.
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_inline_queue_emits_exactly_one_verdict_per_packet() {
    let queue = InlineQueue::new(0);
    queue.set_verdict_fn(Arc::new(|_pkt| BusVerdict::Drop));
    queue.start().await.unwrap();

    for _ in 0..3 {
        assert_eq!(queue.submit(packet()), BusVerdict::Drop);
    }
    assert_eq!(queue.processed(), 3);
}

#[tokio::test]
async fn test_inline_queue_without_verdict_fn_fails_open() {
    let queue = InlineQueue::new(0);
    assert_eq!(queue.submit(packet()), BusVerdict::Accept);
}

#[tokio::test]
async fn test_refusing_queue_reports_unavailable() {
    let queue = InlineQueue::refusing(7);
    let result = queue.start().await;
    assert!(matches!(result, Err(FlywallError::Unavailable(_))));
    assert!(!queue.is_running());
}

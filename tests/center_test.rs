//! 基于回环推送通道的端到端会话测试

use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use venue_notify::notification::{Alert, AlertPresenter, PresentResult};
use venue_notify::{
    AlertDispatcher, ConnectionState, LoopbackChannel, MemorySlot, NotificationCenter, NotificationKind,
    OutboundCommand, StoreOptions,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct CollectingPresenter {
    shown: Mutex<Vec<String>>,
}

impl CollectingPresenter {
    fn ids(&self) -> Vec<String> {
        self.shown.lock().unwrap().clone()
    }
}

impl AlertPresenter for CollectingPresenter {
    fn name(&self) -> &str {
        "collecting"
    }

    fn present(&self, alert: &Alert) -> Result<PresentResult> {
        self.shown.lock().unwrap().push(alert.id.clone());
        Ok(PresentResult::Shown)
    }

    fn dismiss_all(&self) -> Result<()> {
        self.shown.lock().unwrap().clear();
        Ok(())
    }
}

async fn start_center(
    channel: Arc<LoopbackChannel>,
) -> (NotificationCenter, Arc<MemorySlot>, Arc<CollectingPresenter>) {
    let slot = Arc::new(MemorySlot::new());
    let presenter = Arc::new(CollectingPresenter::default());
    let alerts = Arc::new(AlertDispatcher::new().with_presenter(presenter.clone()));
    let center = NotificationCenter::start(slot.clone(), alerts, channel, StoreOptions::default())
        .await
        .unwrap();
    (center, slot, presenter)
}

async fn wait_for_unread(center: &NotificationCenter, expected: usize) {
    let mut unread = center.unread_count();
    let reached = tokio::time::timeout(WAIT, unread.wait_for(|n| *n == expected))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    assert!(reached, "unread count never reached {}", expected);
}

#[tokio::test]
async fn test_test_message_skipped_while_disconnected() {
    let channel = Arc::new(LoopbackChannel::new(16));
    let (center, _, _) = start_center(channel.clone()).await;

    assert_eq!(*center.connection_state().borrow(), ConnectionState::Disconnected);
    assert!(!center.send_test_message("qa"));
    assert!(channel.sent().is_empty());
    center.shutdown().await;
}

#[tokio::test]
async fn test_connected_test_message_round_trips_into_history() {
    let channel = Arc::new(LoopbackChannel::new(16));
    let (center, _, presenter) = start_center(channel.clone()).await;

    channel.set_state(ConnectionState::Connected);
    let mut connection = center.connection_state();
    tokio::time::timeout(WAIT, connection.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();

    assert!(center.send_test_message("qa"));
    assert_eq!(channel.sent(), vec![OutboundCommand::SendTest("qa".to_string())]);
    wait_for_unread(&center, 1).await;

    let history = center.notifications();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, NotificationKind::TestNotification);
    assert_eq!(presenter.ids(), vec![history[0].id.clone()]);
    center.shutdown().await;
}

#[tokio::test]
async fn test_control_frame_does_not_touch_history() {
    let channel = Arc::new(LoopbackChannel::new(16));
    let (center, slot, _) = start_center(channel.clone()).await;
    let before = center.history().borrow().revision;

    channel.inject(r#"{"type":"ping"}"#);
    channel.inject(r#"{"type":"new_booking","payload":{"bookingId":"b-1","timestamp":1700000000}}"#);
    wait_for_unread(&center, 1).await;

    // only the booking bumped the revision
    assert_eq!(center.history().borrow().revision, before + 1);
    center.shutdown().await;
    assert!(slot.value().unwrap().contains("b-1"));
}

#[tokio::test]
async fn test_redelivered_booking_is_stored_once() {
    let channel = Arc::new(LoopbackChannel::new(16));
    let (center, _, presenter) = start_center(channel.clone()).await;
    let booking = r#"{"type":"new_booking","payload":{"bookingId":"b-9","timestamp":1700000000}}"#;
    let status = r#"{"type":"booking_status_update","payload":{"bookingId":"b-9","status":"confirmed","timestamp":1700000100}}"#;

    channel.inject(booking);
    channel.inject(status);
    channel.inject(booking);
    wait_for_unread(&center, 2).await;
    center.store().flush().await.unwrap();

    assert_eq!(center.notifications().len(), 2);
    assert_eq!(presenter.ids().len(), 2);
    center.shutdown().await;
}

#[tokio::test]
async fn test_user_commands_update_projections() {
    let channel = Arc::new(LoopbackChannel::new(16));
    let (center, slot, presenter) = start_center(channel.clone()).await;

    for i in 0..3 {
        channel.inject(format!(
            r#"{{"type":"new_booking","payload":{{"bookingId":"b-{}","timestamp":{}}}}}"#,
            i,
            1_700_000_000 + i
        ));
    }
    wait_for_unread(&center, 3).await;

    let newest = center.notifications()[0].id.clone();
    assert!(center.mark_as_read(&newest).await.unwrap());
    assert_eq!(*center.unread_count().borrow(), 2);
    assert_eq!(center.stats().borrow().total, 3);

    assert!(center.remove_notification(&newest).await.unwrap());
    assert!(!center.remove_notification(&newest).await.unwrap());
    assert_eq!(center.mark_all_as_read().await.unwrap(), 2);
    assert_eq!(*center.unread_count().borrow(), 0);

    assert_eq!(center.clear_all().await.unwrap(), 2);
    assert!(center.notifications().is_empty());
    assert!(presenter.ids().is_empty());
    assert!(center.summary().starts_with("notifications: 0 total, 0 unread"));

    center.shutdown().await;
    assert_eq!(slot.value().as_deref(), Some("[]"));
}

#[tokio::test]
async fn test_subscribe_reaches_channel_and_ack_is_ignored() {
    let channel = Arc::new(LoopbackChannel::new(16));
    let (center, _, _) = start_center(channel.clone()).await;

    center.subscribe_to_channel("bookings").unwrap();
    assert_eq!(channel.sent(), vec![OutboundCommand::Subscribe("bookings".to_string())]);

    center.store().flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(center.notifications().is_empty());
    center.shutdown().await;
}

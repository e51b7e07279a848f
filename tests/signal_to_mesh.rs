mod common;

use common::{envelope, item, sync_envelope, wait_for_sends, FakeChat, RecordingMesh, GROUP};
use meshbridge::relay::format::PRIMARY_BLOCK_MESSAGE;
use meshbridge::relay::{
    start_mesh_queue, ChatOutcome, ChatPollSettings, ChatPoller, QueueConfig, RelayMode,
    RelayState,
};
use std::sync::Arc;
use std::time::Duration;

const START_MS: i64 = 1_700_000_000_000;
const NOW_MS: i64 = START_MS + 5_000;

struct Harness {
    poller: Arc<ChatPoller<FakeChat>>,
    state: Arc<RelayState>,
    mesh: Arc<RecordingMesh>,
    chat: Arc<FakeChat>,
}

fn settings(channel: u32) -> ChatPollSettings {
    ChatPollSettings {
        group_id: GROUP.to_string(),
        mesh_channel: channel,
        short_names: false,
        dev_mode: false,
        filter_enabled: false,
        filter_chars: vec!['📢'],
        cutoff_ms: ChatPollSettings::cutoff_for(START_MS, Duration::from_secs(600)),
    }
}

fn harness_with(mode: RelayMode, settings: ChatPollSettings) -> Harness {
    let state = Arc::new(RelayState::new(mode));
    let mesh = Arc::new(RecordingMesh::default());
    let chat = Arc::new(FakeChat::default());
    let (queue, _task) = start_mesh_queue(
        mesh.clone(),
        QueueConfig {
            channel: settings.mesh_channel,
            send_gap: Duration::from_millis(1),
            max_text_bytes: 200,
        },
    );
    let poller = Arc::new(ChatPoller::new(settings, state.clone(), queue, chat.clone()));
    Harness {
        poller,
        state,
        mesh,
        chat,
    }
}

fn harness(mode: RelayMode) -> Harness {
    harness_with(mode, settings(1))
}

#[tokio::test]
async fn relays_group_message_with_sender_label() {
    let h = harness(RelayMode::Mode2);
    let outcome = h
        .poller
        .handle_envelope(&envelope(NOW_MS, Some("Alice Smith"), "hello mesh"))
        .await;
    assert_eq!(outcome, ChatOutcome::Queued);
    let sent = wait_for_sends(&h.mesh, 1, Duration::from_secs(1)).await;
    assert_eq!(sent[0].text, "[Alice Smith] hello mesh");
    assert_eq!(sent[0].channel, 1);
}

#[tokio::test]
async fn stale_messages_never_reach_the_mesh() {
    let h = harness(RelayMode::Mode1);
    let cutoff = START_MS - 600_000;
    for text in ["old news", "!status", "[x] y"] {
        assert_eq!(
            h.poller
                .handle_envelope(&envelope(cutoff - 1, Some("A"), text))
                .await,
            ChatOutcome::Stale
        );
    }
    // Inside the skew window is still fine
    assert_eq!(
        h.poller
            .handle_envelope(&envelope(cutoff, Some("A"), "recent"))
            .await,
        ChatOutcome::Queued
    );
    let sent = wait_for_sends(&h.mesh, 1, Duration::from_secs(1)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(sent.len(), 1);
    assert!(h.chat.sent().is_empty());
}

#[tokio::test]
async fn missing_timestamp_counts_as_stale() {
    let h = harness(RelayMode::Mode1);
    let mut env = envelope(NOW_MS, Some("A"), "hi");
    env.timestamp = None;
    assert_eq!(h.poller.handle_envelope(&env).await, ChatOutcome::Stale);
}

#[tokio::test]
async fn sync_sent_messages_are_accepted() {
    let h = harness(RelayMode::Mode2);
    let outcome = h
        .poller
        .handle_envelope(&sync_envelope(NOW_MS, Some("Bridge Owner"), "from my phone"))
        .await;
    assert_eq!(outcome, ChatOutcome::Queued);
    let sent = wait_for_sends(&h.mesh, 1, Duration::from_secs(1)).await;
    assert_eq!(sent[0].text, "[Bridge Owner] from my phone");
}

#[tokio::test]
async fn other_groups_and_bridge_output_are_dropped() {
    let h = harness(RelayMode::Mode1);
    let mut other = envelope(NOW_MS, Some("A"), "hi");
    other.data_message.as_mut().unwrap().group_info = None;
    assert_eq!(h.poller.handle_envelope(&other).await, ChatOutcome::OtherGroup);
    assert_eq!(
        h.poller
            .handle_envelope(&envelope(NOW_MS, Some("A"), "[ALC] from mesh"))
            .await,
        ChatOutcome::AlreadyRelayed
    );
    assert_eq!(
        h.poller
            .handle_envelope(&envelope(NOW_MS, Some("A"), ""))
            .await,
        ChatOutcome::NoMessage
    );
}

#[tokio::test]
async fn status_is_answered_even_when_disabled() {
    let h = harness(RelayMode::Mode3);
    h.state.disable();
    let outcome = h
        .poller
        .handle_envelope(&envelope(NOW_MS, Some("A"), "  !STATUS "))
        .await;
    assert_eq!(outcome, ChatOutcome::StatusAnswered);
    assert_eq!(
        h.chat.sent(),
        vec!["[BRIDGE] Message relaying is OFF. MODE3 is active."]
    );
}

#[tokio::test]
async fn disabled_and_mode3_drop_silently() {
    let h = harness(RelayMode::Mode3);
    assert_eq!(
        h.poller
            .handle_envelope(&envelope(NOW_MS, Some("A"), "hi"))
            .await,
        ChatOutcome::ModeClosed
    );
    h.state.set_mode(RelayMode::Mode1);
    h.state.disable();
    assert_eq!(
        h.poller
            .handle_envelope(&envelope(NOW_MS, Some("A"), "hi"))
            .await,
        ChatOutcome::RelayDisabled
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.mesh.sent().is_empty());
    assert!(h.chat.sent().is_empty());
}

#[tokio::test]
async fn primary_channel_replies_with_notice() {
    let h = harness_with(RelayMode::Mode1, settings(0));
    let outcome = h
        .poller
        .handle_envelope(&envelope(NOW_MS, Some("A"), "hi"))
        .await;
    assert_eq!(outcome, ChatOutcome::PrimaryChannelBlocked);
    assert_eq!(h.chat.sent(), vec![PRIMARY_BLOCK_MESSAGE]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.mesh.sent().is_empty());
}

#[tokio::test]
async fn admission_filters_use_raw_profile_name() {
    let mut s = settings(1);
    s.dev_mode = true;
    s.short_names = true;
    let h = harness_with(RelayMode::Mode2, s);
    assert_eq!(
        h.poller
            .handle_envelope(&envelope(NOW_MS, Some("Alice"), "hi"))
            .await,
        ChatOutcome::DevFiltered
    );
    // The marker lives in the second word; short names must not hide it from the filter
    assert_eq!(
        h.poller
            .handle_envelope(&envelope(NOW_MS, Some("Alice 🔧"), "hi"))
            .await,
        ChatOutcome::Queued
    );
    let sent = wait_for_sends(&h.mesh, 1, Duration::from_secs(1)).await;
    assert_eq!(sent[0].text, "[Alice] hi");

    let mut s = settings(1);
    s.filter_enabled = true;
    let h = harness_with(RelayMode::Mode2, s);
    assert_eq!(
        h.poller
            .handle_envelope(&envelope(NOW_MS, None, "hi"))
            .await,
        ChatOutcome::SenderFiltered
    );
    assert_eq!(
        h.poller
            .handle_envelope(&envelope(NOW_MS, Some("📢 Net Control"), "hi"))
            .await,
        ChatOutcome::Queued
    );
}

#[tokio::test]
async fn phone_number_used_without_profile_name() {
    let h = harness(RelayMode::Mode2);
    h.poller
        .handle_envelope(&envelope(NOW_MS, None, "hi"))
        .await;
    let sent = wait_for_sends(&h.mesh, 1, Duration::from_secs(1)).await;
    assert_eq!(sent[0].text, "[+15550001111] hi");
}

#[tokio::test]
async fn poll_loop_drains_batches_in_order() {
    let h = harness(RelayMode::Mode2);
    h.chat.push_batch(vec![
        item(envelope(NOW_MS, Some("A"), "one")),
        item(envelope(NOW_MS, Some("B"), "two")),
    ]);
    h.chat
        .push_batch(vec![item(envelope(NOW_MS, Some("C"), "three"))]);
    let poll = tokio::spawn(h.poller.clone().run(Duration::from_millis(5)));
    let sent = wait_for_sends(&h.mesh, 3, Duration::from_secs(2)).await;
    poll.abort();
    let texts: Vec<_> = sent.into_iter().map(|s| s.text).collect();
    assert_eq!(texts, vec!["[A] one", "[B] two", "[C] three"]);
}

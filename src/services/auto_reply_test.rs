use std::time::Duration;

use super::*;
use crate::services::directory;
use crate::state::{ChatPatch, test_helpers};

fn enabled(delay_ms: u64) -> AutoReplyConfig {
    AutoReplyConfig { enabled: true, delay: Duration::from_millis(delay_ms), ..AutoReplyConfig::default() }
}

/// Let spawned tasks run after the paused clock has been advanced.
async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn disabled_replier_never_schedules() {
    let state = test_helpers::test_app_state();
    let chat_id = test_helpers::seed_chat(&state, "u1").await;

    assert!(!state.auto_reply.schedule(state.clone(), chat_id));
    assert!(!state.auto_reply.is_pending(chat_id));
}

#[tokio::test(start_paused = true)]
async fn reply_arrives_after_delay() {
    let state = test_helpers::test_app_state_with_auto_reply(enabled(2000));
    let chat_id = test_helpers::seed_chat(&state, "u1").await;

    assert!(state.auto_reply.schedule(state.clone(), chat_id));
    advance(1000).await;
    assert!(message::get_chat_messages(&state, chat_id).await.is_empty());

    advance(1500).await;
    let messages = message::get_chat_messages(&state, chat_id).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender_type, SenderType::Admin);
    assert_eq!(messages[0].content, AutoReplyConfig::default().message);
    assert!(!state.auto_reply.is_pending(chat_id));

    let chat = directory::get_chat(&state, chat_id).await.unwrap();
    assert_eq!(chat.user_unread_count, 1);
    assert_eq!(chat.unread_count, 0);
}

#[tokio::test(start_paused = true)]
async fn rescheduling_replaces_pending_reply() {
    let state = test_helpers::test_app_state_with_auto_reply(enabled(2000));
    let chat_id = test_helpers::seed_chat(&state, "u1").await;

    state.auto_reply.schedule(state.clone(), chat_id);
    advance(1500).await;
    state.auto_reply.schedule(state.clone(), chat_id);
    advance(1500).await;
    assert!(message::get_chat_messages(&state, chat_id).await.is_empty());

    advance(1000).await;
    assert_eq!(message::get_chat_messages(&state, chat_id).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_reply_never_writes() {
    let state = test_helpers::test_app_state_with_auto_reply(enabled(2000));
    let chat_id = test_helpers::seed_chat(&state, "u1").await;

    state.auto_reply.schedule(state.clone(), chat_id);
    assert!(state.auto_reply.cancel(chat_id));
    assert!(!state.auto_reply.cancel(chat_id));

    advance(5000).await;
    assert!(message::get_chat_messages(&state, chat_id).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn closing_chat_cancels_reply() {
    let state = test_helpers::test_app_state_with_auto_reply(enabled(2000));
    let chat_id = test_helpers::seed_chat(&state, "u1").await;

    state.auto_reply.schedule(state.clone(), chat_id);
    let patch = ChatPatch { status: Some(ChatStatus::Closed), ..ChatPatch::default() };
    directory::update_chat(&state, chat_id, &patch).await.unwrap();
    assert!(!state.auto_reply.is_pending(chat_id));

    advance(5000).await;
    assert!(message::get_chat_messages(&state, chat_id).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn reply_skips_chat_closed_behind_its_back() {
    let state = test_helpers::test_app_state_with_auto_reply(enabled(100));
    let chat_id = test_helpers::seed_chat(&state, "u1").await;

    state.auto_reply.schedule(state.clone(), chat_id);
    // Close directly in the store, bypassing update_chat's cancellation.
    state
        .store
        .write()
        .await
        .chats
        .get_mut(&chat_id)
        .unwrap()
        .status = ChatStatus::Closed;

    advance(500).await;
    assert!(message::get_chat_messages(&state, chat_id).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn reply_skips_chat_answered_behind_its_back() {
    let state = test_helpers::test_app_state_with_auto_reply(enabled(100));
    let chat_id = test_helpers::seed_chat(&state, "u1").await;
    message::add_message(&state, test_helpers::user_text(chat_id, "u1", "hello?"))
        .await
        .unwrap();

    state.auto_reply.schedule(state.clone(), chat_id);
    // A human reply that does not go through `cancel`.
    message::add_message(&state, test_helpers::admin_text(chat_id, "admin_1", "hi, looking now"))
        .await
        .unwrap();

    advance(500).await;
    let messages = message::get_chat_messages(&state, chat_id).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].sender_id, "admin_1");
}

#[tokio::test(start_paused = true)]
async fn close_after_slot_claimed_still_blocks_reply() {
    let state = test_helpers::test_app_state_with_auto_reply(enabled(100));
    let chat_id = test_helpers::seed_chat(&state, "u1").await;
    state.auto_reply.schedule(state.clone(), chat_id);

    // Hold the store across the reply's wake-up, then close under the same
    // guard the reply task is waiting on.
    let mut store = state.store.write().await;
    advance(500).await;
    // The task has claimed its slot, so cancelling finds nothing.
    assert!(!state.auto_reply.is_pending(chat_id));
    assert!(!state.auto_reply.cancel(chat_id));
    store.chats.get_mut(&chat_id).unwrap().status = ChatStatus::Closed;
    drop(store);

    advance(100).await;
    assert!(message::get_chat_messages(&state, chat_id).await.is_empty());
}

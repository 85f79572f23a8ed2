use super::*;
use crate::state::test_helpers;
use tokio::sync::mpsc;

fn client(user_id: &str, role: SenderType, capacity: usize) -> (ConnectedClient, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ConnectedClient { user_id: user_id.into(), user_name: user_id.into(), role, tx }, rx)
}

#[tokio::test]
async fn chat_audience_is_admins_plus_owner() {
    let state = test_helpers::test_app_state();
    let (owner, mut owner_rx) = client("u1", SenderType::User, 8);
    let (stranger, mut stranger_rx) = client("u2", SenderType::User, 8);
    let (admin, mut admin_rx) = client("admin_1", SenderType::Admin, 8);
    register(&state, Uuid::new_v4(), owner).await;
    register(&state, Uuid::new_v4(), stranger).await;
    register(&state, Uuid::new_v4(), admin).await;

    let chat = test_helpers::dummy_chat("u1");
    let frame = Frame::request("chat:update", chat_data(&chat));
    let delivered = broadcast(&state, &Audience::for_chat(&chat), &frame, None).await;

    assert_eq!(delivered, 2);
    assert_eq!(owner_rx.try_recv().unwrap().syscall, "chat:update");
    assert_eq!(admin_rx.try_recv().unwrap().syscall, "chat:update");
    assert!(stranger_rx.try_recv().is_err());
}

#[tokio::test]
async fn broadcast_skips_excluded_client() {
    let state = test_helpers::test_app_state();
    let sender_id = Uuid::new_v4();
    let (sender, mut sender_rx) = client("admin_1", SenderType::Admin, 8);
    let (peer, mut peer_rx) = client("admin_2", SenderType::Admin, 8);
    register(&state, sender_id, sender).await;
    register(&state, Uuid::new_v4(), peer).await;

    let frame = Frame::request("presence:changed", Data::new());
    broadcast(&state, &Audience::Everyone, &frame, Some(sender_id)).await;

    assert!(sender_rx.try_recv().is_err());
    assert!(peer_rx.try_recv().is_ok());
}

#[tokio::test]
async fn full_channel_is_skipped() {
    let state = test_helpers::test_app_state();
    let (slow, _slow_rx) = client("u1", SenderType::User, 1);
    register(&state, Uuid::new_v4(), slow).await;

    let frame = Frame::request("presence:changed", Data::new());
    assert_eq!(broadcast(&state, &Audience::Everyone, &frame, None).await, 1);
    assert_eq!(broadcast(&state, &Audience::Everyone, &frame, None).await, 0);
}

#[tokio::test]
async fn unregister_reports_remaining_connections() {
    let state = test_helpers::test_app_state();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let (a, _rx_a) = client("u1", SenderType::User, 1);
    let (b, _rx_b) = client("u1", SenderType::User, 1);
    register(&state, first, a).await;
    register(&state, second, b).await;
    assert_eq!(connection_count(&state, "u1").await, 2);

    assert!(unregister(&state, first).await);
    assert!(!unregister(&state, second).await);
    assert!(!unregister(&state, second).await);
    assert_eq!(connection_count(&state, "u1").await, 0);
}

#[tokio::test]
async fn publish_message_carries_chat_and_message() {
    let state = test_helpers::test_app_state();
    let (owner, mut owner_rx) = client("u1", SenderType::User, 8);
    register(&state, Uuid::new_v4(), owner).await;

    let chat_id = test_helpers::seed_chat(&state, "u1").await;
    let (message, chat) =
        crate::services::message::add_message(&state, test_helpers::admin_text(chat_id, "admin_1", "hello"))
            .await
            .unwrap();
    publish_message(&state, &message, &chat, None).await;

    let frame = owner_rx.try_recv().unwrap();
    assert_eq!(frame.syscall, "message:send");
    assert_eq!(frame.chat_id, Some(chat_id));
    assert_eq!(frame.from.as_deref(), Some("admin_1"));
    assert_eq!(frame.data["message"]["content"], "hello");
    assert_eq!(frame.data["chat"]["user_unread_count"], 1);
}

#[tokio::test]
async fn online_flag_follows_open_connections() {
    let state = test_helpers::test_app_state();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let (a, _rx_a) = client("u1", SenderType::User, 1);
    let (b, _rx_b) = client("u1", SenderType::User, 1);

    assert!(register(&state, first, a).await);
    assert!(presence::is_user_online(&state, "u1").await);

    // A second tab opens, then the first one closes.
    assert!(!register(&state, second, b).await);
    assert!(unregister(&state, first).await);
    assert!(presence::is_user_online(&state, "u1").await);

    assert!(!unregister(&state, second).await);
    assert!(!presence::is_user_online(&state, "u1").await);
}

#[tokio::test]
async fn reconnect_racing_disconnect_stays_online() {
    let state = test_helpers::test_app_state();
    let old_tab = Uuid::new_v4();
    let new_tab = Uuid::new_v4();
    let (a, _rx_a) = client("u1", SenderType::User, 1);
    let (b, _rx_b) = client("u1", SenderType::User, 1);
    register(&state, old_tab, a).await;

    // Whichever runs first, the user ends up online with one connection.
    tokio::join!(unregister(&state, old_tab), register(&state, new_tab, b));
    assert!(presence::is_user_online(&state, "u1").await);
    assert_eq!(connection_count(&state, "u1").await, 1);
}

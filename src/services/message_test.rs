use super::*;
use crate::state::{ChatStatus, MessageKind, SenderType, test_helpers};

#[tokio::test]
async fn messages_come_back_in_call_order() {
    let state = test_helpers::test_app_state();
    let chat_id = test_helpers::seed_chat(&state, "u1").await;

    let mut sent = Vec::new();
    for i in 0..20 {
        let new_message = if i % 3 == 0 {
            test_helpers::admin_text(chat_id, "admin_1", &format!("a{i}"))
        } else {
            test_helpers::user_text(chat_id, "u1", &format!("u{i}"))
        };
        let (message, _) = add_message(&state, new_message).await.unwrap();
        sent.push(message.id);
    }

    let stored: Vec<Uuid> = get_chat_messages(&state, chat_id)
        .await
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(stored, sent);
}

#[tokio::test]
async fn timestamps_never_decrease() {
    let state = test_helpers::test_app_state();
    let chat_id = test_helpers::seed_chat(&state, "u1").await;
    for i in 0..10 {
        add_message(&state, test_helpers::user_text(chat_id, "u1", &i.to_string()))
            .await
            .unwrap();
    }
    let messages = get_chat_messages(&state, chat_id).await;
    assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn unknown_chat_has_no_messages() {
    let state = test_helpers::test_app_state();
    assert!(get_chat_messages(&state, Uuid::new_v4()).await.is_empty());
}

#[tokio::test]
async fn add_message_to_unknown_chat_fails() {
    let state = test_helpers::test_app_state();
    let chat_id = Uuid::new_v4();
    let err = add_message(&state, test_helpers::user_text(chat_id, "u1", "hi"))
        .await
        .unwrap_err();
    assert_eq!(err, ChatError::NotFound(chat_id));
    assert!(get_chat_messages(&state, chat_id).await.is_empty());
}

#[tokio::test]
async fn blank_text_is_rejected_but_attachments_are_not() {
    let state = test_helpers::test_app_state();
    let chat_id = test_helpers::seed_chat(&state, "u1").await;

    let err = add_message(&state, test_helpers::user_text(chat_id, "u1", "   "))
        .await
        .unwrap_err();
    assert_eq!(err, ChatError::EmptyMessage);

    let mut file = test_helpers::user_text(chat_id, "u1", "");
    file.kind = MessageKind::File;
    file.file_url = Some("https://cdn.example.com/invoice.pdf".into());
    file.file_name = Some("invoice.pdf".into());
    let (message, _) = add_message(&state, file).await.unwrap();
    assert_eq!(message.kind, MessageKind::File);
    assert_eq!(message.file_name.as_deref(), Some("invoice.pdf"));
}

#[tokio::test]
async fn only_recipient_counter_increments() {
    let state = test_helpers::test_app_state();
    let chat_id = test_helpers::seed_chat(&state, "u1").await;

    let (_, chat) = add_message(&state, test_helpers::user_text(chat_id, "u1", "hi"))
        .await
        .unwrap();
    assert_eq!((chat.unread_count, chat.user_unread_count), (1, 0));

    let (_, chat) = add_message(&state, test_helpers::user_text(chat_id, "u1", "anyone?"))
        .await
        .unwrap();
    assert_eq!((chat.unread_count, chat.user_unread_count), (2, 0));

    let (_, chat) = add_message(&state, test_helpers::admin_text(chat_id, "admin_1", "hello"))
        .await
        .unwrap();
    assert_eq!((chat.unread_count, chat.user_unread_count), (2, 1));
}

#[tokio::test]
async fn chat_record_tracks_last_message() {
    let state = test_helpers::test_app_state();
    let chat_id = test_helpers::seed_chat(&state, "u1").await;
    let (first, _) = add_message(&state, test_helpers::user_text(chat_id, "u1", "first"))
        .await
        .unwrap();
    let (second, chat) = add_message(&state, test_helpers::user_text(chat_id, "u1", "second"))
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(chat.last_message.as_ref().map(|m| m.id), Some(second.id));
    assert_eq!(chat.updated_at, second.timestamp);
    assert_eq!(second.status, MessageStatus::Sent);
}

#[tokio::test]
async fn first_admin_reply_activates_waiting_chat() {
    let state = test_helpers::test_app_state();
    let chat_id = test_helpers::seed_chat(&state, "u1").await;

    let (_, chat) = add_message(&state, test_helpers::user_text(chat_id, "u1", "hi"))
        .await
        .unwrap();
    assert_eq!(chat.status, ChatStatus::Waiting);

    let (_, chat) = add_message(&state, test_helpers::admin_text(chat_id, "admin_1", "hello"))
        .await
        .unwrap();
    assert_eq!(chat.status, ChatStatus::Active);
}

#[tokio::test]
async fn admin_reply_does_not_reopen_closed_chat() {
    let state = test_helpers::test_app_state();
    let chat_id = test_helpers::seed_chat(&state, "u1").await;
    state
        .store
        .write()
        .await
        .chats
        .get_mut(&chat_id)
        .unwrap()
        .status = ChatStatus::Closed;

    let (_, chat) = add_message(&state, test_helpers::admin_text(chat_id, "admin_1", "follow-up"))
        .await
        .unwrap();
    assert_eq!(chat.status, ChatStatus::Closed);
}

#[tokio::test]
async fn add_message_tracks_analytics_event() {
    let state = test_helpers::test_app_state();
    let chat_id = test_helpers::seed_chat(&state, "u1").await;
    add_message(&state, test_helpers::user_text(chat_id, "u1", "hi"))
        .await
        .unwrap();

    let events = state.analytics.flush();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].event,
        AnalyticsEvent::MessageSent { chat_id, sender_type: SenderType::User }
    );
}

#[test]
fn validate_needs_content_or_attachment() {
    let chat_id = Uuid::new_v4();
    assert!(matches!(
        validate(&test_helpers::user_text(chat_id, "u1", " \n")),
        Err(ChatError::EmptyMessage)
    ));
    assert!(validate(&test_helpers::user_text(chat_id, "u1", "hi")).is_ok());

    let attachment = NewMessage {
        file_url: Some("https://cdn.example.com/a.png".into()),
        kind: MessageKind::Image,
        ..test_helpers::user_text(chat_id, "u1", "")
    };
    assert!(validate(&attachment).is_ok());
}

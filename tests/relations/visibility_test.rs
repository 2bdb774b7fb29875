//! Tests for hide, mute, read markers and conversation listing.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use duet::messages::MessageBody;
use duet::relations::conversation::ConversationStatus;
use duet::relations::RelationError;

use crate::support::{connect, harness, invite, party};

/// Keep consecutive steps out of the same millisecond.
async fn tick() {
    tokio::time::sleep(StdDuration::from_millis(5)).await;
}

#[tokio::test]
async fn hide_removes_conversation_from_own_list_only() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let conv = connect(&h, alice, bob).await;

    let after = h
        .engine
        .hide_conversation(alice, conv.id)
        .await
        .expect("hide should succeed");
    assert_eq!(after.status, ConversationStatus::Active);

    assert!(h.engine.list_conversations(alice).await.expect("list").is_empty());
    let bob_list = h.engine.list_conversations(bob).await.expect("list");
    assert_eq!(bob_list.len(), 1);
    assert_eq!(bob_list[0].counterpart, alice);
}

#[tokio::test]
async fn hide_soft_deletes_only_the_hiders_messages() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let conv = connect(&h, alice, bob).await;
    h.engine
        .send_message(alice, conv.id, MessageBody::text("from alice"))
        .await
        .expect("send");
    h.engine
        .send_message(bob, conv.id, MessageBody::text("from bob"))
        .await
        .expect("send");
    tick().await;

    h.engine.hide_conversation(alice, conv.id).await.expect("hide");

    let bob_view = h.engine.history(bob, conv.id).await.expect("history");
    assert_eq!(bob_view.len(), 1);
    assert_eq!(bob_view[0].body.content, "from bob");

    // Alice's own cutoff hides everything before she hid.
    let alice_view = h.engine.history(alice, conv.id).await.expect("history");
    assert!(alice_view.is_empty());
}

#[tokio::test]
async fn new_message_after_hide_resurfaces_with_fresh_history() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let conv = connect(&h, alice, bob).await;
    h.engine
        .send_message(bob, conv.id, MessageBody::text("old"))
        .await
        .expect("send");
    tick().await;
    h.engine.hide_conversation(alice, conv.id).await.expect("hide");
    tick().await;

    h.engine
        .send_message(bob, conv.id, MessageBody::text("new"))
        .await
        .expect("send");

    let listed = h.engine.list_conversations(alice).await.expect("list");
    assert_eq!(listed.len(), 1);
    let last = listed[0].last_message.as_ref().expect("latest message");
    assert_eq!(last.body.content, "new");

    let history = h.engine.history(alice, conv.id).await.expect("history");
    let contents: Vec<&str> = history.iter().map(|m| m.body.content.as_str()).collect();
    assert_eq!(contents, vec!["new"]);
}

#[tokio::test]
async fn both_hiding_deletes_the_conversation() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let conv = connect(&h, alice, bob).await;

    h.engine.hide_conversation(alice, conv.id).await.expect("hide");
    let after = h.engine.hide_conversation(bob, conv.id).await.expect("hide");

    assert_eq!(after.status, ConversationStatus::Deleted);
    assert!(h.engine.list_conversations(alice).await.expect("list").is_empty());
    assert!(h.engine.list_conversations(bob).await.expect("list").is_empty());
}

#[tokio::test]
async fn hiding_a_pending_conversation_never_deletes_it() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let outcome = invite(&h, alice, bob).await;

    h.engine
        .hide_conversation(alice, outcome.conversation.id)
        .await
        .expect("hide");
    let after = h
        .engine
        .hide_conversation(bob, outcome.conversation.id)
        .await
        .expect("hide");
    assert_eq!(after.status, ConversationStatus::Pending);
}

#[tokio::test]
async fn outsiders_cannot_touch_visibility() {
    let h = harness().await;
    let conv = connect(&h, party(1), party(2)).await;
    let outsider = party(3);

    assert!(matches!(
        h.engine.hide_conversation(outsider, conv.id).await,
        Err(RelationError::PermissionDenied(_))
    ));
    assert!(matches!(
        h.engine.mute_conversation(outsider, conv.id, None).await,
        Err(RelationError::PermissionDenied(_))
    ));
    assert!(matches!(
        h.engine.history(outsider, conv.id).await,
        Err(RelationError::PermissionDenied(_))
    ));
    assert!(matches!(
        h.engine.get_conversation(outsider, conv.id).await,
        Err(RelationError::PermissionDenied(_))
    ));
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let h = harness().await;
    assert!(matches!(
        h.engine.get_conversation(party(1), 404).await,
        Err(RelationError::NotFound {
            entity: "conversation",
            ..
        })
    ));
}

#[tokio::test]
async fn mute_indefinitely_and_unmute() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let conv = connect(&h, alice, bob).await;

    let muted = h
        .engine
        .mute_conversation(bob, conv.id, None)
        .await
        .expect("mute should succeed");
    assert!(muted.is_muted);
    assert!(muted.mute_until.is_none());
    assert!(muted.is_muted_at(Utc::now() + Duration::days(365)));

    let unmuted = h
        .engine
        .unmute_conversation(bob, conv.id)
        .await
        .expect("unmute should succeed");
    assert!(!unmuted.is_muted);
    assert!(!unmuted.is_muted_at(Utc::now()));
}

#[tokio::test]
async fn timed_mute_expires() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let conv = connect(&h, alice, bob).await;

    let muted = h
        .engine
        .mute_conversation(bob, conv.id, Some(8))
        .await
        .expect("mute should succeed");
    let until = muted.mute_until.expect("timed mute has an end");

    assert!(muted.is_muted_at(Utc::now()));
    assert!(!muted.is_muted_at(until));
    assert!(until > Utc::now() + Duration::hours(7));
    assert!(until <= Utc::now() + Duration::hours(8));
}

#[tokio::test]
async fn zero_hour_mute_is_rejected() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let conv = connect(&h, alice, bob).await;

    assert!(matches!(
        h.engine.mute_conversation(bob, conv.id, Some(0)).await,
        Err(RelationError::InvalidState(_))
    ));
}

#[tokio::test]
async fn mark_read_sets_marker() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let conv = connect(&h, alice, bob).await;
    let before = Utc::now() - Duration::seconds(1);

    let state = h.engine.mark_read(bob, conv.id).await.expect("mark read");
    let read = state.last_read_at.expect("marker should be set");
    assert!(read >= before);
}

#[tokio::test]
async fn list_orders_by_recent_activity() {
    let h = harness().await;
    let (alice, bob, carol) = (party(1), party(2), party(3));
    let with_bob = connect(&h, alice, bob).await;
    tick().await;
    let with_carol = connect(&h, alice, carol).await;
    tick().await;

    h.engine
        .send_message(bob, with_bob.id, MessageBody::text("bump"))
        .await
        .expect("send");

    let listed = h.engine.list_conversations(alice).await.expect("list");
    let ids: Vec<i64> = listed.iter().map(|s| s.conversation.id).collect();
    assert_eq!(ids, vec![with_bob.id, with_carol.id]);
    assert_eq!(listed[0].counterpart, bob);
    assert!(listed[1].last_message.is_none());
}

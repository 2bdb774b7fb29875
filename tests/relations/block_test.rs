//! Tests for blocks, unblocks and friendships.

use duet::relations::conversation::ConversationStatus;
use duet::relations::RelationError;
use duet::types::PartyId;

use crate::support::{connect, harness, invitation_rows, invite, party};

async fn status_between(h: &crate::support::Harness, a: PartyId, b: PartyId) -> ConversationStatus {
    h.engine
        .conversation_between(a, b)
        .await
        .expect("lookup should succeed")
        .expect("conversation should exist")
        .status
}

#[tokio::test]
async fn block_demotes_active_conversation_and_ends_friendship() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    connect(&h, alice, bob).await;

    h.engine.block(alice, bob).await.expect("block should succeed");

    assert_eq!(status_between(&h, alice, bob).await, ConversationStatus::Blocked);
    assert!(!h.engine.are_friends(alice, bob).await.expect("lookup"));
    assert!(h.engine.is_blocked(alice, bob).await.expect("lookup"));
    assert!(!h.engine.is_blocked(bob, alice).await.expect("lookup"));
    assert!(h.engine.are_blocked(bob, alice).await.expect("lookup"));
}

#[tokio::test]
async fn block_removes_pending_invitations_in_both_directions() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    invite(&h, alice, bob).await;
    assert_eq!(invitation_rows(&h, alice, bob).await, 1);

    h.engine.block(bob, alice).await.expect("block should succeed");

    assert_eq!(invitation_rows(&h, alice, bob).await, 0);
    // A pending conversation is not promoted or demoted by a block.
    assert_eq!(status_between(&h, alice, bob).await, ConversationStatus::Pending);
}

#[tokio::test]
async fn block_keeps_accepted_invitations() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    connect(&h, alice, bob).await;

    h.engine.block(alice, bob).await.expect("block should succeed");
    assert_eq!(invitation_rows(&h, alice, bob).await, 1);
}

#[tokio::test]
async fn block_is_not_idempotent() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    h.engine.block(alice, bob).await.expect("first block should succeed");

    let err = h
        .engine
        .block(alice, bob)
        .await
        .expect_err("second block should fail");
    match err {
        RelationError::InvalidState(reason) => assert!(reason.contains("already blocked")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn block_rejects_self_and_nil() {
    let h = harness().await;
    let alice = party(1);
    let nil: PartyId = "00000000-0000-0000-0000-000000000000"
        .parse()
        .expect("valid uuid");

    assert!(matches!(
        h.engine.block(alice, alice).await,
        Err(RelationError::InvalidState(_))
    ));
    assert!(matches!(
        h.engine.block(alice, nil).await,
        Err(RelationError::InvalidState(_))
    ));
    assert!(matches!(
        h.engine.block(nil, alice).await,
        Err(RelationError::InvalidState(_))
    ));
}

#[tokio::test]
async fn unblock_without_block_is_a_no_op() {
    let h = harness().await;
    h.engine
        .unblock(party(1), party(2))
        .await
        .expect("unblock of nothing should succeed");
}

#[tokio::test]
async fn unblock_locks_conversation_and_clears_all_invitations() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    connect(&h, alice, bob).await;
    h.engine.block(alice, bob).await.expect("block should succeed");

    h.engine.unblock(alice, bob).await.expect("unblock should succeed");

    assert_eq!(status_between(&h, alice, bob).await, ConversationStatus::Locked);
    assert_eq!(invitation_rows(&h, alice, bob).await, 0);
    assert!(!h.engine.are_blocked(alice, bob).await.expect("lookup"));
    assert!(!h.engine.are_friends(alice, bob).await.expect("lookup"));
}

#[tokio::test]
async fn conversation_stays_blocked_while_the_other_side_still_blocks() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    connect(&h, alice, bob).await;
    h.engine.block(alice, bob).await.expect("alice blocks");
    h.engine.block(bob, alice).await.expect("bob blocks");

    h.engine.unblock(alice, bob).await.expect("alice unblocks");
    assert_eq!(status_between(&h, alice, bob).await, ConversationStatus::Blocked);

    h.engine.unblock(bob, alice).await.expect("bob unblocks");
    assert_eq!(status_between(&h, alice, bob).await, ConversationStatus::Locked);
}

#[tokio::test]
async fn block_then_unblock_never_restores_friendship() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    connect(&h, alice, bob).await;

    for _ in 0..3 {
        h.engine.block(bob, alice).await.expect("block should succeed");
        h.engine.unblock(bob, alice).await.expect("unblock should succeed");
        assert!(!h.engine.are_friends(alice, bob).await.expect("lookup"));
        assert_eq!(status_between(&h, alice, bob).await, ConversationStatus::Locked);
    }
}

#[tokio::test]
async fn blocked_by_lists_blocked_parties() {
    let h = harness().await;
    let (alice, bob, carol) = (party(1), party(2), party(3));
    h.engine.block(alice, bob).await.expect("block bob");
    h.engine.block(alice, carol).await.expect("block carol");
    h.engine.block(carol, alice).await.expect("carol blocks alice");

    let mut blocked: Vec<PartyId> = h
        .engine
        .blocked_by(alice)
        .await
        .expect("list should succeed")
        .into_iter()
        .map(|b| b.blocked)
        .collect();
    blocked.sort_by_key(|p| p.to_string());
    assert_eq!(blocked, vec![bob, carol]);
}

#[tokio::test]
async fn unfriend_locks_conversation_and_reinvite_restores_it() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let conv = connect(&h, alice, bob).await;

    h.engine.unfriend(alice, bob).await.expect("unfriend should succeed");
    assert_eq!(status_between(&h, alice, bob).await, ConversationStatus::Locked);
    assert!(!h.engine.are_friends(alice, bob).await.expect("lookup"));

    let again = invite(&h, alice, bob).await;
    assert_eq!(again.conversation.id, conv.id);
    assert!(again.invitation.is_pending());
    h.engine
        .accept_invitation(again.invitation.id, bob)
        .await
        .expect("accept should succeed");

    assert_eq!(status_between(&h, alice, bob).await, ConversationStatus::Active);
    assert!(h.engine.are_friends(alice, bob).await.expect("lookup"));
}

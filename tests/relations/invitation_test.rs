//! Tests for the invitation protocol in `src/relations/engine.rs`.

use chrono::Duration;

use duet::directory::{InviteeRef, StaticDirectory};
use duet::relations::conversation::ConversationStatus;
use duet::relations::invitation::InvitationStatus;
use duet::relations::RelationError;
use duet::types::{canonical_pair, PartyId};

use crate::support::{connect, harness, harness_with_directory, invitation_rows, invite, party};

#[tokio::test]
async fn first_invite_creates_pending_conversation_and_invitation() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));

    let outcome = invite(&h, alice, bob).await;

    assert_eq!(outcome.conversation.status, ConversationStatus::Pending);
    assert_eq!(outcome.conversation.created_by, alice);
    assert_eq!(outcome.invitation.status, InvitationStatus::Pending);
    assert_eq!(outcome.invitation.inviter, alice);
    assert_eq!(outcome.invitation.invitee, bob);
    assert!(!outcome.auto_accepted);

    let pending = h
        .engine
        .list_pending_invitations(bob)
        .await
        .expect("list should succeed");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, outcome.invitation.id);
    assert_eq!(
        h.engine
            .count_pending_invitations(bob)
            .await
            .expect("count should succeed"),
        1
    );
    assert_eq!(
        h.engine
            .count_pending_invitations(alice)
            .await
            .expect("count should succeed"),
        0
    );
}

#[tokio::test]
async fn expiry_is_informational_ttl_after_creation() {
    let h = harness().await;
    let outcome = invite(&h, party(1), party(2)).await;

    let inv = outcome.invitation;
    assert_eq!(inv.expires_at - inv.created_at, Duration::days(7));
    assert!(inv.responded_at.is_none());
}

#[tokio::test]
async fn invitee_resolved_by_phone_and_login() {
    let (alice, bob, carol) = (party(1), party(2), party(3));
    let directory = StaticDirectory::new()
        .with_phone("+1 555 010 2030", bob)
        .with_login("carol@example.com", carol);
    let h = harness_with_directory(directory).await;

    let by_phone = h
        .engine
        .request_invitation(alice, &InviteeRef::Phone("+1-555-010-2030".to_owned()), None)
        .await
        .expect("phone invite should resolve");
    assert_eq!(by_phone.invitation.invitee, bob);

    let by_login = h
        .engine
        .request_invitation(
            alice,
            &InviteeRef::Login("carol@example.com".to_owned()),
            None,
        )
        .await
        .expect("login invite should resolve");
    assert_eq!(by_login.invitation.invitee, carol);
}

#[tokio::test]
async fn unknown_invitee_is_not_found() {
    let h = harness().await;
    let err = h
        .engine
        .request_invitation(party(1), &InviteeRef::Phone("+10000000000".to_owned()), None)
        .await
        .expect_err("unknown phone should fail");
    assert!(matches!(err, RelationError::NotFound { entity: "party", .. }));
}

#[tokio::test]
async fn self_and_nil_invites_are_rejected() {
    let h = harness().await;
    let alice = party(1);

    let err = h
        .engine
        .request_invitation(alice, &InviteeRef::Party(alice), None)
        .await
        .expect_err("self invite should fail");
    assert!(matches!(err, RelationError::InvalidState(_)));

    let nil: PartyId = "00000000-0000-0000-0000-000000000000"
        .parse()
        .expect("valid uuid");
    let err = h
        .engine
        .request_invitation(alice, &InviteeRef::Party(nil), None)
        .await
        .expect_err("nil invitee should fail");
    assert!(matches!(err, RelationError::InvalidState(_)));
}

#[tokio::test]
async fn second_identical_invite_is_already_sent() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    invite(&h, alice, bob).await;

    let err = h
        .engine
        .request_invitation(alice, &InviteeRef::Party(bob), None)
        .await
        .expect_err("duplicate invite should fail");
    match err {
        RelationError::InvalidState(reason) => assert!(reason.contains("already sent")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(invitation_rows(&h, alice, bob).await, 1);
}

#[tokio::test]
async fn reverse_requests_converge_on_one_conversation_and_auto_accept() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));

    let first = invite(&h, bob, alice).await;
    let second = invite(&h, alice, bob).await;

    assert_eq!(first.conversation.id, second.conversation.id);
    assert!(second.auto_accepted);
    assert_eq!(second.conversation.status, ConversationStatus::Active);
    assert_eq!(second.invitation.status, InvitationStatus::Accepted);

    let (low, high) = canonical_pair(alice, bob);
    assert_eq!(second.conversation.party_a, low);
    assert_eq!(second.conversation.party_b, high);

    assert!(h
        .engine
        .are_friends(alice, bob)
        .await
        .expect("friend lookup should succeed"));
    assert_eq!(
        h.engine
            .count_pending_invitations(alice)
            .await
            .expect("count should succeed"),
        0
    );
    assert_eq!(
        h.engine
            .count_pending_invitations(bob)
            .await
            .expect("count should succeed"),
        0
    );

    let rows: (i64,) = sqlx::query_as("SELECT count(*) FROM conversations")
        .fetch_one(h.pool())
        .await
        .expect("count should succeed");
    assert_eq!(rows.0, 1);
}

#[tokio::test]
async fn accept_activates_conversation_and_friendship() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let outcome = invite(&h, alice, bob).await;

    let accepted = h
        .engine
        .accept_invitation(outcome.invitation.id, bob)
        .await
        .expect("accept should succeed");

    assert_eq!(accepted.conversation.status, ConversationStatus::Active);
    assert_eq!(accepted.invitation.status, InvitationStatus::Accepted);
    assert!(accepted.invitation.responded_at.is_some());
    assert!(h
        .engine
        .are_friends(bob, alice)
        .await
        .expect("friend lookup should succeed"));
}

#[tokio::test]
async fn only_the_invitee_can_respond() {
    let h = harness().await;
    let (alice, bob, carol) = (party(1), party(2), party(3));
    let outcome = invite(&h, alice, bob).await;

    for intruder in [alice, carol] {
        let err = h
            .engine
            .accept_invitation(outcome.invitation.id, intruder)
            .await
            .expect_err("non-invitee accept should fail");
        assert!(matches!(err, RelationError::PermissionDenied(_)));

        let err = h
            .engine
            .decline_invitation(outcome.invitation.id, intruder)
            .await
            .expect_err("non-invitee decline should fail");
        assert!(matches!(err, RelationError::PermissionDenied(_)));
    }
}

#[tokio::test]
async fn accepting_twice_is_invalid_state() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let outcome = invite(&h, alice, bob).await;
    h.engine
        .accept_invitation(outcome.invitation.id, bob)
        .await
        .expect("first accept should succeed");

    let err = h
        .engine
        .accept_invitation(outcome.invitation.id, bob)
        .await
        .expect_err("second accept should fail");
    assert!(matches!(err, RelationError::InvalidState(_)));
}

#[tokio::test]
async fn unknown_invitation_is_not_found() {
    let h = harness().await;
    let err = h
        .engine
        .accept_invitation(9_999, party(2))
        .await
        .expect_err("missing invitation should fail");
    assert!(matches!(
        err,
        RelationError::NotFound {
            entity: "invitation",
            ..
        }
    ));
}

#[tokio::test]
async fn decline_deletes_row_and_reinvite_succeeds() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let outcome = invite(&h, alice, bob).await;

    h.engine
        .decline_invitation(outcome.invitation.id, bob)
        .await
        .expect("decline should succeed");

    assert_eq!(invitation_rows(&h, alice, bob).await, 0);
    let conv = h
        .engine
        .get_conversation(alice, outcome.conversation.id)
        .await
        .expect("conversation should remain");
    assert_eq!(conv.status, ConversationStatus::Pending);

    let again = invite(&h, alice, bob).await;
    assert_eq!(again.conversation.id, outcome.conversation.id);
    assert_eq!(again.invitation.status, InvitationStatus::Pending);
}

#[tokio::test]
async fn invite_between_blocked_parties_is_denied_both_ways() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    h.engine.block(alice, bob).await.expect("block should succeed");

    for (from, to) in [(alice, bob), (bob, alice)] {
        let err = h
            .engine
            .request_invitation(from, &InviteeRef::Party(to), None)
            .await
            .expect_err("blocked invite should fail");
        assert!(matches!(err, RelationError::PermissionDenied(_)));
    }
}

#[tokio::test]
async fn accept_after_block_is_denied() {
    let h = harness().await;
    let (alice, bob, carol) = (party(1), party(2), party(3));
    let outcome = invite(&h, alice, bob).await;
    // Blocking a third party leaves this invitation alone.
    h.engine.block(bob, carol).await.expect("block should succeed");
    assert_eq!(invitation_rows(&h, alice, bob).await, 1);

    h.engine.block(bob, alice).await.expect("block should succeed");
    let err = h
        .engine
        .accept_invitation(outcome.invitation.id, bob)
        .await
        .expect_err("invitation was removed by the block");
    assert!(matches!(err, RelationError::NotFound { .. }));
}

#[tokio::test]
async fn inviting_an_active_friend_is_invalid_state() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    connect(&h, alice, bob).await;

    let err = h
        .engine
        .request_invitation(bob, &InviteeRef::Party(alice), None)
        .await
        .expect_err("already connected");
    match err {
        RelationError::InvalidState(reason) => assert!(reason.contains("already connected")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn locked_conversation_with_reverse_pending_points_at_it() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    connect(&h, alice, bob).await;
    h.engine.block(alice, bob).await.expect("block should succeed");
    h.engine.unblock(alice, bob).await.expect("unblock should succeed");

    invite(&h, bob, alice).await;
    let err = h
        .engine
        .request_invitation(alice, &InviteeRef::Party(bob), None)
        .await
        .expect_err("reverse invitation exists");
    match err {
        RelationError::InvalidState(reason) => assert!(reason.contains("already invited you")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn initial_message_becomes_first_message_before_acceptance() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));

    let outcome = h
        .engine
        .request_invitation(alice, &InviteeRef::Party(bob), Some("  hi bob  "))
        .await
        .expect("invite should succeed");
    assert_eq!(outcome.invitation.initial_message.as_deref(), Some("hi bob"));

    let history = h
        .engine
        .history(bob, outcome.conversation.id)
        .await
        .expect("history should load");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sender, alice);
    assert_eq!(history[0].body.content, "hi bob");
    assert_eq!(outcome.conversation.status, ConversationStatus::Pending);
}

#[tokio::test]
async fn blank_initial_message_is_ignored() {
    let h = harness().await;
    let (alice, bob) = (party(1), party(2));
    let outcome = h
        .engine
        .request_invitation(alice, &InviteeRef::Party(bob), Some("   "))
        .await
        .expect("invite should succeed");

    assert!(outcome.invitation.initial_message.is_none());
    let history = h
        .engine
        .history(bob, outcome.conversation.id)
        .await
        .expect("history should load");
    assert!(history.is_empty());
}

// Integration tests for history partitions and serialized batches

mod common;

use std::collections::BTreeSet;

use common::fixture;
use critic_core::core::batch::BatchRequest;
use critic_core::core::CoreError;
use critic_core::model::{ChainState, CommitId};

#[test]
fn test_partitions_tile_history_across_rebases() {
    let fx = fixture();
    let reviews = fx.services.reviews();

    let single = reviews.partitions(fx.review).unwrap();
    assert_eq!(single.len(), 1);
    assert_eq!(single[0].commits.len(), 3);
    assert!(single[0].rebase.is_none());

    let rebase = reviews.begin_rebase(fx.review, fx.bob, None).unwrap();
    let r1 = reviews.add_commit(fx.review, "r1", &["up"], Some(fx.bob), "one").unwrap();
    let r2 = reviews.add_commit(fx.review, "r2", &["r1"], Some(fx.bob), "two").unwrap();
    reviews.finish_rebase(rebase, r2, None).unwrap();

    let parts = reviews.partitions(fx.review).unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].rebase, Some(rebase));
    assert_eq!(parts[0].commits, [r1, r2].into_iter().collect::<BTreeSet<CommitId>>());
    assert_eq!(
        parts[1].commits,
        fx.commits.iter().copied().collect::<BTreeSet<CommitId>>()
    );

    let all: usize = parts.iter().map(|p| p.commits.len()).sum();
    assert_eq!(all, 5);
    assert_eq!(reviews.partition_of(fx.review, fx.commits[0]).unwrap(), parts[1]);
}

#[test]
fn test_batch_request_applies_in_order() {
    let fx = fixture();
    let chain = fx.open_issue(fx.alice);

    let json = format!(
        r#"{{
            "review": {review},
            "user": {bob},
            "comment": "addressed feedback",
            "operations": [
                {{"op": "add_reply", "chain": {chain}, "text": "Done"}},
                {{"op": "mark_issue_addressed_by", "chain": {chain}, "commit": {head}}},
                {{"op": "add_review_filter", "user": {carol}, "path": "src/", "kind": "reviewer"}}
            ]
        }}"#,
        review = fx.review.0,
        bob = fx.bob.0,
        chain = chain.0,
        head = fx.commits[2].0,
        carol = fx.carol.0,
    );
    let request: BatchRequest = serde_json::from_str(&json).unwrap();
    let outcome = request.apply(&fx.services).unwrap();
    assert!(outcome.batch_id.is_some());
    assert!(outcome.assignment_transaction_id.is_some());

    let chain = fx.services.reviews().chain(chain).unwrap();
    assert_eq!(chain.state, ChainState::Addressed);
    assert_eq!(chain.addressed_by, Some(fx.commits[2]));
    assert_eq!(chain.comments.len(), 2);
}

#[test]
fn test_batch_request_rejection_writes_nothing() {
    let fx = fixture();
    let json = format!(
        r#"{{
            "review": {review},
            "user": {alice},
            "operations": [
                {{"op": "write_note", "text": "Looks fine"}},
                {{"op": "resolve_issue", "chain": 404}}
            ]
        }}"#,
        review = fx.review.0,
        alice = fx.alice.0,
    );
    let request: BatchRequest = serde_json::from_str(&json).unwrap();
    assert!(matches!(
        request.apply(&fx.services),
        Err(CoreError::InvalidArgument(_))
    ));
    assert!(fx.services.reviews().chains(fx.review).unwrap().is_empty());
    assert!(fx.notifier.sent().is_empty());

    let anonymous: BatchRequest = serde_json::from_str(&format!(
        r#"{{"review": {}, "operations": [{{"op": "write_note", "text": "Hi"}}]}}"#,
        fx.review.0
    ))
    .unwrap();
    assert!(matches!(
        anonymous.apply(&fx.services),
        Err(CoreError::InvalidArgument(_))
    ));
}

// Integration tests for review filters and assignments

mod common;

use common::fixture;
use critic_core::core::{CoreError, FinishOptions};
use critic_core::model::{FilterId, FilterKind, UserId};
use critic_core::notify::Notification;
use critic_core::store::Assignment;

fn assigned_to(fx: &common::Fixture, user: UserId) -> usize {
    fx.services
        .reviews()
        .assignments(fx.review)
        .unwrap()
        .iter()
        .filter(|a| a.user == user)
        .count()
}

#[test]
fn test_reviewer_filter_assigns_matching_files() {
    let fx = fixture();
    let mut batch = fx.services.batch(fx.review, fx.alice).unwrap();
    batch
        .add_review_filter(fx.carol, "src/", FilterKind::Reviewer)
        .unwrap();
    let outcome = batch.finish(&FinishOptions::default()).unwrap();

    let transaction = outcome.assignment_transaction_id.unwrap();
    assert!(outcome.batch_id.is_none());
    assert_eq!(assigned_to(&fx, fx.carol), 3);
    assert_eq!(
        fx.services.db().assignment_changes(transaction).unwrap().len(),
        3
    );
    assert_eq!(
        fx.notifier.sent(),
        vec![Notification {
            transaction_id: Some(transaction),
            ..Notification::default()
        }]
    );
    assert!(fx
        .services
        .db()
        .review_users(fx.review)
        .unwrap()
        .contains(&fx.carol));
}

#[test]
fn test_authors_are_not_assigned_their_own_changes() {
    let fx = fixture();
    let mut batch = fx.services.batch(fx.review, fx.alice).unwrap();
    batch
        .add_review_filter(fx.bob, "", FilterKind::Reviewer)
        .unwrap();
    batch.finish(&FinishOptions::default()).unwrap();

    assert_eq!(assigned_to(&fx, fx.bob), 0);
    assert_eq!(fx.services.reviews().filters(fx.review).unwrap().len(), 1);
}

#[test]
fn test_more_specific_filter_wins() {
    let fx = fixture();
    let mut batch = fx.services.batch(fx.review, fx.alice).unwrap();
    batch
        .add_review_filter(fx.carol, "/", FilterKind::Reviewer)
        .unwrap();
    batch
        .add_review_filter(fx.carol, "src/lib.rs", FilterKind::Ignored)
        .unwrap();
    batch.finish(&FinishOptions::default()).unwrap();

    assert_eq!(assigned_to(&fx, fx.carol), 0);
}

#[test]
fn test_removing_filter_unassigns() {
    let fx = fixture();
    let mut batch = fx.services.batch(fx.review, fx.alice).unwrap();
    batch
        .add_review_filter(fx.carol, "src/", FilterKind::Reviewer)
        .unwrap();
    batch.finish(&FinishOptions::default()).unwrap();
    let filter = fx.services.reviews().filters(fx.review).unwrap()[0].id;

    let mut batch = fx.services.batch(fx.review, fx.alice).unwrap();
    batch.remove_review_filter(filter).unwrap();
    assert!(matches!(
        batch.remove_review_filter(filter),
        Err(CoreError::Conflict(_))
    ));
    // Replacing the removed filter in the same batch is fine.
    batch
        .add_review_filter(fx.carol, "src/", FilterKind::Watcher)
        .unwrap();
    batch.finish(&FinishOptions::default()).unwrap();

    assert_eq!(assigned_to(&fx, fx.carol), 0);
    let filters = fx.services.reviews().filters(fx.review).unwrap();
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].kind, FilterKind::Watcher);
}

#[test]
fn test_filter_conflicts() {
    let fx = fixture();
    let mut batch = fx.services.batch(fx.review, fx.alice).unwrap();
    batch
        .add_review_filter(fx.carol, "src/", FilterKind::Reviewer)
        .unwrap();
    assert!(matches!(
        batch.add_review_filter(fx.carol, "src/", FilterKind::Watcher),
        Err(CoreError::Conflict(_))
    ));
    assert!(matches!(
        batch.add_review_filter(fx.carol, "src", FilterKind::Watcher),
        Err(CoreError::Conflict(_))
    ));
    assert!(matches!(
        batch.remove_review_filter(FilterId(99)),
        Err(CoreError::InvalidArgument(_))
    ));
    assert!(matches!(
        batch.add_review_filter(UserId(99), "src/", FilterKind::Watcher),
        Err(CoreError::InvalidArgument(_))
    ));
    assert_eq!(batch.filter_operations().len(), 1);
    batch.finish(&FinishOptions::default()).unwrap();

    let mut batch = fx.services.batch(fx.review, fx.alice).unwrap();
    assert!(matches!(
        batch.add_review_filter(fx.carol, "src/", FilterKind::Ignored),
        Err(CoreError::Conflict(_))
    ));
    assert!(matches!(
        batch.add_review_filter(fx.carol, "src//", FilterKind::Ignored),
        Err(CoreError::Conflict(_))
    ));
    assert!(batch.is_empty());
    assert_eq!(fx.services.reviews().filters(fx.review).unwrap()[0].path, "src");
}

#[test]
fn test_explicit_assignments_net_out() {
    let fx = fixture();
    let mut batch = fx.services.batch(fx.review, fx.alice).unwrap();
    batch.assign_changes(fx.carol, &fx.review_files).unwrap();
    batch
        .unassign_changes(fx.carol, &fx.review_files[..1])
        .unwrap();
    let outcome = batch.finish(&FinishOptions::default()).unwrap();

    let assignments = fx.services.reviews().assignments(fx.review).unwrap();
    assert_eq!(
        assignments,
        vec![
            Assignment {
                review_file: fx.review_files[1],
                user: fx.carol,
            },
            Assignment {
                review_file: fx.review_files[2],
                user: fx.carol,
            },
        ]
    );
    let transaction = outcome.assignment_transaction_id.unwrap();
    assert_eq!(
        fx.services.db().assignment_changes(transaction).unwrap().len(),
        2
    );

    // Already in effect, so nothing new is recorded.
    let mut batch = fx.services.batch(fx.review, fx.alice).unwrap();
    batch
        .assign_changes(fx.carol, &fx.review_files[1..])
        .unwrap();
    let outcome = batch.finish(&FinishOptions::default()).unwrap();
    let transaction = outcome.assignment_transaction_id.unwrap();
    assert!(fx
        .services
        .db()
        .assignment_changes(transaction)
        .unwrap()
        .is_empty());
}

#[test]
fn test_unknown_review_files_are_rejected() {
    let fx = fixture();
    let mut batch = fx.services.batch(fx.review, fx.alice).unwrap();
    assert!(matches!(
        batch.assign_changes(fx.carol, &[critic_core::model::ReviewFileId(404)]),
        Err(CoreError::InvalidArgument(_))
    ));
    assert!(matches!(
        batch.assign_changes(fx.carol, &[]),
        Err(CoreError::InvalidArgument(_))
    ));
    assert!(batch.assignments().is_empty());
}

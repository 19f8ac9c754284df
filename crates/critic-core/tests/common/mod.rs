// Shared fixtures for critic-core integration tests
#![allow(dead_code)]

use std::path::Path;

use critic_core::core::reviews::FileChange;
use critic_core::core::CriticServices;
use critic_core::model::{
    ChainId, CommitId, FileId, FileVersion, Location, ReviewFileId, ReviewId, UserId,
};
use critic_core::notify::MemoryNotifier;
use critic_core::scm::memory::MemoryRepo;
use critic_core::scm::DiffChunk;
use critic_core::store::ReviewDb;

pub const PATH: &str = "src/lib.rs";

/// A review of three linear commits `c1 <- c2 <- c3`, all by `bob`, each
/// changing `src/lib.rs`:
///
/// - `c1 -> c2` replaces line 20 with three lines
/// - `c2 -> c3` rewrites line 6
pub struct Fixture {
    pub services: CriticServices,
    pub notifier: MemoryNotifier,
    pub review: ReviewId,
    pub alice: UserId,
    pub bob: UserId,
    pub carol: UserId,
    pub commits: Vec<CommitId>,
    pub file: FileId,
    pub review_files: Vec<ReviewFileId>,
}

pub fn repo() -> MemoryRepo {
    let mut repo = MemoryRepo::new();
    repo.set_file("c1", PATH, "h1")
        .set_file("c2", PATH, "h2")
        .set_file("c3", PATH, "h3")
        .set_chunks("c1", "c2", PATH, vec![DiffChunk::new(20, 1, 20, 3)])
        .set_chunks("c2", "c3", PATH, vec![DiffChunk::new(6, 1, 6, 1)]);
    repo
}

fn open(db: ReviewDb) -> (CriticServices, MemoryNotifier) {
    db.init_schema().unwrap();
    let notifier = MemoryNotifier::new();
    let services = CriticServices::new(db, Box::new(repo()), Box::new(notifier.clone()));
    (services, notifier)
}

/// Fixture over an in-memory database.
pub fn fixture() -> Fixture {
    populate(ReviewDb::open_in_memory().unwrap())
}

/// Fixture over a database file, so other sessions can open it too.
pub fn fixture_at(path: &Path) -> Fixture {
    populate(ReviewDb::open(path).unwrap())
}

/// A second session on the database file at `path`.
pub fn session(path: &Path) -> (CriticServices, MemoryNotifier) {
    open(ReviewDb::open(path).unwrap())
}

fn populate(db: ReviewDb) -> Fixture {
    let (services, notifier) = open(db);
    let alice = services.ensure_user("alice", Some("alice@example.com")).unwrap();
    let bob = services.ensure_user("bob", Some("bob@example.com")).unwrap();
    let carol = services.ensure_user("carol", None).unwrap();

    let reviews = services.reviews();
    let review = reviews.create("Tidy parser", "topic/parser", alice).unwrap();

    let change = |deleted, inserted| {
        vec![FileChange {
            path: PATH.to_string(),
            deleted,
            inserted,
        }]
    };
    let c1 = reviews.add_commit(review, "c1", &["base"], Some(bob), "one").unwrap();
    let c2 = reviews.add_commit(review, "c2", &["c1"], Some(bob), "two").unwrap();
    let c3 = reviews.add_commit(review, "c3", &["c2"], Some(bob), "three").unwrap();
    reviews.add_changeset(review, None, c1, &change(0, 40)).unwrap();
    reviews.add_changeset(review, Some(c1), c2, &change(1, 3)).unwrap();
    reviews.add_changeset(review, Some(c2), c3, &change(1, 1)).unwrap();

    let file = services.db().file_by_path(PATH).unwrap().unwrap();
    let review_files = reviews.files(review).unwrap().iter().map(|f| f.id).collect();

    Fixture {
        services,
        notifier,
        review,
        alice,
        bob,
        carol,
        commits: vec![c1, c2, c3],
        file,
        review_files,
    }
}

impl Fixture {
    /// `src/lib.rs` lines `[line_index + 1, line_index + line_count]` at
    /// commit `n` (1-based, like the shas).
    pub fn at(&self, n: usize, line_index: u32, line_count: u32) -> Location {
        Location::File {
            version: FileVersion {
                commit: self.commits[n - 1],
                file: self.file,
                path: PATH.to_string(),
            },
            line_index,
            line_count,
        }
    }

    /// Raise an issue at the head and return its chain.
    pub fn open_issue(&self, user: UserId) -> ChainId {
        let mut batch = self.services.batch(self.review, user).unwrap();
        batch
            .raise_issue("Needs a bounds check", Some(&self.at(3, 0, 1)), false)
            .unwrap();
        batch.finish(&Default::default()).unwrap();
        self.services
            .reviews()
            .chains(self.review)
            .unwrap()
            .last()
            .unwrap()
            .id
    }
}

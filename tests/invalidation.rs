mod common;

use cache_tokens::backend::InMemoryBackend;
use cache_tokens::{
    ChangeListener, CommitCoordinator, CommitReport, Fragment, Identifier, InvalidationEngine,
    RelationMap, RetryPolicy, RollbackReport, RotationOutcome, StoreConfig, Token, TokenBackend,
    TrackedEntity,
};
use common::{OutageBackend, Sessions};
use proptest::prelude::*;
use std::collections::BTreeSet;

struct User {
    id: u32,
}

impl TrackedEntity for User {
    type Key = u32;

    fn entity_id(&self) -> Self::Key {
        self.id
    }

    fn collection() -> &'static str {
        "users"
    }
}

fn engine<B: TokenBackend>(backend: B) -> InvalidationEngine<B> {
    common::init_logging();
    InvalidationEngine::builder(backend, StoreConfig::default().with_namespace("app"))
        .build()
        .expect("engine")
}

fn id(s: &str) -> Identifier {
    s.parse().expect("identifier")
}

async fn tokens<B: TokenBackend>(
    engine: &InvalidationEngine<B>,
    identifiers: &[Identifier],
) -> Vec<Token> {
    let mut out = Vec::new();
    for identifier in identifiers {
        out.push(engine.store().get_or_create(identifier).await.expect("token"));
    }
    out
}

#[tokio::test]
async fn commit_rotates_entity_collection_and_global() {
    let engine = engine(InMemoryBackend::new());
    let keys = engine.key_generator();
    let closure = [id("app:users#1"), id("app:users#*"), id("app:*#*")];

    let stale_key = keys.build(&[Fragment::identifier("app:users#1")]).await.unwrap();
    let before = tokens(&engine, &closure).await;

    engine
        .coordinator()
        .on_pending_change("uow-1", "users", "1")
        .await;
    let report = engine.coordinator().on_commit("uow-1").await;
    assert_eq!(report, CommitReport::Rotated { identifiers: 3 });

    let after = tokens(&engine, &closure).await;
    for (old, new) in before.iter().zip(&after) {
        assert_ne!(old, new);
    }

    let fresh_key = keys.build(&[Fragment::identifier("app:users#1")]).await.unwrap();
    assert_ne!(stale_key, fresh_key);
}

#[tokio::test]
async fn commit_leaves_unrelated_tokens_alone() {
    let engine = engine(InMemoryBackend::new());
    let untouched = [id("app:users#2"), id("app:posts#1"), id("app:posts#*")];
    let before = tokens(&engine, &untouched).await;

    engine
        .coordinator()
        .on_pending_change("uow", "users", "1")
        .await;
    engine.coordinator().on_commit("uow").await;

    assert_eq!(before, tokens(&engine, &untouched).await);
}

#[tokio::test]
async fn rollback_leaves_every_token_unchanged() {
    let engine = engine(InMemoryBackend::new());
    let closure = [id("app:users#1"), id("app:users#*"), id("app:*#*")];
    let before = tokens(&engine, &closure).await;

    engine
        .coordinator()
        .on_pending_change("uow", "users", "1")
        .await;
    assert_eq!(
        engine.coordinator().on_rollback("uow", false).await,
        RollbackReport::Discarded { identifiers: 2 }
    );
    assert_eq!(
        engine.coordinator().on_commit("uow").await,
        CommitReport::NothingPending
    );

    assert_eq!(before, tokens(&engine, &closure).await);
}

#[tokio::test]
async fn entity_and_identifier_string_build_equal_keys() {
    let engine = engine(InMemoryBackend::new());
    let keys = engine.key_generator();

    let from_entity = keys
        .build(&[Fragment::entity(&User { id: 1 }), Fragment::literal(10_u32)])
        .await
        .unwrap();
    let from_string = keys
        .build(&[Fragment::identifier("app:users#1"), Fragment::literal(10_u32)])
        .await
        .unwrap();
    assert_eq!(from_entity, from_string);
}

#[tokio::test]
async fn keys_are_stable_until_a_token_rotates() {
    let engine = engine(InMemoryBackend::new());
    let keys = engine.key_generator();
    let fragments = [Fragment::entity(&User { id: 1 }), Fragment::collection("posts")];

    let a = keys.build(&fragments).await.unwrap();
    assert_eq!(a, keys.build(&fragments).await.unwrap());

    engine
        .coordinator()
        .on_pending_change("uow", "posts", "7")
        .await;
    engine.coordinator().on_commit("uow").await;

    assert_ne!(a, keys.build(&fragments).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn store_outage_during_rotation_is_swallowed_and_reads_fail_open() {
    let backend = OutageBackend::default();
    let engine = engine(backend.clone());
    let retries = engine.config().retry.max_retries as usize;

    backend.go_down();
    let outcome = engine.store().rotate_many(&[id("app:users#2")]).await;
    assert!(matches!(outcome, RotationOutcome::Failed { attempted: 1, .. }));
    assert_eq!(backend.calls(), retries + 1);

    let token = engine
        .store()
        .get_or_create(&id("app:users#2"))
        .await
        .expect("fail-open read");
    assert!(!token.as_str().is_empty());

    // Keys still build while the store is down: every build is a miss.
    let keys = engine.key_generator();
    let a = keys.build(&[Fragment::identifier("app:users#2")]).await.unwrap();
    let b = keys.build(&[Fragment::identifier("app:users#2")]).await.unwrap();
    assert_ne!(a, b);
}

#[tokio::test(start_paused = true)]
async fn commit_never_fails_during_outage() {
    let backend = OutageBackend::default();
    let engine = engine(backend.clone());

    backend.go_down();
    engine
        .coordinator()
        .on_pending_change("uow", "users", "3")
        .await;
    let report = engine.coordinator().on_commit("uow").await;
    assert!(matches!(report, CommitReport::RotationFailed { .. }));
}

#[tokio::test(start_paused = true)]
async fn invalidation_survives_outage_spanning_flush_and_commit() {
    let backend = OutageBackend::default();
    let engine = engine(backend.clone());
    let keys = engine.key_generator();
    let fragments = [Fragment::entity(&User { id: 4 })];
    let before = keys.build(&fragments).await.unwrap();

    backend.go_down();
    engine
        .coordinator()
        .on_pending_change("uow", "users", "4")
        .await;
    let report = engine.coordinator().on_commit("uow").await;
    assert!(matches!(report, CommitReport::RotationFailed { .. }));

    backend.come_back();
    assert_eq!(
        engine.coordinator().on_commit("uow").await,
        CommitReport::Rotated { identifiers: 3 }
    );
    assert_ne!(before, keys.build(&fragments).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn key_generation_raises_when_fail_open_disabled() {
    let backend = OutageBackend::default();
    let config = StoreConfig::default()
        .with_namespace("app")
        .with_retry(RetryPolicy {
            fail_open: false,
            ..Default::default()
        });
    let engine = InvalidationEngine::builder(backend.clone(), config)
        .build()
        .unwrap();

    backend.go_down();
    let err = engine
        .key_generator()
        .build(&[Fragment::Global])
        .await
        .unwrap_err();
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn bound_sessions_drive_invalidation() {
    let engine = engine(InMemoryBackend::new());
    let mut sessions: Sessions<CommitCoordinator<InMemoryBackend>> = Sessions::default();
    engine.bind(&mut sessions);

    let keys = engine.key_generator();
    let fragments = [Fragment::entity(&User { id: 5 })];
    let before = keys.build(&fragments).await.unwrap();

    // Inner transaction rolls back, outer one commits what it wrote.
    let mut session = sessions.open();
    session.write("users", 5);
    session.flush().await;
    session.begin_nested();
    session.write("posts", 1);
    session.flush().await;
    assert_eq!(session.rollback().await, vec![RollbackReport::Nested]);
    let reports = session.commit().await;
    assert!(matches!(reports[..], [CommitReport::Rotated { .. }]));

    assert_ne!(before, keys.build(&fragments).await.unwrap());
}

#[tokio::test]
async fn relation_cascade_invalidates_owner() {
    common::init_logging();
    let relations = RelationMap::new()
        .with_relation("comments", "posts", "post_id")
        .unwrap();
    let engine = InvalidationEngine::builder(
        InMemoryBackend::new(),
        StoreConfig::default().with_namespace("app"),
    )
    .with_relations(relations)
    .build()
    .unwrap();

    let keys = engine.key_generator();
    let post_page = [Fragment::identifier("app:posts#4")];
    let before = keys.build(&post_page).await.unwrap();

    let change = cache_tokens::EntityChange::new("comments", 99).with_foreign_key("post_id", 4);
    engine.coordinator().on_entity_change("uow", &change).await;
    engine.coordinator().on_commit("uow").await;

    assert_ne!(before, keys.build(&post_page).await.unwrap());
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn commit_rotates_exactly_the_closure(
        changes in prop::collection::vec(("(users|posts|tags)", 1u32..6), 1..8),
    ) {
        runtime().block_on(async {
            let engine = engine(InMemoryBackend::new());

            let mut closure = BTreeSet::new();
            for (collection, entity) in &changes {
                let identifier = Identifier::entity("app", collection.as_str(), entity).unwrap();
                closure.insert(identifier.collection_wildcard());
                closure.insert(identifier);
            }
            closure.insert(Identifier::global("app").unwrap());

            let mut universe = Vec::new();
            for collection in ["users", "posts", "tags"] {
                universe.push(Identifier::collection("app", collection).unwrap());
                for entity in 1u32..6 {
                    universe.push(Identifier::entity("app", collection, entity).unwrap());
                }
            }
            universe.push(Identifier::global("app").unwrap());
            let before = tokens(&engine, &universe).await;

            for (collection, entity) in &changes {
                engine
                    .coordinator()
                    .on_pending_change("uow", collection, &entity.to_string())
                    .await;
            }
            let report = engine.coordinator().on_commit("uow").await;
            prop_assert_eq!(report, CommitReport::Rotated { identifiers: closure.len() });

            let after = tokens(&engine, &universe).await;
            for ((identifier, old), new) in universe.iter().zip(&before).zip(&after) {
                prop_assert_eq!(closure.contains(identifier), old != new, "{}", identifier);
            }
            Ok(())
        })?;
    }
}

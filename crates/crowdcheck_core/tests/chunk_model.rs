use crowdcheck_core::{
    ChunkStatus, DomainError, ErrorKind, Mark, Package, PackageProcessingPolicy, ProcessedChunk,
    Record, User,
};
use std::time::Duration;

fn package_with_records(count: u64, policy: PackageProcessingPolicy) -> Package {
    let records = (1..=count)
        .map(|line| Record::new(line, format!("row-{line},value-{line}")))
        .collect();
    Package::new(records, policy)
}

fn default_package() -> Package {
    package_with_records(10, PackageProcessingPolicy::default())
}

#[test]
fn fresh_chunk_is_not_assigned() {
    let mut package = default_package();
    let chunk = package.create_chunk().unwrap();

    assert_eq!(chunk.status(), ChunkStatus::NotAssigned);
    assert!(chunk.assignees().is_empty());
    assert_eq!(chunk.items().len(), 10);
    assert!(!package.has_raw_data());
}

#[test]
fn assigning_users_marks_chunk_assigned() {
    let mut package = default_package();
    let chunk = package.create_chunk().unwrap();

    chunk
        .assign_users(&[User::new(1, "Alice"), User::new(2, "Bob")])
        .unwrap();
    assert_eq!(chunk.status(), ChunkStatus::Assigned);
    assert_eq!(chunk.assignees().len(), 2);
    assert_eq!(chunk.free_slots(), 0);
}

#[test]
fn one_of_two_results_makes_chunk_active() {
    let mut package = default_package();
    let alice = User::new(1, "Alice");
    let bob = User::new(2, "Bob");
    let chunk = package.create_chunk().unwrap();
    chunk.assign_users(&[alice.clone(), bob]).unwrap();
    let processed = ProcessedChunk::new(chunk.id(), alice, chunk.to_processed(Mark::Correct));
    let chunk_id = chunk.id();

    package.register_result(&processed).unwrap();
    assert_eq!(package.chunk(chunk_id).unwrap().status(), ChunkStatus::Active);
    assert!(!package.is_closed());
}

#[test]
fn all_results_complete_chunk_and_close_package() {
    let mut package = default_package();
    let alice = User::new(1, "Alice");
    let bob = User::new(2, "Bob");
    let chunk = package.create_chunk().unwrap();
    chunk.assign_users(&[alice.clone(), bob.clone()]).unwrap();
    let chunk_id = chunk.id();
    let first = ProcessedChunk::new(chunk_id, alice, chunk.to_processed(Mark::Correct));
    let second = ProcessedChunk::new(chunk_id, bob, chunk.to_processed(Mark::Incorrect));

    package.register_result(&first).unwrap();
    package.register_result(&second).unwrap();

    let chunk = package.chunk(chunk_id).unwrap();
    assert_eq!(chunk.status(), ChunkStatus::Completed);
    assert_eq!(chunk.results().len(), 2);
    assert_eq!(chunk.assignees().len(), 2);
    assert!(package.is_closed());
}

#[test]
fn result_from_user_without_lease_is_rejected() {
    let mut package = default_package();
    let chunk = package.create_chunk().unwrap();
    chunk.assign_users(&[User::new(1, "Alice")]).unwrap();
    let processed = ProcessedChunk::new(
        chunk.id(),
        User::new(7, "Mallory"),
        chunk.to_processed(Mark::Correct),
    );

    let err = package.register_result(&processed).unwrap_err();
    assert!(matches!(err, DomainError::NotAnAssignee { user_id: 7, .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn second_result_from_same_user_is_rejected() {
    let mut package = default_package();
    let alice = User::new(1, "Alice");
    let chunk = package.create_chunk().unwrap();
    chunk.assign_users(&[alice.clone()]).unwrap();
    let chunk_id = chunk.id();
    let first_items = chunk.to_processed(Mark::Correct);
    let second_items = chunk.to_processed(Mark::Incorrect);
    let first = ProcessedChunk::new(chunk_id, alice.clone(), first_items.clone());
    let second = ProcessedChunk::new(chunk_id, alice.clone(), second_items);

    package.register_result_at(&first, 1_000).unwrap();
    let err = package.register_result_at(&second, 2_000).unwrap_err();
    assert!(matches!(err, DomainError::ResultAlreadyRegistered { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let chunk = package.chunk(chunk_id).unwrap();
    assert_eq!(chunk.results().len(), 1);
    let kept = chunk.result_of(&alice).unwrap();
    assert_eq!(kept.items, first_items);
    assert_eq!(kept.registered_at, 1_000);
}

#[test]
fn result_for_unknown_chunk_is_not_found() {
    let mut package = default_package();
    let mut other = default_package();
    let alice = User::new(1, "Alice");
    package
        .create_chunk()
        .unwrap()
        .assign_users(&[alice.clone()])
        .unwrap();
    let foreign = other.create_chunk().unwrap();
    let processed = ProcessedChunk::new(foreign.id(), alice, foreign.to_processed(Mark::Correct));

    let err = package.register_result(&processed).unwrap_err();
    assert!(matches!(err, DomainError::ChunkNotFound(id) if id == processed.chunk_id));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn empty_result_is_rejected() {
    let mut package = default_package();
    let alice = User::new(1, "Alice");
    let chunk = package.create_chunk().unwrap();
    chunk.assign_users(&[alice.clone()]).unwrap();
    let processed = ProcessedChunk::new(chunk.id(), alice, Vec::new());

    let err = package.register_result(&processed).unwrap_err();
    assert!(matches!(err, DomainError::EmptyResult(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn unassign_checks_arguments() {
    let mut package = default_package();
    let chunk = package.create_chunk().unwrap();

    let err = chunk.unassign_user(&User::default()).unwrap_err();
    assert!(matches!(err, DomainError::MissingUser));
    let err = chunk.assign_users(&[]).unwrap_err();
    assert!(matches!(err, DomainError::NoUsers(_)));
    let err = chunk.assign_users(&[User::default()]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn unassign_releases_the_slot() {
    let mut package = default_package();
    let alice = User::new(1, "Alice");
    let bob = User::new(2, "Bob");
    let chunk = package.create_chunk().unwrap();
    chunk.assign_users(&[alice.clone(), bob.clone()]).unwrap();

    chunk.unassign_user(&alice).unwrap();
    assert!(!chunk.is_assignee(&alice));
    assert!(chunk.is_assignee(&bob));
    assert_eq!(chunk.free_slots(), 1);
}

#[test]
fn unassign_of_stranger_is_not_found() {
    let mut package = default_package();
    let chunk = package.create_chunk().unwrap();
    chunk.assign_users(&[User::new(1, "Alice")]).unwrap();

    let err = chunk.unassign_user(&User::new(2, "Bob")).unwrap_err();
    assert!(matches!(err, DomainError::UserNotAssigned { user_id: 2, .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn unassign_after_result_is_rejected() {
    let mut package = default_package();
    let alice = User::new(1, "Alice");
    let chunk = package.create_chunk().unwrap();
    chunk.assign_users(&[alice.clone()]).unwrap();
    let chunk_id = chunk.id();
    let processed = ProcessedChunk::new(chunk_id, alice.clone(), chunk.to_processed(Mark::Correct));
    package.register_result(&processed).unwrap();

    let chunk = package.chunk_mut(chunk_id).unwrap();
    let err = chunk.unassign_user(&alice).unwrap_err();
    assert!(matches!(err, DomainError::ResultAlreadyRegistered { .. }));
    assert!(chunk.is_assignee(&alice));
}

#[test]
fn over_capacity_assignment_leaves_chunk_untouched() {
    let mut package = default_package();
    let chunk = package.create_chunk().unwrap();
    chunk.assign_users(&[User::new(1, "Alice")]).unwrap();

    let err = chunk
        .assign_users(&[User::new(2, "Bob"), User::new(3, "Carol")])
        .unwrap_err();
    assert!(matches!(
        err,
        DomainError::GroupFull {
            group_size: 2,
            requested: 2,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Capacity);
    assert_eq!(chunk.assignees().len(), 1);
}

#[test]
fn reassigning_current_assignee_is_conflict() {
    let mut package = default_package();
    let alice = User::new(1, "Alice");
    let chunk = package.create_chunk().unwrap();
    chunk.assign_users(&[alice.clone()]).unwrap();

    let err = chunk.assign_users(&[alice]).unwrap_err();
    assert!(matches!(err, DomainError::AlreadyAssigned { user_id: 1, .. }));
}

#[test]
fn chunks_are_carved_in_order_and_last_one_is_short() {
    let policy = PackageProcessingPolicy::new(4, 1, Duration::from_secs(60)).unwrap();
    let mut package = package_with_records(10, policy);

    let sizes: Vec<usize> = (0..3)
        .map(|_| package.create_chunk().unwrap().items().len())
        .collect();
    assert_eq!(sizes, vec![4, 4, 2]);

    let lines: Vec<u64> = package
        .chunks()
        .iter()
        .flat_map(|chunk| chunk.items().iter().map(|record| record.line))
        .collect();
    assert_eq!(lines, (1..=10).collect::<Vec<_>>());

    let err = package.create_chunk().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Exhaustion);
}

#[test]
fn package_with_pending_chunk_stays_open() {
    let policy = PackageProcessingPolicy::new(5, 1, Duration::from_secs(60)).unwrap();
    let mut package = package_with_records(5, policy);
    package.create_chunk().unwrap();

    assert!(!package.has_raw_data());
    assert!(!package.is_closed());
}

use crowdcheck_core::db::open_db;
use crowdcheck_core::{
    ErrorKind, Mark, MetadataIndex, Package, PackageProcessingPolicy, PackageRepository,
    ProcessedChunk, Record, SqlitePackageRepository, TaskError, TaskManager, User,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn setup(
    records: u64,
    task_size: usize,
    group_size: usize,
) -> (
    tempfile::TempDir,
    Arc<SqlitePackageRepository>,
    TaskManager<SqlitePackageRepository>,
    Package,
) {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(MetadataIndex::new());
    let repo = Arc::new(
        SqlitePackageRepository::try_new(
            open_db(dir.path().join("concurrency.db")).unwrap(),
            Arc::clone(&index),
        )
        .unwrap(),
    );
    let policy =
        PackageProcessingPolicy::new(task_size, group_size, Duration::from_secs(3600)).unwrap();
    let records = (1..=records)
        .map(|line| Record::new(line, format!("row-{line}")))
        .collect();
    let mut package = Package::new(records, policy);
    repo.save_package(&mut package).unwrap();
    let tasks = TaskManager::new(Arc::clone(&repo));
    (dir, repo, tasks, package)
}

#[test]
fn concurrent_requests_never_overfill_a_group() {
    let (_dir, repo, tasks, package) = setup(4, 4, 3);

    let outcomes: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (1..=8u64)
            .map(|id| {
                let tasks = &tasks;
                scope.spawn(move || tasks.get_current_task(&User::new(id, format!("worker-{id}"))))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    let winners: Vec<_> = outcomes.iter().filter_map(|outcome| outcome.as_ref().ok()).collect();
    assert_eq!(winners.len(), 3);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(matches!(err, TaskError::NoTaskAvailable(_)), "unexpected error: {err}");
        }
    }

    let stored = repo.get_by_id(package.id()).unwrap();
    assert_eq!(stored.chunks().len(), 1);
    let chunk = &stored.chunks()[0];
    assert_eq!(chunk.assignees().len(), 3);
    let distinct: HashSet<_> = chunk.assignees().iter().map(|a| a.user.id).collect();
    assert_eq!(distinct.len(), 3);
}

#[test]
fn concurrent_requests_spread_over_new_chunks() {
    let (_dir, repo, tasks, package) = setup(6, 2, 1);

    thread::scope(|scope| {
        for id in 1..=3u64 {
            let tasks = &tasks;
            scope.spawn(move || {
                tasks
                    .get_current_task(&User::new(id, format!("worker-{id}")))
                    .unwrap();
            });
        }
    });

    let stored = repo.get_by_id(package.id()).unwrap();
    assert_eq!(stored.chunks().len(), 3);
    assert!(stored
        .chunks()
        .iter()
        .all(|chunk| chunk.assignees().len() == 1));
    let lines: Vec<u64> = stored
        .chunks()
        .iter()
        .flat_map(|chunk| chunk.items().iter().map(|record| record.line))
        .collect();
    assert_eq!(lines, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn concurrent_results_on_one_chunk_are_all_kept() {
    let (_dir, repo, tasks, package) = setup(3, 3, 4);
    let users: Vec<User> = (1..=4u64).map(|id| User::new(id, format!("w{id}"))).collect();
    let leases: Vec<_> = users
        .iter()
        .map(|user| tasks.get_current_task(user).unwrap())
        .collect();

    thread::scope(|scope| {
        for (user, lease) in users.iter().zip(&leases) {
            let tasks = &tasks;
            let package_id = package.id();
            scope.spawn(move || {
                let items = lease.to_processed(Mark::Correct);
                let processed = ProcessedChunk::new(lease.id(), user.clone(), items);
                tasks.register_result(package_id, &processed).unwrap();
            });
        }
    });

    let stored = repo.get_by_id(package.id()).unwrap();
    assert_eq!(stored.chunks()[0].results().len(), 4);
    assert!(stored.is_closed());
    assert_eq!(repo.index().statistics().closed_packages, 1);
}

#[test]
fn save_from_stale_read_loses_to_scheduler() {
    let (_dir, repo, tasks, package) = setup(2, 2, 2);
    let alice = User::new(1, "Alice");
    let lease = tasks.get_current_task(&alice).unwrap();

    let mut stale = repo.get_by_id(package.id()).unwrap();
    tasks.get_current_task(&User::new(2, "Bob")).unwrap();

    let processed = ProcessedChunk::new(lease.id(), alice, lease.to_processed(Mark::Correct));
    stale.register_result(&processed).unwrap();
    let err = repo.save_package(&mut stale).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let stored = repo.get_by_id(package.id()).unwrap();
    assert!(stored.chunks()[0].results().is_empty());
    assert_eq!(stored.chunks()[0].assignees().len(), 2);
}

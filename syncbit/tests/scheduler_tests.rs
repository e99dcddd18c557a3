mod support;

use std::time::Duration;

use support::{FakeConnector, World};
use syncbit::Strategy;
use syncbit::scheduler::run_batch;

#[tokio::test]
async fn barrier_waits_for_the_slowest_transfer_of_a_chunk() {
    let world = World::new();
    world.delay("cd /src/0 &&", Duration::from_millis(300));
    let staging = tempfile::tempdir().unwrap();
    let config = support::config(4);
    let ctx = support::context(&world, &config, staging.path());
    let summary = run_batch(ctx, config.transfers.clone(), 2, Strategy::Barrier).await;
    assert_eq!(summary.completed, 4);
    let slow_done = world.first_seq("src", "rm -f /src/0/dump.zip").unwrap();
    let second_chunk = world.first_seq("src", "cd /src/2 &&").unwrap();
    assert!(
        second_chunk > slow_done,
        "transfer #2 started before the first chunk finished"
    );
    assert!(world.first_seq("src", "cd /src/1 &&").unwrap() < slow_done);
}

#[tokio::test]
async fn barrier_runs_ten_transfers_as_four_four_two() {
    let world = World::new();
    world.delay("zip -q -r", Duration::from_millis(20));
    let staging = tempfile::tempdir().unwrap();
    let config = support::config(10);
    let ctx = support::context(&world, &config, staging.path());
    let summary = run_batch(ctx, config.transfers.clone(), 4, Strategy::Barrier).await;
    assert_eq!(summary.completed, 10);
    let started = |i: usize| world.first_seq("src", &format!("cd /src/{i} &&")).unwrap();
    let finished = |i: usize| {
        world
            .first_seq("src", &format!("rm -f /src/{i}/dump.zip"))
            .unwrap()
    };
    let chunks: [&[usize]; 3] = [&[0, 1, 2, 3], &[4, 5, 6, 7], &[8, 9]];
    for chunk in chunks {
        // every member of a chunk is running before any of them finishes
        let last_start = chunk.iter().map(|&i| started(i)).max().unwrap();
        let first_finish = chunk.iter().map(|&i| finished(i)).min().unwrap();
        assert!(last_start < first_finish, "chunk {chunk:?} was not launched together");
    }
    for pair in chunks.windows(2) {
        let previous_done = pair[0].iter().map(|&i| finished(i)).max().unwrap();
        let next_start = pair[1].iter().map(|&i| started(i)).min().unwrap();
        assert!(next_start > previous_done, "chunk {:?} started early", pair[1]);
    }
    assert_eq!(world.peak_in_flight(), 4);
}

#[tokio::test]
async fn queue_keeps_workers_busy_past_a_slow_transfer() {
    let world = World::new();
    world.delay("cd /src/0 &&", Duration::from_millis(300));
    let staging = tempfile::tempdir().unwrap();
    let config = support::config(4);
    let ctx = support::context(&world, &config, staging.path());
    let summary = run_batch(ctx, config.transfers.clone(), 2, Strategy::Queue).await;
    assert_eq!(summary.completed, 4);
    let slow_done = world.first_seq("src", "rm -f /src/0/dump.zip").unwrap();
    let last = world.first_seq("src", "rm -f /src/3/dump.zip").unwrap();
    assert!(last < slow_done, "transfer #3 waited for the slow transfer");
}

#[tokio::test]
async fn active_transfers_never_exceed_parallelism() {
    for strategy in [Strategy::Barrier, Strategy::Queue] {
        let world = World::new();
        world.delay("zip -q -r", Duration::from_millis(20));
        let staging = tempfile::tempdir().unwrap();
        let config = support::config(12);
        let ctx = support::context(&world, &config, staging.path());
        let summary = run_batch(ctx, config.transfers.clone(), 3, strategy).await;
        assert_eq!(summary.completed, 12, "{strategy}");
        assert_eq!(world.peak_in_flight(), 3, "{strategy}");
        assert!(support::staging_leftovers(staging.path()).is_empty());
    }
}

#[tokio::test]
async fn failed_transfer_does_not_affect_siblings() {
    for strategy in [Strategy::Barrier, Strategy::Queue] {
        let world = World::new();
        world.fail("dst", "-d /dst/1");
        let staging = tempfile::tempdir().unwrap();
        let config = support::config(5);
        let ctx = support::context(&world, &config, staging.path());
        let summary = run_batch(ctx, config.transfers.clone(), 2, strategy).await;
        assert_eq!(summary.completed, 4, "{strategy}");
        assert_eq!(summary.aborted, 1, "{strategy}");
        for i in [0, 2, 3, 4] {
            assert!(world.has_file("dst", &format!("/dst/{i}/.restored")));
        }
        assert!(!world.has_file("dst", "/dst/1/.restored"));
    }
}

#[tokio::test]
async fn panicking_transfer_counts_as_aborted() {
    let world = World::new();
    world.panic("cd /src/2 &&");
    let staging = tempfile::tempdir().unwrap();
    let config = support::config(4);
    let ctx = support::context(&world, &config, staging.path());
    let summary = run_batch(ctx, config.transfers.clone(), 2, Strategy::Queue).await;
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.aborted, 1);
}

#[tokio::test]
async fn panic_mid_transfer_leaves_no_staging_files() {
    let world = World::new();
    world.panic("upload");
    let staging = tempfile::tempdir().unwrap();
    let config = support::config(1);
    let ctx = support::context(&world, &config, staging.path());
    let summary = run_batch(ctx, config.transfers.clone(), 1, Strategy::Barrier).await;
    assert_eq!(summary.aborted, 1);
    assert_eq!(summary.completed, 0);
    assert!(support::staging_leftovers(staging.path()).is_empty());
    assert!(world.files("src").is_empty());
}

#[tokio::test]
async fn empty_batch() {
    let world = World::new();
    let staging = tempfile::tempdir().unwrap();
    let config = support::config(1);
    let ctx = support::context(&world, &config, staging.path());
    let summary = run_batch(ctx, vec![], 4, Strategy::Barrier).await;
    assert_eq!(summary.total(), 0);
    assert!(world.events().is_empty());
}

#[tokio::test]
async fn sync_runs_every_transfer_and_closes_sessions() {
    let world = World::new();
    let staging = tempfile::tempdir().unwrap();
    let config = common::Config::from_yaml(&support::yaml(3, "")).unwrap();
    let options = syncbit::Options {
        parallelism: 8,
        staging_dir: staging.path().to_path_buf(),
        ..Default::default()
    };
    let summary = syncbit::sync(config, &FakeConnector::new(&world), &options)
        .await
        .unwrap();
    assert_eq!(summary.completed, 3);
    assert_eq!(world.connects(), 2);
    let closes: Vec<_> = world
        .events()
        .into_iter()
        .filter(|e| e.action == support::Action::Close)
        .map(|e| e.host)
        .collect();
    assert_eq!(closes, vec!["dst", "src"]);
}

#[tokio::test]
async fn validation_happens_before_connecting() {
    let world = World::new();
    let yaml = "adaptors:\n  - name: src\nfiles:\n  - src: { path: /a, adaptor: src }\n    dest: { path: /b, adaptor: nowhere }\n";
    let config = common::Config::from_yaml(yaml).unwrap();
    let error = syncbit::sync(config, &FakeConnector::new(&world), &syncbit::Options::default())
        .await
        .unwrap_err();
    assert!(format!("{error:#}").contains("nowhere"));
    assert_eq!(world.connects(), 0);
}

#[tokio::test]
async fn connection_failure_is_fatal_and_runs_nothing() {
    let world = World::new();
    let mut connector = FakeConnector::new(&world);
    connector.refuse.insert("dst".to_string());
    let config = common::Config::from_yaml(&support::yaml(2, "")).unwrap();
    let error = syncbit::sync(config, &connector, &syncbit::Options::default())
        .await
        .unwrap_err();
    assert!(format!("{error:#}").contains("adaptor dst"));
    assert!(world.commands("src").is_empty());
    // the session that did open was closed again
    assert_eq!(world.first_seq("src", "close"), Some(0));
}

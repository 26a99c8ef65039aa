// End-to-end scenarios S1-S6 (spec.md §8), driven against the in-process
// cluster harness (`Session::new_in_process`) the same way a real
// deployment's client would drive a `TcpStream`-backed one.

use mckoi_base::{Config, ErrorKind};
use mckoi_net::Key;
use mckoi_root::CommitOutcome;
use mckoi::Session;
use test_log::test;

fn new_session(replicas: usize) -> (tempfile::TempDir, Session) {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::new_in_process(dir.path(), replicas).unwrap();
    session.ensure_path("testdb").unwrap();
    (dir, session)
}

#[test]
fn s1_fast_path_commit() {
    let (_dir, session) = new_session(1);
    let r0 = session.current_root("testdb").unwrap();

    let mut tx = session.begin("testdb").unwrap();
    let k1 = Key::new(0, 0, 1);
    tx.data_file(k1).unwrap().put(b"The Hitchhiker's Guide to the Gal").unwrap();
    let outcome = session.commit(tx).unwrap();
    let r1 = match outcome {
        CommitOutcome::Committed { new_root, .. } => new_root,
        CommitOutcome::Fault(f) => panic!("unexpected fault {f:?}"),
    };
    assert_ne!(r0, r1);

    let mut reader = session.begin("testdb").unwrap();
    let mut df = reader.data_file(k1).unwrap();
    let size = df.size().unwrap();
    assert_eq!(df.get(size).unwrap(), b"The Hitchhiker's Guide to the Gal");
}

#[test]
fn s2_disjoint_concurrent_commits_auto_merge() {
    let (_dir, session) = new_session(1);

    let mut bootstrap = session.begin("testdb").unwrap();
    bootstrap.data_file(Key::new(0, 0, 1)).unwrap().put(b"seed").unwrap();
    let CommitOutcome::Committed { new_root: r1, .. } = session.commit(bootstrap).unwrap() else {
        panic!("bootstrap commit should succeed");
    };
    assert_eq!(session.current_root("testdb").unwrap(), r1);

    let mut tx_a = session.begin("testdb").unwrap();
    let mut tx_b = session.begin("testdb").unwrap();
    let k2 = Key::new(0, 0, 2);
    let k3 = Key::new(0, 0, 3);
    tx_a.data_file(k2).unwrap().put(b"from a").unwrap();
    tx_b.data_file(k3).unwrap().put(b"from b").unwrap();

    let CommitOutcome::Committed { new_root: r2, .. } = session.commit(tx_a).unwrap() else {
        panic!("T_a should commit cleanly");
    };
    assert_ne!(r2, r1);

    let outcome_b = session.commit(tx_b).unwrap();
    let r3 = match outcome_b {
        CommitOutcome::Committed { new_root, .. } => new_root,
        CommitOutcome::Fault(f) => panic!("disjoint commit should auto-merge, got fault {f:?}"),
    };
    assert_ne!(r3, r2);
    assert_eq!(session.current_root("testdb").unwrap(), r3);

    let mut reader = session.begin("testdb").unwrap();
    let size2 = reader.data_file(k2).unwrap().size().unwrap();
    assert_eq!(reader.data_file(k2).unwrap().get(size2).unwrap(), b"from a");
    let size3 = reader.data_file(k3).unwrap().size().unwrap();
    assert_eq!(reader.data_file(k3).unwrap().get(size3).unwrap(), b"from b");
}

#[test]
fn s3_hard_conflict_on_duplicate_unique_key() {
    let (_dir, session) = new_session(1);

    let mut bootstrap = session.begin("testdb").unwrap();
    bootstrap.data_file(Key::new(0, 0, 1)).unwrap().put(b"seed").unwrap();
    session.commit(bootstrap).unwrap();

    let mut tx_a = session.begin("testdb").unwrap();
    let mut tx_b = session.begin("testdb").unwrap();
    let k_dup = Key::new(0, 0, 99);
    tx_a.touch_unique(k_dup);
    tx_b.touch_unique(k_dup);

    let outcome_a = session.commit(tx_a).unwrap();
    assert!(matches!(outcome_a, CommitOutcome::Committed { .. }));

    let outcome_b = session.commit(tx_b).unwrap();
    match outcome_b {
        CommitOutcome::Fault(mckoi_base::CommitFaultKind::ConcurrentConflict) => {}
        other => panic!("expected ConcurrentConflict, got {other:?}"),
    }
}

#[test]
fn s4_datafile_shift_round_trip() {
    let (_dir, session) = new_session(1);
    let mut tx = session.begin("testdb").unwrap();
    let key = Key::new(0, 0, 42);
    {
        let mut df = tx.data_file(key).unwrap();
        df.put(&[0xAB; 4096]).unwrap();
        df.set_position(1024);
        df.shift(128).unwrap();
        df.shift(-128).unwrap();
        assert_eq!(df.size().unwrap(), 4096);
        df.set_position(0);
        let bytes = df.get(4096).unwrap();
        assert_eq!(bytes.len(), 4096);
        assert!(bytes.iter().all(|&b| b == 0xAB));
    }
    tx.dispose();
}

#[test]
fn s5_replica_failover_on_read() {
    let (_dir, session) = new_session(3);

    let mut tx = session.begin("testdb").unwrap();
    tx.data_file(Key::new(0, 0, 7)).unwrap().put(b"replicated payload").unwrap();
    session.commit(tx).unwrap();

    let mut reader = session.begin("testdb").unwrap();
    let mut df = reader.data_file(Key::new(0, 0, 7)).unwrap();
    let size = df.size().unwrap();
    assert_eq!(df.get(size).unwrap(), b"replicated payload");
}

#[test]
fn s6_config_grammar() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.conf");
    std::fs::write(
        &path,
        "network_password=secret\n\
         node_directory=/var/lib/mckoi\n\
         global_cache_size=16MB\n\
         configcheck_timeout=5 minutes 30 seconds\n",
    )
    .unwrap();
    let config = Config::load(&path).unwrap();
    assert_eq!(config.get_bytes("global_cache_size", 0).unwrap(), 16 * 1024 * 1024);
    assert_eq!(config.get_duration_ms("configcheck_timeout", 0).unwrap(), 330_000);

    let path2 = dir.path().join("node_star.conf");
    std::fs::write(
        &path2,
        "network_password=secret\n\
         node_directory=/var/lib/mckoi\n\
         network_nodelist=*\n",
    )
    .unwrap();
    let config2 = Config::load(&path2).unwrap();
    let err = mckoi::config::NetworkConfig::from_config(&config2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use relay::registry::{Connection, ConnectionId, Registry};

const THREADS: u64 = 8;
const PER_THREAD: u64 = 200;

fn connection(id: ConnectionId) -> Arc<Connection> {
    let peer = SocketAddr::from(([127, 0, 0, 1], (id % 60_000) as u16 + 1));
    Arc::new(Connection::new(id, peer, tokio::io::sink()))
}

#[test]
fn concurrent_add_and_remove_keep_exact_membership() {
    let registry = Arc::new(Registry::new());

    let workers: Vec<_> = (0..THREADS)
        .map(|thread_index| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let base = thread_index * 1_000;
                for id in base..base + PER_THREAD {
                    registry.add(connection(id));
                }
                for id in (base..base + PER_THREAD).filter(|id| id % 2 == 0) {
                    assert!(registry.remove(id).is_some(), "member {id} went missing");
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked");
    }

    let members: Vec<ConnectionId> = registry.snapshot().iter().map(|c| c.id()).collect();
    let unique: HashSet<ConnectionId> = members.iter().copied().collect();
    assert_eq!(unique.len(), members.len(), "a connection appears twice");

    let expected: HashSet<ConnectionId> = (0..THREADS)
        .flat_map(|t| (t * 1_000..t * 1_000 + PER_THREAD).filter(|id| id % 2 == 1))
        .collect();
    assert_eq!(unique, expected);
}

#[test]
fn snapshots_taken_during_churn_are_never_torn() {
    let registry = Arc::new(Registry::new());
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4u64)
        .map(|thread_index| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for round in 0..500u64 {
                    let id = thread_index * 1_000_000 + round;
                    registry.add(connection(id));
                    registry.remove(id);
                }
            })
        })
        .collect();

    let reader = {
        let registry = Arc::clone(&registry);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let snapshot = registry.snapshot();
                let unique: HashSet<_> = snapshot.iter().map(|c| c.id()).collect();
                assert_eq!(unique.len(), snapshot.len());
                assert!(snapshot.len() <= 4, "at most one member per writer at a time");
            }
        })
    };

    for writer in writers {
        writer.join().expect("writer panicked");
    }
    done.store(true, Ordering::Release);
    reader.join().expect("reader panicked");

    assert!(registry.is_empty());
}

#[test]
fn concurrent_duplicate_adds_register_once() {
    let registry = Arc::new(Registry::new());
    let shared = connection(77);

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let shared = Arc::clone(&shared);
            thread::spawn(move || registry.add(shared))
        })
        .collect();

    let added = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker panicked"))
        .filter(|added| *added)
        .count();

    assert_eq!(added, 1);
    assert_eq!(registry.len(), 1);
}

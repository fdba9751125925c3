use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use gilliam_scheduler::{
    clock::{Clock, SystemClock},
    lock::LeaderLock,
    store::{KvStore, MemoryKvStore},
};

fn store() -> Arc<MemoryKvStore> {
    Arc::new(MemoryKvStore::new(Arc::new(SystemClock) as Arc<dyn Clock>))
}

#[test]
fn exclusion_holds_across_threads() {
    let kv = store();

    let guard = LeaderLock::try_acquire(Arc::clone(&kv) as Arc<dyn KvStore>, "leader", "a")
        .unwrap()
        .expect("first acquire succeeds");

    let entered = Arc::new(AtomicBool::new(false));
    let entered_clone = Arc::clone(&entered);
    let kv_clone = Arc::clone(&kv);
    let contender = thread::spawn(move || {
        // Blocks until the holder releases.
        let guard =
            LeaderLock::acquire(kv_clone as Arc<dyn KvStore>, "leader", "b").expect("acquire");
        entered_clone.store(true, Ordering::SeqCst);
        drop(guard);
    });

    // The contender keeps retrying while we hold the slot.
    thread::sleep(Duration::from_millis(700));
    assert!(
        !entered.load(Ordering::SeqCst),
        "contender entered the critical section while the lock was held"
    );

    drop(guard);
    contender.join().expect("contender finishes");
    assert!(entered.load(Ordering::SeqCst));
}

#[test]
fn sequential_holders_hand_over_cleanly() {
    let kv = store();

    for holder in ["a", "b", "c"] {
        let guard =
            LeaderLock::acquire(Arc::clone(&kv) as Arc<dyn KvStore>, "leader", holder)
                .expect("acquire");
        assert!(guard.verify().is_ok());
        guard.release().expect("release");
    }

    assert_eq!(kv.get("locks/leader").unwrap(), None);
}

#[test]
fn distinct_lock_names_do_not_contend() {
    let kv = store();

    let leader = LeaderLock::try_acquire(Arc::clone(&kv) as Arc<dyn KvStore>, "leader", "a")
        .unwrap()
        .expect("leader slot free");
    let other = LeaderLock::try_acquire(Arc::clone(&kv) as Arc<dyn KvStore>, "migrator", "a")
        .unwrap()
        .expect("migrator slot free");

    assert!(leader.verify().is_ok());
    assert!(other.verify().is_ok());
}

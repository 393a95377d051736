use quiesce::{flush, pin, retire, Ordering};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::thread;

struct Counted {
    drops: Arc<AtomicUsize>,
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn retire_counted(drops: &Arc<AtomicUsize>) {
    let ptr = Box::into_raw(Box::new(Counted {
        drops: drops.clone(),
    }));
    unsafe { retire(ptr) };
}

#[test]
fn retire_frees_exactly_once() {
    let drops = Arc::new(AtomicUsize::new(0));

    for _ in 0..100 {
        let _guard = pin();
        retire_counted(&drops);
    }
    flush();
    assert_eq!(drops.load(Ordering::SeqCst), 100);

    // A second flush must not touch the already-freed batch.
    flush();
    assert_eq!(drops.load(Ordering::SeqCst), 100);
}

#[test]
fn batches_flush_without_explicit_help() {
    let drops = Arc::new(AtomicUsize::new(0));

    // Far more retires than any threshold; automatic flushes must kick in
    // well before the end.
    for _ in 0..4096 {
        retire_counted(&drops);
    }
    assert!(
        drops.load(Ordering::SeqCst) > 0,
        "expected threshold-driven flushes to free some nodes"
    );

    flush();
    assert_eq!(drops.load(Ordering::SeqCst), 4096);
}

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_retire() {
    let drops = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..8 {
        let drops = drops.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..500 {
                let _guard = pin();
                retire_counted(&drops);
            }
            // Drain this thread's remainder before it exits.
            flush();
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(drops.load(Ordering::SeqCst), 8 * 500);
}

#[test]
#[cfg_attr(miri, ignore)]
fn thread_exit_drains_batch() {
    let drops = Arc::new(AtomicUsize::new(0));

    {
        let drops = drops.clone();
        thread::spawn(move || {
            for _ in 0..10 {
                retire_counted(&drops);
            }
            // No explicit flush: the thread-local handle drains on exit.
        })
        .join()
        .unwrap();
    }

    assert_eq!(drops.load(Ordering::SeqCst), 10);
}

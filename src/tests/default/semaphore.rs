use crate::{
    Semaphore, SpinSemaphore, SyncSemaphore,
    tests::utils::{Arc, SharedCount, thread},
};

fn handoff(semaphore: impl Semaphore + Send + Sync + 'static) {
    let semaphore = Arc::new(semaphore);
    let data = Arc::new(SharedCount::new());

    let releaser = semaphore.clone();
    let writer = data.clone();
    let worker = thread::spawn(move || {
        writer.bump();
        releaser.release();
    });

    semaphore.wait();
    assert_eq!(data.get(), 1);
    worker.join().unwrap();
}

#[cfg_attr(not(loom), test)]
pub fn test_spin_semaphore_handoff() {
    handoff(SpinSemaphore::new());
}

#[cfg_attr(not(loom), test)]
pub fn test_sync_semaphore_handoff() {
    handoff(SyncSemaphore::new());
}

#[cfg_attr(not(loom), test)]
pub fn test_semaphore_release_before_wait() {
    let semaphore = SyncSemaphore::new();
    semaphore.release();
    semaphore.wait();
}

#[cfg(not(loom))]
#[test]
fn test_park_semaphore_handoff() {
    use crate::ParkSemaphore;

    let semaphore = Arc::new(ParkSemaphore::new());
    let data = Arc::new(SharedCount::new());
    let releaser = semaphore.clone();
    let writer = data.clone();
    let worker = thread::spawn(move || {
        writer.bump();
        releaser.release();
    });
    semaphore.wait();
    assert_eq!(data.get(), 1);
    worker.join().unwrap();
}

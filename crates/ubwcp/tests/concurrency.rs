mod common;

use std::sync::Arc;
use std::thread;

use common::{nv12_small, rig};
use pretty_assertions::assert_eq;
use ubwcp::{BufferHandle, Direction, UbwcpError};

#[test]
fn independent_surfaces_lock_in_parallel() {
    let rig = Arc::new(rig());
    let handles: Vec<BufferHandle> = (0..8).map(|id| rig.surface_with_len(id, 1 << 20)).collect();

    let workers: Vec<_> = handles
        .iter()
        .copied()
        .map(|handle| {
            let rig = Arc::clone(&rig);
            thread::spawn(move || {
                rig.driver.set_attributes(handle, &nv12_small()).unwrap();
                for _ in 0..50 {
                    rig.driver.lock(handle, Direction::Read).unwrap();
                    rig.driver.lock(handle, Direction::Read).unwrap();
                    rig.driver.unlock(handle, Direction::Read).unwrap();
                    rig.driver.unlock(handle, Direction::Read).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(rig.driver.descriptors_in_use(), 0);
    assert!(rig.hw.enabled_windows().is_empty());
    let stats = rig.driver.stats();
    assert_eq!(stats.locks, 8 * 100);
    assert_eq!(stats.unlocks, 8 * 100);

    let mut bases: Vec<u64> = rig
        .driver
        .ula_reservations()
        .into_iter()
        .map(|(base, _)| base)
        .collect();
    bases.dedup();
    assert_eq!(bases.len(), 8);
}

#[test]
fn racing_set_and_lock_on_one_surface_stay_consistent() {
    let rig = Arc::new(rig());
    let handle = rig.surface(1);
    rig.driver.set_attributes(handle, &nv12_small()).unwrap();

    let setter = {
        let rig = Arc::clone(&rig);
        thread::spawn(move || {
            for _ in 0..200 {
                match rig.driver.set_attributes(handle, &nv12_small()) {
                    Ok(()) | Err(UbwcpError::Busy) => {}
                    Err(err) => panic!("unexpected error {err}"),
                }
            }
        })
    };
    let locker = {
        let rig = Arc::clone(&rig);
        thread::spawn(move || {
            for _ in 0..200 {
                rig.driver.lock(handle, Direction::Write).unwrap();
                rig.driver.unlock(handle, Direction::Write).unwrap();
            }
        })
    };
    setter.join().unwrap();
    locker.join().unwrap();

    let info = rig.driver.surface_info(handle).unwrap();
    assert!(info.attrs_set());
    assert!(!info.is_locked());
    assert_eq!(rig.driver.descriptors_in_use(), 0);
}

#[test]
fn creates_and_frees_from_many_threads_balance_hotplug() {
    let rig = Arc::new(rig());
    let workers: Vec<_> = (0..4u64)
        .map(|t| {
            let rig = Arc::clone(&rig);
            thread::spawn(move || {
                for i in 0..25 {
                    let handle = rig.surface_with_len(t * 100 + i, 1 << 20);
                    rig.driver.set_attributes(handle, &nv12_small()).unwrap();
                    rig.driver.lock(handle, Direction::Write).unwrap();
                    rig.driver.free(handle).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(rig.driver.surface_count(), 0);
    assert!(!rig.driver.ula_online());
    assert_eq!(rig.hotplug.online_count(), rig.hotplug.offline_count());
    assert!(!rig.hotplug.is_online());
    assert!(rig.driver.ula_reservations().is_empty());
}

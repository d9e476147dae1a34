//! Concurrent descriptors on one device.
//!
//! Every read and write holds the device lock for the whole call, so a
//! reader never sees a mix of two writes and the line always matches the
//! buffer's first byte once writers are done.

use std::sync::Arc;
use std::thread;

use gpio_chardev::host::sim::SimHost;
use gpio_chardev::{DriverConfig, GpioDriver, Level};

const LINE: u32 = 533;
const CAPACITY: usize = 1024;
const WRITERS: u8 = 4;
const ROUNDS: usize = 200;

/// Full-capacity payload: command byte then one tag byte repeated.
fn payload(tag: u8) -> Vec<u8> {
    let command = if tag % 2 == 0 { b'0' } else { b'1' };
    let mut data = vec![tag; CAPACITY];
    data[0] = command;
    data
}

fn assert_untorn(data: &[u8]) {
    let tag = data[1];
    assert!(
        data[1..].iter().all(|&b| b == tag),
        "torn buffer: tag {tag} mixed with others"
    );
    if tag != 0 {
        assert_eq!(data, payload(tag).as_slice());
    }
}

#[test]
fn test_concurrent_writers_and_readers_see_whole_writes() {
    let host = SimHost::new();
    let driver = GpioDriver::load(Arc::new(host.clone()), &DriverConfig::default()).unwrap();

    thread::scope(|s| {
        for tag in 1..=WRITERS {
            let host = host.clone();
            s.spawn(move || {
                let mut file = host.open("/dev/gpio_device").unwrap();
                let data = payload(b'A' + tag);
                for _ in 0..ROUNDS {
                    assert_eq!(file.write_all(&data).unwrap(), CAPACITY);
                }
            });
        }
        for _ in 0..2 {
            let host = host.clone();
            s.spawn(move || {
                let mut file = host.open("/dev/gpio_device").unwrap();
                let mut out = vec![0u8; CAPACITY];
                for _ in 0..ROUNDS {
                    assert_eq!(file.read_into(&mut out).unwrap(), CAPACITY);
                    assert_untorn(&out);
                }
            });
        }
    });

    let mut file = host.open("/dev/gpio_device").unwrap();
    let mut out = vec![0u8; CAPACITY];
    file.read_into(&mut out).unwrap();
    assert_untorn(&out);
    assert_eq!(host.pin_level(LINE), Level::from_command(out[0]));
    drop(file);

    assert_eq!(driver.device().open_count(), 0);
    driver.unload();
    assert!(host.snapshot().is_clean());
}

#[test]
fn test_open_and_release_from_many_threads() {
    let host = SimHost::new();
    let driver = GpioDriver::load(Arc::new(host.clone()), &DriverConfig::default()).unwrap();

    thread::scope(|s| {
        for _ in 0..8 {
            let host = host.clone();
            s.spawn(move || {
                for _ in 0..50 {
                    let mut file = host.open("/dev/gpio_device").unwrap();
                    file.write_all(b"1").unwrap();
                    file.release().unwrap();
                }
            });
        }
    });

    assert_eq!(driver.device().open_count(), 0);
    assert_eq!(host.pin_level(LINE), Some(Level::High));
    driver.unload();
    assert_eq!(host.pin_level(LINE), Some(Level::Low));
}

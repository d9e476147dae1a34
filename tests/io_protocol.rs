//! Read/write protocol through an open device node.

use std::sync::Arc;

use gpio_chardev::host::sim::{PinEvent, SimHost};
use gpio_chardev::uaccess::{UserSlice, UserSliceMut};
use gpio_chardev::{DriverConfig, DriverError, Errno, FileHandle, GpioDriver, Level};

const LINE: u32 = 533;

struct Fixture {
    host: SimHost,
    driver: Option<GpioDriver>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(DriverConfig::default())
    }

    fn with_config(config: DriverConfig) -> Self {
        let host = SimHost::new();
        let driver = GpioDriver::load(Arc::new(host.clone()), &config).unwrap();
        Self {
            host,
            driver: Some(driver),
        }
    }

    fn open(&self) -> FileHandle {
        self.host.open("/dev/gpio_device").unwrap()
    }

    fn read_all(&self, file: &mut FileHandle) -> Vec<u8> {
        let mut out = vec![0u8; 1024];
        let n = file.read_into(&mut out).unwrap();
        out.truncate(n);
        out
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.unload();
        }
    }
}

#[test]
fn test_write_overwrites_prefix_only() {
    let fx = Fixture::new();
    let mut file = fx.open();

    file.write_all(b"xxxxxxxx").unwrap();
    file.write_all(b"1ab").unwrap();

    let data = fx.read_all(&mut file);
    assert_eq!(data.len(), 1024);
    assert_eq!(&data[..8], b"1abxxxxx");
    assert!(data[8..].iter().all(|&b| b == 0));
}

#[test]
fn test_full_capacity_write_is_accepted() {
    let fx = Fixture::new();
    let mut file = fx.open();
    let payload: Vec<u8> = std::iter::once(b'1')
        .chain((1..1024).map(|i| (i % 251) as u8))
        .collect();

    assert_eq!(file.write_all(&payload).unwrap(), 1024);
    assert_eq!(fx.read_all(&mut file), payload);
    assert_eq!(fx.host.pin_level(LINE), Some(Level::High));
}

#[test]
fn test_oversized_write_is_rejected_without_effect() {
    let fx = Fixture::new();
    let mut file = fx.open();
    file.write_all(b"0keep").unwrap();

    let err = file.write_all(&[b'1'; 1025]).unwrap_err();
    assert!(matches!(
        err,
        DriverError::WriteTooLarge {
            len: 1025,
            capacity: 1024
        }
    ));
    assert_eq!(err.errno(), Errno::EFBIG);
    assert_eq!(&fx.read_all(&mut file)[..5], b"0keep");
    assert_eq!(fx.host.pin_level(LINE), Some(Level::Low));
}

#[test]
fn test_command_bytes_drive_the_line() {
    let fx = Fixture::new();
    let mut file = fx.open();

    file.write_all(b"1").unwrap();
    assert_eq!(fx.host.pin_level(LINE), Some(Level::High));
    file.write_all(b"0").unwrap();
    assert_eq!(fx.host.pin_level(LINE), Some(Level::Low));
    file.write_all(b"1 trailing data").unwrap();
    assert_eq!(fx.host.pin_level(LINE), Some(Level::High));
}

#[test]
fn test_other_leading_byte_leaves_line_unchanged() {
    let fx = Fixture::new();
    let mut file = fx.open();
    file.write_all(b"1").unwrap();

    for payload in [&b"2"[..], b"a1", b"\n", b" 0"] {
        assert_eq!(file.write_all(payload).unwrap(), payload.len());
        assert_eq!(fx.host.pin_level(LINE), Some(Level::High));
    }

    let sets = fx
        .host
        .pin_events(LINE)
        .into_iter()
        .filter(|e| matches!(e, PinEvent::Set(_)))
        .count();
    assert_eq!(sets, 1);
}

#[test]
fn test_read_ignores_requested_length() {
    let fx = Fixture::new();
    let mut file = fx.open();
    file.write_all(b"0abc").unwrap();

    let mut out = vec![0u8; 1024];
    let n = file.read(&mut UserSliceMut::new(&mut out), 1).unwrap();
    assert_eq!(n, 1024);
    assert_eq!(&out[..4], b"0abc");
}

#[test]
fn test_short_destination_is_a_copy_fault() {
    let fx = Fixture::new();
    let mut file = fx.open();
    file.write_all(b"1").unwrap();

    let mut small = [0xAAu8; 16];
    let err = file.read_into(&mut small).unwrap_err();
    assert!(err.is_copy_fault());
    assert_eq!(err.status(), -14);
    assert_eq!(small, [0xAAu8; 16]);

    // The driver is unaffected.
    assert_eq!(fx.read_all(&mut file)[0], b'1');
}

#[test]
fn test_unmapped_source_is_a_copy_fault() {
    let fx = Fixture::new();
    let mut file = fx.open();
    file.write_all(b"1xyz").unwrap();

    let err = file.write(&UserSlice::unmapped(), 4).unwrap_err();
    assert!(err.is_copy_fault());
    assert_eq!(&fx.read_all(&mut file)[..4], b"1xyz");
    assert_eq!(fx.host.pin_level(LINE), Some(Level::High));
}

#[test]
fn test_source_shorter_than_length_is_a_copy_fault() {
    let fx = Fixture::new();
    let mut file = fx.open();

    let err = file.write(&UserSlice::new(b"1a"), 8).unwrap_err();
    assert!(matches!(
        err,
        DriverError::CopyFault {
            len: 8,
            accessible: 2
        }
    ));
    assert_eq!(fx.host.pin_level(LINE), Some(Level::Low));
}

#[test]
fn test_zero_length_write() {
    let fx = Fixture::new();
    let mut file = fx.open();
    file.write_all(b"1").unwrap();

    assert_eq!(file.write_all(b"").unwrap(), 0);
    assert_eq!(file.write(&UserSlice::unmapped(), 0).unwrap(), 0);
    assert_eq!(fx.host.pin_level(LINE), Some(Level::High));
}

#[test]
fn test_descriptors_share_one_buffer() {
    let fx = Fixture::new();
    let mut writer = fx.open();
    let mut reader = fx.open();
    assert_ne!(writer.context(), reader.context());

    writer.write_all(b"1shared").unwrap();
    assert_eq!(&fx.read_all(&mut reader)[..7], b"1shared");
    assert_eq!(fx.driver.as_ref().unwrap().device().open_count(), 2);
}

#[test]
fn test_released_descriptor_is_refused() {
    let fx = Fixture::new();
    let mut file = fx.open();
    file.release().unwrap();

    assert!(matches!(file.write_all(b"1"), Err(DriverError::FileNotOpen)));
    assert_eq!(fx.host.pin_level(LINE), Some(Level::Low));
    assert_eq!(fx.driver.as_ref().unwrap().device().open_count(), 0);
}

#[test]
fn test_custom_buffer_size() {
    let fx = Fixture::with_config(DriverConfig {
        buffer_size: 8,
        ..DriverConfig::default()
    });
    let mut file = fx.open();

    assert!(file.write_all(b"123456789").is_err());
    file.write_all(b"12345678").unwrap();
    let mut out = [0u8; 8];
    assert_eq!(file.read_into(&mut out).unwrap(), 8);
    assert_eq!(&out, b"12345678");
}

//! Layered configuration loading: defaults, TOML file, environment.

use std::env;
use std::io::Write;

use gpio_chardev::config::{DriverConfig, ENV_PREFIX};
use gpio_chardev::identity::DeviceNumbering;
use serial_test::serial;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn clear_env() {
    for (key, _) in env::vars() {
        if key.starts_with(ENV_PREFIX) {
            env::remove_var(key);
        }
    }
}

#[test]
#[serial]
fn test_missing_file_gives_defaults() {
    clear_env();
    let config = DriverConfig::load_from("/nonexistent/gpio_chardev.toml").unwrap();
    assert_eq!(config, DriverConfig::default());
}

#[test]
#[serial]
fn test_file_overrides_defaults() {
    clear_env();
    let file = write_config(
        r#"
device_name = "gpio_test"
buffer_size = 64

[numbering]
mode = "static"

[gpio]
pin = 17
"#,
    );

    let config = DriverConfig::load_from(file.path()).unwrap();
    assert_eq!(config.device_name, "gpio_test");
    assert_eq!(config.buffer_size, 64);
    assert_eq!(config.numbering, DeviceNumbering::Static { major: 255, minor: 0 });
    assert_eq!(config.gpio.pin, 17);
    assert_eq!(config.gpio.offset, 512);
    assert_eq!(config.class_name, "new_class");
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let file = write_config("log_level = \"warn\"\n[gpio]\npin = 17\n");

    env::set_var("GPIO_CHARDEV_GPIO__PIN", "4");
    env::set_var("GPIO_CHARDEV_LOG_LEVEL", "debug");
    let config = DriverConfig::load_from(file.path());
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.gpio.pin, 4);
    assert_eq!(config.gpio.line(), 516);
    assert_eq!(config.log_level, "debug");
}

#[test]
#[serial]
fn test_malformed_file_is_an_error() {
    clear_env();
    let file = write_config("buffer_size = \"large\"\n");
    assert!(DriverConfig::load_from(file.path()).is_err());
}

#[test]
#[serial]
fn test_loaded_but_invalid_is_rejected_by_validate() {
    clear_env();
    let file = write_config("device_name = \"\"\n");
    let config = DriverConfig::load_from(file.path()).unwrap();

    let err = config.validate().unwrap_err();
    assert_eq!(err.status(), -22);
    assert!(err.to_string().contains("device_name"));
}

#[test]
#[serial]
fn test_rendered_config_loads_back() {
    clear_env();
    let original = DriverConfig {
        device_name: "gpio_rt".to_string(),
        numbering: DeviceNumbering::Static { major: 240, minor: 3 },
        ..DriverConfig::default()
    };
    let file = write_config(&original.to_toml().unwrap());

    let loaded = DriverConfig::load_from(file.path()).unwrap();
    assert_eq!(loaded, original);
}

//! Tests for configuration loading

use std::collections::HashMap;
use std::io::Write;
use std::net::Ipv4Addr;

use rendezvous_core::config::{keys, parse_flag, AttachConfig, DEFAULT_BUS_PORT};
use rendezvous_core::signal::Signal;
use serial_test::serial;
use tempfile::NamedTempFile;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String>
{
    let mut map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    // Keep the machine's real bus file out of the picture unless a test sets one.
    map.entry(keys::BUS_FILE.to_string())
        .or_insert_with(|| "/nonexistent/rendezvous/bus".to_string());
    move |key: &str| map.get(key).cloned()
}

#[test]
fn test_flag_false_spellings()
{
    for raw in ["false", "FALSE", "False", "0", "no", "NO", "No", " no "] {
        assert!(!parse_flag(Some(raw), true), "{raw:?}");
    }
}

#[test]
fn test_flag_other_values_are_true()
{
    for raw in ["true", "1", "yes", "on", "nope", "off", ""] {
        assert!(parse_flag(Some(raw), false), "{raw:?}");
    }
}

#[test]
fn test_flag_absent_takes_default()
{
    assert!(parse_flag(None, true));
    assert!(!parse_flag(None, false));
}

#[test]
fn test_defaults()
{
    let config = AttachConfig::from_lookup(lookup_from(&[]));
    assert_eq!(config.ip, None);
    assert_eq!(config.tag, "proc");
    assert_eq!(config.alias, "bin");
    assert!(config.bus.is_none());
    assert!(config.auto_discovery);
    assert!(config.wait_for_attach);
    assert_eq!(config.signal, Signal::SIGUSR1);
}

#[test]
fn test_full_environment()
{
    let config = AttachConfig::from_lookup(lookup_from(&[
        (keys::IP, "192.168.1.20"),
        (keys::TAG, "worker"),
        (keys::ALIAS, "api"),
        (keys::BUS_ENDPOINT, "tcp://broker.local:10101"),
        (keys::BUS_CHANNEL, "debug/discovery"),
        (keys::BUS_USER, "dbg"),
        (keys::BUS_PASSWORD, "secret"),
        (keys::AUTO_DISCOVERY, "yes"),
        (keys::WAIT_FOR_ATTACH, "0"),
        (keys::SIGNAL, "usr2"),
    ]));

    assert_eq!(config.ip, Some(Ipv4Addr::new(192, 168, 1, 20)));
    assert_eq!(config.tag, "worker");
    assert_eq!(config.alias, "api");
    assert!(config.auto_discovery);
    assert!(!config.wait_for_attach);
    assert_eq!(config.signal, Signal::SIGUSR2);

    let bus = config.bus.as_ref().unwrap();
    assert_eq!(bus.endpoint.host, "broker.local");
    assert_eq!(bus.endpoint.port, 10101);
    assert_eq!(bus.channel, "debug/discovery");
    let creds = bus.credentials.as_ref().unwrap();
    assert_eq!(creds.user, "dbg");
    assert_eq!(creds.password, "secret");

    assert!(!format!("{config:?}").contains("secret"));
}

#[test]
fn test_invalid_ip_falls_back_to_detection()
{
    let config = AttachConfig::from_lookup(lookup_from(&[(keys::IP, "not-an-ip")]));
    assert_eq!(config.ip, None);

    let config = AttachConfig::from_lookup(lookup_from(&[(keys::IP, "::1")]));
    assert_eq!(config.ip, None);
}

#[test]
fn test_endpoint_without_channel_disables_bus()
{
    let config = AttachConfig::from_lookup(lookup_from(&[(keys::BUS_ENDPOINT, "broker:1883")]));
    assert!(config.bus.is_none());
}

#[test]
fn test_unparsable_endpoint_disables_bus()
{
    let config = AttachConfig::from_lookup(lookup_from(&[
        (keys::BUS_ENDPOINT, "ws://broker:80"),
        (keys::BUS_CHANNEL, "debug/discovery"),
    ]));
    assert!(config.bus.is_none());
}

#[test]
fn test_bus_file_fills_missing_values()
{
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "10.9.8.7:2883").unwrap();
    writeln!(file, "ddb/discovery").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let config = AttachConfig::from_lookup(lookup_from(&[(keys::BUS_FILE, path.as_str())]));
    let bus = config.bus.unwrap();
    assert_eq!(bus.endpoint.host, "10.9.8.7");
    assert_eq!(bus.endpoint.port, 2883);
    assert_eq!(bus.channel, "ddb/discovery");
    assert!(bus.credentials.is_none());
}

#[test]
fn test_environment_wins_over_bus_file()
{
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "file-broker").unwrap();
    writeln!(file, "file/channel").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let config = AttachConfig::from_lookup(lookup_from(&[
        (keys::BUS_FILE, path.as_str()),
        (keys::BUS_CHANNEL, "env/channel"),
    ]));
    let bus = config.bus.unwrap();
    assert_eq!(bus.endpoint.host, "file-broker");
    assert_eq!(bus.endpoint.port, DEFAULT_BUS_PORT);
    assert_eq!(bus.channel, "env/channel");
}

#[test]
fn test_short_bus_file_is_ignored()
{
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "only-an-endpoint").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let config = AttachConfig::from_lookup(lookup_from(&[(keys::BUS_FILE, path.as_str())]));
    assert!(config.bus.is_none());
}

#[test]
#[serial]
fn test_from_env_reads_process_environment()
{
    let vars = [
        (keys::TAG, "env-tag"),
        (keys::SIGNAL, "15"),
        (keys::AUTO_DISCOVERY, "no"),
        (keys::BUS_FILE, "/nonexistent/rendezvous/bus"),
    ];
    for (key, value) in vars {
        std::env::set_var(key, value);
    }

    let config = AttachConfig::from_env();

    for (key, _) in vars {
        std::env::remove_var(key);
    }

    assert_eq!(config.tag, "env-tag");
    assert_eq!(config.signal, Signal::from_raw(15));
    assert!(!config.auto_discovery);
}

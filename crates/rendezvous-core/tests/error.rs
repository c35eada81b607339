//! Tests for error handling

use rendezvous_core::signal::Signal;
use rendezvous_core::RendezvousError;

#[test]
fn test_configuration_display()
{
    let err = RendezvousError::Configuration {
        key: "RENDEZVOUS_SIGNAL".to_string(),
        reason: "unknown signal \"bogus\"".to_string(),
    };
    let message = err.to_string();
    assert!(message.contains("RENDEZVOUS_SIGNAL"));
    assert!(message.contains("bogus"));
}

#[test]
fn test_signal_display_names_the_signal()
{
    let err = RendezvousError::Signal {
        signal: Signal::SIGKILL,
        reason: "cannot be caught".to_string(),
    };
    let message = err.to_string();
    assert!(message.contains("SIGKILL"));
    assert!(message.contains("cannot be caught"));
}

#[test]
fn test_already_armed_display()
{
    let message = RendezvousError::AlreadyArmed(Signal::SIGUSR1).to_string();
    assert!(message.contains("already armed"));
    assert!(message.contains("SIGUSR1"));
}

#[test]
fn test_io_error_conversion()
{
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: RendezvousError = io.into();
    match err {
        RendezvousError::Io(inner) => assert_eq!(inner.kind(), std::io::ErrorKind::NotFound),
        other => panic!("Expected Io variant, got {other:?}"),
    }
}

#[test]
fn test_connection_display()
{
    let message = RendezvousError::Connection("broker:1883: refused".to_string()).to_string();
    assert_eq!(message, "Bus connection failed: broker:1883: refused");
}

//! Integration tests for console shell command parsing.

use oab_kiosk_app::{CommandError, ConsoleCommand};
use oab_kiosk_core::Credentials;

#[test]
fn console_command_tests_parses_every_verb() {
    assert_eq!(
        ConsoleCommand::parse("config 3 9"),
        Ok(ConsoleCommand::Config {
            station_id: 3,
            supervisor_id: 9
        })
    );
    assert_eq!(
        ConsoleCommand::parse("login 123456 4321"),
        Ok(ConsoleCommand::Login(Credentials::new("123456", "4321")))
    );
    assert_eq!(ConsoleCommand::parse("LOGOUT"), Ok(ConsoleCommand::Logout));
    assert_eq!(ConsoleCommand::parse("  status"), Ok(ConsoleCommand::Status));
    assert_eq!(ConsoleCommand::parse("help"), Ok(ConsoleCommand::Help));
}

#[test]
fn console_command_tests_exit_keeps_password_spaces() {
    assert_eq!(
        ConsoleCommand::parse("exit two words "),
        Ok(ConsoleCommand::Exit("two words ".to_string()))
    );
    assert_eq!(
        ConsoleCommand::parse("exit"),
        Ok(ConsoleCommand::Exit(String::new()))
    );
}

#[test]
fn console_command_tests_rejects_bad_input() {
    assert_eq!(
        ConsoleCommand::parse("reboot"),
        Err(CommandError::Unknown("reboot".to_string()))
    );
    assert_eq!(
        ConsoleCommand::parse("login 123456"),
        Err(CommandError::Usage("login".to_string()))
    );
    assert_eq!(
        ConsoleCommand::parse("config three 9"),
        Err(CommandError::InvalidNumber {
            field: "station",
            raw: "three".to_string()
        })
    );
}

//! Interactive input for the credential and two-factor phase.

use std::io::{self, BufRead, Write};

use crate::icloud::TrustedDevice;

/// Source of the answers the login flow needs from a person.
///
/// Calls block; implementations that touch the terminal must not stall the
/// async runtime.
pub trait Prompter: Send {
    fn password(&mut self, account: &str) -> io::Result<String>;

    /// Raw answer to "which device?". An empty answer selects the first
    /// device.
    fn choose_device(&mut self, devices: &[TrustedDevice]) -> io::Result<String>;

    fn verification_code(&mut self, device: &TrustedDevice) -> io::Result<String>;
}

/// Reads from the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_line(prompt: &str) -> io::Result<String> {
        tokio::task::block_in_place(|| {
            print!("{prompt}");
            io::stdout().flush()?;
            let mut line = String::new();
            if io::stdin().lock().read_line(&mut line)? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stdin closed before an answer was given",
                ));
            }
            Ok(line.trim().to_string())
        })
    }
}

impl Prompter for TerminalPrompter {
    fn password(&mut self, account: &str) -> io::Result<String> {
        tokio::task::block_in_place(|| {
            rpassword::prompt_password(format!("iCloud Password for {account}: "))
        })
    }

    fn choose_device(&mut self, devices: &[TrustedDevice]) -> io::Result<String> {
        println!("Two-factor authentication required. Your trusted devices are:");
        for device in devices {
            println!("  {device}");
        }
        Self::read_line("Which device would you like to use? [0]: ")
    }

    fn verification_code(&mut self, device: &TrustedDevice) -> io::Result<String> {
        Self::read_line(&format!(
            "Please enter the validation code sent to {}: ",
            device.display_name
        ))
    }
}

/// Answers queued up front; running out is an `UnexpectedEof`.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ScriptedPrompter {
    pub password: Option<String>,
    pub device_choices: std::collections::VecDeque<String>,
    pub codes: std::collections::VecDeque<String>,
    pub device_prompts: usize,
    pub code_prompts: usize,
}

#[cfg(test)]
impl ScriptedPrompter {
    pub fn new(device_choices: &[&str], codes: &[&str]) -> Self {
        Self {
            device_choices: device_choices.iter().map(|s| s.to_string()).collect(),
            codes: codes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn exhausted() -> io::Error {
        io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted answer left")
    }
}

#[cfg(test)]
impl Prompter for ScriptedPrompter {
    fn password(&mut self, _account: &str) -> io::Result<String> {
        self.password.take().ok_or_else(Self::exhausted)
    }

    fn choose_device(&mut self, _devices: &[TrustedDevice]) -> io::Result<String> {
        self.device_prompts += 1;
        self.device_choices.pop_front().ok_or_else(Self::exhausted)
    }

    fn verification_code(&mut self, _device: &TrustedDevice) -> io::Result<String> {
        self.code_prompts += 1;
        self.codes.pop_front().ok_or_else(Self::exhausted)
    }
}

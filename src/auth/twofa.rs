//! Two-step verification: choose a trusted device, have a code sent to it,
//! validate the code the user types.
//!
//! ```text
//! AwaitingDeviceChoice --send ok--> AwaitingCode --code ok--> Verified
//!          |                             |
//!          +------- any failure ---------+--------> Failed
//! ```
//!
//! Codes are single-use, so nothing here retries against the service. Only
//! an out-of-range device number is re-prompted, because no remote call has
//! happened yet.

use super::error::AuthError;
use super::prompt::Prompter;
use super::Session;
use crate::icloud::{RemoteService, TrustedDevice};

const MAX_SELECTION_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum TwoFactorState {
    AwaitingDeviceChoice { devices: Vec<TrustedDevice> },
    AwaitingCode { device: TrustedDevice },
    Verified,
    Failed,
}

impl TwoFactorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TwoFactorState::Verified | TwoFactorState::Failed)
    }
}

pub struct TwoFactorNegotiator<'a> {
    service: &'a dyn RemoteService,
    prompter: &'a mut dyn Prompter,
    state: TwoFactorState,
}

impl<'a> TwoFactorNegotiator<'a> {
    /// Enumerate the trusted devices and wait for a choice.
    pub async fn start(
        service: &'a dyn RemoteService,
        prompter: &'a mut dyn Prompter,
    ) -> Result<TwoFactorNegotiator<'a>, AuthError> {
        let devices = service.trusted_devices().await?;
        if devices.is_empty() {
            return Err(AuthError::NoTrustedDevices);
        }
        tracing::debug!(count = devices.len(), "Trusted devices listed");
        Ok(Self {
            service,
            prompter,
            state: TwoFactorState::AwaitingDeviceChoice { devices },
        })
    }

    pub fn state(&self) -> &TwoFactorState {
        &self.state
    }

    /// Perform one transition. Any error leaves the negotiator `Failed`;
    /// stepping a terminal state does nothing.
    pub async fn step(&mut self) -> Result<(), AuthError> {
        let current = std::mem::replace(&mut self.state, TwoFactorState::Failed);
        self.state = match current {
            TwoFactorState::AwaitingDeviceChoice { devices } => {
                let device = self.choose_device(&devices)?;
                self.dispatch_code(&device).await?;
                TwoFactorState::AwaitingCode { device }
            }
            TwoFactorState::AwaitingCode { device } => {
                self.verify_code(&device).await?;
                TwoFactorState::Verified
            }
            terminal => terminal,
        };
        Ok(())
    }

    /// Drive the negotiation to a terminal state and promote `session` on
    /// success.
    pub async fn run(mut self, session: &mut Session) -> Result<(), AuthError> {
        while !self.state.is_terminal() {
            self.step().await?;
        }
        if self.state == TwoFactorState::Verified {
            session.promote();
            Ok(())
        } else {
            Err(AuthError::NotAuthenticated)
        }
    }

    fn choose_device(&mut self, devices: &[TrustedDevice]) -> Result<TrustedDevice, AuthError> {
        let mut attempt = 1;
        loop {
            let answer = self.prompter.choose_device(devices)?;
            match select_device(&answer, devices) {
                Ok(device) => return Ok(device.clone()),
                Err(e) if attempt < MAX_SELECTION_ATTEMPTS => {
                    tracing::warn!("{}", e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn dispatch_code(&mut self, device: &TrustedDevice) -> Result<(), AuthError> {
        let sent = self.service.send_verification_code(device).await?;
        if !sent {
            return Err(AuthError::CodeDispatch {
                device: device.display_name.clone(),
                reason: "the service declined to send a code".into(),
            });
        }
        tracing::info!("Verification code sent to {}", device.display_name);
        Ok(())
    }

    async fn verify_code(&mut self, device: &TrustedDevice) -> Result<(), AuthError> {
        let code = self.prompter.verification_code(device)?;
        let code = code.trim();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(AuthError::CodeValidation {
                reason: "the code must consist of digits only".into(),
            });
        }
        if !self.service.validate_verification_code(device, code).await? {
            return Err(AuthError::CodeValidation {
                reason: "the service did not accept the code".into(),
            });
        }
        tracing::debug!("Verification code accepted");
        Ok(())
    }
}

/// Map the user's answer to a device. Empty selects the first one.
pub fn select_device<'d>(
    input: &str,
    devices: &'d [TrustedDevice],
) -> Result<&'d TrustedDevice, AuthError> {
    let trimmed = input.trim();
    let index = if trimmed.is_empty() {
        0
    } else {
        trimmed.parse::<usize>().map_err(|_| AuthError::InvalidSelection {
            input: trimmed.to_string(),
            available: devices.len(),
        })?
    };
    devices.get(index).ok_or_else(|| AuthError::InvalidSelection {
        input: trimmed.to_string(),
        available: devices.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::prompt::ScriptedPrompter;
    use crate::auth::SessionState;
    use crate::icloud::fake::{device, FakeService};

    fn two_devices() -> Vec<TrustedDevice> {
        vec![
            device(0, Some("iPhone"), None),
            device(1, None, Some("********34")),
        ]
    }

    fn pending() -> Session {
        Session::new("user@example.com", SessionState::PendingChallenge)
    }

    #[test]
    fn test_select_device_default_and_bounds() {
        let devices = two_devices();
        assert_eq!(select_device("", &devices).unwrap().index, 0);
        assert_eq!(select_device(" 1\n", &devices).unwrap().index, 1);
        assert!(matches!(
            select_device("2", &devices),
            Err(AuthError::InvalidSelection { available: 2, .. })
        ));
        assert!(matches!(
            select_device("-1", &devices),
            Err(AuthError::InvalidSelection { .. })
        ));
        assert!(matches!(
            select_device("phone", &devices),
            Err(AuthError::InvalidSelection { .. })
        ));
    }

    #[test]
    fn test_invalid_selection_message() {
        let err = select_device("7", &two_devices()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid device selection \"7\": choose a number between 0 and 1"
        );
    }

    #[tokio::test]
    async fn test_full_flow_verifies_and_promotes() {
        let service = FakeService::challenged(two_devices());
        let mut prompter = ScriptedPrompter::new(&["1"], &["123456"]);
        let mut session = pending();

        let negotiator = TwoFactorNegotiator::start(&service, &mut prompter)
            .await
            .unwrap();
        negotiator.run(&mut session).await.unwrap();

        assert!(session.is_authenticated());
        assert_eq!(
            service.calls(),
            vec!["trusted_devices", "send_code:1", "validate_code:1:123456"]
        );
    }

    #[tokio::test]
    async fn test_step_walks_through_states() {
        let service = FakeService::challenged(two_devices());
        let mut prompter = ScriptedPrompter::new(&[""], &["123456"]);
        let mut negotiator = TwoFactorNegotiator::start(&service, &mut prompter)
            .await
            .unwrap();
        assert!(matches!(
            negotiator.state(),
            TwoFactorState::AwaitingDeviceChoice { devices } if devices.len() == 2
        ));

        negotiator.step().await.unwrap();
        assert!(matches!(
            negotiator.state(),
            TwoFactorState::AwaitingCode { device } if device.index == 0
        ));

        negotiator.step().await.unwrap();
        assert_eq!(negotiator.state(), &TwoFactorState::Verified);

        negotiator.step().await.unwrap();
        assert_eq!(negotiator.state(), &TwoFactorState::Verified);
    }

    #[tokio::test]
    async fn test_dispatch_failure_ends_without_code_prompt() {
        let mut service = FakeService::challenged(two_devices());
        service.dispatch_succeeds = false;
        let mut prompter = ScriptedPrompter::new(&["1"], &["123456"]);
        let mut session = pending();

        let result = TwoFactorNegotiator::start(&service, &mut prompter)
            .await
            .unwrap()
            .run(&mut session)
            .await;

        match result {
            Err(AuthError::CodeDispatch { device, .. }) => assert_eq!(device, "SMS to ********34"),
            other => panic!("expected CodeDispatch, got {:?}", other.err()),
        }
        assert_eq!(prompter.code_prompts, 0);
        assert!(!session.is_authenticated());
        assert!(!service.calls().iter().any(|c| c.starts_with("validate_code")));
    }

    #[tokio::test]
    async fn test_failed_step_leaves_failed_state() {
        let mut service = FakeService::challenged(two_devices());
        service.dispatch_succeeds = false;
        let mut prompter = ScriptedPrompter::new(&["0"], &[]);
        let mut negotiator = TwoFactorNegotiator::start(&service, &mut prompter)
            .await
            .unwrap();

        assert!(negotiator.step().await.is_err());
        assert_eq!(negotiator.state(), &TwoFactorState::Failed);
    }

    #[tokio::test]
    async fn test_wrong_code_is_validation_error() {
        let service = FakeService::challenged(two_devices());
        let mut prompter = ScriptedPrompter::new(&["0"], &["654321"]);
        let mut session = pending();

        let result = TwoFactorNegotiator::start(&service, &mut prompter)
            .await
            .unwrap()
            .run(&mut session)
            .await;

        assert!(matches!(result, Err(AuthError::CodeValidation { .. })));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_non_numeric_code_never_reaches_service() {
        let service = FakeService::challenged(two_devices());
        let mut prompter = ScriptedPrompter::new(&["0"], &["12a456"]);
        let mut session = pending();

        let result = TwoFactorNegotiator::start(&service, &mut prompter)
            .await
            .unwrap()
            .run(&mut session)
            .await;

        assert!(matches!(result, Err(AuthError::CodeValidation { .. })));
        assert!(!service.calls().iter().any(|c| c.starts_with("validate_code")));
    }

    #[tokio::test]
    async fn test_out_of_range_choice_reprompts() {
        let service = FakeService::challenged(two_devices());
        let mut prompter = ScriptedPrompter::new(&["5", "1"], &["123456"]);
        let mut session = pending();

        TwoFactorNegotiator::start(&service, &mut prompter)
            .await
            .unwrap()
            .run(&mut session)
            .await
            .unwrap();

        assert_eq!(prompter.device_prompts, 2);
        assert!(service.calls().contains(&"send_code:1".to_string()));
    }

    #[tokio::test]
    async fn test_repeated_invalid_choice_gives_up() {
        let service = FakeService::challenged(two_devices());
        let mut prompter = ScriptedPrompter::new(&["9", "x", "3"], &[]);
        let mut session = pending();

        let result = TwoFactorNegotiator::start(&service, &mut prompter)
            .await
            .unwrap()
            .run(&mut session)
            .await;

        assert!(matches!(result, Err(AuthError::InvalidSelection { .. })));
        assert_eq!(prompter.device_prompts, MAX_SELECTION_ATTEMPTS);
        assert!(!service.calls().iter().any(|c| c.starts_with("send_code")));
    }

    #[tokio::test]
    async fn test_no_trusted_devices() {
        let service = FakeService::challenged(Vec::new());
        let mut prompter = ScriptedPrompter::default();
        let result = TwoFactorNegotiator::start(&service, &mut prompter).await;
        assert!(matches!(result, Err(AuthError::NoTrustedDevices)));
    }
}

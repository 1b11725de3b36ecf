//! Credential session and two-step verification.
//!
//! The flow: submit account and password, and if the service answers with a
//! challenge run the [`TwoFactorNegotiator`] until the session is
//! authenticated. Nothing is persisted between runs.

pub mod error;
pub mod prompt;
pub mod twofa;

use self::error::AuthError;
use self::prompt::Prompter;
use self::twofa::TwoFactorNegotiator;
use crate::icloud::{ICloudError, LoginOutcome, RemoteService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    PendingChallenge,
    Authenticated,
}

/// Handle to a logged-in account for the lifetime of the process.
#[derive(Debug)]
pub struct Session {
    account: String,
    state: SessionState,
}

impl Session {
    pub(crate) fn new(account: &str, state: SessionState) -> Self {
        Self {
            account: account.to_string(),
            state,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Called once the second factor has been verified.
    pub(crate) fn promote(&mut self) {
        self.state = SessionState::Authenticated;
    }
}

/// Submit credentials. A rejected login is an [`AuthError::Authentication`];
/// other remote failures are passed through.
pub async fn authenticate(
    service: &dyn RemoteService,
    account: &str,
    password: &str,
) -> Result<Session, AuthError> {
    tracing::debug!("Authenticating as {}", account);
    let state = match service.authenticate(account, password).await {
        Ok(LoginOutcome::Authenticated) => SessionState::Authenticated,
        Ok(LoginOutcome::ChallengeRequired) => SessionState::PendingChallenge,
        Err(ICloudError::FailedLogin(reason)) => return Err(AuthError::Authentication(reason)),
        Err(e) => return Err(e.into()),
    };
    Ok(Session::new(account, state))
}

/// Full interactive login: password (prompted when not supplied), then the
/// two-step challenge if the service asks for one.
pub async fn login(
    service: &dyn RemoteService,
    account: &str,
    password: Option<&str>,
    prompter: &mut dyn Prompter,
) -> Result<Session, AuthError> {
    let prompted;
    let password = match password {
        Some(p) => p,
        None => {
            prompted = prompter.password(account)?;
            prompted.as_str()
        }
    };

    let mut session = authenticate(service, account, password).await?;
    if session.state() == SessionState::PendingChallenge {
        tracing::info!("Two-factor authentication is required");
        TwoFactorNegotiator::start(service, prompter)
            .await?
            .run(&mut session)
            .await?;
    }

    tracing::info!("Authentication completed successfully");
    Ok(session)
}

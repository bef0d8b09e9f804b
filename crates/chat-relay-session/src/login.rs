//! Login protocol against the chat application's login form.
//!
//! The app can render any of four mutually exclusive markers after a
//! submission, so the outcome is decided by racing them with a bound.

use chat_relay_core::{
    AccountCredentials, AdapterConfig, AdapterEvent, ElementHandle, EventBus, NetworkResponse,
    PageSurface, SessionState, TrafficPattern, network::next_matching,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    error::{AdapterError, LoginFailure},
    state::SessionStateCell,
};

/// Result of a completed login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated,
    Failed(LoginFailure),
}

/// Order of the markers raced after submission.
const SUCCESS: usize = 0;
const INVALID_CREDENTIALS: usize = 1;
const DUPLICATE_SESSION: usize = 2;
const VERIFICATION_CODE: usize = 3;

/// One login attempt's view of the adapter.
pub struct Login<'a, S: PageSurface> {
    pub surface: &'a S,
    pub config: &'a AdapterConfig,
    pub pattern: &'a TrafficPattern,
    pub bus: &'a EventBus,
    pub state: &'a SessionStateCell,
}

impl<S: PageSurface> Login<'_, S> {
    /// Drive the whole protocol, from opening the page to a terminal state.
    ///
    /// # Errors
    /// Returns error on surface failures, failing handlers and illegal transitions.
    /// Login failures are not errors; they come back as [`LoginOutcome::Failed`].
    pub async fn run(&self, credentials: AccountCredentials) -> Result<LoginOutcome, AdapterError> {
        self.open().await?;
        self.dismiss_popup().await?;
        let responses = self.submit(credentials).await?;
        self.resolve(responses).await
    }

    /// Open the page and wait for the login form.
    ///
    /// # Errors
    /// Returns error if the page cannot be loaded or the form never renders.
    pub async fn open(&self) -> Result<(), AdapterError> {
        self.surface.open().await?;
        self.surface
            .wait_for(&self.config.selectors.login_section, self.config.render_timeout())
            .await?;
        self.bus.publish(AdapterEvent::Open).await?;
        Ok(())
    }

    /// Click away the interstitial popup when it shows the affirmative label.
    /// Returns whether it was dismissed.
    ///
    /// # Errors
    /// Returns error on surface failures.
    pub async fn dismiss_popup(&self) -> Result<bool, AdapterError> {
        let selectors = &self.config.selectors;
        let Some(popup) = self.surface.find(&selectors.popup).await? else {
            return Ok(false);
        };
        let Some(button) = popup.query(&selectors.popup_button).await? else {
            debug!("popup without a button");
            return Ok(false);
        };

        let label = button.text().await?.unwrap_or_default();
        if label.trim() == self.config.popup_confirm_label {
            button.click().await?;
            debug!(%label, "dismissed popup");
            Ok(true)
        } else {
            debug!(%label, "left popup in place");
            Ok(false)
        }
    }

    /// Fill in and submit the form. The returned subscription was taken
    /// before the click, so it sees the login request's response.
    ///
    /// # Errors
    /// Returns error if the form cannot be filled or submitted.
    pub async fn submit(
        &self,
        credentials: AccountCredentials,
    ) -> Result<broadcast::Receiver<NetworkResponse>, AdapterError> {
        let selectors = &self.config.selectors;
        self.state.transition(SessionState::AwaitingLoginSubmission)?;

        self.surface
            .type_text(&selectors.email_input, &credentials.username)
            .await?;
        self.surface
            .type_text(&selectors.password_input, &credentials.password)
            .await?;
        drop(credentials);

        // The submit control is only matched once enabled.
        let button = self
            .surface
            .wait_for(&selectors.login_button, self.config.render_timeout())
            .await?;

        let responses = self.surface.responses();
        button.click().await?;
        self.state.transition(SessionState::AwaitingLoginResult)?;
        Ok(responses)
    }

    /// Wait for the login response and decide the outcome.
    ///
    /// # Errors
    /// Returns error if no response arrives or the page misbehaves.
    pub async fn resolve(
        &self,
        mut responses: broadcast::Receiver<NetworkResponse>,
    ) -> Result<LoginOutcome, AdapterError> {
        let selectors = &self.config.selectors;

        next_matching(&mut responses, self.pattern, self.config.response_timeout()).await?;
        drop(responses);
        // Rendering has no completion signal.
        self.surface.wait_for_millis(self.config.settle_delay_ms).await;

        let markers = [
            selectors.app_content.as_str(),
            selectors.login_failed_message.as_str(),
            selectors.another_app_open_message.as_str(),
            selectors.verification_code_message.as_str(),
        ];
        let raced = self
            .surface
            .wait_for_first_of(&markers, self.config.outcome_timeout())
            .await;

        let outcome = match raced {
            Ok((_, SUCCESS)) => LoginOutcome::Authenticated,
            Ok((_, INVALID_CREDENTIALS)) => LoginOutcome::Failed(LoginFailure::InvalidCredentials),
            Ok((_, DUPLICATE_SESSION)) => LoginOutcome::Failed(LoginFailure::DuplicateSession),
            Ok((element, VERIFICATION_CODE)) => self.await_verification(&element).await?,
            Ok((_, _)) => LoginOutcome::Failed(LoginFailure::UnexpectedOutcome),
            Err(err) if err.is_timeout() => LoginOutcome::Failed(LoginFailure::UnexpectedOutcome),
            Err(err) => return Err(err.into()),
        };

        match outcome {
            LoginOutcome::Authenticated => {
                self.state.transition(SessionState::Authenticated)?;
                info!("login succeeded");
            }
            LoginOutcome::Failed(failure) => {
                self.state.transition(SessionState::Failed)?;
                info!(reason = %failure, "login failed");
            }
        }
        Ok(outcome)
    }

    async fn await_verification(&self, code: &S::Element) -> Result<LoginOutcome, AdapterError> {
        self.state.transition(SessionState::AwaitingVerificationCode)?;

        let verification_code = code.text().await?.unwrap_or_default().trim().to_string();
        info!(%verification_code, "verification code requested");
        self.bus
            .publish(AdapterEvent::VerificationCode { verification_code })
            .await?;

        match self
            .surface
            .wait_for(
                &self.config.selectors.app_content,
                self.config.verification_timeout(),
            )
            .await
        {
            Ok(_) => Ok(LoginOutcome::Authenticated),
            Err(err) if err.is_timeout() => {
                Ok(LoginOutcome::Failed(LoginFailure::VerificationTimeout))
            }
            Err(err) => Err(err.into()),
        }
    }
}

//! Wizard steps

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use step_flow::{FlowError, FlowState, FnStep, Step, StepContext, StepOutcome, ViewFn};
use tracing::{debug, info, warn};

use super::installer::Installer;
use super::is_valid_email;
use super::views;

pub const GET_EMAIL: &str = "get-email";
pub const INPUT_EMAIL: &str = "input-email";
pub const CHECK_EMAIL: &str = "check-email";
pub const ACCOUNT_SWITCH: &str = "account-switch";
pub const LOGIN: &str = "login";
pub const CREATE_ACCOUNT: &str = "create-account";
pub const DOWNLOAD_AND_WHITELIST: &str = "download-and-whitelist";
pub const DOWNLOAD_FLOW: &str = "download-flow";
pub const DOWNLOAD: &str = "download";
pub const INSTALL: &str = "install";
pub const AUTHENTICATE: &str = "authenticate";
pub const WHITELIST_CHOICE: &str = "whitelist-choice";
pub const WHITELIST: &str = "whitelist";
pub const TERMINATION: &str = "termination";
pub const END: &str = "end";
pub const ERROR: &str = "error";

pub const SUBMIT_EMAIL: &str = "did-submit-email";
pub const SUBMIT_CREDENTIALS: &str = "did-submit-credentials";
pub const CLICK_BACK: &str = "did-click-back";
pub const FORGOT_PASSWORD: &str = "did-forgot-password";
pub const DO_WHITELIST: &str = "did-whitelist";
pub const SKIP_WHITELIST: &str = "did-skip-whitelist";

fn account_email(state: &FlowState) -> Option<String> {
    state
        .lookup_str("account.email")
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(str::to_string)
}

fn failed(mut state: FlowState, message: impl fmt::Display) -> StepOutcome {
    state.set_error(message.to_string());
    StepOutcome::Failed(state)
}

/// Prefills `account.email` from the configured default.
pub fn get_email(default_email: Option<String>) -> FnStep {
    FnStep::completing(GET_EMAIL, move |mut state| {
        if account_email(&state).is_none() {
            if let Some(email) = &default_email {
                state.set_path("account.email", email.as_str());
            }
        }
        state
    })
}

/// Waits for a syntactically valid email address.
#[derive(Debug, Default)]
pub struct InputEmail;

#[async_trait]
impl Step for InputEmail {
    fn name(&self) -> &str {
        INPUT_EMAIL
    }

    fn view(&self) -> Option<ViewFn> {
        Some(Arc::new(views::input_email))
    }

    async fn run(&self, mut state: FlowState, ctx: &StepContext) -> Result<StepOutcome, FlowError> {
        loop {
            let event = ctx.wait_for(&[SUBMIT_EMAIL]).await?;
            let email = event.field("email").unwrap_or_default().trim().to_string();
            state.set_path("account.email", email.as_str());
            if is_valid_email(&email) {
                state.clear_error();
                return Ok(StepOutcome::Completed(state));
            }
            debug!(email = %email, "rejected email address");
            state.set_error("Please enter a valid email address");
            ctx.publish(&state);
        }
    }
}

/// Looks the account up and records `account.exists`.
pub struct CheckEmail {
    installer: Arc<dyn Installer>,
}

impl CheckEmail {
    pub fn new(installer: Arc<dyn Installer>) -> Self {
        Self { installer }
    }
}

#[async_trait]
impl Step for CheckEmail {
    fn name(&self) -> &str {
        CHECK_EMAIL
    }

    fn failure_step(&self) -> Option<&str> {
        Some(INPUT_EMAIL)
    }

    async fn run(&self, mut state: FlowState, _ctx: &StepContext) -> Result<StepOutcome, FlowError> {
        let Some(email) = account_email(&state) else {
            return Ok(failed(state, "Please enter an email address"));
        };
        match self.installer.account_exists(&email).await {
            Ok(exists) => {
                info!(email = %email, exists, "checked account");
                state.set_path("account.exists", exists);
                Ok(StepOutcome::Completed(state))
            }
            Err(err) => Ok(failed(state, err)),
        }
    }
}

/// Signs an existing account in.
pub struct Login {
    installer: Arc<dyn Installer>,
}

impl Login {
    pub fn new(installer: Arc<dyn Installer>) -> Self {
        Self { installer }
    }
}

#[async_trait]
impl Step for Login {
    fn name(&self) -> &str {
        LOGIN
    }

    fn view(&self) -> Option<ViewFn> {
        Some(Arc::new(views::login))
    }

    fn failure_step(&self) -> Option<&str> {
        Some(ACCOUNT_SWITCH)
    }

    fn back_step(&self) -> Option<&str> {
        Some(INPUT_EMAIL)
    }

    async fn run(&self, mut state: FlowState, ctx: &StepContext) -> Result<StepOutcome, FlowError> {
        loop {
            let event = ctx
                .wait_for(&[SUBMIT_CREDENTIALS, CLICK_BACK, FORGOT_PASSWORD])
                .await?;
            match event.name.as_str() {
                CLICK_BACK => {
                    state.clear_error();
                    return Ok(StepOutcome::Back(state));
                }
                FORGOT_PASSWORD => {
                    let email = account_email(&state).unwrap_or_default();
                    match self.installer.send_password_reset(&email).await {
                        Ok(()) => {
                            state.clear_error();
                            state.set_path("account.reset_sent", true);
                        }
                        Err(err) => state.set_error(err.to_string()),
                    }
                    ctx.publish(&state);
                }
                _ => {
                    let email = event
                        .field("email")
                        .map(str::trim)
                        .filter(|email| !email.is_empty())
                        .map(str::to_string)
                        .or_else(|| account_email(&state))
                        .unwrap_or_default();
                    let password = event.field("password").unwrap_or_default();
                    state.set_path("account.email", email.as_str());
                    return match self.installer.login(&email, password).await {
                        Ok(()) => {
                            info!(email = %email, "signed in");
                            state.clear_error();
                            Ok(StepOutcome::Completed(state))
                        }
                        Err(err) => {
                            warn!(email = %email, error = %err, "sign in rejected");
                            Ok(failed(state, err))
                        }
                    };
                }
            }
        }
    }
}

pub struct CreateAccount {
    installer: Arc<dyn Installer>,
}

impl CreateAccount {
    pub fn new(installer: Arc<dyn Installer>) -> Self {
        Self { installer }
    }
}

#[async_trait]
impl Step for CreateAccount {
    fn name(&self) -> &str {
        CREATE_ACCOUNT
    }

    fn failure_step(&self) -> Option<&str> {
        Some(TERMINATION)
    }

    async fn run(&self, mut state: FlowState, _ctx: &StepContext) -> Result<StepOutcome, FlowError> {
        let email = account_email(&state).unwrap_or_default();
        match self.installer.create_account(&email).await {
            Ok(()) => {
                state.set_path("account.created", true);
                Ok(StepOutcome::Completed(state))
            }
            Err(err) => Ok(failed(state, err)),
        }
    }
}

/// Downloads the package, publishing `download.ratio` as it goes.
pub struct Download {
    installer: Arc<dyn Installer>,
}

impl Download {
    pub fn new(installer: Arc<dyn Installer>) -> Self {
        Self { installer }
    }
}

#[async_trait]
impl Step for Download {
    fn name(&self) -> &str {
        DOWNLOAD
    }

    async fn run(&self, mut state: FlowState, ctx: &StepContext) -> Result<StepOutcome, FlowError> {
        state.set_path("download.ratio", 0.0);
        state.set_path("download.done", false);
        ctx.publish(&state);

        let base = &state;
        let result = self
            .installer
            .download(&|ratio| {
                let mut tick = base.clone();
                tick.set_path("download.ratio", ratio);
                ctx.publish(&tick);
            })
            .await;

        match result {
            Ok(()) => {
                state.set_path("download.ratio", 1.0);
                state.set_path("download.done", true);
                Ok(StepOutcome::Completed(state))
            }
            Err(err) => Ok(failed(state, err)),
        }
    }
}

pub struct Install {
    installer: Arc<dyn Installer>,
}

impl Install {
    pub fn new(installer: Arc<dyn Installer>) -> Self {
        Self { installer }
    }
}

#[async_trait]
impl Step for Install {
    fn name(&self) -> &str {
        INSTALL
    }

    async fn run(&self, mut state: FlowState, ctx: &StepContext) -> Result<StepOutcome, FlowError> {
        state.set_path("install.done", false);
        ctx.publish(&state);
        match self.installer.install().await {
            Ok(()) => {
                state.set_path("install.done", true);
                Ok(StepOutcome::Completed(state))
            }
            Err(err) => Ok(failed(state, err)),
        }
    }
}

/// Starts the installed service and signs it in with the wizard account.
pub struct Authenticate {
    installer: Arc<dyn Installer>,
}

impl Authenticate {
    pub fn new(installer: Arc<dyn Installer>) -> Self {
        Self { installer }
    }
}

#[async_trait]
impl Step for Authenticate {
    fn name(&self) -> &str {
        AUTHENTICATE
    }

    async fn run(&self, mut state: FlowState, ctx: &StepContext) -> Result<StepOutcome, FlowError> {
        state.set_path("running.done", false);
        ctx.publish(&state);
        let email = account_email(&state).unwrap_or_default();
        match self.installer.start_and_authenticate(&email).await {
            Ok(()) => {
                state.set_path("running.done", true);
                Ok(StepOutcome::Completed(state))
            }
            Err(err) => Ok(failed(state, err)),
        }
    }
}

/// Asks whether the project directory may be whitelisted.
#[derive(Debug, Default)]
pub struct WhitelistChoice;

#[async_trait]
impl Step for WhitelistChoice {
    fn name(&self) -> &str {
        WHITELIST_CHOICE
    }

    fn view(&self) -> Option<ViewFn> {
        Some(Arc::new(views::whitelist))
    }

    async fn run(&self, mut state: FlowState, ctx: &StepContext) -> Result<StepOutcome, FlowError> {
        let event = ctx.wait_for(&[DO_WHITELIST, SKIP_WHITELIST]).await?;
        state.set_path("whitelist.choice", event.name == DO_WHITELIST);
        Ok(StepOutcome::Completed(state))
    }
}

/// Applies the whitelist choice. A refusal from the installer is recorded
/// under `error` rather than failing the step.
pub struct Whitelist {
    installer: Arc<dyn Installer>,
}

impl Whitelist {
    pub fn new(installer: Arc<dyn Installer>) -> Self {
        Self { installer }
    }
}

#[async_trait]
impl Step for Whitelist {
    fn name(&self) -> &str {
        WHITELIST
    }

    async fn run(&self, mut state: FlowState, _ctx: &StepContext) -> Result<StepOutcome, FlowError> {
        let chosen = state
            .lookup("whitelist.choice")
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        if !chosen {
            return Ok(StepOutcome::Completed(state));
        }
        let Some(path) = state.lookup_str("path").map(str::to_string) else {
            state.set_error("No directory to enable access for");
            return Ok(StepOutcome::Completed(state));
        };
        match self.installer.whitelist(Path::new(&path)).await {
            Ok(()) => state.set_path("whitelist.done", true),
            Err(err) => {
                warn!(path = %path, error = %err, "whitelisting failed");
                state.set_error(err.to_string());
            }
        }
        Ok(StepOutcome::Completed(state))
    }
}

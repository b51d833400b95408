//! Install wizard built on the step engine

pub mod installer;
pub mod session;
pub mod steps;
pub mod views;

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use step_flow::{
    Branch, BranchStep, Flow, FlowError, FlowState, Node, ParallelSteps, Predicate, VoidStep,
};

use crate::config::InstallerConfig;

pub use installer::{Installer, InstallerError, SimulatedInstaller};
pub use session::InstallSession;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("email pattern is valid")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Builds the `install` flow.
pub fn build_install_flow(
    installer: Arc<dyn Installer>,
    config: &InstallerConfig,
) -> Result<Flow, FlowError> {
    use steps::*;

    let account_switch = BranchStep::new(
        ACCOUNT_SWITCH,
        vec![
            Branch::step(
                Predicate::truthy("account.exists"),
                Login::new(Arc::clone(&installer)),
            ),
            Branch::step(
                Predicate::falsy("account.exists"),
                CreateAccount::new(Arc::clone(&installer)),
            ),
        ],
    )?;

    let download_flow = Flow::new(
        DOWNLOAD_FLOW,
        vec![
            Node::step(Download::new(Arc::clone(&installer))),
            Node::step(Install::new(Arc::clone(&installer))),
            Node::step(Authenticate::new(Arc::clone(&installer))),
        ],
    )?;

    let download_and_whitelist = ParallelSteps::new(
        DOWNLOAD_AND_WHITELIST,
        vec![download_flow.into(), Node::step(WhitelistChoice)],
    )?
    .with_failure_step(TERMINATION);

    let termination = BranchStep::new(
        TERMINATION,
        vec![
            Branch::step(
                Predicate::falsy("error"),
                VoidStep::new(END).with_view(views::end),
            ),
            Branch::step(
                Predicate::truthy("error"),
                VoidStep::new(ERROR).with_view(views::error),
            ),
        ],
    )?;

    Flow::new(
        "install",
        vec![
            Node::step(get_email(config.default_email.clone())),
            Node::step(InputEmail),
            Node::step(CheckEmail::new(Arc::clone(&installer))),
            account_switch.into(),
            download_and_whitelist.into(),
            Node::step(Whitelist::new(installer)),
            termination.into(),
        ],
    )
}

/// State the wizard starts from: the directory offered for whitelisting.
pub fn initial_state(config: &InstallerConfig) -> FlowState {
    FlowState::new().with("path", config.whitelist_path.display().to_string())
}

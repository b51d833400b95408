use anyhow::Result;
use humantime::format_duration;
use std::sync::Arc;
use std::time::Duration;
use step_flow::Node;

use crate::cli::context::CliContext;
use crate::install::{build_install_flow, Installer, SimulatedInstaller};

pub async fn cmd_info(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();

    println!("Onboard System Information");
    println!("==========================");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Build Date: {}", env!("BUILD_DATE"));
    println!("Git Commit: {} ({})", env!("GIT_HASH"), env!("GIT_BRANCH"));
    println!();

    println!("Configuration:");
    println!("- Config File: {}", ctx.config_path().display());
    println!("- Listen Address: {}", config.server.base_url());
    println!(
        "- Start Delay: {}",
        format_duration(Duration::from_millis(config.start_delay_ms))
    );
    match config.engine.suspend_timeout() {
        Some(limit) => println!("- Suspend Timeout: {}", format_duration(limit)),
        None => println!("- Suspend Timeout: none"),
    }
    println!("- Progress Key: {}", config.engine.progress_key);
    println!(
        "- Whitelist Path: {}",
        config.installer.whitelist_path.display()
    );
    println!("- Known Accounts: {}", config.installer.known_accounts.len());
    println!();

    let installer: Arc<dyn Installer> = Arc::new(SimulatedInstaller::new(&config.installer));
    let flow = build_install_flow(installer, &config.installer)?;
    println!("Wizard Flow:");
    print_tree(&Node::Flow(flow), 0);

    Ok(())
}

fn print_tree(node: &Node, depth: usize) {
    println!("{}- {} ({})", "  ".repeat(depth), node.name(), node.kind());
    for child in node.children() {
        print_tree(child, depth + 1);
    }
}

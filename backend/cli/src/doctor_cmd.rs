//! `lmsguard doctor`: configuration and sandbox prerequisite checks.

use std::path::Path;

use anyhow::Result;

use lmsguard_config::{redact_config, GuardConfig};
use lmsguard_sandbox::{docker_available, runtime_available, SandboxMode, SandboxPolicy};

pub async fn run(config_path: &Path) -> Result<()> {
    println!("\nlmsguard doctor ({})\n", crate::display(config_path));

    let config = match lmsguard_config::load_and_prepare(config_path).await {
        Ok(config) => {
            println!("  [ok]   configuration is valid");
            config
        }
        Err(e) => {
            println!("  [fail] configuration: {e:#}");
            println!("\nSome checks failed.");
            std::process::exit(1);
        }
    };
    crate::init_logging(&config);

    print_privacy(&config);
    let all_good = check_sandbox(&config).await;

    println!("\nEffective configuration (secrets redacted):");
    println!("{}", serde_json::to_string_pretty(&redact_config(&config))?);

    println!();
    if all_good {
        println!("All checks passed.");
        Ok(())
    } else {
        println!("Some checks failed.");
        std::process::exit(1);
    }
}

fn print_privacy(config: &GuardConfig) {
    let privacy = config.privacy();
    let audit = config.audit();
    report(
        true,
        &format!(
            "anonymization {}, de-anonymization {}",
            on_off(privacy.anonymization_enabled()),
            on_off(privacy.deanonymization_enabled())
        ),
    );
    report(
        true,
        &format!(
            "audit: access events {}, execution events {}",
            on_off(audit.access_events_enabled()),
            on_off(audit.execution_events_enabled())
        ),
    );
}

async fn check_sandbox(config: &GuardConfig) -> bool {
    let policy = SandboxPolicy::from_config(&config.sandbox(), &config.api());
    let mode = policy.effective_mode();
    if mode == SandboxMode::Unrestricted {
        println!("  [warn] sandbox is disabled; guest code runs without isolation");
    }

    match mode {
        SandboxMode::Container => {
            let ok = docker_available().await;
            report(ok, &format!("docker daemon reachable (image {})", policy.container_image()));
            ok
        }
        SandboxMode::Local | SandboxMode::Unrestricted => {
            let ok = runtime_available(policy.runtime()).await;
            report(ok, &format!("runtime '{}' available", policy.runtime()));
            ok
        }
    }
}

fn report(ok: bool, message: &str) {
    println!("  [{}] {message}", if ok { "ok" } else { "fail" });
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

//! `registry-sync doctor` - active health diagnostics.
//!
//! Validates configuration and probes the configured RPC endpoint so a wrong
//! chain or a missing deployment shows up before a wallet ever connects.
//! Each check reports pass/fail with actionable guidance on failures.

use std::path::Path;

use crate::chain::NetworkHandle;
use crate::chain::health::{ChainHealth, ChainHealthState, probe_chain, probe_deployments};
use crate::chain::rpc::JsonRpcNetwork;
use crate::config::{Config, ContractsConfig};

/// Run diagnostic checks and print results.
pub async fn run_doctor_command(config_path: Option<&Path>, strict: bool) -> anyhow::Result<()> {
    println!("registry-sync doctor");
    println!("====================\n");

    let mut passed = 0u32;
    let mut failed = 0u32;

    // ── Configuration checks ──────────────────────────────────

    let config = match Config::from_env_with_toml(config_path) {
        Ok(config) => {
            check(
                "Configuration",
                CheckResult::Pass(format!(
                    "chain id {}, gas limit {}",
                    config.network.chain_id, config.dispatch.gas_limit
                )),
                &mut passed,
                &mut failed,
            );
            Some(config)
        }
        Err(e) => {
            check(
                "Configuration",
                CheckResult::Fail(e.to_string()),
                &mut passed,
                &mut failed,
            );
            None
        }
    };

    if let Some(config) = &config {
        check(
            "Registry addresses",
            check_addresses(&config.contracts),
            &mut passed,
            &mut failed,
        );

        // ── Network checks ────────────────────────────────────

        match &config.network.rpc_url {
            None => check(
                "RPC endpoint",
                CheckResult::Skip("REGISTRY_RPC_URL not set".to_string()),
                &mut passed,
                &mut failed,
            ),
            Some(url) => match JsonRpcNetwork::new(url, config.network.rpc_timeout) {
                Ok(network) => {
                    for (name, result) in run_chain_checks(&network, config).await {
                        check(&name, result, &mut passed, &mut failed);
                    }
                }
                Err(e) => check(
                    "RPC endpoint",
                    CheckResult::Fail(e.to_string()),
                    &mut passed,
                    &mut failed,
                ),
            },
        }
    }

    // ── Summary ───────────────────────────────────────────────

    println!();
    println!("  {passed} passed, {failed} failed");

    if failed > 0 {
        println!("\n  Some checks failed. Contract calls will fail until they are fixed.");
        if strict {
            anyhow::bail!("doctor strict mode failed with {failed} check(s)");
        }
    }

    Ok(())
}

/// Print the default event allow-list as JSON, keyed by contract name.
pub fn run_events_command() -> anyhow::Result<()> {
    let allow_list = crate::events::default_allow_list();
    let by_contract: std::collections::BTreeMap<&str, &Vec<String>> = allow_list
        .iter()
        .map(|(registry, events)| (registry.contract_name(), events))
        .collect();
    println!("{}", serde_json::to_string_pretty(&by_contract)?);
    Ok(())
}

// ── Individual checks ───────────────────────────────────────

fn check(name: &str, result: CheckResult, passed: &mut u32, failed: &mut u32) {
    match result {
        CheckResult::Pass(detail) => {
            *passed += 1;
            println!("  [pass] {name}: {detail}");
        }
        CheckResult::Fail(detail) => {
            *failed += 1;
            println!("  [FAIL] {name}: {detail}");
        }
        CheckResult::Skip(reason) => {
            println!("  [skip] {name}: {reason}");
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

fn check_addresses(contracts: &ContractsConfig) -> CheckResult {
    let missing: Vec<String> = contracts
        .entries()
        .into_iter()
        .filter(|(_, address)| address.is_none())
        .map(|(registry, _)| registry.to_string())
        .collect();
    if missing.is_empty() {
        CheckResult::Pass("all registries configured".to_string())
    } else {
        CheckResult::Fail(format!(
            "missing {}. Set the REGISTRY_*_ADDRESS variables or [contracts] in config.toml",
            missing.join(", ")
        ))
    }
}

/// Chain id plus one deployment check per registry.
async fn run_chain_checks(
    network: &dyn NetworkHandle,
    config: &Config,
) -> Vec<(String, CheckResult)> {
    let chain = probe_chain(network, config.network.chain_id).await;
    let reachable = !matches!(
        chain.state,
        ChainHealthState::DnsFailure | ChainHealthState::ConnectFailure | ChainHealthState::Timeout
    );
    let mut results = vec![("Chain id".to_string(), health_result(&chain))];

    if !reachable {
        results.push((
            "Contract deployments".to_string(),
            CheckResult::Skip("RPC endpoint unreachable".to_string()),
        ));
        return results;
    }

    for health in probe_deployments(network, &config.contracts.entries()).await {
        let name = format!("{} deployment", health.subject);
        results.push((name, health_result(&health)));
    }
    results
}

fn health_result(health: &ChainHealth) -> CheckResult {
    match health.state {
        ChainHealthState::Healthy => CheckResult::Pass(health.detail.clone()),
        ChainHealthState::Unconfigured => CheckResult::Skip(health.detail.clone()),
        ChainHealthState::WrongChain => CheckResult::Fail(format!(
            "{}. Point REGISTRY_RPC_URL at the right network or fix REGISTRY_CHAIN_ID",
            health.detail
        )),
        ChainHealthState::NotDeployed => CheckResult::Fail(format!(
            "{}. The address is wrong for this network or the contract was never deployed",
            health.detail
        )),
        state => CheckResult::Fail(format!("{} ({})", health.detail, state.as_str())),
    }
}

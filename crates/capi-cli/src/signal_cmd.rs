//! Signal subcommands: add-signal, send, prune-failing, prune-sent.
//!
//! User-facing output uses writeln! (this is a CLI binary, not debug output).

use std::io::Write;

use capi_client::auth::Clock;
use capi_client::{CapiClient, Storage, Transport};
use capi_core::db::unix_timestamp;
use capi_core::helpers::{MACHINE_ID_LENGTH, SignalOptions, create_signal, generate_machine_id_from_key};
use capi_core::models::format_timestamp;

use crate::{aborted, confirm};

#[derive(clap::Args, Debug)]
pub struct AddSignalArgs {
    /// Attacker IP address.
    pub ip: String,

    /// Scenario that fired, e.g. `crowdsecurity/ssh-bf`.
    pub scenario: String,

    /// Machine that observed the attack.
    #[arg(long, required_unless_present = "machine_key", conflicts_with = "machine_key")]
    pub machine_id: Option<String>,

    /// Derive the machine ID from this secret instead of naming it.
    #[arg(long)]
    pub machine_key: Option<String>,

    /// Prefix of derived machine IDs.
    #[arg(long, default_value = "")]
    pub machine_prefix: String,

    /// When the alert fired (RFC 3339 or `YYYY-MM-DD HH:MM:SS +zzzz`). Defaults to now.
    #[arg(long)]
    pub created_at: Option<String>,

    #[arg(long, default_value = "")]
    pub message: String,

    /// Scenario trust level (defaults to `manual`).
    #[arg(long)]
    pub trust: Option<String>,
}

impl AddSignalArgs {
    fn resolve_machine_id(&self) -> anyhow::Result<String> {
        match (&self.machine_id, &self.machine_key) {
            (Some(id), _) => Ok(id.clone()),
            (None, Some(key)) => Ok(generate_machine_id_from_key(
                key,
                &self.machine_prefix,
                MACHINE_ID_LENGTH,
            )),
            (None, None) => anyhow::bail!("Either --machine-id or --machine-key is required"),
        }
    }
}

pub async fn add_signal<S: Storage, T: Transport, C: Clock>(
    client: &CapiClient<S, T, C>,
    args: AddSignalArgs,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let machine_id = args.resolve_machine_id()?;
    let created_at = args
        .created_at
        .unwrap_or_else(|| format_timestamp(unix_timestamp()));

    let signal = create_signal(
        &args.ip,
        &args.scenario,
        &created_at,
        &machine_id,
        SignalOptions {
            message: args.message,
            scenario_trust: args.trust,
            ..SignalOptions::default()
        },
    )?;

    for staged in client.add_signals(vec![signal]).await? {
        writeln!(
            out,
            "Staged signal {} ({} from {}) for machine {}",
            staged.uuid, staged.scenario, args.ip, staged.machine_id
        )?;
    }
    Ok(())
}

pub async fn send<S: Storage, T: Transport, C: Clock>(
    client: &CapiClient<S, T, C>,
    prune_sent: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let sent = client.send_signals().await?;
    writeln!(out, "Sent {sent} signal(s)")?;

    let quarantined = client.storage().list_machines(Some(true)).await?;
    if !quarantined.is_empty() {
        writeln!(
            out,
            "{} machine(s) quarantined, run `capi prune-failing` or `capi reset-machine`",
            quarantined.len()
        )?;
    }

    if prune_sent {
        let pruned = client.prune_sent_signals().await?;
        writeln!(out, "Pruned {pruned} delivered signal(s)")?;
    }
    Ok(())
}

pub async fn prune_failing<S: Storage, T: Transport, C: Clock>(
    client: &CapiClient<S, T, C>,
    assume_yes: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let failing = client.storage().list_machines(Some(true)).await?;
    if failing.is_empty() {
        writeln!(out, "No quarantined machines")?;
        return Ok(());
    }

    let prompt = format!(
        "Delete all unsent signals of {} quarantined machine(s)?",
        failing.len()
    );
    if !confirm(&prompt, assume_yes)? {
        return aborted(out);
    }

    let pruned = client.prune_failing_machines_signals().await?;
    writeln!(out, "Pruned {pruned} signal(s) of quarantined machines")?;
    Ok(())
}

pub async fn prune_sent<S: Storage, T: Transport, C: Clock>(
    client: &CapiClient<S, T, C>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let pruned = client.prune_sent_signals().await?;
    writeln!(out, "Pruned {pruned} delivered signal(s)")?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use capi_client::Endpoint;

    use super::*;
    use crate::test_support::{FakeApi, client, output};

    fn args(ip: &str, machine_id: &str, created_at: &str) -> AddSignalArgs {
        AddSignalArgs {
            ip: ip.into(),
            scenario: "crowdsecurity/ssh-bf".into(),
            machine_id: Some(machine_id.into()),
            machine_key: None,
            machine_prefix: String::new(),
            created_at: Some(created_at.into()),
            message: "ssh brute force".into(),
            trust: None,
        }
    }

    #[tokio::test]
    async fn add_signal_stages_under_a_derived_machine() {
        let client = client(FakeApi::default());
        let mut buf = Vec::new();
        let derived = AddSignalArgs {
            machine_id: None,
            machine_key: Some("engine-secret".into()),
            machine_prefix: "edge".into(),
            ..args("10.0.0.1", "unused", "2023-11-17 10:20:46 +0000")
        };

        add_signal(&client, derived, &mut buf).await.unwrap();

        let expected = generate_machine_id_from_key("engine-secret", "edge", MACHINE_ID_LENGTH);
        let machine = client.storage().get_machine(&expected).await.unwrap().unwrap();
        assert!(!machine.is_registered);
        let signals = client
            .storage()
            .get_signals(10, 0, Some(false), None)
            .await
            .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].created_at, 1_700_216_446);
        assert_eq!(signals[0].scenario_trust, "manual");
        assert!(output(&buf).contains(&expected));
    }

    #[tokio::test]
    async fn add_signal_rejects_bad_timestamp() {
        let client = client(FakeApi::default());
        let mut buf = Vec::new();
        let result = add_signal(&client, args("10.0.0.1", "m1", "yesterday"), &mut buf).await;
        assert!(result.is_err());
        assert!(client.storage().list_machines(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_then_prune_sent() {
        let client = client(FakeApi::default());
        let mut buf = Vec::new();
        for i in 0..3 {
            let created_at = format!("2023-11-17T10:20:4{i}Z");
            add_signal(&client, args("10.0.0.1", "m1", &created_at), &mut buf)
                .await
                .unwrap();
        }

        let mut buf = Vec::new();
        send(&client, true, &mut buf).await.unwrap();

        let text = output(&buf);
        assert!(text.contains("Sent 3 signal(s)"));
        assert!(text.contains("Pruned 3 delivered signal(s)"));
        assert_eq!(client.transport().calls(Endpoint::Signals), 1);
        assert!(client.storage().get_signals(10, 0, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prune_failing_without_quarantine_is_a_no_op() {
        let client = client(FakeApi::default());
        let mut buf = Vec::new();
        add_signal(&client, args("10.0.0.1", "m1", "2023-11-17T10:20:40Z"), &mut buf)
            .await
            .unwrap();

        let mut buf = Vec::new();
        prune_failing(&client, true, &mut buf).await.unwrap();

        assert_eq!(output(&buf), "No quarantined machines\n");
        assert_eq!(
            client.storage().get_signals(10, 0, Some(false), None).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn prune_failing_deletes_quarantined_backlog() {
        let client = client(FakeApi::default());
        let mut buf = Vec::new();
        add_signal(&client, args("10.0.0.1", "bad", "2023-11-17T10:20:40Z"), &mut buf)
            .await
            .unwrap();
        add_signal(&client, args("10.0.0.2", "good", "2023-11-17T10:20:41Z"), &mut buf)
            .await
            .unwrap();
        let mut bad = client.storage().get_machine("bad").await.unwrap().unwrap();
        bad.is_failing = true;
        client.storage().update_or_create_machine(bad).await.unwrap();

        let mut buf = Vec::new();
        prune_failing(&client, true, &mut buf).await.unwrap();

        assert!(output(&buf).contains("Pruned 1 signal(s)"));
        let left = client.storage().get_signals(10, 0, None, None).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].machine_id, "good");
    }
}

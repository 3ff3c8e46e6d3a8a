//! Machine subcommands: machines, enroll, decisions, reset-machine.
//!
//! User-facing output uses writeln! (this is a CLI binary, not debug output).

use std::io::Write;

use capi_client::auth::Clock;
use capi_client::{CapiClient, Storage, Transport};

use crate::{aborted, confirm};

#[derive(clap::Args, Debug)]
pub struct EnrollArgs {
    /// Machine IDs to enroll.
    #[arg(required = true)]
    pub machine_ids: Vec<String>,

    /// Name shown in the console.
    #[arg(long)]
    pub name: String,

    /// Attachment key of the console account.
    #[arg(long, env = "CAPI_ATTACHMENT_KEY")]
    pub attachment_key: String,

    /// Console tag (repeatable).
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Replace an existing enrollment.
    #[arg(long)]
    pub overwrite: bool,
}

pub async fn list<S: Storage, T: Transport, C: Clock>(
    client: &CapiClient<S, T, C>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let machines = client.storage().list_machines(None).await?;
    if machines.is_empty() {
        writeln!(out, "No machines known")?;
        return Ok(());
    }

    writeln!(
        out,
        "{:<48} {:<10} {:<9} {:<8}",
        "ID", "REGISTERED", "STATUS", "FAILURES"
    )?;
    for m in &machines {
        let status = if m.is_failing {
            "failing"
        } else if m.receive_bad_requests {
            "rejected"
        } else {
            "ok"
        };
        writeln!(
            out,
            "{:<48} {:<10} {:<9} {:<8}",
            m.machine_id,
            if m.is_registered { "yes" } else { "no" },
            status,
            m.last_failure_count
        )?;
    }
    Ok(())
}

pub async fn enroll<S: Storage, T: Transport, C: Clock>(
    client: &CapiClient<S, T, C>,
    args: EnrollArgs,
    assume_yes: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    if args.overwrite {
        let prompt = format!(
            "Overwrite existing console enrollment of {} machine(s)?",
            args.machine_ids.len()
        );
        if !confirm(&prompt, assume_yes)? {
            return aborted(out);
        }
    }

    let outcomes = client
        .enroll_machines(
            &args.machine_ids,
            &args.name,
            &args.attachment_key,
            &args.tags,
            args.overwrite,
        )
        .await?;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => writeln!(out, "Enrolled {}", outcome.machine_id)?,
            Err(e) => {
                failed += 1;
                writeln!(out, "Failed to enroll {}: {e}", outcome.machine_id)?;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} machine(s) failed to enroll", outcomes.len());
    }
    Ok(())
}

pub async fn decisions<S: Storage, T: Transport, C: Clock>(
    client: &CapiClient<S, T, C>,
    machine_id: Option<&str>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let stream = client.get_decisions(machine_id).await?;
    writeln!(out, "{}", serde_json::to_string_pretty(&stream)?)?;
    Ok(())
}

pub async fn reset<S: Storage, T: Transport, C: Clock>(
    client: &CapiClient<S, T, C>,
    machine_id: &str,
    assume_yes: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let prompt = format!("Lift quarantine of machine {machine_id}?");
    if !confirm(&prompt, assume_yes)? {
        return aborted(out);
    }

    let machine = client.reset_machine(machine_id).await?;
    writeln!(
        out,
        "Machine {} reset (registered: {})",
        machine.machine_id,
        if machine.is_registered { "yes" } else { "no" }
    )?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use capi_client::Endpoint;
    use capi_core::Machine;

    use super::*;
    use crate::test_support::{FakeApi, client, output};

    fn enroll_args(ids: &[&str]) -> EnrollArgs {
        EnrollArgs {
            machine_ids: ids.iter().map(ToString::to_string).collect(),
            name: "edge".into(),
            attachment_key: "attach-me".into(),
            tags: vec!["prod".into()],
            overwrite: false,
        }
    }

    #[tokio::test]
    async fn list_shows_health() {
        let client = client(FakeApi::default());
        let mut failing = Machine::new("m-failing", vec![]);
        failing.is_failing = true;
        failing.last_failure_count = 1;
        client.storage().update_or_create_machine(failing).await.unwrap();
        client
            .storage()
            .update_or_create_machine(Machine::new("m-ok", vec![]))
            .await
            .unwrap();

        let mut buf = Vec::new();
        list(&client, &mut buf).await.unwrap();

        let text = output(&buf);
        let status_of = |id: &str| {
            let row = text.lines().find(|l| l.starts_with(id)).unwrap();
            row.split_whitespace().nth(2).unwrap().to_string()
        };
        assert_eq!(status_of("m-failing"), "failing");
        assert_eq!(status_of("m-ok"), "ok");
    }

    #[tokio::test]
    async fn enroll_reports_each_machine() {
        let client = client(FakeApi::default());
        let mut buf = Vec::new();

        enroll(&client, enroll_args(&["m1", "m2"]), true, &mut buf)
            .await
            .unwrap();

        assert_eq!(output(&buf), "Enrolled m1\nEnrolled m2\n");
        assert_eq!(client.transport().calls(Endpoint::Enroll), 2);
    }

    #[tokio::test]
    async fn enroll_fails_when_any_machine_fails() {
        let api = FakeApi {
            enroll_status: 403,
            ..FakeApi::default()
        };
        let client = client(api);
        let mut buf = Vec::new();

        let err = enroll(&client, enroll_args(&["m1"]), true, &mut buf)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("1 of 1"));
        assert!(output(&buf).starts_with("Failed to enroll m1"));
    }

    #[tokio::test]
    async fn decisions_print_the_stream() {
        let api = FakeApi {
            decisions: r#"{"new": [{"scope": "ip", "value": "1.2.3.4", "type": "ban"}], "deleted": null}"#
                .into(),
            ..FakeApi::default()
        };
        let client = client(api);
        client
            .storage()
            .update_or_create_machine(Machine::new("m1", vec![]))
            .await
            .unwrap();
        let mut buf = Vec::new();

        decisions(&client, Some("m1"), &mut buf).await.unwrap();

        let printed: serde_json::Value = serde_json::from_str(&output(&buf)).unwrap();
        assert_eq!(printed["new"][0]["value"], "1.2.3.4");
        assert_eq!(printed["deleted"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn reset_lifts_quarantine() {
        let client = client(FakeApi::default());
        let mut machine = Machine::new("m1", vec![]);
        machine.is_failing = true;
        machine.last_failure_count = 3;
        client.storage().update_or_create_machine(machine).await.unwrap();
        let mut buf = Vec::new();

        reset(&client, "m1", true, &mut buf).await.unwrap();

        let m1 = client.storage().get_machine("m1").await.unwrap().unwrap();
        assert!(!m1.is_failing);
        assert_eq!(m1.last_failure_count, 0);
        assert!(output(&buf).starts_with("Machine m1 reset"));
    }

    #[tokio::test]
    async fn reset_unknown_machine_fails() {
        let client = client(FakeApi::default());
        let mut buf = Vec::new();
        assert!(reset(&client, "ghost", true, &mut buf).await.is_err());
    }
}

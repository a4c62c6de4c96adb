//! One-shot command execution: `chatops submit`.
//!
//! Runs the same orchestrator the server uses, in-process, against the
//! configured job database. Missing slots are asked for interactively and the
//! command is resubmitted with the answers as slot overrides.

use anyhow::{Context, Result};
use chatops::config::ChatopsConfig;
use chatops::nlu::SlotPrompt;
use chatops::orchestrator::{ClientEvent, CommandRequest, Orchestrator, SubmitOutcome};
use chatops::store::SqliteJobStore;
use chatops::ui::JobProgress;
use chatops_common::{Environment, JobStatus, Slot, SlotOverrides};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct SubmitArgs {
    pub command: String,
    pub user_id: String,
    pub service: Option<String>,
    pub environment: Option<Environment>,
    pub replicas: Option<u32>,
    pub no_nlu: bool,
    pub interactive: bool,
    pub verbose: bool,
}

pub async fn cmd_submit(config: &ChatopsConfig, args: SubmitArgs) -> Result<()> {
    let store = SqliteJobStore::open(&config.server.db_path).with_context(|| {
        format!(
            "Failed to open job store at {}",
            config.server.db_path.display()
        )
    })?;
    let orchestrator = Orchestrator::from_config(config, Arc::new(store))?;
    let session_id = format!("cli:{}", uuid::Uuid::new_v4());
    let mut events = orchestrator.open_session(&session_id);

    let mut request = CommandRequest {
        command: args.command.clone(),
        user_id: args.user_id.clone(),
        enable_nlu: args.no_nlu.then_some(false),
        slot_overrides: SlotOverrides {
            service: args.service.clone(),
            environment: args.environment,
            replicas: args.replicas,
        },
        ..Default::default()
    };

    let progress = loop {
        let progress = JobProgress::new(args.verbose);
        match orchestrator.submit(&session_id, request.clone()).await? {
            SubmitOutcome::Created(_) => break progress,
            SubmitOutcome::MissingSlots { prompt, .. } => {
                discard_pending(&mut events);
                if !args.interactive {
                    anyhow::bail!(
                        "{} Pass --{} to provide it.",
                        prompt.question,
                        flag_for(prompt.slot)
                    );
                }
                let answer = ask(&prompt)?;
                apply_answer(&mut request.slot_overrides, prompt.slot, &answer)?;
            }
            SubmitOutcome::Unrecognized { .. } => {
                render_pending(&progress, &mut events);
                anyhow::bail!("Command not recognized: {}", args.command);
            }
            SubmitOutcome::Busy { active_job_id } => {
                anyhow::bail!(
                    "Session is busy with job {}",
                    active_job_id.unwrap_or_default()
                );
            }
        }
    };

    let mut job_id = None;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let ClientEvent::StatusUpdated { job } = &event {
                    job_id = Some(job.id.clone());
                }
                if progress.handle(&event) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                progress.finish();
                orchestrator.shutdown();
                eprintln!("Stopped following the job; it keeps its last recorded status.");
                return Ok(());
            }
        }
    }
    orchestrator.close_session(&session_id);

    let Some(job_id) = job_id else {
        anyhow::bail!("No job was created");
    };
    let job = orchestrator.get_job(&job_id).await?;
    match job.status {
        JobStatus::Completed => Ok(()),
        status => anyhow::bail!("Job {} ended {}", job.id, status),
    }
}

/// Events already queued for the session, rendered in order.
fn render_pending(progress: &JobProgress, events: &mut mpsc::UnboundedReceiver<ClientEvent>) {
    while let Ok(event) = events.try_recv() {
        progress.handle(&event);
    }
    progress.finish();
}

fn discard_pending(events: &mut mpsc::UnboundedReceiver<ClientEvent>) {
    while events.try_recv().is_ok() {}
}

fn ask(prompt: &SlotPrompt) -> Result<String> {
    use dialoguer::{Input, Select, theme::ColorfulTheme};

    let theme = ColorfulTheme::default();
    if prompt.choices.is_empty() {
        Ok(Input::<String>::with_theme(&theme)
            .with_prompt(&prompt.question)
            .interact_text()?)
    } else {
        let selection = Select::with_theme(&theme)
            .with_prompt(&prompt.question)
            .items(&prompt.choices[..])
            .default(0)
            .interact()?;
        Ok(prompt.choices[selection].clone())
    }
}

fn flag_for(slot: Slot) -> &'static str {
    match slot {
        Slot::Action => "command",
        Slot::Service => "service",
        Slot::Environment => "env",
        Slot::Replicas => "replicas",
    }
}

/// Record an answer for `slot` as an override on the next submission.
fn apply_answer(overrides: &mut SlotOverrides, slot: Slot, answer: &str) -> Result<()> {
    let answer = answer.trim();
    match slot {
        Slot::Service => {
            if answer.is_empty() {
                anyhow::bail!("Service cannot be empty");
            }
            overrides.service = Some(answer.to_string());
        }
        Slot::Environment => {
            overrides.environment = Some(answer.parse().map_err(anyhow::Error::msg)?);
        }
        Slot::Replicas => {
            let replicas = answer
                .parse()
                .with_context(|| format!("Invalid replica count: {}", answer))?;
            overrides.replicas = Some(replicas);
        }
        Slot::Action => anyhow::bail!("The action cannot be filled in; rephrase the command"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_answer_fills_each_slot() {
        let mut overrides = SlotOverrides::default();
        apply_answer(&mut overrides, Slot::Service, " worker ").unwrap();
        apply_answer(&mut overrides, Slot::Environment, "prod").unwrap();
        apply_answer(&mut overrides, Slot::Replicas, "4").unwrap();

        assert_eq!(overrides.service.as_deref(), Some("worker"));
        assert_eq!(overrides.environment, Some(Environment::Production));
        assert_eq!(overrides.replicas, Some(4));
    }

    #[test]
    fn test_apply_answer_rejects_bad_input() {
        let mut overrides = SlotOverrides::default();
        assert!(apply_answer(&mut overrides, Slot::Environment, "moon").is_err());
        assert!(apply_answer(&mut overrides, Slot::Replicas, "many").is_err());
        assert!(apply_answer(&mut overrides, Slot::Service, "  ").is_err());
        assert!(apply_answer(&mut overrides, Slot::Action, "deploy").is_err());
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_flags_match_cli() {
        assert_eq!(flag_for(Slot::Environment), "env");
        assert_eq!(flag_for(Slot::Replicas), "replicas");
    }
}

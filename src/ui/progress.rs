use chatops_common::{Job, JobStatus};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::orchestrator::ClientEvent;
use crate::ui::icons::{QUESTION, status_icon};

/// Terminal rendering of one session's event stream for `chatops submit`.
///
/// A single spinner carries the latest job status; chat replies, polling
/// failures and the final status are printed above it.
pub struct JobProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl JobProgress {
    pub fn new(verbose: bool) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style);
        Self { bar, verbose }
    }

    /// Print a line above the spinner, falling back to `eprintln!`.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.bar.is_hidden() {
            eprintln!("{}", msg.as_ref());
        } else {
            self.bar.println(msg.as_ref());
        }
    }

    /// Render one event. Returns `true` once the session has gone idle,
    /// i.e. the command finished or was turned away.
    pub fn handle(&self, event: &ClientEvent) -> bool {
        match event {
            ClientEvent::TypingStarted => {
                self.bar.set_message(style("Working on it...").dim().to_string());
                self.bar.enable_steady_tick(Duration::from_millis(100));
            }
            ClientEvent::ResponseAdded { text, prompt, .. } => {
                let prefix = if prompt.is_some() {
                    QUESTION.to_string()
                } else {
                    String::new()
                };
                self.print_line(format!("{}{}", prefix, text));
            }
            ClientEvent::StatusUpdated { job } => {
                self.bar.set_message(status_line(job));
                if job.status.is_terminal() {
                    self.print_line(status_line(job));
                    let shown = if self.verbose { job.output.len() } else { 5 };
                    let skip = job.output.len().saturating_sub(shown);
                    for line in job.output.iter().skip(skip) {
                        self.print_line(format!("    {}", style(line).dim()));
                    }
                }
            }
            ClientEvent::PollingFailed { error, .. } => {
                self.print_line(style(error).yellow().to_string());
            }
            ClientEvent::BusyRejected { message, .. } => {
                self.print_line(style(message).yellow().to_string());
            }
            ClientEvent::LoadingStateChanged { loading } => {
                if !*loading {
                    self.finish();
                    return true;
                }
            }
        }
        false
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// One-line job summary: icon, intent, colored status, id.
pub fn status_line(job: &Job) -> String {
    let status = match job.status {
        JobStatus::Queued => style(job.status.as_str()).dim(),
        JobStatus::Running => style(job.status.as_str()).cyan(),
        JobStatus::Completed => style(job.status.as_str()).green().bold(),
        JobStatus::Failed => style(job.status.as_str()).red().bold(),
        JobStatus::Cancelled => style(job.status.as_str()).yellow(),
    };
    let mut line = format!(
        "{}{} [{}] {}",
        status_icon(job.status),
        job.parsed_intent.summary(),
        status,
        style(&job.id).dim()
    );
    if let Some(error) = &job.error_message {
        line.push_str(&format!(": {}", error));
    }
    line
}

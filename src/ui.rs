//! Terminal reports for the administrative commands.
//!
//! Uses the `console` crate for colours: green for completed work, red for
//! dead jobs, yellow for jobs waiting on a retry.

use chrono::{DateTime, Utc};
use console::Style;

use crate::state_machine::{Job, JobState};
use crate::stats::QueueStats;
use crate::store::StateCount;
use crate::supervisor::StopOutcome;

const COMMAND_WIDTH: usize = 40;

/// Styles shared by every report.
pub struct Palette {
    green: Style,
    red: Style,
    yellow: Style,
    cyan: Style,
    bold: Style,
    dim: Style,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            cyan: Style::new().cyan(),
            bold: Style::new().bold(),
            dim: Style::new().dim(),
        }
    }
}

impl Palette {
    fn state(&self, state: JobState) -> &Style {
        match state {
            JobState::Completed => &self.green,
            JobState::Dead => &self.red,
            JobState::Failed => &self.yellow,
            JobState::Processing => &self.cyan,
            JobState::Pending => &self.dim,
        }
    }

    fn heading(&self, text: &str) {
        println!("{}", self.bold.apply_to(format!("─── {text} ───")));
    }

    pub fn enqueued(&self, job: &Job, now: DateTime<Utc>) {
        let mut line = format!("Enqueued job {}: {}", job.id, job.command);
        if job.priority != 0 {
            line.push_str(&format!(" [priority: {}]", job.priority));
        }
        if let Some(timeout) = job.timeout {
            line.push_str(&format!(" [timeout: {timeout}s]"));
        }
        if job.next_run_at > now {
            line.push_str(&format!(" (scheduled for {})", job.next_run_at.to_rfc3339()));
        }
        println!("{} {line}", self.green.apply_to("✓"));
    }

    pub fn status(&self, counts: &[StateCount], running: Option<i32>) {
        self.heading("Job Queue Status");
        for c in counts {
            println!(
                "  {:<12} {:>6}",
                self.state(c.state).apply_to(c.state.as_str()),
                c.count
            );
        }
        println!();
        match running {
            Some(pid) => println!(
                "Workers are {} (Primary PID: {pid})",
                self.green.apply_to("RUNNING")
            ),
            None => println!("Workers are {}", self.red.apply_to("STOPPED")),
        }
    }

    pub fn jobs(&self, title: &str, jobs: &[Job]) {
        self.heading(title);
        if jobs.is_empty() {
            println!("  {}", self.dim.apply_to("(no jobs)"));
            return;
        }
        println!(
            "  {:<8}  {:<10}  {:>8}  {:<40}  {:>8}  {:>10}  {}",
            "id", "state", "priority", "command", "attempts", "duration", "next run"
        );
        let now = Utc::now();
        for job in jobs {
            let next_run = if job.is_eligible(now) {
                "ready".to_string()
            } else if job.state.is_claimable() {
                job.next_run_at.to_rfc3339()
            } else {
                "-".to_string()
            };
            let duration = job
                .duration
                .map(|d| format!("{d}ms"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<8}  {:<10}  {:>8}  {:<40}  {:>8}  {:>10}  {}",
                job.short_id(),
                self.state(job.state).apply_to(job.state.as_str()),
                job.priority,
                truncate(&job.command, COMMAND_WIDTH),
                format!("{}/{}", job.attempts, job.max_retries),
                duration,
                next_run,
            );
        }
    }

    pub fn job_detail(&self, job: &Job) {
        self.heading(&format!("Job {}", job.id));
        println!("Command:   {}", job.command);
        println!("State:     {}", self.state(job.state).apply_to(job.state.as_str()));
        println!("Priority:  {}", job.priority);
        println!("Attempts:  {}/{}", job.attempts, job.max_retries);
        if let Some(timeout) = job.timeout {
            println!("Timeout:   {timeout}s");
        }
        println!("Created:   {}", job.created_at.to_rfc3339());
        println!("Next run:  {}", job.next_run_at.to_rfc3339());
        if let Some(started) = job.started_at {
            println!("Started:   {}", started.to_rfc3339());
        }
        if let Some(completed) = job.completed_at {
            println!("Completed: {}", completed.to_rfc3339());
        }
        if let Some(duration) = job.duration {
            println!("Duration:  {duration}ms");
        }

        println!();
        match &job.output {
            Some(output) => {
                self.heading("Output");
                println!("{output}");
            }
            None if job.state.is_terminal() => {
                println!("{}", self.dim.apply_to("No output recorded."))
            }
            None => println!("{}", self.dim.apply_to("No output available yet.")),
        }
    }

    pub fn stats(&self, stats: &QueueStats) {
        self.heading("Queue Statistics");
        println!("Total jobs: {}", stats.total);
        for c in &stats.counts {
            println!(
                "  {:<12} {:>6}",
                self.state(c.state).apply_to(c.state.as_str()),
                c.count
            );
        }
        if let Some(rate) = stats.success_rate() {
            println!("Success rate: {rate:.2}%");
        }

        if let Some(d) = &stats.durations {
            println!();
            self.heading("Execution Time (completed jobs)");
            println!("  Average: {:.2}ms", d.average);
            println!("  p50:     {}ms", d.p50);
            println!("  p90:     {}ms", d.p90);
            println!("  p99:     {}ms", d.p99);
            println!("  Min:     {}ms", d.min);
            println!("  Max:     {}ms", d.max);
        }

        if !stats.slowest.is_empty() {
            println!();
            self.heading(&format!("Top {} Slowest Jobs", stats.slowest.len()));
            for job in &stats.slowest {
                println!(
                    "  {}: {} - {}ms",
                    job.id.get(..8).unwrap_or(&job.id),
                    truncate(&job.command, COMMAND_WIDTH),
                    job.duration_ms
                );
            }
        }

        if stats.uses_priorities() {
            println!();
            self.heading("Priority Distribution");
            for (priority, count) in &stats.priorities {
                println!("  Priority {priority}: {count} jobs");
            }
        }

        if stats.with_timeout > 0 {
            println!();
            println!("Jobs with timeout configured: {}", stats.with_timeout);
        }
    }

    pub fn stopped(&self, outcome: StopOutcome) {
        match outcome {
            StopOutcome::NotRunning => println!("Workers are not running."),
            StopOutcome::Stale { pid } => println!(
                "{} Stale PID file found (PID: {pid}). Cleaning up.",
                self.yellow.apply_to("↻")
            ),
            StopOutcome::Signalled { pid } => println!(
                "{} Sent stop signal to primary process (PID: {pid}).",
                self.green.apply_to("✓")
            ),
        }
    }

    pub fn revived(&self, job: &Job) {
        println!(
            "{} Job {} moved from DLQ to 'pending' queue.",
            self.green.apply_to("✓"),
            job.short_id()
        );
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {message}", self.red.apply_to("✗"));
    }
}

/// Cut `text` to at most `width` characters, marking the cut with `…`.
fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

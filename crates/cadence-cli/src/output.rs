//! Plain-text rendering for the CLI.

use std::fmt::Write;

use cadence_core::domain::format_due_date;
use cadence_core::{CycleSummary, StatusCounts, Task, TaskStatus};

const NAME_WIDTH: usize = 28;

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        return name.to_string();
    }
    let mut short: String = name.chars().take(width.saturating_sub(1)).collect();
    short.push('~');
    short
}

pub fn task_table(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return "no tasks\n".to_string();
    }
    // Display impls ignore width, so every column is rendered to a string first.
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>5}  {:<NAME_WIDTH$}  {:>3}  {:<16}  {:<8}  {:<9}",
        "ID", "NAME", "PRI", "DUE", "CATEGORY", "STATUS"
    );
    for task in tasks {
        let _ = writeln!(
            out,
            "{:>5}  {:<NAME_WIDTH$}  {:>3}  {:<16}  {:<8}  {:<9}",
            task.id.to_string(),
            truncate(&task.name, NAME_WIDTH),
            task.priority.to_string(),
            format_due_date(&task.due_date),
            task.category.as_str(),
            task.status.as_str(),
        );
    }
    out
}

pub fn task_detail(task: &Task) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "id:        {}", task.id);
    let _ = writeln!(out, "name:      {}", task.name);
    let _ = writeln!(out, "priority:  {}", task.priority);
    let _ = writeln!(out, "due:       {}", format_due_date(&task.due_date));
    let _ = writeln!(out, "category:  {}", task.category);
    let _ = writeln!(out, "status:    {}", task.status);
    if task.cancel_requested && task.status == TaskStatus::Running {
        let _ = writeln!(out, "           (cancel requested)");
    }
    if let Some(error) = &task.last_error {
        let _ = writeln!(out, "error:     {error}");
    }
    let _ = writeln!(out, "created:   {}", task.created_at.to_rfc3339());
    let _ = writeln!(out, "updated:   {}", task.updated_at.to_rfc3339());
    out
}

pub fn counts(counts: &StatusCounts) -> String {
    let mut out = String::new();
    for status in TaskStatus::ALL {
        let _ = writeln!(out, "{:<10} {:>5}", status.as_str(), counts.get(status));
    }
    let _ = writeln!(out, "{:<10} {:>5}", "total", counts.total());
    out
}

pub fn cycle(summary: &CycleSummary) -> String {
    if summary.is_empty() {
        return "no tasks due\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}: dispatched {}, completed {}, failed {}, cancelled {}",
        summary.cycle_id, summary.dispatched, summary.completed, summary.failed, summary.cancelled
    );
    let order: Vec<String> = summary.dispatch_order.iter().map(|id| id.to_string()).collect();
    let _ = writeln!(out, "order: {}", order.join(" "));
    out
}

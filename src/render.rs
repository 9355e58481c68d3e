//! Plain-text output for the CLI.

use crate::core::date::format_due;
use crate::core::task::{Task, TaskList};
use crate::core::text::truncate;

const TITLE_WIDTH: usize = 40;

/// Task table. `show_all` adds a status column and the done count.
pub fn task_table(tasks: &TaskList, show_all: bool) -> String {
    let rows: Vec<&Task> = tasks.list(show_all);
    if rows.is_empty() {
        return "No tasks\n".to_string();
    }

    let mut out = String::new();
    if show_all {
        out.push_str(&format!("{:<4} | {:<40} | {:<8} | {}\n", "ID", "Title", "Due", "Status"));
        out.push_str(&"-".repeat(70));
    } else {
        out.push_str(&format!("{:<4} | {:<40} | {}\n", "ID", "Title", "Due"));
        out.push_str(&"-".repeat(60));
    }
    out.push('\n');

    for task in rows {
        let title = truncate(&task.title, TITLE_WIDTH);
        let due = format_due(task.due);
        if show_all {
            let status = if task.completed() { "done" } else { "pending" };
            out.push_str(&format!("{:<4} | {:<40} | {:<8} | {}\n", task.id, title, due, status));
        } else {
            out.push_str(&format!("{:<4} | {:<40} | {}\n", task.id, title, due));
        }
    }

    out.push('\n');
    if show_all {
        out.push_str(&format!("{} pending | {} done\n", tasks.pending_count(), tasks.done_count()));
    } else {
        out.push_str(&format!("{} pending\n", tasks.pending_count()));
    }
    out
}

/// One line for status bars.
pub fn summary_line(tasks: &TaskList) -> String {
    format!("Todo: {}", tasks.pending_count())
}

pub const SUMMARY_UNAVAILABLE: &str = "Todo: -";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> TaskList {
        let mut tasks = TaskList::new();
        tasks.add("write report", NaiveDate::from_ymd_opt(2025, 11, 15)).unwrap();
        tasks.add("reply to Sam", None).unwrap();
        tasks.complete(2).unwrap();
        tasks
    }

    #[test]
    fn empty_list() {
        assert_eq!(task_table(&TaskList::new(), false), "No tasks\n");
    }

    #[test]
    fn pending_table_hides_completed() {
        let out = task_table(&sample(), false);
        assert!(out.contains("write report"));
        assert!(out.contains("11/15"));
        assert!(!out.contains("reply to Sam"));
        assert!(out.ends_with("1 pending\n"));
    }

    #[test]
    fn full_table_has_status() {
        let out = task_table(&sample(), true);
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].ends_with("Status"));
        assert!(lines[3].starts_with("2    | reply to Sam"));
        assert!(lines[3].ends_with("| -        | done"));
        assert!(out.ends_with("1 pending | 1 done\n"));
    }

    #[test]
    fn long_titles_are_truncated() {
        let mut tasks = TaskList::new();
        tasks.add(&"x".repeat(80), None).unwrap();
        let out = task_table(&tasks, false);
        let row = out.lines().nth(2).unwrap();
        assert!(row.contains('…'));
        assert!(!row.contains(&"x".repeat(41)));
    }

    #[test]
    fn summary() {
        assert_eq!(summary_line(&sample()), "Todo: 1");
        assert_eq!(summary_line(&TaskList::new()), "Todo: 0");
    }
}

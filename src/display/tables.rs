//! Table formatting utilities for structured output.

use comfy_table::{
    Attribute, Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

use crate::assign::{Candidate, Match};
use crate::engine::BuildReport;
use crate::index::ClusterSummary;

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { table: themed() }
    }

    /// Set the table headers.
    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        self.table.set_header(header(&headers));
        self
    }

    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    /// Build and return the formatted table.
    pub fn build(self) -> String {
        self.table.to_string()
    }
}

fn themed() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table
}

fn header(titles: &[&str]) -> Vec<Cell> {
    titles
        .iter()
        .map(|title| Cell::new(title).add_attribute(Attribute::Bold))
        .collect()
}

/// Silhouette score of every tried k, with the chosen k highlighted.
pub fn create_build_table(report: &BuildReport) -> String {
    let mut table = themed();
    table.set_header(header(&["k", "Silhouette", ""]));

    for score in &report.result.scores {
        let chosen = score.k == report.result.k;
        let marker = if chosen {
            Cell::new("✓ chosen")
                .fg(Color::Green)
                .add_attribute(Attribute::Bold)
        } else {
            Cell::new("")
        };
        table.add_row(vec![
            Cell::new(score.k),
            Cell::new(format!("{:.4}", score.silhouette)),
            marker,
        ]);
    }

    table.to_string()
}

/// One row per assigned note.
pub fn create_assignment_table(matches: &[Match]) -> String {
    let mut table = themed();
    table.set_header(header(&["Note", "Code", "Description", "Score", "Cluster"]));

    for assignment in matches {
        table.add_row(vec![
            Cell::new(&assignment.source_id),
            Cell::new(assignment.code.id.as_str()).add_attribute(Attribute::Bold),
            Cell::new(&assignment.code.long_description),
            Cell::new(format!("{:.4}", assignment.score.get())),
            Cell::new(assignment.cluster),
        ]);
    }

    table.to_string()
}

/// Per-cluster candidates in ranking order.
///
/// Runners-up scoring within `margin` of the best are flagged as close calls.
pub fn create_candidate_table(candidates: &[Candidate], margin: f32) -> String {
    let mut table = themed();
    table.set_header(header(&["Rank", "Code", "Description", "Score", "Cluster", ""]));

    let best = candidates.first().map(|c| c.score.get());
    for (rank, candidate) in candidates.iter().enumerate() {
        let close = rank > 0 && best.is_some_and(|best| best - candidate.score.get() <= margin);
        let flag = if close {
            Cell::new("⚠ close").fg(Color::Yellow)
        } else {
            Cell::new("")
        };
        table.add_row(vec![
            Cell::new(rank + 1),
            Cell::new(candidate.code.id.as_str()),
            Cell::new(&candidate.code.long_description),
            Cell::new(format!("{:.4}", candidate.score.get())),
            Cell::new(candidate.cluster),
            flag,
        ]);
    }

    table.to_string()
}

/// Cluster sizes, optionally listing member codes with their short
/// descriptions.
pub fn create_cluster_table(summaries: &[ClusterSummary], members: bool) -> String {
    let mut table = themed();
    if members {
        table.set_header(header(&["Cluster", "Codes", "Members"]));
    } else {
        table.set_header(header(&["Cluster", "Codes"]));
    }

    let mut total = 0;
    for summary in summaries {
        total += summary.size;
        let mut row = vec![Cell::new(summary.cluster), Cell::new(summary.size)];
        if members {
            let lines: Vec<String> = summary
                .codes
                .iter()
                .map(|c| format!("{}  {}", c.id, c.short_description))
                .collect();
            row.push(Cell::new(lines.join("\n")));
        }
        table.add_row(row);
    }

    let mut footer = vec![
        Cell::new("Total").add_attribute(Attribute::Bold),
        Cell::new(total).add_attribute(Attribute::Bold),
    ];
    if members {
        footer.push(Cell::new(""));
    }
    table.add_row(footer);

    table.to_string()
}

//! Terminal output for the CLI: styled tables, spinners and themed
//! status lines.

pub mod progress;
pub mod tables;
pub mod theme;

pub use progress::{create_spinner, with_spinner};
pub use tables::{
    TableBuilder, create_assignment_table, create_build_table, create_candidate_table,
    create_cluster_table,
};
pub use theme::{THEME, Theme};

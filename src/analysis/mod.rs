pub mod deletion_plan;
pub mod hardlinks;
pub mod seasons;

pub use deletion_plan::{plan_deletions, DeletePlan, DeletePlanEntry, GroupDecision, PlanPolicy, PlanReason};
pub use hardlinks::{analyze_waste, path_view_warnings, HardlinkSet, MissingHardlink, WasteReport};
pub use seasons::{season_conflicts, SeasonConflict};

mod change;
mod differ;
mod flatten;

pub use change::{AttributeChange, Change, ChangeSet, ChangeType, DiffSummary};
pub use differ::{desired_attributes, diff, DiffOptions};
pub use flatten::flatten;

pub mod group;
pub mod parse;

pub use group::{classify, group_files, GroupId, Grouping, IdentityGroup};
pub use parse::{parse_path, ParsedName};

pub mod branch;
pub mod closure;
pub mod commit;
pub mod component;
pub mod errors;
pub mod integrity;
pub mod merge;

pub use branch::*;
pub use closure::*;
pub use commit::*;
pub use component::*;
pub use errors::*;
pub use integrity::*;
pub use merge::*;

/// Identifier type used across the content graph
pub type Id = String;

/// Millisecond epoch timestamp used for branch bases/heads and version windows
pub type Timestamp = i64;

/// Release date in `yyyymmdd` form (effective time of a published component)
pub type EffectiveTime = i32;

/// Path of the root branch; every other branch path is a slash-delimited
/// descendant of it
pub const ROOT_BRANCH: &str = "MAIN";

/// Generate a unique identifier (reference-set member ids, job ids)
pub fn generate_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

/// Parent of a slash-delimited branch path, `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_path_walks_up_one_level() {
        assert_eq!(parent_path("MAIN/A/A1"), Some("MAIN/A"));
        assert_eq!(parent_path("MAIN/A"), Some("MAIN"));
        assert_eq!(parent_path("MAIN"), None);
    }
}

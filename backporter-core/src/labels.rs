//! Label names the bot reads and writes.

pub const BACKPORT_PREFIX: &str = "backport/";
pub const BACKPORT_DONE: &str = "backport/done";
pub const BACKPORT_MANUAL: &str = "backport/manual";

pub const LGTM_PREFIX: &str = "lgtm/";
pub const LGTM_NEED_TWO: &str = "lgtm/need 2";
pub const LGTM_NEED_ONE: &str = "lgtm/need 1";
pub const LGTM_DONE: &str = "lgtm/done";

/// Labels describing the lifecycle of one particular pull request. They are
/// never copied onto a backport, which has a lifecycle of its own.
const LIFECYCLE_PREFIXES: &[&str] = &[LGTM_PREFIX, BACKPORT_PREFIX, "reviewed/", "size/"];

/// Label requesting a backport to the given major.minor line, e.g. `backport/1.19`
pub fn backport_label(major_minor: &str) -> String {
    format!("{}{}", BACKPORT_PREFIX, major_minor)
}

pub fn is_lifecycle_label(name: &str) -> bool {
    LIFECYCLE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

pub fn is_backport_label(name: &str) -> bool {
    name.starts_with(BACKPORT_PREFIX)
}

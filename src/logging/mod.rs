pub(super) mod json_log;
pub(super) mod multilog;

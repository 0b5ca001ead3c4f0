use crate::config::FeatureFlags;
use serde::Serialize;

/// 31-based polynomial hash over the UTF-16 code units of `viewer_id`,
/// wrapping on overflow. Stable across processes and platforms.
pub fn viewer_hash(viewer_id: &str) -> i32 {
    viewer_id
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// The viewer's bucket in `0..100`. Independent of the rollout percentage,
/// so raising the percentage only ever adds viewers to the cohort.
pub fn bucket(viewer_id: &str) -> u8 {
    (viewer_hash(viewer_id).unsigned_abs() % 100) as u8
}

pub fn should_use_compiled_path(viewer_id: &str, global_flag: bool, rollout_percent: u8) -> bool {
    global_flag && bucket(viewer_id) < rollout_percent.min(100)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderPath {
    Compiled,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutController {
    enabled: bool,
    percent: u8,
}

impl RolloutController {
    pub fn new(enabled: bool, percent: u8) -> Self {
        Self {
            enabled,
            percent: percent.min(100),
        }
    }

    pub fn from_flags(flags: &FeatureFlags) -> Self {
        Self::new(flags.template_compilation, flags.rollout_percent)
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn bucket(&self, viewer_id: &str) -> u8 {
        bucket(viewer_id)
    }

    pub fn route(&self, viewer_id: &str) -> RenderPath {
        if should_use_compiled_path(viewer_id, self.enabled, self.percent) {
            RenderPath::Compiled
        } else {
            RenderPath::Legacy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", 0)]
    #[case("a", 97)]
    #[case("ab", 3105)]
    #[case("hello", 99162322)]
    fn test_viewer_hash(#[case] viewer_id: &str, #[case] expected: i32) {
        assert_eq!(viewer_hash(viewer_id), expected);
    }

    #[test]
    fn test_viewer_hash_wraps() {
        let hash = viewer_hash("a fairly long viewer identifier that overflows");
        assert!(u32::from(bucket("a fairly long viewer identifier that overflows")) < 100);
        assert_eq!(hash, viewer_hash("a fairly long viewer identifier that overflows"));
    }

    #[rstest]
    #[case::off(false, 100, false)]
    #[case::zero(true, 0, false)]
    #[case::full(true, 100, true)]
    #[case::over(true, 255, true)]
    fn test_should_use_compiled_path(
        #[case] global_flag: bool,
        #[case] percent: u8,
        #[case] expected: bool,
    ) {
        assert_eq!(
            should_use_compiled_path("viewer-42", global_flag, percent),
            expected
        );
    }

    #[test]
    fn test_bucket_threshold() {
        // "hello" hashes to 99162322, bucket 22.
        assert_eq!(bucket("hello"), 22);
        assert!(!should_use_compiled_path("hello", true, 22));
        assert!(should_use_compiled_path("hello", true, 23));
    }

    #[test]
    fn test_controller_routes() {
        let flags = FeatureFlags {
            template_compilation: true,
            template_islands: false,
            rollout_percent: 50,
        };
        let controller = RolloutController::from_flags(&flags);

        assert_eq!(controller.bucket("hello"), 22);
        assert_eq!(controller.route("hello"), RenderPath::Compiled);
        assert_eq!(
            RolloutController::new(false, 100).route("hello"),
            RenderPath::Legacy
        );
    }
}

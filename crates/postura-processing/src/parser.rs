//! 处理结果解析

use postura_core::{AnalysisId, AnglePolicy, Landmark, NewKeypoint, PosturaError, Report2D, Result};
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

fn angle_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+\.\d+").expect("angle pattern is a valid regex"))
}

/// 提取文本中第一个 `\d+\.\d+` 形式的小数
pub fn extract_angle(text: &str) -> Option<f64> {
    angle_pattern()
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
}

/// 按策略解析Cobb角
///
/// `DefaultToZero` 时找不到数值返回0并记录警告；`Reject` 时返回 `MeasurementUnparseable`。
pub fn parse_angle(text: &str, policy: AnglePolicy) -> Result<f64> {
    match (extract_angle(text), policy) {
        (Some(angle), _) => Ok(angle),
        (None, AnglePolicy::DefaultToZero) => {
            warn!("No Cobb angle found in processing output, defaulting to 0");
            Ok(0.0)
        }
        (None, AnglePolicy::Reject) => Err(PosturaError::MeasurementUnparseable {
            text: text.chars().take(120).collect(),
        }),
    }
}

/// 把报告中的13个标志点映射为关键点记录，顺序与 `Landmark::ALL` 一致
pub fn build_keypoint_set(report: &Report2D, analysis_id: AnalysisId) -> Vec<NewKeypoint> {
    Landmark::ALL
        .iter()
        .map(|&landmark| {
            let point = report.point(landmark);
            NewKeypoint {
                analysis_id,
                landmark,
                x: point.x,
                y: point.y,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use postura_core::{ErrorKind, Point, PostureIndices};
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_angle() {
        assert_eq!(parse_angle("Cobb angle: 12.50 degrees", AnglePolicy::DefaultToZero).unwrap(), 12.5);
        assert_eq!(parse_angle("no angle found", AnglePolicy::DefaultToZero).unwrap(), 0.0);
        assert_eq!(extract_angle("T4-T11: 7.25, L1-L4: 3.5"), Some(7.25));
        // 整数不匹配
        assert_eq!(extract_angle("angle 12 degrees"), None);
    }

    #[test]
    fn test_reject_policy() {
        let err = parse_angle("no angle found", AnglePolicy::Reject).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MeasurementUnparseable);
        assert_eq!(parse_angle("33.1", AnglePolicy::Reject).unwrap(), 33.1);
    }

    #[test]
    fn test_angle_pattern_is_shared() {
        assert!(std::ptr::eq(angle_pattern(), angle_pattern()));
        assert_eq!(angle_pattern().as_str(), r"\d+\.\d+");
    }

    fn report_from(coords: &[(f64, f64)]) -> Report2D {
        let p = |i: usize| Point {
            x: coords[i].0,
            y: coords[i].1,
        };
        Report2D {
            c7: p(0),
            t7: p(1),
            left_hip: p(2),
            right_hip: p(3),
            mid_hip: p(4),
            left_scapula: p(5),
            right_scapula: p(6),
            left_shoulder: p(7),
            right_shoulder: p(8),
            left_side: p(9),
            right_side: p(10),
            left_under_arm: p(11),
            right_under_arm: p(12),
            indices: PostureIndices::default(),
        }
    }

    #[test]
    fn test_keypoint_set_order() {
        let coords: Vec<(f64, f64)> = (0..13).map(|i| (i as f64, i as f64 * 2.0)).collect();
        let keypoints = build_keypoint_set(&report_from(&coords), AnalysisId(4));

        assert_eq!(keypoints[0].landmark, Landmark::C7);
        assert_eq!(keypoints[12].landmark, Landmark::RightUnderArm);
        assert_eq!(keypoints[4].landmark, Landmark::MidHip);
        assert_eq!((keypoints[4].x, keypoints[4].y), (4.0, 8.0));
    }

    proptest! {
        #[test]
        fn prop_keypoint_set_is_total(
            coords in prop::collection::vec((-1e4f64..1e4, -1e4f64..1e4), 13),
            owner in any::<i64>(),
        ) {
            let report = report_from(&coords);
            let keypoints = build_keypoint_set(&report, AnalysisId(owner));

            prop_assert_eq!(keypoints.len(), 13);
            let names: HashSet<Landmark> = keypoints.iter().map(|k| k.landmark).collect();
            prop_assert_eq!(names.len(), 13);
            for keypoint in &keypoints {
                prop_assert_eq!(keypoint.analysis_id, AnalysisId(owner));
                let point = report.point(keypoint.landmark);
                prop_assert_eq!((keypoint.x, keypoint.y), (point.x, point.y));
            }
        }

        #[test]
        fn prop_formatted_angle_round_trips(angle in 0u32..18000) {
            let text = format!("Cobb angle: {}.{:02} degrees", angle / 100, angle % 100);
            let parsed = parse_angle(&text, AnglePolicy::Reject).unwrap();
            prop_assert!((parsed - angle as f64 / 100.0).abs() < 1e-9);
        }
    }
}

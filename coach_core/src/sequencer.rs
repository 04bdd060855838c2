//! Flattens a nested workout plan into the linear step list a session runs.
//!
//! Traversal is depth-first pre-order. `Repeat(n, children)` expands its
//! children `n` times, each pass tagged `"Round i/n"`; every other node
//! becomes one step per set. Indices are session-wide and start at 1.

use crate::plan::{IntervalNode, WorkoutPlan};
use crate::types::{FlattenedStep, RestAfter, StepKind};

/// Flatten a plan into its ordered steps
///
/// Pure and deterministic: flattening the same plan twice yields identical
/// steps. An empty plan yields an empty list.
pub fn flatten(plan: &WorkoutPlan) -> Vec<FlattenedStep> {
    let mut steps = Vec::new();
    let mut next_index = 1;
    flatten_nodes(&plan.intervals, None, &mut next_index, &mut steps);
    tracing::debug!("Flattened plan {:?} into {} steps", plan.name, steps.len());
    steps
}

fn flatten_nodes(
    nodes: &[IntervalNode],
    round_label: Option<&str>,
    next_index: &mut u32,
    out: &mut Vec<FlattenedStep>,
) {
    for node in nodes {
        match node {
            IntervalNode::Repeat { count, children } => {
                for round in 1..=*count {
                    let label = format!("Round {}/{}", round, count);
                    flatten_nodes(children, Some(label.as_str()), next_index, out);
                }
            }
            IntervalNode::Reps { sets, .. } => {
                let total = sets.map(|n| n.max(1));
                for set in 1..=total.unwrap_or(1) {
                    let set_info = total.map(|n| (set, n));
                    out.push(build_step(node, round_label, *next_index, set_info));
                    *next_index += 1;
                }
            }
            _ => {
                out.push(build_step(node, round_label, *next_index, None));
                *next_index += 1;
            }
        }
    }
}

fn build_step(
    node: &IntervalNode,
    round_label: Option<&str>,
    index: u32,
    set_info: Option<(u32, u32)>,
) -> FlattenedStep {
    let (display_label, display_details) = describe(node, set_info);

    let timer_seconds = match node {
        IntervalNode::Warmup { duration_seconds, .. }
        | IntervalNode::Cooldown { duration_seconds, .. }
        | IntervalNode::Timed { duration_seconds, .. } => Some(*duration_seconds),
        IntervalNode::Reps { rest_seconds, .. } => *rest_seconds,
        IntervalNode::Distance { .. } | IntervalNode::Repeat { .. } => None,
    };

    let kind = match node {
        IntervalNode::Reps { .. } => StepKind::Reps,
        IntervalNode::Distance { .. } => StepKind::Distance,
        IntervalNode::Warmup { .. }
        | IntervalNode::Cooldown { .. }
        | IntervalNode::Timed { .. }
        | IntervalNode::Repeat { .. } => StepKind::Timed,
    };

    let (rest_after, media_url) = match node {
        IntervalNode::Reps {
            rest_seconds,
            media_url,
            ..
        } => (RestAfter::from_rest_seconds(*rest_seconds), media_url.clone()),
        _ => (RestAfter::None, None),
    };

    FlattenedStep {
        index,
        source: node.clone(),
        display_label,
        display_details,
        round_label: round_label.map(str::to_string),
        timer_seconds,
        kind,
        media_url,
        rest_after,
        set_number: set_info.map(|(set, _)| set),
        total_sets: set_info.map(|(_, total)| total),
    }
}

fn describe(node: &IntervalNode, set_info: Option<(u32, u32)>) -> (String, String) {
    match node {
        IntervalNode::Warmup {
            duration_seconds,
            target,
        } => (
            "Warm Up".into(),
            with_target(format_duration(*duration_seconds), target),
        ),
        IntervalNode::Cooldown {
            duration_seconds,
            target,
        } => (
            "Cool Down".into(),
            with_target(format_duration(*duration_seconds), target),
        ),
        IntervalNode::Timed {
            duration_seconds,
            target,
        } => (
            target.clone().unwrap_or_else(|| "Interval".into()),
            format_duration(*duration_seconds),
        ),
        IntervalNode::Reps {
            reps, name, load, ..
        } => {
            let mut details = format!("{} reps", reps);
            if let Some(load) = load {
                details.push_str(&format!(" @ {} kg", load));
            }
            if let Some((set, total)) = set_info {
                details.push_str(&format!(" · Set {}/{}", set, total));
            }
            (name.clone(), details)
        }
        IntervalNode::Distance { meters, target } => (
            target.clone().unwrap_or_else(|| "Distance".into()),
            format_distance(*meters),
        ),
        IntervalNode::Repeat { count, .. } => (format!("Repeat x{}", count), String::new()),
    }
}

fn with_target(details: String, target: &Option<String>) -> String {
    match target {
        Some(target) => format!("{} · {}", details, target),
        None => details,
    }
}

/// Human-friendly duration, e.g. `45s`, `5 min`, `1 min 30s`
pub fn format_duration(seconds: u32) -> String {
    let (minutes, secs) = (seconds / 60, seconds % 60);
    match (minutes, secs) {
        (0, s) => format!("{}s", s),
        (m, 0) => format!("{} min", m),
        (m, s) => format!("{} min {}s", m, s),
    }
}

/// Human-friendly distance, e.g. `400 m`, `1.6 km`
pub fn format_distance(meters: u32) -> String {
    if meters < 1000 {
        return format!("{} m", meters);
    }
    let km = format!("{:.2}", f64::from(meters) / 1000.0);
    let km = km.trim_end_matches('0').trim_end_matches('.');
    format!("{} km", km)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reps(name: &str, sets: Option<u32>, rest_seconds: Option<u32>) -> IntervalNode {
        IntervalNode::Reps {
            sets,
            reps: 10,
            name: name.into(),
            load: None,
            rest_seconds,
            media_url: None,
        }
    }

    fn timed(secs: u32) -> IntervalNode {
        IntervalNode::Timed {
            duration_seconds: secs,
            target: None,
        }
    }

    #[test]
    fn test_scenario_a_warmup_then_three_squat_sets() {
        let plan = WorkoutPlan::new(
            "Legs",
            vec![
                IntervalNode::Warmup {
                    duration_seconds: 30,
                    target: None,
                },
                reps("Squat", Some(3), Some(30)),
            ],
        );

        let steps = flatten(&plan);
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].kind, StepKind::Timed);
        assert_eq!(steps[0].timer_seconds, Some(30));
        assert_eq!(steps[1].index, 2);
        assert_eq!(steps[1].rest_after_seconds(), Some(30));
        assert_eq!(steps[1].set_number, Some(1));
        assert_eq!(steps[3].set_number, Some(3));
        assert_eq!(steps[3].total_sets, Some(3));
        assert!(steps.iter().all(|s| s.display_label != "Rest"));
    }

    #[test]
    fn test_repeat_expansion_and_round_labels() {
        let plan = WorkoutPlan::new(
            "Intervals",
            vec![IntervalNode::Repeat {
                count: 3,
                children: vec![timed(40), timed(20)],
            }],
        );

        let steps = flatten(&plan);
        assert_eq!(steps.len(), 6);
        let rounds: Vec<_> = steps
            .iter()
            .map(|s| s.round_label.clone().unwrap())
            .collect();
        assert_eq!(
            rounds,
            vec![
                "Round 1/3", "Round 1/3", "Round 2/3", "Round 2/3", "Round 3/3", "Round 3/3"
            ]
        );
        let indices: Vec<u32> = steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_nested_repeat_uses_innermost_round() {
        let plan = WorkoutPlan::new(
            "Nested",
            vec![IntervalNode::Repeat {
                count: 2,
                children: vec![
                    timed(10),
                    IntervalNode::Repeat {
                        count: 2,
                        children: vec![timed(5)],
                    },
                ],
            }],
        );

        let steps = flatten(&plan);
        assert_eq!(steps.len(), 2 * (1 + 2));
        assert_eq!(steps[0].round_label.as_deref(), Some("Round 1/2"));
        assert_eq!(steps[1].round_label.as_deref(), Some("Round 1/2"));
        assert_eq!(steps[2].round_label.as_deref(), Some("Round 2/2"));
        assert_eq!(steps[3].round_label.as_deref(), Some("Round 2/2"));
    }

    #[test]
    fn test_manual_rest_differs_from_zero_rest() {
        let plan = WorkoutPlan::new(
            "Superset",
            vec![reps("Curl", None, None), reps("Press", None, Some(0))],
        );

        let steps = flatten(&plan);
        assert_eq!(steps[0].rest_after, RestAfter::Manual);
        assert!(steps[0].is_manual_rest_after());
        assert_eq!(steps[0].rest_after_seconds(), None);

        assert_eq!(steps[1].rest_after, RestAfter::None);
        assert!(!steps[1].is_manual_rest_after());
        assert_eq!(steps[1].rest_after_seconds(), Some(0));
        assert_ne!(steps[0].rest_after, steps[1].rest_after);
    }

    #[test]
    fn test_per_kind_timer_and_kind_rules() {
        let plan = WorkoutPlan::new(
            "Mixed",
            vec![
                IntervalNode::Cooldown {
                    duration_seconds: 120,
                    target: Some("easy".into()),
                },
                reps("Row", None, Some(45)),
                IntervalNode::Distance {
                    meters: 1600,
                    target: None,
                },
            ],
        );

        let steps = flatten(&plan);
        assert_eq!(steps[0].timer_seconds, Some(120));
        assert_eq!(steps[0].display_details, "2 min · easy");
        assert_eq!(steps[1].kind, StepKind::Reps);
        assert_eq!(steps[1].timer_seconds, Some(45));
        assert_eq!(steps[1].work_seconds(), None);
        assert_eq!(steps[1].set_number, None);
        assert_eq!(steps[2].kind, StepKind::Distance);
        assert_eq!(steps[2].timer_seconds, None);
        assert_eq!(steps[2].display_details, "1.6 km");
    }

    #[test]
    fn test_flatten_is_deterministic() {
        let plan = crate::catalog::get_builtin_plan("leg-day").unwrap();
        assert_eq!(flatten(plan), flatten(plan));
    }

    #[test]
    fn test_empty_plan() {
        let plan = WorkoutPlan::new("Nothing", vec![]);
        assert!(flatten(&plan).is_empty());
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(300), "5 min");
        assert_eq!(format_duration(90), "1 min 30s");
        assert_eq!(format_distance(400), "400 m");
        assert_eq!(format_distance(5000), "5 km");
        assert_eq!(format_distance(1250), "1.25 km");
    }
}

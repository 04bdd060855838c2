//! Built-in demo plans.
//!
//! Used by the CLI (`coach plans`, `--builtin`) and by tests. Between them
//! the plans cover every node kind, nested repeats and the three rest
//! flavours (manual, explicit zero, timed).

use crate::plan::{IntervalNode, WorkoutPlan};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Cached built-in plans, keyed by id
static BUILTIN_PLANS: Lazy<BTreeMap<String, WorkoutPlan>> = Lazy::new(build_builtin_plans);

/// Look up a built-in plan by id
pub fn get_builtin_plan(id: &str) -> Option<&'static WorkoutPlan> {
    BUILTIN_PLANS.get(id)
}

/// Ids of all built-in plans, sorted
pub fn builtin_plan_ids() -> impl Iterator<Item = &'static str> {
    BUILTIN_PLANS.keys().map(String::as_str)
}

/// All built-in plans, sorted by id
pub fn builtin_plans() -> impl Iterator<Item = &'static WorkoutPlan> {
    BUILTIN_PLANS.values()
}

fn build_builtin_plans() -> BTreeMap<String, WorkoutPlan> {
    let plans = vec![leg_day(), superset(), tempo_run()];
    plans
        .into_iter()
        .filter_map(|plan| plan.id.clone().map(|id| (id, plan)))
        .collect()
}

fn with_id(mut plan: WorkoutPlan, id: &str) -> WorkoutPlan {
    plan.id = Some(id.to_string());
    plan
}

fn leg_day() -> WorkoutPlan {
    with_id(
        WorkoutPlan::new(
            "Leg Day",
            vec![
                IntervalNode::Warmup {
                    duration_seconds: 300,
                    target: Some("easy".into()),
                },
                IntervalNode::Reps {
                    sets: Some(3),
                    reps: 8,
                    name: "Back Squat".into(),
                    load: Some(80.0),
                    rest_seconds: Some(90),
                    media_url: Some("https://www.youtube.com/watch?v=ultWZbUMPL8".into()),
                },
                IntervalNode::Reps {
                    sets: Some(3),
                    reps: 10,
                    name: "Romanian Deadlift".into(),
                    load: Some(60.0),
                    rest_seconds: Some(60),
                    media_url: None,
                },
                IntervalNode::Reps {
                    sets: Some(2),
                    reps: 12,
                    name: "Walking Lunge".into(),
                    load: None,
                    rest_seconds: None,
                    media_url: None,
                },
                IntervalNode::Cooldown {
                    duration_seconds: 180,
                    target: None,
                },
            ],
        ),
        "leg-day",
    )
}

fn superset() -> WorkoutPlan {
    with_id(
        WorkoutPlan::new(
            "Upper Superset",
            vec![
                IntervalNode::Warmup {
                    duration_seconds: 120,
                    target: None,
                },
                IntervalNode::Repeat {
                    count: 3,
                    children: vec![
                        // Straight into the second exercise.
                        IntervalNode::Reps {
                            sets: None,
                            reps: 10,
                            name: "Push-up".into(),
                            load: None,
                            rest_seconds: Some(0),
                            media_url: None,
                        },
                        IntervalNode::Reps {
                            sets: None,
                            reps: 8,
                            name: "Bent-over Row".into(),
                            load: Some(40.0),
                            rest_seconds: None,
                            media_url: None,
                        },
                    ],
                },
                IntervalNode::Cooldown {
                    duration_seconds: 120,
                    target: None,
                },
            ],
        ),
        "superset",
    )
}

fn tempo_run() -> WorkoutPlan {
    with_id(
        WorkoutPlan::new(
            "Tempo Run",
            vec![
                IntervalNode::Warmup {
                    duration_seconds: 600,
                    target: Some("zone 2".into()),
                },
                IntervalNode::Repeat {
                    count: 2,
                    children: vec![
                        IntervalNode::Distance {
                            meters: 1600,
                            target: Some("threshold".into()),
                        },
                        IntervalNode::Repeat {
                            count: 4,
                            children: vec![
                                IntervalNode::Timed {
                                    duration_seconds: 30,
                                    target: Some("stride".into()),
                                },
                                IntervalNode::Timed {
                                    duration_seconds: 30,
                                    target: Some("jog".into()),
                                },
                            ],
                        },
                    ],
                },
                IntervalNode::Cooldown {
                    duration_seconds: 300,
                    target: None,
                },
            ],
        ),
        "tempo-run",
    )
}

use serde::Serialize;

/// The fixed user sequence of one viewing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewingPlan {
    pub order: Vec<usize>,
    pub start_position: usize,
}

/// An explicit order (e.g. the caller's sorted grid) is kept as given, with
/// the start user put in front when it is missing from it. Otherwise the
/// session runs from `start_user_index` to the last user.
pub fn plan(
    start_user_index: usize,
    explicit_order: Option<&[usize]>,
    user_count: usize,
) -> ViewingPlan {
    let Some(order) = explicit_order else {
        return ViewingPlan {
            order: (start_user_index..user_count).collect(),
            start_position: 0,
        };
    };

    match order.iter().position(|&index| index == start_user_index) {
        Some(start_position) => ViewingPlan {
            order: order.to_vec(),
            start_position,
        },
        None => ViewingPlan {
            order: std::iter::once(start_user_index)
                .chain(order.iter().copied())
                .collect(),
            start_position: 0,
        },
    }
}

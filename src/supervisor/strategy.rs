//! # Restart strategies.
//!
//! Given the start order and the failed child, a [`RestartStrategy`] selects the
//! children to stop (in reverse) and start again (in order).
//!
//! ```text
//! start order: a b c d      c fails
//! OneForOne    ─► c
//! OneForAll    ─► a b c d
//! RestForOne   ─► c d
//! ```

/// Which siblings restart when one child fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RestartStrategy {
    /// Only the failed child.
    #[default]
    OneForOne,
    /// Every child.
    OneForAll,
    /// The failed child and everything started after it.
    RestForOne,
}

impl RestartStrategy {
    /// Children to restart, in start order.
    pub(crate) fn restart_set(&self, order: &[usize], failed: usize) -> Vec<usize> {
        match self {
            RestartStrategy::OneForOne => vec![failed],
            RestartStrategy::OneForAll => order.to_vec(),
            RestartStrategy::RestForOne => match order.iter().position(|&i| i == failed) {
                Some(pos) => order[pos..].to_vec(),
                None => vec![failed],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_sets_follow_start_order() {
        // registration 0..4, started as 2 0 1 3
        let order = [2, 0, 1, 3];
        assert_eq!(RestartStrategy::OneForOne.restart_set(&order, 0), vec![0]);
        assert_eq!(RestartStrategy::OneForAll.restart_set(&order, 0), vec![2, 0, 1, 3]);
        assert_eq!(RestartStrategy::RestForOne.restart_set(&order, 0), vec![0, 1, 3]);
        assert_eq!(RestartStrategy::RestForOne.restart_set(&order, 3), vec![3]);
    }
}

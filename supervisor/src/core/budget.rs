//! Step budget arithmetic shared by the loop and the retry classifier.

/// Ceiling on the number of actor invocations in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudget {
    max_steps: u32,
}

impl StepBudget {
    pub const fn new(max_steps: u32) -> Self {
        Self { max_steps }
    }

    pub fn max_steps(self) -> u32 {
        self.max_steps
    }

    /// Whether `step_number` (1-based) is the last step the budget allows.
    ///
    /// Retries are not recorded on the final step: no step remains to retry in.
    pub fn is_final(self, step_number: u32) -> bool {
        step_number >= self.max_steps
    }

    pub fn remaining_after(self, step_number: u32) -> u32 {
        self.max_steps.saturating_sub(step_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_step_is_the_ceiling() {
        let budget = StepBudget::new(3);
        assert!(!budget.is_final(1));
        assert!(!budget.is_final(2));
        assert!(budget.is_final(3));
        assert_eq!(budget.remaining_after(1), 2);
        assert_eq!(budget.remaining_after(5), 0);
    }

    #[test]
    fn single_step_budget_is_always_final() {
        assert!(StepBudget::new(1).is_final(1));
    }
}

//! Parameters of the synthetic execution tree.
//!
//! Every unit sits at an address in a complete tree numbered like a heap:
//! the root is address zero and the children of `a` are `a * b + 1 ..= a * b + b`.
//! What happens at an address is a pure function of the model seed and the
//! address, so any number of threads explore exactly the same tree.

use crate::error::{SimError, SimResult};
use crate::seed::SimSeed;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Shape and behaviour of a synthetic tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeModel {
    /// Successors per unit
    pub branching: usize,
    /// Primitive steps per unit
    pub steps_per_unit: usize,
    /// Probability that a unit reports a fault
    pub fault_rate: f64,
    /// Probability that a unit fails to execute
    pub failure_rate: f64,
    /// Probability that a unit contains an unknown instruction
    pub unknown_rate: f64,
    /// Probability that the edge into a unit is infeasible
    pub infeasible_rate: f64,
    /// Model seed
    pub seed: u64,
}

impl Default for TreeModel {
    fn default() -> Self {
        Self {
            branching: 2,
            steps_per_unit: 1,
            fault_rate: 0.0,
            failure_rate: 0.0,
            unknown_rate: 0.0,
            infeasible_rate: 0.0,
            seed: 42,
        }
    }
}

/// What a unit does when executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitBehavior {
    /// Emits a `fault` tag
    pub fault: bool,
    /// Clears its state
    pub fails: bool,
    /// Contains an instruction the decoder does not know
    pub unknown: bool,
}

impl TreeModel {
    /// Create the default model
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the branching factor
    #[must_use]
    pub fn with_branching(mut self, branching: usize) -> Self {
        self.branching = branching;
        self
    }

    /// Set the steps per unit
    #[must_use]
    pub fn with_steps_per_unit(mut self, steps: usize) -> Self {
        self.steps_per_unit = steps;
        self
    }

    /// Set the fault rate
    #[must_use]
    pub fn with_fault_rate(mut self, rate: f64) -> Self {
        self.fault_rate = rate;
        self
    }

    /// Set the execution failure rate
    #[must_use]
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate;
        self
    }

    /// Set the unknown instruction rate
    #[must_use]
    pub fn with_unknown_rate(mut self, rate: f64) -> Self {
        self.unknown_rate = rate;
        self
    }

    /// Set the infeasible edge rate
    #[must_use]
    pub fn with_infeasible_rate(mut self, rate: f64) -> Self {
        self.infeasible_rate = rate;
        self
    }

    /// Set the seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check that every parameter is in range
    ///
    /// # Errors
    ///
    /// Returns error naming the first parameter out of range
    pub fn validate(&self) -> SimResult<()> {
        if self.steps_per_unit == 0 {
            return Err(SimError::invalid("steps_per_unit", "must be at least 1"));
        }
        for (field, rate) in [
            ("fault_rate", self.fault_rate),
            ("failure_rate", self.failure_rate),
            ("unknown_rate", self.unknown_rate),
            ("infeasible_rate", self.infeasible_rate),
        ] {
            if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
                return Err(SimError::invalid(field, format!("{} is not a probability", rate)));
            }
        }
        Ok(())
    }

    fn sim_seed(&self) -> SimSeed {
        SimSeed::from_literal(self.seed).derive("tree")
    }

    /// Behaviour of the unit at `address`
    #[must_use]
    pub fn behavior(&self, address: u64) -> UnitBehavior {
        let mut rng = self.sim_seed().at("unit", address).rng();
        UnitBehavior {
            fault: chance(&mut rng, self.fault_rate),
            fails: chance(&mut rng, self.failure_rate),
            unknown: chance(&mut rng, self.unknown_rate),
        }
    }

    /// Whether the edge into the unit at `address` is infeasible
    #[must_use]
    pub fn infeasible(&self, address: u64) -> bool {
        let mut rng = self.sim_seed().at("edge", address).rng();
        chance(&mut rng, self.infeasible_rate)
    }

    /// Address of the `index`th child of `parent`
    #[must_use]
    pub fn child_address(&self, parent: u64, index: usize) -> u64 {
        parent
            .wrapping_mul(self.branching as u64)
            .wrapping_add(index as u64 + 1)
    }
}

fn chance(rng: &mut impl Rng, p: f64) -> bool {
    if p <= 0.0 {
        false
    } else if p >= 1.0 {
        true
    } else {
        rng.gen_bool(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_model_is_valid() {
        let model = TreeModel::default();
        assert!(model.validate().is_ok());
        assert_eq!(model.branching, 2);
        assert_eq!(model.behavior(17), UnitBehavior::default());
        assert!(!model.infeasible(17));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let err = TreeModel::new().with_steps_per_unit(0).validate().unwrap_err();
        assert!(matches!(err, SimError::InvalidModel { ref field, .. } if field == "steps_per_unit"));

        let err = TreeModel::new().with_fault_rate(1.5).validate().unwrap_err();
        assert!(matches!(err, SimError::InvalidModel { ref field, .. } if field == "fault_rate"));

        assert!(TreeModel::new().with_infeasible_rate(f64::NAN).validate().is_err());
        assert!(TreeModel::new().with_unknown_rate(-0.1).validate().is_err());
    }

    #[test]
    fn test_certain_rates() {
        let model = TreeModel::new()
            .with_fault_rate(1.0)
            .with_failure_rate(1.0)
            .with_unknown_rate(1.0)
            .with_infeasible_rate(1.0);
        let behavior = model.behavior(5);
        assert!(behavior.fault && behavior.fails && behavior.unknown);
        assert!(model.infeasible(5));
    }

    #[test]
    fn test_child_addresses_are_heap_numbered() {
        let model = TreeModel::new().with_branching(3);
        assert_eq!(model.child_address(0, 0), 1);
        assert_eq!(model.child_address(0, 2), 3);
        assert_eq!(model.child_address(1, 0), 4);
        assert_eq!(model.child_address(2, 1), 8);
    }

    #[test]
    fn test_seed_changes_behaviour() {
        let a = TreeModel::new().with_fault_rate(0.5).with_seed(1);
        let b = a.clone().with_seed(2);
        let differs = (0..64).any(|address| a.behavior(address) != b.behavior(address));
        assert!(differs);
    }

    #[test]
    fn test_model_from_partial_json() {
        let model: TreeModel = serde_json::from_str(r#"{"branching": 4, "fault_rate": 0.25}"#).unwrap();
        assert_eq!(model.branching, 4);
        assert_eq!(model.fault_rate, 0.25);
        assert_eq!(model.steps_per_unit, 1);
        assert_eq!(model.seed, 42);
    }

    proptest! {
        #[test]
        fn prop_behaviour_is_pure(seed in any::<u64>(), address in any::<u64>(), rate in 0.0f64..=1.0) {
            let model = TreeModel::new().with_seed(seed).with_fault_rate(rate).with_infeasible_rate(rate);
            prop_assert_eq!(model.behavior(address), model.clone().behavior(address));
            prop_assert_eq!(model.infeasible(address), model.infeasible(address));
        }
    }
}

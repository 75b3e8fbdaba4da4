//! Stack ownership policies.
//!
//! A stack is a defined combination of players (a QB with their receivers,
//! a same-line hockey trio) tracked as one ownership unit. How a stack's
//! ownership is derived from individual ownership is a policy decision,
//! so the tracker takes it as a `StackPolicy`.

use std::collections::HashMap;

use crate::config::StackDefinition;
use crate::types::{OwnershipMap, StackKey};

pub trait StackPolicy: Send + Sync {
    fn stack_ownership(&self, ownership: &OwnershipMap) -> HashMap<StackKey, f64>;
}

/// Tracks no stacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStacks;

impl StackPolicy for NoStacks {
    fn stack_ownership(&self, _ownership: &OwnershipMap) -> HashMap<StackKey, f64> {
        HashMap::new()
    }
}

/// Configured stacks, estimated under independence: the stack's ownership
/// is the product of its members' ownership fractions.
///
/// A stack is reported only when every member appears in the ownership map.
#[derive(Debug, Clone, Default)]
pub struct DefinedStacks {
    stacks: Vec<StackDefinition>,
}

impl DefinedStacks {
    pub fn new(stacks: Vec<StackDefinition>) -> Self {
        let stacks = stacks
            .into_iter()
            .filter(|s| s.players.len() >= 2)
            .collect();
        Self { stacks }
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}

impl StackPolicy for DefinedStacks {
    fn stack_ownership(&self, ownership: &OwnershipMap) -> HashMap<StackKey, f64> {
        self.stacks
            .iter()
            .filter_map(|stack| {
                let fraction = stack.players.iter().try_fold(1.0, |acc, player| {
                    ownership.get(player).map(|pct| acc * (pct / 100.0))
                })?;
                Some((stack.key.clone(), (fraction * 100.0).clamp(0.0, 100.0)))
            })
            .collect()
    }
}

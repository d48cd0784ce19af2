//! Spreadsheet formula injection guard

use serde::{Deserialize, Serialize};

/// Leading characters a spreadsheet treats as the start of a formula.
pub const DEFAULT_FORMULA_TRIGGERS: &[char] = &['=', '+', '-', '@', '\t', '\r', '\n'];

/// What to do with a cell that starts with a trigger character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormulaPolicy {
    /// Reject the whole row.
    #[default]
    Reject,
    /// Prefix the cell with `'` so it is read as text, and keep the row.
    Neutralize,
}

/// A trigger found in a row under [`FormulaPolicy::Reject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormulaHit {
    /// Index of the offending cell.
    pub column: usize,
    /// The trigger it starts with.
    pub trigger: char,
}

/// Applies a [`FormulaPolicy`] to CSV rows.
#[derive(Debug, Clone)]
pub struct FormulaGuard {
    triggers: Vec<char>,
    policy: FormulaPolicy,
}

impl Default for FormulaGuard {
    fn default() -> Self {
        Self::new(DEFAULT_FORMULA_TRIGGERS.to_vec(), FormulaPolicy::default())
    }
}

impl FormulaGuard {
    pub fn new(triggers: Vec<char>, policy: FormulaPolicy) -> Self {
        Self { triggers, policy }
    }

    pub fn policy(&self) -> FormulaPolicy {
        self.policy
    }

    /// Returns the trigger `cell` starts with, if any.
    pub fn trigger_of(&self, cell: &str) -> Option<char> {
        cell.chars().next().filter(|c| self.triggers.contains(c))
    }

    /// Checks a row in place.
    ///
    /// Under `Reject` the first triggering cell is returned as an error and the
    /// row is left untouched. Under `Neutralize` every triggering cell is
    /// prefixed with `'` and the number of rewritten cells is returned.
    ///
    /// # Errors
    ///
    /// Returns a [`FormulaHit`] under [`FormulaPolicy::Reject`].
    pub fn apply(&self, row: &mut [String]) -> Result<usize, FormulaHit> {
        match self.policy {
            FormulaPolicy::Reject => {
                for (column, cell) in row.iter().enumerate() {
                    if let Some(trigger) = self.trigger_of(cell) {
                        return Err(FormulaHit { column, trigger });
                    }
                }
                Ok(0)
            }
            FormulaPolicy::Neutralize => {
                let mut neutralized = 0;
                for cell in row.iter_mut() {
                    if self.trigger_of(cell).is_some() {
                        cell.insert(0, '\'');
                        neutralized += 1;
                    }
                }
                Ok(neutralized)
            }
        }
    }
}

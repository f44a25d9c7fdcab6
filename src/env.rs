//! Variables and the sample environment.
//!
//! A [`VariableEnvironment`] tracks, for one program point, every variable
//! in scope together with its recorded values. It runs in one of two modes:
//!
//! - **replay**: N immutable samples per variable, captured from prior
//!   profiling. Candidate expressions are checked against all of them at
//!   once.
//! - **recording**: exactly one mutable sample per variable, updated in
//!   place as synthesized assignments and increments are "executed"
//!   logically while building a contract with known values.
//!
//! # Invariants
//!
//! - Every tracked variable holds exactly `sample_count` values
//!   (1 in recording mode); mixing counts is a defect.
//! - Integer variables additionally track their observed min/max, which
//!   feeds the predicate synthesizer's relational atoms.

use std::collections::HashMap;
use std::rc::Rc;

use log::trace;

use crate::error::{EvalError, EvalResult};
use crate::types::SolType;
use crate::value::{IntValue, Value};

/// Where a variable lives; recorded because it affects how generated code
/// must declare backups of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Storage,
    Memory,
    Calldata,
}

/// A variable declaration. Identity is the `Rc` allocation: the same
/// declaration object is shared between the environment and every
/// expression node referring to it.
#[derive(Debug, PartialEq, Eq)]
pub struct VarDecl {
    pub name: String,
    pub ty: SolType,
    pub mutable: bool,
    pub storage: StorageClass,
}

/// Shared handle to a variable declaration.
pub type Variable = Rc<VarDecl>;

/// Creates a mutable storage variable handle.
pub fn variable(name: impl Into<String>, ty: SolType) -> Variable {
    Rc::new(VarDecl {
        name: name.into(),
        ty,
        mutable: true,
        storage: StorageClass::Storage,
    })
}

/// Creates an immutable (constant) variable handle.
pub fn constant_variable(name: impl Into<String>, ty: SolType) -> Variable {
    Rc::new(VarDecl {
        name: name.into(),
        ty,
        mutable: false,
        storage: StorageClass::Storage,
    })
}

/// The ordered samples of one variable, plus min/max tracking for integers.
#[derive(Debug, Clone)]
pub struct VariableValues {
    variable: Variable,
    values: Vec<Value>,
    smallest: Option<IntValue>,
    largest: Option<IntValue>,
}

impl VariableValues {
    pub fn new(variable: Variable) -> Self {
        Self {
            variable,
            values: Vec::new(),
            smallest: None,
            largest: None,
        }
    }

    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    pub fn add_value(&mut self, value: Value) -> EvalResult<()> {
        if !value.sol_type().same_type(&self.variable.ty) {
            return Err(EvalError::Internal(format!(
                "value of type {} recorded for variable {} of type {}",
                value.sol_type(),
                self.variable.name,
                self.variable.ty
            )));
        }
        if let Value::Int(v) = &value {
            if self.smallest.as_ref().map_or(true, |s| v.lt(s)) {
                self.smallest = Some(v.clone());
            }
            if self.largest.as_ref().map_or(true, |l| v.gt(l)) {
                self.largest = Some(v.clone());
            }
        }
        self.values.push(value);
        Ok(())
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, index: usize) -> EvalResult<&Value> {
        self.values.get(index).ok_or_else(|| {
            EvalError::Internal(format!(
                "no sample {index} for variable {}",
                self.variable.name
            ))
        })
    }

    pub fn update(&mut self, index: usize, value: Value) {
        self.values[index] = value;
    }

    /// Smallest observed integer value.
    pub fn smallest(&self) -> Option<&IntValue> {
        self.smallest.as_ref()
    }

    /// Largest observed integer value.
    pub fn largest(&self) -> Option<&IntValue> {
        self.largest.as_ref()
    }
}

/// All variables tracked at one program point.
#[derive(Debug, Clone)]
pub struct VariableEnvironment {
    recording: bool,
    by_name: HashMap<String, usize>,
    list: Vec<VariableValues>,
    sample_count: usize,
}

impl VariableEnvironment {
    /// Replay-mode environment over `sample_count` recorded samples.
    pub fn replay(sample_count: usize) -> Self {
        Self {
            recording: false,
            by_name: HashMap::new(),
            list: Vec::new(),
            sample_count,
        }
    }

    /// Recording-mode environment: a single continuously updated sample.
    pub fn recording() -> Self {
        Self {
            recording: true,
            by_name: HashMap::new(),
            list: Vec::new(),
            sample_count: 1,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Adds a variable with its samples. The value count must match the
    /// environment's sample count.
    pub fn add_variable(&mut self, values: VariableValues) -> EvalResult<()> {
        if values.value_count() != self.sample_count {
            return Err(EvalError::Internal(format!(
                "variable {} has {} values, environment has {} samples",
                values.variable().name,
                values.value_count(),
                self.sample_count
            )));
        }
        let name = values.variable().name.clone();
        if self.by_name.contains_key(&name) {
            return Err(EvalError::Internal(format!(
                "variable {name} tracked twice"
            )));
        }
        trace!("tracking variable {name}");
        self.by_name.insert(name, self.list.len());
        self.list.push(values);
        Ok(())
    }

    /// Convenience: add a variable from a plain value list.
    pub fn add_variable_with_values(
        &mut self,
        variable: Variable,
        values: Vec<Value>,
    ) -> EvalResult<()> {
        let mut vv = VariableValues::new(variable);
        for value in values {
            vv.add_value(value)?;
        }
        self.add_variable(vv)
    }

    /// Removes a variable (e.g. a function parameter going out of scope).
    pub fn remove_variable(&mut self, variable: &Variable) {
        if let Some(index) = self.by_name.remove(&variable.name) {
            self.list.remove(index);
            for slot in self.by_name.values_mut() {
                if *slot > index {
                    *slot -= 1;
                }
            }
        }
    }

    pub fn variable_count(&self) -> usize {
        self.list.len()
    }

    pub fn variable_values(&self, index: usize) -> &VariableValues {
        &self.list[index]
    }

    pub fn lookup(&self, name: &str) -> Option<&VariableValues> {
        self.by_name.get(name).map(|&i| &self.list[i])
    }

    /// Number of tracked integer variables (predicate atoms draw on these).
    pub fn integer_variable_count(&self) -> usize {
        self.list
            .iter()
            .filter(|v| v.variable().ty.is_integer())
            .count()
    }

    pub fn integer_variable_values(&self, index: usize) -> &VariableValues {
        self.list
            .iter()
            .filter(|v| v.variable().ty.is_integer())
            .nth(index)
            .expect("integer variable index out of range")
    }

    /// Resolves one variable's value in one sample.
    pub fn resolve(&self, sample: usize, name: &str) -> EvalResult<Value> {
        let values = self
            .lookup(name)
            .ok_or_else(|| EvalError::Internal(format!("unknown variable {name}")))?;
        values.value(sample).cloned()
    }

    /// Overwrites a variable's single recorded value. Recording mode only.
    pub fn update(&mut self, variable: &Variable, value: Value) -> EvalResult<()> {
        if !self.recording {
            return Err(EvalError::Internal(format!(
                "update of {} outside recording mode",
                variable.name
            )));
        }
        let index = *self.by_name.get(&variable.name).ok_or_else(|| {
            EvalError::Internal(format!("unknown variable {}", variable.name))
        })?;
        trace!("update {} = {}", variable.name, value.to_source());
        self.list[index].update(0, value);
        Ok(())
    }

    /// Single-sample deep snapshot of this environment; values are immutable
    /// so cloning the sample is sufficient.
    pub fn snapshot(&self, sample: usize) -> EvalResult<VariableEnvironment> {
        let mut out = VariableEnvironment::replay(1);
        for values in &self.list {
            out.add_variable_with_values(
                Rc::clone(values.variable()),
                vec![values.value(sample)?.clone()],
            )?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u8val(v: i64) -> Value {
        Value::int(false, 8, v)
    }

    #[test]
    fn test_replay_environment() {
        let mut env = VariableEnvironment::replay(3);
        let x = variable("x", SolType::uint(8));
        env.add_variable_with_values(Rc::clone(&x), vec![u8val(0), u8val(5), u8val(13)])
            .unwrap();

        assert_eq!(env.sample_count(), 3);
        assert_eq!(env.resolve(1, "x").unwrap(), u8val(5));
        assert!(env.resolve(0, "y").is_err());
    }

    #[test]
    fn test_sample_count_mismatch_rejected() {
        let mut env = VariableEnvironment::replay(2);
        let x = variable("x", SolType::uint(8));
        assert!(env
            .add_variable_with_values(x, vec![u8val(1)])
            .is_err());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut vv = VariableValues::new(variable("x", SolType::uint(8)));
        assert!(vv.add_value(Value::Bool(true)).is_err());
    }

    #[test]
    fn test_min_max_tracking() {
        let mut vv = VariableValues::new(variable("x", SolType::uint(8)));
        for v in [7, 3, 9, 3] {
            vv.add_value(u8val(v)).unwrap();
        }
        assert_eq!(vv.smallest().unwrap(), &IntValue::from_i64(false, 8, 3));
        assert_eq!(vv.largest().unwrap(), &IntValue::from_i64(false, 8, 9));
    }

    #[test]
    fn test_recording_update() {
        let mut env = VariableEnvironment::recording();
        let x = variable("x", SolType::uint(8));
        env.add_variable_with_values(Rc::clone(&x), vec![u8val(1)])
            .unwrap();
        env.update(&x, u8val(42)).unwrap();
        assert_eq!(env.resolve(0, "x").unwrap(), u8val(42));
    }

    #[test]
    fn test_update_outside_recording_rejected() {
        let mut env = VariableEnvironment::replay(1);
        let x = variable("x", SolType::uint(8));
        env.add_variable_with_values(Rc::clone(&x), vec![u8val(1)])
            .unwrap();
        assert!(env.update(&x, u8val(2)).is_err());
    }

    #[test]
    fn test_add_remove_parameters() {
        let mut env = VariableEnvironment::replay(1);
        let x = variable("x", SolType::uint(8));
        let p = variable("p", SolType::Bool);
        env.add_variable_with_values(Rc::clone(&x), vec![u8val(1)])
            .unwrap();
        env.add_variable_with_values(Rc::clone(&p), vec![Value::Bool(true)])
            .unwrap();
        assert_eq!(env.variable_count(), 2);

        env.remove_variable(&p);
        assert_eq!(env.variable_count(), 1);
        assert!(env.lookup("p").is_none());
        // Remaining variable still resolvable after index fixup.
        assert_eq!(env.resolve(0, "x").unwrap(), u8val(1));
    }

    #[test]
    fn test_snapshot_isolated() {
        let mut env = VariableEnvironment::replay(2);
        let x = variable("x", SolType::uint(8));
        env.add_variable_with_values(Rc::clone(&x), vec![u8val(1), u8val(2)])
            .unwrap();

        let snap = env.snapshot(1).unwrap();
        assert_eq!(snap.sample_count(), 1);
        assert_eq!(snap.resolve(0, "x").unwrap(), u8val(2));
    }
}

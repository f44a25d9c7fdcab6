//! # emi-rs: live-EMI mutations for Solidity compiler testing
//!
//! **`emi-rs`** is the symbolic expression engine of a differential testing
//! tool for Solidity compilers. It generates and mutates program fragments
//! whose runtime value is known in advance across a recorded set of
//! execution samples, so that a compiled program can be checked for
//! divergence from the predicted value.
//!
//! ## How it works
//!
//! Profiling a contract run yields, per program point, a set of **samples**:
//! complete variable-value snapshots. Over such a
//! [`VariableEnvironment`][crate::env::VariableEnvironment] the engine can
//!
//! - synthesize **predicates with a guaranteed truth value** on every
//!   sample ([`predicate`]),
//! - synthesize random **well-typed, well-defined expressions** of any
//!   desired type ([`exprgen`]),
//! - **evaluate** any expression over all samples at once, with per-sample
//!   short-circuiting and memoization ([`eval`]),
//! - **repair** sub-expressions that turn out undefined on some sample —
//!   division by zero, negative shift counts — without changing the
//!   externally observable value ([`repair`]),
//! - combine all of the above into **semantics-preserving program
//!   mutations** ([`mutate`]): code a correct compiler must treat as inert,
//!   so any behavioral change after insertion indicts the compiler.
//!
//! ## Basic Usage
//!
//! ```rust
//! use emi_rs::context::SynthesisContext;
//! use emi_rs::env::{variable, VariableEnvironment};
//! use emi_rs::eval::Evaluator;
//! use emi_rs::predicate::PredicateSynthesizer;
//! use emi_rs::types::SolType;
//! use emi_rs::value::Value;
//!
//! // 1. Record an environment: variable `v` took the values 3, 5, 9.
//! let mut env = VariableEnvironment::replay(3);
//! env.add_variable_with_values(
//!     variable("v", SolType::uint(8)),
//!     vec![
//!         Value::int(false, 8, 3),
//!         Value::int(false, 8, 5),
//!         Value::int(false, 8, 9),
//!     ],
//! )
//! .unwrap();
//!
//! // 2. Synthesize a predicate that is true on every sample.
//! let mut ctx = SynthesisContext::seeded(42);
//! let mut synth = PredicateSynthesizer::new();
//! let guard = synth.synthesize(&mut ctx, &mut env, true, 2).unwrap();
//!
//! // 3. Check it: evaluation yields `true` for all three samples.
//! let mut eval = Evaluator::new();
//! let values = eval.evaluate_all(&mut env, &guard).unwrap();
//! assert!(values.iter().all(|v| v.as_bool() == Some(true)));
//! ```
//!
//! ## Core Components
//!
//! - **[`value`] / [`types`]**: immutable typed constants (wrapping
//!   arbitrary-precision integers, fixed bytes, addresses, structs, ...)
//!   and the type-compatibility rules of the modeled language.
//! - **[`expr`]**: the operator tree — one sum type, exhaustive matches,
//!   no virtual dispatch. Repair replaces subtrees instead of mutating.
//! - **[`eval`]**: the multi-sample evaluator; owns the memoization table.
//! - **[`repair`]**: the one-retry-then-fatal rewrite loop.
//! - **[`syntax`]**: the narrow interface to the surrounding program-tree
//!   layer — leaf lifting in, spliceable source fragments out.
//!
//! Synthesis is single-threaded and fully deterministic: all randomness
//! comes from one seeded generator in [`context::SynthesisContext`], so a
//! synthesized program is reproduced by replaying its seed.

pub mod context;
pub mod convert;
pub mod env;
pub mod error;
pub mod eval;
pub mod expr;
pub mod exprgen;
pub mod mutate;
pub mod predicate;
pub mod repair;
pub mod syntax;
pub mod typecheck;
pub mod types;
pub mod valgen;
pub mod value;

pub use crate::error::{EvalError, EvalResult};

//! Named helpers available inside filter expressions
//!
//! A helper is either a function (`sum(channel_mask)`) or a constant (`pi`).
//! Record fields take precedence over helpers of the same name.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::EvalError;
use crate::predicate::eval::{EvalResult, Value};

/// Signature of a helper function.
pub type HelperFn = Arc<dyn Fn(&[Value]) -> EvalResult<Value> + Send + Sync>;

#[derive(Clone)]
pub enum Helper {
    Function(HelperFn),
    Constant(Value),
}

impl fmt::Debug for Helper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Helper::Function(_) => f.write_str("Function(..)"),
            Helper::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
        }
    }
}

/// Name → helper table consulted when a predicate is compiled.
#[derive(Clone, Debug)]
pub struct HelperRegistry {
    entries: BTreeMap<String, Helper>,
}

impl Default for HelperRegistry {
    /// The built-in numeric helpers and constants.
    fn default() -> Self {
        let mut registry = HelperRegistry::empty();
        registry
            .register_function("sum", sum)
            .register_function("mean", mean)
            .register_function("min", |args| extremum("min", args, f64::min))
            .register_function("max", |args| extremum("max", args, f64::max))
            .register_function("ptp", ptp)
            .register_function("abs", |args| elementwise("abs", args, f64::abs))
            .register_function("sqrt", |args| elementwise("sqrt", args, f64::sqrt))
            .register_function("len", len)
            .register_function("any", |args| {
                truthy_count("any", args).map(|(n, _)| Value::Bool(n > 0))
            })
            .register_function("all", |args| {
                truthy_count("all", args).map(|(n, total)| Value::Bool(n == total))
            })
            .register_function("count_nonzero", |args| {
                truthy_count("count_nonzero", args).map(|(n, _)| Value::Number(n as f64))
            })
            .register_constant("pi", Value::Number(std::f64::consts::PI))
            .register_constant("e", Value::Number(std::f64::consts::E))
            .register_constant("inf", Value::Number(f64::INFINITY));
        registry
    }
}

impl HelperRegistry {
    /// A registry without any helpers.
    pub fn empty() -> Self {
        HelperRegistry {
            entries: BTreeMap::new(),
        }
    }

    /// Add or replace a helper function.
    pub fn register_function<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.entries
            .insert(name.into(), Helper::Function(Arc::new(function)));
        self
    }

    /// Add or replace a helper constant.
    pub fn register_constant(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.entries.insert(name.into(), Helper::Constant(value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Helper> {
        self.entries.get(name)
    }

    /// Helper names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Built-ins
// ---------------------------------------------------------------------------

fn single<'a>(function: &str, args: &'a [Value]) -> EvalResult<&'a Value> {
    match args {
        [value] => Ok(value),
        _ => Err(EvalError::Arity {
            function: function.to_string(),
            expected: "1 argument",
            found: args.len(),
        }),
    }
}

/// Sum of all elements; a mask sums to its number of set flags.
fn sum(args: &[Value]) -> EvalResult<Value> {
    let value = single("sum", args)?;
    Ok(Value::Number(value.to_f64_array().sum()))
}

/// Arithmetic mean; NaN for an empty array.
fn mean(args: &[Value]) -> EvalResult<Value> {
    let value = single("mean", args)?;
    Ok(Value::Number(value.to_f64_array().mean().unwrap_or(f64::NAN)))
}

/// `min(array)` reduces one array, `min(a, b, ...)` compares scalars.
fn extremum(function: &str, args: &[Value], pick: fn(f64, f64) -> f64) -> EvalResult<Value> {
    let values: Vec<f64> = match args {
        [] => {
            return Err(EvalError::Arity {
                function: function.to_string(),
                expected: "at least 1 argument",
                found: 0,
            })
        }
        [value] => value.to_f64_array().iter().copied().collect(),
        many => many
            .iter()
            .map(|v| {
                v.as_number().ok_or_else(|| {
                    EvalError::Type(format!(
                        "{function}() with several arguments takes scalars, got {}",
                        v.type_name()
                    ))
                })
            })
            .collect::<EvalResult<_>>()?,
    };
    values
        .into_iter()
        .reduce(pick)
        .map(Value::Number)
        .ok_or_else(|| EvalError::EmptyReduction(function.to_string()))
}

/// Peak-to-peak range, `max - min`.
fn ptp(args: &[Value]) -> EvalResult<Value> {
    let array = single("ptp", args)?.to_f64_array();
    let mut values = array.iter().copied();
    let first = values
        .next()
        .ok_or_else(|| EvalError::EmptyReduction("ptp".to_string()))?;
    let (lo, hi) = values.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
    Ok(Value::Number(hi - lo))
}

fn elementwise(function: &str, args: &[Value], f: fn(f64) -> f64) -> EvalResult<Value> {
    let value = single(function, args)?;
    match value.as_number() {
        Some(n) => Ok(Value::Number(f(n))),
        None => Ok(Value::Array(value.to_f64_array().mapv(f))),
    }
}

/// Length of the first axis.
fn len(args: &[Value]) -> EvalResult<Value> {
    let value = single("len", args)?;
    let first_axis = match value {
        Value::Array(a) => a.shape().first().copied(),
        Value::Mask(m) => m.shape().first().copied(),
        Value::Bool(_) | Value::Number(_) => None,
    };
    first_axis
        .map(|n| Value::Number(n as f64))
        .ok_or_else(|| EvalError::Type(format!("len() of unsized {}", value.type_name())))
}

/// (non-zero elements, total elements)
fn truthy_count(function: &str, args: &[Value]) -> EvalResult<(usize, usize)> {
    let array = single(function, args)?.to_f64_array();
    let nonzero = array.iter().filter(|&&v| v != 0.0).count();
    Ok((nonzero, array.len()))
}

#[cfg(test)]
mod tests {
    use ndarray::{array, Array1};

    use super::*;

    fn call(name: &str, args: &[Value]) -> EvalResult<Value> {
        let registry = HelperRegistry::default();
        match registry.get(name) {
            Some(Helper::Function(f)) => f(args),
            other => panic!("{name} is not a helper function: {other:?}"),
        }
    }

    #[test]
    fn test_sum_counts_mask_flags() {
        let mask = Value::from(array![true, false, true]);
        assert_eq!(call("sum", &[mask]).unwrap(), Value::Number(2.0));
    }

    #[test]
    fn test_min_max_forms() {
        let wave = Value::from(array![[1.0, -4.0], [2.5, 0.0]]);
        assert_eq!(call("min", &[wave.clone()]).unwrap(), Value::Number(-4.0));
        assert_eq!(call("max", &[wave]).unwrap(), Value::Number(2.5));
        assert_eq!(
            call("max", &[Value::Number(1.0), Value::Number(3.0), Value::Bool(true)]).unwrap(),
            Value::Number(3.0)
        );
    }

    #[test]
    fn test_empty_reductions() {
        let empty = Value::from(Array1::<f64>::zeros(0));
        assert_eq!(
            call("min", &[empty.clone()]),
            Err(EvalError::EmptyReduction("min".into()))
        );
        assert!(call("ptp", &[empty.clone()]).is_err());
        match call("mean", &[empty.clone()]).unwrap() {
            Value::Number(n) => assert!(n.is_nan()),
            other => panic!("expected number, got {other:?}"),
        }
        assert_eq!(call("any", &[empty.clone()]).unwrap(), Value::Bool(false));
        assert_eq!(call("all", &[empty]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_arity_errors() {
        assert!(matches!(call("sum", &[]), Err(EvalError::Arity { found: 0, .. })));
        assert!(matches!(call("min", &[]), Err(EvalError::Arity { .. })));
        assert!(matches!(
            call("abs", &[Value::Number(1.0), Value::Number(2.0)]),
            Err(EvalError::Arity { found: 2, .. })
        ));
    }

    #[test]
    fn test_len_needs_array() {
        assert_eq!(
            call("len", &[Value::from(array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]])]).unwrap(),
            Value::Number(3.0)
        );
        assert!(matches!(call("len", &[Value::Number(3.0)]), Err(EvalError::Type(_))));
    }

    #[test]
    fn test_registration_overrides_and_extends() {
        let mut registry = HelperRegistry::default();
        registry
            .register_constant("threshold", Value::Number(40.0))
            .register_function("double", |args| match args {
                [Value::Number(n)] => Ok(Value::Number(n * 2.0)),
                _ => Err(EvalError::Type("double() takes a number".into())),
            });
        assert!(matches!(registry.get("threshold"), Some(Helper::Constant(_))));
        assert!(matches!(registry.get("double"), Some(Helper::Function(_))));
        assert!(registry.names().any(|n| n == "sum"));
        assert!(HelperRegistry::empty().get("sum").is_none());
    }
}

//! Expression evaluation against one spike record
//!
//! A [`Predicate`] is compiled once per filter: the expression is parsed, the
//! names it mentions are extracted, and each name is resolved first against
//! the record fields and then against the helper registry. Evaluating it on a
//! record then fetches only the referenced fields.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use ndarray::{Array1, Array2, ArrayD, ArrayViewD, Axis, Zip};

use crate::data::model::SpikeField;
use crate::data::SpikeRecord;
use crate::error::{EvalError, PredicateError, StoreError};
use crate::predicate::ast::*;
use crate::predicate::helpers::{Helper, HelperRegistry};
use crate::predicate::parser::parse_predicate;

/// Result type for evaluation
pub type EvalResult<T> = Result<T, EvalError>;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A runtime value inside a filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
    /// n-dimensional numeric array (waveforms, features)
    Array(ArrayD<f64>),
    /// n-dimensional boolean array (channel and feature masks)
    Mask(ArrayD<bool>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Array(_) => "array",
            Value::Mask(_) => "mask",
        }
    }

    /// Scalar truthiness; arrays are ambiguous.
    pub fn truth(&self) -> EvalResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
            Value::Array(_) | Value::Mask(_) => Err(EvalError::AmbiguousTruth),
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Number(_))
    }

    /// Scalar as a number (booleans count as 0 / 1).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Any value as a numeric array; scalars become 0-dimensional.
    pub fn to_f64_array(&self) -> Cow<'_, ArrayD<f64>> {
        match self {
            Value::Array(a) => Cow::Borrowed(a),
            Value::Mask(m) => Cow::Owned(m.mapv(|b| f64::from(u8::from(b)))),
            Value::Bool(_) | Value::Number(_) => {
                Cow::Owned(ArrayD::from_elem(vec![], self.as_number().unwrap_or_default()))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<Array1<bool>> for Value {
    fn from(mask: Array1<bool>) -> Self {
        Value::Mask(mask.into_dyn())
    }
}

impl From<Array1<f64>> for Value {
    fn from(array: Array1<f64>) -> Self {
        Value::Array(array.into_dyn())
    }
}

impl From<Array2<f64>> for Value {
    fn from(array: Array2<f64>) -> Self {
        Value::Array(array.into_dyn())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Array(a) => write!(f, "array{:?}", a.shape()),
            Value::Mask(m) => write!(f, "mask{:?}", m.shape()),
        }
    }
}

// ---------------------------------------------------------------------------
// Predicate – compiled filter expression
// ---------------------------------------------------------------------------

/// How a name in the expression is bound.
#[derive(Debug, Clone)]
enum Resolution {
    Field(SpikeField),
    Helper(Helper),
}

/// A parsed filter expression with every name already resolved.
#[derive(Debug, Clone)]
pub struct Predicate {
    expression: String,
    expr: Expr,
    names: Vec<(String, Resolution)>,
}

impl Predicate {
    /// Parse `expression` and bind its names.
    ///
    /// Returns `Ok(None)` for an empty expression ("no filter"). Fails with
    /// [`PredicateError::UnboundName`] for a name that is neither a record
    /// field nor a helper.
    pub fn compile(
        expression: &str,
        helpers: &HelperRegistry,
    ) -> Result<Option<Predicate>, PredicateError> {
        let Some(expr) = parse_predicate(expression)? else {
            return Ok(None);
        };

        let mut names = Vec::new();
        for name in expr.names() {
            let resolution = if let Some(field) = SpikeField::from_name(name) {
                Resolution::Field(field)
            } else if let Some(helper) = helpers.get(name) {
                Resolution::Helper(helper.clone())
            } else {
                return Err(PredicateError::UnboundName {
                    expression: expression.to_string(),
                    name: name.to_string(),
                });
            };
            names.push((name.to_string(), resolution));
        }

        Ok(Some(Predicate {
            expression: expression.to_string(),
            expr,
            names,
        }))
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Record fields the expression needs, in order of first appearance.
    pub fn fields(&self) -> Vec<SpikeField> {
        self.names
            .iter()
            .filter_map(|(_, r)| match r {
                Resolution::Field(field) => Some(*field),
                Resolution::Helper(_) => None,
            })
            .collect()
    }

    /// Test the predicate against a stored record.
    pub fn matches(&self, record: &SpikeRecord) -> Result<bool, PredicateError> {
        self.matches_with(record.index(), |field| fetch_field(record, field))
    }

    /// Test the predicate with field values from `lookup`, which is called
    /// once for each field the expression names.
    pub fn matches_with<F>(&self, index: usize, mut lookup: F) -> Result<bool, PredicateError>
    where
        F: FnMut(SpikeField) -> Result<Value, StoreError>,
    {
        let mut scope = HashMap::with_capacity(self.names.len());
        for (name, resolution) in &self.names {
            let bound = match resolution {
                Resolution::Field(field) => {
                    let value = lookup(*field).map_err(|source| PredicateError::Fetch {
                        expression: self.expression.clone(),
                        index,
                        source,
                    })?;
                    Bound::Value(value)
                }
                Resolution::Helper(helper) => Bound::Helper(helper),
            };
            scope.insert(name.as_str(), bound);
        }

        let evaluator = Evaluator { scope };
        evaluator
            .eval(&self.expr)
            .and_then(|v| v.truth())
            .map_err(|source| PredicateError::Evaluation {
                expression: self.expression.clone(),
                index,
                source,
            })
    }
}

/// Fetch one field of a record as an expression value.
pub fn fetch_field(record: &SpikeRecord, field: SpikeField) -> Result<Value, StoreError> {
    Ok(match field {
        SpikeField::Time => Value::from(record.time()?),
        SpikeField::ChannelMask => Value::from(record.channel_mask()?),
        SpikeField::Wave => Value::from(record.wave()?),
        SpikeField::UnfilteredWave => Value::from(record.unfiltered_wave()?),
        SpikeField::Fet => Value::from(record.fet()?),
        SpikeField::FetMask => Value::from(record.fet_mask()?),
    })
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

enum Bound<'a> {
    Value(Value),
    Helper(&'a Helper),
}

/// Evaluates an expression tree using only the bound names.
struct Evaluator<'a> {
    scope: HashMap<&'a str, Bound<'a>>,
}

impl Evaluator<'_> {
    fn eval(&self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Name(name) => self.lookup(name),

            Expr::Unary { op, operand } => unary(*op, self.eval(operand)?),

            Expr::Binary { op, lhs, rhs } => binary(*op, self.eval(lhs)?, self.eval(rhs)?),

            Expr::Compare { first, rest } => self.eval_compare(first, rest),

            Expr::And(lhs, rhs) => {
                Ok(Value::Bool(self.eval(lhs)?.truth()? && self.eval(rhs)?.truth()?))
            }

            Expr::Or(lhs, rhs) => {
                Ok(Value::Bool(self.eval(lhs)?.truth()? || self.eval(rhs)?.truth()?))
            }

            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.truth()?)),

            Expr::Call { function, args } => {
                let helper = match self.scope.get(function.as_str()) {
                    Some(Bound::Helper(Helper::Function(f))) => f,
                    Some(_) => return Err(EvalError::NotCallable(function.clone())),
                    None => return Err(unbound(function)),
                };
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<EvalResult<Vec<_>>>()?;
                helper(&args)
            }

            Expr::Index { target, indices } => {
                let target = self.eval(target)?;
                let picks = indices
                    .iter()
                    .map(|item| match item {
                        IndexItem::Full => Ok(None),
                        IndexItem::At(expr) => self.eval(expr).and_then(|v| integer_index(&v)).map(Some),
                    })
                    .collect::<EvalResult<Vec<_>>>()?;
                index_value(target, &picks)
            }
        }
    }

    fn lookup(&self, name: &str) -> EvalResult<Value> {
        match self.scope.get(name) {
            Some(Bound::Value(value)) => Ok(value.clone()),
            Some(Bound::Helper(Helper::Constant(value))) => Ok(value.clone()),
            Some(Bound::Helper(Helper::Function(_))) => Err(EvalError::NotAValue(name.to_string())),
            None => Err(unbound(name)),
        }
    }

    fn eval_compare(&self, first: &Expr, rest: &[(CompareOp, Expr)]) -> EvalResult<Value> {
        let mut lhs = self.eval(first)?;
        if let [(op, rhs)] = rest {
            return compare(*op, &lhs, &self.eval(rhs)?);
        }
        for (op, rhs) in rest {
            let rhs = self.eval(rhs)?;
            if !compare(*op, &lhs, &rhs)?.truth()? {
                return Ok(Value::Bool(false));
            }
            lhs = rhs;
        }
        Ok(Value::Bool(true))
    }
}

/// Names are resolved at compile time, so this only guards hand-built trees.
fn unbound(name: &str) -> EvalError {
    EvalError::Type(format!("name `{name}` is not bound"))
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

fn unary(op: UnaryOp, value: Value) -> EvalResult<Value> {
    match (op, value) {
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Invert, Value::Mask(m)) => Ok(Value::Mask(m.mapv(|b| !b))),
        (UnaryOp::Invert, other) => Err(EvalError::Type(format!(
            "bad operand type for ~: {}",
            other.type_name()
        ))),
        (UnaryOp::Pos, value) => numeric_map(&value, |x| x),
        (UnaryOp::Neg, value) => numeric_map(&value, |x| -x),
    }
}

fn numeric_map(value: &Value, f: impl Fn(f64) -> f64) -> EvalResult<Value> {
    match value.as_number() {
        Some(n) => Ok(Value::Number(f(n))),
        None => Ok(Value::Array(value.to_f64_array().mapv(f))),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> EvalResult<Value> {
    match op {
        BinaryOp::BitAnd => logical(op, &lhs, &rhs, |a, b| a && b),
        BinaryOp::BitOr => logical(op, &lhs, &rhs, |a, b| a || b),
        _ => arithmetic(op, &lhs, &rhs),
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    if matches!(op, BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Rem) {
        let divisor = rhs.to_f64_array();
        if divisor.iter().any(|&d| d == 0.0) {
            return Err(EvalError::DivisionByZero);
        }
    }
    let f = |a: f64, b: f64| match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        // sign follows the divisor
        BinaryOp::Rem => a - b * (a / b).floor(),
        BinaryOp::Pow => a.powf(b),
        BinaryOp::BitAnd | BinaryOp::BitOr => f64::NAN,
    };
    match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => Ok(Value::Number(f(a, b))),
        _ => {
            let (a, b) = (lhs.to_f64_array(), rhs.to_f64_array());
            Ok(Value::Array(broadcast(&*a, &*b, f)?))
        }
    }
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => Ok(Value::Bool(op.evaluate(a, b))),
        _ => {
            let (a, b) = (lhs.to_f64_array(), rhs.to_f64_array());
            Ok(Value::Mask(broadcast(&*a, &*b, |x, y| op.evaluate(x, y))?))
        }
    }
}

fn logical(
    op: BinaryOp,
    lhs: &Value,
    rhs: &Value,
    f: impl Fn(bool, bool) -> bool,
) -> EvalResult<Value> {
    let as_mask = |v: &Value| -> EvalResult<ArrayD<bool>> {
        match v {
            Value::Bool(b) => Ok(ArrayD::from_elem(vec![], *b)),
            Value::Mask(m) => Ok(m.clone()),
            other => Err(EvalError::Type(format!(
                "unsupported operand type for {}: {}",
                op.as_str(),
                other.type_name()
            ))),
        }
    };
    let (a, b) = (as_mask(lhs)?, as_mask(rhs)?);
    if let (Value::Bool(x), Value::Bool(y)) = (lhs, rhs) {
        return Ok(Value::Bool(f(*x, *y)));
    }
    Ok(Value::Mask(broadcast(&a, &b, f)?))
}

/// Elementwise `f` over two arrays of equal shape, or an array and a 0-d scalar.
fn broadcast<A, B, R>(
    lhs: &ArrayD<A>,
    rhs: &ArrayD<B>,
    f: impl Fn(A, B) -> R,
) -> EvalResult<ArrayD<R>>
where
    A: Copy,
    B: Copy,
{
    if lhs.ndim() == 0 {
        let a = *lhs.first().ok_or(EvalError::AmbiguousTruth)?;
        return Ok(rhs.mapv(|b| f(a, b)));
    }
    if rhs.ndim() == 0 {
        let b = *rhs.first().ok_or(EvalError::AmbiguousTruth)?;
        return Ok(lhs.mapv(|a| f(a, b)));
    }
    if lhs.shape() != rhs.shape() {
        return Err(EvalError::ShapeMismatch {
            lhs: lhs.shape().to_vec(),
            rhs: rhs.shape().to_vec(),
        });
    }
    Ok(Zip::from(lhs).and(rhs).map_collect(|&a, &b| f(a, b)))
}

// ---------------------------------------------------------------------------
// Indexing
// ---------------------------------------------------------------------------

fn integer_index(value: &Value) -> EvalResult<i64> {
    match value {
        Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Ok(*n as i64),
        other => Err(EvalError::Type(format!(
            "indices must be integers, got {other}"
        ))),
    }
}

fn index_value(target: Value, picks: &[Option<i64>]) -> EvalResult<Value> {
    match target {
        Value::Array(a) => {
            let out = index_array(a.view(), picks)?;
            Ok(match out.ndim() {
                0 => Value::Number(out.first().copied().unwrap_or(f64::NAN)),
                _ => Value::Array(out),
            })
        }
        Value::Mask(m) => {
            let out = index_array(m.view(), picks)?;
            Ok(match out.ndim() {
                0 => Value::Bool(out.first().copied().unwrap_or(false)),
                _ => Value::Mask(out),
            })
        }
        scalar => Err(EvalError::Type(format!(
            "{} is not subscriptable",
            scalar.type_name()
        ))),
    }
}

/// Apply `picks` axis by axis; `None` keeps an axis, `Some(i)` removes it.
fn index_array<T: Clone>(array: ArrayViewD<'_, T>, picks: &[Option<i64>]) -> EvalResult<ArrayD<T>> {
    if picks.len() > array.ndim() {
        return Err(EvalError::TooManyIndices {
            ndim: array.ndim(),
            given: picks.len(),
        });
    }
    let mut view = array;
    let mut axis = 0;
    for pick in picks {
        match pick {
            None => axis += 1,
            Some(i) => {
                let len = view.len_of(Axis(axis));
                let resolved = if *i < 0 { *i + len as i64 } else { *i };
                if resolved < 0 || resolved >= len as i64 {
                    return Err(EvalError::IndexOutOfBounds { index: *i, len });
                }
                view = view.index_axis_move(Axis(axis), resolved as usize);
            }
        }
    }
    Ok(view.to_owned())
}

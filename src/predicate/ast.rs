//! Abstract syntax tree for filter expressions.

use serde::{Deserialize, Serialize};

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Numeric literal
    Number(f64),

    /// `True` / `False`
    Bool(bool),

    /// A record field, helper constant or helper function name
    Name(String),

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },

    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// `a < b <= c` holds when every adjacent pair holds
    Compare {
        first: Box<Expr>,
        rest: Vec<(CompareOp, Expr)>,
    },

    And(Box<Expr>, Box<Expr>),

    Or(Box<Expr>, Box<Expr>),

    Not(Box<Expr>),

    /// `name(args...)`
    Call { function: String, args: Vec<Expr> },

    /// `target[i, :, j]`
    Index {
        target: Box<Expr>,
        indices: Vec<IndexItem>,
    },
}

impl Expr {
    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Expr::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: Expr, rhs: Expr) -> Self {
        Expr::Or(Box::new(lhs), Box::new(rhs))
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Expr::Name(name.into())
    }

    /// Number of nodes on the longest root-to-leaf path.
    pub fn height(&self) -> usize {
        let children = match self {
            Expr::Number(_) | Expr::Bool(_) | Expr::Name(_) => 0,
            Expr::Unary { operand, .. } | Expr::Not(operand) => operand.height(),
            Expr::Binary { lhs, rhs, .. } | Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
                lhs.height().max(rhs.height())
            }
            Expr::Compare { first, rest } => rest
                .iter()
                .map(|(_, operand)| operand.height())
                .fold(first.height(), usize::max),
            Expr::Call { args, .. } => args.iter().map(Expr::height).max().unwrap_or(0),
            Expr::Index { target, indices } => indices
                .iter()
                .filter_map(|item| match item {
                    IndexItem::At(expr) => Some(expr.height()),
                    IndexItem::Full => None,
                })
                .fold(target.height(), usize::max),
        };
        children + 1
    }

    /// Every identifier the expression mentions, called names included,
    /// in order of first appearance.
    pub fn names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) | Expr::Bool(_) => {}
            Expr::Name(name) => push_unique(names, name),
            Expr::Unary { operand, .. } | Expr::Not(operand) => operand.collect_names(names),
            Expr::Binary { lhs, rhs, .. } | Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
                lhs.collect_names(names);
                rhs.collect_names(names);
            }
            Expr::Compare { first, rest } => {
                first.collect_names(names);
                for (_, operand) in rest {
                    operand.collect_names(names);
                }
            }
            Expr::Call { function, args } => {
                push_unique(names, function);
                for arg in args {
                    arg.collect_names(names);
                }
            }
            Expr::Index { target, indices } => {
                target.collect_names(names);
                for item in indices {
                    if let IndexItem::At(expr) = item {
                        expr.collect_names(names);
                    }
                }
            }
        }
    }
}

fn push_unique<'a>(names: &mut Vec<&'a str>, name: &'a str) {
    if !names.contains(&name) {
        names.push(name);
    }
}

/// One position inside `[...]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexItem {
    /// Pick one element along the axis (negative counts from the end)
    At(Expr),
    /// `:` keeps the whole axis
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Pos,
    /// `~mask`
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
    /// Elementwise `&` on booleans / masks
    BitAnd,
    /// Elementwise `|` on booleans / masks
    BitOr,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    /// Evaluate the comparison for two f64 values
    pub fn evaluate(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

//! Filter expression parser using nom
//!
//! Grammar (lowest precedence first):
//! ```text
//! expr       := or
//! or         := and (('or' | '||') and)*
//! and        := not (('and' | '&&') not)*
//! not        := ('not' | '!') not | comparison
//! comparison := bitor (cmp_op bitor)*
//! cmp_op     := '<' | '<=' | '>' | '>=' | '==' | '!='
//! bitor      := bitand ('|' bitand)*
//! bitand     := sum ('&' sum)*
//! sum        := product (('+' | '-') product)*
//! product    := unary (('*' | '/' | '//' | '%') unary)*
//! unary      := ('-' | '+' | '~') unary | power
//! power      := postfix ('**' unary)?
//! postfix    := atom ('(' args ')' | '[' index (',' index)* ']')*
//! index      := ':' | expr
//! atom       := number | 'True' | 'False' | name | '(' expr ')'
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit0, digit1, multispace0, one_of, satisfy},
    combinator::{map, map_res, not, opt, recognize, value, verify},
    error::{Error, ErrorKind},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, terminated, tuple},
    IResult,
};

use crate::error::PredicateError;
use crate::predicate::ast::*;

/// Words that can never be names.
const RESERVED: &[&str] = &["and", "or", "not", "True", "False", "true", "false"];

/// Deepest nesting of brackets, call arguments and prefix operators.
pub const MAX_NESTING: usize = 32;

/// Tallest expression tree the parser will build.
pub const MAX_HEIGHT: usize = 256;

/// Parse a filter expression.
///
/// Returns `Ok(None)` for empty or whitespace-only input, which means
/// "no filter" rather than a predicate that is always true. Expressions
/// nested beyond [`MAX_NESTING`] or taller than [`MAX_HEIGHT`] are syntax
/// errors, which keeps parsing and evaluation stack use bounded.
pub fn parse_predicate(expression: &str) -> Result<Option<Expr>, PredicateError> {
    if expression.trim().is_empty() {
        return Ok(None);
    }

    match terminated(|i| expr(i, 0), multispace0)(expression) {
        Ok(("", result)) => Ok(Some(result)),
        Ok((remaining, _)) => Err(syntax_error(
            expression,
            remaining,
            format!("unexpected `{}`", remaining.trim_end()),
        )),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
            let message = if e.code == ErrorKind::TooLarge {
                "expression nested too deeply".to_string()
            } else if e.input.trim().is_empty() {
                "unexpected end of input".to_string()
            } else {
                format!("cannot parse `{}`", e.input.trim_end())
            };
            Err(syntax_error(expression, e.input, message))
        }
        Err(nom::Err::Incomplete(_)) => Err(syntax_error(
            expression,
            "",
            "unexpected end of input".to_string(),
        )),
    }
}

fn syntax_error(expression: &str, remaining: &str, message: String) -> PredicateError {
    PredicateError::Syntax {
        expression: expression.to_string(),
        offset: expression.len() - remaining.len(),
        message,
    }
}

fn too_deep(input: &str) -> nom::Err<Error<&str>> {
    nom::Err::Failure(Error::new(input, ErrorKind::TooLarge))
}

/// Fail once `depth` passes [`MAX_NESTING`].
fn enter(input: &str, depth: usize) -> Result<(), nom::Err<Error<&str>>> {
    if depth > MAX_NESTING {
        Err(too_deep(input))
    } else {
        Ok(())
    }
}

/// Accept a freshly built node unless it is taller than [`MAX_HEIGHT`].
fn checked(input: &str, expr: Expr) -> IResult<&str, Expr> {
    if expr.height() > MAX_HEIGHT {
        Err(too_deep(input))
    } else {
        Ok((input, expr))
    }
}

/// Left-fold an operator chain, failing as soon as the tree gets too tall.
fn fold_chain<T>(
    input: &str,
    first: Expr,
    rest: Vec<(T, Expr)>,
    join: impl Fn(T, Expr, Expr) -> Expr,
) -> IResult<&str, Expr> {
    let mut height = first.height();
    let mut result = first;
    for (op, rhs) in rest {
        height = height.max(rhs.height()) + 1;
        if height > MAX_HEIGHT {
            return Err(too_deep(input));
        }
        result = join(op, result, rhs);
    }
    Ok((input, result))
}

/// Parse whitespace
fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A word operator that must not run into a following name character.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    ws(terminated(tag(word), not(satisfy(is_name_char))))
}

fn expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    enter(input, depth)?;
    or_expr(input, depth)
}

fn or_expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input, depth)?;
    let op = value((), alt((keyword("or"), ws(tag("||")))));
    let (input, rest) = many0(pair(op, |i| and_expr(i, depth)))(input)?;
    fold_chain(input, first, rest, |(), lhs, rhs| Expr::or(lhs, rhs))
}

fn and_expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, first) = not_expr(input, depth)?;
    let op = value((), alt((keyword("and"), ws(tag("&&")))));
    let (input, rest) = many0(pair(op, |i| not_expr(i, depth)))(input)?;
    fold_chain(input, first, rest, |(), lhs, rhs| Expr::and(lhs, rhs))
}

fn not_expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    enter(input, depth)?;
    let not_op = alt((keyword("not"), ws(terminated(tag("!"), not(char('='))))));
    match opt(not_op)(input)? {
        (rest, Some(_)) => {
            let (rest, operand) = not_expr(rest, depth + 1)?;
            checked(rest, Expr::not(operand))
        }
        (_, None) => comparison(input, depth),
    }
}

fn comparison(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, first) = bitor_expr(input, depth)?;
    let (input, rest) = many0(pair(ws(compare_op), |i| bitor_expr(i, depth)))(input)?;
    if rest.is_empty() {
        Ok((input, first))
    } else {
        checked(
            input,
            Expr::Compare {
                first: Box::new(first),
                rest,
            },
        )
    }
}

fn compare_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Ne, tag("!=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
    ))(input)
}

fn fold_binary(input: &str, first: Expr, rest: Vec<(BinaryOp, Expr)>) -> IResult<&str, Expr> {
    fold_chain(input, first, rest, Expr::binary)
}

fn bitor_expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, first) = bitand_expr(input, depth)?;
    let op = value(BinaryOp::BitOr, ws(terminated(char('|'), not(char('|')))));
    let (input, rest) = many0(pair(op, |i| bitand_expr(i, depth)))(input)?;
    fold_binary(input, first, rest)
}

fn bitand_expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, first) = sum_expr(input, depth)?;
    let op = value(BinaryOp::BitAnd, ws(terminated(char('&'), not(char('&')))));
    let (input, rest) = many0(pair(op, |i| sum_expr(i, depth)))(input)?;
    fold_binary(input, first, rest)
}

fn sum_expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, first) = product_expr(input, depth)?;
    let op = ws(alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Sub, char('-')),
    )));
    let (input, rest) = many0(pair(op, |i| product_expr(i, depth)))(input)?;
    fold_binary(input, first, rest)
}

fn product_expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, first) = unary_expr(input, depth)?;
    let op = ws(alt((
        value(BinaryOp::FloorDiv, tag("//")),
        value(BinaryOp::Mul, terminated(char('*'), not(char('*')))),
        value(BinaryOp::Div, char('/')),
        value(BinaryOp::Rem, char('%')),
    )));
    let (input, rest) = many0(pair(op, |i| unary_expr(i, depth)))(input)?;
    fold_binary(input, first, rest)
}

fn unary_expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    enter(input, depth)?;
    let op = ws(alt((
        value(UnaryOp::Neg, char('-')),
        value(UnaryOp::Pos, char('+')),
        value(UnaryOp::Invert, char('~')),
    )));
    match opt(op)(input)? {
        (rest, Some(op)) => {
            let (rest, operand) = unary_expr(rest, depth + 1)?;
            checked(rest, Expr::unary(op, operand))
        }
        (_, None) => power_expr(input, depth),
    }
}

fn power_expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, base) = postfix_expr(input, depth)?;
    match opt(ws(tag("**")))(input)? {
        (rest, Some(_)) => {
            let (rest, exponent) = unary_expr(rest, depth + 1)?;
            checked(rest, Expr::binary(BinaryOp::Pow, base, exponent))
        }
        (_, None) => Ok((input, base)),
    }
}

enum Suffix {
    Call(Vec<Expr>),
    Index(Vec<IndexItem>),
}

fn postfix_expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (mut input, mut result) = atom(input, depth)?;
    loop {
        let (rest, suffix) = opt(|i| suffix(i, depth + 1))(input)?;
        let Some(suffix) = suffix else {
            return Ok((input, result));
        };
        let node = match (suffix, result) {
            (Suffix::Call(args), Expr::Name(function)) => Expr::Call { function, args },
            (Suffix::Call(_), _) => {
                // only names can be called
                return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify)));
            }
            (Suffix::Index(indices), target) => Expr::Index {
                target: Box::new(target),
                indices,
            },
        };
        (input, result) = checked(rest, node)?;
    }
}

fn suffix(input: &str, depth: usize) -> IResult<&str, Suffix> {
    alt((
        map(
            delimited(
                ws(char('(')),
                separated_list0(ws(char(',')), |i| expr(i, depth)),
                ws(char(')')),
            ),
            Suffix::Call,
        ),
        map(
            delimited(
                ws(char('[')),
                separated_list1(ws(char(',')), |i| index_item(i, depth)),
                ws(char(']')),
            ),
            Suffix::Index,
        ),
    ))(input)
}

fn index_item(input: &str, depth: usize) -> IResult<&str, IndexItem> {
    alt((
        value(IndexItem::Full, ws(char(':'))),
        map(|i| expr(i, depth), IndexItem::At),
    ))(input)
}

fn atom(input: &str, depth: usize) -> IResult<&str, Expr> {
    ws(alt((
        map(number, Expr::Number),
        value(Expr::Bool(true), alt((keyword("True"), keyword("true")))),
        value(Expr::Bool(false), alt((keyword("False"), keyword("false")))),
        map(name, |s: &str| Expr::Name(s.to_string())),
        delimited(char('('), |i| expr(i, depth + 1), ws(char(')'))),
    )))(input)
}

/// Unsigned decimal literal: `12`, `1.5`, `.5`, `3e-2`
fn number(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(pair(
            alt((
                recognize(pair(digit1, opt(pair(char('.'), digit0)))),
                recognize(pair(char('.'), digit1)),
            )),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        )),
        str::parse::<f64>,
    )(input)
}

/// Parse an identifier (letter or underscore, then alphanumerics or underscores)
fn name(input: &str) -> IResult<&str, &str> {
    verify(
        recognize(pair(
            satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
            take_while(is_name_char),
        )),
        |s: &str| !RESERVED.contains(&s),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Expr {
        parse_predicate(input).unwrap().unwrap()
    }

    #[test]
    fn test_empty_is_no_filter() {
        assert!(parse_predicate("").unwrap().is_none());
        assert!(parse_predicate("   \t ").unwrap().is_none());
    }

    #[test]
    fn test_parse_simple_comparison() {
        match parse("time > 0") {
            Expr::Compare { first, rest } => {
                assert_eq!(*first, Expr::name("time"));
                assert_eq!(rest, vec![(CompareOp::Gt, Expr::Number(0.0))]);
            }
            other => panic!("Expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_function_call() {
        match parse("sum(channel_mask)>5") {
            Expr::Compare { first, .. } => {
                assert_eq!(
                    *first,
                    Expr::Call {
                        function: "sum".into(),
                        args: vec![Expr::name("channel_mask")],
                    }
                );
            }
            other => panic!("Expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_word_and_symbol_connectives() {
        assert!(matches!(parse("time > 0 and time < 5"), Expr::And(_, _)));
        assert!(matches!(parse("time > 0 && time < 5"), Expr::And(_, _)));
        assert!(matches!(parse("time > 0 or time < 5"), Expr::Or(_, _)));
        assert!(matches!(parse("time > 0 || time < 5"), Expr::Or(_, _)));
        assert!(matches!(parse("not time > 0"), Expr::Not(_)));
        assert!(matches!(parse("!(time > 0)"), Expr::Not(_)));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        match parse("a or b and c") {
            Expr::Or(lhs, rhs) => {
                assert_eq!(*lhs, Expr::name("a"));
                assert!(matches!(*rhs, Expr::And(_, _)));
            }
            other => panic!("Expected or, got {other:?}"),
        }
    }

    #[test]
    fn test_arithmetic_precedence() {
        // 1 + 2 * 3 ** 2
        let expected = Expr::binary(
            BinaryOp::Add,
            Expr::Number(1.0),
            Expr::binary(
                BinaryOp::Mul,
                Expr::Number(2.0),
                Expr::binary(BinaryOp::Pow, Expr::Number(3.0), Expr::Number(2.0)),
            ),
        );
        assert_eq!(parse("1 + 2 * 3 ** 2"), expected);
    }

    #[test]
    fn test_unary_minus_below_power() {
        // -x ** 2 is -(x ** 2)
        let expected = Expr::unary(
            UnaryOp::Neg,
            Expr::binary(BinaryOp::Pow, Expr::name("x"), Expr::Number(2.0)),
        );
        assert_eq!(parse("-x ** 2"), expected);
    }

    #[test]
    fn test_chained_comparison() {
        match parse("0 <= time < 100") {
            Expr::Compare { rest, .. } => {
                let ops: Vec<CompareOp> = rest.iter().map(|(op, _)| *op).collect();
                assert_eq!(ops, vec![CompareOp::Le, CompareOp::Lt]);
            }
            other => panic!("Expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_not_equal_is_not_negation() {
        assert!(matches!(parse("time != 3"), Expr::Compare { .. }));
    }

    #[test]
    fn test_floor_div_and_elementwise_ops() {
        assert_eq!(
            parse("a // 2"),
            Expr::binary(BinaryOp::FloorDiv, Expr::name("a"), Expr::Number(2.0))
        );
        assert_eq!(
            parse("a & b | c"),
            Expr::binary(
                BinaryOp::BitOr,
                Expr::binary(BinaryOp::BitAnd, Expr::name("a"), Expr::name("b")),
                Expr::name("c"),
            )
        );
    }

    #[test]
    fn test_indexing() {
        let expected = Expr::Index {
            target: Box::new(Expr::name("wave")),
            indices: vec![IndexItem::Full, IndexItem::At(Expr::Number(2.0))],
        };
        assert_eq!(parse("wave[:, 2]"), expected);
        assert!(matches!(parse("fet_mask[-1]"), Expr::Index { .. }));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse("1.5e3"), Expr::Number(1500.0));
        assert_eq!(parse(".25"), Expr::Number(0.25));
        assert_eq!(parse("True"), Expr::Bool(true));
    }

    #[test]
    fn test_keywords_need_word_boundary() {
        // `order` and `nothing` are names, not `or` / `not`
        assert_eq!(parse("order"), Expr::name("order"));
        assert_eq!(parse("nothing"), Expr::name("nothing"));
    }

    #[test]
    fn test_trailing_garbage_reports_offset() {
        match parse_predicate("time > 1 )") {
            Err(PredicateError::Syntax { offset, .. }) => assert_eq!(offset, 9),
            other => panic!("Expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_incomplete_expression_fails() {
        assert!(matches!(
            parse_predicate("sum(channel_mask"),
            Err(PredicateError::Syntax { .. })
        ));
        assert!(matches!(
            parse_predicate("time >"),
            Err(PredicateError::Syntax { .. })
        ));
    }

    #[test]
    fn test_only_names_are_callable() {
        assert!(parse_predicate("wave[0](1) > 0").is_err());
        assert!(parse_predicate("(sum)(wave) > 0").is_ok());
    }

    fn assert_too_deep(input: &str) {
        match parse_predicate(input) {
            Err(PredicateError::Syntax { message, .. }) => {
                assert_eq!(message, "expression nested too deeply")
            }
            other => panic!("Expected nesting error, got {other:?}"),
        }
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |n: usize| format!("{}time{} >= 0", "(".repeat(n), ")".repeat(n));
        assert!(parse_predicate(&nested(MAX_NESTING)).is_ok());
        assert_too_deep(&nested(MAX_NESTING + 1));
        assert_too_deep(&nested(10_000));

        assert_too_deep(&format!("{}time", "-".repeat(10_000)));
        assert_too_deep(&format!("{}time > 0", "not ".repeat(10_000)));
        assert_too_deep(&format!("sum({}wave{}) > 0", "abs(".repeat(5_000), ")".repeat(5_000)));
        assert_too_deep(&format!("{}1", "2 ** ".repeat(10_000)));
    }

    #[test]
    fn test_long_chains_are_bounded() {
        let chain = |n: usize| vec!["time"; n].join(" + ");
        assert_eq!(parse(&chain(MAX_HEIGHT)).height(), MAX_HEIGHT);
        assert_too_deep(&chain(MAX_HEIGHT + 1));
        assert_too_deep(&vec!["time > 0"; 100_000].join(" and "));
        assert_too_deep(&format!("wave{}", "[0]".repeat(10_000)));
    }
}

// Parser for equation text.
//
// Parses a token stream (from the lexer) into an expression tree. An
// equation is `expression [@ condition]`; the condition's source text is
// kept verbatim because it identifies phase guards such as `$init`.
// Uses chumsky combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an expression tree or every lex/parse error found.
// Failure modes: syntax errors produce `ParseError`s.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::expr::{BinaryOp, Expr, ExprKind, Func, UnaryOp, VarRef};
use crate::lexer::{Span, Token};

/// A lex or parse error, flattened to a message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub span: Span,
    pub message: String,
}

/// Condition of a guarded equation.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub expr: Expr,
    /// Trimmed source text after `@`.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEquation {
    pub expression: Expr,
    pub condition: Option<Condition>,
}

/// Parse `expression [@ condition]`.
pub fn parse_equation(source: &str) -> Result<ParsedEquation, Vec<ParseError>> {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let (output, parse_errors) = equation_parser().parse(stream).into_output_errors();

    let mut errors: Vec<ParseError> = lex_result
        .errors
        .into_iter()
        .map(|e| ParseError {
            span: e.span,
            message: e.message,
        })
        .collect();
    errors.extend(parse_errors.into_iter().map(|e| ParseError {
        span: to_span(*e.span()),
        message: e.to_string(),
    }));

    match output {
        Some((expression, condition)) if errors.is_empty() => Ok(ParsedEquation {
            expression,
            condition: condition.map(|(at, expr): (SimpleSpan, Expr)| Condition {
                expr,
                text: source[at.end()..].trim().to_string(),
            }),
        }),
        _ => {
            if errors.is_empty() {
                errors.push(ParseError {
                    span: Span::new(0, len),
                    message: "no expression".into(),
                });
            }
            Err(errors)
        }
    }
}

/// Parse a bare expression; a condition is an error.
pub fn parse_expression(source: &str) -> Result<Expr, Vec<ParseError>> {
    let parsed = parse_equation(source)?;
    match parsed.condition {
        None => Ok(parsed.expression),
        Some(c) => Err(vec![ParseError {
            span: c.expr.span,
            message: "unexpected condition".into(),
        }]),
    }
}

fn to_span(s: SimpleSpan) -> Span {
    Span::new(s.start(), s.end())
}

fn unary(op: UnaryOp, a: Expr) -> Expr {
    match (op, &a.kind) {
        (UnaryOp::Negate, ExprKind::Constant(v)) => {
            let v = -*v;
            Expr::new(ExprKind::Constant(v), a.span)
        }
        _ => {
            let span = a.span;
            Expr::new(ExprKind::Unary(op, Box::new(a)), span)
        }
    }
}

fn binary(op: BinaryOp, a: Expr, b: Expr) -> Expr {
    let span = Span::new(a.span.start, b.span.end);
    Expr::new(ExprKind::Binary(op, Box::new(a), Box::new(b)), span)
}

// ── Grammar ──
//
// Precedence, loosest first: `||`, `&&`, comparisons, `+ -`, `* / %`,
// prefix `- !`, `^`. All binary levels are left-associative.

#[allow(clippy::type_complexity)]
fn equation_parser<'tokens, I>(
) -> impl Parser<'tokens, I, (Expr, Option<(SimpleSpan, Expr)>), extra::Err<Rich<'tokens, Token, SimpleSpan>>>
       + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let expr = recursive(|expr| {
        let number = select! { Token::Number(n) => ExprKind::Constant(n) };
        let text = select! { Token::Str(s) => ExprKind::Text(s) };
        let name = select! { Token::Name(n) => n };

        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let call = name
            .clone()
            .then(args)
            .try_map(|(name, args), span: SimpleSpan| match Func::from_name(&name) {
                Some(func) => Ok(ExprKind::Call(func, args)),
                None => Err(Rich::custom(span, format!("unknown function '{}'", name))),
            });

        let reference = name.map(|n: String| ExprKind::Ref(VarRef::parse(&n)));

        let row = expr
            .clone()
            .separated_by(just(Token::Comma))
            .at_least(1)
            .collect::<Vec<_>>();
        let matrix = row
            .separated_by(just(Token::Semicolon))
            .at_least(1)
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(ExprKind::Matrix);

        let atom = choice((number, text, call, reference, matrix))
            .map_with(|kind, e| Expr::new(kind, to_span(e.span())))
            .or(expr
                .clone()
                .delimited_by(just(Token::LParen), just(Token::RParen)))
            .boxed();

        let negated_atom = just(Token::Minus)
            .repeated()
            .foldr(atom.clone(), |_, a| unary(UnaryOp::Negate, a));

        let power = atom
            .clone()
            .foldl(
                just(Token::Caret).ignore_then(negated_atom).repeated(),
                |a, b| binary(BinaryOp::Power, a, b),
            )
            .boxed();

        let prefixed = choice((
            just(Token::Minus).to(UnaryOp::Negate),
            just(Token::Bang).to(UnaryOp::Not),
        ))
        .repeated()
        .foldr(power, unary)
        .boxed();

        let product = prefixed
            .clone()
            .foldl(
                choice((
                    just(Token::Star).to(BinaryOp::Multiply),
                    just(Token::Slash).to(BinaryOp::Divide),
                    just(Token::Percent).to(BinaryOp::Modulo),
                ))
                .then(prefixed)
                .repeated(),
                |a, (op, b)| binary(op, a, b),
            )
            .boxed();

        let sum = product
            .clone()
            .foldl(
                choice((
                    just(Token::Plus).to(BinaryOp::Add),
                    just(Token::Minus).to(BinaryOp::Subtract),
                ))
                .then(product)
                .repeated(),
                |a, (op, b)| binary(op, a, b),
            )
            .boxed();

        let comparison = sum
            .clone()
            .foldl(
                choice((
                    just(Token::Le).to(BinaryOp::LessEqual),
                    just(Token::Lt).to(BinaryOp::Less),
                    just(Token::Ge).to(BinaryOp::GreaterEqual),
                    just(Token::Gt).to(BinaryOp::Greater),
                    just(Token::EqEq).to(BinaryOp::Equal),
                    just(Token::Ne).to(BinaryOp::NotEqual),
                ))
                .then(sum)
                .repeated(),
                |a, (op, b)| binary(op, a, b),
            )
            .boxed();

        let conjunction = comparison
            .clone()
            .foldl(
                just(Token::AndAnd)
                    .to(BinaryOp::And)
                    .then(comparison)
                    .repeated(),
                |a, (op, b)| binary(op, a, b),
            )
            .boxed();

        conjunction.clone().foldl(
            just(Token::OrOr)
                .to(BinaryOp::Or)
                .then(conjunction)
                .repeated(),
            |a, (op, b)| binary(op, a, b),
        )
    });

    expr.clone()
        .then(
            just(Token::At)
                .map_with(|_, e| -> SimpleSpan { e.span() })
                .then(expr)
                .or_not(),
        )
        .then_ignore(end())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Expr {
        match parse_expression(source) {
            Ok(e) => e,
            Err(errs) => panic!("parse failed for {:?}: {:?}", source, errs),
        }
    }

    #[test]
    fn number_literal() {
        assert_eq!(parse_ok("2.5").kind, ExprKind::Constant(2.5));
    }

    #[test]
    fn negative_literal_folds() {
        assert_eq!(parse_ok("-3").kind, ExprKind::Constant(-3.0));
    }

    #[test]
    fn precedence_mul_over_add() {
        let e = parse_ok("1 + 2 * x");
        assert_eq!(format!("{}", e), "(1 + (2 * x))");
    }

    #[test]
    fn left_associative_subtraction() {
        let e = parse_ok("a - b - c");
        assert_eq!(format!("{}", e), "((a - b) - c)");
    }

    #[test]
    fn comparison_and_logic() {
        let e = parse_ok("x > 1 && y <= 2 || z");
        assert_eq!(format!("{}", e), "(((x > 1) && (y <= 2)) || z)");
    }

    #[test]
    fn unary_negation_of_reference() {
        let e = parse_ok("-x");
        match e.kind {
            ExprKind::Unary(UnaryOp::Negate, inner) => {
                assert!(matches!(inner.kind, ExprKind::Ref(_)));
            }
            other => panic!("expected negation, got {:?}", other),
        }
    }

    #[test]
    fn power_binds_tighter_than_negation() {
        let e = parse_ok("-x^2");
        assert_eq!(format!("{}", e), "-(x ^ 2)");
    }

    #[test]
    fn function_call_with_args() {
        let e = parse_ok("event(V > 1, 0.002, \"rise\")");
        match e.kind {
            ExprKind::Call(Func::Event, args) => assert_eq!(args.len(), 3),
            other => panic!("expected event call, got {:?}", other),
        }
    }

    #[test]
    fn zero_arg_call() {
        let e = parse_ok("uniform()");
        assert_eq!(e.kind, ExprKind::Call(Func::Uniform, vec![]));
    }

    #[test]
    fn unknown_function_rejected() {
        assert!(parse_expression("frobnicate(1)").is_err());
    }

    #[test]
    fn matrix_literal() {
        let e = parse_ok("[1, 2; 3, 4]");
        match e.kind {
            ExprKind::Matrix(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[1].len(), 2);
            }
            other => panic!("expected matrix, got {:?}", other),
        }
    }

    #[test]
    fn equation_with_condition() {
        let parsed = parse_equation("1 @ $init").unwrap();
        assert_eq!(parsed.expression.kind, ExprKind::Constant(1.0));
        let cond = parsed.condition.unwrap();
        assert_eq!(cond.text, "$init");
        assert!(matches!(cond.expr.kind, ExprKind::Ref(_)));
    }

    #[test]
    fn condition_text_is_trimmed_source() {
        let parsed = parse_equation("x + 1 @  V > 0.5 ").unwrap();
        assert_eq!(parsed.condition.unwrap().text, "V > 0.5");
    }

    #[test]
    fn expression_rejects_condition() {
        assert!(parse_expression("1 @ $init").is_err());
    }

    #[test]
    fn trailing_tokens_rejected() {
        assert!(parse_expression("1 2").is_err());
    }

    #[test]
    fn empty_input_rejected() {
        assert!(parse_expression("").is_err());
    }

    #[test]
    fn lex_errors_surface() {
        let errs = parse_expression("x # 1").unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("unexpected character")));
    }
}

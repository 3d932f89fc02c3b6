// Parser for symbolic expression text.
//
// Parses a token stream (from the lexer) into `symbolic::Expr` and
// `symbolic::Subset` values. Uses chumsky combinators.
//
// Grammar (lowest to highest precedence):
//   expr   := or
//   or     := and ("or" and)*
//   and    := not ("and" not)*
//   not    := "not"* cmp
//   cmp    := arith (cmpop arith)?
//   arith  := term (("+" | "-") term)*
//   term   := unary (("*" | "/" | "//" | "%") unary)*
//   unary  := "-"* power
//   power  := atom ("**" atom)?
//   atom   := INT | FLOAT | true | false | IDENT "(" args ")"
//           | IDENT "[" subset "]" | IDENT | "(" expr ")"
//   subset := range ("," range)*
//   range  := expr (":" expr (":" expr)?)?        (end exclusive)
//
// Preconditions: none.
// Postconditions: on success the whole input was consumed.
// Failure modes: lex or syntax errors → `Diagnostic` with code E0107.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::diag::{codes, Diagnostic};
use crate::lexer::Token;
use crate::symbolic::{BinOp, Expr, Range, Subset, UnOp};

type ParserError<'tokens> = extra::Err<Rich<'tokens, Token, SimpleSpan>>;

/// Parse an expression (`i + 1`, `i < N`, `A[i] * 2.0`).
pub fn parse_expr(source: &str) -> Result<Expr, Diagnostic> {
    let (tokens, eoi) = tokenize(source)?;
    let stream = Stream::from_iter(tokens.into_iter()).map(eoi, |(t, s): (_, _)| (t, s));
    expr_parser()
        .then_ignore(end())
        .parse(stream)
        .into_result()
        .map_err(|errors| syntax_error(source, &errors))
}

/// Parse a subset (`i, 0:N, 0:M:2`).
pub fn parse_subset(source: &str) -> Result<Subset, Diagnostic> {
    let (tokens, eoi) = tokenize(source)?;
    let stream = Stream::from_iter(tokens.into_iter()).map(eoi, |(t, s): (_, _)| (t, s));
    subset_parser(expr_parser())
        .then_ignore(end())
        .parse(stream)
        .into_result()
        .map_err(|errors| syntax_error(source, &errors))
}

/// Lex `source` into chumsky-spanned tokens plus the end-of-input span.
/// Lex errors are fatal here: expression text is short and machine-written.
fn tokenize(source: &str) -> Result<(Vec<(Token, SimpleSpan)>, SimpleSpan), Diagnostic> {
    let lex_result = crate::lexer::lex(source);
    if let Some(err) = lex_result.errors.first() {
        return Err(Diagnostic::usage(
            codes::E0107,
            format!("in expression '{}': {}", source, err.message),
        ));
    }
    let len = source.len();
    let tokens = lex_result
        .tokens
        .into_iter()
        .map(|(tok, span)| {
            let cspan: SimpleSpan = (span.start..span.end).into();
            (tok, cspan)
        })
        .collect();
    let eoi: SimpleSpan = (len..len).into();
    Ok((tokens, eoi))
}

fn syntax_error(source: &str, errors: &[Rich<'_, Token, SimpleSpan>]) -> Diagnostic {
    let detail = errors
        .first()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "syntax error".to_string());
    Diagnostic::usage(
        codes::E0107,
        format!("in expression '{}': {}", source, detail),
    )
}

/// Trailer of a name: call arguments or a subscript.
enum Suffix {
    Call(Vec<Expr>),
    Index(Subset),
}

fn subset_parser<'tokens, I>(
    expr: impl Parser<'tokens, I, Expr, ParserError<'tokens>> + Clone,
) -> impl Parser<'tokens, I, Subset, ParserError<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let range = expr
        .clone()
        .then(
            just(Token::Colon)
                .ignore_then(expr.clone())
                .then(just(Token::Colon).ignore_then(expr).or_not())
                .or_not(),
        )
        .map(|(begin, rest)| match rest {
            None => Range::index(begin),
            Some((end, step)) => Range::new(begin, end, step.unwrap_or(Expr::Int(1))),
        });

    range
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .map(Subset::new)
}

fn expr_parser<'tokens, I>() -> impl Parser<'tokens, I, Expr, ParserError<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    recursive(|expr| {
        let ident = select! { Token::Ident(name) => name };

        // ── Atoms ──

        let literal = select! {
            Token::Int(n) => Expr::Int(n),
            Token::Float(x) => Expr::Float(x),
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
        };

        let call_args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let subscript = subset_parser(expr.clone())
            .delimited_by(just(Token::LBracket), just(Token::RBracket));

        let suffix = call_args
            .map(Suffix::Call)
            .or(subscript.map(Suffix::Index));

        let named = ident.then(suffix.or_not()).map(|(name, suffix)| match suffix {
            Some(Suffix::Call(args)) => Expr::Call(name, args),
            Some(Suffix::Index(subset)) => Expr::Subscript(name, subset),
            None => Expr::Sym(name),
        });

        let parens = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let atom = literal.or(named).or(parens);

        // ── Arithmetic ──

        let power = atom
            .clone()
            .then(just(Token::StarStar).ignore_then(atom).or_not())
            .map(|(base, exp)| match exp {
                Some(e) => Expr::binary(BinOp::Pow, base, e),
                None => base,
            });

        let unary = just(Token::Minus)
            .repeated()
            .foldr(power, |_op, rhs| match rhs {
                Expr::Int(n) => Expr::Int(-n),
                Expr::Float(x) => Expr::Float(-x),
                other => Expr::Unary(UnOp::Neg, Box::new(other)),
            });

        let product_op = choice((
            just(Token::Star).to(BinOp::Mul),
            just(Token::SlashSlash).to(BinOp::FloorDiv),
            just(Token::Slash).to(BinOp::Div),
            just(Token::Percent).to(BinOp::Mod),
        ));
        let term = unary
            .clone()
            .foldl(product_op.then(unary).repeated(), |lhs, (op, rhs)| {
                Expr::binary(op, lhs, rhs)
            });

        let sum_op = choice((
            just(Token::Plus).to(BinOp::Add),
            just(Token::Minus).to(BinOp::Sub),
        ));
        let arith = term
            .clone()
            .foldl(sum_op.then(term).repeated(), |lhs, (op, rhs)| {
                Expr::binary(op, lhs, rhs)
            });

        // ── Comparison and logic ──

        let cmp_op = choice((
            just(Token::Le).to(BinOp::Le),
            just(Token::Ge).to(BinOp::Ge),
            just(Token::Lt).to(BinOp::Lt),
            just(Token::Gt).to(BinOp::Gt),
            just(Token::EqEq).to(BinOp::Eq),
            just(Token::Ne).to(BinOp::Ne),
        ));
        let cmp = arith
            .clone()
            .then(cmp_op.then(arith).or_not())
            .map(|(lhs, rest)| match rest {
                Some((op, rhs)) => Expr::binary(op, lhs, rhs),
                None => lhs,
            });

        let not = just(Token::Not)
            .repeated()
            .foldr(cmp, |_op, rhs| Expr::Unary(UnOp::Not, Box::new(rhs)));

        let and = not
            .clone()
            .foldl(just(Token::And).ignore_then(not).repeated(), |lhs, rhs| {
                Expr::binary(BinOp::And, lhs, rhs)
            });

        and.clone()
            .foldl(just(Token::Or).ignore_then(and).repeated(), |lhs, rhs| {
                Expr::binary(BinOp::Or, lhs, rhs)
            })
    })
}

// ── Tests ──

//! Shared `Token -> Span` conversion for every visitor that needs to emit a
//! diagnostic. `Token` carries no explicit length, so the underline width is
//! approximated from the token text itself -- good enough for `file:line:col`
//! rendering, since source-snippet underlining is explicitly out of scope.

use ember_ast::Token;
use ember_diagnostics::Span;

pub fn span_of(token: &Token) -> Span {
    Span::new(
        token.file.to_string(),
        token.line as usize,
        token.col as usize,
        token.text.len().max(1),
    )
}

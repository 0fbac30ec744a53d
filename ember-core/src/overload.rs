//! Overload resolution (§4.9): given a name's full candidate set and the
//! caller's argument types, picks the one `SFunction` to call.
//!
//! Two passes: arity filtering, then (only if more than one candidate
//! survives it) a score counting how many parameters are an exact type
//! match for their argument, keeping whichever candidate(s) score highest.
//! Tie-break is strictly by that count -- there is no separate implicit-
//! conversion scoring pass; a candidate that isn't an exact match anywhere
//! still competes at score 0 rather than being dropped, and the actual
//! argument-to-parameter casts (and any resulting diagnostic) happen after
//! a candidate is chosen, not during scoring.

use crate::backend::Backend;
use crate::types::{SType, TypeManager};
use crate::value::SFunction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverloadError {
    /// Nothing in the candidate set accepts this many arguments.
    ArityMismatch,
    /// More than one candidate is an equally-good match; the indices are
    /// positions into the original (unfiltered) candidate slice.
    Ambiguous(Vec<usize>),
}

/// Picks the best candidate, returning its index in `candidates`.
pub fn resolve_call<B: Backend>(
    _types: &TypeManager,
    candidates: &[SFunction<B>],
    args: &[SType],
) -> Result<usize, OverloadError> {
    let arity_ok: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, f)| arity_accepts(f, args.len()))
        .map(|(i, _)| i)
        .collect();

    if arity_ok.is_empty() {
        return Err(OverloadError::ArityMismatch);
    }
    if arity_ok.len() == 1 {
        return Ok(arity_ok[0]);
    }

    let scored: Vec<(usize, usize)> = arity_ok.iter().map(|&i| (i, exact_match_count(&candidates[i], args))).collect();
    let best_score = scored.iter().map(|(_, c)| *c).max().unwrap_or(0);
    let best: Vec<usize> = scored.iter().filter(|(_, c)| *c == best_score).map(|(i, _)| *i).collect();

    if best.len() == 1 {
        log::trace!("overload resolved via exact-match count {}: candidate {}", best_score, best[0]);
        Ok(best[0])
    } else {
        log::debug!("overload ambiguous among {:?} at exact-match count {}", best, best_score);
        Err(OverloadError::Ambiguous(best))
    }
}

fn arity_accepts<B: Backend>(f: &SFunction<B>, arg_count: usize) -> bool {
    if f.is_variadic {
        arg_count >= f.param_types.len()
    } else {
        arg_count == f.param_types.len()
    }
}

/// How many of `f`'s declared parameters are an exact type match for the
/// corresponding argument (§4.9 step 3). Variadic tail arguments (beyond the
/// declared parameters) never contribute to the count either way.
fn exact_match_count<B: Backend>(f: &SFunction<B>, args: &[SType]) -> usize {
    f.param_types.iter().zip(args.iter()).filter(|(p, a)| **p == **a).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;

    fn make_fn(be: &mut MockBackend, name: &str, params: Vec<SType>, ret: SType, variadic: bool) -> SFunction<MockBackend> {
        let be_params: Vec<_> = params.iter().map(|p| be.int_type(p.size().max(1) as u32)).collect();
        let be_ret = be.int_type(ret.size().max(1) as u32);
        let fn_ty = be.function_type(be_ret, &be_params);
        let function = be.add_function(name, fn_ty);
        SFunction::new(function, ret, name.to_string(), params, variadic)
    }

    #[test]
    fn single_arity_match_wins_outright() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let f = make_fn(&mut be, "f", vec![i32_t.clone()], i32_t.clone(), false);
        let idx = resolve_call(&tm, &[f], &[i32_t]).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let f = make_fn(&mut be, "f", vec![i32_t.clone(), i32_t.clone()], i32_t.clone(), false);
        assert_eq!(resolve_call(&tm, &[f], &[i32_t]), Err(OverloadError::ArityMismatch));
    }

    #[test]
    fn exact_match_beats_convertible_overload() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let i8_t = tm.get_int(8, false).unwrap();
        let exact = make_fn(&mut be, "f_i32", vec![i32_t.clone()], i32_t.clone(), false);
        let convertible = make_fn(&mut be, "f_i8", vec![i8_t], i32_t.clone(), false);
        let idx = resolve_call(&tm, &[convertible, exact], &[i32_t]).unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn equally_convertible_candidates_are_ambiguous() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let i8_t = tm.get_int(8, false).unwrap();
        let i16_t = tm.get_int(16, false).unwrap();
        let a = make_fn(&mut be, "f_i8", vec![i8_t], i32_t.clone(), false);
        let b = make_fn(&mut be, "f_i16", vec![i16_t], i32_t.clone(), false);
        let err = resolve_call(&tm, &[a, b], &[i32_t]).unwrap_err();
        assert!(matches!(err, OverloadError::Ambiguous(_)));
    }

    #[test]
    fn variadic_accepts_extra_arguments() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let ptr_t = tm.get_pointer(tm.get_int(8, true).unwrap());
        let printf = make_fn(&mut be, "printf", vec![ptr_t.clone()], i32_t.clone(), true);
        let idx = resolve_call(&tm, &[printf], &[ptr_t, i32_t.clone(), i32_t]).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn lone_arity_match_wins_even_when_not_convertible() {
        // Spec §4.9 step 2: a single arity-matching candidate is used
        // outright. The parameter/argument type mismatch below surfaces
        // later as a cast diagnostic at the call site, not here.
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let ptr_t = tm.get_pointer(i32_t.clone());
        let f = make_fn(&mut be, "f", vec![ptr_t], i32_t.clone(), false);
        let idx = resolve_call(&tm, &[f], &[i32_t]).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn non_exact_candidate_still_counts_toward_tie_break() {
        // A candidate with zero exact-matching parameters is still scored
        // (at 0) rather than dropped from consideration; two such
        // candidates tie and are ambiguous, matching the original's
        // exact-match-count algorithm rather than a conversion-cost one.
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let ptr_a = tm.get_pointer(i32_t.clone());
        let ptr_b = tm.get_pointer(tm.get_int(8, true).unwrap());
        let a = make_fn(&mut be, "f_a", vec![ptr_a], i32_t.clone(), false);
        let b = make_fn(&mut be, "f_b", vec![ptr_b], i32_t.clone(), false);
        let err = resolve_call(&tm, &[a, b], &[i32_t]).unwrap_err();
        assert!(matches!(err, OverloadError::Ambiguous(_)));
    }
}

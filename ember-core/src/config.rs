//! Configuration knobs the core accepts from its caller. CLI parsing lives
//! outside this crate; this struct is the shape those flags ultimately take
//! once they reach `GlobalContext::new`.

/// Options that affect semantic analysis and IR shape, as opposed to
/// anything about how the caller found the source or where it writes
/// output (that stays the excluded CLI collaborator's problem).
#[derive(Debug, Clone)]
pub struct CoreOptions {
    /// When `numericConv` would otherwise produce a signed result narrower
    /// than 31 bits, widen it to `i32` instead. Spec default: on.
    pub int32_min_promote: bool,
    /// Target triple forwarded to the back-end when it creates a module;
    /// the core itself does not interpret it.
    pub target_triple: Option<String>,
    /// Keep generated IR around (and printable) even when semantic errors
    /// were recorded, mirroring the `--noverify`/`--noclean` CLI flags.
    pub keep_ir_on_error: bool,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            int32_min_promote: true,
            target_triple: None,
            keep_ir_on_error: false,
        }
    }
}

impl CoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target_triple(mut self, triple: impl Into<String>) -> Self {
        self.target_triple = Some(triple.into());
        self
    }

    pub fn with_int32_min_promote(mut self, enabled: bool) -> Self {
        self.int32_min_promote = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_promotes_to_i32() {
        let opts = CoreOptions::default();
        assert!(opts.int32_min_promote);
        assert!(opts.target_triple.is_none());
    }
}

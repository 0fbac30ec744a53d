//! Canonicalization, construction and caching of every `SType` the engine
//! ever produces. Two language-equal types always resolve to the same
//! `SType` handle (type identity = pointer identity) -- the Type Manager is
//! the only thing allowed to mint one.

pub mod apint;
pub mod user;

use bitflags::bitflags;
use dashmap::DashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::CoreError;
pub use apint::ApInt;
pub use user::{ClassBody, EnumBody, MethodSignature, StructBody, UnionBody, UserTypeBody, UserTypeEntry};

bitflags! {
    /// Kind + modifier flags for an `SType`. Modeled as a bitflag set so
    /// `isConstEQ` can mask out `CONST` with one AND instead of special
    /// casing every kind.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u32 {
        const AUTO       = 1 << 0;
        const VOID       = 1 << 1;
        const BOOL       = 1 << 2;
        const INTEGER    = 1 << 3;
        const FLOATING   = 1 << 4;
        const POINTER    = 1 << 5;
        const REFERENCE  = 1 << 6;
        const COPY_REF   = 1 << 7;
        const ARRAY      = 1 << 8;
        const VEC        = 1 << 9;
        const ENUM       = 1 << 10;
        const STRUCT     = 1 << 11;
        const UNION      = 1 << 12;
        const CLASS      = 1 << 13;
        const FUNCTION   = 1 << 14;
        const ALIAS      = 1 << 15;
        const OPAQUE     = 1 << 16;
        const UNSIGNED   = 1 << 17;
        const DOUBLE     = 1 << 18;
        const CONST      = 1 << 19;
    }
}

impl TypeFlags {
    pub fn is_numeric(self) -> bool {
        self.intersects(TypeFlags::INTEGER | TypeFlags::FLOATING)
    }

    pub fn is_sequence(self) -> bool {
        self.intersects(TypeFlags::ARRAY | TypeFlags::VEC)
    }

    pub fn is_composite(self) -> bool {
        self.intersects(TypeFlags::STRUCT | TypeFlags::UNION | TypeFlags::CLASS)
    }

    pub fn without_const(self) -> Self {
        self & !TypeFlags::CONST
    }
}

/// The data behind an `SType` handle. Never mutated after `setBody`
/// completes (user types go through an interior-mutable body cell; see
/// `types::user`), so sharing it via `Arc` is safe without locking for
/// reads.
#[derive(Debug)]
pub struct TypeData {
    pub flags: TypeFlags,
    /// Bit-width for integers; element count for arrays/vecs/enums/structs
    /// storage; 0 otherwise.
    pub size: u64,
    /// Element of array/vec; pointee; return type for functions; aliased
    /// type; `None` for primitives and opaque-less user types.
    pub subtype: Option<SType>,
    /// Parameter types, for function types only.
    pub params: Vec<SType>,
    /// Raw (mangled) name for user types (`Name<arg1,...>`); `None` for
    /// everything else.
    pub name: Option<Arc<str>>,
    /// Set at creation for a forward-declared user type, cleared once
    /// `setBody` completes. Tracked outside `flags` because `TypeData` is
    /// shared behind an `Arc` and every other bit is fixed for the life of
    /// the type.
    opaque: AtomicBool,
}

/// A canonical, interned type handle. Cloning is cheap (`Arc` clone);
/// equality and hashing are by pointer identity, not structural shape --
/// structural uniqueness is the Type Manager's job, enforced once at
/// construction time.
#[derive(Debug, Clone)]
pub struct SType(pub(crate) Arc<TypeData>);

impl SType {
    pub fn flags(&self) -> TypeFlags {
        self.0.flags
    }

    pub fn size(&self) -> u64 {
        self.0.size
    }

    pub fn subtype(&self) -> Option<&SType> {
        self.0.subtype.as_ref()
    }

    pub fn params(&self) -> &[SType] {
        &self.0.params
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn is_const(&self) -> bool {
        self.0.flags.contains(TypeFlags::CONST)
    }

    /// True for a forward-declared user type whose `setBody` has not yet
    /// run. Tracked separately from `flags` since completing a type must
    /// not mint a new `SType` identity (callers already hold this handle).
    pub fn is_opaque(&self) -> bool {
        self.0.opaque.load(Ordering::Acquire)
    }

    pub(crate) fn mark_complete(&self) {
        self.0.opaque.store(false, Ordering::Release);
    }

    /// Construct a forward-declared user-type handle: no subtype/params yet,
    /// `is_opaque()` true until `mark_complete` runs.
    pub(crate) fn new_opaque(flags: TypeFlags, name: Arc<str>) -> SType {
        SType(Arc::new(TypeData {
            flags,
            size: 0,
            subtype: None,
            params: vec![],
            name: Some(name),
            opaque: AtomicBool::new(true),
        }))
    }

    /// Compares ignoring `CONST` on both sides; `a == b` (the `PartialEq`
    /// impl) stays strict.
    pub fn is_const_eq(&self, other: &SType) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.flags.without_const() == other.0.flags.without_const()
            && self.0.size == other.0.size
            && self.0.name == other.0.name
            && match (&self.0.subtype, &other.0.subtype) {
                (Some(a), Some(b)) => a.is_const_eq(b),
                (None, None) => true,
                _ => false,
            }
            && self.0.params.len() == other.0.params.len()
            && self
                .0
                .params
                .iter()
                .zip(other.0.params.iter())
                .all(|(a, b)| a.is_const_eq(b))
    }
}

impl PartialEq for SType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for SType {}

impl Hash for SType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

/// Interning key. Structurally describes a type shape so that two requests
/// for the "same" type (same Type-Manager calls) hit the same cache entry.
/// `SType` fields compare by identity, which is exactly right here: a
/// sub-type was itself already interned before it can be used as a key.
#[derive(Clone, PartialEq, Eq, Hash)]
enum TypeKey {
    Void,
    Auto,
    Bool,
    Int(u32, bool),
    Float(bool),
    Pointer(SType),
    Reference(SType),
    CopyRef(SType),
    Array(SType, u64),
    Vec(SType, u64),
    Function(SType, Vec<SType>),
    Const(SType),
}

/// Owns every `SType` ever created for a module, plus the user-type
/// registry (see `types::user`). Created once per module and borrowed by
/// every visitor and the Builder through the Code Context.
pub struct TypeManager {
    cache: DashMap<TypeKey, SType>,
    const_of: DashMap<SType, SType>,
    mutable_of: DashMap<SType, SType>,
    pub(crate) user_types: DashMap<String, Arc<UserTypeEntry>>,
}

impl Default for TypeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeManager {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
            const_of: DashMap::new(),
            mutable_of: DashMap::new(),
            user_types: DashMap::new(),
        }
    }

    fn intern(&self, key: TypeKey, flags: TypeFlags, size: u64, subtype: Option<SType>, params: Vec<SType>) -> SType {
        if let Some(existing) = self.cache.get(&key) {
            return existing.clone();
        }
        let ty = SType(Arc::new(TypeData {
            flags,
            size,
            subtype,
            params,
            name: None,
            opaque: AtomicBool::new(false),
        }));
        self.cache.entry(key).or_insert(ty).clone()
    }

    pub fn get_void(&self) -> SType {
        self.intern(TypeKey::Void, TypeFlags::VOID, 0, None, vec![])
    }

    pub fn get_auto(&self) -> SType {
        self.intern(TypeKey::Auto, TypeFlags::AUTO, 0, None, vec![])
    }

    pub fn get_bool(&self) -> SType {
        self.intern(TypeKey::Bool, TypeFlags::BOOL, 1, None, vec![])
    }

    /// Widths {1, 8, 16, 32, 64} only; anything else is the "unsupported
    /// width" failure mode.
    pub fn get_int(&self, width: u32, unsigned: bool) -> Result<SType, CoreError> {
        if !matches!(width, 1 | 8 | 16 | 32 | 64) {
            return Err(CoreError::UnsupportedWidth(width));
        }
        let mut flags = TypeFlags::INTEGER;
        if unsigned {
            flags |= TypeFlags::UNSIGNED;
        }
        Ok(self.intern(TypeKey::Int(width, unsigned), flags, width as u64, None, vec![]))
    }

    pub fn get_float(&self, is_double: bool) -> SType {
        let mut flags = TypeFlags::FLOATING;
        if is_double {
            flags |= TypeFlags::DOUBLE;
        }
        let size = if is_double { 64 } else { 32 };
        self.intern(TypeKey::Float(is_double), flags, size, None, vec![])
    }

    pub fn get_pointer(&self, pointee: SType) -> SType {
        // Pointer-to-void is represented as pointer-to-i8 internally.
        let pointee = if pointee.flags().contains(TypeFlags::VOID) {
            self.get_int(8, true).unwrap_or(pointee)
        } else {
            pointee
        };
        self.intern(
            TypeKey::Pointer(pointee.clone()),
            TypeFlags::POINTER,
            0,
            Some(pointee),
            vec![],
        )
    }

    pub fn get_reference(&self, referent: SType) -> Result<SType, &'static str> {
        if referent.flags().contains(TypeFlags::VOID) {
            return Err("cannot form a reference to void");
        }
        Ok(self.intern(
            TypeKey::Reference(referent.clone()),
            TypeFlags::REFERENCE,
            0,
            Some(referent),
            vec![],
        ))
    }

    pub fn get_copy_ref(&self, referent: SType) -> Result<SType, &'static str> {
        if referent.flags().contains(TypeFlags::VOID) {
            return Err("cannot form a copy-reference to void");
        }
        Ok(self.intern(
            TypeKey::CopyRef(referent.clone()),
            TypeFlags::COPY_REF,
            0,
            Some(referent),
            vec![],
        ))
    }

    /// `n == 0` is allowed here (pointer-target only array); `validate`
    /// rejects zero-size arrays that aren't behind a pointer.
    pub fn get_array(&self, elem: SType, n: u64) -> Result<SType, &'static str> {
        if elem.flags().intersects(TypeFlags::VOID | TypeFlags::AUTO) || elem.is_opaque() {
            return Err("array element type must be a concrete, sized type");
        }
        Ok(self.intern(TypeKey::Array(elem.clone(), n), TypeFlags::ARRAY, n, Some(elem), vec![]))
    }

    /// Vec requires `n >= 1` and a numeric-or-pointer element.
    pub fn get_vec(&self, elem: SType, n: u64) -> Result<SType, &'static str> {
        if n == 0 {
            return Err("vec size must be at least 1");
        }
        if !elem.flags().is_numeric() && !elem.flags().contains(TypeFlags::POINTER) {
            return Err("vec element must be numeric or a pointer");
        }
        Ok(self.intern(TypeKey::Vec(elem.clone(), n), TypeFlags::VEC, n, Some(elem), vec![]))
    }

    pub fn get_function(&self, ret: SType, params: Vec<SType>) -> SType {
        let key = TypeKey::Function(ret.clone(), params.clone());
        if let Some(existing) = self.cache.get(&key) {
            return existing.clone();
        }
        let ty = SType(Arc::new(TypeData {
            flags: TypeFlags::FUNCTION,
            size: 0,
            subtype: Some(ret),
            params,
            name: None,
            opaque: AtomicBool::new(false),
        }));
        self.cache.entry(key).or_insert(ty).clone()
    }

    /// Idempotent. For sequences, pushes `const` into the element; for
    /// struct/union, the caller is expected to have already built a
    /// const-qualified member view via `setBody` bookkeeping -- here we
    /// just flip the flag and register the two-way map.
    pub fn get_const(&self, t: SType) -> SType {
        if t.is_const() {
            return t;
        }
        if let Some(existing) = self.const_of.get(&t) {
            return existing.clone();
        }
        let const_subtype = t.0.subtype.clone().map(|s| self.get_const(s));
        let data = TypeData {
            flags: t.0.flags | TypeFlags::CONST,
            size: t.0.size,
            subtype: const_subtype,
            params: t.0.params.clone(),
            name: t.0.name.clone(),
            opaque: AtomicBool::new(t.is_opaque()),
        };
        let const_ty = SType(Arc::new(data));
        self.const_of.insert(t.clone(), const_ty.clone());
        self.mutable_of.insert(const_ty.clone(), t);
        const_ty
    }

    pub fn get_mutable(&self, t: SType) -> SType {
        if !t.is_const() {
            return t;
        }
        self.mutable_of.get(&t).map(|v| v.clone()).unwrap_or(t)
    }

    /// Descend through pointer/array/vec/function to find the first
    /// numeric leaf type, defaulting to `i32` if none is found -- used by
    /// diagnostics that need *some* numeric type to fold a literal against.
    pub fn number_like(&self, t: &SType) -> SType {
        if t.flags().is_numeric() {
            return t.clone();
        }
        if let Some(sub) = t.subtype() {
            return self.number_like(sub);
        }
        self.get_int(32, false).unwrap_or_else(|_| self.get_bool())
    }

    /// Symmetric upcast used by binary-operator and compare typing: vec+vec
    /// requires equal arity; floating dominates integer; otherwise the
    /// wider signed-bit-count wins; if `int32_min_promote` and the result
    /// is narrower than 31 bits, widen to i32.
    pub fn numeric_conv(&self, l: &SType, r: &SType, int32_min_promote: bool) -> Result<SType, &'static str> {
        if l.flags().contains(TypeFlags::VEC) || r.flags().contains(TypeFlags::VEC) {
            let (le, re) = match (l.subtype(), r.subtype()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err("vec type missing element type"),
            };
            if l.size() != r.size() {
                return Err("vec arity mismatch");
            }
            let elem = self.numeric_conv(le, re, int32_min_promote)?;
            return self.get_vec(elem, l.size());
        }

        if l.flags().contains(TypeFlags::FLOATING) || r.flags().contains(TypeFlags::FLOATING) {
            let double = l.flags().contains(TypeFlags::DOUBLE) || r.flags().contains(TypeFlags::DOUBLE);
            return Ok(self.get_float(double));
        }

        if !l.flags().contains(TypeFlags::INTEGER) || !r.flags().contains(TypeFlags::INTEGER) {
            return Err("numeric conversion requires numeric operands");
        }

        // Signed-bit count treats an N-bit type, signed or not, as having
        // N-1 usable signed bits -- so a same-width `u32`/`i32` mix ties at
        // 31 each. On a tie the signed side wins, matching the documented
        // `u32` + `i32` -> `i32` behavior.
        let signed_bits = |t: &SType| -> u64 { t.size().saturating_sub(1) };

        let l_bits = signed_bits(l);
        let r_bits = signed_bits(r);
        let (wider, unsigned) = match l_bits.cmp(&r_bits) {
            std::cmp::Ordering::Greater => (l, l.flags().contains(TypeFlags::UNSIGNED)),
            std::cmp::Ordering::Less => (r, r.flags().contains(TypeFlags::UNSIGNED)),
            std::cmp::Ordering::Equal => {
                if !l.flags().contains(TypeFlags::UNSIGNED) {
                    (l, false)
                } else if !r.flags().contains(TypeFlags::UNSIGNED) {
                    (r, false)
                } else {
                    (l, true)
                }
            }
        };

        let mut width = wider.size();
        if int32_min_promote && width < 31 {
            width = 32;
        }
        self.get_int(width.max(1) as u32, unsigned).map_err(|_| "invalid numeric conversion width")
    }

    /// Bytes required for `t`; used for `sizeof`, `new` size math, and
    /// union storage selection.
    pub fn alloc_size(&self, t: &SType) -> u64 {
        let flags = t.flags();
        if flags.contains(TypeFlags::VOID) {
            return 0;
        }
        if flags.contains(TypeFlags::BOOL) {
            return 1;
        }
        if flags.intersects(TypeFlags::INTEGER | TypeFlags::FLOATING) {
            return t.size().div_ceil(8).max(1);
        }
        if flags.intersects(TypeFlags::POINTER | TypeFlags::REFERENCE | TypeFlags::COPY_REF) {
            return 8;
        }
        if flags.contains(TypeFlags::ARRAY) || flags.contains(TypeFlags::VEC) {
            let elem = t.subtype().map(|s| self.alloc_size(s)).unwrap_or(0);
            return elem * t.size();
        }
        if let Some(name) = t.name() {
            if let Some(entry) = self.user_types.get(name) {
                return entry.alloc_size(self);
            }
        }
        0
    }

    /// Rejects zero-size arrays except behind a pointer.
    pub fn validate(&self, t: &SType, behind_pointer: bool) -> Result<(), &'static str> {
        if t.flags().contains(TypeFlags::ARRAY) && t.size() == 0 && !behind_pointer {
            return Err("can't create a non-pointer to a zero size array");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_same_handle() {
        let tm = TypeManager::new();
        let a = tm.get_int(32, false).unwrap();
        let b = tm.get_int(32, false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_width_is_different_type() {
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let i64_t = tm.get_int(64, false).unwrap();
        assert_ne!(i32_t, i64_t);
    }

    #[test]
    fn unsupported_width_fails() {
        let tm = TypeManager::new();
        assert!(tm.get_int(24, false).is_err());
    }

    #[test]
    fn const_mutable_round_trip() {
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let const_t = tm.get_const(i32_t.clone());
        assert_eq!(tm.get_mutable(const_t.clone()), i32_t);
        assert_eq!(tm.get_const(const_t.clone()), const_t);
    }

    #[test]
    fn const_eq_ignores_const_strict_eq_does_not() {
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let const_t = tm.get_const(i32_t.clone());
        assert!(i32_t.is_const_eq(&const_t));
        assert_ne!(i32_t, const_t);
    }

    #[test]
    fn zero_size_array_rejected_unless_behind_pointer() {
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let arr = tm.get_array(i32_t, 0).unwrap();
        assert!(tm.validate(&arr, false).is_err());
        assert!(tm.validate(&arr, true).is_ok());
    }

    #[test]
    fn numeric_conv_prefers_i32_on_narrow_mix() {
        let tm = TypeManager::new();
        let u8_t = tm.get_int(8, true).unwrap();
        let i8_t = tm.get_int(8, false).unwrap();
        let result = tm.numeric_conv(&u8_t, &i8_t, true).unwrap();
        assert_eq!(result.size(), 32);
    }

    #[test]
    fn pointer_to_void_is_pointer_to_i8() {
        let tm = TypeManager::new();
        let void_t = tm.get_void();
        let ptr = tm.get_pointer(void_t);
        let i8_ptr = tm.get_pointer(tm.get_int(8, true).unwrap());
        assert_eq!(ptr, i8_ptr);
    }
}

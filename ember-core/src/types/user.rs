//! The `SUserType` hierarchy: structs, classes, unions, enums and aliases.
//! Each is registered in the Type Manager's `user_types` map keyed by raw
//! (mangled) name, created opaque on first reference and completed later
//! via `setBody` -- this two-phase dance is what makes cyclic type graphs
//! (a struct holding a pointer to itself) safe to build.

use std::sync::{Arc, Mutex};

use super::apint::ApInt;
use super::{SType, TypeFlags, TypeManager};
use crate::errors::CoreError;

/// A method's structural signature, used for overload resolution and
/// mangling. The generated value (the actual `SFunction`) lives in the
/// Global Context's function table, keyed by the mangled name here --
/// the Type Manager stays backend-agnostic.
#[derive(Debug, Clone)]
pub struct MethodSignature {
    pub mangled: String,
    pub params: Vec<SType>,
    pub ret: SType,
    pub is_variadic: bool,
}

#[derive(Debug, Default)]
pub struct StructBody {
    /// Ordered `name -> (index, field type)`. Order matters: it is the
    /// struct's storage layout and its constructor-argument order.
    pub fields: Vec<(String, SType)>,
}

impl StructBody {
    pub fn field_index(&self, name: &str) -> Option<(usize, &SType)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, (n, _))| n == name)
            .map(|(i, (_, ty))| (i, ty))
    }
}

/// A class adds overloaded member functions on top of a struct layout,
/// including at most one constructor overload set (`this`) and at most one
/// destructor (`null`).
#[derive(Debug, Default)]
pub struct ClassBody {
    pub fields: StructBody,
    pub methods: Vec<(String, Vec<MethodSignature>)>,
}

impl ClassBody {
    pub fn overloads(&self, name: &str) -> &[MethodSignature] {
        self.methods
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, fns)| fns.as_slice())
            .unwrap_or(&[])
    }

    pub fn overloads_mut(&mut self, name: &str) -> &mut Vec<MethodSignature> {
        if let Some(idx) = self.methods.iter().position(|(n, _)| n == name) {
            return &mut self.methods[idx].1;
        }
        self.methods.push((name.to_string(), Vec::new()));
        let last = self.methods.len() - 1;
        &mut self.methods[last].1
    }

    pub fn constructors(&self) -> &[MethodSignature] {
        self.overloads("this")
    }

    pub fn destructor(&self) -> Option<&MethodSignature> {
        self.overloads("null").first()
    }
}

#[derive(Debug, Default)]
pub struct UnionBody {
    pub members: Vec<(String, SType)>,
    /// The largest-alloc member, chosen by `setBody`; this is the storage
    /// type the back-end actually allocates.
    pub storage: Option<SType>,
}

#[derive(Debug, Default)]
pub struct EnumBody {
    pub members: Vec<(String, ApInt)>,
    pub base: Option<SType>,
}

#[derive(Debug)]
pub enum UserTypeBody {
    Opaque,
    Alias { target: SType },
    Struct(StructBody),
    Class(ClassBody),
    Union(UnionBody),
    Enum(EnumBody),
}

/// One entry in the user-type registry: the `SType` handle callers compare
/// by identity, paired with the (possibly not-yet-filled-in) body behind
/// it.
#[derive(Debug)]
pub struct UserTypeEntry {
    pub sty: SType,
    pub body: Mutex<UserTypeBody>,
}

impl UserTypeEntry {
    pub fn alloc_size(&self, manager: &TypeManager) -> u64 {
        let body = match self.body.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match &*body {
            UserTypeBody::Opaque => 0,
            UserTypeBody::Alias { target } => manager.alloc_size(target),
            UserTypeBody::Struct(s) => s.fields.iter().map(|(_, t)| manager.alloc_size(t)).sum(),
            UserTypeBody::Class(c) => c.fields.fields.iter().map(|(_, t)| manager.alloc_size(t)).sum(),
            UserTypeBody::Union(u) => u.storage.as_ref().map(|t| manager.alloc_size(t)).unwrap_or(0),
            UserTypeBody::Enum(e) => e.base.as_ref().map(|t| manager.alloc_size(t)).unwrap_or(4),
        }
    }
}

impl TypeManager {
    /// Exact lookup by raw (mangled) name.
    pub fn lookup_user_type(&self, raw: &str) -> Option<SType> {
        self.user_types.get(raw).map(|e| e.sty.clone())
    }

    fn create_opaque(&self, raw: &str, flags: TypeFlags, initial: UserTypeBody) -> Result<SType, CoreError> {
        if self.user_types.contains_key(raw) {
            return Err(CoreError::TypeAlreadyDeclared(raw.to_string()));
        }
        let sty = SType::new_opaque(flags | TypeFlags::OPAQUE, Arc::from(raw));
        let entry = Arc::new(UserTypeEntry {
            sty: sty.clone(),
            body: Mutex::new(initial),
        });
        self.user_types.insert(raw.to_string(), entry);
        Ok(sty)
    }

    /// Idempotent by raw name: a second `create*` call for an existing name
    /// returns the existing handle instead of erroring, matching the
    /// "create opaque, then complete" two-phase protocol a self-referential
    /// type needs.
    pub fn create_alias(&self, raw: &str, target: SType) -> SType {
        if let Some(existing) = self.lookup_user_type(raw) {
            return existing;
        }
        let sty = self
            .create_opaque(raw, TypeFlags::ALIAS, UserTypeBody::Alias { target })
            .unwrap_or_else(|_| self.lookup_user_type(raw).expect("just inserted"));
        // An alias's target is known at creation time; there is no
        // forward-declared window the way there is for struct/class/union.
        sty.mark_complete();
        sty
    }

    pub fn create_struct(&self, raw: &str) -> SType {
        self.get_or_create_opaque(raw, TypeFlags::STRUCT, UserTypeBody::Opaque)
    }

    pub fn create_class(&self, raw: &str) -> SType {
        self.get_or_create_opaque(raw, TypeFlags::CLASS | TypeFlags::STRUCT, UserTypeBody::Opaque)
    }

    pub fn create_union(&self, raw: &str) -> SType {
        self.get_or_create_opaque(raw, TypeFlags::UNION, UserTypeBody::Opaque)
    }

    pub fn create_enum(&self, raw: &str) -> SType {
        self.get_or_create_opaque(raw, TypeFlags::ENUM, UserTypeBody::Opaque)
    }

    fn get_or_create_opaque(&self, raw: &str, flags: TypeFlags, initial: UserTypeBody) -> SType {
        if let Some(existing) = self.lookup_user_type(raw) {
            return existing;
        }
        self.create_opaque(raw, flags, initial)
            .unwrap_or_else(|_| self.lookup_user_type(raw).expect("just inserted"))
    }

    /// Fills in fields for a struct/class (keeping declaration order and
    /// indices), picks the largest-alloc member as storage for a union, or
    /// stores enum constants -- and drops `OPAQUE` from the type's flags.
    pub fn set_struct_body(&self, raw: &str, fields: Vec<(String, SType)>) -> Result<(), CoreError> {
        let entry = self
            .user_types
            .get(raw)
            .map(|e| e.clone())
            .ok_or_else(|| CoreError::NotATemplate(raw.to_string()))?;
        let mut body = entry.body.lock().unwrap_or_else(|p| p.into_inner());
        *body = match &*body {
            UserTypeBody::Class(existing) => UserTypeBody::Class(ClassBody {
                fields: StructBody { fields },
                methods: existing.methods.clone(),
            }),
            _ => UserTypeBody::Struct(StructBody { fields }),
        };
        drop(body);
        entry.sty.mark_complete();
        Ok(())
    }

    pub fn set_union_body(&self, raw: &str, members: Vec<(String, SType)>) -> Result<(), CoreError> {
        let entry = self
            .user_types
            .get(raw)
            .map(|e| e.clone())
            .ok_or_else(|| CoreError::NotATemplate(raw.to_string()))?;
        let storage = members
            .iter()
            .max_by_key(|(_, t)| self.alloc_size(t))
            .map(|(_, t)| t.clone());
        let mut body = entry.body.lock().unwrap_or_else(|p| p.into_inner());
        *body = UserTypeBody::Union(UnionBody { members, storage });
        drop(body);
        entry.sty.mark_complete();
        Ok(())
    }

    pub fn set_enum_body(&self, raw: &str, members: Vec<(String, ApInt)>, base: SType) -> Result<(), CoreError> {
        let entry = self
            .user_types
            .get(raw)
            .map(|e| e.clone())
            .ok_or_else(|| CoreError::NotATemplate(raw.to_string()))?;
        let mut body = entry.body.lock().unwrap_or_else(|p| p.into_inner());
        *body = UserTypeBody::Enum(EnumBody {
            members,
            base: Some(base),
        });
        drop(body);
        entry.sty.mark_complete();
        Ok(())
    }

    pub fn user_type_entry(&self, raw: &str) -> Option<Arc<UserTypeEntry>> {
        self.user_types.get(raw).map(|e| e.clone())
    }

    /// Adds a method overload to a class that has already had its fields
    /// set (or is still opaque, for a forward-declared-then-filled class).
    pub fn add_class_method(&self, raw: &str, name: &str, sig: MethodSignature) -> Result<(), CoreError> {
        let entry = self
            .user_types
            .get(raw)
            .map(|e| e.clone())
            .ok_or_else(|| CoreError::NotATemplate(raw.to_string()))?;
        let mut body = entry.body.lock().unwrap_or_else(|p| p.into_inner());
        match &mut *body {
            UserTypeBody::Class(class) => {
                class.overloads_mut(name).push(sig);
                Ok(())
            }
            UserTypeBody::Opaque => {
                let mut class = ClassBody::default();
                class.overloads_mut(name).push(sig);
                *body = UserTypeBody::Class(class);
                Ok(())
            }
            _ => Err(CoreError::NotATemplate(raw.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_struct_is_idempotent_by_name() {
        let tm = TypeManager::new();
        let a = tm.create_struct("Point");
        let b = tm.create_struct("Point");
        assert_eq!(a, b);
    }

    #[test]
    fn set_body_fills_fields_and_alloc_size_sums_them() {
        let tm = TypeManager::new();
        tm.create_struct("Point");
        let i32_t = tm.get_int(32, false).unwrap();
        tm.set_struct_body(
            "Point",
            vec![("x".to_string(), i32_t.clone()), ("y".to_string(), i32_t)],
        )
        .unwrap();
        let sty = tm.lookup_user_type("Point").unwrap();
        assert_eq!(tm.alloc_size(&sty), 8);
    }

    #[test]
    fn union_storage_is_largest_member() {
        let tm = TypeManager::new();
        tm.create_union("U");
        let i8_t = tm.get_int(8, false).unwrap();
        let i64_t = tm.get_int(64, false).unwrap();
        tm.set_union_body(
            "U",
            vec![("small".to_string(), i8_t), ("big".to_string(), i64_t.clone())],
        )
        .unwrap();
        let sty = tm.lookup_user_type("U").unwrap();
        assert_eq!(tm.alloc_size(&sty), 8);
        let entry = tm.user_type_entry("U").unwrap();
        let body = entry.body.lock().unwrap();
        match &*body {
            UserTypeBody::Union(u) => assert_eq!(u.storage.as_ref().unwrap(), &i64_t),
            _ => panic!("expected union body"),
        }
    }
}

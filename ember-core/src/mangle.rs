//! Function symbol naming (§4.14).
//!
//! A function's *in-scope* name (what source references resolve against) and
//! its *mangled* external symbol are tracked separately: class members
//! prepend `ClassName_` to the external name by default; `#[mangle("name")]`
//! overrides the external name outright; `#[mangle("name", "full")]`
//! additionally suppresses the class-name prefix. Full mangling is rejected
//! on a templated class's member functions (the class-name prefix is the
//! only thing that keeps two instantiations' same-named methods distinct).

use ember_ast::Attribute;

/// Parsed `#[mangle(...)]` attribute, pulled out of a declaration's raw
/// `Attribute` list by the Builder before a function prototype is created.
#[derive(Debug, Clone, Default)]
pub struct MangleOverride {
    pub external_name: Option<String>,
    pub full: bool,
}

pub fn parse_mangle_attribute(attrs: &[Attribute]) -> Option<MangleOverride> {
    let attr = attrs.iter().find(|a| a.name.text.as_ref() == "mangle")?;
    let external_name = attr.args.first().map(|t| t.text.to_string());
    let full = attr
        .args
        .get(1)
        .map(|t| t.text.as_ref() == "full")
        .unwrap_or(false);
    Some(MangleOverride { external_name, full })
}

/// Computes the external symbol for a free function: the override's name if
/// present, otherwise the raw name unchanged.
pub fn mangle_free_function(raw_name: &str, mangle: Option<&MangleOverride>) -> String {
    match mangle {
        Some(m) => m.external_name.clone().unwrap_or_else(|| raw_name.to_string()),
        None => raw_name.to_string(),
    }
}

/// Computes the external symbol for a class member function.
///
/// `is_templated` rejects `full` mangling outright (§4.14): a templated
/// class's instantiations must keep the class-name prefix or their methods
/// collide in the back-end's flat symbol namespace.
pub fn mangle_member_function(
    class_raw_name: &str,
    method_name: &str,
    mangle: Option<&MangleOverride>,
    is_templated: bool,
) -> Result<String, &'static str> {
    if let Some(m) = mangle {
        if let Some(name) = &m.external_name {
            if m.full {
                if is_templated {
                    return Err("full mangling is forbidden on templated-class member functions");
                }
                return Ok(name.clone());
            }
            return Ok(format!("{}_{}", class_raw_name, name));
        }
    }
    Ok(format!("{}_{}", class_raw_name, method_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_ast::Token;

    fn attr(name: &str, args: &[&str]) -> Attribute {
        Attribute {
            token: Token::synthetic(name),
            name: Token::synthetic(name),
            args: args.iter().map(|a| Token::synthetic(*a)).collect(),
        }
    }

    #[test]
    fn default_member_mangling_prepends_class_name() {
        let name = mangle_member_function("Point", "dist", None, false).unwrap();
        assert_eq!(name, "Point_dist");
    }

    #[test]
    fn mangle_override_without_full_still_prepends_class() {
        let m = parse_mangle_attribute(&[attr("mangle", &["dist2"])]).unwrap();
        let name = mangle_member_function("Point", "dist", Some(&m), false).unwrap();
        assert_eq!(name, "Point_dist2");
    }

    #[test]
    fn full_mangle_drops_class_prefix() {
        let m = parse_mangle_attribute(&[attr("mangle", &["raw_dist", "full"])]).unwrap();
        let name = mangle_member_function("Point", "dist", Some(&m), false).unwrap();
        assert_eq!(name, "raw_dist");
    }

    #[test]
    fn full_mangle_rejected_on_templated_class() {
        let m = parse_mangle_attribute(&[attr("mangle", &["raw_dist", "full"])]).unwrap();
        let err = mangle_member_function("Box", "dist", Some(&m), true).unwrap_err();
        assert!(err.contains("templated"));
    }

    #[test]
    fn free_function_without_attribute_keeps_raw_name() {
        assert_eq!(mangle_free_function("main", None), "main");
    }
}

//! Table of built-in functions resolved to runtime `builtin$<name>` symbols.
//!
//! These are installed into the root block at level 0, exactly like user-defined
//! functions, except that `is_builtin` routes calls to `builtin$<name>` instead of
//! a constructed code label and they have no body block to construct.

use crate::scope::ParamDecl;
use crate::types::SemanticType;

/// One built-in's signature: its parameters (by-reference flag + type) and
/// optional return type. Parameter modes/types follow the runtime ABI described
/// in SPEC_FULL.md §6 / DESIGN.md.
pub struct BuiltinSignature {
    pub name: &'static str,
    pub params: Vec<ParamDecl>,
    pub return_type: Option<SemanticType>,
}

fn param(name: &str, by_reference: bool, ty: SemanticType) -> ParamDecl {
    ParamDecl {
        name: name.to_string(),
        by_reference,
        ty,
    }
}

/// The full built-in table, in no particular order (each is independently
/// installed by name).
pub fn builtin_signatures() -> Vec<BuiltinSignature> {
    use SemanticType::*;
    vec![
        BuiltinSignature {
            name: "read",
            params: vec![param("out", true, Integer)],
            return_type: None,
        },
        BuiltinSignature {
            name: "write",
            params: vec![param("value", false, Integer)],
            return_type: None,
        },
        BuiltinSignature {
            name: "writeln",
            params: vec![],
            return_type: None,
        },
        BuiltinSignature {
            name: "readf",
            params: vec![param("out", true, Double)],
            return_type: None,
        },
        BuiltinSignature {
            name: "writef",
            params: vec![param("value", false, Double)],
            return_type: None,
        },
        BuiltinSignature {
            name: "writefln",
            params: vec![param("value", false, Double)],
            return_type: None,
        },
        BuiltinSignature {
            name: "reads",
            params: vec![param("out", true, String)],
            return_type: None,
        },
        BuiltinSignature {
            name: "readsln",
            params: vec![param("out", true, String)],
            return_type: None,
        },
        BuiltinSignature {
            name: "writes",
            params: vec![param("value", false, String)],
            return_type: None,
        },
        BuiltinSignature {
            name: "writesln",
            params: vec![param("value", false, String)],
            return_type: None,
        },
        BuiltinSignature {
            name: "strlen",
            params: vec![param("value", false, String)],
            return_type: Some(Integer),
        },
        BuiltinSignature {
            name: "strcat",
            params: vec![
                param("a", false, String),
                param("b", false, String),
                param("result", true, String),
            ],
            return_type: None,
        },
        BuiltinSignature {
            name: "getchr",
            params: vec![param("value", false, String), param("index", false, Integer)],
            return_type: Some(Integer),
        },
        BuiltinSignature {
            name: "setchr",
            params: vec![
                param("value", false, String),
                param("index", false, Integer),
                param("ch", false, Integer),
            ],
            return_type: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_symbol_from_the_abi_is_present() {
        let names: Vec<&str> = builtin_signatures().iter().map(|b| b.name).collect();
        for expected in [
            "read", "write", "writeln", "readf", "writef", "writefln", "reads", "readsln",
            "writes", "writesln", "strlen", "strcat", "getchr", "setchr",
        ] {
            assert!(names.contains(&expected), "missing builtin {expected}");
        }
    }

    #[test]
    fn strlen_returns_integer() {
        let sigs = builtin_signatures();
        let strlen = sigs.iter().find(|b| b.name == "strlen").unwrap();
        assert_eq!(strlen.return_type, Some(SemanticType::Integer));
    }

    #[test]
    fn strcat_takes_two_by_value_inputs_and_a_by_reference_output() {
        let sigs = builtin_signatures();
        let strcat = sigs.iter().find(|b| b.name == "strcat").unwrap();
        assert_eq!(strcat.params.len(), 3);
        assert!(!strcat.params[0].by_reference);
        assert!(!strcat.params[1].by_reference);
        assert!(strcat.params[2].by_reference);
        assert!(strcat.params.iter().all(|p| p.ty == SemanticType::String));
        assert!(strcat.return_type.is_none());
    }
}

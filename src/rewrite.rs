//! # Rewrite
//!
//! Replaces reads of one field with calls to a replacement function. A read `LdFld field` pops a
//! reference and pushes one value; the substituted `Call replacement` pops the same reference as
//! its only argument and pushes one value of the same type. Both encode to the same number of
//! bytes, so the substitution is 1:1 and no branch offset moves.

use thiserror::Error;

use crate::code::{FieldId, FunctionId, Instr};
use crate::resolve::{FieldInfo, TypeRegistry};
use crate::runtime::ValueType;

/// Errors building an [`AccessPattern`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// The replacement function is unknown to the host
    #[error("replacement function {0:?} is not registered")]
    UnknownFunction(FunctionId),
    /// The replacement doesn't take exactly one reference to the field's owner
    #[error("replacement must take a single {expected:?}, takes {params:?}")]
    Parameters {
        /// The one parameter the replacement must take
        expected: ValueType,
        /// What it takes
        params: Vec<ValueType>,
    },
    /// The replacement returns something other than the field's type
    #[error("replacement returns {returns:?} but the field holds {field:?}")]
    ReturnType {
        /// Type of the field
        field: ValueType,
        /// Return type of the replacement
        returns: ValueType,
    },
}

/// A read of one field, and the function that replaces it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessPattern {
    /// Field whose reads are replaced
    field: FieldId,
    /// Function called instead
    replacement: FunctionId,
}
impl AccessPattern {
    /// Creates a pattern after checking that `replacement` is a drop-in for reading `field`
    pub fn new<R: TypeRegistry + ?Sized>(
        registry: &R,
        field: &FieldInfo,
        replacement: FunctionId,
    ) -> Result<Self, PatternError> {
        let signature = registry
            .function_signature(replacement)
            .ok_or(PatternError::UnknownFunction(replacement))?;
        let expected = ValueType::Object(field.owner);
        if signature.params != [expected] {
            return Err(PatternError::Parameters {
                expected,
                params: signature.params,
            });
        }
        if signature.ret != field.ty {
            return Err(PatternError::ReturnType {
                field: field.ty,
                returns: signature.ret,
            });
        }
        Ok(Self {
            field: field.id,
            replacement,
        })
    }

    /// Field whose reads are replaced
    pub fn field(&self) -> FieldId {
        self.field
    }

    /// Function called instead
    pub fn replacement(&self) -> FunctionId {
        self.replacement
    }

    /// Whether `instr` reads the field
    pub fn matches(&self, instr: &Instr) -> bool {
        *instr == Instr::LdFld(self.field)
    }
}

/// Result of rewriting one body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rewrite {
    /// The rewritten body
    pub instrs: Vec<Instr>,
    /// Number of reads replaced
    pub sites: usize,
}

/// Rewrites every read matching `pattern`; everything else passes through in order
pub fn rewrite(instrs: &[Instr], pattern: &AccessPattern) -> Vec<Instr> {
    instrs
        .iter()
        .map(|instr| {
            if pattern.matches(instr) {
                Instr::Call(pattern.replacement)
            } else {
                *instr
            }
        })
        .collect()
}

/// Number of reads in `instrs` matching `pattern`
pub fn count_matches(instrs: &[Instr], pattern: &AccessPattern) -> usize {
    instrs.iter().filter(|instr| pattern.matches(instr)).count()
}

/// Applies every pattern in turn
pub fn rewrite_all(instrs: &[Instr], patterns: &[AccessPattern]) -> Rewrite {
    let mut out = instrs.to_vec();
    let mut sites = 0;
    for pattern in patterns {
        let found = count_matches(&out, pattern);
        if found > 0 {
            out = rewrite(&out, pattern);
            sites += found;
        }
    }
    Rewrite { instrs: out, sites }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::code::encode;
    use crate::hook::HookHost;
    use crate::resolve::resolve_field;
    use crate::runtime::testing::City;
    use crate::runtime::{Runtime, Signature, Value};

    /// Registers a replacement for `BuildingInfo::m_placementMode` and builds its pattern
    fn placement_pattern(city: &City) -> AccessPattern {
        let field = resolve_field(&*city.runtime, "BuildingInfo", "m_placementMode").unwrap();
        let replacement = city
            .runtime
            .register_function(
                "GetPlacementMode",
                Signature::new(vec![ValueType::Object(city.building_info)], ValueType::Int),
                Arc::new(|_: &[Value]| Value::Int(0)),
            )
            .unwrap();
        AccessPattern::new(&*city.runtime, &field, replacement).unwrap()
    }

    /// Stack depth after each instruction
    fn depths(runtime: &Runtime, instrs: &[Instr]) -> Vec<isize> {
        let mut depth = 0;
        instrs
            .iter()
            .map(|instr| {
                depth += instr
                    .stack_effect(|f| runtime.function_signature(f).map(|s| s.params.len()))
                    .unwrap()
                    .net();
                depth
            })
            .collect()
    }

    /// Deterministic pseudo-random instruction sequences mixing matching and non-matching reads
    fn sequences(city: &City) -> Vec<Vec<Instr>> {
        let pool = [
            Instr::LdArg(0),
            Instr::LdFld(city.placement_mode),
            Instr::LdFld(city.cell_width),
            Instr::LdInt(7),
            Instr::Dup,
            Instr::Add,
            Instr::Pop,
            Instr::Br(0),
            Instr::Nop,
        ];
        let mut state = 0x2545_f491_u32;
        (0..64)
            .map(|len| {
                (0..len)
                    .map(|_| {
                        state ^= state << 13;
                        state ^= state >> 17;
                        state ^= state << 5;
                        pool[state as usize % pool.len()]
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_rewrites_each_read() {
        let city = City::load_ready();
        let pattern = placement_pattern(&city);
        let body = [
            Instr::LdArg(0),
            Instr::LdFld(city.placement_mode),
            Instr::LdArg(0),
            Instr::LdFld(city.cell_width),
            Instr::Add,
            Instr::LdArg(1),
            Instr::LdFld(city.placement_mode),
            Instr::Add,
            Instr::Ret,
        ];
        assert_eq!(count_matches(&body, &pattern), 2);
        let rewritten = rewrite(&body, &pattern);
        let call = Instr::Call(pattern.replacement());
        assert_eq!(
            rewritten,
            [
                Instr::LdArg(0),
                call,
                Instr::LdArg(0),
                Instr::LdFld(city.cell_width),
                Instr::Add,
                Instr::LdArg(1),
                call,
                Instr::Add,
                Instr::Ret,
            ]
        );
    }

    #[test]
    /// Bodies without the read come back unchanged
    fn test_pattern_neutrality() {
        let city = City::load_ready();
        let pattern = placement_pattern(&city);
        for body in sequences(&city) {
            let body: Vec<_> = body
                .into_iter()
                .filter(|instr| !pattern.matches(instr))
                .collect();
            assert_eq!(rewrite(&body, &pattern), body);
            assert_eq!(rewrite_all(&body, &[pattern]).sites, 0);
        }
    }

    #[test]
    /// Same length, same encoded size, and the same stack depth after every instruction
    fn test_stack_shape_preserved() {
        let city = City::load_ready();
        let pattern = placement_pattern(&city);
        for body in sequences(&city) {
            let rewritten = rewrite_all(&body, &[pattern]);
            assert_eq!(rewritten.sites, count_matches(&body, &pattern));
            assert_eq!(rewritten.instrs.len(), body.len());
            assert_eq!(encode(&rewritten.instrs).len(), encode(&body).len());
            assert_eq!(
                depths(&city.runtime, &rewritten.instrs),
                depths(&city.runtime, &body)
            );
        }
    }

    #[test]
    fn test_rejects_mismatched_replacement() {
        let city = City::load_ready();
        let field = resolve_field(&*city.runtime, "BuildingInfo", "m_placementMode").unwrap();
        let info = ValueType::Object(city.building_info);
        let register = |name: &str, signature| {
            city.runtime
                .register_function(name, signature, Arc::new(|_: &[Value]| Value::Null))
                .unwrap()
        };

        let returns_str = register("GetName", Signature::new(vec![info], ValueType::Str));
        assert_eq!(
            AccessPattern::new(&*city.runtime, &field, returns_str),
            Err(PatternError::ReturnType {
                field: ValueType::Int,
                returns: ValueType::Str
            })
        );

        let two_params = register("Combine", Signature::new(vec![info, info], ValueType::Int));
        assert!(matches!(
            AccessPattern::new(&*city.runtime, &field, two_params),
            Err(PatternError::Parameters { .. })
        ));

        assert_eq!(
            AccessPattern::new(&*city.runtime, &field, FunctionId(99)),
            Err(PatternError::UnknownFunction(FunctionId(99)))
        );
    }
}

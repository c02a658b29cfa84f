//! # Resolve
//!
//! Maps configured `(owner, member)` pairs onto handles of methods and fields that the host has
//! already loaded. Every lookup is independent, so a target missing from one host build never
//! affects the others.

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

use crate::code::{FieldId, FunctionId, MethodId, TypeId};
use crate::runtime::{Signature, ValueType};

/// A loaded method as seen by lookup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    /// Handle of the method
    pub id: MethodId,
    /// Parameter types, in order
    pub params: Vec<ValueType>,
}

/// A loaded field as seen by lookup
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    /// Token of the field
    pub id: FieldId,
    /// Type declaring the field
    pub owner: TypeId,
    /// Type of the field's value
    pub ty: ValueType,
    /// Position of the field inside instances of `owner`
    pub slot: usize,
}

/// Lookup-by-name over the host's loaded types
pub trait TypeRegistry {
    /// Finds a loaded type by name
    fn find_type(&self, name: &str) -> Option<TypeId>;
    /// Every method of `ty` called `name`, one entry per overload
    fn methods_named(&self, ty: TypeId, name: &str) -> Vec<MethodInfo>;
    /// Finds a field of `ty` by name
    fn find_field(&self, ty: TypeId, name: &str) -> Option<FieldInfo>;
    /// Signature of a registered native function
    fn function_signature(&self, function: FunctionId) -> Option<Signature>;
}

/// Errors when resolving a configured target. All of them mean the target doesn't exist in this
/// host build.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No type with this name is loaded
    #[error("type `{0}` is not loaded")]
    TypeNotFound(String),
    /// The type has no matching method
    #[error("`{owner}` has no method `{member}`")]
    MethodNotFound {
        /// Owning type
        owner: String,
        /// Member as configured
        member: String,
    },
    /// A bare name matched several overloads
    #[error("`{owner}::{member}` has {candidates} overloads; a parameter list is required")]
    Ambiguous {
        /// Owning type
        owner: String,
        /// Member name
        member: String,
        /// Number of overloads found
        candidates: usize,
    },
    /// The type has no field with this name
    #[error("`{owner}` has no field `{field}`")]
    FieldNotFound {
        /// Owning type
        owner: String,
        /// Field name
        field: String,
    },
}

/// Parameter type named in an overload signature
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeRef {
    /// Integer parameter
    Int,
    /// String parameter
    Str,
    /// Object parameter of the named type
    Named(Cow<'static, str>),
}
impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Int => f.write_str("int"),
            TypeRef::Str => f.write_str("string"),
            TypeRef::Named(name) => f.write_str(name),
        }
    }
}

/// How a method is picked out of its owning type
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Member {
    /// A name with exactly one overload
    Name(Cow<'static, str>),
    /// A name plus the parameter list of the wanted overload
    Overload {
        /// Method name
        name: Cow<'static, str>,
        /// Parameter types, in order
        params: Vec<TypeRef>,
    },
}
impl Member {
    /// Name of the method
    pub fn name(&self) -> &str {
        match self {
            Member::Name(name) | Member::Overload { name, .. } => name,
        }
    }
}
impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Name(name) => f.write_str(name),
            Member::Overload { name, params } => {
                write!(f, "{}(", name)?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// One method to rewrite. Built once from configuration; the handle it resolves to is kept by
/// the engine for the current apply cycle only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodTarget {
    /// Name of the owning type
    pub owner: Cow<'static, str>,
    /// Method within the owning type
    pub member: Member,
}
impl MethodTarget {
    /// Targets the only method of `owner` called `name`
    pub fn method(owner: impl Into<Cow<'static, str>>, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            owner: owner.into(),
            member: Member::Name(name.into()),
        }
    }

    /// Targets the overload of `owner::name` taking `params`
    pub fn overload(
        owner: impl Into<Cow<'static, str>>,
        name: impl Into<Cow<'static, str>>,
        params: Vec<TypeRef>,
    ) -> Self {
        Self {
            owner: owner.into(),
            member: Member::Overload {
                name: name.into(),
                params,
            },
        }
    }

    /// Resolves this target against `registry`
    pub fn resolve<R: TypeRegistry + ?Sized>(&self, registry: &R) -> Result<MethodId, ResolveError> {
        let ty = registry
            .find_type(&self.owner)
            .ok_or_else(|| ResolveError::TypeNotFound(self.owner.to_string()))?;
        let candidates = registry.methods_named(ty, self.member.name());
        let not_found = || ResolveError::MethodNotFound {
            owner: self.owner.to_string(),
            member: self.member.to_string(),
        };
        match &self.member {
            Member::Name(name) => match candidates.as_slice() {
                [] => Err(not_found()),
                [only] => Ok(only.id),
                many => Err(ResolveError::Ambiguous {
                    owner: self.owner.to_string(),
                    member: name.to_string(),
                    candidates: many.len(),
                }),
            },
            Member::Overload { params, .. } => {
                let wanted = params
                    .iter()
                    .map(|param| resolve_type(registry, param))
                    .collect::<Result<Vec<_>, _>>()?;
                candidates
                    .into_iter()
                    .find(|candidate| candidate.params == wanted)
                    .map(|candidate| candidate.id)
                    .ok_or_else(not_found)
            }
        }
    }
}
impl fmt::Display for MethodTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.member)
    }
}

/// Resolves a parameter type name
pub fn resolve_type<R: TypeRegistry + ?Sized>(
    registry: &R,
    ty: &TypeRef,
) -> Result<ValueType, ResolveError> {
    match ty {
        TypeRef::Int => Ok(ValueType::Int),
        TypeRef::Str => Ok(ValueType::Str),
        TypeRef::Named(name) => registry
            .find_type(name)
            .map(ValueType::Object)
            .ok_or_else(|| ResolveError::TypeNotFound(name.to_string())),
    }
}

/// Resolves `owner::field`
pub fn resolve_field<R: TypeRegistry + ?Sized>(
    registry: &R,
    owner: &str,
    field: &str,
) -> Result<FieldInfo, ResolveError> {
    let ty = registry
        .find_type(owner)
        .ok_or_else(|| ResolveError::TypeNotFound(owner.to_string()))?;
    registry
        .find_field(ty, field)
        .ok_or_else(|| ResolveError::FieldNotFound {
            owner: owner.to_string(),
            field: field.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::City;

    #[test]
    fn test_resolve_method() {
        let city = City::load();
        let target = MethodTarget::method("BuildingAI", "CheckBuildPosition");
        assert_eq!(target.resolve(&*city.runtime), Ok(city.check_build_position));
    }

    #[test]
    fn test_missing_type_and_method() {
        let city = City::load();
        assert_eq!(
            MethodTarget::method("NetTool", "SimulationStep").resolve(&*city.runtime),
            Err(ResolveError::TypeNotFound("NetTool".into()))
        );
        assert!(matches!(
            MethodTarget::method("BuildingTool", "Demolish").resolve(&*city.runtime),
            Err(ResolveError::MethodNotFound { .. })
        ));
    }

    #[test]
    /// A bare name must not silently pick one of several overloads
    fn test_ambiguous_overload() {
        let city = City::load();
        let err = MethodTarget::method("BuildingTool", "GetConstructionCost")
            .resolve(&*city.runtime)
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::Ambiguous {
                owner: "BuildingTool".into(),
                member: "GetConstructionCost".into(),
                candidates: 2
            }
        );
    }

    #[test]
    fn test_resolve_overload() {
        let city = City::load();
        let single = MethodTarget::overload(
            "BuildingTool",
            "GetConstructionCost",
            vec![TypeRef::Named("BuildingInfo".into())],
        );
        assert_eq!(single.resolve(&*city.runtime), Ok(city.construction_cost));

        let pair = MethodTarget::overload(
            "BuildingTool",
            "GetConstructionCost",
            vec![TypeRef::Named("BuildingInfo".into()), TypeRef::Int],
        );
        assert_eq!(pair.resolve(&*city.runtime), Ok(city.construction_cost_at));
        assert_eq!(
            pair.to_string(),
            "BuildingTool::GetConstructionCost(BuildingInfo, int)"
        );

        let missing =
            MethodTarget::overload("BuildingTool", "GetConstructionCost", vec![TypeRef::Str]);
        assert!(matches!(
            missing.resolve(&*city.runtime),
            Err(ResolveError::MethodNotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_field() {
        let city = City::load();
        let field = resolve_field(&*city.runtime, "BuildingInfo", "m_placementMode").unwrap();
        assert_eq!(field.id, city.placement_mode);
        assert_eq!(field.ty, ValueType::Int);
        assert!(matches!(
            resolve_field(&*city.runtime, "BuildingInfo", "m_size"),
            Err(ResolveError::FieldNotFound { .. })
        ));
    }
}

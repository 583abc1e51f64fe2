//! Runtime type resolution and the subtype check.

use core_types::{
    HtType, IntrinsicType, NamespaceId, NominalType, StructuralType, Value,
};

use crate::heap::Heap;
use crate::lexicon;

impl Heap {
    /// The type of a runtime value.
    ///
    /// Opaque host objects answer a plain nominal `object` here; the
    /// interpreter refines them through the registered reflection hooks.
    pub fn type_of(&self, value: &Value) -> HtType {
        match value {
            Value::Null => HtType::null(),
            Value::Boolean(_)
            | Value::Integer(_)
            | Value::Float(_)
            | Value::BigInt(_)
            | Value::String(_)
            | Value::List(_)
            | Value::Map(_) => HtType::nominal(value.type_name()),
            Value::Struct(sid) => {
                let field_types = self
                    .struct_keys(*sid)
                    .into_iter()
                    .map(|key| {
                        let field = self.hstruct(*sid).fields[&key].clone();
                        (key, self.type_of(&field))
                    })
                    .collect();
                HtType::Structural(StructuralType { field_types })
            }
            Value::Instance(iid) => {
                let class_id = self.instance(*iid).class_id;
                HtType::Nominal(NominalType::resolved(&self.class(class_id).id, class_id))
            }
            Value::Cast(view) => {
                HtType::Nominal(NominalType::resolved(&self.class(view.class_id).id, view.class_id))
            }
            Value::Function(fid) => self.function(*fid).value_type(),
            Value::ExternFunction(_) => HtType::Intrinsic(IntrinsicType::Function),
            Value::Class(_) | Value::Type(_) => HtType::type_type(),
            Value::Namespace(_) => HtType::Intrinsic(IntrinsicType::Namespace),
            Value::ExternObject(_) => HtType::nominal("object"),
        }
    }

    /// Resolve the class reference of a nominal type against a namespace.
    pub fn resolve_type(&self, declared: &HtType, ns: NamespaceId) -> HtType {
        match declared {
            HtType::Nominal(nominal) if nominal.resolved.is_none() => {
                let mut resolved = nominal.clone();
                if let Ok(Some(decl)) = self.ns_lookup(ns, &nominal.id, None, true) {
                    if let Value::Class(class_id) = decl.value {
                        resolved.resolved = Some(class_id);
                    }
                }
                HtType::Nominal(resolved)
            }
            other => other.clone(),
        }
    }

    /// The subtype check.
    ///
    /// `any` is top, `never` is bottom; nominal types use the class chain;
    /// function types are contravariant on parameters and covariant on the
    /// return type; structural types use width subtyping.
    pub fn is_a(&self, left: &HtType, right: &HtType) -> bool {
        if right.is_any() || left.is_never() {
            return true;
        }
        if left.is_any() || right.is_never() {
            return false;
        }
        if matches!(left, HtType::Intrinsic(IntrinsicType::Null)) {
            return right.is_nullable();
        }
        match (left, right) {
            (HtType::Intrinsic(a), HtType::Intrinsic(b)) => a == b,
            (HtType::Function(_), HtType::Intrinsic(IntrinsicType::Function)) => true,
            (HtType::Nominal(a), HtType::Nominal(b)) => {
                if a.is_nullable && !b.is_nullable {
                    return false;
                }
                match (a.resolved, b.resolved) {
                    (Some(l), Some(r)) => self.class_extends(l, r),
                    (None, None) => a.id == b.id,
                    (Some(l), None) => self.class(l).id == b.id,
                    (None, Some(_)) => false,
                }
            }
            (HtType::Function(a), HtType::Function(b)) => {
                // Contravariant parameters
                let left_positional: Vec<_> =
                    a.parameter_types.iter().filter(|p| p.id.is_none()).collect();
                let right_positional: Vec<_> =
                    b.parameter_types.iter().filter(|p| p.id.is_none()).collect();
                let left_required = left_positional
                    .iter()
                    .filter(|p| !p.is_optional && !p.is_variadic)
                    .count();
                if left_required > right_positional.len() {
                    return false;
                }
                let left_variadic = left_positional.iter().any(|p| p.is_variadic);
                if right_positional.len() > left_positional.len() && !left_variadic {
                    return false;
                }
                for (i, right_param) in right_positional.iter().enumerate() {
                    let left_param = match left_positional.get(i) {
                        Some(param) => param,
                        None => match left_positional.last() {
                            Some(param) if param.is_variadic => param,
                            _ => return false,
                        },
                    };
                    if !self.is_a(&right_param.declared, &left_param.declared) {
                        return false;
                    }
                }
                for right_param in b.parameter_types.iter().filter(|p| p.id.is_some()) {
                    let name = right_param.id.as_deref();
                    let left_param = a
                        .parameter_types
                        .iter()
                        .find(|p| p.id.is_some() && p.id.as_deref() == name);
                    match left_param {
                        Some(left_param) => {
                            if !self.is_a(&right_param.declared, &left_param.declared) {
                                return false;
                            }
                        }
                        None => return false,
                    }
                }
                // Covariant return
                self.is_a(&a.return_type, &b.return_type)
            }
            (HtType::Structural(a), HtType::Structural(b)) => {
                for (id, right_field) in &b.field_types {
                    match a.field_types.iter().find(|(key, _)| key == id) {
                        Some((_, left_field)) => {
                            if !self.is_a(left_field, right_field) {
                                return false;
                            }
                        }
                        None => return false,
                    }
                }
                true
            }
            _ => false,
        }
    }

    /// Refined type name for display in cast errors.
    pub fn type_display(&self, value: &Value) -> String {
        match value {
            Value::Instance(iid) => self.class(self.instance(*iid).class_id).id.clone(),
            Value::Struct(sid) => {
                let id = &self.hstruct(*sid).id;
                if lexicon::is_internal(id) {
                    "struct".to_string()
                } else {
                    id.clone()
                }
            }
            other => other.type_name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::HtClass;

    #[test]
    fn test_any_is_top_never_is_bottom() {
        let heap = Heap::new();
        for value_type in [
            HtType::nominal("int"),
            HtType::null(),
            HtType::type_type(),
        ] {
            assert!(heap.is_a(&value_type, &HtType::any()));
            assert!(heap.is_a(&HtType::never(), &value_type));
        }
        assert!(!heap.is_a(&HtType::any(), &HtType::nominal("int")));
    }

    #[test]
    fn test_null_conforms_to_nullable_only() {
        let heap = Heap::new();
        let mut nullable = NominalType::named("int");
        nullable.is_nullable = true;
        assert!(heap.is_a(&HtType::null(), &HtType::Nominal(nullable)));
        assert!(!heap.is_a(&HtType::null(), &HtType::nominal("int")));
    }

    #[test]
    fn test_nominal_chain() {
        let mut heap = Heap::new();
        let root = heap.alloc_namespace("global", None, None);
        let ns_a = heap.alloc_namespace("A", Some(root), None);
        let ns_b = heap.alloc_namespace("B", Some(root), None);
        let a = heap.alloc_class(HtClass::new("A", ns_a));
        let mut class_b = HtClass::new("B", ns_b);
        class_b.super_class = Some(a);
        let b = heap.alloc_class(class_b);

        let type_a = HtType::Nominal(NominalType::resolved("A", a));
        let type_b = HtType::Nominal(NominalType::resolved("B", b));
        assert!(heap.is_a(&type_b, &type_a));
        assert!(!heap.is_a(&type_a, &type_b));
    }

    #[test]
    fn test_structural_width() {
        let heap = Heap::new();
        let wide = HtType::Structural(StructuralType {
            field_types: vec![
                ("x".to_string(), HtType::nominal("int")),
                ("y".to_string(), HtType::nominal("str")),
            ],
        });
        let narrow = HtType::Structural(StructuralType {
            field_types: vec![("x".to_string(), HtType::nominal("int"))],
        });
        assert!(heap.is_a(&wide, &narrow));
        assert!(!heap.is_a(&narrow, &wide));
    }

    #[test]
    fn test_type_of_primitives() {
        let heap = Heap::new();
        assert_eq!(heap.type_of(&Value::Integer(1)).to_string(), "int");
        assert_eq!(heap.type_of(&Value::Null).to_string(), "null");
        assert_eq!(
            heap.type_of(&Value::String("x".to_string())).to_string(),
            "str"
        );
    }
}

//! Type reference substitution inside one method body.
//!
//! The rewriter looks for a type by full name in two places: the declared types of the
//! method's locals, and instruction operands that are that type or a member of it. Matching
//! operands are swapped for the replacement; opcodes, order and every other operand stay as
//! they are. Token operands are always four bytes wide, so a substitution never moves an
//! instruction and branch displacements remain valid.
//!
//! Rewriting happens in two steps. [`TypeReferenceRewriter::plan`] only reads the module and
//! records what would change; [`TypeReferenceRewriter::apply`] performs the recorded
//! substitutions. This lets callers import the replacement type only when something matched.

use crate::{
    assembly::{Operand, TokenRef},
    metadata::{
        handles::{FieldRef, MemberRefId, MethodId, MethodRef, TypeDefOrRef},
        module::Module,
        signatures::{StandAloneSig, TypeSig},
    },
};

/// The substitutions found in one method body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewritePlan {
    /// Indices of matching locals, in declaration order
    pub locals: Vec<usize>,
    /// Indices of matching instructions, in program order
    pub instructions: Vec<usize>,
}

impl RewritePlan {
    /// Total number of substitutions
    #[must_use]
    pub fn len(&self) -> usize {
        self.locals.len() + self.instructions.len()
    }

    /// Returns true if nothing matched
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Replaces every use of one type, named by its full name, in a method body.
pub struct TypeReferenceRewriter<'a> {
    target: &'a str,
}

impl<'a> TypeReferenceRewriter<'a> {
    /// A rewriter for the type whose full name is `target`, e.g. `NS.Outer+Inner`
    #[must_use]
    pub fn new(target: &'a str) -> Self {
        TypeReferenceRewriter { target }
    }

    fn matches_type(&self, module: &Module, handle: TypeDefOrRef) -> bool {
        module.type_full_name(handle) == self.target
    }

    fn matches_member_ref(&self, module: &Module, id: MemberRefId) -> bool {
        module
            .member_ref(id)
            .and_then(|member_ref| member_ref.parent.type_handle())
            .is_some_and(|parent| self.matches_type(module, parent))
    }

    fn matches_method(&self, module: &Module, method: MethodRef) -> bool {
        match method {
            MethodRef::Ref(id) => self.matches_member_ref(module, id),
            MethodRef::Spec(id) => module.method_spec(id).is_some_and(|spec| match spec.method {
                MethodRef::Ref(inner) => self.matches_member_ref(module, inner),
                _ => false,
            }),
            MethodRef::Def(_) => false,
        }
    }

    fn matches_operand(&self, module: &Module, operand: &Operand) -> bool {
        match operand {
            Operand::Type(handle) | Operand::Token(TokenRef::Type(handle)) => {
                self.matches_type(module, *handle)
            }
            Operand::Method(method) | Operand::Token(TokenRef::Method(method)) => {
                self.matches_method(module, *method)
            }
            Operand::Field(FieldRef::Ref(id)) | Operand::Token(TokenRef::Field(FieldRef::Ref(id))) => {
                self.matches_member_ref(module, *id)
            }
            _ => false,
        }
    }

    /// Find every substitution in the body of `method` without changing anything
    #[must_use]
    pub fn plan(&self, module: &Module, method: MethodId) -> RewritePlan {
        let mut plan = RewritePlan::default();
        let Some(body) = module.method(method).and_then(|m| m.body.as_ref()) else {
            return plan;
        };

        if let Some(StandAloneSig::Locals(locals)) =
            body.local_sig.and_then(|sig| module.standalone_sig(sig))
        {
            for (index, local) in locals.iter().enumerate() {
                if let TypeSig::Class(handle) | TypeSig::ValueType(handle) = local {
                    if self.matches_type(module, *handle) {
                        plan.locals.push(index);
                    }
                }
            }
        }

        for (index, instruction) in body.instructions.iter().enumerate() {
            if self.matches_operand(module, &instruction.operand) {
                plan.instructions.push(index);
            }
        }

        plan
    }

    /// Perform the substitutions of `plan`, returning how many were made.
    ///
    /// A local signature shared with other methods is copied before it is changed, so only
    /// `method` sees the new local types. Member references are recreated against
    /// `replacement` with their original name and signature.
    pub fn apply(
        &self,
        plan: &RewritePlan,
        module: &mut Module,
        method: MethodId,
        replacement: TypeDefOrRef,
    ) -> usize {
        let Some(mut body) = module.method_mut(method).and_then(|m| m.body.take()) else {
            return 0;
        };
        let mut count = 0;

        if let Some(sig) = body.local_sig.filter(|_| !plan.locals.is_empty()) {
            if let Some(StandAloneSig::Locals(locals)) = module.standalone_sig(sig) {
                let mut locals = locals.clone();
                for &index in &plan.locals {
                    match locals.get_mut(index) {
                        Some(TypeSig::Class(handle) | TypeSig::ValueType(handle)) => {
                            *handle = replacement;
                            count += 1;
                        }
                        _ => {}
                    }
                }

                if module.standalone_sig_users(sig) > 0 {
                    // the body is taken out, so any remaining user is another method
                    body.local_sig = Some(module.push_standalone_sig(StandAloneSig::Locals(locals)));
                } else if let Some(shared) = module.standalone_sig_mut(sig) {
                    *shared = StandAloneSig::Locals(locals);
                }
            }
        }

        for &index in &plan.instructions {
            let Some(instruction) = body.instructions.get(index) else {
                continue;
            };
            if let Some(operand) = substitute(module, &instruction.operand, replacement) {
                body.instructions[index].operand = operand;
                count += 1;
            }
        }

        if let Some(target) = module.method_mut(method) {
            target.body = Some(body);
        }
        count
    }

    /// Plan and apply in one go. `replacement` is only called, and so the replacement type
    /// only imported, if at least one substitution was found.
    pub fn rewrite(
        &self,
        module: &mut Module,
        method: MethodId,
        replacement: impl FnOnce(&mut Module) -> TypeDefOrRef,
    ) -> usize {
        let plan = self.plan(module, method);
        if plan.is_empty() {
            return 0;
        }

        let replacement = replacement(module);
        self.apply(&plan, module, method, replacement)
    }
}

fn substitute(module: &mut Module, operand: &Operand, replacement: TypeDefOrRef) -> Option<Operand> {
    match operand {
        Operand::Type(_) => Some(Operand::Type(replacement)),
        Operand::Token(TokenRef::Type(_)) => Some(Operand::Token(TokenRef::Type(replacement))),
        Operand::Method(method) => retarget_method(module, *method, replacement).map(Operand::Method),
        Operand::Token(TokenRef::Method(method)) => retarget_method(module, *method, replacement)
            .map(|method| Operand::Token(TokenRef::Method(method))),
        Operand::Field(FieldRef::Ref(id)) => retarget_member(module, *id, replacement)
            .map(|id| Operand::Field(FieldRef::Ref(id))),
        Operand::Token(TokenRef::Field(FieldRef::Ref(id))) => {
            retarget_member(module, *id, replacement)
                .map(|id| Operand::Token(TokenRef::Field(FieldRef::Ref(id))))
        }
        _ => None,
    }
}

fn retarget_member(
    module: &mut Module,
    id: MemberRefId,
    replacement: TypeDefOrRef,
) -> Option<MemberRefId> {
    let member_ref = module.member_ref(id)?.clone();
    Some(
        module
            .references()
            .member_ref(replacement, &member_ref.name, member_ref.signature),
    )
}

fn retarget_method(
    module: &mut Module,
    method: MethodRef,
    replacement: TypeDefOrRef,
) -> Option<MethodRef> {
    match method {
        MethodRef::Ref(id) => retarget_member(module, id, replacement).map(MethodRef::Ref),
        MethodRef::Spec(id) => {
            let spec = module.method_spec(id)?.clone();
            let MethodRef::Ref(inner) = spec.method else {
                return None;
            };
            let inner = retarget_member(module, inner, replacement)?;
            Some(MethodRef::Spec(
                module
                    .references()
                    .method_spec(MethodRef::Ref(inner), spec.instantiation),
            ))
        }
        MethodRef::Def(_) => None,
    }
}

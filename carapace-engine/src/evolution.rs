//! Field-by-field mapping from a remote type shape to the local one.
//!
//! A plan moves through `Unevaluated -> Comparing -> Compatible | Incompatible`
//! once per `(remote, local)` fingerprint pair. Comparison runs outside the
//! cache lock; the first finished outcome for a pair is stored and every
//! later lookup returns it.

use crate::error::{SerializationError, SerializationResult};
use carapace_model::{EnumTransform, FieldSpec, Fingerprint, TypeModel, TypeRef};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a local field's value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    /// Read the remote field at `index` of the remote record.
    FromRemoteField { name: String, index: usize },
    /// The remote shape lacks the field; the local default applies.
    DefaultValue,
    Reject(String),
}

/// The mapping for one `(remote, local)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvolutionPlan {
    pub remote_fingerprint: Fingerprint,
    pub local_fingerprint: Fingerprint,
    pub type_name: String,
    /// One entry per local field, in local declared order.
    pub fields: Vec<(String, FieldSource)>,
    /// Remote-only fields: read to keep positions aligned, then dropped.
    pub discarded: Vec<(String, usize)>,
}

impl EvolutionPlan {
    pub fn source(&self, field: &str) -> Option<&FieldSource> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, source)| source)
    }

    pub fn is_identity(&self) -> bool {
        self.remote_fingerprint == self.local_fingerprint
    }

    fn identity(fingerprint: Fingerprint, model: &TypeModel) -> Self {
        Self {
            remote_fingerprint: fingerprint,
            local_fingerprint: fingerprint,
            type_name: model.type_name.clone(),
            fields: model
                .fields()
                .iter()
                .enumerate()
                .map(|(index, field)| {
                    let source = FieldSource::FromRemoteField {
                        name: field.name.clone(),
                        index,
                    };
                    (field.name.clone(), source)
                })
                .collect(),
            discarded: Vec::new(),
        }
    }
}

/// Cached state of one fingerprint pair.
#[derive(Debug, Clone)]
pub enum PlanState {
    Unevaluated,
    Compatible(Arc<EvolutionPlan>),
    Incompatible(String),
}

/// Builds and caches evolution plans.
#[derive(Debug, Default)]
pub struct EvolutionResolver {
    plans: RwLock<HashMap<(Fingerprint, Fingerprint), PlanState>>,
}

impl EvolutionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, remote: Fingerprint, local: Fingerprint) -> PlanState {
        self.plans
            .read()
            .get(&(remote, local))
            .cloned()
            .unwrap_or(PlanState::Unevaluated)
    }

    pub fn cached_plans(&self) -> usize {
        self.plans.read().len()
    }

    /// Returns the plan for reading `remote` data into `local`, computing and
    /// caching it on first use.
    pub fn plan(
        &self,
        remote_fingerprint: Fingerprint,
        remote: &TypeModel,
        local_fingerprint: Fingerprint,
        local: &TypeModel,
    ) -> SerializationResult<Arc<EvolutionPlan>> {
        if remote.type_name != local.type_name {
            return Err(SerializationError::evolution(
                &local.type_name,
                format!("envelope holds '{}'", remote.type_name),
            ));
        }
        if remote_fingerprint == local_fingerprint {
            return Ok(Arc::new(EvolutionPlan::identity(local_fingerprint, local)));
        }

        let key = (remote_fingerprint, local_fingerprint);
        let state = match self.state(remote_fingerprint, local_fingerprint) {
            PlanState::Unevaluated => {
                let computed = compare(remote_fingerprint, remote, local_fingerprint, local);
                let mut plans = self.plans.write();
                let stored = plans.entry(key).or_insert_with(|| {
                    debug!(
                        type_name = %local.type_name,
                        remote = %remote_fingerprint.short(),
                        local = %local_fingerprint.short(),
                        "Cached evolution plan"
                    );
                    computed
                });
                stored.clone()
            }
            cached => cached,
        };

        match state {
            PlanState::Compatible(plan) => Ok(plan),
            PlanState::Incompatible(reason) => {
                warn!(type_name = %local.type_name, %reason, "Evolution incompatible");
                Err(SerializationError::evolution(&local.type_name, reason))
            }
            PlanState::Unevaluated => Err(SerializationError::evolution(
                &local.type_name,
                "plan was not evaluated",
            )),
        }
    }

    /// Maps a remote enum constant onto a local one.
    ///
    /// Tried in order: the constant itself, local renames, renames the writer
    /// declared, then the writer's default chain.
    pub fn resolve_constant(
        &self,
        type_name: &str,
        constant: &str,
        local_values: &[String],
        local_transforms: &[EnumTransform],
        remote_transforms: &[EnumTransform],
    ) -> SerializationResult<String> {
        let mut current = constant.to_string();
        let mut visited = HashSet::new();
        loop {
            if local_values.contains(&current) {
                return Ok(current);
            }
            if !visited.insert(current.clone()) {
                break;
            }
            let next = local_transforms
                .iter()
                .find_map(|t| match t {
                    EnumTransform::Rename { from, to } if *from == current => Some(to),
                    _ => None,
                })
                .or_else(|| {
                    remote_transforms.iter().find_map(|t| match t {
                        EnumTransform::Rename { from, to } if *to == current => Some(from),
                        _ => None,
                    })
                })
                .or_else(|| {
                    remote_transforms.iter().find_map(|t| match t {
                        EnumTransform::Default { new, old } if *new == current => Some(old),
                        _ => None,
                    })
                });
            match next {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
        Err(SerializationError::evolution(
            type_name,
            format!("unknown constant '{constant}'"),
        ))
    }
}

fn compare(
    remote_fingerprint: Fingerprint,
    remote: &TypeModel,
    local_fingerprint: Fingerprint,
    local: &TypeModel,
) -> PlanState {
    if !remote.is_composite() || !local.is_composite() {
        return PlanState::Incompatible("not a composite on both sides".to_string());
    }

    let mut fields = Vec::with_capacity(local.fields().len());
    let mut rejects = Vec::new();
    for field in local.fields() {
        let source = match remote.field(&field.name) {
            Some((index, remote_field)) => match field_change(remote_field, field) {
                None => FieldSource::FromRemoteField {
                    name: field.name.clone(),
                    index,
                },
                Some(reason) => FieldSource::Reject(reason),
            },
            None if field.has_default() => FieldSource::DefaultValue,
            None => FieldSource::Reject(format!("missing mandatory field '{}'", field.name)),
        };
        if let FieldSource::Reject(reason) = &source {
            rejects.push(reason.clone());
        }
        fields.push((field.name.clone(), source));
    }

    if !rejects.is_empty() {
        return PlanState::Incompatible(rejects.join("; "));
    }

    let discarded = remote
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| local.field(&f.name).is_none())
        .map(|(index, f)| (f.name.clone(), index))
        .collect();

    PlanState::Compatible(Arc::new(EvolutionPlan {
        remote_fingerprint,
        local_fingerprint,
        type_name: local.type_name.clone(),
        fields,
        discarded,
    }))
}

/// Why a field present on both sides cannot be read, if it cannot.
fn field_change(remote: &FieldSpec, local: &FieldSpec) -> Option<String> {
    if remote.nullable && !local.nullable {
        return Some(format!("field '{}' nullability tightened", local.name));
    }
    let compatible = match (&remote.type_ref, &local.type_ref) {
        (TypeRef::Primitive(from), TypeRef::Primitive(to)) => from == to || from.widens_to(*to),
        (TypeRef::Named(from), TypeRef::Named(to)) => from == to,
        (TypeRef::Any { bound: from }, TypeRef::Any { bound: to }) => from == to,
        _ => false,
    };
    if compatible {
        None
    } else {
        Some(format!(
            "field '{}' type changed ({} -> {})",
            local.name, remote.type_ref, local.type_ref
        ))
    }
}

//! The canonical, cross-module object model of one federation.
//!
//! Modules are additive; merging is compatibility-checked. Insertion uses a
//! candidate-then-commit pattern: a copy of the allocator state is mutated
//! and only swapped in when the whole request survived, so a failed merge
//! leaves the federation unchanged.

use std::collections::{BTreeMap, BTreeSet};

use accord_core::{
    AttributeHandle, DimensionHandle, HandleKind, InteractionClassHandle, ModuleHandle,
    ObjectClassHandle, ParameterHandle, RtiError,
};

use crate::fom::{
    fq_class_name, FomAttribute, FomDimension, FomInteractionClass, FomModule, FomObjectClass,
    FomParameter, FomStringInteractionClass, FomStringModule, FomStringObjectClass,
    FomTransportationType,
};
use crate::types::{OrderType, TransportationType};

#[derive(Debug, Clone)]
struct InteractionData {
    class: FomInteractionClass,
    /// Next free parameter handle for a derived class.
    next_parameter: u64,
}

#[derive(Debug, Clone)]
struct ObjectData {
    class: FomObjectClass,
    /// Next free attribute handle for a derived class.
    next_attribute: u64,
}

#[derive(Debug, Default, Clone)]
struct AllocatorMap {
    transportation_by_name: BTreeMap<String, TransportationType>,
    dimension_by_name: BTreeMap<String, DimensionHandle>,
    next_dimension: u64,
    interactions: BTreeMap<Vec<String>, InteractionData>,
    interaction_names: BTreeMap<InteractionClassHandle, Vec<String>>,
    next_interaction: u64,
    objects: BTreeMap<Vec<String>, ObjectData>,
    object_names: BTreeMap<ObjectClassHandle, Vec<String>>,
    next_object: u64,
    modules: BTreeMap<ModuleHandle, FomModule>,
    next_module: u64,
}

impl AllocatorMap {
    fn order_type(&self, name: Option<&str>) -> Result<OrderType, RtiError> {
        match name {
            Some(name) => OrderType::from_fdd_name(name),
            None => Ok(OrderType::default()),
        }
    }

    fn transportation(&self, name: Option<&str>) -> Result<TransportationType, RtiError> {
        match name {
            Some(name) => self
                .transportation_by_name
                .get(name)
                .copied()
                .ok_or_else(|| {
                    RtiError::ErrorReadingFdd(format!("unknown transportation type \"{name}\""))
                }),
            None => Ok(TransportationType::default()),
        }
    }

    fn dimension_handles(
        &self,
        names: &BTreeSet<String>,
    ) -> Result<BTreeSet<DimensionHandle>, RtiError> {
        names
            .iter()
            .map(|name| {
                self.dimension_by_name.get(name).copied().ok_or_else(|| {
                    RtiError::ErrorReadingFdd(format!("unknown dimension \"{name}\""))
                })
            })
            .collect()
    }

    fn insert_interaction_class(
        &mut self,
        module: &mut FomModule,
        string_class: &FomStringInteractionClass,
    ) -> Result<(), RtiError> {
        let Some((_, parent_name)) = string_class.name.split_last() else {
            return Err(RtiError::ErrorReadingFdd(
                "empty interaction class name".into(),
            ));
        };

        let mut parent = None;
        let mut next_parameter = 0;
        if !parent_name.is_empty() {
            let data = self.interactions.get(parent_name).ok_or_else(|| {
                RtiError::ErrorReadingFdd(format!(
                    "unknown parent interaction class \"{}\"",
                    fq_class_name(parent_name)
                ))
            })?;
            parent = Some(data.class.handle);
            next_parameter = data.next_parameter;
        }

        if let Some(existing) = self.interactions.get(&string_class.name) {
            // Redeclared class: everything that is specified must match.
            if let Some(order_name) = string_class.order_type.as_deref() {
                if OrderType::from_fdd_name(order_name)? != existing.class.order_type {
                    return Err(RtiError::InconsistentFdd(format!(
                        "interaction class \"{}\": order type does not match",
                        fq_class_name(&string_class.name)
                    )));
                }
            }
            if let Some(transport_name) = string_class.transportation_type.as_deref() {
                if self.transportation(Some(transport_name))? != existing.class.transportation {
                    return Err(RtiError::InconsistentFdd(format!(
                        "interaction class \"{}\": transportation type does not match",
                        fq_class_name(&string_class.name)
                    )));
                }
            }
            if !string_class.dimensions.is_empty()
                && self.dimension_handles(&string_class.dimensions)? != existing.class.dimensions
            {
                return Err(RtiError::InconsistentFdd(format!(
                    "interaction class \"{}\": dimension set does not match",
                    fq_class_name(&string_class.name)
                )));
            }
            if !string_class.parameters.is_empty() {
                let candidate = number_parameters(&string_class.parameters, next_parameter);
                if candidate != existing.class.parameters {
                    return Err(RtiError::InconsistentFdd(format!(
                        "interaction class \"{}\": parameter list does not match",
                        fq_class_name(&string_class.name)
                    )));
                }
            }
            module.interaction_classes.push(existing.class.clone());
            return Ok(());
        }

        let handle = InteractionClassHandle::from_index(self.next_interaction);
        self.next_interaction += 1;

        let parameters = number_parameters(&string_class.parameters, next_parameter);
        let class = FomInteractionClass {
            handle,
            name: string_class.name.last().cloned().unwrap_or_default(),
            parent,
            order_type: self.order_type(string_class.order_type.as_deref())?,
            transportation: self.transportation(string_class.transportation_type.as_deref())?,
            dimensions: self.dimension_handles(&string_class.dimensions)?,
            parameters,
        };

        self.interaction_names
            .insert(handle, string_class.name.clone());
        self.interactions.insert(
            string_class.name.clone(),
            InteractionData {
                next_parameter: next_parameter + string_class.parameters.len() as u64,
                class: class.clone(),
            },
        );
        module.interaction_classes.push(class);
        Ok(())
    }

    fn insert_object_class(
        &mut self,
        module: &mut FomModule,
        string_class: &FomStringObjectClass,
    ) -> Result<(), RtiError> {
        let Some((_, parent_name)) = string_class.name.split_last() else {
            return Err(RtiError::ErrorReadingFdd("empty object class name".into()));
        };

        let mut parent = None;
        let mut next_attribute = 0;
        if !parent_name.is_empty() {
            let data = self.objects.get(parent_name).ok_or_else(|| {
                RtiError::ErrorReadingFdd(format!(
                    "unknown parent object class \"{}\"",
                    fq_class_name(parent_name)
                ))
            })?;
            parent = Some(data.class.handle);
            next_attribute = data.next_attribute;
        }

        if let Some(existing) = self.objects.get(&string_class.name) {
            if !string_class.attributes.is_empty() {
                let candidate = self.number_attributes(&string_class.attributes, next_attribute)?;
                if candidate != existing.class.attributes {
                    return Err(RtiError::InconsistentFdd(format!(
                        "object class \"{}\": attribute list does not match",
                        fq_class_name(&string_class.name)
                    )));
                }
            }
            module.object_classes.push(existing.class.clone());
            return Ok(());
        }

        let handle = ObjectClassHandle::from_index(self.next_object);
        self.next_object += 1;

        let attributes = self.number_attributes(&string_class.attributes, next_attribute)?;
        let class = FomObjectClass {
            handle,
            name: string_class.name.last().cloned().unwrap_or_default(),
            parent,
            attributes,
        };

        self.object_names.insert(handle, string_class.name.clone());
        self.objects.insert(
            string_class.name.clone(),
            ObjectData {
                next_attribute: next_attribute + string_class.attributes.len() as u64,
                class: class.clone(),
            },
        );
        module.object_classes.push(class);
        Ok(())
    }

    fn number_attributes(
        &self,
        attributes: &[crate::fom::FomStringAttribute],
        mut next: u64,
    ) -> Result<Vec<FomAttribute>, RtiError> {
        attributes
            .iter()
            .map(|attribute| {
                let resolved = FomAttribute {
                    handle: AttributeHandle::from_index(next),
                    name: attribute.name.clone(),
                    order_type: self.order_type(attribute.order_type.as_deref())?,
                    transportation: self.transportation(attribute.transportation_type.as_deref())?,
                    dimensions: self.dimension_handles(&attribute.dimensions)?,
                };
                next += 1;
                Ok(resolved)
            })
            .collect()
    }

    fn insert_module(&mut self, string_module: &FomStringModule) -> Result<ModuleHandle, RtiError> {
        let mut module = FomModule {
            handle: ModuleHandle::from_index(self.next_module),
            name: string_module.name.clone(),
            ..FomModule::default()
        };

        for transportation_type in &string_module.transportation_types {
            if self
                .transportation_by_name
                .contains_key(&transportation_type.name)
            {
                continue;
            }
            let transportation = TransportationType::from_fdd_name(&transportation_type.name)?;
            self.transportation_by_name
                .insert(transportation_type.name.clone(), transportation);
            module.transportation_types.push(FomTransportationType {
                name: transportation_type.name.clone(),
                transportation,
            });
        }

        for dimension in &string_module.dimensions {
            if self.dimension_by_name.contains_key(&dimension.name) {
                continue;
            }
            let handle = DimensionHandle::from_index(self.next_dimension);
            self.next_dimension += 1;
            self.dimension_by_name
                .insert(dimension.name.clone(), handle);
            module.dimensions.push(FomDimension {
                handle,
                name: dimension.name.clone(),
                upper_bound: dimension.upper_bound,
            });
        }

        module.update_rates = string_module.update_rates.clone();

        for interaction_class in &string_module.interaction_classes {
            self.insert_interaction_class(&mut module, interaction_class)?;
        }
        for object_class in &string_module.object_classes {
            self.insert_object_class(&mut module, object_class)?;
        }

        self.next_module += 1;
        let handle = module.handle;
        self.modules.insert(handle, module);
        Ok(handle)
    }

    /// Adopt already-resolved modules, tracking the handle assignments the
    /// parent node made.
    fn insert_resolved_module(&mut self, module: &FomModule) {
        if self.modules.contains_key(&module.handle) {
            return;
        }

        for transportation_type in &module.transportation_types {
            self.transportation_by_name.insert(
                transportation_type.name.clone(),
                transportation_type.transportation,
            );
        }
        for dimension in &module.dimensions {
            self.dimension_by_name
                .insert(dimension.name.clone(), dimension.handle);
            self.next_dimension = self.next_dimension.max(dimension.handle.index() + 1);
        }

        for class in &module.interaction_classes {
            let mut name = match class.parent {
                Some(parent) => self
                    .interaction_names
                    .get(&parent)
                    .cloned()
                    .unwrap_or_default(),
                None => Vec::new(),
            };
            name.push(class.name.clone());
            let next_parameter = class
                .parameters
                .iter()
                .map(|parameter| parameter.handle.index() + 1)
                .max()
                .unwrap_or_else(|| {
                    class
                        .parent
                        .and_then(|parent| self.interaction_names.get(&parent))
                        .and_then(|parent_name| self.interactions.get(parent_name))
                        .map(|data| data.next_parameter)
                        .unwrap_or(0)
                });
            self.next_interaction = self.next_interaction.max(class.handle.index() + 1);
            self.interaction_names.insert(class.handle, name.clone());
            self.interactions.insert(
                name,
                InteractionData {
                    class: class.clone(),
                    next_parameter,
                },
            );
        }

        for class in &module.object_classes {
            let mut name = match class.parent {
                Some(parent) => self.object_names.get(&parent).cloned().unwrap_or_default(),
                None => Vec::new(),
            };
            name.push(class.name.clone());
            let next_attribute = class
                .attributes
                .iter()
                .map(|attribute| attribute.handle.index() + 1)
                .max()
                .unwrap_or_else(|| {
                    class
                        .parent
                        .and_then(|parent| self.object_names.get(&parent))
                        .and_then(|parent_name| self.objects.get(parent_name))
                        .map(|data| data.next_attribute)
                        .unwrap_or(0)
                });
            self.next_object = self.next_object.max(class.handle.index() + 1);
            self.object_names.insert(class.handle, name.clone());
            self.objects.insert(
                name,
                ObjectData {
                    class: class.clone(),
                    next_attribute,
                },
            );
        }

        self.next_module = self.next_module.max(module.handle.index() + 1);
        self.modules.insert(module.handle, module.clone());
    }
}

fn number_parameters(
    parameters: &[crate::fom::FomStringParameter],
    mut next: u64,
) -> Vec<FomParameter> {
    parameters
        .iter()
        .map(|parameter| {
            let resolved = FomParameter {
                handle: ParameterHandle::from_index(next),
                name: parameter.name.clone(),
            };
            next += 1;
            resolved
        })
        .collect()
}

/// Maintains the merged FOM modules of one federation and the stable handle
/// assignments of every entity they contribute.
#[derive(Debug, Default, Clone)]
pub struct FomModuleSet {
    allocator_map: AllocatorMap,
}

impl FomModuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a list of string modules, all-or-nothing. On success the
    /// returned handles identify the inserted modules; on failure the set is
    /// untouched.
    pub fn insert_string_modules(
        &mut self,
        modules: &[FomStringModule],
    ) -> Result<Vec<ModuleHandle>, RtiError> {
        // The candidate that is only committed when successful.
        let mut candidate = self.allocator_map.clone();

        let mut handles = Vec::with_capacity(modules.len());
        for module in modules {
            handles.push(candidate.insert_module(module)?);
        }

        self.allocator_map = candidate;
        Ok(handles)
    }

    /// Adopt modules that the parent node already resolved.
    pub fn insert_resolved_modules(&mut self, modules: &[FomModule]) {
        for module in modules {
            self.allocator_map.insert_resolved_module(module);
        }
    }

    pub fn module(&self, handle: ModuleHandle) -> Option<&FomModule> {
        self.allocator_map.modules.get(&handle)
    }

    /// All committed modules in handle order, for replay to a joining
    /// federate.
    pub fn module_list(&self) -> Vec<FomModule> {
        self.allocator_map.modules.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fom::{standard_module, FomStringAttribute, FomStringObjectClass};

    fn object_class(name: &[&str], attributes: &[&str]) -> FomStringObjectClass {
        FomStringObjectClass {
            name: name.iter().map(|s| s.to_string()).collect(),
            attributes: attributes
                .iter()
                .map(|attribute| FomStringAttribute {
                    name: attribute.to_string(),
                    order_type: None,
                    transportation_type: None,
                    dimensions: BTreeSet::new(),
                })
                .collect(),
        }
    }

    fn base_and_foo() -> Vec<FomStringModule> {
        let mut extension = FomStringModule {
            name: "foo-module".into(),
            ..FomStringModule::default()
        };
        extension.object_classes = vec![
            object_class(&["HLAobjectRoot", "Foo"], &["x", "y"]),
            object_class(&["HLAobjectRoot", "Foo", "Bar"], &["z"]),
        ];
        vec![standard_module(), extension]
    }

    #[test]
    fn merges_modules_with_inherited_numbering() {
        let mut set = FomModuleSet::new();
        let handles = set.insert_string_modules(&base_and_foo()).unwrap();
        assert_eq!(handles.len(), 2);

        let modules = set.module_list();
        let foo = &modules[1].object_classes[0];
        assert_eq!(foo.name, "Foo");
        assert_eq!(foo.parent, Some(ObjectClassHandle::from_raw(0)));
        // privilegeToDelete took attribute 0 at the root; Foo continues.
        assert_eq!(foo.attributes[0].handle, AttributeHandle::from_raw(1));
        assert_eq!(foo.attributes[1].handle, AttributeHandle::from_raw(2));

        let bar = &modules[1].object_classes[1];
        assert_eq!(bar.parent, Some(foo.handle));
        assert_eq!(bar.attributes[0].handle, AttributeHandle::from_raw(3));
    }

    #[test]
    fn compatible_redeclaration_is_additive() {
        let mut set = FomModuleSet::new();
        set.insert_string_modules(&base_and_foo()).unwrap();

        let mut redeclare = FomStringModule {
            name: "foo-again".into(),
            ..FomStringModule::default()
        };
        redeclare.object_classes = vec![object_class(&["HLAobjectRoot", "Foo"], &["x", "y"])];
        let handles = set.insert_string_modules(&[redeclare]).unwrap();
        assert_eq!(handles.len(), 1);

        // The redeclared class resolved to the same handles.
        let module = set.module(handles[0]).unwrap();
        assert_eq!(
            module.object_classes[0].attributes[0].handle,
            AttributeHandle::from_raw(1)
        );
    }

    #[test]
    fn mismatched_redeclaration_fails_and_leaves_set_unchanged() {
        let mut set = FomModuleSet::new();
        set.insert_string_modules(&base_and_foo()).unwrap();
        let before = set.module_list();

        let mut bad = FomStringModule {
            name: "bad".into(),
            ..FomStringModule::default()
        };
        bad.object_classes = vec![object_class(&["HLAobjectRoot", "Foo"], &["x", "mismatch"])];
        let err = set.insert_string_modules(&[bad]).unwrap_err();
        assert!(matches!(err, RtiError::InconsistentFdd(_)));
        assert_eq!(set.module_list(), before);
    }

    #[test]
    fn unknown_parent_is_a_fdd_error() {
        let mut set = FomModuleSet::new();
        let mut orphan = FomStringModule {
            name: "orphan".into(),
            ..FomStringModule::default()
        };
        orphan.object_classes = vec![object_class(&["NoSuchRoot", "Foo"], &["x"])];
        let err = set
            .insert_string_modules(&[standard_module(), orphan])
            .unwrap_err();
        assert!(matches!(err, RtiError::ErrorReadingFdd(_)));
        // Nothing committed, not even the standard module.
        assert!(set.module_list().is_empty());
    }

    #[test]
    fn resolved_modules_track_parent_assignments() {
        let mut root = FomModuleSet::new();
        root.insert_string_modules(&base_and_foo()).unwrap();

        let mut child = FomModuleSet::new();
        child.insert_resolved_modules(&root.module_list());
        assert_eq!(child.module_list(), root.module_list());

        // A later string merge continues from the adopted handle state.
        let mut extension = FomStringModule {
            name: "ext".into(),
            ..FomStringModule::default()
        };
        extension.object_classes = vec![object_class(&["HLAobjectRoot", "Baz"], &["w"])];
        let handles = child.insert_string_modules(&[extension]).unwrap();
        let module = child.module(handles[0]).unwrap();
        assert_eq!(
            module.object_classes[0].handle,
            ObjectClassHandle::from_raw(3)
        );
    }
}

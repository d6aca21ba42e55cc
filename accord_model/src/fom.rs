//! FOM module records.
//!
//! Modules exist in two forms. The *string* form is what a federate hands in:
//! entities are referenced by name, order/transportation are optional FDD
//! names. The *resolved* form is what the federation replicates: every entity
//! carries its assigned handle. Class names are fully qualified paths from
//! the root class, which is also how parent links are expressed in the string
//! form.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use accord_core::{
    AttributeHandle, DimensionHandle, InteractionClassHandle, ModuleHandle, ObjectClassHandle,
    ParameterHandle,
};

use crate::types::{OrderType, TransportationType};

/// Root object class name; its first attribute is the privilege to delete.
pub const OBJECT_ROOT_NAME: &str = "HLAobjectRoot";
/// Name of the privilege-to-delete attribute (attribute handle 0).
pub const PRIVILEGE_TO_DELETE_NAME: &str = "HLAprivilegeToDeleteObject";
/// Root interaction class name.
pub const INTERACTION_ROOT_NAME: &str = "HLAinteractionRoot";

// ---------------------------------------------------------------------------
// String form

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FomStringModule {
    pub name: String,
    pub transportation_types: Vec<FomStringTransportationType>,
    pub dimensions: Vec<FomStringDimension>,
    pub update_rates: Vec<FomStringUpdateRate>,
    pub interaction_classes: Vec<FomStringInteractionClass>,
    pub object_classes: Vec<FomStringObjectClass>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FomStringTransportationType {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FomStringDimension {
    pub name: String,
    pub upper_bound: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FomStringUpdateRate {
    pub name: String,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FomStringInteractionClass {
    /// Fully qualified name; the parent class is the path without the last
    /// element.
    pub name: Vec<String>,
    pub order_type: Option<String>,
    pub transportation_type: Option<String>,
    pub dimensions: BTreeSet<String>,
    pub parameters: Vec<FomStringParameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FomStringParameter {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FomStringObjectClass {
    /// Fully qualified name; the parent class is the path without the last
    /// element.
    pub name: Vec<String>,
    pub attributes: Vec<FomStringAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FomStringAttribute {
    pub name: String,
    pub order_type: Option<String>,
    pub transportation_type: Option<String>,
    pub dimensions: BTreeSet<String>,
}

/// Pretty form of a fully qualified class name for diagnostics.
pub fn fq_class_name(name: &[String]) -> String {
    name.join(".")
}

/// The base module every federation starts from: the root object class with
/// its privilege-to-delete attribute, the root interaction class and the
/// standard transportation types.
pub fn standard_module() -> FomStringModule {
    FomStringModule {
        name: "HLAstandardMIM".into(),
        transportation_types: vec![
            FomStringTransportationType {
                name: "HLAreliable".into(),
            },
            FomStringTransportationType {
                name: "HLAbestEffort".into(),
            },
        ],
        dimensions: Vec::new(),
        update_rates: Vec::new(),
        interaction_classes: vec![FomStringInteractionClass {
            name: vec![INTERACTION_ROOT_NAME.into()],
            order_type: Some("timestamp".into()),
            transportation_type: Some("HLAreliable".into()),
            dimensions: BTreeSet::new(),
            parameters: Vec::new(),
        }],
        object_classes: vec![FomStringObjectClass {
            name: vec![OBJECT_ROOT_NAME.into()],
            attributes: vec![FomStringAttribute {
                name: PRIVILEGE_TO_DELETE_NAME.into(),
                order_type: Some("timestamp".into()),
                transportation_type: Some("HLAreliable".into()),
                dimensions: BTreeSet::new(),
            }],
        }],
    }
}

// ---------------------------------------------------------------------------
// Resolved form

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FomModule {
    pub handle: ModuleHandle,
    pub name: String,
    pub transportation_types: Vec<FomTransportationType>,
    pub dimensions: Vec<FomDimension>,
    pub update_rates: Vec<FomStringUpdateRate>,
    pub interaction_classes: Vec<FomInteractionClass>,
    pub object_classes: Vec<FomObjectClass>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FomTransportationType {
    pub name: String,
    pub transportation: TransportationType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FomDimension {
    pub handle: DimensionHandle,
    pub name: String,
    pub upper_bound: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FomInteractionClass {
    pub handle: InteractionClassHandle,
    pub name: String,
    pub parent: Option<InteractionClassHandle>,
    pub order_type: OrderType,
    pub transportation: TransportationType,
    pub dimensions: BTreeSet<DimensionHandle>,
    /// Parameters declared at this class, not including inherited ones.
    pub parameters: Vec<FomParameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FomParameter {
    pub handle: ParameterHandle,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FomObjectClass {
    pub handle: ObjectClassHandle,
    pub name: String,
    pub parent: Option<ObjectClassHandle>,
    /// Attributes declared at this class, not including inherited ones.
    pub attributes: Vec<FomAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FomAttribute {
    pub handle: AttributeHandle,
    pub name: String,
    pub order_type: OrderType,
    pub transportation: TransportationType,
    pub dimensions: BTreeSet<DimensionHandle>,
}

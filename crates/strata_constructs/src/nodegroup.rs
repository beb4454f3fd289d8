//! Managed node groups.
//!
//! Scaling bounds may be placeholders. The relationship between desired, min
//! and max size is checked through the deferred pipeline so the same rules
//! apply whether the sizes are known now or only at synthesis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_core::flags::EKS_NODEGROUP_NAME;
use strata_core::validate::{in_range, mutually_exclusive};
use strata_core::{App, Resolvable, ScopeId, ValidationError};
use tracing::debug;

use crate::error::ConstructResult;
use crate::{get_att, reference, Construct};

pub const RESOURCE_TYPE: &str = "AWS::EKS::Nodegroup";

const DEFAULT_DESIRED_SIZE: u32 = 2;
const DEFAULT_MIN_SIZE: u32 = 1;

/// AMI types for managed node groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodegroupAmiType {
    #[serde(rename = "AL2_x86_64")]
    Al2X86_64,
    #[serde(rename = "AL2_x86_64_GPU")]
    Al2X86_64Gpu,
    #[serde(rename = "AL2_ARM_64")]
    Al2Arm64,
    #[serde(rename = "AL2023_x86_64_STANDARD")]
    Al2023X86_64Standard,
    #[serde(rename = "AL2023_ARM_64_STANDARD")]
    Al2023Arm64Standard,
    #[serde(rename = "BOTTLEROCKET_x86_64")]
    BottlerocketX86_64,
    #[serde(rename = "BOTTLEROCKET_ARM_64")]
    BottlerocketArm64,
    #[serde(rename = "BOTTLEROCKET_x86_64_NVIDIA")]
    BottlerocketX86_64Nvidia,
}

impl NodegroupAmiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Al2X86_64 => "AL2_x86_64",
            Self::Al2X86_64Gpu => "AL2_x86_64_GPU",
            Self::Al2Arm64 => "AL2_ARM_64",
            Self::Al2023X86_64Standard => "AL2023_x86_64_STANDARD",
            Self::Al2023Arm64Standard => "AL2023_ARM_64_STANDARD",
            Self::BottlerocketX86_64 => "BOTTLEROCKET_x86_64",
            Self::BottlerocketArm64 => "BOTTLEROCKET_ARM_64",
            Self::BottlerocketX86_64Nvidia => "BOTTLEROCKET_x86_64_NVIDIA",
        }
    }
}

impl std::fmt::Display for NodegroupAmiType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Purchase option for the instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapacityType {
    OnDemand,
    Spot,
    CapacityBlock,
}

/// Launch template reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LaunchTemplateSpec {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// Kubernetes taint applied to every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Taint {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: TaintEffect,
}

/// Properties of a [`Nodegroup`].
#[derive(Debug, Clone, Default)]
pub struct NodegroupProps {
    pub cluster_name: String,
    pub nodegroup_name: Option<String>,
    pub subnets: Vec<String>,
    pub node_role: Option<String>,
    pub ami_type: Option<NodegroupAmiType>,
    pub capacity_type: Option<CapacityType>,
    pub disk_size: Option<u32>,
    pub desired_size: Option<Resolvable<u32>>,
    pub min_size: Option<Resolvable<u32>>,
    pub max_size: Option<Resolvable<u32>>,
    /// Defaults to `true`.
    pub force_update: Option<bool>,
    /// Deprecated in favor of `instance_types`.
    pub instance_type: Option<String>,
    pub instance_types: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
    pub tags: BTreeMap<String, String>,
    pub launch_template: Option<LaunchTemplateSpec>,
    pub release_version: Option<String>,
    pub max_unavailable: Option<u32>,
    pub max_unavailable_percentage: Option<u32>,
}

impl NodegroupProps {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            ..Default::default()
        }
    }

    pub fn with_desired_size(mut self, size: impl Into<Resolvable<u32>>) -> Self {
        self.desired_size = Some(size.into());
        self
    }

    pub fn with_min_size(mut self, size: impl Into<Resolvable<u32>>) -> Self {
        self.min_size = Some(size.into());
        self
    }

    pub fn with_max_size(mut self, size: impl Into<Resolvable<u32>>) -> Self {
        self.max_size = Some(size.into());
        self
    }

    pub fn with_instance_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instance_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ami_type(mut self, ami_type: NodegroupAmiType) -> Self {
        self.ami_type = Some(ami_type);
        self
    }

    pub fn with_launch_template(mut self, spec: LaunchTemplateSpec) -> Self {
        self.launch_template = Some(spec);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Architecture {
    Arm64,
    X86_64,
    Gpu,
}

impl Architecture {
    /// Compatible AMI types, the default first.
    fn ami_types(&self) -> &'static [NodegroupAmiType] {
        match self {
            Self::Arm64 => &[
                NodegroupAmiType::Al2Arm64,
                NodegroupAmiType::Al2023Arm64Standard,
                NodegroupAmiType::BottlerocketArm64,
            ],
            Self::X86_64 => &[
                NodegroupAmiType::Al2X86_64,
                NodegroupAmiType::Al2023X86_64Standard,
                NodegroupAmiType::BottlerocketX86_64,
            ],
            Self::Gpu => &[
                NodegroupAmiType::Al2X86_64Gpu,
                NodegroupAmiType::BottlerocketX86_64Nvidia,
            ],
        }
    }

    /// Classify an instance type such as `m6g.large` by its family.
    fn of(instance_type: &str) -> Self {
        let family = instance_type.split('.').next().unwrap_or_default().to_lowercase();
        let class: String = family.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
        if matches!(class.as_str(), "p" | "g" | "inf" | "trn" | "dl") {
            return Self::Gpu;
        }

        // Graviton families carry a `g` after the generation digit (m6g, c7gn).
        let attributes: String = family.chars().skip(class.len()).skip_while(|c| c.is_ascii_digit()).collect();
        if class == "a" || attributes.starts_with('g') {
            Self::Arm64
        } else {
            Self::X86_64
        }
    }
}

/// AMI types compatible with every instance type in the list.
fn possible_ami_types(instance_types: &[String]) -> Result<&'static [NodegroupAmiType], ValidationError> {
    let mut architectures: Vec<Architecture> = instance_types.iter().map(|t| Architecture::of(t)).collect();
    architectures.dedup();

    match architectures.as_slice() {
        [] => Err(ValidationError::new(format!(
            "Cannot determine any ami type compatible with instance types: {}",
            instance_types.join(", ")
        ))),
        [architecture] => Ok(architecture.ami_types()),
        _ => Err(ValidationError::new(
            "instanceTypes of different architectures is not allowed",
        )),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ScalingConfig {
    desired_size: Resolvable<u32>,
    max_size: Resolvable<u32>,
    min_size: Resolvable<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpdateConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_unavailable: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_unavailable_percentage: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct NodegroupResource {
    cluster_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    nodegroup_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_role: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    subnets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ami_type: Option<NodegroupAmiType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capacity_type: Option<CapacityType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disk_size: Option<u32>,
    force_update_enabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    instance_types: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    taints: Vec<Taint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    launch_template: Option<LaunchTemplateSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    release_version: Option<String>,
    scaling_config: ScalingConfig,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    update_config: Option<UpdateConfig>,
}

/// A managed node group of an EKS cluster.
#[derive(Debug, Clone)]
pub struct Nodegroup {
    scope: ScopeId,
    logical_id: String,
    desired_size: Resolvable<u32>,
    min_size: Resolvable<u32>,
    max_size: Resolvable<u32>,
    nodegroup_name: Value,
}

impl Nodegroup {
    pub fn new(app: &mut App, parent: ScopeId, id: &str, props: NodegroupProps) -> ConstructResult<Self> {
        let scope = app.add_scope(parent, id)?;

        let desired_size = props
            .desired_size
            .clone()
            .or_else(|| props.min_size.clone())
            .unwrap_or(Resolvable::Literal(DEFAULT_DESIRED_SIZE));
        let max_size = props.max_size.clone().unwrap_or_else(|| desired_size.clone());
        let min_size = props.min_size.clone().unwrap_or(Resolvable::Literal(DEFAULT_MIN_SIZE));

        app.with_resolved(scope, (desired_size.clone(), max_size.clone()), |(desired, max)| {
            if desired > max {
                return Err(ValidationError::new(format!(
                    "Desired capacity {} can't be greater than max size {}",
                    desired, max
                )));
            }
            Ok(())
        })?;

        app.with_resolved(scope, (desired_size.clone(), min_size.clone()), |(desired, min)| {
            if desired < min {
                return Err(ValidationError::new(format!(
                    "Minimum capacity {} can't be greater than desired size {}",
                    min, desired
                )));
            }
            Ok(())
        })?;

        if props.launch_template.is_some() && props.disk_size.is_some() {
            return Err(app
                .validation_error(scope, "diskSize must be specified within the launch template")
                .into());
        }

        if props.instance_type.is_some() && !props.instance_types.is_empty() {
            return Err(app
                .validation_error(
                    scope,
                    "\"instanceType is deprecated, please use \"instanceTypes\" only.",
                )
                .into());
        }

        if props.instance_type.is_some() {
            app.add_warning(
                scope,
                "\"instanceType\" is deprecated and will be removed in the next major version. please use \"instanceTypes\" instead",
            )?;
        }

        let instance_types: Vec<String> = match &props.instance_type {
            Some(instance_type) => vec![instance_type.clone()],
            None => props.instance_types.clone(),
        };

        let mut possible: &[NodegroupAmiType] = &[];
        if !instance_types.is_empty() {
            possible = app.ensure(scope, possible_ami_types(&instance_types))?;
            if let Some(ami_type) = props.ami_type {
                if !possible.contains(&ami_type) {
                    let names: Vec<&str> = possible.iter().map(|a| a.as_str()).collect();
                    let message = format!(
                        "The specified AMI does not match the instance types architecture, either specify one of {} or don't specify any",
                        names.join(", ").to_uppercase()
                    );
                    return Err(app.validation_error(scope, message).into());
                }
            }
        }

        // A launch template may carry a custom AMI, so nothing is inferred then.
        let ami_type = match &props.launch_template {
            Some(_) => props.ami_type,
            None => props.ami_type.or_else(|| possible.first().copied()),
        };

        let update_config = Self::validate_update_config(app, scope, &props, &max_size)?;

        let resource = NodegroupResource {
            cluster_name: props.cluster_name,
            nodegroup_name: props.nodegroup_name,
            node_role: props.node_role,
            subnets: props.subnets,
            ami_type,
            capacity_type: props.capacity_type,
            disk_size: props.disk_size,
            force_update_enabled: props.force_update.unwrap_or(true),
            instance_types,
            labels: props.labels,
            taints: props.taints,
            launch_template: props.launch_template,
            release_version: props.release_version,
            scaling_config: ScalingConfig {
                desired_size: desired_size.clone(),
                max_size: max_size.clone(),
                min_size: min_size.clone(),
            },
            tags: props.tags,
            update_config,
        };
        let logical_id = app.add_resource(scope, RESOURCE_TYPE, &resource)?;

        let nodegroup_name = if app.is_enabled(scope, EKS_NODEGROUP_NAME)?.unwrap_or(false) {
            get_att(&logical_id, "NodegroupName")
        } else {
            reference(&logical_id)
        };
        debug!("Nodegroup {} name resolves to {}", logical_id, nodegroup_name);

        Ok(Self {
            scope,
            logical_id,
            desired_size,
            min_size,
            max_size,
            nodegroup_name,
        })
    }

    fn validate_update_config(
        app: &mut App,
        scope: ScopeId,
        props: &NodegroupProps,
        max_size: &Resolvable<u32>,
    ) -> ConstructResult<Option<UpdateConfig>> {
        let (max_unavailable, percentage) = (props.max_unavailable, props.max_unavailable_percentage);
        if max_unavailable.is_none() && percentage.is_none() {
            return Ok(None);
        }

        app.ensure(
            scope,
            mutually_exclusive(
                "maxUnavailable",
                max_unavailable.is_some(),
                "maxUnavailablePercentage",
                percentage.is_some(),
            ),
        )?;

        // Zero is out of range, not "unset".
        if let Some(percentage) = percentage {
            app.ensure(scope, in_range("maxUnavailablePercentage", percentage, 1, 100))?;
        }

        if let Some(max_unavailable) = max_unavailable {
            app.with_resolved(scope, max_size.clone(), move |max| {
                if max_unavailable > max {
                    return Err(ValidationError::new(format!(
                        "maxUnavailable must be lower than maxSize ({}), got {}",
                        max, max_unavailable
                    )));
                }
                Ok(())
            })?;
            app.ensure(scope, in_range("maxUnavailable", max_unavailable, 1, 100))?;
        }

        Ok(Some(UpdateConfig {
            max_unavailable,
            max_unavailable_percentage: percentage,
        }))
    }

    pub fn desired_size(&self) -> &Resolvable<u32> {
        &self.desired_size
    }

    pub fn min_size(&self) -> &Resolvable<u32> {
        &self.min_size
    }

    pub fn max_size(&self) -> &Resolvable<u32> {
        &self.max_size
    }

    /// The node group name: the `NodegroupName` attribute when
    /// `@strata/aws-eks:nodegroupNameAttribute` is enabled, the resource
    /// reference otherwise.
    pub fn nodegroup_name(&self) -> &Value {
        &self.nodegroup_name
    }

    pub fn nodegroup_arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }
}

impl Construct for Nodegroup {
    fn scope(&self) -> ScopeId {
        self.scope
    }

    fn logical_id(&self) -> &str {
        &self.logical_id
    }
}

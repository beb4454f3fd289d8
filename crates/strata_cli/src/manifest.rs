//! App manifest: the resources of one stack, as YAML.
//!
//! ```yaml
//! stack: Prod
//! context:
//!   "@strata/aws-eks:nodegroupNameAttribute": true
//! resources:
//!   - kind: Nodegroup
//!     id: Workers
//!     props:
//!       clusterName: prod
//!       desiredSize: { param: DesiredSize }
//!       maxSize: 10
//! ```
//!
//! Any numeric or name property written as `{ param: Name }` becomes a
//! placeholder whose value is supplied with `-p Name=value` at synthesis.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use strata_constructs::{
    CacheCookieBehavior, CacheHeaderBehavior, CachePolicy, CachePolicyProps, CacheQueryStringBehavior,
    CapacityType, DataSource, DeduplicationScope, FifoThroughputLimit, IntendedUse, LaunchTemplateSpec,
    Nodegroup, NodegroupAmiType, NodegroupProps, PlaceIndex, PlaceIndexProps, Queue, QueueEncryption, QueueProps,
    Taint,
};
use strata_core::{App, Resolvable, ScopeId};

use crate::CliError;

fn default_stack() -> String {
    "Stack".to_string()
}

/// A property given either as a literal or as a named parameter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec<T> {
    Param { param: String },
    Literal(T),
}

impl<T> ValueSpec<T> {
    fn into_resolvable(self, app: &mut App) -> Resolvable<T> {
        match self {
            ValueSpec::Param { param } => Resolvable::Deferred(app.parameter(param)),
            ValueSpec::Literal(value) => Resolvable::Literal(value),
        }
    }
}

fn resolvable<T>(app: &mut App, spec: Option<ValueSpec<T>>) -> Option<Resolvable<T>> {
    spec.map(|spec| spec.into_resolvable(app))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NodegroupSpec {
    pub cluster_name: String,
    pub nodegroup_name: Option<String>,
    #[serde(default)]
    pub subnets: Vec<String>,
    pub node_role: Option<String>,
    pub ami_type: Option<NodegroupAmiType>,
    pub capacity_type: Option<CapacityType>,
    pub disk_size: Option<u32>,
    pub desired_size: Option<ValueSpec<u32>>,
    pub min_size: Option<ValueSpec<u32>>,
    pub max_size: Option<ValueSpec<u32>>,
    pub force_update: Option<bool>,
    pub instance_type: Option<String>,
    #[serde(default)]
    pub instance_types: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub launch_template: Option<LaunchTemplateSpec>,
    pub release_version: Option<String>,
    pub max_unavailable: Option<u32>,
    pub max_unavailable_percentage: Option<u32>,
}

/// Cache key behavior: `none`, `all`, or an allow or deny list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BehaviorSpec {
    None,
    All,
    AllowList(Vec<String>),
    DenyList(Vec<String>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CachePolicySpec {
    pub cache_policy_name: Option<ValueSpec<String>>,
    pub comment: Option<String>,
    pub min_ttl: Option<ValueSpec<u64>>,
    pub default_ttl: Option<ValueSpec<u64>>,
    pub max_ttl: Option<ValueSpec<u64>>,
    pub cookies: Option<BehaviorSpec>,
    pub headers: Option<BehaviorSpec>,
    pub query_strings: Option<BehaviorSpec>,
    #[serde(default)]
    pub enable_accept_encoding_gzip: bool,
    #[serde(default)]
    pub enable_accept_encoding_brotli: bool,
}

/// Dead letter queue given by the id of another queue in the manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeadLetterSpec {
    pub queue: String,
    pub max_receive_count: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueueSpec {
    pub queue_name: Option<ValueSpec<String>>,
    pub fifo: Option<bool>,
    #[serde(default)]
    pub content_based_deduplication: bool,
    pub deduplication_scope: Option<DeduplicationScope>,
    pub fifo_throughput_limit: Option<FifoThroughputLimit>,
    pub delivery_delay: Option<ValueSpec<u32>>,
    pub max_message_size_bytes: Option<ValueSpec<u32>>,
    pub retention_period: Option<ValueSpec<u32>>,
    pub receive_message_wait_time: Option<ValueSpec<u32>>,
    pub visibility_timeout: Option<ValueSpec<u32>>,
    pub dead_letter_queue: Option<DeadLetterSpec>,
    pub encryption: Option<QueueEncryption>,
    pub encryption_master_key: Option<String>,
    pub data_key_reuse: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlaceIndexSpec {
    pub place_index_name: Option<ValueSpec<String>>,
    pub data_source: Option<DataSource>,
    pub intended_use: Option<IntendedUse>,
    pub description: Option<String>,
}

/// One resource of the manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum ResourceSpec {
    Nodegroup { id: String, props: NodegroupSpec },
    CachePolicy {
        id: String,
        #[serde(default)]
        props: CachePolicySpec,
    },
    Queue {
        id: String,
        #[serde(default)]
        props: QueueSpec,
    },
    PlaceIndex {
        id: String,
        #[serde(default)]
        props: PlaceIndexSpec,
    },
}

impl ResourceSpec {
    pub fn id(&self) -> &str {
        match self {
            ResourceSpec::Nodegroup { id, .. }
            | ResourceSpec::CachePolicy { id, .. }
            | ResourceSpec::Queue { id, .. }
            | ResourceSpec::PlaceIndex { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResourceSpec::Nodegroup { .. } => "Nodegroup",
            ResourceSpec::CachePolicy { .. } => "CachePolicy",
            ResourceSpec::Queue { .. } => "Queue",
            ResourceSpec::PlaceIndex { .. } => "PlaceIndex",
        }
    }
}

/// The manifest file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppManifest {
    #[serde(default = "default_stack")]
    pub stack: String,
    /// Context set on the stack scope.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

impl AppManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::from_yaml_str(&content).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Define the stack and every resource in `app`. Returns the stack scope.
    pub fn build(self, app: &mut App) -> Result<ScopeId> {
        let stack = app.add_scope(app.root(), &self.stack)?;
        for (key, value) in self.context {
            app.set_context(stack, key, value)?;
        }

        info!("Defining {} resource(s) in {}", self.resources.len(), self.stack);
        let mut queues: BTreeMap<String, Queue> = BTreeMap::new();
        for resource in self.resources {
            let id = resource.id().to_string();
            let kind = resource.kind();
            debug!("Defining {} {}", kind, id);

            match resource {
                ResourceSpec::Nodegroup { props, .. } => {
                    let props = nodegroup_props(app, props);
                    Nodegroup::new(app, stack, &id, props)
                        .with_context(|| format!("Failed to define {} '{}'", kind, id))?;
                }
                ResourceSpec::CachePolicy { props, .. } => {
                    let props = cache_policy_props(app, props)?;
                    CachePolicy::new(app, stack, &id, props)
                        .with_context(|| format!("Failed to define {} '{}'", kind, id))?;
                }
                ResourceSpec::Queue { props, .. } => {
                    let props = queue_props(app, props, &queues)?;
                    let queue = Queue::new(app, stack, &id, props)
                        .with_context(|| format!("Failed to define {} '{}'", kind, id))?;
                    queues.insert(id, queue);
                }
                ResourceSpec::PlaceIndex { props, .. } => {
                    let props = PlaceIndexProps {
                        place_index_name: resolvable(app, props.place_index_name),
                        data_source: props.data_source,
                        intended_use: props.intended_use,
                        description: props.description,
                    };
                    PlaceIndex::new(app, stack, &id, props)
                        .with_context(|| format!("Failed to define {} '{}'", kind, id))?;
                }
            }
        }
        Ok(stack)
    }
}

fn nodegroup_props(app: &mut App, spec: NodegroupSpec) -> NodegroupProps {
    NodegroupProps {
        cluster_name: spec.cluster_name,
        nodegroup_name: spec.nodegroup_name,
        subnets: spec.subnets,
        node_role: spec.node_role,
        ami_type: spec.ami_type,
        capacity_type: spec.capacity_type,
        disk_size: spec.disk_size,
        desired_size: resolvable(app, spec.desired_size),
        min_size: resolvable(app, spec.min_size),
        max_size: resolvable(app, spec.max_size),
        force_update: spec.force_update,
        instance_type: spec.instance_type,
        instance_types: spec.instance_types,
        labels: spec.labels,
        taints: spec.taints,
        tags: spec.tags,
        launch_template: spec.launch_template,
        release_version: spec.release_version,
        max_unavailable: spec.max_unavailable,
        max_unavailable_percentage: spec.max_unavailable_percentage,
    }
}

fn cache_policy_props(app: &mut App, spec: CachePolicySpec) -> Result<CachePolicyProps> {
    let cookie_behavior = match spec.cookies {
        None | Some(BehaviorSpec::None) => CacheCookieBehavior::None,
        Some(BehaviorSpec::All) => CacheCookieBehavior::All,
        Some(BehaviorSpec::AllowList(cookies)) => CacheCookieBehavior::allow_list(cookies)?,
        Some(BehaviorSpec::DenyList(cookies)) => CacheCookieBehavior::deny_list(cookies)?,
    };
    let header_behavior = match spec.headers {
        None | Some(BehaviorSpec::None) => CacheHeaderBehavior::None,
        Some(BehaviorSpec::AllowList(headers)) => CacheHeaderBehavior::allow_list(headers)?,
        Some(other) => {
            return Err(CliError::InvalidArgument(format!(
                "headers only support none or allowList, got: {:?}",
                other
            ))
            .into())
        }
    };
    let query_string_behavior = match spec.query_strings {
        None | Some(BehaviorSpec::None) => CacheQueryStringBehavior::None,
        Some(BehaviorSpec::All) => CacheQueryStringBehavior::All,
        Some(BehaviorSpec::AllowList(items)) => CacheQueryStringBehavior::allow_list(items)?,
        Some(BehaviorSpec::DenyList(items)) => CacheQueryStringBehavior::deny_list(items)?,
    };

    Ok(CachePolicyProps {
        cache_policy_name: resolvable(app, spec.cache_policy_name),
        comment: spec.comment,
        min_ttl: resolvable(app, spec.min_ttl),
        default_ttl: resolvable(app, spec.default_ttl),
        max_ttl: resolvable(app, spec.max_ttl),
        cookie_behavior,
        header_behavior,
        query_string_behavior,
        enable_accept_encoding_gzip: spec.enable_accept_encoding_gzip,
        enable_accept_encoding_brotli: spec.enable_accept_encoding_brotli,
    })
}

fn queue_props(app: &mut App, spec: QueueSpec, queues: &BTreeMap<String, Queue>) -> Result<QueueProps> {
    let dead_letter_queue = match spec.dead_letter_queue {
        Some(dlq) => {
            let target = queues.get(&dlq.queue).ok_or_else(|| {
                CliError::InvalidArgument(format!(
                    "dead letter queue '{}' must be a queue defined earlier in the manifest",
                    dlq.queue
                ))
            })?;
            Some(target.as_dead_letter_queue(dlq.max_receive_count))
        }
        None => None,
    };

    Ok(QueueProps {
        queue_name: resolvable(app, spec.queue_name),
        fifo: spec.fifo,
        content_based_deduplication: spec.content_based_deduplication,
        deduplication_scope: spec.deduplication_scope,
        fifo_throughput_limit: spec.fifo_throughput_limit,
        delivery_delay: resolvable(app, spec.delivery_delay),
        max_message_size_bytes: resolvable(app, spec.max_message_size_bytes),
        retention_period: resolvable(app, spec.retention_period),
        receive_message_wait_time: resolvable(app, spec.receive_message_wait_time),
        visibility_timeout: resolvable(app, spec.visibility_timeout),
        dead_letter_queue,
        encryption: spec.encryption,
        encryption_master_key: spec.encryption_master_key,
        data_key_reuse: spec.data_key_reuse,
    })
}

//! SQS queues.
//!
//! FIFO-ness is inferred from the queue name and the FIFO-only options and
//! must agree with all of them. Durations are in seconds and may be
//! placeholders; their ranges are checked once the values are known.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strata_core::flags::SQS_MANAGED_SSE_DEFAULT;
use strata_core::validate::in_range;
use strata_core::{App, Resolvable, ScopeId};
use tracing::debug;

use crate::error::ConstructResult;
use crate::{get_att, reference, Construct};

pub const RESOURCE_TYPE: &str = "AWS::SQS::Queue";
pub const KEY_RESOURCE_TYPE: &str = "AWS::KMS::Key";

const FIFO_SUFFIX: &str = ".fifo";
const KMS_MANAGED_KEY_ALIAS: &str = "alias/aws/sqs";

/// Server-side encryption of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEncryption {
    Unencrypted,
    /// The AWS managed key for SQS.
    KmsManaged,
    /// A customer key, created when none is given.
    Kms,
    SqsManaged,
}

/// Scope of message deduplication in FIFO queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeduplicationScope {
    #[serde(rename = "messageGroup")]
    MessageGroup,
    #[serde(rename = "queue")]
    Queue,
}

/// Whether the FIFO throughput quota applies per queue or per message group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FifoThroughputLimit {
    #[serde(rename = "perQueue")]
    PerQueue,
    #[serde(rename = "perMessageGroupId")]
    PerMessageGroupId,
}

/// Where messages go after failing `max_receive_count` times.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterQueue {
    pub queue_arn: Value,
    pub max_receive_count: u32,
}

/// Properties of a [`Queue`].
#[derive(Debug, Clone, Default)]
pub struct QueueProps {
    pub queue_name: Option<Resolvable<String>>,
    pub fifo: Option<bool>,
    pub content_based_deduplication: bool,
    pub deduplication_scope: Option<DeduplicationScope>,
    pub fifo_throughput_limit: Option<FifoThroughputLimit>,
    pub delivery_delay: Option<Resolvable<u32>>,
    pub max_message_size_bytes: Option<Resolvable<u32>>,
    pub retention_period: Option<Resolvable<u32>>,
    pub receive_message_wait_time: Option<Resolvable<u32>>,
    pub visibility_timeout: Option<Resolvable<u32>>,
    pub dead_letter_queue: Option<DeadLetterQueue>,
    pub encryption: Option<QueueEncryption>,
    /// ARN of an existing key.
    pub encryption_master_key: Option<String>,
    pub data_key_reuse: Option<u32>,
}

impl QueueProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<Resolvable<String>>) -> Self {
        self.queue_name = Some(name.into());
        self
    }

    pub fn with_fifo(mut self, fifo: bool) -> Self {
        self.fifo = Some(fifo);
        self
    }

    pub fn with_encryption(mut self, encryption: QueueEncryption) -> Self {
        self.encryption = Some(encryption);
        self
    }

    pub fn with_master_key(mut self, key_arn: impl Into<String>) -> Self {
        self.encryption_master_key = Some(key_arn.into());
        self
    }

    pub fn with_visibility_timeout(mut self, seconds: impl Into<Resolvable<u32>>) -> Self {
        self.visibility_timeout = Some(seconds.into());
        self
    }

    pub fn with_retention_period(mut self, seconds: impl Into<Resolvable<u32>>) -> Self {
        self.retention_period = Some(seconds.into());
        self
    }

    pub fn with_dead_letter_queue(mut self, dead_letter_queue: DeadLetterQueue) -> Self {
        self.dead_letter_queue = Some(dead_letter_queue);
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RedrivePolicy {
    dead_letter_target_arn: Value,
    max_receive_count: u32,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "PascalCase")]
struct QueueResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_name: Option<Resolvable<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fifo_queue: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_based_deduplication: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deduplication_scope: Option<DeduplicationScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fifo_throughput_limit: Option<FifoThroughputLimit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delay_seconds: Option<Resolvable<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    maximum_message_size: Option<Resolvable<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_retention_period: Option<Resolvable<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    receive_message_wait_time_seconds: Option<Resolvable<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    visibility_timeout: Option<Resolvable<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    redrive_policy: Option<RedrivePolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sqs_managed_sse_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kms_master_key_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kms_data_key_reuse_period_seconds: Option<u32>,
}

/// An SQS queue.
#[derive(Debug, Clone)]
pub struct Queue {
    scope: ScopeId,
    logical_id: String,
    fifo: bool,
    encryption: Option<QueueEncryption>,
    encryption_master_key: Option<Value>,
}

impl Queue {
    pub fn new(app: &mut App, parent: ScopeId, id: &str, props: QueueProps) -> ConstructResult<Self> {
        let scope = app.add_scope(parent, id)?;

        Self::validate_ranges(app, scope, &props)?;
        let fifo = Self::determine_fifo(app, scope, &props)?;

        let mut resource = QueueResource {
            queue_name: props.queue_name.clone(),
            fifo_queue: fifo.then_some(true),
            content_based_deduplication: props.content_based_deduplication.then_some(true),
            deduplication_scope: props.deduplication_scope,
            fifo_throughput_limit: props.fifo_throughput_limit,
            delay_seconds: props.delivery_delay.clone(),
            maximum_message_size: props.max_message_size_bytes.clone(),
            message_retention_period: props.retention_period.clone(),
            receive_message_wait_time_seconds: props.receive_message_wait_time.clone(),
            visibility_timeout: props.visibility_timeout.clone(),
            redrive_policy: props.dead_letter_queue.as_ref().map(|dlq| RedrivePolicy {
                dead_letter_target_arn: dlq.queue_arn.clone(),
                max_receive_count: dlq.max_receive_count,
            }),
            ..Default::default()
        };

        let (encryption, encryption_master_key) = Self::apply_encryption(app, scope, &props, &mut resource)?;
        let logical_id = app.add_resource(scope, RESOURCE_TYPE, &resource)?;
        debug!("Queue {} (fifo: {}, encryption: {:?})", logical_id, fifo, encryption);

        Ok(Self {
            scope,
            logical_id,
            fifo,
            encryption,
            encryption_master_key,
        })
    }

    fn validate_ranges(app: &mut App, scope: ScopeId, props: &QueueProps) -> ConstructResult<()> {
        let ranges = [
            ("deliveryDelay", &props.delivery_delay, 0, 900),
            ("maximumMessageSizeBytes", &props.max_message_size_bytes, 1_024, 262_144),
            ("retentionPeriod", &props.retention_period, 60, 1_209_600),
            ("receiveMessageWaitTime", &props.receive_message_wait_time, 0, 20),
            ("visibilityTimeout", &props.visibility_timeout, 0, 43_200),
        ];
        for (name, value, min, max) in ranges {
            if let Some(value) = value {
                app.with_resolved(scope, value.clone(), move |value: u32| in_range(name, value, min, max))?;
            }
        }

        if let Some(dlq) = &props.dead_letter_queue {
            app.ensure(scope, in_range("maxReceiveCount", dlq.max_receive_count, 1, 1_000))?;
        }
        if let Some(reuse) = props.data_key_reuse {
            app.ensure(scope, in_range("dataKeyReuse", reuse, 60, 86_400))?;
        }
        Ok(())
    }

    /// Whether the queue is FIFO, checked against its name and options.
    fn determine_fifo(app: &App, scope: ScopeId, props: &QueueProps) -> ConstructResult<bool> {
        let literal_name = props.queue_name.as_ref().and_then(|name| name.as_literal());

        let fifo = props.fifo.unwrap_or_else(|| {
            literal_name.map_or(false, |name| name.ends_with(FIFO_SUFFIX))
                || props.content_based_deduplication
                || props.deduplication_scope.is_some()
                || props.fifo_throughput_limit.is_some()
        });

        if let Some(name) = literal_name {
            if fifo && !name.ends_with(FIFO_SUFFIX) {
                return Err(app.validation_error(scope, "FIFO queue names must end in '.fifo'").into());
            }
            if !fifo && name.ends_with(FIFO_SUFFIX) {
                return Err(app
                    .validation_error(scope, "Non-FIFO queue name may not end in '.fifo'")
                    .into());
            }
        }

        if !fifo {
            let fifo_only = [
                (props.content_based_deduplication, "Content-based deduplication"),
                (props.deduplication_scope.is_some(), "Deduplication scope"),
                (props.fifo_throughput_limit.is_some(), "FIFO throughput limit"),
            ];
            if let Some((_, option)) = fifo_only.iter().find(|(set, _)| *set) {
                let message = format!("{} can only be defined for FIFO queues", option);
                return Err(app.validation_error(scope, message).into());
            }
        }
        Ok(fifo)
    }

    fn apply_encryption(
        app: &mut App,
        scope: ScopeId,
        props: &QueueProps,
        resource: &mut QueueResource,
    ) -> ConstructResult<(Option<QueueEncryption>, Option<Value>)> {
        let mut encryption = props.encryption;
        let master_key = props.encryption_master_key.as_deref();

        if encryption == Some(QueueEncryption::SqsManaged) && master_key.is_some() {
            return Err(app
                .validation_error(
                    scope,
                    "'encryptionMasterKey' is not supported if encryption type 'SqsManaged' is used",
                )
                .into());
        }

        if master_key.is_some() && encryption != Some(QueueEncryption::Kms) {
            if let Some(requested) = encryption {
                app.add_warning(
                    scope,
                    format!(
                        "encryption: automatically changed to Kms, was: {:?}. When an encryption master key is provided, always set encryption to Kms",
                        requested
                    ),
                )?;
            }
            encryption = Some(QueueEncryption::Kms);
        }

        if encryption.is_none() && app.is_enabled(scope, SQS_MANAGED_SSE_DEFAULT)?.unwrap_or(false) {
            encryption = Some(QueueEncryption::SqsManaged);
        }

        let mut key_arn = None;
        match encryption {
            None => {}
            Some(QueueEncryption::Unencrypted) => resource.sqs_managed_sse_enabled = Some(false),
            Some(QueueEncryption::SqsManaged) => resource.sqs_managed_sse_enabled = Some(true),
            Some(QueueEncryption::KmsManaged) => {
                resource.kms_master_key_id = Some(Value::String(KMS_MANAGED_KEY_ALIAS.to_string()));
                resource.kms_data_key_reuse_period_seconds = props.data_key_reuse;
            }
            Some(QueueEncryption::Kms) => {
                let arn = match master_key {
                    Some(arn) => Value::String(arn.to_string()),
                    None => Self::create_key(app, scope)?,
                };
                resource.kms_master_key_id = Some(arn.clone());
                resource.kms_data_key_reuse_period_seconds = props.data_key_reuse;
                key_arn = Some(arn);
            }
        }
        Ok((encryption, key_arn))
    }

    /// A dedicated key under the queue scope. Returns its ARN.
    fn create_key(app: &mut App, scope: ScopeId) -> ConstructResult<Value> {
        let key_scope = app.add_scope(scope, "Key")?;
        let description = format!("Created by {}", app.path(scope)?);
        let key_id = app.add_resource(key_scope, KEY_RESOURCE_TYPE, json!({ "Description": description }))?;
        Ok(get_att(&key_id, "Arn"))
    }

    pub fn fifo(&self) -> bool {
        self.fifo
    }

    /// Effective encryption, `None` when left to the service default.
    pub fn encryption(&self) -> Option<QueueEncryption> {
        self.encryption
    }

    /// ARN of the customer key when encryption is `Kms`.
    pub fn encryption_master_key(&self) -> Option<&Value> {
        self.encryption_master_key.as_ref()
    }

    pub fn queue_arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }

    pub fn queue_url(&self) -> Value {
        reference(&self.logical_id)
    }

    pub fn queue_name(&self) -> Value {
        get_att(&self.logical_id, "QueueName")
    }

    /// Use this queue as the dead letter queue of another.
    pub fn as_dead_letter_queue(&self, max_receive_count: u32) -> DeadLetterQueue {
        DeadLetterQueue {
            queue_arn: self.queue_arn(),
            max_receive_count,
        }
    }
}

impl Construct for Queue {
    fn scope(&self) -> ScopeId {
        self.scope
    }

    fn logical_id(&self) -> &str {
        &self.logical_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{CoreError, RenderInputs};

    fn app_with_stack() -> (App, ScopeId) {
        let mut app = App::default();
        let stack = app.add_scope(app.root(), "Stack").unwrap();
        (app, stack)
    }

    #[test]
    fn test_fifo_from_name() {
        let (mut app, stack) = app_with_stack();
        let queue = Queue::new(&mut app, stack, "Q", QueueProps::new().with_name("orders.fifo")).unwrap();
        assert!(queue.fifo());

        let queue = Queue::new(&mut app, stack, "Std", QueueProps::new().with_name("orders")).unwrap();
        assert!(!queue.fifo());
    }

    #[test]
    fn test_fifo_from_options() {
        let (mut app, stack) = app_with_stack();
        let props = QueueProps {
            deduplication_scope: Some(DeduplicationScope::MessageGroup),
            ..QueueProps::new()
        };
        let queue = Queue::new(&mut app, stack, "Q", props).unwrap();
        assert!(queue.fifo());

        let template = app.synth(&RenderInputs::new()).unwrap();
        let properties = &template.resource("StackQ").unwrap().properties;
        assert_eq!(properties["FifoQueue"], json!(true));
        assert_eq!(properties["DeduplicationScope"], json!("messageGroup"));
    }

    #[test]
    fn test_name_must_agree_with_fifo() {
        let (mut app, stack) = app_with_stack();

        let props = QueueProps::new().with_name("orders").with_fifo(true);
        let err = Queue::new(&mut app, stack, "A", props).unwrap_err();
        assert!(err.to_string().contains("FIFO queue names must end in '.fifo'"));

        let props = QueueProps::new().with_name("orders.fifo").with_fifo(false);
        let err = Queue::new(&mut app, stack, "B", props).unwrap_err();
        assert!(err.to_string().contains("Non-FIFO queue name may not end in '.fifo'"));
    }

    #[test]
    fn test_fifo_options_rejected_on_standard_queue() {
        let (mut app, stack) = app_with_stack();
        let props = QueueProps {
            content_based_deduplication: true,
            ..QueueProps::new().with_fifo(false)
        };

        let err = Queue::new(&mut app, stack, "Q", props).unwrap_err();
        assert!(err
            .to_string()
            .contains("Content-based deduplication can only be defined for FIFO queues"));
    }

    #[test]
    fn test_deferred_name_skips_fifo_inference() {
        let (mut app, stack) = app_with_stack();
        let name = app.parameter::<String>("QueueName");
        let queue = Queue::new(&mut app, stack, "Q", QueueProps::new().with_name(name)).unwrap();

        assert!(!queue.fifo());
    }

    #[test]
    fn test_sqs_managed_with_key_rejected() {
        let (mut app, stack) = app_with_stack();
        let props = QueueProps::new()
            .with_encryption(QueueEncryption::SqsManaged)
            .with_master_key("arn:aws:kms:us-east-1:111122223333:key/abc");

        let err = Queue::new(&mut app, stack, "Q", props).unwrap_err();
        assert!(matches!(err, crate::ConstructError::Core(CoreError::Validation { .. })));
    }

    #[test]
    fn test_master_key_implies_kms() {
        let (mut app, stack) = app_with_stack();
        let props = QueueProps::new()
            .with_encryption(QueueEncryption::KmsManaged)
            .with_master_key("arn:aws:kms:us-east-1:111122223333:key/abc");

        let queue = Queue::new(&mut app, stack, "Q", props).unwrap();
        assert_eq!(queue.encryption(), Some(QueueEncryption::Kms));
        assert_eq!(app.tree().warnings().len(), 1);
        assert!(app.tree().warnings()[0].message.contains("was: KmsManaged"));
    }

    #[test]
    fn test_kms_creates_key() {
        let (mut app, stack) = app_with_stack();
        let queue = Queue::new(
            &mut app,
            stack,
            "Q",
            QueueProps::new().with_encryption(QueueEncryption::Kms),
        )
        .unwrap();
        assert_eq!(
            queue.encryption_master_key(),
            Some(&json!({ "Fn::GetAtt": ["StackQKey", "Arn"] }))
        );

        let template = app.synth(&RenderInputs::new()).unwrap();
        let key = template.resource("StackQKey").unwrap();
        assert_eq!(key.resource_type, KEY_RESOURCE_TYPE);
        assert_eq!(key.properties["Description"], json!("Created by Stack/Q"));
    }

    #[test]
    fn test_sqs_managed_sse_by_default_flag() {
        let (mut app, stack) = app_with_stack();
        let queue = Queue::new(&mut app, stack, "Q", QueueProps::new()).unwrap();
        assert_eq!(queue.encryption(), None);

        let mut app = App::default().with_context(SQS_MANAGED_SSE_DEFAULT, true).unwrap();
        let stack = app.add_scope(app.root(), "Stack").unwrap();
        let queue = Queue::new(&mut app, stack, "Q", QueueProps::new()).unwrap();
        assert_eq!(queue.encryption(), Some(QueueEncryption::SqsManaged));

        let template = app.synth(&RenderInputs::new()).unwrap();
        assert_eq!(
            template.resource("StackQ").unwrap().properties["SqsManagedSseEnabled"],
            json!(true)
        );
    }

    #[test]
    fn test_literal_range_fails_now() {
        let (mut app, stack) = app_with_stack();
        let err = Queue::new(&mut app, stack, "Q", QueueProps::new().with_visibility_timeout(50_000u32)).unwrap_err();

        assert!(err
            .to_string()
            .contains("'visibilityTimeout' must be between 0 and 43200, got 50000"));
    }

    #[test]
    fn test_deferred_range_checked_at_synth() {
        let (mut app, stack) = app_with_stack();
        let retention = app.parameter::<u32>("Retention");
        Queue::new(&mut app, stack, "Q", QueueProps::new().with_retention_period(retention)).unwrap();

        let err = app.synth(&RenderInputs::new().with("Retention", 30)).unwrap_err();
        assert!(err.to_string().contains("'retentionPeriod' must be between 60 and 1209600, got 30"));
    }

    #[test]
    fn test_dead_letter_queue() {
        let (mut app, stack) = app_with_stack();
        let dlq = Queue::new(&mut app, stack, "Dlq", QueueProps::new()).unwrap();
        let props = QueueProps::new().with_dead_letter_queue(dlq.as_dead_letter_queue(5));
        Queue::new(&mut app, stack, "Q", props).unwrap();

        let template = app.synth(&RenderInputs::new()).unwrap();
        assert_eq!(
            template.resource("StackQ").unwrap().properties["RedrivePolicy"],
            json!({
                "deadLetterTargetArn": { "Fn::GetAtt": ["StackDlq", "Arn"] },
                "maxReceiveCount": 5
            })
        );

        let props = QueueProps::new().with_dead_letter_queue(dlq.as_dead_letter_queue(0));
        assert!(Queue::new(&mut app, stack, "Bad", props).is_err());
    }
}

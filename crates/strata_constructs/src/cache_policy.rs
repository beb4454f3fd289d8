//! CloudFront cache policies.

use serde::Serialize;
use serde_json::Value;
use strata_core::flags::CLOUDFRONT_CLAMP_TTLS;
use strata_core::validate::{matches_pattern, max_length};
use strata_core::{App, Resolvable, ScopeId};

use crate::error::{ConstructError, ConstructResult};
use crate::{reference, Construct};

pub const RESOURCE_TYPE: &str = "AWS::CloudFront::CachePolicy";

const NAME_PATTERN: &str = r"^[\w-]+$";
const MAX_NAME_LENGTH: usize = 128;
const MAX_COMMENT_LENGTH: usize = 128;
const GENERATED_NAME_LENGTH: usize = 110;

const DAY_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_MIN_TTL: u64 = 0;
const DEFAULT_DEFAULT_TTL: u64 = DAY_SECONDS;
const DEFAULT_MAX_TTL: u64 = 365 * DAY_SECONDS;

/// Which cookies are part of the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheCookieBehavior {
    #[default]
    None,
    All,
    AllowList(Vec<String>),
    DenyList(Vec<String>),
}

impl CacheCookieBehavior {
    pub fn allow_list<I, S>(cookies: I) -> ConstructResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cookies = non_empty(cookies, "At least one cookie to allow must be provided")?;
        Ok(Self::AllowList(cookies))
    }

    pub fn deny_list<I, S>(cookies: I) -> ConstructResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cookies = non_empty(cookies, "At least one cookie to deny must be provided")?;
        Ok(Self::DenyList(cookies))
    }

    fn render(&self) -> CookiesConfig {
        let (behavior, cookies) = match self {
            Self::None => ("none", Vec::new()),
            Self::All => ("all", Vec::new()),
            Self::AllowList(cookies) => ("whitelist", cookies.clone()),
            Self::DenyList(cookies) => ("allExcept", cookies.clone()),
        };
        CookiesConfig {
            cookie_behavior: behavior,
            cookies,
        }
    }
}

/// Which headers are part of the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheHeaderBehavior {
    #[default]
    None,
    AllowList(Vec<String>),
}

impl CacheHeaderBehavior {
    pub fn allow_list<I, S>(headers: I) -> ConstructResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let headers = non_empty(headers, "At least one header to allow must be provided")?;
        Ok(Self::AllowList(headers))
    }

    fn render(&self) -> HeadersConfig {
        let (behavior, headers) = match self {
            Self::None => ("none", Vec::new()),
            Self::AllowList(headers) => ("whitelist", headers.clone()),
        };
        HeadersConfig {
            header_behavior: behavior,
            headers,
        }
    }
}

/// Which query strings are part of the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheQueryStringBehavior {
    #[default]
    None,
    All,
    AllowList(Vec<String>),
    DenyList(Vec<String>),
}

impl CacheQueryStringBehavior {
    pub fn allow_list<I, S>(query_strings: I) -> ConstructResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let query_strings = non_empty(query_strings, "At least one query string to allow must be provided")?;
        Ok(Self::AllowList(query_strings))
    }

    pub fn deny_list<I, S>(query_strings: I) -> ConstructResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let query_strings = non_empty(query_strings, "At least one query string to deny must be provided")?;
        Ok(Self::DenyList(query_strings))
    }

    fn render(&self) -> QueryStringsConfig {
        let (behavior, query_strings) = match self {
            Self::None => ("none", Vec::new()),
            Self::All => ("all", Vec::new()),
            Self::AllowList(query_strings) => ("whitelist", query_strings.clone()),
            Self::DenyList(query_strings) => ("allExcept", query_strings.clone()),
        };
        QueryStringsConfig {
            query_string_behavior: behavior,
            query_strings,
        }
    }
}

fn non_empty<I, S>(items: I, message: &str) -> ConstructResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let items: Vec<String> = items.into_iter().map(Into::into).collect();
    if items.is_empty() {
        return Err(ConstructError::invalid_props("CachePolicy", message));
    }
    Ok(items)
}

/// Properties of a [`CachePolicy`]. TTLs are in seconds.
#[derive(Debug, Clone, Default)]
pub struct CachePolicyProps {
    pub cache_policy_name: Option<Resolvable<String>>,
    pub comment: Option<String>,
    pub min_ttl: Option<Resolvable<u64>>,
    pub default_ttl: Option<Resolvable<u64>>,
    pub max_ttl: Option<Resolvable<u64>>,
    pub cookie_behavior: CacheCookieBehavior,
    pub header_behavior: CacheHeaderBehavior,
    pub query_string_behavior: CacheQueryStringBehavior,
    pub enable_accept_encoding_gzip: bool,
    pub enable_accept_encoding_brotli: bool,
}

impl CachePolicyProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<Resolvable<String>>) -> Self {
        self.cache_policy_name = Some(name.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_ttls(
        mut self,
        min: impl Into<Resolvable<u64>>,
        default: impl Into<Resolvable<u64>>,
        max: impl Into<Resolvable<u64>>,
    ) -> Self {
        self.min_ttl = Some(min.into());
        self.default_ttl = Some(default.into());
        self.max_ttl = Some(max.into());
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CookiesConfig {
    cookie_behavior: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cookies: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct HeadersConfig {
    header_behavior: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    headers: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct QueryStringsConfig {
    query_string_behavior: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    query_strings: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CacheKeyParameters {
    cookies_config: CookiesConfig,
    headers_config: HeadersConfig,
    query_strings_config: QueryStringsConfig,
    enable_accept_encoding_gzip: bool,
    enable_accept_encoding_brotli: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CachePolicyConfig {
    name: Resolvable<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(rename = "MinTTL")]
    min_ttl: Resolvable<u64>,
    #[serde(rename = "DefaultTTL")]
    default_ttl: Resolvable<u64>,
    #[serde(rename = "MaxTTL")]
    max_ttl: Resolvable<u64>,
    parameters_in_cache_key_and_forwarded_to_origin: CacheKeyParameters,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CachePolicyResource {
    cache_policy_config: CachePolicyConfig,
}

/// A cache policy.
///
/// Without `@strata/aws-cloudfront:clampCachePolicyTtls` the TTLs are
/// rendered as given; with it the default TTL is raised to at least the
/// minimum and the maximum to at least the default.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    scope: ScopeId,
    logical_id: String,
    name: Resolvable<String>,
    min_ttl: Resolvable<u64>,
    default_ttl: Resolvable<u64>,
    max_ttl: Resolvable<u64>,
}

impl CachePolicy {
    pub fn new(app: &mut App, parent: ScopeId, id: &str, props: CachePolicyProps) -> ConstructResult<Self> {
        let scope = app.add_scope(parent, id)?;

        let name = match props.cache_policy_name {
            Some(name) => name,
            None => {
                let unique_id: String = app.unique_id(scope)?.chars().take(GENERATED_NAME_LENGTH).collect();
                Resolvable::Literal(unique_id)
            }
        };

        app.with_resolved(scope, name.clone(), |name: String| {
            matches_pattern(
                "cachePolicyName",
                &name,
                NAME_PATTERN,
                "'-', '_', and alphanumeric characters",
            )?;
            max_length("cachePolicyName", &name, MAX_NAME_LENGTH)
        })?;

        if let Some(comment) = &props.comment {
            app.ensure(scope, max_length("comment", comment, MAX_COMMENT_LENGTH))?;
        }

        let min_ttl = props.min_ttl.unwrap_or(Resolvable::Literal(DEFAULT_MIN_TTL));
        let mut default_ttl = props.default_ttl.unwrap_or(Resolvable::Literal(DEFAULT_DEFAULT_TTL));
        let mut max_ttl = props.max_ttl.unwrap_or(Resolvable::Literal(DEFAULT_MAX_TTL));

        if app.is_enabled(scope, CLOUDFRONT_CLAMP_TTLS)?.unwrap_or(false) {
            default_ttl = app.derive(scope, (default_ttl, min_ttl.clone()), |(default, min): (u64, u64)| {
                Ok(default.max(min))
            })?;
            max_ttl = app.derive(scope, (max_ttl, default_ttl.clone()), |(max, default): (u64, u64)| {
                Ok(max.max(default))
            })?;
        }

        let resource = CachePolicyResource {
            cache_policy_config: CachePolicyConfig {
                name: name.clone(),
                comment: props.comment,
                min_ttl: min_ttl.clone(),
                default_ttl: default_ttl.clone(),
                max_ttl: max_ttl.clone(),
                parameters_in_cache_key_and_forwarded_to_origin: CacheKeyParameters {
                    cookies_config: props.cookie_behavior.render(),
                    headers_config: props.header_behavior.render(),
                    query_strings_config: props.query_string_behavior.render(),
                    enable_accept_encoding_gzip: props.enable_accept_encoding_gzip,
                    enable_accept_encoding_brotli: props.enable_accept_encoding_brotli,
                },
            },
        };
        let logical_id = app.add_resource(scope, RESOURCE_TYPE, &resource)?;

        Ok(Self {
            scope,
            logical_id,
            name,
            min_ttl,
            default_ttl,
            max_ttl,
        })
    }

    pub fn cache_policy_id(&self) -> Value {
        reference(&self.logical_id)
    }

    pub fn name(&self) -> &Resolvable<String> {
        &self.name
    }

    pub fn min_ttl(&self) -> &Resolvable<u64> {
        &self.min_ttl
    }

    pub fn default_ttl(&self) -> &Resolvable<u64> {
        &self.default_ttl
    }

    pub fn max_ttl(&self) -> &Resolvable<u64> {
        &self.max_ttl
    }
}

impl Construct for CachePolicy {
    fn scope(&self) -> ScopeId {
        self.scope
    }

    fn logical_id(&self) -> &str {
        &self.logical_id
    }
}

/// Anything that can serve as a behavior's cache policy.
pub trait CachePolicyRef {
    /// The id to render wherever the policy is referenced.
    fn cache_policy_id(&self) -> Value;
}

impl CachePolicyRef for CachePolicy {
    fn cache_policy_id(&self) -> Value {
        CachePolicy::cache_policy_id(self)
    }
}

/// Cache policies provided by CloudFront.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedCachePolicy {
    Amplify,
    /// Good default for most content served from S3.
    CachingOptimized,
    CachingOptimizedForUncompressedObjects,
    CachingDisabled,
    ElementalMediaPackage,
    UseOriginCacheControlHeaders,
    UseOriginCacheControlHeadersQueryStrings,
}

impl ManagedCachePolicy {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Amplify => "2e54312d-136d-493c-8eb9-b001f22f67d2",
            Self::CachingOptimized => "658327ea-f89d-4fab-a63d-7e88639e58f6",
            Self::CachingOptimizedForUncompressedObjects => "b2884449-e4de-46a7-ac36-70bc7f1ddd6d",
            Self::CachingDisabled => "4135ea2d-6df8-44a3-9df3-4b5a84be39ad",
            Self::ElementalMediaPackage => "08627262-05a9-4f76-9ded-b50ca2e3a84f",
            Self::UseOriginCacheControlHeaders => "83da9c7e-98b4-4e11-a168-04f0df8e2c65",
            Self::UseOriginCacheControlHeadersQueryStrings => "4cc15a8a-d715-48a4-82b8-cc0b614638fe",
        }
    }
}

impl CachePolicyRef for ManagedCachePolicy {
    fn cache_policy_id(&self) -> Value {
        Value::String(self.id().to_string())
    }
}

/// A cache policy defined outside the app.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedCachePolicy {
    scope: ScopeId,
    cache_policy_id: String,
}

impl ImportedCachePolicy {
    pub fn scope(&self) -> ScopeId {
        self.scope
    }
}

impl CachePolicyRef for ImportedCachePolicy {
    fn cache_policy_id(&self) -> Value {
        Value::String(self.cache_policy_id.clone())
    }
}

impl CachePolicy {
    /// Reference an existing cache policy by id. No resource is added.
    pub fn from_cache_policy_id(
        app: &mut App,
        parent: ScopeId,
        id: &str,
        cache_policy_id: impl Into<String>,
    ) -> ConstructResult<ImportedCachePolicy> {
        let scope = app.add_scope(parent, id)?;
        Ok(ImportedCachePolicy {
            scope,
            cache_policy_id: cache_policy_id.into(),
        })
    }
}

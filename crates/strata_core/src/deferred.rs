//! Deferred-value validation pipeline.
//!
//! Property checks and derived values are written once against literal
//! values. When every input is already known the check runs immediately;
//! otherwise it is queued and runs exactly once during [`DeferredPipeline::resolve`],
//! after all of its inputs have been resolved.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::token::{marker_regex, Resolvable, Token, TokenId};
use crate::tree::ScopeId;
use crate::validate::ValidationError;

/// The scope a check belongs to; errors are reported against its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub scope: ScopeId,
    pub path: String,
}

impl Owner {
    pub fn new(scope: ScopeId, path: impl Into<String>) -> Self {
        Self {
            scope,
            path: path.into(),
        }
    }

    fn attribute(&self, error: ValidationError) -> CoreError {
        CoreError::Validation {
            path: self.path.clone(),
            message: error.0,
        }
    }
}

/// Values supplied for parameters when rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderInputs {
    values: BTreeMap<String, Value>,
}

impl RenderInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

type Producer = Box<dyn FnOnce() -> CoreResult<Value>>;
type Derivation = Box<dyn FnMut(&mut TokenTable, &RenderInputs) -> CoreResult<Value>>;

/// Outcome of a queued check. The outer error means its inputs could not be
/// resolved yet; the inner one is the rule the callback reported.
type Check = Box<dyn FnMut(&mut TokenTable, &RenderInputs) -> CoreResult<Result<(), ValidationError>>>;

enum TokenSource {
    Parameter,
    Lazy(Producer),
    Derived(Derivation),
    /// Taken out of its slot while it runs, or spent once its value is cached.
    Taken,
    /// The producer failed; every later attempt reports the same reason.
    Failed(String),
}

struct TokenSlot {
    name: String,
    source: TokenSource,
    value: Option<Value>,
}

/// Storage for tokens and their resolved values.
#[derive(Default)]
pub struct TokenTable {
    slots: Vec<TokenSlot>,
}

impl TokenTable {
    fn push(&mut self, name: String, source: TokenSource) -> TokenId {
        let id = TokenId(self.slots.len());
        debug!("Created {} ({})", id, name);
        self.slots.push(TokenSlot {
            name,
            source,
            value: None,
        });
        id
    }

    fn slot(&self, id: TokenId) -> CoreResult<&TokenSlot> {
        self.slots.get(id.0).ok_or_else(|| CoreError::UnresolvedToken {
            token: id.0,
            name: "<unknown>".to_string(),
            reason: "token does not belong to this app".to_string(),
        })
    }

    fn name(&self, id: TokenId) -> String {
        self.slots
            .get(id.0)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    fn is_resolved(&self, id: TokenId) -> bool {
        self.slots.get(id.0).is_some_and(|s| s.value.is_some())
    }

    fn cached(&self, id: TokenId) -> CoreResult<Option<&Value>> {
        Ok(self.slot(id)?.value.as_ref())
    }

    /// Resolve a token, computing its value at most once.
    ///
    /// Parameters and derivations stay in place when they fail, so a later
    /// pass with other inputs can still resolve them.
    fn resolve(&mut self, id: TokenId, inputs: &RenderInputs) -> CoreResult<Value> {
        let slot = self.slot(id)?;
        if let Some(value) = &slot.value {
            return Ok(value.clone());
        }
        let name = slot.name.clone();
        let unresolved = |reason: &str| CoreError::UnresolvedToken {
            token: id.0,
            name: name.clone(),
            reason: reason.to_string(),
        };

        let value = match std::mem::replace(&mut self.slots[id.0].source, TokenSource::Taken) {
            TokenSource::Parameter => {
                self.slots[id.0].source = TokenSource::Parameter;
                inputs
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| unresolved("no value was supplied for this parameter"))?
            }
            TokenSource::Lazy(producer) => match producer() {
                Ok(value) => value,
                Err(e) => {
                    self.slots[id.0].source = TokenSource::Failed(e.to_string());
                    return Err(e);
                }
            },
            TokenSource::Derived(mut derivation) => {
                let result = derivation(self, inputs);
                self.slots[id.0].source = TokenSource::Derived(derivation);
                result?
            }
            TokenSource::Taken => return Err(unresolved("its value depends on itself")),
            TokenSource::Failed(reason) => {
                let err = unresolved(&reason);
                self.slots[id.0].source = TokenSource::Failed(reason);
                return Err(err);
            }
        };

        debug!("Resolved {} = {}", id, value);
        self.slots[id.0].value = Some(value.clone());
        Ok(value)
    }

    fn decode<T: DeserializeOwned>(&self, id: TokenId, value: Value) -> CoreResult<T> {
        serde_json::from_value(value).map_err(|e| CoreError::TokenType {
            token: id.0,
            name: self.name(id),
            message: e.to_string(),
        })
    }
}

impl std::fmt::Debug for TokenTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenTable")
            .field("tokens", &self.slots.len())
            .field(
                "resolved",
                &self.slots.iter().filter(|s| s.value.is_some()).count(),
            )
            .finish()
    }
}

impl<T: DeserializeOwned + Clone> Resolvable<T> {
    fn resolve_value(&self, table: &mut TokenTable, inputs: &RenderInputs) -> CoreResult<T> {
        match self {
            Resolvable::Literal(value) => Ok(value.clone()),
            Resolvable::Deferred(token) => {
                let value = table.resolve(token.id(), inputs)?;
                table.decode(token.id(), value)
            }
        }
    }
}

/// One or more resolvable inputs to a check or derivation.
///
/// Implemented for a single [`Resolvable`] and for tuples of up to four.
pub trait ResolveInputs: Sized + 'static {
    /// The literal values handed to the callback.
    type Output;

    /// Ids of the deferred inputs.
    fn token_ids(&self) -> Vec<TokenId>;

    /// Resolve every input against the table. The inputs stay usable, so a
    /// failed attempt can be repeated.
    fn resolve_in(&self, table: &mut TokenTable, inputs: &RenderInputs) -> CoreResult<Self::Output>;
}

impl<A> ResolveInputs for Resolvable<A>
where
    A: DeserializeOwned + Clone + 'static,
{
    type Output = A;

    fn token_ids(&self) -> Vec<TokenId> {
        self.token_id().into_iter().collect()
    }

    fn resolve_in(&self, table: &mut TokenTable, inputs: &RenderInputs) -> CoreResult<A> {
        self.resolve_value(table, inputs)
    }
}

macro_rules! impl_resolve_inputs {
    ($($name:ident),+) => {
        impl<$($name),+> ResolveInputs for ($(Resolvable<$name>,)+)
        where
            $($name: DeserializeOwned + Clone + 'static),+
        {
            type Output = ($($name,)+);

            #[allow(non_snake_case)]
            fn token_ids(&self) -> Vec<TokenId> {
                let ($($name,)+) = self;
                [$($name.token_id()),+].into_iter().flatten().collect()
            }

            #[allow(non_snake_case)]
            fn resolve_in(&self, table: &mut TokenTable, inputs: &RenderInputs) -> CoreResult<Self::Output> {
                let ($($name,)+) = self;
                Ok(($($name.resolve_value(table, inputs)?,)+))
            }
        }
    };
}

impl_resolve_inputs!(A);
impl_resolve_inputs!(A, B);
impl_resolve_inputs!(A, B, C);
impl_resolve_inputs!(A, B, C, D);

struct PendingCheck {
    owner: Owner,
    waits_on: Vec<TokenId>,
    run: Check,
    /// Set once the callback rejected its values; reported by every later pass.
    failed: Option<ValidationError>,
}

/// Registers deferred values and the checks that depend on them.
#[derive(Default)]
pub struct DeferredPipeline {
    table: TokenTable,
    pending: Vec<PendingCheck>,
}

impl DeferredPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// A placeholder whose value is supplied by name at render time.
    pub fn parameter<T>(&mut self, name: impl Into<String>) -> Token<T> {
        Token::new(self.table.push(name.into(), TokenSource::Parameter))
    }

    /// A placeholder whose value is produced by `producer` at render time.
    pub fn lazy<T, F>(&mut self, name: impl Into<String>, producer: F) -> Token<T>
    where
        T: Serialize,
        F: FnOnce() -> T + 'static,
    {
        let producer: Producer = Box::new(move || Ok(serde_json::to_value(producer())?));
        Token::new(self.table.push(name.into(), TokenSource::Lazy(producer)))
    }

    /// Run `callback` with the literal values of `inputs`.
    ///
    /// Runs before returning when no input is pending; otherwise runs once
    /// during [`Self::resolve`]. A failing callback is reported against
    /// `owner`.
    pub fn with_resolved<I, F>(&mut self, owner: Owner, inputs: I, callback: F) -> CoreResult<()>
    where
        I: ResolveInputs,
        F: FnOnce(I::Output) -> Result<(), ValidationError> + 'static,
    {
        let waits_on = inputs.token_ids();
        if waits_on.iter().all(|id| self.table.is_resolved(*id)) {
            let values = inputs.resolve_in(&mut self.table, &RenderInputs::default())?;
            return callback(values).map_err(|e| owner.attribute(e));
        }

        debug!(
            "Deferring check on {} until {} token(s) resolve",
            owner.path,
            waits_on.len()
        );
        let mut callback = Some(callback);
        let run: Check = Box::new(move |table, render_inputs| {
            let values = inputs.resolve_in(table, render_inputs)?;
            Ok(callback.take().map_or(Ok(()), |callback| callback(values)))
        });
        self.pending.push(PendingCheck {
            owner,
            waits_on,
            run,
            failed: None,
        });
        Ok(())
    }

    /// Compute a value from `inputs`.
    ///
    /// Literal inputs produce a literal immediately; otherwise the result is
    /// a new token computed once when first resolved.
    pub fn derive<I, U, F>(&mut self, owner: Owner, inputs: I, f: F) -> CoreResult<Resolvable<U>>
    where
        I: ResolveInputs,
        U: Serialize + 'static,
        F: FnOnce(I::Output) -> Result<U, ValidationError> + 'static,
    {
        let waits_on = inputs.token_ids();
        if waits_on.iter().all(|id| self.table.is_resolved(*id)) {
            let values = inputs.resolve_in(&mut self.table, &RenderInputs::default())?;
            return f(values)
                .map(Resolvable::Literal)
                .map_err(|e| owner.attribute(e));
        }

        let name = format!("{}/derived", owner.path);
        let mut f = Some(f);
        let mut failed: Option<ValidationError> = None;
        let derivation: Derivation = Box::new(move |table, render_inputs| {
            if let Some(error) = &failed {
                return Err(owner.attribute(error.clone()));
            }
            let values = inputs.resolve_in(table, render_inputs)?;
            let Some(f) = f.take() else {
                return Err(owner.attribute(ValidationError::new("derived value was already computed")));
            };
            match f(values) {
                Ok(derived) => Ok(serde_json::to_value(derived)?),
                Err(e) => {
                    failed = Some(e.clone());
                    Err(owner.attribute(e))
                }
            }
        });
        Ok(Resolvable::Deferred(Token::new(
            self.table.push(name, TokenSource::Derived(derivation)),
        )))
    }

    /// The resolution pass.
    ///
    /// Runs queued checks in registration order, then resolves any token no
    /// check depended on. Calling it again is a no-op for everything already
    /// resolved or run. A check that could not run, and every check after
    /// it, stays queued; a check that failed keeps failing.
    pub fn resolve(&mut self, inputs: &RenderInputs) -> CoreResult<()> {
        let mut pending = std::mem::take(&mut self.pending).into_iter();
        debug!("Running {} deferred check(s)", pending.len());

        while let Some(mut check) = pending.next() {
            if let Err(e) = self.run_check(&mut check, inputs) {
                self.pending.push(check);
                self.pending.extend(pending);
                return Err(e);
            }
        }

        for index in 0..self.table.slots.len() {
            self.table.resolve(TokenId(index), inputs)?;
        }
        Ok(())
    }

    fn run_check(&mut self, check: &mut PendingCheck, inputs: &RenderInputs) -> CoreResult<()> {
        if let Some(error) = &check.failed {
            return Err(check.owner.attribute(error.clone()));
        }

        debug!(
            "Running deferred check for {} (scope {}, tokens {:?})",
            check.owner.path, check.owner.scope, check.waits_on
        );
        match (check.run)(&mut self.table, inputs)? {
            Ok(()) => Ok(()),
            Err(e) => {
                check.failed = Some(e.clone());
                Err(check.owner.attribute(e))
            }
        }
    }

    /// Number of checks still waiting for the resolution pass.
    pub fn pending_checks(&self) -> usize {
        self.pending.len()
    }

    /// Number of tokens created so far.
    pub fn token_count(&self) -> usize {
        self.table.slots.len()
    }

    pub fn is_resolved<T>(&self, token: &Token<T>) -> bool {
        self.table.is_resolved(token.id())
    }

    /// Current value of a resolvable: the literal, the resolved token value,
    /// or `None` while the token is pending.
    pub fn value_of<T>(&self, value: &Resolvable<T>) -> CoreResult<Option<T>>
    where
        T: DeserializeOwned + Clone,
    {
        match value {
            Resolvable::Literal(v) => Ok(Some(v.clone())),
            Resolvable::Deferred(token) => match self.table.cached(token.id())? {
                Some(raw) => Ok(Some(self.table.decode(token.id(), raw.clone())?)),
                None => Ok(None),
            },
        }
    }

    /// Replace token markers in `value` with resolved values.
    ///
    /// A string that is exactly one marker becomes the resolved JSON value;
    /// markers inside longer strings are spliced in as text.
    pub fn render(&self, value: &Value) -> CoreResult<Value> {
        let pattern = marker_regex()?;
        self.render_with(&pattern, value)
    }

    fn render_with(&self, pattern: &regex::Regex, value: &Value) -> CoreResult<Value> {
        match value {
            Value::String(s) => self.render_string(pattern, s),
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.render_with(pattern, item))
                    .collect::<CoreResult<Vec<_>>>()?,
            )),
            Value::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(key.clone(), self.render_with(pattern, item)?);
                }
                Ok(Value::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    fn render_string(&self, pattern: &regex::Regex, s: &str) -> CoreResult<Value> {
        let mut out = String::with_capacity(s.len());
        let mut last = 0;

        for captures in pattern.captures_iter(s) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let index: usize = captures[1].parse().map_err(|_| CoreError::UnresolvedToken {
                token: usize::MAX,
                name: captures[1].to_string(),
                reason: "malformed token marker".to_string(),
            })?;
            let id = TokenId(index);
            let resolved = self.table.cached(id)?.ok_or_else(|| CoreError::UnresolvedToken {
                token: index,
                name: self.table.name(id),
                reason: "rendered before the resolution pass".to_string(),
            })?;

            if whole.start() == 0 && whole.end() == s.len() {
                return Ok(resolved.clone());
            }

            out.push_str(&s[last..whole.start()]);
            match resolved {
                Value::String(text) => out.push_str(text),
                other => out.push_str(&other.to_string()),
            }
            last = whole.end();
        }

        out.push_str(&s[last..]);
        Ok(Value::String(out))
    }
}

impl std::fmt::Debug for DeferredPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredPipeline")
            .field("table", &self.table)
            .field("pending", &self.pending.len())
            .finish()
    }
}

//! Function memoization through a bucket.
//!
//! A [`Memoized`] wrapper is built once from a function's declared
//! parameter list; each call is then a pure data transformation: normalize
//! the arguments onto the declared parameters, assemble a signature
//! (instance state for methods, function identity, variadic and named
//! arguments), hash it through the owning bucket's key maker - the same
//! hashing path as `get`/`set` - and either reuse the cached result or
//! invoke the function and cache it.
//!
//! After any call that actually invoked the function, the signature is
//! recomputed and compared against the pre-call digest. A mismatch means
//! the function (or, for methods, the instance) mutated values that are
//! part of its own cache key, which makes deterministic caching unsound;
//! that fails fast with [`MemoError::NonCacheableMutation`] rather than
//! silently caching an inconsistent result.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use pail_core::error::ConfigError;
use pail_core::InstanceKey;

use crate::bucket::Bucket;
use crate::error::{GetEntryError, MemoError};

/// Declared parameter metadata for a wrapped function, captured once at
/// build time and folded into every cache signature.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    function: String,
    params: Vec<String>,
    defaults: BTreeMap<String, Value>,
    varargs: Option<String>,
    varkw: Option<String>,
}

impl ParamSpec {
    pub fn function(&self) -> &str {
        &self.function
    }
}

/// Arguments for one memoized call: positional values plus named values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    named: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Add a named argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn positional_mut(&mut self) -> &mut Vec<Value> {
        &mut self.positional
    }

    pub fn named(&self) -> &BTreeMap<String, Value> {
        &self.named
    }

    pub fn named_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.named
    }
}

/// Call arguments normalized onto the declared parameter list.
#[derive(Debug, Clone)]
struct NormalizedCall {
    /// Overflow positional values, folded under the variadic bucket.
    varargs: Vec<Value>,
    /// Every named value, with keyword-variadic arguments folded in.
    normargs: BTreeMap<String, Value>,
    /// The original parameter -> value mapping, with the variadic and
    /// keyword-variadic buckets appearing under their declared names.
    callargs: BTreeMap<String, Value>,
    /// Names that arrived through the keyword-variadic bucket.
    varkw_names: BTreeSet<String>,
}

/// Details handed to the hit callback when a cached result is reused.
#[derive(Debug)]
pub struct CachedCallInfo<'a, V> {
    pub varargs: &'a [Value],
    pub callargs: &'a BTreeMap<String, Value>,
    pub value: &'a V,
    pub expiration: Option<DateTime<Utc>>,
}

type HitCallback<V> = Box<dyn Fn(CachedCallInfo<'_, V>)>;

/// A memoization wrapper bound to a function's parameter metadata.
///
/// Built via [`Memoized::builder`]; calls go through [`Memoized::call`] or,
/// for instance methods, [`Memoized::call_method`].
pub struct Memoized<V> {
    spec: ParamSpec,
    spec_value: Value,
    method: bool,
    nocache: Option<String>,
    ignore: BTreeSet<String>,
    on_hit: Option<HitCallback<V>>,
}

impl<V> fmt::Debug for Memoized<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("spec", &self.spec)
            .field("method", &self.method)
            .field("nocache", &self.nocache)
            .field("ignore", &self.ignore)
            .field("has_on_hit", &self.on_hit.is_some())
            .finish()
    }
}

impl<V> Memoized<V> {
    /// Start building a wrapper for the function named `function`.
    pub fn builder(function: impl Into<String>) -> MemoizedBuilder<V> {
        MemoizedBuilder::new(function)
    }

    pub fn spec(&self) -> &ParamSpec {
        &self.spec
    }
}

impl<V> Memoized<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// Call a plain (non-method) wrapped function.
    ///
    /// On a cache hit the function is not invoked and the registered hit
    /// callback (if any) fires; on a miss, `f` runs and its result is
    /// cached. When the nocache argument is supplied and truthy the cache
    /// is bypassed but the result is still written.
    pub fn call<F>(
        &self,
        bucket: &mut Bucket<V>,
        args: &mut CallArgs,
        f: F,
    ) -> Result<V, MemoError>
    where
        F: FnOnce(&mut CallArgs) -> V,
    {
        if self.method {
            return Err(MemoError::SignatureMismatch {
                function: self.spec.function.clone(),
                reason: "configured as a method; use call_method".to_string(),
            });
        }
        let norm = self.normalize(args)?;
        let skip_cache = self.skip_cache(&norm);
        let signature = self.signature_value(None, &norm);
        let (digest, _) = bucket.digest_for_key(&signature).map_err(MemoError::from)?;

        let (value, called) =
            self.lookup_or_call(bucket, &digest, &norm, skip_cache, || f(&mut *args))?;

        if called {
            let post_norm = self.normalize(args)?;
            let post_signature = self.signature_value(None, &post_norm);
            let (post_digest, _) = bucket
                .digest_for_key(&post_signature)
                .map_err(MemoError::from)?;
            if post_digest != digest {
                return Err(MemoError::NonCacheableMutation {
                    function: self.spec.function.clone(),
                });
            }
        }
        Ok(value)
    }

    /// Call a wrapped instance method.
    ///
    /// The instance's state snapshot (via [`InstanceKey`]) is prepended to
    /// the signature, so equal calls on instances in different states do
    /// not share cache entries. The post-call check covers instance state
    /// as well as arguments.
    pub fn call_method<I, F>(
        &self,
        bucket: &mut Bucket<V>,
        instance: &mut I,
        args: &mut CallArgs,
        f: F,
    ) -> Result<V, MemoError>
    where
        I: InstanceKey,
        F: FnOnce(&mut I, &mut CallArgs) -> V,
    {
        if !self.method {
            return Err(MemoError::SignatureMismatch {
                function: self.spec.function.clone(),
                reason: "not configured as a method; use call".to_string(),
            });
        }
        let norm = self.normalize(args)?;
        let skip_cache = self.skip_cache(&norm);
        let state = instance.instance_key().into_value();
        let signature = self.signature_value(Some(&state), &norm);
        let (digest, _) = bucket.digest_for_key(&signature).map_err(MemoError::from)?;

        let (value, called) = self.lookup_or_call(bucket, &digest, &norm, skip_cache, || {
            f(&mut *instance, &mut *args)
        })?;

        if called {
            let post_norm = self.normalize(args)?;
            let post_state = instance.instance_key().into_value();
            let post_signature = self.signature_value(Some(&post_state), &post_norm);
            let (post_digest, _) = bucket
                .digest_for_key(&post_signature)
                .map_err(MemoError::from)?;
            if post_digest != digest {
                return Err(MemoError::NonCacheableMutation {
                    function: self.spec.function.clone(),
                });
            }
        }
        Ok(value)
    }

    /// Load from cache, or invoke and cache. Returns the value and whether
    /// the function was actually invoked.
    fn lookup_or_call(
        &self,
        bucket: &mut Bucket<V>,
        digest: &pail_core::KeyDigest,
        norm: &NormalizedCall,
        skip_cache: bool,
        invoke: impl FnOnce() -> V,
    ) -> Result<(V, bool), MemoError> {
        if skip_cache {
            debug!(function = %self.spec.function, "cache bypassed by nocache argument");
            let value = invoke();
            bucket.store_for_digest(digest, value.clone())?;
            return Ok((value, true));
        }
        match bucket.entry_for_digest(digest) {
            Ok(entry) => {
                let value = entry.value().clone();
                let expiration = entry.expiration();
                debug!(function = %self.spec.function, "function call loaded from cache");
                if let Some(callback) = &self.on_hit {
                    callback(CachedCallInfo {
                        varargs: &norm.varargs,
                        callargs: &norm.callargs,
                        value: &value,
                        expiration,
                    });
                }
                Ok((value, false))
            }
            Err(GetEntryError::Invalid(_)) => {
                debug!(function = %self.spec.function, "calling function");
                let value = invoke();
                bucket.store_for_digest(digest, value.clone())?;
                Ok((value, true))
            }
            Err(GetEntryError::Fatal(err)) => Err(err.into()),
        }
    }

    /// Map the call's arguments onto the declared parameter list.
    fn normalize(&self, args: &CallArgs) -> Result<NormalizedCall, MemoError> {
        let spec = &self.spec;
        let mut normargs = BTreeMap::new();
        let mut varargs = Vec::new();
        let mut varkw_names = BTreeSet::new();

        for (position, value) in args.positional.iter().enumerate() {
            match spec.params.get(position) {
                Some(name) => {
                    normargs.insert(name.clone(), value.clone());
                }
                None if spec.varargs.is_some() => varargs.push(value.clone()),
                None => {
                    return Err(self.signature_mismatch(format!(
                        "takes {} positional arguments but {} were given",
                        spec.params.len(),
                        args.positional.len()
                    )))
                }
            }
        }

        for (name, value) in &args.named {
            if spec.params.iter().any(|param| param == name) {
                if normargs.contains_key(name) {
                    return Err(self.signature_mismatch(format!(
                        "got multiple values for argument '{}'",
                        name
                    )));
                }
                normargs.insert(name.clone(), value.clone());
            } else if spec.varkw.is_some() {
                varkw_names.insert(name.clone());
                normargs.insert(name.clone(), value.clone());
            } else {
                return Err(self.signature_mismatch(format!(
                    "unexpected keyword argument '{}'",
                    name
                )));
            }
        }

        for (name, default) in &spec.defaults {
            normargs
                .entry(name.clone())
                .or_insert_with(|| default.clone());
        }

        for name in &spec.params {
            if !normargs.contains_key(name) {
                return Err(
                    self.signature_mismatch(format!("missing required argument '{}'", name))
                );
            }
        }

        let mut callargs = BTreeMap::new();
        for name in &spec.params {
            if let Some(value) = normargs.get(name) {
                callargs.insert(name.clone(), value.clone());
            }
        }
        if let Some(varargs_name) = &spec.varargs {
            callargs.insert(varargs_name.clone(), Value::Array(varargs.clone()));
        }
        if let Some(varkw_name) = &spec.varkw {
            let folded: serde_json::Map<String, Value> = varkw_names
                .iter()
                .filter_map(|name| normargs.get(name).map(|v| (name.clone(), v.clone())))
                .collect();
            callargs.insert(varkw_name.clone(), Value::Object(folded));
        }

        Ok(NormalizedCall {
            varargs,
            normargs,
            callargs,
            varkw_names,
        })
    }

    /// Assemble the cache signature for a normalized call.
    ///
    /// The nocache argument is removed (it controls caching, not
    /// identity), as is every ignored name - ignoring the variadic or
    /// keyword-variadic bucket names removes those buckets wholesale.
    fn signature_value(&self, instance_state: Option<&Value>, norm: &NormalizedCall) -> Value {
        let mut sig_normargs = norm.normargs.clone();
        let mut sig_varargs = norm.varargs.clone();

        if let Some(nocache) = &self.nocache {
            sig_normargs.remove(nocache);
        }
        for name in &self.ignore {
            if Some(name) == self.spec.varargs.as_ref() {
                sig_varargs.clear();
            } else if Some(name) == self.spec.varkw.as_ref() {
                for kwarg in &norm.varkw_names {
                    sig_normargs.remove(kwarg);
                }
            } else {
                sig_normargs.remove(name);
            }
        }

        match instance_state {
            Some(state) => json!([state, self.spec_value, sig_varargs, sig_normargs]),
            None => json!([self.spec_value, sig_varargs, sig_normargs]),
        }
    }

    /// Whether this call's nocache argument asks for a cache bypass.
    fn skip_cache(&self, norm: &NormalizedCall) -> bool {
        match &self.nocache {
            Some(name) => norm.normargs.get(name).map(is_truthy).unwrap_or(false),
            None => false,
        }
    }

    fn signature_mismatch(&self, reason: String) -> MemoError {
        MemoError::SignatureMismatch {
            function: self.spec.function.clone(),
            reason,
        }
    }
}

/// Truthiness for nocache argument values: null, false, zero, and empty
/// containers do not bypass the cache.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Builder for [`Memoized`].
///
/// Declares the wrapped function's parameter list and the caching
/// configuration. [`MemoizedBuilder::build`] validates that the nocache
/// parameter and every ignored name exist in the declared list (the
/// variadic and keyword-variadic bucket names count for ignores).
pub struct MemoizedBuilder<V> {
    function: String,
    params: Vec<String>,
    defaults: BTreeMap<String, Value>,
    varargs: Option<String>,
    varkw: Option<String>,
    method: bool,
    nocache: Option<String>,
    ignore: BTreeSet<String>,
    on_hit: Option<HitCallback<V>>,
}

impl<V> MemoizedBuilder<V> {
    fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            params: Vec::new(),
            defaults: BTreeMap::new(),
            varargs: None,
            varkw: None,
            method: false,
            nocache: None,
            ignore: BTreeSet::new(),
            on_hit: None,
        }
    }

    /// Declare a required parameter.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(name.into());
        self
    }

    /// Declare several required parameters.
    pub fn params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare a parameter with a default value, used when a call omits it.
    pub fn param_with_default(
        mut self,
        name: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self {
        let name = name.into();
        self.params.push(name.clone());
        self.defaults.insert(name, default.into());
        self
    }

    /// Declare the variadic positional bucket name.
    pub fn varargs(mut self, name: impl Into<String>) -> Self {
        self.varargs = Some(name.into());
        self
    }

    /// Declare the keyword-variadic bucket name.
    pub fn varkw(mut self, name: impl Into<String>) -> Self {
        self.varkw = Some(name.into());
        self
    }

    /// Mark the wrapped function as an instance method.
    pub fn method(mut self, method: bool) -> Self {
        self.method = method;
        self
    }

    /// Name the parameter that bypasses the cache when truthy.
    pub fn nocache(mut self, name: impl Into<String>) -> Self {
        self.nocache = Some(name.into());
        self
    }

    /// Exclude a parameter from the cache signature.
    pub fn ignore(mut self, name: impl Into<String>) -> Self {
        self.ignore.insert(name.into());
        self
    }

    /// Register a callback fired only when a cached result is reused.
    pub fn on_hit<F>(mut self, callback: F) -> Self
    where
        F: Fn(CachedCallInfo<'_, V>) + 'static,
    {
        self.on_hit = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> Result<Memoized<V>, ConfigError> {
        if let Some(nocache) = &self.nocache {
            if !self.params.contains(nocache) {
                return Err(ConfigError::UnknownParameter {
                    what: "nocache parameter",
                    name: nocache.clone(),
                });
            }
        }
        for name in &self.ignore {
            let declared = self.params.contains(name)
                || Some(name) == self.varargs.as_ref()
                || Some(name) == self.varkw.as_ref();
            if !declared {
                return Err(ConfigError::UnknownParameter {
                    what: "ignored parameter",
                    name: name.clone(),
                });
            }
        }

        let spec = ParamSpec {
            function: self.function,
            params: self.params,
            defaults: self.defaults,
            varargs: self.varargs,
            varkw: self.varkw,
        };
        let spec_value =
            serde_json::to_value(&spec).map_err(|err| ConfigError::InvalidOptionValue {
                option: "parameters".to_string(),
                value: spec.function.clone(),
                reason: err.to_string(),
            })?;

        Ok(Memoized {
            spec,
            spec_value,
            method: self.method,
            nocache: self.nocache,
            ignore: self.ignore,
            on_hit: self.on_hit,
        })
    }
}

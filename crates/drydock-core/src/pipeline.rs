//! Compensating-action pipeline executor.
//!
//! A [`Pipeline`] runs an ordered list of [`Action`]s, threading each
//! action's forward result into the next action's context. When a forward
//! fails, the executor invokes the backward (compensating) operation of
//! every action that already succeeded, in strict reverse order, then
//! surfaces the originating error unchanged. This realizes an all-or-nothing
//! transaction across systems that share no transaction coordinator:
//! compensation is the only available undo mechanism, so ordering and
//! exactly-once-per-success invocation of backward are the properties that
//! matter here.
//!
//! The executor never retries a forward error — retry, where it makes
//! sense, is an action's own internal concern (see the quota ledger's
//! compare-and-swap loop). Backward errors are logged and swallowed: a
//! partially-failed rollback has no further recovery path, so whatever
//! compensations do succeed are retained and the rest leave residual
//! resources for out-of-band cleanup.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::app::App;
use crate::cloud::{AccessKey, CloudUser, StorageEnv};
use crate::error::{DrydockError, Result};
use crate::provision::ProvisionedUnit;
use crate::user::User;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A shared, lockable write sink (deploy output streaming).
pub type LogSink = Arc<Mutex<dyn Write + Send>>;

/// A pipeline-carried value: positional parameters and chained action
/// results are late-bound, so every variant an assembly can pass or return
/// lives here. Actions re-check the shape at the point of use and fail with
/// `InvalidArgument`/`InvalidResult` on mismatch.
#[derive(Clone)]
pub enum Value {
    None,
    Count(u32),
    Text(String),
    App(App),
    User(User),
    CloudUser(CloudUser),
    AccessKey(AccessKey),
    Storage(StorageEnv),
    Units(Vec<ProvisionedUnit>),
    Sink(LogSink),
}

impl Value {
    pub fn as_app(&self) -> Result<&App> {
        match self {
            Value::App(app) => Ok(app),
            _ => Err(DrydockError::InvalidResult {
                expected: "an app record",
            }),
        }
    }

    pub fn as_user(&self) -> Result<&User> {
        match self {
            Value::User(user) => Ok(user),
            _ => Err(DrydockError::InvalidResult {
                expected: "a user record",
            }),
        }
    }

    pub fn as_count(&self) -> Result<u32> {
        match self {
            Value::Count(n) => Ok(*n),
            _ => Err(DrydockError::InvalidResult {
                expected: "a unit count",
            }),
        }
    }

    pub fn as_cloud_user(&self) -> Result<&CloudUser> {
        match self {
            Value::CloudUser(user) => Ok(user),
            _ => Err(DrydockError::InvalidResult {
                expected: "a cloud identity",
            }),
        }
    }

    pub fn as_access_key(&self) -> Result<&AccessKey> {
        match self {
            Value::AccessKey(key) => Ok(key),
            _ => Err(DrydockError::InvalidResult {
                expected: "an access key",
            }),
        }
    }

    pub fn as_storage(&self) -> Result<&StorageEnv> {
        match self {
            Value::Storage(env) => Ok(env),
            _ => Err(DrydockError::InvalidResult {
                expected: "storage credentials",
            }),
        }
    }

    pub fn as_units(&self) -> Result<&[ProvisionedUnit]> {
        match self {
            Value::Units(units) => Ok(units),
            _ => Err(DrydockError::InvalidResult {
                expected: "a list of provisioned units",
            }),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Count(n) => write!(f, "Count({n})"),
            Value::Text(s) => write!(f, "Text({s:?})"),
            Value::App(app) => write!(f, "App({:?})", app.name),
            Value::User(user) => write!(f, "User({:?})", user.email),
            Value::CloudUser(user) => write!(f, "CloudUser({:?})", user.name),
            Value::AccessKey(key) => write!(f, "AccessKey({:?})", key.id),
            Value::Storage(env) => write!(f, "Storage({:?})", env.bucket),
            Value::Units(units) => write!(f, "Units(len={})", units.len()),
            Value::Sink(_) => write!(f, "Sink"),
        }
    }
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// The ordered arguments supplied when the pipeline was constructed, shared
/// and visible to every action. Accessors perform the runtime shape check
/// that replaces compile-time typing across the generic pipeline boundary.
#[derive(Debug, Clone, Copy)]
pub struct Params<'a>(pub &'a [Value]);

impl<'a> Params<'a> {
    fn get(&self, position: usize, expected: &'static str) -> Result<&'a Value> {
        self.0
            .get(position)
            .ok_or(DrydockError::InvalidArgument { position, expected })
    }

    pub fn app(&self, position: usize) -> Result<&'a App> {
        match self.get(position, "an app record")? {
            Value::App(app) => Ok(app),
            _ => Err(DrydockError::InvalidArgument {
                position,
                expected: "an app record",
            }),
        }
    }

    pub fn user(&self, position: usize) -> Result<&'a User> {
        match self.get(position, "a user record")? {
            Value::User(user) => Ok(user),
            _ => Err(DrydockError::InvalidArgument {
                position,
                expected: "a user record",
            }),
        }
    }

    pub fn count(&self, position: usize) -> Result<u32> {
        match self.get(position, "a unit count")? {
            Value::Count(n) => Ok(*n),
            _ => Err(DrydockError::InvalidArgument {
                position,
                expected: "a unit count",
            }),
        }
    }

    pub fn text(&self, position: usize) -> Result<&'a str> {
        match self.get(position, "a string")? {
            Value::Text(s) => Ok(s),
            _ => Err(DrydockError::InvalidArgument {
                position,
                expected: "a string",
            }),
        }
    }

    pub fn sink(&self, position: usize) -> Result<LogSink> {
        match self.get(position, "a log sink")? {
            Value::Sink(sink) => Ok(Arc::clone(sink)),
            _ => Err(DrydockError::InvalidArgument {
                position,
                expected: "a log sink",
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// Context handed to an action's forward operation.
pub struct FwContext<'a> {
    pub params: Params<'a>,
    /// Result of the immediately preceding action's forward, or the
    /// pipeline seed for the first action.
    pub previous: &'a Value,
}

/// Context handed to an action's backward operation. `fw_result` is always
/// the result this same action's forward produced, never another action's.
pub struct BwContext<'a> {
    pub params: Params<'a>,
    pub fw_result: &'a Value,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

pub type ForwardFn = Box<dyn Fn(&FwContext<'_>) -> Result<Value> + Send + Sync>;
pub type BackwardFn = Box<dyn Fn(&BwContext<'_>) -> Result<()> + Send + Sync>;

/// A named unit of work: a forward operation and an optional compensating
/// backward operation. `min_params` is the smallest number of pipeline
/// arguments the forward requires; the executor rejects shorter argument
/// lists before the forward body runs.
pub struct Action {
    pub name: &'static str,
    pub forward: ForwardFn,
    pub backward: Option<BackwardFn>,
    pub min_params: usize,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("min_params", &self.min_params)
            .field("has_backward", &self.backward.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// An ordered sequence of actions executed with automatic reverse-order
/// rollback on failure.
pub struct Pipeline {
    actions: Vec<Action>,
    params: Vec<Value>,
    seed: Value,
}

impl Pipeline {
    pub fn new(actions: Vec<Action>, params: Vec<Value>) -> Self {
        Self::with_seed(actions, params, Value::None)
    }

    /// Like [`Pipeline::new`], but the first action's `previous` is `seed`
    /// instead of `Value::None`.
    pub fn with_seed(actions: Vec<Action>, params: Vec<Value>, seed: Value) -> Self {
        Self {
            actions,
            params,
            seed,
        }
    }

    /// Run every action's forward in order. On success, returns the final
    /// action's result. On the first forward error, unwinds all
    /// already-succeeded actions in reverse order and returns that error
    /// unchanged.
    pub fn execute(self) -> Result<Value> {
        if self.actions.is_empty() {
            return Err(DrydockError::EmptyPipeline);
        }
        let params = Params(&self.params);
        // Execution record: forward results of every succeeded action so
        // far, index-aligned with `self.actions`.
        let mut results: Vec<Value> = Vec::with_capacity(self.actions.len());
        for action in &self.actions {
            tracing::debug!(action = action.name, "running forward");
            let outcome = if self.params.len() < action.min_params {
                Err(DrydockError::InsufficientParams {
                    action: action.name,
                    required: action.min_params,
                    given: self.params.len(),
                })
            } else {
                let ctx = FwContext {
                    params,
                    previous: results.last().unwrap_or(&self.seed),
                };
                (action.forward)(&ctx)
            };
            match outcome {
                Ok(result) => results.push(result),
                Err(err) => {
                    tracing::warn!(action = action.name, error = %err, "forward failed, rolling back");
                    self.rollback(params, &results);
                    return Err(err);
                }
            }
        }
        Ok(results.pop().expect("non-empty pipeline produced a result"))
    }

    /// Invoke backward on every recorded action, newest first. Each backward
    /// receives exactly the forward result its own action produced.
    /// Compensation failures are logged and never interrupt the unwind.
    fn rollback(&self, params: Params<'_>, results: &[Value]) {
        for (action, fw_result) in self.actions.iter().zip(results).rev() {
            let Some(backward) = &action.backward else {
                continue;
            };
            tracing::debug!(action = action.name, "running backward");
            let ctx = BwContext { params, fw_result };
            if let Err(err) = backward(&ctx) {
                tracing::warn!(
                    action = action.name,
                    error = %err,
                    "compensation failed, continuing rollback"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Task descriptors: a callable plus its execution options.
//!
//! A [`Task`] is immutable and stateless. It can be enqueued any number of
//! times on any backend, and it can be called directly with
//! [`Task::call`], which runs the callable in place and applies the
//! transform without touching a backend.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::constants::{DEFAULT_PRIORITY, DEFAULT_TTL};
use crate::types::args::TaskArgs;

/// Boxed future returned by a task callable.
pub type TaskFuture = BoxFuture<'static, anyhow::Result<Value>>;

type TaskFn = dyn Fn(TaskArgs) -> TaskFuture + Send + Sync;
type TransformFn = dyn Fn(Value) -> Value + Send + Sync;

/// Execution options attached to a [`Task`].
///
/// # Defaults
///
/// | Setting     | Default | Description                                  |
/// |-------------|---------|----------------------------------------------|
/// | `priority`  | 0       | Higher runs first on priority-aware backends |
/// | `ttl`       | 300 s   | How long a result stays retrievable          |
/// | `transform` | none    | Applied to a successful value before storage |
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use hook_tasks::TaskOptions;
///
/// let options = TaskOptions::default()
///     .with_priority(5)
///     .with_ttl(Duration::from_secs(600));
/// assert_eq!(options.priority, 5);
/// assert_eq!(options.ttl, Duration::from_secs(600));
/// ```
#[derive(Clone)]
pub struct TaskOptions {
    /// Advisory scheduling priority.
    pub priority: i32,

    /// How long a result stays retrievable, measured from enqueue time.
    pub ttl: Duration,

    transform: Option<Arc<TransformFn>>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            ttl: DEFAULT_TTL,
            transform: None,
        }
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("priority", &self.priority)
            .field("ttl", &self.ttl)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl TaskOptions {
    /// Sets the scheduling priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the result time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets a function applied to every successful value before storage.
    pub fn with_transform<T>(mut self, transform: T) -> Self
    where
        T: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Returns `true` if a transform is configured.
    pub fn has_transform(&self) -> bool {
        self.transform.is_some()
    }

    fn apply_transform(&self, value: Value) -> Value {
        match &self.transform {
            Some(transform) => transform(value),
            None => value,
        }
    }
}

/// A named callable together with its [`TaskOptions`].
///
/// Cloning is cheap; clones share the callable.
///
/// # Examples
///
/// ```
/// use hook_tasks::{Task, TaskArgs};
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let double = Task::from_fn("double", |args: TaskArgs| {
///     let x: i64 = args.get(0)?;
///     Ok(json!(x * 2))
/// })
/// .with_transform(|v| json!(format!("Transformed: {v}")));
///
/// let value = double.call(TaskArgs::from([json!(5)])).await.unwrap();
/// assert_eq!(value, json!("Transformed: 10"));
/// # });
/// ```
#[derive(Clone)]
pub struct Task {
    name: Arc<str>,
    func: Arc<TaskFn>,
    options: TaskOptions,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Creates a task from an async callable.
    ///
    /// The callable is not invoked here.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            func: Arc::new(move |args| func(args).boxed()),
            options: TaskOptions::default(),
        }
    }

    /// Creates a task from a synchronous callable.
    ///
    /// The callable runs on the executing worker, so it should not block
    /// for long; use [`Task::new`] with `tokio::task::spawn_blocking` for
    /// heavy synchronous work.
    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(TaskArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self::new(name, move |args| {
            let func = Arc::clone(&func);
            async move { func(args) }
        })
    }

    /// Replaces all options at once.
    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the scheduling priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.options = self.options.with_priority(priority);
        self
    }

    /// Sets the result time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.options = self.options.with_ttl(ttl);
        self
    }

    /// Sets the result transform.
    pub fn with_transform<T>(mut self, transform: T) -> Self
    where
        T: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.options = self.options.with_transform(transform);
        self
    }

    /// The task's name, used as its logging label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scheduling priority.
    pub fn priority(&self) -> i32 {
        self.options.priority
    }

    /// Result time-to-live.
    pub fn ttl(&self) -> Duration {
        self.options.ttl
    }

    /// All execution options.
    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    /// Runs the callable and applies the transform to a successful value.
    ///
    /// Errors from the callable are returned unchanged. No backend is
    /// involved and no result is recorded.
    ///
    /// # Errors
    ///
    /// Returns whatever error the callable produced.
    pub async fn call(&self, args: TaskArgs) -> anyhow::Result<Value> {
        let value = (self.func)(args).await?;
        Ok(self.options.apply_transform(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add() -> Task {
        Task::from_fn("add", |args| {
            let a: i64 = args.get(0)?;
            let b: i64 = args.get(1)?;
            Ok(json!(a + b))
        })
    }

    #[test]
    fn defaults() {
        let task = add();
        assert_eq!(task.name(), "add");
        assert_eq!(task.priority(), 0);
        assert_eq!(task.ttl(), Duration::from_secs(300));
        assert!(!task.options().has_transform());
    }

    #[test]
    fn custom_options() {
        let task = add()
            .with_priority(5)
            .with_ttl(Duration::from_secs(600));
        assert_eq!(task.priority(), 5);
        assert_eq!(task.ttl(), Duration::from_secs(600));
    }

    #[test]
    fn with_options_replaces_everything() {
        let task = add().with_priority(9).with_options(TaskOptions::default());
        assert_eq!(task.priority(), 0);
    }

    #[test]
    fn construction_does_not_call() {
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let _task = Task::from_fn("spy", move |_| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(Value::Null)
        });
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn direct_call() {
        let value = add().call(TaskArgs::from([json!(2), json!(3)])).await.unwrap();
        assert_eq!(value, json!(5));
    }

    #[tokio::test]
    async fn direct_call_applies_transform() {
        let task = Task::from_fn("double", |args| Ok(json!(args.get::<i64>(0)? * 2)))
            .with_transform(|v| json!(format!("Transformed: {v}")));
        let value = task.call(TaskArgs::from([json!(5)])).await.unwrap();
        assert_eq!(value, json!("Transformed: 10"));
    }

    #[tokio::test]
    async fn direct_call_propagates_error() {
        let task = Task::new("fail", |_| async {
            Err::<Value, _>(anyhow::anyhow!("Intentional failure"))
        })
            .with_transform(|_| json!("never"));
        let err = task.call(TaskArgs::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Intentional failure");
    }

    #[test]
    fn debug_hides_callable() {
        let debug = format!("{:?}", add().with_transform(|v| v));
        assert!(debug.contains("add"));
        assert!(debug.contains("transform: true"));
    }
}

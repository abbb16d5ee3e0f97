//! Arguments passed to a task callable.
//!
//! [`TaskArgs`] holds positional and named JSON arguments. Callables read
//! them back through typed accessors that deserialize with serde, so a task
//! can be declared once and enqueued with different arguments each time.

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Positional and named arguments for one task execution.
///
/// # Examples
///
/// ```
/// use hook_tasks::TaskArgs;
/// use serde_json::json;
///
/// let args = TaskArgs::new()
///     .arg(json!("rust ownership"))
///     .kwarg("limit", json!(5));
///
/// let query: String = args.get(0).unwrap();
/// let limit: u32 = args.named("limit").unwrap();
/// assert_eq!(query, "rust ownership");
/// assert_eq!(limit, 5);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskArgs {
    /// Positional arguments, in call order.
    #[serde(default)]
    pub positional: Vec<Value>,

    /// Named arguments.
    #[serde(default)]
    pub named: Map<String, Value>,
}

impl TaskArgs {
    /// Creates an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Sets a named argument, replacing any previous value.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    /// Number of positional arguments.
    pub fn len(&self) -> usize {
        self.positional.len()
    }

    /// Returns `true` if there are no positional and no named arguments.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// Deserializes the positional argument at `index`.
    ///
    /// # Errors
    ///
    /// Fails if the argument is missing or does not deserialize into `T`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self
            .positional
            .get(index)
            .with_context(|| format!("missing positional argument {index}"))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("invalid positional argument {index}"))
    }

    /// Deserializes the named argument `name`.
    ///
    /// # Errors
    ///
    /// Fails if the argument is missing or does not deserialize into `T`.
    pub fn named<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .named
            .get(name)
            .with_context(|| format!("missing named argument `{name}`"))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("invalid named argument `{name}`"))
    }

    /// Deserializes the named argument `name`, returning `None` when absent.
    ///
    /// # Errors
    ///
    /// Fails only if the argument is present and does not deserialize.
    pub fn named_opt<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        match self.named.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .with_context(|| format!("invalid named argument `{name}`")),
        }
    }
}

impl From<Vec<Value>> for TaskArgs {
    fn from(positional: Vec<Value>) -> Self {
        Self {
            positional,
            named: Map::new(),
        }
    }
}

impl<const N: usize> From<[Value; N]> for TaskArgs {
    fn from(values: [Value; N]) -> Self {
        Self::from(Vec::from(values))
    }
}

impl From<()> for TaskArgs {
    fn from((): ()) -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn positional_access() {
        let args = TaskArgs::from([json!(5), json!("x")]);
        assert_eq!(args.len(), 2);
        assert_eq!(args.get::<i64>(0).unwrap(), 5);
        assert_eq!(args.get::<String>(1).unwrap(), "x");
    }

    #[test]
    fn missing_positional_is_error() {
        let args = TaskArgs::new();
        let err = args.get::<i64>(0).unwrap_err();
        assert!(err.to_string().contains("missing positional argument 0"));
    }

    #[test]
    fn wrong_type_is_error() {
        let args = TaskArgs::new().arg("not a number");
        let err = args.get::<i64>(0).unwrap_err();
        assert!(err.to_string().contains("invalid positional argument 0"));
    }

    #[test]
    fn named_access() {
        let args = TaskArgs::new().kwarg("query", "hooks").kwarg("empty", Value::Null);
        assert_eq!(args.named::<String>("query").unwrap(), "hooks");
        assert_eq!(args.named_opt::<String>("missing").unwrap(), None);
        assert_eq!(args.named_opt::<String>("empty").unwrap(), None);
        assert!(args.named::<String>("missing").is_err());
    }

    #[test]
    fn empty_args() {
        assert!(TaskArgs::from(()).is_empty());
        assert!(!TaskArgs::new().kwarg("a", 1).is_empty());
    }
}

//! The callable surface a process exposes to its peer.
//!
//! A [`MethodRegistry`] is a tree of [`Namespace`]s built once at startup.
//! Each namespace maps names to plain values, methods, or nested namespaces,
//! and may own a shared context. A method invoked as `a.b.method` receives
//! the context of `a.b` (its immediate parent), never the root's.

use assist_ipc::CallError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared state owned by a namespace.
pub type Context = Arc<dyn Any + Send + Sync>;

/// Future produced by a method invocation.
pub type MethodFuture = BoxFuture<'static, anyhow::Result<Value>>;

type MethodFn = dyn Fn(Receiver, Vec<Value>) -> MethodFuture + Send + Sync;

/// The binding context a resolved method is invoked against.
#[derive(Clone, Default)]
pub struct Receiver {
    path: String,
    context: Option<Context>,
}

impl Receiver {
    /// Dotted path of the owning namespace; empty for the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Typed access to the owning namespace's context.
    pub fn context<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.context.clone()?.downcast::<T>().ok()
    }
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("path", &self.path)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

/// A callable taking positional JSON arguments.
#[derive(Clone)]
pub struct Method(Arc<MethodFn>);

impl Method {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Receiver, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Method(Arc::new(move |receiver, args| f(receiver, args).boxed()))
    }

    /// A method whose whole body runs synchronously.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Receiver, Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Method(Arc::new(move |receiver, args| {
            let outcome = f(&receiver, args);
            futures::future::ready(outcome).boxed()
        }))
    }

    /// A method that needs its namespace's context of type `T`.
    pub fn bound<T, F, Fut>(f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Method(Arc::new(move |receiver, args| match receiver.context::<T>() {
            Some(context) => f(context, args).boxed(),
            None => {
                let path = receiver.path().to_string();
                async move {
                    Err(anyhow::anyhow!(
                        "receiver '{}' does not carry a {} context",
                        path,
                        std::any::type_name::<T>()
                    ))
                }
                .boxed()
            }
        }))
    }

    pub fn invoke(&self, receiver: Receiver, args: Vec<Value>) -> MethodFuture {
        (self.0)(receiver, args)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Method(..)")
    }
}

#[derive(Debug, Clone)]
pub enum Entry {
    Value(Value),
    Method(Method),
    Namespace(Namespace),
}

#[derive(Clone, Default)]
pub struct Namespace {
    context: Option<Context>,
    entries: HashMap<String, Entry>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// A namespace whose methods are invoked against `context`.
    pub fn with_context<T: Any + Send + Sync>(context: Arc<T>) -> Self {
        Self {
            context: Some(context),
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: Entry) -> Option<Entry> {
        let name = name.into();
        if name.contains('.') {
            warn!("Entry '{}' contains '.', it cannot be reached by a dotted path", name);
        }
        self.entries.insert(name, entry)
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, Entry::Value(value));
        self
    }

    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Receiver, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.insert(name, Entry::Method(Method::new(f)));
        self
    }

    pub fn method_sync<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Receiver, Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.insert(name, Entry::Method(Method::sync(f)));
        self
    }

    pub fn bound_method<T, F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.insert(name, Entry::Method(Method::bound::<T, F, Fut>(f)));
        self
    }

    pub fn namespace(mut self, name: impl Into<String>, namespace: Namespace) -> Self {
        self.insert(name, Entry::Namespace(namespace));
        self
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("has_context", &self.context.is_some())
            .field("entries", &self.entries)
            .finish()
    }
}

/// A method found by [`MethodRegistry::resolve`], paired with its receiver.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub method: Method,
    pub receiver: Receiver,
}

#[derive(Debug, Clone, Default)]
pub struct MethodRegistry {
    root: Namespace,
}

impl MethodRegistry {
    pub fn new(root: Namespace) -> Self {
        Self { root }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &Namespace {
        &self.root
    }

    /// Walks `path` segment by segment. Anything other than a method at the
    /// end of a chain of namespaces is `MethodNotFound`.
    pub fn resolve(&self, path: &str) -> Result<Resolved, CallError> {
        let not_found = || CallError::MethodNotFound(path.to_string());

        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop().ok_or_else(not_found)?;

        let mut owner = &self.root;
        for segment in &segments {
            match owner.get(segment) {
                Some(Entry::Namespace(namespace)) => owner = namespace,
                _ => {
                    debug!("Resolution of '{}' stopped at segment '{}'", path, segment);
                    return Err(not_found());
                }
            }
        }

        match owner.get(last) {
            Some(Entry::Method(method)) => Ok(Resolved {
                method: method.clone(),
                receiver: Receiver {
                    path: segments.join("."),
                    context: owner.context.clone(),
                },
            }),
            Some(_) => {
                debug!("'{}' resolves to something that is not callable", path);
                Err(not_found())
            }
            None => Err(not_found()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct Counter {
        hits: AtomicU64,
    }

    fn registry() -> MethodRegistry {
        let counter = Arc::new(Counter::default());
        MethodRegistry::new(
            Namespace::new()
                .method_sync("greet", |_, args| {
                    let name = args.first().and_then(Value::as_str).unwrap_or("nobody");
                    Ok(json!(format!("hi {}", name)))
                })
                .method_sync("whereami", |receiver, _| Ok(json!(receiver.path())))
                .value("version", json!("1.0"))
                .value("nothing", Value::Null)
                .namespace(
                    "a",
                    Namespace::new().namespace(
                        "b",
                        Namespace::with_context(counter)
                            .method_sync("whereami", |receiver, _| Ok(json!(receiver.path())))
                            .bound_method("hit", |counter: Arc<Counter>, _| async move {
                                Ok(json!(counter.hits.fetch_add(1, Ordering::SeqCst) + 1))
                            }),
                    ),
                ),
        )
    }

    #[tokio::test]
    async fn test_resolve_top_level() {
        let resolved = registry().resolve("greet").unwrap();
        assert_eq!(resolved.receiver.path(), "");
        let value = resolved
            .method
            .invoke(resolved.receiver, vec![json!("Sam")])
            .await
            .unwrap();
        assert_eq!(value, json!("hi Sam"));
    }

    #[tokio::test]
    async fn test_receiver_is_immediate_parent() {
        let registry = registry();

        let resolved = registry.resolve("a.b.whereami").unwrap();
        assert_eq!(resolved.receiver.path(), "a.b");
        assert!(resolved.receiver.context::<Counter>().is_some());

        let root = registry.resolve("whereami").unwrap();
        assert!(root.receiver.context::<Counter>().is_none());

        for expected in 1..=2 {
            let resolved = registry.resolve("a.b.hit").unwrap();
            let value = resolved.method.invoke(resolved.receiver, vec![]).await.unwrap();
            assert_eq!(value, json!(expected));
        }
    }

    #[tokio::test]
    async fn test_bound_method_without_context_fails() {
        let registry = MethodRegistry::new(
            Namespace::new().bound_method("hit", |_: Arc<Counter>, _| async { Ok(Value::Null) }),
        );
        let resolved = registry.resolve("hit").unwrap();
        let err = resolved.method.invoke(resolved.receiver, vec![]).await.unwrap_err();
        assert!(err.to_string().contains("does not carry"));
    }

    #[test]
    fn test_resolve_not_found() {
        let registry = registry();
        for path in [
            "doesNotExist",
            "",
            "a",
            "a.b",
            "a.missing.hit",
            "version",
            "version.major",
            "nothing",
            "nothing.deeper",
            "greet.extra",
            "a.b.hit.",
            ".greet",
        ] {
            let err = registry.resolve(path).unwrap_err();
            assert_eq!(err, CallError::MethodNotFound(path.to_string()), "path {:?}", path);
        }
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use super::error::EngineError;
use super::value::Value;

/// Capability a host aggregate exposes to the interpreter: named members,
/// callable methods, and indexed elements. Implement this for any host type
/// rules should navigate; the engine never reflects over host types itself.
///
/// All methods have erroring defaults, so an implementation only overrides
/// what its type actually supports.
pub trait Fact: Send + Sync {
    /// Short description used in error messages, e.g. `"list"`.
    fn fact_type(&self) -> &'static str {
        "fact"
    }

    /// Read a named field.
    fn get_member(&self, member: &str) -> Result<Value, EngineError> {
        Err(EngineError::UnknownMember {
            target: self.fact_type().to_owned(),
            member: member.to_owned(),
        })
    }

    /// Write a named field.
    fn set_member(&self, member: &str, _value: Value) -> Result<(), EngineError> {
        Err(EngineError::UnknownMember {
            target: self.fact_type().to_owned(),
            member: member.to_owned(),
        })
    }

    /// Invoke a named method.
    fn call_method(&self, method: &str, _args: &[Value]) -> Result<Value, EngineError> {
        Err(EngineError::UnknownMember {
            target: self.fact_type().to_owned(),
            member: method.to_owned(),
        })
    }

    /// Read an element by index or key.
    fn get_index(&self, _key: &Value) -> Result<Value, EngineError> {
        Err(EngineError::Type {
            message: format!("{} is not indexable", self.fact_type()),
        })
    }

    /// Write an element by index or key.
    fn set_index(&self, _key: &Value, _value: Value) -> Result<(), EngineError> {
        Err(EngineError::Type {
            message: format!("{} is not indexable", self.fact_type()),
        })
    }

    /// Whether this handle represents the host's absent value. Drives
    /// `fact == nil` comparisons.
    fn is_nil(&self) -> bool {
        false
    }
}

/// A host callable invokable from rule text with positional arguments.
pub trait HostFn: Send + Sync {
    /// Declared argument count, or `None` for variadic callables.
    fn arity(&self) -> Option<usize> {
        None
    }

    /// Invoke with evaluated arguments. May return zero, one, or several
    /// values; expression context keeps only the first.
    fn invoke(&self, args: &[Value]) -> Result<Vec<Value>, EngineError>;
}

struct ClosureFn<F> {
    arity: Option<usize>,
    f: F,
}

impl<F> HostFn for ClosureFn<F>
where
    F: Fn(&[Value]) -> Result<Vec<Value>, EngineError> + Send + Sync,
{
    fn arity(&self) -> Option<usize> {
        self.arity
    }

    fn invoke(&self, args: &[Value]) -> Result<Vec<Value>, EngineError> {
        (self.f)(args)
    }
}

/// One entry in the data context.
#[derive(Clone)]
pub enum Binding {
    /// A plain mutable value slot.
    Slot(SharedSlot),
    /// A host callable.
    Callable(Arc<dyn HostFn>),
    /// A host aggregate.
    Fact(Arc<dyn Fact>),
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Slot(slot) => f.debug_tuple("Slot").field(&slot.get()).finish(),
            Binding::Callable(_) => f.write_str("Callable"),
            Binding::Fact(fact) => f.debug_tuple("Fact").field(&fact.fact_type()).finish(),
        }
    }
}

/// Name-to-binding mapping supplied by the host and navigated by the
/// interpreter. Cloning shares the underlying map, so an instance and its
/// pool slot always observe the same bindings.
#[derive(Debug, Clone, Default)]
pub struct DataContext {
    bindings: Arc<RwLock<HashMap<String, Binding>>>,
}

impl DataContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding. Last write wins.
    pub fn add(&self, name: impl Into<String>, binding: Binding) {
        self.bindings
            .write()
            .expect("data context lock")
            .insert(name.into(), binding);
    }

    /// Register a plain value slot and return a handle the host can read
    /// back after execution.
    pub fn add_value(&self, name: impl Into<String>, value: impl Into<Value>) -> SharedSlot {
        let slot = SharedSlot::new(value.into());
        self.add(name, Binding::Slot(slot.clone()));
        slot
    }

    /// Register a host callable from a closure.
    pub fn add_fn<F>(&self, name: impl Into<String>, arity: Option<usize>, f: F)
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, EngineError> + Send + Sync + 'static,
    {
        self.add(name, Binding::Callable(Arc::new(ClosureFn { arity, f })));
    }

    /// Register a host aggregate.
    pub fn add_fact(&self, name: impl Into<String>, fact: Arc<dyn Fact>) {
        self.add(name, Binding::Fact(fact));
    }

    /// Remove bindings by name. Unknown names are ignored.
    pub fn del<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = self.bindings.write().expect("data context lock");
        for name in names {
            map.remove(name.as_ref());
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings
            .read()
            .expect("data context lock")
            .contains_key(name)
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<Binding> {
        self.bindings
            .read()
            .expect("data context lock")
            .get(name)
            .cloned()
    }
}

/// A mutable value cell shared between the host and the engine.
#[derive(Debug, Clone, Default)]
pub struct SharedSlot(Arc<RwLock<Value>>);

impl SharedSlot {
    #[must_use]
    pub fn new(value: Value) -> Self {
        SharedSlot(Arc::new(RwLock::new(value)))
    }

    #[must_use]
    pub fn get(&self) -> Value {
        self.0.read().expect("slot lock").clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.write().expect("slot lock") = value;
    }
}

/// A growable sequence of values, indexable and appendable from rules.
#[derive(Debug, Clone, Default)]
pub struct SharedList(Arc<RwLock<Vec<Value>>>);

impl SharedList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_values(values: Vec<Value>) -> Self {
        SharedList(Arc::new(RwLock::new(values)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read().expect("list lock").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, value: Value) {
        self.0.write().expect("list lock").push(value);
    }

    /// Copy of the current contents, in order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Value> {
        self.0.read().expect("list lock").clone()
    }
}

fn list_index(key: &Value) -> Result<i64, EngineError> {
    match key {
        Value::Int(i) => Ok(*i),
        other => Err(EngineError::Type {
            message: format!("list index must be int, got {}", other.type_name()),
        }),
    }
}

impl Fact for SharedList {
    fn fact_type(&self) -> &'static str {
        "list"
    }

    fn get_index(&self, key: &Value) -> Result<Value, EngineError> {
        let idx = list_index(key)?;
        let items = self.0.read().expect("list lock");
        usize::try_from(idx)
            .ok()
            .and_then(|i| items.get(i).cloned())
            .ok_or(EngineError::IndexOutOfRange {
                target: "list".to_owned(),
                index: idx,
                len: items.len(),
            })
    }

    fn set_index(&self, key: &Value, value: Value) -> Result<(), EngineError> {
        let idx = list_index(key)?;
        let mut items = self.0.write().expect("list lock");
        let len = items.len();
        match usize::try_from(idx).ok().and_then(|i| items.get_mut(i)) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(EngineError::IndexOutOfRange {
                target: "list".to_owned(),
                index: idx,
                len,
            }),
        }
    }

    fn call_method(&self, method: &str, args: &[Value]) -> Result<Value, EngineError> {
        match method {
            "push" => match args {
                [value] => {
                    self.push(value.clone());
                    Ok(Value::Nil)
                }
                _ => Err(EngineError::Arity {
                    name: "push".to_owned(),
                    expected: 1,
                    actual: args.len(),
                }),
            },
            "len" if args.is_empty() => Ok(Value::Int(self.len() as i64)),
            "len" => Err(EngineError::Arity {
                name: "len".to_owned(),
                expected: 0,
                actual: args.len(),
            }),
            other => Err(EngineError::UnknownMember {
                target: "list".to_owned(),
                member: other.to_owned(),
            }),
        }
    }
}

/// A string-keyed map of values, readable and writable from rules.
#[derive(Debug, Clone, Default)]
pub struct SharedMap(Arc<RwLock<HashMap<String, Value>>>);

impl SharedMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.read().expect("map lock").get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.0.write().expect("map lock").insert(key.into(), value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read().expect("map lock").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Fact for SharedMap {
    fn fact_type(&self) -> &'static str {
        "map"
    }

    fn get_index(&self, key: &Value) -> Result<Value, EngineError> {
        match key {
            Value::String(k) => self.get(k).ok_or_else(|| EngineError::KeyNotFound {
                target: "map".to_owned(),
                key: k.clone(),
            }),
            other => Err(EngineError::Type {
                message: format!("map key must be string, got {}", other.type_name()),
            }),
        }
    }

    fn set_index(&self, key: &Value, value: Value) -> Result<(), EngineError> {
        match key {
            Value::String(k) => {
                self.insert(k.clone(), value);
                Ok(())
            }
            other => Err(EngineError::Type {
                message: format!("map key must be string, got {}", other.type_name()),
            }),
        }
    }

    fn call_method(&self, method: &str, args: &[Value]) -> Result<Value, EngineError> {
        match method {
            "len" if args.is_empty() => Ok(Value::Int(self.len() as i64)),
            other => Err(EngineError::UnknownMember {
                target: "map".to_owned(),
                member: other.to_owned(),
            }),
        }
    }
}

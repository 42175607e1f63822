// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed fields: the slots that hold node and module data, and the ports
//! through which that data flows.
//!
//! A [`Field<T>`] is a cheap, clonable handle to shared storage. Owned kinds
//! (`State`, `Param`, `Output`) hold a value; an `Input` never holds data and
//! resolves every read through its connected source. Connections are stored
//! on both endpoints (the source keeps its sinks, the input keeps its source)
//! so tearing an edge down from either side updates both.
//!
//! [`AnyField`] is the type-erased view used by registries, introspection and
//! name-based wiring. Element types are compared at runtime there, which is
//! where [`FieldError::TypeMismatch`] comes from.

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

use crate::introspect::FieldInfo;
use crate::node::NodeId;

/// Unique identifier for a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId(pub Uuid);

impl FieldId {
    /// Create a new random field ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FieldId {
    fn default() -> Self {
        Self::new()
    }
}

/// Role a field plays on its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Owned simulation state
    State,
    /// Owned configuration parameter
    Param,
    /// Reference to another field's storage
    Input,
    /// Owned value exposed for others to reference
    Output,
}

impl FieldKind {
    /// Whether fields of this kind carry their own storage
    pub fn owns_data(&self) -> bool {
        !matches!(self, Self::Input)
    }

    /// Short label used in diagnostics
    pub fn label(&self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Param => "param",
            Self::Input => "in",
            Self::Output => "out",
        }
    }
}

/// Where the container behind a field lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Residency {
    /// Host memory
    #[default]
    Cpu,
    /// Device memory
    Gpu,
}

/// Runtime description of the element type a field carries
#[derive(Debug, Clone, Copy)]
pub struct ElementType {
    id: TypeId,
    name: &'static str,
}

impl ElementType {
    /// Element type descriptor for `T`
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Rust type name of the element
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ElementType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ElementType {}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Bound for anything that can be stored in a field
pub trait FieldData: Any + Send + Sync {}

impl<T: Any + Send + Sync> FieldData for T {}

/// Value-changed observer
pub type FieldCallback = Arc<dyn Fn() + Send + Sync>;

/// Error raised by field access and wiring
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// Endpoints carry different element types
    #[error("Type mismatch: '{from}' carries {expected} but '{to}' expects {found}")]
    TypeMismatch {
        /// Source field name
        from: String,
        /// Target field name
        to: String,
        /// Element type of the source
        expected: &'static str,
        /// Element type of the target
        found: &'static str,
    },

    /// Endpoints live on different devices
    #[error("Residency mismatch: '{from}' is {from_residency:?} but '{to}' is {to_residency:?}")]
    ResidencyMismatch {
        /// Source field name
        from: String,
        /// Target field name
        to: String,
        /// Residency of the source
        from_residency: Residency,
        /// Residency of the target
        to_residency: Residency,
    },

    /// Input already has a different live source
    #[error("Input '{field}' is already connected")]
    AlreadyConnected {
        /// Input field name
        field: String,
    },

    /// Attempted write through an input
    #[error("Cannot write to input field '{field}'")]
    WriteToInput {
        /// Input field name
        field: String,
    },

    /// Read of an input with no live source
    #[error("Input '{field}' is not connected")]
    UnresolvedInput {
        /// Input field name
        field: String,
    },

    /// Read of an owned field that holds no value yet
    #[error("Field '{field}' holds no value")]
    EmptyField {
        /// Field name
        field: String,
    },

    /// Connection target is not an input
    #[error("Field '{field}' is not an input")]
    NotAnInput {
        /// Field name
        field: String,
    },

    /// Connection would make a field depend on itself
    #[error("Connecting into '{field}' would create a cycle")]
    CyclicDependency {
        /// Target field name
        field: String,
    },

    /// Output promotion refused
    #[error("Cannot promote '{field}' to an output: {reason}")]
    InvalidPromotion {
        /// Field name
        field: String,
        /// Why promotion was refused
        reason: &'static str,
    },
}

struct Links<T> {
    source: Option<Weak<FieldInner<T>>>,
    sinks: Vec<Weak<FieldInner<T>>>,
}

impl<T> Default for Links<T> {
    fn default() -> Self {
        Self {
            source: None,
            sinks: Vec::new(),
        }
    }
}

struct FieldInner<T> {
    id: FieldId,
    name: String,
    description: String,
    kind: FieldKind,
    residency: Residency,
    element: ElementType,
    promoted: AtomicBool,
    node: Mutex<Option<NodeId>>,
    value: RwLock<Option<T>>,
    version: AtomicU64,
    links: Mutex<Links<T>>,
    observers: Mutex<Vec<FieldCallback>>,
}

impl<T> FieldInner<T> {
    fn live_source(&self) -> Option<Arc<FieldInner<T>>> {
        self.links.lock().source.as_ref().and_then(Weak::upgrade)
    }

    fn live_sinks(&self) -> Vec<Arc<FieldInner<T>>> {
        let mut links = self.links.lock();
        links.sinks.retain(|w| w.strong_count() > 0);
        links.sinks.iter().filter_map(Weak::upgrade).collect()
    }

    fn notify(&self) {
        // Clone the list so observers may freely touch this field.
        let observers: Vec<FieldCallback> = self.observers.lock().clone();
        for observer in observers {
            observer();
        }
        for sink in self.live_sinks() {
            sink.notify();
        }
    }
}

fn same<T>(weak: &Weak<FieldInner<T>>, strong: &Arc<FieldInner<T>>) -> bool {
    std::ptr::eq(weak.as_ptr(), Arc::as_ptr(strong))
}

/// Typed handle to a field
pub struct Field<T> {
    inner: Arc<FieldInner<T>>,
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: FieldData> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("element", &self.inner.element.name())
            .field("version", &self.version())
            .finish()
    }
}

impl<T: FieldData> Field<T> {
    /// Create a host-resident field
    pub fn new(kind: FieldKind, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new_on(kind, Residency::Cpu, name, description)
    }

    /// Create a field with an explicit residency
    pub fn new_on(
        kind: FieldKind,
        residency: Residency,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(FieldInner {
                id: FieldId::new(),
                name: name.into(),
                description: description.into(),
                kind,
                residency,
                element: ElementType::of::<T>(),
                promoted: AtomicBool::new(false),
                node: Mutex::new(None),
                value: RwLock::new(None),
                version: AtomicU64::new(0),
                links: Mutex::new(Links::default()),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create an empty state field
    pub fn state(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(FieldKind::State, name, description)
    }

    /// Create a parameter holding `value`
    pub fn param(name: impl Into<String>, value: T, description: impl Into<String>) -> Self {
        let field = Self::new(FieldKind::Param, name, description);
        *field.inner.value.write() = Some(value);
        field
    }

    /// Create an unconnected input
    pub fn input(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(FieldKind::Input, name, description)
    }

    /// Create an empty output
    pub fn output(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(FieldKind::Output, name, description)
    }

    /// Stable identity
    pub fn id(&self) -> FieldId {
        self.inner.id
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// Field role
    pub fn kind(&self) -> FieldKind {
        self.inner.kind
    }

    /// Container residency
    pub fn residency(&self) -> Residency {
        self.inner.residency
    }

    /// Number of writes applied to this field's own storage
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Whether a read would currently fail
    pub fn is_empty(&self) -> bool {
        self.with(|_| ()).is_err()
    }

    /// Whether an input currently resolves to a live source
    pub fn is_connected(&self) -> bool {
        self.inner.live_source().is_some()
    }

    /// Borrow the current value
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, FieldError> {
        if self.inner.kind == FieldKind::Input {
            let source = self.inner.live_source().ok_or_else(|| FieldError::UnresolvedInput {
                field: self.inner.name.clone(),
            })?;
            return Field { inner: source }.with(f);
        }

        let guard = self.inner.value.read();
        let value = guard.as_ref().ok_or_else(|| FieldError::EmptyField {
            field: self.inner.name.clone(),
        })?;
        Ok(f(value))
    }

    /// Clone the current value out
    pub fn get(&self) -> Result<T, FieldError>
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Replace the value and notify observers
    pub fn set(&self, value: T) -> Result<(), FieldError> {
        self.ensure_writable()?;
        *self.inner.value.write() = Some(value);
        self.touched();
        Ok(())
    }

    /// Mutate the value in place and notify observers
    pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, FieldError> {
        self.ensure_writable()?;
        let result = {
            let mut guard = self.inner.value.write();
            let value = guard.as_mut().ok_or_else(|| FieldError::EmptyField {
                field: self.inner.name.clone(),
            })?;
            f(value)
        };
        self.touched();
        Ok(result)
    }

    /// Drop the stored value
    pub fn clear(&self) -> Result<(), FieldError> {
        self.ensure_writable()?;
        *self.inner.value.write() = None;
        self.touched();
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), FieldError> {
        if self.inner.kind == FieldKind::Input {
            return Err(FieldError::WriteToInput {
                field: self.inner.name.clone(),
            });
        }
        Ok(())
    }

    fn touched(&self) {
        self.inner.version.fetch_add(1, Ordering::AcqRel);
        self.inner.notify();
    }

    /// Register a value-changed observer
    ///
    /// Observers run synchronously, in registration order, right after every
    /// successful write to this field. Observers attached to an input run when
    /// its source is written.
    pub fn attach(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.observers.lock().push(Arc::new(callback));
    }

    /// Non-owning handle, for observers that need to refer back to the field
    pub fn downgrade(&self) -> WeakField<T> {
        WeakField(Arc::downgrade(&self.inner))
    }

    /// Connect this field as the source of `input`
    ///
    /// Connecting an input to the source it already has is a no-op.
    pub fn connect(&self, input: &Field<T>) -> Result<(), FieldError> {
        let source = &self.inner;
        let target = &input.inner;

        if target.kind != FieldKind::Input {
            return Err(FieldError::NotAnInput {
                field: target.name.clone(),
            });
        }
        if source.residency != target.residency {
            return Err(FieldError::ResidencyMismatch {
                from: source.name.clone(),
                to: target.name.clone(),
                from_residency: source.residency,
                to_residency: target.residency,
            });
        }
        if Arc::ptr_eq(source, target) {
            return Err(FieldError::CyclicDependency {
                field: target.name.clone(),
            });
        }

        match target.live_source() {
            Some(current) if Arc::ptr_eq(&current, source) => return Ok(()),
            Some(_) => {
                return Err(FieldError::AlreadyConnected {
                    field: target.name.clone(),
                })
            }
            None => {}
        }

        // Forwarding chains must not loop back into the target.
        let mut cursor = source.live_source();
        while let Some(upstream) = cursor {
            if Arc::ptr_eq(&upstream, target) {
                return Err(FieldError::CyclicDependency {
                    field: target.name.clone(),
                });
            }
            cursor = upstream.live_source();
        }

        {
            let mut links = source.links.lock();
            links.sinks.retain(|w| w.strong_count() > 0);
            links.sinks.push(Arc::downgrade(target));
        }
        target.links.lock().source = Some(Arc::downgrade(source));

        tracing::debug!(from = %source.name, to = %target.name, "Connected fields");
        Ok(())
    }

    /// Remove the edge feeding this input, if any
    pub fn disconnect(&self) {
        let previous = self.inner.links.lock().source.take();
        if let Some(source) = previous.and_then(|w| w.upgrade()) {
            source
                .links
                .lock()
                .sinks
                .retain(|w| w.strong_count() > 0 && !same(w, &self.inner));
            tracing::debug!(from = %source.name, to = %self.inner.name, "Disconnected fields");
        }
    }

    /// Remove the edge from this field into `input`, if it exists
    pub fn disconnect_sink(&self, input: &Field<T>) {
        let feeds = input
            .inner
            .links
            .lock()
            .source
            .as_ref()
            .is_some_and(|w| same(w, &self.inner));
        if feeds {
            input.disconnect();
        }
    }

    /// Remove every edge leaving this field
    pub fn disconnect_sinks(&self) {
        let sinks = std::mem::take(&mut self.inner.links.lock().sinks);
        for sink in sinks.iter().filter_map(Weak::upgrade) {
            let mut links = sink.links.lock();
            if links.source.as_ref().is_some_and(|w| same(w, &self.inner)) {
                links.source = None;
            }
        }
    }

    /// Expose a state field as an output port without changing ownership
    pub fn promote_output(&self) -> Result<(), FieldError> {
        if self.inner.kind != FieldKind::State {
            return Err(FieldError::InvalidPromotion {
                field: self.inner.name.clone(),
                reason: "only state fields can be promoted",
            });
        }
        if self.inner.promoted.load(Ordering::Acquire) {
            return Ok(());
        }
        if !self.inner.live_sinks().is_empty() {
            return Err(FieldError::InvalidPromotion {
                field: self.inner.name.clone(),
                reason: "field already has connections",
            });
        }
        self.inner.promoted.store(true, Ordering::Release);
        Ok(())
    }
}

/// Non-owning field handle
pub struct WeakField<T>(Weak<FieldInner<T>>);

impl<T> Clone for WeakField<T> {
    fn clone(&self) -> Self {
        Self(Weak::clone(&self.0))
    }
}

impl<T> WeakField<T> {
    /// Recover the field if it is still alive
    pub fn upgrade(&self) -> Option<Field<T>> {
        self.0.upgrade().map(|inner| Field { inner })
    }
}

/// Type-erased view of a field
pub trait AnyField: Send + Sync {
    /// Stable identity
    fn id(&self) -> FieldId;
    /// Field name
    fn name(&self) -> &str;
    /// Human-readable description
    fn description(&self) -> &str;
    /// Field role
    fn kind(&self) -> FieldKind;
    /// Container residency
    fn residency(&self) -> Residency;
    /// Element type carried
    fn element_type(&self) -> ElementType;
    /// Whether a state field was promoted to an output port
    fn is_promoted(&self) -> bool;
    /// Write counter
    fn version(&self) -> u64;
    /// Whether a read would fail
    fn is_empty(&self) -> bool;
    /// Whether an input resolves to a live source
    fn is_connected(&self) -> bool;
    /// Identity of the live source, for inputs
    fn source_id(&self) -> Option<FieldId>;
    /// Owning node of the live source, for inputs
    fn source_node(&self) -> Option<NodeId>;
    /// Identities of live sinks
    fn sink_ids(&self) -> Vec<FieldId>;
    /// Owning nodes of live sinks
    fn sink_nodes(&self) -> Vec<NodeId>;
    /// Node this field belongs to, directly or through a module
    fn node(&self) -> Option<NodeId>;
    /// Tag the field with its owning node
    fn set_node(&self, node: Option<NodeId>);
    /// Connect this field as the source of `input`, checking element types at runtime
    fn connect_any(&self, input: &dyn AnyField) -> Result<(), FieldError>;
    /// Remove the edge feeding this field
    fn disconnect(&self);
    /// Remove every edge leaving this field
    fn disconnect_sinks(&self);
    /// Register a value-changed observer
    fn attach_callback(&self, callback: FieldCallback);
    /// Downcasting support
    fn as_any(&self) -> &dyn Any;

    /// Whether other nodes may wire from this field
    fn is_output_port(&self) -> bool {
        match self.kind() {
            FieldKind::Output => true,
            FieldKind::State => self.is_promoted(),
            FieldKind::Param | FieldKind::Input => false,
        }
    }

    /// Remove every edge touching this field
    fn detach_all(&self) {
        self.disconnect();
        self.disconnect_sinks();
    }

    /// Snapshot for introspection
    fn info(&self) -> FieldInfo {
        FieldInfo {
            id: self.id(),
            name: self.name().to_string(),
            description: self.description().to_string(),
            kind: self.kind(),
            element_type: self.element_type().name().to_string(),
            residency: self.residency(),
            promoted: self.is_promoted(),
            empty: self.is_empty(),
            source: self.source_id(),
            sinks: self.sink_ids(),
            version: self.version(),
        }
    }
}

impl<T: FieldData> AnyField for Field<T> {
    fn id(&self) -> FieldId {
        self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn description(&self) -> &str {
        &self.inner.description
    }

    fn kind(&self) -> FieldKind {
        self.inner.kind
    }

    fn residency(&self) -> Residency {
        self.inner.residency
    }

    fn element_type(&self) -> ElementType {
        self.inner.element
    }

    fn is_promoted(&self) -> bool {
        self.inner.promoted.load(Ordering::Acquire)
    }

    fn version(&self) -> u64 {
        Field::version(self)
    }

    fn is_empty(&self) -> bool {
        Field::is_empty(self)
    }

    fn is_connected(&self) -> bool {
        Field::is_connected(self)
    }

    fn source_id(&self) -> Option<FieldId> {
        self.inner.live_source().map(|s| s.id)
    }

    fn source_node(&self) -> Option<NodeId> {
        self.inner.live_source().and_then(|s| *s.node.lock())
    }

    fn sink_ids(&self) -> Vec<FieldId> {
        self.inner.live_sinks().iter().map(|s| s.id).collect()
    }

    fn sink_nodes(&self) -> Vec<NodeId> {
        self.inner.live_sinks().iter().filter_map(|s| *s.node.lock()).collect()
    }

    fn node(&self) -> Option<NodeId> {
        *self.inner.node.lock()
    }

    fn set_node(&self, node: Option<NodeId>) {
        *self.inner.node.lock() = node;
    }

    fn connect_any(&self, input: &dyn AnyField) -> Result<(), FieldError> {
        let Some(target) = input.as_any().downcast_ref::<Field<T>>() else {
            return Err(FieldError::TypeMismatch {
                from: self.inner.name.clone(),
                to: input.name().to_string(),
                expected: self.inner.element.name(),
                found: input.element_type().name(),
            });
        };
        self.connect(target)
    }

    fn disconnect(&self) {
        Field::disconnect(self);
    }

    fn disconnect_sinks(&self) {
        Field::disconnect_sinks(self);
    }

    fn attach_callback(&self, callback: FieldCallback) {
        self.inner.observers.lock().push(callback);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Connect `output` into `input` through their type-erased views
pub fn connect(output: &dyn AnyField, input: &dyn AnyField) -> Result<(), FieldError> {
    output.connect_any(input)
}

/// Ordered name-to-field map built once per owner
#[derive(Clone, Default)]
pub struct FieldSet {
    fields: IndexMap<String, Arc<dyn AnyField>>,
}

impl FieldSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field under its own name, returning the handle
    pub fn insert<T: FieldData>(&mut self, field: Field<T>) -> Field<T> {
        let previous = self
            .fields
            .insert(field.name().to_string(), Arc::new(field.clone()));
        if previous.is_some() {
            tracing::warn!(field = %field.name(), "Field redeclared; previous declaration replaced");
        }
        field
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn AnyField>> {
        self.fields.get(name)
    }

    /// Look up a field by name and element type
    pub fn typed<T: FieldData>(&self, name: &str) -> Option<Field<T>> {
        self.fields
            .get(name)
            .and_then(|f| f.as_any().downcast_ref::<Field<T>>())
            .cloned()
    }

    /// Whether a field with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn AnyField>> {
        self.fields.values()
    }

    /// Fields of one kind, in declaration order
    pub fn of_kind(&self, kind: FieldKind) -> impl Iterator<Item = &Arc<dyn AnyField>> {
        self.fields.values().filter(move |f| f.kind() == kind)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Tag every field with an owning node
    pub fn set_node(&self, node: Option<NodeId>) {
        for field in self.fields.values() {
            field.set_node(node);
        }
    }
}

impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.fields.values().map(|field| (field.name().to_string(), field.kind())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_connect_propagates_writes() {
        let output = Field::<f64>::output("Out", "");
        let input = Field::<f64>::input("In", "");

        output.connect(&input).unwrap();
        output.set(3.5).unwrap();

        assert_eq!(input.get().unwrap(), 3.5);
        output.set(-1.0).unwrap();
        assert_eq!(input.get().unwrap(), -1.0);
    }

    #[test]
    fn test_fan_out() {
        let state = Field::<u32>::state("Count", "");
        let a = Field::<u32>::input("A", "");
        let b = Field::<u32>::input("B", "");

        state.connect(&a).unwrap();
        state.connect(&b).unwrap();
        state.set(7).unwrap();

        assert_eq!(a.get().unwrap(), 7);
        assert_eq!(b.get().unwrap(), 7);
        assert_eq!(AnyField::sink_ids(&state), vec![a.id(), b.id()]);
    }

    #[test]
    fn test_type_mismatch_leaves_fields_untouched() {
        let output = Field::<f64>::output("Out", "");
        let input = Field::<i32>::input("In", "");

        let err = connect(&output, &input).unwrap_err();
        assert!(matches!(err, FieldError::TypeMismatch { .. }));
        assert!(!input.is_connected());
        assert!(AnyField::sink_ids(&output).is_empty());
    }

    #[test]
    fn test_residency_mismatch() {
        let output = Field::<Vec<f32>>::new_on(FieldKind::Output, Residency::Gpu, "Out", "");
        let input = Field::<Vec<f32>>::input("In", "");

        let err = output.connect(&input).unwrap_err();
        assert!(matches!(err, FieldError::ResidencyMismatch { .. }));
        assert!(!input.is_connected());
    }

    #[test]
    fn test_single_producer() {
        let first = Field::<f32>::output("First", "");
        let second = Field::<f32>::output("Second", "");
        let input = Field::<f32>::input("In", "");

        first.connect(&input).unwrap();
        // Same source again is fine
        first.connect(&input).unwrap();
        assert_eq!(AnyField::sink_ids(&first).len(), 1);

        let err = second.connect(&input).unwrap_err();
        assert!(matches!(err, FieldError::AlreadyConnected { .. }));
        assert_eq!(AnyField::source_id(&input), Some(first.id()));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let output = Field::<f32>::output("Out", "");
        let input = Field::<f32>::input("In", "");

        input.disconnect();
        output.connect(&input).unwrap();
        input.disconnect();
        input.disconnect();

        assert!(!input.is_connected());
        assert!(AnyField::sink_ids(&output).is_empty());
        assert!(matches!(input.get(), Err(FieldError::UnresolvedInput { .. })));
    }

    #[test]
    fn test_disconnect_from_source_side() {
        let output = Field::<f32>::output("Out", "");
        let a = Field::<f32>::input("A", "");
        let b = Field::<f32>::input("B", "");
        output.connect(&a).unwrap();
        output.connect(&b).unwrap();

        output.disconnect_sink(&a);
        assert!(!a.is_connected());
        assert!(b.is_connected());

        output.disconnect_sinks();
        assert!(!b.is_connected());
        assert!(AnyField::sink_ids(&output).is_empty());
    }

    #[test]
    fn test_unresolved_input() {
        let input = Field::<f64>::input("In", "");
        assert!(matches!(input.get(), Err(FieldError::UnresolvedInput { .. })));
    }

    #[test]
    fn test_dropped_source_unresolves_input() {
        let input = Field::<f64>::input("In", "");
        {
            let output = Field::<f64>::output("Out", "");
            output.set(1.0).unwrap();
            output.connect(&input).unwrap();
        }
        assert!(!input.is_connected());
        assert!(matches!(input.get(), Err(FieldError::UnresolvedInput { .. })));
    }

    #[test]
    fn test_empty_owned_field() {
        let state = Field::<f64>::state("S", "");
        assert!(matches!(state.get(), Err(FieldError::EmptyField { .. })));
        assert!(matches!(state.modify(|v| *v += 1.0), Err(FieldError::EmptyField { .. })));
    }

    #[test]
    fn test_write_to_input_rejected() {
        let output = Field::<f64>::output("Out", "");
        let input = Field::<f64>::input("In", "");
        output.set(1.0).unwrap();
        output.connect(&input).unwrap();

        assert!(matches!(input.set(2.0), Err(FieldError::WriteToInput { .. })));
        assert!(matches!(input.clear(), Err(FieldError::WriteToInput { .. })));
        assert_eq!(output.get().unwrap(), 1.0);
    }

    #[test]
    fn test_connect_requires_input_target() {
        let a = Field::<f64>::output("A", "");
        let b = Field::<f64>::output("B", "");
        assert!(matches!(a.connect(&b), Err(FieldError::NotAnInput { .. })));
    }

    #[test]
    fn test_forwarding_chain() {
        let state = Field::<i64>::state("S", "");
        let node_in = Field::<i64>::input("NodeIn", "");
        let module_in = Field::<i64>::input("ModuleIn", "");

        state.connect(&node_in).unwrap();
        node_in.connect(&module_in).unwrap();
        state.set(42).unwrap();

        assert_eq!(module_in.get().unwrap(), 42);
    }

    #[test]
    fn test_forwarding_cycle_rejected() {
        let a = Field::<i64>::input("A", "");
        let b = Field::<i64>::input("B", "");

        a.connect(&b).unwrap();
        assert!(matches!(b.connect(&a), Err(FieldError::CyclicDependency { .. })));
        assert!(matches!(a.connect(&a), Err(FieldError::CyclicDependency { .. })));
        assert!(!a.is_connected());
    }

    #[test]
    fn test_observers_run_in_order_after_write() {
        let param = Field::<u32>::param("Rows", 4, "");
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&log);
        let weak = param.downgrade();
        param.attach(move || {
            let rows = weak.upgrade().and_then(|p| p.get().ok());
            first.lock().push(("first", rows));
        });
        let second = Arc::clone(&log);
        param.attach(move || second.lock().push(("second", None)));

        param.set(8).unwrap();

        assert_eq!(*log.lock(), vec![("first", Some(8)), ("second", None)]);
    }

    #[test]
    fn test_input_observers_fire_on_source_write() {
        let output = Field::<f32>::output("Out", "");
        let input = Field::<f32>::input("In", "");
        output.connect(&input).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        input.attach(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        output.set(1.0).unwrap();
        output.modify(|v| *v *= 2.0).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_version_counts_writes() {
        let state = Field::<f32>::state("S", "");
        assert_eq!(state.version(), 0);
        state.set(1.0).unwrap();
        state.modify(|v| *v += 1.0).unwrap();
        assert_eq!(state.version(), 2);
    }

    #[test]
    fn test_promote_output() {
        let state = Field::<f32>::state("S", "");
        assert!(!state.is_output_port());
        state.promote_output().unwrap();
        state.promote_output().unwrap();
        assert!(state.is_output_port());

        let input = Field::<f32>::input("In", "");
        assert!(matches!(
            input.promote_output(),
            Err(FieldError::InvalidPromotion { .. })
        ));
    }

    #[test]
    fn test_promote_after_connect_rejected() {
        let state = Field::<f32>::state("S", "");
        let input = Field::<f32>::input("In", "");
        state.connect(&input).unwrap();

        assert!(matches!(
            state.promote_output(),
            Err(FieldError::InvalidPromotion { .. })
        ));
        assert!(!state.is_output_port());
    }

    #[test]
    fn test_field_set_lookup() {
        let mut set = FieldSet::new();
        let rows = set.insert(Field::<u32>::param("Rows", 4, "Row count"));
        set.insert(Field::<f64>::state("Height", ""));

        assert_eq!(set.len(), 2);
        assert_eq!(set.typed::<u32>("Rows").unwrap().id(), rows.id());
        assert!(set.typed::<f64>("Rows").is_none());
        assert_eq!(set.of_kind(FieldKind::State).count(), 1);
        let names: Vec<_> = set.iter().map(|f| f.name().to_string()).collect();
        assert_eq!(names, vec!["Rows", "Height"]);
    }
}

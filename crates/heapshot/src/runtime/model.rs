//! Heap Model - Data-Driven Runtime Binding
//!
//! `HeapModel` implements [`HeapRuntime`] over a heap described as plain
//! data: types with ordered fields, objects with field slots, arrays with
//! element slots, and per-domain static blocks. It is used to replay heaps
//! recorded elsewhere and to drive the scanner without a live runtime.
//!
//! Identities for types, fields and objects come from one shared counter so
//! that a static pseudo-object (identified by its type id) never collides
//! with a real object id.
//!
//! Every reflective read is counted; [`HeapModel::read_count`] lets callers
//! check how much work a dump performed.

use super::{
    DomainId, FieldDescriptor, FieldId, FieldKind, HeapRuntime, ObjectId, TypeId, TypeShape,
};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Content of one field or array element
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Null reference
    Null,
    /// Reference to a heap object
    Ref(ObjectId),
    /// Inline value-type instance
    Value(Arc<Record>),
    /// Primitive data
    Scalar(u64),
}

/// Field slots of an object, static block or embedded value
///
/// Array objects keep their elements in `elements`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    slots: FxHashMap<FieldId, Slot>,
    elements: Vec<Slot>,
}

impl Record {
    /// Create empty record (all fields zeroed)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create array body
    pub fn array(elements: Vec<Slot>) -> Self {
        Self {
            slots: FxHashMap::default(),
            elements,
        }
    }

    /// Builder-style field assignment
    pub fn with(mut self, field: FieldId, slot: Slot) -> Self {
        self.set(field, slot);
        self
    }

    /// Assign a field
    pub fn set(&mut self, field: FieldId, slot: Slot) {
        self.slots.insert(field, slot);
    }

    /// Read a field
    pub fn get(&self, field: FieldId) -> Option<&Slot> {
        self.slots.get(&field)
    }

    /// Array elements
    pub fn elements(&self) -> &[Slot] {
        &self.elements
    }
}

#[derive(Debug, Clone)]
struct ModelType {
    name: Option<String>,
    shape: TypeShape,
    fields: Vec<FieldDescriptor>,
    value_size: Option<usize>,
    element_size: Option<usize>,
}

#[derive(Debug, Clone)]
struct ModelObject {
    ty: TypeId,
    size: u32,
    body: Arc<Record>,
}

/// In-memory heap implementing the runtime contract
///
/// Types, fields and objects draw ids from one counter stepping by 0x10,
/// so a model holds at most about 268 million of them in total. Defining
/// more panics.
#[derive(Debug)]
pub struct HeapModel {
    next_id: u32,
    types: FxHashMap<TypeId, ModelType>,
    objects: FxHashMap<ObjectId, ModelObject>,
    statics: FxHashMap<(DomainId, TypeId), Arc<Record>>,
    domains: Vec<DomainId>,
    dead: RwLock<FxHashSet<ObjectId>>,
    reads: AtomicUsize,
    field_enumerations: AtomicUsize,
    collections: AtomicUsize,
}

impl Default for HeapModel {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapModel {
    /// Create an empty heap with one root domain
    pub fn new() -> Self {
        Self {
            next_id: 0x100,
            types: FxHashMap::default(),
            objects: FxHashMap::default(),
            statics: FxHashMap::default(),
            domains: vec![DomainId(1)],
            dead: RwLock::new(FxHashSet::default()),
            reads: AtomicUsize::new(0),
            field_enumerations: AtomicUsize::new(0),
            collections: AtomicUsize::new(0),
        }
    }

    fn next_raw(&mut self) -> u32 {
        self.next_id = self
            .next_id
            .checked_add(0x10)
            .unwrap_or_else(|| panic!("HeapModel id space exhausted after {:#x}", self.next_id));
        self.next_id
    }

    fn define_type(
        &mut self,
        name: &str,
        shape: TypeShape,
        value_size: Option<usize>,
        element_size: Option<usize>,
    ) -> TypeId {
        let raw = self.next_raw();
        let id = TypeId::new(raw).unwrap_or_else(|| unreachable!("id counter starts above zero"));
        self.types.insert(
            id,
            ModelType {
                name: Some(name.to_string()),
                shape,
                fields: Vec::new(),
                value_size,
                element_size,
            },
        );
        id
    }

    /// Define a reference type (class)
    pub fn add_class(&mut self, name: &str) -> TypeId {
        self.define_type(name, TypeShape::Object, None, None)
    }

    /// Define a value type with the given inline footprint
    pub fn add_value_type(&mut self, name: &str, size: usize) -> TypeId {
        self.define_type(name, TypeShape::Object, Some(size), None)
    }

    /// Define an array type
    pub fn add_array_type(&mut self, name: &str, element: FieldKind, element_size: usize) -> TypeId {
        self.define_type(name, TypeShape::Array { element }, None, Some(element_size))
    }

    fn define_field(&mut self, ty: TypeId, name: &str, kind: FieldKind, is_static: bool) -> FieldId {
        let raw = self.next_raw();
        let id = FieldId::new(raw).unwrap_or_else(|| unreachable!("id counter starts above zero"));
        if let Some(model) = self.types.get_mut(&ty) {
            model.fields.push(FieldDescriptor {
                id,
                name: name.to_string(),
                declaring_type: ty,
                kind,
                is_static,
            });
        }
        id
    }

    /// Declare an instance field
    pub fn add_field(&mut self, ty: TypeId, name: &str, kind: FieldKind) -> FieldId {
        self.define_field(ty, name, kind, false)
    }

    /// Declare a static field
    pub fn add_static_field(&mut self, ty: TypeId, name: &str, kind: FieldKind) -> FieldId {
        self.define_field(ty, name, kind, true)
    }

    /// Add another execution domain
    pub fn add_domain(&mut self) -> DomainId {
        let domain = DomainId(self.domains.len() as u32 + 1);
        self.domains.push(domain);
        domain
    }

    /// Root domain created with the heap
    pub fn root_domain(&self) -> DomainId {
        self.domains[0]
    }

    /// Allocate an object of `ty` occupying `size` bytes
    pub fn alloc(&mut self, ty: TypeId, size: u32) -> ObjectId {
        let raw = self.next_raw();
        let id = ObjectId::new(raw).unwrap_or_else(|| unreachable!("id counter starts above zero"));
        self.objects.insert(
            id,
            ModelObject {
                ty,
                size,
                body: Arc::new(Record::new()),
            },
        );
        id
    }

    /// Assign a field of an object
    pub fn set_field(&mut self, obj: ObjectId, field: FieldId, slot: Slot) {
        if let Some(object) = self.objects.get_mut(&obj) {
            Arc::make_mut(&mut object.body).set(field, slot);
        }
    }

    /// Replace the elements of an array object
    pub fn set_elements(&mut self, obj: ObjectId, elements: Vec<Slot>) {
        if let Some(object) = self.objects.get_mut(&obj) {
            object.body = Arc::new(Record::array(elements));
        }
    }

    /// Assign a static field of `ty` within `domain`
    pub fn set_static(&mut self, domain: DomainId, ty: TypeId, field: FieldId, slot: Slot) {
        let block = self.statics.entry((domain, ty)).or_default();
        Arc::make_mut(block).set(field, slot);
    }

    /// Drop the display name of a type, as if reflection could no longer see it
    pub fn forget_type_name(&mut self, ty: TypeId) {
        if let Some(model) = self.types.get_mut(&ty) {
            model.name = None;
        }
    }

    /// Mark an object unreachable; the next liveness sweep removes it
    pub fn kill(&self, obj: ObjectId) {
        self.dead.write().insert(obj);
    }

    /// All objects with their types, sorted by id
    pub fn objects(&self) -> Vec<(ObjectId, TypeId)> {
        let mut objects: Vec<_> = self.objects.iter().map(|(id, o)| (*id, o.ty)).collect();
        objects.sort_unstable();
        objects
    }

    /// All types, sorted by id
    pub fn type_ids(&self) -> Vec<TypeId> {
        let mut types: Vec<_> = self.types.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Number of field and element reads served so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of field-list enumerations served so far
    pub fn field_enumeration_count(&self) -> usize {
        self.field_enumerations.load(Ordering::Relaxed)
    }

    /// Number of collection requests received
    pub fn collection_count(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }

    fn count_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }
}

impl HeapRuntime for HeapModel {
    type Storage = Arc<Record>;

    fn request_collection(&self) {
        self.collections.fetch_add(1, Ordering::Relaxed);
    }

    fn domains(&self) -> Vec<DomainId> {
        self.domains.clone()
    }

    fn type_name(&self, ty: TypeId) -> Option<String> {
        self.types.get(&ty).and_then(|t| t.name.clone())
    }

    fn type_shape(&self, ty: TypeId) -> Option<TypeShape> {
        self.types.get(&ty).map(|t| t.shape)
    }

    fn fields(&self, ty: TypeId) -> Vec<FieldDescriptor> {
        self.field_enumerations.fetch_add(1, Ordering::Relaxed);
        self.types
            .get(&ty)
            .map(|t| t.fields.clone())
            .unwrap_or_default()
    }

    fn value_size(&self, ty: TypeId) -> Option<usize> {
        self.types.get(&ty).and_then(|t| t.value_size)
    }

    fn array_element_size(&self, array_ty: TypeId) -> Option<usize> {
        self.types.get(&array_ty).and_then(|t| t.element_size)
    }

    fn object_size(&self, obj: ObjectId) -> u32 {
        self.objects.get(&obj).map_or(0, |o| o.size)
    }

    fn is_alive(&self, obj: ObjectId) -> bool {
        self.objects.contains_key(&obj) && !self.dead.read().contains(&obj)
    }

    fn object_storage(&self, obj: ObjectId) -> Option<Self::Storage> {
        self.objects.get(&obj).map(|o| o.body.clone())
    }

    fn static_storage(&self, domain: DomainId, ty: TypeId) -> Option<Self::Storage> {
        if !self.domains.contains(&domain) || !self.types.contains_key(&ty) {
            return None;
        }
        Some(
            self.statics
                .get(&(domain, ty))
                .cloned()
                .unwrap_or_default(),
        )
    }

    fn read_reference(&self, storage: &Self::Storage, field: &FieldDescriptor) -> Option<ObjectId> {
        self.count_read();
        match storage.get(field.id) {
            Some(Slot::Ref(target)) => Some(*target),
            _ => None,
        }
    }

    fn read_value(&self, storage: &Self::Storage, field: &FieldDescriptor) -> Option<Self::Storage> {
        self.count_read();
        match storage.get(field.id) {
            Some(Slot::Value(value)) => Some(value.clone()),
            // Unassigned inline values are zero-initialized
            None => Some(Arc::new(Record::new())),
            Some(_) => None,
        }
    }

    fn array_length(&self, storage: &Self::Storage) -> usize {
        storage.elements().len()
    }

    fn read_element_reference(&self, storage: &Self::Storage, index: usize) -> Option<ObjectId> {
        self.count_read();
        match storage.elements().get(index) {
            Some(Slot::Ref(target)) => Some(*target),
            _ => None,
        }
    }

    fn read_element_value(&self, storage: &Self::Storage, index: usize) -> Option<Self::Storage> {
        self.count_read();
        match storage.elements().get(index) {
            Some(Slot::Value(value)) => Some(value.clone()),
            Some(Slot::Null) => Some(Arc::new(Record::new())),
            _ => None,
        }
    }
}
